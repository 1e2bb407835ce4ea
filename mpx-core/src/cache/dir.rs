//! Disk-backed cache implementation.

use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncSeek, ReadBuf};
use tracing::debug;

use mpx_common::error::{MpxError, Result};

use super::{CacheReader, Cacher};

/// A [`Cacher`] over a directory on the local disk. Logical names map to
/// nested file paths under the root; an entry's expiration instant is
/// encoded as its modification time, set by [`put`](Cacher::put) to
/// `now + ttl`. Updates go through a same-directory temp file and an atomic
/// rename, so readers observe either the old entry or the new one, never a
/// mix.
pub struct DirCacher {
    root: PathBuf,
}

impl DirCacher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, name: &str) -> PathBuf {
        let mut path = self.root.clone();
        path.extend(name.split('/'));
        path
    }
}

#[async_trait]
impl Cacher for DirCacher {
    async fn get(&self, name: &str) -> Result<Box<dyn CacheReader>> {
        let path = self.entry_path(name);
        let meta = match tokio::fs::metadata(&path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(MpxError::CacheMiss(name.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let modified = meta.modified()?;
        if is_expired(modified) {
            return Err(MpxError::CacheMiss(name.to_string()));
        }

        let file = tokio::fs::File::open(&path).await?;
        Ok(Box::new(DiskReader {
            file,
            size: meta.len(),
            modified,
        }))
    }

    async fn put(
        &self,
        name: &str,
        content: &mut (dyn AsyncRead + Send + Unpin),
        ttl: Duration,
    ) -> Result<()> {
        let path = self.entry_path(name);
        let dir = path.parent().unwrap_or(&self.root).to_path_buf();
        create_cache_dirs(&dir)?;

        // Same-directory temp file keeps the final rename on one
        // filesystem. An unpersisted temp file is removed on drop, which
        // also covers cancellation mid-copy.
        let base = path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp = tempfile::Builder::new()
            .prefix(&format!(".{base}.tmp"))
            .tempfile_in(&dir)?;

        let mut writer = tokio::fs::File::from_std(temp.reopen()?);
        tokio::io::copy(content, &mut writer).await?;
        writer.sync_all().await?;
        drop(writer);

        let file = temp.persist(&path).map_err(|e| MpxError::from(e.error))?;
        debug!("cached {name}");

        let expires = SystemTime::now() + ttl;
        file.set_times(std::fs::FileTimes::new().set_modified(expires))?;
        Ok(())
    }

    async fn cleanup(&self) -> Result<()> {
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let meta = entry.metadata().await?;
            if !is_expired(meta.modified()?) {
                continue;
            }
            let path = entry.path();
            if meta.is_dir() {
                // The sweep is shallow; a still-populated directory stays
                // until its entries empty out. Any other removal failure is
                // the caller's to see.
                match tokio::fs::remove_dir(&path).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::DirectoryNotEmpty => {
                        debug!("not removing {}: {e}", path.display());
                    }
                    Err(e) => return Err(e.into()),
                }
            } else {
                tokio::fs::remove_file(&path).await?;
            }
        }
        Ok(())
    }
}

/// An entry is expired once the clock passes its modification time, which
/// holds the expiration instant. A file placed in the cache directory by
/// hand therefore counts as expired.
fn is_expired(modified: SystemTime) -> bool {
    SystemTime::now() > modified
}

#[cfg(unix)]
fn create_cache_dirs(dir: &Path) -> io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(0o750)
        .create(dir)
}

#[cfg(not(unix))]
fn create_cache_dirs(dir: &Path) -> io::Result<()> {
    std::fs::create_dir_all(dir)
}

#[derive(Debug)]
struct DiskReader {
    file: tokio::fs::File,
    size: u64,
    modified: SystemTime,
}

impl AsyncRead for DiskReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.file).poll_read(cx, buf)
    }
}

impl AsyncSeek for DiskReader {
    fn start_seek(mut self: Pin<&mut Self>, position: SeekFrom) -> io::Result<()> {
        Pin::new(&mut self.file).start_seek(position)
    }

    fn poll_complete(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<u64>> {
        Pin::new(&mut self.file).poll_complete(cx)
    }
}

impl CacheReader for DiskReader {
    fn size(&self) -> Option<u64> {
        Some(self.size)
    }

    fn last_modified(&self) -> Option<SystemTime> {
        Some(self.modified)
    }

    fn etag(&self) -> Option<String> {
        let mtime = self.modified.duration_since(UNIX_EPOCH).ok()?;
        Some(format!("\"{:x}-{:x}\"", mtime.as_secs(), self.size))
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncSeekExt};

    use super::*;

    async fn put_bytes(cacher: &DirCacher, name: &str, content: &[u8], ttl: Duration) {
        let mut reader = io::Cursor::new(content.to_vec());
        cacher.put(name, &mut reader, ttl).await.unwrap();
    }

    async fn get_string(cacher: &DirCacher, name: &str) -> String {
        let mut stream = cacher.get(name).await.unwrap();
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await.unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let cacher = DirCacher::new(dir.path());

        let name = "example.com/foo/bar/@v/v1.0.0.info";
        put_bytes(&cacher, name, b"info body", Duration::from_secs(60)).await;
        assert_eq!(get_string(&cacher, name).await, "info body");

        // The entry lands at the slash-name's nested path under the root.
        assert!(dir
            .path()
            .join("example.com/foo/bar/@v/v1.0.0.info")
            .is_file());
    }

    #[tokio::test]
    async fn get_missing_is_cache_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cacher = DirCacher::new(dir.path());
        let err = cacher.get("example.com/none/@latest").await.unwrap_err();
        assert!(err.is_cache_miss(), "got {err:?}");
    }

    #[tokio::test]
    async fn get_expired_is_cache_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cacher = DirCacher::new(dir.path());

        let name = "example.com/foo/@v/v1.0.0.mod";
        put_bytes(&cacher, name, b"module example.com/foo\n", Duration::ZERO).await;

        // A zero ttl expires the entry as soon as the clock ticks.
        tokio::time::sleep(Duration::from_millis(20)).await;
        let err = cacher.get(name).await.unwrap_err();
        assert!(err.is_cache_miss(), "got {err:?}");
    }

    #[tokio::test]
    async fn later_put_wins() {
        let dir = tempfile::tempdir().unwrap();
        let cacher = DirCacher::new(dir.path());

        let name = "example.com/foo/@v/list";
        put_bytes(&cacher, name, b"v1.0.0", Duration::from_secs(60)).await;
        put_bytes(&cacher, name, b"v1.0.0\nv1.1.0", Duration::from_secs(60)).await;
        assert_eq!(get_string(&cacher, name).await, "v1.0.0\nv1.1.0");
    }

    #[tokio::test]
    async fn reader_exposes_capabilities() {
        let dir = tempfile::tempdir().unwrap();
        let cacher = DirCacher::new(dir.path());

        let name = "example.com/foo/@v/v1.0.0.zip";
        put_bytes(&cacher, name, b"zip bytes", Duration::from_secs(60)).await;

        let mut stream = cacher.get(name).await.unwrap();
        assert_eq!(stream.size(), Some(9));
        let modified = stream.last_modified().expect("last_modified");
        assert!(modified > SystemTime::now(), "expiration is in the future");
        let etag = stream.etag().expect("etag");
        assert!(etag.starts_with('"') && etag.ends_with('"'));

        // Streams are seekable for range requests.
        stream.seek(SeekFrom::Start(4)).await.unwrap();
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"bytes");
    }

    #[tokio::test]
    async fn put_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let cacher = DirCacher::new(dir.path());

        put_bytes(
            &cacher,
            "example.com/foo/@v/v1.0.0.info",
            b"x",
            Duration::from_secs(60),
        )
        .await;

        let parent = dir.path().join("example.com/foo/@v");
        let names: Vec<_> = std::fs::read_dir(&parent)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["v1.0.0.info"]);
    }

    #[tokio::test]
    async fn cleanup_removes_expired_direct_children() {
        let dir = tempfile::tempdir().unwrap();
        let cacher = DirCacher::new(dir.path());

        put_bytes(&cacher, "expired.txt", b"old", Duration::ZERO).await;
        put_bytes(&cacher, "fresh.txt", b"new", Duration::from_secs(60)).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        cacher.cleanup().await.unwrap();
        assert!(!dir.path().join("expired.txt").exists());
        assert!(dir.path().join("fresh.txt").exists());
    }

    #[tokio::test]
    async fn cleanup_is_shallow() {
        let dir = tempfile::tempdir().unwrap();
        let cacher = DirCacher::new(dir.path());

        let name = "example.com/foo/@v/v1.0.0.info";
        put_bytes(&cacher, name, b"nested", Duration::from_secs(60)).await;

        // The nested entry's parent directories are not recursed into, and
        // the sweep never deletes a non-empty directory.
        cacher.cleanup().await.unwrap();
        assert_eq!(get_string(&cacher, name).await, "nested");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn put_creates_dirs_with_restricted_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let cacher = DirCacher::new(dir.path().join("cache"));
        put_bytes(
            &cacher,
            "example.com/foo/@v/v1.0.0.info",
            b"x",
            Duration::from_secs(60),
        )
        .await;

        let mode = std::fs::metadata(dir.path().join("cache/example.com"))
            .unwrap()
            .permissions()
            .mode();
        // 0750 before the umask: never group-writable or world-accessible.
        assert_eq!(mode & 0o027, 0);
    }
}
