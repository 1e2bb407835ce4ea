//! The keyed byte store backing repeated fetches.

use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncSeek};

use mpx_common::error::Result;

pub mod dir;
pub mod sweeper;

pub use dir::DirCacher;
pub use sweeper::spawn_cleanup_task;

/// A readable cache entry. Beyond the byte stream, implementations may
/// expose the entry's size, last-modified instant, and a strong entity tag;
/// callers probe these to enable range and conditional requests, and absent
/// capabilities simply disable those optimizations.
pub trait CacheReader: AsyncRead + AsyncSeek + Send + Unpin + std::fmt::Debug {
    fn size(&self) -> Option<u64> {
        None
    }

    fn last_modified(&self) -> Option<SystemTime> {
        None
    }

    /// A strong entity tag per RFC 7232, section 2.3, used as-is.
    fn etag(&self) -> Option<String> {
        None
    }
}

/// A cache of module files, keyed by slash-separated logical names.
#[async_trait]
pub trait Cacher: Send + Sync {
    /// Gets the entry for the name. Absent and expired entries report
    /// [`MpxError::CacheMiss`](mpx_common::MpxError::CacheMiss); a returned
    /// stream always carries the most recent completed [`put`](Self::put)
    /// for the name.
    async fn get(&self, name: &str) -> Result<Box<dyn CacheReader>>;

    /// Stores an entry under the name, expiring after `ttl`. Concurrent
    /// puts of the same name are safe; the last completed write wins and
    /// readers never observe a torn entry.
    async fn put(
        &self,
        name: &str,
        content: &mut (dyn AsyncRead + Send + Unpin),
        ttl: Duration,
    ) -> Result<()>;

    /// Removes expired entries.
    async fn cleanup(&self) -> Result<()>;
}
