//! Driver implementation that shells out to the build tool binary.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, error};

use mpx_common::config::Config;
use mpx_common::error::{MpxError, Result};

use crate::fetch::result::unset_time;
use crate::fetch::{Fetch, FetchOps, FetchResult};

use super::Driver;

/// Runs the configured build-tool binary in direct mode, one invocation per
/// fetch. The child inherits the configured driver environment with its
/// module path space pinned under the fetch's scratch directory; the child
/// is killed if the operation is cancelled.
pub struct GoDriver {
    config: Config,
}

impl GoDriver {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    async fn run(&self, fetch: &Fetch, gopath: &Path, args: &[&str]) -> Result<Vec<u8>> {
        debug!(
            "running {} {:?} for {}",
            self.config.go_bin, args, fetch.name
        );
        let mut cmd = Command::new(&self.config.go_bin);
        cmd.args(args);
        cmd.env_clear();
        for kv in &self.config.go_bin_env {
            if let Some((key, value)) = kv.split_once('=') {
                cmd.env(key, value);
            }
        }
        cmd.env("GOPATH", gopath);
        cmd.env("GOPROXY", "direct");
        // -modcacherw keeps the scratch module cache deletable by the
        // caller that owns the temp directory.
        cmd.env("GOFLAGS", "-modcacherw");
        if !fetch.required_to_verify {
            cmd.env("GOSUMDB", "off");
            cmd.env("GONOSUMCHECK", "1");
        }
        cmd.current_dir(&fetch.temp_dir);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let output = cmd.output().await?;
        if !output.status.success() {
            // Download failures are reported as structured JSON on stdout;
            // prefer that message over raw stderr.
            if let Ok(download) = serde_json::from_slice::<DownloadOutput>(&output.stdout) {
                if let Some(msg) = download.error {
                    return Err(MpxError::Driver(msg));
                }
            }
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!(
                "{} {:?} failed for {}: {}",
                self.config.go_bin,
                args,
                fetch.name,
                stderr.trim()
            );
            return Err(MpxError::Driver(format!(
                "{} command failed: {}",
                self.config.go_bin,
                stderr.trim()
            )));
        }
        Ok(output.stdout)
    }
}

/// Removes a per-fetch scratch subdirectory on drop unless disarmed.
/// Covers command failure, result-parse failure, and cancellation
/// mid-download; on success the artifacts under it must outlive the fetch,
/// so the guard is disarmed and the caller that owns the temp directory
/// deletes it.
struct ScratchGuard {
    path: PathBuf,
    keep: bool,
}

impl ScratchGuard {
    fn new(path: PathBuf) -> Self {
        Self { path, keep: false }
    }

    fn disarm(&mut self) {
        self.keep = true;
    }
}

impl Drop for ScratchGuard {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                debug!("failed to remove scratch dir {}: {e}", self.path.display());
            }
        }
    }
}

#[async_trait]
impl Driver for GoDriver {
    async fn execute(&self, fetch: &Fetch) -> Result<FetchResult> {
        let args: Vec<&str> = match fetch.ops {
            FetchOps::Resolve => vec!["list", "-json", "-m", &fetch.mod_at_ver],
            FetchOps::List => vec!["list", "-json", "-m", "-versions", &fetch.mod_at_ver],
            FetchOps::DownloadInfo | FetchOps::DownloadMod | FetchOps::DownloadZip => {
                vec!["mod", "download", "-json", &fetch.mod_at_ver]
            }
            FetchOps::Invalid => return Err(MpxError::InvalidFetchOps),
        };

        let gopath = fetch.temp_dir.join("gopath");
        tokio::fs::create_dir_all(&gopath).await?;
        let mut scratch = ScratchGuard::new(gopath.clone());

        let stdout = self.run(fetch, &gopath, &args).await?;

        let mut result = FetchResult::new(Arc::new(fetch.clone()));
        match fetch.ops {
            FetchOps::Resolve => {
                let parsed: ListOutput = serde_json::from_slice(&stdout)?;
                result.version = parsed.version.ok_or_else(|| {
                    MpxError::Driver(format!("no version resolved for {}", fetch.mod_at_ver))
                })?;
                result.time = parsed.time.unwrap_or_else(unset_time);
            }
            FetchOps::List => {
                let parsed: ListOutput = serde_json::from_slice(&stdout)?;
                let mut versions = parsed.versions.unwrap_or_default();
                sort_versions(&mut versions);
                versions.dedup();
                result.versions = versions;
            }
            _ => {
                let parsed: DownloadOutput = serde_json::from_slice(&stdout)?;
                if let Some(msg) = parsed.error {
                    return Err(MpxError::Driver(msg));
                }
                result.info = required_artifact(parsed.info, "Info", fetch)?;
                result.go_mod = required_artifact(parsed.go_mod, "GoMod", fetch)?;
                result.zip = required_artifact(parsed.zip, "Zip", fetch)?;
            }
        }
        scratch.disarm();
        Ok(result)
    }
}

fn required_artifact(path: Option<PathBuf>, field: &str, fetch: &Fetch) -> Result<PathBuf> {
    path.ok_or_else(|| {
        MpxError::Driver(format!(
            "download of {} reported no {field} file",
            fetch.mod_at_ver
        ))
    })
}

/// Ascending semver order; entries that fail to parse sort after all
/// parseable ones, lexicographically.
fn sort_versions(versions: &mut [String]) {
    versions.sort_by(|a, b| match (semver_key(a), semver_key(b)) {
        (Some(ka), Some(kb)) => ka.cmp(&kb),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => a.cmp(b),
    });
}

fn semver_key(version: &str) -> Option<semver::Version> {
    version
        .strip_prefix('v')
        .and_then(|rest| semver::Version::parse(rest).ok())
}

#[derive(Debug, Deserialize)]
struct ListOutput {
    #[serde(rename = "Version")]
    version: Option<String>,
    #[serde(rename = "Time")]
    time: Option<DateTime<Utc>>,
    #[serde(rename = "Versions")]
    versions: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct DownloadOutput {
    #[serde(rename = "Info")]
    info: Option<PathBuf>,
    #[serde(rename = "GoMod")]
    go_mod: Option<PathBuf>,
    #[serde(rename = "Zip")]
    zip: Option<PathBuf>,
    #[serde(rename = "Error")]
    error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::tests::test_config;

    #[test]
    fn sort_versions_ascending_semver() {
        let mut versions = vec![
            "v1.10.0".to_string(),
            "v1.2.0".to_string(),
            "v1.2.0-pre".to_string(),
            "v1.2.0".to_string(),
        ];
        sort_versions(&mut versions);
        versions.dedup();
        assert_eq!(versions, ["v1.2.0-pre", "v1.2.0", "v1.10.0"]);
    }

    #[test]
    fn sort_versions_unparseable_sort_last() {
        let mut versions = vec!["zzz".to_string(), "v0.1.0".to_string()];
        sort_versions(&mut versions);
        assert_eq!(versions, ["v0.1.0", "zzz"]);
    }

    #[test]
    fn list_output_parses_driver_json() {
        let parsed: ListOutput = serde_json::from_slice(
            br#"{"Path":"example.com/foo/bar","Version":"v1.0.0","Time":"2019-11-09T02:19:31Z"}"#,
        )
        .unwrap();
        assert_eq!(parsed.version.as_deref(), Some("v1.0.0"));
        assert_eq!(
            parsed.time.unwrap().to_rfc3339(),
            "2019-11-09T02:19:31+00:00"
        );
    }

    #[test]
    fn download_output_parses_error_field() {
        let parsed: DownloadOutput = serde_json::from_slice(
            br#"{"Error":"module example.com/foo/bar: not found"}"#,
        )
        .unwrap();
        assert_eq!(
            parsed.error.as_deref(),
            Some("module example.com/foo/bar: not found")
        );
    }

    #[tokio::test]
    async fn execute_surfaces_driver_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(&[]);
        config.go_bin = "false".to_string();
        let fetch = Fetch::new(&config, "example.com/foo/bar/@latest", dir.path()).unwrap();

        let driver = GoDriver::new(config);
        let err = driver.execute(&fetch).await.unwrap_err();
        assert!(matches!(err, MpxError::Driver(_)), "got {err:?}");
        // Scratch files from the failed run are cleaned up.
        assert!(!dir.path().join("gopath").exists());
    }
}
