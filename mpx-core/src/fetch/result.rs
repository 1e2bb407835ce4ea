//! Materializes an executed fetch into a readable byte stream shaped by the
//! operation kind.

use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncSeek};

use mpx_common::error::{MpxError, Result};

use super::{Fetch, FetchOps};

/// Resolved revision metadata, the shape of the `.info` JSON document.
/// Field order is fixed: `Version`, then `Time`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevInfo {
    #[serde(rename = "Version")]
    pub version: String,
    #[serde(rename = "Time")]
    pub time: DateTime<Utc>,
}

/// Encodes the `.info` document for a resolved version. The timestamp is
/// normalized to UTC before encoding. Exposed as a pure helper because both
/// the resolver path and consumers persisting resolver results need it.
pub fn marshal_info<Tz: TimeZone>(version: &str, time: DateTime<Tz>) -> Result<String> {
    let info = RevInfo {
        version: version.to_string(),
        time: time.with_timezone(&Utc),
    };
    Ok(serde_json::to_string(&info)?)
}

/// The stream type produced by [`FetchResult::open`] and consumed as an
/// HTTP response body.
pub trait ContentStream: AsyncRead + AsyncSeek + Send + Unpin + std::fmt::Debug {}

impl<T: AsyncRead + AsyncSeek + Send + Unpin + std::fmt::Debug> ContentStream for T {}

/// The record produced by executing a fetch. Which fields are populated
/// depends on the descriptor's operation kind.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub fetch: Arc<Fetch>,
    /// Canonical version, for `Resolve`.
    pub version: String,
    /// Commit instant in UTC, for `Resolve`.
    pub time: DateTime<Utc>,
    /// Ascending, de-duplicated version list, for `List`.
    pub versions: Vec<String>,
    /// On-disk artifact paths, for the three download kinds.
    pub info: PathBuf,
    pub go_mod: PathBuf,
    pub zip: PathBuf,
}

impl FetchResult {
    pub fn new(fetch: Arc<Fetch>) -> Self {
        FetchResult {
            fetch,
            version: String::new(),
            time: unset_time(),
            versions: Vec::new(),
            info: PathBuf::new(),
            go_mod: PathBuf::new(),
            zip: PathBuf::new(),
        }
    }

    /// Renders the result as a readable stream. Resolve and list results
    /// are served from memory; download results open their artifact file
    /// read-only. The caller owns deletion of artifact files if required.
    pub async fn open(&self) -> Result<Box<dyn ContentStream>> {
        match self.fetch.ops {
            FetchOps::Resolve => {
                let content = marshal_info(&self.version, self.time)?;
                Ok(Box::new(Cursor::new(content.into_bytes())))
            }
            FetchOps::List => {
                let content = self.versions.join("\n");
                Ok(Box::new(Cursor::new(content.into_bytes())))
            }
            FetchOps::DownloadInfo => Ok(Box::new(File::open(&self.info).await?)),
            FetchOps::DownloadMod => Ok(Box::new(File::open(&self.go_mod).await?)),
            FetchOps::DownloadZip => Ok(Box::new(File::open(&self.zip).await?)),
            FetchOps::Invalid => Err(MpxError::InvalidFetchOps),
        }
    }
}

/// The zero instant (0001-01-01T00:00:00Z), reported when a resolver result
/// carries no timestamp.
pub(crate) fn unset_time() -> DateTime<Utc> {
    DateTime::from_timestamp(-62_135_596_800, 0).unwrap_or_default()
}
