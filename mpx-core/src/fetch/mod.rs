//! Fetch request translation: parses an opaque proxy URL path into a typed,
//! validated fetch descriptor.

use std::fmt;
use std::path::PathBuf;

use mpx_common::config::Config;
use mpx_common::error::{MpxError, Result};

pub mod escape;
pub mod result;

pub use result::{marshal_info, ContentStream, FetchResult, RevInfo};

const CONTENT_TYPE_JSON: &str = "application/json; charset=utf-8";
const CONTENT_TYPE_TEXT: &str = "text/plain; charset=utf-8";
const CONTENT_TYPE_ZIP: &str = "application/zip";

/// The kind of a fetch operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchOps {
    #[default]
    Invalid,
    Resolve,
    List,
    DownloadInfo,
    DownloadMod,
    DownloadZip,
}

impl FetchOps {
    /// MIME type of the byte stream produced for this operation.
    pub fn content_type(self) -> &'static str {
        match self {
            FetchOps::Resolve | FetchOps::DownloadInfo => CONTENT_TYPE_JSON,
            FetchOps::List | FetchOps::DownloadMod => CONTENT_TYPE_TEXT,
            FetchOps::DownloadZip => CONTENT_TYPE_ZIP,
            FetchOps::Invalid => "",
        }
    }
}

impl fmt::Display for FetchOps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FetchOps::Resolve => "resolve",
            FetchOps::List => "list",
            FetchOps::DownloadInfo => "download info",
            FetchOps::DownloadMod => "download mod",
            FetchOps::DownloadZip => "download zip",
            FetchOps::Invalid => "invalid",
        };
        f.write_str(s)
    }
}

impl From<u8> for FetchOps {
    fn from(value: u8) -> Self {
        match value {
            1 => FetchOps::Resolve,
            2 => FetchOps::List,
            3 => FetchOps::DownloadInfo,
            4 => FetchOps::DownloadMod,
            5 => FetchOps::DownloadZip,
            _ => FetchOps::Invalid,
        }
    }
}

/// A parsed fetch request. Immutable after construction; a value is only
/// ever returned with a valid, non-`Invalid` operation.
#[derive(Debug, Clone)]
pub struct Fetch {
    pub ops: FetchOps,
    /// The original proxy path, kept for logging and as the cache key.
    pub name: String,
    /// Scratch directory for driver artifacts, caller-supplied and
    /// caller-owned.
    pub temp_dir: PathBuf,
    pub module_path: String,
    pub module_version: String,
    /// `<module_path>@<module_version>`, the driver argument form.
    pub mod_at_ver: String,
    pub required_to_verify: bool,
    pub content_type: &'static str,
}

impl Fetch {
    /// Classifies a proxy URL path. All validation failures produce a
    /// single-sentence [`MpxError::InvalidRequest`]; no partial descriptor
    /// escapes alongside an error.
    pub fn new(config: &Config, name: &str, temp_dir: impl Into<PathBuf>) -> Result<Self> {
        let (escaped_module_path, ops, module_version) = if let Some(prefix) =
            name.strip_suffix("/@latest")
        {
            (prefix, FetchOps::Resolve, "latest".to_string())
        } else if let Some((prefix, file)) = name.split_once("/@v/") {
            let ext = file_ext(file);
            let stem = &file[..file.len() - ext.len()];
            let mut ops = match ext {
                ".info" => FetchOps::DownloadInfo,
                ".mod" => FetchOps::DownloadMod,
                ".zip" => FetchOps::DownloadZip,
                "" if stem == "list" => FetchOps::List,
                "" => {
                    return Err(MpxError::invalid_request(format!(
                        "no file extension in filename {file:?}"
                    )));
                }
                _ => {
                    return Err(MpxError::invalid_request(format!(
                        "unexpected extension {ext:?}"
                    )));
                }
            };

            let module_version = if ops == FetchOps::List {
                "latest".to_string()
            } else {
                let version = escape::unescape_version(stem)?;
                if version == "latest" {
                    return Err(MpxError::invalid_request("invalid version"));
                }
                if !is_valid_semver(&version) {
                    // A non-semver identifier on an `.info` request needs a
                    // resolution pass first; everywhere else it is a client
                    // error.
                    if ops != FetchOps::DownloadInfo {
                        return Err(MpxError::invalid_request("unrecognized version"));
                    }
                    ops = FetchOps::Resolve;
                }
                version
            };
            (prefix, ops, module_version)
        } else {
            return Err(MpxError::invalid_request("missing /@v/"));
        };

        let module_path = escape::unescape_path(escaped_module_path)?;
        let mod_at_ver = format!("{module_path}@{module_version}");
        let required_to_verify = config.verification_required(&module_path);

        Ok(Fetch {
            content_type: ops.content_type(),
            ops,
            name: name.to_string(),
            temp_dir: temp_dir.into(),
            module_path,
            module_version,
            mod_at_ver,
            required_to_verify,
        })
    }
}

/// File extension of the final path element, including the dot; empty when
/// there is none.
fn file_ext(name: &str) -> &str {
    for (i, ch) in name.char_indices().rev() {
        match ch {
            '/' => return "",
            '.' => return &name[i..],
            _ => {}
        }
    }
    ""
}

/// A module version is concrete when it is a leading-`v` canonical semantic
/// version; anything else needs resolution first.
fn is_valid_semver(version: &str) -> bool {
    version
        .strip_prefix('v')
        .map(|rest| semver::Version::parse(rest).is_ok())
        .unwrap_or(false)
}
