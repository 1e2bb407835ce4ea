use std::env;
use std::path::PathBuf;
use std::time::Duration;

use globset::GlobBuilder;
use tracing::debug;

use crate::error::{MpxError, Result};

/// Default lifetime of a cached artifact.
const DEFAULT_CACHE_TTL_SECS: u64 = 24 * 60 * 60;

/// Default period between cleanup sweeps of the cache directory.
const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 60 * 60;

#[derive(Debug, Clone)]
pub struct Config {
    /// Executable name of the build-tool driver.
    pub go_bin: String,
    /// `KEY=VALUE` pairs handed to the driver process. Defaults to the full
    /// process environment; later entries override earlier ones.
    pub go_bin_env: Vec<String>,
    /// Root directory of the disk cache.
    pub cache_dir: PathBuf,
    /// Root directory for per-fetch driver scratch space.
    pub temp_dir: PathBuf,
    /// How long cached artifacts stay servable.
    pub cache_ttl: Duration,
    /// Sweep period of the background cleanup task.
    pub cleanup_interval: Duration,
}

impl Config {
    pub fn load() -> Result<Self> {
        debug!("loading mpx configuration");

        let go_bin = env::var("MPX_GO_BIN").unwrap_or_else(|_| "go".to_string());
        let go_bin_env: Vec<String> = env::vars().map(|(k, v)| format!("{k}={v}")).collect();

        let cache_dir = match env::var("MPX_CACHE_DIR") {
            Ok(dir) => PathBuf::from(dir),
            Err(_) => dirs::cache_dir()
                .unwrap_or_else(env::temp_dir)
                .join("mpx")
                .join("cache"),
        };
        let temp_dir = env::var("MPX_TEMP_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| env::temp_dir());

        let cache_ttl = Duration::from_secs(env_secs("MPX_CACHE_TTL_SECS", DEFAULT_CACHE_TTL_SECS)?);
        let cleanup_interval = Duration::from_secs(env_secs(
            "MPX_CLEANUP_INTERVAL_SECS",
            DEFAULT_CLEANUP_INTERVAL_SECS,
        )?);

        debug!(
            "configuration loaded: cache_dir={}, temp_dir={}",
            cache_dir.display(),
            temp_dir.display()
        );
        Ok(Self {
            go_bin,
            go_bin_env,
            cache_dir,
            temp_dir,
            cache_ttl,
            cleanup_interval,
        })
    }

    /// Looks up a `KEY=VALUE` entry in the driver environment. The last
    /// match wins, matching environment-list override semantics.
    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.go_bin_env.iter().rev().find_map(|kv| {
            kv.strip_prefix(key)
                .and_then(|rest| rest.strip_prefix('='))
        })
    }

    /// Whether the checksum database is globally switched off.
    pub fn sumdb_disabled(&self) -> bool {
        self.env_value("GOSUMDB") == Some("off")
    }

    /// Whether a downloaded module must be verified against the checksum
    /// database before it may be served.
    pub fn verification_required(&self, module_path: &str) -> bool {
        if self.sumdb_disabled() {
            return false;
        }
        for key in ["GONOSUMDB", "GOPRIVATE"] {
            if let Some(globs) = self.env_value(key) {
                if globs_match_path(globs, module_path) {
                    return false;
                }
            }
        }
        true
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::load().expect("failed to load default configuration")
    }
}

fn env_secs(key: &str, default: u64) -> Result<u64> {
    match env::var(key) {
        Ok(value) => value
            .parse::<u64>()
            .map_err(|e| MpxError::Config(format!("invalid {key} value {value:?}: {e}"))),
        Err(_) => Ok(default),
    }
}

/// Reports whether any glob in the comma-separated list matches a prefix of
/// the slash-separated target path. A glob with N slashes is matched against
/// the first N+1 path elements of the target; wildcards never cross `/`.
pub fn globs_match_path(globs: &str, target: &str) -> bool {
    for glob in globs.split(',') {
        if glob.is_empty() {
            continue;
        }

        // Truncate the target to as many path elements as the glob has.
        let mut n = glob.matches('/').count();
        let mut prefix = target;
        for (i, ch) in target.char_indices() {
            if ch == '/' {
                if n == 0 {
                    prefix = &target[..i];
                    break;
                }
                n -= 1;
            }
        }
        if n > 0 {
            // Not enough prefix elements.
            continue;
        }

        let matcher = match GlobBuilder::new(glob).literal_separator(true).build() {
            Ok(g) => g.compile_matcher(),
            Err(e) => {
                debug!("skipping malformed glob {glob:?}: {e}");
                continue;
            }
        };
        if matcher.is_match(prefix) {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_env(env: &[&str]) -> Config {
        Config {
            go_bin: "go".to_string(),
            go_bin_env: env.iter().map(|s| s.to_string()).collect(),
            cache_dir: PathBuf::from("cache"),
            temp_dir: PathBuf::from("tmp"),
            cache_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
            cleanup_interval: Duration::from_secs(DEFAULT_CLEANUP_INTERVAL_SECS),
        }
    }

    #[test]
    fn env_value_last_match_wins() {
        let config = config_with_env(&["GOSUMDB=sum.golang.org", "GOSUMDB=off"]);
        assert_eq!(config.env_value("GOSUMDB"), Some("off"));
        assert_eq!(config.env_value("GOPRIVATE"), None);
    }

    #[test]
    fn env_value_requires_exact_key() {
        let config = config_with_env(&["GOPRIVATEX=1"]);
        assert_eq!(config.env_value("GOPRIVATE"), None);
    }

    #[test]
    fn verification_required_by_default() {
        let config = config_with_env(&[]);
        assert!(config.verification_required("example.com/foo/bar"));
    }

    #[test]
    fn verification_disabled_by_sumdb_off() {
        let config = config_with_env(&["GOSUMDB=off"]);
        assert!(!config.verification_required("example.com/foo/bar"));
    }

    #[test]
    fn verification_disabled_by_nosumdb_glob() {
        let config = config_with_env(&["GONOSUMDB=example.com"]);
        assert!(!config.verification_required("example.com/foo/bar"));
        assert!(config.verification_required("other.com/foo/bar"));
    }

    #[test]
    fn verification_disabled_by_private_glob() {
        let config = config_with_env(&["GOPRIVATE=*.corp.example.com,example.com"]);
        assert!(!config.verification_required("example.com/foo/bar"));
        assert!(!config.verification_required("git.corp.example.com/foo"));
        assert!(config.verification_required("corp.example.com/foo"));
    }

    #[test]
    fn globs_match_path_prefix_elements() {
        assert!(globs_match_path("example.com", "example.com/foo/bar"));
        assert!(globs_match_path("example.com/foo", "example.com/foo/bar"));
        assert!(globs_match_path("example.com/foo/bar", "example.com/foo/bar"));
        assert!(!globs_match_path("example.com/foo/bar/baz", "example.com/foo/bar"));
        assert!(!globs_match_path("example.com/fo", "example.com/foo/bar"));
    }

    #[test]
    fn globs_match_path_wildcards_stay_in_element() {
        assert!(globs_match_path("*.com", "example.com/foo"));
        assert!(globs_match_path("example.com/*", "example.com/foo/bar"));
        assert!(!globs_match_path("example.com/f*/baz", "example.com/foo/bar"));
        // A bare `*` covers one path element, so it matches any first element.
        assert!(globs_match_path("*", "example.com/foo/bar"));
    }

    #[test]
    fn globs_match_path_empty_globs_skipped() {
        assert!(!globs_match_path("", "example.com/foo"));
        assert!(globs_match_path(",,example.com", "example.com/foo"));
    }
}
