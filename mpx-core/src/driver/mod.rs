//! The boundary to the build-tool driver that resolves versions and
//! downloads module artifacts.

use async_trait::async_trait;

use mpx_common::error::Result;

use crate::fetch::{Fetch, FetchResult};

pub mod command;

pub use command::GoDriver;

/// Executes one fetch operation, producing the result record described by
/// the descriptor's operation kind:
///
/// - `Resolve` populates `version` and `time` (UTC).
/// - `List` populates `versions`, ascending by semver and de-duplicated.
/// - The download kinds write their artifact under the descriptor's scratch
///   directory and populate `info`/`go_mod`/`zip`.
///
/// Dropping the returned future cancels the operation; implementations must
/// not leave a child process running past that point. Timeouts are the
/// caller's responsibility.
#[async_trait]
pub trait Driver: Send + Sync {
    async fn execute(&self, fetch: &Fetch) -> Result<FetchResult>;
}
