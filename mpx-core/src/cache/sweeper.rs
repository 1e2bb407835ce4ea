//! Periodic cache cleanup, driven by the owner's lifecycle.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::Cacher;

/// Spawns the background sweep: sleep for `interval`, run
/// [`Cacher::cleanup`], repeat. Cleanup failures are logged and never stop
/// the loop; the loop stops when the shutdown channel fires or its sender
/// is dropped. The returned handle lets the owner await teardown.
pub fn spawn_cleanup_task(
    cacher: Arc<dyn Cacher>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = cacher.cleanup().await {
                        warn!("cache cleanup failed: {e}");
                    }
                }
                _ = shutdown.changed() => {
                    debug!("cache cleanup task stopping");
                    break;
                }
            }
        }
    })
}
