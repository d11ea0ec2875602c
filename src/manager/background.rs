//! Periodic orphan sweep running for the life of the process.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::ScratchManager;

/// Smallest interval accepted for the background loop.
const MIN_INTERVAL: Duration = Duration::from_millis(10);

/// Handle to a running background sweep.
///
/// Dropping the handle cancels the loop; [`BackgroundSweep::shutdown`] also
/// waits for the in-flight sweep to finish.
pub struct BackgroundSweep {
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl BackgroundSweep {
    /// Spawn the loop on the current tokio runtime.
    pub(crate) fn spawn(manager: ScratchManager, interval: Duration) -> Self {
        let token = CancellationToken::new();
        let handle = tokio::spawn(run(manager, interval.max(MIN_INTERVAL), token.clone()));

        tracing::info!(interval_secs = interval.as_secs_f64(), "Background cleanup registered");

        Self {
            token,
            handle: Some(handle),
        }
    }

    /// Ask the loop to stop after the current sweep.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Stop the loop and wait for it to exit.
    pub async fn shutdown(mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                tracing::warn!("Background cleanup task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for BackgroundSweep {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn run(manager: ScratchManager, interval: Duration, token: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                tracing::debug!("Background cleanup stopping");
                break;
            }
            _ = ticker.tick() => {
                let manager = manager.clone();
                match tokio::task::spawn_blocking(move || manager.sweep_orphans()).await {
                    Ok(0) => {}
                    Ok(purged) => {
                        tracing::info!(purged, "Periodic cleanup completed");
                    }
                    Err(e) => {
                        tracing::error!("Periodic cleanup error: {}", e);
                    }
                }
            }
        }
    }
}
