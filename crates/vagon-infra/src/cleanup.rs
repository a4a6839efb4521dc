//! Background expiry of abandoned chunked uploads.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use vagon_storage::ChunkStore;

#[derive(Clone)]
pub struct UploadSweeper {
    chunk_store: Arc<ChunkStore>,
    period: Duration,
}

impl UploadSweeper {
    pub fn new(chunk_store: Arc<ChunkStore>, period: Duration) -> Self {
        Self {
            chunk_store,
            period: period.max(Duration::from_secs(1)),
        }
    }

    /// Sweep sessions idle past the store's TTL every period until cancelled.
    pub fn spawn(self, cancel_token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick fires immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel_token.cancelled() => {
                        tracing::debug!("Upload sweeper stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        let removed = self.chunk_store.sweep_expired().await;
                        tracing::debug!(
                            removed,
                            active = self.chunk_store.active_uploads(),
                            "Upload sweep finished"
                        );
                    }
                }
            }
        })
    }
}
