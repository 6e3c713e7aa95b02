//! Background sweep of expired refresh token records.
//!
//! Only the in-memory store needs sweeping. For stores with native TTL the
//! worker is inert, but it is created and shut down the same way so callers
//! never branch on the backend.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

use crate::storage::{StoreResult, TokenStore};

/// Handle to the cleanup task.
pub struct CleanupWorker {
    handle: Option<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl CleanupWorker {
    /// Starts sweeping `store` every `period` until `cancel` fires.
    ///
    /// Must be called within a Tokio runtime. Returns an inert handle when
    /// the store expires records itself.
    #[must_use]
    pub fn spawn(store: Arc<dyn TokenStore>, period: Duration, cancel: CancellationToken) -> Self {
        if store.has_native_ttl() {
            tracing::debug!(
                backend = store.backend_name(),
                "Backend expires records natively, cleanup worker inert"
            );
            return Self {
                handle: None,
                cancel,
            };
        }

        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            tracing::info!(
                backend = store.backend_name(),
                interval_secs = period.as_secs(),
                "Token cleanup worker started"
            );

            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = Self::sweep(store.as_ref()).await {
                            tracing::warn!(error = %e, "Token cleanup failed");
                        }
                    }
                }
            }

            tracing::info!("Token cleanup worker stopped");
        });

        Self {
            handle: Some(handle),
            cancel,
        }
    }

    /// Runs a single sweep.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn sweep(store: &dyn TokenStore) -> StoreResult<u64> {
        let removed = store.delete_expired().await?;
        if removed > 0 {
            tracing::info!(removed, "Removed expired refresh tokens");
        } else {
            tracing::debug!("Token cleanup found nothing to remove");
        }
        Ok(removed)
    }

    /// Returns `true` if a sweep task was started.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.handle.is_some()
    }

    /// Stops the worker and waits for it to finish.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take()
            && let Err(e) = handle.await
        {
            tracing::warn!(error = %e, "Token cleanup task ended abnormally");
        }
    }
}
