use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::FlagStore;
use crate::clock::Clock;
use crate::storage::Storage;
use crate::transport::Transport;

/// How often the worker checks whether the cache needs a refresh.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Keeps the flag cache fresh in the background.
pub struct Worker {
    refresh_task: JoinHandle<()>,
}

impl Worker {
    pub(crate) fn new<S: Storage, T: Transport, C: Clock>(
        store: &FlagStore<S, T, C>,
        refresh_interval: Duration,
    ) -> Worker {
        let refresh_interval = if refresh_interval.is_zero() {
            DEFAULT_REFRESH_INTERVAL
        } else {
            refresh_interval
        };

        let store_ref = store.downgrade();
        let mut changes = store.subscribe_to_flag_changes();

        let refresh_task = tokio::spawn(
            async move {
                let mut interval = tokio::time::interval(refresh_interval);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

                loop {
                    tokio::select! {
                        biased;
                        change = changes.recv() => {
                            match change {
                                Err(RecvError::Closed) => {
                                    tracing::debug!("Feature flag store handles hung up, shutting down");
                                    return;
                                }
                                Ok(()) | Err(RecvError::Lagged(_)) => {
                                    tracing::trace!("Feature flags changed");
                                }
                            }
                        },
                        _ = interval.tick() => {
                            let Some(inner) = store_ref.upgrade() else {
                                tracing::debug!("Feature flag store dropped, shutting down");
                                return;
                            };

                            FlagStore::from_inner(inner).update_if_needed(false);
                        },
                    }
                }
            }
            .instrument(tracing::debug_span!("spawned worker")),
        );

        Worker { refresh_task }
    }

    /// Wait for the worker to shut down, which happens after every [`FlagStore`] clone is dropped.
    #[cfg_attr(feature = "tracing-instrument", tracing::instrument(skip(self)))]
    pub async fn wait(self) {
        if let Err(e) = self.refresh_task.await {
            tracing::trace!(%e, "Feature flag refresh task ended with an error");
        }
    }
}
