use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::cache::FlagCache;
use crate::clock::Clock;
use crate::identity::DeviceIdentity;
use crate::storage::Storage;
use crate::transport::Transport;

#[derive(thiserror::Error, Debug)]
pub enum RefreshError {
    #[error("Fetching the remote feature flags failed: {0}")]
    Fetch(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),
}

/// A fetch that is running in the background.
///
/// Dropping it does not cancel the fetch.
#[derive(Debug)]
pub struct PendingRefresh(JoinHandle<Result<(), RefreshError>>);

impl PendingRefresh {
    /// Wait for the fetch to land in the cache.
    pub async fn wait(self) -> Result<(), RefreshError> {
        self.0.await?
    }
}

/// Fetches remote flags for this device and writes them into the [`FlagCache`].
pub struct RemoteRefresher<S: Storage, C: Clock, T: Transport> {
    cache: Arc<FlagCache<S, C>>,
    identity: Arc<DeviceIdentity<S>>,
    transport: T,
    runtime: Handle,
}

impl<S: Storage, C: Clock, T: Transport> RemoteRefresher<S, C, T> {
    /// Fetches are spawned onto `runtime`, so refreshes can be requested from any thread.
    pub fn new(
        cache: Arc<FlagCache<S, C>>,
        identity: Arc<DeviceIdentity<S>>,
        transport: T,
        runtime: Handle,
    ) -> Self {
        Self {
            cache,
            identity,
            transport,
            runtime,
        }
    }

    /// Start a fetch if `forced` is set or the cache has expired.
    ///
    /// Returns `None` without touching the network when the cache is still
    /// valid. Safe to call from threads outside the runtime.
    pub fn update_if_needed(&self, forced: bool) -> Option<PendingRefresh> {
        self.update_if_needed_then(forced, || ())
    }

    /// Like [`update_if_needed`](Self::update_if_needed), calling `then` after a
    /// successful fetch has been written to the cache. `then` is not called when
    /// the fetch fails, and it runs on a runtime worker rather than the caller's thread.
    pub fn update_if_needed_then<F>(&self, forced: bool, then: F) -> Option<PendingRefresh>
    where
        F: FnOnce() + Send + 'static,
    {
        if !forced && !self.cache.has_expired() {
            tracing::debug!("Will not update local feature flags because the cache is still valid");
            return None;
        }

        let cache = self.cache.clone();
        let identity = self.identity.clone();
        let transport = self.transport.clone();

        let task = self.runtime.spawn(
            async move {
                let device_id = identity.identifier().await;

                match transport.fetch_flags(&device_id).await {
                    Ok(flags) => {
                        tracing::info!(?flags, "Successfully updated local feature flags");
                        cache.refresh(flags).await;
                        then();
                        Ok(())
                    }
                    Err(e) => {
                        tracing::error!(%e, "Unable to update the feature flag cache");
                        Err(RefreshError::Fetch(Box::new(e)))
                    }
                }
            }
            .instrument(tracing::debug_span!("refresh feature flags", forced)),
        );

        Some(PendingRefresh(task))
    }
}
