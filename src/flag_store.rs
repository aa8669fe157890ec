use std::sync::Arc;

use tokio::sync::broadcast;

use crate::cache::FlagCache;
use crate::catalog::{Catalog, Flag};
use crate::clock::{Clock, SystemClock};
use crate::identity::{DeviceId, DeviceIdentity};
use crate::overrides::OverrideRegistry;
use crate::refresher::{PendingRefresh, RemoteRefresher};
use crate::resolver::{FlagResolver, Resolution};
use crate::storage::{JsonFile, Storage};
use crate::transport::{Transport, Transports};

pub(crate) struct Inner<S: Storage, T: Transport, C: Clock> {
    catalog: Catalog,
    identity: Arc<DeviceIdentity<S>>,
    cache: Arc<FlagCache<S, C>>,
    overrides: Arc<OverrideRegistry<S>>,
    resolver: FlagResolver<S, C>,
    refresher: RemoteRefresher<S, C, T>,
    change_notifier: broadcast::Sender<()>,
}

/// The application's handle on its feature flags.
///
/// Cloning is cheap and every clone shares the same cache and overrides. The
/// [`Worker`](crate::Worker) built alongside it shuts down once every clone is dropped.
pub struct FlagStore<S: Storage = JsonFile, T: Transport = Transports, C: Clock = SystemClock> {
    inner: Arc<Inner<S, T, C>>,
}

impl<S: Storage, T: Transport, C: Clock> Clone for FlagStore<S, T, C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S: Storage, T: Transport, C: Clock> std::fmt::Debug for FlagStore<S, T, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlagStore")
            .field("flags", &self.inner.catalog.len())
            .finish()
    }
}

impl<S: Storage, T: Transport, C: Clock> FlagStore<S, T, C> {
    #[tracing::instrument(skip_all)]
    pub(crate) async fn new(
        catalog: Catalog,
        storage: Arc<S>,
        transport: T,
        clock: C,
        ttl: std::time::Duration,
    ) -> Self {
        let identity = Arc::new(DeviceIdentity::new(storage.clone()));
        let cache = Arc::new(FlagCache::load(storage.clone(), clock, ttl).await);
        let overrides = Arc::new(OverrideRegistry::load(storage, &catalog).await);

        let resolver = FlagResolver::new(overrides.clone(), cache.clone());
        let refresher = RemoteRefresher::new(
            cache.clone(),
            identity.clone(),
            transport,
            tokio::runtime::Handle::current(),
        );

        Self {
            inner: Arc::new(Inner {
                catalog,
                identity,
                cache,
                overrides,
                resolver,
                refresher,
                change_notifier: broadcast::Sender::new(1),
            }),
        }
    }

    pub(crate) fn downgrade(&self) -> std::sync::Weak<Inner<S, T, C>> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn from_inner(inner: Arc<Inner<S, T, C>>) -> Self {
        Self { inner }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.inner.catalog
    }

    /// Whether `flag` is enabled.
    pub fn resolve(&self, flag: &Flag) -> bool {
        self.inner.resolver.resolve(flag)
    }

    pub fn resolution(&self, flag: &Flag) -> Resolution {
        self.inner.resolver.resolution(flag)
    }

    /// Resolve a flag by its catalog key. `None` for keys the catalog does not declare.
    pub fn is_enabled_key(&self, key: &str) -> Option<bool> {
        Some(self.resolve(self.inner.catalog.get(key)?))
    }

    pub fn has_remote_value(&self, flag: &Flag) -> bool {
        self.inner.resolver.has_remote_value(flag)
    }

    pub fn overridden_value(&self, flag: &Flag) -> Option<bool> {
        self.inner.overrides.overridden_value(flag)
    }

    pub fn overrides(&self) -> std::collections::BTreeMap<&'static str, bool> {
        self.inner.overrides.overrides(&self.inner.catalog)
    }

    /// Force `flag` to `value`, or clear the override with `None`.
    /// Flags that cannot be overridden are left untouched.
    pub async fn set_override(&self, value: Option<bool>, flag: &Flag) {
        self.inner.overrides.set_override(value, flag).await;
    }

    pub fn cache(&self) -> &FlagCache<S, C> {
        &self.inner.cache
    }

    pub async fn device_id(&self) -> DeviceId {
        self.inner.identity.identifier().await
    }

    pub fn update_if_needed(&self, forced: bool) -> Option<PendingRefresh> {
        self.update_if_needed_then(forced, || ())
    }

    /// Refresh the remote flags when `forced` or when the cache has expired,
    /// then call `then` and notify subscribers once new values are in the cache.
    pub fn update_if_needed_then<F>(&self, forced: bool, then: F) -> Option<PendingRefresh>
    where
        F: FnOnce() + Send + 'static,
    {
        let notifier = self.inner.change_notifier.clone();

        self.inner.refresher.update_if_needed_then(forced, move || {
            then();
            // Nobody listening is fine.
            let _ = notifier.send(());
        })
    }

    /// Receive a message every time a refresh writes new values into the cache.
    pub fn subscribe_to_flag_changes(&self) -> broadcast::Receiver<()> {
        self.inner.change_notifier.subscribe()
    }
}
