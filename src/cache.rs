use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::Mutex;

use crate::clock::Clock;
use crate::storage::{Storage, StoredValue};

pub(crate) const CACHED_FLAGS_KEY: &str = "FeatureFlagStoreCache";
pub(crate) const LAST_REFRESH_DATE_KEY: &str = "FeatureFlagLastRefreshDate";

/// How long fetched flags are considered fresh.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(43_200);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct CacheState {
    flags: BTreeMap<String, bool>,
    last_refresh: Option<DateTime<Utc>>,
}

/// The most recently fetched remote flag values.
///
/// The value map and its refresh timestamp live behind one lock and are
/// always replaced together. Refreshes are additionally serialized with
/// each other so the order they land in memory is the order they are persisted.
pub struct FlagCache<S: Storage, C: Clock> {
    state: RwLock<CacheState>,
    writer: Mutex<()>,
    storage: Arc<S>,
    clock: C,
    ttl: Duration,
    max_age: TimeDelta,
}

impl<S: Storage, C: Clock> FlagCache<S, C> {
    /// Restore the cache from storage. Missing or unreadable data yields an empty, expired cache.
    #[tracing::instrument(skip(storage, clock))]
    pub async fn load(storage: Arc<S>, clock: C, ttl: Duration) -> Self {
        let flags = match storage.get(CACHED_FLAGS_KEY).await {
            Ok(Some(StoredValue::Dictionary(flags))) => flags,
            Ok(Some(other)) => {
                tracing::warn!(kind = other.kind(), "Cached flags have the wrong type, ignoring");
                BTreeMap::new()
            }
            Ok(None) => BTreeMap::new(),
            Err(e) => {
                tracing::warn!(%e, "Failed to load the cached flags");
                BTreeMap::new()
            }
        };

        let last_refresh = match storage.get(LAST_REFRESH_DATE_KEY).await {
            Ok(Some(StoredValue::Date(date))) => Some(date),
            Ok(Some(other)) => {
                tracing::warn!(
                    kind = other.kind(),
                    "Last refresh date has the wrong type, ignoring"
                );
                None
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(%e, "Failed to load the last refresh date");
                None
            }
        };

        tracing::trace!(flags = flags.len(), ?last_refresh, "Loaded the flag cache");

        let max_age = TimeDelta::from_std(ttl).unwrap_or_else(|_| {
            tracing::warn!(?ttl, "Cache TTL is out of range, fetched flags will never expire");
            TimeDelta::MAX
        });

        Self {
            state: RwLock::new(CacheState {
                flags,
                last_refresh,
            }),
            writer: Mutex::new(()),
            storage,
            clock,
            ttl,
            max_age,
        }
    }

    /// Replace every cached value with `values` and mark the cache as refreshed now.
    #[cfg_attr(feature = "tracing-instrument", tracing::instrument(skip(self)))]
    pub async fn refresh(&self, values: BTreeMap<String, bool>) {
        let _writer = self.writer.lock().await;

        let now = self.clock.now();
        let fresh = CacheState {
            flags: values,
            last_refresh: Some(now),
        };

        let entries = vec![
            (
                CACHED_FLAGS_KEY.to_string(),
                Some(StoredValue::Dictionary(fresh.flags.clone())),
            ),
            (LAST_REFRESH_DATE_KEY.to_string(), Some(StoredValue::Date(now))),
        ];

        *self.state.write().unwrap_or_else(PoisonError::into_inner) = fresh;

        if let Err(e) = self.storage.set_many(entries).await {
            tracing::warn!(%e, "Failed to persist the refreshed flag cache");
        }
    }

    pub fn value(&self, remote_key: &str) -> Option<bool> {
        self.read(|state| state.flags.get(remote_key).copied())
    }

    pub fn has_value(&self, remote_key: &str) -> bool {
        self.value(remote_key).is_some()
    }

    pub fn last_refresh(&self) -> Option<DateTime<Utc>> {
        self.read(|state| state.last_refresh)
    }

    /// A copy of every cached value.
    pub fn snapshot(&self) -> BTreeMap<String, bool> {
        self.read(|state| state.flags.clone())
    }

    /// True when nothing was ever fetched, or the last fetch is older than the TTL.
    pub fn has_expired(&self) -> bool {
        let Some(last_refresh) = self.last_refresh() else {
            tracing::debug!("Feature flags cache has expired (never refreshed)");
            return true;
        };

        let elapsed = self.clock.now().signed_duration_since(last_refresh);
        let expired = elapsed > self.max_age;

        tracing::debug!(
            expired,
            elapsed_secs = elapsed.num_milliseconds() as f64 / 1000.0,
            "Checked the feature flags cache expiry"
        );

        expired
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn read<T>(&self, f: impl FnOnce(&CacheState) -> T) -> T {
        f(&self.state.read().unwrap_or_else(PoisonError::into_inner))
    }
}
