use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::Mutex;

use crate::catalog::{Catalog, Flag};
use crate::storage::{Storage, StoredValue};

const OVERRIDE_KEY_PREFIX: &str = "ff-override-";

fn override_key(flag: &Flag) -> String {
    format!("{OVERRIDE_KEY_PREFIX}{}", flag.key)
}

/// Locally forced flag values, persisted one storage key per flag.
///
/// Whether a flag may be overridden is checked on every read as well as on
/// every write, so a value that reached storage some other way is never
/// returned for a flag that does not allow overrides.
pub struct OverrideRegistry<S: Storage> {
    overrides: RwLock<BTreeMap<&'static str, bool>>,
    writer: Mutex<()>,
    storage: Arc<S>,
}

impl<S: Storage> OverrideRegistry<S> {
    #[tracing::instrument(skip_all)]
    pub async fn load(storage: Arc<S>, catalog: &Catalog) -> Self {
        let mut overrides = BTreeMap::new();

        for flag in catalog.iter() {
            match storage.get(&override_key(flag)).await {
                Ok(Some(StoredValue::Bool(value))) => {
                    overrides.insert(flag.key, value);
                }
                Ok(Some(other)) => {
                    tracing::warn!(
                        flag = flag.key,
                        kind = other.kind(),
                        "Stored override has the wrong type, ignoring"
                    );
                }
                Ok(None) => (),
                Err(e) => {
                    tracing::warn!(flag = flag.key, %e, "Failed to load the flag override");
                }
            }
        }

        Self {
            overrides: RwLock::new(overrides),
            writer: Mutex::new(()),
            storage,
        }
    }

    pub fn overridden_value(&self, flag: &Flag) -> Option<bool> {
        if !flag.can_override {
            return None;
        }

        self.overrides
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(flag.key)
            .copied()
    }

    pub fn is_overridden(&self, flag: &Flag) -> bool {
        self.overridden_value(flag).is_some()
    }

    /// Every effective override, keyed by flag key.
    pub fn overrides(&self, catalog: &Catalog) -> BTreeMap<&'static str, bool> {
        catalog
            .iter()
            .filter_map(|flag| Some((flag.key, self.overridden_value(flag)?)))
            .collect()
    }

    /// Force `flag` to `value`, or clear its override with `None`.
    ///
    /// Ignored for flags that cannot be overridden.
    #[cfg_attr(feature = "tracing-instrument", tracing::instrument(skip(self)))]
    pub async fn set_override(&self, value: Option<bool>, flag: &Flag) {
        if !flag.can_override {
            tracing::debug!(flag = flag.key, "Ignoring an override for a flag that cannot be overridden");
            return;
        }

        let _writer = self.writer.lock().await;

        {
            let mut overrides = self.overrides.write().unwrap_or_else(PoisonError::into_inner);
            match value {
                Some(value) => overrides.insert(flag.key, value),
                None => overrides.remove(flag.key),
            };
        }

        if let Err(e) = self
            .storage
            .set(&override_key(flag), value.map(StoredValue::Bool))
            .await
        {
            tracing::warn!(flag = flag.key, %e, "Failed to persist the flag override");
        }
    }
}
