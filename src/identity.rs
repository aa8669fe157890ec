use std::sync::Arc;

use tokio::sync::OnceCell;

use crate::storage::{Storage, StoredValue};

pub(crate) const DEVICE_ID_KEY: &str = "FeatureFlagDeviceId";

/// An anonymous per-installation identifier that keeps server-side flag assignment stable.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DeviceId(String);

impl Default for DeviceId {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceId {
    pub fn new() -> DeviceId {
        DeviceId(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(f, "{}", self.0)
    }
}

impl From<String> for DeviceId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Hands out the persisted [`DeviceId`], generating and storing one on first use.
///
/// The identifier is loaded at most once per instance; every later call
/// returns the same value even if storage becomes unavailable.
pub struct DeviceIdentity<S: Storage> {
    storage: Arc<S>,
    device_id: OnceCell<DeviceId>,
}

impl<S: Storage> DeviceIdentity<S> {
    pub fn new(storage: Arc<S>) -> Self {
        Self {
            storage,
            device_id: OnceCell::new(),
        }
    }

    #[cfg_attr(feature = "tracing-instrument", tracing::instrument(skip(self)))]
    pub async fn identifier(&self) -> DeviceId {
        self.device_id
            .get_or_init(|| self.load_or_generate())
            .await
            .clone()
    }

    async fn load_or_generate(&self) -> DeviceId {
        match self.storage.get(DEVICE_ID_KEY).await {
            Ok(Some(StoredValue::String(id))) => return DeviceId::from(id),
            Ok(Some(other)) => {
                tracing::warn!(
                    kind = other.kind(),
                    "Stored device ID has the wrong type, generating a new one"
                );
            }
            Ok(None) => {
                tracing::info!("Unable to find an existing device ID, generating a new one");
            }
            Err(e) => {
                tracing::warn!(%e, "Failed to load the device ID, generating a new one");
            }
        }

        let device_id = DeviceId::new();

        if let Err(e) = self
            .storage
            .set(DEVICE_ID_KEY, Some(StoredValue::String(device_id.to_string())))
            .await
        {
            tracing::warn!(%e, "Failed to persist the new device ID");
        }

        tracing::info!(%device_id, "Remote feature flag device ID");

        device_id
    }
}
