mod generic;
mod json_file;
pub use generic::Generic;
pub use json_file::{Error as JsonFileError, JsonFile};

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

/// A primitive value kept in durable storage.
#[derive(Debug, PartialEq, Eq, Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum StoredValue {
    String(String),
    Bool(bool),
    Dictionary(BTreeMap<String, bool>),
    Date(DateTime<Utc>),
}

impl StoredValue {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::String(_) => "string",
            Self::Bool(_) => "bool",
            Self::Dictionary(_) => "dictionary",
            Self::Date(_) => "date",
        }
    }
}

/// A durable mapping from string keys to [`StoredValue`]s that survives process restarts.
pub trait Storage: Send + Sync + 'static {
    type Error: std::fmt::Debug + std::fmt::Display + Send;

    fn get(
        &self,
        key: &str,
    ) -> impl std::future::Future<Output = Result<Option<StoredValue>, Self::Error>> + Send;

    /// Store `value` under `key`, or remove the key when `value` is `None`.
    fn set(
        &self,
        key: &str,
        value: Option<StoredValue>,
    ) -> impl std::future::Future<Output = Result<(), Self::Error>> + Send;

    /// Apply several writes. Backends that can should apply them as one atomic write.
    fn set_many(
        &self,
        entries: Vec<(String, Option<StoredValue>)>,
    ) -> impl std::future::Future<Output = Result<(), Self::Error>> + Send {
        async move {
            for (key, value) in entries {
                self.set(&key, value).await?;
            }

            Ok(())
        }
    }
}
