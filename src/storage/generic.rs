use std::collections::HashMap;

use tokio::sync::RwLock;

use super::StoredValue;

/// In-memory storage. Nothing survives the process, but sharing one instance
/// behind an `Arc` between components behaves like a durable store.
#[derive(Default, Debug)]
pub struct Generic {
    state: RwLock<HashMap<String, StoredValue>>,
}

impl super::Storage for Generic {
    type Error = std::convert::Infallible;

    async fn get(&self, key: &str) -> Result<Option<StoredValue>, Self::Error> {
        Ok(self.state.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Option<StoredValue>) -> Result<(), Self::Error> {
        let mut state = self.state.write().await;
        match value {
            Some(value) => state.insert(key.to_string(), value),
            None => state.remove(key),
        };
        Ok(())
    }

    async fn set_many(
        &self,
        entries: Vec<(String, Option<StoredValue>)>,
    ) -> Result<(), Self::Error> {
        let mut state = self.state.write().await;
        for (key, value) in entries {
            match value {
                Some(value) => state.insert(key, value),
                None => state.remove(&key),
            };
        }
        Ok(())
    }
}
