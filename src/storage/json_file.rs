use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;

use tokio::sync::Mutex;

use crate::storage::{Storage, StoredValue};

const XDG_PREFIX: &str = "remote-feature-flags";
const XDG_STORAGE_FILENAME: &str = "storage.json";
const NOTES: &[&str] = &[
    "The device ID in this file is a randomly generated UUID.",
    "It keeps remotely controlled feature flags stable between fetches and contains no personally identifiable information.",
    "Cached flags are refreshed from the server when they are older than their time-to-live.",
    "You can delete this file at any time: a new device ID will be generated and flags will be fetched again.",
];

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("No HOME is available")]
    NoHome,

    #[error("The storage location has no parent directory")]
    LocationHasNoParent,

    #[error("Serializing / deserializing failure: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Loading from storage failed when reading the file `{0}`: {1}")]
    Read(PathBuf, std::io::Error),

    #[error("Creating the storage file `{0}` failed: {1}")]
    Create(PathBuf, std::io::Error),

    #[error("Writing storage to `{0}` failed: {1}")]
    Write(PathBuf, std::io::Error),

    #[error(transparent)]
    Persist(#[from] tempfile::PersistError),

    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct WrappedStorage {
    notes: Vec<String>,
    body: BTreeMap<String, StoredValue>,
}

/// Storage backed by a single pretty-printed JSON file, replaced atomically on every write.
#[derive(Debug)]
pub struct JsonFile {
    location: PathBuf,
    directory: PathBuf,
    state: Mutex<Option<BTreeMap<String, StoredValue>>>,
}

impl JsonFile {
    #[tracing::instrument]
    pub fn new(location: PathBuf) -> Option<Self> {
        Some(Self {
            directory: location.parent()?.to_owned(),
            location,
            state: Mutex::new(None),
        })
    }

    pub fn try_default() -> Result<Self, Error> {
        let xdg_dirs = xdg::BaseDirectories::with_prefix(XDG_PREFIX);

        let file = xdg_dirs
            .place_state_file(XDG_STORAGE_FILENAME)
            .map_err(|e| {
                match xdg_dirs
                    .get_state_file(XDG_STORAGE_FILENAME)
                    .ok_or(Error::NoHome)
                {
                    Ok(loc) => Error::Create(loc, e),
                    Err(e) => e,
                }
            })?;

        Self::new(file).ok_or(Error::LocationHasNoParent)
    }

    pub fn location(&self) -> &std::path::Path {
        &self.location
    }

    #[tracing::instrument(skip(self))]
    async fn read_from_disk(&self) -> Result<BTreeMap<String, StoredValue>, Error> {
        let contents = match tokio::fs::read(&self.location).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::trace!("No storage file yet");
                return Ok(BTreeMap::new());
            }
            Err(e) => return Err(Error::Read(self.location.clone(), e)),
        };

        match serde_json::from_slice::<WrappedStorage>(&contents) {
            Ok(wrapped) => Ok(wrapped.body),
            Err(e) => {
                tracing::warn!(location = ?self.location, %e, "Storage file is unreadable, starting from empty storage");
                Ok(BTreeMap::new())
            }
        }
    }

    async fn write_to_disk(&self, body: &BTreeMap<String, StoredValue>) -> Result<(), Error> {
        let wrapped = WrappedStorage {
            notes: NOTES.iter().map(|v| String::from(*v)).collect(),
            body: body.clone(),
        };
        let json = serde_json::to_string_pretty(&wrapped)?;

        let directory = self.directory.clone();
        let location = self.location.clone();

        tracing::trace!("Storing properties");
        tokio::task::spawn_blocking(move || -> Result<(), Error> {
            let mut tempfile = tempfile::NamedTempFile::new_in(&directory)
                .map_err(|e| Error::Create(directory.clone(), e))?;

            tempfile
                .write_all(json.as_bytes())
                .map_err(|e| Error::Write(tempfile.path().into(), e))?;

            tempfile.persist(&location)?;

            Ok(())
        })
        .await??;

        tracing::trace!(location = ?self.location, "Storage persisted");

        Ok(())
    }

    async fn update(&self, entries: Vec<(String, Option<StoredValue>)>) -> Result<(), Error> {
        let mut state = self.state.lock().await;
        let mut body = match state.take() {
            Some(body) => body,
            None => self.read_from_disk().await?,
        };

        for (key, value) in entries {
            match value {
                Some(value) => body.insert(key, value),
                None => body.remove(&key),
            };
        }

        let written = self.write_to_disk(&body).await;

        // Memory follows the write even when persisting failed, so this process stays consistent.
        state.replace(body);

        written
    }
}

impl Storage for JsonFile {
    type Error = Error;

    #[tracing::instrument(skip(self))]
    async fn get(&self, key: &str) -> Result<Option<StoredValue>, Error> {
        let mut state = self.state.lock().await;

        if state.is_none() {
            state.replace(self.read_from_disk().await?);
        }

        Ok(state.as_ref().and_then(|body| body.get(key)).cloned())
    }

    #[tracing::instrument(skip(self, value))]
    async fn set(&self, key: &str, value: Option<StoredValue>) -> Result<(), Error> {
        self.update(vec![(key.to_string(), value)]).await
    }

    #[tracing::instrument(skip_all)]
    async fn set_many(&self, entries: Vec<(String, Option<StoredValue>)>) -> Result<(), Error> {
        self.update(entries).await
    }
}
