use std::path::{Path, PathBuf};

use crate::DeviceId;

use super::{RemoteFlags, Transport};

/// Reads the flag assignment from a local JSON object of `remote key -> bool`.
///
/// The file is re-read on every fetch, so editing it and forcing a refresh
/// changes the flags of a running process.
#[derive(Clone, Debug)]
pub struct FileTransport {
    path: PathBuf,
}

impl FileTransport {
    pub(crate) fn new(path: impl Into<PathBuf>) -> Self {
        FileTransport { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Transport for FileTransport {
    type Error = FileTransportError;

    #[cfg_attr(feature = "tracing-instrument", tracing::instrument(skip_all, ret(level = tracing::Level::TRACE)))]
    async fn fetch_flags(&self, _device_id: &DeviceId) -> Result<RemoteFlags, Self::Error> {
        let buffer = tokio::fs::read(&self.path)
            .await
            .map_err(|e| FileTransportError::Read(self.path.clone(), e))?;

        Ok(serde_json::from_slice(&buffer)?)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum FileTransportError {
    #[error("Failure reading the feature flag file at '{0}': {1}")]
    Read(PathBuf, std::io::Error),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

#[cfg(test)]
mod test {
    use super::{FileTransport, FileTransportError};
    use crate::DeviceId;
    use crate::transport::Transport;

    #[tokio::test]
    async fn reads_flags() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flags.json");
        std::fs::write(&path, br#"{ "x_flag": true, "y_flag": false }"#).unwrap();

        let flags = FileTransport::new(&path)
            .fetch_flags(&DeviceId::new())
            .await
            .unwrap();

        assert_eq!(flags.get("x_flag"), Some(&true));
        assert_eq!(flags.get("y_flag"), Some(&false));
    }

    #[tokio::test]
    async fn rejects_non_boolean_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flags.json");
        std::fs::write(&path, br#"{ "x_flag": "yes" }"#).unwrap();

        let result = FileTransport::new(&path).fetch_flags(&DeviceId::new()).await;

        assert!(matches!(result, Err(FileTransportError::Serde(_))));
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();

        let result = FileTransport::new(dir.path().join("absent.json"))
            .fetch_flags(&DeviceId::new())
            .await;

        assert!(matches!(result, Err(FileTransportError::Read(_, _))));
    }
}
