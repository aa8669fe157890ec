use std::collections::BTreeMap;
use std::{future::Future, time::Duration};

use reqwest::Certificate;
use url::Url;

use crate::DeviceId;

mod file;
mod http;

pub use self::file::{FileTransport, FileTransportError};
pub use self::http::{ReqwestTransport, ReqwestTransportError};

/// Remote flag values keyed by their remote key.
pub type RemoteFlags = BTreeMap<String, bool>;

/// Extra query parameters sent along with every fetch.
pub type RequestParams = BTreeMap<String, String>;

/// The capability to fetch the current flag assignment for a device.
pub trait Transport: Send + Sync + Clone + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    fn fetch_flags(
        &self,
        device_id: &DeviceId,
    ) -> impl Future<Output = Result<RemoteFlags, Self::Error>> + Send;
}

#[derive(Clone, Debug)]
pub enum Transports {
    None,
    File(FileTransport),
    Http(ReqwestTransport),
}

impl Transports {
    pub(crate) fn none() -> Self {
        Transports::None
    }

    #[cfg_attr(feature = "tracing-instrument", tracing::instrument(err(level = tracing::Level::TRACE)))]
    pub(crate) fn try_new(
        opt_value: Option<String>,
        params: RequestParams,
        timeout: Duration,
        certificates: Option<Certificate>,
        proxy: Option<Url>,
    ) -> Result<Self, TransportsError> {
        let Some(value) = opt_value else {
            tracing::debug!("No feature flag endpoint is configured, remote flags are disabled");
            return Ok(Self::none());
        };

        let url = match Url::parse(&value) {
            Ok(url) => url,
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                tracing::debug!("Treating the endpoint as a path to a flag file");
                let path = std::path::absolute(&value)
                    .map_err(|e| TransportsError::Read(value.clone().into(), e))?;
                Url::from_file_path(&path).map_err(|()| TransportsError::InvalidFilePath(path))?
            }
            Err(e) => return Err(e.into()),
        };

        match url.scheme() {
            "https" | "http" => Ok(Transports::Http(ReqwestTransport::new(
                url,
                params,
                timeout,
                certificates,
                proxy,
            )?)),
            "file" => {
                let path = url
                    .to_file_path()
                    .map_err(|()| TransportsError::InvalidFileUrl(url.clone()))?;
                Ok(Transports::File(FileTransport::new(path)))
            }
            _ => Err(TransportsError::UnknownUrlScheme),
        }
    }
}

impl Transport for Transports {
    type Error = TransportsError;

    #[cfg_attr(feature = "tracing-instrument", tracing::instrument(skip_all, ret(level = tracing::Level::TRACE)))]
    async fn fetch_flags(&self, device_id: &DeviceId) -> Result<RemoteFlags, Self::Error> {
        match self {
            Self::None => Err(TransportsError::Disabled),
            Self::File(t) => Ok(t.fetch_flags(device_id).await?),
            Self::Http(t) => Ok(t.fetch_flags(device_id).await?),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum TransportsError {
    #[error(transparent)]
    FileError(#[from] FileTransportError),

    #[error(transparent)]
    HttpError(#[from] ReqwestTransportError),

    #[error("Remote feature flags are disabled")]
    Disabled,

    #[error("Only http, https, and file URL schemes are supported.")]
    UnknownUrlScheme,

    #[error(transparent)]
    Parse(#[from] url::ParseError),

    #[error("`{0}` cannot be used as a flag file path")]
    InvalidFilePath(std::path::PathBuf),

    #[error("`{0}` does not name a local file")]
    InvalidFileUrl(Url),

    #[error("Read path `{0}`")]
    Read(std::path::PathBuf, #[source] std::io::Error),

    #[error("Unknown certificate format, `der` and `pem` supported")]
    UnknownCertFormat,
}
