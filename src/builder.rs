use std::sync::Arc;
use std::time::Duration;

use reqwest::Certificate;
use url::Url;

use crate::cache::DEFAULT_CACHE_TTL;
use crate::catalog::Catalog;
use crate::clock::{Clock, SystemClock};
use crate::storage::{JsonFile, JsonFileError, Storage};
use crate::transport::{RequestParams, Transport, Transports, TransportsError};
use crate::worker::DEFAULT_REFRESH_INTERVAL;
use crate::{FlagStore, Worker};

/// Consulted when no endpoint was set explicitly.
pub const ENDPOINT_ENV_VAR: &str = "REMOTE_FEATURE_FLAGS_ENDPOINT";

#[derive(thiserror::Error, Debug)]
pub enum BuildError {
    #[error(transparent)]
    Transport(#[from] TransportsError),

    #[error("Opening the feature flag storage failed: {0}")]
    Storage(#[from] JsonFileError),

    #[error("The storage location `{0}` has no parent directory")]
    StorageLocation(std::path::PathBuf),
}

pub struct Builder {
    catalog: Catalog,
    enable_remote: bool,
    endpoint: Option<String>,
    params: Option<RequestParams>,
    proxy: Option<Url>,
    certificate: Option<Certificate>,
    timeout: Option<Duration>,
    cache_ttl: Option<Duration>,
    refresh_interval: Option<Duration>,
    storage_location: Option<std::path::PathBuf>,
}

impl Builder {
    pub fn new(catalog: Catalog) -> Self {
        Builder {
            catalog,
            enable_remote: true,
            endpoint: None,
            params: None,
            proxy: None,
            certificate: None,
            timeout: None,
            cache_ttl: None,
            refresh_interval: None,
            storage_location: None,
        }
    }

    /// Where flags are fetched from: an `http(s)://` URL, a `file://` URL, or a bare path to a JSON file.
    /// Relative paths are resolved against the current working directory.
    pub fn set_endpoint(mut self, endpoint: Option<String>) -> Self {
        self.endpoint = endpoint;
        self
    }

    /// Add a query parameter sent with every fetch, next to the device ID.
    pub fn add_param(
        mut self,
        key: impl Into<String> + std::fmt::Debug,
        value: impl Into<String>,
    ) -> Self {
        self.params
            .get_or_insert_with(Default::default)
            .insert(key.into(), value.into());
        self
    }

    /// Set whether flags are fetched from the remote endpoint at all.
    /// Remote flags are enabled by default, but this function can be used in a pipeline for easy configuration:
    ///
    /// ```rust
    /// use remote_feature_flags::{builder, Builder, Catalog, Flag};
    ///
    /// static FLAGS: &[Flag] = &[Flag::new("new_editor", "New editor", false).with_remote_key("new_editor")];
    ///
    /// struct Cli {
    ///   offline: bool,
    /// }
    ///
    /// # tokio_test::block_on(async {
    /// # let dir = tempfile::tempdir().unwrap();
    ///
    /// let cli = Cli { offline: true, };
    ///
    /// let (flags, worker) = builder!(Catalog::new(FLAGS).unwrap())
    ///   .set_enable_remote(!cli.offline)
    /// #  .set_storage_location(Some(dir.path().join("storage.json")))
    ///   .build()
    ///   .await
    ///   .unwrap();
    ///
    /// assert!(!flags.resolve(&FLAGS[0]));
    /// # drop(flags);
    /// # worker.wait().await;
    /// # })
    /// ```
    pub fn set_enable_remote(mut self, enable_remote: bool) -> Self {
        self.enable_remote = enable_remote;
        self
    }

    /// Per-request timeout for remote fetches. Defaults to 3 seconds.
    pub fn set_timeout(mut self, duration: Option<Duration>) -> Self {
        self.timeout = duration;
        self
    }

    /// How long fetched flags stay fresh. Defaults to 12 hours.
    pub fn set_cache_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// How often the worker checks whether the cache expired. Defaults to 1 hour.
    pub fn set_refresh_interval(mut self, interval: Option<Duration>) -> Self {
        self.refresh_interval = interval;
        self
    }

    /// Where the JSON storage file lives. Defaults to the XDG state directory.
    pub fn set_storage_location(mut self, location: Option<std::path::PathBuf>) -> Self {
        self.storage_location = location;
        self
    }

    /// Set the certificate from a path.
    ///
    /// Certificate paths that are invalid or can't be parsed are ignored with a tracing warning.
    ///
    /// This function will only set the certificate bundle if the certificates are parsed successfully.
    ///
    /// If you would like more strict checking of the certificates, use `set_certificate` directly.
    pub async fn set_certificate_from_path(
        self,
        certificate_path: Option<std::path::PathBuf>,
    ) -> Self {
        let Some(path) = certificate_path else {
            return self;
        };

        let Ok(certs) = read_cert_file(&path).await.inspect_err(|e| {
            tracing::warn!(?path, %e, "Failed to parse the TLS certificates");
        }) else {
            return self;
        };

        self.set_certificate(Some(certs))
    }

    pub fn set_certificate(mut self, certificate: Option<Certificate>) -> Self {
        self.certificate = certificate;
        self
    }

    pub fn set_proxy(mut self, proxy: Option<Url>) -> Self {
        self.proxy = proxy;
        self
    }

    /// Build with JSON file storage, the system clock, and the configured endpoint.
    #[tracing::instrument(skip(self))]
    pub async fn build(mut self) -> Result<(FlagStore, Worker), BuildError> {
        let storage = match self.storage_location.take() {
            Some(location) => {
                JsonFile::new(location.clone()).ok_or(BuildError::StorageLocation(location))?
            }
            None => JsonFile::try_default()?,
        };

        let transport = if self.enable_remote {
            Transports::try_new(
                self.endpoint
                    .take()
                    .or_else(|| std::env::var(ENDPOINT_ENV_VAR).ok()),
                self.params.take().unwrap_or_default(),
                self.timeout
                    .take()
                    .unwrap_or_else(|| Duration::from_secs(3)),
                self.certificate.take(),
                self.proxy.take(),
            )?
        } else {
            Transports::none()
        };

        Ok(self
            .build_with(Arc::new(storage), transport, SystemClock)
            .await)
    }

    /// Build with caller-supplied collaborators. The endpoint, proxy, certificate, and timeout settings are not used.
    #[tracing::instrument(skip_all)]
    pub async fn build_with<S: Storage, T: Transport, C: Clock>(
        self,
        storage: Arc<S>,
        transport: T,
        clock: C,
    ) -> (FlagStore<S, T, C>, Worker) {
        let store = FlagStore::new(
            self.catalog,
            storage,
            transport,
            clock,
            self.cache_ttl.unwrap_or(DEFAULT_CACHE_TTL),
        )
        .await;

        let worker = Worker::new(
            &store,
            self.refresh_interval.unwrap_or(DEFAULT_REFRESH_INTERVAL),
        );

        (store, worker)
    }
}

#[tracing::instrument(ret(level = tracing::Level::TRACE))]
async fn read_cert_file(
    ssl_cert_file: impl AsRef<std::path::Path> + std::fmt::Debug,
) -> Result<Certificate, TransportsError> {
    let cert_buf = tokio::fs::read(&ssl_cert_file)
        .await
        .map_err(|e| TransportsError::Read(ssl_cert_file.as_ref().to_path_buf(), e))?;

    if let Ok(cert) = Certificate::from_pem(cert_buf.as_slice()) {
        return Ok(cert);
    }

    if let Ok(cert) = Certificate::from_der(cert_buf.as_slice()) {
        return Ok(cert);
    }

    Err(TransportsError::UnknownCertFormat)
}
