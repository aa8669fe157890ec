use reqwest::Certificate;
use url::Url;

use crate::DeviceId;

use super::{RemoteFlags, RequestParams, Transport};

#[derive(Clone, Debug)]
pub struct ReqwestTransport {
    endpoint: Url,
    params: RequestParams,
    timeout: std::time::Duration,
    client: reqwest::Client,
}
impl ReqwestTransport {
    #[cfg_attr(feature = "tracing-instrument", tracing::instrument(err))]
    pub(crate) fn new(
        endpoint: Url,
        params: RequestParams,
        timeout: std::time::Duration,
        certificates: Option<Certificate>,
        proxy: Option<Url>,
    ) -> Result<Self, ReqwestTransportError> {
        let mut builder = reqwest::ClientBuilder::new();

        if let Some(cert) = certificates {
            builder = builder.add_root_certificate(cert);
        }

        if let Some(proxy) = proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy.clone())?);
        }

        Ok(ReqwestTransport {
            endpoint,
            params,
            client: builder.build()?,
            timeout,
        })
    }

    fn url_for(&self, device_id: &DeviceId) -> Url {
        let mut url = self.endpoint.clone();
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("device_id", device_id.as_str());
            for (key, value) in self.params.iter() {
                query.append_pair(key, value);
            }
        }
        url
    }
}

impl Transport for ReqwestTransport {
    type Error = ReqwestTransportError;

    #[cfg_attr(feature = "tracing-instrument", tracing::instrument(skip_all, ret(level = tracing::Level::TRACE)))]
    async fn fetch_flags(&self, device_id: &DeviceId) -> Result<RemoteFlags, Self::Error> {
        let url = self.url_for(device_id);

        let res = self
            .client
            .get(url.clone())
            .header(reqwest::header::ACCEPT, "application/json")
            .timeout(self.timeout)
            .send()
            .await;

        match res {
            Ok(resp) if resp.status().is_success() => Ok(resp.json().await?),
            Ok(resp) => Err(Self::Error::Status(resp.status())),
            Err(err) => {
                tracing::debug!("Failed to fetch feature flags from `{}`", self.endpoint);
                Err(err)?
            }
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ReqwestTransportError {
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),

    #[error("The feature flag endpoint responded with {0}")]
    Status(reqwest::StatusCode),
}
