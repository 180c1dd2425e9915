//! HTTP client for the mobile backend.

use std::time::Duration;

use reqwest::header::{ETAG, IF_NONE_MATCH};
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::config::{ConfigError, DataLayerConfig};
use crate::error::FetchError;

/// Status, ETag and body of a response, before any decoding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub etag: Option<String>,
    pub body: String,
}

#[derive(Clone, Debug)]
pub struct BackendClient {
    client: reqwest::Client,
    base_url: Url,
    request_timeout: Duration,
}

/// `url` with a trailing slash on its path, so relative joins append to the
/// path instead of replacing its last segment.
pub(crate) fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

impl BackendClient {
    pub fn new(base_url: Url, request_timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: with_trailing_slash(base_url),
            request_timeout,
        }
    }

    pub fn from_config(config: &DataLayerConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(config.backend_url()?, config.request_timeout()))
    }

    pub fn url(&self, path: &str, query: &[(&str, &str)]) -> Result<Url, FetchError> {
        let mut url = self.base_url.join(path)?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    /// GET `path`, sending `If-None-Match` when an ETag is given. Any status
    /// is returned as a response; only transport failures are errors.
    pub async fn get(
        &self,
        path: &str,
        query: &[(&str, &str)],
        etag: Option<&str>,
    ) -> Result<HttpResponse, FetchError> {
        let url = self.url(path, query)?;
        debug!(%url, ?etag, "GET");

        let mut request = self.client.get(url).timeout(self.request_timeout);
        if let Some(etag) = etag {
            request = request.header(IF_NONE_MATCH, etag);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let etag = response
            .headers()
            .get(ETAG)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response.text().await?;

        Ok(HttpResponse { status, etag, body })
    }

    /// GET and decode a 200 response.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, FetchError> {
        let response = self.get(path, query, None).await?;
        if response.status != 200 {
            return Err(FetchError::Status {
                code: response.status,
                body: response.body,
            });
        }
        Ok(serde_json::from_str(&response.body)?)
    }
}
