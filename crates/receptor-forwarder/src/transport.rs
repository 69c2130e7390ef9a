//! The delivery seam and its HTTP implementation.

use std::future::Future;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use flate2::Compression;
use flate2::write::GzEncoder;
use receptor_core::AgentConfig;
use reqwest::StatusCode;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use tracing::{debug, warn};

use crate::error::TransportError;

/// Delivers one serialized payload to the receiver.
///
/// `body` is uncompressed JSON. Implementations own their retry policy; an
/// `Err` means the payload is given up on.
pub trait Transport: Send + Sync + 'static {
    fn post(
        &self,
        path: &str,
        body: Vec<u8>,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;
}

impl<T: Transport> Transport for Arc<T> {
    fn post(
        &self,
        path: &str,
        body: Vec<u8>,
    ) -> impl Future<Output = Result<(), TransportError>> + Send {
        (**self).post(path, body)
    }
}

#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    pub sts_url: String,
    pub api_key: String,
    pub hostname: String,
    pub skip_ssl_validation: bool,
    pub https_proxy: Option<String>,
    pub gzip: bool,
    pub retry_min: Duration,
    pub retry_max: Duration,
    pub max_retries: u32,
    pub request_timeout: Duration,
}

impl HttpTransportConfig {
    pub fn new(sts_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            sts_url: sts_url.into(),
            api_key: api_key.into(),
            hostname: "localhost".to_string(),
            skip_ssl_validation: false,
            https_proxy: None,
            gzip: true,
            retry_min: Duration::from_secs(1),
            retry_max: Duration::from_secs(30),
            max_retries: 4,
            request_timeout: Duration::from_secs(30),
        }
    }

    pub fn from_agent_config(config: &AgentConfig) -> Result<Self, TransportError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| TransportError::Config("api_key is not set".to_string()))?;
        Ok(Self {
            sts_url: config.sts_url.clone(),
            api_key,
            hostname: config.hostname.clone(),
            skip_ssl_validation: config.skip_ssl_validation,
            https_proxy: config.proxy.https.clone(),
            gzip: config.gzip_payloads,
            retry_min: config.forwarder_retry_min,
            retry_max: config.forwarder_retry_max,
            max_retries: config.forwarder_max_retries,
            request_timeout: Duration::from_secs(30),
        })
    }
}

/// Retrying HTTP transport backed by reqwest.
pub struct HttpTransport {
    client: reqwest::Client,
    config: HttpTransportConfig,
}

impl HttpTransport {
    pub fn new(config: HttpTransportConfig) -> Result<Self, TransportError> {
        if config.api_key.is_empty() {
            return Err(TransportError::Config("api_key is not set".to_string()));
        }
        let mut builder = reqwest::Client::builder()
            .danger_accept_invalid_certs(config.skip_ssl_validation)
            .timeout(config.request_timeout);
        if let Some(proxy) = &config.https_proxy {
            builder = builder.proxy(reqwest::Proxy::https(proxy)?);
        }
        let client = builder.build()?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.sts_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    async fn send_once(&self, url: &str, body: &[u8]) -> Result<(), TransportError> {
        let mut request = self
            .client
            .post(url)
            .query(&[("api_key", self.config.api_key.as_str())])
            .header(CONTENT_TYPE, "application/json")
            .header("sts-api-key", &self.config.api_key)
            .header("sts-hostname", &self.config.hostname)
            .body(body.to_vec());
        if self.config.gzip {
            request = request.header(CONTENT_ENCODING, "gzip");
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(TransportError::Status {
                code: status.as_u16(),
            })
        }
    }
}

impl Transport for HttpTransport {
    async fn post(&self, path: &str, body: Vec<u8>) -> Result<(), TransportError> {
        let url = self.url(path);
        let body = if self.config.gzip { gzip(&body)? } else { body };

        let mut backoff = self.config.retry_min;
        let mut attempt = 0;
        loop {
            let err = match self.send_once(&url, &body).await {
                Ok(()) => {
                    debug!(%url, bytes = body.len(), attempt, "payload delivered");
                    return Ok(());
                }
                Err(e) => e,
            };
            if !is_retryable(&err) || attempt >= self.config.max_retries {
                return Err(err);
            }
            attempt += 1;
            warn!(%url, error = %err, attempt, ?backoff, "payload delivery failed, retrying");
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(self.config.retry_max);
        }
    }
}

/// Network errors, 5xx and 429 are worth another attempt.
fn is_retryable(err: &TransportError) -> bool {
    match err {
        TransportError::Request(_) => true,
        TransportError::Status { code } => StatusCode::from_u16(*code)
            .map(|s| s.is_server_error() || s == StatusCode::TOO_MANY_REQUESTS)
            .unwrap_or(false),
        TransportError::Encode(_) | TransportError::Config(_) => false,
    }
}

fn gzip(data: &[u8]) -> Result<Vec<u8>, TransportError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_classification() {
        assert!(is_retryable(&TransportError::Status { code: 500 }));
        assert!(is_retryable(&TransportError::Status { code: 503 }));
        assert!(is_retryable(&TransportError::Status { code: 429 }));
        assert!(!is_retryable(&TransportError::Status { code: 400 }));
        assert!(!is_retryable(&TransportError::Status { code: 404 }));
        assert!(!is_retryable(&TransportError::Config("x".into())));
    }

    #[test]
    fn missing_api_key_is_a_config_error() {
        let config = AgentConfig::default();
        assert!(matches!(
            HttpTransportConfig::from_agent_config(&config),
            Err(TransportError::Config(_))
        ));
        assert!(matches!(
            HttpTransport::new(HttpTransportConfig::new("http://x", "")),
            Err(TransportError::Config(_))
        ));
    }

    #[test]
    fn url_joins_base_and_path() {
        let transport =
            HttpTransport::new(HttpTransportConfig::new("http://sts:7077/", "key")).unwrap();
        assert_eq!(
            transport.url("/stsAgent/intake"),
            "http://sts:7077/stsAgent/intake"
        );
    }
}
