use reqwest::{Client, Method};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::trace;

use super::RequestGate;
use crate::config::ScanConfig;
use crate::error::{ConfigError, NetworkError};
use crate::models::{HttpMethod, ResponseInfo};

/// Hard cap on how much of a response body is buffered.
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// One outgoing request. The configured auth header is added unless
/// `without_auth` is set.
#[derive(Debug, Clone)]
pub struct ProbeRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
    pub with_auth: bool,
}

impl ProbeRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
            with_auth: true,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, url)
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn without_auth(mut self) -> Self {
        self.with_auth = false;
        self
    }
}

/// HTTP client bound to one target's worker. Every request passes the shared
/// `RequestGate` and carries a deadline.
pub struct HttpClient {
    client: Client,
    gate: Arc<RequestGate>,
    timeout_secs: u64,
    auth_header: Option<(String, String)>,
    sample_limit: usize,
    sent: AtomicUsize,
}

impl HttpClient {
    pub fn build_client(config: &ScanConfig) -> Result<Client, ConfigError> {
        Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.timeout_secs))
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(config.user_agent.clone())
            .danger_accept_invalid_certs(false)
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))
    }

    pub fn new(config: &ScanConfig, gate: Arc<RequestGate>) -> Result<Self, ConfigError> {
        Ok(Self::with_client(Self::build_client(config)?, config, gate))
    }

    pub fn with_client(client: Client, config: &ScanConfig, gate: Arc<RequestGate>) -> Self {
        Self {
            client,
            gate,
            timeout_secs: config.timeout_secs,
            auth_header: config.auth_header.clone(),
            sample_limit: config.body_sample_limit,
            sent: AtomicUsize::new(0),
        }
    }

    pub fn has_auth(&self) -> bool {
        self.auth_header.is_some()
    }

    pub fn requests_sent(&self) -> usize {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn is_cancelled(&self) -> bool {
        self.gate.is_cancelled()
    }

    pub async fn send(&self, probe: &ProbeRequest) -> Result<ResponseInfo, NetworkError> {
        let _permit = self.gate.admit().await?;
        self.sent.fetch_add(1, Ordering::Relaxed);

        let start = Instant::now();
        let mut request = self
            .client
            .request(Self::to_reqwest_method(probe.method), &probe.url)
            .header("Accept", "application/json");

        if probe.with_auth {
            if let Some((name, value)) = &self.auth_header {
                request = request.header(name.as_str(), value.as_str());
            }
        }

        for (key, value) in &probe.headers {
            request = request.header(key.as_str(), value.as_str());
        }

        if let Some(body) = &probe.body {
            request = request.json(body);
        }

        let deadline = Duration::from_secs(self.timeout_secs + 1);
        let exchange = async {
            let mut response = request
                .send()
                .await
                .map_err(|e| NetworkError::from_reqwest(e, self.timeout_secs))?;

            let status = response.status().as_u16();
            let headers: BTreeMap<String, String> = response
                .headers()
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
                .collect();

            let mut bytes = Vec::new();
            while let Some(chunk) = response
                .chunk()
                .await
                .map_err(|e| NetworkError::from_reqwest(e, self.timeout_secs))?
            {
                bytes.extend_from_slice(&chunk);
                if bytes.len() >= MAX_BODY_BYTES {
                    bytes.truncate(MAX_BODY_BYTES);
                    break;
                }
            }

            Ok::<_, NetworkError>(ResponseInfo::with_sample_limit(
                status,
                headers,
                &bytes,
                self.sample_limit,
            ))
        };

        let result = tokio::select! {
            _ = self.gate.cancel_token().cancelled() => Err(NetworkError::Cancelled),
            outcome = tokio::time::timeout(deadline, exchange) => {
                outcome.unwrap_or(Err(NetworkError::Timeout(self.timeout_secs)))
            }
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        trace!(method = %probe.method, url = %probe.url, duration_ms, ok = result.is_ok(), "request finished");
        result.map(|info| info.with_duration(duration_ms))
    }

    fn to_reqwest_method(method: HttpMethod) -> Method {
        match method {
            HttpMethod::Get => Method::GET,
            HttpMethod::Post => Method::POST,
            HttpMethod::Put => Method::PUT,
            HttpMethod::Patch => Method::PATCH,
            HttpMethod::Delete => Method::DELETE,
            HttpMethod::Head => Method::HEAD,
            HttpMethod::Options => Method::OPTIONS,
        }
    }
}
