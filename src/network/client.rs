//! HTTP client for querying search backends

use super::user_agent::{accept_any, generate_user_agent};
use crate::config::OutgoingSettings;
use anyhow::Result;
use reqwest::{Client, Response};
use std::collections::HashMap;
use std::time::Duration;

/// HTTP response from a backend
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// HTTP status code
    pub status: u16,
    /// Response body as text
    pub text: String,
    /// Response URL (after redirects)
    pub url: String,
}

impl HttpResponse {
    /// Check if response is successful (2xx)
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP client wrapper configured from outgoing settings
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    default_timeout: Duration,
    user_agent: String,
    extra_headers: HashMap<String, String>,
}

impl HttpClient {
    /// Create a new HTTP client with default settings
    pub fn new() -> Result<Self> {
        Self::with_settings(&OutgoingSettings::default())
    }

    /// Create a new HTTP client with custom settings
    pub fn with_settings(settings: &OutgoingSettings) -> Result<Self> {
        let request_timeout = Duration::try_from_secs_f64(settings.request_timeout)
            .map_err(|e| anyhow::anyhow!("invalid request_timeout: {}", e))?;

        let mut builder = Client::builder()
            .timeout(request_timeout)
            .pool_max_idle_per_host(settings.pool_maxsize)
            .gzip(true)
            .brotli(true);

        // SSL verification
        if !settings.verify_ssl {
            builder = builder.danger_accept_invalid_certs(true);
        }

        // Proxy settings
        if let Some(ref proxy_url) = settings.proxies.all {
            builder = builder.proxy(reqwest::Proxy::all(proxy_url)?);
        } else {
            if let Some(ref http) = settings.proxies.http {
                builder = builder.proxy(reqwest::Proxy::http(http)?);
            }
            if let Some(ref https) = settings.proxies.https {
                builder = builder.proxy(reqwest::Proxy::https(https)?);
            }
        }

        Ok(Self {
            client: builder.build()?,
            default_timeout: request_timeout,
            user_agent: generate_user_agent(settings.useragent_suffix.as_deref()),
            extra_headers: settings.extra_headers.clone(),
        })
    }

    /// GET `url` with query parameters
    ///
    /// `timeout` overrides the client's default request timeout.
    pub async fn get_with_params(
        &self,
        url: &str,
        params: &[(String, String)],
        timeout: Option<Duration>,
    ) -> Result<HttpResponse> {
        let mut req_builder = self
            .client
            .get(url)
            .timeout(timeout.unwrap_or(self.default_timeout))
            .header("User-Agent", &self.user_agent)
            .header("Accept", accept_any());

        for (key, value) in &self.extra_headers {
            req_builder = req_builder.header(key, value);
        }

        if !params.is_empty() {
            req_builder = req_builder.query(params);
        }

        let response = req_builder.send().await?;
        Self::parse_response(response).await
    }

    /// Parse response into HttpResponse
    async fn parse_response(response: Response) -> Result<HttpResponse> {
        let status = response.status().as_u16();
        let url = response.url().to_string();

        let text = response.text().await?;

        Ok(HttpResponse {
            status,
            text,
            url,
        })
    }
}
