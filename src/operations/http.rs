//! Search operation backed by an HTTP endpoint

use super::traits::SearchOperation;
use crate::config::BackendConfig;
use crate::network::HttpClient;
use crate::race::{CancelReason, CancellationScope};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Successful answer from a backend
#[derive(Debug, Clone, Serialize)]
pub struct HttpHit {
    /// Backend that answered
    pub backend: String,
    /// HTTP status code
    pub status: u16,
    /// Final URL (after redirects)
    pub url: String,
    /// Response body
    pub body: String,
}

/// Why a backend did not produce a hit
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HttpOperationError {
    #[error("{backend} returned HTTP {status}")]
    Status { backend: String, status: u16 },

    /// 2xx with an empty body: the backend found nothing
    #[error("{backend} found nothing for the query")]
    Empty { backend: String },

    #[error("request to {backend} failed: {message}")]
    Transport { backend: String, message: String },

    #[error("{backend} abandoned: {reason}")]
    Cancelled {
        backend: String,
        reason: CancelReason,
    },
}

/// Queries one backend with `GET <url>?<query_param>=<query>`
pub struct HttpOperation {
    name: String,
    url: String,
    query_param: String,
    timeout: Option<Duration>,
    client: HttpClient,
}

impl HttpOperation {
    /// Create an operation for a configured backend
    pub fn new(client: HttpClient, config: &BackendConfig) -> Self {
        Self {
            name: config.name.clone(),
            url: config.url.clone(),
            query_param: config.query_param.clone(),
            timeout: config
                .timeout
                .filter(|t| t.is_finite() && *t > 0.0)
                .map(Duration::from_secs_f64),
            client,
        }
    }
}

#[async_trait]
impl SearchOperation for HttpOperation {
    type Query = String;
    type Output = HttpHit;
    type Error = HttpOperationError;

    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(
        &self,
        scope: &CancellationScope,
        query: &String,
    ) -> Result<HttpHit, HttpOperationError> {
        let params = [(self.query_param.clone(), query.clone())];
        let request = self.client.get_with_params(&self.url, &params, self.timeout);

        // Abandon the request as soon as the race no longer needs it.
        let response = tokio::select! {
            biased;
            _ = scope.cancelled() => {
                debug!("Abandoning request to {}", self.name);
                return Err(HttpOperationError::Cancelled {
                    backend: self.name.clone(),
                    reason: scope.reason().unwrap_or(CancelReason::Requested),
                });
            }
            response = request => response.map_err(|e| HttpOperationError::Transport {
                backend: self.name.clone(),
                message: e.to_string(),
            })?,
        };

        if !response.is_success() {
            return Err(HttpOperationError::Status {
                backend: self.name.clone(),
                status: response.status,
            });
        }
        if response.text.trim().is_empty() {
            return Err(HttpOperationError::Empty {
                backend: self.name.clone(),
            });
        }

        Ok(HttpHit {
            backend: self.name.clone(),
            status: response.status,
            url: response.url,
            body: response.text,
        })
    }
}
