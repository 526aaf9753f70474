// Copyright 2025 Memophor Labs
// SPDX-License-Identifier: Apache-2.0

//! Upstream fetcher for TCE Proxy.
//!
//! [`UpstreamFetcher`] runs a GET through a swappable [`HttpTransport`] under a
//! [`RetryPolicy`]. Only transport failures (timeouts, connection errors) are
//! retried; any complete response, whatever its status, ends the fetch.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE, USER_AGENT};
use reqwest::redirect;
use reqwest::Client;
use thiserror::Error;

use crate::model::{UpstreamRequest, UpstreamResponse, DEFAULT_CONTENT_TYPE};
use crate::policy::RetryPolicy;

/// Failure of a single attempt.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("{0}")]
    Network(String),
}

/// Failure of the whole fetch, after every attempt was spent.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("upstream timed out after {attempts} attempt(s)")]
    Timeout { attempts: usize },
    #[error("upstream unreachable after {attempts} attempt(s): {message}")]
    Network { attempts: usize, message: String },
}

impl FetchError {
    pub fn attempts(&self) -> usize {
        match self {
            FetchError::Timeout { attempts } | FetchError::Network { attempts, .. } => *attempts,
        }
    }
}

/// Executes one upstream request within `timeout`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(
        &self,
        request: &UpstreamRequest,
        timeout: Duration,
    ) -> Result<UpstreamResponse, TransportError>;
}

/// reqwest-backed transport used in production.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn try_new() -> anyhow::Result<Self> {
        // Redirect targets would bypass the proxy allow-list; a 3xx is handed
        // back like any other status.
        let client = Client::builder()
            .redirect(redirect::Policy::none())
            .build()
            .context("Failed to build upstream client")?;

        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(
        &self,
        request: &UpstreamRequest,
        timeout: Duration,
    ) -> Result<UpstreamResponse, TransportError> {
        let response = self
            .client
            .get(request.url.clone())
            .header(USER_AGENT, &request.user_agent)
            .header(ACCEPT, &request.accept)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| classify(e, timeout))?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or(DEFAULT_CONTENT_TYPE)
            .to_string();

        let bytes = response.bytes().await.map_err(|e| classify(e, timeout))?;

        Ok(UpstreamResponse {
            status,
            body: String::from_utf8_lossy(&bytes).into_owned(),
            content_type,
        })
    }
}

fn classify(err: reqwest::Error, timeout: Duration) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(timeout)
    } else {
        TransportError::Network(err.to_string())
    }
}

/// Retrying upstream client. Holds only immutable configuration, so clones
/// can serve concurrent requests.
#[derive(Clone)]
pub struct UpstreamFetcher {
    transport: Arc<dyn HttpTransport>,
    policy: RetryPolicy,
}

impl UpstreamFetcher {
    pub fn new(transport: Arc<dyn HttpTransport>, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn fetch(&self, request: &UpstreamRequest) -> Result<UpstreamResponse, FetchError> {
        let attempts = self.policy.attempts();
        let total = attempts.len();
        let mut last_error = TransportError::Timeout(Duration::ZERO);

        for (index, attempt) in attempts.iter().enumerate() {
            let number = index + 1;

            // Dropping the in-flight future on expiry closes its connection.
            let outcome = match tokio::time::timeout(
                attempt.timeout,
                self.transport.execute(request, attempt.timeout),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout(attempt.timeout)),
            };

            match outcome {
                Ok(response) => {
                    tracing::debug!(
                        url = %request.url,
                        attempt = number,
                        status = response.status,
                        "upstream responded"
                    );
                    return Ok(response);
                }
                Err(error) => {
                    tracing::warn!(
                        url = %request.url,
                        attempt = number,
                        of = total,
                        %error,
                        "upstream attempt failed"
                    );
                    last_error = error;

                    if number < total && !attempt.delay.is_zero() {
                        tokio::time::sleep(attempt.delay).await;
                    }
                }
            }
        }

        Err(match last_error {
            TransportError::Timeout(_) => FetchError::Timeout { attempts: total },
            TransportError::Network(message) => FetchError::Network {
                attempts: total,
                message,
            },
        })
    }
}
