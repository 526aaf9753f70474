// Copyright 2025 Memophor Labs
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! HTTP API handlers for TCE Proxy.
//!
//! This module implements the endpoints exposed to the front-end:
//!
//! - `GET /healthz` - Service health check
//! - `GET /metrics` - Prometheus metrics export
//! - `GET /api/agentes-publicos` - Public agent lookup by municipality, year and CPF
//! - `GET /api/proxy` - Allow-listed pass-through to the TCE API
//! - `GET /api/ip` - Egress IP of this service, for upstream firewall rules
//!
//! Every upstream-backed handler runs the same pipeline: validate the query,
//! fetch with retries, parse leniently, and answer with a shared-cache hint.
//! All responses carry permissive CORS headers.

use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, Request, State};
use axum::http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    CACHE_CONTROL,
};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::{Json, Router};
use reqwest::Url;
use serde_json::Value;
use tokio::time::Instant;
use tower_http::trace::TraceLayer;

use crate::error::AppError;
use crate::metrics::Metrics;
use crate::model::{AgentLookupQuery, EgressIpResponse, ProxyQuery, UpstreamRequest, UpstreamResponse};
use crate::policy::HostAllowList;
use crate::repair;
use crate::upstream::UpstreamFetcher;

/// `Cache-Control` hint for shared caches: fresh for `fresh_secs`, then
/// served stale for `stale_secs` while revalidating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheHint {
    pub fresh_secs: u64,
    pub stale_secs: u64,
}

impl CacheHint {
    pub const AGENT_LOOKUP: CacheHint = CacheHint {
        fresh_secs: 300,
        stale_secs: 600,
    };

    pub const PROXY: CacheHint = CacheHint {
        fresh_secs: 60,
        stale_secs: 300,
    };

    pub fn header_value(&self) -> String {
        format!(
            "s-maxage={}, stale-while-revalidate={}",
            self.fresh_secs, self.stale_secs
        )
    }
}

#[derive(Clone)]
pub struct AppState {
    pub fetcher: UpstreamFetcher,
    pub allowed_hosts: HostAllowList,
    pub upstream_base: Url,
    pub egress_url: Url,
    pub metrics: Metrics,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route("/metrics", get(metrics))
        .route("/api/agentes-publicos", any(handle_agent_lookup))
        .route("/api/proxy", any(handle_proxy))
        .route("/api/ip", any(handle_egress_ip))
        .layer(middleware::from_fn(cors))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Adds CORS headers to every response and answers preflights with 204.
async fn cors(request: Request, next: Next) -> Response {
    let mut response = if request.method() == Method::OPTIONS {
        StatusCode::NO_CONTENT.into_response()
    } else {
        next.run(request).await
    };

    let headers = response.headers_mut();
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, OPTIONS"),
    );
    headers.insert(
        ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type"),
    );

    response
}

/// Health check endpoint
pub async fn health() -> Result<Json<Value>, AppError> {
    Ok(Json(serde_json::json!({
        "status": "healthy",
        "service": "tce-proxy",
        "version": env!("CARGO_PKG_VERSION"),
    })))
}

/// Metrics endpoint
pub async fn metrics(State(state): State<AppState>) -> Result<String, AppError> {
    state.metrics.export()
}

/// Look up public agents of a municipality by CPF
pub async fn handle_agent_lookup(
    State(state): State<AppState>,
    method: Method,
    query: Result<Query<AgentLookupQuery>, QueryRejection>,
) -> Result<Response, AppError> {
    state.metrics.record_request();
    ensure_get(&method)?;

    let Query(query) = query.map_err(reject_query)?;
    let lookup = query.validate()?;
    let url = lookup.upstream_url(&state.upstream_base)?;

    tracing::info!(
        codigo_municipio = %lookup.codigo_municipio,
        exercicio_orcamento = %lookup.exercicio_orcamento,
        "looking up public agents"
    );

    let payload = fetch_json(&state, UpstreamRequest::get(url)).await?;

    Ok(cached_json(payload, CacheHint::AGENT_LOOKUP))
}

/// Forward a GET to an allow-listed upstream URL
pub async fn handle_proxy(
    State(state): State<AppState>,
    method: Method,
    query: Result<Query<ProxyQuery>, QueryRejection>,
) -> Result<Response, AppError> {
    state.metrics.record_request();
    ensure_get(&method)?;

    let Query(query) = query.map_err(reject_query)?;
    let raw = query.url.as_deref().map(str::trim).unwrap_or_default();
    if raw.is_empty() {
        return Err(AppError::bad_request("missing url"));
    }

    let url = Url::parse(raw).map_err(|_| AppError::bad_request("invalid url"))?;

    if !matches!(url.scheme(), "http" | "https") || !state.allowed_hosts.permits(&url) {
        tracing::warn!(%url, "rejected proxy target");
        return Err(AppError::bad_request(format!(
            "url not allowed (only {})",
            state.allowed_hosts
        )));
    }

    let payload = fetch_json(&state, UpstreamRequest::get(url)).await?;

    Ok(cached_json(payload, CacheHint::PROXY))
}

/// Report the public address this service egresses from
pub async fn handle_egress_ip(
    State(state): State<AppState>,
    method: Method,
) -> Result<Json<EgressIpResponse>, AppError> {
    state.metrics.record_request();
    ensure_get(&method)?;

    let response = fetch_ok(&state, UpstreamRequest::get(state.egress_url.clone())).await?;

    Ok(Json(EgressIpResponse {
        egress_ip: response.body.trim().to_string(),
    }))
}

fn ensure_get(method: &Method) -> Result<(), AppError> {
    if method == Method::GET {
        Ok(())
    } else {
        Err(AppError::MethodNotAllowed)
    }
}

fn reject_query(rejection: QueryRejection) -> AppError {
    AppError::bad_request(rejection.body_text())
}

/// Fetch `request` and require a 2xx answer.
async fn fetch_ok(state: &AppState, request: UpstreamRequest) -> Result<UpstreamResponse, AppError> {
    state.metrics.record_upstream_request();
    let start = Instant::now();

    let result = state.fetcher.fetch(&request).await;
    state
        .metrics
        .record_upstream_latency(start.elapsed().as_secs_f64());

    let response = match result {
        Ok(response) => response,
        Err(err) => {
            state.metrics.record_upstream_failure();
            tracing::error!(url = %request.url, error = %err, "upstream unavailable");
            return Err(err.into());
        }
    };

    if !response.is_success() {
        state.metrics.record_upstream_failure();
        tracing::warn!(
            url = %request.url,
            status = response.status,
            "upstream returned error status"
        );
        return Err(AppError::upstream_status(&response));
    }

    Ok(response)
}

/// Fetch `request` and parse its body as JSON, repairing it if needed.
async fn fetch_json(state: &AppState, request: UpstreamRequest) -> Result<Value, AppError> {
    let response = fetch_ok(state, request.clone()).await?;

    match repair::parse_lenient(&response.body) {
        Ok(parsed) => {
            if parsed.repaired {
                state.metrics.record_payload_repair();
                tracing::info!(url = %request.url, "upstream payload needed repair");
            }
            Ok(parsed.value)
        }
        Err(diagnostic) => {
            state.metrics.record_payload_parse_failure();
            tracing::warn!(
                url = %request.url,
                parse_error = %diagnostic.parse_error,
                "upstream payload is not JSON"
            );
            Err(AppError::UpstreamParse(diagnostic))
        }
    }
}

fn cached_json(payload: Value, hint: CacheHint) -> Response {
    (
        StatusCode::OK,
        [(CACHE_CONTROL, hint.header_value())],
        Json(payload),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_hints_render_as_header() {
        assert_eq!(
            CacheHint::AGENT_LOOKUP.header_value(),
            "s-maxage=300, stale-while-revalidate=600"
        );
        assert_eq!(
            CacheHint::PROXY.header_value(),
            "s-maxage=60, stale-while-revalidate=300"
        );
    }

    #[test]
    fn only_get_is_accepted() {
        assert!(ensure_get(&Method::GET).is_ok());
        assert!(matches!(
            ensure_get(&Method::POST),
            Err(AppError::MethodNotAllowed)
        ));
    }
}
