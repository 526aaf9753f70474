use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::model::UpstreamResponse;
use crate::repair::{self, RepairDiagnostic};
use crate::upstream::FetchError;

/// Characters of an upstream error body echoed back to the caller.
pub const UPSTREAM_SNIPPET_CHARS: usize = 800;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),
    #[error("use GET")]
    MethodNotAllowed,
    #[error("upstream request failed")]
    UpstreamTransport(#[from] FetchError),
    #[error("upstream returned an error status")]
    UpstreamStatus { status: u16, body_snippet: String },
    #[error("upstream returned invalid JSON")]
    UpstreamParse(RepairDiagnostic),
    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    /// HTTP status of this response, echoed for clients that only read the
    /// body. The upstream's own status, if any, is `upstream_status`.
    status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    upstream_status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    upstream_body_snippet: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    body_snippet: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parse_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl AppError {
    pub fn bad_request<T: Into<String>>(message: T) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn upstream_status(response: &UpstreamResponse) -> Self {
        Self::UpstreamStatus {
            status: response.status,
            body_snippet: repair::snippet(&response.body, UPSTREAM_SNIPPET_CHARS),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            AppError::UpstreamTransport(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::UpstreamStatus { .. } => StatusCode::BAD_GATEWAY,
            AppError::UpstreamParse(_) => StatusCode::BAD_GATEWAY,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let mut body = ErrorBody {
            error: self.to_string(),
            status: status.as_u16(),
            upstream_status: None,
            upstream_body_snippet: None,
            body_snippet: None,
            parse_error: None,
            details: None,
        };

        match self {
            AppError::UpstreamTransport(err) => body.details = Some(err.to_string()),
            AppError::UpstreamStatus {
                status,
                body_snippet,
            } => {
                body.upstream_status = Some(status);
                body.upstream_body_snippet = Some(body_snippet);
            }
            AppError::UpstreamParse(diagnostic) => {
                body.parse_error = Some(diagnostic.parse_error);
                body.body_snippet = Some(diagnostic.snippet);
            }
            AppError::Internal(err) => {
                tracing::error!(error = ?err, "unhandled proxy failure");
                body.details = Some(format!("{err:#}"));
            }
            AppError::BadRequest(_) | AppError::MethodNotAllowed => {}
        }

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    async fn render(err: AppError) -> (StatusCode, Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn upstream_status_envelope() {
        let body = "x".repeat(2000);
        let (status, json) = render(AppError::upstream_status(&UpstreamResponse::new(500, body))).await;

        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(json["upstream_status"], 500);
        assert_eq!(
            json["upstream_body_snippet"].as_str().unwrap().len(),
            UPSTREAM_SNIPPET_CHARS
        );
        assert!(json.get("details").is_none());
    }

    #[tokio::test]
    async fn transport_failure_is_500_with_details() {
        let (status, json) = render(AppError::from(FetchError::Timeout { attempts: 3 })).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            json,
            json!({
                "error": "upstream request failed",
                "status": 500,
                "details": "upstream timed out after 3 attempt(s)",
            })
        );
    }

    #[tokio::test]
    async fn parse_failure_carries_diagnostic() {
        let diagnostic = RepairDiagnostic {
            parse_error: "expected value at line 1 column 1".into(),
            snippet: "<html>".into(),
        };
        let (status, json) = render(AppError::UpstreamParse(diagnostic)).await;

        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(json["parse_error"], "expected value at line 1 column 1");
        assert_eq!(json["body_snippet"], "<html>");
    }

    #[tokio::test]
    async fn validation_and_method_errors() {
        let (status, json) = render(AppError::bad_request("missing url")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json, json!({"error": "missing url", "status": 400}));

        let (status, json) = render(AppError::MethodNotAllowed).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(json["error"], "use GET");
    }
}
