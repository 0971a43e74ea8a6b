//! Request-level errors and their HTTP mapping.

use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::proxy::{OPERATOR_VERSION, OPERATOR_VERSION_HEADER};

pub type Result<T, E = ProxyError> = std::result::Result<T, E>;

/// Errors that end handling of a single request, plus startup failures.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("failed to read request body: {0}")]
    MalformedBody(String),
    #[error("request body is not a JSON object: {0}")]
    InvalidJson(String),
    #[error("upstream {target} unavailable: {source}")]
    UpstreamUnavailable {
        target: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("upstream {target} timed out: {source}")]
    UpstreamTimeout {
        target: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::MalformedBody(_) | ProxyError::InvalidJson(_) => StatusCode::BAD_REQUEST,
            ProxyError::UpstreamUnavailable { .. } => StatusCode::BAD_GATEWAY,
            ProxyError::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::InvalidConfig(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn client_message(&self) -> &'static str {
        match self {
            ProxyError::MalformedBody(_) => "failed to read request body",
            ProxyError::InvalidJson(_) => "request body must be a JSON object",
            ProxyError::UpstreamUnavailable { .. } => "upstream connection error",
            ProxyError::UpstreamTimeout { .. } => "upstream timeout",
            ProxyError::InvalidConfig(_) => "internal error",
        }
    }
}

/// Responses the proxy answers itself carry the operator version and a JSON body.
impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let mut response = (
            self.status(),
            axum::Json(serde_json::json!({ "error": self.client_message() })),
        )
            .into_response();
        response.headers_mut().insert(
            OPERATOR_VERSION_HEADER,
            HeaderValue::from_static(OPERATOR_VERSION),
        );
        response
    }
}
