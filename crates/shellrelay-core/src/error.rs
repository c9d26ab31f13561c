use serde_json::json;
use thiserror::Error;

use crate::http::{Method, Response, StatusCode};
use crate::response::{json_response, IntoResponse};

/// Failure of a handler or an outbound exchange, mapped onto an HTTP status.
///
/// `Display` carries the full cause chain for logs. Callers only ever see
/// [`EdgeError::public_message`], which omits the cause for upstream and internal failures so
/// upstream URLs and binding values stay server side.
#[derive(Debug, Error)]
pub enum EdgeError {
    #[error("{0}")]
    BadRequest(String),
    #[error("no route for {0}")]
    NotFound(String),
    #[error("method {method} not allowed (allowed: {allowed})")]
    MethodNotAllowed { method: Method, allowed: String },
    /// No response was obtained from the upstream or origin.
    #[error("upstream unavailable: {0:#}")]
    BadGateway(anyhow::Error),
    #[error("internal error: {0:#}")]
    Internal(anyhow::Error),
}

impl EdgeError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        EdgeError::BadRequest(message.into())
    }

    pub fn not_found(path: impl Into<String>) -> Self {
        EdgeError::NotFound(path.into())
    }

    pub fn method_not_allowed(method: &Method, allowed: &[Method]) -> Self {
        let allowed = allowed
            .iter()
            .map(Method::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        EdgeError::MethodNotAllowed {
            method: method.clone(),
            allowed,
        }
    }

    pub fn bad_gateway(cause: impl Into<anyhow::Error>) -> Self {
        EdgeError::BadGateway(cause.into())
    }

    pub fn internal(cause: impl Into<anyhow::Error>) -> Self {
        EdgeError::Internal(cause.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            EdgeError::BadRequest(_) => StatusCode::BAD_REQUEST,
            EdgeError::NotFound(_) => StatusCode::NOT_FOUND,
            EdgeError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            EdgeError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            EdgeError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Text that is safe to put in a response body.
    pub fn public_message(&self) -> String {
        match self {
            EdgeError::BadGateway(_) => "upstream unavailable".to_string(),
            EdgeError::Internal(_) => "internal error".to_string(),
            other => other.to_string(),
        }
    }

    /// Transport failures are expected while an upstream is down and log below error level.
    pub fn is_transport(&self) -> bool {
        matches!(self, EdgeError::BadGateway(_))
    }
}

impl IntoResponse for EdgeError {
    fn into_response(self) -> Response {
        let status = self.status();
        json_response(
            status,
            &json!({
                "error": {
                    "status": status.as_u16(),
                    "message": self.public_message(),
                }
            }),
        )
    }
}
