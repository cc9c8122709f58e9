//! HTTP response building helpers
//!
//! Every handler answers with JSON. Errors use one envelope:
//! `{"status": "error", "message": ...}`.

use bytes::Bytes;
use http_body_util::Full;
use hyper::{header, Response, StatusCode};
use serde::Serialize;
use tracing::error;

use crate::error::NodeError;

/// Build a JSON response with the given status code
pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    let json = serde_json::to_string(body).unwrap_or_else(|_| "{}".to_string());
    let mut response = Response::new(Full::new(Bytes::from(json)));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("application/json"),
    );
    response
}

/// Build a JSON response with 200 OK status
pub fn ok<T: Serialize>(body: &T) -> Response<Full<Bytes>> {
    json_response(StatusCode::OK, body)
}

pub fn error_message(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    json_response(
        status,
        &serde_json::json!({ "status": "error", "message": message }),
    )
}

pub fn not_found(message: &str) -> Response<Full<Bytes>> {
    error_message(StatusCode::NOT_FOUND, message)
}

pub fn method_not_allowed() -> Response<Full<Bytes>> {
    error_message(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")
}

/// Convert a NodeError to an appropriate HTTP response.
///
/// Internal failures are logged here and reach the client as an opaque
/// message.
pub fn error_response(error: NodeError) -> Response<Full<Bytes>> {
    if error.is_internal() {
        error!(error = %error, "Request failed");
    }
    error_message(error.status_code(), &error.client_message())
}

/// Result type alias for handlers
pub type HandlerResult = Result<Response<Full<Bytes>>, NodeError>;

/// Wrap a service result into an HTTP response
pub fn from_result<T: Serialize>(result: Result<T, NodeError>) -> Response<Full<Bytes>> {
    match result {
        Ok(value) => ok(&value),
        Err(e) => error_response(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn body_json(resp: Response<Full<Bytes>>) -> serde_json::Value {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_ok_response() {
        let resp = ok(&serde_json::json!({"test": true}));
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
    }

    #[tokio::test]
    async fn test_error_envelope() {
        let resp = error_response(NodeError::NotFound("Nonexistent token.".into()));
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body = body_json(resp).await;
        assert_eq!(body["status"], "error");
        assert_eq!(body["message"], "Nonexistent token.");
    }

    #[tokio::test]
    async fn test_internal_error_is_opaque() {
        let resp = error_response(NodeError::Internal("sqlite exploded".into()));
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(resp).await;
        assert_eq!(body["message"], "Internal error");
    }
}
