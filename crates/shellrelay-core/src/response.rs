use bytes::Bytes;

use crate::body::Body;
use crate::http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use crate::http::{HeaderValue, Response, StatusCode};

/// Values a handler may return in place of a full [`Response`].
pub trait IntoResponse {
    fn into_response(self) -> Response;
}

impl IntoResponse for Response {
    fn into_response(self) -> Response {
        self
    }
}

impl IntoResponse for () {
    fn into_response(self) -> Response {
        empty_response(StatusCode::NO_CONTENT)
    }
}

impl IntoResponse for &'static str {
    fn into_response(self) -> Response {
        text_response(StatusCode::OK, self)
    }
}

impl IntoResponse for String {
    fn into_response(self) -> Response {
        text_response(StatusCode::OK, self)
    }
}

pub fn empty_response(status: StatusCode) -> Response {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = status;
    response
}

pub fn text_response(status: StatusCode, text: impl Into<Bytes>) -> Response {
    buffered(status, text.into(), "text/plain; charset=utf-8")
}

pub fn json_response(status: StatusCode, value: &serde_json::Value) -> Response {
    buffered(status, Bytes::from(value.to_string()), "application/json")
}

fn buffered(status: StatusCode, bytes: Bytes, content_type: &'static str) -> Response {
    let mut response = empty_response(status);
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    headers.insert(CONTENT_LENGTH, HeaderValue::from(bytes.len()));
    *response.body_mut() = Body::Once(bytes);
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_is_no_content() {
        let response = ().into_response();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(response.body().is_empty());
        assert!(response.headers().is_empty());
    }

    #[test]
    fn text_sets_type_and_length() {
        let response = String::from("relay ready").into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], "text/plain; charset=utf-8");
        assert_eq!(response.headers()[CONTENT_LENGTH], "11");
        assert_eq!(response.body().as_bytes(), b"relay ready");
    }

    #[test]
    fn json_is_compact() {
        let response = json_response(
            StatusCode::SERVICE_UNAVAILABLE,
            &serde_json::json!({"error": "You are offline."}),
        );
        assert_eq!(response.headers()[CONTENT_TYPE], "application/json");
        assert_eq!(response.body().as_bytes(), br#"{"error":"You are offline."}"#);
    }
}
