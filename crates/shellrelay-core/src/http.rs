//! Request and response types every layer agrees on: `http` 1.x carrying a [`Body`].

use crate::body::Body;

pub use http::header;
pub use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};

pub type Request = http::Request<Body>;
pub type Response = http::Response<Body>;

/// Builder for inbound requests, mostly used by hosts and tests.
pub fn request_builder() -> http::request::Builder {
    http::Request::builder()
}
