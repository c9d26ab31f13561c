use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::body::Body;
use crate::error::EdgeError;
use crate::http::{HeaderMap, Method, Response, StatusCode, Uri};

/// One outbound request, aimed at an absolute URI.
#[derive(Debug)]
pub struct ProxyRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Body,
}

impl ProxyRequest {
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            headers: HeaderMap::new(),
            body: Body::empty(),
        }
    }
}

/// How much of a response the caller may inspect. Cross-origin fetches made without CORS come
/// back `Opaque`; their status and body cannot be trusted and are never cached.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ResponseType {
    #[default]
    Basic,
    Cors,
    Opaque,
}

#[derive(Debug)]
pub struct ProxyResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Body,
    pub kind: ResponseType,
}

impl ProxyResponse {
    pub fn new(status: StatusCode, body: Body) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body,
            kind: ResponseType::Basic,
        }
    }

    pub fn with_kind(mut self, kind: ResponseType) -> Self {
        self.kind = kind;
        self
    }

    pub fn into_response(self) -> Response {
        let mut response = Response::new(self.body);
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

/// Performs one outbound exchange.
///
/// `Err` means no response arrived (refused connection, DNS failure, timeout) and should be
/// [`EdgeError::BadGateway`]. Every HTTP status, 5xx included, is an `Ok` response.
#[async_trait(?Send)]
pub trait ProxyClient: Send + Sync {
    async fn send(&self, request: ProxyRequest) -> Result<ProxyResponse, EdgeError>;
}

/// Shared outbound client. Hosts put one in each request's extensions.
#[derive(Clone)]
pub struct ProxyHandle(Arc<dyn ProxyClient>);

impl ProxyHandle {
    pub fn with_client(client: impl ProxyClient + 'static) -> Self {
        Self(Arc::new(client))
    }

    pub async fn send(&self, request: ProxyRequest) -> Result<ProxyResponse, EdgeError> {
        self.0.send(request).await
    }
}

impl fmt::Debug for ProxyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ProxyHandle")
    }
}
