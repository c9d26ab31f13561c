use anyhow::anyhow;

use crate::error::EdgeError;
use crate::http::Request;
use crate::proxy::ProxyHandle;

/// What a handler receives: the inbound request, with whatever the host attached to its
/// extensions.
#[derive(Debug)]
pub struct RequestContext {
    request: Request,
}

impl RequestContext {
    pub(crate) fn new(request: Request) -> Self {
        Self { request }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn into_request(self) -> Request {
        self.request
    }

    /// Outbound client the host attached to this request.
    pub fn proxy_handle(&self) -> Result<ProxyHandle, EdgeError> {
        self.request
            .extensions()
            .get::<ProxyHandle>()
            .cloned()
            .ok_or_else(|| EdgeError::internal(anyhow!("host attached no outbound client")))
    }
}
