//! Runs a core [`RouterService`] inside axum.
//!
//! Core bodies and handler futures are not `Send`, while axum requires `Send` handlers. Each
//! request therefore runs to completion on the worker thread that accepted it, through
//! `block_in_place`. This needs the multi-threaded Tokio runtime.

use axum::body::Body as AxumBody;
use axum::extract::{Request, State};
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE, TRANSFER_ENCODING};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::Response;
use axum::Router;
use tokio::runtime::Handle;

use shellrelay_core::body::Body;
use shellrelay_core::http::{Request as CoreRequest, Response as CoreResponse};
use shellrelay_core::proxy::ProxyHandle;
use shellrelay_core::router::RouterService;

#[derive(Clone)]
struct Hosted {
    router: RouterService,
    outbound: Option<ProxyHandle>,
}

/// Axum router that sends every request to `router`. `outbound`, when given, is attached to
/// each request so handlers can reach upstreams.
pub fn axum_router(router: RouterService, outbound: Option<ProxyHandle>) -> Router {
    Router::new()
        .fallback(dispatch)
        .with_state(Hosted { router, outbound })
}

async fn dispatch(State(hosted): State<Hosted>, request: Request) -> Response {
    tokio::task::block_in_place(move || {
        Handle::current().block_on(async move {
            let mut request = to_core(request);
            if let Some(outbound) = hosted.outbound {
                request.extensions_mut().insert(outbound);
            }
            from_core(hosted.router.oneshot(request).await).await
        })
    })
}

/// Only requests that announce a payload keep their body stream.
fn to_core(request: Request) -> CoreRequest {
    let (parts, body) = request.into_parts();
    let body = if has_payload(&parts.headers) {
        Body::from_stream(body.into_data_stream())
    } else {
        Body::empty()
    };
    CoreRequest::from_parts(parts, body)
}

fn has_payload(headers: &HeaderMap) -> bool {
    let length = headers
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok());
    headers.contains_key(TRANSFER_ENCODING) || matches!(length, Some(len) if len > 0)
}

/// Streams are buffered here because axum cannot hold a non-`Send` body.
async fn from_core(response: CoreResponse) -> Response {
    let (parts, body) = response.into_parts();
    match body.collect().await {
        Ok(bytes) => Response::from_parts(parts, AxumBody::from(bytes)),
        Err(err) => {
            tracing::error!(cause = %err, "response body failed mid-stream");
            let mut failed = Response::new(AxumBody::from("response body failed"));
            *failed.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            failed.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static("text/plain; charset=utf-8"),
            );
            failed
        }
    }
}
