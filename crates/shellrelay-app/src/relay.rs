//! Edge proxy: relays every request to a single upstream and opens it up to any origin.

use std::sync::Arc;

use anyhow::anyhow;
use url::Url;

use shellrelay_core::body::Body;
use shellrelay_core::context::RequestContext;
use shellrelay_core::error::EdgeError;
use shellrelay_core::http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    CONTENT_LENGTH, TRANSFER_ENCODING,
};
use shellrelay_core::http::{HeaderValue, Method, Response, StatusCode, Uri};
use shellrelay_core::middleware::RequestLogger;
use shellrelay_core::proxy::{ProxyRequest, ProxyResponse};
use shellrelay_core::response::empty_response;
use shellrelay_core::router::RouterService;

use crate::settings::UpstreamBinding;

pub const ALLOWED_METHODS: &str = "GET, POST, DELETE, OPTIONS";
pub const ALLOWED_HEADERS: &str = "Content-Type";

/// Methods whose inbound body is sent upstream.
const BODY_METHODS: [Method; 3] = [Method::POST, Method::PUT, Method::PATCH];

/// Upstream base with the incoming query string transplanted onto it.
///
/// The incoming path is discarded. An absent or empty incoming query clears the upstream
/// query. The base comes from a secret binding, so parse errors never quote it.
pub fn upstream_target(base: &str, incoming: &Uri) -> Result<Uri, EdgeError> {
    let mut target = Url::parse(base)
        .map_err(|err| EdgeError::internal(anyhow!("upstream binding is not an absolute URL: {err}")))?;
    match incoming.query() {
        Some(query) if !query.is_empty() => target.set_query(Some(query)),
        _ => target.set_query(None),
    }
    target.set_fragment(None);

    target
        .as_str()
        .parse::<Uri>()
        .map_err(|err| EdgeError::internal(anyhow!("upstream URL rejected by http: {err}")))
}

pub fn forwards_body(method: &Method) -> bool {
    BODY_METHODS.contains(method)
}

pub fn forwarded_body(method: &Method, body: Body) -> Body {
    if forwards_body(method) {
        body
    } else {
        Body::empty()
    }
}

/// Local answer to a CORS preflight. Never reaches the upstream.
pub fn preflight() -> Response {
    let mut response = empty_response(StatusCode::NO_CONTENT);
    let headers = response.headers_mut();
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(ALLOWED_METHODS),
    );
    headers.insert(
        ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(ALLOWED_HEADERS),
    );
    response
}

/// Upstream response with `Access-Control-Allow-Origin: *`, replacing any upstream value.
pub fn with_cors(response: ProxyResponse) -> Response {
    let mut response = response.into_response();
    response
        .headers_mut()
        .insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    response
}

pub async fn forward(ctx: RequestContext, binding: &UpstreamBinding) -> Result<Response, EdgeError> {
    let base = binding.resolve()?;
    let handle = ctx.proxy_handle()?;

    let (parts, body) = ctx.into_request().into_parts();
    let target = upstream_target(&base, &parts.uri)?;

    let mut headers = parts.headers;
    if !forwards_body(&parts.method) {
        headers.remove(CONTENT_LENGTH);
        headers.remove(TRANSFER_ENCODING);
    }

    let request = ProxyRequest {
        body: forwarded_body(&parts.method, body),
        method: parts.method,
        uri: target,
        headers,
    };

    log::debug!("relaying {} {}", request.method, parts.uri.path());
    let response = handle.send(request).await?;
    Ok(with_cors(response))
}

async fn preflight_handler(_ctx: RequestContext) -> Result<Response, EdgeError> {
    Ok(preflight())
}

/// `OPTIONS` anywhere is answered locally; every other method on every path is relayed.
pub fn build_router(binding: UpstreamBinding) -> RouterService {
    let binding = Arc::new(binding);
    let relay = move |ctx: RequestContext| {
        let binding = Arc::clone(&binding);
        async move { forward(ctx, &binding).await }
    };

    RouterService::builder()
        .middleware(RequestLogger)
        .options("/", preflight_handler)
        .options("/{*path}", preflight_handler)
        .any("/", relay.clone())
        .any("/{*path}", relay)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use futures::executor::block_on;
    use shellrelay_core::http::{request_builder, HeaderMap};
    use shellrelay_core::proxy::{ProxyClient, ProxyHandle};
    use std::sync::Mutex;

    #[derive(Debug)]
    struct Seen {
        method: Method,
        uri: Uri,
        headers: HeaderMap,
        body: Bytes,
    }

    #[derive(Clone, Default)]
    struct RecordingClient {
        seen: Arc<Mutex<Vec<Seen>>>,
    }

    impl RecordingClient {
        fn take(&self) -> Vec<Seen> {
            std::mem::take(&mut *self.seen.lock().unwrap())
        }
    }

    #[async_trait(?Send)]
    impl ProxyClient for RecordingClient {
        async fn send(&self, request: ProxyRequest) -> Result<ProxyResponse, EdgeError> {
            let ProxyRequest {
                method,
                uri,
                headers,
                body,
            } = request;
            let body = body.collect().await.map_err(EdgeError::internal)?;
            self.seen.lock().unwrap().push(Seen {
                method,
                uri,
                headers,
                body,
            });

            let mut response = ProxyResponse::new(StatusCode::CREATED, Body::from("upstream"));
            response.headers.insert(
                ACCESS_CONTROL_ALLOW_ORIGIN,
                HeaderValue::from_static("https://only.example"),
            );
            response
                .headers
                .append("set-cookie", HeaderValue::from_static("a=1"));
            response
                .headers
                .append("set-cookie", HeaderValue::from_static("b=2"));
            Ok(response)
        }
    }

    /// Fails the way reqwest does, naming the full target in the error text.
    struct RefusingClient;

    #[async_trait(?Send)]
    impl ProxyClient for RefusingClient {
        async fn send(&self, request: ProxyRequest) -> Result<ProxyResponse, EdgeError> {
            Err(EdgeError::bad_gateway(
                anyhow!("tcp connect error: connection refused")
                    .context(format!("error sending request for url ({})", request.uri)),
            ))
        }
    }

    fn body_text(response: &Response) -> String {
        String::from_utf8(response.body().as_bytes().to_vec()).unwrap()
    }

    const BASE: &str = "https://ace-api.example.workers.dev/api";

    fn relay_request(
        router: &RouterService,
        client: Option<ProxyHandle>,
        method: Method,
        uri: &str,
        body: &'static str,
    ) -> Response {
        let mut builder = request_builder().method(method).uri(uri);
        if !body.is_empty() {
            builder = builder
                .header(CONTENT_LENGTH, body.len())
                .header("content-type", "application/json");
        }
        let mut request = builder.body(Body::from(body)).unwrap();
        if let Some(handle) = client {
            request.extensions_mut().insert(handle);
        }
        block_on(router.oneshot(request))
    }

    #[test]
    fn target_takes_incoming_query_and_keeps_upstream_path() {
        let incoming: Uri = "/ignored/path?name=foo".parse().unwrap();
        let target = upstream_target(BASE, &incoming).unwrap();
        assert_eq!(
            target.to_string(),
            "https://ace-api.example.workers.dev/api?name=foo"
        );
    }

    #[test]
    fn empty_incoming_query_clears_upstream_query() {
        let base = "https://up.example/api?token=abc#frag";
        let target = upstream_target(base, &"/".parse().unwrap()).unwrap();
        assert_eq!(target.to_string(), "https://up.example/api");

        let target = upstream_target(base, &"/?".parse().unwrap()).unwrap();
        assert_eq!(target.to_string(), "https://up.example/api");
    }

    #[test]
    fn malformed_base_is_internal_error() {
        let err = upstream_target("not a url", &"/".parse().unwrap()).unwrap_err();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(err.to_string().contains("not an absolute URL"));
    }

    #[test]
    fn malformed_base_never_reaches_body_or_log() {
        let router = build_router(UpstreamBinding::fixed("WORKER_URL", "not a url token=SECRET123"));
        let handle = ProxyHandle::with_client(RecordingClient::default());

        let err = upstream_target("not a url token=SECRET123", &"/".parse().unwrap()).unwrap_err();
        assert!(!err.to_string().contains("SECRET123"));

        let response = relay_request(&router, Some(handle), Method::GET, "/", "");
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_text(&response);
        assert!(!body.contains("SECRET123"));
        assert!(body.contains("\"message\":\"internal error\""));
    }

    #[test]
    fn only_mutating_methods_keep_their_body() {
        for method in [Method::POST, Method::PUT, Method::PATCH] {
            let body = forwarded_body(&method, Body::from("payload"));
            assert_eq!(body.as_bytes(), b"payload");
        }
        for method in [Method::GET, Method::DELETE, Method::HEAD, Method::OPTIONS] {
            assert!(forwarded_body(&method, Body::from("payload")).is_empty());
        }
    }

    #[test]
    fn preflight_has_cors_headers_and_no_body() {
        let response = preflight();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(response.body().is_empty());
        let headers = response.headers();
        assert_eq!(headers[ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(
            headers[ACCESS_CONTROL_ALLOW_METHODS],
            "GET, POST, DELETE, OPTIONS"
        );
        assert_eq!(headers[ACCESS_CONTROL_ALLOW_HEADERS], "Content-Type");
    }

    #[test]
    fn options_is_answered_without_upstream_or_config() {
        let router = build_router(UpstreamBinding::from_env("SHELLRELAY_TEST_NEVER_SET"));
        let client = RecordingClient::default();
        let handle = ProxyHandle::with_client(client.clone());

        for path in ["/", "/deep/path?x=1"] {
            let response =
                relay_request(&router, Some(handle.clone()), Method::OPTIONS, path, "");
            assert_eq!(response.status(), StatusCode::NO_CONTENT);
            assert_eq!(response.headers()[ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        }
        assert!(client.take().is_empty());
    }

    #[test]
    fn get_drops_inbound_body_and_length() {
        let router = build_router(UpstreamBinding::fixed("WORKER_URL", BASE));
        let client = RecordingClient::default();
        let handle = ProxyHandle::with_client(client.clone());

        for method in [Method::GET, Method::DELETE, Method::HEAD] {
            relay_request(
                &router,
                Some(handle.clone()),
                method.clone(),
                "/?name=foo",
                r#"{"leak":true}"#,
            );
            let seen = client.take();
            assert_eq!(seen.len(), 1);
            assert_eq!(seen[0].method, method);
            assert!(seen[0].body.is_empty());
            assert!(!seen[0].headers.contains_key(CONTENT_LENGTH));
            assert_eq!(seen[0].headers["content-type"], "application/json");
        }
    }

    #[test]
    fn post_forwards_body_headers_and_query() {
        let router = build_router(UpstreamBinding::fixed("WORKER_URL", BASE));
        let client = RecordingClient::default();
        let handle = ProxyHandle::with_client(client.clone());

        let response = relay_request(
            &router,
            Some(handle),
            Method::POST,
            "/tasks/ignored?name=foo",
            r#"{"title":"x"}"#,
        );
        assert_eq!(response.status(), StatusCode::CREATED);

        let seen = client.take();
        assert_eq!(seen.len(), 1);
        assert_eq!(
            seen[0].uri.to_string(),
            "https://ace-api.example.workers.dev/api?name=foo"
        );
        assert_eq!(seen[0].body.as_ref(), br#"{"title":"x"}"#);
        assert_eq!(seen[0].headers["content-type"], "application/json");
    }

    #[test]
    fn relayed_response_overrides_allow_origin_and_keeps_headers() {
        let router = build_router(UpstreamBinding::fixed("WORKER_URL", BASE));
        let handle = ProxyHandle::with_client(RecordingClient::default());

        let response = relay_request(&router, Some(handle), Method::GET, "/", "");
        assert_eq!(response.status(), StatusCode::CREATED);
        let allow: Vec<_> = response
            .headers()
            .get_all(ACCESS_CONTROL_ALLOW_ORIGIN)
            .iter()
            .collect();
        assert_eq!(allow, vec!["*"]);
        let cookies: Vec<_> = response.headers().get_all("set-cookie").iter().collect();
        assert_eq!(cookies, vec!["a=1", "b=2"]);
        assert_eq!(response.body().as_bytes(), b"upstream");
    }

    #[test]
    fn transport_failure_is_bad_gateway_json() {
        let router = build_router(UpstreamBinding::fixed("WORKER_URL", BASE));
        let handle = ProxyHandle::with_client(RefusingClient);

        let response = relay_request(&router, Some(handle), Method::GET, "/?id=1", "");
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(response.headers()["content-type"], "application/json");
        let body = body_text(&response);
        assert!(body.contains("\"status\":502"));
        assert!(body.contains("\"message\":\"upstream unavailable\""));
        assert!(!body.contains("ace-api.example.workers.dev"));
        assert!(!body.contains("/api"));
        assert!(!body.contains("connection refused"));
    }

    #[test]
    fn unset_binding_is_internal_error() {
        let router = build_router(UpstreamBinding::from_env("SHELLRELAY_TEST_NEVER_SET"));
        let handle = ProxyHandle::with_client(RecordingClient::default());

        let response = relay_request(&router, Some(handle), Method::GET, "/", "");
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!body_text(&response).contains("SHELLRELAY_TEST_NEVER_SET"));
    }

    #[test]
    fn missing_proxy_client_is_internal_error() {
        let router = build_router(UpstreamBinding::fixed("WORKER_URL", BASE));
        let response = relay_request(&router, None, Method::GET, "/", "");
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
