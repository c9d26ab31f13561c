use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONNECTION, CONTENT_LENGTH, HOST, TRANSFER_ENCODING};
use reqwest::Client;

use shellrelay_core::body::Body;
use shellrelay_core::error::EdgeError;
use shellrelay_core::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use shellrelay_core::proxy::{ProxyClient, ProxyRequest, ProxyResponse};

/// Upper bound for one outbound exchange, connect through last body byte.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// `reqwest`-backed outbound client. Bodies are buffered in both directions.
///
/// Transport failures become [`EdgeError::BadGateway`]. reqwest's error text names the full
/// target URL, so it only ever reaches the log through the error's `Display`.
#[derive(Clone, Debug)]
pub struct AxumProxyClient {
    client: Client,
}

impl AxumProxyClient {
    pub fn new() -> anyhow::Result<Self> {
        let client = Client::builder().timeout(DEFAULT_TIMEOUT).build()?;
        Ok(Self { client })
    }
}

/// Hop-specific request headers; reqwest sets its own for the outbound connection.
fn is_hop_header(name: &HeaderName) -> bool {
    [HOST, CONTENT_LENGTH, TRANSFER_ENCODING, CONNECTION].contains(name)
}

#[async_trait(?Send)]
impl ProxyClient for AxumProxyClient {
    async fn send(&self, request: ProxyRequest) -> Result<ProxyResponse, EdgeError> {
        let ProxyRequest {
            method,
            uri,
            headers,
            body,
        } = request;
        let method =
            reqwest::Method::from_bytes(method.as_str().as_bytes()).map_err(EdgeError::internal)?;

        let mut outbound = self.client.request(method, uri.to_string());
        for (name, value) in headers.iter().filter(|(name, _)| !is_hop_header(name)) {
            outbound = outbound.header(name.as_str(), value.as_bytes());
        }
        let payload = body.collect().await.map_err(EdgeError::internal)?;
        if !payload.is_empty() {
            outbound = outbound.body(payload);
        }

        let upstream = outbound.send().await.map_err(EdgeError::bad_gateway)?;
        let status =
            StatusCode::from_u16(upstream.status().as_u16()).map_err(EdgeError::internal)?;
        let headers = copy_response_headers(upstream.headers())?;
        let payload = upstream.bytes().await.map_err(EdgeError::bad_gateway)?;

        let mut response = ProxyResponse::new(status, Body::from_bytes(payload));
        response.headers = headers;
        Ok(response)
    }
}

/// The host re-frames the body, so upstream framing headers are dropped.
fn copy_response_headers(upstream: &reqwest::header::HeaderMap) -> Result<HeaderMap, EdgeError> {
    let mut headers = HeaderMap::with_capacity(upstream.len());
    for (name, value) in upstream {
        if *name == TRANSFER_ENCODING || *name == CONNECTION {
            continue;
        }
        headers.append(
            HeaderName::from_bytes(name.as_str().as_bytes()).map_err(EdgeError::internal)?,
            HeaderValue::from_bytes(value.as_bytes()).map_err(EdgeError::internal)?,
        );
    }
    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::RawQuery;
    use axum::routing::{any, get, post};
    use axum::Router;
    use bytes::Bytes;
    use futures::stream;
    use shellrelay_core::http::{Method, Uri};
    use tokio::net::TcpListener;

    async fn serve(router: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await });
        format!("http://{addr}")
    }

    fn target(base: &str, path: &str) -> Uri {
        format!("{base}{path}").parse().unwrap()
    }

    fn client() -> AxumProxyClient {
        AxumProxyClient::new().unwrap()
    }

    fn text(response: &ProxyResponse) -> &str {
        std::str::from_utf8(response.body.as_bytes()).unwrap()
    }

    #[tokio::test]
    async fn query_reaches_upstream() {
        let base = serve(Router::new().route(
            "/api",
            get(|RawQuery(query): RawQuery| async move { query.unwrap_or_default() }),
        ))
        .await;

        let request = ProxyRequest::new(Method::GET, target(&base, "/api?page=2&sort=asc"));
        let response = client().send(request).await.unwrap();
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(text(&response), "page=2&sort=asc");
    }

    #[tokio::test]
    async fn streamed_body_is_buffered_and_stale_length_dropped() {
        let base = serve(Router::new().route("/echo", post(|body: Bytes| async move { body }))).await;

        let mut request = ProxyRequest::new(Method::POST, target(&base, "/echo"));
        request
            .headers
            .insert(CONTENT_LENGTH, HeaderValue::from_static("999"));
        request.body = Body::from_stream(stream::iter(vec![
            Ok::<_, std::io::Error>(Bytes::from("{\"title\":")),
            Ok(Bytes::from("\"ship\"}")),
        ]));

        let response = client().send(request).await.unwrap();
        assert_eq!(text(&response), "{\"title\":\"ship\"}");
    }

    #[tokio::test]
    async fn host_header_is_replaced_and_others_kept() {
        let base = serve(Router::new().route(
            "/headers",
            get(|headers: axum::http::HeaderMap| async move {
                let read = |name: &str| {
                    headers
                        .get(name)
                        .and_then(|value| value.to_str().ok())
                        .unwrap_or("missing")
                        .to_string()
                };
                format!("{}|{}", read("authorization"), read("host"))
            }),
        ))
        .await;

        let mut request = ProxyRequest::new(Method::GET, target(&base, "/headers"));
        request
            .headers
            .insert("authorization", HeaderValue::from_static("Bearer t0ken"));
        request
            .headers
            .insert(HOST, HeaderValue::from_static("shellrelay.local"));

        let response = client().send(request).await.unwrap();
        let authority = base.trim_start_matches("http://");
        assert_eq!(text(&response), format!("Bearer t0ken|{authority}"));
    }

    #[tokio::test]
    async fn repeated_response_headers_survive() {
        let base = serve(Router::new().route(
            "/cookies",
            get(|| async { ([("set-cookie", "a=1"), ("set-cookie", "b=2")], "{}") }),
        ))
        .await;

        let response = client()
            .send(ProxyRequest::new(Method::GET, target(&base, "/cookies")))
            .await
            .unwrap();
        let cookies: Vec<_> = response.headers.get_all("set-cookie").iter().collect();
        assert_eq!(cookies, ["a=1", "b=2"]);
    }

    #[tokio::test]
    async fn upstream_5xx_is_a_response() {
        let base = serve(Router::new().route(
            "/down",
            any(|| async { (axum::http::StatusCode::SERVICE_UNAVAILABLE, "down") }),
        ))
        .await;

        let response = client()
            .send(ProxyRequest::new(Method::DELETE, target(&base, "/down")))
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(text(&response), "down");
    }

    #[tokio::test]
    async fn refused_connection_is_bad_gateway() {
        let closed = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = closed.local_addr().unwrap();
        drop(closed);

        let base = format!("http://{addr}");
        let err = client()
            .send(ProxyRequest::new(Method::GET, target(&base, "/private/path")))
            .await
            .unwrap_err();
        assert!(err.is_transport());
        assert_eq!(err.public_message(), "upstream unavailable");
        assert!(err.to_string().contains(&addr.to_string()));
    }
}
