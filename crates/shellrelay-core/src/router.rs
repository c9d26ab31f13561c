//! Path and method dispatch for the relay's handlers.
//!
//! Each registered path owns an [`Endpoint`]: the handlers bound to specific methods plus an
//! optional catch-all used for every other method. Paths resolve through `matchit`, so
//! `/{*rest}` style wildcards are available. A wildcard never matches the bare `/`, which
//! has to be registered on its own.

use std::future::Future;
use std::sync::Arc;

use futures::future::{FutureExt, LocalBoxFuture};

use crate::context::RequestContext;
use crate::error::EdgeError;
use crate::http::{Method, Request, Response};
use crate::middleware::{Middleware, Next};
use crate::response::IntoResponse;

pub type HandlerFuture = LocalBoxFuture<'static, Result<Response, EdgeError>>;

/// Anything that turns a request into a response. Implemented for async closures and `async
/// fn`s taking a [`RequestContext`].
pub trait Handler: Send + Sync + 'static {
    fn call(&self, ctx: RequestContext) -> HandlerFuture;
}

impl<F, Fut, R> Handler for F
where
    F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, EdgeError>> + 'static,
    R: IntoResponse,
{
    fn call(&self, ctx: RequestContext) -> HandlerFuture {
        let pending = self(ctx);
        async move { pending.await.map(IntoResponse::into_response) }.boxed_local()
    }
}

#[derive(Default)]
struct Endpoint {
    by_method: Vec<(Method, Arc<dyn Handler>)>,
    any: Option<Arc<dyn Handler>>,
}

impl Endpoint {
    fn select(&self, method: &Method) -> Option<&Arc<dyn Handler>> {
        self.by_method
            .iter()
            .find(|(bound, _)| bound == method)
            .map(|(_, handler)| handler)
            .or(self.any.as_ref())
    }

    fn methods(&self) -> Vec<Method> {
        self.by_method.iter().map(|(method, _)| method.clone()).collect()
    }
}

#[derive(Default)]
pub struct RouterBuilder {
    endpoints: Vec<(String, Endpoint)>,
    middleware: Vec<Arc<dyn Middleware>>,
}

impl RouterBuilder {
    /// Bind `handler` to `method` on `path`. The first binding for a method wins.
    pub fn route(mut self, path: &str, method: Method, handler: impl Handler) -> Self {
        self.endpoint(path)
            .by_method
            .push((method, Arc::new(handler)));
        self
    }

    pub fn options(self, path: &str, handler: impl Handler) -> Self {
        self.route(path, Method::OPTIONS, handler)
    }

    /// Handle every method on `path` that has no binding of its own.
    pub fn any(mut self, path: &str, handler: impl Handler) -> Self {
        self.endpoint(path).any = Some(Arc::new(handler));
        self
    }

    /// Wrap every handler. The first middleware added runs outermost.
    pub fn middleware(mut self, middleware: impl Middleware) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    /// # Panics
    ///
    /// When two registered paths conflict in the matcher, e.g. `/{id}` and `/{name}`.
    pub fn build(self) -> RouterService {
        let mut paths = matchit::Router::new();
        for (path, endpoint) in self.endpoints {
            if let Err(err) = paths.insert(path.as_str(), endpoint) {
                panic!("cannot register route `{path}`: {err}");
            }
        }
        RouterService {
            shared: Arc::new(Shared {
                paths,
                middleware: self.middleware,
            }),
        }
    }

    fn endpoint(&mut self, path: &str) -> &mut Endpoint {
        let index = match self.endpoints.iter().position(|(known, _)| known == path) {
            Some(index) => index,
            None => {
                self.endpoints.push((path.to_string(), Endpoint::default()));
                self.endpoints.len() - 1
            }
        };
        &mut self.endpoints[index].1
    }
}

struct Shared {
    paths: matchit::Router<Endpoint>,
    middleware: Vec<Arc<dyn Middleware>>,
}

/// Immutable routing table. Cloning shares it.
#[derive(Clone)]
pub struct RouterService {
    shared: Arc<Shared>,
}

impl RouterService {
    pub fn builder() -> RouterBuilder {
        RouterBuilder::default()
    }

    /// Dispatch and render any error as its JSON response.
    pub async fn oneshot(&self, request: Request) -> Response {
        self.dispatch(request)
            .await
            .unwrap_or_else(IntoResponse::into_response)
    }

    pub async fn dispatch(&self, request: Request) -> Result<Response, EdgeError> {
        let handler = {
            let path = request.uri().path();
            let endpoint = self
                .shared
                .paths
                .at(path)
                .map_err(|_| EdgeError::not_found(path))?
                .value;
            endpoint
                .select(request.method())
                .cloned()
                .ok_or_else(|| EdgeError::method_not_allowed(request.method(), &endpoint.methods()))?
        };
        Next::new(&self.shared.middleware, handler.as_ref())
            .run(RequestContext::new(request))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::Body;
    use crate::http::{request_builder, StatusCode};

    fn request(method: Method, uri: &str) -> Request {
        request_builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    fn echo_path(ctx: RequestContext) -> impl Future<Output = Result<String, EdgeError>> {
        let path = ctx.request().uri().path().to_string();
        async move { Ok(format!("any {path}")) }
    }

    async fn preflight(_ctx: RequestContext) -> Result<(), EdgeError> {
        Ok(())
    }

    fn relay_shape() -> RouterService {
        RouterService::builder()
            .options("/", preflight)
            .options("/{*rest}", preflight)
            .any("/", echo_path)
            .any("/{*rest}", echo_path)
            .build()
    }

    fn text(response: &Response) -> &str {
        std::str::from_utf8(response.body().as_bytes()).unwrap()
    }

    #[tokio::test]
    async fn wildcard_and_root_both_route() {
        let router = relay_shape();

        let response = router.oneshot(request(Method::GET, "/")).await;
        assert_eq!(text(&response), "any /");

        let response = router.oneshot(request(Method::PATCH, "/api/tasks/7?x=1")).await;
        assert_eq!(text(&response), "any /api/tasks/7");
    }

    #[tokio::test]
    async fn method_binding_beats_catch_all() {
        let router = relay_shape();
        for uri in ["/", "/deep/path"] {
            let response = router.oneshot(request(Method::OPTIONS, uri)).await;
            assert_eq!(response.status(), StatusCode::NO_CONTENT);
        }
    }

    #[tokio::test]
    async fn unbound_method_lists_allowed() {
        let router = RouterService::builder()
            .route("/health", Method::GET, |_ctx: RequestContext| async { Ok::<_, EdgeError>("ok") })
            .options("/health", preflight)
            .build();

        let err = router.dispatch(request(Method::POST, "/health")).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert!(err.to_string().contains("allowed: GET, OPTIONS"));
    }

    #[tokio::test]
    async fn unknown_path_renders_not_found_json() {
        let router = RouterService::builder()
            .route("/health", Method::GET, |_ctx: RequestContext| async { Ok::<_, EdgeError>("ok") })
            .build();

        let response = router.oneshot(request(Method::GET, "/missing")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body: serde_json::Value = serde_json::from_slice(response.body().as_bytes()).unwrap();
        assert_eq!(body["error"]["message"], "no route for /missing");
    }

    #[tokio::test]
    async fn handler_errors_render_public_message() {
        let router = RouterService::builder()
            .any("/", |_ctx: RequestContext| async {
                Err::<(), _>(EdgeError::bad_gateway(anyhow::anyhow!("dial http://10.1.1.1:9/hidden")))
            })
            .build();

        let response = router.oneshot(request(Method::GET, "/")).await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert!(!text(&response).contains("hidden"));
    }

    #[test]
    #[should_panic(expected = "cannot register route")]
    fn conflicting_paths_panic() {
        RouterService::builder()
            .any("/{id}", preflight)
            .any("/{name}", preflight)
            .build();
    }
}
