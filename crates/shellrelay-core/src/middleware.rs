use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use crate::context::RequestContext;
use crate::error::EdgeError;
use crate::http::Response;
use crate::router::Handler;

/// Wraps route handlers. Call `next.run(ctx)` to continue, or return early to answer alone.
#[async_trait(?Send)]
pub trait Middleware: Send + Sync + 'static {
    async fn handle(&self, ctx: RequestContext, next: Next<'_>) -> Result<Response, EdgeError>;
}

/// The rest of the chain, ending at the matched handler.
pub struct Next<'a> {
    pending: &'a [Arc<dyn Middleware>],
    handler: &'a dyn Handler,
}

impl<'a> Next<'a> {
    pub(crate) fn new(pending: &'a [Arc<dyn Middleware>], handler: &'a dyn Handler) -> Self {
        Self { pending, handler }
    }

    pub async fn run(self, ctx: RequestContext) -> Result<Response, EdgeError> {
        match self.pending {
            [] => self.handler.call(ctx).await,
            [current, rest @ ..] => current.handle(ctx, Next::new(rest, self.handler)).await,
        }
    }
}

/// Logs one line per relayed request. Failures keep their full cause in the log even though
/// the caller only sees the public message.
pub struct RequestLogger;

#[async_trait(?Send)]
impl Middleware for RequestLogger {
    async fn handle(&self, ctx: RequestContext, next: Next<'_>) -> Result<Response, EdgeError> {
        let method = ctx.request().method().clone();
        let path = ctx.request().uri().path().to_owned();
        let started = Instant::now();

        let outcome = next.run(ctx).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match &outcome {
            Ok(response) => tracing::info!(
                %method, %path, status = response.status().as_u16(), elapsed_ms, "relayed"
            ),
            Err(err) if err.is_transport() => tracing::warn!(
                %method, %path, status = err.status().as_u16(), elapsed_ms, cause = %err, "upstream unreachable"
            ),
            Err(err) => tracing::error!(
                %method, %path, status = err.status().as_u16(), elapsed_ms, cause = %err, "request failed"
            ),
        }
        outcome
    }
}
