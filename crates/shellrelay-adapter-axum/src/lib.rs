//! Native host for ShellRelay: serves core routers through axum on Tokio, with a `reqwest`
//! outbound client, an in-memory cache store and a Tokio task spawner.

mod cache;
mod proxy;
mod server;
mod service;
mod spawn;

pub use cache::MemoryCacheStore;
pub use proxy::AxumProxyClient;
pub use server::{init_logger, run_app, AxumDevServer, ServerConfig, DEFAULT_ADDR};
pub use service::axum_router;
pub use spawn::TokioSpawner;
