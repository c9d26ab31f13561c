//! Core primitives shared by the ShellRelay edge proxy and offline cache worker.

pub mod app;
pub mod body;
pub mod cache;
pub mod context;
pub mod error;
pub mod http;
pub mod manifest;
pub mod middleware;
pub mod proxy;
pub mod response;
pub mod router;
pub mod task;
