//! ShellRelay application: the CORS edge relay and the offline cache worker.
//!
//! [`ShellRelayApp`] is what the server binary runs. The [`OfflineWorker`] is exposed for hosts
//! that control page fetches; [`offline_config`] gives them the shell and generation declared
//! in the embedded manifest.

pub mod offline;
pub mod relay;
pub mod settings;

use shellrelay_core::app::Hooks;
use shellrelay_core::manifest::Manifest;
use shellrelay_core::router::RouterService;

pub use offline::{classify, OfflineError, OfflineWorker, Strategy, WorkerState};
pub use relay::build_router;
pub use settings::{OfflineConfig, UpstreamBinding};

/// Manifest compiled into the app and the server binary.
pub const MANIFEST: &str = include_str!("../../../shellrelay.toml");

fn embedded_manifest() -> Option<Manifest> {
    Manifest::parse(MANIFEST)
        .map_err(|err| log::warn!("embedded manifest rejected, using defaults: {err}"))
        .ok()
}

/// Offline worker settings from the embedded manifest.
pub fn offline_config() -> OfflineConfig {
    embedded_manifest()
        .map(|manifest| OfflineConfig::from_manifest(&manifest))
        .unwrap_or_default()
}

pub struct ShellRelayApp;

impl Hooks for ShellRelayApp {
    fn name() -> &'static str {
        "shellrelay"
    }

    fn routes() -> RouterService {
        let binding = embedded_manifest()
            .map(|manifest| UpstreamBinding::from_manifest(&manifest))
            .unwrap_or_default();
        build_router(binding)
    }
}
