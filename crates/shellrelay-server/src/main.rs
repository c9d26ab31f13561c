use anyhow::Context;
use shellrelay_adapter_axum::run_app;
use shellrelay_app::{ShellRelayApp, MANIFEST};

fn main() {
    if let Err(err) = run() {
        eprintln!("shellrelay failed: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    run_app::<ShellRelayApp>(MANIFEST).context("relay server")
}
