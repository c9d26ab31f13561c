use std::future::pending;
use std::net::SocketAddr;

use anyhow::Context;
use log::LevelFilter;
use simple_logger::SimpleLogger;
use tokio::net::TcpListener;

use shellrelay_core::app::Hooks;
use shellrelay_core::manifest::{LoggingSection, Manifest};
use shellrelay_core::proxy::ProxyHandle;
use shellrelay_core::router::RouterService;

use crate::proxy::AxumProxyClient;
use crate::service::axum_router;

pub const DEFAULT_ADDR: SocketAddr = SocketAddr::new(
    std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST),
    8787,
);

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    /// Stop accepting connections on Ctrl-C and let in-flight requests finish.
    pub stop_on_ctrl_c: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR,
            stop_on_ctrl_c: true,
        }
    }
}

impl ServerConfig {
    pub fn from_manifest(manifest: &Manifest) -> anyhow::Result<Self> {
        let addr = match manifest.server.addr.as_deref() {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("`[server] addr` is not a socket address: `{raw}`"))?,
            None => DEFAULT_ADDR,
        };
        Ok(Self {
            addr,
            ..Self::default()
        })
    }
}

/// Native host for a ShellRelay router on a multi-threaded Tokio runtime.
pub struct AxumDevServer {
    router: RouterService,
    outbound: Option<ProxyHandle>,
    config: ServerConfig,
}

impl AxumDevServer {
    pub fn new(router: RouterService, config: ServerConfig) -> Self {
        Self {
            router,
            outbound: None,
            config,
        }
    }

    #[must_use]
    pub fn with_outbound(mut self, outbound: ProxyHandle) -> Self {
        self.outbound = Some(outbound);
        self
    }

    /// Build a runtime, bind `config.addr` and serve until shutdown.
    pub fn run(self) -> anyhow::Result<()> {
        tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .context("tokio runtime")?
            .block_on(async move {
                let listener = TcpListener::bind(self.config.addr)
                    .await
                    .with_context(|| format!("cannot bind {}", self.config.addr))?;
                self.serve(listener).await
            })
    }

    /// Serve on an already bound listener.
    pub async fn serve(self, listener: TcpListener) -> anyhow::Result<()> {
        if let Ok(addr) = listener.local_addr() {
            log::info!("relay listening on http://{addr}");
        }
        let stop_on_ctrl_c = self.config.stop_on_ctrl_c;
        axum::serve(listener, axum_router(self.router, self.outbound))
            .with_graceful_shutdown(async move {
                if stop_on_ctrl_c && tokio::signal::ctrl_c().await.is_ok() {
                    log::info!("ctrl-c received, draining connections");
                } else {
                    pending::<()>().await;
                }
            })
            .await
            .context("axum server")
    }
}

/// Install `simple_logger` at the manifest's level. Later calls are no-ops.
pub fn init_logger(logging: &LoggingSection) {
    let level = if logging.echo_stdout {
        LevelFilter::from(logging.level)
    } else {
        LevelFilter::Off
    };
    let _ = SimpleLogger::new().with_level(level).init();
}

/// Parse `manifest`, set up logging, then serve `A` with a `reqwest` outbound client until
/// Ctrl-C.
pub fn run_app<A: Hooks>(manifest: &str) -> anyhow::Result<()> {
    let manifest = Manifest::parse(manifest).context("shellrelay.toml")?;
    init_logger(&manifest.logging);

    let config = ServerConfig::from_manifest(&manifest)?;
    let outbound = AxumProxyClient::new().context("outbound HTTP client")?;
    let app = A::build_app();
    log::info!("starting {} on {}", app.name(), config.addr);

    AxumDevServer::new(app.into_router(), config)
        .with_outbound(ProxyHandle::with_client(outbound))
        .run()
}
