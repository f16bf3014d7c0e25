// ABOUTME: Server setup and lifecycle: builds the control plane, relay, and dispatcher
// ABOUTME: then serves HTTP/websocket until a shutdown signal, stopping workers on the way out.

use crate::auth::{SessionValidator, StaticSessions};
use crate::routes;
use anyhow::{Context, Result};
use axum::Router;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use trishul_core::{
    work_queue, BroadcastRegistry, CommandLauncher, Config, ControlPlane, EventRelay,
    JsonStatsFile, MibDirectory, UdpChannel,
};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub control: Arc<ControlPlane>,
    pub registry: Arc<BroadcastRegistry>,
    pub sessions: Arc<dyn SessionValidator>,
}

/// A fully wired server whose background tasks are already running.
pub struct Server {
    state: AppState,
    relay_addr: SocketAddr,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Server {
    /// Wire everything from `config`, accepting the configured auth tokens.
    pub async fn build(config: &Config) -> Result<Self> {
        let sessions = StaticSessions::new(config.auth.tokens.clone());
        if sessions.is_empty() {
            warn!("No auth tokens configured, every API and push request will be rejected");
        }
        Self::build_with(config, Arc::new(sessions)).await
    }

    pub async fn build_with(config: &Config, sessions: Arc<dyn SessionValidator>) -> Result<Self> {
        let channel = UdpChannel::loopback(config.relay.port)
            .await
            .with_context(|| format!("binding event relay on port {}", config.relay.port))?;
        let relay_addr = channel.local_addr().context("reading event relay address")?;

        // Workers must be told the port actually bound (matters when it is 0).
        let mut config = config.clone();
        config.relay.port = relay_addr.port();

        let registry = Arc::new(BroadcastRegistry::new());
        let (queue, dispatcher) = work_queue(config.relay.queue_capacity, registry.clone());

        let control = Arc::new(ControlPlane::new(
            &config,
            Arc::new(CommandLauncher::from_config(&config)),
            Arc::new(JsonStatsFile::new(config.stats_file())),
            Arc::new(MibDirectory::open(config.mib_dir())),
            queue.clone(),
        ));

        let cancel = CancellationToken::new();
        let tasks = vec![
            tokio::spawn(dispatcher.run(cancel.clone())),
            tokio::spawn(EventRelay::new(channel, queue).run(cancel.clone())),
        ];
        info!(relay = %relay_addr, "Event relay bound");

        Ok(Self {
            state: AppState {
                control,
                registry,
                sessions,
            },
            relay_addr,
            cancel,
            tasks,
        })
    }

    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    pub fn relay_addr(&self) -> SocketAddr {
        self.relay_addr
    }

    pub fn router(&self) -> Router {
        routes::router(self.state.clone())
    }

    /// Auto-start workers, serve until `shutdown` resolves, then stop the
    /// workers and the background tasks.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.state.control.auto_start().await;

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await
            .context("running HTTP server")?;

        info!("Stopping workers");
        self.state.control.shutdown().await;
        self.cancel.cancel();
        for task in self.tasks {
            let _ = task.await;
        }
        Ok(())
    }
}

/// Run the server until Ctrl+C or SIGTERM.
pub async fn run(config: Config) -> Result<()> {
    info!("Starting trishul server");
    info!("  bind: {}", config.server.bind);
    info!("  data: {}", config.data_dir().display());

    let server = Server::build(&config).await?;
    let listener = TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("binding {}", config.server.bind))?;
    info!("Listening on {}", listener.local_addr().context("reading listen address")?);

    server.serve(listener, shutdown_signal()).await?;

    info!("Server shut down gracefully");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}
