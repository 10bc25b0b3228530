//! HTTP server for the relay.
//!
//! Routes `/api/*` to the handlers and serves the front-end bundle for
//! everything else.

use crate::config::Config;
use crate::daemon::error::panic_response;
use crate::daemon::handlers;
use crate::daemon::llm::OllamaClient;
use crate::store::SessionStore;
use anyhow::{Context, Result};
use axum::routing::{get, post};
use axum::Router;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<SessionStore>,
    pub ollama: OllamaClient,
}

impl AppState {
    /// Open the session store and build the Ollama client.
    pub fn new(config: Config) -> Result<Self> {
        let ollama = OllamaClient::new(&config.ollama)?;
        let store = SessionStore::open(&config.memory);
        Ok(Self {
            config: Arc::new(config),
            store: Arc::new(store),
            ollama,
        })
    }
}

/// Build the router (shared between production startup and tests).
pub fn build_app(state: AppState) -> Router {
    let assets = ServeDir::new(&state.config.server.static_dir);

    Router::new()
        .route("/api/generate", post(handlers::generate))
        .route("/api/history", get(handlers::history))
        .route("/api/sessions", get(handlers::sessions))
        .route("/api/tags", get(handlers::tags))
        .route("/api/config", get(handlers::frontend_config))
        .route("/api/clear-session", post(handlers::clear_session))
        .fallback_service(assets)
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// The relay server.
pub struct DaemonServer {
    state: AppState,
}

impl DaemonServer {
    pub fn new(config: Config) -> Result<Self> {
        Ok(Self {
            state: AppState::new(config)?,
        })
    }

    /// Bind the configured listen address. `host` may be a name or an IP
    /// literal.
    pub async fn bind(&self) -> Result<TcpListener> {
        let server = &self.state.config.server;
        let listener = TcpListener::bind((server.host.as_str(), server.port))
            .await
            .with_context(|| format!("Failed to bind to {}:{}", server.host, server.port))?;
        Ok(listener)
    }

    /// Serve until SIGINT/SIGTERM, then write a final snapshot.
    pub async fn run(&self) -> Result<()> {
        if self.state.ollama.check_available().await {
            info!("Ollama reachable at {}", self.state.ollama.base_url());
        } else {
            // Requests will get 503 until it comes up.
            error!("Ollama is not reachable at {}", self.state.ollama.base_url());
        }

        let listener = self.bind().await?;
        self.serve(listener, shutdown_signal()).await
    }

    /// Serve on `listener` until `shutdown` resolves, then write a final
    /// snapshot.
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        info!("Starting server on {}", listener.local_addr()?);

        axum::serve(listener, build_app(self.state.clone()))
            .with_graceful_shutdown(shutdown)
            .await
            .context("Server error")?;

        info!("Server shutting down, saving chat memory...");
        self.state.store.persist().await;
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Received shutdown signal");
}
