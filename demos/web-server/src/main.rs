//! Demo control-plane server.
//!
//! Run with: cargo run -p web-server-demo
//!
//! Then open http://localhost:3000 in your browser. Each page load captures
//! the session update history into a buffered pipe and links its signed
//! output URL.

use std::{collections::BTreeMap, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context as _;
use async_trait::async_trait;
use axum::{
    Router,
    extract::State,
    response::{Html, IntoResponse},
    routing::get,
};
use shellmux_core::{PipeConfig, PipeRegistry, RemoteId, RemotePtr, UiContext};
use shellmux_session::{
    IdArgs, ManagerConfig, MemoryStorage, RemoteConn, RemoteError, RemoteSessionManager,
    RemoteTable, Requirements, SessionStorage,
};
use shellmux_state::{ShellState, ShellType};
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

/// How long a page's pipe accepts writes.
const PIPE_TIMEOUT: Duration = Duration::from_secs(20);

/// Variables captured from the server's own environment.
const CAPTURED_VARS: &[&str] = &["HOME", "PATH", "SHELL", "USER", "VIRTUAL_ENV"];

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    registry: Arc<PipeRegistry>,
    manager: Arc<RemoteSessionManager<MemoryStorage>>,
}

/// In-process stand-in for the local machine.
struct LocalRemote {
    id: RemoteId,
    canonical: String,
}

impl LocalRemote {
    fn new() -> Self {
        let user = std::env::var("USER").unwrap_or_else(|_| "user".into());
        Self {
            id: Uuid::new_v4(),
            canonical: format!("{user}@local"),
        }
    }

    fn capture_state(shell_type: ShellType) -> ShellState {
        let vars: BTreeMap<String, String> = std::env::vars()
            .filter(|(k, _)| CAPTURED_VARS.contains(&k.as_str()) || k.starts_with("PROMPTVAR_"))
            .collect();
        let cwd = std::env::current_dir()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|_| "~".into());
        ShellState {
            version: format!("{shell_type} v5.1.16"),
            cwd,
            vars,
            aliases: "alias ll='ls -l'".into(),
            funcs: String::new(),
            error: String::new(),
        }
    }
}

#[async_trait]
impl RemoteConn for LocalRemote {
    fn remote_id(&self) -> RemoteId {
        self.id
    }

    fn alias(&self) -> &str {
        "local"
    }

    fn canonical_name(&self) -> &str {
        &self.canonical
    }

    fn is_connected(&self) -> bool {
        true
    }

    async fn try_auto_connect(&self) -> Result<(), RemoteError> {
        Ok(())
    }

    fn shell_pref(&self) -> ShellType {
        ShellType::Bash
    }

    fn default_state(&self, shell_type: ShellType) -> Option<ShellState> {
        Some(Self::capture_state(shell_type))
    }

    async fn reinit(&self, shell_type: ShellType) -> Result<ShellState, RemoteError> {
        Ok(Self::capture_state(shell_type))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let addr: SocketAddr = std::env::var("SHELLMUX_ADDR")
        .unwrap_or_else(|_| "127.0.0.1:3000".into())
        .parse()
        .context("invalid SHELLMUX_ADDR")?;
    let auth_key = std::env::var("SHELLMUX_AUTH_KEY").map_or_else(
        |_| rand::random::<[u8; 32]>().to_vec(),
        String::into_bytes,
    );

    let registry = PipeRegistry::new(PipeConfig::default(), &auth_key);
    let manager = Arc::new(seed_manager().await?);

    let state = AppState {
        registry: Arc::clone(&registry),
        manager,
    };

    // Build router
    let app = Router::new()
        .route("/", get(index_handler))
        .with_state(state)
        .merge(shellmux_transport::pipe_router(Arc::clone(&registry)))
        .layer(CorsLayer::permissive());

    // Start server
    tracing::info!("Server listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    registry.shutdown();
    Ok(())
}

/// Build a manager with one session, one screen and a local remote that has
/// already run a couple of commands.
async fn seed_manager() -> anyhow::Result<RemoteSessionManager<MemoryStorage>> {
    let storage = Arc::new(MemoryStorage::new());
    let remotes = Arc::new(RemoteTable::new());
    let local = Arc::new(LocalRemote::new());
    let remote = RemotePtr::new(local.remote_id());
    remotes.insert(local);

    let manager = RemoteSessionManager::new(Arc::clone(&storage), remotes, ManagerConfig::default());
    let session = storage.create_session("default").await?;
    let screen = storage.create_screen(session.session_id, "main").await?;

    let ui = UiContext::new(session.session_id, screen.screen_id).with_remote(remote.clone());
    let ids = manager
        .resolve_ids(&ui, &IdArgs::default(), Requirements::CONNECTED)
        .await?;
    let resolved = ids.remote.context("local remote did not resolve")?;
    tracing::info!(remote = %resolved.display_name, "resolved local remote");

    let shell_type = resolved
        .shell_type
        .unwrap_or_else(|| resolved.conn.shell_pref());
    let mut state = resolved
        .conn
        .default_state(shell_type)
        .context("local remote has no default state")?;
    state.vars.insert("PROMPTVAR_GITBRANCH".into(), "main".into());
    manager
        .record_command_state(session.session_id, screen.screen_id, &remote, &state)
        .await?;
    let ri = manager
        .reset_cwd(session.session_id, screen.screen_id, &remote, "/tmp")
        .await?;
    tracing::info!(state_ptr = ?ri.state_ptr, "seeded screen state");

    Ok(manager)
}

async fn index_handler(State(state): State<AppState>) -> impl IntoResponse {
    let pipe = state.registry.create(PIPE_TIMEOUT);
    let history = state.manager.updates().history();
    let producer = Arc::clone(&pipe);
    tokio::spawn(async move {
        for update in history {
            match serde_json::to_string(&update) {
                Ok(json) => {
                    if let Err(e) = producer.write(format!("{json}\n").as_bytes()) {
                        tracing::warn!("Failed to write update: {e}");
                        break;
                    }
                }
                Err(e) => tracing::error!("Failed to serialize update: {e}"),
            }
        }
        producer.close();
    });

    let url = pipe.output_url();
    Html(format!(
        "<!DOCTYPE html><html><head><title>shellmux</title></head><body>\
         <p>Session updates: <a href=\"{url}\">{url}</a></p>\
         <p>The link expires in {}s.</p></body></html>",
        PipeConfig::default().registry_ttl.as_secs()
    ))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
    }
    tracing::info!("Shutting down");
}
