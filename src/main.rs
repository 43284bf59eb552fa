//! Agent Dispatch
//!
//! Starts the configured tool backends and exposes them over a REST API, or
//! runs one-off commands against them from the command line.

use agent_dispatch::api;
use agent_dispatch::config::Config;
use agent_dispatch::dispatcher::{CallOutcome, Dispatcher, TransportConnector};
use agent_dispatch::indexer::{format_context, ConversationIndexer, HttpEmbedder};
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
    routing::{get, post},
    Json, Router,
};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "agent-dispatch", version = env!("CARGO_PKG_VERSION"), about = "Multi-backend operation dispatcher")]
struct Cli {
    /// Dispatcher config file (overrides DISPATCH_CONFIG)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the backends and serve the REST API
    Serve {
        /// Host to bind (overrides HOST)
        #[arg(long)]
        host: Option<String>,
        /// Port to bind (overrides PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Start the backends and print every registered operation
    List,
    /// Start the backends and call one operation
    Call {
        /// Operation name
        name: String,
        /// Arguments as a JSON object
        #[arg(default_value = "{}")]
        args: String,
    },
    /// Rebuild the conversation index and print context for a query
    Index {
        /// Query text
        query: String,
        /// Sessions directory (overrides SESSIONS_DIR)
        #[arg(long)]
        sessions_dir: Option<PathBuf>,
    },
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    backends: usize,
    operations: usize,
}

/// Request ID middleware - adds unique ID to each request for tracing
async fn request_id_middleware(request: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4().to_string();
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let span = info_span!(
        "request",
        request_id = %request_id,
        method = %method,
        uri = %uri,
    );

    let response = next.run(request).instrument(span).await;

    info!(
        request_id = %request_id,
        method = %method,
        uri = %uri,
        status = %response.status().as_u16(),
        duration_ms = start.elapsed().as_millis(),
        "Request completed"
    );

    response
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    let mut config = Config::from_env();
    if let Some(path) = cli.config {
        config.dispatch.config_path = Some(path);
    }

    match cli.command {
        Command::Serve { host, port } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            serve(config).await
        }
        Command::List => {
            let dispatcher = start_dispatcher(&config).await?;
            for entry in dispatcher.list_operations() {
                println!("{:<32} {:<16} {}", entry.name, entry.backend_id, entry.description);
            }
            for excluded in dispatcher.excluded_backends() {
                eprintln!("excluded: {} ({})", excluded.id, excluded.reason);
            }
            dispatcher.shutdown().await;
            Ok(())
        }
        Command::Call { name, args } => {
            let args: serde_json::Value = serde_json::from_str(&args)
                .map_err(|e| anyhow::anyhow!("Arguments are not valid JSON: {}", e))?;
            let dispatcher = start_dispatcher(&config).await?;
            let outcome = dispatcher.call(&name, args).await;
            dispatcher.shutdown().await;

            println!("{}", serde_json::to_string_pretty(&outcome)?);
            match outcome {
                CallOutcome::Success { .. } => Ok(()),
                _ => Err(anyhow::anyhow!("Call to '{}' did not succeed", name)),
            }
        }
        Command::Index {
            query,
            sessions_dir,
        } => {
            let sessions_dir = sessions_dir.unwrap_or(config.indexer.sessions_dir.clone());
            let embedder = HttpEmbedder::new(
                reqwest::Client::new(),
                config.indexer.embedding_url.clone(),
                config.indexer.embedding_model.clone(),
            );
            let mut indexer = ConversationIndexer::new(
                Box::new(embedder),
                config.indexer.top_k,
                config.indexer.min_similarity,
            );
            let count = indexer.rebuild(&sessions_dir).await?;
            info!(sessions = count, "Index ready");

            let matches = indexer.query(&query).await?;
            if matches.is_empty() {
                println!("No similar sessions found.");
            } else {
                println!("{}", format_context(&matches));
            }
            Ok(())
        }
    }
}

async fn start_dispatcher(config: &Config) -> anyhow::Result<Dispatcher> {
    let dispatcher_config = config.load_dispatcher_config()?;
    info!(
        backends = dispatcher_config.backends.len(),
        "Dispatcher configuration loaded"
    );
    let dispatcher = Dispatcher::start(&dispatcher_config, &TransportConnector::new()).await?;
    Ok(dispatcher)
}

async fn serve(config: Config) -> anyhow::Result<()> {
    info!("Configuration loaded: {:?}", config);

    let dispatcher = Arc::new(start_dispatcher(&config).await?);

    let app = Router::new()
        .route("/api/health", get(health_check))
        .route("/api/operations", get(api::list_operations))
        .route("/api/operations/:name/call", post(api::call_operation))
        .route("/api/backends", get(api::list_backends))
        // Middleware (order matters - request_id should be first)
        .layer(axum::middleware::from_fn(request_id_middleware))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    uri = %request.uri(),
                )
            }),
        )
        .layer(CorsLayer::permissive())
        .with_state(dispatcher.clone());

    let addr: SocketAddr = config
        .server_addr()
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid server address: {}", e))?;

    info!("Server running on http://{}", addr);
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let listener = tokio::net::TcpListener::bind(&addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    dispatcher.shutdown().await;
    info!("Server shutdown complete");
    Ok(())
}

/// Handle graceful shutdown signals (Ctrl+C, SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down gracefully...");
        },
        _ = terminate => {
            info!("Received SIGTERM, shutting down gracefully...");
        },
    }
}

async fn health_check(State(dispatcher): State<api::DispatcherState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        backends: dispatcher.backend_ids().len(),
        operations: dispatcher.list_operations().len(),
    })
}
