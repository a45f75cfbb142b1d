//! Factory API server: orchestrator and deployment operations over HTTP.
//!
//! The watchdog runs for the lifetime of the server and is shut down on
//! ctrl-c before the listener closes.

mod routes;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;

use axum::Router;
use clap::Parser;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use factory::app::Factory;

use crate::state::AppState;

#[derive(Parser)]
#[command(name = "factory-api")]
#[command(about = "HTTP API for the factory orchestrator and deployment manager")]
struct Args {
    /// Address to bind the server to
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,

    /// Port to listen on
    #[arg(long, default_value = "3001")]
    port: u16,

    /// Project directory (contains .factory/)
    #[arg(long, default_value = ".")]
    project_dir: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("factory_api=info".parse()?)
                .add_directive("factory=info".parse()?),
        )
        .init();

    let args = Args::parse();

    let project_dir = args.project_dir.canonicalize().unwrap_or(args.project_dir);
    info!(project_dir = %project_dir.display(), "starting factory-api");

    let factory = Factory::open(&project_dir)?;
    let watchdog = factory.watchdog().start();
    let state = AppState::new(factory);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .nest("/api", routes::api_router())
        .layer(cors)
        .with_state(state);

    let addr: SocketAddr = format!("{}:{}", args.bind, args.port).parse()?;
    info!(addr = %addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(err = %e, "failed to listen for ctrl-c");
            }
        })
        .await?;

    info!("shutting down watchdog");
    watchdog.shutdown().await;
    Ok(())
}
