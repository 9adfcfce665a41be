//! Edge proxy binary.
//!
//! Wires the library pieces together:
//! - load the TOML configuration and build the first generation
//! - bind one listener per entry point, serving from a swappable handler table
//! - watch the configuration file and swap in rebuilt generations
//! - shut everything down on Ctrl-C

use std::path::PathBuf;
use std::sync::Arc;

use arc_swap::ArcSwap;
use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use edge_proxy::config::watcher::ConfigWatcher;
use edge_proxy::http::server::{new_handler_table, EntryPointServer, HandlerTable};
use edge_proxy::{load_config, ProxyConfig, RouterManager, TransportManager, TransportRegistry};

/// The provider suffix for entities coming from the configuration file.
const FILE_PROVIDER: &str = "file";

#[derive(Parser, Debug)]
#[command(name = "edge-proxy", about = "Rule-routing reverse proxy", version)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "proxy.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "edge_proxy=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    tracing::info!(config = ?args.config, "edge-proxy starting");

    let config = load_config(&args.config)?;
    let entry_points: Vec<String> = config.entry_points.keys().cloned().collect();
    if entry_points.is_empty() {
        return Err("no entry points configured".into());
    }

    let transports = Arc::new(TransportManager::new(TransportRegistry::new()));
    let router_manager = Arc::new(RouterManager::new(transports));

    let handlers = new_handler_table();
    let generation =
        router_manager.build_generation(config.dynamic.clone(), FILE_PROVIDER, &entry_points);
    handlers.store(Arc::new(generation.handlers.clone()));
    let active = Arc::new(ArcSwap::from_pointee(generation));

    let shutdown = CancellationToken::new();

    let (watcher, updates) = ConfigWatcher::new(&args.config);
    // The watcher handle must stay alive for events to keep flowing.
    let _watcher_handle = watcher.run()?;
    spawn_reload_loop(
        router_manager.clone(),
        handlers.clone(),
        active.clone(),
        entry_points.clone(),
        updates,
        shutdown.clone(),
    );

    let mut servers = Vec::new();
    for (name, ep) in &config.entry_points {
        let listener = TcpListener::bind(&ep.address).await?;
        let server = EntryPointServer::new(name.clone(), handlers.clone());
        let token = shutdown.clone();
        servers.push(tokio::spawn(async move {
            server.run(listener, async move { token.cancelled().await }).await
        }));
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");
    shutdown.cancel();

    for server in servers {
        if let Err(e) = server.await? {
            tracing::error!(error = %e, "Entry point server failed");
        }
    }
    tracing::info!("edge-proxy stopped");
    Ok(())
}

fn spawn_reload_loop(
    router_manager: Arc<RouterManager>,
    handlers: HandlerTable,
    active: Arc<ArcSwap<edge_proxy::Generation>>,
    entry_points: Vec<String>,
    mut updates: tokio::sync::mpsc::UnboundedReceiver<ProxyConfig>,
    shutdown: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                update = updates.recv() => {
                    let Some(config) = update else { break };
                    tracing::info!("Applying new configuration generation");
                    let generation = router_manager.build_generation(
                        config.dynamic,
                        FILE_PROVIDER,
                        &entry_points,
                    );
                    handlers.store(Arc::new(generation.handlers.clone()));
                    // Dropping the previous generation stops its health checks.
                    active.store(Arc::new(generation));
                }
                _ = shutdown.cancelled() => break,
            }
        }
    });
}
