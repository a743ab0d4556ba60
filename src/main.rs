//! OpenAgents - agent-interconnect network server.
//!
//! Loads a [`NetworkConfig`], wires the bundled mods into a [`ModPipeline`],
//! and binds each configured transport as its own axum router.

use anyhow::{Context, Result};
use clap::Parser;
use openagents::config::{NetworkConfig, TransportKind};
use openagents::mod_pipeline::ModPipeline;
use openagents::mods::{SharedDocumentMod, ThreadMessagingMod};
use openagents::network::Network;
use openagents::time_provider::production_time_provider;
use openagents::transports::jsonrpc::HttpRemoteDispatcher;
use openagents::transports::{http_poll, jsonrpc, streaming};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

/// Which built-in preset to run when no `--config` file is given.
#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum Preset {
    /// Small, localhost-only, single HTTP long-poll transport.
    Development,
    /// Externally reachable, all three transports, larger capacities.
    Production,
}

#[derive(Parser)]
#[command(version = env!("CARGO_PKG_VERSION"), about = "OpenAgents network server")]
struct Args {
    /// Load a validated JSON config from this path instead of a built-in preset.
    #[arg(long)]
    config: Option<std::path::PathBuf>,

    /// Built-in preset to run when `--config` is not given.
    #[arg(long, value_enum, default_value_t = Preset::Development)]
    preset: Preset,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("openagents=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => {
            NetworkConfig::load_from_file(path).with_context(|| format!("loading {path:?}"))?
        }
        None => match args.preset {
            Preset::Development => NetworkConfig::development(),
            Preset::Production => NetworkConfig::production(),
        },
    };
    info!(network = %config.name, transports = config.transports.len(), mods = config.mods.len(), "configuration loaded");

    let mut pipeline = ModPipeline::new();
    let time = production_time_provider();
    for mod_config in &config.mods {
        let workspace = config.workspace.clone();
        match mod_config.id.as_str() {
            "thread_messaging" => {
                pipeline.register(Arc::new(ThreadMessagingMod::new(
                    workspace,
                    Arc::clone(&time),
                )));
            }
            "shared_document" => {
                pipeline.register(Arc::new(SharedDocumentMod::new(
                    workspace,
                    Arc::clone(&time),
                )));
            }
            other => {
                warn!(mod_id = other, "unknown mod id in configuration, skipping");
            }
        }
    }

    let mut network = Network::new(config.clone(), pipeline, time)?;
    network.set_remote_dispatcher(Arc::new(HttpRemoteDispatcher::new()));
    network.start().await?;
    let network = Arc::new(network);

    let mut servers = Vec::new();
    for transport in &config.transports {
        let listener = TcpListener::bind(&transport.bind_addr)
            .await
            .with_context(|| format!("binding {}", transport.bind_addr))?;
        let app = match transport.kind {
            TransportKind::Streaming => streaming::router(Arc::clone(&network)),
            TransportKind::HttpPoll => {
                http_poll::router(Arc::clone(&network), transport.bearer_token.clone())
            }
            TransportKind::JsonRpc => jsonrpc::router(Arc::clone(&network)),
        };
        info!(kind = ?transport.kind, addr = %transport.bind_addr, "transport listening");
        let shutdown = network.shutdown_token();
        servers.push(tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await;
            if let Err(error) = result {
                error!(%error, "transport server exited with error");
            }
        }));
    }

    tokio::signal::ctrl_c().await.ok();
    info!("shutdown signal received");
    network.stop().await;
    for server in servers {
        let _ = server.await;
    }

    Ok(())
}
