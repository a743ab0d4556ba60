//! OpenAgents CLI
//!
//! Companion command-line tool: scaffold and validate network configs, and
//! drive a running network's HTTP long-poll transport for quick smoke checks.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use openagents::config::NetworkConfig;
use std::path::PathBuf;

/// OpenAgents CLI - config and smoke-test tooling for an OpenAgents network.
#[derive(Parser)]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a built-in preset config to a file.
    Init {
        /// Preset to write: `development`, `production`, or `testing`.
        #[arg(long, default_value = "development")]
        preset: String,
        /// Destination path for the generated config.
        #[arg(long, default_value = "openagents.json")]
        out: PathBuf,
    },
    /// Load and validate a config file, printing a summary.
    Validate {
        /// Path to the config file.
        path: PathBuf,
    },
    /// Register an agent against a running HTTP long-poll transport.
    Register {
        /// Base URL of the HTTP long-poll transport, e.g. `http://127.0.0.1:8765`.
        #[arg(long)]
        url: String,
        /// Agent id to register.
        #[arg(long)]
        agent_id: String,
    },
}

fn preset_by_name(name: &str) -> Result<NetworkConfig> {
    match name {
        "development" => Ok(NetworkConfig::development()),
        "production" => Ok(NetworkConfig::production()),
        "testing" => Ok(NetworkConfig::testing()),
        other => anyhow::bail!("unknown preset {other:?}, expected development/production/testing"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    match args.command {
        Command::Init { preset, out } => {
            let config = preset_by_name(&preset)?;
            config
                .save_to_file(&out)
                .with_context(|| format!("writing {out:?}"))?;
            println!("wrote {preset} preset to {}", out.display());
        }
        Command::Validate { path } => {
            let config = NetworkConfig::load_from_file(&path)
                .with_context(|| format!("loading {path:?}"))?;
            println!(
                "{} is valid: {} transport(s), {} mod(s), workspace {}",
                path.display(),
                config.transports.len(),
                config.mods.len(),
                config.workspace.display(),
            );
        }
        Command::Register { url, agent_id } => {
            let client = reqwest::Client::new();
            let response = client
                .post(format!("{url}/api/register"))
                .json(&serde_json::json!({ "agent_id": agent_id }))
                .send()
                .await
                .context("sending registration request")?;
            let body: serde_json::Value = response.json().await.context("decoding response")?;
            println!("{body}");
        }
    }
    Ok(())
}
