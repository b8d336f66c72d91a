// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! lsp-bridge MCP server entrypoint.
//!
//! Stdout belongs to the MCP protocol, so logging goes to an append-only
//! file at the configured path.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use lsp_bridge::bridge::{LspBridge, LspBridgeHandler};
use lsp_bridge::config::{Config, ServerConfig};
use lsp_bridge::lsp::WorkspaceRegistry;
use lsp_bridge::mcp::McpServer;
use lsp_bridge::notify::EditWatcher;

/// Command-line arguments for lsp-bridge.
#[derive(Parser, Debug)]
#[command(name = "lsp-bridge")]
#[command(about = "Bridge exposing live LSP diagnostics to AI assistants over MCP")]
struct Args {
    /// Path to configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// LSP servers to register in "name:workspace_root:command" format
    /// (e.g., "metals:/home/me/proj:metals"). Can be given multiple
    /// times; overrides/appends to the config file.
    #[arg(short, long = "server")]
    servers: Vec<String>,

    /// Override the log file path.
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Override the edit-notify file path.
    #[arg(long)]
    notify_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::load(args.config.clone())?;
    if let Some(log_file) = args.log_file {
        config.log_file = log_file;
    }
    if let Some(notify_file) = args.notify_file {
        config.notify_file = notify_file;
    }

    for spec in &args.servers {
        let (name, server) = parse_server_spec(spec)?;
        config.server.insert(name, server);
    }

    config.validate()?;
    init_logging(&config.log_file)?;

    info!("starting lsp-bridge v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "configured workspaces: {}",
        config
            .server
            .keys()
            .cloned()
            .collect::<Vec<_>>()
            .join(", ")
    );

    let registry = Arc::new(WorkspaceRegistry::new(
        config.server.clone(),
        config.timeouts,
    ));
    let bridge = Arc::new(LspBridge::new(registry.clone(), config.timeouts));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let watcher = EditWatcher::new(registry.clone(), config.notify_file.clone());
    let watcher_handle = watcher.spawn(shutdown_rx);

    // The MCP loop blocks on stdin; keep the runtime free for the LSP side.
    let handler = LspBridgeHandler::new(bridge, tokio::runtime::Handle::current());
    let served = tokio::task::spawn_blocking(move || McpServer::new(handler).run()).await?;
    if let Err(e) = served {
        warn!("MCP server exited with error: {}", e);
    }

    info!("shutting down");
    let _ = shutdown_tx.send(true);
    registry.shutdown_all().await;
    let _ = watcher_handle.await;

    Ok(())
}

/// Parses "name:workspace_root:command args..." into a server entry.
fn parse_server_spec(spec: &str) -> Result<(String, ServerConfig)> {
    let mut parts = spec.splitn(3, ':');
    let (Some(name), Some(root), Some(command_str)) = (parts.next(), parts.next(), parts.next())
    else {
        anyhow::bail!("Invalid server spec: {spec}. Expected 'name:workspace_root:command'");
    };

    let command: Vec<String> = command_str
        .split_whitespace()
        .map(ToString::to_string)
        .collect();
    if command.is_empty() {
        anyhow::bail!("Invalid server spec: {spec}. Command cannot be empty");
    }

    Ok((
        name.trim().to_string(),
        ServerConfig {
            workspace_root: PathBuf::from(root.trim()),
            command,
            root_uri: None,
            build_support: None,
        },
    ))
}

/// Routes tracing output to the append-only log file.
fn init_logging(log_file: &PathBuf) -> Result<()> {
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("lsp_bridge=info".parse()?),
        )
        .with_writer(std::sync::Mutex::new(file))
        .with_ansi(false)
        .init();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_spec_parses_name_root_and_command() -> Result<()> {
        let (name, server) = parse_server_spec("metals:/home/me/proj:metals -Dmetals.verbose")?;
        assert_eq!(name, "metals");
        assert_eq!(server.workspace_root, PathBuf::from("/home/me/proj"));
        assert_eq!(server.command, vec!["metals", "-Dmetals.verbose"]);
        Ok(())
    }

    #[test]
    fn server_spec_rejects_missing_parts() {
        assert!(parse_server_spec("metals:/home/me/proj").is_err());
        assert!(parse_server_spec("metals").is_err());
        assert!(parse_server_spec("metals:/home/me/proj:  ").is_err());
    }
}
