// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! lsp-bridge lets an AI coding assistant query live compilation
//! diagnostics, hover information, and symbol definitions from language
//! servers in real time.
//!
//! Upstream it speaks MCP (Model Context Protocol) over stdio; downstream
//! it drives one or more LSP child processes, reacting to external
//! file-edit notifications by replaying document-synchronization
//! handshakes that make the servers recompile.

/// Capability facade and MCP tool handler.
pub mod bridge;
/// Layered configuration for servers, timeouts, and paths.
pub mod config;
/// The bridge error kinds.
pub mod error;
/// LSP client engine: codec, peer, stores, sessions, registry.
pub mod lsp;
/// MCP server implementation and type definitions.
pub mod mcp;
/// Edit-notify file watcher.
pub mod notify;

pub use error::{BridgeError, Result};
