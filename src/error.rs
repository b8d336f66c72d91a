// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Bridge error kinds.
//!
//! Every failure that crosses the capability API is one of these
//! variants. Per-call errors ([`BridgeError::Rpc`], [`BridgeError::Timeout`],
//! [`BridgeError::NotFound`]) leave the session alive; transport-level
//! errors ([`BridgeError::Protocol`], [`BridgeError::TransportClosed`])
//! move the owning session to `Dead`.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::lsp::session::SessionState;

/// Result type for all bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Errors surfaced by the bridge core.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Invalid server configuration. Fatal to that session, not to the process.
    #[error("invalid configuration for workspace '{workspace}': {reason}")]
    Config { workspace: String, reason: String },

    /// The LSP child process failed to launch.
    #[error("failed to spawn LSP server '{command}': {reason}")]
    Spawn { command: String, reason: String },

    /// Framing or JSON violation on the wire.
    #[error("LSP protocol violation: {0}")]
    Protocol(String),

    /// JSON-RPC error response from the server. The session stays alive.
    #[error("LSP error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// Deadline exceeded; the pending slot was removed.
    #[error("LSP request '{method}' timed out after {timeout:?}")]
    Timeout { method: String, timeout: Duration },

    /// The child exited unexpectedly; subsequent calls fail fast.
    #[error("LSP server connection closed")]
    TransportClosed,

    /// Registry lookup miss.
    #[error("unknown workspace: {0}")]
    UnknownWorkspace(String),

    /// The session exists but is not `Ready`.
    #[error("workspace '{workspace}' is not available (state: {state})")]
    Unavailable {
        workspace: String,
        state: SessionState,
    },

    /// Local file read failed during ensure-open or apply-edit.
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Hover or definition returned nothing.
    #[error("{0}")]
    NotFound(String),
}

impl BridgeError {
    /// Shorthand for an [`BridgeError::Io`] wrapping a file read failure.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
