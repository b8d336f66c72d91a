// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

/// Build-tool provisioning hooks run before server start.
pub mod build_support;
/// Per-session diagnostics store and persisted snapshot.
pub mod diagnostics;
/// Per-session document store.
pub mod documents;
/// JSON-RPC peer bound to a child process.
pub mod peer;
/// LSP wire protocol: message types and Content-Length framing.
pub mod protocol;
/// Workspace registry.
pub mod registry;
/// LSP session lifecycle and operations.
pub mod session;

pub use registry::WorkspaceRegistry;
pub use session::{DefinitionLocation, LspSession, SessionState, SessionStatus};
