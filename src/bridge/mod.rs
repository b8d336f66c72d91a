// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

/// Language-neutral capability facade over the workspace registry.
pub mod facade;
/// MCP tool handler backed by the facade.
pub mod handler;

pub use facade::LspBridge;
pub use handler::LspBridgeHandler;
