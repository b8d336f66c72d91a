// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Language-neutral capability facade.
//!
//! The one API upstream adapters call. Every operation resolves the
//! named session through the registry, waits up to the ready timeout for
//! the initialize handshake, and dispatches. All failures surface as
//! [`BridgeError`] variants; nothing else crosses this boundary.

use std::path::Path;
use std::sync::Arc;

use crate::config::Timeouts;
use crate::error::{BridgeError, Result};
use crate::lsp::diagnostics::DiagnosticsReport;
use crate::lsp::session::{DefinitionLocation, LspSession, SessionState, SessionStatus};
use crate::lsp::WorkspaceRegistry;

/// Facade over the workspace registry. One per process.
pub struct LspBridge {
    registry: Arc<WorkspaceRegistry>,
    timeouts: Timeouts,
}

impl LspBridge {
    /// Creates the facade.
    #[must_use]
    pub fn new(registry: Arc<WorkspaceRegistry>, timeouts: Timeouts) -> Self {
        Self { registry, timeouts }
    }

    /// Sorted names of all known workspaces.
    #[must_use]
    pub fn list_workspaces(&self) -> Vec<String> {
        self.registry.list()
    }

    /// Status for one workspace, or for all of them.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::UnknownWorkspace`] when `workspace` names
    /// nothing. Status is readable in any state, including `Dead`.
    pub async fn get_status(&self, workspace: Option<&str>) -> Result<Vec<SessionStatus>> {
        match workspace {
            Some(name) => {
                let session = self.registry.get(name).await?;
                Ok(vec![session.status().await])
            }
            None => {
                let mut statuses = Vec::new();
                for session in self.registry.all() {
                    statuses.push(session.status().await);
                }
                Ok(statuses)
            }
        }
    }

    /// Diagnostics snapshot for a workspace, optionally restricted to one
    /// file.
    ///
    /// # Errors
    ///
    /// [`BridgeError::UnknownWorkspace`], [`BridgeError::Unavailable`].
    pub async fn get_diagnostics(
        &self,
        workspace: &str,
        path: Option<&Path>,
    ) -> Result<DiagnosticsReport> {
        let session = self.ready_session(workspace).await?;
        Ok(session.diagnostics_report(path).await)
    }

    /// Forces a recompile and returns the diagnostics snapshot after the
    /// grace period. With a `workspace_root`, an unknown workspace is
    /// lazily connected first.
    ///
    /// # Errors
    ///
    /// [`BridgeError::UnknownWorkspace`], [`BridgeError::Unavailable`].
    pub async fn trigger_compilation(
        &self,
        workspace: &str,
        workspace_root: Option<&Path>,
    ) -> Result<DiagnosticsReport> {
        let session = self.registry.get_or_connect(workspace, workspace_root).await?;
        self.ensure_ready(&session).await?;
        session.trigger_compilation().await
    }

    /// Hover content at a position (1-indexed line, 0-indexed character).
    ///
    /// # Errors
    ///
    /// [`BridgeError::NotFound`] when the server has nothing to show,
    /// plus the usual *ioError*/*timeout* failure modes.
    pub async fn get_hover(
        &self,
        workspace: &str,
        path: &Path,
        line: u32,
        character: u32,
    ) -> Result<String> {
        let session = self.ready_session(workspace).await?;
        session.hover(path, line, character).await
    }

    /// Definition locations for the symbol at a position.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`get_hover`](Self::get_hover).
    pub async fn get_definition(
        &self,
        workspace: &str,
        path: &Path,
        line: u32,
        character: u32,
    ) -> Result<Vec<DefinitionLocation>> {
        let session = self.ready_session(workspace).await?;
        session.definition(path, line, character).await
    }

    async fn ready_session(&self, workspace: &str) -> Result<Arc<LspSession>> {
        let session = self.registry.get(workspace).await?;
        self.ensure_ready(&session).await?;
        Ok(session)
    }

    async fn ensure_ready(&self, session: &Arc<LspSession>) -> Result<()> {
        match session.wait_until_ready(self.timeouts.ready_wait()).await {
            SessionState::Ready => Ok(()),
            state => Err(BridgeError::Unavailable {
                workspace: session.name().to_string(),
                state,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use std::collections::HashMap;
    use std::path::PathBuf;

    fn bridge_with(names: &[&str]) -> LspBridge {
        let servers: HashMap<String, ServerConfig> = names
            .iter()
            .map(|name| {
                (
                    (*name).to_string(),
                    ServerConfig {
                        workspace_root: PathBuf::from(format!("/tmp/{name}")),
                        command: vec!["true".to_string()],
                        root_uri: None,
                        build_support: None,
                    },
                )
            })
            .collect();
        LspBridge::new(
            Arc::new(WorkspaceRegistry::new(servers, Timeouts::default())),
            Timeouts::default(),
        )
    }

    #[test]
    fn list_workspaces_is_sorted() {
        let bridge = bridge_with(&["rust", "metals"]);
        assert_eq!(bridge.list_workspaces(), vec!["metals", "rust"]);
    }

    #[tokio::test]
    async fn status_for_unknown_workspace_errors() {
        let bridge = bridge_with(&["metals"]);
        assert!(matches!(
            bridge.get_status(Some("ghost")).await,
            Err(BridgeError::UnknownWorkspace(_))
        ));
    }

    #[tokio::test]
    async fn status_without_name_covers_all_workspaces() -> anyhow::Result<()> {
        let bridge = bridge_with(&["a", "b"]);
        // No session has started: statuses are readable regardless.
        let statuses = bridge.get_status(None).await?;
        let names: Vec<&str> = statuses.iter().map(|s| s.workspace.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        Ok(())
    }
}
