// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Named collection of LSP sessions.
//!
//! Sessions are created from configuration up front but their child
//! processes start lazily on first use. The name→session map is guarded
//! by one mutex; the lock is never held while calling into a session, so
//! a slow server cannot stall lookups for the others.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use super::session::{LspSession, SessionState};
use crate::config::{ServerConfig, Timeouts};
use crate::error::{BridgeError, Result};

/// Default command used when a workspace is lazily connected without an
/// explicit configuration. Metals is what the bridge was built around.
const DEFAULT_COMMAND: &str = "metals";

/// Process-wide registry of workspace sessions.
pub struct WorkspaceRegistry {
    sessions: Mutex<HashMap<String, Arc<LspSession>>>,
    timeouts: Timeouts,
}

impl WorkspaceRegistry {
    /// Builds the registry from configured servers. No child is spawned
    /// here.
    #[must_use]
    pub fn new(servers: HashMap<String, ServerConfig>, timeouts: Timeouts) -> Self {
        let sessions = servers
            .into_iter()
            .map(|(name, config)| {
                let session = Arc::new(LspSession::new(name.clone(), config, timeouts));
                (name, session)
            })
            .collect();

        Self {
            sessions: Mutex::new(sessions),
            timeouts,
        }
    }

    /// Returns the session for a name, starting it on first use.
    ///
    /// A failed start is logged, not returned: the session stays in the
    /// registry in `Dead` state and capability calls report *unavailable*
    /// until reconfiguration.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::UnknownWorkspace`] on a lookup miss.
    pub async fn get(&self, name: &str) -> Result<Arc<LspSession>> {
        let session = self
            .lookup(name)
            .ok_or_else(|| BridgeError::UnknownWorkspace(name.to_string()))?;

        self.start_if_needed(&session).await;
        Ok(session)
    }

    /// Like [`get`](Self::get), but when the name is unknown and a
    /// workspace root is supplied, synthesizes a default configuration
    /// and registers a new session for it.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::UnknownWorkspace`] when the name is unknown
    /// and no root is given.
    pub async fn get_or_connect(&self, name: &str, workspace_root: Option<&Path>) -> Result<Arc<LspSession>> {
        if let Some(session) = self.lookup(name) {
            self.start_if_needed(&session).await;
            return Ok(session);
        }

        let Some(root) = workspace_root else {
            return Err(BridgeError::UnknownWorkspace(name.to_string()));
        };

        let config = ServerConfig {
            workspace_root: root.to_path_buf(),
            command: vec![DEFAULT_COMMAND.to_string()],
            root_uri: None,
            build_support: None,
        };
        config.validate(name)?;

        info!(
            "connecting new workspace '{}' at {} with default command",
            name,
            root.display()
        );

        let session = {
            let mut sessions = self.lock();
            sessions
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(LspSession::new(name.to_string(), config, self.timeouts)))
                .clone()
        };

        self.start_if_needed(&session).await;
        Ok(session)
    }

    /// Sorted workspace names.
    #[must_use]
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// All sessions, for status reporting.
    #[must_use]
    pub fn all(&self) -> Vec<Arc<LspSession>> {
        let mut sessions: Vec<Arc<LspSession>> = self.lock().values().cloned().collect();
        sessions.sort_by(|a, b| a.name().cmp(b.name()));
        sessions
    }

    /// Finds the workspace whose root is a prefix of `path` and returns
    /// its session, starting it on first use. Used by the edit watcher.
    pub async fn session_for_path(&self, path: &Path) -> Option<Arc<LspSession>> {
        let session = self
            .lock()
            .values()
            .find(|s| s.owns_path(path))
            .cloned()?;

        self.start_if_needed(&session).await;
        Some(session)
    }

    /// Gracefully shuts down every session, each bounded by the shutdown
    /// timeout, with a forced kill afterwards.
    pub async fn shutdown_all(&self) {
        let sessions: Vec<Arc<LspSession>> = self.lock().drain().map(|(_, s)| s).collect();

        for session in sessions {
            // Session shutdown bounds the child wait itself; the outer
            // timeout covers a peer that never answers the request.
            let grace = self.timeouts.shutdown() * 2;
            if tokio::time::timeout(grace, session.shutdown()).await.is_err() {
                warn!(
                    "workspace '{}' ignored graceful shutdown, killing",
                    session.name()
                );
                session.kill().await;
            }
        }
    }

    fn lookup(&self, name: &str) -> Option<Arc<LspSession>> {
        self.lock().get(name).cloned()
    }

    async fn start_if_needed(&self, session: &Arc<LspSession>) {
        if session.state() == SessionState::Unstarted
            && let Err(e) = session.start().await
        {
            warn!("workspace '{}' failed to start: {}", session.name(), e);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<LspSession>>> {
        self.sessions
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn registry_with(names: &[&str]) -> WorkspaceRegistry {
        let servers = names
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
        WorkspaceRegistry::new(servers, Timeouts::default())
    }

    #[test]
    fn list_is_sorted() {
        let registry = registry_with(&["rust", "metals", "ts"]);
        assert_eq!(registry.list(), vec!["metals", "rust", "ts"]);
    }

    #[tokio::test]
    async fn unknown_workspace_is_an_error() {
        let registry = registry_with(&["metals"]);
        assert!(matches!(
            registry.get("ghost").await,
            Err(BridgeError::UnknownWorkspace(_))
        ));
    }

    #[tokio::test]
    async fn get_or_connect_without_root_fails() {
        let registry = registry_with(&[]);
        assert!(matches!(
            registry.get_or_connect("ghost", None).await,
            Err(BridgeError::UnknownWorkspace(_))
        ));
    }

    #[tokio::test]
    async fn get_or_connect_synthesizes_session() -> anyhow::Result<()> {
        let registry = registry_with(&[]);

        // "metals" is not on PATH as the default command in CI, so the
        // session will land in Dead, but it must exist and be listed.
        let session = registry.get_or_connect("adhoc", Some(Path::new("/tmp/adhoc"))).await?;
        assert_eq!(session.name(), "adhoc");
        assert_eq!(registry.list(), vec!["adhoc"]);
        Ok(())
    }

    #[tokio::test]
    async fn session_for_path_matches_workspace_prefix() {
        let registry = registry_with(&["metals"]);

        let matched = registry
            .session_for_path(Path::new("/tmp/metals/src/App.scala"))
            .await;
        assert_eq!(matched.map(|s| s.name().to_string()), Some("metals".to_string()));

        let unmatched = registry
            .session_for_path(Path::new("/elsewhere/App.scala"))
            .await;
        assert!(unmatched.is_none());
    }
}
