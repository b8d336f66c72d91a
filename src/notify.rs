// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Edit-notify file watcher.
//!
//! External tooling (an editor hook, an AI assistant's post-edit hook)
//! appends the absolute path of an edited file to a well-known notify
//! file. This watcher polls that file's mtime, takes the **last**
//! non-empty line on each change, and routes it to the session whose
//! workspace root owns the path, which then replays the edit to the
//! language server.
//!
//! Repeated notifications for the same path are debounced within a small
//! window so a batch edit does not trigger a resync storm. Termination
//! is cooperative via a watch channel.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::lsp::WorkspaceRegistry;

/// How often the notify file's mtime is sampled.
const POLL_INTERVAL: Duration = Duration::from_millis(500);
/// Identical paths within this window are ignored.
const DEBOUNCE_WINDOW: Duration = Duration::from_secs(2);

/// Watches the notify file and delivers edited paths to their sessions.
pub struct EditWatcher {
    registry: Arc<WorkspaceRegistry>,
    notify_file: PathBuf,
}

impl EditWatcher {
    /// Creates a watcher over `notify_file`.
    #[must_use]
    pub fn new(registry: Arc<WorkspaceRegistry>, notify_file: PathBuf) -> Self {
        Self {
            registry,
            notify_file,
        }
    }

    /// Starts the watch loop. The task ends promptly when `shutdown`
    /// observes a value change.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("watching {} for edit notifications", self.notify_file.display());

        let mut last_mtime: Option<SystemTime> = None;
        let mut last_delivery: Option<(PathBuf, Instant)> = None;

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    debug!("edit watcher stopping");
                    return;
                }
                () = tokio::time::sleep(POLL_INTERVAL) => {}
            }

            let Ok(metadata) = tokio::fs::metadata(&self.notify_file).await else {
                continue;
            };
            let Ok(mtime) = metadata.modified() else {
                continue;
            };
            if last_mtime == Some(mtime) {
                continue;
            }
            last_mtime = Some(mtime);

            let contents = match tokio::fs::read_to_string(&self.notify_file).await {
                Ok(contents) => contents,
                Err(e) => {
                    warn!("failed to read {}: {}", self.notify_file.display(), e);
                    continue;
                }
            };

            // Several paths may have been appended since the last poll;
            // the most recent write wins.
            let Some(line) = contents.lines().rev().find(|l| !l.trim().is_empty()) else {
                continue;
            };
            let path = PathBuf::from(line.trim());

            if let Some((last_path, at)) = &last_delivery
                && *last_path == path
                && at.elapsed() < DEBOUNCE_WINDOW
            {
                debug!("debounced repeat notification for {}", path.display());
                continue;
            }
            last_delivery = Some((path.clone(), Instant::now()));

            self.deliver(&path).await;
        }
    }

    /// Routes one edited path to the owning session.
    async fn deliver(&self, path: &Path) {
        let Some(session) = self.registry.session_for_path(path).await else {
            warn!("no workspace owns edited file {}, ignored", path.display());
            return;
        };

        info!(
            "edit notification: {} -> workspace '{}'",
            path.display(),
            session.name()
        );

        if let Err(e) = session.apply_edit(path).await {
            warn!("failed to resync {}: {}", path.display(), e);
        }
    }
}
