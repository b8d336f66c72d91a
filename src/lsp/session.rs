// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! One live conversation with a language-server child process.
//!
//! A session owns exactly one child and one JSON-RPC peer. It drives the
//! initialize/shutdown lifecycle, opens documents on demand, resynchronizes
//! them when the edit watcher reports a change, and answers hover,
//! definition and compilation queries from its document and diagnostic
//! stores.

use lsp_types::{
    ClientCapabilities, ClientInfo, DidChangeTextDocumentParams, DidOpenTextDocumentParams,
    DidSaveTextDocumentParams, GotoCapability, GotoDefinitionResponse, Hover,
    HoverClientCapabilities, HoverContents, HoverParams, InitializeParams, MarkedString,
    MarkupKind, Position, PublishDiagnosticsClientCapabilities, PublishDiagnosticsParams,
    TextDocumentClientCapabilities, TextDocumentContentChangeEvent, TextDocumentIdentifier,
    TextDocumentItem, TextDocumentPositionParams, TextDocumentSyncClientCapabilities, Uri,
    VersionedTextDocumentIdentifier, WorkspaceFolder,
};
use serde::Serialize;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, Notify, RwLock};
use tracing::{debug, info, trace, warn};

use super::build_support::BuildSupport;
use super::diagnostics::{self, DiagnosticsReport, DiagnosticsStore};
use super::documents::{DocumentStore, uri_to_path};
use super::peer::{CloseHandler, JsonRpcPeer, NotificationHandlers};
use crate::config::{ServerConfig, Timeouts};
use crate::error::{BridgeError, Result};

/// Poll interval for readiness and diagnostics waits.
const POLL_INTERVAL: Duration = Duration::from_millis(50);
/// After the first publish lands, keep absorbing follow-on publishes
/// until the server has been quiet this long.
const DIAGNOSTICS_QUIET_WINDOW: Duration = Duration::from_millis(300);

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Created but never started.
    Unstarted,
    /// Child spawned, initialize handshake in flight.
    Starting,
    /// Handshake complete, capability calls accepted.
    Ready,
    /// Graceful shutdown in progress.
    ShuttingDown,
    /// Child gone; calls fail fast with *unavailable*.
    Dead,
}

impl SessionState {
    /// Create from atomic u8 value.
    #[must_use]
    pub const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Unstarted,
            1 => Self::Starting,
            2 => Self::Ready,
            3 => Self::ShuttingDown,
            _ => Self::Dead,
        }
    }

    /// Convert to atomic u8 value.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::Unstarted => 0,
            Self::Starting => 1,
            Self::Ready => 2,
            Self::ShuttingDown => 3,
            Self::Dead => 4,
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Unstarted => "unstarted",
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::ShuttingDown => "shutting_down",
            Self::Dead => "dead",
        };
        f.write_str(name)
    }
}

/// Status summary for one workspace.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    /// Workspace name.
    pub workspace: String,
    /// Current lifecycle state.
    pub state: SessionState,
    /// Diagnostics with error severity.
    pub error_count: usize,
    /// Diagnostics with warning severity.
    pub warning_count: usize,
    /// Documents currently open on the server.
    pub open_docs: usize,
}

/// A definition result in editor coordinates: 1-indexed line,
/// 0-indexed character.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DefinitionLocation {
    /// Absolute path of the target file.
    pub path: String,
    /// 1-indexed line.
    pub line: u32,
    /// 0-indexed character.
    pub character: u32,
}

/// One bridge-to-language-server conversation.
pub struct LspSession {
    name: String,
    config: ServerConfig,
    timeouts: Timeouts,
    state: Arc<AtomicU8>,
    peer: OnceLock<JsonRpcPeer>,
    child: Mutex<Option<Child>>,
    server_capabilities: OnceLock<serde_json::Value>,
    documents: Arc<RwLock<DocumentStore>>,
    diagnostics: Arc<RwLock<DiagnosticsStore>>,
    diagnostics_changed: Arc<Notify>,
}

impl LspSession {
    /// Creates an unstarted session. The child is spawned lazily by
    /// [`start`](Self::start).
    #[must_use]
    pub fn new(name: String, config: ServerConfig, timeouts: Timeouts) -> Self {
        Self {
            name,
            config,
            timeouts,
            state: Arc::new(AtomicU8::new(SessionState::Unstarted.as_u8())),
            peer: OnceLock::new(),
            child: Mutex::new(None),
            server_capabilities: OnceLock::new(),
            documents: Arc::new(RwLock::new(DocumentStore::new())),
            diagnostics: Arc::new(RwLock::new(DiagnosticsStore::new())),
            diagnostics_changed: Arc::new(Notify::new()),
        }
    }

    /// Workspace name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Workspace root directory.
    #[must_use]
    pub fn workspace_root(&self) -> &Path {
        &self.config.workspace_root
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// True when `path` is inside this session's workspace root.
    #[must_use]
    pub fn owns_path(&self, path: &Path) -> bool {
        path.starts_with(&self.config.workspace_root)
    }

    /// Server capabilities from the initialize result, once ready.
    #[must_use]
    pub fn server_capabilities(&self) -> Option<&serde_json::Value> {
        self.server_capabilities.get()
    }

    /// Spawns the child, attaches the peer, and runs the initialize
    /// handshake. Idempotent: a second call while starting or started is
    /// a no-op.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::Spawn`] when the child fails to launch.
    /// - [`BridgeError::Rpc`] / [`BridgeError::Timeout`] when initialize
    ///   fails. In every failure case the session lands in `Dead`.
    pub async fn start(&self) -> Result<()> {
        if self
            .state
            .compare_exchange(
                SessionState::Unstarted.as_u8(),
                SessionState::Starting.as_u8(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            return Ok(());
        }

        // Advisory pre-flight: failure is logged inside, start proceeds.
        BuildSupport::from_name(self.config.build_support.as_deref())
            .prepare(&self.config.workspace_root)
            .await;

        match self.start_inner().await {
            Ok(()) => {
                self.state
                    .store(SessionState::Ready.as_u8(), Ordering::SeqCst);
                info!("workspace '{}' ready", self.name);
                Ok(())
            }
            Err(e) => {
                warn!("workspace '{}' failed to start: {}", self.name, e);
                // A half-initialized child must not linger.
                self.kill().await;
                Err(e)
            }
        }
    }

    async fn start_inner(&self) -> Result<()> {
        let program = self.config.command.first().ok_or_else(|| BridgeError::Config {
            workspace: self.name.clone(),
            reason: "empty server command".to_string(),
        })?;

        info!(
            "spawning LSP server for '{}': {}",
            self.name,
            self.config.command.join(" ")
        );

        let mut child = Command::new(program)
            .args(&self.config.command[1..])
            .current_dir(&self.config.workspace_root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BridgeError::Spawn {
                command: program.clone(),
                reason: e.to_string(),
            })?;

        let stdin = child.stdin.take().ok_or_else(|| BridgeError::Spawn {
            command: program.clone(),
            reason: "stdin not captured".to_string(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| BridgeError::Spawn {
            command: program.clone(),
            reason: "stdout not captured".to_string(),
        })?;

        *self.child.lock().await = Some(child);

        let peer = JsonRpcPeer::spawn(stdin, stdout, self.notification_handlers(), self.close_handler());
        let peer = self.peer.get_or_init(|| peer);

        let params = self.initialize_params()?;
        let result = peer
            .call("initialize", to_value(&params)?, self.timeouts.initialize())
            .await?;

        let capabilities = result
            .get("capabilities")
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        debug!("'{}' server capabilities: {}", self.name, capabilities);
        let _ = self.server_capabilities.set(capabilities);

        peer.notify("initialized", serde_json::json!({})).await?;
        Ok(())
    }

    /// Handlers for server-pushed notifications, registered before the
    /// peer starts reading so no early publish can be missed.
    fn notification_handlers(&self) -> NotificationHandlers {
        let mut handlers = NotificationHandlers::new();

        let diagnostics = self.diagnostics.clone();
        let changed = self.diagnostics_changed.clone();
        let root = self.config.workspace_root.clone();
        handlers.on("textDocument/publishDiagnostics", move |params| {
            let diagnostics = diagnostics.clone();
            let changed = changed.clone();
            let root = root.clone();
            async move {
                let parsed: PublishDiagnosticsParams = match serde_json::from_value(params) {
                    Ok(parsed) => parsed,
                    Err(e) => {
                        warn!("undecodable publishDiagnostics dropped: {}", e);
                        return;
                    }
                };

                debug!(
                    "{} diagnostics for {}",
                    parsed.diagnostics.len(),
                    parsed.uri.as_str()
                );

                let report = {
                    let mut store = diagnostics.write().await;
                    store.set(parsed.uri, parsed.diagnostics);
                    store.report()
                };
                changed.notify_waiters();

                // Persistence off the dispatcher: a slow disk must not
                // delay message handling.
                tokio::spawn(diagnostics::write_snapshot(root, report));
            }
        });

        handlers.on("window/logMessage", |params| async move {
            if let Some(message) = params.get("message").and_then(serde_json::Value::as_str) {
                debug!("server log: {}", message);
            }
        });
        handlers.on("window/showMessage", |params| async move {
            if let Some(message) = params.get("message").and_then(serde_json::Value::as_str) {
                info!("server message: {}", message);
            }
        });

        handlers.on("$/progress", |params| async move {
            trace!("progress: {}", params);
        });
        handlers.on("metals/status", |params| async move {
            trace!("metals status: {}", params);
        });

        handlers
    }

    /// Runs when the transport closes, before pending calls are failed:
    /// the replacement state must not pretend the old server is present.
    fn close_handler(&self) -> CloseHandler {
        let state = self.state.clone();
        let documents = self.documents.clone();
        let diagnostics = self.diagnostics.clone();
        let changed = self.diagnostics_changed.clone();
        let name = self.name.clone();

        Box::new(move || {
            Box::pin(async move {
                let prev = SessionState::from_u8(
                    state.swap(SessionState::Dead.as_u8(), Ordering::SeqCst),
                );
                documents.write().await.mark_all_unopened();
                diagnostics.write().await.clear();
                changed.notify_waiters();

                if prev == SessionState::ShuttingDown {
                    debug!("workspace '{}' closed after shutdown", name);
                } else {
                    warn!("workspace '{}' lost its language server", name);
                }
            })
        })
    }

    #[allow(deprecated, reason = "rootUri is deprecated in LSP but still expected by servers")]
    fn initialize_params(&self) -> Result<serde_json::Value> {
        let root = &self.config.workspace_root;
        let root_uri: Uri = match &self.config.root_uri {
            Some(uri) => uri.parse().map_err(|e| BridgeError::Config {
                workspace: self.name.clone(),
                reason: format!("invalid root_uri {uri:?}: {e}"),
            })?,
            None => super::documents::path_to_uri(root)?,
        };

        let params = InitializeParams {
            process_id: Some(std::process::id()),
            root_uri: Some(root_uri.clone()),
            capabilities: ClientCapabilities {
                text_document: Some(TextDocumentClientCapabilities {
                    synchronization: Some(TextDocumentSyncClientCapabilities {
                        did_save: Some(true),
                        ..Default::default()
                    }),
                    publish_diagnostics: Some(PublishDiagnosticsClientCapabilities {
                        related_information: Some(true),
                        ..Default::default()
                    }),
                    hover: Some(HoverClientCapabilities {
                        content_format: Some(vec![MarkupKind::Markdown, MarkupKind::PlainText]),
                        ..Default::default()
                    }),
                    definition: Some(GotoCapability::default()),
                    ..Default::default()
                }),
                ..Default::default()
            },
            workspace_folders: Some(vec![WorkspaceFolder {
                uri: root_uri,
                name: root
                    .file_name()
                    .map(|s| s.to_string_lossy().to_string())
                    .unwrap_or_else(|| "workspace".to_string()),
            }]),
            client_info: Some(ClientInfo {
                name: "lsp-bridge".to_string(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
            }),
            ..Default::default()
        };

        to_value(&params)
    }

    fn peer(&self) -> Result<&JsonRpcPeer> {
        self.peer.get().ok_or(BridgeError::Unavailable {
            workspace: self.name.clone(),
            state: self.state(),
        })
    }

    fn require_ready(&self) -> Result<()> {
        let state = self.state();
        if state == SessionState::Ready {
            Ok(())
        } else {
            Err(BridgeError::Unavailable {
                workspace: self.name.clone(),
                state,
            })
        }
    }

    /// Waits until the session leaves `Starting`, bounded by `timeout`.
    /// Returns the state observed last.
    pub async fn wait_until_ready(&self, timeout: Duration) -> SessionState {
        let deadline = Instant::now() + timeout;
        loop {
            match self.state() {
                SessionState::Ready => return SessionState::Ready,
                SessionState::Dead => return SessionState::Dead,
                state if Instant::now() >= deadline => return state,
                _ => tokio::time::sleep(POLL_INTERVAL).await,
            }
        }
    }

    /// Makes sure the server has the file open, reading it from disk the
    /// first time. Returns the document URI.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Io`] when the file cannot be read; in that case no
    /// LSP message is sent.
    pub async fn ensure_open(&self, path: &Path) -> Result<Uri> {
        {
            let docs = self.documents.read().await;
            if let Some(entry) = docs.get(path)
                && entry.open_on_server
            {
                return Ok(entry.uri.clone());
            }
        }

        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| BridgeError::io(path, e))?;

        // The write lock is held across the send so the didOpen for a URI
        // is on the wire before any didChange can race it.
        let mut docs = self.documents.write().await;
        if let Some(entry) = docs.get(path)
            && entry.open_on_server
        {
            return Ok(entry.uri.clone());
        }

        let entry = docs.open(path, text)?;
        let uri = entry.uri.clone();
        let params = DidOpenTextDocumentParams {
            text_document: TextDocumentItem {
                uri: uri.clone(),
                language_id: entry.language_id.to_string(),
                version: entry.version,
                text: entry.text.clone(),
            },
        };

        debug!("opening {} ({})", path.display(), entry.language_id);
        self.peer()?
            .notify("textDocument/didOpen", to_value(&params)?)
            .await?;
        docs.mark_open(path);

        Ok(uri)
    }

    /// Reacts to an external edit: re-reads the file and replays it to
    /// the server as a full-text `didChange` followed by `didSave`.
    ///
    /// A file the server has never seen is opened first, which covers
    /// "edited before first query". When the on-disk text matches what
    /// the server already has, nothing is sent.
    pub async fn apply_edit(&self, path: &Path) -> Result<()> {
        self.require_ready()?;
        let uri = self.ensure_open(path).await?;

        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| BridgeError::io(path, e))?;

        let mut docs = self.documents.write().await;
        let entry = docs.get(path).ok_or_else(|| {
            BridgeError::Protocol(format!("document not open: {}", path.display()))
        })?;

        if entry.open_on_server && entry.text == text {
            trace!("{} unchanged on disk, skipping resync", path.display());
            return Ok(());
        }

        let version = docs.update(path, text.clone())?;
        debug!("resync {} (v{})", path.display(), version);
        self.send_change_and_save(&uri, version, text).await
    }

    /// Forces the server to recompile by re-issuing `didChange`/`didSave`
    /// for every open document, then waits for diagnostics activity up to
    /// the compile grace period and returns the snapshot.
    pub async fn trigger_compilation(&self) -> Result<DiagnosticsReport> {
        self.require_ready()?;

        let start_generation = self.diagnostics.read().await.generation();

        {
            let mut docs = self.documents.write().await;
            for path in docs.open_paths() {
                let Some(entry) = docs.get(&path) else { continue };
                let uri = entry.uri.clone();
                let text = entry.text.clone();
                let version = docs.update(&path, text.clone())?;
                self.send_change_and_save(&uri, version, text).await?;
            }
        }

        self.wait_for_diagnostics(start_generation, self.timeouts.compile_wait())
            .await;

        Ok(self.diagnostics.read().await.report())
    }

    async fn send_change_and_save(&self, uri: &Uri, version: i32, text: String) -> Result<()> {
        let peer = self.peer()?;

        let change = DidChangeTextDocumentParams {
            text_document: VersionedTextDocumentIdentifier {
                uri: uri.clone(),
                version,
            },
            content_changes: vec![TextDocumentContentChangeEvent {
                range: None,
                range_length: None,
                text: text.clone(),
            }],
        };
        peer.notify("textDocument/didChange", to_value(&change)?)
            .await?;

        // Some servers only recompile on save.
        let save = DidSaveTextDocumentParams {
            text_document: TextDocumentIdentifier { uri: uri.clone() },
            text: Some(text),
        };
        peer.notify("textDocument/didSave", to_value(&save)?).await
    }

    /// Waits for `publishDiagnostics` activity after `start_generation`,
    /// then lets follow-on publishes settle through a short quiet window.
    /// Always returns by `grace` at the latest.
    async fn wait_for_diagnostics(&self, start_generation: u64, grace: Duration) {
        let deadline = Instant::now() + grace;

        loop {
            let notified = self.diagnostics_changed.notified();
            tokio::pin!(notified);
            // Register before the check: notify_waiters only wakes
            // already-enabled waiters.
            notified.as_mut().enable();

            if self.diagnostics.read().await.generation() > start_generation {
                break;
            }
            if self.state() == SessionState::Dead {
                return;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return;
            }
            let _ = tokio::time::timeout(remaining, &mut notified).await;
        }

        loop {
            let notified = self.diagnostics_changed.notified();
            tokio::pin!(notified);

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return;
            }
            if tokio::time::timeout(remaining.min(DIAGNOSTICS_QUIET_WINDOW), &mut notified)
                .await
                .is_err()
            {
                return;
            }
        }
    }

    /// Hover content at a position. `line` is 1-indexed as shown in
    /// editors, `character` is 0-indexed; the conversion to LSP's
    /// 0-indexed line happens here.
    pub async fn hover(&self, path: &Path, line: u32, character: u32) -> Result<String> {
        self.require_ready()?;
        let uri = self.ensure_open(path).await?;

        let params = HoverParams {
            text_document_position_params: TextDocumentPositionParams {
                text_document: TextDocumentIdentifier { uri },
                position: Position {
                    line: line.saturating_sub(1),
                    character,
                },
            },
            work_done_progress_params: Default::default(),
        };

        let value = self
            .peer()?
            .call("textDocument/hover", to_value(&params)?, self.timeouts.request())
            .await?;

        let hover: Option<Hover> = serde_json::from_value(value)
            .map_err(|e| BridgeError::Protocol(format!("undecodable hover response: {e}")))?;

        match hover {
            Some(hover) => {
                let text = hover_contents_to_string(&hover.contents);
                if text.is_empty() {
                    Err(no_info("hover", path, line, character))
                } else {
                    Ok(text)
                }
            }
            None => Err(no_info("hover", path, line, character)),
        }
    }

    /// Definition locations for the symbol at a position, normalized to
    /// 1-indexed lines.
    pub async fn definition(
        &self,
        path: &Path,
        line: u32,
        character: u32,
    ) -> Result<Vec<DefinitionLocation>> {
        self.require_ready()?;
        let uri = self.ensure_open(path).await?;

        let params = serde_json::json!({
            "textDocument": { "uri": uri.as_str() },
            "position": { "line": line.saturating_sub(1), "character": character },
        });

        let value = self
            .peer()?
            .call("textDocument/definition", params, self.timeouts.request())
            .await?;

        let response: Option<GotoDefinitionResponse> = serde_json::from_value(value)
            .map_err(|e| BridgeError::Protocol(format!("undecodable definition response: {e}")))?;

        let locations = response.map(normalize_definition).unwrap_or_default();
        if locations.is_empty() {
            Err(no_info("definition", path, line, character))
        } else {
            Ok(locations)
        }
    }

    /// Current diagnostics snapshot, optionally restricted to one file.
    pub async fn diagnostics_report(&self, path: Option<&Path>) -> DiagnosticsReport {
        let report = self.diagnostics.read().await.report();
        match path {
            Some(path) => report.filtered_to(path),
            None => report,
        }
    }

    /// Status summary for this workspace.
    pub async fn status(&self) -> SessionStatus {
        let summary = self.diagnostics.read().await.summary();
        let open_docs = self.documents.read().await.open_count();
        SessionStatus {
            workspace: self.name.clone(),
            state: self.state(),
            error_count: summary.errors,
            warning_count: summary.warnings,
            open_docs,
        }
    }

    /// Graceful shutdown: `shutdown` request, `exit` notification, then
    /// wait for the child bounded by the shutdown timeout, killing it if
    /// it lingers. Best effort on every step.
    pub async fn shutdown(&self) {
        let state = self.state();
        if matches!(state, SessionState::Dead | SessionState::Unstarted) {
            self.state
                .store(SessionState::Dead.as_u8(), Ordering::SeqCst);
            return;
        }

        self.state
            .store(SessionState::ShuttingDown.as_u8(), Ordering::SeqCst);
        info!("shutting down workspace '{}'", self.name);

        if let Some(peer) = self.peer.get()
            && peer.is_alive()
        {
            if let Err(e) = peer
                .call("shutdown", serde_json::Value::Null, self.timeouts.shutdown())
                .await
            {
                debug!("'{}' shutdown request failed: {}", self.name, e);
            }
            if let Err(e) = peer.notify("exit", serde_json::Value::Null).await {
                debug!("'{}' exit notification failed: {}", self.name, e);
            }
        }

        let mut child_guard = self.child.lock().await;
        if let Some(child) = child_guard.as_mut() {
            match tokio::time::timeout(self.timeouts.shutdown(), child.wait()).await {
                Ok(_) => {}
                Err(_) => {
                    warn!("'{}' did not exit in time, killing", self.name);
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                }
            }
        }
        // Dropping the handle closes the remaining pipe ends.
        *child_guard = None;

        self.state
            .store(SessionState::Dead.as_u8(), Ordering::SeqCst);
    }

    /// Immediate forced kill, used when graceful shutdown overruns.
    pub async fn kill(&self) {
        if let Some(child) = self.child.lock().await.as_mut() {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
        self.state
            .store(SessionState::Dead.as_u8(), Ordering::SeqCst);
    }
}

fn to_value<T: Serialize>(value: &T) -> Result<serde_json::Value> {
    serde_json::to_value(value)
        .map_err(|e| BridgeError::Protocol(format!("failed to encode params: {e}")))
}

fn no_info(what: &str, path: &Path, line: u32, character: u32) -> BridgeError {
    BridgeError::NotFound(format!(
        "no {what} information at {}:{line}:{character}",
        path.display()
    ))
}

/// Joins hover content blocks into one plaintext/markdown string.
fn hover_contents_to_string(contents: &HoverContents) -> String {
    fn marked(ms: &MarkedString) -> String {
        match ms {
            MarkedString::String(s) => s.clone(),
            MarkedString::LanguageString(ls) => ls.value.clone(),
        }
    }

    match contents {
        HoverContents::Scalar(ms) => marked(ms),
        HoverContents::Array(blocks) => blocks
            .iter()
            .map(marked)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n"),
        HoverContents::Markup(markup) => markup.value.clone(),
    }
}

/// Flattens the three definition response shapes into editor coordinates.
fn normalize_definition(response: GotoDefinitionResponse) -> Vec<DefinitionLocation> {
    fn from_location(location: &lsp_types::Location) -> DefinitionLocation {
        DefinitionLocation {
            path: uri_to_path(&location.uri),
            line: location.range.start.line + 1,
            character: location.range.start.character,
        }
    }

    match response {
        GotoDefinitionResponse::Scalar(location) => vec![from_location(&location)],
        GotoDefinitionResponse::Array(locations) => {
            locations.iter().map(from_location).collect()
        }
        GotoDefinitionResponse::Link(links) => links
            .iter()
            .map(|link| DefinitionLocation {
                path: uri_to_path(&link.target_uri),
                line: link.target_selection_range.start.line + 1,
                character: link.target_selection_range.start.character,
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lsp_types::{Location, LocationLink, MarkupContent, Range};

    #[test]
    fn state_round_trips_through_u8() {
        for state in [
            SessionState::Unstarted,
            SessionState::Starting,
            SessionState::Ready,
            SessionState::ShuttingDown,
            SessionState::Dead,
        ] {
            assert_eq!(SessionState::from_u8(state.as_u8()), state);
        }
        // Out-of-range values are treated as dead.
        assert_eq!(SessionState::from_u8(99), SessionState::Dead);
    }

    #[test]
    fn hover_markup_content() {
        let contents = HoverContents::Markup(MarkupContent {
            kind: MarkupKind::Markdown,
            value: "def println(x: Any): Unit".to_string(),
        });
        assert_eq!(
            hover_contents_to_string(&contents),
            "def println(x: Any): Unit"
        );
    }

    #[test]
    fn hover_array_joins_blocks() {
        let contents = HoverContents::Array(vec![
            MarkedString::String("first".to_string()),
            MarkedString::LanguageString(lsp_types::LanguageString {
                language: "scala".to_string(),
                value: "second".to_string(),
            }),
        ]);
        assert_eq!(hover_contents_to_string(&contents), "first\n\nsecond");
    }

    fn location(uri: &str, line: u32, character: u32) -> Location {
        Location {
            uri: uri.parse().unwrap_or_else(|_| panic!("bad uri: {uri}")),
            range: Range {
                start: Position { line, character },
                end: Position {
                    line,
                    character: character + 7,
                },
            },
        }
    }

    #[test]
    fn definition_location_is_one_indexed() {
        let response =
            GotoDefinitionResponse::Array(vec![location("file:///w/src/models/User.scala", 20, 6)]);

        let normalized = normalize_definition(response);
        assert_eq!(
            normalized,
            vec![DefinitionLocation {
                path: "/w/src/models/User.scala".to_string(),
                line: 21,
                character: 6,
            }]
        );
    }

    #[test]
    fn definition_links_use_selection_range() {
        let link = LocationLink {
            origin_selection_range: None,
            target_uri: "file:///w/a.scala"
                .parse()
                .unwrap_or_else(|_| panic!("bad uri")),
            target_range: Range {
                start: Position { line: 5, character: 0 },
                end: Position { line: 9, character: 1 },
            },
            target_selection_range: Range {
                start: Position { line: 6, character: 2 },
                end: Position { line: 6, character: 8 },
            },
        };

        let normalized = normalize_definition(GotoDefinitionResponse::Link(vec![link]));
        assert_eq!(normalized[0].line, 7);
        assert_eq!(normalized[0].character, 2);
    }

    #[test]
    fn unstarted_session_rejects_capability_calls() {
        let session = LspSession::new(
            "metals".to_string(),
            ServerConfig {
                workspace_root: "/w".into(),
                command: vec!["stub".to_string()],
                root_uri: None,
                build_support: None,
            },
            Timeouts::default(),
        );

        assert_eq!(session.state(), SessionState::Unstarted);
        assert!(matches!(
            session.require_ready(),
            Err(BridgeError::Unavailable { .. })
        ));
    }

    #[test]
    fn owns_path_checks_workspace_prefix() {
        let session = LspSession::new(
            "metals".to_string(),
            ServerConfig {
                workspace_root: "/w/project".into(),
                command: vec!["stub".to_string()],
                root_uri: None,
                build_support: None,
            },
            Timeouts::default(),
        );

        assert!(session.owns_path(Path::new("/w/project/src/App.scala")));
        assert!(!session.owns_path(Path::new("/other/src/App.scala")));
    }
}
