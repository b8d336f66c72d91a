// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Per-session diagnostics store and persisted snapshot.
//!
//! The store is updated only by the `textDocument/publishDiagnostics`
//! handler; the bridge never synthesizes diagnostics. The list for a
//! URI is replaced atomically on every publish; an empty list is kept,
//! not deleted, so callers can distinguish "clean" from "unknown".
//!
//! Each change bumps a generation counter that `trigger_compilation`
//! uses to observe fresh publishes, and triggers an atomic rewrite of
//! `<workspaceRoot>/.lsp-bridge/diagnostics.json`.

use lsp_types::{Diagnostic, DiagnosticSeverity, NumberOrString, Uri};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::documents::uri_to_path;

/// Name of the per-workspace state directory.
const STATE_DIR: &str = ".lsp-bridge";
/// Snapshot file name inside the state directory.
const SNAPSHOT_FILE: &str = "diagnostics.json";

/// Latest diagnostics per file, as published by the server.
#[derive(Default)]
pub struct DiagnosticsStore {
    by_uri: HashMap<Uri, Vec<Diagnostic>>,
    generation: u64,
}

impl DiagnosticsStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically replaces the diagnostics for a URI. Returns the new
    /// generation.
    pub fn set(&mut self, uri: Uri, diagnostics: Vec<Diagnostic>) -> u64 {
        self.by_uri.insert(uri, diagnostics);
        self.generation += 1;
        self.generation
    }

    /// Generation counter, bumped on every [`set`](Self::set).
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Snapshot of all `(uri, diagnostics)` pairs, sorted by URI.
    #[must_use]
    pub fn all(&self) -> Vec<(&Uri, &[Diagnostic])> {
        let mut pairs: Vec<(&Uri, &[Diagnostic])> = self
            .by_uri
            .iter()
            .map(|(uri, diags)| (uri, diags.as_slice()))
            .collect();
        pairs.sort_by(|a, b| a.0.as_str().cmp(b.0.as_str()));
        pairs
    }

    /// Diagnostics for one URI, or `None` when the file was never
    /// published (an empty slice means "published clean").
    #[must_use]
    pub fn for_file(&self, uri: &Uri) -> Option<&[Diagnostic]> {
        self.by_uri.get(uri).map(Vec::as_slice)
    }

    /// Totals by severity across all files.
    #[must_use]
    pub fn summary(&self) -> DiagnosticsSummary {
        let mut summary = DiagnosticsSummary {
            total_files: self.by_uri.len(),
            ..DiagnosticsSummary::default()
        };

        for diags in self.by_uri.values() {
            for diag in diags {
                summary.total_diagnostics += 1;
                match diag.severity {
                    Some(DiagnosticSeverity::ERROR) => summary.errors += 1,
                    Some(DiagnosticSeverity::WARNING) => summary.warnings += 1,
                    // The original counted everything else (including
                    // hints and missing severity) as informational.
                    _ => summary.info += 1,
                }
            }
        }

        summary
    }

    /// Drops all state. Used when the child dies: the cache no longer
    /// reflects any live server.
    pub fn clear(&mut self) {
        self.by_uri.clear();
        self.generation += 1;
    }

    /// Renders the store into the serializable report shape shared by
    /// the capability API and the persisted snapshot.
    #[must_use]
    pub fn report(&self) -> DiagnosticsReport {
        let mut by_file = BTreeMap::new();

        for (uri, diags) in &self.by_uri {
            if diags.is_empty() {
                continue;
            }
            let records = diags.iter().map(DiagnosticRecord::from).collect();
            by_file.insert(uri_to_path(uri), records);
        }

        DiagnosticsReport {
            summary: self.summary(),
            by_file,
        }
    }
}

/// Totals by severity across all files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticsSummary {
    /// Number of files with a published diagnostics list (clean or not).
    pub total_files: usize,
    /// Total diagnostics across all files.
    pub total_diagnostics: usize,
    /// Diagnostics with error severity.
    pub errors: usize,
    /// Diagnostics with warning severity.
    pub warnings: usize,
    /// Everything else (information, hints, unspecified).
    pub info: usize,
}

/// One diagnostic in report form: 1-indexed line, 0-indexed character.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticRecord {
    /// `ERROR`, `WARNING`, `INFO` or `HINT`.
    pub severity: String,
    /// 1-indexed line, as shown in editors.
    pub line: u32,
    /// 0-indexed character.
    pub character: u32,
    /// The diagnostic message.
    pub message: String,
    /// Producing tool, when reported (e.g. "bloop").
    pub source: String,
    /// Diagnostic code, when reported.
    pub code: String,
}

impl From<&Diagnostic> for DiagnosticRecord {
    fn from(diag: &Diagnostic) -> Self {
        let severity = match diag.severity {
            Some(DiagnosticSeverity::ERROR) => "ERROR",
            Some(DiagnosticSeverity::WARNING) => "WARNING",
            Some(DiagnosticSeverity::HINT) => "HINT",
            _ => "INFO",
        };

        let code = diag
            .code
            .as_ref()
            .map(|c| match c {
                NumberOrString::Number(n) => n.to_string(),
                NumberOrString::String(s) => s.clone(),
            })
            .unwrap_or_default();

        Self {
            severity: severity.to_string(),
            line: diag.range.start.line + 1,
            character: diag.range.start.character,
            message: diag.message.clone(),
            source: diag.source.clone().unwrap_or_default(),
            code,
        }
    }
}

/// Summary plus per-file listing, ordered by path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticsReport {
    /// Totals by severity.
    pub summary: DiagnosticsSummary,
    /// Diagnostics per absolute path; clean files are omitted here but
    /// still counted in the summary.
    pub by_file: BTreeMap<String, Vec<DiagnosticRecord>>,
}

impl DiagnosticsReport {
    /// Restricts the per-file listing to one path. The summary keeps
    /// workspace-wide totals.
    #[must_use]
    pub fn filtered_to(mut self, path: &Path) -> Self {
        let wanted = path.display().to_string();
        self.by_file.retain(|file, _| *file == wanted);
        self
    }
}

/// On-disk snapshot schema, rewritten whenever the store changes.
#[derive(Debug, Serialize, Deserialize)]
pub struct DiagnosticsSnapshot {
    /// Totals by severity.
    pub summary: DiagnosticsSummary,
    /// Diagnostics per absolute path.
    pub by_file: BTreeMap<String, Vec<DiagnosticRecord>>,
    /// Convenience copy of `summary.errors` for hook scripts.
    pub error_count: usize,
    /// Convenience copy of `summary.warnings`.
    pub warning_count: usize,
    /// RFC 3339 timestamp of the rewrite.
    pub updated_at: String,
}

/// Path of the snapshot file for a workspace root.
#[must_use]
pub fn snapshot_path(workspace_root: &Path) -> PathBuf {
    workspace_root.join(STATE_DIR).join(SNAPSHOT_FILE)
}

/// Atomically rewrites the workspace snapshot: write to a temp file in
/// the same directory, then rename over the target.
pub async fn write_snapshot(workspace_root: PathBuf, report: DiagnosticsReport) {
    let snapshot = DiagnosticsSnapshot {
        error_count: report.summary.errors,
        warning_count: report.summary.warnings,
        summary: report.summary,
        by_file: report.by_file,
        updated_at: chrono::Utc::now().to_rfc3339(),
    };

    let dir = workspace_root.join(STATE_DIR);
    if let Err(e) = tokio::fs::create_dir_all(&dir).await {
        warn!("failed to create {}: {}", dir.display(), e);
        return;
    }

    let body = match serde_json::to_vec_pretty(&snapshot) {
        Ok(body) => body,
        Err(e) => {
            warn!("failed to encode diagnostics snapshot: {}", e);
            return;
        }
    };

    let target = dir.join(SNAPSHOT_FILE);
    let tmp = dir.join(format!("{SNAPSHOT_FILE}.tmp"));

    if let Err(e) = tokio::fs::write(&tmp, &body).await {
        warn!("failed to write {}: {}", tmp.display(), e);
        return;
    }
    if let Err(e) = tokio::fs::rename(&tmp, &target).await {
        warn!("failed to replace {}: {}", target.display(), e);
        return;
    }

    debug!(
        "snapshot rewritten: {} ({} errors)",
        target.display(),
        snapshot.error_count
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use lsp_types::{Position, Range};

    fn diag(severity: DiagnosticSeverity, line: u32, character: u32, message: &str) -> Diagnostic {
        Diagnostic {
            range: Range {
                start: Position { line, character },
                end: Position {
                    line,
                    character: character + 1,
                },
            },
            severity: Some(severity),
            message: message.to_string(),
            source: Some("stubls".to_string()),
            ..Diagnostic::default()
        }
    }

    fn uri(s: &str) -> Uri {
        s.parse().unwrap_or_else(|_| panic!("bad test uri: {s}"))
    }

    #[test]
    fn set_then_get_round_trips() {
        let mut store = DiagnosticsStore::new();
        let u = uri("file:///w/src/App.scala");
        let diags = vec![diag(DiagnosticSeverity::ERROR, 10, 4, "type mismatch")];

        store.set(u.clone(), diags.clone());

        let got = store.for_file(&u);
        assert_eq!(got.map(<[Diagnostic]>::len), Some(1));
        assert_eq!(got.and_then(|d| d.first()).map(|d| d.message.as_str()),
            Some("type mismatch"));
    }

    #[test]
    fn empty_list_is_stored_not_deleted() {
        let mut store = DiagnosticsStore::new();
        let u = uri("file:///w/src/App.scala");

        store.set(u.clone(), vec![diag(DiagnosticSeverity::ERROR, 1, 0, "bad")]);
        store.set(u.clone(), vec![]);

        // Clean, not unknown.
        assert_eq!(store.for_file(&u).map(<[Diagnostic]>::len), Some(0));
        assert!(store.for_file(&uri("file:///w/other.scala")).is_none());
        assert_eq!(store.summary().total_files, 1);
        assert_eq!(store.summary().errors, 0);
    }

    #[test]
    fn generation_advances_on_every_set() {
        let mut store = DiagnosticsStore::new();
        let before = store.generation();
        store.set(uri("file:///w/a.scala"), vec![]);
        let mid = store.generation();
        store.set(uri("file:///w/a.scala"), vec![]);

        assert!(mid > before);
        assert!(store.generation() > mid);
    }

    #[test]
    fn all_is_sorted_by_uri() {
        let mut store = DiagnosticsStore::new();
        store.set(uri("file:///w/b.scala"), vec![]);
        store.set(uri("file:///w/a.scala"), vec![]);

        let uris: Vec<&str> = store.all().iter().map(|(u, _)| u.as_str()).collect();
        assert_eq!(uris, vec!["file:///w/a.scala", "file:///w/b.scala"]);
    }

    #[test]
    fn summary_counts_by_severity() {
        let mut store = DiagnosticsStore::new();
        store.set(
            uri("file:///w/a.scala"),
            vec![
                diag(DiagnosticSeverity::ERROR, 1, 0, "e"),
                diag(DiagnosticSeverity::WARNING, 2, 0, "w"),
                diag(DiagnosticSeverity::HINT, 3, 0, "h"),
            ],
        );
        store.set(
            uri("file:///w/b.scala"),
            vec![diag(DiagnosticSeverity::ERROR, 1, 0, "e2")],
        );

        let summary = store.summary();
        assert_eq!(summary.total_files, 2);
        assert_eq!(summary.total_diagnostics, 4);
        assert_eq!(summary.errors, 2);
        assert_eq!(summary.warnings, 1);
        assert_eq!(summary.info, 1);
    }

    #[test]
    fn report_uses_one_indexed_lines() {
        let mut store = DiagnosticsStore::new();
        store.set(
            uri("file:///w/src/App.scala"),
            vec![diag(DiagnosticSeverity::ERROR, 10, 4, "type mismatch")],
        );

        let report = store.report();
        let records = &report.by_file["/w/src/App.scala"];
        assert_eq!(records[0].line, 11);
        assert_eq!(records[0].character, 4);
        assert_eq!(records[0].severity, "ERROR");
    }

    #[test]
    fn report_omits_clean_files_but_counts_them() {
        let mut store = DiagnosticsStore::new();
        store.set(uri("file:///w/clean.scala"), vec![]);
        store.set(
            uri("file:///w/dirty.scala"),
            vec![diag(DiagnosticSeverity::WARNING, 0, 0, "unused")],
        );

        let report = store.report();
        assert_eq!(report.summary.total_files, 2);
        assert_eq!(report.by_file.len(), 1);
        assert!(report.by_file.contains_key("/w/dirty.scala"));
    }

    #[test]
    fn filtered_report_keeps_only_requested_file() {
        let mut store = DiagnosticsStore::new();
        store.set(
            uri("file:///w/a.scala"),
            vec![diag(DiagnosticSeverity::ERROR, 0, 0, "a")],
        );
        store.set(
            uri("file:///w/b.scala"),
            vec![diag(DiagnosticSeverity::ERROR, 0, 0, "b")],
        );

        let report = store.report().filtered_to(Path::new("/w/a.scala"));
        assert_eq!(report.by_file.len(), 1);
        assert!(report.by_file.contains_key("/w/a.scala"));
    }

    #[tokio::test]
    async fn snapshot_written_atomically() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut store = DiagnosticsStore::new();
        store.set(
            uri("file:///w/src/App.scala"),
            vec![diag(DiagnosticSeverity::ERROR, 10, 4, "type mismatch")],
        );

        write_snapshot(dir.path().to_path_buf(), store.report()).await;

        let raw = std::fs::read_to_string(snapshot_path(dir.path()))?;
        let snapshot: DiagnosticsSnapshot = serde_json::from_str(&raw)?;
        assert_eq!(snapshot.error_count, 1);
        assert_eq!(snapshot.warning_count, 0);
        assert!(!snapshot.updated_at.is_empty());
        assert_eq!(snapshot.by_file["/w/src/App.scala"][0].line, 11);

        // No stray temp file left behind.
        assert!(!dir.path().join(STATE_DIR).join("diagnostics.json.tmp").exists());
        Ok(())
    }
}
