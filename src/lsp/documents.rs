// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Per-session document store.
//!
//! The LSP protocol requires a document to be opened before it can be
//! synchronized or queried. This store tracks, per absolute path, the
//! version counter, the full text last sent to the server, and whether
//! the `didOpen` handshake has happened. It is a pure in-memory map;
//! reading file contents from disk is the session's job.

use lsp_types::Uri;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{BridgeError, Result};

/// State of one tracked document.
#[derive(Debug, Clone)]
pub struct DocumentEntry {
    /// The `file://` URI sent to the server.
    pub uri: Uri,
    /// Language ID inferred from the file extension.
    pub language_id: &'static str,
    /// Monotonic version, starting at 1 on open.
    pub version: i32,
    /// Full text last synchronized to the server.
    pub text: String,
    /// Whether `didOpen` has been sent for this document.
    pub open_on_server: bool,
}

/// In-memory map of tracked documents, keyed by absolute path.
#[derive(Default)]
pub struct DocumentStore {
    entries: HashMap<PathBuf, DocumentEntry>,
}

impl DocumentStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an entry with version 1, or returns the existing one.
    ///
    /// # Errors
    ///
    /// Returns an error if the path cannot be converted to a URI.
    pub fn open(&mut self, path: &Path, text: String) -> Result<&DocumentEntry> {
        if !self.entries.contains_key(path) {
            let entry = DocumentEntry {
                uri: path_to_uri(path)?,
                language_id: language_id(path),
                version: 1,
                text,
                open_on_server: false,
            };
            self.entries.insert(path.to_path_buf(), entry);
        }
        Ok(&self.entries[path])
    }

    /// Replaces the text and bumps the version. Returns the new version.
    ///
    /// # Errors
    ///
    /// Returns a protocol error when the document was never opened:
    /// sending `didChange` before `didOpen` is a sync-ordering violation.
    pub fn update(&mut self, path: &Path, text: String) -> Result<i32> {
        let entry = self.entries.get_mut(path).ok_or_else(|| {
            BridgeError::Protocol(format!("document not open: {}", path.display()))
        })?;
        entry.version += 1;
        entry.text = text;
        Ok(entry.version)
    }

    /// Returns the entry for a path, if tracked.
    #[must_use]
    pub fn get(&self, path: &Path) -> Option<&DocumentEntry> {
        self.entries.get(path)
    }

    /// Records that `didOpen` has been sent for this document.
    pub fn mark_open(&mut self, path: &Path) {
        if let Some(entry) = self.entries.get_mut(path) {
            entry.open_on_server = true;
        }
    }

    /// Paths of all documents currently open on the server.
    #[must_use]
    pub fn open_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self
            .entries
            .iter()
            .filter(|(_, e)| e.open_on_server)
            .map(|(p, _)| p.clone())
            .collect();
        paths.sort();
        paths
    }

    /// Number of documents open on the server.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.entries.values().filter(|e| e.open_on_server).count()
    }

    /// Flips every document back to unopened. Used when the child dies:
    /// the replacement server has no memory of previous `didOpen`s.
    pub fn mark_all_unopened(&mut self) {
        for entry in self.entries.values_mut() {
            entry.open_on_server = false;
        }
    }
}

/// Converts an absolute path to a `file://` URI.
///
/// # Errors
///
/// Returns an error if the resulting string is not a valid URI.
pub fn path_to_uri(path: &Path) -> Result<Uri> {
    let uri_str = format!("file://{}", path.display());
    uri_str
        .parse()
        .map_err(|e| BridgeError::Protocol(format!("invalid path for URI {uri_str:?}: {e}")))
}

/// Converts a `file://` URI back to an absolute path string.
#[must_use]
pub fn uri_to_path(uri: &Uri) -> String {
    uri.as_str()
        .strip_prefix("file://")
        .unwrap_or(uri.as_str())
        .to_string()
}

/// Infers the LSP language ID from a file extension.
#[must_use]
pub fn language_id(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("scala") => "scala",
        Some("rs") => "rust",
        Some("ts") => "typescript",
        Some("js") => "javascript",
        Some("py") => "python",
        Some("go") => "go",
        _ => "plaintext",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[test]
    fn open_sets_version_one() -> Result<()> {
        let mut store = DocumentStore::new();
        let entry = store.open(Path::new("/w/src/App.scala"), "object App".to_string())?;

        assert_eq!(entry.version, 1);
        assert_eq!(entry.language_id, "scala");
        assert!(!entry.open_on_server);
        assert!(entry.uri.as_str().starts_with("file:///w/src/App.scala"));
        Ok(())
    }

    #[test]
    fn open_is_idempotent() -> Result<()> {
        let mut store = DocumentStore::new();
        store.open(Path::new("/w/a.rs"), "one".to_string())?;
        let entry = store.open(Path::new("/w/a.rs"), "two".to_string())?;

        // First open wins; the second call must not reset state.
        assert_eq!(entry.version, 1);
        assert_eq!(entry.text, "one");
        Ok(())
    }

    #[test]
    fn update_bumps_version_monotonically() -> Result<()> {
        let mut store = DocumentStore::new();
        store.open(Path::new("/w/a.rs"), "v1".to_string())?;

        assert_eq!(store.update(Path::new("/w/a.rs"), "v2".to_string())?, 2);
        assert_eq!(store.update(Path::new("/w/a.rs"), "v3".to_string())?, 3);
        let entry = store.get(Path::new("/w/a.rs")).map(Clone::clone);
        assert_eq!(entry.map(|e| e.text), Some("v3".to_string()));
        Ok(())
    }

    #[test]
    fn update_unknown_document_errors() {
        let mut store = DocumentStore::new();
        assert!(store.update(Path::new("/w/ghost.rs"), "x".to_string()).is_err());
    }

    #[test]
    fn open_paths_lists_only_opened() -> Result<()> {
        let mut store = DocumentStore::new();
        store.open(Path::new("/w/b.rs"), String::new())?;
        store.open(Path::new("/w/a.rs"), String::new())?;
        store.mark_open(Path::new("/w/a.rs"));

        assert_eq!(store.open_paths(), vec![PathBuf::from("/w/a.rs")]);
        assert_eq!(store.open_count(), 1);

        store.mark_open(Path::new("/w/b.rs"));
        // Sorted output keeps wire traces deterministic.
        assert_eq!(
            store.open_paths(),
            vec![PathBuf::from("/w/a.rs"), PathBuf::from("/w/b.rs")]
        );
        Ok(())
    }

    #[test]
    fn mark_all_unopened_resets_flags() -> Result<()> {
        let mut store = DocumentStore::new();
        store.open(Path::new("/w/a.rs"), String::new())?;
        store.mark_open(Path::new("/w/a.rs"));
        store.mark_all_unopened();

        assert_eq!(store.open_count(), 0);
        // Entry (and its version counter) survives.
        assert!(store.get(Path::new("/w/a.rs")).is_some());
        Ok(())
    }

    #[test]
    fn language_table() {
        assert_eq!(language_id(Path::new("A.scala")), "scala");
        assert_eq!(language_id(Path::new("a.rs")), "rust");
        assert_eq!(language_id(Path::new("a.ts")), "typescript");
        assert_eq!(language_id(Path::new("a.js")), "javascript");
        assert_eq!(language_id(Path::new("a.py")), "python");
        assert_eq!(language_id(Path::new("a.go")), "go");
        assert_eq!(language_id(Path::new("a.xyz")), "plaintext");
        assert_eq!(language_id(Path::new("noext")), "plaintext");
    }

    #[test]
    fn uri_round_trip() -> Result<()> {
        let uri = path_to_uri(Path::new("/home/user/test.rs"))?;
        assert_eq!(uri_to_path(&uri), "/home/user/test.rs");
        Ok(())
    }
}
