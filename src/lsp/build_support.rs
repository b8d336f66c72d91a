// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Build-tool provisioning hooks.
//!
//! Some language servers depend on a build descriptor that must exist
//! before the server starts (Metals needs a `.bloop` directory produced
//! by sbt). A hook runs once during `start()`, before the child is
//! spawned. Hooks are advisory: a failure is logged and startup
//! proceeds, since the server may still be able to import the build
//! itself.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{info, warn};

const SBT_BLOOP_PLUGIN: &str =
    "\naddSbtPlugin(\"ch.epfl.scala\" % \"sbt-bloop\" % \"1.5.11\")\n";
const BLOOP_INSTALL_ATTEMPTS: u32 = 3;
const BLOOP_INSTALL_TIMEOUT: Duration = Duration::from_secs(60);

/// Language-specific pre-flight step executed before the LSP child is
/// launched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildSupport {
    /// No provisioning needed.
    None,
    /// Generate Bloop build descriptors via `sbt bloopInstall` when the
    /// workspace has none.
    SbtBloop,
}

impl BuildSupport {
    /// Resolves a hook from its config name.
    #[must_use]
    pub fn from_name(name: Option<&str>) -> Self {
        match name {
            Some("sbt-bloop") => Self::SbtBloop,
            _ => Self::None,
        }
    }

    /// Runs the hook. Errors are logged, never propagated.
    pub async fn prepare(self, workspace_root: &Path) {
        match self {
            Self::None => {}
            Self::SbtBloop => {
                if let Err(e) = provision_bloop(workspace_root).await {
                    warn!(
                        "bloop provisioning failed in {} (continuing): {}",
                        workspace_root.display(),
                        e
                    );
                }
            }
        }
    }
}

/// Ensures the workspace has Bloop build descriptors.
///
/// Skips entirely when `.bloop` already exists. Otherwise makes sure the
/// sbt-bloop plugin is declared in `project/plugins.sbt`, then runs
/// `sbt bloopInstall` with bounded retries, since sbt's JVM occasionally
/// crashes on the first run.
async fn provision_bloop(workspace_root: &Path) -> anyhow::Result<()> {
    let bloop_dir = workspace_root.join(".bloop");
    if bloop_dir.exists() {
        info!(".bloop exists, skipping bloopInstall");
        return Ok(());
    }

    ensure_plugin_declared(workspace_root).await?;

    for attempt in 1..=BLOOP_INSTALL_ATTEMPTS {
        info!(
            "running sbt bloopInstall in {} (attempt {}/{})",
            workspace_root.display(),
            attempt,
            BLOOP_INSTALL_ATTEMPTS
        );

        let child = Command::new("sbt")
            .arg("bloopInstall")
            .current_dir(workspace_root)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();

        let mut child = match child {
            Ok(child) => child,
            Err(e) => anyhow::bail!("failed to run sbt: {e}"),
        };

        match tokio::time::timeout(BLOOP_INSTALL_TIMEOUT, child.wait()).await {
            Ok(Ok(status)) if status.success() || bloop_dir.exists() => {
                info!("bloop descriptors generated");
                return Ok(());
            }
            Ok(Ok(status)) => {
                warn!("sbt bloopInstall exited with {status}, retrying");
            }
            Ok(Err(e)) => {
                warn!("sbt bloopInstall failed: {e}, retrying");
            }
            Err(_) => {
                let _ = child.kill().await;
                warn!("sbt bloopInstall timed out, retrying");
            }
        }

        tokio::time::sleep(Duration::from_secs(2)).await;
    }

    anyhow::bail!("bloopInstall did not produce .bloop after {BLOOP_INSTALL_ATTEMPTS} attempts")
}

/// Appends the sbt-bloop plugin line to `project/plugins.sbt` unless it
/// is already declared.
async fn ensure_plugin_declared(workspace_root: &Path) -> anyhow::Result<()> {
    let plugins_file = workspace_root.join("project").join("plugins.sbt");

    let existing = match tokio::fs::read_to_string(&plugins_file).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => anyhow::bail!("failed to read {}: {e}", plugins_file.display()),
    };

    if existing.contains("sbt-bloop") {
        return Ok(());
    }

    tokio::fs::create_dir_all(workspace_root.join("project")).await?;
    tokio::fs::write(&plugins_file, format!("{existing}{SBT_BLOOP_PLUGIN}")).await?;
    info!("declared sbt-bloop plugin in {}", plugins_file.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_name_resolution() {
        assert_eq!(BuildSupport::from_name(Some("sbt-bloop")), BuildSupport::SbtBloop);
        assert_eq!(BuildSupport::from_name(Some("unknown")), BuildSupport::None);
        assert_eq!(BuildSupport::from_name(None), BuildSupport::None);
    }

    #[tokio::test]
    async fn plugin_line_appended_once() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;

        ensure_plugin_declared(dir.path()).await?;
        let first = std::fs::read_to_string(dir.path().join("project/plugins.sbt"))?;
        assert!(first.contains("sbt-bloop"));

        ensure_plugin_declared(dir.path()).await?;
        let second = std::fs::read_to_string(dir.path().join("project/plugins.sbt"))?;
        assert_eq!(first, second);
        Ok(())
    }

    #[tokio::test]
    async fn existing_bloop_dir_short_circuits() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::create_dir(dir.path().join(".bloop"))?;

        // Must not touch project/plugins.sbt when .bloop already exists.
        provision_bloop(dir.path()).await?;
        assert!(!dir.path().join("project/plugins.sbt").exists());
        Ok(())
    }
}
