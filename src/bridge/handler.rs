//! Bridge handler that maps MCP tool calls onto the capability facade.

use anyhow::{Result, anyhow};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::debug;

use super::facade::LspBridge;
use crate::mcp::{CallToolResult, Tool, ToolHandler};

/// Input for tools that only need a workspace name.
#[derive(Debug, Deserialize)]
struct WorkspaceInput {
    workspace: String,
}

/// Input for `get_status` (workspace optional).
#[derive(Debug, Deserialize)]
struct StatusInput {
    #[serde(default)]
    workspace: Option<String>,
}

/// Input for `get_diagnostics`.
#[derive(Debug, Deserialize)]
struct DiagnosticsInput {
    workspace: String,
    #[serde(default)]
    file_path: Option<PathBuf>,
}

/// Input for `trigger_compilation`.
#[derive(Debug, Deserialize)]
struct CompilationInput {
    workspace: String,
    #[serde(default)]
    workspace_root: Option<PathBuf>,
}

/// Input for position-based tools (`get_hover`, `get_definition`).
#[derive(Debug, Deserialize)]
struct PositionInput {
    workspace: String,
    file_path: PathBuf,
    /// 1-indexed, as shown in editors.
    line: u32,
    /// 0-indexed.
    character: u32,
}

/// MCP tool handler backed by the capability facade.
///
/// The MCP loop is synchronous; calls hop onto the async runtime via the
/// stored handle.
pub struct LspBridgeHandler {
    bridge: Arc<LspBridge>,
    runtime: Handle,
}

impl LspBridgeHandler {
    /// Creates the handler.
    #[must_use]
    pub fn new(bridge: Arc<LspBridge>, runtime: Handle) -> Self {
        Self { bridge, runtime }
    }

    fn parse<T: for<'de> Deserialize<'de>>(arguments: Option<serde_json::Value>) -> Result<T> {
        serde_json::from_value(arguments.ok_or_else(|| anyhow!("Missing arguments"))?)
            .map_err(|e| anyhow!("Invalid arguments: {e}"))
    }

    fn json_result<T: serde::Serialize>(value: &T) -> Result<CallToolResult> {
        Ok(CallToolResult::text(serde_json::to_string_pretty(value)?))
    }
}

impl ToolHandler for LspBridgeHandler {
    fn list_tools(&self) -> Vec<Tool> {
        vec![
            Tool {
                name: "list_workspaces".to_string(),
                description: Some("List all connected LSP server workspaces".to_string()),
                input_schema: serde_json::json!({
                    "type": "object",
                    "properties": {}
                }),
            },
            Tool {
                name: "get_status".to_string(),
                description: Some(
                    "Get the status of LSP servers and compilation state".to_string(),
                ),
                input_schema: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "workspace": {
                            "type": "string",
                            "description": "Optional: specific workspace to check"
                        }
                    }
                }),
            },
            Tool {
                name: "get_diagnostics".to_string(),
                description: Some(
                    "Get compilation errors, warnings, and diagnostics from the LSP server"
                        .to_string(),
                ),
                input_schema: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "workspace": {
                            "type": "string",
                            "description": "Workspace name (e.g., 'metals')"
                        },
                        "file_path": {
                            "type": "string",
                            "description": "Optional: specific file path to get diagnostics for"
                        }
                    },
                    "required": ["workspace"]
                }),
            },
            Tool {
                name: "trigger_compilation".to_string(),
                description: Some(
                    "Trigger compilation and return diagnostics once the server settles"
                        .to_string(),
                ),
                input_schema: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "workspace": {
                            "type": "string",
                            "description": "Workspace name (e.g., 'metals')"
                        },
                        "workspace_root": {
                            "type": "string",
                            "description": "Optional: root directory for lazily connecting a new workspace"
                        }
                    },
                    "required": ["workspace"]
                }),
            },
            Tool {
                name: "get_hover".to_string(),
                description: Some(
                    "Get type information, documentation, and signatures for a symbol at a \
                     specific position. Use this to look up method signatures and type \
                     definitions without searching through code."
                        .to_string(),
                ),
                input_schema: position_schema(),
            },
            Tool {
                name: "get_definition".to_string(),
                description: Some(
                    "Find where the symbol at a position is defined. Returns the target \
                     file path with a 1-indexed line."
                        .to_string(),
                ),
                input_schema: position_schema(),
            },
        ]
    }

    fn call_tool(
        &self,
        name: &str,
        arguments: Option<serde_json::Value>,
    ) -> Result<CallToolResult> {
        debug!("tool call: {}", name);

        match name {
            "list_workspaces" => {
                let workspaces = self.bridge.list_workspaces();
                Self::json_result(&serde_json::json!({
                    "workspaces": workspaces,
                    "count": workspaces.len(),
                }))
            }
            "get_status" => {
                let input: StatusInput = Self::parse(arguments.or_else(|| Some(serde_json::json!({}))))?;
                let statuses = self
                    .runtime
                    .block_on(self.bridge.get_status(input.workspace.as_deref()))?;
                Self::json_result(&statuses)
            }
            "get_diagnostics" => {
                let input: DiagnosticsInput = Self::parse(arguments)?;
                let report = self.runtime.block_on(
                    self.bridge
                        .get_diagnostics(&input.workspace, input.file_path.as_deref()),
                )?;
                Self::json_result(&report)
            }
            "trigger_compilation" => {
                let input: CompilationInput = Self::parse(arguments)?;
                let report = self.runtime.block_on(
                    self.bridge
                        .trigger_compilation(&input.workspace, input.workspace_root.as_deref()),
                )?;
                Self::json_result(&report)
            }
            "get_hover" => {
                let input: PositionInput = Self::parse(arguments)?;
                let text = self.runtime.block_on(self.bridge.get_hover(
                    &input.workspace,
                    &input.file_path,
                    input.line,
                    input.character,
                ))?;
                Ok(CallToolResult::text(text))
            }
            "get_definition" => {
                let input: PositionInput = Self::parse(arguments)?;
                let locations = self.runtime.block_on(self.bridge.get_definition(
                    &input.workspace,
                    &input.file_path,
                    input.line,
                    input.character,
                ))?;
                Self::json_result(&locations)
            }
            _ => Err(anyhow!("Unknown tool: {name}")),
        }
    }
}

fn position_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "workspace": {
                "type": "string",
                "description": "Workspace name (e.g., 'metals')"
            },
            "file_path": {
                "type": "string",
                "description": "Absolute path to the file"
            },
            "line": {
                "type": "integer",
                "description": "Line number (1-indexed, as shown in editors)"
            },
            "character": {
                "type": "integer",
                "description": "Character/column position (0-indexed)"
            }
        },
        "required": ["workspace", "file_path", "line", "character"]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Timeouts;
    use crate::lsp::WorkspaceRegistry;
    use std::collections::HashMap;

    fn handler() -> LspBridgeHandler {
        let registry = Arc::new(WorkspaceRegistry::new(HashMap::new(), Timeouts::default()));
        LspBridgeHandler::new(
            Arc::new(LspBridge::new(registry, Timeouts::default())),
            Handle::current(),
        )
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn lists_all_six_tools() {
        let tools = handler().list_tools();
        let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "list_workspaces",
                "get_status",
                "get_diagnostics",
                "trigger_compilation",
                "get_hover",
                "get_definition"
            ]
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn list_workspaces_reports_count() -> Result<()> {
        let handler = handler();
        let result = tokio::task::spawn_blocking(move || {
            handler.call_tool("list_workspaces", None)
        })
        .await??;

        let text = match &result.content[0] {
            crate::mcp::ToolContent::Text { text } => text.clone(),
        };
        let value: serde_json::Value = serde_json::from_str(&text)?;
        assert_eq!(value["count"], 0);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn missing_arguments_rejected() {
        let handler = handler();
        let result =
            tokio::task::spawn_blocking(move || handler.call_tool("get_hover", None)).await;
        assert!(matches!(result, Ok(Err(_))));
    }
}
