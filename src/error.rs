//! Error types for the inmate MCP gateway.
//!
//! Backend failures are returned with `is_error: true` in CallToolResult,
//! while protocol errors (unknown tool name, malformed args) are surfaced as
//! MCP `invalid_params` errors before any backend call is made. Session
//! lifecycle failures surface as MCP errors on the request that hit them.

use rmcp::model::{CallToolResult, Content};
use rmcp::ErrorData as McpError;
use serde_json::json;
use thiserror::Error;

/// Tool dispatch errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid argument `{field}`: {reason}")]
    InvalidArguments { field: String, reason: String },

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Backend returned HTTP {status}")]
    BackendError { status: u16, body: String },

    #[error("Request cancelled")]
    Cancelled,
}

impl ToolError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ToolError::InvalidArguments {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Client errors never reach the backend and are not worth retrying.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ToolError::UnknownTool(_) | ToolError::InvalidArguments { .. }
        )
    }

    /// Convert to MCP CallToolResult with is_error: true
    pub fn to_tool_result(&self) -> CallToolResult {
        let detail = match self {
            ToolError::BackendError { status, body } => json!({
                "error": self.to_string(),
                "status": status,
                "body": body,
            }),
            _ => json!({ "error": self.to_string() }),
        };
        CallToolResult::error(vec![Content::text(detail.to_string())])
    }

    /// Convert a client error into the protocol error rmcp sends back.
    pub fn to_mcp_error(&self) -> McpError {
        match self {
            ToolError::InvalidArguments { field, .. } => {
                McpError::invalid_params(self.to_string(), Some(json!({ "field": field })))
            }
            _ => McpError::invalid_params(self.to_string(), None),
        }
    }
}

impl From<reqwest::Error> for ToolError {
    fn from(e: reqwest::Error) -> Self {
        ToolError::BackendUnavailable(e.to_string())
    }
}

/// Session lifecycle errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Session already active: {0}")]
    DuplicateSession(String),

    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("{notifier} notifier cannot {action} while {state}")]
    NotifierState {
        notifier: &'static str,
        action: &'static str,
        state: &'static str,
    },

    #[error("Session channel closed: {0}")]
    ChannelClosed(String),

    #[error("{notifier} notifier failed: {reason}")]
    NotifierFailed {
        notifier: &'static str,
        reason: String,
    },
}

impl SessionError {
    /// Subscription requests for unknown sessions are client errors.
    pub fn to_mcp_error(&self) -> McpError {
        match self {
            SessionError::NotFound(_) => McpError::invalid_params(self.to_string(), None),
            _ => McpError::internal_error(self.to_string(), None),
        }
    }
}
