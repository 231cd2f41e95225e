//! Tool dispatch: validate, translate, execute, package.

mod args;
mod backend;

pub use args::{validate, ArgValue, ToolArgs};
pub use backend::{Backend, HttpBackend};

use crate::error::ToolError;
use crate::tool_registry;
use crate::translate::{self, Action};
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// One block of a tool result.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Actions executed (or proposed, in dry-run mode).
    Actions { actions: Vec<Action> },
    /// Backend response body for the action at `path`.
    Data { path: String, body: Value },
}

/// Result of a successful tool call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCallResult {
    content: Vec<ContentBlock>,
}

impl ToolCallResult {
    pub fn new(content: Vec<ContentBlock>) -> Self {
        Self { content }
    }

    pub fn content(&self) -> &[ContentBlock] {
        &self.content
    }

    pub fn actions(&self) -> impl Iterator<Item = &Action> {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Actions { actions } => Some(actions),
                ContentBlock::Data { .. } => None,
            })
            .flatten()
    }
}

/// Stateless tool executor shared by every session.
pub struct ToolDispatcher {
    backend: Arc<dyn Backend>,
    dry_run: bool,
}

impl ToolDispatcher {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            dry_run: false,
        }
    }

    /// Return proposed actions without calling the backend.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Execute `tool_name` with `raw_args`.
    ///
    /// Unknown tools and invalid arguments fail before any backend call.
    /// Actions run sequentially; the first backend failure aborts the call.
    #[instrument(skip(self, raw_args, cancel), fields(dry_run = self.dry_run))]
    pub async fn execute(
        &self,
        tool_name: &str,
        raw_args: Option<&Map<String, Value>>,
        cancel: &CancellationToken,
    ) -> Result<ToolCallResult, ToolError> {
        let tool = tool_registry::get_tool(tool_name)
            .ok_or_else(|| ToolError::UnknownTool(tool_name.to_string()))?;
        let empty = Map::new();
        let args = validate(tool, raw_args.unwrap_or(&empty))?;
        let actions = translate::translate(tool.name, &args, Utc::now())?;
        debug!(actions = actions.len(), "Translated tool call");

        let mut content = vec![ContentBlock::Actions {
            actions: actions.clone(),
        }];
        if self.dry_run {
            return Ok(ToolCallResult::new(content));
        }

        for action in &actions {
            if cancel.is_cancelled() {
                return Err(ToolError::Cancelled);
            }
            match self.backend.execute(action, cancel).await {
                Ok(body) => content.push(ContentBlock::Data {
                    path: action.path.clone(),
                    body,
                }),
                Err(e) => {
                    warn!(path = %action.path, error = %e, "Backend call failed");
                    return Err(e);
                }
            }
        }
        Ok(ToolCallResult::new(content))
    }
}

/// Render a block the way MCP text content carries it.
pub fn block_to_json(block: &ContentBlock) -> Value {
    match block {
        ContentBlock::Actions { actions } => json!({ "type": "actions", "actions": actions }),
        ContentBlock::Data { body, .. } => body.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingBackend {
        calls: Mutex<Vec<String>>,
        fail_with: Option<ToolError>,
    }

    #[async_trait]
    impl Backend for RecordingBackend {
        async fn execute(
            &self,
            action: &Action,
            _cancel: &CancellationToken,
        ) -> Result<Value, ToolError> {
            self.calls
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(action.relative_url());
            match &self.fail_with {
                Some(e) => Err(e.clone()),
                None => Ok(json!({"value": [{"Id": 42}]})),
            }
        }
    }

    fn args(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn dispatcher(backend: Arc<RecordingBackend>) -> ToolDispatcher {
        ToolDispatcher::new(backend)
    }

    #[tokio::test]
    async fn unknown_tool_makes_no_backend_call() {
        let backend = Arc::new(RecordingBackend::default());
        let err = dispatcher(backend.clone())
            .execute("inmate_escape", None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, ToolError::UnknownTool("inmate_escape".to_string()));
        assert!(backend.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_required_makes_no_backend_call() {
        let backend = Arc::new(RecordingBackend::default());
        let raw = args(json!({"q": "Doe", "top": 5}));
        let err = dispatcher(backend.clone())
            .execute("inmate_simple_search", Some(&raw), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { ref field, .. } if field == "firstName"));
        assert!(backend.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn result_carries_actions_then_data() {
        let backend = Arc::new(RecordingBackend::default());
        let raw = args(json!({"id": 42}));
        let result = dispatcher(backend.clone())
            .execute("inmate_get_details", Some(&raw), &CancellationToken::new())
            .await
            .unwrap();

        let actions: Vec<_> = result.actions().collect();
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].path, "/odata/CSDetentionPerson");
        assert_eq!(actions[0].filter(), Some("Id eq 42"));
        assert_eq!(
            result.content()[1],
            ContentBlock::Data {
                path: "/odata/CSDetentionPerson".to_string(),
                body: json!({"value": [{"Id": 42}]}),
            }
        );
        assert_eq!(
            *backend.calls.lock().unwrap(),
            vec!["/odata/CSDetentionPerson?$filter=Id%20eq%2042".to_string()]
        );
    }

    #[tokio::test]
    async fn dry_run_only_proposes() {
        let backend = Arc::new(RecordingBackend::default());
        let raw = args(json!({"id": 3}));
        let result = dispatcher(backend.clone())
            .with_dry_run(true)
            .execute("inmate_get_visits", Some(&raw), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.content().len(), 1);
        assert!(backend.calls.lock().unwrap().is_empty());
        let rendered = block_to_json(&result.content()[0]);
        assert_eq!(rendered["type"], json!("actions"));
        assert_eq!(rendered["actions"][0]["path"], json!("/odata/CSVisit"));
    }

    #[tokio::test]
    async fn backend_error_is_propagated_with_status() {
        let backend = Arc::new(RecordingBackend {
            fail_with: Some(ToolError::BackendError {
                status: 500,
                body: "boom".to_string(),
            }),
            ..Default::default()
        });
        let raw = args(json!({"id": 1}));
        let err = dispatcher(backend)
            .execute("inmate_get_convictions", Some(&raw), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ToolError::BackendError {
                status: 500,
                body: "boom".to_string()
            }
        );
    }

    #[tokio::test]
    async fn cancelled_token_skips_backend() {
        let backend = Arc::new(RecordingBackend::default());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let raw = args(json!({"id": 1}));
        let err = dispatcher(backend.clone())
            .execute("inmate_get_details", Some(&raw), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err, ToolError::Cancelled);
        assert!(backend.calls.lock().unwrap().is_empty());
    }
}
