//! MCP server exposing the inmate registry tools.

mod channel;

pub use channel::{from_mcp_level, logging_notification, to_mcp_level, PeerChannel};

use crate::dispatch::{block_to_json, ToolCallResult, ToolDispatcher};
use crate::error::{SessionError, ToolError};
use crate::session::{SessionChannel, SessionSupervisor};
use crate::tool_registry::{self, ToolInfo};
use rmcp::model::{
    CallToolRequestParams, CallToolResult, Content, ListToolsResult, PaginatedRequestParams,
    ServerCapabilities, ServerInfo, SetLevelRequestParams, SubscribeRequestParams, Tool,
    UnsubscribeRequestParams,
};
use rmcp::service::{NotificationContext, Peer, RequestContext, RoleServer};
use rmcp::{ErrorData as McpError, ServerHandler};
use std::borrow::Cow;
use std::future::Future;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, instrument, warn};

/// How often a session checks whether its transport went away.
const TRANSPORT_POLL: Duration = Duration::from_millis(200);

/// Header carrying the streamable HTTP session id.
const SESSION_ID_HEADER: &str = "mcp-session-id";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServerMode {
    Stdio,
    Http,
    /// Streamable HTTP without sessions: no subscriptions, no notifiers.
    HttpStateless,
}

impl ServerMode {
    pub fn is_stateful(&self) -> bool {
        !matches!(self, ServerMode::HttpStateless)
    }
}

/// One MCP connection. Dropping it ends the session it supervises.
pub struct InmateMcpServer {
    dispatcher: Arc<ToolDispatcher>,
    supervisor: SessionSupervisor,
    mode: ServerMode,
    session_id: OnceLock<String>,
    session_cancel: CancellationToken,
    _end_session_on_drop: DropGuard,
}

impl InmateMcpServer {
    /// `shutdown` is the process-wide token; the session token is its child.
    pub fn new(
        dispatcher: Arc<ToolDispatcher>,
        supervisor: SessionSupervisor,
        mode: ServerMode,
        shutdown: &CancellationToken,
    ) -> Self {
        let session_cancel = shutdown.child_token();
        Self {
            dispatcher,
            supervisor,
            mode,
            session_id: OnceLock::new(),
            _end_session_on_drop: session_cancel.clone().drop_guard(),
            session_cancel,
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.get().map(String::as_str)
    }

    fn instructions(&self) -> String {
        let subscriptions = if self.mode.is_stateful() {
            "Subscribe to resource URIs to receive notifications/resources/updated; \
             logging/setLevel controls which server log messages are forwarded."
        } else {
            "This endpoint is stateless: resource subscriptions and log notifications \
             are not available."
        };
        format!(
            "Inmate registry gateway. Tools translate typed queries into OData requests \
             against the registry backend and return the executed actions followed by \
             the backend data.\
             \n\nTools:\
             \n- inmate_simple_search: find inmates by first and last name (plus optional filters)\
             \n- inmate_get_details: full record for an inmate id\
             \n- inmate_get_convictions: convictions for an inmate id\
             \n- inmate_get_visits: visits for an inmate id within an optional date range\
             \n\n{subscriptions}"
        )
    }

    fn active_session(&self) -> Result<&str, McpError> {
        if !self.mode.is_stateful() {
            return Err(McpError::invalid_params(
                "subscriptions require a stateful session",
                None,
            ));
        }
        self.session_id()
            .ok_or_else(|| McpError::invalid_params("session is not active", None))
    }

    /// Hand this connection's lifetime to the supervisor.
    fn start_session(&self, peer: Peer<RoleServer>, transport_id: Option<String>) {
        let session_id = if self.mode.is_stateful() {
            let id = transport_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            if self.session_id.set(id.clone()).is_err() {
                warn!(session_id = %id, "Session already started on this connection");
                return;
            }
            Some(id)
        } else {
            None
        };

        let supervisor = self.supervisor.clone();
        let cancel = self.session_cancel.clone();
        let channel: Arc<dyn SessionChannel> = Arc::new(PeerChannel::new(peer.clone()));
        tokio::spawn(supervise_connection(
            supervisor,
            session_id,
            channel,
            cancel,
            |token| wait_for_disconnect(peer, token),
        ));
    }
}

/// Run the connection's session, then cancel the connection token so
/// in-flight tool calls stop once the session is gone.
async fn supervise_connection<P, Fut>(
    supervisor: SessionSupervisor,
    session_id: Option<String>,
    channel: Arc<dyn SessionChannel>,
    cancel: CancellationToken,
    protocol: P,
) where
    P: FnOnce(CancellationToken) -> Fut + Send,
    Fut: Future<Output = ()> + Send,
{
    let result = supervisor
        .run_session(session_id.as_deref(), channel, cancel.clone(), protocol)
        .await;
    match result {
        Ok(end) => debug!(session_id = ?session_id, end = %end, "Session ended"),
        Err(e) => warn!(session_id = ?session_id, error = %e, "Session failed"),
    }
    cancel.cancel();
}

async fn wait_for_disconnect(peer: Peer<RoleServer>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(TRANSPORT_POLL) => {
                if peer.is_transport_closed() {
                    return;
                }
            }
        }
    }
}

fn transport_session_id(context: &NotificationContext<RoleServer>) -> Option<String> {
    context
        .extensions
        .get::<hyper::http::request::Parts>()
        .and_then(|parts| parts.headers.get(SESSION_ID_HEADER))
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn make_tool(info: &ToolInfo) -> Tool {
    Tool {
        name: Cow::Borrowed(info.name),
        title: Some(info.title.to_string()),
        description: Some(Cow::Borrowed(info.full_desc)),
        input_schema: Arc::new(info.input_schema()),
        output_schema: None,
        annotations: None,
        icons: None,
        meta: None,
    }
}

/// Tool definitions advertised by `tools/list`.
pub fn tool_definitions() -> Vec<Tool> {
    tool_registry::all_tools().map(make_tool).collect()
}

/// Map a dispatch outcome onto the MCP response.
///
/// Client errors become protocol errors; backend failures become tool
/// results flagged `is_error`.
pub fn into_call_result(
    outcome: Result<ToolCallResult, ToolError>,
) -> Result<CallToolResult, McpError> {
    match outcome {
        Ok(result) => {
            let content = result
                .content()
                .iter()
                .map(|block| {
                    let json = block_to_json(block);
                    Content::text(
                        serde_json::to_string_pretty(&json).unwrap_or_else(|_| json.to_string()),
                    )
                })
                .collect();
            Ok(CallToolResult::success(content))
        }
        Err(e) if e.is_client_error() => Err(e.to_mcp_error()),
        Err(e) => Ok(e.to_tool_result()),
    }
}

fn session_error(e: SessionError) -> McpError {
    match e {
        SessionError::NotFound(_) => McpError::invalid_params("session is not active", None),
        other => other.to_mcp_error(),
    }
}

impl ServerHandler for InmateMcpServer {
    fn get_info(&self) -> ServerInfo {
        let capabilities = if self.mode.is_stateful() {
            ServerCapabilities::builder()
                .enable_tools()
                .enable_logging()
                .enable_resources()
                .enable_resources_subscribe()
                .build()
        } else {
            ServerCapabilities::builder().enable_tools().build()
        };
        ServerInfo {
            capabilities,
            instructions: Some(self.instructions()),
            ..Default::default()
        }
    }

    async fn on_initialized(&self, context: NotificationContext<RoleServer>) {
        let transport_id = transport_session_id(&context);
        self.start_session(context.peer, transport_id);
    }

    async fn list_tools(
        &self,
        _params: Option<PaginatedRequestParams>,
        _ctx: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        Ok(ListToolsResult {
            tools: tool_definitions(),
            next_cursor: None,
            meta: None,
        })
    }

    #[instrument(skip_all, fields(tool = %params.name, session_id = ?self.session_id()))]
    async fn call_tool(
        &self,
        params: CallToolRequestParams,
        ctx: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        info!("Tool call");
        let cancel = self.session_cancel.child_token();
        let outcome = tokio::select! {
            _ = ctx.ct.cancelled() => {
                cancel.cancel();
                Err(ToolError::Cancelled)
            }
            res = self.dispatcher.execute(&params.name, params.arguments.as_ref(), &cancel) => res,
        };
        if let Err(e) = &outcome {
            debug!(error = %e, "Tool call failed");
        }
        into_call_result(outcome)
    }

    async fn subscribe(
        &self,
        request: SubscribeRequestParams,
        _ctx: RequestContext<RoleServer>,
    ) -> Result<(), McpError> {
        let session_id = self.active_session()?;
        let added = self
            .supervisor
            .registry()
            .subscribe(session_id, &request.uri)
            .map_err(session_error)?;
        debug!(session_id = %session_id, uri = %request.uri, added, "Subscribe");
        Ok(())
    }

    async fn unsubscribe(
        &self,
        request: UnsubscribeRequestParams,
        _ctx: RequestContext<RoleServer>,
    ) -> Result<(), McpError> {
        let session_id = self.active_session()?;
        let removed = self
            .supervisor
            .registry()
            .unsubscribe(session_id, &request.uri)
            .map_err(session_error)?;
        debug!(session_id = %session_id, uri = %request.uri, removed, "Unsubscribe");
        Ok(())
    }

    async fn set_level(
        &self,
        request: SetLevelRequestParams,
        _ctx: RequestContext<RoleServer>,
    ) -> Result<(), McpError> {
        let level = from_mcp_level(request.level);
        if self.supervisor.log_hub().set_level(level) {
            info!(level = %level, "Client log level changed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::ContentBlock;
    use crate::logging::LogHub;
    use crate::session::testing::RecordingChannel;
    use crate::session::SessionRegistry;
    use crate::translate::Action;
    use serde_json::json;

    fn server(mode: ServerMode) -> InmateMcpServer {
        struct NoBackend;
        #[async_trait::async_trait]
        impl crate::dispatch::Backend for NoBackend {
            async fn execute(
                &self,
                _action: &Action,
                _cancel: &CancellationToken,
            ) -> Result<serde_json::Value, ToolError> {
                Err(ToolError::BackendUnavailable("test".into()))
            }
        }
        InmateMcpServer::new(
            Arc::new(ToolDispatcher::new(Arc::new(NoBackend))),
            SessionSupervisor::new(SessionRegistry::new(), Arc::new(LogHub::default())),
            mode,
            &CancellationToken::new(),
        )
    }

    #[test]
    fn lists_every_catalog_tool_with_schema() {
        let tools = tool_definitions();
        assert_eq!(tools.len(), tool_registry::TOOL_REGISTRY.len());
        let search = tools
            .iter()
            .find(|t| t.name == "inmate_simple_search")
            .unwrap();
        assert_eq!(
            search.input_schema.get("required"),
            Some(&json!(["firstName", "lastName"]))
        );
    }

    #[test]
    fn client_errors_become_protocol_errors() {
        let err = into_call_result(Err(ToolError::invalid("firstName", "missing"))).unwrap_err();
        assert_eq!(err.data, Some(json!({"field": "firstName"})));
        assert!(into_call_result(Err(ToolError::UnknownTool("x".into()))).is_err());
    }

    #[test]
    fn backend_errors_become_error_results() {
        let result = into_call_result(Err(ToolError::BackendError {
            status: 502,
            body: "bad gateway".into(),
        }))
        .unwrap();
        assert_eq!(result.is_error, Some(true));
    }

    #[test]
    fn success_renders_actions_then_data() {
        let outcome = ToolCallResult::new(vec![
            ContentBlock::Actions {
                actions: vec![Action::get("/odata/CSVisit")],
            },
            ContentBlock::Data {
                path: "/odata/CSVisit".into(),
                body: json!({"value": []}),
            },
        ]);
        let result = into_call_result(Ok(outcome)).unwrap();
        assert_eq!(result.is_error, Some(false));
        assert_eq!(result.content.len(), 2);
        let rendered = serde_json::to_string(&result.content).unwrap();
        assert!(rendered.contains("actions"));
        assert!(rendered.contains("/odata/CSVisit"));
    }

    #[test]
    fn stateless_mode_refuses_subscriptions() {
        let stateless = server(ServerMode::HttpStateless);
        assert!(stateless.active_session().is_err());
        assert!(stateless.get_info().capabilities.resources.is_none());

        let stateful = server(ServerMode::Http);
        assert!(stateful.active_session().is_err());
        assert!(stateful.get_info().capabilities.logging.is_some());
    }

    #[tokio::test]
    async fn session_ending_on_its_own_cancels_connection() {
        let supervisor =
            SessionSupervisor::new(SessionRegistry::new(), Arc::new(LogHub::default()));
        let registry = Arc::clone(supervisor.registry());
        let shutdown = CancellationToken::new();
        let cancel = shutdown.child_token();
        let in_flight = cancel.child_token();

        tokio::time::timeout(
            Duration::from_secs(5),
            supervise_connection(
                supervisor,
                Some("s1".to_string()),
                Arc::new(RecordingChannel::default()),
                cancel.clone(),
                |_| async move {
                    registry.deregister("s1");
                    std::future::pending::<()>().await;
                },
            ),
        )
        .await
        .expect("session ended promptly");

        assert!(cancel.is_cancelled());
        assert!(in_flight.is_cancelled());
        assert!(!shutdown.is_cancelled());
    }

    #[test]
    fn dropping_server_cancels_session() {
        let shutdown = CancellationToken::new();
        let s = InmateMcpServer::new(
            server(ServerMode::Stdio).dispatcher.clone(),
            SessionSupervisor::new(SessionRegistry::new(), Arc::new(LogHub::default())),
            ServerMode::Stdio,
            &shutdown,
        );
        let token = s.session_cancel.clone();
        drop(s);
        assert!(token.is_cancelled());
        assert!(!shutdown.is_cancelled());
    }
}
