//! MCP server over stdio.

use crate::backend::BackendConfig;
use crate::error::ToolCallError;
use crate::orchestrator::{Orchestrator, ToolResponse};
use crate::tools::{ToolDescriptor, ToolRouter};

use anyhow::Context as _;
use rmcp::model::{
    CallToolRequestParams, CallToolResult, Content, ErrorData, Implementation,
    ListToolsResult, PaginatedRequestParams, ServerCapabilities, ServerInfo, Tool,
};
use rmcp::service::{RequestContext, RoleServer};
use rmcp::{ServerHandler, ServiceExt as _};
use serde_json::{Map, Value};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::task::TaskTracker;

/// Serves one backend's tools to a single MCP client.
///
/// Calls run on a shared [`TaskTracker`] so they outlive the transport: when
/// the client closes stdin, pending subprocess work still finishes and is
/// reaped before the process exits.
#[derive(Clone)]
pub struct AgentServer {
    router: ToolRouter,
    tracker: TaskTracker,
}

impl AgentServer {
    pub fn new(router: ToolRouter, tracker: TaskTracker) -> Self {
        Self { router, tracker }
    }

    async fn dispatch(
        &self,
        name: String,
        arguments: Map<String, Value>,
    ) -> Result<CallToolResult, ErrorData> {
        let router = self.router.clone();
        self.run_tracked(async move { router.call(&name, &arguments).await })
            .await
    }

    /// Run a call on the tracker so it outlives the transport. A panicking
    /// call becomes an internal error for that request only.
    async fn run_tracked<F>(&self, call: F) -> Result<CallToolResult, ErrorData>
    where
        F: Future<Output = Result<ToolResponse, ToolCallError>> + Send + 'static,
    {
        match self.tracker.spawn(call).await {
            Ok(Ok(response)) => Ok(into_call_result(response)),
            Ok(Err(error @ ToolCallError::UnknownTool(_))) => {
                tracing::warn!(%error, "rejected call");
                Err(ErrorData::invalid_params(error.to_string(), None))
            }
            Err(error) => {
                tracing::error!(%error, "tool call task failed");
                Err(ErrorData::internal_error(
                    format!("tool call failed: {error}"),
                    None,
                ))
            }
        }
    }
}

impl ServerHandler for AgentServer {
    fn get_info(&self) -> ServerInfo {
        let mut info = ServerInfo::default();
        info.capabilities = ServerCapabilities::builder().enable_tools().build();
        info.server_info = Implementation::new("mcp-agents", env!("CARGO_PKG_VERSION"))
            .with_description("Coding-agent CLIs exposed as MCP tools");
        info
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<ListToolsResult, ErrorData>> + Send + '_ {
        let tools = self.router.tools().into_iter().map(into_rmcp_tool).collect();
        std::future::ready(Ok(ListToolsResult::with_all_items(tools)))
    }

    fn call_tool(
        &self,
        request: CallToolRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<CallToolResult, ErrorData>> + Send + '_ {
        let name = request.name.into_owned();
        let arguments = request.arguments.unwrap_or_default();
        self.dispatch(name, arguments)
    }
}

fn into_rmcp_tool(descriptor: ToolDescriptor) -> Tool {
    Tool::new(
        descriptor.name,
        descriptor.description,
        Arc::new(descriptor.input_schema),
    )
}

fn into_call_result(response: ToolResponse) -> CallToolResult {
    let content = vec![Content::text(response.text)];
    if response.is_error {
        CallToolResult::error(content)
    } else {
        CallToolResult::success(content)
    }
}

/// Serve `backend` on stdin/stdout until the client disconnects, then wait
/// for in-flight calls to finish.
pub async fn serve_stdio(backend: BackendConfig, default_timeout: Duration) -> anyhow::Result<()> {
    let provider = backend.kind.provider();
    let tracker = TaskTracker::new();
    let router = ToolRouter::new(Arc::new(Orchestrator::new(backend, default_timeout)));
    let server = AgentServer::new(router, tracker.clone());

    tracing::info!("[mcp-agents] ready (provider: {provider})");

    let service = server
        .serve(rmcp::transport::stdio())
        .await
        .context("failed to initialize MCP session on stdio")?;

    let quit_reason = service
        .waiting()
        .await
        .context("MCP service task failed")?;

    tracing::info!(
        ?quit_reason,
        in_flight = tracker.len(),
        "client disconnected, draining in-flight calls"
    );
    tracker.close();
    tracker.wait().await;
    tracing::info!(%provider, "shutdown complete");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendKind;

    use serde_json::json;

    fn server(kind: BackendKind, command: &str) -> AgentServer {
        let backend = BackendConfig::new(kind).with_command(command);
        let router = ToolRouter::new(Arc::new(Orchestrator::new(
            backend,
            Duration::from_secs(5),
        )));
        AgentServer::new(router, TaskTracker::new())
    }

    fn text_of(result: &CallToolResult) -> String {
        result
            .content
            .iter()
            .filter_map(|content| content.as_text().map(|text| text.text.clone()))
            .collect()
    }

    #[test]
    fn advertises_tools_capability() {
        let info = server(BackendKind::Claude, "claude").get_info();
        assert_eq!(info.server_info.name, "mcp-agents");
        assert!(info.capabilities.tools.is_some());
    }

    #[test]
    fn descriptors_convert_to_protocol_tools() {
        let server = server(BackendKind::Gemini, "gemini");
        let tools: Vec<Tool> = server
            .router
            .tools()
            .into_iter()
            .map(into_rmcp_tool)
            .collect();

        assert_eq!(tools[0].name, "gemini");
        assert_eq!(tools[0].input_schema["required"], json!(["prompt"]));
        assert_eq!(tools[1].name, "ping");
    }

    #[tokio::test]
    async fn ping_round_trips_through_dispatch() {
        let server = server(BackendKind::Claude, "/nonexistent/mcp-agents-claude");
        let result = server
            .dispatch("ping".into(), Map::new())
            .await
            .expect("ping succeeds");

        assert_ne!(result.is_error, Some(true));
        assert_eq!(text_of(&result), "pong");
    }

    #[tokio::test]
    async fn backend_failure_is_a_tool_error_not_a_protocol_error() {
        let server = server(BackendKind::Gemini, "/nonexistent/mcp-agents-gemini");
        let mut arguments = Map::new();
        arguments.insert("prompt".into(), json!("hello"));

        let result = server
            .dispatch("gemini".into(), arguments)
            .await
            .expect("failures are reported in the result");

        assert_eq!(result.is_error, Some(true));
        assert!(text_of(&result).contains("failed to start"));
    }

    #[tokio::test]
    async fn unknown_tool_is_invalid_params() {
        let server = server(BackendKind::Gemini, "gemini");
        let error = server
            .dispatch("codex".into(), Map::new())
            .await
            .expect_err("unknown tool");
        assert!(error.message.contains("unknown tool 'codex'"));
    }

    async fn exploding_call() -> Result<ToolResponse, ToolCallError> {
        panic!("backend handler exploded")
    }

    #[tokio::test]
    async fn panicking_call_becomes_internal_error() {
        let server = server(BackendKind::Claude, "claude");
        let error = server
            .run_tracked(exploding_call())
            .await
            .expect_err("panic is reported");

        assert!(error.message.contains("tool call failed"));

        let after = server
            .dispatch("ping".into(), Map::new())
            .await
            .expect("server keeps serving");
        assert_eq!(text_of(&after), "pong");
    }

    #[tokio::test]
    async fn tracker_waits_for_in_flight_calls() {
        let server = server(BackendKind::Claude, "claude");
        let tracker = server.tracker.clone();

        let call = tokio::spawn({
            let server = server.clone();
            async move { server.dispatch("ping".into(), Map::new()).await }
        });
        let result = call.await.expect("join").expect("ping");
        assert_eq!(text_of(&result), "pong");

        tracker.close();
        tokio::time::timeout(Duration::from_secs(1), tracker.wait())
            .await
            .expect("tracker drains once calls finish");
    }
}
