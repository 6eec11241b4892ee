//! MCP stdio server exposing the research tools.

use std::sync::Arc;

use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{CallToolResult, ServerCapabilities, ServerInfo};
use rmcp::transport::stdio;
use rmcp::{tool, tool_handler, tool_router, ErrorData as McpError, ServiceExt};
use serde::Serialize;
use tracing::{error, info};

use dr_core::Error;

use crate::service::{FollowUpArgs, ResearchService, StartOrPollArgs};

const INSTRUCTIONS: &str = "Gemini Deep Research. Start a job with `deep_research` \
(prompt), check on or keep waiting for it with `deep_research` (job_id), then ask \
questions about the finished report with `deep_research_followup`. Research \
typically takes 10-20 minutes; a call that times out returns the running job's \
status so it can be resumed with its job_id.";

fn to_mcp_error(err: Error) -> McpError {
    if err.is_invalid_argument() {
        McpError::invalid_params(err.to_string(), None)
    } else {
        error!(
            error = %err,
            retryable = err.is_retryable(),
            auth = err.is_auth_error(),
            "Tool call failed"
        );
        McpError::internal_error(err.to_string(), None)
    }
}

/// Structured content only; clients that echo `content` would otherwise print the payload twice.
fn structured_result<T: Serialize>(payload: &T) -> Result<CallToolResult, McpError> {
    let value = serde_json::to_value(payload)
        .map_err(|e| McpError::internal_error(e.to_string(), None))?;
    let mut result = CallToolResult::structured(value);
    result.content = Vec::new();
    Ok(result)
}

#[derive(Clone)]
pub struct DeepResearchServer {
    tool_router: ToolRouter<Self>,
    service: Arc<ResearchService>,
}

#[tool_router]
impl DeepResearchServer {
    pub fn new(service: Arc<ResearchService>) -> Self {
        Self {
            tool_router: Self::tool_router(),
            service,
        }
    }

    #[tool(
        description = "Conduct comprehensive web research with Gemini's Deep Research agent. \
Pass `prompt` to start a new job, or `job_id` to check on an existing one (exactly one). \
With `wait` (default true) the call blocks until the job finishes or `timeout_seconds` elapses. \
Returns `job_id`, `status`, `report_text` and `citations`, plus `error` when the job failed."
    )]
    async fn deep_research(
        &self,
        Parameters(args): Parameters<StartOrPollArgs>,
    ) -> Result<CallToolResult, McpError> {
        let output = self
            .service
            .start_or_poll(args)
            .await
            .map_err(to_mcp_error)?;
        structured_result(&output)
    }

    #[tool(
        description = "Ask a follow-up question about a completed deep research job. \
Returns `job_id`, `answer_text` and `citations`, plus `error` when the job failed."
    )]
    async fn deep_research_followup(
        &self,
        Parameters(args): Parameters<FollowUpArgs>,
    ) -> Result<CallToolResult, McpError> {
        let output = self.service.follow_up(args).await.map_err(to_mcp_error)?;
        structured_result(&output)
    }
}

#[tool_handler]
impl rmcp::ServerHandler for DeepResearchServer {
    fn get_info(&self) -> ServerInfo {
        let mut info = ServerInfo::default();
        info.instructions = Some(INSTRUCTIONS.to_string());
        info.capabilities = ServerCapabilities::builder().enable_tools().build();
        info
    }
}

/// Serve over stdin/stdout until the client disconnects.
pub async fn serve_stdio(service: Arc<ResearchService>) -> anyhow::Result<()> {
    info!("Starting Gemini Deep Research MCP server (stdio)");
    let running = DeepResearchServer::new(service).serve(stdio()).await?;
    let reason = running.waiting().await?;
    info!(reason = ?reason, "MCP server stopped");
    Ok(())
}
