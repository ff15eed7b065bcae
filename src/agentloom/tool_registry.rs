//! The tool registry contract (consumed, out of scope per `SPEC_FULL.md`
//! §1/§6). Styled on `cloudllm::tool_protocol::ToolRegistry`'s `HashMap`
//! routing shape, with the spec's own two methods.

use async_trait::async_trait;

use crate::agentloom::llm_client::ServerDef;
use crate::agentloom::types::ToolOutcome;

/// Tool registries never see `agent-*` server names: `AgentLoop` routes
/// those to `SubAgentInvoker` before a call would otherwise reach here
/// (global invariant in `SPEC_FULL.md` §3).
#[async_trait]
pub trait ToolRegistry: Send + Sync {
    async fn get_all_tool_definitions(&self) -> Vec<ServerDef>;

    async fn execute_tool_call(
        &self,
        server_name: &str,
        tool_name: &str,
        arguments: &serde_json::Value,
    ) -> ToolOutcome;
}
