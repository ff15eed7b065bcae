// src/lib.rs

pub mod agentloom;

// Re-exporting key items for easier external access, in the style of the
// teacher crate's top-level re-exports.
pub use agentloom::agent_loop::{AgentLoopDeps, AgentLoopResult, SubAgentContext};
pub use agentloom::config::{OrchestratorConfig, SubAgentConfig};
pub use agentloom::error::OrchestratorError;
pub use agentloom::event::{Event, EventEmitter, EventStream, ToolCallPhase, UsageScene};
pub use agentloom::llm_client::{LLMClient, LLMOutcome, Response, ServerDef, StreamCallback, ToolDef};
pub use agentloom::orchestrator::{AssociatedFile, FileKind, Orchestrator, OrchestratorOutput};
pub use agentloom::parser::{NativeToolCall, OutputItem};
pub use agentloom::prompt::{PromptOptions, PromptProvider, PromptProviders};
pub use agentloom::tool_registry::ToolRegistry;
pub use agentloom::tracer::{NullTracer, SnapshotContext, StepLog, SubAgentHistory, TaskSnapshot, TaskTracer};
pub use agentloom::types::{
    AgentKind, AgentSession, ContentPart, MalformedToolCall, Message, MessageContent, Role,
    ToolCall, ToolOutcome, ToolResult, UsageCounters,
};
