//! The LLM client contract (consumed, out of scope per `SPEC_FULL.md` §1/§6).
//! Styled on `cloudllm::client_wrapper::ClientWrapper`'s `async_trait`
//! shape, with the method surface `SPEC_FULL.md` §6 names instead of the
//! teacher's own. `ContextLimitError` (a raised exception in the Python
//! source) is modeled as a tagged `LLMOutcome` variant instead, per
//! `SPEC_FULL.md` §9's re-architecture guidance.

use async_trait::async_trait;

use crate::agentloom::types::{Message, UsageCounters};

/// A tool definition exposed to the LLM for one server.
#[derive(Debug, Clone)]
pub struct ToolDef {
    pub name: String,
    pub description: String,
    pub schema: serde_json::Value,
}

/// A server's full set of tool definitions, as returned by
/// `ToolRegistry::get_all_tool_definitions`.
#[derive(Debug, Clone)]
pub struct ServerDef {
    pub name: String,
    pub tools: Vec<ToolDef>,
}

/// Streaming callback driven by `LLMClient::create_message` roughly every
/// ~100ms with accumulated buffer content. Returns nothing; whether to keep
/// streaming is controlled entirely by the client's own loop. Implementors
/// typically run the chunk through a `KeyTokenInterceptor` before emitting
/// it onward as an event.
#[async_trait]
pub trait StreamCallback: Send + Sync {
    async fn on_delta(&self, delta: &str, is_last: bool);
}

/// The raw LLM response, opaque to the orchestration core beyond what
/// `process_llm_response`/`extract_tool_calls_info` choose to expose.
pub struct Response {
    pub assistant_text: String,
    /// Native tool-calls list, if the provider used function-calling.
    pub native_tool_calls: Vec<crate::agentloom::parser::NativeToolCall>,
    /// Structured output items, if the provider used the responses API shape.
    pub output_items: Vec<crate::agentloom::parser::OutputItem>,
}

/// Outcome of one `create_message` call. Models the Python source's
/// exception-based control flow (`ContextLimitError`, timeouts, generic
/// exceptions) as data instead, per the Design Notes re-architecture
/// guidance.
pub enum LLMOutcome {
    Ok(Response),
    /// The provider signalled a context-window overflow.
    ContextLimit,
    /// Network error, rate limit, empty response — retryable by
    /// `SummaryWithRetry`, fatal to a normal turn.
    Transient(String),
    /// A timeout elapsed waiting for the provider.
    Timeout,
}

/// The LLM client contract consumed by `LLMCallRunner`. Not implemented by
/// this crate (no LLM implementation, per Non-goals) — callers supply a
/// concrete adapter.
#[async_trait]
pub trait LLMClient: Send + Sync {
    /// Streams one completion. Must invoke `stream_callback` with every
    /// delta it receives and again with `is_last = true` on completion.
    async fn create_message(
        &self,
        system_prompt: &str,
        history: &[Message],
        tool_definitions: &[ServerDef],
        keep_tool_result: i64,
        step_id: &str,
        agent_type: &str,
        stream_callback: &dyn StreamCallback,
    ) -> LLMOutcome;

    /// Appends the assistant message to `history` and reports whether no
    /// tools will be called (`should_break`).
    fn process_llm_response(
        &self,
        response: &Response,
        history: &mut Vec<Message>,
        agent_type: &str,
    ) -> (Option<String>, bool);

    /// Returns parser input for `ToolCallParser`: native calls, output
    /// items, or an empty pair if the response used XML blocks (in which
    /// case the caller parses `assistant_text` directly).
    fn extract_tool_calls_info(
        &self,
        response: &Response,
        assistant_text: &str,
    ) -> (
        Vec<crate::agentloom::parser::NativeToolCall>,
        Vec<crate::agentloom::parser::OutputItem>,
    );

    /// Performs the tool-result merge described in `SPEC_FULL.md` §4.5.1,
    /// appending the merged message to `history` and returning it.
    fn update_message_history(
        &self,
        history: &mut Vec<Message>,
        results: &[(Option<String>, String)],
        exceeded: bool,
    );

    /// May pull the last user message's text into the summary prompt,
    /// mirroring `handle_max_turns_reached_summary_prompt`.
    fn handle_max_turns_reached_summary_prompt(&self, history: &[Message], prompt: &str) -> String;

    /// Point-in-time snapshot of this client's usage counters.
    fn get_usage(&self) -> UsageCounters;
}
