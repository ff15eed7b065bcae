//! In-memory `LLMClient`/`ToolRegistry` test doubles, in the shape of
//! `cloudllm::tool_protocol::tests::MockProtocol`: plain structs returning
//! scripted or canned data, used to drive the end-to-end scenarios in
//! `SPEC_FULL.md` §8 deterministically. Test-only (`#[cfg(test)]`).

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::agentloom::llm_client::{
    LLMClient, LLMOutcome, Response, ServerDef, StreamCallback, ToolDef,
};
use crate::agentloom::parser::{NativeToolCall, OutputItem};
use crate::agentloom::tool_registry::ToolRegistry;
use crate::agentloom::types::{Message, ToolOutcome, UsageCounters};

/// One scripted step of a `MockLLMClient`'s conversation.
pub struct MockLLMStep {
    outcome: ScriptedOutcome,
}

enum ScriptedOutcome {
    Ok {
        assistant_text: String,
        native_tool_calls: Vec<NativeToolCall>,
        output_items: Vec<OutputItem>,
        should_break: bool,
    },
    ContextLimit,
    Transient(String),
    Timeout,
}

impl MockLLMStep {
    /// A plain-text reply with no tool calls.
    pub fn text(text: &str) -> Self {
        MockLLMStep {
            outcome: ScriptedOutcome::Ok {
                assistant_text: text.to_string(),
                native_tool_calls: Vec::new(),
                output_items: Vec::new(),
                should_break: true,
            },
        }
    }

    /// A reply carrying one or more native tool calls.
    pub fn tool_calls(text: &str, calls: Vec<NativeToolCall>) -> Self {
        MockLLMStep {
            outcome: ScriptedOutcome::Ok {
                assistant_text: text.to_string(),
                native_tool_calls: calls,
                output_items: Vec::new(),
                should_break: false,
            },
        }
    }

    pub fn context_limit() -> Self {
        MockLLMStep {
            outcome: ScriptedOutcome::ContextLimit,
        }
    }

    pub fn transient(message: &str) -> Self {
        MockLLMStep {
            outcome: ScriptedOutcome::Transient(message.to_string()),
        }
    }

    pub fn timeout() -> Self {
        MockLLMStep {
            outcome: ScriptedOutcome::Timeout,
        }
    }
}

/// Replays a fixed script of `MockLLMStep`s, one per `create_message` call.
/// Panics if exhausted, matching a strict test-script contract.
pub struct MockLLMClient {
    script: Mutex<VecDeque<MockLLMStep>>,
    usage: Mutex<UsageCounters>,
}

impl MockLLMClient {
    pub fn new(steps: Vec<MockLLMStep>) -> Self {
        MockLLMClient {
            script: Mutex::new(steps.into_iter().collect()),
            usage: Mutex::new(UsageCounters::default()),
        }
    }
}

#[async_trait]
impl LLMClient for MockLLMClient {
    async fn create_message(
        &self,
        _system_prompt: &str,
        _history: &[Message],
        _tool_definitions: &[ServerDef],
        _keep_tool_result: i64,
        _step_id: &str,
        _agent_type: &str,
        stream_callback: &dyn StreamCallback,
    ) -> LLMOutcome {
        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .expect("MockLLMClient script exhausted");

        match step.outcome {
            ScriptedOutcome::Ok {
                assistant_text,
                native_tool_calls,
                output_items,
                should_break: _,
            } => {
                stream_callback.on_delta(&assistant_text, true).await;
                {
                    let mut usage = self.usage.lock().unwrap();
                    usage.output_tokens += assistant_text.len() as u64;
                }
                LLMOutcome::Ok(Response {
                    assistant_text,
                    native_tool_calls,
                    output_items,
                })
            }
            ScriptedOutcome::ContextLimit => LLMOutcome::ContextLimit,
            ScriptedOutcome::Transient(message) => LLMOutcome::Transient(message),
            ScriptedOutcome::Timeout => LLMOutcome::Timeout,
        }
    }

    fn process_llm_response(
        &self,
        response: &Response,
        history: &mut Vec<Message>,
        _agent_type: &str,
    ) -> (Option<String>, bool) {
        if response.assistant_text.is_empty() {
            return (None, true);
        }
        history.push(Message::assistant(response.assistant_text.clone()));
        let no_tool_calls = response.native_tool_calls.is_empty() && response.output_items.is_empty();
        let no_xml = !response.assistant_text.contains("<use_mcp_tool");
        (Some(response.assistant_text.clone()), no_tool_calls && no_xml)
    }

    fn extract_tool_calls_info(
        &self,
        response: &Response,
        _assistant_text: &str,
    ) -> (Vec<NativeToolCall>, Vec<OutputItem>) {
        (
            response.native_tool_calls.clone(),
            response.output_items.clone(),
        )
    }

    fn update_message_history(
        &self,
        history: &mut Vec<Message>,
        results: &[(Option<String>, String)],
        exceeded: bool,
    ) {
        let mut merged = String::new();
        if exceeded {
            merged.push_str("You made too many tool calls in a single turn.\n\n");
        }
        for (label, text) in results {
            if let Some(label) = label {
                merged.push_str(label);
                merged.push('\n');
            }
            merged.push_str(text);
            merged.push_str("\n\n");
        }
        history.push(Message::user(merged.trim_end().to_string()));
    }

    fn handle_max_turns_reached_summary_prompt(&self, history: &[Message], prompt: &str) -> String {
        match history.last() {
            Some(last) if last.role == crate::agentloom::types::Role::User => {
                format!("{}\n\n{}", prompt, last.text())
            }
            _ => prompt.to_string(),
        }
    }

    fn get_usage(&self) -> UsageCounters {
        self.usage.lock().unwrap().clone()
    }
}

/// A scripted `ToolRegistry`: returns a canned `ToolOutcome` keyed by
/// `"<server_name>/<tool_name>"`, or an error for anything unregistered.
pub struct MockToolRegistry {
    responses: Mutex<HashMap<String, ToolOutcome>>,
    definitions: Vec<ServerDef>,
}

impl MockToolRegistry {
    pub fn new(definitions: Vec<ServerDef>) -> Self {
        MockToolRegistry {
            responses: Mutex::new(HashMap::new()),
            definitions,
        }
    }

    pub fn with_response(self, server_name: &str, tool_name: &str, outcome: ToolOutcome) -> Self {
        self.responses
            .lock()
            .unwrap()
            .insert(format!("{}/{}", server_name, tool_name), outcome);
        self
    }
}

#[async_trait]
impl ToolRegistry for MockToolRegistry {
    async fn get_all_tool_definitions(&self) -> Vec<ServerDef> {
        self.definitions.clone()
    }

    async fn execute_tool_call(
        &self,
        server_name: &str,
        tool_name: &str,
        _arguments: &Value,
    ) -> ToolOutcome {
        let key = format!("{}/{}", server_name, tool_name);
        self.responses
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .unwrap_or_else(|| ToolOutcome::Result(format!("mock result for {}", key)))
    }
}

/// A minimal one-tool `ServerDef`, handy for tests that just need a
/// plausible tool-definitions list.
pub fn mock_server_def(server_name: &str, tool_name: &str) -> ServerDef {
    ServerDef {
        name: server_name.to_string(),
        tools: vec![ToolDef {
            name: tool_name.to_string(),
            description: "a mock tool".to_string(),
            schema: serde_json::json!({"type": "object", "properties": {}}),
        }],
    }
}
