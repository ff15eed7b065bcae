//! Core data model: messages, tool calls/results, agent sessions, and usage
//! counters. See `SPEC_FULL.md` §3.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A chat-history role.
///
/// The source spec lists a third role, `tool-result`, but every merged
/// tool-result message is realized as a `User`-role message in practice
/// (see `DESIGN.md`, Open Question #2) so it is not represented here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// One typed part of a multi-part message (text, image, or file reference).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContentPart {
    Text { payload: String },
    Image { payload: String },
    File { payload: String },
}

/// Message content: either plain text or an ordered sequence of typed parts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// Best-effort flattening to a single string, used wherever the engine
    /// needs plain text (message-id annotation, history-length checks, the
    /// last-user-message merge in SummaryWithRetry).
    pub fn as_text(&self) -> String {
        match self {
            MessageContent::Text(s) => s.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .map(|p| match p {
                    ContentPart::Text { payload } => payload.clone(),
                    ContentPart::Image { payload } => format!("[image: {}]", payload),
                    ContentPart::File { payload } => format!("[file: {}]", payload),
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

impl From<String> for MessageContent {
    fn from(s: String) -> Self {
        MessageContent::Text(s)
    }
}

impl From<&str> for MessageContent {
    fn from(s: &str) -> Self {
        MessageContent::Text(s.to_string())
    }
}

/// One element of an `AgentSession`'s history.
///
/// Invariant: the first message of any session history is always `User`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

impl Message {
    pub fn user(content: impl Into<MessageContent>) -> Self {
        Message {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<MessageContent>) -> Self {
        Message {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn text(&self) -> String {
        self.content.as_text()
    }
}

/// A structured tool-call request extracted by `ToolCallParser`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub server_name: String,
    pub tool_name: String,
    pub arguments: Value,
    /// Present for native-tool-call responses, absent for XML-tag style.
    pub call_id: Option<String>,
    /// The raw text this call was extracted from, kept for diagnostics.
    pub raw: String,
}

impl ToolCall {
    /// Whether this call is a sub-agent delegation rather than a real tool.
    pub fn is_sub_agent_call(&self) -> bool {
        self.server_name.starts_with("agent-")
    }
}

/// A tool call the parser could not fully resolve.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MalformedToolCall {
    pub error: String,
    pub raw: String,
}

/// The outcome of executing one tool call. Exactly one variant is ever
/// constructed for a given dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ToolOutcome {
    Result(String),
    Error(String),
}

/// The result of dispatching one `ToolCall`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub server_name: String,
    pub tool_name: String,
    pub outcome: ToolOutcome,
    pub duration_ms: u64,
    pub call_time: DateTime<Utc>,
}

/// Whether an `AgentSession` is the top-level agent or a nested delegate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentKind {
    Main,
    Sub,
}

/// Bounded turn budget. Negative means "effectively unbounded", per
/// `SPEC_FULL.md` §6 (`main_agent.max_turns`).
pub const UNBOUNDED_TURNS: i64 = -1;

/// One agent's session state: history, turn budget, and failure flag.
///
/// Owned exclusively by the enclosing `AgentLoop::run`; never shared
/// between a main session and its sub-sessions.
#[derive(Debug, Clone)]
pub struct AgentSession {
    pub kind: AgentKind,
    pub name: String,
    pub system_prompt: String,
    pub history: Vec<Message>,
    pub turn_index: u32,
    pub max_turns: i64,
    pub max_tool_calls_per_turn: usize,
    pub task_failed: bool,
    /// Stable id, derived from the invocation position for sub-sessions.
    pub session_id: String,
}

impl AgentSession {
    pub fn new_main(
        system_prompt: String,
        initial_user_message: Message,
        max_turns: i64,
        max_tool_calls_per_turn: usize,
    ) -> Self {
        AgentSession {
            kind: AgentKind::Main,
            name: "main".to_string(),
            system_prompt,
            history: vec![initial_user_message],
            turn_index: 0,
            max_turns,
            max_tool_calls_per_turn,
            task_failed: false,
            session_id: "main".to_string(),
        }
    }

    pub fn new_sub(
        session_id: String,
        name: String,
        system_prompt: String,
        initial_user_message: Message,
        max_turns: i64,
        max_tool_calls_per_turn: usize,
    ) -> Self {
        AgentSession {
            kind: AgentKind::Sub,
            name,
            system_prompt,
            history: vec![initial_user_message],
            turn_index: 0,
            max_turns,
            max_tool_calls_per_turn,
            task_failed: false,
            session_id,
        }
    }

    /// `turn_index > max_turns`, honouring the "negative = unbounded" rule.
    pub fn turn_budget_exhausted(&self) -> bool {
        self.max_turns >= 0 && self.turn_index as i64 > self.max_turns
    }
}

/// Per-agent rolling token/tool-call counters, owned by the LLM client and
/// read-only to the orchestration core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageCounters {
    pub input_tokens: u64,
    pub cached_tokens: u64,
    pub output_tokens: u64,
    pub reasoning_tokens: u64,
    pub tool_call_count_by_name: HashMap<String, u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_content_as_text_joins_parts() {
        let content = MessageContent::Parts(vec![
            ContentPart::Text {
                payload: "hello".to_string(),
            },
            ContentPart::Image {
                payload: "cat.png".to_string(),
            },
        ]);
        assert_eq!(content.as_text(), "hello\n[image: cat.png]");
    }

    #[test]
    fn sub_agent_call_detection() {
        let call = ToolCall {
            server_name: "agent-browsing".to_string(),
            tool_name: "execute_subtask".to_string(),
            arguments: Value::Null,
            call_id: None,
            raw: String::new(),
        };
        assert!(call.is_sub_agent_call());
    }

    #[test]
    fn negative_max_turns_never_exhausts() {
        let session = AgentSession::new_main(
            "sys".to_string(),
            Message::user("hi"),
            UNBOUNDED_TURNS,
            5,
        );
        assert!(!session.turn_budget_exhausted());
    }

    #[test]
    fn zero_max_turns_exhausted_after_first_increment() {
        let mut session = AgentSession::new_main("sys".to_string(), Message::user("hi"), 0, 5);
        session.turn_index += 1;
        assert!(session.turn_budget_exhausted());
    }
}
