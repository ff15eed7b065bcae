//! Configuration (out of scope per `SPEC_FULL.md` §1, recognized options
//! enumerated in §6). Modeled on `cloudllm::config::CloudLLMConfig`: a
//! plain struct with a `Default` impl, constructed by the host
//! application — no TOML/YAML/file-format parsing dependency.

use std::collections::HashMap;

/// Per-sub-agent configuration, keyed by sub-agent name in
/// `OrchestratorConfig::sub_agents`.
#[derive(Debug, Clone)]
pub struct SubAgentConfig {
    /// Selects a closed-set `PromptProvider` implementation by name.
    pub prompt_class: String,
    pub max_turns: i64,
    pub max_tool_calls_per_turn: usize,
}

/// Recognized configuration options for one orchestration run.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Negative ⇒ effectively unbounded.
    pub max_turns: i64,
    pub max_tool_calls_per_turn: usize,
    /// -1 = keep all; otherwise retain only the last N tool-result
    /// sections when passing history back to the LLM.
    pub keep_tool_result: i64,
    /// Toggles additional instructions in prompts.
    pub chinese_context: bool,
    /// Enables per-user-message id prefixing to defeat cache reuse.
    pub add_message_id: bool,
    pub hint_generation: bool,
    pub final_answer_extraction: bool,
    pub sub_agents: HashMap<String, SubAgentConfig>,
    /// Default 20,000 characters.
    pub scrape_max_length: usize,
    /// Bound on the `EventEmitter`'s channel capacity.
    pub event_channel_capacity: usize,
    /// Host substrings the restricted-host short-circuit refuses to fetch
    /// (`SPEC_FULL.md` §4.5 step 5). Not a named config option in §6 — the
    /// spec only names the category ("dataset-hosting domains") as an
    /// example, not a concrete list, so this crate exposes it as a knob the
    /// host application populates; empty means nothing is restricted. See
    /// `DESIGN.md` Open Question #9.
    pub restricted_hosts: Vec<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        OrchestratorConfig {
            max_turns: 20,
            max_tool_calls_per_turn: 5,
            keep_tool_result: -1,
            chinese_context: false,
            add_message_id: false,
            hint_generation: false,
            final_answer_extraction: false,
            sub_agents: HashMap::new(),
            scrape_max_length: 20_000,
            event_channel_capacity: 256,
            restricted_hosts: Vec::new(),
        }
    }
}
