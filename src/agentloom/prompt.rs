//! `PromptProvider` — an out-of-scope collaborator (`SPEC_FULL.md` §1
//! "Prompt templates") reshaped per §9's re-architecture guidance: the
//! Python source dynamically loads a prompt-template class by name; here
//! it is a capability trait, with a closed set of implementations chosen
//! by a config string at program start instead of runtime code loading.

use std::collections::HashMap;
use std::sync::Arc;

use crate::agentloom::llm_client::ServerDef;

/// Builds the system and summary prompts for one agent. Implementations
/// are supplied by the host application; this crate implements no
/// concrete prompt text (no LLM/prompt-content implementation, per
/// Non-goals).
pub trait PromptProvider: Send + Sync {
    /// Builds the system prompt, embedding `tool_defs` (including any
    /// sub-agent pseudo-definitions already mixed in by the Orchestrator).
    fn system_prompt(&self, tool_defs: &[ServerDef], options: &PromptOptions) -> String;

    /// Builds the end-of-session summary prompt.
    fn summary_prompt(&self, task_description: &str, task_failed: bool, options: &PromptOptions) -> String;
}

/// Free-form options threaded through to prompt construction (e.g. the
/// `main_agent.chinese_context` toggle).
#[derive(Debug, Clone, Default)]
pub struct PromptOptions {
    pub chinese_context: bool,
}

/// Resolves a sub-agent's `prompt_class` config string to a registered
/// `PromptProvider`, per `SPEC_FULL.md` §9's "closed set of implementations
/// registered at program start" re-architecture guidance. The main agent's
/// provider is held separately since it is never looked up by name.
#[derive(Clone)]
pub struct PromptProviders {
    pub main: Arc<dyn PromptProvider>,
    by_prompt_class: HashMap<String, Arc<dyn PromptProvider>>,
}

impl PromptProviders {
    pub fn new(main: Arc<dyn PromptProvider>) -> Self {
        PromptProviders {
            main,
            by_prompt_class: HashMap::new(),
        }
    }

    pub fn register(mut self, prompt_class: &str, provider: Arc<dyn PromptProvider>) -> Self {
        self.by_prompt_class.insert(prompt_class.to_string(), provider);
        self
    }

    pub fn resolve_sub_agent(&self, prompt_class: &str) -> Option<Arc<dyn PromptProvider>> {
        self.by_prompt_class.get(prompt_class).cloned()
    }
}
