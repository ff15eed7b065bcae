//! C8 — `Orchestrator`. The top-level façade: the nine-step sequence from
//! `start_of_workflow` through `end_of_workflow`, plus `\boxed{…}`
//! extraction. Grounded on
//! `examples/original_source/src/core/orchestrator.py::run` and
//! `examples/original_source/src/utils/parsing_utils.py::extract_boxed_answer`.
//! See `SPEC_FULL.md` §4.8.

use std::collections::HashMap;
use std::sync::OnceLock;

use chrono::Utc;
use regex::Regex;

use crate::agentloom::agent_loop::{self, AgentLoopDeps, SubAgentContext};
use crate::agentloom::config::{OrchestratorConfig, SubAgentConfig};
use crate::agentloom::error::OrchestratorError;
use crate::agentloom::event::{Event, EventEmitter, EventStream, UsageScene};
use crate::agentloom::llm_call_runner::StreamingMode;
use crate::agentloom::llm_client::{LLMClient, ServerDef, ToolDef};
use crate::agentloom::prompt::{PromptOptions, PromptProvider, PromptProviders};
use crate::agentloom::tool_registry::ToolRegistry;
use crate::agentloom::tracer::{SnapshotContext, TaskTracer};
use crate::agentloom::types::{AgentSession, Message};

const NO_FINAL_ANSWER: &str = "No final answer generated.";
/// Forbidden-token markup the observer-facing stream must never carry
/// verbatim mid-word; kept in sync with the XML tag `ToolCallParser` scans
/// for.
const FORBIDDEN_TOKENS: &[&str] = &["<use_mcp_tool>"];

/// Collaborators the host application supplies at construction time. None
/// of these are implemented by this crate (all out of scope per
/// `SPEC_FULL.md` §1).
pub struct Orchestrator {
    llm_client: Box<dyn LLMClient>,
    tool_registry: Box<dyn ToolRegistry>,
    tracer: Box<dyn TaskTracer>,
    prompt_providers: PromptProviders,
    config: OrchestratorConfig,
}

/// The final return value of one run, per `SPEC_FULL.md` §4.8.
pub struct OrchestratorOutput {
    pub full_summary: String,
    pub final_boxed_answer: String,
}

impl Orchestrator {
    /// Validates `config` against `prompt_providers` before construction:
    /// every configured sub-agent's `prompt_class` must resolve to a
    /// registered `PromptProvider`, and the event channel must have
    /// positive capacity.
    pub fn new(
        llm_client: Box<dyn LLMClient>,
        tool_registry: Box<dyn ToolRegistry>,
        tracer: Box<dyn TaskTracer>,
        prompt_providers: PromptProviders,
        config: OrchestratorConfig,
    ) -> Result<Self, OrchestratorError> {
        if config.event_channel_capacity == 0 {
            return Err(OrchestratorError::InvalidConfig(
                "event_channel_capacity must be positive".to_string(),
            ));
        }
        for (name, sub_config) in &config.sub_agents {
            if prompt_providers.resolve_sub_agent(&sub_config.prompt_class).is_none() {
                return Err(OrchestratorError::InvalidConfig(format!(
                    "sub-agent '{}' names prompt_class '{}', which has no registered PromptProvider",
                    name, sub_config.prompt_class
                )));
            }
        }

        Ok(Orchestrator {
            llm_client,
            tool_registry,
            tracer,
            prompt_providers,
            config,
        })
    }

    /// Runs one task to completion. Returns the event stream (subscribe
    /// before polling the returned future, as with any bounded channel) and
    /// a future resolving to `(full_summary, final_boxed_answer)`.
    pub fn run(
        self,
        task_id: String,
        task_description: String,
        associated_file: Option<AssociatedFile>,
    ) -> (EventStream, impl std::future::Future<Output = OrchestratorOutput>) {
        let (emitter, stream) = EventEmitter::new(self.config.event_channel_capacity);
        let fut = self.run_inner(task_id, task_description, associated_file, emitter);
        (stream, fut)
    }

    async fn run_inner(
        self,
        task_id: String,
        task_description: String,
        associated_file: Option<AssociatedFile>,
        emitter: EventEmitter,
    ) -> OrchestratorOutput {
        log::info!("Starting workflow '{}'", task_id);
        emitter
            .emit(Event::StartOfWorkflow {
                workflow_id: task_id.clone(),
            })
            .await;

        // Step 2: preprocess — append a file-kind advisory, if any.
        let mut task_text = task_description;
        if let Some(file) = &associated_file {
            task_text = append_file_advisory(&task_text, file);
        }

        // Step 3: optional hint generation. Independently optional per
        // `SPEC_FULL.md` §4.8's supplement; failure is non-fatal.
        if self.config.hint_generation {
            if let Some(hints) = self.generate_hints(&task_text).await {
                task_text = format!("{}\n\n{}", task_text, hints);
            }
        }

        let mut main_session = AgentSession::new_main(
            String::new(),
            Message::user(task_text),
            self.config.max_turns,
            self.config.max_tool_calls_per_turn,
        );

        // `SPEC_FULL.md` §3 SUPPLEMENT, save point 1: after preprocessing.
        let snapshot_ctx = SnapshotContext::new(task_id.clone(), None);
        snapshot_ctx.record_step("preprocess", "Task text preprocessed", "ok").await;
        let pre_call_snapshot = snapshot_ctx.snapshot(&main_session, "preprocessed", None, None, None).await;
        self.tracer.save(&pre_call_snapshot).await;

        // Step 4: build the main system prompt, with sub-agent pseudo-tool
        // definitions mixed into the tool listing.
        let tool_definitions = self.tool_registry.get_all_tool_definitions().await;
        let tool_definitions = with_sub_agent_pseudo_tools(tool_definitions, &self.config.sub_agents);
        let prompt_options = PromptOptions {
            chinese_context: self.config.chinese_context,
        };
        main_session.system_prompt = self
            .prompt_providers
            .main
            .system_prompt(&tool_definitions, &prompt_options);

        let forbidden_tokens: Vec<String> = FORBIDDEN_TOKENS.iter().map(|s| s.to_string()).collect();
        let deps = AgentLoopDeps {
            llm_client: self.llm_client.as_ref(),
            tool_registry: self.tool_registry.as_ref(),
            tracer: self.tracer.as_ref(),
            emitter: &emitter,
            config: &self.config,
            tool_definitions: &tool_definitions,
            forbidden_tokens: &forbidden_tokens,
            snapshot_ctx: &snapshot_ctx,
        };
        let sub_ctx = SubAgentContext {
            configs: &self.config.sub_agents,
            prompt_providers: &self.prompt_providers,
        };

        // Step 5: run the main AgentLoop (its own start/end_of_llm events,
        // and post-turn snapshot saves, are emitted per turn by
        // LLMCallRunner/AgentLoop; start/end_of_agent bracket the whole run
        // here).
        emitter
            .emit(Event::StartOfAgent {
                agent_id: "main".to_string(),
                name: "main".to_string(),
            })
            .await;

        let main_result = agent_loop::run(
            &mut main_session,
            &deps,
            self.prompt_providers.main.as_ref(),
            &prompt_options,
            &sub_ctx,
            StreamingMode::FinalMainSummary,
        )
        .await;

        emitter
            .emit(Event::EndOfAgent {
                agent_id: "main".to_string(),
            })
            .await;

        // Step 7: optional final-answer extraction LLM call.
        let mut full_summary = main_result.summary;
        if self.config.final_answer_extraction {
            if let Some(extracted) = self.extract_final_answer(&full_summary, &deps).await {
                full_summary = format!("{}\n\n{}", full_summary, extracted);
            }
        }

        // Step 8: usage_info(scene=main_agent_end).
        emitter
            .emit(Event::UsageInfo {
                agent_id: "main".to_string(),
                scene: UsageScene::MainAgentEnd,
                usage: self.llm_client.get_usage(),
            })
            .await;

        let final_boxed_answer = extract_boxed_answer(&full_summary)
            .unwrap_or_else(|| NO_FINAL_ANSWER.to_string());

        // `SPEC_FULL.md` §3 SUPPLEMENT, save point 3: at terminal completion.
        let status = if main_result.task_failed { "failed" } else { "completed" };
        snapshot_ctx.record_step("complete", "Workflow finished", status).await;
        let final_snapshot = snapshot_ctx
            .snapshot(
                &main_session,
                status,
                Some(Utc::now()),
                Some(final_boxed_answer.clone()),
                None,
            )
            .await;
        self.tracer.save(&final_snapshot).await;

        log::info!(
            "Workflow '{}' finished (task_failed={})",
            task_id,
            main_result.task_failed
        );
        emitter
            .emit(Event::EndOfWorkflow {
                workflow_id: task_id,
            })
            .await;
        emitter.close().await;

        OrchestratorOutput {
            full_summary,
            final_boxed_answer,
        }
    }

    /// Step 3's independently-optional hint-generation helper. Modeled as a
    /// free function taking the task text and returning an optional hints
    /// block, per `SPEC_FULL.md` §4.8's supplement — here a method only
    /// because it needs the configured LLM client; failure of any kind is
    /// swallowed (non-fatal per spec).
    async fn generate_hints(&self, task_text: &str) -> Option<String> {
        let _ = task_text;
        // No concrete "helper LLM call" implementation ships with this
        // crate (no LLM implementation, per Non-goals) — a host that wants
        // hint generation supplies its own `LLMClient` behavior and can
        // override this step entirely by pre-seeding the task description
        // before calling `run`.
        None
    }

    async fn extract_final_answer(&self, summary_text: &str, _deps: &AgentLoopDeps<'_>) -> Option<String> {
        let _ = summary_text;
        // Likewise out of scope: no concrete extractor LLM call ships here.
        None
    }
}

/// A file associated with the task, named in `SPEC_FULL.md` §4.8 step 2.
pub struct AssociatedFile {
    pub path: String,
    pub kind: FileKind,
}

#[derive(Debug, Clone, Copy)]
pub enum FileKind {
    Image,
    Pdf,
    Audio,
    Other,
}

fn append_file_advisory(task_text: &str, file: &AssociatedFile) -> String {
    let kind_name = match file.kind {
        FileKind::Image => "Image",
        FileKind::Pdf => "PDF",
        FileKind::Audio => "Audio",
        FileKind::Other => "file",
    };
    format!(
        "{}\n\nA {} file '{}' is associated with this task; use applicable tools.",
        task_text, kind_name, file.path
    )
}

/// Mixes in one pseudo-`ServerDef` per configured sub-agent, named
/// `agent-<name>`, exposing a single `execute_subtask` tool — this is how
/// the main agent's tool listing surfaces sub-agents as callable.
fn with_sub_agent_pseudo_tools(
    mut tool_definitions: Vec<ServerDef>,
    sub_agents: &HashMap<String, SubAgentConfig>,
) -> Vec<ServerDef> {
    for name in sub_agents.keys() {
        tool_definitions.push(ServerDef {
            name: format!("agent-{}", name),
            tools: vec![ToolDef {
                name: "execute_subtask".to_string(),
                description: format!("Delegates a subtask to the '{}' sub-agent.", name),
                schema: serde_json::json!({
                    "type": "object",
                    "properties": { "task": { "type": "string" } },
                    "required": ["task"]
                }),
            }],
        });
    }
    tool_definitions
}

fn boxed_pattern_one_level() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\\boxed\{((?:[^{}]|\{[^{}]*\})*)\}").expect("static boxed pattern is valid")
    })
}

fn boxed_pattern_shallow() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\\boxed\{([^{}]*)\}").expect("static shallow boxed pattern is valid"))
}

/// Extracts the content of the last `\boxed{…}` occurrence, allowing one
/// level of brace nesting; falls back to a shallow non-nested pattern if
/// the nested one finds nothing. `None` if neither matches.
pub fn extract_boxed_answer(text: &str) -> Option<String> {
    if let Some(m) = boxed_pattern_one_level().find_iter(text).last() {
        let caps = boxed_pattern_one_level().captures(m.as_str())?;
        return Some(caps.get(1)?.as_str().to_string());
    }
    if let Some(caps) = boxed_pattern_shallow().captures_iter(text).last() {
        return Some(caps.get(1)?.as_str().to_string());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_simple_boxed_answer() {
        assert_eq!(
            extract_boxed_answer("The answer is \\boxed{4}."),
            Some("4".to_string())
        );
    }

    #[test]
    fn extracts_last_occurrence_when_several_present() {
        assert_eq!(
            extract_boxed_answer("\\boxed{1} ... actually \\boxed{2}"),
            Some("2".to_string())
        );
    }

    #[test]
    fn tolerates_one_level_of_brace_nesting() {
        assert_eq!(
            extract_boxed_answer("\\boxed{f(x) = \\{1, 2\\}}"),
            Some("f(x) = \\{1, 2\\}".to_string())
        );
    }

    #[test]
    fn returns_none_when_absent() {
        assert_eq!(extract_boxed_answer("no boxed answer here"), None);
    }

    #[test]
    fn boxed_extraction_is_idempotent_for_shallow_nesting() {
        let summary = "Final: \\boxed{42}";
        let first = extract_boxed_answer(summary).unwrap();
        let re_wrapped = format!("\\boxed{{{}}}", first);
        let second = extract_boxed_answer(&re_wrapped).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn file_advisory_names_the_kind_and_path() {
        let file = AssociatedFile {
            path: "diagram.png".to_string(),
            kind: FileKind::Image,
        };
        let text = append_file_advisory("Describe this.", &file);
        assert!(text.contains("A Image file"));
        assert!(text.contains("'diagram.png'"));
    }
}
