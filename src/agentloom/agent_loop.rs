//! C5 — `AgentLoop`. Drives one bounded agent session to completion or
//! budget exhaustion: per-turn LLM call, tool-call dispatch, and the
//! `SPEC_FULL.md` §4.5.1 merge policy. Grounded on
//! `examples/original_source/src/core/orchestrator.py::run_single_agent_turn`.
//! See `SPEC_FULL.md` §4.5.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::agentloom::config::{OrchestratorConfig, SubAgentConfig};
use crate::agentloom::event::{Event, EventEmitter, ToolCallPhase, UsageScene};
use crate::agentloom::llm_call_runner::{self, LLMCallToolCalls, StreamingMode};
use crate::agentloom::llm_client::{LLMClient, ServerDef};
use crate::agentloom::prompt::{PromptOptions, PromptProvider, PromptProviders};
use crate::agentloom::sub_agent;
use crate::agentloom::summary;
use crate::agentloom::tool_registry::ToolRegistry;
use crate::agentloom::tracer::{SnapshotContext, TaskTracer};
use crate::agentloom::types::{AgentKind, AgentSession, MalformedToolCall, Message, ToolCall, ToolOutcome};

/// Shared, borrowed collaborators for one orchestration run. Cheap to
/// construct fresh for the main loop and re-shared (by reference) into
/// every nested sub-agent invocation.
pub struct AgentLoopDeps<'a> {
    pub llm_client: &'a dyn LLMClient,
    pub tool_registry: &'a dyn ToolRegistry,
    pub tracer: &'a dyn TaskTracer,
    pub emitter: &'a EventEmitter,
    pub config: &'a OrchestratorConfig,
    pub tool_definitions: &'a [ServerDef],
    pub forbidden_tokens: &'a [String],
    pub snapshot_ctx: &'a SnapshotContext,
}

/// Resolves a sub-agent name to its config and prompt provider. Threaded
/// through recursively so a sub-agent can itself delegate further.
pub struct SubAgentContext<'a> {
    pub configs: &'a HashMap<String, SubAgentConfig>,
    pub prompt_providers: &'a PromptProviders,
}

/// The outcome of running one `AgentSession` to completion.
pub struct AgentLoopResult {
    pub summary: String,
    pub task_failed: bool,
}

fn agent_type_str(kind: crate::agentloom::types::AgentKind) -> &'static str {
    match kind {
        crate::agentloom::types::AgentKind::Main => "main",
        crate::agentloom::types::AgentKind::Sub => "sub",
    }
}

/// One merged-result line destined for the §4.5.1 text template.
struct ResultEntry {
    label: ResultLabel,
    text: String,
}

enum ResultLabel {
    Valid(usize),
    Failed(usize),
}

/// Builds the exact §4.5.1 merge text: a single result verbatim if there is
/// only one, otherwise a preamble plus one "Valid/Failed tool call N
/// result:" section per entry, in dispatch order.
fn format_merge_text(entries: &[ResultEntry], exceeded: bool, valid_count: usize) -> String {
    if entries.len() <= 1 {
        return entries
            .first()
            .map(|e| e.text.clone())
            .unwrap_or_default();
    }

    let preamble = if exceeded {
        format!(
            "You made too many tool calls. I can only afford to process {} valid tool calls in this turn.",
            valid_count
        )
    } else {
        format!("I have processed {} valid tool calls in this turn.", valid_count)
    };

    let mut sections = vec![preamble];
    for entry in entries {
        let section = match entry.label {
            ResultLabel::Valid(i) => format!("Valid tool call {} result:\n{}", i, entry.text),
            ResultLabel::Failed(j) => format!("Failed tool call {} result:\n{}", j, entry.text),
        };
        sections.push(section);
    }
    sections.join("\n\n")
}

fn extract_task_description(call: &ToolCall) -> String {
    call.arguments
        .get("task")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .unwrap_or_else(|| call.arguments.to_string())
}

/// A hard-coded category of hosts this crate refuses to fetch directly
/// without a host-supplied policy; see `DESIGN.md` Open Question #9. Empty
/// by default — the host application supplies its own list via
/// `OrchestratorConfig::restricted_hosts`.
fn targets_restricted_host(call: &ToolCall, restricted_hosts: &[String]) -> bool {
    if restricted_hosts.is_empty() {
        return false;
    }
    let Some(url) = call.arguments.get("url").and_then(|v| v.as_str()) else {
        return false;
    };
    restricted_hosts.iter().any(|host| url.contains(host.as_str()))
}

fn truncate_scrape_result(tool_name: &str, text: String, max_length: usize) -> String {
    if tool_name != "scrape" || text.chars().count() <= max_length {
        return text;
    }
    text.chars().take(max_length).collect()
}

fn empty_result_boundary_text(tool_name: &str, text: &str) -> Option<String> {
    if text.trim().is_empty() {
        Some(format!(
            "Tool '{}' completed but returned empty text - this may be expected or indicate an issue",
            tool_name
        ))
    } else {
        None
    }
}

const TOOL_CALL_TIMEOUT: Duration = Duration::from_secs(600);

/// Dispatches one valid tool call (steps 4-5 of `SPEC_FULL.md` §4.5),
/// returning its merged-result text.
async fn dispatch_one(
    call: &ToolCall,
    deps: &AgentLoopDeps<'_>,
    sub_ctx: &SubAgentContext<'_>,
    agent_id: &str,
) -> String {
    let call_id = call
        .call_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    deps.emitter
        .emit(Event::ToolCall {
            agent_id: agent_id.to_string(),
            call_id: call_id.clone(),
            server_name: call.server_name.clone(),
            tool_name: call.tool_name.clone(),
            phase: ToolCallPhase::Issued,
            show_text: None,
        })
        .await;

    let start = Instant::now();

    let result_text = if call.is_sub_agent_call() {
        let name = call
            .server_name
            .strip_prefix("agent-")
            .unwrap_or(&call.server_name)
            .to_string();
        let provider = sub_ctx
            .configs
            .get(&name)
            .and_then(|cfg| sub_ctx.prompt_providers.resolve_sub_agent(&cfg.prompt_class));
        match (sub_ctx.configs.get(&name), provider) {
            (Some(sub_config), Some(provider)) => {
                let task_description = extract_task_description(call);
                Box::pin(sub_agent::invoke(
                    &name,
                    &task_description,
                    sub_config,
                    provider.as_ref(),
                    deps,
                    sub_ctx,
                ))
                .await
            }
            _ => format!("Sub-agent '{}' is not registered.", name),
        }
    } else {
        if targets_restricted_host(call, &deps.config.restricted_hosts) {
            "This request targets a restricted host and was not executed.".to_string()
        } else {
            let outcome = tokio::time::timeout(
                TOOL_CALL_TIMEOUT,
                deps.tool_registry
                    .execute_tool_call(&call.server_name, &call.tool_name, &call.arguments),
            )
            .await;

            let outcome = outcome.unwrap_or_else(|_| {
                log::error!(
                    "Tool '{}/{}' timed out after 600s",
                    call.server_name,
                    call.tool_name
                );
                ToolOutcome::Error(format!("Tool '{}' timed out after 600s", call.tool_name))
            });

            let text = match outcome {
                ToolOutcome::Result(text) => {
                    let truncated =
                        truncate_scrape_result(&call.tool_name, text, deps.config.scrape_max_length);
                    empty_result_boundary_text(&call.tool_name, &truncated).unwrap_or(truncated)
                }
                ToolOutcome::Error(err) => format!("Error: {}", err),
            };
            text
        }
    };

    let duration_ms = start.elapsed().as_millis() as u64;
    let _ = duration_ms;

    deps.emitter
        .emit(Event::ToolCall {
            agent_id: agent_id.to_string(),
            call_id,
            server_name: call.server_name.clone(),
            tool_name: call.tool_name.clone(),
            phase: ToolCallPhase::Completed,
            show_text: None,
        })
        .await;

    deps.emitter
        .emit(Event::UsageInfo {
            agent_id: agent_id.to_string(),
            scene: UsageScene::ToolCall,
            usage: deps.llm_client.get_usage(),
        })
        .await;

    result_text
}

fn rethink_text(malformed: &MalformedToolCall) -> String {
    format!(
        "Your tool call could not be parsed: {}. Please review the tool call format and reissue a corrected call.",
        malformed.error
    )
}

/// Steps 4-7 of `SPEC_FULL.md` §4.5: truncate, dispatch in order, fabricate
/// re-think results for malformed calls, merge, and append to history.
async fn dispatch_and_merge(
    session: &mut AgentSession,
    deps: &AgentLoopDeps<'_>,
    sub_ctx: &SubAgentContext<'_>,
    agent_id: &str,
    mut valid: Vec<ToolCall>,
    malformed: Vec<MalformedToolCall>,
) {
    let total_valid = valid.len();
    let exceeded = total_valid > session.max_tool_calls_per_turn;
    if exceeded {
        valid.truncate(session.max_tool_calls_per_turn);
    }
    let valid_count = valid.len();

    let mut entries = Vec::with_capacity(valid.len() + malformed.len());
    for (i, call) in valid.iter().enumerate() {
        let text = dispatch_one(call, deps, sub_ctx, agent_id).await;
        entries.push(ResultEntry {
            label: ResultLabel::Valid(i + 1),
            text,
        });
    }
    for (j, call) in malformed.iter().enumerate() {
        entries.push(ResultEntry {
            label: ResultLabel::Failed(j + 1),
            text: rethink_text(call),
        });
    }

    let merged = format_merge_text(&entries, exceeded, valid_count);
    deps.llm_client
        .update_message_history(&mut session.history, &[(None, merged)], exceeded);
}

/// Runs `session` through the `Running/ToolDispatch/NoTools/TurnExhausted/
/// FailFast → Summarizing → Done` state machine described in
/// `SPEC_FULL.md` §4.5, then hands off to `SummaryWithRetry`.
pub async fn run(
    session: &mut AgentSession,
    deps: &AgentLoopDeps<'_>,
    prompt_provider: &dyn PromptProvider,
    prompt_options: &PromptOptions,
    sub_ctx: &SubAgentContext<'_>,
    streaming_mode: StreamingMode,
) -> AgentLoopResult {
    let agent_id = session.session_id.clone();

    loop {
        session.turn_index += 1;
        if session.turn_budget_exhausted() {
            log::warn!(
                "Agent '{}' exhausted its turn budget at turn {}",
                agent_id,
                session.turn_index
            );
            session.task_failed = true;
            break;
        }

        let step_id = format!("{}-turn-{}", session.session_id, session.turn_index);
        let output = llm_call_runner::run(
            deps.llm_client,
            deps.tracer,
            deps.emitter,
            &agent_id,
            &session.system_prompt,
            &mut session.history,
            deps.tool_definitions,
            deps.config.keep_tool_result,
            &step_id,
            agent_type_str(session.kind),
            deps.config.add_message_id,
            deps.forbidden_tokens.to_vec(),
            StreamingMode::Normal,
        )
        .await;

        let mut turn_done = false;
        match output.tool_calls {
            LLMCallToolCalls::ContextLimit => {
                session.task_failed = true;
                turn_done = true;
            }
            LLMCallToolCalls::None => {
                session.task_failed = true;
                turn_done = true;
            }
            LLMCallToolCalls::Parsed(valid, malformed) => {
                if valid.is_empty() && malformed.is_empty() {
                    turn_done = true;
                } else {
                    dispatch_and_merge(session, deps, sub_ctx, &agent_id, valid, malformed).await;
                }
            }
        }

        // `SPEC_FULL.md` §3 SUPPLEMENT: a snapshot is saved after every
        // main-agent turn. Sub-agent turns are folded into the main
        // snapshot via `SnapshotContext::record_sub_agent` instead, once
        // the sub-agent's own loop returns (see `sub_agent.rs`).
        if session.kind == AgentKind::Main {
            let step_status = if session.task_failed { "failed" } else { "ok" };
            deps.snapshot_ctx
                .record_step(format!("turn_{}", session.turn_index), "Turn completed", step_status)
                .await;
            let snapshot = deps.snapshot_ctx.snapshot(session, "running", None, None, None).await;
            deps.tracer.save(&snapshot).await;
        }

        if turn_done {
            break;
        }
    }

    // `SPEC_FULL.md` §4.8 step 6: a nested `reporter` agent scope brackets
    // the whole summary phase, satisfying DESIGN.md Open Question #1's
    // nesting requirement without opening a second scope under the same
    // `agent_id` the turn loop above just closed.
    let reporter_id = format!("{}-reporter", agent_id);
    deps.emitter
        .emit(Event::StartOfAgent {
            agent_id: reporter_id.clone(),
            name: "reporter".to_string(),
        })
        .await;

    let summary_text = summary::run_with_retry(
        session,
        deps,
        prompt_provider,
        prompt_options,
        streaming_mode,
        &reporter_id,
    )
    .await;

    deps.emitter
        .emit(Event::EndOfAgent {
            agent_id: reporter_id,
        })
        .await;

    AgentLoopResult {
        summary: summary_text,
        task_failed: session.task_failed,
    }
}
