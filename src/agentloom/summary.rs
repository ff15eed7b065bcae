//! C7 — `SummaryWithRetry`. Produces a session's final summary string,
//! tolerating context-limit failures by pruning history and retrying.
//! Grounded on
//! `examples/original_source/src/core/orchestrator.py::generate_summary`.
//! See `SPEC_FULL.md` §4.7.

use std::time::Duration;

use crate::agentloom::agent_loop::AgentLoopDeps;
use crate::agentloom::llm_call_runner::{self, LLMCallToolCalls, StreamingMode};
use crate::agentloom::prompt::{PromptOptions, PromptProvider};
use crate::agentloom::types::{AgentSession, Message, Role};

/// Returned on total failure, per `SPEC_FULL.md` §4.7 step 7.
pub const FATAL_SUMMARY_SENTINEL: &str =
    "[ERROR] Unable to generate final summary due to context limit or network issues. You should try again.";

const MAX_INNER_RETRIES: u32 = 5;
const INNER_RETRY_DELAY: Duration = Duration::from_secs(60);

enum Attempt {
    Success(String),
    ContextLimit,
    ExhaustedRetries,
}

/// Runs the outer (context-limit-pruning) / inner (transient-failure)
/// retry loop described in `SPEC_FULL.md` §4.7. `reporter_agent_id` is the
/// id every `start_of_llm`/`end_of_llm` pair emitted here carries — the
/// caller (`AgentLoop::run`) brackets this whole call with a matching
/// `start_of_agent(reporter)`/`end_of_agent(reporter)` pair, per
/// `SPEC_FULL.md` §4.8 step 6.
pub async fn run_with_retry(
    session: &mut AgentSession,
    deps: &AgentLoopDeps<'_>,
    prompt_provider: &dyn PromptProvider,
    prompt_options: &PromptOptions,
    streaming_mode: StreamingMode,
    reporter_agent_id: &str,
) -> String {
    let task_description = session
        .history
        .first()
        .map(|m| m.text())
        .unwrap_or_default();

    loop {
        let base_prompt = prompt_provider.summary_prompt(&task_description, session.task_failed, prompt_options);

        let prompt = deps
            .llm_client
            .handle_max_turns_reached_summary_prompt(&session.history, &base_prompt);

        if let Some(last) = session.history.last() {
            if last.role == Role::User {
                session.history.pop();
            }
        }

        session.history.push(Message::user(prompt));

        let attempt = run_inner_retries(session, deps, streaming_mode, reporter_agent_id).await;

        match attempt {
            Attempt::Success(text) => return text,
            Attempt::ExhaustedRetries => return FATAL_SUMMARY_SENTINEL.to_string(),
            Attempt::ContextLimit => {
                session.task_failed = true;

                // Pop the summary prompt appended above.
                session.history.pop();
                // Pop one preceding assistant/user pair, if present.
                if session.history.len() >= 2 {
                    session.history.pop();
                    session.history.pop();
                }

                // The source guards on "only the initial user + system"
                // remaining; this crate never stores the system message in
                // `history` (it is a separate `AgentSession` field), so the
                // equivalent floor is the single initial user message. See
                // `DESIGN.md` Open Question #11.
                if session.history.len() <= 1 {
                    return FATAL_SUMMARY_SENTINEL.to_string();
                }
            }
        }
    }
}

async fn run_inner_retries(
    session: &mut AgentSession,
    deps: &AgentLoopDeps<'_>,
    streaming_mode: StreamingMode,
    reporter_agent_id: &str,
) -> Attempt {
    for attempt_index in 1..=MAX_INNER_RETRIES {
        let step_id = format!("{}-summary-{}", session.session_id, attempt_index);
        let output = llm_call_runner::run(
            deps.llm_client,
            deps.tracer,
            deps.emitter,
            reporter_agent_id,
            &session.system_prompt,
            &mut session.history,
            &[],
            deps.config.keep_tool_result,
            &step_id,
            "reporter",
            deps.config.add_message_id,
            deps.forbidden_tokens.to_vec(),
            streaming_mode,
        )
        .await;

        if matches!(output.tool_calls, LLMCallToolCalls::ContextLimit) {
            return Attempt::ContextLimit;
        }

        if let Some(text) = output.assistant_text {
            if !text.is_empty() {
                return Attempt::Success(text);
            }
        }

        if attempt_index < MAX_INNER_RETRIES {
            tokio::time::sleep(INNER_RETRY_DELAY).await;
        }
    }
    Attempt::ExhaustedRetries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agentloom::config::OrchestratorConfig;
    use crate::agentloom::event::EventEmitter;
    use crate::agentloom::test_support::{MockLLMClient, MockLLMStep, MockToolRegistry};
    use crate::agentloom::tracer::{NullTracer, SnapshotContext};

    struct StubPromptProvider;
    impl PromptProvider for StubPromptProvider {
        fn system_prompt(&self, _tool_defs: &[crate::agentloom::llm_client::ServerDef], _options: &PromptOptions) -> String {
            "system".to_string()
        }
        fn summary_prompt(&self, task: &str, failed: bool, _options: &PromptOptions) -> String {
            format!("Summarize (failed={}): {}", failed, task)
        }
    }

    #[tokio::test]
    async fn succeeds_on_first_attempt() {
        let llm = MockLLMClient::new(vec![MockLLMStep::text("final summary text")]);
        let tools = MockToolRegistry::new(vec![]);
        let tracer = NullTracer;
        let (emitter, _stream) = EventEmitter::new(16);
        let config = OrchestratorConfig::default();
        let forbidden: Vec<String> = vec![];
        let snapshot_ctx = SnapshotContext::new("test-task".to_string(), None);
        let deps = AgentLoopDeps {
            llm_client: &llm,
            tool_registry: &tools,
            tracer: &tracer,
            emitter: &emitter,
            config: &config,
            tool_definitions: &[],
            forbidden_tokens: &forbidden,
            snapshot_ctx: &snapshot_ctx,
        };
        let provider = StubPromptProvider;
        let options = PromptOptions::default();

        let mut session = AgentSession::new_main("system".to_string(), Message::user("task"), 5, 5);
        let result = run_with_retry(&mut session, &deps, &provider, &options, StreamingMode::FinalMainSummary, "main-reporter").await;
        assert_eq!(result, "final summary text");
    }

    #[tokio::test]
    async fn context_limit_prunes_history_then_retries() {
        let llm = MockLLMClient::new(vec![
            MockLLMStep::context_limit(),
            MockLLMStep::text("recovered summary"),
        ]);
        let tools = MockToolRegistry::new(vec![]);
        let tracer = NullTracer;
        let (emitter, _stream) = EventEmitter::new(16);
        let config = OrchestratorConfig::default();
        let forbidden: Vec<String> = vec![];
        let snapshot_ctx = SnapshotContext::new("test-task".to_string(), None);
        let deps = AgentLoopDeps {
            llm_client: &llm,
            tool_registry: &tools,
            tracer: &tracer,
            emitter: &emitter,
            config: &config,
            tool_definitions: &[],
            forbidden_tokens: &forbidden,
            snapshot_ctx: &snapshot_ctx,
        };
        let provider = StubPromptProvider;
        let options = PromptOptions::default();

        let mut session = AgentSession::new_main("system".to_string(), Message::user("task"), 5, 5);
        session.history.push(Message::assistant("first reasoning"));
        session.history.push(Message::user("first context"));
        session.history.push(Message::assistant("partial reasoning"));
        session.history.push(Message::user("more context"));

        let result = run_with_retry(&mut session, &deps, &provider, &options, StreamingMode::FinalMainSummary, "main-reporter").await;
        assert_eq!(result, "recovered summary");
        assert!(session.task_failed);
    }

    #[tokio::test]
    async fn returns_fatal_sentinel_when_history_too_short_to_prune() {
        let llm = MockLLMClient::new(vec![MockLLMStep::context_limit()]);
        let tools = MockToolRegistry::new(vec![]);
        let tracer = NullTracer;
        let (emitter, _stream) = EventEmitter::new(16);
        let config = OrchestratorConfig::default();
        let forbidden: Vec<String> = vec![];
        let snapshot_ctx = SnapshotContext::new("test-task".to_string(), None);
        let deps = AgentLoopDeps {
            llm_client: &llm,
            tool_registry: &tools,
            tracer: &tracer,
            emitter: &emitter,
            config: &config,
            tool_definitions: &[],
            forbidden_tokens: &forbidden,
            snapshot_ctx: &snapshot_ctx,
        };
        let provider = StubPromptProvider;
        let options = PromptOptions::default();

        let mut session = AgentSession::new_main("system".to_string(), Message::user("task"), 5, 5);
        let result = run_with_retry(&mut session, &deps, &provider, &options, StreamingMode::FinalMainSummary, "main-reporter").await;
        assert_eq!(result, FATAL_SUMMARY_SENTINEL);
    }
}
