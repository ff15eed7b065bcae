//! C6 — `SubAgentInvoker`. Runs a nested, self-contained `AgentLoop` as a
//! pseudo-tool call and returns its summary as the tool result. Grounded on
//! `examples/original_source/src/core/orchestrator.py::run_sub_agent`. See
//! `SPEC_FULL.md` §4.6.

use crate::agentloom::agent_loop::{self, AgentLoopDeps, SubAgentContext};
use crate::agentloom::config::SubAgentConfig;
use crate::agentloom::event::{Event, EventEmitter};
use crate::agentloom::llm_call_runner::StreamingMode;
use crate::agentloom::prompt::{PromptOptions, PromptProvider};
use crate::agentloom::tracer::SubAgentHistory;
use crate::agentloom::types::{AgentSession, Message};

/// Runs `run_sub_agent(name, task_description)`: a fresh session, sequenced
/// synchronously from the caller's current turn. Boxes the recursive call
/// back into `agent_loop::run` to break the otherwise-infinite async-fn
/// future size (this is the one genuinely cyclic edge in the call graph).
pub async fn invoke(
    name: &str,
    task_description: &str,
    sub_config: &SubAgentConfig,
    prompt_provider: &dyn PromptProvider,
    deps: &AgentLoopDeps<'_>,
    sub_ctx: &SubAgentContext<'_>,
) -> String {
    let session_id = format!("sub-{}-{}", name, uuid::Uuid::new_v4());
    log::info!("Delegating to sub-agent '{}' ({})...", name, session_id);

    let user_message = Message::user(format!(
        "{}\n\nPlease provide the answer and detailed supporting information.",
        task_description
    ));

    let options = PromptOptions::default();
    let system_prompt = prompt_provider.system_prompt(deps.tool_definitions, &options);

    let mut session = AgentSession::new_sub(
        session_id.clone(),
        name.to_string(),
        system_prompt,
        user_message,
        sub_config.max_turns,
        sub_config.max_tool_calls_per_turn,
    );

    emit_start(deps.emitter, &session_id, name).await;

    let result = Box::pin(agent_loop::run(
        &mut session,
        deps,
        prompt_provider,
        &options,
        sub_ctx,
        StreamingMode::Normal,
    ))
    .await;

    emit_end(deps.emitter, &session_id).await;

    // `SPEC_FULL.md` §3 SUPPLEMENT: a completed sub-agent's own history is
    // folded into the main task's `TaskSnapshot` under its session id.
    deps.snapshot_ctx
        .record_sub_agent(
            session_id,
            SubAgentHistory {
                system_prompt: session.system_prompt.clone(),
                message_history: session.history.clone(),
            },
        )
        .await;

    result.summary
}

async fn emit_start(emitter: &EventEmitter, agent_id: &str, name: &str) {
    emitter
        .emit(Event::StartOfAgent {
            agent_id: agent_id.to_string(),
            name: name.to_string(),
        })
        .await;
}

async fn emit_end(emitter: &EventEmitter, agent_id: &str) {
    emitter
        .emit(Event::EndOfAgent {
            agent_id: agent_id.to_string(),
        })
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agentloom::config::OrchestratorConfig;
    use crate::agentloom::llm_client::ServerDef;
    use crate::agentloom::prompt::PromptProviders;
    use crate::agentloom::test_support::{MockLLMClient, MockLLMStep, MockToolRegistry};
    use crate::agentloom::tracer::{NullTracer, SnapshotContext};
    use std::collections::HashMap;
    use std::sync::Arc;

    struct StubPromptProvider;
    impl PromptProvider for StubPromptProvider {
        fn system_prompt(&self, _tool_defs: &[ServerDef], _options: &PromptOptions) -> String {
            "sub system".to_string()
        }
        fn summary_prompt(&self, task: &str, _failed: bool, _options: &PromptOptions) -> String {
            format!("Summarize: {}", task)
        }
    }

    #[tokio::test]
    async fn invoke_runs_a_nested_loop_and_returns_its_summary() {
        let llm = MockLLMClient::new(vec![
            MockLLMStep::text("Let me think about this."),
            MockLLMStep::text("X is 42"),
        ]);
        let tools = MockToolRegistry::new(vec![]);
        let tracer = NullTracer;
        let (emitter, mut stream) = EventEmitter::new(64);
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
        let configs: HashMap<String, SubAgentConfig> = HashMap::new();
        let prompt_providers = PromptProviders::new(Arc::new(StubPromptProvider));
        let sub_ctx = SubAgentContext {
            configs: &configs,
            prompt_providers: &prompt_providers,
        };
        let sub_config = SubAgentConfig {
            prompt_class: "browsing".to_string(),
            max_turns: 3,
            max_tool_calls_per_turn: 2,
        };
        let provider = StubPromptProvider;

        let summary = invoke("browsing", "find X", &sub_config, &provider, &deps, &sub_ctx).await;
        assert_eq!(summary, "X is 42");

        emitter.close().await;
        let mut saw_start = false;
        let mut saw_end = false;
        while let Some(event) = stream.recv().await.flatten() {
            match event {
                Event::StartOfAgent { name, .. } if name == "browsing" => saw_start = true,
                Event::EndOfAgent { .. } => saw_end = true,
                _ => {}
            }
        }
        assert!(saw_start && saw_end);
    }
}
