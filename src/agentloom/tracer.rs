//! Task tracer / logger (out of scope per `SPEC_FULL.md` §1, supplemented
//! per `SPEC_FULL.md` §3 from the persisted-state layout in §6). This
//! crate defines only the snapshot shape and a trait the Orchestrator
//! calls into; it implements no storage backend (no persistent storage
//! layer, per Non-goals). `NullTracer` is the default, matching the
//! teacher's default no-op observer pattern.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::agentloom::types::{AgentSession, Message};

/// One recorded step of a run, appended to `step_logs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepLog {
    pub step_name: String,
    pub message: String,
    pub status: String,
}

/// One sub-agent's recorded history, keyed by `session_id` in
/// `TaskSnapshot::sub_agent_message_history_sessions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubAgentHistory {
    pub system_prompt: String,
    pub message_history: Vec<Message>,
}

/// The per-task JSON snapshot described in `SPEC_FULL.md` §6. Written
/// atomically on each `TaskTracer::save`; must remain parseable even if a
/// run is interrupted mid-save (the caller is expected to write a
/// complete replacement file, not a partial append).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub task_id: String,
    pub status: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub final_boxed_answer: Option<String>,
    pub ground_truth: Option<String>,
    pub judge_result: Option<String>,
    pub main_agent_system_prompt: String,
    pub main_agent_message_history: Vec<Message>,
    pub sub_agent_message_history_sessions: HashMap<String, SubAgentHistory>,
    pub step_logs: Vec<StepLog>,
    pub performance_summary: Option<serde_json::Value>,
    pub error: Option<String>,
}

/// Append-only structured event log / snapshot writer. Implemented by the
/// host application; this crate ships only `NullTracer`.
#[async_trait]
pub trait TaskTracer: Send + Sync {
    async fn save(&self, snapshot: &TaskSnapshot);
}

/// Default no-op tracer.
pub struct NullTracer;

#[async_trait]
impl TaskTracer for NullTracer {
    async fn save(&self, _snapshot: &TaskSnapshot) {}
}

/// Accumulates the pieces of a `TaskSnapshot` that don't live on an
/// `AgentSession` — one per run, shared by reference into
/// `AgentLoopDeps` so both the Orchestrator and every nested
/// `AgentLoop::run` can call `TaskTracer::save` against a consistent
/// view. `SPEC_FULL.md` §3 SUPPLEMENT names three save points: after
/// preprocessing, after each (main-agent) turn, and at terminal
/// completion.
pub struct SnapshotContext {
    task_id: String,
    start_time: DateTime<Utc>,
    ground_truth: Option<String>,
    sub_agent_histories: Mutex<HashMap<String, SubAgentHistory>>,
    step_logs: Mutex<Vec<StepLog>>,
}

impl SnapshotContext {
    pub fn new(task_id: String, ground_truth: Option<String>) -> Self {
        SnapshotContext {
            task_id,
            start_time: Utc::now(),
            ground_truth,
            sub_agent_histories: Mutex::new(HashMap::new()),
            step_logs: Mutex::new(Vec::new()),
        }
    }

    /// Records a completed sub-agent's history, keyed by its session id.
    pub async fn record_sub_agent(&self, session_id: String, history: SubAgentHistory) {
        self.sub_agent_histories.lock().await.insert(session_id, history);
    }

    /// Appends one `StepLog` entry.
    pub async fn record_step(&self, step_name: impl Into<String>, message: impl Into<String>, status: impl Into<String>) {
        self.step_logs.lock().await.push(StepLog {
            step_name: step_name.into(),
            message: message.into(),
            status: status.into(),
        });
    }

    /// Builds a full `TaskSnapshot` from the current main session and
    /// accumulated sub-agent/step state.
    pub async fn snapshot(
        &self,
        main_session: &AgentSession,
        status: &str,
        end_time: Option<DateTime<Utc>>,
        final_boxed_answer: Option<String>,
        error: Option<String>,
    ) -> TaskSnapshot {
        TaskSnapshot {
            task_id: self.task_id.clone(),
            status: status.to_string(),
            start_time: self.start_time,
            end_time,
            final_boxed_answer,
            ground_truth: self.ground_truth.clone(),
            judge_result: None,
            main_agent_system_prompt: main_session.system_prompt.clone(),
            main_agent_message_history: main_session.history.clone(),
            sub_agent_message_history_sessions: self.sub_agent_histories.lock().await.clone(),
            step_logs: self.step_logs.lock().await.clone(),
            performance_summary: None,
            error,
        }
    }
}
