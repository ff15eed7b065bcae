//! C1 — `EventEmitter`. Push lifecycle events to a bounded channel for an
//! external observer, with backpressure instead of drops. See
//! `SPEC_FULL.md` §4.1.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::agentloom::types::UsageCounters;

/// Discriminates which phase of a run a `usage_info` event was taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageScene {
    ToolCall,
    MainAgentEnd,
    SubAgentEnd,
}

/// One dispatched-tool-call lifecycle point. `tool_call` events are emitted
/// both when a call is issued and when its result comes back, sharing the
/// same `call_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallPhase {
    Issued,
    Completed,
}

/// The exhaustive event taxonomy from `SPEC_FULL.md` §4.1.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum Event {
    StartOfWorkflow {
        workflow_id: String,
    },
    EndOfWorkflow {
        workflow_id: String,
    },
    StartOfAgent {
        agent_id: String,
        name: String,
    },
    EndOfAgent {
        agent_id: String,
    },
    StartOfLlm {
        agent_id: String,
    },
    EndOfLlm {
        agent_id: String,
    },
    Message {
        agent_id: String,
        text: String,
    },
    ToolCall {
        agent_id: String,
        call_id: String,
        server_name: String,
        tool_name: String,
        phase: ToolCallPhase,
        /// Partial or final text shown to the observer alongside a tool
        /// call in progress (streamed model commentary, not the result).
        show_text: Option<String>,
    },
    UsageInfo {
        agent_id: String,
        scene: UsageScene,
        usage: UsageCounters,
    },
    ShowError {
        agent_id: String,
        message: String,
    },
}

/// Receiving half of the event stream. `None` is the end-of-stream
/// sentinel (in addition to the channel itself closing when the emitter is
/// dropped).
pub type EventStream = mpsc::Receiver<Option<Event>>;

/// The emitting half, owned by the `Orchestrator` for the lifetime of one
/// run. Cloning shares the channel and the idempotent-close flag, so every
/// nested `AgentLoop` can hold its own clone.
#[derive(Clone)]
pub struct EventEmitter {
    sender: mpsc::Sender<Option<Event>>,
    closed: Arc<AtomicBool>,
}

impl EventEmitter {
    /// Creates a bound emitter/stream pair. `capacity` is the channel's
    /// backpressure bound: once full, `emit` blocks the producer rather
    /// than dropping events.
    pub fn new(capacity: usize) -> (Self, EventStream) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (
            EventEmitter {
                sender,
                closed: Arc::new(AtomicBool::new(false)),
            },
            receiver,
        )
    }

    /// Pushes an event. Blocks (applies backpressure) if the channel is
    /// full. If the receiver has been dropped, emission is silently a
    /// no-op, matching "if no observer is attached, emission is a no-op".
    pub async fn emit(&self, event: Event) {
        let _ = self.sender.send(Some(event)).await;
    }

    /// Idempotent. Sends the end-of-stream sentinel exactly once.
    pub async fn close(&self) {
        if self
            .closed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let _ = self.sender.send(None).await;
        }
    }
}
