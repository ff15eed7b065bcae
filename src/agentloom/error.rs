//! Crate-level error type for the few places an error genuinely escapes a
//! public API. Styled on `cloudllm::orchestration::OrchestrationError`:
//! manual `Display`/`Error` impls, no `thiserror` dependency. Most of
//! `SPEC_FULL.md` §7's "error kinds" are *not* represented here — they are
//! state-machine transitions and `ToolResult::error` fields that never
//! escape as a Rust `Error` (see `SPEC_FULL.md` §7's propagation policy).
//!
//! A registered-but-unresolvable sub-agent (no `PromptProvider` for its
//! `prompt_class`) is caught here, at `Orchestrator::new` time, rather than
//! as a separate "not found" variant surfacing mid-run: per `DESIGN.md`
//! Open Question #7, a sub-agent failure discovered *during* a run is
//! reported as a plain tool-result string, not a Rust error.

use std::error::Error;
use std::fmt;

#[derive(Debug, Clone)]
pub enum OrchestratorError {
    /// The supplied `OrchestratorConfig` was structurally invalid.
    InvalidConfig(String),
}

impl fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrchestratorError::InvalidConfig(msg) => write!(f, "Invalid config: {}", msg),
        }
    }
}

impl Error for OrchestratorError {}
