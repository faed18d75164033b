//! Session domain module.
//!
//! # Module Structure
//!
//! - `model`: `Session` and its status, shell and agent enums
//! - `agent`: agent detection heuristic and the default-label rewrite
//! - `output`: bounded per-session `OutputLog` and replay planning
//! - `registry`: `SessionRegistry`, the single owner of session state

mod agent;
mod model;
mod output;
mod registry;

pub use agent::{apply_agent, cwd_basename, default_label, detect_agent, is_default_label};
pub use model::{AgentKind, Session, SessionStatus, ShellKind};
pub use output::{MAX_OUTPUT_CHUNKS, OutputCursor, OutputLog, ReplayPlan};
pub use registry::{AppendOutcome, CycleDirection, SessionRegistry};
