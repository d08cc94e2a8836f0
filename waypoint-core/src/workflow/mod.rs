//! Workflow module for the development-phase state machine
//!
//! This module models the phase sequence and its consent markers, the
//! workflow state file, and the monitor that turns state file changes into
//! events for the agent.

pub mod monitor;
pub mod phase;
pub mod state;
pub mod transitions;
pub mod watch;

pub use monitor::{diff, ChangeEvent, PendingTransition, WorkflowMonitor, WorkflowNotice};
pub use phase::{
    resolve_phase_sequence, ConsentFormat, ConsentQuery, Phase, PhaseSequence, WorkflowFlag,
    IMPLEMENTATION_PHASE, START_PHASE,
};
pub use state::WorkflowState;
pub use transitions::{ConsentRequirement, TransitionPermission};
pub use watch::StateFileWatcher;
