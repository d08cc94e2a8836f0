//! CLI command implementations

pub mod phases;
pub mod serve;
pub mod state;

pub use phases::{CheckArgs, PhasesArgs};
pub use serve::ServeArgs;
pub use state::StateArgs;
