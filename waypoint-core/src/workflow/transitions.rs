//! Phase transition permissions
//!
//! A blocked transition is not an error: it is reported back to the agent as
//! ordinary instruction text asking it to obtain the missing consent.

use std::fmt;

/// A consent marker that has not been satisfied yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsentRequirement {
    /// Entering this phase needs explicit consent
    Entry(String),
    /// Leaving this phase needs explicit consent
    Exit(String),
}

impl ConsentRequirement {
    /// The phase carrying the consent marker
    pub fn phase(&self) -> &str {
        match self {
            ConsentRequirement::Entry(phase) | ConsentRequirement::Exit(phase) => phase,
        }
    }
}

impl fmt::Display for ConsentRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsentRequirement::Entry(phase) => write!(f, "entering '{}'", phase),
            ConsentRequirement::Exit(phase) => write!(f, "leaving '{}'", phase),
        }
    }
}

/// Result of checking a phase transition against the sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionPermission {
    /// Transition is allowed to proceed
    Allowed,
    /// Transition is blocked until consent is given or the target fixed
    Blocked {
        /// Reason why the transition is blocked
        reason: String,
        /// Suggestion for the agent on how to unblock it
        suggestion: String,
        /// Consent markers still waiting for confirmation (empty for unknown phases)
        awaiting: Vec<ConsentRequirement>,
    },
}

impl TransitionPermission {
    /// Check if the transition is allowed
    pub fn is_allowed(&self) -> bool {
        matches!(self, TransitionPermission::Allowed)
    }

    /// Check if the transition is blocked
    pub fn is_blocked(&self) -> bool {
        matches!(self, TransitionPermission::Blocked { .. })
    }

    /// Get the blocking reason if blocked
    pub fn blocking_reason(&self) -> Option<&str> {
        match self {
            TransitionPermission::Blocked { reason, .. } => Some(reason),
            TransitionPermission::Allowed => None,
        }
    }

    /// Get the suggestion if blocked
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            TransitionPermission::Blocked { suggestion, .. } => Some(suggestion),
            TransitionPermission::Allowed => None,
        }
    }

    /// Consent markers the transition is waiting on
    pub fn awaiting(&self) -> &[ConsentRequirement] {
        match self {
            TransitionPermission::Blocked { awaiting, .. } => awaiting,
            TransitionPermission::Allowed => &[],
        }
    }

    /// Whether the block can be lifted by a consent signal
    pub fn needs_consent(&self) -> bool {
        !self.awaiting().is_empty()
    }
}
