//! Outbound instruction queue with acknowledgement tracking
//!
//! Instructions are plain text for the agent. Tracked instructions are
//! re-sent with an escalating prefix until acknowledged or until their
//! delivery budget runs out. Tracking ids never leave this module's owner:
//! the agent only ever sees the text.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::{Duration, Instant};

use uuid::Uuid;

/// Prefix added to the second delivery of a tracked instruction
pub const IMPORTANT_PREFIX: &str = "IMPORTANT: ";

/// Prefix added to the third and later deliveries
pub const URGENT_PREFIX: &str = "URGENT: ";

/// Opaque id of a tracked instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstructionId(Uuid);

impl InstructionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for InstructionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An instruction awaiting acknowledgement
#[derive(Debug, Clone)]
pub struct TrackedInstruction {
    /// Tracking id
    pub id: InstructionId,
    /// Instruction text without any escalation prefix
    pub content: String,
    /// When it was most recently sent
    pub queued_at: Instant,
    /// Number of re-sends so far
    pub retry_count: u32,
    /// Delivery budget, the first send included
    pub max_retries: u32,
    seq: u64,
}

impl TrackedInstruction {
    /// Number of times the text has been queued for the agent
    pub fn deliveries(&self) -> u32 {
        self.retry_count + 1
    }

    fn exhausted(&self) -> bool {
        self.deliveries() >= self.max_retries
    }
}

/// Prefix for a delivery after `retry_count` re-sends
fn escalation_prefix(retry_count: u32) -> &'static str {
    match retry_count {
        0 => "",
        1 => IMPORTANT_PREFIX,
        _ => URGENT_PREFIX,
    }
}

/// Outcome of one retry cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryReport {
    /// The cycle was skipped because instructions were still pending
    pub skipped_busy: bool,
    /// Instructions queued again
    pub resent: Vec<InstructionId>,
    /// Instructions given up on
    pub dropped: Vec<InstructionId>,
}

/// FIFO of outbound instructions plus the set of tracked instructions
#[derive(Debug, Default)]
pub struct InstructionQueue {
    pending: VecDeque<String>,
    tracked: HashMap<InstructionId, TrackedInstruction>,
    by_content: HashMap<String, InstructionId>,
    next_seq: u64,
}

impl InstructionQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an untracked instruction
    pub fn queue(&mut self, content: impl Into<String>) {
        self.pending.push_back(content.into());
    }

    /// Append a tracked instruction, returning its id
    ///
    /// Content that is already tracked is not queued again; the existing id
    /// is returned instead.
    pub fn queue_with_ack(&mut self, content: impl Into<String>, max_retries: u32) -> InstructionId {
        self.queue_with_ack_at(content, max_retries, Instant::now())
    }

    pub(crate) fn queue_with_ack_at(
        &mut self,
        content: impl Into<String>,
        max_retries: u32,
        now: Instant,
    ) -> InstructionId {
        let content = content.into();
        if let Some(id) = self.by_content.get(&content) {
            tracing::debug!(%id, "Instruction already tracked, not queueing again");
            return *id;
        }

        let id = InstructionId::new();
        let seq = self.next_seq;
        self.next_seq += 1;

        self.tracked.insert(
            id,
            TrackedInstruction {
                id,
                content: content.clone(),
                queued_at: now,
                retry_count: 0,
                max_retries,
                seq,
            },
        );
        self.by_content.insert(content.clone(), id);
        self.pending.push_back(content);

        tracing::debug!(%id, max_retries, "Tracking instruction");
        id
    }

    /// Stop tracking an instruction
    ///
    /// Unknown or already removed ids are ignored; returns whether anything
    /// was removed.
    pub fn acknowledge(&mut self, id: &InstructionId) -> bool {
        match self.tracked.remove(id) {
            Some(instruction) => {
                self.by_content.remove(&instruction.content);
                tracing::debug!(%id, deliveries = instruction.deliveries(), "Instruction acknowledged");
                true
            }
            None => {
                tracing::debug!(%id, "Acknowledgement for unknown instruction ignored");
                false
            }
        }
    }

    /// Take every pending instruction in FIFO order
    pub fn drain(&mut self) -> Vec<String> {
        self.pending.drain(..).collect()
    }

    /// Number of instructions waiting to be drained
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Pending instructions, oldest first
    pub fn pending(&self) -> impl Iterator<Item = &str> {
        self.pending.iter().map(String::as_str)
    }

    /// Look up a tracked instruction
    pub fn tracked(&self, id: &InstructionId) -> Option<&TrackedInstruction> {
        self.tracked.get(id)
    }

    /// Number of tracked instructions
    pub fn tracked_len(&self) -> usize {
        self.tracked.len()
    }

    /// Check whether `content` is currently tracked
    pub fn is_tracked(&self, content: &str) -> bool {
        self.by_content.contains_key(content)
    }

    /// Run one retry cycle
    ///
    /// Nothing happens while instructions are still pending. Otherwise every
    /// tracked instruction that has waited at least `min_dwell` since its
    /// last send is either re-queued with an escalating prefix or, once its
    /// delivery budget is spent, dropped.
    pub fn retry_cycle(&mut self, now: Instant, min_dwell: Duration) -> RetryReport {
        let mut report = RetryReport::default();

        if !self.pending.is_empty() {
            tracing::debug!(
                pending = self.pending.len(),
                "Skipping retry cycle while instructions are pending"
            );
            report.skipped_busy = true;
            return report;
        }

        let mut due: Vec<(u64, InstructionId)> = self
            .tracked
            .values()
            .filter(|t| now.saturating_duration_since(t.queued_at) >= min_dwell)
            .map(|t| (t.seq, t.id))
            .collect();
        due.sort();

        for (_, id) in due {
            let Some(instruction) = self.tracked.get_mut(&id) else {
                continue;
            };

            if instruction.exhausted() {
                tracing::warn!(
                    %id,
                    content = %instruction.content,
                    retries = instruction.retry_count,
                    "Giving up on unacknowledged instruction"
                );
                let content = instruction.content.clone();
                self.tracked.remove(&id);
                self.by_content.remove(&content);
                report.dropped.push(id);
                continue;
            }

            instruction.retry_count += 1;
            instruction.queued_at = now;
            let text = format!(
                "{}{}",
                escalation_prefix(instruction.retry_count),
                instruction.content
            );
            tracing::info!(%id, retry = instruction.retry_count, "Re-sending unacknowledged instruction");
            self.pending.push_back(text);
            report.resent.push(id);
        }

        report
    }

    /// Discard everything, returning (pending, tracked) counts
    pub fn clear(&mut self) -> (usize, usize) {
        let counts = (self.pending.len(), self.tracked.len());
        self.pending.clear();
        self.tracked.clear();
        self.by_content.clear();
        counts
    }
}
