//! Workflow monitor
//!
//! Reads the state file whenever it changes, diffs it against the cached
//! snapshot and turns the differences into change events with agent-facing
//! instruction text attached. The cache is only replaced once the whole
//! batch for a change has been produced; any failure part way leaves it
//! stale so the change is seen again on the next observation.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::json;

use super::phase::PhaseSequence;
use super::state::WorkflowState;
use super::transitions::TransitionPermission;
use crate::guidance::{render_phase_guidance, ContentRenderer};
use crate::{Error, Result};

/// A semantic change between two workflow states
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChangeEvent {
    /// Phase changed (no `from` on first observation)
    PhaseTransition { from: Option<String>, to: String },
    /// Active issue changed
    IssueChanged {
        from: Option<String>,
        to: Option<String>,
    },
    /// Queue entries added or removed
    QueueChanged {
        added: Vec<String>,
        removed: Vec<String>,
    },
    /// Tracking reference changed
    TrackingChanged {
        from: Option<String>,
        to: Option<String>,
    },
    /// Description changed
    DescriptionChanged {
        from: Option<String>,
        to: Option<String>,
    },
}

impl fmt::Display for ChangeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeEvent::PhaseTransition { from, to } => {
                write!(f, "phase {} -> {}", from.as_deref().unwrap_or("(none)"), to)
            }
            ChangeEvent::IssueChanged { .. } => write!(f, "issue"),
            ChangeEvent::QueueChanged { added, removed } => {
                write!(f, "queue +{} -{}", added.len(), removed.len())
            }
            ChangeEvent::TrackingChanged { .. } => write!(f, "tracking"),
            ChangeEvent::DescriptionChanged { .. } => write!(f, "description"),
        }
    }
}

/// Compute the change events between a cached snapshot and a new state
///
/// Events come out in a fixed order with the phase transition first. With
/// no cached snapshot every populated field produces an event.
pub fn diff(old: Option<&WorkflowState>, new: &WorkflowState) -> Vec<ChangeEvent> {
    let mut events = Vec::new();

    let old_phase = old.map(|s| s.phase.as_str());
    if old_phase != Some(new.phase.as_str()) {
        events.push(ChangeEvent::PhaseTransition {
            from: old_phase.map(str::to_string),
            to: new.phase.clone(),
        });
    }

    let old_issue = old.and_then(|s| s.issue.clone());
    if old_issue != new.issue {
        events.push(ChangeEvent::IssueChanged {
            from: old_issue,
            to: new.issue.clone(),
        });
    }

    let old_queue: &[String] = old.map(|s| s.queue.as_slice()).unwrap_or(&[]);
    let added: Vec<String> = new
        .queue
        .iter()
        .filter(|item| !old_queue.contains(item))
        .cloned()
        .collect();
    let removed: Vec<String> = old_queue
        .iter()
        .filter(|item| !new.queue.contains(item))
        .cloned()
        .collect();
    if !added.is_empty() || !removed.is_empty() {
        events.push(ChangeEvent::QueueChanged { added, removed });
    }

    let old_tracking = old.and_then(|s| s.tracking.clone());
    if old_tracking != new.tracking {
        events.push(ChangeEvent::TrackingChanged {
            from: old_tracking,
            to: new.tracking.clone(),
        });
    }

    let old_description = old.and_then(|s| s.description.clone());
    if old_description != new.description {
        events.push(ChangeEvent::DescriptionChanged {
            from: old_description,
            to: new.description.clone(),
        });
    }

    events
}

/// A change event together with the instruction text for the agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkflowNotice {
    /// The underlying change
    pub event: ChangeEvent,
    /// Text to queue for the agent
    pub instruction: String,
}

/// A phase transition waiting for consent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTransition {
    /// Phase being left (`None` on first observation)
    pub from: Option<String>,
    /// Phase being entered
    pub to: String,
}

/// Watches the workflow state file and produces notices
#[derive(Debug)]
pub struct WorkflowMonitor {
    state_path: PathBuf,
    sequence: PhaseSequence,
    cached: Option<WorkflowState>,
    pending: Option<PendingTransition>,
}

impl WorkflowMonitor {
    /// Create a monitor for a state file
    pub fn new(state_path: impl Into<PathBuf>, sequence: PhaseSequence) -> Self {
        Self {
            state_path: state_path.into(),
            sequence,
            cached: None,
            pending: None,
        }
    }

    /// Monitored state file
    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    /// Phase sequence used for permission checks
    pub fn sequence(&self) -> &PhaseSequence {
        &self.sequence
    }

    /// Last successfully processed snapshot
    pub fn cached(&self) -> Option<&WorkflowState> {
        self.cached.as_ref()
    }

    /// Transition currently waiting for consent
    pub fn pending_transition(&self) -> Option<&PendingTransition> {
        self.pending.as_ref()
    }

    /// Process a change notification for `path`
    ///
    /// `path` may be relative or absolute; it is compared against the
    /// monitored file after both are made absolute. Unparseable content is logged and ignored: no notices, cache
    /// untouched. Renderer failures are returned as errors, also with the
    /// cache untouched.
    pub async fn on_file_changed(
        &mut self,
        path: &Path,
        renderer: &dyn ContentRenderer,
    ) -> Result<Vec<WorkflowNotice>> {
        if !same_path(path, &self.state_path) {
            tracing::debug!(path = %path.display(), "Ignoring change to unrelated file");
            return Ok(Vec::new());
        }

        let state = match self.read_state().await {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Ignoring unreadable workflow state; keeping previous snapshot"
                );
                return Ok(Vec::new());
            }
        };

        let events = diff(self.cached.as_ref(), &state);
        let mut pending = self.pending.clone();
        let mut notices = Vec::with_capacity(events.len());

        for event in events {
            let instruction = match &event {
                ChangeEvent::PhaseTransition { from, to } => {
                    self.phase_instruction(from.as_deref(), to, &state, renderer, &mut pending)
                        .await?
                }
                other => describe(other),
            };
            notices.push(WorkflowNotice { event, instruction });
        }

        if !notices.is_empty() {
            tracing::info!(
                changes = %notices
                    .iter()
                    .map(|n| n.event.to_string())
                    .collect::<Vec<_>>()
                    .join(", "),
                "Workflow state changed"
            );
        }

        self.cached = Some(state);
        self.pending = pending;
        Ok(notices)
    }

    /// Record a consent signal
    ///
    /// Without a target the pending transition (if any) is approved. With a
    /// target, consent is recorded for moving from the current phase to it,
    /// ahead of the state file changing. Returns the notice to deliver.
    ///
    /// Nothing is recorded unless the notice could be produced; after a
    /// renderer failure the pending transition is still waiting.
    pub async fn on_consent(
        &mut self,
        target: Option<&str>,
        renderer: &dyn ContentRenderer,
    ) -> Result<Option<WorkflowNotice>> {
        let current = self.cached.as_ref().map(|s| s.phase.clone());
        let (from, to) = match (self.pending.as_ref(), target) {
            (Some(pending), None) => (pending.from.clone(), pending.to.clone()),
            (Some(pending), Some(target)) if pending.to == target => {
                (pending.from.clone(), pending.to.clone())
            }
            (_, Some(target)) => (current.clone(), target.to_string()),
            (None, None) => {
                tracing::debug!("Consent received with nothing pending");
                return Ok(None);
            }
        };

        let mut sequence = self.sequence.clone();
        sequence.grant_transition_consent(from.as_deref(), &to);

        let event = ChangeEvent::PhaseTransition {
            from: from.clone(),
            to: to.clone(),
        };
        let instruction = match sequence.check_transition(from.as_deref(), &to) {
            TransitionPermission::Blocked {
                reason, suggestion, ..
            } => format!("Consent could not be applied: {}. {}", reason, suggestion),
            TransitionPermission::Allowed if current.as_deref() == Some(to.as_str()) => {
                let context = self.render_context(from.as_deref(), &to);
                let guidance = render_phase_guidance(renderer, &to, &context).await?;
                with_guidance(format!("Consent recorded for the '{}' phase.", to), guidance)
            }
            TransitionPermission::Allowed => format!(
                "Consent recorded for moving to the '{}' phase. Update the workflow state when ready.",
                to
            ),
        };

        self.sequence = sequence;
        self.pending = None;
        Ok(Some(WorkflowNotice { event, instruction }))
    }

    async fn read_state(&self) -> Result<WorkflowState> {
        match tokio::fs::read_to_string(&self.state_path).await {
            Ok(content) => WorkflowState::parse(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(WorkflowState::at_phase(&self.sequence.start().name))
            }
            Err(e) => Err(Error::Io(e)),
        }
    }

    async fn phase_instruction(
        &self,
        from: Option<&str>,
        to: &str,
        state: &WorkflowState,
        renderer: &dyn ContentRenderer,
        pending: &mut Option<PendingTransition>,
    ) -> Result<String> {
        match self.sequence.check_transition(from, to) {
            TransitionPermission::Allowed => {
                *pending = None;
                let mut context = self.render_context(from, to);
                context["issue"] = json!(state.issue);
                context["description"] = json!(state.description);
                let guidance = render_phase_guidance(renderer, to, &context).await?;
                Ok(with_guidance(format!("Entered the '{}' phase.", to), guidance))
            }
            TransitionPermission::Blocked {
                reason,
                suggestion,
                awaiting,
            } => {
                *pending = if awaiting.is_empty() {
                    None
                } else {
                    Some(PendingTransition {
                        from: from.map(str::to_string),
                        to: to.to_string(),
                    })
                };
                tracing::info!(?from, to, %reason, "Phase transition blocked");
                Ok(format!(
                    "The workflow phase was set to '{}', but the transition is blocked: {}. {}",
                    to, reason, suggestion
                ))
            }
        }
    }

    fn render_context(&self, from: Option<&str>, to: &str) -> serde_json::Value {
        json!({
            "phase": to,
            "from": from,
            "next": self.sequence.next(to).map(|p| p.name.clone()),
        })
    }
}

fn same_path(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (std::path::absolute(a), std::path::absolute(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn with_guidance(headline: String, guidance: Option<String>) -> String {
    match guidance {
        Some(text) if !text.trim().is_empty() => format!("{}\n\n{}", headline, text),
        _ => headline,
    }
}

fn describe_value_change(label: &str, from: &Option<String>, to: &Option<String>) -> String {
    match (from, to) {
        (Some(from), Some(to)) => format!("{} changed from '{}' to '{}'.", label, from, to),
        (None, Some(to)) => format!("{} is now '{}'.", label, to),
        (Some(from), None) => format!("{} '{}' was cleared.", label, from),
        (None, None) => format!("{} is unset.", label),
    }
}

fn describe(event: &ChangeEvent) -> String {
    match event {
        ChangeEvent::PhaseTransition { to, .. } => format!("Entered the '{}' phase.", to),
        ChangeEvent::IssueChanged { from, to } => describe_value_change("Active issue", from, to),
        ChangeEvent::TrackingChanged { from, to } => {
            describe_value_change("Tracking reference", from, to)
        }
        ChangeEvent::DescriptionChanged { from, to } => {
            describe_value_change("Work description", from, to)
        }
        ChangeEvent::QueueChanged { added, removed } => {
            let mut parts = Vec::new();
            if !added.is_empty() {
                parts.push(format!("added {}", added.join(", ")));
            }
            if !removed.is_empty() {
                parts.push(format!("removed {}", removed.join(", ")));
            }
            format!("Work queue updated: {}.", parts.join("; "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guidance::{NullRenderer, StaticRenderer};
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct FailingRenderer;

    #[async_trait]
    impl ContentRenderer for FailingRenderer {
        async fn render(
            &self,
            _pattern: &str,
            _context: &serde_json::Value,
        ) -> Result<Option<String>> {
            Err(Error::Render("renderer offline".to_string()))
        }
    }

    fn setup() -> (TempDir, PathBuf, WorkflowMonitor) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.yaml");
        let monitor = WorkflowMonitor::new(&path, PhaseSequence::canonical());
        (dir, path, monitor)
    }

    #[test]
    fn test_diff_batches_phase_first() {
        let old = WorkflowState::at_phase("discussion");
        let new = WorkflowState {
            phase: "planning".to_string(),
            issue: Some("ABC-1".to_string()),
            ..WorkflowState::default()
        };

        let events = diff(Some(&old), &new);
        assert_eq!(
            events,
            vec![
                ChangeEvent::PhaseTransition {
                    from: Some("discussion".to_string()),
                    to: "planning".to_string(),
                },
                ChangeEvent::IssueChanged {
                    from: None,
                    to: Some("ABC-1".to_string()),
                },
            ]
        );
    }

    #[test]
    fn test_diff_first_run_reports_populated_fields() {
        let new = WorkflowState {
            phase: "discussion".to_string(),
            issue: Some("ABC-1".to_string()),
            queue: vec!["ABC-2".to_string()],
            ..WorkflowState::default()
        };
        let events = diff(None, &new);
        assert_eq!(events.len(), 3);
        assert!(matches!(
            &events[0],
            ChangeEvent::PhaseTransition { from: None, to } if to == "discussion"
        ));
        assert!(matches!(&events[2], ChangeEvent::QueueChanged { added, removed }
            if added == &vec!["ABC-2".to_string()] && removed.is_empty()));
    }

    #[test]
    fn test_diff_queue_and_no_change() {
        let old = WorkflowState {
            phase: "check".to_string(),
            queue: vec!["A".to_string(), "B".to_string()],
            ..WorkflowState::default()
        };
        let mut new = old.clone();
        assert!(diff(Some(&old), &new).is_empty());

        new.queue = vec!["B".to_string(), "C".to_string()];
        assert_eq!(
            diff(Some(&old), &new),
            vec![ChangeEvent::QueueChanged {
                added: vec!["C".to_string()],
                removed: vec!["A".to_string()],
            }]
        );
    }

    #[tokio::test]
    async fn test_file_change_yields_batch_with_guidance_first() {
        let (_dir, path, mut monitor) = setup();
        let renderer = StaticRenderer::with_default_phase_guidance();

        std::fs::write(&path, "Phase: discussion\n").unwrap();
        let first = monitor.on_file_changed(&path, &renderer).await.unwrap();
        assert_eq!(first.len(), 1);

        std::fs::write(&path, "Phase: planning\nIssue: ABC-1\n").unwrap();
        let notices = monitor.on_file_changed(&path, &renderer).await.unwrap();
        assert_eq!(notices.len(), 2);
        assert!(matches!(
            notices[0].event,
            ChangeEvent::PhaseTransition { .. }
        ));
        assert!(notices[0].instruction.starts_with("Entered the 'planning' phase."));
        assert!(notices[0].instruction.contains("Write down a plan"));
        assert_eq!(notices[1].instruction, "Active issue is now 'ABC-1'.");
        assert_eq!(monitor.cached().unwrap().issue.as_deref(), Some("ABC-1"));
    }

    #[tokio::test]
    async fn test_malformed_content_keeps_cache_and_emits_nothing() {
        let (_dir, path, mut monitor) = setup();
        std::fs::write(&path, "Phase: discussion\n").unwrap();
        monitor.on_file_changed(&path, &NullRenderer).await.unwrap();

        std::fs::write(&path, "Phase: [planning\n").unwrap();
        let notices = monitor.on_file_changed(&path, &NullRenderer).await.unwrap();
        assert!(notices.is_empty());
        assert_eq!(monitor.cached().unwrap().phase, "discussion");

        std::fs::write(&path, "Phase: planning\n").unwrap();
        let notices = monitor.on_file_changed(&path, &NullRenderer).await.unwrap();
        assert_eq!(notices.len(), 1);
    }

    #[tokio::test]
    async fn test_renderer_failure_leaves_cache_stale() {
        let (_dir, path, mut monitor) = setup();
        std::fs::write(&path, "Phase: discussion\n").unwrap();
        monitor.on_file_changed(&path, &NullRenderer).await.unwrap();

        std::fs::write(&path, "Phase: planning\n").unwrap();
        assert!(monitor
            .on_file_changed(&path, &FailingRenderer)
            .await
            .is_err());
        assert_eq!(monitor.cached().unwrap().phase, "discussion");

        let notices = monitor.on_file_changed(&path, &NullRenderer).await.unwrap();
        assert_eq!(notices.len(), 1);
        assert_eq!(monitor.cached().unwrap().phase, "planning");
    }

    #[tokio::test]
    async fn test_missing_file_defaults_to_start_phase() {
        let (_dir, path, mut monitor) = setup();
        let notices = monitor.on_file_changed(&path, &NullRenderer).await.unwrap();
        assert_eq!(
            notices[0].event,
            ChangeEvent::PhaseTransition {
                from: None,
                to: "discussion".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_unrelated_path_is_ignored() {
        let (dir, path, mut monitor) = setup();
        std::fs::write(&path, "Phase: discussion\n").unwrap();
        let other = dir.path().join("other.yaml");
        assert!(monitor
            .on_file_changed(&other, &NullRenderer)
            .await
            .unwrap()
            .is_empty());
        assert!(monitor.cached().is_none());
    }

    #[tokio::test]
    async fn test_blocked_transition_then_consent() {
        let (_dir, path, mut monitor) = setup();
        let renderer = StaticRenderer::with_default_phase_guidance();
        std::fs::write(&path, "Phase: planning\n").unwrap();
        monitor.on_file_changed(&path, &renderer).await.unwrap();

        std::fs::write(&path, "Phase: implementation\n").unwrap();
        let notices = monitor.on_file_changed(&path, &renderer).await.unwrap();
        assert!(notices[0].instruction.contains("blocked"));
        assert!(notices[0].instruction.contains("Ask the user"));
        assert_eq!(
            monitor.pending_transition(),
            Some(&PendingTransition {
                from: Some("planning".to_string()),
                to: "implementation".to_string(),
            })
        );

        let notice = monitor.on_consent(None, &renderer).await.unwrap().unwrap();
        assert!(notice.instruction.starts_with("Consent recorded for the 'implementation' phase."));
        assert!(notice.instruction.contains("Implement the agreed plan"));
        assert!(monitor.pending_transition().is_none());
        assert!(monitor.sequence().can_enter("implementation"));

        assert!(monitor.on_consent(None, &renderer).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_consent_kept_pending_when_renderer_fails() {
        let (_dir, path, mut monitor) = setup();
        let renderer = StaticRenderer::with_default_phase_guidance();
        std::fs::write(&path, "Phase: planning\n").unwrap();
        monitor.on_file_changed(&path, &renderer).await.unwrap();
        std::fs::write(&path, "Phase: implementation\n").unwrap();
        monitor.on_file_changed(&path, &renderer).await.unwrap();

        assert!(monitor.on_consent(None, &FailingRenderer).await.is_err());
        assert!(monitor.pending_transition().is_some());
        assert!(!monitor.sequence().can_enter("implementation"));

        let notice = monitor.on_consent(None, &renderer).await.unwrap().unwrap();
        assert!(notice.instruction.starts_with("Consent recorded for the 'implementation' phase."));
        assert!(monitor.sequence().can_enter("implementation"));
    }

    #[tokio::test]
    async fn test_relative_and_absolute_paths_match() {
        let dir = TempDir::new_in(".").unwrap();
        let relative = dir.path().join("state.yaml");
        let absolute = std::env::current_dir().unwrap().join(&relative);
        std::fs::write(&absolute, "Phase: discussion\n").unwrap();

        let mut monitor = WorkflowMonitor::new(&absolute, PhaseSequence::canonical());
        let notices = monitor.on_file_changed(&relative, &NullRenderer).await.unwrap();
        assert_eq!(notices.len(), 1);
        assert_eq!(monitor.cached().unwrap().phase, "discussion");
    }

    #[tokio::test]
    async fn test_consent_ahead_of_state_change() {
        let (_dir, path, mut monitor) = setup();
        let renderer = StaticRenderer::with_default_phase_guidance();
        std::fs::write(&path, "Phase: planning\n").unwrap();
        monitor.on_file_changed(&path, &renderer).await.unwrap();

        let notice = monitor
            .on_consent(Some("implementation"), &renderer)
            .await
            .unwrap()
            .unwrap();
        assert!(notice.instruction.contains("Update the workflow state"));

        std::fs::write(&path, "Phase: implementation\n").unwrap();
        let notices = monitor.on_file_changed(&path, &renderer).await.unwrap();
        assert!(notices[0].instruction.starts_with("Entered the 'implementation' phase."));
    }
}
