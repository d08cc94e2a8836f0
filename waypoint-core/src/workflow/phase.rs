//! Phase sequence model
//!
//! Turns the workflow flag from configuration into an ordered, consent-marked
//! phase sequence and answers permission questions for transitions.
//!
//! The flag takes one of three shapes:
//! - `true`: the canonical sequence with default consent markers
//! - a list of phase names: membership only, no consent gating
//! - a map of phase name to boolean: canonical markers for known phases,
//!   with the boolean recording consent that has already been granted

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::de::{self, MapAccess, SeqAccess, Visitor};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::transitions::{ConsentRequirement, TransitionPermission};
use crate::{Error, Result};

/// Phase every sequence starts from
pub const START_PHASE: &str = "discussion";

/// Phase every sequence must be able to reach
pub const IMPLEMENTATION_PHASE: &str = "implementation";

/// Canonical phases as (name, entry consent, exit consent)
const CANONICAL_PHASES: [(&str, bool, bool); 5] = [
    ("discussion", false, false),
    ("planning", false, false),
    ("implementation", true, false),
    ("check", false, false),
    ("review", false, true),
];

/// A named stage of the development workflow
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Phase {
    /// Phase name
    pub name: String,
    /// Entering requires explicit consent
    pub requires_entry_consent: bool,
    /// Leaving requires explicit consent
    pub requires_exit_consent: bool,
}

impl Phase {
    /// Create an ungated phase
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            requires_entry_consent: false,
            requires_exit_consent: false,
        }
    }

    /// Canonical phase with its default markers, if the name is known
    fn canonical(name: &str) -> Option<Self> {
        CANONICAL_PHASES
            .iter()
            .find(|(n, _, _)| *n == name)
            .map(|(n, entry, exit)| Self {
                name: n.to_string(),
                requires_entry_consent: *entry,
                requires_exit_consent: *exit,
            })
    }

    /// Short marker string used in listings ("entry", "exit", "entry+exit")
    pub fn markers(&self) -> Option<&'static str> {
        match (self.requires_entry_consent, self.requires_exit_consent) {
            (true, true) => Some("entry+exit"),
            (true, false) => Some("entry"),
            (false, true) => Some("exit"),
            (false, false) => None,
        }
    }
}

/// Workflow flag as read from configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowFlag {
    /// `true` selects the canonical sequence, `false` disables the workflow
    Enabled(bool),
    /// Ordered list of phase names
    Phases(Vec<String>),
    /// Ordered map of phase name to "consent already granted"
    Consents(Vec<(String, bool)>),
}

impl Default for WorkflowFlag {
    fn default() -> Self {
        WorkflowFlag::Enabled(true)
    }
}

impl Serialize for WorkflowFlag {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            WorkflowFlag::Enabled(enabled) => serializer.serialize_bool(*enabled),
            WorkflowFlag::Phases(names) => {
                let mut seq = serializer.serialize_seq(Some(names.len()))?;
                for name in names {
                    seq.serialize_element(name)?;
                }
                seq.end()
            }
            WorkflowFlag::Consents(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (name, granted) in entries {
                    map.serialize_entry(name, granted)?;
                }
                map.end()
            }
        }
    }
}

struct FlagVisitor;

impl<'de> Visitor<'de> for FlagVisitor {
    type Value = WorkflowFlag;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("true, a list of phase names, or a map of phase name to boolean")
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> std::result::Result<Self::Value, E> {
        Ok(WorkflowFlag::Enabled(v))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<Self::Value, A::Error> {
        let mut names = Vec::new();
        while let Some(name) = seq.next_element::<String>()? {
            names.push(name);
        }
        Ok(WorkflowFlag::Phases(names))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<Self::Value, A::Error> {
        let mut entries = Vec::new();
        while let Some((name, granted)) = map.next_entry::<String, bool>()? {
            entries.push((name, granted));
        }
        Ok(WorkflowFlag::Consents(entries))
    }
}

impl<'de> Deserialize<'de> for WorkflowFlag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_any(FlagVisitor)
    }
}

impl FromStr for WorkflowFlag {
    type Err = Error;

    /// Parse a flag given as JSON (`true`, `["discussion", ...]`, `{"review": true}`)
    fn from_str(s: &str) -> Result<Self> {
        serde_json::from_str(s.trim())
            .map_err(|e| Error::Validation(format!("Invalid workflow flag '{}': {}", s, e)))
    }
}

/// Which flag shape produced a sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsentFormat {
    /// `true`: canonical markers, no consent recorded yet
    Canonical,
    /// Plain list: presence checks only, consent cannot be queried
    List,
    /// Map: canonical markers plus consent recorded per phase
    Map,
}

/// A `key=value` consent query, e.g. `implementation=true`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsentQuery {
    /// Phase the query is about
    pub phase: String,
    /// Expected explicit-consent value
    pub granted: bool,
}

impl FromStr for ConsentQuery {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (key, value) = s
            .split_once('=')
            .ok_or_else(|| Error::Validation(format!("Consent query '{}' is not key=value", s)))?;
        let phase = key.trim();
        if phase.is_empty() {
            return Err(Error::Validation(format!(
                "Consent query '{}' has an empty phase",
                s
            )));
        }
        let granted = value.trim().parse::<bool>().map_err(|_| {
            Error::Validation(format!("Consent query '{}' must end in =true or =false", s))
        })?;
        Ok(Self {
            phase: phase.to_string(),
            granted,
        })
    }
}

/// Ordered, consent-marked phase sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseSequence {
    phases: Vec<Phase>,
    format: ConsentFormat,
    consents: BTreeSet<String>,
}

/// Resolve a workflow flag into a phase sequence
///
/// Returns `Ok(None)` when the workflow is disabled (`false`). Malformed
/// flags are validation errors, never a silent default.
pub fn resolve_phase_sequence(flag: &WorkflowFlag) -> Result<Option<PhaseSequence>> {
    let sequence = match flag {
        WorkflowFlag::Enabled(false) => return Ok(None),
        WorkflowFlag::Enabled(true) => PhaseSequence::canonical(),
        WorkflowFlag::Phases(names) => {
            if names.is_empty() {
                return Err(Error::Validation("Workflow phase list is empty".to_string()));
            }
            let mut phases = Vec::with_capacity(names.len());
            for name in names {
                let name = normalize_name(name)?;
                if Phase::canonical(&name).is_none() {
                    return Err(Error::Validation(format!(
                        "Unknown workflow phase '{}' (known phases: {})",
                        name,
                        canonical_names().join(", ")
                    )));
                }
                phases.push(Phase::new(name));
            }
            PhaseSequence::build(phases, ConsentFormat::List, BTreeSet::new())?
        }
        WorkflowFlag::Consents(entries) => {
            if entries.is_empty() {
                return Err(Error::Validation("Workflow phase map is empty".to_string()));
            }
            let mut phases = Vec::with_capacity(entries.len());
            let mut consents = BTreeSet::new();
            for (name, granted) in entries {
                let name = normalize_name(name)?;
                let phase = Phase::canonical(&name).unwrap_or_else(|| Phase::new(name.clone()));
                if *granted {
                    consents.insert(name);
                }
                phases.push(phase);
            }
            PhaseSequence::build(phases, ConsentFormat::Map, consents)?
        }
    };

    Ok(Some(sequence))
}

fn normalize_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::Validation("Workflow phase name is empty".to_string()));
    }
    Ok(name.to_string())
}

fn canonical_names() -> Vec<&'static str> {
    CANONICAL_PHASES.iter().map(|(n, _, _)| *n).collect()
}

impl PhaseSequence {
    /// The canonical five-phase sequence
    pub fn canonical() -> Self {
        Self {
            phases: CANONICAL_PHASES
                .iter()
                .filter_map(|(name, _, _)| Phase::canonical(name))
                .collect(),
            format: ConsentFormat::Canonical,
            consents: BTreeSet::new(),
        }
    }

    fn build(
        phases: Vec<Phase>,
        format: ConsentFormat,
        consents: BTreeSet<String>,
    ) -> Result<Self> {
        let mut seen = BTreeSet::new();
        for phase in &phases {
            if !seen.insert(phase.name.as_str()) {
                return Err(Error::Validation(format!(
                    "Workflow phase '{}' is listed more than once",
                    phase.name
                )));
            }
        }
        for required in [START_PHASE, IMPLEMENTATION_PHASE] {
            if !seen.contains(required) {
                return Err(Error::Validation(format!(
                    "Workflow must include the '{}' phase",
                    required
                )));
            }
        }
        Ok(Self {
            phases,
            format,
            consents,
        })
    }

    /// Phases in order
    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    /// Flag shape this sequence came from
    pub fn format(&self) -> ConsentFormat {
        self.format
    }

    /// Default start phase (the first in the sequence)
    pub fn start(&self) -> &Phase {
        // build() guarantees at least the start and implementation phases
        &self.phases[0]
    }

    /// Look up a phase by name
    pub fn get(&self, name: &str) -> Option<&Phase> {
        self.phases.iter().find(|p| p.name == name)
    }

    /// Check whether a phase is part of the sequence
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Phase names in order
    pub fn names(&self) -> Vec<&str> {
        self.phases.iter().map(|p| p.name.as_str()).collect()
    }

    /// The phase following `name`, if any
    pub fn next(&self, name: &str) -> Option<&Phase> {
        let idx = self.phases.iter().position(|p| p.name == name)?;
        self.phases.get(idx + 1)
    }

    /// Whether explicit consent has been recorded for a phase
    ///
    /// Plain-list sequences never record consent.
    pub fn has_consent(&self, name: &str) -> bool {
        self.format != ConsentFormat::List && self.consents.contains(name)
    }

    /// True unless the phase is entry-gated without recorded consent
    pub fn can_enter(&self, name: &str) -> bool {
        match self.get(name) {
            Some(phase) => !phase.requires_entry_consent || self.has_consent(name),
            None => false,
        }
    }

    /// True unless the phase is exit-gated without recorded consent
    pub fn can_exit(&self, name: &str) -> bool {
        match self.get(name) {
            Some(phase) => !phase.requires_exit_consent || self.has_consent(name),
            None => false,
        }
    }

    /// Answer a `key=value` consent query
    ///
    /// A plain-list sequence carries no consent information, so every query
    /// is reported as not satisfied rather than inferred from membership.
    pub fn satisfies(&self, query: &ConsentQuery) -> bool {
        if self.format == ConsentFormat::List {
            return false;
        }
        self.has_consent(&query.phase) == query.granted
    }

    /// Check whether moving from `from` to `to` is permitted
    ///
    /// `from` is `None` on the first observation of the workflow, in which
    /// case only the target is checked.
    pub fn check_transition(&self, from: Option<&str>, to: &str) -> TransitionPermission {
        let Some(target) = self.get(to) else {
            return TransitionPermission::Blocked {
                reason: format!("'{}' is not a phase of this workflow", to),
                suggestion: format!("Use one of: {}", self.names().join(", ")),
                awaiting: Vec::new(),
            };
        };

        if from == Some(to) {
            return TransitionPermission::Allowed;
        }

        let awaiting = self.requirements(from, target);
        if awaiting.is_empty() {
            return TransitionPermission::Allowed;
        }

        let what = awaiting
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" and ");
        let reason = format!("Explicit user consent is required for {}", what);
        let suggestion = match from {
            Some(from) => format!(
                "Ask the user to confirm moving from '{}' to '{}'. One confirmation covers the whole transition.",
                from, to
            ),
            None => format!("Ask the user to confirm working in the '{}' phase.", to),
        };

        TransitionPermission::Blocked {
            reason,
            suggestion,
            awaiting,
        }
    }

    fn requirements(&self, from: Option<&str>, target: &Phase) -> Vec<ConsentRequirement> {
        let mut awaiting = Vec::new();
        if let Some(source) = from.and_then(|name| self.get(name)) {
            if source.requires_exit_consent && !self.has_consent(&source.name) {
                awaiting.push(ConsentRequirement::Exit(source.name.clone()));
            }
        }
        if target.requires_entry_consent && !self.has_consent(&target.name) {
            awaiting.push(ConsentRequirement::Entry(target.name.clone()));
        }
        awaiting
    }

    /// Record one consent signal for a transition
    ///
    /// A single signal satisfies both the exit marker of `from` and the entry
    /// marker of `to`. Returns the phases whose consent was newly recorded.
    pub fn grant_transition_consent(&mut self, from: Option<&str>, to: &str) -> Vec<String> {
        if self.format == ConsentFormat::List {
            tracing::debug!(to, "Ignoring consent for a plain-list workflow");
            return Vec::new();
        }
        let Some(target) = self.get(to) else {
            return Vec::new();
        };

        let granted: Vec<String> = self
            .requirements(from, target)
            .into_iter()
            .map(|req| req.phase().to_string())
            .collect();

        for phase in &granted {
            self.consents.insert(phase.clone());
        }

        if !granted.is_empty() {
            tracing::info!(?from, to, phases = ?granted, "Recorded workflow consent");
        }
        granted
    }
}

impl fmt::Display for PhaseSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .phases
            .iter()
            .map(|p| match p.markers() {
                Some(m) => format!("{} [{}]", p.name, m),
                None => p.name.clone(),
            })
            .collect();
        write!(f, "{}", parts.join(" -> "))
    }
}
