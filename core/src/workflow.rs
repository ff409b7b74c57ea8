//! Registration workflow graph and transition validation.
//!
//! The graph is data: a [`WorkflowConfig`] (loadable from TOML) is compiled
//! into a [`Workflow`] whose adjacency map is keyed by source status. Each edge
//! carries the transition id, the target status and the permission needed to
//! use it.

use crate::access::{Principal, permissions};
use crate::error::RegistrationError;
use crate::types::{Registration, RegistrationStatus};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use thiserror::Error;

/// Name of a workflow transition
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransitionId(String);

impl TransitionId {
    /// `pending -> held`
    pub const HOLD: &'static str = "hold";
    /// `pending | held | waitlist -> complete`
    pub const COMPLETE: &'static str = "complete";
    /// `pending | held | complete | waitlist -> canceled`
    pub const CANCEL: &'static str = "cancel";

    /// Creates a new `TransitionId`
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The transition name
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TransitionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl fmt::Display for TransitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Permission required to use `transition` of `workflow`
#[must_use]
pub fn transition_permission(workflow: &str, transition: &str) -> String {
    format!("use {workflow} {transition} transition")
}

/// Workflow graph validation failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkflowError {
    /// Two transitions share an id
    #[error("Duplicate transition id: {0}")]
    DuplicateTransition(String),

    /// A transition goes from a status to itself
    #[error("Transition '{transition}' loops on '{status}'")]
    SelfLoop {
        /// Transition id
        transition: String,
        /// Status it loops on
        status: RegistrationStatus,
    },

    /// Canceled is terminal
    #[error("Transition '{0}' leaves the canceled status")]
    EdgeFromCanceled(String),

    /// A transition touches the waitlist while the waitlist is disabled
    #[error("Transition '{0}' uses the wait list, which is disabled")]
    WaitlistDisabled(String),

    /// Two transitions connect the same pair of statuses
    #[error("More than one transition from '{from}' to '{to}'")]
    AmbiguousEdge {
        /// Source status
        from: RegistrationStatus,
        /// Target status
        to: RegistrationStatus,
    },

    /// A transition without any source status
    #[error("Transition '{0}' has no source status")]
    EmptySource(String),

    /// The configuration could not be parsed
    #[error("Workflow parse error: {0}")]
    Parse(String),
}

/// One transition as configured
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionConfig {
    /// Transition id
    pub id: String,
    /// Display label
    pub label: String,
    /// Source statuses
    pub from: Vec<RegistrationStatus>,
    /// Target status
    pub to: RegistrationStatus,
}

impl TransitionConfig {
    fn new(id: &str, label: &str, from: &[RegistrationStatus], to: RegistrationStatus) -> Self {
        Self {
            id: id.to_string(),
            label: label.to_string(),
            from: from.to_vec(),
            to,
        }
    }
}

/// Workflow definition before validation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Workflow id, used in permission names
    pub id: String,
    /// Display label
    pub label: String,
    /// Whether the waitlist status participates
    #[serde(default)]
    pub waitlist: bool,
    /// Transitions, in display order
    #[serde(default, rename = "transition")]
    pub transitions: Vec<TransitionConfig>,
}

impl WorkflowConfig {
    /// Default workflow id
    pub const DEFAULT_ID: &'static str = "registration";

    /// The standard hold/complete/cancel graph
    #[must_use]
    pub fn standard(waitlist: bool) -> Self {
        use RegistrationStatus::{Canceled, Complete, Held, Pending, Waitlist};

        let (complete_from, cancel_from): (Vec<_>, Vec<_>) = if waitlist {
            (
                vec![Pending, Held, Waitlist],
                vec![Pending, Held, Complete, Waitlist],
            )
        } else {
            (vec![Pending, Held], vec![Pending, Held, Complete])
        };

        Self {
            id: Self::DEFAULT_ID.to_string(),
            label: "Default".to_string(),
            waitlist,
            transitions: vec![
                TransitionConfig::new(TransitionId::HOLD, "Hold", &[Pending], Held),
                TransitionConfig::new(TransitionId::COMPLETE, "Complete", &complete_from, Complete),
                TransitionConfig::new(TransitionId::CANCEL, "Cancel", &cancel_from, Canceled),
            ],
        }
    }

    /// Parse a workflow definition from TOML.
    ///
    /// ```toml
    /// id = "registration"
    /// label = "Default"
    /// waitlist = true
    ///
    /// [[transition]]
    /// id = "complete"
    /// label = "Complete"
    /// from = ["pending", "waitlist"]
    /// to = "complete"
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::Parse`] if the document is malformed.
    pub fn from_toml_str(source: &str) -> Result<Self, WorkflowError> {
        toml::from_str(source).map_err(|e| WorkflowError::Parse(e.to_string()))
    }

    fn validate(&self) -> Result<(), WorkflowError> {
        let mut ids = HashSet::new();
        let mut pairs = HashSet::new();

        for transition in &self.transitions {
            if !ids.insert(transition.id.as_str()) {
                return Err(WorkflowError::DuplicateTransition(transition.id.clone()));
            }
            if transition.from.is_empty() {
                return Err(WorkflowError::EmptySource(transition.id.clone()));
            }
            let touches_waitlist = transition.to.is_waitlisted()
                || transition.from.iter().any(RegistrationStatus::is_waitlisted);
            if touches_waitlist && !self.waitlist {
                return Err(WorkflowError::WaitlistDisabled(transition.id.clone()));
            }
            for &from in &transition.from {
                if from == transition.to {
                    return Err(WorkflowError::SelfLoop {
                        transition: transition.id.clone(),
                        status: from,
                    });
                }
                if from.is_canceled() {
                    return Err(WorkflowError::EdgeFromCanceled(transition.id.clone()));
                }
                if !pairs.insert((from, transition.to)) {
                    return Err(WorkflowError::AmbiguousEdge {
                        from,
                        to: transition.to,
                    });
                }
            }
        }

        Ok(())
    }
}

/// A compiled transition
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transition {
    /// Transition id
    pub id: TransitionId,
    /// Display label
    pub label: String,
    /// Source statuses
    pub from: BTreeSet<RegistrationStatus>,
    /// Target status
    pub to: RegistrationStatus,
    /// Permission required to use it
    pub permission: String,
}

/// An outgoing edge of the adjacency map
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Edge {
    /// Transition id
    pub transition: TransitionId,
    /// Target status
    pub to: RegistrationStatus,
    /// Permission required to use it
    pub permission: String,
}

/// A validated workflow graph
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Workflow {
    id: String,
    label: String,
    waitlist: bool,
    transitions: Vec<Transition>,
    adjacency: BTreeMap<RegistrationStatus, Vec<Edge>>,
}

impl Workflow {
    /// Validate and compile a workflow definition.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError`] if the graph has duplicate ids, self-loops,
    /// edges out of canceled, ambiguous edges, or waitlist edges while the
    /// waitlist is disabled.
    pub fn compile(config: WorkflowConfig) -> Result<Self, WorkflowError> {
        config.validate()?;
        Ok(Self::assemble(config))
    }

    /// The standard hold/complete/cancel graph
    #[must_use]
    pub fn standard(waitlist: bool) -> Self {
        Self::assemble(WorkflowConfig::standard(waitlist))
    }

    fn assemble(config: WorkflowConfig) -> Self {
        let mut adjacency: BTreeMap<RegistrationStatus, Vec<Edge>> = BTreeMap::new();
        let transitions = config
            .transitions
            .into_iter()
            .map(|transition| {
                let permission = transition_permission(&config.id, &transition.id);
                let id = TransitionId::new(transition.id);
                for &from in &transition.from {
                    adjacency.entry(from).or_default().push(Edge {
                        transition: id.clone(),
                        to: transition.to,
                        permission: permission.clone(),
                    });
                }
                Transition {
                    id,
                    label: transition.label,
                    from: transition.from.into_iter().collect(),
                    to: transition.to,
                    permission,
                }
            })
            .collect();

        Self {
            id: config.id,
            label: config.label,
            waitlist: config.waitlist,
            transitions,
            adjacency,
        }
    }

    /// Workflow id
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Display label
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Whether the waitlist status participates
    #[must_use]
    pub const fn waitlist_enabled(&self) -> bool {
        self.waitlist
    }

    /// All transitions in configured order
    #[must_use]
    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    /// Look up a transition by id
    #[must_use]
    pub fn transition(&self, id: &str) -> Option<&Transition> {
        self.transitions.iter().find(|t| t.id.as_str() == id)
    }

    /// Edges leaving `from`
    #[must_use]
    pub fn edges_from(&self, from: RegistrationStatus) -> &[Edge] {
        self.adjacency.get(&from).map_or(&[][..], Vec::as_slice)
    }

    /// The edge from `from` to `to`, if any
    #[must_use]
    pub fn edge(&self, from: RegistrationStatus, to: RegistrationStatus) -> Option<&Edge> {
        self.edges_from(from).iter().find(|edge| edge.to == to)
    }

    /// The edge using `transition` out of `from`, if any
    #[must_use]
    pub fn edge_for(&self, from: RegistrationStatus, transition: &TransitionId) -> Option<&Edge> {
        self.edges_from(from)
            .iter()
            .find(|edge| &edge.transition == transition)
    }

    /// Permission required to use `transition`
    #[must_use]
    pub fn permission_for(&self, transition: &str) -> Option<&str> {
        self.transition(transition).map(|t| t.permission.as_str())
    }
}

/// Checks whether a principal may move a registration along an edge
#[derive(Clone, Debug)]
pub struct TransitionValidator {
    workflow: std::sync::Arc<Workflow>,
    prevent_complete_own: bool,
}

impl TransitionValidator {
    /// Creates a new `TransitionValidator`
    #[must_use]
    pub const fn new(workflow: std::sync::Arc<Workflow>) -> Self {
        Self {
            workflow,
            prevent_complete_own: false,
        }
    }

    /// Forbid principals from completing registrations they are the registrant of
    #[must_use]
    pub const fn with_prevent_complete_own(mut self, prevent: bool) -> Self {
        self.prevent_complete_own = prevent;
        self
    }

    /// The workflow being enforced
    #[must_use]
    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    /// Returns true when `principal` may move `registration` from `from` to `to`.
    ///
    /// Unknown edges and missing permissions yield `false`.
    #[must_use]
    pub fn is_transition_valid(
        &self,
        from: RegistrationStatus,
        to: RegistrationStatus,
        registration: &Registration,
        principal: &dyn Principal,
    ) -> bool {
        self.workflow
            .edge(from, to)
            .is_some_and(|edge| self.check_edge(edge, registration, principal).is_ok())
    }

    /// Transitions `principal` may apply to `registration` in its current status
    #[must_use]
    pub fn valid_transitions(
        &self,
        registration: &Registration,
        principal: &dyn Principal,
    ) -> BTreeSet<TransitionId> {
        self.workflow
            .edges_from(registration.status)
            .iter()
            .filter(|edge| self.check_edge(edge, registration, principal).is_ok())
            .map(|edge| edge.transition.clone())
            .collect()
    }

    /// Resolve `transition` for `registration`, explaining any refusal.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::TransitionNotAllowed`] when the graph has
    /// no such edge out of the current status, and
    /// [`RegistrationError::AccessDenied`] when the principal may not use it.
    pub fn resolve(
        &self,
        registration: &Registration,
        transition: &TransitionId,
        principal: &dyn Principal,
    ) -> Result<&Edge, RegistrationError> {
        let edge = self
            .workflow
            .edge_for(registration.status, transition)
            .ok_or_else(|| RegistrationError::TransitionNotAllowed {
                transition: transition.clone(),
                from: registration.status,
            })?;
        self.check_edge(edge, registration, principal)?;
        Ok(edge)
    }

    fn check_edge(
        &self,
        edge: &Edge,
        registration: &Registration,
        principal: &dyn Principal,
    ) -> Result<(), RegistrationError> {
        if !principal.has_permission(&edge.permission) {
            return Err(RegistrationError::AccessDenied(format!(
                "missing permission \"{}\"",
                edge.permission
            )));
        }
        if self.prevent_complete_own
            && edge.to == RegistrationStatus::Complete
            && principal.is_registrant(registration)
            && !principal.has_permission(permissions::UPDATE_ANY)
        {
            return Err(RegistrationError::AccessDenied(
                "you may not complete your own registration".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use RegistrationStatus::{Canceled, Complete, Held, Pending, Waitlist};

    #[test]
    fn test_standard_graph_edges() {
        let workflow = Workflow::standard(true);
        assert!(workflow.edge(Pending, Held).is_some());
        assert!(workflow.edge(Pending, Complete).is_some());
        assert!(workflow.edge(Waitlist, Complete).is_some());
        assert!(workflow.edge(Held, Pending).is_none());
        assert!(workflow.edges_from(Canceled).is_empty());
        assert_eq!(
            workflow.permission_for("complete"),
            Some("use registration complete transition")
        );
    }

    #[test]
    fn test_standard_without_waitlist_has_no_waitlist_edges() {
        let workflow = Workflow::standard(false);
        assert!(workflow.edges_from(Waitlist).is_empty());
        assert_eq!(
            Workflow::compile(WorkflowConfig::standard(false)).unwrap(),
            workflow
        );
    }

    #[test]
    fn test_compile_rejects_invalid_graphs() {
        let mut config = WorkflowConfig::standard(true);
        config.transitions.push(TransitionConfig::new("reopen", "Reopen", &[Canceled], Pending));
        assert_eq!(
            Workflow::compile(config),
            Err(WorkflowError::EdgeFromCanceled("reopen".to_string()))
        );

        let mut config = WorkflowConfig::standard(true);
        config.transitions.push(TransitionConfig::new("touch", "Touch", &[Held], Held));
        assert!(matches!(
            Workflow::compile(config),
            Err(WorkflowError::SelfLoop { .. })
        ));

        let mut config = WorkflowConfig::standard(false);
        config.transitions.push(TransitionConfig::new("queue", "Queue", &[Pending], Waitlist));
        assert_eq!(
            Workflow::compile(config),
            Err(WorkflowError::WaitlistDisabled("queue".to_string()))
        );

        let mut config = WorkflowConfig::standard(true);
        config.transitions.push(TransitionConfig::new("cancel", "Cancel", &[Pending], Canceled));
        assert_eq!(
            Workflow::compile(config),
            Err(WorkflowError::DuplicateTransition("cancel".to_string()))
        );

        let mut config = WorkflowConfig::standard(true);
        config.transitions.push(TransitionConfig::new("confirm", "Confirm", &[Pending], Complete));
        assert!(matches!(
            Workflow::compile(config),
            Err(WorkflowError::AmbiguousEdge { from: Pending, to: Complete })
        ));
    }

    #[test]
    fn test_workflow_from_toml() {
        let config = WorkflowConfig::from_toml_str(
            r#"
            id = "seminar"
            label = "Seminar"

            [[transition]]
            id = "confirm"
            label = "Confirm"
            from = ["pending"]
            to = "complete"

            [[transition]]
            id = "withdraw"
            label = "Withdraw"
            from = ["pending", "complete"]
            to = "canceled"
            "#,
        )
        .unwrap();
        let workflow = Workflow::compile(config).unwrap();
        assert_eq!(workflow.id(), "seminar");
        assert!(!workflow.waitlist_enabled());
        assert_eq!(
            workflow.permission_for("withdraw"),
            Some("use seminar withdraw transition")
        );
        assert_eq!(workflow.edges_from(Pending).len(), 2);
    }

    #[test]
    fn test_malformed_toml_is_parse_error() {
        assert!(matches!(
            WorkflowConfig::from_toml_str("id = "),
            Err(WorkflowError::Parse(_))
        ));
    }
}
