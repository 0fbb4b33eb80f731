//! Core types for connection reconciliation

use netgen::{ComponentId, EdgeInfo, PortPair};
use netmodel::{ConnectionPolicy, PortDirection};
use netremote::RemoteKey;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Connections to create, by component pair
pub type Additions = BTreeMap<(ComponentId, ComponentId), EdgeInfo<ConnectionPolicy>>;

/// Connections to remove, by live task pair
pub type Removals = BTreeMap<(RemoteKey, RemoteKey), BTreeSet<PortPair>>;

/// Changes carried over from one cycle to the next until they are applied
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PendingChangeSet {
    /// Components whose connections these changes were computed for
    pub tasks: BTreeSet<ComponentId>,
    pub additions: Additions,
    pub removals: Removals,
}

impl PendingChangeSet {
    pub fn is_empty(&self) -> bool {
        self.additions.values().all(BTreeMap::is_empty) && self.removals.values().all(BTreeSet::is_empty)
    }

    pub fn addition_count(&self) -> usize {
        self.additions.values().map(BTreeMap::len).sum()
    }

    pub fn removal_count(&self) -> usize {
        self.removals.values().map(BTreeSet::len).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Add,
    Remove,
}

/// One port-to-port connection change on live tasks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionChange {
    pub kind: ChangeKind,
    pub source: RemoteKey,
    pub source_port: String,
    pub sink: RemoteKey,
    pub sink_port: String,
}

impl fmt::Display for ConnectionChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = match self.kind {
            ChangeKind::Add => '+',
            ChangeKind::Remove => '-',
        };
        write!(
            f,
            "{sign} {}.{} -> {}.{}",
            self.source, self.source_port, self.sink, self.sink_port
        )
    }
}

/// Result of applying one connection change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApplyOutcome {
    /// The connection was created
    Connected,
    /// The connection was removed
    Disconnected,
    /// Already in the requested state, nothing was sent
    NoChange,
    /// The remote side failed but the change is considered done
    AssumedEffective { reason: String },
    /// An expected failure, the change is dropped silently
    Swallowed { reason: String },
    /// The change could not be applied
    Failed { error: String },
}

impl ApplyOutcome {
    /// Whether the live graph now reflects the change
    pub fn is_effective(&self) -> bool {
        matches!(
            self,
            Self::Connected | Self::Disconnected | Self::NoChange | Self::AssumedEffective { .. }
        )
    }

    /// Check if the result represents a change
    pub fn is_change(&self) -> bool {
        matches!(
            self,
            Self::Connected | Self::Disconnected | Self::AssumedEffective { .. }
        )
    }
}

/// Something that happened to a component during a cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComponentEvent {
    /// A port needed for a connection is missing on the live task
    PortNotFound {
        component: ComponentId,
        port: String,
        direction: PortDirection,
    },
    /// The component is configured but some of its inputs are not connected yet
    HeldOff { component: ComponentId },
    /// The component may now be started
    Executable { component: ComponentId },
    /// A static port of the component lost a connection
    NeedsReconfiguration { component: RemoteKey },
}

impl fmt::Display for ComponentEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PortNotFound {
                component,
                port,
                direction,
            } => write!(f, "{component}: {direction} port {port} not found"),
            Self::HeldOff { component } => write!(f, "{component}: waiting for inputs"),
            Self::Executable { component } => write!(f, "{component}: executable"),
            Self::NeedsReconfiguration { component } => {
                write!(f, "{component}: needs reconfiguration")
            }
        }
    }
}

/// Summary of one reconciliation cycle
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CycleReport {
    /// Active components whose connections were recomputed
    pub dirty: usize,
    pub added: usize,
    pub removed: usize,
    /// Additions waiting for an endpoint to be ready
    pub held: usize,
    /// Changes on running components postponed because of held additions
    pub deferred: usize,
    pub no_change: usize,
    pub assumed: usize,
    pub swallowed: usize,
    pub failed: usize,
    pub events: Vec<ComponentEvent>,
    /// A network re-resolution ran during the cycle
    pub resolved: bool,
    pub resolution_error: Option<String>,
}

impl CycleReport {
    /// Total number of changes made on live tasks
    pub fn total_changes(&self) -> usize {
        self.added + self.removed + self.assumed
    }

    /// Whether nothing is left for later cycles
    pub fn is_converged(&self) -> bool {
        self.held == 0 && self.deferred == 0
    }

    /// Add an applied change to the summary
    pub fn add_outcome(&mut self, outcome: &ApplyOutcome) {
        match outcome {
            ApplyOutcome::Connected => self.added += 1,
            ApplyOutcome::Disconnected => self.removed += 1,
            ApplyOutcome::NoChange => self.no_change += 1,
            ApplyOutcome::AssumedEffective { .. } => self.assumed += 1,
            ApplyOutcome::Swallowed { .. } => self.swallowed += 1,
            ApplyOutcome::Failed { .. } => self.failed += 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(kind: ChangeKind) -> ConnectionChange {
        ConnectionChange {
            kind,
            source: RemoteKey::new("robot", "camera"),
            source_port: "frame".into(),
            sink: RemoteKey::new("robot", "detector"),
            sink_port: "image".into(),
        }
    }

    #[test]
    fn test_change_display() {
        assert_eq!(
            change(ChangeKind::Add).to_string(),
            "+ camera@robot.frame -> detector@robot.image"
        );
    }

    #[test]
    fn test_report_counts() {
        let mut report = CycleReport::default();
        report.add_outcome(&ApplyOutcome::Connected);
        report.add_outcome(&ApplyOutcome::Disconnected);
        report.add_outcome(&ApplyOutcome::AssumedEffective {
            reason: "returned false".into(),
        });
        report.add_outcome(&ApplyOutcome::NoChange);
        assert_eq!(report.total_changes(), 3);
        assert_eq!(report.no_change, 1);
        assert!(report.is_converged());
    }

    #[test]
    fn test_outcome_predicates() {
        assert!(ApplyOutcome::NoChange.is_effective());
        assert!(!ApplyOutcome::NoChange.is_change());
        assert!(!ApplyOutcome::Failed { error: "x".into() }.is_effective());
    }
}
