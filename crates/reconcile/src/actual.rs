//! Actual state tracker
//!
//! The observed side of the network: the connections that exist between
//! live tasks. It only changes when the connection manager reports a
//! successful (or assumed successful) remote operation, and when it
//! refreshes the states of the tasks it tracks.

use netgen::{EdgeInfo, FlowGraph, PortPair};
use netmodel::ConnectionPolicy;
use netremote::{RemoteKey, RemoteTask, TaskState};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// A live connection and what is known about its ports
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActualConnection {
    pub policy: ConnectionPolicy,
    /// The source port is static on the source task's model
    pub source_static: bool,
    /// The sink port is static on the sink task's model
    pub sink_static: bool,
}

impl ActualConnection {
    pub fn new(policy: ConnectionPolicy) -> Self {
        Self {
            policy,
            source_static: false,
            sink_static: false,
        }
    }
}

/// One connection in a saved snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotConnection {
    pub source: RemoteKey,
    pub source_port: String,
    pub sink: RemoteKey,
    pub sink_port: String,
    pub policy: ConnectionPolicy,
    #[serde(default)]
    pub static_port: bool,
}

#[derive(Debug, Default)]
pub struct ActualDataFlow {
    graph: FlowGraph<RemoteKey, ActualConnection>,
    handles: BTreeMap<RemoteKey, Arc<dyn RemoteTask>>,
    states: BTreeMap<RemoteKey, Option<TaskState>>,
}

impl ActualDataFlow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_connection(
        &mut self,
        source: &Arc<dyn RemoteTask>,
        sink: &Arc<dyn RemoteTask>,
        ports: PortPair,
        connection: ActualConnection,
    ) {
        self.track(source);
        self.track(sink);
        self.graph
            .add_connection(source.key().clone(), sink.key().clone(), ports, connection);
    }

    pub fn remove_connection(&mut self, source: &RemoteKey, sink: &RemoteKey, ports: &PortPair) {
        self.graph.remove_connections(source, sink, [ports]);
    }

    pub fn connection(&self, source: &RemoteKey, sink: &RemoteKey, ports: &PortPair) -> Option<&ActualConnection> {
        self.graph.edge_info(source, sink)?.get(ports)
    }

    pub fn has_edge(&self, source: &RemoteKey, sink: &RemoteKey) -> bool {
        self.graph.has_edge(source, sink)
    }

    /// Port pairs connected between two tasks, with their policy
    pub fn edge_info(&self, source: &RemoteKey, sink: &RemoteKey) -> Option<EdgeInfo<ConnectionPolicy>> {
        self.graph.edge_info(source, sink).map(|info| {
            info.iter()
                .map(|(ports, c)| (ports.clone(), c.policy.clone()))
                .collect()
        })
    }

    /// Whether either side of the connection is a static port
    pub fn is_static(&self, source: &RemoteKey, sink: &RemoteKey, ports: &PortPair) -> bool {
        self.connection(source, sink, ports)
            .is_some_and(|c| c.source_static || c.sink_static)
    }

    /// Tasks having at least one connection
    pub fn vertices(&self) -> BTreeSet<RemoteKey> {
        self.graph.vertices()
    }

    pub fn out_neighbours(&self, vertex: &RemoteKey) -> BTreeSet<RemoteKey> {
        self.graph.out_neighbours(vertex)
    }

    pub fn in_neighbours(&self, vertex: &RemoteKey) -> BTreeSet<RemoteKey> {
        self.graph.in_neighbours(vertex)
    }

    pub fn edges(&self) -> impl Iterator<Item = (&RemoteKey, &RemoteKey, &EdgeInfo<ActualConnection>)> {
        self.graph.edges()
    }

    /// Edges touching `vertex`, as `(source, sink, port pairs)`
    pub fn edges_of(&self, vertex: &RemoteKey) -> Vec<(RemoteKey, RemoteKey, BTreeSet<PortPair>)> {
        self.graph
            .edges()
            .filter(|(source, sink, _)| *source == vertex || *sink == vertex)
            .map(|(source, sink, info)| (source.clone(), sink.clone(), info.keys().cloned().collect()))
            .collect()
    }

    /// Last handle seen for a task
    pub fn handle(&self, key: &RemoteKey) -> Option<&Arc<dyn RemoteTask>> {
        self.handles.get(key)
    }

    fn track(&mut self, task: &Arc<dyn RemoteTask>) {
        self.handles
            .entry(task.key().clone())
            .or_insert_with(|| Arc::clone(task));
    }

    /// Query the state of a live task and remember it
    ///
    /// A failed query records the state as unknown.
    pub fn observe(&mut self, task: &Arc<dyn RemoteTask>) -> Option<TaskState> {
        let state = match task.current_state() {
            Ok(state) => Some(state),
            Err(err) => {
                log::debug!("cannot read the state of {}: {err}", task.key());
                None
            }
        };
        self.handles.insert(task.key().clone(), Arc::clone(task));
        self.states.insert(task.key().clone(), state);
        state
    }

    /// Refresh the state of a tracked task by key
    pub fn observe_state(&mut self, key: &RemoteKey) -> Option<TaskState> {
        let task = self.handles.get(key).cloned()?;
        self.observe(&task)
    }

    /// Last observed state, `None` when never observed or unknown
    pub fn state(&self, key: &RemoteKey) -> Option<TaskState> {
        self.states.get(key).copied().flatten()
    }

    pub fn connection_count(&self) -> usize {
        self.graph.connection_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.is_empty()
    }

    /// Forget handles of tasks that are neither connected nor in `keep`
    pub fn prune_handles(&mut self, keep: &BTreeSet<RemoteKey>) {
        let connected = self.graph.vertices();
        self.handles
            .retain(|key, _| connected.contains(key) || keep.contains(key));
        self.states
            .retain(|key, _| connected.contains(key) || keep.contains(key));
    }

    /// Serializable view of every connection
    pub fn snapshot(&self) -> Vec<SnapshotConnection> {
        self.graph
            .edges()
            .flat_map(|(source, sink, info)| {
                info.iter().map(move |((source_port, sink_port), c)| SnapshotConnection {
                    source: source.clone(),
                    source_port: source_port.clone(),
                    sink: sink.clone(),
                    sink_port: sink_port.clone(),
                    policy: c.policy.clone(),
                    static_port: c.source_static || c.sink_static,
                })
            })
            .collect()
    }
}
