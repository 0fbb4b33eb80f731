//! Directed port-level connection graphs
//!
//! An edge between two vertices carries every port-to-port connection
//! between them, keyed by `(source_port, sink_port)`. The same structure
//! backs the desired dataflow (between components) and the observed one
//! (between live tasks).

use petgraph::Direction;
use petgraph::stable_graph::{EdgeIndex, NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use std::collections::{BTreeMap, BTreeSet};

/// `(source_port, sink_port)`
pub type PortPair = (String, String);

/// Connections carried by one edge
pub type EdgeInfo<V> = BTreeMap<PortPair, V>;

/// At most one edge per ordered vertex pair. Vertices only live as long as
/// one of their edges, and every listing comes out in vertex order.
#[derive(Debug, Clone)]
pub struct FlowGraph<N: Ord + Clone, V> {
    graph: StableDiGraph<N, EdgeInfo<V>>,
    index: BTreeMap<N, NodeIndex>,
}

impl<N: Ord + Clone, V> Default for FlowGraph<N, V> {
    fn default() -> Self {
        Self {
            graph: StableDiGraph::default(),
            index: BTreeMap::new(),
        }
    }
}

impl<N: Ord + Clone, V: Clone> FlowGraph<N, V> {
    pub fn new() -> Self {
        Self::default()
    }

    fn node(&self, vertex: &N) -> Option<NodeIndex> {
        self.index.get(vertex).copied()
    }

    fn ensure_node(&mut self, vertex: &N) -> NodeIndex {
        if let Some(idx) = self.node(vertex) {
            return idx;
        }
        let idx = self.graph.add_node(vertex.clone());
        self.index.insert(vertex.clone(), idx);
        idx
    }

    fn find_edge(&self, source: &N, sink: &N) -> Option<EdgeIndex> {
        self.graph.find_edge(self.node(source)?, self.node(sink)?)
    }

    /// Drop a vertex left without edges
    fn prune(&mut self, idx: NodeIndex) {
        if self.graph.contains_node(idx)
            && self.graph.neighbors_undirected(idx).next().is_none()
            && let Some(vertex) = self.graph.remove_node(idx)
        {
            self.index.remove(&vertex);
        }
    }

    /// Add connections, replacing the value of port pairs already present
    pub fn add_connections(
        &mut self,
        source: N,
        sink: N,
        connections: impl IntoIterator<Item = (PortPair, V)>,
    ) {
        let connections: EdgeInfo<V> = connections.into_iter().collect();
        // Never keep an empty edge around
        if connections.is_empty() {
            return;
        }
        let from = self.ensure_node(&source);
        let to = self.ensure_node(&sink);
        match self.graph.find_edge(from, to) {
            Some(edge) => self.graph[edge].extend(connections),
            None => {
                self.graph.add_edge(from, to, connections);
            }
        }
    }

    pub fn add_connection(&mut self, source: N, sink: N, ports: PortPair, value: V) {
        self.add_connections(source, sink, [(ports, value)]);
    }

    /// Remove some connections of an edge, dropping the edge once empty
    pub fn remove_connections<'a>(
        &mut self,
        source: &N,
        sink: &N,
        pairs: impl IntoIterator<Item = &'a PortPair>,
    ) {
        let Some(edge) = self.find_edge(source, sink) else {
            return;
        };
        let info = &mut self.graph[edge];
        for pair in pairs {
            info.remove(pair);
        }
        if info.is_empty()
            && let Some((from, to)) = self.graph.edge_endpoints(edge)
        {
            self.graph.remove_edge(edge);
            self.prune(from);
            self.prune(to);
        }
    }

    pub fn has_edge(&self, source: &N, sink: &N) -> bool {
        self.find_edge(source, sink).is_some()
    }

    pub fn edge_info(&self, source: &N, sink: &N) -> Option<&EdgeInfo<V>> {
        self.find_edge(source, sink).map(|edge| &self.graph[edge])
    }

    /// Remove every edge touching `vertex`
    pub fn remove_vertex(&mut self, vertex: &N) {
        let Some(idx) = self.index.remove(vertex) else {
            return;
        };
        let neighbours: Vec<NodeIndex> = self.graph.neighbors_undirected(idx).collect();
        self.graph.remove_node(idx);
        for neighbour in neighbours {
            self.prune(neighbour);
        }
    }

    /// Vertices having at least one edge
    pub fn vertices(&self) -> BTreeSet<N> {
        self.index.keys().cloned().collect()
    }

    pub fn contains_vertex(&self, vertex: &N) -> bool {
        self.index.contains_key(vertex)
    }

    /// Every edge, ordered by source then sink
    pub fn edges(&self) -> impl Iterator<Item = (&N, &N, &EdgeInfo<V>)> {
        self.index.iter().flat_map(move |(source, idx)| {
            self.adjacent(*idx, Direction::Outgoing)
                .into_iter()
                .map(move |(sink, info)| (source, sink, info))
        })
    }

    /// Edges leaving `vertex`, as `(sink, connections)`
    pub fn out_edges<'a>(&'a self, vertex: &'a N) -> impl Iterator<Item = (&'a N, &'a EdgeInfo<V>)> {
        self.node(vertex)
            .map(|idx| self.adjacent(idx, Direction::Outgoing))
            .unwrap_or_default()
            .into_iter()
    }

    /// Edges reaching `vertex`, as `(source, connections)`
    pub fn in_edges<'a>(&'a self, vertex: &'a N) -> impl Iterator<Item = (&'a N, &'a EdgeInfo<V>)> {
        self.node(vertex)
            .map(|idx| self.adjacent(idx, Direction::Incoming))
            .unwrap_or_default()
            .into_iter()
    }

    /// Edges of `idx` in one direction, as `(other end, connections)`
    fn adjacent(&self, idx: NodeIndex, direction: Direction) -> Vec<(&N, &EdgeInfo<V>)> {
        let mut edges: Vec<(&N, &EdgeInfo<V>)> = self
            .graph
            .edges_directed(idx, direction)
            .map(|edge| {
                let other = if edge.source() == idx { edge.target() } else { edge.source() };
                (&self.graph[other], edge.weight())
            })
            .collect();
        edges.sort_by(|(a, _), (b, _)| a.cmp(b));
        edges
    }

    pub fn out_neighbours(&self, vertex: &N) -> BTreeSet<N> {
        self.out_edges(vertex).map(|(n, _)| n.clone()).collect()
    }

    pub fn in_neighbours(&self, vertex: &N) -> BTreeSet<N> {
        self.in_edges(vertex).map(|(n, _)| n.clone()).collect()
    }

    /// Move every edge of `from` onto `to`
    ///
    /// Connections already present on `to` keep their value.
    pub fn replace_vertex(&mut self, from: &N, to: &N) {
        if from == to {
            return;
        }
        let Some(old) = self.node(from) else {
            return;
        };
        let new = self.ensure_node(to);
        let touching: Vec<EdgeIndex> = self
            .graph
            .edges_directed(old, Direction::Outgoing)
            .chain(self.graph.edges_directed(old, Direction::Incoming))
            .map(|edge| edge.id())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        for edge in touching {
            let Some((source, sink)) = self.graph.edge_endpoints(edge) else {
                continue;
            };
            let Some(info) = self.graph.remove_edge(edge) else {
                continue;
            };
            let source = if source == old { new } else { source };
            let sink = if sink == old { new } else { sink };
            let target = match self.graph.find_edge(source, sink) {
                Some(existing) => existing,
                None => self.graph.add_edge(source, sink, BTreeMap::new()),
            };
            let target = &mut self.graph[target];
            for (ports, value) in info {
                target.entry(ports).or_insert(value);
            }
        }
        self.graph.remove_node(old);
        self.index.remove(from);
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Total number of port-to-port connections
    pub fn connection_count(&self) -> usize {
        self.graph.edge_weights().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.edge_count() == 0
    }

    pub fn clear(&mut self) {
        self.graph.clear();
        self.index.clear();
    }
}

pub fn ports(source: &str, sink: &str) -> PortPair {
    (source.to_string(), sink.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_remove_connections() {
        let mut graph: FlowGraph<u32, &str> = FlowGraph::new();
        graph.add_connection(1, 2, ports("out", "in"), "data");
        graph.add_connection(1, 2, ports("out2", "in2"), "data");
        assert_eq!(graph.edge_count(), 1);
        assert_eq!(graph.connection_count(), 2);

        graph.remove_connections(&1, &2, [&ports("out", "in")]);
        assert!(graph.has_edge(&1, &2));
        graph.remove_connections(&1, &2, [&ports("out2", "in2")]);
        assert!(!graph.has_edge(&1, &2));
        assert!(graph.is_empty());
    }

    #[test]
    fn test_add_empty_connections_keeps_no_edge() {
        let mut graph: FlowGraph<u32, ()> = FlowGraph::new();
        graph.add_connections(1, 2, []);
        assert!(!graph.has_edge(&1, &2));
    }

    #[test]
    fn test_neighbours_and_vertex_removal() {
        let mut graph: FlowGraph<u32, ()> = FlowGraph::new();
        graph.add_connection(1, 2, ports("a", "b"), ());
        graph.add_connection(3, 2, ports("a", "b"), ());
        graph.add_connection(2, 4, ports("a", "b"), ());

        assert_eq!(graph.in_neighbours(&2), BTreeSet::from([1, 3]));
        assert_eq!(graph.out_neighbours(&2), BTreeSet::from([4]));
        assert_eq!(graph.vertices(), BTreeSet::from([1, 2, 3, 4]));

        graph.remove_vertex(&2);
        assert!(graph.is_empty());
    }

    #[test]
    fn test_replace_vertex_merges_edges() {
        let mut graph: FlowGraph<u32, &str> = FlowGraph::new();
        graph.add_connection(1, 2, ports("out", "in"), "old");
        graph.add_connection(1, 3, ports("out", "in"), "new");
        graph.add_connection(1, 3, ports("out", "other"), "new");

        graph.replace_vertex(&3, &2);
        assert!(!graph.contains_vertex(&3));
        let info = graph.edge_info(&1, &2).unwrap();
        assert_eq!(info.len(), 2);
        assert_eq!(info[&ports("out", "in")], "old");
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn test_replace_vertex_keeps_loops() {
        let mut graph: FlowGraph<u32, ()> = FlowGraph::new();
        graph.add_connection(3, 3, ports("out", "in"), ());
        graph.add_connection(3, 4, ports("out", "in"), ());

        graph.replace_vertex(&3, &1);
        assert!(graph.has_edge(&1, &1));
        assert!(graph.has_edge(&1, &4));
        assert_eq!(graph.vertices(), BTreeSet::from([1, 4]));
    }

    #[test]
    fn test_vertices_go_with_their_last_edge() {
        let mut graph: FlowGraph<u32, ()> = FlowGraph::new();
        graph.add_connection(1, 2, ports("a", "b"), ());
        graph.add_connection(2, 3, ports("a", "b"), ());

        graph.remove_connections(&1, &2, [&ports("a", "b")]);
        assert!(!graph.contains_vertex(&1));
        assert_eq!(graph.vertices(), BTreeSet::from([2, 3]));

        graph.remove_vertex(&3);
        assert!(graph.vertices().is_empty());
    }

    #[test]
    fn test_edges_come_out_in_vertex_order() {
        let mut graph: FlowGraph<&str, ()> = FlowGraph::new();
        graph.add_connection("lidar", "slam", ports("scan", "scan"), ());
        graph.add_connection("camera", "slam", ports("frame", "image"), ());
        graph.add_connection("camera", "detector", ports("frame", "image"), ());

        let order: Vec<(&str, &str)> = graph.edges().map(|(s, t, _)| (*s, *t)).collect();
        assert_eq!(
            order,
            vec![("camera", "detector"), ("camera", "slam"), ("lidar", "slam")]
        );
        let sources: Vec<&str> = graph.in_edges(&"slam").map(|(s, _)| *s).collect();
        assert_eq!(sources, vec!["camera", "lidar"]);
    }
}
