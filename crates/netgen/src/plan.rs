//! The plan: components, their dependencies and the desired dataflow
//!
//! A [`Plan`] is an arena of components addressed by [`ComponentId`]. On top
//! of the arena it keeps:
//!
//! - the dependency relation (composition -> child, by role)
//! - composition exports (composition port -> child port)
//! - the desired dataflow between components
//! - the deployments (execution agents) components are allocated to
//!
//! Resolution works on a copy of the live plan and swaps it in once the new
//! network is complete and valid.

use crate::flow::{FlowGraph, PortPair};
use netmodel::{ComponentModel, ConnectionPolicy, ModelKind, PortDirection, Value};
use netremote::{RemoteKey, RemoteTask};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

// ============================================================================
// Identifiers and states
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ComponentId(pub u64);

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeploymentId(pub u64);

impl fmt::Display for DeploymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "D{}", self.0)
    }
}

/// Lifecycle of a component in the plan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    #[default]
    Pending,
    SettingUp,
    ReadyNotRunning,
    Running,
    Finishing,
    Finished,
    Aborted,
}

impl LifecycleState {
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Finished | Self::Aborted)
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::SettingUp => "setting up",
            Self::ReadyNotRunning => "ready",
            Self::Running => "running",
            Self::Finishing => "finishing",
            Self::Finished => "finished",
            Self::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Lifecycle of a deployment process
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentState {
    /// Allocated, not started yet
    #[default]
    Pending,
    /// Spawned, waiting for its tasks to come up
    Starting,
    /// Task handles are available
    Ready,
    Terminating,
    Finished,
}

impl DeploymentState {
    /// Live deployments can take new components
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Pending | Self::Starting | Self::Ready)
    }
}

// ============================================================================
// Components
// ============================================================================

/// Where a component runs: a deployment and the task it exposes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployedSlot {
    pub deployment: DeploymentId,
    pub task: String,
}

#[derive(Debug, Clone)]
pub struct Component {
    pub id: ComponentId,
    pub model: String,
    pub kind: ModelKind,
    pub arguments: BTreeMap<String, Value>,
    pub state: LifecycleState,
    /// Bound once the deployment process is up
    pub remote: Option<Arc<dyn RemoteTask>>,
    pub slot: Option<DeployedSlot>,
    /// Robot device this component drives
    pub device: Option<String>,
    /// Deployed task name requested by the requirement
    pub requested_name: Option<String>,
    /// Patterns narrowing the choice of deployment
    pub hints: Vec<Regex>,
    /// Not resolved to a concrete model
    pub abstract_placeholder: bool,
    /// Configured on the remote side
    pub setup: bool,
    /// Allowed to start
    pub executable: bool,
    /// Previous component on the same slot, configured only once it is gone
    pub replaces: Option<ComponentId>,
}

impl Component {
    pub fn new(id: ComponentId, model: &ComponentModel) -> Self {
        Self {
            id,
            model: model.name.clone(),
            kind: model.kind,
            arguments: model.arguments.clone(),
            state: LifecycleState::Pending,
            remote: None,
            slot: None,
            device: None,
            requested_name: None,
            hints: Vec::new(),
            abstract_placeholder: !model.is_concrete(),
            setup: false,
            executable: false,
            replaces: None,
        }
    }

    /// Digest of what the component would be configured with
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.model.as_bytes());
        for (name, value) in &self.arguments {
            hasher.update(b"\0");
            hasher.update(name.as_bytes());
            hasher.update(b"=");
            hasher.update(value.to_string().as_bytes());
        }
        if let Some(device) = &self.device {
            hasher.update(b"\0device=");
            hasher.update(device.as_bytes());
        }
        hasher.finalize().to_hex().as_str()[..16].to_string()
    }

    pub fn remote_key(&self) -> Option<&RemoteKey> {
        self.remote.as_ref().map(|r| r.key())
    }

    pub fn is_composition(&self) -> bool {
        self.kind == ModelKind::Composition
    }

    /// Concrete task that can be deployed
    pub fn is_deployable(&self) -> bool {
        self.kind == ModelKind::Task && !self.abstract_placeholder
    }

    pub fn is_finished(&self) -> bool {
        self.state.is_finished()
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.model, self.id)
    }
}

/// A child of a composition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildLink {
    pub child: ComponentId,
    pub optional: bool,
}

/// A composition port forwarded to a child port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Export {
    pub child: ComponentId,
    pub port: String,
    pub direction: PortDirection,
}

/// An execution agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    pub id: DeploymentId,
    pub host: String,
    pub model: String,
    pub process_name: String,
    pub state: DeploymentState,
}

/// A connection between two concrete components, seen through compositions
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ConcreteConnection {
    pub source: ComponentId,
    pub source_port: String,
    pub sink: ComponentId,
    pub sink_port: String,
    pub policy: String,
}

// ============================================================================
// Plan
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct Plan {
    next_component: u64,
    next_deployment: u64,
    components: BTreeMap<ComponentId, Component>,
    children: BTreeMap<ComponentId, BTreeMap<String, ChildLink>>,
    exports: BTreeMap<ComponentId, BTreeMap<String, Export>>,
    deployments: BTreeMap<DeploymentId, Deployment>,
    dataflow: FlowGraph<ComponentId, ConnectionPolicy>,
    modified: BTreeSet<ComponentId>,
    garbage: BTreeSet<ComponentId>,
    needs_reconfiguration: BTreeSet<RemoteKey>,
    required_instances: BTreeMap<String, ComponentId>,
}

impl Plan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starting point for a new resolution
    ///
    /// Only deployed components survive, stripped of their dependencies and
    /// connections. Instantiation rebuilds the structure and the deployment
    /// step hands it back to them.
    pub fn resolution_base(&self) -> Self {
        let components: BTreeMap<ComponentId, Component> = self
            .components
            .iter()
            .filter(|(_, c)| c.slot.is_some())
            .map(|(id, c)| (*id, c.clone()))
            .collect();
        Self {
            next_component: self.next_component,
            next_deployment: self.next_deployment,
            modified: self
                .modified
                .iter()
                .filter(|id| components.contains_key(id))
                .copied()
                .collect(),
            garbage: self
                .garbage
                .iter()
                .filter(|id| components.contains_key(id))
                .copied()
                .collect(),
            components,
            deployments: self.deployments.clone(),
            needs_reconfiguration: self.needs_reconfiguration.clone(),
            ..Self::default()
        }
    }

    // ========================================================================
    // Components
    // ========================================================================

    pub fn add_component(&mut self, model: &ComponentModel) -> ComponentId {
        self.next_component += 1;
        let id = ComponentId(self.next_component);
        self.components.insert(id, Component::new(id, model));
        self.modified.insert(id);
        id
    }

    pub fn component(&self, id: ComponentId) -> Option<&Component> {
        self.components.get(&id)
    }

    pub fn component_mut(&mut self, id: ComponentId) -> Option<&mut Component> {
        self.components.get_mut(&id)
    }

    pub fn components(&self) -> impl Iterator<Item = &Component> {
        self.components.values()
    }

    pub fn component_ids(&self) -> Vec<ComponentId> {
        self.components.keys().copied().collect()
    }

    pub fn contains(&self, id: ComponentId) -> bool {
        self.components.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn is_composition(&self, id: ComponentId) -> bool {
        self.component(id).is_some_and(Component::is_composition)
    }

    /// Remove a component and every relation it takes part in
    pub fn remove_component(&mut self, id: ComponentId) -> Option<Component> {
        let removed = self.components.remove(&id)?;
        self.children.remove(&id);
        for links in self.children.values_mut() {
            links.retain(|_, link| link.child != id);
        }
        self.exports.remove(&id);
        for exports in self.exports.values_mut() {
            exports.retain(|_, export| export.child != id);
        }
        self.dataflow.remove_vertex(&id);
        self.modified.remove(&id);
        self.garbage.remove(&id);
        self.required_instances.retain(|_, c| *c != id);
        for component in self.components.values_mut() {
            if component.replaces == Some(id) {
                component.replaces = None;
            }
        }
        Some(removed)
    }

    /// Replace `from` by `to` everywhere, then remove `from`
    ///
    /// `to` inherits the parents, children, exports, connections and
    /// required-instance entries of `from`, plus the arguments, hints and
    /// requested name it does not define itself.
    pub fn replace_component(&mut self, from: ComponentId, to: ComponentId) {
        if from == to || !self.contains(from) || !self.contains(to) {
            return;
        }

        for links in self.children.values_mut() {
            for link in links.values_mut() {
                if link.child == from {
                    link.child = to;
                }
            }
        }
        if let Some(links) = self.children.remove(&from) {
            let target = self.children.entry(to).or_default();
            for (role, link) in links {
                target.entry(role).or_insert(link);
            }
        }

        for exports in self.exports.values_mut() {
            for export in exports.values_mut() {
                if export.child == from {
                    export.child = to;
                }
            }
        }
        if let Some(exports) = self.exports.remove(&from) {
            let target = self.exports.entry(to).or_default();
            for (name, export) in exports {
                target.entry(name).or_insert(export);
            }
        }

        self.dataflow.replace_vertex(&from, &to);
        for component in self.required_instances.values_mut() {
            if *component == from {
                *component = to;
            }
        }
        if self.modified.remove(&from) {
            self.modified.insert(to);
        }

        if let Some(old) = self.components.remove(&from) {
            if let Some(target) = self.components.get_mut(&to) {
                for (name, value) in old.arguments {
                    target.arguments.entry(name).or_insert(value);
                }
                for hint in old.hints {
                    if !target.hints.iter().any(|h| h.as_str() == hint.as_str()) {
                        target.hints.push(hint);
                    }
                }
                if target.requested_name.is_none() {
                    target.requested_name = old.requested_name;
                }
                if target.device.is_none() {
                    target.device = old.device;
                }
            }
        }
        self.garbage.remove(&from);
        for component in self.components.values_mut() {
            if component.replaces == Some(from) {
                component.replaces = Some(to);
            }
        }
    }

    // ========================================================================
    // Dependencies and exports
    // ========================================================================

    pub fn add_child(&mut self, parent: ComponentId, role: &str, child: ComponentId, optional: bool) {
        self.children
            .entry(parent)
            .or_default()
            .insert(role.to_string(), ChildLink { child, optional });
    }

    pub fn remove_child(&mut self, parent: ComponentId, role: &str) -> Option<ChildLink> {
        self.children.get_mut(&parent)?.remove(role)
    }

    /// Children of a component by role
    pub fn children_of(&self, parent: ComponentId) -> impl Iterator<Item = (&str, &ChildLink)> {
        self.children
            .get(&parent)
            .into_iter()
            .flat_map(|links| links.iter().map(|(role, link)| (role.as_str(), link)))
    }

    pub fn child(&self, parent: ComponentId, role: &str) -> Option<ComponentId> {
        self.children.get(&parent)?.get(role).map(|l| l.child)
    }

    /// Parents of a component with the role it plays in each
    pub fn parents_of(&self, child: ComponentId) -> Vec<(ComponentId, String)> {
        self.children
            .iter()
            .flat_map(|(parent, links)| {
                links
                    .iter()
                    .filter(move |(_, link)| link.child == child)
                    .map(move |(role, _)| (*parent, role.clone()))
            })
            .collect()
    }

    pub fn add_export(
        &mut self,
        composition: ComponentId,
        name: &str,
        child: ComponentId,
        port: &str,
        direction: PortDirection,
    ) {
        self.exports.entry(composition).or_default().insert(
            name.to_string(),
            Export {
                child,
                port: port.to_string(),
                direction,
            },
        );
    }

    pub fn export(&self, composition: ComponentId, name: &str) -> Option<&Export> {
        self.exports.get(&composition)?.get(name)
    }

    /// Compositions exporting `(child, port)`, with the exported name
    fn exporters_of(&self, child: ComponentId, port: &str) -> Vec<(ComponentId, String)> {
        self.exports
            .iter()
            .flat_map(|(composition, exports)| {
                exports
                    .iter()
                    .filter(move |(_, e)| e.child == child && e.port == port)
                    .map(move |(name, _)| (*composition, name.clone()))
            })
            .collect()
    }

    // ========================================================================
    // Dataflow
    // ========================================================================

    pub fn connect(
        &mut self,
        source: ComponentId,
        source_port: &str,
        sink: ComponentId,
        sink_port: &str,
        policy: ConnectionPolicy,
    ) {
        self.dataflow.add_connection(
            source,
            sink,
            (source_port.to_string(), sink_port.to_string()),
            policy,
        );
    }

    pub fn dataflow(&self) -> &FlowGraph<ComponentId, ConnectionPolicy> {
        &self.dataflow
    }

    /// Components feeding `id` through a dataflow edge
    pub fn dataflow_inputs(&self, id: ComponentId) -> BTreeSet<ComponentId> {
        self.dataflow.in_neighbours(&id)
    }

    /// Concrete output realizing `(component, port)` when used as a source
    fn resolve_source(&self, component: ComponentId, port: &str) -> Option<(ComponentId, String)> {
        if !self.is_composition(component) {
            return Some((component, port.to_string()));
        }
        let export = self.export(component, port)?;
        if export.direction != PortDirection::Output {
            return None;
        }
        self.resolve_source(export.child, &export.port)
    }

    /// Concrete input realizing `(component, port)` when used as a sink
    fn resolve_sink(&self, component: ComponentId, port: &str) -> Option<(ComponentId, String)> {
        if !self.is_composition(component) {
            return Some((component, port.to_string()));
        }
        let export = self.export(component, port)?;
        if export.direction != PortDirection::Input {
            return None;
        }
        self.resolve_sink(export.child, &export.port)
    }

    /// Concrete sources feeding the input `(component, port)`
    fn input_feeds(&self, component: ComponentId, port: &str) -> Vec<(ComponentId, String, ConnectionPolicy)> {
        let mut feeds = Vec::new();
        for (source, info) in self.dataflow.in_edges(&component) {
            for ((source_port, sink_port), policy) in info {
                if sink_port == port
                    && let Some((s, p)) = self.resolve_source(*source, source_port)
                {
                    feeds.push((s, p, policy.clone()));
                }
            }
        }
        for (parent, name) in self.exporters_of(component, port) {
            feeds.extend(self.input_feeds(parent, &name));
        }
        feeds
    }

    /// Concrete sinks fed by the output `(component, port)`
    fn output_feeds(&self, component: ComponentId, port: &str) -> Vec<(ComponentId, String, ConnectionPolicy)> {
        let mut feeds = Vec::new();
        for (sink, info) in self.dataflow.out_edges(&component) {
            for ((source_port, sink_port), policy) in info {
                if source_port == port
                    && let Some((s, p)) = self.resolve_sink(*sink, sink_port)
                {
                    feeds.push((s, p, policy.clone()));
                }
            }
        }
        for (parent, name) in self.exporters_of(component, port) {
            feeds.extend(self.output_feeds(parent, &name));
        }
        feeds
    }

    /// Connections reaching `id`, with compositions resolved away
    pub fn concrete_input_connections(&self, id: ComponentId) -> Vec<(ComponentId, PortPair, ConnectionPolicy)> {
        let mut ports: BTreeSet<String> = self
            .dataflow
            .in_edges(&id)
            .flat_map(|(_, info)| info.keys().map(|(_, sink)| sink.clone()))
            .collect();
        ports.extend(self.exported_ports_of(id));

        let mut result = Vec::new();
        for port in ports {
            for (source, source_port, policy) in self.input_feeds(id, &port) {
                result.push((source, (source_port, port.clone()), policy));
            }
        }
        result.sort_by(|a, b| (a.0, &a.1).cmp(&(b.0, &b.1)));
        result.dedup_by(|a, b| a.0 == b.0 && a.1 == b.1);
        result
    }

    /// Connections leaving `id`, with compositions resolved away
    pub fn concrete_output_connections(&self, id: ComponentId) -> Vec<(PortPair, ComponentId, ConnectionPolicy)> {
        let mut ports: BTreeSet<String> = self
            .dataflow
            .out_edges(&id)
            .flat_map(|(_, info)| info.keys().map(|(source, _)| source.clone()))
            .collect();
        ports.extend(self.exported_ports_of(id));

        let mut result = Vec::new();
        for port in ports {
            for (sink, sink_port, policy) in self.output_feeds(id, &port) {
                result.push(((port.clone(), sink_port), sink, policy));
            }
        }
        result.sort_by(|a, b| (a.1, &a.0).cmp(&(b.1, &b.0)));
        result.dedup_by(|a, b| a.0 == b.0 && a.1 == b.1);
        result
    }

    fn exported_ports_of(&self, id: ComponentId) -> BTreeSet<String> {
        self.exports
            .values()
            .flat_map(|exports| exports.values())
            .filter(|e| e.child == id)
            .map(|e| e.port.clone())
            .collect()
    }

    /// Every concrete connection touching `id`, for change detection
    pub fn connection_signature(&self, id: ComponentId) -> BTreeSet<ConcreteConnection> {
        let inputs = self
            .concrete_input_connections(id)
            .into_iter()
            .map(|(source, (source_port, sink_port), policy)| ConcreteConnection {
                source,
                source_port,
                sink: id,
                sink_port,
                policy: policy.to_string(),
            });
        let outputs = self
            .concrete_output_connections(id)
            .into_iter()
            .map(|((source_port, sink_port), sink, policy)| ConcreteConnection {
                source: id,
                source_port,
                sink,
                sink_port,
                policy: policy.to_string(),
            });
        inputs.chain(outputs).collect()
    }

    // ========================================================================
    // Bookkeeping sets
    // ========================================================================

    pub fn mark_modified(&mut self, id: ComponentId) {
        if self.contains(id) {
            self.modified.insert(id);
        }
    }

    pub fn modified(&self) -> &BTreeSet<ComponentId> {
        &self.modified
    }

    /// Take the set of components modified since the last call
    pub fn take_modified(&mut self) -> BTreeSet<ComponentId> {
        std::mem::take(&mut self.modified)
    }

    pub fn mark_garbage(&mut self, id: ComponentId) {
        if self.contains(id) && self.garbage.insert(id) {
            self.modified.insert(id);
        }
    }

    pub fn is_garbage(&self, id: ComponentId) -> bool {
        self.garbage.contains(&id)
    }

    pub fn garbage(&self) -> &BTreeSet<ComponentId> {
        &self.garbage
    }

    pub fn flag_reconfiguration(&mut self, key: RemoteKey) {
        self.needs_reconfiguration.insert(key);
    }

    pub fn needs_reconfiguration(&self, key: &RemoteKey) -> bool {
        self.needs_reconfiguration.contains(key)
    }

    pub fn clear_reconfiguration(&mut self, key: &RemoteKey) {
        self.needs_reconfiguration.remove(key);
    }

    pub fn set_required_instance(&mut self, requirement: &str, id: ComponentId) {
        self.required_instances.insert(requirement.to_string(), id);
    }

    pub fn required_instances(&self) -> &BTreeMap<String, ComponentId> {
        &self.required_instances
    }

    /// Components reachable from a required instance through dependencies
    pub fn needed_components(&self) -> BTreeSet<ComponentId> {
        let mut needed = BTreeSet::new();
        let mut queue: Vec<ComponentId> = self.required_instances.values().copied().collect();
        while let Some(id) = queue.pop() {
            if !needed.insert(id) {
                continue;
            }
            queue.extend(self.children_of(id).map(|(_, link)| link.child));
        }
        needed
    }

    /// Remove undeployed components no requirement needs
    pub fn prune_unneeded(&mut self) -> usize {
        let needed = self.needed_components();
        let unneeded: Vec<ComponentId> = self
            .components
            .values()
            .filter(|c| c.slot.is_none() && !needed.contains(&c.id))
            .map(|c| c.id)
            .collect();
        for id in &unneeded {
            self.remove_component(*id);
        }
        unneeded.len()
    }

    /// Remove placeholders every parent only optionally depends on
    pub fn remove_optional_placeholders(&mut self) -> Vec<ComponentId> {
        let optional: Vec<ComponentId> = self
            .components
            .values()
            .filter(|c| {
                c.abstract_placeholder && !self.required_instances.values().any(|r| *r == c.id)
            })
            .filter(|c| {
                let links: Vec<bool> = self
                    .children
                    .values()
                    .flat_map(|links| links.values())
                    .filter(|link| link.child == c.id)
                    .map(|link| link.optional)
                    .collect();
                !links.is_empty() && links.iter().all(|optional| *optional)
            })
            .map(|c| c.id)
            .collect();
        for id in &optional {
            log::debug!("dropping optional placeholder {id}");
            self.remove_component(*id);
        }
        optional
    }

    /// Drop what no requirement needs anymore
    ///
    /// Deployed components may still be running: they are flagged as
    /// garbage and stopped by the runtime. Everything else is removed.
    pub fn collect_garbage(&mut self) -> Vec<ComponentId> {
        let needed = self.needed_components();
        let unneeded: Vec<ComponentId> = self
            .components
            .keys()
            .filter(|id| !needed.contains(id))
            .copied()
            .collect();

        let mut flagged = Vec::new();
        for id in unneeded {
            let deployed = self.component(id).is_some_and(|c| c.slot.is_some());
            if deployed {
                if !self.garbage.contains(&id) {
                    self.mark_garbage(id);
                    flagged.push(id);
                }
            } else {
                self.remove_component(id);
            }
        }
        flagged
    }

    // ========================================================================
    // Deployments and remote handles
    // ========================================================================

    pub fn add_deployment(&mut self, host: &str, model: &str) -> DeploymentId {
        self.next_deployment += 1;
        let id = DeploymentId(self.next_deployment);
        self.deployments.insert(
            id,
            Deployment {
                id,
                host: host.to_string(),
                model: model.to_string(),
                process_name: format!("{model}_{}", id.0),
                state: DeploymentState::Pending,
            },
        );
        id
    }

    pub fn deployment(&self, id: DeploymentId) -> Option<&Deployment> {
        self.deployments.get(&id)
    }

    pub fn deployment_mut(&mut self, id: DeploymentId) -> Option<&mut Deployment> {
        self.deployments.get_mut(&id)
    }

    pub fn deployments(&self) -> impl Iterator<Item = &Deployment> {
        self.deployments.values()
    }

    pub fn remove_deployment(&mut self, id: DeploymentId) -> Option<Deployment> {
        self.deployments.remove(&id)
    }

    /// A live instance of `model` on `host`, if any
    pub fn find_live_deployment(&self, host: &str, model: &str) -> Option<DeploymentId> {
        self.deployments
            .values()
            .find(|d| d.host == host && d.model == model && d.state.is_live())
            .map(|d| d.id)
    }

    /// Components allocated to a deployment
    pub fn components_of_deployment(&self, id: DeploymentId) -> Vec<ComponentId> {
        self.components
            .values()
            .filter(|c| c.slot.as_ref().is_some_and(|s| s.deployment == id))
            .map(|c| c.id)
            .collect()
    }

    /// The non-garbage component occupying a deployment slot
    pub fn component_on_slot(&self, deployment: DeploymentId, task: &str) -> Option<ComponentId> {
        self.components
            .values()
            .find(|c| {
                !self.garbage.contains(&c.id)
                    && !c.is_finished()
                    && c.slot
                        .as_ref()
                        .is_some_and(|s| s.deployment == deployment && s.task == task)
            })
            .map(|c| c.id)
    }

    /// The deployment a component is allocated to
    pub fn execution_agent(&self, id: ComponentId) -> Option<&Deployment> {
        let slot = self.component(id)?.slot.as_ref()?;
        self.deployment(slot.deployment)
    }

    pub fn agent_ready(&self, id: ComponentId) -> bool {
        self.execution_agent(id)
            .is_some_and(|d| d.state == DeploymentState::Ready)
    }

    /// Attach a live handle to a component
    pub fn bind_remote(&mut self, id: ComponentId, remote: Arc<dyn RemoteTask>) {
        if let Some(component) = self.components.get_mut(&id) {
            log::debug!("binding {component} to {}", remote.key());
            component.remote = Some(remote);
            component.state = LifecycleState::SettingUp;
            self.modified.insert(id);
        }
    }

    /// The unfinished component bound to a live task
    ///
    /// A task can be shared for a short while by a garbage component and
    /// its replacement; the replacement wins.
    pub fn find_by_remote(&self, key: &RemoteKey) -> Option<ComponentId> {
        let mut matches: Vec<&Component> = self
            .components
            .values()
            .filter(|c| !c.is_finished() && c.remote_key() == Some(key))
            .collect();
        matches.sort_by_key(|c| (self.garbage.contains(&c.id), !c.setup, c.id));
        matches.first().map(|c| c.id)
    }

    /// Remote keys of every unfinished component in the plan
    pub fn bound_remotes(&self) -> BTreeSet<RemoteKey> {
        self.components
            .values()
            .filter(|c| !c.is_finished())
            .filter_map(|c| c.remote_key().cloned())
            .collect()
    }

    pub fn remote(&self, id: ComponentId) -> Option<&Arc<dyn RemoteTask>> {
        self.component(id)?.remote.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(name: &str) -> ComponentModel {
        ComponentModel::task(name)
    }

    #[test]
    fn test_add_component_marks_modified() {
        let mut plan = Plan::new();
        let id = plan.add_component(&task("A"));
        assert!(plan.modified().contains(&id));
        assert_eq!(plan.take_modified(), BTreeSet::from([id]));
        assert!(plan.modified().is_empty());
    }

    #[test]
    fn test_concrete_connections_through_exports() {
        // outer composition: producer -> cmp.in, where cmp exports consumer.in
        let mut plan = Plan::new();
        let producer = plan.add_component(&task("Producer"));
        let cmp = plan.add_component(&ComponentModel::composition("Cmp"));
        let consumer = plan.add_component(&task("Consumer"));
        plan.add_child(cmp, "consumer", consumer, false);
        plan.add_export(cmp, "cmp_in", consumer, "in", PortDirection::Input);
        plan.connect(producer, "out", cmp, "cmp_in", ConnectionPolicy::buffer(3));

        let inputs = plan.concrete_input_connections(consumer);
        assert_eq!(inputs.len(), 1);
        assert_eq!(inputs[0].0, producer);
        assert_eq!(inputs[0].1, ("out".to_string(), "in".to_string()));
        assert_eq!(inputs[0].2, ConnectionPolicy::buffer(3));

        let outputs = plan.concrete_output_connections(producer);
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].1, consumer);
    }

    #[test]
    fn test_concrete_connections_through_output_export() {
        let mut plan = Plan::new();
        let cmp = plan.add_component(&ComponentModel::composition("Cmp"));
        let producer = plan.add_component(&task("Producer"));
        let consumer = plan.add_component(&task("Consumer"));
        plan.add_child(cmp, "producer", producer, false);
        plan.add_export(cmp, "cmp_out", producer, "out", PortDirection::Output);
        plan.connect(cmp, "cmp_out", consumer, "in", ConnectionPolicy::default());

        let inputs = plan.concrete_input_connections(consumer);
        assert_eq!(inputs.len(), 1);
        assert_eq!(inputs[0].0, producer);
        assert_eq!(plan.concrete_output_connections(producer)[0].1, consumer);
    }

    #[test]
    fn test_replace_component_rehomes_relations() {
        let mut plan = Plan::new();
        let parent = plan.add_component(&ComponentModel::composition("Cmp"));
        let a = plan.add_component(&task("T"));
        let b = plan.add_component(&task("T"));
        let source = plan.add_component(&task("S"));
        plan.add_child(parent, "child", b, false);
        plan.connect(source, "out", b, "in", ConnectionPolicy::default());
        plan.set_required_instance("req", b);
        plan.component_mut(b)
            .unwrap()
            .arguments
            .insert("rate".into(), Value::Integer(10));

        plan.replace_component(b, a);

        assert!(!plan.contains(b));
        assert_eq!(plan.child(parent, "child"), Some(a));
        assert!(plan.dataflow().has_edge(&source, &a));
        assert_eq!(plan.required_instances()["req"], a);
        assert_eq!(
            plan.component(a).unwrap().arguments["rate"],
            Value::Integer(10)
        );
    }

    #[test]
    fn test_collect_garbage() {
        let mut plan = Plan::new();
        let deployment = plan.add_deployment("host", "proc");
        let kept = plan.add_component(&task("A"));
        let dropped = plan.add_component(&task("B"));
        let deployed = plan.add_component(&task("C"));
        plan.component_mut(deployed).unwrap().slot = Some(DeployedSlot {
            deployment,
            task: "c".into(),
        });
        plan.set_required_instance("a", kept);

        let flagged = plan.collect_garbage();
        assert_eq!(flagged, vec![deployed]);
        assert!(plan.contains(kept));
        assert!(!plan.contains(dropped));
        assert!(plan.is_garbage(deployed));
    }

    #[test]
    fn test_resolution_base_keeps_deployed_only() {
        let mut plan = Plan::new();
        let deployment = plan.add_deployment("host", "proc");
        let cmp = plan.add_component(&ComponentModel::composition("Cmp"));
        let deployed = plan.add_component(&task("A"));
        plan.component_mut(deployed).unwrap().slot = Some(DeployedSlot {
            deployment,
            task: "a".into(),
        });
        plan.add_child(cmp, "a", deployed, false);

        let base = plan.resolution_base();
        assert!(base.contains(deployed));
        assert!(!base.contains(cmp));
        assert_eq!(base.parents_of(deployed), vec![]);
        assert!(base.deployment(deployment).is_some());

        let mut base = base;
        let fresh = base.add_component(&task("B"));
        assert!(fresh.0 > deployed.0);
    }

    #[test]
    fn test_fingerprint_tracks_arguments() {
        let mut plan = Plan::new();
        let a = plan.add_component(&task("A"));
        let b = plan.add_component(&task("A"));
        let fa = plan.component(a).unwrap().fingerprint();
        assert_eq!(fa, plan.component(b).unwrap().fingerprint());
        plan.component_mut(b)
            .unwrap()
            .arguments
            .insert("rate".into(), Value::Integer(1));
        assert_ne!(fa, plan.component(b).unwrap().fingerprint());
        assert_eq!(fa.len(), 16);
    }
}
