//! Explicit model registry
//!
//! Models are stored by name. The `specializes` and `provides` relations are
//! plain name references resolved on demand, so a registry can be built in
//! any order and checked once with [`ModelRegistry::validate`].

use crate::error::{Error, Result};
use crate::types::{ComponentModel, ModelKind, PortDirection, PortModel};
use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use std::collections::{BTreeMap, BTreeSet};

/// Service port name -> provider port name
pub type PortMapping = BTreeMap<String, String>;

/// All models known to the system
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    models: BTreeMap<String, ComponentModel>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build and validate a registry in one go
    pub fn from_models(models: impl IntoIterator<Item = ComponentModel>) -> Result<Self> {
        let mut registry = Self::new();
        for model in models {
            registry.insert(model)?;
        }
        registry.validate()?;
        Ok(registry)
    }

    pub fn insert(&mut self, model: ComponentModel) -> Result<()> {
        if self.models.contains_key(&model.name) {
            return Err(Error::DuplicateModel(model.name));
        }
        self.models.insert(model.name.clone(), model);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ComponentModel> {
        self.models.get(name)
    }

    pub fn require(&self, name: &str) -> Result<&ComponentModel> {
        self.get(name)
            .ok_or_else(|| Error::UnknownModel(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.models.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ComponentModel> {
        self.models.values()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    // ========================================================================
    // Relations
    // ========================================================================

    /// Every model `name` can stand in for: itself, its specialization
    /// parents and all services provided along the way
    pub fn ancestry(&self, name: &str) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut queue = vec![name.to_string()];
        while let Some(current) = queue.pop() {
            if !seen.insert(current.clone()) {
                continue;
            }
            if let Some(model) = self.get(&current) {
                if let Some(parent) = &model.specializes {
                    queue.push(parent.clone());
                }
                queue.extend(model.provides.iter().map(|p| p.service.clone()));
            }
        }
        seen
    }

    /// Whether instances of `model` can be used where `required` is expected
    pub fn fullfills(&self, model: &str, required: &str) -> bool {
        model == required || self.ancestry(model).contains(required)
    }

    /// Map the ports of `service` onto the ports of `model`
    ///
    /// Renames compose through provided services, so a task providing a
    /// specialized service maps the generic service's ports through the
    /// specialized names down to its own. Returns `None` when `model` does
    /// not fullfill `service`.
    pub fn port_mappings(&self, model: &str, service: &str) -> Option<PortMapping> {
        self.mappings_inner(model, service, &mut BTreeSet::new())
    }

    fn mappings_inner(
        &self,
        model: &str,
        service: &str,
        visited: &mut BTreeSet<String>,
    ) -> Option<PortMapping> {
        if !visited.insert(model.to_string()) {
            return None;
        }
        if model == service {
            return Some(
                self.all_ports(service)
                    .into_iter()
                    .map(|p| (p.name.clone(), p.name))
                    .collect(),
            );
        }

        let current = self.get(model)?;
        for provided in &current.provides {
            if let Some(inner) = self.mappings_inner(&provided.service, service, visited) {
                return Some(
                    inner
                        .into_iter()
                        .map(|(service_port, middle)| {
                            let target = provided
                                .port_mappings
                                .get(&middle)
                                .cloned()
                                .unwrap_or(middle);
                            (service_port, target)
                        })
                        .collect(),
                );
            }
        }
        // Specialized models inherit the parent's ports unchanged
        let parent = current.specializes.as_deref()?;
        self.mappings_inner(parent, service, visited)
    }

    // ========================================================================
    // Ports
    // ========================================================================

    /// Ports of a model including inherited and exported ones, sorted by name
    pub fn all_ports(&self, name: &str) -> Vec<PortModel> {
        self.collect_ports(name, &mut BTreeSet::new())
            .into_values()
            .collect()
    }

    fn collect_ports(
        &self,
        name: &str,
        visited: &mut BTreeSet<String>,
    ) -> BTreeMap<String, PortModel> {
        let mut ports = BTreeMap::new();
        if !visited.insert(name.to_string()) {
            return ports;
        }
        let Some(model) = self.get(name) else {
            return ports;
        };

        if let Some(parent) = &model.specializes {
            ports.extend(self.collect_ports(parent, visited));
        }
        for port in &model.ports {
            ports.insert(port.name.clone(), port.clone());
        }
        for export in &model.exports {
            let Some(child) = model.child(&export.child) else {
                continue;
            };
            let child_ports = self.collect_ports(&child.model, &mut visited.clone());
            if let Some(port) = child_ports.get(&export.port) {
                let mut exported = port.clone();
                exported.name = export.name.clone();
                ports.insert(export.name.clone(), exported);
            }
        }
        ports
    }

    /// Find a port by name, dynamic ports included
    pub fn find_port(&self, model: &str, port: &str) -> Option<PortModel> {
        self.collect_ports(model, &mut BTreeSet::new()).remove(port)
    }

    /// Find a static (non-dynamic) input port
    ///
    /// Dynamic ports are not part of the model interface until the
    /// component is configured, so they are never returned here.
    pub fn find_input_port(&self, model: &str, port: &str) -> Option<PortModel> {
        self.find_port(model, port)
            .filter(|p| p.is_input() && !p.dynamic)
    }

    /// Find a static (non-dynamic) output port
    pub fn find_output_port(&self, model: &str, port: &str) -> Option<PortModel> {
        self.find_port(model, port)
            .filter(|p| p.is_output() && !p.dynamic)
    }

    // ========================================================================
    // Selection
    // ========================================================================

    /// Drop candidates that specialize or provide another candidate
    pub fn most_generic<'a>(&self, candidates: Vec<&'a ComponentModel>) -> Vec<&'a ComponentModel> {
        let names: BTreeSet<&str> = candidates.iter().map(|c| c.name.as_str()).collect();
        candidates
            .into_iter()
            .filter(|candidate| {
                let ancestry = self.ancestry(&candidate.name);
                !ancestry
                    .iter()
                    .any(|a| a != &candidate.name && names.contains(a.as_str()))
            })
            .collect()
    }

    /// Pick the concrete model to instantiate for `required`
    ///
    /// A concrete model is returned as-is. Otherwise the most generic
    /// concrete models fullfilling it are considered; more than one is an
    /// ambiguity, none means the requirement cannot be resolved.
    pub fn select_implementation(&self, required: &str) -> Result<&ComponentModel> {
        let model = self.require(required)?;
        if model.is_concrete() {
            return Ok(model);
        }

        let candidates: Vec<&ComponentModel> = self
            .iter()
            .filter(|m| m.is_concrete() && m.name != required && self.fullfills(&m.name, required))
            .collect();
        Self::single(required, self.most_generic(candidates))
    }

    /// Find the driver task for a device model
    pub fn driver_for(&self, device_model: &str) -> Result<&ComponentModel> {
        self.require(device_model)?;
        let candidates: Vec<&ComponentModel> = self
            .iter()
            .filter(|m| {
                m.kind == ModelKind::Task
                    && !m.abstract_model
                    && m.drivers.iter().any(|d| self.fullfills(device_model, d))
            })
            .collect();
        Self::single(device_model, self.most_generic(candidates))
    }

    fn single<'a>(required: &str, mut candidates: Vec<&'a ComponentModel>) -> Result<&'a ComponentModel> {
        match candidates.len() {
            0 => Err(Error::Unresolved {
                required: required.to_string(),
            }),
            1 => Ok(candidates.remove(0)),
            _ => Err(Error::Ambiguous {
                required: required.to_string(),
                candidates: candidates.iter().map(|c| c.name.clone()).collect(),
            }),
        }
    }

    // ========================================================================
    // Validation
    // ========================================================================

    /// Check that every reference resolves and that relations do not loop
    pub fn validate(&self) -> Result<()> {
        self.check_cycles()?;
        for model in self.models.values() {
            self.validate_model(model)?;
        }
        Ok(())
    }

    /// Specialization and service relations must form a DAG
    fn check_cycles(&self) -> Result<()> {
        let mut relations: DiGraphMap<&str, ()> = DiGraphMap::new();
        for (name, model) in &self.models {
            relations.add_node(name.as_str());
            if let Some(parent) = &model.specializes {
                relations.add_edge(name.as_str(), parent.as_str(), ());
            }
            for provided in &model.provides {
                relations.add_edge(name.as_str(), provided.service.as_str(), ());
            }
        }
        toposort(&relations, None)
            .map(|_| ())
            .map_err(|cycle| Error::RelationCycle(cycle.node_id().to_string()))
    }

    fn validate_model(&self, model: &ComponentModel) -> Result<()> {
        let invalid = |message: String| Error::InvalidRelation {
            model: model.name.clone(),
            message,
        };

        let mut seen = BTreeSet::new();
        for port in &model.ports {
            if !seen.insert(port.name.as_str()) {
                return Err(Error::DuplicatePort {
                    model: model.name.clone(),
                    port: port.name.clone(),
                });
            }
        }

        if let Some(parent) = &model.specializes {
            let parent_model = self
                .get(parent)
                .ok_or_else(|| invalid(format!("specializes unknown model {parent}")))?;
            if parent_model.kind != model.kind {
                return Err(invalid(format!(
                    "cannot specialize {parent}: {} is not a {}",
                    parent_model.kind, model.kind
                )));
            }
        }

        let own_ports: BTreeSet<String> =
            self.all_ports(&model.name).into_iter().map(|p| p.name).collect();
        for provided in &model.provides {
            let service = self
                .get(&provided.service)
                .ok_or_else(|| invalid(format!("provides unknown service {}", provided.service)))?;
            if service.kind != ModelKind::Service {
                return Err(invalid(format!("{} is not a service", provided.service)));
            }
            let service_ports: BTreeSet<String> =
                self.all_ports(&service.name).into_iter().map(|p| p.name).collect();
            for (from, to) in &provided.port_mappings {
                if !service_ports.contains(from) {
                    return Err(Error::UnknownPort {
                        model: service.name.clone(),
                        port: from.clone(),
                    });
                }
                if !own_ports.contains(to) {
                    return Err(Error::UnknownPort {
                        model: model.name.clone(),
                        port: to.clone(),
                    });
                }
            }
        }

        if !model.children.is_empty() && model.kind != ModelKind::Composition {
            return Err(invalid("only compositions can have children".to_string()));
        }
        let mut roles = BTreeSet::new();
        for child in &model.children {
            if !roles.insert(child.role.as_str()) {
                return Err(invalid(format!("duplicate child role {}", child.role)));
            }
            if !self.contains(&child.model) {
                return Err(invalid(format!(
                    "child {} uses unknown model {}",
                    child.role, child.model
                )));
            }
        }

        for export in &model.exports {
            let child = model
                .child(&export.child)
                .ok_or_else(|| invalid(format!("export {} names unknown child {}", export.name, export.child)))?;
            if self.find_port(&child.model, &export.port).is_none() {
                return Err(Error::UnknownPort {
                    model: child.model.clone(),
                    port: export.port.clone(),
                });
            }
        }

        for connection in &model.connections {
            for (end, direction) in [
                (&connection.from, PortDirection::Output),
                (&connection.to, PortDirection::Input),
            ] {
                let child = model
                    .child(&end.child)
                    .ok_or_else(|| invalid(format!("connection names unknown child {}", end.child)))?;
                match self.find_port(&child.model, &end.port) {
                    Some(port) if port.direction == direction => {}
                    Some(_) => {
                        return Err(invalid(format!(
                            "{}.{} is not an {direction} port",
                            end.child, end.port
                        )));
                    }
                    None => {
                        return Err(Error::UnknownPort {
                            model: child.model.clone(),
                            port: end.port.clone(),
                        });
                    }
                }
            }
        }

        for device in &model.drivers {
            match self.get(device) {
                Some(d) if d.kind.is_device() => {}
                _ => return Err(invalid(format!("{device} is not a device model"))),
            }
        }
        Ok(())
    }
}
