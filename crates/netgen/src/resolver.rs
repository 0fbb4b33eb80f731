//! Requirement resolution
//!
//! Expands an [`InstanceRequirement`] into a component subtree of the plan:
//! selections are applied to abstract parts, compositions are materialized
//! recursively with their connections and exports, and driver tasks are
//! bound to robot devices.
//!
//! Selections are looked up along a chain of requirements, innermost
//! first. Going through a [`Selection::Requirement`] pushes the selected
//! requirement in front of the chain.

use crate::error::{Error, Result};
use crate::plan::{ComponentId, Plan};
use crate::requirements::{InstanceRequirement, Selection};
use crate::robot::{DeviceDecl, Robot};
use netmodel::{ComponentModel, ModelKind, ModelRegistry, PortRef};
use std::collections::BTreeMap;

/// Deepest nesting of compositions and requirement selections
const MAX_DEPTH: usize = 32;

type Chain<'r> = Vec<&'r InstanceRequirement>;

pub struct Resolver<'a> {
    models: &'a ModelRegistry,
    robot: &'a Robot,
    requirements: &'a BTreeMap<String, InstanceRequirement>,
}

impl<'a> Resolver<'a> {
    pub fn new(
        models: &'a ModelRegistry,
        robot: &'a Robot,
        requirements: &'a BTreeMap<String, InstanceRequirement>,
    ) -> Self {
        Self {
            models,
            robot,
            requirements,
        }
    }

    /// Instantiate a requirement and register it as a required instance
    pub fn instantiate(&self, plan: &mut Plan, requirement: &InstanceRequirement) -> Result<ComponentId> {
        requirement.validate()?;
        let chain = vec![requirement];
        let id = self.instantiate_part(plan, "", &requirement.model, &chain, 0)?;
        self.apply_requirement(plan, id, requirement)?;
        plan.set_required_instance(&requirement.name, id);
        log::debug!("{} instantiated as {id}", requirement.name);
        Ok(id)
    }

    fn apply_requirement(&self, plan: &mut Plan, id: ComponentId, requirement: &InstanceRequirement) -> Result<()> {
        let hints = requirement.hint_patterns()?;
        if let Some(component) = plan.component_mut(id) {
            component
                .arguments
                .extend(requirement.arguments.iter().map(|(k, v)| (k.clone(), v.clone())));
            if requirement.deployed_as.is_some() {
                component.requested_name = requirement.deployed_as.clone();
            }
            for hint in hints {
                if !component.hints.iter().any(|h| h.as_str() == hint.as_str()) {
                    component.hints.push(hint);
                }
            }
        }
        Ok(())
    }

    fn find_selection<'r>(chain: &[&'r InstanceRequirement], role: &str, declared: &str) -> Option<&'r Selection> {
        chain.iter().find_map(|r| r.selection_for(role, declared))
    }

    /// Instantiate one part declared as `declared` under `role`
    fn instantiate_part(
        &self,
        plan: &mut Plan,
        role: &str,
        declared: &str,
        chain: &Chain<'_>,
        depth: usize,
    ) -> Result<ComponentId> {
        if depth > MAX_DEPTH {
            return Err(Error::spec(format!(
                "instantiation of {declared} nests deeper than {MAX_DEPTH} levels"
            )));
        }
        match Self::find_selection(chain, role, declared) {
            Some(selection) => self.apply_selection(plan, declared, selection, chain, depth),
            None => self.instantiate_model(plan, declared, chain, depth),
        }
    }

    fn apply_selection(
        &self,
        plan: &mut Plan,
        declared: &str,
        selection: &Selection,
        chain: &Chain<'_>,
        depth: usize,
    ) -> Result<ComponentId> {
        log::trace!("selecting {selection} for {declared}");
        match selection {
            Selection::Model(name) => {
                self.check_model_selection(declared, selection, name)?;
                self.instantiate_model(plan, name, chain, depth)
            }
            Selection::AbstractModel(name) => {
                self.check_model_selection(declared, selection, name)?;
                let model = self.models.require(name)?;
                let id = plan.add_component(model);
                if let Some(component) = plan.component_mut(id) {
                    component.abstract_placeholder = true;
                }
                Ok(id)
            }
            Selection::Device(name) => {
                let device = self
                    .robot
                    .find_device(name)
                    .ok_or_else(|| Error::spec(format!("selection of {declared} names unknown device {name}")))?;
                let driver = self
                    .models
                    .driver_for(&device.model)
                    .map_err(Error::from_model)?;
                if !self.models.fullfills(&device.model, declared)
                    && !self.models.fullfills(&driver.name, declared)
                {
                    return Err(Error::spec(format!(
                        "device {name} ({}) cannot be used as {declared}",
                        device.model
                    )));
                }
                Ok(self.instantiate_driver(plan, driver, &device))
            }
            Selection::Requirement(name) => {
                let requirement = self
                    .requirements
                    .get(name)
                    .ok_or_else(|| Error::spec(format!("selection of {declared} names unknown requirement {name}")))?;
                if !self.models.fullfills(&requirement.model, declared) {
                    return Err(Error::spec(format!(
                        "requirement {name} ({}) cannot be used as {declared}",
                        requirement.model
                    )));
                }
                let mut inner = Vec::with_capacity(chain.len() + 1);
                inner.push(requirement);
                inner.extend(chain.iter().copied());
                let id = self.instantiate_part(plan, "", &requirement.model, &inner, depth + 1)?;
                self.apply_requirement(plan, id, requirement)?;
                Ok(id)
            }
        }
    }

    fn check_model_selection(&self, declared: &str, selection: &Selection, name: &str) -> Result<()> {
        if !self.models.contains(name) {
            return Err(Error::spec(format!("selection of {declared} names unknown model {name}")));
        }
        if !self.models.fullfills(name, declared) {
            return Err(Error::spec(format!("{selection} does not fullfill {declared}")));
        }
        Ok(())
    }

    fn instantiate_model(
        &self,
        plan: &mut Plan,
        name: &str,
        chain: &Chain<'_>,
        depth: usize,
    ) -> Result<ComponentId> {
        let model = self.models.require(name)?;
        match model.kind {
            ModelKind::Composition if model.is_concrete() => {
                self.instantiate_composition(plan, model, chain, depth)
            }
            ModelKind::Task if model.is_concrete() => self.instantiate_task(plan, model, chain),
            ModelKind::Device | ModelKind::ComBus => self.instantiate_device(plan, model),
            _ => self.instantiate_abstract(plan, model, chain, depth),
        }
    }

    /// Pick an implementation for an abstract model, or leave a placeholder
    fn instantiate_abstract(
        &self,
        plan: &mut Plan,
        model: &ComponentModel,
        chain: &Chain<'_>,
        depth: usize,
    ) -> Result<ComponentId> {
        match self.models.select_implementation(&model.name) {
            Ok(concrete) => {
                log::debug!("using {} for {}", concrete.name, model.name);
                self.instantiate_model(plan, &concrete.name, chain, depth + 1)
            }
            Err(netmodel::Error::Unresolved { .. }) => {
                log::debug!("no implementation of {}, keeping a placeholder", model.name);
                Ok(plan.add_component(model))
            }
            Err(err) => Err(Error::from_model(err)),
        }
    }

    fn instantiate_task(&self, plan: &mut Plan, model: &ComponentModel, chain: &Chain<'_>) -> Result<ComponentId> {
        let id = plan.add_component(model);
        if !model.drivers.is_empty() {
            self.allocate_device(plan, id, model, chain)?;
        }
        Ok(id)
    }

    fn instantiate_driver(&self, plan: &mut Plan, driver: &ComponentModel, device: &DeviceDecl) -> ComponentId {
        let id = plan.add_component(driver);
        if let Some(component) = plan.component_mut(id) {
            component.device = Some(device.name.clone());
        }
        id
    }

    /// A device model was required without a selection: use the only
    /// device of that model the robot has
    fn instantiate_device(&self, plan: &mut Plan, model: &ComponentModel) -> Result<ComponentId> {
        let device = self.unique_device(&model.name)?;
        let driver = self
            .models
            .driver_for(&device.model)
            .map_err(Error::from_model)?;
        Ok(self.instantiate_driver(plan, driver, &device))
    }

    fn unique_device(&self, model: &str) -> Result<DeviceDecl> {
        let mut devices = self.robot.devices_of_model(self.models, model);
        match devices.len() {
            0 => Err(Error::UnresolvedRequirement {
                required: model.to_string(),
                reason: "the robot has no such device".to_string(),
            }),
            1 => Ok(devices.remove(0)),
            _ => Err(Error::AmbiguousSelection {
                required: model.to_string(),
                candidates: devices.into_iter().map(|d| d.name).collect(),
            }),
        }
    }

    /// Bind a driver task to the device it drives
    ///
    /// Explicit selections win, looked up innermost first by the driven
    /// device model then by the driver model. An already bound device is
    /// never replaced.
    fn allocate_device(
        &self,
        plan: &mut Plan,
        id: ComponentId,
        model: &ComponentModel,
        chain: &Chain<'_>,
    ) -> Result<()> {
        if plan.component(id).is_some_and(|c| c.device.is_some()) {
            return Ok(());
        }

        let mut device = None;
        for driven in &model.drivers {
            if let Some(selection) = Self::find_selection(chain, driven, &model.name) {
                let Selection::Device(name) = selection else {
                    return Err(Error::spec(format!(
                        "{selection} cannot bind the {driven} device of {}",
                        model.name
                    )));
                };
                let decl = self
                    .robot
                    .find_device(name)
                    .ok_or_else(|| Error::spec(format!("unknown device {name}")))?;
                if !self.models.fullfills(&decl.model, driven) {
                    return Err(Error::spec(format!(
                        "device {name} ({}) is not a {driven}",
                        decl.model
                    )));
                }
                device = Some(decl);
                break;
            }
        }

        let device = match device {
            Some(device) => device,
            None => {
                let driven = model.drivers.first().map(String::as_str).unwrap_or_default();
                self.unique_device(driven)?
            }
        };
        log::debug!("{} drives device {}", model.name, device.name);
        if let Some(component) = plan.component_mut(id) {
            component.device = Some(device.name);
        }
        Ok(())
    }

    fn instantiate_composition(
        &self,
        plan: &mut Plan,
        model: &ComponentModel,
        chain: &Chain<'_>,
        depth: usize,
    ) -> Result<ComponentId> {
        let id = plan.add_component(model);

        for child in &model.children {
            let selection = Self::find_selection(chain, &child.role, &child.model);
            let by_merge_only = matches!(selection, Some(Selection::AbstractModel(_)));
            let child_id = self.instantiate_part(plan, &child.role, &child.model, chain, depth + 1)?;
            plan.add_child(id, &child.role, child_id, child.optional || by_merge_only);
        }

        for connection in &model.connections {
            let (source, source_port) = self.child_port(plan, id, model, &connection.from)?;
            let (sink, sink_port) = self.child_port(plan, id, model, &connection.to)?;
            plan.connect(source, &source_port, sink, &sink_port, connection.policy.clone());
        }

        for export in &model.exports {
            let declared = model
                .child(&export.child)
                .ok_or_else(|| Error::spec(format!("{} exports unknown child {}", model.name, export.child)))?;
            let direction = self
                .models
                .find_port(&declared.model, &export.port)
                .map(|p| p.direction)
                .ok_or_else(|| {
                    Error::spec(format!(
                        "{} exports unknown port {}.{}",
                        model.name, export.child, export.port
                    ))
                })?;
            let port_ref = PortRef {
                child: export.child.clone(),
                port: export.port.clone(),
            };
            let (child, port) = self.child_port(plan, id, model, &port_ref)?;
            plan.add_export(id, &export.name, child, &port, direction);
        }
        Ok(id)
    }

    /// Resolve a port of a composition child to the port of the component
    /// actually selected for it
    ///
    /// When the child was declared with a service and a model providing it
    /// was selected, the service port is renamed through the port mappings.
    fn child_port(
        &self,
        plan: &Plan,
        composition: ComponentId,
        model: &ComponentModel,
        port_ref: &PortRef,
    ) -> Result<(ComponentId, String)> {
        let declared = model.child(&port_ref.child).ok_or_else(|| {
            Error::spec(format!("{} has no child named {}", model.name, port_ref.child))
        })?;
        let child = plan.child(composition, &port_ref.child).ok_or_else(|| {
            Error::spec(format!("{} child {} was not instantiated", model.name, port_ref.child))
        })?;
        let actual = plan
            .component(child)
            .map(|c| c.model.clone())
            .unwrap_or_else(|| declared.model.clone());

        if actual == declared.model {
            return Ok((child, port_ref.port.clone()));
        }
        let port = self
            .models
            .port_mappings(&actual, &declared.model)
            .and_then(|mappings| mappings.get(&port_ref.port).cloned())
            .unwrap_or_else(|| port_ref.port.clone());
        Ok((child, port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::robot::DeviceDecl;
    use netmodel::{PortDirection, Value};

    fn models() -> ModelRegistry {
        ModelRegistry::from_models([
            ComponentModel::service("ImageSource").with_output("frame"),
            ComponentModel::task("Camera")
                .with_output("image")
                .providing("ImageSource", &[("frame", "image")]),
            ComponentModel::task("Detector").with_input("image").with_output("objects"),
            ComponentModel::composition("Perception")
                .with_child("source", "ImageSource")
                .with_child("detector", "Detector")
                .connecting(("source", "frame"), ("detector", "image"))
                .exporting("objects", "detector", "objects"),
        ])
        .unwrap()
    }

    fn resolve(models: &ModelRegistry, robot: &Robot, req: &InstanceRequirement) -> Result<(Plan, ComponentId)> {
        let requirements = BTreeMap::from([(req.name.clone(), req.clone())]);
        let resolver = Resolver::new(models, robot, &requirements);
        let mut plan = Plan::new();
        let id = resolver.instantiate(&mut plan, req)?;
        Ok((plan, id))
    }

    #[test]
    fn test_composition_renames_service_ports() {
        let models = models();
        let robot = Robot::new();
        let (plan, id) = resolve(&models, &robot, &InstanceRequirement::new("p", "Perception")).unwrap();

        let source = plan.child(id, "source").unwrap();
        let detector = plan.child(id, "detector").unwrap();
        assert_eq!(plan.component(source).unwrap().model, "Camera");

        let info = plan.dataflow().edge_info(&source, &detector).unwrap();
        assert!(info.contains_key(&("image".to_string(), "image".to_string())));

        let export = plan.export(id, "objects").unwrap();
        assert_eq!(export.child, detector);
        assert_eq!(export.direction, PortDirection::Output);
        assert_eq!(plan.required_instances()["p"], id);
    }

    #[test]
    fn test_ambiguous_service() {
        let mut models = models();
        models
            .insert(
                ComponentModel::task("StereoCamera")
                    .with_output("left")
                    .providing("ImageSource", &[("frame", "left")]),
            )
            .unwrap();
        let robot = Robot::new();
        let err = resolve(&models, &robot, &InstanceRequirement::new("p", "Perception")).unwrap_err();
        assert!(matches!(err, Error::AmbiguousSelection { .. }));

        // An explicit selection removes the ambiguity
        let req = InstanceRequirement::new("p", "Perception")
            .selecting("source", Selection::Model("StereoCamera".into()));
        let (plan, id) = resolve(&models, &robot, &req).unwrap();
        let source = plan.child(id, "source").unwrap();
        let detector = plan.child(id, "detector").unwrap();
        let info = plan.dataflow().edge_info(&source, &detector).unwrap();
        assert!(info.contains_key(&("left".to_string(), "image".to_string())));
    }

    #[test]
    fn test_selection_errors() {
        let models = models();
        let robot = Robot::new();
        let unknown = InstanceRequirement::new("p", "Perception")
            .selecting("source", Selection::Model("Nope".into()));
        assert!(matches!(resolve(&models, &robot, &unknown), Err(Error::Spec(_))));

        let wrong = InstanceRequirement::new("p", "Perception")
            .selecting("source", Selection::Model("Detector".into()));
        let err = resolve(&models, &robot, &wrong).unwrap_err();
        assert!(err.to_string().contains("does not fullfill"));
    }

    #[test]
    fn test_unimplemented_service_stays_abstract() {
        let models = ModelRegistry::from_models([
            ComponentModel::service("Localization").with_output("pose"),
            ComponentModel::composition("Nav").with_optional_child("loc", "Localization"),
        ])
        .unwrap();
        let robot = Robot::new();
        let (plan, id) = resolve(&models, &robot, &InstanceRequirement::new("n", "Nav")).unwrap();
        let loc = plan.child(id, "loc").unwrap();
        assert!(plan.component(loc).unwrap().abstract_placeholder);
    }

    #[test]
    fn test_requirement_arguments_and_metadata() {
        let models = models();
        let robot = Robot::new();
        let req = InstanceRequirement::new("d", "Detector")
            .with_argument("threshold", 5i64)
            .deployed_as("detector")
            .with_hint("^left");
        let (plan, id) = resolve(&models, &robot, &req).unwrap();
        let component = plan.component(id).unwrap();
        assert_eq!(component.arguments["threshold"], Value::Integer(5));
        assert_eq!(component.requested_name.as_deref(), Some("detector"));
        let hints: Vec<&str> = component.hints.iter().map(regex::Regex::as_str).collect();
        assert_eq!(hints, vec!["^left"]);
    }

    #[test]
    fn test_device_allocation() {
        let models = ModelRegistry::from_models([
            ComponentModel::device("Lidar"),
            ComponentModel::task("LidarDriver").with_output("scan").driving("Lidar"),
        ])
        .unwrap();
        let mut robot = Robot::new();
        robot.device(&models, DeviceDecl::new("front", "Lidar")).unwrap();

        // Single device: bound without a selection
        let (plan, id) = resolve(&models, &robot, &InstanceRequirement::new("l", "LidarDriver")).unwrap();
        assert_eq!(plan.component(id).unwrap().device.as_deref(), Some("front"));

        // Requiring the device model instantiates its driver
        let (plan, id) = resolve(&models, &robot, &InstanceRequirement::new("l", "Lidar")).unwrap();
        assert_eq!(plan.component(id).unwrap().model, "LidarDriver");

        robot.device(&models, DeviceDecl::new("rear", "Lidar")).unwrap();
        let err = resolve(&models, &robot, &InstanceRequirement::new("l", "LidarDriver")).unwrap_err();
        assert!(matches!(err, Error::AmbiguousSelection { .. }));

        let req = InstanceRequirement::new("l", "LidarDriver")
            .selecting("Lidar", Selection::Device("rear".into()));
        let (plan, id) = resolve(&models, &robot, &req).unwrap();
        assert_eq!(plan.component(id).unwrap().device.as_deref(), Some("rear"));
    }

    #[test]
    fn test_requirement_selection() {
        let models = models();
        let robot = Robot::new();
        let camera = InstanceRequirement::new("cam", "Camera").with_argument("fps", 30i64);
        let perception = InstanceRequirement::new("p", "Perception")
            .selecting("source", Selection::Requirement("cam".into()));
        let requirements = BTreeMap::from([
            ("cam".to_string(), camera),
            ("p".to_string(), perception.clone()),
        ]);
        let resolver = Resolver::new(&models, &robot, &requirements);
        let mut plan = Plan::new();
        let id = resolver.instantiate(&mut plan, &perception).unwrap();

        let source = plan.child(id, "source").unwrap();
        assert_eq!(plan.component(source).unwrap().arguments["fps"], Value::Integer(30));
    }
}
