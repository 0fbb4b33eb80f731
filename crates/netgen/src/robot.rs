//! Robot description: devices and the communication busses they hang off
//!
//! Devices are declared against device models of the registry. Their
//! extension values are validated against the capability table of their
//! model, merged with the one of the bus they are attached to.

use crate::error::{Error, Result};
use netmodel::{CapabilityTable, ModelKind, ModelRegistry, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceDecl {
    pub name: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub com_bus: Option<String>,
    #[serde(default)]
    pub extensions: BTreeMap<String, Value>,
}

impl DeviceDecl {
    pub fn new(name: &str, model: &str) -> Self {
        Self {
            name: name.to_string(),
            model: model.to_string(),
            com_bus: None,
            extensions: BTreeMap::new(),
        }
    }

    pub fn on_bus(mut self, bus: &str) -> Self {
        self.com_bus = Some(bus.to_string());
        self
    }

    pub fn with_extension(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.extensions.insert(name.to_string(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComBusDecl {
    pub name: String,
    pub model: String,
}

#[derive(Debug, Clone, Default)]
pub struct Robot {
    devices: BTreeMap<String, DeviceDecl>,
    com_busses: BTreeMap<String, ComBusDecl>,
}

impl Robot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a robot from declarations, busses first
    pub fn from_decls(
        models: &ModelRegistry,
        com_busses: &[ComBusDecl],
        devices: &[DeviceDecl],
    ) -> Result<Self> {
        let mut robot = Self::new();
        for bus in com_busses {
            robot.com_bus(models, &bus.name, &bus.model)?;
        }
        for device in devices {
            robot.device(models, device.clone())?;
        }
        Ok(robot)
    }

    fn check_name(&self, name: &str) -> Result<()> {
        if self.devices.contains_key(name) || self.com_busses.contains_key(name) {
            return Err(Error::spec(format!("device {name} is already declared")));
        }
        Ok(())
    }

    /// Declare a device
    pub fn device(&mut self, models: &ModelRegistry, decl: DeviceDecl) -> Result<()> {
        self.check_name(&decl.name)?;
        let model = models
            .get(&decl.model)
            .ok_or_else(|| Error::spec(format!("{} is not a known device model", decl.model)))?;
        if !model.kind.is_device() {
            return Err(Error::spec(format!(
                "{} is a {:?} model, not a device model",
                decl.model, model.kind
            )));
        }
        if let Some(bus) = &decl.com_bus
            && !self.com_busses.contains_key(bus)
        {
            return Err(Error::spec(format!(
                "device {} references unknown com bus {bus}",
                decl.name
            )));
        }
        self.check_extensions(models, &decl)?;

        log::debug!("declared device {} ({})", decl.name, decl.model);
        self.devices.insert(decl.name.clone(), decl);
        Ok(())
    }

    /// Declare a communication bus
    pub fn com_bus(&mut self, models: &ModelRegistry, name: &str, model: &str) -> Result<()> {
        self.check_name(name)?;
        let bus_model = models
            .get(model)
            .ok_or_else(|| Error::spec(format!("{model} is not a known com bus model")))?;
        if bus_model.kind != ModelKind::ComBus {
            return Err(Error::spec(format!("{model} is not a com bus model")));
        }
        self.com_busses.insert(
            name.to_string(),
            ComBusDecl {
                name: name.to_string(),
                model: model.to_string(),
            },
        );
        Ok(())
    }

    /// Attach already declared devices to a bus
    pub fn through(&mut self, models: &ModelRegistry, bus: &str, devices: &[&str]) -> Result<()> {
        if !self.com_busses.contains_key(bus) {
            return Err(Error::spec(format!("unknown com bus {bus}")));
        }
        for name in devices {
            let mut decl = self
                .devices
                .get(*name)
                .cloned()
                .ok_or_else(|| Error::spec(format!("unknown device {name}")))?;
            decl.com_bus = Some(bus.to_string());
            self.check_extensions(models, &decl)?;
            self.devices.insert(decl.name.clone(), decl);
        }
        Ok(())
    }

    fn check_extensions(&self, models: &ModelRegistry, decl: &DeviceDecl) -> Result<()> {
        let mut table = CapabilityTable::for_model(models, &decl.model);
        if let Some(bus) = decl.com_bus.as_ref().and_then(|b| self.com_busses.get(b)) {
            table.merge(&CapabilityTable::for_model(models, &bus.model));
        }
        table
            .validate(&decl.name, &decl.extensions)
            .map_err(|e| Error::spec(e.to_string()))
    }

    /// Find a device or a bus by name
    ///
    /// Busses are returned as devices of their bus model.
    pub fn find_device(&self, name: &str) -> Option<DeviceDecl> {
        if let Some(device) = self.devices.get(name) {
            return Some(device.clone());
        }
        self.com_busses
            .get(name)
            .map(|bus| DeviceDecl::new(&bus.name, &bus.model))
    }

    /// Devices whose model fullfills `model`, sorted by name
    pub fn devices_of_model(&self, models: &ModelRegistry, model: &str) -> Vec<DeviceDecl> {
        let busses = self
            .com_busses
            .values()
            .map(|bus| DeviceDecl::new(&bus.name, &bus.model));
        let mut found: Vec<DeviceDecl> = self
            .devices
            .values()
            .cloned()
            .chain(busses)
            .filter(|d| models.fullfills(&d.model, model))
            .collect();
        found.sort_by(|a, b| a.name.cmp(&b.name));
        found
    }

    pub fn devices(&self) -> impl Iterator<Item = &DeviceDecl> {
        self.devices.values()
    }

    pub fn com_busses(&self) -> impl Iterator<Item = &ComBusDecl> {
        self.com_busses.values()
    }

    /// Devices attached to a bus
    pub fn attached_to(&self, bus: &str) -> Vec<&DeviceDecl> {
        self.devices
            .values()
            .filter(|d| d.com_bus.as_deref() == Some(bus))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netmodel::{ComponentModel, ExtensionField, FieldType};

    fn registry() -> ModelRegistry {
        let mut camera = ComponentModel::device("Camera");
        camera.extensions.push(ExtensionField {
            name: "fps".into(),
            field_type: FieldType::Integer,
            min: Some(1.0),
            max: Some(120.0),
            required: false,
        });
        let mut can = ComponentModel::new("CAN", ModelKind::ComBus);
        can.extensions.push(ExtensionField {
            name: "can_id".into(),
            field_type: FieldType::Integer,
            min: None,
            max: None,
            required: false,
        });
        ModelRegistry::from_models([camera, can, ComponentModel::task("Driver")]).unwrap()
    }

    #[test]
    fn test_device_declaration_errors() {
        let models = registry();
        let mut robot = Robot::new();
        robot
            .device(&models, DeviceDecl::new("front", "Camera"))
            .unwrap();

        let dup = robot.device(&models, DeviceDecl::new("front", "Camera"));
        assert!(dup.unwrap_err().to_string().contains("already declared"));

        let unknown = robot.device(&models, DeviceDecl::new("x", "Lidar"));
        assert!(unknown.unwrap_err().to_string().contains("not a known device model"));

        let not_device = robot.device(&models, DeviceDecl::new("y", "Driver"));
        assert!(not_device.unwrap_err().to_string().contains("not a device model"));

        let no_bus = robot.device(&models, DeviceDecl::new("z", "Camera").on_bus("can0"));
        assert!(no_bus.unwrap_err().to_string().contains("unknown com bus"));
    }

    #[test]
    fn test_extensions_checked_with_bus_table() {
        let models = registry();
        let mut robot = Robot::new();
        robot.com_bus(&models, "can0", "CAN").unwrap();

        let out_of_range = DeviceDecl::new("a", "Camera").with_extension("fps", 500i64);
        assert!(robot.device(&models, out_of_range).is_err());

        // can_id only exists once the device sits on the bus
        let on_bus = DeviceDecl::new("b", "Camera")
            .on_bus("can0")
            .with_extension("can_id", 3i64);
        robot.device(&models, on_bus).unwrap();

        let off_bus = DeviceDecl::new("c", "Camera").with_extension("can_id", 3i64);
        assert!(robot.device(&models, off_bus).is_err());
    }

    #[test]
    fn test_through_and_lookup() {
        let models = registry();
        let mut robot = Robot::new();
        robot.com_bus(&models, "can0", "CAN").unwrap();
        robot
            .device(&models, DeviceDecl::new("left", "Camera"))
            .unwrap();
        robot
            .device(&models, DeviceDecl::new("right", "Camera"))
            .unwrap();
        robot.through(&models, "can0", &["left"]).unwrap();

        assert_eq!(robot.attached_to("can0").len(), 1);
        assert_eq!(robot.devices_of_model(&models, "Camera").len(), 2);
        assert_eq!(robot.find_device("can0").unwrap().model, "CAN");
        assert!(robot.through(&models, "can1", &["left"]).is_err());
    }
}
