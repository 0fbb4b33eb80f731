//! Core model types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// What a model describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    /// A concrete component running inside a deployment process
    Task,
    /// A set of children and the connections between them
    Composition,
    /// An abstract interface that tasks or compositions provide
    Service,
    /// A hardware device, handled by a driver task
    Device,
    /// A communication bus multiplexing devices, also handled by a driver
    ComBus,
}

impl ModelKind {
    /// Device-backed models are resolved through the robot description
    pub fn is_device(&self) -> bool {
        matches!(self, Self::Device | Self::ComBus)
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Task => "task",
            Self::Composition => "composition",
            Self::Service => "service",
            Self::Device => "device",
            Self::ComBus => "com_bus",
        };
        f.write_str(name)
    }
}

/// Direction of a port
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortDirection {
    Input,
    Output,
}

impl fmt::Display for PortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input => f.write_str("input"),
            Self::Output => f.write_str("output"),
        }
    }
}

fn default_type_name() -> String {
    "any".to_string()
}

/// A typed port declared on a model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortModel {
    pub name: String,
    pub direction: PortDirection,
    #[serde(default = "default_type_name", rename = "type")]
    pub type_name: String,
    /// Changing a connection on a static port requires reconfiguring the owner
    #[serde(default, rename = "static")]
    pub static_port: bool,
    /// Dynamic ports only exist once the component has been configured
    #[serde(default)]
    pub dynamic: bool,
    /// Whether buffered connections are accepted
    #[serde(default)]
    pub buffered: bool,
}

impl PortModel {
    pub fn input(name: &str) -> Self {
        Self {
            name: name.to_string(),
            direction: PortDirection::Input,
            type_name: default_type_name(),
            static_port: false,
            dynamic: false,
            buffered: false,
        }
    }

    pub fn output(name: &str) -> Self {
        Self {
            direction: PortDirection::Output,
            ..Self::input(name)
        }
    }

    pub fn with_static(mut self) -> Self {
        self.static_port = true;
        self
    }

    pub fn with_dynamic(mut self) -> Self {
        self.dynamic = true;
        self
    }

    pub fn is_input(&self) -> bool {
        self.direction == PortDirection::Input
    }

    pub fn is_output(&self) -> bool {
        self.direction == PortDirection::Output
    }
}

/// Argument and extension values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Integer(_) => "integer",
            Self::Float(_) => "float",
            Self::Text(_) => "string",
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Text(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// How samples travel over a connection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    /// Only the last sample is kept
    #[default]
    Data,
    /// Samples are queued up to the buffer size
    Buffer,
}

/// Connection policy attached to a port-to-port connection
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionPolicy {
    #[serde(default, rename = "type")]
    pub kind: PolicyKind,
    #[serde(default)]
    pub size: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport: Option<String>,
}

impl ConnectionPolicy {
    pub fn buffer(size: u32) -> Self {
        Self {
            kind: PolicyKind::Buffer,
            size,
            transport: None,
        }
    }
}

impl fmt::Display for ConnectionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            PolicyKind::Data => f.write_str("data")?,
            PolicyKind::Buffer => write!(f, "buffer({})", self.size)?,
        }
        if let Some(transport) = &self.transport {
            write!(f, " via {transport}")?;
        }
        Ok(())
    }
}

/// A service provided by a model, with the renames it applies
///
/// `port_mappings` maps the service's port names to the provider's.
/// Unmapped ports keep their name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvidedService {
    pub service: String,
    #[serde(default)]
    pub port_mappings: BTreeMap<String, String>,
}

/// A child slot of a composition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildModel {
    pub role: String,
    pub model: String,
    #[serde(default)]
    pub optional: bool,
}

/// A child port made visible on the composition's own interface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportModel {
    pub name: String,
    pub child: String,
    pub port: String,
}

/// `child.port` reference inside a composition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRef {
    pub child: String,
    pub port: String,
}

/// A connection between two children of a composition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionModel {
    pub from: PortRef,
    pub to: PortRef,
    #[serde(default)]
    pub policy: ConnectionPolicy,
}

/// Type of a configuration extension field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Integer,
    Float,
    String,
    Bool,
}

/// A typed configuration field a model accepts on its instances
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtensionField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default)]
    pub required: bool,
}

/// A registered model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentModel {
    pub name: String,
    pub kind: ModelKind,
    #[serde(default)]
    pub ports: Vec<PortModel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub specializes: Option<String>,
    #[serde(default)]
    pub provides: Vec<ProvidedService>,
    #[serde(default)]
    pub children: Vec<ChildModel>,
    #[serde(default)]
    pub exports: Vec<ExportModel>,
    #[serde(default)]
    pub connections: Vec<ConnectionModel>,
    /// Default argument values
    #[serde(default)]
    pub arguments: BTreeMap<String, Value>,
    /// Device models this task is a driver for
    #[serde(default)]
    pub drivers: Vec<String>,
    #[serde(default)]
    pub extensions: Vec<ExtensionField>,
    #[serde(default, rename = "abstract")]
    pub abstract_model: bool,
}

impl ComponentModel {
    pub fn new(name: &str, kind: ModelKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            ports: Vec::new(),
            specializes: None,
            provides: Vec::new(),
            children: Vec::new(),
            exports: Vec::new(),
            connections: Vec::new(),
            arguments: BTreeMap::new(),
            drivers: Vec::new(),
            extensions: Vec::new(),
            abstract_model: false,
        }
    }

    pub fn task(name: &str) -> Self {
        Self::new(name, ModelKind::Task)
    }

    pub fn service(name: &str) -> Self {
        Self::new(name, ModelKind::Service)
    }

    pub fn composition(name: &str) -> Self {
        Self::new(name, ModelKind::Composition)
    }

    pub fn device(name: &str) -> Self {
        Self::new(name, ModelKind::Device)
    }

    pub fn with_port(mut self, port: PortModel) -> Self {
        self.ports.push(port);
        self
    }

    pub fn with_input(self, name: &str) -> Self {
        self.with_port(PortModel::input(name))
    }

    pub fn with_output(self, name: &str) -> Self {
        self.with_port(PortModel::output(name))
    }

    pub fn specializing(mut self, parent: &str) -> Self {
        self.specializes = Some(parent.to_string());
        self
    }

    pub fn providing(mut self, service: &str, mappings: &[(&str, &str)]) -> Self {
        self.provides.push(ProvidedService {
            service: service.to_string(),
            port_mappings: mappings
                .iter()
                .map(|(from, to)| ((*from).to_string(), (*to).to_string()))
                .collect(),
        });
        self
    }

    pub fn with_child(mut self, role: &str, model: &str) -> Self {
        self.children.push(ChildModel {
            role: role.to_string(),
            model: model.to_string(),
            optional: false,
        });
        self
    }

    pub fn with_optional_child(mut self, role: &str, model: &str) -> Self {
        self.children.push(ChildModel {
            role: role.to_string(),
            model: model.to_string(),
            optional: true,
        });
        self
    }

    pub fn connecting(mut self, from: (&str, &str), to: (&str, &str)) -> Self {
        self.connections.push(ConnectionModel {
            from: PortRef {
                child: from.0.to_string(),
                port: from.1.to_string(),
            },
            to: PortRef {
                child: to.0.to_string(),
                port: to.1.to_string(),
            },
            policy: ConnectionPolicy::default(),
        });
        self
    }

    pub fn exporting(mut self, name: &str, child: &str, port: &str) -> Self {
        self.exports.push(ExportModel {
            name: name.to_string(),
            child: child.to_string(),
            port: port.to_string(),
        });
        self
    }

    pub fn driving(mut self, device: &str) -> Self {
        self.drivers.push(device.to_string());
        self
    }

    pub fn with_argument(mut self, name: &str, value: Value) -> Self {
        self.arguments.insert(name.to_string(), value);
        self
    }

    pub fn as_abstract(mut self) -> Self {
        self.abstract_model = true;
        self
    }

    /// Ports declared directly on this model (inherited ones excluded)
    pub fn own_port(&self, name: &str) -> Option<&PortModel> {
        self.ports.iter().find(|p| p.name == name)
    }

    pub fn child(&self, role: &str) -> Option<&ChildModel> {
        self.children.iter().find(|c| c.role == role)
    }

    /// Concrete models can be instantiated as-is
    pub fn is_concrete(&self) -> bool {
        !self.abstract_model && matches!(self.kind, ModelKind::Task | ModelKind::Composition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_model_from_toml() {
        let port: PortModel = toml::from_str(
            r#"
            name = "cmd"
            direction = "input"
            static = true
            "#,
        )
        .unwrap();
        assert!(port.is_input());
        assert!(port.static_port);
        assert!(!port.dynamic);
        assert_eq!(port.type_name, "any");
    }

    #[test]
    fn test_value_untagged() {
        #[derive(Deserialize)]
        struct Args {
            args: BTreeMap<String, Value>,
        }
        let parsed: Args = toml::from_str(
            r#"
            args = { rate = 10, gain = 0.5, name = "left", on = true }
            "#,
        )
        .unwrap();
        assert_eq!(parsed.args["rate"], Value::Integer(10));
        assert_eq!(parsed.args["gain"], Value::Float(0.5));
        assert_eq!(parsed.args["name"], Value::Text("left".into()));
        assert_eq!(parsed.args["on"], Value::Bool(true));
    }

    #[test]
    fn test_policy_display() {
        assert_eq!(ConnectionPolicy::default().to_string(), "data");
        assert_eq!(ConnectionPolicy::buffer(20).to_string(), "buffer(20)");
    }

    #[test]
    fn test_concrete_models() {
        assert!(ComponentModel::task("A").is_concrete());
        assert!(!ComponentModel::task("A").as_abstract().is_concrete());
        assert!(!ComponentModel::service("S").is_concrete());
        assert!(ModelKind::ComBus.is_device());
    }
}
