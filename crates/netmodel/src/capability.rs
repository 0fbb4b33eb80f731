//! Typed configuration extensions
//!
//! Models declare the extension fields their instances accept (a camera's
//! frame rate, a bus baud rate). A [`CapabilityTable`] gathers the fields a
//! model accepts, inherited ones included, and validates instance values.

use crate::error::{Error, Result};
use crate::registry::ModelRegistry;
use crate::types::{ExtensionField, FieldType, Value};
use std::collections::BTreeMap;

impl ExtensionField {
    /// Check a single value against this field's type and bounds
    pub fn check(&self, value: &Value) -> std::result::Result<(), String> {
        let type_ok = matches!(
            (self.field_type, value),
            (FieldType::Integer, Value::Integer(_))
                | (FieldType::Float, Value::Float(_) | Value::Integer(_))
                | (FieldType::String, Value::Text(_))
                | (FieldType::Bool, Value::Bool(_))
        );
        if !type_ok {
            return Err(format!(
                "expected {:?}, got {}",
                self.field_type,
                value.type_name()
            )
            .to_lowercase());
        }

        if let Some(number) = value.as_f64() {
            if let Some(min) = self.min
                && number < min
            {
                return Err(format!("{number} is below the minimum of {min}"));
            }
            if let Some(max) = self.max
                && number > max
            {
                return Err(format!("{number} is above the maximum of {max}"));
            }
        }
        Ok(())
    }
}

/// Extension fields accepted by one model
#[derive(Debug, Clone, Default)]
pub struct CapabilityTable {
    fields: BTreeMap<String, ExtensionField>,
}

impl CapabilityTable {
    pub fn from_fields(fields: impl IntoIterator<Item = ExtensionField>) -> Self {
        Self {
            fields: fields.into_iter().map(|f| (f.name.clone(), f)).collect(),
        }
    }

    /// Fields declared by `model` and everything it specializes or provides
    pub fn for_model(registry: &ModelRegistry, model: &str) -> Self {
        let mut table = Self::default();
        for name in registry.ancestry(model) {
            if let Some(m) = registry.get(&name) {
                for field in &m.extensions {
                    table
                        .fields
                        .entry(field.name.clone())
                        .or_insert_with(|| field.clone());
                }
            }
        }
        table
    }

    /// Add the fields of another table, keeping existing declarations
    pub fn merge(&mut self, other: &Self) {
        for (name, field) in &other.fields {
            self.fields
                .entry(name.clone())
                .or_insert_with(|| field.clone());
        }
    }

    pub fn get(&self, name: &str) -> Option<&ExtensionField> {
        self.fields.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Validate the extension values of `owner`
    ///
    /// Unknown fields, type mismatches, out-of-range numbers and missing
    /// required fields are all rejected.
    pub fn validate(&self, owner: &str, values: &BTreeMap<String, Value>) -> Result<()> {
        for (name, value) in values {
            let field = self.fields.get(name).ok_or_else(|| Error::InvalidExtension {
                owner: owner.to_string(),
                field: name.clone(),
                message: "unknown extension field".to_string(),
            })?;
            field.check(value).map_err(|message| Error::InvalidExtension {
                owner: owner.to_string(),
                field: name.clone(),
                message,
            })?;
        }

        if let Some(missing) = self
            .fields
            .values()
            .find(|f| f.required && !values.contains_key(&f.name))
        {
            return Err(Error::InvalidExtension {
                owner: owner.to_string(),
                field: missing.name.clone(),
                message: "required field is missing".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ComponentModel;

    fn rate_field() -> ExtensionField {
        ExtensionField {
            name: "rate".into(),
            field_type: FieldType::Float,
            min: Some(0.0),
            max: Some(100.0),
            required: false,
        }
    }

    #[test]
    fn test_check_types_and_bounds() {
        let field = rate_field();
        assert!(field.check(&Value::Float(10.0)).is_ok());
        assert!(field.check(&Value::Integer(10)).is_ok());
        assert!(field.check(&Value::Float(-1.0)).is_err());
        assert!(field.check(&Value::Float(101.0)).is_err());
        let err = field.check(&Value::Text("fast".into())).unwrap_err();
        assert!(err.contains("expected float"));
    }

    #[test]
    fn test_validate_unknown_and_required() {
        let mut required = rate_field();
        required.name = "baud".into();
        required.required = true;
        let table = CapabilityTable::from_fields([rate_field(), required]);

        let mut values = BTreeMap::new();
        values.insert("baud".to_string(), Value::Integer(9600));
        assert!(table.validate("imu", &values).is_ok());

        values.insert("color".to_string(), Value::Bool(true));
        assert!(matches!(
            table.validate("imu", &values),
            Err(Error::InvalidExtension { field, .. }) if field == "color"
        ));

        assert!(matches!(
            table.validate("imu", &BTreeMap::new()),
            Err(Error::InvalidExtension { field, .. }) if field == "baud"
        ));
    }

    #[test]
    fn test_table_inherits_fields() {
        let mut base = ComponentModel::device("Camera");
        base.extensions.push(rate_field());
        let registry = ModelRegistry::from_models([
            base,
            ComponentModel::device("StereoCamera").specializing("Camera"),
        ])
        .unwrap();
        let table = CapabilityTable::for_model(&registry, "StereoCamera");
        assert!(table.get("rate").is_some());
    }
}
