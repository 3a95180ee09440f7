use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Type of a single record field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldType {
    /// `"int"`, `"string"`, ...
    Primitive(String),
    /// `["null", "string"]`
    Union(Vec<FieldType>),
    /// Nested declaration such as `{"type": "array", "items": "int"}`
    Complex(Value),
}

impl FieldType {
    fn is_nullable(&self) -> bool {
        match self {
            FieldType::Primitive(name) => name == "null",
            FieldType::Union(members) => members.iter().any(FieldType::is_nullable),
            FieldType::Complex(_) => false,
        }
    }

    fn accepts(&self, value: &Value) -> bool {
        match self {
            FieldType::Primitive(name) => match name.as_str() {
                "null" => value.is_null(),
                "boolean" => value.is_boolean(),
                "int" | "long" => value.is_i64() || value.is_u64(),
                "float" | "double" => value.is_number(),
                "string" | "bytes" => value.is_string(),
                // Named types declared elsewhere
                _ => true,
            },
            FieldType::Union(members) => members.iter().any(|m| m.accepts(value)),
            FieldType::Complex(decl) => match decl.get("type").and_then(Value::as_str) {
                Some("array") => value.is_array(),
                Some("map") | Some("record") => value.is_object(),
                Some("enum") => value.as_str().is_some_and(|symbol| {
                    decl.get("symbols")
                        .and_then(Value::as_array)
                        .is_some_and(|symbols| symbols.iter().any(|s| s == symbol))
                }),
                _ => true,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub name: String,

    #[serde(rename = "type")]
    pub field_type: FieldType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

/// Record declaration in Avro JSON notation
///
/// Only the shape is checked: required fields present, primitive types
/// matching. Encoding stays JSON.
///
/// # Example
///
/// ```
/// use topic_relay::schema::RecordSchema;
/// use serde_json::json;
///
/// let schema = RecordSchema::parse(r#"{
///     "type": "record",
///     "name": "arrival.key",
///     "fields": [{"name": "timestamp", "type": "long"}]
/// }"#).unwrap();
///
/// assert!(schema.validate(&json!({ "timestamp": 1700000000000i64 })).is_ok());
/// assert!(schema.validate(&json!({ "timestamp": "now" })).is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordSchema {
    #[serde(rename = "type")]
    pub kind: String,

    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    pub fields: Vec<FieldSchema>,
}

impl RecordSchema {
    /// Parse a record declaration
    pub fn parse(schema: &str) -> Result<Self> {
        let parsed: RecordSchema = serde_json::from_str(schema)
            .map_err(|e| Error::ValidationError(format!("Invalid record schema: {}", e)))?;

        if parsed.kind != "record" {
            return Err(Error::ValidationError(format!(
                "Schema '{}' is a '{}', expected a record",
                parsed.name, parsed.kind
            )));
        }
        Ok(parsed)
    }

    /// Fully qualified name
    pub fn full_name(&self) -> String {
        match &self.namespace {
            Some(ns) if !ns.is_empty() => format!("{}.{}", ns, self.name),
            _ => self.name.clone(),
        }
    }

    /// Check a JSON value against the declared fields
    pub fn validate(&self, value: &Value) -> std::result::Result<(), String> {
        let object = value
            .as_object()
            .ok_or_else(|| format!("{} expects an object", self.full_name()))?;

        for field in &self.fields {
            match object.get(&field.name) {
                None | Some(Value::Null) => {
                    if !field.field_type.is_nullable() && field.default.is_none() {
                        return Err(format!("missing field '{}'", field.name));
                    }
                }
                Some(v) => {
                    if !field.field_type.accepts(v) {
                        return Err(format!(
                            "field '{}' has the wrong type: {}",
                            field.name, v
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}
