//! Value schemas - the type contract for operation parameters and results
//!
//! A schema is a closed union over five kinds. The serialized form pairs a
//! `type` tag with the matching `spec` payload:
//!
//! ```json
//! {"type": "object", "spec": {"nullable": false, "properties": {
//!     "name": {"type": "string", "spec": {"nullable": false}}
//! }}}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// The kind of value a schema describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Type {
    String,
    Number,
    Boolean,
    Object,
    Array,
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Type::String => "string",
            Type::Number => "number",
            Type::Boolean => "boolean",
            Type::Object => "object",
            Type::Array => "array",
        };
        f.write_str(name)
    }
}

/// Outcome of validating a value against a schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            message: None,
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
        }
    }

    /// `Err` carries the failure message
    pub fn into_result(self) -> Result<(), String> {
        if self.success {
            Ok(())
        } else {
            Err(self.message.unwrap_or_default())
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StringSpec {
    #[serde(default)]
    pub nullable: bool,
}

impl StringSpec {
    pub fn validate(&self, value: &Value) -> ValidationResult {
        match value {
            Value::String(_) => ValidationResult::ok(),
            Value::Null if self.nullable => ValidationResult::ok(),
            _ => ValidationResult::fail("value is not a string"),
        }
    }
}

/// Accepts integers and floats alike
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumberSpec {
    #[serde(default)]
    pub nullable: bool,
}

impl NumberSpec {
    pub fn validate(&self, value: &Value) -> ValidationResult {
        match value {
            Value::Number(_) => ValidationResult::ok(),
            Value::Null if self.nullable => ValidationResult::ok(),
            _ => ValidationResult::fail("value is not a float64 or int64"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BooleanSpec {
    #[serde(default)]
    pub nullable: bool,
}

impl BooleanSpec {
    pub fn validate(&self, value: &Value) -> ValidationResult {
        match value {
            Value::Bool(_) => ValidationResult::ok(),
            Value::Null if self.nullable => ValidationResult::ok(),
            _ => ValidationResult::fail("value is not a bool"),
        }
    }
}

/// Every declared property is required. Undeclared keys are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectSpec {
    #[serde(default)]
    pub nullable: bool,
    #[serde(default)]
    pub properties: BTreeMap<String, ValueSchema>,
}

impl ObjectSpec {
    pub fn validate(&self, value: &Value) -> ValidationResult {
        let object = match value {
            Value::Null if self.nullable => return ValidationResult::ok(),
            Value::Object(object) => object,
            _ => return ValidationResult::fail("value is not an object"),
        };

        for (name, schema) in &self.properties {
            let Some(property) = object.get(name) else {
                return ValidationResult::fail(format!("missing property {name}"));
            };
            if let Err(message) = schema.validate(property).into_result() {
                return ValidationResult::fail(format!("invalid property {name}: {message}"));
            }
        }
        ValidationResult::ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArraySpec {
    #[serde(default)]
    pub nullable: bool,
    pub items: Box<ValueSchema>,
}

impl ArraySpec {
    pub fn validate(&self, value: &Value) -> ValidationResult {
        let items = match value {
            Value::Null if self.nullable => return ValidationResult::ok(),
            Value::Array(items) => items,
            _ => return ValidationResult::fail("value is not an array"),
        };

        for (index, item) in items.iter().enumerate() {
            if let Err(message) = self.items.validate(item).into_result() {
                return ValidationResult::fail(format!("invalid item {index}: {message}"));
            }
        }
        ValidationResult::ok()
    }
}

/// A schema: the kind tag and its spec, which always agree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "spec", rename_all = "lowercase")]
pub enum ValueSchema {
    String(StringSpec),
    Number(NumberSpec),
    Boolean(BooleanSpec),
    Object(ObjectSpec),
    Array(ArraySpec),
}

impl ValueSchema {
    pub fn string() -> Self {
        ValueSchema::String(StringSpec::default())
    }

    pub fn number() -> Self {
        ValueSchema::Number(NumberSpec::default())
    }

    pub fn boolean() -> Self {
        ValueSchema::Boolean(BooleanSpec::default())
    }

    pub fn object<I, K>(properties: I) -> Self
    where
        I: IntoIterator<Item = (K, ValueSchema)>,
        K: Into<String>,
    {
        ValueSchema::Object(ObjectSpec {
            nullable: false,
            properties: properties
                .into_iter()
                .map(|(name, schema)| (name.into(), schema))
                .collect(),
        })
    }

    pub fn array(items: ValueSchema) -> Self {
        ValueSchema::Array(ArraySpec {
            nullable: false,
            items: Box::new(items),
        })
    }

    /// Same schema, accepting `null`
    pub fn nullable(mut self) -> Self {
        match &mut self {
            ValueSchema::String(spec) => spec.nullable = true,
            ValueSchema::Number(spec) => spec.nullable = true,
            ValueSchema::Boolean(spec) => spec.nullable = true,
            ValueSchema::Object(spec) => spec.nullable = true,
            ValueSchema::Array(spec) => spec.nullable = true,
        }
        self
    }

    pub fn kind(&self) -> Type {
        match self {
            ValueSchema::String(_) => Type::String,
            ValueSchema::Number(_) => Type::Number,
            ValueSchema::Boolean(_) => Type::Boolean,
            ValueSchema::Object(_) => Type::Object,
            ValueSchema::Array(_) => Type::Array,
        }
    }

    pub fn is_nullable(&self) -> bool {
        match self {
            ValueSchema::String(spec) => spec.nullable,
            ValueSchema::Number(spec) => spec.nullable,
            ValueSchema::Boolean(spec) => spec.nullable,
            ValueSchema::Object(spec) => spec.nullable,
            ValueSchema::Array(spec) => spec.nullable,
        }
    }

    pub fn validate(&self, value: &Value) -> ValidationResult {
        match self {
            ValueSchema::String(spec) => spec.validate(value),
            ValueSchema::Number(spec) => spec.validate(value),
            ValueSchema::Boolean(spec) => spec.validate(value),
            ValueSchema::Object(spec) => spec.validate(value),
            ValueSchema::Array(spec) => spec.validate(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message(schema: &ValueSchema, value: Value) -> String {
        schema.validate(&value).into_result().unwrap_err()
    }

    #[test]
    fn test_primitives() {
        assert!(ValueSchema::string().validate(&json!("prigas")).success);
        assert_eq!(message(&ValueSchema::string(), json!(1)), "value is not a string");
        assert_eq!(message(&ValueSchema::string(), Value::Null), "value is not a string");

        assert!(ValueSchema::number().validate(&json!(1)).success);
        assert!(ValueSchema::number().validate(&json!(-12.5)).success);
        assert_eq!(message(&ValueSchema::number(), json!("1")), "value is not a float64 or int64");

        assert!(ValueSchema::boolean().validate(&json!(false)).success);
        assert_eq!(message(&ValueSchema::boolean(), json!(0)), "value is not a bool");
    }

    #[test]
    fn test_nullable_accepts_null() {
        for schema in [
            ValueSchema::string(),
            ValueSchema::number(),
            ValueSchema::boolean(),
            ValueSchema::object([("a", ValueSchema::string())]),
            ValueSchema::array(ValueSchema::number()),
        ] {
            assert!(!schema.validate(&Value::Null).success, "{} rejects null", schema.kind());
            let schema = schema.nullable();
            assert!(schema.is_nullable());
            assert!(schema.validate(&Value::Null).success, "{} accepts null", schema.kind());
        }
    }

    #[test]
    fn test_object_properties() {
        let schema = ValueSchema::object([
            ("name", ValueSchema::string()),
            ("prigas", ValueSchema::boolean()),
        ]);

        assert!(schema
            .validate(&json!({"name": "prigas", "prigas": true, "extra": 1}))
            .success);
        assert_eq!(message(&schema, json!([1])), "value is not an object");
        assert_eq!(message(&schema, json!({"name": "prigas"})), "missing property prigas");
        assert_eq!(
            message(&schema, json!({"name": "prigas", "prigas": "yes"})),
            "invalid property prigas: value is not a bool"
        );
    }

    #[test]
    fn test_nullable_property_is_still_required() {
        let schema = ValueSchema::object([("note", ValueSchema::string().nullable())]);

        assert!(schema.validate(&json!({"note": null})).success);
        assert_eq!(message(&schema, json!({})), "missing property note");
    }

    #[test]
    fn test_object_reports_first_property_in_name_order() {
        let schema = ValueSchema::object([("b", ValueSchema::string()), ("a", ValueSchema::string())]);
        assert_eq!(message(&schema, json!({})), "missing property a");
    }

    #[test]
    fn test_array_items() {
        let schema = ValueSchema::array(ValueSchema::string());

        assert!(schema.validate(&json!([])).success);
        assert!(schema.validate(&json!(["🐷", "a"])).success);
        assert_eq!(message(&schema, json!("a")), "value is not an array");
        assert_eq!(
            message(&schema, json!(["a", 1, 2])),
            "invalid item 1: value is not a string"
        );
    }

    #[test]
    fn test_nested_messages() {
        let schema = ValueSchema::object([(
            "users",
            ValueSchema::array(ValueSchema::object([("id", ValueSchema::number())])),
        )]);

        assert_eq!(
            message(&schema, json!({"users": [{"id": 1}, {"id": "2"}]})),
            "invalid property users: invalid item 1: invalid property id: value is not a float64 or int64"
        );
    }

    #[test]
    fn test_serialized_form() {
        let schema = ValueSchema::object([("tags", ValueSchema::array(ValueSchema::string()).nullable())]);

        let encoded = serde_json::to_value(&schema).unwrap();
        assert_eq!(
            encoded,
            json!({
                "type": "object",
                "spec": {
                    "nullable": false,
                    "properties": {
                        "tags": {
                            "type": "array",
                            "spec": {
                                "nullable": true,
                                "items": {"type": "string", "spec": {"nullable": false}}
                            }
                        }
                    }
                }
            })
        );

        let decoded: ValueSchema = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, schema);
    }

    #[test]
    fn test_decode_defaults() {
        let decoded: ValueSchema = serde_json::from_value(json!({"type": "object", "spec": {}})).unwrap();
        assert_eq!(decoded, ValueSchema::object(Vec::<(String, ValueSchema)>::new()));
    }

    #[test]
    fn test_decode_rejects_unknown_tag() {
        let err = serde_json::from_value::<ValueSchema>(json!({"type": "date", "spec": {}})).unwrap_err();
        assert!(err.to_string().contains("date"));
    }

    #[test]
    fn test_decode_rejects_mismatched_spec() {
        let result = serde_json::from_value::<ValueSchema>(json!({"type": "array", "spec": {"nullable": true}}));
        assert!(result.is_err());
    }

    #[test]
    fn test_into_result() {
        assert_eq!(ValidationResult::ok().into_result(), Ok(()));
        assert_eq!(ValidationResult::fail("nope").into_result(), Err("nope".to_string()));
    }
}
