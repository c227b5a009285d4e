//! Hand-rolled structural JSON Schema validation.
//!
//! Ported from a prior `tools/schema.rs` that never pulled in a
//! schema-validation crate, validating only the subset its own tools
//! declared. REPLOID keeps the same minimal-dependency posture, supporting
//! `type`, `required`, `properties`, and `enum`.

use serde_json::Value;

use super::definition::ToolDefinition;
use crate::error::ToolError;

/// Validate `schema` itself is a well-formed object schema before it is
/// accepted into the registry.
pub fn validate_schema_shape(tool_id: &str, schema: &Value) -> Result<(), ToolError> {
    let obj = schema
        .as_object()
        .ok_or_else(|| ToolError::MalformedSchema(tool_id.to_string(), "schema must be an object".into()))?;
    if obj.get("type").and_then(Value::as_str) != Some("object") {
        return Err(ToolError::MalformedSchema(
            tool_id.to_string(),
            "top-level schema type must be \"object\"".into(),
        ));
    }
    if let Some(props) = obj.get("properties") {
        if !props.is_object() {
            return Err(ToolError::MalformedSchema(tool_id.to_string(), "properties must be an object".into()));
        }
    }
    Ok(())
}

/// Validate `instance` against `schema`'s `type`/`required`/`properties`/
/// `enum` constraints, reporting the first violation found.
pub fn validate(schema: &Value, instance: &Value) -> Result<(), ToolError> {
    validate_at("$", schema, instance)
}

fn validate_at(path: &str, schema: &Value, instance: &Value) -> Result<(), ToolError> {
    let Some(obj) = schema.as_object() else {
        return Ok(());
    };

    if let Some(expected) = obj.get("type").and_then(Value::as_str) {
        if !type_matches(expected, instance) {
            return Err(ToolError::SchemaViolation {
                path: path.to_string(),
                reason: format!("expected type `{expected}`, got `{}`", type_name(instance)),
            });
        }
    }

    if let Some(allowed) = obj.get("enum").and_then(Value::as_array) {
        if !allowed.contains(instance) {
            return Err(ToolError::SchemaViolation {
                path: path.to_string(),
                reason: "value is not one of the allowed enum values".into(),
            });
        }
    }

    if let Some(required) = obj.get("required").and_then(Value::as_array) {
        let instance_obj = instance.as_object();
        for key in required {
            let Some(key) = key.as_str() else { continue };
            let present = instance_obj.map(|o| o.contains_key(key)).unwrap_or(false);
            if !present {
                return Err(ToolError::SchemaViolation {
                    path: format!("{path}.{key}"),
                    reason: "missing required property".into(),
                });
            }
        }
    }

    if let Some(props) = obj.get("properties").and_then(Value::as_object) {
        if let Some(instance_obj) = instance.as_object() {
            for (key, sub_schema) in props {
                if let Some(sub_instance) = instance_obj.get(key) {
                    validate_at(&format!("{path}.{key}"), sub_schema, sub_instance)?;
                }
            }
        }
    }

    Ok(())
}

fn type_matches(expected: &str, instance: &Value) -> bool {
    match expected {
        "object" => instance.is_object(),
        "array" => instance.is_array(),
        "string" => instance.is_string(),
        "number" => instance.is_number(),
        "integer" => instance.is_i64() || instance.is_u64(),
        "boolean" => instance.is_boolean(),
        "null" => instance.is_null(),
        _ => true,
    }
}

fn type_name(instance: &Value) -> &'static str {
    match instance {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Render the registered tool set as a prompt-ready catalog, one block per
/// tool, in the style `generate_tool_schema_text` renders its own catalog.
pub fn render_tool_catalog(defs: &[std::sync::Arc<ToolDefinition>]) -> String {
    let mut out = String::new();
    for def in defs {
        out.push_str(&format!("### {}\n{}\n", def.id, def.description));
        out.push_str("Input schema:\n");
        out.push_str(&serde_json::to_string_pretty(&def.input_schema).unwrap_or_default());
        out.push_str("\n\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_matching_instance() {
        let schema = json!({
            "type": "object",
            "required": ["a", "b"],
            "properties": { "a": {"type": "number"}, "b": {"type": "number"} }
        });
        assert!(validate(&schema, &json!({"a": 2, "b": 3})).is_ok());
    }

    #[test]
    fn rejects_missing_required_property() {
        let schema = json!({"type": "object", "required": ["a"], "properties": {"a": {"type": "number"}}});
        let err = validate(&schema, &json!({}));
        assert!(matches!(err, Err(ToolError::SchemaViolation { .. })));
    }

    #[test]
    fn rejects_wrong_nested_type() {
        let schema = json!({"type": "object", "properties": {"a": {"type": "string"}}});
        let err = validate(&schema, &json!({"a": 5}));
        assert!(matches!(err, Err(ToolError::SchemaViolation { .. })));
    }

    #[test]
    fn enforces_enum_membership() {
        let schema = json!({"type": "object", "properties": {"mode": {"enum": ["fast", "slow"]}}});
        assert!(validate(&schema, &json!({"mode": "fast"})).is_ok());
        assert!(validate(&schema, &json!({"mode": "medium"})).is_err());
    }
}
