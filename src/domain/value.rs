//! Conversion of TOML input into settings values.

use serde_json::{Map, Number, Value};

use crate::domain::SerializationError;

/// Convert a TOML value into a settings value. `path` names the value in
/// error messages.
pub fn from_toml(value: &toml::Value, path: &str) -> Result<Value, SerializationError> {
    Ok(match value {
        toml::Value::String(s) => Value::String(s.clone()),
        toml::Value::Integer(i) => Value::Number(Number::from(*i)),
        toml::Value::Float(f) => Number::from_f64(*f)
            .map(Value::Number)
            .ok_or_else(|| unsupported(path, "non-finite float"))?,
        toml::Value::Boolean(b) => Value::Bool(*b),
        toml::Value::Datetime(_) => return Err(unsupported(path, "datetime")),
        toml::Value::Array(items) => Value::Array(
            items
                .iter()
                .enumerate()
                .map(|(i, item)| from_toml(item, &format!("{path}[{i}]")))
                .collect::<Result<_, _>>()?,
        ),
        toml::Value::Table(table) => Value::Object(table_to_map(table, path)?),
    })
}

/// Convert a TOML table into a settings mapping.
pub fn from_toml_table(table: &toml::Table, path: &str) -> Result<Value, SerializationError> {
    table_to_map(table, path).map(Value::Object)
}

fn table_to_map(table: &toml::Table, path: &str) -> Result<Map<String, Value>, SerializationError> {
    table
        .iter()
        .map(|(key, value)| {
            let child = if path.is_empty() {
                key.clone()
            } else {
                format!("{path}.{key}")
            };
            from_toml(value, &child).map(|v| (key.clone(), v))
        })
        .collect()
}

fn unsupported(path: &str, kind: &'static str) -> SerializationError {
    SerializationError::Unsupported {
        path: path.to_string(),
        kind,
    }
}
