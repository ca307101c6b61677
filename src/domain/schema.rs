//! Typed option schema.
//!
//! An [`OptionNode`] tree declares every recognized settings key together
//! with its kind, default and requiredness. Values are plain
//! [`serde_json::Value`] trees; the schema checks them, it does not own them.

use regex::Regex;
use serde_json::{Map, Value};

use crate::domain::{SchemaError, ShareDir};

/// Declared kind of an option.
#[derive(Debug, Clone)]
pub enum OptionKind {
    String,
    Integer,
    Port,
    /// Absolute filesystem path
    Path,
    /// Absolute URL path such as `/slskd`
    UrlPath,
    Boolean,
    Enum(&'static [&'static str]),
    /// Regular expression source
    Regex,
    /// `shares.directories` entry
    ShareDir,
    List(Box<OptionKind>),
    Mapping(Vec<OptionNode>),
}

impl OptionKind {
    /// Human-readable kind, as used in error messages.
    pub fn describe(&self) -> String {
        match self {
            OptionKind::String => "a string".to_string(),
            OptionKind::Integer => "an integer".to_string(),
            OptionKind::Port => "a port number (1-65535)".to_string(),
            OptionKind::Path => "an absolute path".to_string(),
            OptionKind::UrlPath => "a URL path starting with '/'".to_string(),
            OptionKind::Boolean => "a boolean".to_string(),
            OptionKind::Enum(variants) => format!("one of [{}]", variants.join(", ")),
            OptionKind::Regex => "a regular expression".to_string(),
            OptionKind::ShareDir => "a shared directory entry".to_string(),
            OptionKind::List(inner) => format!("a list of {}", inner.describe()),
            OptionKind::Mapping(_) => "a mapping".to_string(),
        }
    }
}

/// One declared option, leaf or namespace.
#[derive(Debug, Clone)]
pub struct OptionNode {
    pub name: &'static str,
    pub kind: OptionKind,
    pub default: Value,
    pub required: bool,
    pub description: &'static str,
}

impl OptionNode {
    /// Leaf option with a default value.
    pub fn leaf(name: &'static str, kind: OptionKind, default: Value, description: &'static str) -> Self {
        Self {
            name,
            kind,
            default,
            required: false,
            description,
        }
    }

    /// Leaf option that is unset unless the user provides it.
    pub fn optional(name: &'static str, kind: OptionKind, description: &'static str) -> Self {
        Self::leaf(name, kind, Value::Null, description)
    }

    /// Leaf option the user must provide.
    pub fn required(name: &'static str, kind: OptionKind, description: &'static str) -> Self {
        Self {
            required: true,
            ..Self::optional(name, kind, description)
        }
    }

    /// Nested namespace.
    pub fn group(name: &'static str, description: &'static str, children: Vec<OptionNode>) -> Self {
        Self::leaf(name, OptionKind::Mapping(children), Value::Null, description)
    }

    fn default_value(&self) -> Value {
        match &self.kind {
            OptionKind::Mapping(children) => Value::Object(defaults_of(children)),
            _ => self.default.clone(),
        }
    }
}

/// The root of an option tree.
#[derive(Debug, Clone)]
pub struct Schema {
    roots: Vec<OptionNode>,
    secret_path: &'static str,
}

impl Schema {
    /// Build a schema. `secret_path` names the dotted key reserved for the
    /// secret injector.
    pub fn new(roots: Vec<OptionNode>, secret_path: &'static str) -> Self {
        Self { roots, secret_path }
    }

    pub fn secret_path(&self) -> &'static str {
        self.secret_path
    }

    /// Tree of all defaults, nulls included.
    pub fn defaults(&self) -> Value {
        Value::Object(defaults_of(&self.roots))
    }

    /// Look up the declaration for a dotted path.
    pub fn find(&self, path: &str) -> Option<&OptionNode> {
        let mut nodes = &self.roots;
        let mut found = None;
        for segment in path.split('.') {
            let node = nodes.iter().find(|n| n.name == segment)?;
            found = Some(node);
            nodes = match &node.kind {
                OptionKind::Mapping(children) => children,
                _ => &EMPTY,
            };
        }
        found
    }

    /// Every leaf option below `prefix` (all of them for `""`), with its
    /// dotted path, in declaration order.
    pub fn leaves(&self, prefix: &str) -> Vec<(String, &OptionNode)> {
        let mut out = Vec::new();
        collect_leaves(&self.roots, "", &mut out);
        out.retain(|(path, _)| prefix.is_empty() || covers(prefix, path));
        out
    }

    /// Check user overrides: every key declared, every non-null value typed.
    pub fn check_overrides(&self, overrides: &Value) -> Result<(), SchemaError> {
        let map = match overrides {
            Value::Object(map) => map,
            Value::Null => return Ok(()),
            other => return Err(mismatch("settings", "a mapping", other)),
        };
        self.reject_secret(map)?;
        check_mapping(&self.roots, map, "", true)
    }

    /// Check freeform overlay keys: they are untyped, but must not set the
    /// secret sub-path or anything beneath it.
    pub fn check_overlay<'a>(&self, keys: impl IntoIterator<Item = &'a String>) -> Result<(), SchemaError> {
        for key in keys {
            if key.is_empty() || key.split('.').any(str::is_empty) {
                return Err(SchemaError::InvalidValue {
                    path: key.clone(),
                    reason: "overlay keys must be non-empty dotted paths".to_string(),
                });
            }
            if covers(key, self.secret_path) {
                return Err(SchemaError::SecretInSettings { path: key.clone() });
            }
        }
        Ok(())
    }

    /// Check a merged tree: typed keys satisfy their kinds and every
    /// required option is present. Undeclared keys come from the overlay and
    /// are not checked.
    pub fn check_merged(&self, merged: &Value) -> Result<(), SchemaError> {
        let empty = Map::new();
        let map = match merged {
            Value::Object(map) => map,
            Value::Null => &empty,
            other => return Err(mismatch("settings", "a mapping", other)),
        };
        self.reject_secret(map)?;
        check_mapping(&self.roots, map, "", false)?;
        check_required(&self.roots, Some(map), "")
    }

    fn reject_secret(&self, map: &Map<String, Value>) -> Result<(), SchemaError> {
        let mut current = map;
        let mut segments = self.secret_path.split('.').peekable();
        while let Some(segment) = segments.next() {
            match current.get(segment) {
                None | Some(Value::Null) => return Ok(()),
                Some(Value::Object(next)) if segments.peek().is_some() => current = next,
                Some(_) if segments.peek().is_none() => {
                    return Err(SchemaError::SecretInSettings {
                        path: self.secret_path.to_string(),
                    })
                }
                Some(_) => return Ok(()),
            }
        }
        Ok(())
    }
}

static EMPTY: Vec<OptionNode> = Vec::new();

fn defaults_of(nodes: &[OptionNode]) -> Map<String, Value> {
    nodes
        .iter()
        .map(|node| (node.name.to_string(), node.default_value()))
        .collect()
}

fn collect_leaves<'a>(nodes: &'a [OptionNode], prefix: &str, out: &mut Vec<(String, &'a OptionNode)>) {
    for node in nodes {
        let path = join(prefix, node.name);
        match &node.kind {
            OptionKind::Mapping(children) => collect_leaves(children, &path, out),
            _ => out.push((path, node)),
        }
    }
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

/// Whether setting `key` would write at or above `target`.
fn covers(key: &str, target: &str) -> bool {
    key == target || target.starts_with(&format!("{key}."))
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(n) if n.is_f64() => "a float",
        Value::Number(_) => "an integer",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a mapping",
    }
}

fn mismatch(path: &str, expected: impl Into<String>, found: &Value) -> SchemaError {
    SchemaError::TypeMismatch {
        path: path.to_string(),
        expected: expected.into(),
        found: type_name(found),
    }
}

fn invalid(path: &str, reason: impl Into<String>) -> SchemaError {
    SchemaError::InvalidValue {
        path: path.to_string(),
        reason: reason.into(),
    }
}

fn check_mapping(
    nodes: &[OptionNode],
    map: &Map<String, Value>,
    prefix: &str,
    strict: bool,
) -> Result<(), SchemaError> {
    for (key, value) in map {
        let path = join(prefix, key);
        match nodes.iter().find(|n| n.name == key) {
            Some(node) => check_value(&node.kind, value, &path, strict)?,
            None if strict => return Err(SchemaError::UnknownOption { path }),
            None => {}
        }
    }
    Ok(())
}

fn check_value(kind: &OptionKind, value: &Value, path: &str, strict: bool) -> Result<(), SchemaError> {
    if value.is_null() {
        return Ok(());
    }
    match (kind, value) {
        (OptionKind::String, Value::String(_)) => Ok(()),
        (OptionKind::Integer, Value::Number(n)) if n.is_i64() || n.is_u64() => Ok(()),
        (OptionKind::Port, Value::Number(n)) if n.is_i64() || n.is_u64() => match n.as_u64() {
            Some(port) if (1..=u64::from(u16::MAX)).contains(&port) => Ok(()),
            _ => Err(invalid(path, format!("{n} is not a valid port"))),
        },
        (OptionKind::Path, Value::String(s)) => {
            if s.starts_with('/') && !s.contains('\0') {
                Ok(())
            } else {
                Err(invalid(path, format!("'{s}' is not an absolute path")))
            }
        }
        (OptionKind::UrlPath, Value::String(s)) => {
            if !s.starts_with('/') {
                Err(invalid(path, format!("'{s}' must start with '/'")))
            } else if s.chars().any(|c| c.is_whitespace() || c.is_control() || ";{}\"'".contains(c)) {
                Err(invalid(path, format!("'{s}' is not a valid URL path")))
            } else {
                Ok(())
            }
        }
        (OptionKind::Boolean, Value::Bool(_)) => Ok(()),
        (OptionKind::Enum(variants), Value::String(s)) => {
            if variants.contains(&s.as_str()) {
                Ok(())
            } else {
                Err(invalid(
                    path,
                    format!("'{s}' is not one of [{}]", variants.join(", ")),
                ))
            }
        }
        (OptionKind::Regex, Value::String(s)) => Regex::new(s)
            .map(|_| ())
            .map_err(|e| invalid(path, format!("invalid regex pattern '{s}': {e}"))),
        (OptionKind::ShareDir, Value::String(s)) => s
            .parse::<ShareDir>()
            .map(|_| ())
            .map_err(|e| invalid(path, e.to_string())),
        (OptionKind::List(inner), Value::Array(items)) => {
            for (i, item) in items.iter().enumerate() {
                check_value(inner, item, &format!("{path}[{i}]"), strict)?;
            }
            Ok(())
        }
        (OptionKind::Mapping(children), Value::Object(map)) => check_mapping(children, map, path, strict),
        (kind, other) => Err(mismatch(path, kind.describe(), other)),
    }
}

fn check_required(
    nodes: &[OptionNode],
    map: Option<&Map<String, Value>>,
    prefix: &str,
) -> Result<(), SchemaError> {
    for node in nodes {
        let path = join(prefix, node.name);
        let value = map.and_then(|m| m.get(node.name)).filter(|v| !v.is_null());
        match &node.kind {
            OptionKind::Mapping(children) => {
                check_required(children, value.and_then(Value::as_object), &path)?;
            }
            _ if node.required && value.is_none() => {
                return Err(SchemaError::MissingRequired { path });
            }
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> Schema {
        Schema::new(
            vec![
                OptionNode::leaf("enabled", OptionKind::Boolean, json!(false), "toggle"),
                OptionNode::group(
                    "net",
                    "network",
                    vec![
                        OptionNode::leaf("port", OptionKind::Port, json!(8080), "port"),
                        OptionNode::required("user", OptionKind::String, "user"),
                        OptionNode::optional("secret", OptionKind::String, "secret"),
                        OptionNode::optional("mode", OptionKind::Enum(&["a", "b"]), "mode"),
                    ],
                ),
                OptionNode::leaf(
                    "dirs",
                    OptionKind::List(Box::new(OptionKind::ShareDir)),
                    json!([]),
                    "dirs",
                ),
                OptionNode::leaf(
                    "filters",
                    OptionKind::List(Box::new(OptionKind::Regex)),
                    json!([]),
                    "filters",
                ),
            ],
            "net.secret",
        )
    }

    #[test]
    fn test_defaults_tree() {
        assert_eq!(
            schema().defaults(),
            json!({
                "enabled": false,
                "net": {"port": 8080, "user": null, "secret": null, "mode": null},
                "dirs": [],
                "filters": [],
            })
        );
    }

    #[test]
    fn test_find_nested() {
        let schema = schema();
        assert!(matches!(schema.find("net.port").unwrap().kind, OptionKind::Port));
        assert!(schema.find("net.port.x").is_none());
        assert!(schema.find("nope").is_none());
    }

    #[test]
    fn test_url_path_kind() {
        let schema = Schema::new(
            vec![OptionNode::leaf("base", OptionKind::UrlPath, json!("/"), "base")],
            "secret",
        );
        assert!(schema.check_overrides(&json!({"base": "/slskd"})).is_ok());
        assert!(matches!(
            schema.check_overrides(&json!({"base": "slskd"})),
            Err(SchemaError::InvalidValue { .. })
        ));
        assert!(matches!(
            schema.check_overrides(&json!({"base": "/a; return 403"})),
            Err(SchemaError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_leaves_by_prefix() {
        let schema = schema();
        let all: Vec<String> = schema.leaves("").into_iter().map(|(p, _)| p).collect();
        assert_eq!(
            all,
            vec!["enabled", "net.port", "net.user", "net.secret", "net.mode", "dirs", "filters"]
        );

        let net: Vec<String> = schema.leaves("net").into_iter().map(|(p, _)| p).collect();
        assert_eq!(net, vec!["net.port", "net.user", "net.secret", "net.mode"]);
        assert_eq!(schema.leaves("net.port").len(), 1);
        assert!(schema.leaves("ne").is_empty());
    }

    #[test]
    fn test_overrides_accept_typed_values() {
        let overrides = json!({"enabled": true, "net": {"port": 9000, "mode": "b"}, "dirs": ["/srv/a"]});
        assert!(schema().check_overrides(&overrides).is_ok());
    }

    #[test]
    fn test_overrides_reject_unknown_key() {
        let err = schema().check_overrides(&json!({"net": {"bogus": 1}})).unwrap_err();
        assert_eq!(err, SchemaError::UnknownOption { path: "net.bogus".to_string() });
    }

    #[test]
    fn test_overrides_reject_type_mismatch() {
        let err = schema().check_overrides(&json!({"enabled": "yes"})).unwrap_err();
        assert!(matches!(err, SchemaError::TypeMismatch { ref path, .. } if path == "enabled"));

        let err = schema().check_overrides(&json!({"net": {"port": 70000}})).unwrap_err();
        assert!(matches!(err, SchemaError::InvalidValue { ref path, .. } if path == "net.port"));

        let err = schema().check_overrides(&json!({"net": {"mode": "c"}})).unwrap_err();
        assert!(matches!(err, SchemaError::InvalidValue { .. }));

        let err = schema().check_overrides(&json!({"dirs": ["relative"]})).unwrap_err();
        assert!(matches!(err, SchemaError::InvalidValue { ref path, .. } if path == "dirs[0]"));

        let err = schema().check_overrides(&json!({"filters": ["("]})).unwrap_err();
        assert!(matches!(err, SchemaError::InvalidValue { .. }));
    }

    #[test]
    fn test_overrides_reject_secret() {
        let err = schema().check_overrides(&json!({"net": {"secret": "x"}})).unwrap_err();
        assert_eq!(err, SchemaError::SecretInSettings { path: "net.secret".to_string() });
    }

    #[test]
    fn test_overlay_keys() {
        let schema = schema();
        let ok = vec!["logger.disk".to_string(), "net.other".to_string()];
        assert!(schema.check_overlay(&ok).is_ok());

        for key in ["net.secret", "net", "", "a..b"] {
            assert!(schema.check_overlay(&[key.to_string()]).is_err(), "{key}");
        }
    }

    #[test]
    fn test_merged_requires_required_options() {
        let err = schema().check_merged(&json!({"net": {"port": 1}})).unwrap_err();
        assert_eq!(err, SchemaError::MissingRequired { path: "net.user".to_string() });

        let merged = json!({"net": {"port": 1, "user": "alice"}, "extra": {"anything": [1, 2]}});
        assert!(schema().check_merged(&merged).is_ok());
    }
}
