// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Parameter allow-list validation.
//!
//! Callers send a free-form parameter object. One reserved key
//! (`rawValues`) may hold a base64-encoded YAML document that is expanded
//! before validation. Everything is reduced to dot-path keys, which are
//! then matched against the plan's allow-list on path-segment boundaries:
//! entry `net` permits `net` and `net.port`, never `network`.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;

use crate::error::{Error, Result};

/// Reserved parameter key carrying base64-encoded YAML values.
pub const RAW_VALUES_KEY: &str = "rawValues";

/// Caller-supplied parameters.
pub type ParameterSet = Map<String, Value>;

/// Characters helm's `--set` parser reads as syntax inside a key.
pub const SET_KEY_SYNTAX: [char; 5] = ['=', ',', '[', ']', '\\'];

/// Whether `key` can be passed to `--set` without helm reinterpreting it.
pub fn is_settable_key(key: &str) -> bool {
    !key.is_empty() && !key.contains(&SET_KEY_SYNTAX[..])
}

/// One allow-list entry: a dot-path prefix a plan lets callers set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowParameter {
    /// Dot-path prefix, e.g. `persistence.size`.
    pub name: String,
    /// Whether callers must set this path (or something below it).
    #[serde(default)]
    pub required: bool,
    /// Human-readable hint for catalog consumers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl AllowParameter {
    /// Optional entry.
    pub fn optional(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: false,
            description: None,
        }
    }

    /// Required entry.
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: true,
            description: None,
        }
    }

    /// Whether `key` is this entry or lies below it.
    pub fn covers(&self, key: &str) -> bool {
        key == self.name
            || (key.len() > self.name.len()
                && key.starts_with(self.name.as_str())
                && key.as_bytes()[self.name.len()] == b'.')
    }
}

/// Outcome of validating parameters against an allow-list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ParameterReport {
    /// Keys no allow-list entry covers.
    pub disallowed: BTreeSet<String>,
    /// Required entries no key covers.
    pub missing_required: BTreeSet<String>,
}

impl ParameterReport {
    /// True when nothing was rejected.
    pub fn is_valid(&self) -> bool {
        self.disallowed.is_empty() && self.missing_required.is_empty()
    }

    /// Disallowed keys as a comma-joined list.
    pub fn disallowed_keys(&self) -> String {
        join(&self.disallowed)
    }

    /// Missing required entries as a comma-joined list.
    pub fn missing_required_keys(&self) -> String {
        join(&self.missing_required)
    }

    /// Turn a rejecting report into `Error::InvalidParameters`.
    pub fn into_result(self) -> Result<()> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(Error::InvalidParameters(self))
        }
    }
}

impl fmt::Display for ParameterReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.disallowed.is_empty(), self.missing_required.is_empty()) {
            (true, true) => write!(f, "all parameters allowed"),
            (false, true) => write!(f, "parameters not allowed: {}", self.disallowed_keys()),
            (true, false) => write!(
                f,
                "required parameters missing: {}",
                self.missing_required_keys()
            ),
            (false, false) => write!(
                f,
                "parameters not allowed: {}; required parameters missing: {}",
                self.disallowed_keys(),
                self.missing_required_keys()
            ),
        }
    }
}

fn join(keys: &BTreeSet<String>) -> String {
    keys.iter().map(String::as_str).collect::<Vec<_>>().join(",")
}

/// Check `params` against `allow_list`.
///
/// An empty allow-list permits everything. Empty parameters are never
/// disallowed but still miss every required entry. A key carrying `--set`
/// syntax is disallowed even below an allowed prefix.
pub fn verify(allow_list: &[AllowParameter], params: &ParameterSet) -> Result<ParameterReport> {
    let mut report = ParameterReport::default();
    if allow_list.is_empty() {
        return Ok(report);
    }

    let keys = if params.is_empty() {
        BTreeSet::new()
    } else {
        collect_keys(params)?
    };

    report.disallowed = keys
        .iter()
        .filter(|key| {
            !is_settable_key(key) || !allow_list.iter().any(|entry| entry.covers(key))
        })
        .cloned()
        .collect();

    report.missing_required = allow_list
        .iter()
        .filter(|entry| entry.required && !keys.iter().any(|key| entry.covers(key)))
        .map(|entry| entry.name.clone())
        .collect();

    if !report.is_valid() {
        tracing::debug!(
            disallowed = %report.disallowed_keys(),
            missing_required = %report.missing_required_keys(),
            "Parameters rejected by allow-list"
        );
    }

    Ok(report)
}

/// Every dot-path key the parameters set, raw values expanded.
pub fn collect_keys(params: &ParameterSet) -> Result<BTreeSet<String>> {
    let mut keys = BTreeSet::new();
    for (key, value) in params {
        if key == RAW_VALUES_KEY {
            if let Some(text) = decode_raw_values(value)? {
                let document = parse_raw_values(&text)?;
                keys.extend(flatten_keys(&document));
            }
            continue;
        }
        flatten_value(key.clone(), value, &mut keys);
    }
    Ok(keys)
}

/// Flatten nested mappings into dot-path keys.
///
/// `{"a":{"b":1,"c":{"d":2}},"f":4}` becomes `a.b`, `a.c.d` and `f`.
/// An empty mapping is a key of its own. A non-mapping document has no keys.
pub fn flatten_keys(document: &Value) -> BTreeSet<String> {
    let mut keys = BTreeSet::new();
    if let Value::Object(map) = document {
        for (key, value) in map {
            flatten_value(key.clone(), value, &mut keys);
        }
    }
    keys
}

fn flatten_value(path: String, value: &Value, keys: &mut BTreeSet<String>) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (key, nested) in map {
                flatten_value(format!("{}.{}", path, key), nested, keys);
            }
        }
        _ => {
            keys.insert(path);
        }
    }
}

/// Decode the raw-values parameter. `None` when it is empty.
pub fn decode_raw_values(value: &Value) -> Result<Option<String>> {
    let encoded = match value {
        Value::Null => return Ok(None),
        Value::String(s) => s,
        other => {
            return Err(Error::RawValues(format!(
                "{} must be a base64 string, got {}",
                RAW_VALUES_KEY,
                type_name(other)
            )));
        }
    };

    let compact: String = encoded
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    if compact.is_empty() {
        return Ok(None);
    }

    let bytes = STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| Error::RawValues(format!("invalid base64: {}", e)))?;
    let text =
        String::from_utf8(bytes).map_err(|e| Error::RawValues(format!("invalid UTF-8: {}", e)))?;
    Ok(Some(text))
}

/// Parse decoded raw values as a YAML document.
///
/// An empty document parses to `null`; any other non-mapping document is
/// rejected.
pub fn parse_raw_values(text: &str) -> Result<Value> {
    let document: serde_yaml::Value = serde_yaml::from_str(text)
        .map_err(|e| Error::RawValues(format!("invalid YAML: {}", e)))?;
    let document = yaml_to_json(document);
    match document {
        Value::Object(_) | Value::Null => Ok(document),
        other => Err(Error::RawValues(format!(
            "document must be a mapping, got {}",
            type_name(&other)
        ))),
    }
}

fn yaml_to_json(value: serde_yaml::Value) -> Value {
    match value {
        serde_yaml::Value::Null => Value::Null,
        serde_yaml::Value::Bool(b) => Value::Bool(b),
        serde_yaml::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::from(i)
            } else if let Some(u) = n.as_u64() {
                Value::from(u)
            } else {
                n.as_f64()
                    .and_then(serde_json::Number::from_f64)
                    .map(Value::Number)
                    .unwrap_or_else(|| Value::String(n.to_string()))
            }
        }
        serde_yaml::Value::String(s) => Value::String(s),
        serde_yaml::Value::Sequence(items) => {
            Value::Array(items.into_iter().map(yaml_to_json).collect())
        }
        serde_yaml::Value::Mapping(mapping) => Value::Object(
            mapping
                .into_iter()
                .map(|(k, v)| (yaml_key(k), yaml_to_json(v)))
                .collect(),
        ),
        serde_yaml::Value::Tagged(tagged) => yaml_to_json(tagged.value),
    }
}

fn yaml_key(key: serde_yaml::Value) -> String {
    match key {
        serde_yaml::Value::String(s) => s,
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Null => "null".to_string(),
        serde_yaml::Value::Tagged(tagged) => yaml_key(tagged.value),
        other => serde_yaml::to_string(&other)
            .map(|s| s.trim().to_string())
            .unwrap_or_default(),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> ParameterSet {
        match value {
            Value::Object(map) => map,
            _ => panic!("params must be an object"),
        }
    }

    fn keys(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn encode(text: &str) -> String {
        STANDARD.encode(text)
    }

    #[test]
    fn test_flatten_nested_mapping() {
        let doc = json!({"a": {"b": 1, "c": {"d": 2, "e": 3}}, "f": 4});
        assert_eq!(flatten_keys(&doc), keys(&["a.b", "a.c.d", "a.c.e", "f"]));
    }

    #[test]
    fn test_flatten_keeps_arrays_as_leaves() {
        let doc = json!({"hosts": ["a", "b"], "tls": {"enabled": true}});
        assert_eq!(flatten_keys(&doc), keys(&["hosts", "tls.enabled"]));
    }

    #[test]
    fn test_covers_on_segment_boundary() {
        let net = AllowParameter::optional("net");
        assert!(net.covers("net"));
        assert!(net.covers("net.port"));
        assert!(!net.covers("network"));
        assert!(!net.covers("ne"));

        let a = AllowParameter::optional("a");
        assert!(!a.covers("ab"));
    }

    #[test]
    fn test_required_missing_with_empty_params() {
        let allow = vec![AllowParameter::required("net")];
        let report = verify(&allow, &ParameterSet::new()).unwrap();
        assert_eq!(report.missing_required, keys(&["net"]));
        assert!(report.disallowed.is_empty());
    }

    #[test]
    fn test_required_satisfied_by_nested_key() {
        let allow = vec![AllowParameter::required("net")];
        let report = verify(&allow, &params(json!({"net.port": 80}))).unwrap();
        assert!(report.missing_required.is_empty());
        assert!(report.is_valid());
    }

    #[test]
    fn test_raw_values_scenario() {
        let allow = vec![AllowParameter::optional("a"), AllowParameter::required("x")];
        let input = params(json!({"rawValues": encode("a:\n  b: 1\n"), "x": 2}));
        let report = verify(&allow, &input).unwrap();
        assert!(report.disallowed.is_empty());
        assert!(report.missing_required.is_empty());
    }

    #[test]
    fn test_unknown_key_disallowed() {
        let allow = vec![AllowParameter::optional("x")];
        let report = verify(&allow, &params(json!({"y": 1}))).unwrap();
        assert_eq!(report.disallowed, keys(&["y"]));
        assert_eq!(report.disallowed_keys(), "y");
    }

    #[test]
    fn test_prefix_is_not_substring() {
        let allow = vec![AllowParameter::optional("net")];
        let report = verify(&allow, &params(json!({"network": "host", "net": {"port": 1}})))
            .unwrap();
        assert_eq!(report.disallowed, keys(&["network"]));
    }

    #[test]
    fn test_raw_values_keys_checked() {
        let allow = vec![AllowParameter::optional("resources.limits")];
        let raw = encode("resources:\n  limits:\n    cpu: 1\n  requests:\n    cpu: 1\n");
        let report = verify(&allow, &params(json!({ "rawValues": raw }))).unwrap();
        assert_eq!(report.disallowed, keys(&["resources.requests.cpu"]));
    }

    #[test]
    fn test_empty_allow_list_permits_everything() {
        let report = verify(&[], &params(json!({"anything": 1}))).unwrap();
        assert!(report.is_valid());
    }

    #[test]
    fn test_empty_raw_values_ignored() {
        let allow = vec![AllowParameter::optional("x")];
        let report = verify(&allow, &params(json!({"rawValues": "", "x": 1}))).unwrap();
        assert!(report.is_valid());
    }

    #[test]
    fn test_invalid_raw_values() {
        let allow = vec![AllowParameter::optional("x")];

        let err = verify(&allow, &params(json!({"rawValues": "%%%"}))).unwrap_err();
        assert!(matches!(err, Error::RawValues(_)));

        let err = verify(&allow, &params(json!({"rawValues": 42}))).unwrap_err();
        assert!(err.to_string().contains("base64 string"));

        let scalar = encode("just a string");
        let err = verify(&allow, &params(json!({ "rawValues": scalar }))).unwrap_err();
        assert!(err.to_string().contains("mapping"));
    }

    #[test]
    fn test_set_syntax_in_key_disallowed() {
        let allow = vec![AllowParameter::optional("auth")];
        let report = verify(&allow, &params(json!({"auth.x=1,replicas": 99}))).unwrap();
        assert_eq!(report.disallowed, keys(&["auth.x=1,replicas"]));

        for key in ["auth.a[0]", "auth.b\\c", "auth.d,e"] {
            let mut input = ParameterSet::new();
            input.insert(key.to_string(), json!(1));
            let report = verify(&allow, &input).unwrap();
            assert!(!report.is_valid(), "key {:?}", key);
        }
        assert!(verify(&allow, &params(json!({"auth.password-file": 1}))).unwrap().is_valid());
    }

    #[test]
    fn test_empty_mapping_is_a_key() {
        let allow = vec![AllowParameter::optional("x")];
        let report = verify(&allow, &params(json!({"z": {}}))).unwrap();
        assert_eq!(report.disallowed, keys(&["z"]));

        let allow = vec![AllowParameter::required("a")];
        let report = verify(&allow, &params(json!({"a": {}}))).unwrap();
        assert!(report.is_valid());

        let doc = json!({"a": {"b": {}}, "c": 1});
        assert_eq!(flatten_keys(&doc), keys(&["a.b", "c"]));
    }

    #[test]
    fn test_yaml_non_string_keys() {
        let doc = parse_raw_values("ports:\n  80: http\n  443: https\n").unwrap();
        assert_eq!(flatten_keys(&doc), keys(&["ports.443", "ports.80"]));
    }

    #[test]
    fn test_report_display() {
        let report = ParameterReport {
            disallowed: keys(&["b", "a"]),
            missing_required: keys(&["c"]),
        };
        assert_eq!(
            report.to_string(),
            "parameters not allowed: a,b; required parameters missing: c"
        );
        assert!(matches!(
            report.into_result(),
            Err(Error::InvalidParameters(_))
        ));
        assert!(ParameterReport::default().into_result().is_ok());
    }
}
