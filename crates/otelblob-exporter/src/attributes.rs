//! Attribute flattening
//!
//! Typed OTLP attribute values collapse to strings for the columnar format
//! and for blob name templates. Scalars render the way they print; bytes are
//! base64; arrays and key/value lists become compact JSON.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use opentelemetry_proto::tonic::common::v1::any_value::Value as AnyValueKind;
use opentelemetry_proto::tonic::common::v1::{AnyValue, InstrumentationScope, KeyValue};
use opentelemetry_proto::tonic::resource::v1::Resource;
use std::collections::BTreeMap;

/// Flat, ordered attribute map
pub type FlatAttributes = BTreeMap<String, String>;

/// Flatten an attribute list. A repeated key keeps its last value.
pub fn flatten(attributes: &[KeyValue]) -> FlatAttributes {
    attributes
        .iter()
        .map(|kv| (kv.key.clone(), value_string(kv.value.as_ref())))
        .collect()
}

pub fn resource_attributes(resource: Option<&Resource>) -> FlatAttributes {
    resource.map(|r| flatten(&r.attributes)).unwrap_or_default()
}

/// Name and version of an instrumentation scope, empty when absent
pub fn scope_identity(scope: Option<&InstrumentationScope>) -> (&str, &str) {
    scope.map_or(("", ""), |s| (s.name.as_str(), s.version.as_str()))
}

/// Value of `key`, scanning from the end so the last duplicate wins
pub fn lookup<'a>(attributes: &'a [KeyValue], key: &str) -> Option<&'a KeyValue> {
    attributes.iter().rev().find(|kv| kv.key == key)
}

/// String form of an attribute value
pub fn value_string(value: Option<&AnyValue>) -> String {
    match value.and_then(|v| v.value.as_ref()) {
        None => String::new(),
        Some(AnyValueKind::StringValue(s)) => s.clone(),
        Some(AnyValueKind::BoolValue(b)) => b.to_string(),
        Some(AnyValueKind::IntValue(i)) => i.to_string(),
        Some(AnyValueKind::DoubleValue(d)) => format_double(*d),
        Some(AnyValueKind::BytesValue(b)) => STANDARD.encode(b),
        Some(kind @ (AnyValueKind::ArrayValue(_) | AnyValueKind::KvlistValue(_))) => {
            kind_to_json(kind).to_string()
        }
    }
}

/// JSON form of an attribute value, keeping nested types
pub fn value_json(value: Option<&AnyValue>) -> serde_json::Value {
    value
        .and_then(|v| v.value.as_ref())
        .map_or(serde_json::Value::Null, kind_to_json)
}

fn kind_to_json(kind: &AnyValueKind) -> serde_json::Value {
    use serde_json::Value;

    match kind {
        AnyValueKind::StringValue(s) => Value::String(s.clone()),
        AnyValueKind::BoolValue(b) => Value::Bool(*b),
        AnyValueKind::IntValue(i) => Value::from(*i),
        AnyValueKind::DoubleValue(d) => serde_json::Number::from_f64(*d)
            .map_or_else(|| Value::String(format_double(*d)), Value::Number),
        AnyValueKind::BytesValue(b) => Value::String(STANDARD.encode(b)),
        AnyValueKind::ArrayValue(array) => Value::Array(
            array
                .values
                .iter()
                .map(|v| value_json(Some(v)))
                .collect(),
        ),
        AnyValueKind::KvlistValue(list) => Value::Object(
            list.values
                .iter()
                .map(|kv| (kv.key.clone(), value_json(kv.value.as_ref())))
                .collect(),
        ),
    }
}

/// Shortest representation that parses back to the same double
fn format_double(d: f64) -> String {
    if d.is_nan() {
        "NaN".to_string()
    } else if d.is_infinite() {
        if d > 0.0 { "+Inf" } else { "-Inf" }.to_string()
    } else {
        d.to_string()
    }
}

/// Lowercase hex of a trace or span id; `None` when unset
pub fn id_hex(id: &[u8]) -> Option<String> {
    if id.is_empty() || id.iter().all(|b| *b == 0) {
        None
    } else {
        Some(hex::encode(id))
    }
}
