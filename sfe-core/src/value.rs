//! Runtime values flowing through filters
//!
//! Filters are typed against descriptors, not Rust types, so the data they
//! exchange is a small dynamic value model. Values are owned data: cloning a
//! value is a deep copy, which is what multiplexer branches rely on.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Dynamic value passed into and out of filters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Array(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Object(Object),
}

impl Value {
    /// Runtime type name used in diagnostics and type matching
    ///
    /// Floating point values report `float`, never `double`. Objects report
    /// their class name (last segment of the class path).
    pub fn type_name(&self) -> &str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Map(_) => "map",
            Value::Object(object) => object.class_name(),
        }
    }

    /// Signature that fully determines the outcome of type matching
    ///
    /// Used as a memoization key: two values with the same signature match
    /// exactly the same set of descriptors.
    pub fn type_signature(&self) -> String {
        match self {
            Value::Object(object) => {
                let mut lineage: Vec<String> =
                    object.lineage.iter().map(|l| l.to_lowercase()).collect();
                lineage.sort();
                format!("{}<{}>", object.class_name().to_lowercase(), lineage.join(","))
            }
            Value::Array(items) => {
                let elements: BTreeSet<String> =
                    items.iter().map(Value::type_signature).collect();
                let elements: Vec<String> = elements.into_iter().collect();
                format!("array[{}]({})", items.len(), elements.join("|"))
            }
            other => other.type_name().to_string(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            Value::Boolean(_) | Value::Integer(_) | Value::Float(_) | Value::String(_)
        )
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Vec<Value>> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_array_mut(&mut self) -> Option<&mut Vec<Value>> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Value::Object(object) => Some(object),
            _ => None,
        }
    }

    /// Plain JSON rendering (objects become `{"class": .., "fields": ..}`)
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;
        match self {
            Value::Null => Json::Null,
            Value::Boolean(b) => Json::Bool(*b),
            Value::Integer(i) => Json::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            Value::String(s) => Json::String(s.clone()),
            Value::Array(items) => Json::Array(items.iter().map(Value::to_json).collect()),
            Value::Map(map) => Json::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
            Value::Object(object) => {
                let fields: serde_json::Map<String, Json> = object
                    .fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect();
                serde_json::json!({
                    "class": object.class_path,
                    "fields": fields,
                })
            }
        }
    }
}

/// Class instance value
///
/// `class_path` is a dotted path whose last segment is the class name
/// (`lib.pkp.classes.submission.Submission`). `lineage` lists the parent
/// classes and interfaces the object also "is a".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Object {
    pub class_path: String,
    #[serde(default)]
    pub lineage: Vec<String>,
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,
}

impl Object {
    pub fn new(class_path: impl Into<String>) -> Self {
        Self {
            class_path: class_path.into(),
            lineage: Vec::new(),
            fields: BTreeMap::new(),
        }
    }

    /// Declare a parent class or implemented interface
    pub fn extends(mut self, class_name: impl Into<String>) -> Self {
        self.lineage.push(class_name.into());
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Last segment of the class path
    pub fn class_name(&self) -> &str {
        self.class_path
            .rsplit('.')
            .next()
            .unwrap_or(self.class_path.as_str())
    }

    /// Instance-of check against the class itself or its lineage
    ///
    /// Class names compare case-insensitively.
    pub fn is_a(&self, class_name: &str) -> bool {
        self.class_name().eq_ignore_ascii_case(class_name)
            || self
                .lineage
                .iter()
                .any(|l| l.rsplit('.').next().unwrap_or(l).eq_ignore_ascii_case(class_name))
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Integer(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl From<Object> for Value {
    fn from(object: Object) -> Self {
        Value::Object(object)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        use serde_json::Value as Json;
        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Boolean(b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Json::String(s) => Value::String(s),
            Json::Array(items) => Value::Array(items.into_iter().map(Value::from).collect()),
            Json::Object(map) => {
                Value::Map(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<toml::Value> for Value {
    fn from(toml: toml::Value) -> Self {
        match toml {
            toml::Value::String(s) => Value::String(s),
            toml::Value::Integer(i) => Value::Integer(i),
            toml::Value::Float(f) => Value::Float(f),
            toml::Value::Boolean(b) => Value::Boolean(b),
            toml::Value::Datetime(dt) => Value::String(dt.to_string()),
            toml::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            toml::Value::Table(table) => {
                Value::Map(table.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}
