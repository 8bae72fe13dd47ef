use std::{collections::BTreeMap, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::errors::GraphError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    Node,
    Edge,
}

impl ElementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ElementKind::Node => "node",
            ElementKind::Edge => "edge",
        }
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ElementKind {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "node" | "vertex" => Ok(ElementKind::Node),
            "edge" => Ok(ElementKind::Edge),
            other => Err(GraphError::invalid_input(format!(
                "unknown element kind `{other}`"
            ))),
        }
    }
}

/// Declared type of a property key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ValueType {
    String,
    Integer,
    Long,
    Boolean,
    Double,
}

impl ValueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::String => "String",
            ValueType::Integer => "Integer",
            ValueType::Long => "Long",
            ValueType::Boolean => "Boolean",
            ValueType::Double => "Double",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValueType {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "string" => Ok(ValueType::String),
            "integer" | "int" => Ok(ValueType::Integer),
            "long" => Ok(ValueType::Long),
            "boolean" | "bool" => Ok(ValueType::Boolean),
            "double" => Ok(ValueType::Double),
            other => Err(GraphError::invalid_input(format!(
                "unknown value type `{other}`"
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum PropertyValue {
    String(String),
    Integer(i32),
    Long(i64),
    Boolean(bool),
    Double(f64),
}

impl PropertyValue {
    pub fn value_type(&self) -> ValueType {
        match self {
            PropertyValue::String(_) => ValueType::String,
            PropertyValue::Integer(_) => ValueType::Integer,
            PropertyValue::Long(_) => ValueType::Long,
            PropertyValue::Boolean(_) => ValueType::Boolean,
            PropertyValue::Double(_) => ValueType::Double,
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::String(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::String(value)
    }
}

impl From<i32> for PropertyValue {
    fn from(value: i32) -> Self {
        PropertyValue::Integer(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        PropertyValue::Long(value)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Boolean(value)
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        PropertyValue::Double(value)
    }
}

pub type Properties = BTreeMap<String, PropertyValue>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ElementRef {
    Node(i64),
    Edge(i64),
}

impl ElementRef {
    pub fn kind(&self) -> ElementKind {
        match self {
            ElementRef::Node(_) => ElementKind::Node,
            ElementRef::Edge(_) => ElementKind::Edge,
        }
    }

    pub fn id(&self) -> i64 {
        match self {
            ElementRef::Node(id) | ElementRef::Edge(id) => *id,
        }
    }
}

impl fmt::Display for ElementRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind(), self.id())
    }
}

#[derive(Clone, Debug, Default)]
pub struct NodeSpec {
    pub label: String,
    pub properties: Properties,
}

impl NodeSpec {
    pub fn new<T: Into<String>>(label: T) -> Self {
        Self {
            label: label.into(),
            properties: Properties::new(),
        }
    }

    pub fn with<K: Into<String>, V: Into<PropertyValue>>(mut self, key: K, value: V) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

#[derive(Clone, Debug)]
pub struct EdgeSpec {
    pub from: i64,
    pub to: i64,
    pub label: String,
    pub properties: Properties,
}

impl EdgeSpec {
    pub fn new<T: Into<String>>(from: i64, to: i64, label: T) -> Self {
        Self {
            from,
            to,
            label: label.into(),
            properties: Properties::new(),
        }
    }

    pub fn with<K: Into<String>, V: Into<PropertyValue>>(mut self, key: K, value: V) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphNode {
    pub id: i64,
    pub label: String,
    pub properties: Properties,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphEdge {
    pub id: i64,
    pub from_id: i64,
    pub to_id: i64,
    pub label: String,
    pub properties: Properties,
}

pub(crate) fn validate_label(label: &str, what: &str) -> Result<(), GraphError> {
    if label.trim().is_empty() {
        return Err(GraphError::invalid_input(format!("{what} label must be set")));
    }
    Ok(())
}

pub(crate) fn validate_key(key: &str) -> Result<(), GraphError> {
    if key.trim().is_empty() {
        return Err(GraphError::invalid_input("property key must be set"));
    }
    Ok(())
}
