//! Declarative composite index requests.
//!
//! An [`IndexSpec`] names one logical index by its element kind and property
//! set. Property order never matters: the spec stores properties sorted, and
//! [`IndexSpec::canonical_name`] is derived from that sorted set so the same
//! logical index resolves to the same name on every run.

use std::{
    collections::BTreeMap,
    hash::{Hash, Hasher},
    str::FromStr,
};

use serde::{Deserialize, Serialize};

use crate::{
    errors::GraphError,
    types::{ElementKind, ValueType, validate_key},
};

const UNIQUE_SUFFIX: &str = "!unique";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndexSpec {
    kind: ElementKind,
    properties: BTreeMap<String, ValueType>,
    #[serde(default)]
    unique: bool,
}

impl IndexSpec {
    pub fn new(kind: ElementKind) -> Self {
        Self {
            kind,
            properties: BTreeMap::new(),
            unique: false,
        }
    }

    pub fn node() -> Self {
        Self::new(ElementKind::Node)
    }

    pub fn edge() -> Self {
        Self::new(ElementKind::Edge)
    }

    pub fn property<T: Into<String>>(mut self, name: T, value_type: ValueType) -> Self {
        self.properties.insert(name.into(), value_type);
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Builds a spec from `(name, type)` pairs, rejecting a name declared twice.
    pub fn from_pairs<I, T>(kind: ElementKind, pairs: I) -> Result<Self, GraphError>
    where
        I: IntoIterator<Item = (T, ValueType)>,
        T: Into<String>,
    {
        let mut spec = Self::new(kind);
        for (name, value_type) in pairs {
            let name = name.into();
            validate_key(&name)?;
            if spec.properties.insert(name.clone(), value_type).is_some() {
                return Err(GraphError::invalid_input(format!(
                    "property `{name}` declared twice in one index spec"
                )));
            }
        }
        Ok(spec)
    }

    pub fn kind(&self) -> ElementKind {
        self.kind
    }

    pub fn properties(&self) -> &BTreeMap<String, ValueType> {
        &self.properties
    }

    pub fn is_unique(&self) -> bool {
        self.unique
    }

    /// `kind(a,b,...)` over the sorted property names. Separator characters
    /// inside names are backslash-escaped so distinct sets never collide.
    pub fn canonical_name(&self) -> String {
        let names: Vec<String> = self.properties.keys().map(|name| escape(name)).collect();
        format!("{}({})", self.kind.as_str(), names.join(","))
    }

    pub fn same_index(&self, other: &IndexSpec) -> bool {
        self.kind == other.kind && self.properties.keys().eq(other.properties.keys())
    }
}

impl PartialEq for IndexSpec {
    fn eq(&self, other: &Self) -> bool {
        self.same_index(other)
    }
}

impl Eq for IndexSpec {}

impl Hash for IndexSpec {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        for name in self.properties.keys() {
            name.hash(state);
        }
    }
}

/// Parses `node:name=string,type=string` with an optional `!unique` suffix.
impl FromStr for IndexSpec {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (body, unique) = match s.strip_suffix(UNIQUE_SUFFIX) {
            Some(body) => (body, true),
            None => (s, false),
        };
        let (kind, props) = body.split_once(':').ok_or_else(|| {
            GraphError::invalid_input(format!("index spec `{s}` must look like kind:prop=type"))
        })?;
        let kind: ElementKind = kind.parse()?;
        let mut pairs = Vec::new();
        for entry in props.split(',').filter(|p| !p.trim().is_empty()) {
            let (name, value_type) = entry.split_once('=').ok_or_else(|| {
                GraphError::invalid_input(format!("property `{entry}` is missing a type"))
            })?;
            pairs.push((name.trim().to_string(), value_type.parse::<ValueType>()?));
        }
        if pairs.is_empty() {
            return Err(GraphError::invalid_input(format!(
                "index spec `{s}` declares no properties"
            )));
        }
        let spec = IndexSpec::from_pairs(kind, pairs)?;
        Ok(if unique { spec.unique() } else { spec })
    }
}

fn escape(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for ch in name.chars() {
        if matches!(ch, '\\' | ',' | '(' | ')') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}
