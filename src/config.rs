//! Configuration handed to a backend at instantiation.
//!
//! The application passes opaque string pairs; only the backend interprets
//! them. Recognised keys:
//!
//! | key                       | default                              |
//! |---------------------------|--------------------------------------|
//! | `backend`                 | `$GRAPH_BACKEND`, else `embedded`    |
//! | `sqlite.path`             | `:memory:`                           |
//! | `schema.auto-create-keys` | `true`                               |

use std::{collections::BTreeMap, env, path::PathBuf};

use tracing::debug;

use crate::errors::GraphError;

pub const BACKEND_KEY: &str = "backend";
pub const SQLITE_PATH_KEY: &str = "sqlite.path";
pub const AUTO_CREATE_KEYS_KEY: &str = "schema.auto-create-keys";
pub const BACKEND_ENV: &str = "GRAPH_BACKEND";

const MEMORY_PATH: &str = ":memory:";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendKind {
    Embedded,
    Sqlite,
}

impl BackendKind {
    pub fn parse(value: &str) -> Result<Self, GraphError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "embedded" | "memory" => Ok(BackendKind::Embedded),
            "sqlite" | "schema" => Ok(BackendKind::Sqlite),
            other => Err(GraphError::unavailable(format!("unknown backend `{other}`"))),
        }
    }

    pub fn from_env() -> Result<Self, GraphError> {
        match env::var(BACKEND_ENV) {
            Ok(value) => Self::parse(&value),
            Err(_) => Ok(BackendKind::Embedded),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Embedded => "embedded",
            BackendKind::Sqlite => "sqlite",
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GraphConfig {
    entries: BTreeMap<String, String>,
}

impl GraphConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            entries: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn embedded() -> Self {
        Self::from_pairs([(BACKEND_KEY, "embedded")])
    }

    pub fn sqlite_in_memory() -> Self {
        Self::from_pairs([(BACKEND_KEY, "sqlite"), (SQLITE_PATH_KEY, MEMORY_PATH)])
    }

    pub fn sqlite<P: Into<PathBuf>>(path: P) -> Self {
        let path = path.into().to_string_lossy().into_owned();
        Self::from_pairs([(BACKEND_KEY, "sqlite".to_string()), (SQLITE_PATH_KEY, path)])
    }

    pub fn set<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.entries.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn backend_kind(&self) -> Result<BackendKind, GraphError> {
        match self.get(BACKEND_KEY) {
            Some(value) => BackendKind::parse(value),
            None => BackendKind::from_env(),
        }
    }

    /// `None` means an in-memory database.
    pub fn sqlite_path(&self) -> Option<PathBuf> {
        match self.get(SQLITE_PATH_KEY) {
            None | Some(MEMORY_PATH) | Some("memory") => None,
            Some(path) => Some(PathBuf::from(path)),
        }
    }

    pub fn auto_create_keys(&self) -> Result<bool, GraphError> {
        self.bool_or(AUTO_CREATE_KEYS_KEY, true)
    }

    pub fn bool_or(&self, key: &str, default: bool) -> Result<bool, GraphError> {
        match self.get(key) {
            None => Ok(default),
            Some(value) => match value.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" | "on" => Ok(true),
                "false" | "no" | "0" | "off" => Ok(false),
                other => Err(GraphError::unavailable(format!(
                    "`{key}` expects a boolean, got `{other}`"
                ))),
            },
        }
    }

    /// Logs keys outside `known` so typos surface without failing startup.
    pub(crate) fn log_unknown(&self, known: &[&str]) {
        for key in self.entries.keys() {
            if key != BACKEND_KEY && !known.contains(&key.as_str()) {
                debug!(key = key.as_str(), "ignoring unrecognised graph config key");
            }
        }
    }
}
