//! Entity store capability
//!
//! The store is a remote document database reachable only through two calls:
//! `query` (entity type + optional equality filter) and `transact` (an ordered
//! batch of create/update/delete operations applied atomically).
//!
//! Every pass receives one [`EntityStore`] trait object constructed at startup.
//! Two implementations ship with the crate:
//!
//! - [`HttpStore`] - admin HTTP API of the hosted store
//! - [`MemoryStore`] - in-process store for offline snapshots and tests

mod http;
mod memory;

pub use http::{HttpStore, HttpStoreConfig};
pub use memory::{MemoryStore, Snapshot};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::error::Result;
use crate::operation::Operation;

// ============================================================================
// Entity Types
// ============================================================================

/// Namespaces the reconciliation core reads or writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityType {
    #[serde(rename = "$users")]
    Users,
    #[serde(rename = "profiles")]
    Profiles,
    #[serde(rename = "applications")]
    Applications,
    #[serde(rename = "placements")]
    Placements,
    #[serde(rename = "changeQueue")]
    ChangeQueue,
}

impl EntityType {
    pub const ALL: [EntityType; 5] = [
        EntityType::Users,
        EntityType::Profiles,
        EntityType::Applications,
        EntityType::Placements,
        EntityType::ChangeQueue,
    ];

    /// Namespace name as the store knows it
    pub fn namespace(&self) -> &'static str {
        match self {
            Self::Users => "$users",
            Self::Profiles => "profiles",
            Self::Applications => "applications",
            Self::Placements => "placements",
            Self::ChangeQueue => "changeQueue",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.namespace())
    }
}

impl FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "$users" | "users" => Ok(Self::Users),
            "profiles" => Ok(Self::Profiles),
            "applications" => Ok(Self::Applications),
            "placements" => Ok(Self::Placements),
            "changeQueue" | "change_queue" => Ok(Self::ChangeQueue),
            other => Err(format!("unknown entity type: {}", other)),
        }
    }
}

// ============================================================================
// Entity
// ============================================================================

/// A uniquely identified record with schema-free attributes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    #[serde(flatten)]
    pub attrs: Map<String, Value>,
}

impl Entity {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attrs: Map::new(),
        }
    }

    /// Builder-style attribute setter
    pub fn with(mut self, key: &str, value: Value) -> Self {
        self.attrs.insert(key.to_string(), value);
        self
    }

    /// Resolve a dotted path (`data.applicationStatus`) against the attributes
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let first = parts.next()?;
        if first == "id" {
            return None;
        }
        let mut current = self.attrs.get(first)?;
        for part in parts {
            current = current.as_object()?.get(part)?;
        }
        Some(current)
    }

    /// Non-empty, trimmed string at `path`
    pub fn str_field(&self, path: &str) -> Option<&str> {
        if path == "id" {
            return Some(self.id.as_str());
        }
        self.get(path)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

// ============================================================================
// Filter
// ============================================================================

/// Conjunction of equality constraints on top-level or nested fields
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub clauses: Vec<(String, Value)>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, path: &str, value: impl Into<Value>) -> Self {
        self.clauses.push((path.to_string(), value.into()));
        self
    }

    pub fn matches(&self, entity: &Entity) -> bool {
        self.clauses.iter().all(|(path, expected)| {
            if path == "id" {
                return expected.as_str() == Some(entity.id.as_str());
            }
            entity.get(path) == Some(expected)
        })
    }

    /// Render as the `where` object of a store query
    pub fn to_where(&self) -> Value {
        let mut map = Map::new();
        for (path, value) in &self.clauses {
            map.insert(path.clone(), value.clone());
        }
        Value::Object(map)
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.clauses.is_empty() {
            return f.write_str("<none>");
        }
        let parts: Vec<String> = self
            .clauses
            .iter()
            .map(|(path, value)| format!("{}={}", path, value))
            .collect();
        f.write_str(&parts.join(" AND "))
    }
}

// ============================================================================
// Store Trait (dependency injection seam)
// ============================================================================

/// Query/transact capability of the entity store
#[async_trait::async_trait]
pub trait EntityStore: Send + Sync {
    /// Return every entity of `entity_type` matching `filter`
    async fn query(&self, entity_type: EntityType, filter: Option<&Filter>) -> Result<Vec<Entity>>;

    /// Apply all operations as one unit; an error means none were applied
    async fn transact(&self, operations: &[Operation]) -> Result<()>;
}
