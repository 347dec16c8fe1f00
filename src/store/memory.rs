//! In-process entity store
//!
//! Backs offline runs against a JSON snapshot of the hosted store and every
//! test in the crate. Transactions are all-or-nothing: operations are applied
//! to a scratch copy which replaces the live map only if every one succeeds.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tokio::sync::RwLock;
use tracing::debug;

use super::{Entity, EntityStore, EntityType, Filter};
use crate::error::{ReconcileError, Result};
use crate::operation::{Operation, OperationKind};

type Namespaces = BTreeMap<EntityType, BTreeMap<String, Entity>>;

/// Serializable dump of the store, keyed by namespace
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub entities: BTreeMap<EntityType, Vec<Entity>>,
}

impl Snapshot {
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read(path).await.map_err(|e| {
            ReconcileError::Snapshot(format!("failed to read {}: {}", path.display(), e))
        })?;
        Ok(serde_json::from_slice(&content)?)
    }

    pub async fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_vec_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    pub fn total(&self) -> usize {
        self.entities.values().map(Vec::len).sum()
    }
}

/// In-memory [`EntityStore`] with failure injection for tests
#[derive(Default)]
pub struct MemoryStore {
    namespaces: RwLock<Namespaces>,
    /// Transactions touching any of these ids are rejected
    poisoned_ids: RwLock<HashSet<String>>,
    /// Queries against these namespaces fail
    unreachable: RwLock<HashSet<EntityType>>,
    /// Every committed transaction, in order
    committed: RwLock<Vec<Vec<Operation>>>,
    /// Namespace of every query served, in order
    queries: RwLock<Vec<EntityType>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        let mut namespaces = Namespaces::new();
        for (entity_type, entities) in snapshot.entities {
            let ns = namespaces.entry(entity_type).or_default();
            for entity in entities {
                ns.insert(entity.id.clone(), entity);
            }
        }
        Self {
            namespaces: RwLock::new(namespaces),
            ..Default::default()
        }
    }

    pub async fn snapshot(&self) -> Snapshot {
        let namespaces = self.namespaces.read().await;
        Snapshot {
            entities: namespaces
                .iter()
                .map(|(t, ns)| (*t, ns.values().cloned().collect()))
                .collect(),
        }
    }

    /// Seed an entity directly, bypassing transactions
    pub async fn insert(&self, entity_type: EntityType, entity: Entity) {
        self.namespaces
            .write()
            .await
            .entry(entity_type)
            .or_default()
            .insert(entity.id.clone(), entity);
    }

    pub async fn get(&self, entity_type: EntityType, id: &str) -> Option<Entity> {
        self.namespaces
            .read()
            .await
            .get(&entity_type)
            .and_then(|ns| ns.get(id))
            .cloned()
    }

    pub async fn count(&self, entity_type: EntityType) -> usize {
        self.namespaces
            .read()
            .await
            .get(&entity_type)
            .map(BTreeMap::len)
            .unwrap_or(0)
    }

    /// Reject every future transaction that touches `id`
    pub async fn poison(&self, id: &str) {
        self.poisoned_ids.write().await.insert(id.to_string());
    }

    pub async fn heal(&self, id: &str) {
        self.poisoned_ids.write().await.remove(id);
    }

    /// Make queries against `entity_type` fail
    pub async fn make_unreachable(&self, entity_type: EntityType) {
        self.unreachable.write().await.insert(entity_type);
    }

    pub async fn committed_transactions(&self) -> Vec<Vec<Operation>> {
        self.committed.read().await.clone()
    }

    /// Number of queries served for `entity_type`
    pub async fn query_count(&self, entity_type: EntityType) -> usize {
        self.queries
            .read()
            .await
            .iter()
            .filter(|t| **t == entity_type)
            .count()
    }
}

fn apply(namespaces: &mut Namespaces, op: &Operation) -> Result<()> {
    let ns = namespaces.entry(op.entity_type).or_default();
    match op.kind {
        OperationKind::Create => {
            if ns.contains_key(&op.id) {
                return Err(ReconcileError::Transact(format!(
                    "{}/{} already exists",
                    op.entity_type, op.id
                )));
            }
            let mut entity = Entity::new(op.id.clone());
            if let Some(attrs) = &op.attrs {
                entity.attrs = attrs.clone();
            }
            ns.insert(op.id.clone(), entity);
        }
        OperationKind::Update => {
            let entity = ns
                .entry(op.id.clone())
                .or_insert_with(|| Entity::new(op.id.clone()));
            if let Some(attrs) = &op.attrs {
                for (key, value) in attrs {
                    entity.attrs.insert(key.clone(), value.clone());
                }
            }
        }
        OperationKind::Delete => {
            ns.remove(&op.id);
        }
    }
    Ok(())
}

#[async_trait::async_trait]
impl EntityStore for MemoryStore {
    async fn query(&self, entity_type: EntityType, filter: Option<&Filter>) -> Result<Vec<Entity>> {
        self.queries.write().await.push(entity_type);
        if self.unreachable.read().await.contains(&entity_type) {
            return Err(ReconcileError::Query {
                entity_type,
                filter: filter.map(ToString::to_string).unwrap_or_else(|| "<none>".to_string()),
                message: "store unreachable".to_string(),
            });
        }

        let namespaces = self.namespaces.read().await;
        let entities = namespaces
            .get(&entity_type)
            .map(|ns| {
                ns.values()
                    .filter(|e| filter.map(|f| f.matches(e)).unwrap_or(true))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(entities)
    }

    async fn transact(&self, operations: &[Operation]) -> Result<()> {
        {
            let poisoned = self.poisoned_ids.read().await;
            if let Some(op) = operations.iter().find(|op| poisoned.contains(&op.id)) {
                return Err(ReconcileError::Transact(format!("rejected write to {}", op)));
            }
        }

        let mut namespaces = self.namespaces.write().await;
        let mut scratch = namespaces.clone();
        for op in operations {
            apply(&mut scratch, op)?;
        }
        *namespaces = scratch;
        drop(namespaces);

        debug!(operations = operations.len(), "Transaction committed");
        self.committed.write().await.push(operations.to_vec());
        Ok(())
    }
}
