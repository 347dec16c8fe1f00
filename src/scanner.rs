//! Full-collection reads through the store
//!
//! Every detector works on a complete, id-ordered read of the collections it
//! needs. A failed read is fatal for the pass that asked for it.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{error, info};

use crate::error::Result;
use crate::store::{Entity, EntityStore, EntityType, Filter};

#[derive(Clone)]
pub struct Scanner {
    store: Arc<dyn EntityStore>,
}

impl Scanner {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }

    /// All entities of `entity_type` matching `filter`, sorted by id
    pub async fn scan(&self, entity_type: EntityType, filter: Option<&Filter>) -> Result<Vec<Entity>> {
        let mut entities = self.store.query(entity_type, filter).await.map_err(|e| {
            error!(
                entity_type = %entity_type,
                filter = %filter.map(ToString::to_string).unwrap_or_else(|| "<none>".to_string()),
                error = %e,
                "Scan failed"
            );
            e
        })?;
        entities.sort_by(|a, b| a.id.cmp(&b.id));

        info!(entity_type = %entity_type, count = entities.len(), "Scanned collection");
        Ok(entities)
    }

    pub async fn scan_all(&self, entity_type: EntityType) -> Result<Vec<Entity>> {
        self.scan(entity_type, None).await
    }

    /// Id set of a collection, for reference lookups
    pub async fn scan_ids(&self, entity_type: EntityType) -> Result<HashSet<String>> {
        Ok(self
            .scan_all(entity_type)
            .await?
            .into_iter()
            .map(|e| e.id)
            .collect())
    }
}
