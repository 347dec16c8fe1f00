//! Chunked batch execution
//!
//! Operation groups are packed into chunks of at most `chunk_size` operations
//! and each chunk is submitted as one transaction. A group is never split
//! across chunks. A rejected chunk is logged with the ids it touched and the
//! executor moves on; nothing is retried.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::operation::{Operation, OperationGroup};
use crate::store::EntityStore;

/// Largest chunk the store accepts in one transaction
pub const MAX_CHUNK_SIZE: usize = 50;

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Operations per transaction
    pub chunk_size: usize,
    /// Pause between chunks
    pub chunk_delay: Duration,
    /// Log the plan without submitting anything
    pub dry_run: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            chunk_size: 25,
            chunk_delay: Duration::from_millis(1000),
            dry_run: false,
        }
    }
}

/// Outcome of executing a plan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionSummary {
    pub groups_submitted: usize,
    pub groups_applied: usize,
    pub groups_failed: usize,
    pub operations_applied: usize,
    pub operations_failed: usize,
    pub chunks_applied: usize,
    pub chunks_failed: usize,
    /// `type/id` of every entity in a rejected chunk
    pub failed_entities: Vec<String>,
    pub dry_run: bool,
}

impl ExecutionSummary {
    pub fn has_failures(&self) -> bool {
        self.chunks_failed > 0
    }
}

/// Pack groups into chunks of at most `chunk_size` operations, in order
///
/// A group larger than `chunk_size` gets a chunk of its own.
pub fn plan_chunks(groups: &[OperationGroup], chunk_size: usize) -> Vec<Vec<&OperationGroup>> {
    let chunk_size = chunk_size.max(1);
    let mut chunks: Vec<Vec<&OperationGroup>> = Vec::new();
    let mut current: Vec<&OperationGroup> = Vec::new();
    let mut current_len = 0;

    for group in groups.iter().filter(|g| !g.is_empty()) {
        if !current.is_empty() && current_len + group.len() > chunk_size {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        current_len += group.len();
        current.push(group);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

pub struct BatchExecutor {
    store: Arc<dyn EntityStore>,
    config: ExecutorConfig,
}

impl BatchExecutor {
    pub fn new(store: Arc<dyn EntityStore>, config: ExecutorConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Submit every group, chunk by chunk
    pub async fn execute(&self, pass: &str, groups: &[OperationGroup]) -> ExecutionSummary {
        let chunks = plan_chunks(groups, self.config.chunk_size);
        let total_chunks = chunks.len();
        let mut summary = ExecutionSummary {
            dry_run: self.config.dry_run,
            ..Default::default()
        };

        info!(
            pass = pass,
            total_groups = groups.len(),
            chunk_size = self.config.chunk_size,
            total_chunks = total_chunks,
            dry_run = self.config.dry_run,
            "Executing plan in chunks"
        );

        for (chunk_index, chunk) in chunks.into_iter().enumerate() {
            let is_final = chunk_index + 1 == total_chunks;
            let operations: Vec<Operation> = chunk
                .iter()
                .flat_map(|g| g.operations.iter().cloned())
                .collect();
            summary.groups_submitted += chunk.len();

            if self.config.dry_run {
                for group in &chunk {
                    debug!(pass = pass, entities = ?group.entity_ids(), reason = %group.reason, "Would apply");
                }
                continue;
            }

            debug!(
                pass = pass,
                chunk_index = chunk_index,
                chunk_size = operations.len(),
                is_final = is_final,
                "Submitting chunk"
            );

            match self.store.transact(&operations).await {
                Ok(()) => {
                    summary.chunks_applied += 1;
                    summary.groups_applied += chunk.len();
                    summary.operations_applied += operations.len();
                    info!(
                        pass = pass,
                        chunk = chunk_index + 1,
                        of = total_chunks,
                        operations = operations.len(),
                        "Chunk applied"
                    );
                }
                Err(e) => {
                    let entities: Vec<String> = chunk.iter().flat_map(|g| g.entity_ids()).collect();
                    error!(
                        pass = pass,
                        chunk = chunk_index + 1,
                        of = total_chunks,
                        entities = ?entities,
                        error = %e,
                        "Chunk rejected, continuing with next chunk"
                    );
                    summary.chunks_failed += 1;
                    summary.groups_failed += chunk.len();
                    summary.operations_failed += operations.len();
                    summary.failed_entities.extend(entities);
                }
            }

            if !is_final && !self.config.chunk_delay.is_zero() {
                tokio::time::sleep(self.config.chunk_delay).await;
            }
        }

        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Entity, EntityType, MemoryStore};
    use serde_json::Map;

    fn delete(id: &str) -> OperationGroup {
        OperationGroup::single(Operation::delete(EntityType::Users, id), "older duplicate")
    }

    fn pair(id: &str) -> OperationGroup {
        OperationGroup::atomic(
            vec![
                Operation::create(EntityType::Applications, format!("a-{}", id), Map::new()),
                Operation::update(EntityType::Profiles, id, Map::new()),
            ],
            "split",
        )
    }

    fn config(chunk_size: usize) -> ExecutorConfig {
        ExecutorConfig {
            chunk_size,
            chunk_delay: Duration::ZERO,
            dry_run: false,
        }
    }

    #[test]
    fn test_groups_never_split_across_chunks() {
        let groups = vec![pair("p-1"), pair("p-2"), delete("u-1"), pair("p-3")];

        let chunks = plan_chunks(&groups, 3);

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 1);
        assert_eq!(chunks[1].len(), 2);
        assert_eq!(chunks[2].len(), 1);
        for chunk in &chunks {
            assert!(chunk.iter().map(|g| g.len()).sum::<usize>() <= 3);
        }
    }

    #[test]
    fn test_oversized_group_gets_own_chunk() {
        let groups = vec![delete("u-1"), pair("p-1"), delete("u-2")];
        let chunks = plan_chunks(&groups, 1);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[1][0].len(), 2);
    }

    #[tokio::test]
    async fn test_rejected_chunk_does_not_stop_the_rest() {
        let store = Arc::new(MemoryStore::new());
        for id in ["u-1", "u-2", "u-3", "u-4"] {
            store.insert(EntityType::Users, Entity::new(id)).await;
        }
        store.poison("u-2").await;

        let executor = BatchExecutor::new(store.clone(), config(2));
        let groups: Vec<_> = ["u-1", "u-2", "u-3", "u-4"].iter().map(|id| delete(id)).collect();
        let summary = executor.execute("duplicate-users", &groups).await;

        assert_eq!(summary.chunks_applied, 1);
        assert_eq!(summary.chunks_failed, 1);
        assert_eq!(summary.groups_applied, 2);
        assert_eq!(summary.failed_entities, vec!["$users/u-1", "$users/u-2"]);
        assert!(summary.has_failures());

        // The rejected chunk left both of its entities in place
        assert!(store.get(EntityType::Users, "u-1").await.is_some());
        assert!(store.get(EntityType::Users, "u-3").await.is_none());
    }

    #[tokio::test]
    async fn test_dry_run_submits_nothing() {
        let store = Arc::new(MemoryStore::new());
        store.insert(EntityType::Users, Entity::new("u-1")).await;

        let executor = BatchExecutor::new(
            store.clone(),
            ExecutorConfig {
                dry_run: true,
                ..config(25)
            },
        );
        let summary = executor.execute("duplicate-users", &[delete("u-1")]).await;

        assert!(summary.dry_run);
        assert_eq!(summary.groups_submitted, 1);
        assert_eq!(summary.groups_applied, 0);
        assert!(store.committed_transactions().await.is_empty());
        assert!(store.get(EntityType::Users, "u-1").await.is_some());
    }
}
