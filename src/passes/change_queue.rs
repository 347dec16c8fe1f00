use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use super::{Detection, Pass, PassSettings};
use crate::consistency::ConsistencyFixer;
use crate::error::Result;
use crate::scanner::Scanner;
use crate::store::EntityType;

/// Review metadata on change-queue items
pub struct ChangeQueueConsistency {
    fixer: ConsistencyFixer,
}

impl ChangeQueueConsistency {
    pub fn new(settings: &PassSettings) -> Self {
        Self {
            fixer: ConsistencyFixer::change_queue(settings.reviewer_strategy(), settings.date_strategy()),
        }
    }
}

#[async_trait]
impl Pass for ChangeQueueConsistency {
    fn name(&self) -> &'static str {
        "fix-change-queue"
    }

    fn description(&self) -> &'static str {
        "complete reviewed change-queue items and clear review fields on pending ones"
    }

    async fn detect(&self, scanner: &Scanner, now: DateTime<Utc>) -> Result<Detection> {
        let items = scanner.scan_all(EntityType::ChangeQueue).await?;
        let outcome = self.fixer.evaluate(EntityType::ChangeQueue, &items, now);

        for err in &outcome.errors {
            warn!(error = %err, "Skipping change-queue item");
        }
        info!(
            items = items.len(),
            patches = outcome.patches.len(),
            flagged = outcome.flagged.len(),
            "Change-queue rules evaluated"
        );

        Ok(Detection {
            scanned: items.len(),
            groups: outcome.to_operations(),
            review: outcome
                .flagged
                .iter()
                .map(|f| format!("{}/{} [{}] {}", f.entity_type, f.id, f.rule, f.reason))
                .collect(),
            errors: outcome.errors,
        })
    }
}
