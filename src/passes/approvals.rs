use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use super::{Detection, Pass, PassSettings};
use crate::consistency::ConsistencyFixer;
use crate::error::Result;
use crate::scanner::Scanner;
use crate::store::EntityType;

/// Approval metadata on profiles: reviewer, date, and stale dates
pub struct ApprovalConsistency {
    fixer: ConsistencyFixer,
}

impl ApprovalConsistency {
    pub fn new(settings: &PassSettings) -> Self {
        Self {
            fixer: ConsistencyFixer::approvals(settings.reviewer_strategy(), settings.date_strategy()),
        }
    }
}

#[async_trait]
impl Pass for ApprovalConsistency {
    fn name(&self) -> &'static str {
        "fix-approvals"
    }

    fn description(&self) -> &'static str {
        "fill missing approval dates, replace placeholder reviewers, clear stale dates"
    }

    async fn detect(&self, scanner: &Scanner, now: DateTime<Utc>) -> Result<Detection> {
        let profiles = scanner.scan_all(EntityType::Profiles).await?;
        let outcome = self.fixer.evaluate(EntityType::Profiles, &profiles, now);

        for err in &outcome.errors {
            warn!(error = %err, "Skipping profile");
        }
        info!(
            rules = ?self.fixer.rule_names(),
            profiles = profiles.len(),
            patches = outcome.patches.len(),
            flagged = outcome.flagged.len(),
            "Approval rules evaluated"
        );

        Ok(Detection {
            scanned: profiles.len(),
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
