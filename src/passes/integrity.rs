use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use super::{Detection, Pass};
use crate::error::Result;
use crate::references::{id_set, role_mismatches, ReferenceRule, ReferenceValidator};
use crate::scanner::Scanner;
use crate::store::EntityType;

/// Report-only check of every cross-collection reference
///
/// Lists placements, change-queue items and applications pointing at missing
/// profiles, plus profiles whose type tag disagrees with the owner's role.
/// Nothing here is ever written.
pub struct ReferenceCheck;

#[async_trait]
impl Pass for ReferenceCheck {
    fn name(&self) -> &'static str {
        "check-references"
    }

    fn description(&self) -> &'static str {
        "report dangling references and profile/role mismatches"
    }

    async fn detect(&self, scanner: &Scanner, _now: DateTime<Utc>) -> Result<Detection> {
        let profiles = scanner.scan_all(EntityType::Profiles).await?;
        let profile_ids = id_set(&profiles);
        let mut detection = Detection::default();

        for rule in ReferenceRule::report_only() {
            let dependents = scanner.scan_all(rule.dependent).await?;
            let report = ReferenceValidator::validate(&rule, &dependents, &profile_ids);
            detection.scanned += dependents.len();

            info!(
                rule = %rule,
                matched = report.matched,
                orphaned = report.orphaned.len(),
                "Reference check complete"
            );
            for orphan in report.reported() {
                warn!(entity_type = %orphan.entity_type, id = %orphan.id, field = orphan.field, missing = %orphan.missing_id, "Dangling reference");
                detection.review.push(orphan.to_string());
            }
        }

        let users = scanner.scan_all(EntityType::Users).await?;
        for mismatch in role_mismatches(&profiles, &users) {
            detection.review.push(mismatch.to_string());
        }

        Ok(detection)
    }
}
