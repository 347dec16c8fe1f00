use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;

use super::{Detection, Pass};
use crate::error::Result;
use crate::references::{ReferenceRule, ReferenceValidator};
use crate::scanner::Scanner;
use crate::store::EntityType;

/// Profiles whose owning user no longer exists
pub struct OrphanProfiles;

#[async_trait]
impl Pass for OrphanProfiles {
    fn name(&self) -> &'static str {
        "orphan-profiles"
    }

    fn description(&self) -> &'static str {
        "remove profiles whose user no longer exists"
    }

    async fn detect(&self, scanner: &Scanner, _now: DateTime<Utc>) -> Result<Detection> {
        let rule = ReferenceRule::PROFILE_USER;
        let user_ids = scanner.scan_ids(rule.target).await?;
        let profiles = scanner.scan_all(EntityType::Profiles).await?;

        let report = ReferenceValidator::validate(&rule, &profiles, &user_ids);
        info!(
            rule = %rule,
            matched = report.matched,
            unset = report.unset,
            orphaned = report.orphaned.len(),
            "Reference check complete"
        );

        Ok(Detection {
            scanned: profiles.len(),
            groups: report.to_operations(),
            ..Default::default()
        })
    }
}
