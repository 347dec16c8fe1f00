use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use super::{Detection, Pass};
use crate::error::Result;
use crate::migrate::{MigrationAudit, NormalizationMigrator};
use crate::scanner::Scanner;
use crate::store::EntityType;

/// Move `comprehensive_application_data` out of profiles into Applications
pub struct ComprehensiveMigration;

#[async_trait]
impl Pass for ComprehensiveMigration {
    fn name(&self) -> &'static str {
        "migrate-comprehensive"
    }

    fn description(&self) -> &'static str {
        "split embedded application data into the applications collection"
    }

    async fn detect(&self, scanner: &Scanner, now: DateTime<Utc>) -> Result<Detection> {
        let profiles = scanner.scan_all(EntityType::Profiles).await?;
        let applications = scanner.scan_all(EntityType::Applications).await?;

        let plan = NormalizationMigrator::plan(&profiles, &applications, now);
        let audit = MigrationAudit::of(&profiles, &applications);

        for err in &plan.errors {
            warn!(error = %err, "Profile left unmigrated");
        }
        info!(
            profiles = profiles.len(),
            candidates = plan.candidates,
            resumed = plan.resumed,
            bytes_moved = plan.bytes_moved,
            "Migration planned"
        );

        Ok(Detection {
            scanned: profiles.len(),
            groups: plan.groups,
            review: audit
                .duplicate_applications
                .iter()
                .map(|id| format!("profiles/{} has more than one application", id))
                .collect(),
            errors: plan.errors,
        })
    }
}
