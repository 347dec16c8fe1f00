//! Reconciliation passes
//!
//! A pass scans the collections it needs and turns a detector's findings into
//! corrective operation groups plus findings left for review. Passes never
//! write: the [`Reconciler`](crate::runner::Reconciler) executes the groups and
//! re-runs `detect` to verify.

mod approvals;
mod change_queue;
mod duplicates;
mod integrity;
mod migration;
mod orphans;

pub use approvals::ApprovalConsistency;
pub use change_queue::ChangeQueueConsistency;
pub use duplicates::{DuplicateProfiles, DuplicateUsers};
pub use integrity::ReferenceCheck;
pub use migration::ComprehensiveMigration;
pub use orphans::OrphanProfiles;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::config::RepairPolicy;
use crate::consistency::{DateStrategy, DeriveFromTimestamps, FlagForReview, ReviewerStrategy, RosterAssignment};
use crate::dedup::TieBreak;
use crate::error::{Result, TransformError};
use crate::operation::OperationGroup;
use crate::scanner::Scanner;

/// What a detector found in one scan
#[derive(Debug, Default)]
pub struct Detection {
    pub scanned: usize,
    pub groups: Vec<OperationGroup>,
    /// Findings that are reported but never written
    pub review: Vec<String>,
    pub errors: Vec<TransformError>,
}

impl Detection {
    pub fn flagged(&self) -> usize {
        self.groups.len() + self.review.len()
    }

    pub fn planned_operations(&self) -> usize {
        self.groups.iter().map(OperationGroup::len).sum()
    }
}

#[async_trait]
pub trait Pass: Send + Sync {
    /// Subcommand name
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// Scan and plan; must not write
    async fn detect(&self, scanner: &Scanner, now: DateTime<Utc>) -> Result<Detection>;
}

/// Largest accepted review-date window, in days
pub const MAX_DATE_WINDOW_DAYS: i64 = 3650;

/// Knobs shared by the passes that repair or pick values
#[derive(Debug, Clone)]
pub struct PassSettings {
    pub reviewer_policy: RepairPolicy,
    pub reviewer_roster: Vec<String>,
    pub date_policy: RepairPolicy,
    /// How far before the last update a derived review date may fall
    pub date_window_days: i64,
    pub tie_break: TieBreak,
    /// Restrict duplicate-user detection to one role
    pub user_role: Option<String>,
}

impl Default for PassSettings {
    fn default() -> Self {
        Self {
            reviewer_policy: RepairPolicy::Derive,
            reviewer_roster: Vec::new(),
            date_policy: RepairPolicy::Derive,
            date_window_days: 30,
            tie_break: TieBreak::default(),
            user_role: None,
        }
    }
}

impl PassSettings {
    pub fn reviewer_strategy(&self) -> Box<dyn ReviewerStrategy> {
        match self.reviewer_policy {
            RepairPolicy::Derive => Box::new(RosterAssignment::new(self.reviewer_roster.clone())),
            RepairPolicy::Flag => Box::new(FlagForReview),
        }
    }

    pub fn date_strategy(&self) -> Box<dyn DateStrategy> {
        match self.date_policy {
            RepairPolicy::Derive => Box::new(DeriveFromTimestamps {
                window: Duration::try_days(self.date_window_days.clamp(0, MAX_DATE_WINDOW_DAYS))
                    .unwrap_or_default(),
            }),
            RepairPolicy::Flag => Box::new(FlagForReview),
        }
    }
}

/// Every pass, in dependency order
///
/// Duplicates go first so the orphan pass sweeps profiles of removed users.
/// Consistency runs before migration, and the reference report runs last so
/// it describes the final state.
pub fn all_passes(settings: &PassSettings) -> Vec<Box<dyn Pass>> {
    vec![
        Box::new(DuplicateUsers::new(settings)),
        Box::new(DuplicateProfiles::new(settings)),
        Box::new(OrphanProfiles),
        Box::new(ApprovalConsistency::new(settings)),
        Box::new(ChangeQueueConsistency::new(settings)),
        Box::new(ComprehensiveMigration),
        Box::new(ReferenceCheck),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    use crate::consistency::Resolution;

    #[test]
    fn test_date_strategy_clamps_window() {
        let settings = PassSettings {
            date_window_days: 1_000_000_000,
            ..Default::default()
        };
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let created = Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap();

        match settings.date_strategy().resolve("p-1", Some(created), Some(now), now) {
            Resolution::Assign(at) => {
                assert!(at >= now - Duration::try_days(MAX_DATE_WINDOW_DAYS).unwrap());
                assert!(at <= now);
            }
            Resolution::Flag(reason) => panic!("unexpected flag: {}", reason),
        }
    }
}
