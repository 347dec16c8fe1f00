use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;

use super::{Detection, Pass, PassSettings};
use crate::dedup::{DuplicateDetector, TieBreak};
use crate::error::Result;
use crate::model::UserView;
use crate::scanner::Scanner;
use crate::store::{EntityType, Filter};

/// Users sharing a normalized name and email stem
///
/// A user is linked when some profile names it in `userId`.
pub struct DuplicateUsers {
    role: Option<String>,
    tie_break: TieBreak,
}

impl DuplicateUsers {
    pub fn new(settings: &PassSettings) -> Self {
        Self {
            role: settings.user_role.clone(),
            tie_break: settings.tie_break,
        }
    }
}

#[async_trait]
impl Pass for DuplicateUsers {
    fn name(&self) -> &'static str {
        "duplicate-users"
    }

    fn description(&self) -> &'static str {
        "remove duplicate user accounts, keeping linked or newest"
    }

    async fn detect(&self, scanner: &Scanner, _now: DateTime<Utc>) -> Result<Detection> {
        let filter = self.role.as_deref().map(|role| Filter::new().eq("role", role));
        let users = scanner.scan(EntityType::Users, filter.as_ref()).await?;
        let profiles = scanner.scan_all(EntityType::Profiles).await?;

        let linked: HashSet<String> = profiles
            .iter()
            .filter_map(|p| p.str_field("userId").map(str::to_string))
            .collect();

        let report = DuplicateDetector::for_users()
            .with_tie_break(self.tie_break)
            .detect(&users, &linked);

        info!(
            users = users.len(),
            duplicate_groups = report.duplicate_groups,
            redundant = report.redundant.len(),
            "Duplicate users detected"
        );

        Ok(Detection {
            scanned: users.len(),
            groups: report.to_operations(EntityType::Users),
            ..Default::default()
        })
    }
}

/// Several profiles owned by the same user
///
/// A profile is linked when an Application or a Placement references it.
/// Admin profiles, and any profile of an admin user, are left alone.
pub struct DuplicateProfiles {
    tie_break: TieBreak,
}

impl DuplicateProfiles {
    pub fn new(settings: &PassSettings) -> Self {
        Self {
            tie_break: settings.tie_break,
        }
    }
}

#[async_trait]
impl Pass for DuplicateProfiles {
    fn name(&self) -> &'static str {
        "duplicate-profiles"
    }

    fn description(&self) -> &'static str {
        "remove extra profiles owned by the same user"
    }

    async fn detect(&self, scanner: &Scanner, _now: DateTime<Utc>) -> Result<Detection> {
        let profiles = scanner.scan_all(EntityType::Profiles).await?;
        let applications = scanner.scan_all(EntityType::Applications).await?;
        let placements = scanner.scan_all(EntityType::Placements).await?;
        let users = scanner.scan_all(EntityType::Users).await?;

        let mut linked: HashSet<String> = applications
            .iter()
            .filter_map(|a| a.str_field("profileId").map(str::to_string))
            .collect();
        for placement in &placements {
            for field in ["studentProfileId", "hostFamilyProfileId"] {
                if let Some(id) = placement.str_field(field) {
                    linked.insert(id.to_string());
                }
            }
        }

        let privileged_users: HashSet<String> = users
            .iter()
            .filter(|u| UserView::from_entity(u).is_privileged())
            .map(|u| u.id.clone())
            .collect();

        let report = DuplicateDetector::for_profiles(privileged_users)
            .with_tie_break(self.tie_break)
            .detect(&profiles, &linked);

        info!(
            profiles = profiles.len(),
            duplicate_groups = report.duplicate_groups,
            redundant = report.redundant.len(),
            "Duplicate profiles detected"
        );

        Ok(Detection {
            scanned: profiles.len(),
            groups: report.to_operations(EntityType::Profiles),
            ..Default::default()
        })
    }
}
