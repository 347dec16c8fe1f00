//! Normalization of the embedded application document
//!
//! Each profile carrying `comprehensive_application_data` becomes one atomic
//! group: create the Application holding the sub-document, then rewrite the
//! profile's `data` down to its core fields. Both writes land in the same
//! transaction or neither does, so a profile is never stripped without its
//! Application existing.

use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use tracing::debug;
use uuid::Uuid;

use crate::error::TransformError;
use crate::model::{split, CoreProfileFields, ProfileView};
use crate::operation::{Operation, OperationGroup};
use crate::store::{Entity, EntityType};

/// Namespace for deriving application ids from profile ids
const APPLICATION_ID_NAMESPACE: Uuid = Uuid::from_u128(0x5f0c_1d2e_8a4b_4c3f_9e71_2b6d_0a93_c4e8);

/// Deterministic Application id for a profile
///
/// A re-run that finds the profile still unmigrated targets the same id.
pub fn application_id(profile_id: &str) -> String {
    Uuid::new_v5(&APPLICATION_ID_NAMESPACE, profile_id.as_bytes()).to_string()
}

#[derive(Debug, Default)]
pub struct MigrationPlan {
    pub groups: Vec<OperationGroup>,
    /// Profiles that still carried the sub-document
    pub candidates: usize,
    /// Profiles whose Application already matched; only the strip is planned
    pub resumed: usize,
    pub bytes_moved: usize,
    pub errors: Vec<TransformError>,
}

pub struct NormalizationMigrator;

impl NormalizationMigrator {
    /// Plan one group per profile that still embeds the sub-document
    ///
    /// `applications` are the Applications already in the store. When one
    /// already holds an identical copy of the sub-document (a prior run
    /// created it but the strip never landed) only the strip is planned. Any
    /// other pre-existing Application is a conflict left for review.
    pub fn plan(profiles: &[Entity], applications: &[Entity], now: DateTime<Utc>) -> MigrationPlan {
        let mut existing: HashMap<&str, Vec<&Entity>> = HashMap::new();
        for application in applications {
            if let Some(profile_id) = application.str_field("profileId") {
                existing.entry(profile_id).or_default().push(application);
            }
        }

        let timestamp = now.to_rfc3339_opts(SecondsFormat::Millis, true);
        let mut plan = MigrationPlan::default();

        for profile in profiles {
            let view = match ProfileView::from_entity(profile) {
                Ok(view) => view,
                Err(err) => {
                    plan.errors.push(err);
                    continue;
                }
            };
            let (core, sub) = split(&view.data);
            let Some(sub) = sub else {
                continue;
            };
            plan.candidates += 1;
            debug!(
                profile_id = %view.id,
                dropped = ?CoreProfileFields::dropped_keys(&view.data),
                sections = ?sub.sections(),
                "Profile carries embedded application data"
            );

            let mut profile_attrs = Map::new();
            profile_attrs.insert("data".to_string(), core.into_value());
            let strip = Operation::update(EntityType::Profiles, view.id, profile_attrs);

            match existing.get(view.id).map(Vec::as_slice) {
                None | Some([]) => {
                    let mut attrs = Map::new();
                    attrs.insert("profileId".to_string(), Value::String(view.id.to_string()));
                    attrs.insert("comprehensiveData".to_string(), sub.as_value().clone());
                    attrs.insert("createdAt".to_string(), Value::String(timestamp.clone()));
                    attrs.insert("updatedAt".to_string(), Value::String(timestamp.clone()));

                    plan.bytes_moved += sub.byte_size();
                    plan.groups.push(OperationGroup::atomic(
                        vec![
                            Operation::create(EntityType::Applications, application_id(view.id), attrs),
                            strip,
                        ],
                        format!("move {} sections to applications", sub.sections().len()),
                    ));
                }
                Some([application]) if application.get("comprehensiveData") == Some(sub.as_value()) => {
                    debug!(
                        profile_id = %view.id,
                        application_id = %application.id,
                        "Application already holds sub-document, stripping profile only"
                    );
                    plan.resumed += 1;
                    plan.groups.push(OperationGroup::single(
                        strip,
                        format!("application {} already present", application.id),
                    ));
                }
                Some(found) => {
                    let ids: Vec<&str> = found.iter().map(|a| a.id.as_str()).collect();
                    plan.errors.push(TransformError::new(
                        EntityType::Profiles,
                        view.id,
                        format!(
                            "existing application(s) {} differ from embedded data",
                            ids.join(", ")
                        ),
                    ));
                }
            }
        }

        plan
    }
}

/// Post-migration state of the profile / application split
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MigrationAudit {
    pub unmigrated: usize,
    /// Profiles referenced by more than one Application
    pub duplicate_applications: Vec<String>,
}

impl MigrationAudit {
    pub fn of(profiles: &[Entity], applications: &[Entity]) -> Self {
        let unmigrated = profiles
            .iter()
            .filter(|p| {
                ProfileView::from_entity(p)
                    .map(|v| v.has_comprehensive_data())
                    .unwrap_or(false)
            })
            .count();

        let mut per_profile: HashMap<&str, usize> = HashMap::new();
        for application in applications {
            if let Some(profile_id) = application.str_field("profileId") {
                *per_profile.entry(profile_id).or_default() += 1;
            }
        }
        let mut duplicate_applications: Vec<String> = per_profile
            .into_iter()
            .filter(|(_, count)| *count > 1)
            .map(|(id, _)| id.to_string())
            .collect();
        duplicate_applications.sort();

        Self {
            unmigrated,
            duplicate_applications,
        }
    }
}
