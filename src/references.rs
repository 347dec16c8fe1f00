//! Reference validation
//!
//! A reference rule names a foreign-key-shaped field on a dependent entity type
//! and the entity type it must resolve to. The target id set is materialized
//! once per rule, so validation is one hash lookup per dependent entity.

use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::model::describe;
use crate::operation::{Operation, OperationGroup};
use crate::store::{Entity, EntityType};

/// What happens to a dependent entity whose reference does not resolve
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Remove the dependent entity
    Delete,
    /// Leave it in place and list it for human review
    Report,
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Delete => write!(f, "delete"),
            Self::Report => write!(f, "report"),
        }
    }
}

/// `dependent.field` must name an existing `target`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferenceRule {
    pub dependent: EntityType,
    pub field: &'static str,
    pub target: EntityType,
    pub disposition: Disposition,
}

impl ReferenceRule {
    /// Profile left behind by a deleted user
    pub const PROFILE_USER: ReferenceRule = ReferenceRule {
        dependent: EntityType::Profiles,
        field: "userId",
        target: EntityType::Users,
        disposition: Disposition::Delete,
    };

    pub const PLACEMENT_STUDENT: ReferenceRule = ReferenceRule {
        dependent: EntityType::Placements,
        field: "studentProfileId",
        target: EntityType::Profiles,
        disposition: Disposition::Report,
    };

    pub const PLACEMENT_HOST_FAMILY: ReferenceRule = ReferenceRule {
        dependent: EntityType::Placements,
        field: "hostFamilyProfileId",
        target: EntityType::Profiles,
        disposition: Disposition::Report,
    };

    pub const CHANGE_QUEUE_STUDENT: ReferenceRule = ReferenceRule {
        dependent: EntityType::ChangeQueue,
        field: "studentId",
        target: EntityType::Profiles,
        disposition: Disposition::Report,
    };

    pub const APPLICATION_PROFILE: ReferenceRule = ReferenceRule {
        dependent: EntityType::Applications,
        field: "profileId",
        target: EntityType::Profiles,
        disposition: Disposition::Report,
    };

    /// Rules whose violations are only reported
    pub fn report_only() -> Vec<ReferenceRule> {
        vec![
            Self::PLACEMENT_STUDENT,
            Self::PLACEMENT_HOST_FAMILY,
            Self::CHANGE_QUEUE_STUDENT,
            Self::APPLICATION_PROFILE,
        ]
    }
}

impl fmt::Display for ReferenceRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{} -> {}", self.dependent, self.field, self.target)
    }
}

/// A dependent entity whose reference does not resolve
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Orphan {
    pub entity_type: EntityType,
    pub id: String,
    pub field: &'static str,
    pub missing_id: String,
    pub disposition: Disposition,
    /// Identifying fields of the dependent entity
    pub subject: String,
}

impl fmt::Display for Orphan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} {} -> missing {}",
            self.entity_type, self.id, self.field, self.missing_id
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReferenceReport {
    pub matched: usize,
    /// Entities whose reference field is not set at all
    pub unset: usize,
    pub orphaned: Vec<Orphan>,
}

impl ReferenceReport {
    /// Deletes for every orphan with [`Disposition::Delete`]
    pub fn to_operations(&self) -> Vec<OperationGroup> {
        self.orphaned
            .iter()
            .filter(|o| o.disposition == Disposition::Delete)
            .map(|o| {
                OperationGroup::single(
                    Operation::delete(o.entity_type, o.id.clone()),
                    format!("{} {} does not exist", o.field, o.missing_id),
                )
                .with_subject(o.subject.clone())
            })
            .collect()
    }

    pub fn reported(&self) -> impl Iterator<Item = &Orphan> {
        self.orphaned
            .iter()
            .filter(|o| o.disposition == Disposition::Report)
    }
}

pub struct ReferenceValidator;

impl ReferenceValidator {
    /// Classify each dependent as matched, unset, or orphaned
    pub fn validate(rule: &ReferenceRule, dependents: &[Entity], target_ids: &HashSet<String>) -> ReferenceReport {
        let mut report = ReferenceReport::default();
        for entity in dependents {
            match entity.str_field(rule.field) {
                None => report.unset += 1,
                Some(value) if target_ids.contains(value) => report.matched += 1,
                Some(value) => report.orphaned.push(Orphan {
                    entity_type: rule.dependent,
                    id: entity.id.clone(),
                    field: rule.field,
                    missing_id: value.to_string(),
                    disposition: rule.disposition,
                    subject: describe(entity),
                }),
            }
        }
        report
    }
}

/// Id set of a target collection
pub fn id_set(entities: &[Entity]) -> HashSet<String> {
    entities.iter().map(|e| e.id.clone()).collect()
}

/// A profile whose `type` disagrees with its owner's `role`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagMismatch {
    pub profile_id: String,
    pub user_id: String,
    pub profile_type: String,
    pub user_role: String,
}

impl fmt::Display for TagMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "profiles/{} type {} but user {} has role {}",
            self.profile_id, self.profile_type, self.user_id, self.user_role
        )
    }
}

/// Profiles whose type tag differs from the owning user's role
///
/// Profiles with an unresolved owner or missing tags are not compared.
pub fn role_mismatches(profiles: &[Entity], users: &[Entity]) -> Vec<TagMismatch> {
    let roles: HashMap<&str, &str> = users
        .iter()
        .filter_map(|u| u.str_field("role").map(|role| (u.id.as_str(), role)))
        .collect();

    profiles
        .iter()
        .filter_map(|profile| {
            let user_id = profile.str_field("userId")?;
            let profile_type = profile.str_field("type")?;
            let role = roles.get(user_id)?;
            if role.eq_ignore_ascii_case(profile_type) {
                return None;
            }
            Some(TagMismatch {
                profile_id: profile.id.clone(),
                user_id: user_id.to_string(),
                profile_type: profile_type.to_string(),
                user_role: role.to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_missing_student_profile_is_reported() {
        let profiles = vec![Entity::new("p-1"), Entity::new("p-2")];
        let placements = vec![
            Entity::new("pl-1").with("studentProfileId", json!("p-1")),
            Entity::new("pl-2").with("studentProfileId", json!("p-999")),
            Entity::new("pl-3"),
        ];

        let report = ReferenceValidator::validate(
            &ReferenceRule::PLACEMENT_STUDENT,
            &placements,
            &id_set(&profiles),
        );

        assert_eq!(report.matched, 1);
        assert_eq!(report.unset, 1);
        assert_eq!(report.orphaned.len(), 1);
        assert_eq!(report.orphaned[0].id, "pl-2");
        assert_eq!(report.orphaned[0].missing_id, "p-999");
        assert_eq!(report.reported().count(), 1);
        // Report-only orphans never turn into writes
        assert!(report.to_operations().is_empty());
    }

    #[test]
    fn test_orphan_profiles_become_deletes() {
        let users = vec![Entity::new("u-1")];
        let profiles = vec![
            Entity::new("p-1").with("userId", json!("u-1")),
            Entity::new("p-2").with("userId", json!("u-gone")),
        ];

        let report = ReferenceValidator::validate(&ReferenceRule::PROFILE_USER, &profiles, &id_set(&users));
        let groups = report.to_operations();

        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].operations[0].id, "p-2");
        assert_eq!(groups[0].operations[0].entity_type, EntityType::Profiles);
        assert!(groups[0].reason.contains("u-gone"));
        assert_eq!(groups[0].subject.as_deref(), Some("user u-gone"));
    }

    #[test]
    fn test_role_mismatch() {
        let users = vec![
            Entity::new("u-1").with("role", json!("student")),
            Entity::new("u-2").with("role", json!("host_family")),
        ];
        let profiles = vec![
            Entity::new("p-1").with("userId", json!("u-1")).with("type", json!("student")),
            Entity::new("p-2").with("userId", json!("u-2")).with("type", json!("student")),
            Entity::new("p-3").with("userId", json!("u-missing")).with("type", json!("student")),
        ];

        let mismatches = role_mismatches(&profiles, &users);
        assert_eq!(mismatches.len(), 1);
        assert_eq!(mismatches[0].profile_id, "p-2");
        assert_eq!(mismatches[0].user_role, "host_family");
    }
}
