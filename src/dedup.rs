//! Duplicate detection
//!
//! Entities are grouped by a composite equivalence key. Within each group of
//! two or more members:
//!
//! 1. If some members have a dependent linked record and some do not, every
//!    unlinked member is redundant and all linked members are kept.
//! 2. Otherwise the group is ordered by the tie-break rule, the first member
//!    is kept and the rest are redundant.
//!
//! Privileged entities never take part in grouping, so they are never marked
//! redundant.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

use crate::model::{describe, is_privileged_role, parse_timestamp, UserView};
use crate::operation::{Operation, OperationGroup};
use crate::store::{Entity, EntityType};

/// Derives one component of an equivalence key; `None` opts the entity out
pub type KeyFn = Box<dyn Fn(&Entity) -> Option<String> + Send + Sync>;

/// Predicate for entities that must never be marked redundant
pub type PrivilegedFn = Box<dyn Fn(&Entity) -> bool + Send + Sync>;

/// Which member of an all-linked or all-unlinked group survives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TieBreak {
    /// Newest `updatedAt` wins
    #[default]
    MostRecentlyUpdated,
    /// Oldest `createdAt` wins
    EarliestCreated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedundancyReason {
    NoDependentRecord,
    OlderDuplicate,
}

impl fmt::Display for RedundancyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoDependentRecord => write!(f, "no dependent record"),
            Self::OlderDuplicate => write!(f, "older duplicate"),
        }
    }
}

/// An entity selected for removal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redundant {
    pub id: String,
    pub reason: RedundancyReason,
    /// Equivalence key of the group
    pub key: String,
    /// Ids kept from the same group
    pub kept: Vec<String>,
    /// Identifying fields of the removed entity
    pub subject: String,
}

#[derive(Debug, Clone, Default)]
pub struct DuplicateReport {
    /// Groups with more than one member
    pub duplicate_groups: usize,
    pub redundant: Vec<Redundant>,
}

impl DuplicateReport {
    pub fn redundant_ids(&self) -> HashSet<&str> {
        self.redundant.iter().map(|r| r.id.as_str()).collect()
    }

    /// One delete per redundant entity
    pub fn to_operations(&self, entity_type: EntityType) -> Vec<OperationGroup> {
        self.redundant
            .iter()
            .map(|r| {
                OperationGroup::single(
                    Operation::delete(entity_type, r.id.clone()),
                    format!("{} (kept {})", r.reason, r.kept.join(", ")),
                )
                .with_subject(r.subject.clone())
            })
            .collect()
    }
}

/// Groups entities by equivalence key and picks canonical members
pub struct DuplicateDetector {
    keys: Vec<KeyFn>,
    tie_break: TieBreak,
    privileged: PrivilegedFn,
}

impl Default for DuplicateDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl DuplicateDetector {
    pub fn new() -> Self {
        Self {
            keys: Vec::new(),
            tie_break: TieBreak::default(),
            privileged: Box::new(|_| false),
        }
    }

    /// Users: normalized name + email with digits stripped, admins exempt
    pub fn for_users() -> Self {
        Self::new()
            .with_key(Box::new(normalized_name))
            .with_key(Box::new(email_stem))
            .with_privileged(Box::new(|e| UserView::from_entity(e).is_privileged()))
    }

    /// Profiles: one per `userId`
    ///
    /// Admin-typed profiles and every profile owned by one of
    /// `privileged_users` are exempt.
    pub fn for_profiles(privileged_users: HashSet<String>) -> Self {
        Self::new()
            .with_key(field_key("userId"))
            .with_privileged(Box::new(move |e| {
                is_privileged_role(e.str_field("type"))
                    || e.str_field("userId").is_some_and(|owner| privileged_users.contains(owner))
            }))
    }

    pub fn with_key(mut self, key: KeyFn) -> Self {
        self.keys.push(key);
        self
    }

    pub fn with_tie_break(mut self, tie_break: TieBreak) -> Self {
        self.tie_break = tie_break;
        self
    }

    pub fn with_privileged(mut self, privileged: PrivilegedFn) -> Self {
        self.privileged = privileged;
        self
    }

    /// Composite key; `None` if any component is missing or empty
    pub fn equivalence_key(&self, entity: &Entity) -> Option<String> {
        if self.keys.is_empty() {
            return None;
        }
        let mut parts = Vec::with_capacity(self.keys.len());
        for key in &self.keys {
            let part = key(entity).filter(|p| !p.is_empty())?;
            parts.push(part);
        }
        Some(parts.join("|"))
    }

    /// `linked` holds the ids of entities that have a dependent record
    pub fn detect(&self, entities: &[Entity], linked: &HashSet<String>) -> DuplicateReport {
        let mut groups: BTreeMap<String, Vec<&Entity>> = BTreeMap::new();
        for entity in entities {
            if (self.privileged)(entity) {
                continue;
            }
            if let Some(key) = self.equivalence_key(entity) {
                groups.entry(key).or_default().push(entity);
            }
        }

        let mut report = DuplicateReport::default();
        for (key, members) in groups {
            if members.len() < 2 {
                continue;
            }
            report.duplicate_groups += 1;

            let (with_link, without_link): (Vec<&Entity>, Vec<&Entity>) =
                members.iter().copied().partition(|e| linked.contains(&e.id));

            if !with_link.is_empty() && !without_link.is_empty() {
                let kept: Vec<String> = with_link.iter().map(|e| e.id.clone()).collect();
                for entity in without_link {
                    report.redundant.push(Redundant {
                        id: entity.id.clone(),
                        reason: RedundancyReason::NoDependentRecord,
                        key: key.clone(),
                        kept: kept.clone(),
                        subject: describe(entity),
                    });
                }
                continue;
            }

            let mut ordered = members;
            ordered.sort_by(|a, b| self.rank(a).cmp(&self.rank(b)).then_with(|| a.id.cmp(&b.id)));
            let kept = vec![ordered[0].id.clone()];
            for entity in &ordered[1..] {
                report.redundant.push(Redundant {
                    id: entity.id.clone(),
                    reason: RedundancyReason::OlderDuplicate,
                    key: key.clone(),
                    kept: kept.clone(),
                    subject: describe(entity),
                });
            }
        }
        report
    }

    /// Sort key where smaller ranks first
    fn rank(&self, entity: &Entity) -> std::cmp::Reverse<i64> {
        let ts = |field: &str| -> Option<DateTime<Utc>> { entity.get(field).and_then(parse_timestamp) };
        match self.tie_break {
            TieBreak::MostRecentlyUpdated => std::cmp::Reverse(
                ts("updatedAt")
                    .or_else(|| ts("createdAt"))
                    .map(|t| t.timestamp_millis())
                    .unwrap_or(i64::MIN),
            ),
            TieBreak::EarliestCreated => std::cmp::Reverse(
                ts("createdAt")
                    .map(|t| -t.timestamp_millis())
                    .unwrap_or(i64::MIN),
            ),
        }
    }
}

// ============================================================================
// Key Functions
// ============================================================================

/// Lowercased display name with whitespace collapsed
pub fn normalized_name(entity: &Entity) -> Option<String> {
    let name = UserView::from_entity(entity).full_name?;
    let normalized = name
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ");
    Some(normalized).filter(|n| !n.is_empty())
}

/// Lowercased email with digits removed from the local part
///
/// Catches numbered-suffix duplicates such as `erik1@x.com` / `erik2@x.com`.
pub fn email_stem(entity: &Entity) -> Option<String> {
    let email = entity.str_field("email")?.to_lowercase();
    let (local, domain) = email.rsplit_once('@')?;
    let stem: String = local.chars().filter(|c| !c.is_ascii_digit()).collect();
    if stem.is_empty() || domain.is_empty() {
        return None;
    }
    Some(format!("{}@{}", stem, domain))
}

/// Exact value of a string field
pub fn field_key(path: &'static str) -> KeyFn {
    Box::new(move |entity: &Entity| entity.str_field(path).map(str::to_string))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn user(id: &str, name: &str, email: &str, updated: &str) -> Entity {
        Entity::new(id)
            .with("name", json!(name))
            .with("email", json!(email))
            .with("role", json!("student"))
            .with("updatedAt", json!(updated))
    }

    #[test]
    fn test_numbered_email_duplicates_keep_linked_user() {
        let users = vec![
            user("u-1", "Erik Hansson", "student.erik1@x.com", "2024-05-01T00:00:00Z"),
            user("u-2", "Erik Hansson", "student.erik2@x.com", "2024-01-01T00:00:00Z"),
        ];
        let linked: HashSet<String> = ["u-2".to_string()].into_iter().collect();

        let report = DuplicateDetector::for_users().detect(&users, &linked);

        assert_eq!(report.duplicate_groups, 1);
        assert_eq!(report.redundant.len(), 1);
        assert_eq!(report.redundant[0].id, "u-1");
        assert_eq!(report.redundant[0].reason, RedundancyReason::NoDependentRecord);
        assert_eq!(report.redundant[0].kept, vec!["u-2"]);
    }

    #[test]
    fn test_all_unlinked_keeps_most_recent() {
        let users = vec![
            user("u-1", "Mia Berg", "mia@x.com", "2024-01-01T00:00:00Z"),
            user("u-2", "mia  berg", "MIA3@x.com", "2024-03-01T00:00:00Z"),
            user("u-3", "Mia Berg", "mia7@x.com", "2024-02-01T00:00:00Z"),
        ];

        let report = DuplicateDetector::for_users().detect(&users, &HashSet::new());

        let mut redundant: Vec<&str> = report.redundant.iter().map(|r| r.id.as_str()).collect();
        redundant.sort();
        assert_eq!(redundant, vec!["u-1", "u-3"]);
        assert!(report
            .redundant
            .iter()
            .all(|r| r.reason == RedundancyReason::OlderDuplicate && r.kept == vec!["u-2"]));
    }

    #[test]
    fn test_all_linked_group_keeps_one_linked_member() {
        let users = vec![
            user("u-1", "Lars Ek", "lars@x.com", "2024-01-01T00:00:00Z"),
            user("u-2", "Lars Ek", "lars2@x.com", "2024-06-01T00:00:00Z"),
        ];
        let linked: HashSet<String> = ["u-1".to_string(), "u-2".to_string()].into_iter().collect();

        let report = DuplicateDetector::for_users().detect(&users, &linked);
        assert_eq!(report.redundant.len(), 1);
        assert_eq!(report.redundant[0].id, "u-1");
    }

    #[test]
    fn test_empty_fields_never_group() {
        let users = vec![
            user("u-1", "", "", "2024-01-01T00:00:00Z"),
            user("u-2", "", "", "2024-02-01T00:00:00Z"),
            user("u-3", "Ana Lind", "", "2024-02-01T00:00:00Z"),
            user("u-4", "Ana Lind", "", "2024-03-01T00:00:00Z"),
        ];

        let report = DuplicateDetector::for_users().detect(&users, &HashSet::new());
        assert_eq!(report.duplicate_groups, 0);
        assert!(report.redundant.is_empty());
    }

    #[test]
    fn test_admin_never_redundant() {
        let admin = user("u-1", "Sam Roy", "sam@x.com", "2020-01-01T00:00:00Z").with("role", json!("admin"));
        let users = vec![admin, user("u-2", "Sam Roy", "sam2@x.com", "2024-01-01T00:00:00Z")];

        let report = DuplicateDetector::for_users().detect(&users, &HashSet::new());
        assert!(report.redundant.is_empty());
    }

    #[test]
    fn test_earliest_created_tie_break() {
        let older = Entity::new("p-1")
            .with("userId", json!("u-1"))
            .with("createdAt", json!("2023-01-01T00:00:00Z"));
        let newer = Entity::new("p-2")
            .with("userId", json!("u-1"))
            .with("createdAt", json!("2024-01-01T00:00:00Z"));

        let report = DuplicateDetector::for_profiles(HashSet::new())
            .with_tie_break(TieBreak::EarliestCreated)
            .detect(&[newer, older], &HashSet::new());

        assert_eq!(report.redundant.len(), 1);
        assert_eq!(report.redundant[0].id, "p-2");
    }

    #[test]
    fn test_admin_profiles_never_redundant() {
        let profile = |id: &str, owner: &str, kind: &str| {
            Entity::new(id)
                .with("userId", json!(owner))
                .with("type", json!(kind))
                .with("updatedAt", json!(format!("2024-0{}-01T00:00:00Z", &id[2..])))
        };
        let profiles = vec![
            profile("p-1", "u-admin", "admin"),
            profile("p-2", "u-admin", "admin"),
            profile("p-3", "u-ops", "student"),
            profile("p-4", "u-ops", "student"),
            profile("p-5", "u-7", "student"),
            profile("p-6", "u-7", "student"),
        ];
        let privileged_users: HashSet<String> = ["u-ops".to_string()].into_iter().collect();

        let report = DuplicateDetector::for_profiles(privileged_users).detect(&profiles, &HashSet::new());

        assert_eq!(report.duplicate_groups, 1);
        assert_eq!(report.redundant.len(), 1);
        assert_eq!(report.redundant[0].id, "p-5");
    }

    #[test]
    fn test_email_stem() {
        let entity = Entity::new("u").with("email", json!("Student.Erik12@X.com"));
        assert_eq!(email_stem(&entity).as_deref(), Some("student.erik@x.com"));

        let digits_only = Entity::new("u").with("email", json!("12345@x.com"));
        assert_eq!(email_stem(&digits_only), None);
    }

    #[test]
    fn test_operations_are_single_deletes() {
        let users = vec![
            user("u-1", "Erik Hansson", "erik1@x.com", "2024-01-01T00:00:00Z"),
            user("u-2", "Erik Hansson", "erik2@x.com", "2024-02-01T00:00:00Z"),
        ];
        let report = DuplicateDetector::for_users().detect(&users, &HashSet::new());
        let groups = report.to_operations(EntityType::Users);

        assert_eq!(groups.len(), 1);
        assert!(groups[0].is_destructive());
        assert_eq!(groups[0].operations[0].id, "u-1");
        assert!(groups[0].reason.contains("kept u-2"));
        assert_eq!(groups[0].subject.as_deref(), Some("Erik Hansson <erik1@x.com>"));
    }
}
