//! Field consistency rules
//!
//! A rule inspects one entity and either accepts it, proposes a patch, or flags
//! it for human review. Rules never write: the [`ConsistencyFixer`] folds every
//! patch for an entity into a single update, applying rules in order against a
//! working copy so later rules see what earlier ones changed.
//!
//! Missing values are filled through pluggable strategies ([`DateStrategy`],
//! [`ReviewerStrategy`]) so the choice between deriving a value and deferring
//! to a person stays outside the rule itself.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::TransformError;
use crate::model::{is_present, parse_timestamp, ProfileView};
use crate::operation::{Operation, OperationGroup};
use crate::store::{Entity, EntityType};

/// Statuses that mean a review has concluded
pub const COMPLETED_STATUSES: &[&str] = &["approved", "rejected"];

/// Statuses that mean no review has concluded yet
pub const PENDING_STATUSES: &[&str] = &["pending", "pending_review", "submitted", "in_review", "draft"];

/// Actor names written by earlier tooling in place of a real reviewer
pub const PLACEHOLDER_ACTORS: &[&str] = &["system-migration", "Migration Script", "TBD"];

fn status_in(status: Option<&str>, set: &[&str]) -> bool {
    status
        .map(|s| set.iter().any(|candidate| candidate.eq_ignore_ascii_case(s)))
        .unwrap_or(false)
}

pub fn is_completed(status: Option<&str>) -> bool {
    status_in(status, COMPLETED_STATUSES)
}

pub fn is_pending(status: Option<&str>) -> bool {
    status_in(status, PENDING_STATUSES)
}

pub fn is_placeholder(actor: &str) -> bool {
    PLACEHOLDER_ACTORS
        .iter()
        .any(|p| p.eq_ignore_ascii_case(actor.trim()))
}

/// Seeded RNG so a re-run picks the same value for the same entity
fn seeded_rng(salt: &str, entity_id: &str) -> StdRng {
    let digest = Sha256::new()
        .chain_update(salt.as_bytes())
        .chain_update(b":")
        .chain_update(entity_id.as_bytes())
        .finalize();
    let mut seed = [0u8; 32];
    seed.copy_from_slice(&digest);
    StdRng::from_seed(seed)
}

// ============================================================================
// Strategies
// ============================================================================

/// Outcome of asking a strategy for a missing value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution<T> {
    Assign(T),
    /// Leave the field alone and surface the entity for review
    Flag(String),
}

/// Supplies a review timestamp for a completed record that lacks one
pub trait DateStrategy: Send + Sync {
    fn description(&self) -> &str;

    fn resolve(
        &self,
        entity_id: &str,
        created_at: Option<DateTime<Utc>>,
        updated_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Resolution<DateTime<Utc>>;
}

/// Pick a plausible instant between the record's creation and its last update
///
/// The upper bound is the last update (never later than now). The lower bound
/// is creation, pulled forward to at most `window` before the upper bound.
pub struct DeriveFromTimestamps {
    pub window: Duration,
}

impl Default for DeriveFromTimestamps {
    fn default() -> Self {
        Self {
            window: Duration::try_days(30).unwrap_or_default(),
        }
    }
}

impl DateStrategy for DeriveFromTimestamps {
    fn description(&self) -> &str {
        "derive from record timestamps"
    }

    fn resolve(
        &self,
        entity_id: &str,
        created_at: Option<DateTime<Utc>>,
        updated_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Resolution<DateTime<Utc>> {
        let upper = match (updated_at, created_at) {
            (Some(updated), _) => updated.min(now),
            (None, Some(created)) => created.min(now),
            (None, None) => return Resolution::Flag("no timestamps to derive a date from".into()),
        };
        let mut lower = created_at.unwrap_or(upper).min(upper);
        // A window reaching past the representable range leaves creation as the bound
        if let Some(floor) = upper.checked_sub_signed(self.window) {
            lower = lower.max(floor);
        }

        let span = (upper - lower).num_seconds().max(0);
        let offset = seeded_rng("review-date", entity_id).gen_range(0..=span);
        match Duration::try_seconds(offset).and_then(|delta| lower.checked_add_signed(delta)) {
            Some(at) => Resolution::Assign(at),
            None => Resolution::Flag("record timestamps are out of range".into()),
        }
    }
}

/// Never derive, always defer to a person
pub struct FlagForReview;

impl DateStrategy for FlagForReview {
    fn description(&self) -> &str {
        "flag for review"
    }

    fn resolve(
        &self,
        _entity_id: &str,
        _created_at: Option<DateTime<Utc>>,
        _updated_at: Option<DateTime<Utc>>,
        _now: DateTime<Utc>,
    ) -> Resolution<DateTime<Utc>> {
        Resolution::Flag("review date missing".into())
    }
}

/// Supplies a reviewer name in place of a placeholder actor
pub trait ReviewerStrategy: Send + Sync {
    fn description(&self) -> &str;

    fn resolve(&self, entity_id: &str) -> Resolution<String>;
}

/// Deterministic pick from a fixed roster of eligible reviewers
pub struct RosterAssignment {
    roster: Vec<String>,
}

impl RosterAssignment {
    pub fn new(roster: Vec<String>) -> Self {
        Self {
            roster: roster
                .into_iter()
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty() && !is_placeholder(name))
                .collect(),
        }
    }
}

impl ReviewerStrategy for RosterAssignment {
    fn description(&self) -> &str {
        "assign from reviewer roster"
    }

    fn resolve(&self, entity_id: &str) -> Resolution<String> {
        let mut rng = seeded_rng("reviewer", entity_id);
        match self.roster.choose(&mut rng) {
            Some(name) => Resolution::Assign(name.clone()),
            None => Resolution::Flag("reviewer roster is empty".into()),
        }
    }
}

impl ReviewerStrategy for FlagForReview {
    fn description(&self) -> &str {
        "flag for review"
    }

    fn resolve(&self, _entity_id: &str) -> Resolution<String> {
        Resolution::Flag("reviewer is a placeholder".into())
    }
}

// ============================================================================
// Rules
// ============================================================================

/// What a rule wants done about an entity
#[derive(Debug, Clone, PartialEq)]
pub enum Correction {
    /// Top-level attributes to merge into the entity
    Patch(Map<String, Value>),
    Flag(String),
}

pub trait ConsistencyRule: Send + Sync {
    fn name(&self) -> &'static str;

    fn entity_type(&self) -> EntityType;

    /// `Ok(None)` when the entity already satisfies the rule
    fn check(&self, entity: &Entity, now: DateTime<Utc>) -> Result<Option<Correction>, TransformError>;
}

/// `data` with one key replaced, as a top-level patch
fn patch_data(view: &ProfileView<'_>, key: &str, value: Value) -> Correction {
    let mut data = view.data.clone();
    data.insert(key.to_string(), value);
    let mut attrs = Map::new();
    attrs.insert("data".to_string(), Value::Object(data));
    Correction::Patch(attrs)
}

fn date_string(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d").to_string()
}

/// Profiles attributed to a placeholder actor get a real reviewer
pub struct PlaceholderReviewer {
    strategy: Box<dyn ReviewerStrategy>,
}

impl PlaceholderReviewer {
    pub fn new(strategy: Box<dyn ReviewerStrategy>) -> Self {
        Self { strategy }
    }
}

impl ConsistencyRule for PlaceholderReviewer {
    fn name(&self) -> &'static str {
        "placeholder-reviewer"
    }

    fn entity_type(&self) -> EntityType {
        EntityType::Profiles
    }

    fn check(&self, entity: &Entity, _now: DateTime<Utc>) -> Result<Option<Correction>, TransformError> {
        let view = ProfileView::from_entity(entity)?;
        let Some(actor) = view.data_str("approved_by") else {
            return Ok(None);
        };
        if !is_placeholder(actor) {
            return Ok(None);
        }

        Ok(Some(match self.strategy.resolve(view.id) {
            Resolution::Assign(name) => patch_data(&view, "approved_by", Value::String(name)),
            Resolution::Flag(reason) => Correction::Flag(format!("approved_by {:?}: {}", actor, reason)),
        }))
    }
}

/// Completed profiles with a real reviewer must carry an approval date
pub struct ApprovalDateRequired {
    strategy: Box<dyn DateStrategy>,
}

impl ApprovalDateRequired {
    pub fn new(strategy: Box<dyn DateStrategy>) -> Self {
        Self { strategy }
    }
}

impl ConsistencyRule for ApprovalDateRequired {
    fn name(&self) -> &'static str {
        "approval-date-required"
    }

    fn entity_type(&self) -> EntityType {
        EntityType::Profiles
    }

    fn check(&self, entity: &Entity, now: DateTime<Utc>) -> Result<Option<Correction>, TransformError> {
        let view = ProfileView::from_entity(entity)?;
        if !is_completed(view.data_str("applicationStatus")) {
            return Ok(None);
        }
        match view.data_str("approved_by") {
            Some(actor) if !is_placeholder(actor) => {}
            _ => return Ok(None),
        }
        if is_present(view.data.get("approved_on")) {
            return Ok(None);
        }

        let created_at = checked_timestamp(entity, EntityType::Profiles, "createdAt")?;
        let updated_at = checked_timestamp(entity, EntityType::Profiles, "updatedAt")?;

        Ok(Some(match self.strategy.resolve(view.id, created_at, updated_at, now) {
            Resolution::Assign(at) => patch_data(&view, "approved_on", Value::String(date_string(at))),
            Resolution::Flag(reason) => Correction::Flag(reason),
        }))
    }
}

/// A timestamp that is either absent or parseable
fn checked_timestamp(
    entity: &Entity,
    entity_type: EntityType,
    field: &str,
) -> Result<Option<DateTime<Utc>>, TransformError> {
    match entity.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => parse_timestamp(value).map(Some).ok_or_else(|| {
            TransformError::new(entity_type, entity.id.clone(), format!("{} is not a timestamp: {}", field, value))
        }),
    }
}

/// Profiles still awaiting review must not carry an approval date
pub struct StaleApprovalDate;

impl ConsistencyRule for StaleApprovalDate {
    fn name(&self) -> &'static str {
        "stale-approval-date"
    }

    fn entity_type(&self) -> EntityType {
        EntityType::Profiles
    }

    fn check(&self, entity: &Entity, _now: DateTime<Utc>) -> Result<Option<Correction>, TransformError> {
        let view = ProfileView::from_entity(entity)?;
        if !is_pending(view.data_str("applicationStatus")) || !is_present(view.data.get("approved_on")) {
            return Ok(None);
        }
        Ok(Some(patch_data(&view, "approved_on", Value::Null)))
    }
}

/// Completed change-queue items need a real reviewer and a review time
///
/// Placeholder reviewers go through the reviewer strategy. Items with no
/// reviewer at all are flagged, and no review time is derived for them.
pub struct ReviewCompleteness {
    dates: Box<dyn DateStrategy>,
    reviewers: Box<dyn ReviewerStrategy>,
}

impl ReviewCompleteness {
    pub fn new(dates: Box<dyn DateStrategy>, reviewers: Box<dyn ReviewerStrategy>) -> Self {
        Self { dates, reviewers }
    }
}

impl ConsistencyRule for ReviewCompleteness {
    fn name(&self) -> &'static str {
        "review-completeness"
    }

    fn entity_type(&self) -> EntityType {
        EntityType::ChangeQueue
    }

    fn check(&self, entity: &Entity, now: DateTime<Utc>) -> Result<Option<Correction>, TransformError> {
        if !is_completed(entity.str_field("status")) {
            return Ok(None);
        }

        // Only a placeholder actor is replaced; a missing one is never invented
        let mut attrs = Map::new();
        match entity.str_field("reviewedBy") {
            None => return Ok(Some(Correction::Flag("reviewedBy missing".into()))),
            Some(actor) if is_placeholder(actor) => match self.reviewers.resolve(&entity.id) {
                Resolution::Assign(name) => {
                    attrs.insert("reviewedBy".to_string(), Value::String(name));
                }
                Resolution::Flag(reason) => {
                    return Ok(Some(Correction::Flag(format!("reviewedBy {:?}: {}", actor, reason))))
                }
            },
            Some(_) => {}
        }

        if !is_present(entity.get("reviewedAt")) {
            let created_at = checked_timestamp(entity, EntityType::ChangeQueue, "createdAt")?;
            let updated_at = checked_timestamp(entity, EntityType::ChangeQueue, "updatedAt")?;
            match self.dates.resolve(&entity.id, created_at, updated_at, now) {
                Resolution::Assign(at) => {
                    attrs.insert(
                        "reviewedAt".to_string(),
                        Value::String(at.to_rfc3339_opts(SecondsFormat::Millis, true)),
                    );
                }
                Resolution::Flag(reason) => return Ok(Some(Correction::Flag(reason))),
            }
        }

        Ok((!attrs.is_empty()).then_some(Correction::Patch(attrs)))
    }
}

/// Pending change-queue items must not look reviewed
pub struct PendingNotReviewed;

impl ConsistencyRule for PendingNotReviewed {
    fn name(&self) -> &'static str {
        "pending-not-reviewed"
    }

    fn entity_type(&self) -> EntityType {
        EntityType::ChangeQueue
    }

    fn check(&self, entity: &Entity, _now: DateTime<Utc>) -> Result<Option<Correction>, TransformError> {
        if !is_pending(entity.str_field("status")) {
            return Ok(None);
        }
        let mut attrs = Map::new();
        for field in ["reviewedBy", "reviewedAt"] {
            if is_present(entity.get(field)) {
                attrs.insert(field.to_string(), Value::Null);
            }
        }
        Ok((!attrs.is_empty()).then_some(Correction::Patch(attrs)))
    }
}

// ============================================================================
// Fixer
// ============================================================================

/// One combined update for an entity that broke at least one rule
#[derive(Debug, Clone, PartialEq)]
pub struct EntityPatch {
    pub entity_type: EntityType,
    pub id: String,
    pub rules: Vec<&'static str>,
    pub attrs: Map<String, Value>,
}

impl EntityPatch {
    pub fn to_operation_group(&self) -> OperationGroup {
        OperationGroup::single(
            Operation::update(self.entity_type, self.id.clone(), self.attrs.clone()),
            self.rules.join(", "),
        )
    }
}

/// An entity left for human review
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flagged {
    pub entity_type: EntityType,
    pub id: String,
    pub rule: &'static str,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct FixerOutcome {
    pub patches: Vec<EntityPatch>,
    pub flagged: Vec<Flagged>,
    pub errors: Vec<TransformError>,
}

impl FixerOutcome {
    pub fn to_operations(&self) -> Vec<OperationGroup> {
        self.patches.iter().map(EntityPatch::to_operation_group).collect()
    }
}

#[derive(Default)]
pub struct ConsistencyFixer {
    rules: Vec<Box<dyn ConsistencyRule>>,
}

impl ConsistencyFixer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rule(mut self, rule: impl ConsistencyRule + 'static) -> Self {
        self.rules.push(Box::new(rule));
        self
    }

    /// Profile approval rules; reviewer replacement runs before date derivation
    pub fn approvals(reviewers: Box<dyn ReviewerStrategy>, dates: Box<dyn DateStrategy>) -> Self {
        debug!(reviewers = reviewers.description(), dates = dates.description(), "Approval strategies");
        Self::new()
            .with_rule(PlaceholderReviewer::new(reviewers))
            .with_rule(ApprovalDateRequired::new(dates))
            .with_rule(StaleApprovalDate)
    }

    pub fn change_queue(reviewers: Box<dyn ReviewerStrategy>, dates: Box<dyn DateStrategy>) -> Self {
        debug!(reviewers = reviewers.description(), dates = dates.description(), "Change-queue strategies");
        Self::new()
            .with_rule(ReviewCompleteness::new(dates, reviewers))
            .with_rule(PendingNotReviewed)
    }

    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    /// Run every rule for `entity_type` over `entities`
    ///
    /// A transform error discards any patches already gathered for that entity.
    pub fn evaluate(&self, entity_type: EntityType, entities: &[Entity], now: DateTime<Utc>) -> FixerOutcome {
        let rules: Vec<&dyn ConsistencyRule> = self
            .rules
            .iter()
            .filter(|r| r.entity_type() == entity_type)
            .map(|r| r.as_ref())
            .collect();

        let mut outcome = FixerOutcome::default();
        'entities: for entity in entities {
            let mut working = entity.clone();
            let mut changed = BTreeSet::new();
            let mut applied = Vec::new();

            for rule in &rules {
                match rule.check(&working, now) {
                    Ok(None) => {}
                    Ok(Some(Correction::Patch(attrs))) => {
                        for (key, value) in attrs {
                            changed.insert(key.clone());
                            working.attrs.insert(key, value);
                        }
                        applied.push(rule.name());
                    }
                    Ok(Some(Correction::Flag(reason))) => outcome.flagged.push(Flagged {
                        entity_type,
                        id: entity.id.clone(),
                        rule: rule.name(),
                        reason,
                    }),
                    Err(err) => {
                        outcome.errors.push(err);
                        continue 'entities;
                    }
                }
            }

            if applied.is_empty() {
                continue;
            }
            let attrs = changed
                .into_iter()
                .filter_map(|key| working.attrs.get(&key).cloned().map(|value| (key, value)))
                .collect();
            outcome.patches.push(EntityPatch {
                entity_type,
                id: entity.id.clone(),
                rules: applied,
                attrs,
            });
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn roster() -> Box<dyn ReviewerStrategy> {
        Box::new(RosterAssignment::new(vec![
            "Sarah Mitchell".into(),
            "David Okafor".into(),
            "Lena Berg".into(),
        ]))
    }

    fn approvals() -> ConsistencyFixer {
        ConsistencyFixer::approvals(roster(), Box::new(DeriveFromTimestamps::default()))
    }

    fn profile(id: &str, data: Value) -> Entity {
        Entity::new(id)
            .with("createdAt", json!("2024-03-01T09:00:00Z"))
            .with("updatedAt", json!("2024-03-10T17:30:00Z"))
            .with("data", data)
    }

    fn patched_data(outcome: &FixerOutcome, index: usize) -> &Map<String, Value> {
        outcome.patches[index].attrs["data"].as_object().unwrap()
    }

    #[test]
    fn test_approved_without_date_gets_derived_date() {
        let entity = profile(
            "p-1",
            json!({ "applicationStatus": "approved", "approved_by": "Sarah Mitchell", "firstName": "Erik" }),
        );

        let outcome = approvals().evaluate(EntityType::Profiles, &[entity], now());

        assert_eq!(outcome.patches.len(), 1);
        assert_eq!(outcome.patches[0].rules, vec!["approval-date-required"]);
        let data = patched_data(&outcome, 0);
        assert_eq!(data["firstName"], json!("Erik"));

        let derived = NaiveDate::parse_from_str(data["approved_on"].as_str().unwrap(), "%Y-%m-%d").unwrap();
        assert!(derived >= NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
        assert!(derived <= NaiveDate::from_ymd_opt(2024, 3, 10).unwrap());
    }

    #[test]
    fn test_derived_date_is_stable_across_runs() {
        let entity = profile("p-1", json!({ "applicationStatus": "approved", "approved_by": "Sarah Mitchell" }));

        let first = approvals().evaluate(EntityType::Profiles, &[entity.clone()], now());
        let second = approvals().evaluate(EntityType::Profiles, &[entity], now());

        assert_eq!(first.patches, second.patches);
    }

    #[test]
    fn test_pending_with_date_is_cleared() {
        let entity = profile(
            "p-2",
            json!({ "applicationStatus": "pending", "approved_on": "2024-01-15" }),
        );

        let outcome = approvals().evaluate(EntityType::Profiles, &[entity], now());

        assert_eq!(outcome.patches.len(), 1);
        assert_eq!(patched_data(&outcome, 0)["approved_on"], Value::Null);
        assert_eq!(outcome.patches[0].rules, vec!["stale-approval-date"]);
    }

    #[test]
    fn test_placeholder_reviewer_replaced_then_date_derived() {
        let entity = profile(
            "p-3",
            json!({ "applicationStatus": "rejected", "approved_by": "system-migration" }),
        );

        let outcome = approvals().evaluate(EntityType::Profiles, &[entity], now());

        assert_eq!(outcome.patches.len(), 1);
        assert_eq!(
            outcome.patches[0].rules,
            vec!["placeholder-reviewer", "approval-date-required"]
        );
        let data = patched_data(&outcome, 0);
        let reviewer = data["approved_by"].as_str().unwrap();
        assert!(["Sarah Mitchell", "David Okafor", "Lena Berg"].contains(&reviewer));
        assert!(data["approved_on"].is_string());
    }

    #[test]
    fn test_patched_entity_satisfies_every_rule() {
        let entity = profile(
            "p-4",
            json!({ "applicationStatus": "approved", "approved_by": "TBD" }),
        );
        let fixer = approvals();

        let outcome = fixer.evaluate(EntityType::Profiles, &[entity.clone()], now());
        let mut fixed = entity;
        for (key, value) in outcome.patches[0].attrs.clone() {
            fixed.attrs.insert(key, value);
        }

        let again = fixer.evaluate(EntityType::Profiles, &[fixed], now());
        assert!(again.patches.is_empty());
        assert!(again.flagged.is_empty());
    }

    #[test]
    fn test_flag_strategy_leaves_entity_untouched() {
        let fixer = ConsistencyFixer::approvals(Box::new(FlagForReview), Box::new(FlagForReview));
        let entities = vec![
            profile("p-5", json!({ "applicationStatus": "approved", "approved_by": "TBD" })),
            profile("p-6", json!({ "applicationStatus": "approved", "approved_by": "Lena Berg" })),
        ];

        let outcome = fixer.evaluate(EntityType::Profiles, &entities, now());

        assert!(outcome.patches.is_empty());
        assert_eq!(outcome.flagged.len(), 2);
        assert_eq!(outcome.flagged[0].rule, "placeholder-reviewer");
        assert_eq!(outcome.flagged[1].rule, "approval-date-required");
    }

    #[test]
    fn test_unparseable_timestamp_is_transform_error() {
        let entity = Entity::new("p-7")
            .with("createdAt", json!("last spring"))
            .with("data", json!({ "applicationStatus": "approved", "approved_by": "Lena Berg" }));

        let outcome = approvals().evaluate(EntityType::Profiles, &[entity], now());

        assert!(outcome.patches.is_empty());
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].entity_id, "p-7");
    }

    #[test]
    fn test_derived_date_never_in_future() {
        let strategy = DeriveFromTimestamps::default();
        let created = now() - Duration::days(2);
        let updated = now() + Duration::days(5);

        match strategy.resolve("p-8", Some(created), Some(updated), now()) {
            Resolution::Assign(at) => {
                assert!(at <= now());
                assert!(at >= created);
            }
            Resolution::Flag(reason) => panic!("unexpected flag: {}", reason),
        }
    }

    #[test]
    fn test_timestamps_at_range_limit_do_not_overflow() {
        let strategy = DeriveFromTimestamps::default();
        let earliest = DateTime::<Utc>::MIN_UTC;

        match strategy.resolve("p-9", Some(earliest), Some(earliest), now()) {
            Resolution::Assign(at) => assert_eq!(at, earliest),
            Resolution::Flag(reason) => panic!("unexpected flag: {}", reason),
        }
    }

    #[test]
    fn test_oversized_window_falls_back_to_creation() {
        let strategy = DeriveFromTimestamps {
            window: Duration::try_days(1_000_000_000).unwrap(),
        };
        let created = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();

        match strategy.resolve("p-10", Some(created), Some(now()), now()) {
            Resolution::Assign(at) => {
                assert!(at >= created);
                assert!(at <= now());
            }
            Resolution::Flag(reason) => panic!("unexpected flag: {}", reason),
        }
    }

    #[test]
    fn test_epoch_millis_near_lower_bound_is_not_fatal() {
        let earliest = DateTime::<Utc>::MIN_UTC.timestamp_millis();
        let entity = Entity::new("p-11")
            .with("createdAt", json!(earliest))
            .with("updatedAt", json!(earliest))
            .with("data", json!({ "applicationStatus": "approved", "approved_by": "Lena Berg" }));

        let outcome = approvals().evaluate(EntityType::Profiles, &[entity], now());

        assert_eq!(outcome.patches.len() + outcome.flagged.len() + outcome.errors.len(), 1);
    }

    #[test]
    fn test_change_queue_rules() {
        let fixer = ConsistencyFixer::change_queue(roster(), Box::new(DeriveFromTimestamps::default()));
        let items = vec![
            Entity::new("cq-1")
                .with("status", json!("approved"))
                .with("reviewedBy", json!("Sarah Mitchell"))
                .with("createdAt", json!("2024-05-01T08:00:00Z"))
                .with("updatedAt", json!("2024-05-02T08:00:00Z")),
            Entity::new("cq-2")
                .with("status", json!("pending"))
                .with("reviewedBy", json!("Lena Berg"))
                .with("reviewedAt", json!("2024-05-03T08:00:00Z")),
            Entity::new("cq-3")
                .with("status", json!("rejected"))
                .with("reviewedBy", json!("Lena Berg"))
                .with("reviewedAt", json!("2024-05-03T08:00:00Z")),
        ];

        let outcome = fixer.evaluate(EntityType::ChangeQueue, &items, now());

        assert_eq!(outcome.patches.len(), 2);
        assert_eq!(outcome.patches[0].id, "cq-1");
        let reviewed_at = parse_timestamp(&outcome.patches[0].attrs["reviewedAt"]).unwrap();
        assert!(reviewed_at >= Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap());
        assert!(reviewed_at <= Utc.with_ymd_and_hms(2024, 5, 2, 8, 0, 0).unwrap());

        assert_eq!(outcome.patches[1].id, "cq-2");
        assert_eq!(outcome.patches[1].attrs["reviewedBy"], Value::Null);
        assert_eq!(outcome.patches[1].attrs["reviewedAt"], Value::Null);
    }

    #[test]
    fn test_completed_item_without_reviewer_is_flagged() {
        let fixer = ConsistencyFixer::change_queue(roster(), Box::new(DeriveFromTimestamps::default()));
        let items = vec![
            Entity::new("cq-4")
                .with("status", json!("approved"))
                .with("createdAt", json!("2024-05-01T08:00:00Z"))
                .with("updatedAt", json!("2024-05-02T08:00:00Z")),
            Entity::new("cq-5")
                .with("status", json!("rejected"))
                .with("reviewedBy", json!("Migration Script"))
                .with("createdAt", json!("2024-05-01T08:00:00Z"))
                .with("updatedAt", json!("2024-05-02T08:00:00Z")),
        ];

        let outcome = fixer.evaluate(EntityType::ChangeQueue, &items, now());

        assert_eq!(outcome.flagged.len(), 1);
        assert_eq!(outcome.flagged[0].id, "cq-4");
        assert_eq!(outcome.flagged[0].reason, "reviewedBy missing");

        assert_eq!(outcome.patches.len(), 1);
        assert_eq!(outcome.patches[0].id, "cq-5");
        let reviewer = outcome.patches[0].attrs["reviewedBy"].as_str().unwrap();
        assert!(["Sarah Mitchell", "David Okafor", "Lena Berg"].contains(&reviewer));
        assert!(outcome.patches[0].attrs["reviewedAt"].is_string());
    }

    #[test]
    fn test_rules_only_see_their_entity_type() {
        let entity = Entity::new("u-1").with("status", json!("pending")).with("reviewedBy", json!("x"));
        let outcome = approvals().evaluate(EntityType::Users, &[entity], now());
        assert!(outcome.patches.is_empty());
    }
}
