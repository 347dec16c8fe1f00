//! Typed views over schema-free entities
//!
//! Entities come out of the store as loose attribute maps. Each detector reads
//! them through one of these views, so malformed shapes surface once, at the
//! parse boundary, as a [`TransformError`](crate::error::TransformError)
//! instead of leaking through every layer.

mod profile;
mod user;

pub use profile::{
    merge_back, split, ComprehensiveApplicationData, CoreProfileFields, ProfileView,
    COMPREHENSIVE_KEY, CORE_FIELDS,
};
pub use user::{is_privileged_role, UserView, PRIVILEGED_ROLES};

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde_json::Value;

use crate::store::Entity;

/// Parse a store timestamp: epoch milliseconds, RFC 3339, or a bare date
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|dt| Utc.from_utc_datetime(&dt))
        }
        _ => None,
    }
}

/// Identifying fields of an entity for plan samples
///
/// Name (top-level or under `data`), email and owning user, whichever exist.
pub fn describe(entity: &Entity) -> String {
    let name = UserView::from_entity(entity).full_name.or_else(|| {
        match (entity.str_field("data.firstName"), entity.str_field("data.lastName")) {
            (Some(first), Some(last)) => Some(format!("{} {}", first, last)),
            (Some(only), None) | (None, Some(only)) => Some(only.to_string()),
            (None, None) => None,
        }
    });

    let mut parts = Vec::new();
    parts.extend(name);
    if let Some(email) = entity.str_field("email") {
        parts.push(format!("<{}>", email));
    }
    if let Some(owner) = entity.str_field("userId") {
        parts.push(format!("user {}", owner));
    }
    parts.join(" ")
}

/// True when a field holds something other than null or blank text
pub fn is_present(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_timestamp_formats() {
        let from_ms = parse_timestamp(&json!(1_704_067_200_000i64)).unwrap();
        let from_rfc = parse_timestamp(&json!("2024-01-01T00:00:00Z")).unwrap();
        let from_date = parse_timestamp(&json!("2024-01-01")).unwrap();

        assert_eq!(from_ms, from_rfc);
        assert_eq!(from_rfc, from_date);
        assert!(parse_timestamp(&json!("yesterday")).is_none());
        assert!(parse_timestamp(&json!(null)).is_none());
    }

    #[test]
    fn test_describe_identifying_fields() {
        let user = Entity::new("u-1")
            .with("name", json!("Erik Hansson"))
            .with("email", json!("erik@x.com"));
        let profile = Entity::new("p-1")
            .with("userId", json!("u-9"))
            .with("data", json!({ "firstName": "Maja" }));

        assert_eq!(describe(&user), "Erik Hansson <erik@x.com>");
        assert_eq!(describe(&profile), "Maja user u-9");
        assert_eq!(describe(&Entity::new("x")), "");
    }

    #[test]
    fn test_is_present() {
        assert!(!is_present(None));
        assert!(!is_present(Some(&json!(null))));
        assert!(!is_present(Some(&json!("  "))));
        assert!(is_present(Some(&json!("2024-01-01"))));
        assert!(is_present(Some(&json!(0))));
    }
}
