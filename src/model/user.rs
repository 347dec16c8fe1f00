//! User view

use chrono::{DateTime, Utc};

use super::parse_timestamp;
use crate::store::Entity;

/// Roles that reconciliation never removes
pub const PRIVILEGED_ROLES: &[&str] = &["admin"];

/// Whether a role or profile type tag names a privileged role
pub fn is_privileged_role(role: Option<&str>) -> bool {
    role.map(|role| PRIVILEGED_ROLES.iter().any(|p| p.eq_ignore_ascii_case(role)))
        .unwrap_or(false)
}

/// Read-only view of a `$users` entity
#[derive(Debug, Clone)]
pub struct UserView<'a> {
    pub id: &'a str,
    pub email: Option<&'a str>,
    pub role: Option<&'a str>,
    pub full_name: Option<String>,
    pub status: Option<&'a str>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl<'a> UserView<'a> {
    pub fn from_entity(entity: &'a Entity) -> Self {
        let full_name = match (entity.str_field("firstName"), entity.str_field("lastName")) {
            (Some(first), Some(last)) => Some(format!("{} {}", first, last)),
            (Some(only), None) | (None, Some(only)) => Some(only.to_string()),
            (None, None) => ["fullName", "name", "displayName"]
                .iter()
                .find_map(|key| entity.str_field(key))
                .map(str::to_string),
        };

        Self {
            id: entity.id.as_str(),
            email: entity.str_field("email"),
            role: entity.str_field("role"),
            full_name,
            status: entity.str_field("status"),
            created_at: entity.get("createdAt").and_then(parse_timestamp),
            updated_at: entity.get("updatedAt").and_then(parse_timestamp),
        }
    }

    pub fn is_privileged(&self) -> bool {
        is_privileged_role(self.role)
    }
}
