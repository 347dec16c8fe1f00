//! Profile view and the core / comprehensive split of its embedded document

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use super::parse_timestamp;
use crate::error::TransformError;
use crate::store::{Entity, EntityType};

/// Key of the nested application document inside `profile.data`
pub const COMPREHENSIVE_KEY: &str = "comprehensive_application_data";

/// Fields `profile.data` keeps after normalization
pub const CORE_FIELDS: &[&str] = &[
    "firstName",
    "lastName",
    "name",
    "email",
    "phone",
    "dateOfBirth",
    "gender",
    "country",
    "city",
    "schoolName",
    "programType",
    "programYear",
    "profilePhoto",
    "status",
    "applicationStatus",
    "approved_by",
    "approved_on",
];

/// Read-only view of a `profiles` entity
#[derive(Debug, Clone)]
pub struct ProfileView<'a> {
    pub id: &'a str,
    pub user_id: Option<&'a str>,
    pub profile_type: Option<&'a str>,
    pub data: Map<String, Value>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl<'a> ProfileView<'a> {
    /// Fails when `data` is present but not an object
    pub fn from_entity(entity: &'a Entity) -> Result<Self, TransformError> {
        let data = match entity.get("data") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map.clone(),
            Some(other) => {
                return Err(TransformError::new(
                    EntityType::Profiles,
                    entity.id.clone(),
                    format!("data is {} instead of an object", json_kind(other)),
                ))
            }
        };

        Ok(Self {
            id: entity.id.as_str(),
            user_id: entity.str_field("userId"),
            profile_type: entity.str_field("type"),
            data,
            created_at: entity.get("createdAt").and_then(parse_timestamp),
            updated_at: entity.get("updatedAt").and_then(parse_timestamp),
        })
    }

    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn has_comprehensive_data(&self) -> bool {
        matches!(self.data.get(COMPREHENSIVE_KEY), Some(v) if !v.is_null())
    }
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ============================================================================
// Split / Merge
// ============================================================================

/// The allow-listed subset of `profile.data`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CoreProfileFields(Map<String, Value>);

impl CoreProfileFields {
    /// Keep only allow-listed keys of `data`
    pub fn from_data(data: &Map<String, Value>) -> Self {
        Self(
            data.iter()
                .filter(|(key, _)| CORE_FIELDS.contains(&key.as_str()))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
        )
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    /// Keys of `data` that normalization drops
    pub fn dropped_keys(data: &Map<String, Value>) -> Vec<String> {
        data.keys()
            .filter(|key| !CORE_FIELDS.contains(&key.as_str()))
            .cloned()
            .collect()
    }
}

/// The nested application document, carried verbatim
#[derive(Debug, Clone, PartialEq)]
pub struct ComprehensiveApplicationData(Value);

impl ComprehensiveApplicationData {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// Pull the sub-document out of a profile's `data`, if present and non-null
    pub fn extract(data: &Map<String, Value>) -> Option<Self> {
        data.get(COMPREHENSIVE_KEY)
            .filter(|v| !v.is_null())
            .cloned()
            .map(Self)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    /// Serialized size in bytes
    pub fn byte_size(&self) -> usize {
        serde_json::to_vec(&self.0).map(|v| v.len()).unwrap_or(0)
    }

    /// Top-level sections present (parents, address, interview notes, ...)
    pub fn sections(&self) -> Vec<&str> {
        self.0
            .as_object()
            .map(|m| m.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }
}

/// Split `data` into its core fields and the nested sub-document
pub fn split(data: &Map<String, Value>) -> (CoreProfileFields, Option<ComprehensiveApplicationData>) {
    (
        CoreProfileFields::from_data(data),
        ComprehensiveApplicationData::extract(data),
    )
}

/// Recombine core fields and a sub-document into one embedded document
pub fn merge_back(core: &CoreProfileFields, sub: &ComprehensiveApplicationData) -> Map<String, Value> {
    let mut data = core.as_map().clone();
    data.insert(COMPREHENSIVE_KEY.to_string(), sub.as_value().clone());
    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_data() -> Map<String, Value> {
        json!({
            "firstName": "Erik",
            "country": "Sweden",
            "applicationStatus": "submitted",
            "legacyScore": 7,
            COMPREHENSIVE_KEY: {
                "parents": [{ "name": "Anna Hansson" }],
                "address": { "city": "Uppsala" },
                "interviewNotes": "Calm, articulate",
                "personalityAssessment": { "openness": 0.8 }
            }
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    #[test]
    fn test_split_keeps_only_core_fields() {
        let (core, sub) = split(&sample_data());

        assert_eq!(
            core.as_map().keys().cloned().collect::<Vec<_>>(),
            vec!["applicationStatus", "country", "firstName"]
        );
        let sub = sub.unwrap();
        assert_eq!(sub.sections().len(), 4);
        assert!(sub.byte_size() > 0);
        assert_eq!(
            CoreProfileFields::dropped_keys(&sample_data()),
            vec![COMPREHENSIVE_KEY.to_string(), "legacyScore".to_string()]
        );
    }

    #[test]
    fn test_extract_of_merge_back_is_identity() {
        let (core, sub) = split(&sample_data());
        let sub = sub.unwrap();

        let merged = merge_back(&core, &sub);
        assert_eq!(ComprehensiveApplicationData::extract(&merged), Some(sub.clone()));

        let (core_again, _) = split(&merged);
        assert_eq!(core_again, core);
    }

    #[test]
    fn test_null_subdocument_counts_as_absent() {
        let entity = Entity::new("p-1").with("data", json!({ COMPREHENSIVE_KEY: null }));
        let view = ProfileView::from_entity(&entity).unwrap();
        assert!(!view.has_comprehensive_data());
    }

    #[test]
    fn test_non_object_data_is_a_transform_error() {
        let entity = Entity::new("p-1").with("data", json!("{\"firstName\":\"Erik\"}"));
        let err = ProfileView::from_entity(&entity).unwrap_err();
        assert_eq!(err.entity_id, "p-1");
        assert!(err.message.contains("a string"));
    }
}
