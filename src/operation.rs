//! Corrective operations produced by detectors and consumed by the executor

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::store::EntityType;

/// Kind of write applied to one entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// One write against one entity
///
/// `attrs` carries the full field set for creates and the fields to merge for
/// updates. Deletes carry nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub kind: OperationKind,
    pub entity_type: EntityType,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attrs: Option<Map<String, Value>>,
}

impl Operation {
    pub fn create(entity_type: EntityType, id: impl Into<String>, attrs: Map<String, Value>) -> Self {
        Self {
            kind: OperationKind::Create,
            entity_type,
            id: id.into(),
            attrs: Some(attrs),
        }
    }

    pub fn update(entity_type: EntityType, id: impl Into<String>, attrs: Map<String, Value>) -> Self {
        Self {
            kind: OperationKind::Update,
            entity_type,
            id: id.into(),
            attrs: Some(attrs),
        }
    }

    pub fn delete(entity_type: EntityType, id: impl Into<String>) -> Self {
        Self {
            kind: OperationKind::Delete,
            entity_type,
            id: id.into(),
            attrs: None,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.entity_type, self.id)
    }
}

/// Operations that must be committed in the same transaction
///
/// The executor never splits a group across chunks. A single-operation group
/// is the common case; the migrator emits two-operation groups.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationGroup {
    /// Why this group exists, shown in samples and failure logs
    pub reason: String,
    /// Identifying fields of the records touched (name, email, owner)
    pub subject: Option<String>,
    pub operations: Vec<Operation>,
}

impl OperationGroup {
    pub fn single(operation: Operation, reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            subject: None,
            operations: vec![operation],
        }
    }

    pub fn atomic(operations: Vec<Operation>, reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            subject: None,
            operations,
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        let subject = subject.into();
        self.subject = (!subject.is_empty()).then_some(subject);
        self
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn is_destructive(&self) -> bool {
        self.operations.iter().any(|op| op.kind == OperationKind::Delete)
    }

    /// `type/id` labels of every entity the group touches
    pub fn entity_ids(&self) -> Vec<String> {
        self.operations
            .iter()
            .map(|op| format!("{}/{}", op.entity_type, op.id))
            .collect()
    }

    /// One line for plan samples
    pub fn sample_line(&self) -> String {
        match &self.subject {
            Some(subject) => format!("{} {} ({})", self.entity_ids().join(" + "), subject, self.reason),
            None => format!("{} ({})", self.entity_ids().join(" + "), self.reason),
        }
    }
}
