//! Audit log records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::OutboxError;

/// A retention-governed audit trail entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    /// Unique entry identifier.
    pub id: Uuid,
    /// Who performed the action (account or service identifier).
    pub actor: String,
    /// What was done, e.g. `patient.update`.
    pub action: String,
    /// Kind of resource affected.
    pub resource_type: String,
    /// Identifier of the affected resource.
    pub resource_id: String,
    /// Free-form structured context.
    pub metadata: serde_json::Value,
    /// When the action happened.
    pub created_at: DateTime<Utc>,
}

impl AuditLogEntry {
    /// Builds a new entry stamped at `now`.
    ///
    /// # Errors
    ///
    /// Returns `OutboxError::Validation` if `actor` or `action` is blank.
    pub fn new(
        actor: impl Into<String>,
        action: impl Into<String>,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
        metadata: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<Self, OutboxError> {
        let actor = actor.into();
        let action = action.into();
        if actor.trim().is_empty() {
            return Err(OutboxError::Validation("actor must not be blank".into()));
        }
        if action.trim().is_empty() {
            return Err(OutboxError::Validation("action must not be blank".into()));
        }
        Ok(Self {
            id: Uuid::now_v7(),
            actor,
            action,
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
            metadata,
            created_at: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_new_audit_entry_requires_actor_and_action() {
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 9, 30, 0).unwrap();

        assert!(AuditLogEntry::new("", "patient.update", "patient", "p-1", serde_json::Value::Null, now).is_err());
        assert!(AuditLogEntry::new("acct-1", " ", "patient", "p-1", serde_json::Value::Null, now).is_err());

        let entry = AuditLogEntry::new(
            "acct-1",
            "patient.update",
            "patient",
            "p-1",
            serde_json::json!({"field": "phone"}),
            now,
        )
        .unwrap();
        assert_eq!(entry.created_at, now);
        assert_eq!(entry.metadata["field"], "phone");
    }
}
