//! Onboarding records, payloads, and the shapes handed back to callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use uuid::Uuid;

use crate::error::StateError;

use super::state::OnboardingState;

/// Top-level payload keys that are copied onto the history row for audit.
pub const DRIVE_TOKEN_FIELDS: [&str; 3] =
    ["drive_auth_status", "drive_access_token", "drive_refresh_token"];

/// Reason recorded for changes arriving through the notification channel.
pub const NOTIFICATION_REASON: &str = "State change notification";

/// A user's current position in the flow, as returned to callers.
///
/// `current_state` is carried verbatim from the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub current_state: String,
    pub state_metadata: Value,
}

impl StateSnapshot {
    /// The `VISITOR` state returned when there is no user, or the lookup failed.
    pub fn sentinel() -> Self {
        let allowed: Vec<&str> = OnboardingState::Visitor
            .allowed_transitions()
            .iter()
            .map(OnboardingState::as_str)
            .collect();
        Self {
            current_state: OnboardingState::Visitor.to_string(),
            state_metadata: json!({ "allowed_transitions": allowed }),
        }
    }

    pub fn is_sentinel(&self) -> bool {
        *self == Self::sentinel()
    }
}

/// Data supplied with a guarded transition.
///
/// `state_metadata` becomes the user's new metadata wholesale. Any other
/// top-level keys count toward required fields and, for drive tokens, are
/// denormalized onto the history row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransitionPayload {
    #[serde(default)]
    pub state_metadata: Map<String, Value>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl TransitionPayload {
    pub fn new(state_metadata: Map<String, Value>) -> Self {
        Self {
            state_metadata,
            fields: Map::new(),
        }
    }

    /// Build from a JSON value; a non-object metadata value is rejected.
    pub fn from_metadata(metadata: Value) -> Option<Self> {
        match metadata {
            Value::Object(map) => Some(Self::new(map)),
            Value::Null => Some(Self::default()),
            _ => None,
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn metadata_value(&self) -> Value {
        Value::Object(self.state_metadata.clone())
    }

    /// Every entry of `required` that this payload does not satisfy, in order.
    ///
    /// A dotted name is a path into `state_metadata`; a plain name may sit at
    /// the top level or inside `state_metadata`.
    pub fn missing_fields(&self, required: &[&str]) -> Vec<String> {
        required
            .iter()
            .filter(|field| !self.has_field(field))
            .map(|field| field.to_string())
            .collect()
    }

    fn has_field(&self, field: &str) -> bool {
        if field.contains('.') {
            let mut parts = field.split('.');
            let Some(first) = parts.next() else {
                return false;
            };
            let mut value = match self.state_metadata.get(first) {
                Some(v) => v,
                None => return false,
            };
            for part in parts {
                match value.as_object().and_then(|obj| obj.get(part)) {
                    Some(v) => value = v,
                    None => return false,
                }
            }
            true
        } else {
            self.state_metadata.contains_key(field) || self.fields.contains_key(field)
        }
    }

    /// A top-level field rendered as text for the history row.
    pub fn audit_field(&self, key: &str) -> Option<String> {
        match self.fields.get(key)? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}

/// A partial update delivered through the notification channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_metadata: Option<Value>,
}

impl StateUpdate {
    pub fn is_empty(&self) -> bool {
        self.current_state.is_none() && self.state_metadata.is_none()
    }
}

/// A row of the `users` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    /// Internal record id.
    pub id: Uuid,
    pub auth_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub current_state: String,
    pub state_metadata: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Identity fields for a user row created on first sign-in.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub auth_id: String,
    pub email: String,
    pub name: Option<String>,
}

/// An immutable row of `user_state_history`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateHistoryEntry {
    pub id: Uuid,
    pub auth_id: String,
    pub internal_user_id: Uuid,
    pub from_state: String,
    pub to_state: String,
    pub transition_reason: String,
    pub metadata: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drive_auth_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drive_access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drive_refresh_token: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl StateHistoryEntry {
    pub fn new(
        user: &UserRecord,
        from_state: impl Into<String>,
        to_state: impl Into<String>,
        reason: impl Into<String>,
        metadata: Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            auth_id: user.auth_id.clone(),
            internal_user_id: user.id,
            from_state: from_state.into(),
            to_state: to_state.into(),
            transition_reason: reason.into(),
            metadata,
            drive_auth_status: None,
            drive_access_token: None,
            drive_refresh_token: None,
            created_at: Utc::now(),
        }
    }

    /// Copy any drive-token fields present on the payload.
    pub fn with_drive_fields(mut self, payload: &TransitionPayload) -> Self {
        let [status, access, refresh] = DRIVE_TOKEN_FIELDS;
        self.drive_auth_status = payload.audit_field(status);
        self.drive_access_token = payload.audit_field(access);
        self.drive_refresh_token = payload.audit_field(refresh);
        self
    }
}

/// Result of a successful guarded transition.
#[derive(Debug, Clone, Serialize)]
pub struct TransitionOutcome {
    pub message: String,
    pub from_state: String,
    pub to_state: OnboardingState,
}

/// The `{success, message}` / `{success, error}` body handed to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransitionResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&Result<TransitionOutcome, StateError>> for TransitionResponse {
    fn from(result: &Result<TransitionOutcome, StateError>) -> Self {
        match result {
            Ok(outcome) => Self {
                success: true,
                message: Some(outcome.message.clone()),
                error: None,
            },
            Err(e) => Self {
                success: false,
                message: None,
                error: Some(e.to_string()),
            },
        }
    }
}

/// Claims carried by a verified session token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionClaims {
    pub auth_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(value: Value) -> TransitionPayload {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn sentinel_shape() {
        let sentinel = StateSnapshot::sentinel();
        assert_eq!(sentinel.current_state, "VISITOR");
        assert_eq!(sentinel.state_metadata, json!({ "allowed_transitions": ["AUTH"] }));
        assert!(sentinel.is_sentinel());
    }

    #[test]
    fn missing_fields_lists_every_absent_field() {
        let missing = TransitionPayload::default()
            .missing_fields(OnboardingState::Payment.required_fields());
        assert_eq!(missing, vec!["plan_id", "session_id", "status"]);
    }

    #[test]
    fn plain_fields_accepted_at_top_level_or_in_metadata() {
        let p = payload(json!({
            "plan_id": "pro",
            "state_metadata": { "session_id": "cs_1" }
        }));
        assert_eq!(
            p.missing_fields(OnboardingState::Payment.required_fields()),
            vec!["status"]
        );
    }

    #[test]
    fn dotted_fields_walk_metadata_only() {
        let p = payload(json!({
            "user": { "email": "top@example.com" },
            "state_metadata": { "user": { "auth_id": "g-1", "profile": 7 } }
        }));
        assert!(p.missing_fields(&["user.auth_id"]).is_empty());
        // Top-level `user` does not satisfy a dotted path.
        assert_eq!(p.missing_fields(&["user.email"]), vec!["user.email"]);
        // A non-object segment stops the walk.
        assert_eq!(p.missing_fields(&["user.profile.id"]), vec!["user.profile.id"]);
        assert_eq!(p.missing_fields(&["billing.plan"]), vec!["billing.plan"]);
    }

    #[test]
    fn payload_deserializes_without_metadata() {
        let p = payload(json!({ "folder_id": "f1" }));
        assert!(p.state_metadata.is_empty());
        assert_eq!(p.fields.get("folder_id"), Some(&json!("f1")));
        assert!(p.missing_fields(&["folder_id"]).is_empty());
    }

    #[test]
    fn from_metadata_rejects_scalars() {
        assert!(TransitionPayload::from_metadata(json!({"a": 1})).is_some());
        assert!(TransitionPayload::from_metadata(Value::Null).is_some());
        assert!(TransitionPayload::from_metadata(json!([1, 2])).is_none());
    }

    #[test]
    fn history_copies_drive_fields() {
        let now = Utc::now();
        let user = UserRecord {
            id: Uuid::new_v4(),
            auth_id: "g-1".into(),
            email: None,
            name: None,
            current_state: "PAYMENT".into(),
            state_metadata: json!({}),
            created_at: now,
            updated_at: now,
        };
        let p = TransitionPayload::default()
            .with_field("drive_access_token", "ya29")
            .with_field("drive_auth_status", "connected")
            .with_field("drive_refresh_token", Value::Null);
        let entry = StateHistoryEntry::new(&user, "PAYMENT", "DRIVE", "connect", json!({}))
            .with_drive_fields(&p);
        assert_eq!(entry.drive_access_token.as_deref(), Some("ya29"));
        assert_eq!(entry.drive_auth_status.as_deref(), Some("connected"));
        assert!(entry.drive_refresh_token.is_none());
        assert_eq!(entry.internal_user_id, user.id);
    }

    #[test]
    fn response_from_result() {
        let ok: Result<TransitionOutcome, StateError> = Ok(TransitionOutcome {
            message: "State updated successfully".into(),
            from_state: "AUTH".into(),
            to_state: OnboardingState::Payment,
        });
        let body = serde_json::to_value(TransitionResponse::from(&ok)).unwrap();
        assert_eq!(body, json!({ "success": true, "message": "State updated successfully" }));

        let err: Result<TransitionOutcome, StateError> = Err(StateError::UserNotFound);
        let body = serde_json::to_value(TransitionResponse::from(&err)).unwrap();
        assert_eq!(body, json!({ "success": false, "error": "User not found" }));
    }
}
