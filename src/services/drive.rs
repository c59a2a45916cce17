//! Drive state — the user has granted access to their Google Drive.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::error::ServiceError;
use crate::onboarding::{
    OnboardingState, StateManager, StateRequirements, StateSnapshot, TransitionOutcome,
    TransitionPayload,
};

pub const DRIVE_REASON: &str = "Drive connected";

pub const CONNECTED: &str = "connected";

/// OAuth tokens from the Drive consent flow.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct DriveGrant {
    pub access_token: String,
    pub refresh_token: String,
}

impl std::fmt::Debug for DriveGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriveGrant")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .finish()
    }
}

pub struct DriveService {
    manager: StateManager,
}

impl DriveService {
    pub fn new(manager: StateManager) -> Self {
        Self { manager }
    }

    /// Current state and metadata with a `last_updated` stamp.
    pub async fn drive_info(&self, user_id: &str) -> StateSnapshot {
        let mut snapshot = self.manager.get_current_state(Some(user_id)).await;
        if let Value::Object(ref mut metadata) = snapshot.state_metadata {
            metadata.insert("last_updated".into(), json!(Utc::now().to_rfc3339()));
        }
        snapshot
    }

    /// Store a Drive grant and move the user into `DRIVE`.
    ///
    /// The tokens travel as top-level payload fields so they land on the
    /// history row, not in the user's visible metadata.
    pub async fn connect_drive(
        &self,
        user_id: &str,
        grant: &DriveGrant,
    ) -> Result<TransitionOutcome, ServiceError> {
        if grant.access_token.trim().is_empty() {
            return Err(ServiceError::IncompleteDriveGrant("an access token"));
        }
        if grant.refresh_token.trim().is_empty() {
            return Err(ServiceError::IncompleteDriveGrant("a refresh token"));
        }

        let mut metadata = Map::new();
        metadata.insert("drive_auth_status".into(), json!(CONNECTED));
        metadata.insert("drive_connected_at".into(), json!(Utc::now().to_rfc3339()));
        metadata.insert("allowed_transitions".into(), json!(["ACTIVE"]));

        let payload = TransitionPayload::new(metadata)
            .with_field("drive_access_token", grant.access_token.clone())
            .with_field("drive_refresh_token", grant.refresh_token.clone())
            .with_field("drive_auth_status", CONNECTED);

        let outcome = self
            .manager
            .transition_user_state(
                user_id,
                OnboardingState::Drive.as_str(),
                &payload,
                DRIVE_REASON,
            )
            .await?;
        Ok(outcome)
    }

    pub fn requirements(&self) -> StateRequirements {
        StateRequirements::for_state(OnboardingState::Drive)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::onboarding::StateUpdate;
    use crate::onboarding::model::NewUser;
    use crate::store::LibSqlBackend;

    async fn service_at_payment() -> DriveService {
        let store = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let manager = StateManager::new(store);
        let user = manager
            .store()
            .upsert_identity(&NewUser {
                auth_id: "g-1".into(),
                email: "g1@example.com".into(),
                name: None,
            })
            .await
            .unwrap();
        manager
            .store()
            .update_user_state(
                user.id,
                &StateUpdate {
                    current_state: Some("PAYMENT".into()),
                    state_metadata: Some(json!({})),
                },
            )
            .await
            .unwrap();
        DriveService::new(manager)
    }

    fn grant(access: &str, refresh: &str) -> DriveGrant {
        DriveGrant {
            access_token: access.into(),
            refresh_token: refresh.into(),
        }
    }

    #[tokio::test]
    async fn connect_records_tokens_in_history_only() {
        let drive = service_at_payment().await;
        drive
            .connect_drive("g-1", &grant("ya29.token", "1//refresh"))
            .await
            .unwrap();

        let state = drive.manager.get_current_state(Some("g-1")).await;
        assert_eq!(state.current_state, "DRIVE");
        assert_eq!(state.state_metadata["drive_auth_status"], CONNECTED);
        assert!(state.state_metadata.get("drive_access_token").is_none());

        let entry = &drive.manager.history("g-1", 1).await[0];
        assert_eq!(entry.drive_access_token.as_deref(), Some("ya29.token"));
        assert_eq!(entry.drive_refresh_token.as_deref(), Some("1//refresh"));
        assert_eq!(entry.drive_auth_status.as_deref(), Some(CONNECTED));
    }

    #[tokio::test]
    async fn drive_info_stamps_the_snapshot() {
        let drive = service_at_payment().await;
        drive
            .connect_drive("g-1", &grant("ya29.token", "1//refresh"))
            .await
            .unwrap();

        let info = drive.drive_info("g-1").await;
        assert_eq!(info.current_state, "DRIVE");
        assert_eq!(info.state_metadata["allowed_transitions"], json!(["ACTIVE"]));
        assert!(info.state_metadata["last_updated"].is_string());
        assert!(info.state_metadata.get("drive_access_token").is_none());
    }

    #[tokio::test]
    async fn empty_tokens_are_rejected() {
        let drive = service_at_payment().await;
        let err = drive.connect_drive("g-1", &grant("", "r")).await.unwrap_err();
        assert_eq!(err.to_string(), "Drive grant is missing an access token");
        let err = drive.connect_drive("g-1", &grant("a", " ")).await.unwrap_err();
        assert_eq!(err.to_string(), "Drive grant is missing a refresh token");
        assert!(drive.manager.history("g-1", 5).await.is_empty());
    }

    #[test]
    fn debug_redacts_tokens() {
        let rendered = format!("{:?}", grant("secret-a", "secret-r"));
        assert!(!rendered.contains("secret"));
    }
}
