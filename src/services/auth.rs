//! Auth state — sign-in with an external identity provider.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, json};
use tracing::{debug, info};

use crate::error::ServiceError;
use crate::onboarding::model::NewUser;
use crate::onboarding::{
    OnboardingState, StateManager, StateRequirements, StateSnapshot, TransitionPayload, UserRecord,
};

/// Reason recorded on the history entry of a first sign-in.
pub const SIGN_IN_REASON: &str = "Google Sign-In";

/// An identity confirmed by the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifiedIdentity {
    pub auth_id: String,
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
}

/// Verifies a provider credential (for Google, an ID token).
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, credential: &str) -> Result<VerifiedIdentity, String>;
}

/// Outcome of a sign-in.
#[derive(Debug, Clone)]
pub struct SignIn {
    pub user: UserRecord,
    pub state: StateSnapshot,
    /// Whether this sign-in moved the user from `VISITOR` to `AUTH`.
    pub transitioned: bool,
}

pub struct AuthService {
    manager: StateManager,
    verifier: Arc<dyn IdentityVerifier>,
}

impl AuthService {
    pub fn new(manager: StateManager, verifier: Arc<dyn IdentityVerifier>) -> Self {
        Self { manager, verifier }
    }

    /// Verify `credential`, make sure a user row exists, and move a first-time
    /// user into `AUTH`. Returning users keep whatever state they are in.
    pub async fn sign_in(&self, credential: &str) -> Result<SignIn, ServiceError> {
        let identity = self
            .verifier
            .verify(credential)
            .await
            .map_err(ServiceError::Identity)?;

        let user = self
            .manager
            .store()
            .upsert_identity(&NewUser {
                auth_id: identity.auth_id.clone(),
                email: identity.email.clone(),
                name: identity.name.clone(),
            })
            .await?;

        let transitioned = user.current_state == OnboardingState::Visitor.as_str();
        if transitioned {
            let payload = sign_in_payload(&identity);
            self.manager
                .transition_user_state(
                    &identity.auth_id,
                    OnboardingState::Auth.as_str(),
                    &payload,
                    SIGN_IN_REASON,
                )
                .await?;
            info!(auth_id = %identity.auth_id, "User signed in for the first time");
        } else {
            debug!(auth_id = %identity.auth_id, state = %user.current_state, "Returning user signed in");
        }

        let state = self.manager.get_current_state(Some(&identity.auth_id)).await;
        Ok(SignIn {
            user,
            state,
            transitioned,
        })
    }

    pub fn requirements(&self) -> StateRequirements {
        StateRequirements::for_state(OnboardingState::Auth)
    }
}

fn sign_in_payload(identity: &VerifiedIdentity) -> TransitionPayload {
    let mut metadata = Map::new();
    metadata.insert(
        "user".into(),
        json!({
            "auth_id": identity.auth_id,
            "email": identity.email,
            "picture": identity.picture,
        }),
    );
    metadata.insert("last_login".into(), json!(Utc::now().to_rfc3339()));
    metadata.insert("allowed_transitions".into(), json!(["PAYMENT"]));
    TransitionPayload::new(metadata)
        .with_field("email", identity.email.clone())
        .with_field("auth_id", identity.auth_id.clone())
}
