//! Payment state — a completed checkout or trial.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::error::ServiceError;
use crate::onboarding::{
    OnboardingState, StateManager, StateRequirements, StateSnapshot, TransitionOutcome,
    TransitionPayload,
};

pub const PAYMENT_REASON: &str = "Payment completed";

/// Status a checkout session must report before the user may enter `PAYMENT`.
pub const COMPLETED: &str = "completed";

/// A checkout result reported by the payment provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentConfirmation {
    pub plan_id: String,
    pub session_id: String,
    pub status: String,
}

pub struct PaymentService {
    manager: StateManager,
}

impl PaymentService {
    pub fn new(manager: StateManager) -> Self {
        Self { manager }
    }

    /// The user's current snapshot with a `last_updated` stamp.
    pub async fn payment_info(&self, user_id: &str) -> StateSnapshot {
        let mut snapshot = self.manager.get_current_state(Some(user_id)).await;
        if let Value::Object(ref mut metadata) = snapshot.state_metadata {
            metadata.insert("last_updated".into(), json!(Utc::now().to_rfc3339()));
        }
        snapshot
    }

    /// Record a completed checkout and move the user into `PAYMENT`.
    pub async fn confirm_payment(
        &self,
        user_id: &str,
        confirmation: &PaymentConfirmation,
    ) -> Result<TransitionOutcome, ServiceError> {
        if confirmation.status != COMPLETED {
            return Err(ServiceError::PaymentIncomplete {
                status: confirmation.status.clone(),
            });
        }

        let mut metadata = Map::new();
        metadata.insert("plan_id".into(), json!(confirmation.plan_id));
        metadata.insert("session_id".into(), json!(confirmation.session_id));
        metadata.insert("status".into(), json!(confirmation.status));
        metadata.insert("payment_completed_at".into(), json!(Utc::now().to_rfc3339()));
        metadata.insert("allowed_transitions".into(), json!(["DRIVE"]));

        let outcome = self
            .manager
            .transition_user_state(
                user_id,
                OnboardingState::Payment.as_str(),
                &TransitionPayload::new(metadata),
                PAYMENT_REASON,
            )
            .await?;
        Ok(outcome)
    }

    pub fn requirements(&self) -> StateRequirements {
        StateRequirements::for_state(OnboardingState::Payment)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::onboarding::StateUpdate;
    use crate::onboarding::model::NewUser;
    use crate::store::LibSqlBackend;

    async fn service_with_user(state: &str) -> PaymentService {
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
                    current_state: Some(state.into()),
                    state_metadata: Some(json!({ "user": { "auth_id": "g-1" } })),
                },
            )
            .await
            .unwrap();
        PaymentService::new(manager)
    }

    fn confirmation(status: &str) -> PaymentConfirmation {
        PaymentConfirmation {
            plan_id: "pro-monthly".into(),
            session_id: "cs_test_1".into(),
            status: status.into(),
        }
    }

    #[tokio::test]
    async fn completed_payment_moves_to_payment() {
        let payments = service_with_user("AUTH").await;
        let outcome = payments
            .confirm_payment("g-1", &confirmation("completed"))
            .await
            .unwrap();
        assert_eq!(outcome.to_state, OnboardingState::Payment);

        let info = payments.payment_info("g-1").await;
        assert_eq!(info.current_state, "PAYMENT");
        assert_eq!(info.state_metadata["plan_id"], "pro-monthly");
        assert_eq!(info.state_metadata["allowed_transitions"], json!(["DRIVE"]));
        assert!(info.state_metadata["last_updated"].is_string());
        // Replaced wholesale.
        assert!(info.state_metadata.get("user").is_none());
    }

    #[tokio::test]
    async fn pending_payment_is_rejected() {
        let payments = service_with_user("AUTH").await;
        let err = payments
            .confirm_payment("g-1", &confirmation("open"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::PaymentIncomplete { .. }));
        assert_eq!(payments.payment_info("g-1").await.current_state, "AUTH");
    }

    #[tokio::test]
    async fn payment_from_visitor_is_invalid() {
        let payments = service_with_user("VISITOR").await;
        let err = payments
            .confirm_payment("g-1", &confirmation("completed"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Transition(_)));
        assert_eq!(
            err.to_string(),
            "Transition rejected: Invalid transition from VISITOR to PAYMENT"
        );
    }
}
