//! StateManager — the single authority over onboarding transitions.
//!
//! Every state change goes through one engine. There are two entries into it:
//! the guarded `transition_user_state`, which enforces the flow topology and
//! required fields, and the trusted `notify_state_change`, which does not.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{Instrument, debug, info, info_span, warn};

use crate::error::StateError;
use crate::store::OnboardingStore;

use super::model::{
    NOTIFICATION_REASON, SessionClaims, StateHistoryEntry, StateSnapshot, StateUpdate,
    TransitionOutcome, TransitionPayload, UserRecord,
};
use super::session::SessionVerifier;
use super::state::OnboardingState;

/// Message returned by a successful guarded transition.
pub const TRANSITION_SUCCESS: &str = "State updated successfully";

/// Coordinates reads and transitions of a user's onboarding state.
///
/// Holds no per-user state; every call re-reads the store.
#[derive(Clone)]
pub struct StateManager {
    store: Arc<dyn OnboardingStore>,
}

impl StateManager {
    pub fn new(store: Arc<dyn OnboardingStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn OnboardingStore> {
        &self.store
    }

    // ── Reads ───────────────────────────────────────────────────────

    /// Current state and metadata for `user_id` (an auth id).
    ///
    /// Never fails: no id, an unknown id, or a store error all yield the
    /// `VISITOR` sentinel. A user with no row but with history is reported
    /// at the `to_state` of their latest history entry.
    pub async fn get_current_state(&self, user_id: Option<&str>) -> StateSnapshot {
        let Some(user_id) = user_id else {
            return StateSnapshot::sentinel();
        };
        self.lookup_state(user_id)
            .instrument(info_span!("get_current_state", user_id))
            .await
    }

    async fn lookup_state(&self, user_id: &str) -> StateSnapshot {
        match self.store.get_user_by_auth_id(user_id).await {
            Ok(Some(user)) => {
                return StateSnapshot {
                    current_state: user.current_state,
                    state_metadata: user.state_metadata,
                };
            }
            Ok(None) => debug!("No user record, falling back to history"),
            Err(e) => warn!(error = %e, "User lookup failed"),
        }

        match self.store.latest_history(user_id).await {
            Ok(Some(entry)) => StateSnapshot {
                current_state: entry.to_state,
                state_metadata: entry.metadata,
            },
            Ok(None) => StateSnapshot::sentinel(),
            Err(e) => {
                warn!(error = %e, "History lookup failed");
                StateSnapshot::sentinel()
            }
        }
    }

    /// Recent history for `user_id`, newest first. Store errors yield an
    /// empty list.
    pub async fn history(&self, user_id: &str, limit: usize) -> Vec<StateHistoryEntry> {
        match self.store.list_history(user_id, limit).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(user_id, error = %e, "History listing failed");
                Vec::new()
            }
        }
    }

    /// Verify a session token and confirm its subject still has a user row.
    pub async fn verify_session(
        &self,
        verifier: &dyn SessionVerifier,
        token: &str,
    ) -> Option<SessionClaims> {
        if token.is_empty() {
            return None;
        }
        let claims = match verifier.verify(token).await {
            Ok(claims) => claims,
            Err(e) => {
                warn!(error = %e, "Session token verification failed");
                return None;
            }
        };
        match self.store.get_user_by_auth_id(&claims.auth_id).await {
            Ok(Some(_)) => Some(claims),
            Ok(None) => {
                debug!(auth_id = %claims.auth_id, "Session subject has no user record");
                None
            }
            Err(e) => {
                warn!(auth_id = %claims.auth_id, error = %e, "Session user lookup failed");
                None
            }
        }
    }

    // ── Guarded entry ───────────────────────────────────────────────

    /// Check that `target_state` is reachable from `current_state`: one step
    /// forward, or back to any strictly earlier state.
    pub fn validate_state_transition(
        &self,
        current_state: &str,
        target_state: &str,
    ) -> Result<OnboardingState, StateError> {
        let current: OnboardingState = current_state.parse()?;
        let invalid = || StateError::InvalidTransition {
            from: current_state.to_string(),
            to: target_state.to_string(),
        };
        let target: OnboardingState = target_state.parse().map_err(|_| invalid())?;
        if current.can_transition_to(target) {
            Ok(target)
        } else {
            Err(invalid())
        }
    }

    /// Move `user_id` to `target_state` after validating the move and the
    /// target's required fields.
    ///
    /// The payload's `state_metadata` replaces the user's metadata wholesale.
    /// The history entry and the user update are written as one unit.
    pub async fn transition_user_state(
        &self,
        user_id: &str,
        target_state: &str,
        state_data: &TransitionPayload,
        reason: &str,
    ) -> Result<TransitionOutcome, StateError> {
        let span = info_span!("transition_user_state", user_id, target_state);
        self.guarded_transition(user_id, target_state, state_data, reason)
            .instrument(span.clone())
            .await
            .inspect_err(|e| {
                span.in_scope(|| warn!(error = %e, "Transition rejected"));
            })
    }

    async fn guarded_transition(
        &self,
        user_id: &str,
        target_state: &str,
        state_data: &TransitionPayload,
        reason: &str,
    ) -> Result<TransitionOutcome, StateError> {
        let current = self.get_current_state(Some(user_id)).await;
        let target = self.validate_state_transition(&current.current_state, target_state)?;

        let missing = state_data.missing_fields(target.required_fields());
        if !missing.is_empty() {
            debug!(missing_fields = ?missing, "Required fields absent");
            return Err(StateError::MissingFields(missing));
        }

        let user = self
            .store
            .get_user_by_auth_id(user_id)
            .await?
            .ok_or(StateError::UserNotFound)?;

        let metadata = state_data.metadata_value();
        let entry = StateHistoryEntry::new(
            &user,
            &current.current_state,
            target.as_str(),
            reason,
            metadata.clone(),
        )
        .with_drive_fields(state_data);
        let update = StateUpdate {
            current_state: Some(target.to_string()),
            state_metadata: Some(metadata),
        };
        self.commit(&user, Some(entry), &update).await?;

        info!(from_state = %current.current_state, to_state = %target, "State transitioned");
        Ok(TransitionOutcome {
            message: TRANSITION_SUCCESS.to_string(),
            from_state: current.current_state,
            to_state: target,
        })
    }

    // ── Trusted entry ───────────────────────────────────────────────

    /// Apply an externally driven state change for `user_id` (an auth id or
    /// an internal record id).
    ///
    /// This entry skips transition validation and required-field checks and
    /// is meant for internal callers such as folder provisioning. A
    /// `current_state` that is not a known state is still rejected. A history
    /// entry is written only when the state actually changes. Moves the
    /// guarded entry would reject are applied and logged at `warn`.
    /// Returns `false` on any failure.
    pub async fn notify_state_change(&self, user_id: &str, state_update: &StateUpdate) -> bool {
        let span = info_span!(
            "notify_state_change",
            user_id,
            to_state = state_update.current_state.as_deref()
        );
        match self
            .trusted_transition(user_id, state_update)
            .instrument(span.clone())
            .await
        {
            Ok(()) => true,
            Err(e) => {
                span.in_scope(|| warn!(error = %e, "State change notification failed"));
                false
            }
        }
    }

    async fn trusted_transition(
        &self,
        user_id: &str,
        state_update: &StateUpdate,
    ) -> Result<(), StateError> {
        // Topology is not enforced here, but the state must still be one of ours.
        if let Some(new_state) = state_update.current_state.as_deref() {
            new_state.parse::<OnboardingState>()?;
        }

        let user = match self.store.get_user_by_auth_id(user_id).await? {
            Some(user) => user,
            None => self
                .store
                .get_user_by_id(user_id)
                .await?
                .ok_or(StateError::UserNotFound)?,
        };

        let entry = match state_update.current_state.as_deref() {
            Some(new_state) if new_state != user.current_state => {
                if self
                    .validate_state_transition(&user.current_state, new_state)
                    .is_err()
                {
                    warn!(
                        from_state = %user.current_state,
                        to_state = new_state,
                        "Applying unguarded state change"
                    );
                }
                let metadata = state_update
                    .state_metadata
                    .clone()
                    .unwrap_or_else(|| Value::Object(Map::new()));
                Some(StateHistoryEntry::new(
                    &user,
                    &user.current_state,
                    new_state,
                    NOTIFICATION_REASON,
                    metadata,
                ))
            }
            _ => None,
        };

        self.commit(&user, entry, state_update).await
    }

    // ── Engine ──────────────────────────────────────────────────────

    /// Persist a state change. With a history entry both writes land
    /// together; without one only the user row is touched.
    async fn commit(
        &self,
        user: &UserRecord,
        entry: Option<StateHistoryEntry>,
        update: &StateUpdate,
    ) -> Result<(), StateError> {
        match entry {
            Some(entry) => {
                debug_assert_eq!(entry.internal_user_id, user.id);
                self.store.record_transition(&entry, update).await?;
            }
            None if update.is_empty() => {}
            None => {
                if !self.store.update_user_state(user.id, update).await? {
                    return Err(StateError::UserNotFound);
                }
            }
        }
        Ok(())
    }
}
