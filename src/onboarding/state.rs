//! Onboarding state machine — the fixed linear progression.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::StateError;

/// The states of the onboarding flow.
///
/// Progresses linearly: Visitor → Auth → Payment → Drive → Active. A user may
/// step forward by one, or go back to any earlier state to redo a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OnboardingState {
    Visitor,
    Auth,
    Payment,
    Drive,
    Active,
}

impl OnboardingState {
    /// Every state, in flow order.
    pub const ALL: [OnboardingState; 5] = [
        Self::Visitor,
        Self::Auth,
        Self::Payment,
        Self::Drive,
        Self::Active,
    ];

    /// Position of this state in the flow.
    pub fn index(&self) -> usize {
        match self {
            Self::Visitor => 0,
            Self::Auth => 1,
            Self::Payment => 2,
            Self::Drive => 3,
            Self::Active => 4,
        }
    }

    /// Get the next state in the linear progression, if any.
    pub fn next(&self) -> Option<OnboardingState> {
        Self::ALL.get(self.index() + 1).copied()
    }

    /// Whether this state is terminal (onboarding is done).
    pub fn is_terminal(&self) -> bool {
        self.next().is_none()
    }

    /// Fields that must be present in a transition payload before a user may
    /// enter this state. Dotted names address nested metadata keys.
    pub fn required_fields(&self) -> &'static [&'static str] {
        match self {
            Self::Visitor => &[],
            Self::Auth => &["email", "auth_id"],
            Self::Payment => &["plan_id", "session_id", "status"],
            Self::Drive => &["drive_access_token", "drive_refresh_token", "drive_auth_status"],
            Self::Active => &["folder_id"],
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Visitor => "Unknown user",
            Self::Auth => "Google sign-in successful",
            Self::Payment => "Payment or trial activated",
            Self::Drive => "Drive connected",
            Self::Active => "Folders deployed and shared",
        }
    }

    /// Check if a transition from `self` to `target` is valid: exactly one
    /// step forward, or any strictly earlier state.
    pub fn can_transition_to(&self, target: OnboardingState) -> bool {
        target.index() < self.index() || target.index() == self.index() + 1
    }

    /// All states reachable from `self`, earlier states first.
    pub fn allowed_transitions(&self) -> Vec<OnboardingState> {
        Self::ALL
            .into_iter()
            .filter(|target| self.can_transition_to(*target))
            .collect()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Visitor => "VISITOR",
            Self::Auth => "AUTH",
            Self::Payment => "PAYMENT",
            Self::Drive => "DRIVE",
            Self::Active => "ACTIVE",
        }
    }
}

impl Default for OnboardingState {
    fn default() -> Self {
        Self::Visitor
    }
}

impl std::fmt::Display for OnboardingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OnboardingState {
    type Err = StateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| StateError::InvalidState(s.to_string()))
    }
}

/// What a state demands of a caller and where it can lead.
#[derive(Debug, Clone, Serialize)]
pub struct StateRequirements {
    pub state: OnboardingState,
    pub required_fields: Vec<String>,
    pub allowed_transitions: Vec<OnboardingState>,
    pub description: String,
}

impl StateRequirements {
    pub fn for_state(state: OnboardingState) -> Self {
        Self {
            state,
            required_fields: state
                .required_fields()
                .iter()
                .map(|f| f.to_string())
                .collect(),
            allowed_transitions: state.allowed_transitions(),
            description: state.description().to_string(),
        }
    }
}
