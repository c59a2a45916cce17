//! Visitor state — what an unknown user sees.

use chrono::Utc;
use serde_json::{Value, json};

use crate::onboarding::{OnboardingState, StateRequirements, StateSnapshot};

pub const WELCOME_MESSAGE: &str = "Welcome to TenFold! Please sign in to continue.";

#[derive(Debug, Clone, Copy, Default)]
pub struct VisitorService;

impl VisitorService {
    pub fn new() -> Self {
        Self
    }

    /// The visitor snapshot with a welcome message and a fresh timestamp.
    pub fn visitor_info(&self) -> StateSnapshot {
        let mut snapshot = StateSnapshot::sentinel();
        if let Value::Object(ref mut metadata) = snapshot.state_metadata {
            metadata.insert("message".into(), json!(WELCOME_MESSAGE));
            metadata.insert("last_updated".into(), json!(Utc::now().to_rfc3339()));
        }
        snapshot
    }

    pub fn requirements(&self) -> StateRequirements {
        StateRequirements::for_state(OnboardingState::Visitor)
    }
}
