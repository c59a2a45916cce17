//! Onboarding state machine — the linear flow a new user walks through.
//!
//! A visitor signs in, pays, connects Drive, and gets a workspace folder.
//! `StateManager` is the only component that moves a user between states;
//! the per-state services in `crate::services` call into it.

pub mod folder;
pub mod manager;
pub mod model;
pub mod session;
pub mod state;

pub use folder::{FolderRecord, FolderStats, FolderStatus};
pub use manager::StateManager;
pub use model::{
    SessionClaims, StateHistoryEntry, StateSnapshot, StateUpdate, TransitionOutcome,
    TransitionPayload, TransitionResponse, UserRecord,
};
pub use session::SessionVerifier;
pub use state::{OnboardingState, StateRequirements};
