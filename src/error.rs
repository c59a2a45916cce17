//! Error types for TenFold onboarding.

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Failures of the onboarding state machine.
///
/// The `Display` output of each variant is the message handed back to
/// callers in the `{"error": ...}` body.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("Invalid current state: {0}")]
    InvalidState(String),

    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Missing required fields: {}", .0.join(", "))]
    MissingFields(Vec<String>),

    #[error("User not found")]
    UserNotFound,

    #[error("Store error: {0}")]
    Store(#[from] DatabaseError),
}

/// Errors raised by the per-state services before they hand off to the
/// state manager.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Identity verification failed: {0}")]
    Identity(String),

    #[error("Payment must be completed before transitioning (status: {status})")]
    PaymentIncomplete { status: String },

    #[error("Drive grant is missing {0}")]
    IncompleteDriveGrant(&'static str),

    #[error("Folder provisioning failed: {0}")]
    Provisioning(String),

    #[error("Transition rejected: {0}")]
    Transition(#[from] StateError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}
