//! `OnboardingStore` trait — async interface over the `users`,
//! `user_state_history` and `folders` tables.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::onboarding::folder::{FolderRecord, FolderStatus};
use crate::onboarding::model::{NewUser, StateHistoryEntry, StateUpdate, UserRecord};

/// Backend-agnostic persistence for onboarding state.
#[async_trait]
pub trait OnboardingStore: Send + Sync {
    /// Create tables and apply pending migrations.
    async fn init_schema(&self) -> Result<(), DatabaseError>;

    // ── Users ───────────────────────────────────────────────────────

    /// Look up a user by external auth id.
    async fn get_user_by_auth_id(&self, auth_id: &str) -> Result<Option<UserRecord>, DatabaseError>;

    /// Look up a user by internal record id. Ids that are not valid record
    /// ids simply miss.
    async fn get_user_by_id(&self, id: &str) -> Result<Option<UserRecord>, DatabaseError>;

    /// Insert a `VISITOR` row for `user`, or refresh the email and name of
    /// the row already holding its auth id. State columns of an existing row
    /// are left alone. Returns the stored row.
    async fn upsert_identity(&self, user: &NewUser) -> Result<UserRecord, DatabaseError>;

    /// Apply the present fields of `update` to the user row with internal id
    /// `user_id`. Returns whether a row was updated.
    async fn update_user_state(&self, user_id: Uuid, update: &StateUpdate)
    -> Result<bool, DatabaseError>;

    // ── History ─────────────────────────────────────────────────────

    /// Append a history entry.
    async fn insert_history(&self, entry: &StateHistoryEntry) -> Result<(), DatabaseError>;

    /// The most recent history entry for an auth id.
    async fn latest_history(&self, auth_id: &str)
    -> Result<Option<StateHistoryEntry>, DatabaseError>;

    /// History for an auth id, newest first, up to `limit`.
    async fn list_history(
        &self,
        auth_id: &str,
        limit: usize,
    ) -> Result<Vec<StateHistoryEntry>, DatabaseError>;

    // ── Transitions ─────────────────────────────────────────────────

    /// Append `entry` and apply `update` to the row of
    /// `entry.internal_user_id` as one unit: either both land or neither
    /// does. A missing user row fails the whole unit.
    async fn record_transition(
        &self,
        entry: &StateHistoryEntry,
        update: &StateUpdate,
    ) -> Result<(), DatabaseError>;

    // ── Folders ─────────────────────────────────────────────────────

    /// Reserve a `PENDING` folder row named `name` for `user_id`. A name that
    /// is already taken fails with `DatabaseError::Constraint`.
    async fn create_folder(&self, user_id: Uuid, name: &str)
    -> Result<FolderRecord, DatabaseError>;

    async fn get_folder(&self, folder_id: Uuid) -> Result<Option<FolderRecord>, DatabaseError>;

    /// Names of every folder row, in any status.
    async fn list_folder_names(&self) -> Result<Vec<String>, DatabaseError>;

    /// Folders owned by `user_id`, oldest first, optionally filtered by status.
    async fn list_folders(
        &self,
        user_id: Uuid,
        status: Option<FolderStatus>,
    ) -> Result<Vec<FolderRecord>, DatabaseError>;

    /// Mark a folder `ACTIVE` and record where it lives in Drive.
    async fn activate_folder(
        &self,
        folder_id: Uuid,
        drive_folder_id: &str,
        folder_url: &str,
    ) -> Result<bool, DatabaseError>;

    async fn set_folder_status(
        &self,
        folder_id: Uuid,
        status: FolderStatus,
    ) -> Result<bool, DatabaseError>;

    async fn update_folder_stats(
        &self,
        folder_id: Uuid,
        size_bytes: i64,
        file_count: i64,
    ) -> Result<bool, DatabaseError>;
}
