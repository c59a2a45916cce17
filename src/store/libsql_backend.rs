//! libSQL backend — async `OnboardingStore` implementation.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::onboarding::folder::{FolderRecord, FolderStatus};
use crate::onboarding::model::{NewUser, StateHistoryEntry, StateUpdate, UserRecord};
use crate::onboarding::state::OnboardingState;
use crate::store::migrations;
use crate::store::traits::OnboardingStore;

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations. Writes are
/// serialized through `write_lock` so a transaction never picks up another
/// task's statements on the shared connection.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
    write_lock: Mutex<()>,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db)?;
        backend.init_schema().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let backend = Self::from_database(db)?;
        backend.init_schema().await?;
        Ok(backend)
    }

    fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        Ok(Self {
            db: Arc::new(db),
            conn,
            write_lock: Mutex::new(()),
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Fixed-width RFC 3339 so that text ordering matches time ordering.
fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_uuid(s: &str, column: &str) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(s).map_err(|e| DatabaseError::Serialization(format!("{column}: {e}")))
}

fn parse_json(s: &str, column: &str) -> Result<Value, DatabaseError> {
    serde_json::from_str(s).map_err(|e| DatabaseError::Serialization(format!("{column}: {e}")))
}

fn to_json(value: &Value) -> Result<String, DatabaseError> {
    serde_json::to_string(value).map_err(|e| DatabaseError::Serialization(e.to_string()))
}

fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn query_err(op: &str) -> impl Fn(libsql::Error) -> DatabaseError + '_ {
    move |e| DatabaseError::Query(format!("{op}: {e}"))
}

/// Map a libsql Row to a UserRecord.
///
/// Column order matches USER_COLUMNS.
fn row_to_user(row: &libsql::Row) -> Result<UserRecord, DatabaseError> {
    let get = |idx: i32| -> Result<String, DatabaseError> {
        row.get::<String>(idx)
            .map_err(|e| DatabaseError::Query(format!("user row parse: {e}")))
    };
    Ok(UserRecord {
        id: parse_uuid(&get(0)?, "users.id")?,
        auth_id: get(1)?,
        email: row.get::<String>(2).ok(),
        name: row.get::<String>(3).ok(),
        current_state: get(4)?,
        state_metadata: parse_json(&get(5)?, "users.state_metadata")?,
        created_at: parse_datetime(&get(6)?),
        updated_at: parse_datetime(&get(7)?),
    })
}

/// Like `query_err`, but reports unique-key violations as `Constraint`.
fn write_err(op: &str) -> impl Fn(libsql::Error) -> DatabaseError + '_ {
    move |e| {
        let message = e.to_string();
        if message.contains("UNIQUE constraint failed") {
            DatabaseError::Constraint(format!("{op}: {message}"))
        } else {
            DatabaseError::Query(format!("{op}: {message}"))
        }
    }
}

/// Map a libsql Row to a FolderRecord.
///
/// Column order matches FOLDER_COLUMNS.
fn row_to_folder(row: &libsql::Row) -> Result<FolderRecord, DatabaseError> {
    let get = |idx: i32| -> Result<String, DatabaseError> {
        row.get::<String>(idx)
            .map_err(|e| DatabaseError::Query(format!("folder row parse: {e}")))
    };
    let get_int = |idx: i32| -> Result<i64, DatabaseError> {
        row.get::<i64>(idx)
            .map_err(|e| DatabaseError::Query(format!("folder row parse: {e}")))
    };
    Ok(FolderRecord {
        id: parse_uuid(&get(0)?, "folders.id")?,
        user_id: parse_uuid(&get(1)?, "folders.user_id")?,
        name: get(2)?,
        status: get(3)?
            .parse()
            .map_err(|e: String| DatabaseError::Serialization(format!("folders.status: {e}")))?,
        drive_folder_id: row.get::<String>(4).ok(),
        folder_url: row.get::<String>(5).ok(),
        storage_limit_gb: get_int(6)?,
        current_size_bytes: get_int(7)?,
        file_count: get_int(8)?,
        created_at: parse_datetime(&get(9)?),
        updated_at: parse_datetime(&get(10)?),
    })
}

/// Map a libsql Row to a StateHistoryEntry.
///
/// Column order matches HISTORY_COLUMNS.
fn row_to_history(row: &libsql::Row) -> Result<StateHistoryEntry, DatabaseError> {
    let get = |idx: i32| -> Result<String, DatabaseError> {
        row.get::<String>(idx)
            .map_err(|e| DatabaseError::Query(format!("history row parse: {e}")))
    };
    Ok(StateHistoryEntry {
        id: parse_uuid(&get(0)?, "user_state_history.id")?,
        auth_id: get(1)?,
        internal_user_id: parse_uuid(&get(2)?, "user_state_history.internal_user_id")?,
        from_state: get(3)?,
        to_state: get(4)?,
        transition_reason: get(5)?,
        metadata: parse_json(&get(6)?, "user_state_history.metadata")?,
        drive_auth_status: row.get::<String>(7).ok(),
        drive_access_token: row.get::<String>(8).ok(),
        drive_refresh_token: row.get::<String>(9).ok(),
        created_at: parse_datetime(&get(10)?),
    })
}

/// Build the `SET` clause and values for a partial user update.
fn update_assignments(
    update: &StateUpdate,
) -> Result<(Vec<&'static str>, Vec<libsql::Value>), DatabaseError> {
    let mut columns = Vec::new();
    let mut values = Vec::new();
    if let Some(ref state) = update.current_state {
        columns.push("current_state");
        values.push(libsql::Value::Text(state.clone()));
    }
    if let Some(ref metadata) = update.state_metadata {
        columns.push("state_metadata");
        values.push(libsql::Value::Text(to_json(metadata)?));
    }
    Ok((columns, values))
}

async fn apply_user_update(
    conn: &Connection,
    user_id: Uuid,
    update: &StateUpdate,
) -> Result<u64, DatabaseError> {
    let (columns, mut values) = update_assignments(update)?;
    if columns.is_empty() {
        return Ok(0);
    }
    let mut sets: Vec<String> = columns
        .iter()
        .enumerate()
        .map(|(i, col)| format!("{col} = ?{}", i + 1))
        .collect();
    sets.push(format!("updated_at = ?{}", values.len() + 1));
    values.push(libsql::Value::Text(format_datetime(&Utc::now())));
    let id_param = values.len() + 1;
    values.push(libsql::Value::Text(user_id.to_string()));

    let sql = format!("UPDATE users SET {} WHERE id = ?{id_param}", sets.join(", "));
    conn.execute(&sql, values)
        .await
        .map_err(query_err("update_user_state"))
}

async fn insert_history_row(
    conn: &Connection,
    entry: &StateHistoryEntry,
) -> Result<(), DatabaseError> {
    conn.execute(
        &format!(
            "INSERT INTO user_state_history ({HISTORY_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
        ),
        params![
            entry.id.to_string(),
            entry.auth_id.clone(),
            entry.internal_user_id.to_string(),
            entry.from_state.clone(),
            entry.to_state.clone(),
            entry.transition_reason.clone(),
            to_json(&entry.metadata)?,
            opt_text(entry.drive_auth_status.as_deref()),
            opt_text(entry.drive_access_token.as_deref()),
            opt_text(entry.drive_refresh_token.as_deref()),
            format_datetime(&entry.created_at),
        ],
    )
    .await
    .map_err(query_err("insert_history"))?;
    Ok(())
}

// ── Trait implementation ────────────────────────────────────────────

const USER_COLUMNS: &str =
    "id, auth_id, email, name, current_state, state_metadata, created_at, updated_at";

const FOLDER_COLUMNS: &str = "id, user_id, name, status, drive_folder_id, folder_url, storage_limit_gb, current_size_bytes, file_count, created_at, updated_at";

/// Default storage quota for a new folder.
const DEFAULT_STORAGE_LIMIT_GB: i64 = 5;

const HISTORY_COLUMNS: &str = "id, auth_id, internal_user_id, from_state, to_state, transition_reason, metadata, drive_auth_status, drive_access_token, drive_refresh_token, created_at";

#[async_trait]
impl OnboardingStore for LibSqlBackend {
    async fn init_schema(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Users ───────────────────────────────────────────────────────

    async fn get_user_by_auth_id(&self, auth_id: &str) -> Result<Option<UserRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE auth_id = ?1"),
                params![auth_id],
            )
            .await
            .map_err(query_err("get_user_by_auth_id"))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_user(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_user_by_auth_id: {e}"))),
        }
    }

    async fn get_user_by_id(&self, id: &str) -> Result<Option<UserRecord>, DatabaseError> {
        let Ok(id) = Uuid::parse_str(id) else {
            return Ok(None);
        };
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(query_err("get_user_by_id"))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_user(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_user_by_id: {e}"))),
        }
    }

    async fn upsert_identity(&self, user: &NewUser) -> Result<UserRecord, DatabaseError> {
        {
            let _guard = self.write_lock.lock().await;
            let now = format_datetime(&Utc::now());
            self.conn()
                .execute(
                    "INSERT INTO users (id, auth_id, email, name, current_state, state_metadata, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, '{}', ?6, ?6)
                     ON CONFLICT (auth_id) DO UPDATE SET
                        email = excluded.email,
                        name = COALESCE(excluded.name, users.name),
                        updated_at = excluded.updated_at",
                    params![
                        Uuid::new_v4().to_string(),
                        user.auth_id.clone(),
                        user.email.clone(),
                        opt_text(user.name.as_deref()),
                        OnboardingState::Visitor.as_str(),
                        now,
                    ],
                )
                .await
                .map_err(query_err("upsert_identity"))?;
        }

        debug!(auth_id = %user.auth_id, "User identity upserted");
        self.get_user_by_auth_id(&user.auth_id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound {
                entity: "user".into(),
                id: user.auth_id.clone(),
            })
    }

    async fn update_user_state(
        &self,
        user_id: Uuid,
        update: &StateUpdate,
    ) -> Result<bool, DatabaseError> {
        let _guard = self.write_lock.lock().await;
        let count = apply_user_update(self.conn(), user_id, update).await?;
        Ok(count > 0)
    }

    // ── History ─────────────────────────────────────────────────────

    async fn insert_history(&self, entry: &StateHistoryEntry) -> Result<(), DatabaseError> {
        let _guard = self.write_lock.lock().await;
        insert_history_row(self.conn(), entry).await?;
        debug!(history_id = %entry.id, to_state = %entry.to_state, "History entry inserted");
        Ok(())
    }

    async fn latest_history(
        &self,
        auth_id: &str,
    ) -> Result<Option<StateHistoryEntry>, DatabaseError> {
        Ok(self.list_history(auth_id, 1).await?.into_iter().next())
    }

    async fn list_history(
        &self,
        auth_id: &str,
        limit: usize,
    ) -> Result<Vec<StateHistoryEntry>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {HISTORY_COLUMNS} FROM user_state_history WHERE auth_id = ?1 ORDER BY created_at DESC, rowid DESC LIMIT ?2"
                ),
                params![auth_id, limit as i64],
            )
            .await
            .map_err(query_err("list_history"))?;

        let mut entries = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err("list_history"))? {
            entries.push(row_to_history(&row)?);
        }
        Ok(entries)
    }

    // ── Transitions ─────────────────────────────────────────────────

    async fn record_transition(
        &self,
        entry: &StateHistoryEntry,
        update: &StateUpdate,
    ) -> Result<(), DatabaseError> {
        let _guard = self.write_lock.lock().await;
        let tx = self
            .conn()
            .transaction()
            .await
            .map_err(query_err("record_transition begin"))?;

        let applied = async {
            insert_history_row(&tx, entry).await?;
            let updated = apply_user_update(&tx, entry.internal_user_id, update).await?;
            if updated == 0 && !update.is_empty() {
                return Err(DatabaseError::NotFound {
                    entity: "user".into(),
                    id: entry.internal_user_id.to_string(),
                });
            }
            Ok::<(), DatabaseError>(())
        }
        .await;

        match applied {
            Ok(()) => {
                tx.commit()
                    .await
                    .map_err(query_err("record_transition commit"))?;
                debug!(
                    history_id = %entry.id,
                    from_state = %entry.from_state,
                    to_state = %entry.to_state,
                    "Transition recorded"
                );
                Ok(())
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!("Rollback after failed transition write also failed: {rollback_err}");
                }
                Err(e)
            }
        }
    }

    // ── Folders ─────────────────────────────────────────────────────

    async fn create_folder(
        &self,
        user_id: Uuid,
        name: &str,
    ) -> Result<FolderRecord, DatabaseError> {
        let now = Utc::now();
        let folder = FolderRecord {
            id: Uuid::new_v4(),
            user_id,
            name: name.to_string(),
            status: FolderStatus::Pending,
            drive_folder_id: None,
            folder_url: None,
            storage_limit_gb: DEFAULT_STORAGE_LIMIT_GB,
            current_size_bytes: 0,
            file_count: 0,
            created_at: now,
            updated_at: now,
        };

        let _guard = self.write_lock.lock().await;
        self.conn()
            .execute(
                "INSERT INTO folders (id, user_id, name, status, storage_limit_gb, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                params![
                    folder.id.to_string(),
                    user_id.to_string(),
                    name,
                    folder.status.as_str(),
                    folder.storage_limit_gb,
                    format_datetime(&now),
                ],
            )
            .await
            .map_err(write_err("create_folder"))?;

        debug!(folder_id = %folder.id, name, "Folder reserved");
        Ok(folder)
    }

    async fn get_folder(&self, folder_id: Uuid) -> Result<Option<FolderRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {FOLDER_COLUMNS} FROM folders WHERE id = ?1"),
                params![folder_id.to_string()],
            )
            .await
            .map_err(query_err("get_folder"))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_folder(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_folder: {e}"))),
        }
    }

    async fn list_folder_names(&self) -> Result<Vec<String>, DatabaseError> {
        let mut rows = self
            .conn()
            .query("SELECT name FROM folders", ())
            .await
            .map_err(query_err("list_folder_names"))?;

        let mut names = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err("list_folder_names"))? {
            names.push(
                row.get::<String>(0)
                    .map_err(|e| DatabaseError::Query(format!("folder name parse: {e}")))?,
            );
        }
        Ok(names)
    }

    async fn list_folders(
        &self,
        user_id: Uuid,
        status: Option<FolderStatus>,
    ) -> Result<Vec<FolderRecord>, DatabaseError> {
        let mut rows = match status {
            Some(status) => self
                .conn()
                .query(
                    &format!(
                        "SELECT {FOLDER_COLUMNS} FROM folders WHERE user_id = ?1 AND status = ?2 ORDER BY created_at, rowid"
                    ),
                    params![user_id.to_string(), status.as_str()],
                )
                .await,
            None => self
                .conn()
                .query(
                    &format!(
                        "SELECT {FOLDER_COLUMNS} FROM folders WHERE user_id = ?1 ORDER BY created_at, rowid"
                    ),
                    params![user_id.to_string()],
                )
                .await,
        }
        .map_err(query_err("list_folders"))?;

        let mut folders = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err("list_folders"))? {
            folders.push(row_to_folder(&row)?);
        }
        Ok(folders)
    }

    async fn activate_folder(
        &self,
        folder_id: Uuid,
        drive_folder_id: &str,
        folder_url: &str,
    ) -> Result<bool, DatabaseError> {
        let _guard = self.write_lock.lock().await;
        let count = self
            .conn()
            .execute(
                "UPDATE folders SET status = ?1, drive_folder_id = ?2, folder_url = ?3, updated_at = ?4 WHERE id = ?5",
                params![
                    FolderStatus::Active.as_str(),
                    drive_folder_id,
                    folder_url,
                    format_datetime(&Utc::now()),
                    folder_id.to_string(),
                ],
            )
            .await
            .map_err(query_err("activate_folder"))?;
        Ok(count > 0)
    }

    async fn set_folder_status(
        &self,
        folder_id: Uuid,
        status: FolderStatus,
    ) -> Result<bool, DatabaseError> {
        let _guard = self.write_lock.lock().await;
        let count = self
            .conn()
            .execute(
                "UPDATE folders SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![
                    status.as_str(),
                    format_datetime(&Utc::now()),
                    folder_id.to_string(),
                ],
            )
            .await
            .map_err(query_err("set_folder_status"))?;
        Ok(count > 0)
    }

    async fn update_folder_stats(
        &self,
        folder_id: Uuid,
        size_bytes: i64,
        file_count: i64,
    ) -> Result<bool, DatabaseError> {
        let _guard = self.write_lock.lock().await;
        let count = self
            .conn()
            .execute(
                "UPDATE folders SET current_size_bytes = ?1, file_count = ?2, updated_at = ?3 WHERE id = ?4",
                params![
                    size_bytes,
                    file_count,
                    format_datetime(&Utc::now()),
                    folder_id.to_string(),
                ],
            )
            .await
            .map_err(query_err("update_folder_stats"))?;
        Ok(count > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn test_db() -> LibSqlBackend {
        LibSqlBackend::new_memory().await.unwrap()
    }

    fn identity(auth_id: &str) -> NewUser {
        NewUser {
            auth_id: auth_id.to_string(),
            email: format!("{auth_id}@example.com"),
            name: Some("Test User".to_string()),
        }
    }

    // ── User tests ──────────────────────────────────────────────────

    #[tokio::test]
    async fn upsert_creates_visitor_row() {
        let db = test_db().await;
        let user = db.upsert_identity(&identity("g-1")).await.unwrap();
        assert_eq!(user.auth_id, "g-1");
        assert_eq!(user.current_state, "VISITOR");
        assert_eq!(user.state_metadata, json!({}));
        assert_eq!(user.email.as_deref(), Some("g-1@example.com"));
    }

    #[tokio::test]
    async fn upsert_keeps_state_of_existing_row() {
        let db = test_db().await;
        let user = db.upsert_identity(&identity("g-1")).await.unwrap();
        let update = StateUpdate {
            current_state: Some("PAYMENT".into()),
            state_metadata: Some(json!({"plan_id": "pro"})),
        };
        assert!(db.update_user_state(user.id, &update).await.unwrap());

        let again = db
            .upsert_identity(&NewUser {
                auth_id: "g-1".into(),
                email: "new@example.com".into(),
                name: None,
            })
            .await
            .unwrap();
        assert_eq!(again.id, user.id);
        assert_eq!(again.current_state, "PAYMENT");
        assert_eq!(again.email.as_deref(), Some("new@example.com"));
        assert_eq!(again.name.as_deref(), Some("Test User"));
    }

    #[tokio::test]
    async fn get_user_by_auth_id_not_found() {
        let db = test_db().await;
        assert!(db.get_user_by_auth_id("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn get_user_by_id_accepts_only_record_ids() {
        let db = test_db().await;
        let user = db.upsert_identity(&identity("g-1")).await.unwrap();
        let found = db.get_user_by_id(&user.id.to_string()).await.unwrap().unwrap();
        assert_eq!(found.auth_id, "g-1");
        assert!(db.get_user_by_id("g-1").await.unwrap().is_none());
        assert!(db.get_user_by_id(&Uuid::new_v4().to_string()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn partial_update_touches_only_given_columns() {
        let db = test_db().await;
        let user = db.upsert_identity(&identity("g-1")).await.unwrap();

        let metadata_only = StateUpdate {
            current_state: None,
            state_metadata: Some(json!({"step": 2})),
        };
        assert!(db.update_user_state(user.id, &metadata_only).await.unwrap());
        let fetched = db.get_user_by_auth_id("g-1").await.unwrap().unwrap();
        assert_eq!(fetched.current_state, "VISITOR");
        assert_eq!(fetched.state_metadata, json!({"step": 2}));

        assert!(!db.update_user_state(user.id, &StateUpdate::default()).await.unwrap());
        assert!(
            !db.update_user_state(Uuid::new_v4(), &metadata_only)
                .await
                .unwrap()
        );
    }

    // ── History tests ───────────────────────────────────────────────

    #[tokio::test]
    async fn history_is_listed_newest_first() {
        let db = test_db().await;
        let user = db.upsert_identity(&identity("g-1")).await.unwrap();
        for (from, to) in [("VISITOR", "AUTH"), ("AUTH", "PAYMENT"), ("PAYMENT", "DRIVE")] {
            let entry = StateHistoryEntry::new(&user, from, to, "test", json!({"to": to}));
            db.insert_history(&entry).await.unwrap();
        }

        let history = db.list_history("g-1", 10).await.unwrap();
        let to_states: Vec<&str> = history.iter().map(|h| h.to_state.as_str()).collect();
        assert_eq!(to_states, vec!["DRIVE", "PAYMENT", "AUTH"]);

        let latest = db.latest_history("g-1").await.unwrap().unwrap();
        assert_eq!(latest.to_state, "DRIVE");
        assert_eq!(latest.metadata, json!({"to": "DRIVE"}));

        assert_eq!(db.list_history("g-1", 2).await.unwrap().len(), 2);
        assert!(db.latest_history("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn history_roundtrips_drive_columns() {
        let db = test_db().await;
        let user = db.upsert_identity(&identity("g-1")).await.unwrap();
        let mut entry = StateHistoryEntry::new(&user, "PAYMENT", "DRIVE", "connect", json!({}));
        entry.drive_auth_status = Some("connected".into());
        entry.drive_access_token = Some("ya29.token".into());
        db.insert_history(&entry).await.unwrap();

        let fetched = db.latest_history("g-1").await.unwrap().unwrap();
        assert_eq!(fetched.id, entry.id);
        assert_eq!(fetched.drive_auth_status.as_deref(), Some("connected"));
        assert_eq!(fetched.drive_access_token.as_deref(), Some("ya29.token"));
        assert!(fetched.drive_refresh_token.is_none());
    }

    // ── Transition tests ────────────────────────────────────────────

    #[tokio::test]
    async fn record_transition_writes_both_tables() {
        let db = test_db().await;
        let user = db.upsert_identity(&identity("g-1")).await.unwrap();
        let entry = StateHistoryEntry::new(&user, "VISITOR", "AUTH", "sign-in", json!({"a": 1}));
        let update = StateUpdate {
            current_state: Some("AUTH".into()),
            state_metadata: Some(json!({"a": 1})),
        };
        db.record_transition(&entry, &update).await.unwrap();

        let fetched = db.get_user_by_auth_id("g-1").await.unwrap().unwrap();
        assert_eq!(fetched.current_state, "AUTH");
        assert_eq!(fetched.state_metadata, json!({"a": 1}));
        assert_eq!(db.list_history("g-1", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn record_transition_rolls_back_when_user_row_missing() {
        let db = test_db().await;
        let user = db.upsert_identity(&identity("g-1")).await.unwrap();
        let mut entry = StateHistoryEntry::new(&user, "VISITOR", "AUTH", "sign-in", json!({}));
        entry.internal_user_id = Uuid::new_v4();
        let update = StateUpdate {
            current_state: Some("AUTH".into()),
            state_metadata: Some(json!({})),
        };

        let err = db.record_transition(&entry, &update).await.unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound { .. }));

        // Neither write landed.
        assert!(db.list_history("g-1", 10).await.unwrap().is_empty());
        let fetched = db.get_user_by_auth_id("g-1").await.unwrap().unwrap();
        assert_eq!(fetched.current_state, "VISITOR");
    }

    // ── Folder tests ────────────────────────────────────────────────

    #[tokio::test]
    async fn folder_lifecycle() {
        let db = test_db().await;
        let user = db.upsert_identity(&identity("g-1")).await.unwrap();

        let folder = db.create_folder(user.id, "[FolderName01]_TenFold").await.unwrap();
        assert_eq!(folder.status, FolderStatus::Pending);
        assert_eq!(folder.storage_limit_gb, 5);
        let stored = db.get_folder(folder.id).await.unwrap().unwrap();
        assert_eq!(stored.user_id, user.id);
        assert_eq!(stored.name, "[FolderName01]_TenFold");
        assert_eq!(stored.status, FolderStatus::Pending);
        assert!(stored.drive_folder_id.is_none());

        assert!(
            db.activate_folder(folder.id, "drive-1", "https://drive.example/drive-1")
                .await
                .unwrap()
        );
        assert!(db.update_folder_stats(folder.id, 2048, 3).await.unwrap());

        let active = db
            .list_folders(user.id, Some(FolderStatus::Active))
            .await
            .unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].drive_folder_id.as_deref(), Some("drive-1"));
        assert_eq!(active[0].current_size_bytes, 2048);
        assert_eq!(active[0].file_count, 3);
        assert!(
            db.list_folders(user.id, Some(FolderStatus::Pending))
                .await
                .unwrap()
                .is_empty()
        );

        assert!(db.set_folder_status(folder.id, FolderStatus::Failed).await.unwrap());
        assert_eq!(
            db.get_folder(folder.id).await.unwrap().unwrap().status,
            FolderStatus::Failed
        );
        assert!(!db.update_folder_stats(Uuid::new_v4(), 1, 1).await.unwrap());
    }

    #[tokio::test]
    async fn duplicate_folder_name_is_a_constraint_violation() {
        let db = test_db().await;
        let user = db.upsert_identity(&identity("g-1")).await.unwrap();
        db.create_folder(user.id, "[FolderName01]_TenFold").await.unwrap();
        let err = db
            .create_folder(user.id, "[FolderName01]_TenFold")
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Constraint(_)), "{err}");
        assert_eq!(db.list_folder_names().await.unwrap(), vec!["[FolderName01]_TenFold"]);
    }

    #[tokio::test]
    async fn open_local_file_creates_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let db_path = tmp.path().join("nested").join("tenfold.db");
        let db = LibSqlBackend::new_local(&db_path).await.unwrap();
        db.upsert_identity(&identity("g-1")).await.unwrap();
        assert!(db_path.exists());
    }
}
