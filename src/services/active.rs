//! Active state — the user's workspace folder is deployed.
//!
//! Deployment is driven by the provisioning side, so progress and the final
//! move into `ACTIVE` go through the trusted notification channel rather
//! than the guarded transition.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{ServiceError, StateError};
use crate::onboarding::{
    FolderStats, FolderStatus, OnboardingState, StateManager, StateRequirements, StateSnapshot,
    StateUpdate,
};

const FOLDER_PREFIX: &str = "[FolderName";
const FOLDER_SUFFIX: &str = "]_TenFold";

pub const README_NAME: &str = "README.md";
pub const README_MIME: &str = "text/markdown";

/// A folder created in the user's Drive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisionedFolder {
    pub id: String,
    pub name: String,
    pub url: String,
}

/// A file uploaded into a provisioned folder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadedFile {
    pub id: String,
    pub name: String,
    pub url: String,
}

/// Creates, shares and fills workspace folders.
#[async_trait]
pub trait FolderProvisioner: Send + Sync {
    /// Create `name` and share it with `owner_email`.
    async fn create_folder(
        &self,
        name: &str,
        owner_email: &str,
    ) -> Result<ProvisionedFolder, String>;

    /// Upload `content` as `file_name` into the Drive folder `parent_folder_id`.
    async fn upload_file(
        &self,
        parent_folder_id: &str,
        file_name: &str,
        mime_type: &str,
        content: Vec<u8>,
    ) -> Result<UploadedFile, String>;
}

/// The sequence number in a `[FolderName##]_TenFold` name.
pub fn folder_number(name: &str) -> Option<u32> {
    let (_, rest) = name.split_once(FOLDER_PREFIX)?;
    rest.get(..2)?.parse().ok()
}

/// Next folder name in the `[FolderName##]_TenFold` sequence: one past the
/// highest number among `existing`, starting at 01.
pub fn next_folder_name(existing: &[String]) -> String {
    let highest = existing
        .iter()
        .filter_map(|name| folder_number(name))
        .max()
        .unwrap_or(0);
    format!("{FOLDER_PREFIX}{:02}{FOLDER_SUFFIX}", highest + 1)
}

/// README placed in every new workspace folder.
pub fn readme_content(
    folder_name: &str,
    owner_email: &str,
    created_at: &DateTime<Utc>,
    folder_number: u32,
) -> String {
    format!(
        "# {folder_name}\n\
         \n\
         ## Folder Details\n\
         - Owner: {owner_email}\n\
         - Created: {created}\n\
         - Folder Number: {folder_number:02}\n\
         \n\
         ## Purpose\n\
         This folder is managed by TenFold for secure document storage and processing.\n\
         \n\
         ## Features\n\
         - Automatic document processing\n\
         - Secure storage\n\
         - Version control\n\
         - Access management\n\
         \n\
         ## Notes\n\
         - Do not modify folder structure directly\n\
         - All changes are tracked and versioned\n\
         - Contact support for assistance\n",
        created = created_at.to_rfc3339(),
    )
}

pub struct ActiveService {
    manager: StateManager,
    provisioner: Arc<dyn FolderProvisioner>,
}

impl ActiveService {
    pub fn new(manager: StateManager, provisioner: Arc<dyn FolderProvisioner>) -> Self {
        Self {
            manager,
            provisioner,
        }
    }

    /// Provision the workspace folder for a user at `DRIVE` and move them
    /// into `ACTIVE`.
    ///
    /// The folder row is reserved as `PENDING`, created in Drive, given a
    /// README, and then marked `ACTIVE`. A failure after the reservation
    /// marks the row `FAILED`.
    pub async fn deploy_folder(
        &self,
        user_id: &str,
        owner_email: &str,
    ) -> Result<ProvisionedFolder, ServiceError> {
        let store = self.manager.store();
        let user = store
            .get_user_by_auth_id(user_id)
            .await?
            .ok_or(StateError::UserNotFound)?;
        if user.current_state != OnboardingState::Drive.as_str() {
            return Err(StateError::InvalidTransition {
                from: user.current_state,
                to: OnboardingState::Active.to_string(),
            }
            .into());
        }

        self.report(user_id, json!({ "type": "folder_deployment", "status": "started" }))
            .await?;

        let existing = match store.list_folder_names().await {
            Ok(names) => names,
            Err(e) => {
                warn!(user_id, error = %e, "Could not list existing folders, numbering from 01");
                Vec::new()
            }
        };
        let name = next_folder_name(&existing);
        let record = store.create_folder(user.id, &name).await?;

        let folder = match self.provisioner.create_folder(&name, owner_email).await {
            Ok(folder) => folder,
            Err(e) => return Err(self.fail_deployment(user_id, record.id, e).await),
        };

        self.report(
            user_id,
            json!({
                "type": "folder_deployment",
                "status": "folder_created",
                "folder_id": folder.id,
                "folder_name": folder.name,
            }),
        )
        .await?;

        let readme = readme_content(
            &folder.name,
            owner_email,
            &Utc::now(),
            folder_number(&name).unwrap_or(1),
        );
        let readme_file = match self
            .provisioner
            .upload_file(&folder.id, README_NAME, README_MIME, readme.into_bytes())
            .await
        {
            Ok(file) => file,
            Err(e) => return Err(self.fail_deployment(user_id, record.id, e).await),
        };

        self.report(
            user_id,
            json!({
                "type": "folder_deployment",
                "status": "readme_uploaded",
                "file_id": readme_file.id,
            }),
        )
        .await?;

        store.activate_folder(record.id, &folder.id, &folder.url).await?;

        let completed = StateUpdate {
            current_state: Some(OnboardingState::Active.to_string()),
            state_metadata: Some(json!({
                "folder_deployment": { "type": "folder_deployment", "status": "completed" },
                "active_folder_id": record.id,
                "folder_id": folder.id,
                "folder_name": folder.name,
                "folder_url": folder.url,
                "deployment_status": "completed",
                "deployed_at": Utc::now().to_rfc3339(),
            })),
        };
        if !self.manager.notify_state_change(user_id, &completed).await {
            return Err(ServiceError::Provisioning(
                "folder created but activation was not recorded".into(),
            ));
        }

        info!(user_id, folder_id = %folder.id, folder_name = %folder.name, "Workspace folder deployed");
        Ok(folder)
    }

    /// Mark the reserved row failed and tell the user, keeping `error` as
    /// the result.
    async fn fail_deployment(&self, user_id: &str, folder_id: Uuid, error: String) -> ServiceError {
        if let Err(e) = self
            .manager
            .store()
            .set_folder_status(folder_id, FolderStatus::Failed)
            .await
        {
            warn!(user_id, %folder_id, error = %e, "Could not mark folder as failed");
        }
        let progress = json!({
            "type": "folder_deployment",
            "status": "failed",
            "error": error,
        });
        if let Err(e) = self.report(user_id, progress).await {
            warn!(user_id, error = %e, "Could not record failed deployment");
        }
        ServiceError::Provisioning(error)
    }

    /// Record deployment progress while the user stays at `DRIVE`.
    async fn report(&self, user_id: &str, progress: Value) -> Result<(), ServiceError> {
        let update = StateUpdate {
            current_state: Some(OnboardingState::Drive.to_string()),
            state_metadata: Some(json!({ "folder_deployment": progress })),
        };
        if self.manager.notify_state_change(user_id, &update).await {
            Ok(())
        } else {
            Err(ServiceError::Provisioning(
                "deployment progress could not be recorded".into(),
            ))
        }
    }

    /// The user's current snapshot plus the record of their active folder
    /// (`null` when there is none) and a `last_updated` stamp.
    pub async fn active_info(&self, user_id: &str) -> StateSnapshot {
        let mut snapshot = self.manager.get_current_state(Some(user_id)).await;

        let folder_id = snapshot
            .state_metadata
            .get("active_folder_id")
            .and_then(Value::as_str)
            .and_then(|id| Uuid::parse_str(id).ok());
        let folder = match folder_id {
            Some(id) => match self.manager.store().get_folder(id).await {
                Ok(folder) => folder,
                Err(e) => {
                    warn!(user_id, folder_id = %id, error = %e, "Folder lookup failed");
                    None
                }
            },
            None => None,
        };

        if let Value::Object(ref mut metadata) = snapshot.state_metadata {
            metadata.insert("folder".into(), json!(folder));
            metadata.insert("last_updated".into(), json!(Utc::now().to_rfc3339()));
        }
        snapshot
    }

    /// Totals across the user's active folders, or `None` when they have
    /// none or the lookup fails.
    pub async fn folder_stats(&self, user_id: &str) -> Option<FolderStats> {
        let store = self.manager.store();
        let user = match store.get_user_by_auth_id(user_id).await {
            Ok(Some(user)) => user,
            Ok(None) => return None,
            Err(e) => {
                warn!(user_id, error = %e, "User lookup for folder stats failed");
                return None;
            }
        };
        match store.list_folders(user.id, Some(FolderStatus::Active)).await {
            Ok(folders) if folders.is_empty() => None,
            Ok(folders) => Some(FolderStats::from_folders(folders)),
            Err(e) => {
                warn!(user_id, error = %e, "Folder listing failed");
                None
            }
        }
    }

    /// Record the current size and file count of a folder. Returns whether a
    /// folder row was updated.
    pub async fn update_folder_stats(&self, folder_id: Uuid, size_bytes: i64, file_count: i64) -> bool {
        match self
            .manager
            .store()
            .update_folder_stats(folder_id, size_bytes, file_count)
            .await
        {
            Ok(updated) => updated,
            Err(e) => {
                warn!(%folder_id, error = %e, "Folder stats update failed");
                false
            }
        }
    }

    pub fn requirements(&self) -> StateRequirements {
        StateRequirements::for_state(OnboardingState::Active)
    }
}
