//! Workspace folder records.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of a workspace folder row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FolderStatus {
    /// Reserved by name, not yet created in Drive.
    Pending,
    Active,
    Failed,
}

impl FolderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Active => "ACTIVE",
            Self::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for FolderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FolderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "ACTIVE" => Ok(Self::Active),
            "FAILED" => Ok(Self::Failed),
            other => Err(format!("unknown folder status: {other}")),
        }
    }
}

/// A row of the `folders` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FolderRecord {
    pub id: Uuid,
    /// Internal id of the owning user.
    pub user_id: Uuid,
    pub name: String,
    pub status: FolderStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drive_folder_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_url: Option<String>,
    pub storage_limit_gb: i64,
    pub current_size_bytes: i64,
    pub file_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Totals across a user's active folders.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FolderStats {
    pub folder_count: usize,
    pub total_size_bytes: i64,
    pub total_files: i64,
    pub folders: Vec<FolderRecord>,
}

impl FolderStats {
    pub fn from_folders(folders: Vec<FolderRecord>) -> Self {
        Self {
            folder_count: folders.len(),
            total_size_bytes: folders.iter().map(|f| f.current_size_bytes).sum(),
            total_files: folders.iter().map(|f| f.file_count).sum(),
            folders,
        }
    }
}
