use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PermissionState {
    #[default]
    Unknown,
    Granted,
    Denied,
}

/// The scoped storage permissions of the legacy permission model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StoragePermission {
    ReadExternalStorage,
    WriteExternalStorage,
}

/// Which permission scheme the running platform uses for shared storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PermissionModel {
    /// Per-permission runtime grants, requested together in one prompt
    Legacy,
    /// A single broad "manage all files" grant
    ManageAllFiles,
    /// No storage permission concept (desktop platforms)
    Unrestricted,
}

#[async_trait]
pub trait PermissionPrompter: Send + Sync {
    fn model(&self) -> PermissionModel;

    /// Show one batched prompt for all of `permissions`.
    async fn request_multiple(
        &self,
        permissions: &[StoragePermission],
    ) -> Result<HashMap<StoragePermission, PermissionState>>;

    /// Whether the broad grant is already held, without prompting.
    fn has_manage_all_files(&self) -> bool;

    async fn request_manage_all_files(&self) -> Result<PermissionState>;
}
