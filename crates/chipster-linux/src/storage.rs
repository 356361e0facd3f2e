use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;

use chipster_platform::storage::{
    PermissionModel, PermissionPrompter, PermissionState, StoragePermission,
};

/// Desktop platforms have no storage permission prompt; access is governed
/// by ordinary file modes, which the directory walk already tolerates.
pub struct DesktopPermissions;

#[async_trait]
impl PermissionPrompter for DesktopPermissions {
    fn model(&self) -> PermissionModel {
        PermissionModel::Unrestricted
    }

    async fn request_multiple(
        &self,
        permissions: &[StoragePermission],
    ) -> Result<HashMap<StoragePermission, PermissionState>> {
        Ok(permissions.iter().map(|p| (*p, PermissionState::Granted)).collect())
    }

    fn has_manage_all_files(&self) -> bool {
        true
    }

    async fn request_manage_all_files(&self) -> Result<PermissionState> {
        Ok(PermissionState::Granted)
    }
}
