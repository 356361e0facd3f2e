use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{info, warn};

use chipster_platform::storage::{
    PermissionModel, PermissionPrompter, PermissionState, StoragePermission,
};

const LEGACY_PERMISSIONS: [StoragePermission; 2] = [
    StoragePermission::ReadExternalStorage,
    StoragePermission::WriteExternalStorage,
];

/// Normalizes the platform permission models into one read-access check.
pub struct StorageGate {
    prompter: Arc<dyn PermissionPrompter>,
    granted: AtomicBool,
}

impl StorageGate {
    pub fn new(prompter: Arc<dyn PermissionPrompter>) -> Self {
        Self {
            prompter,
            granted: AtomicBool::new(false),
        }
    }

    /// Prompts at most until the first grant; denial is `false`, never an error.
    pub async fn ensure_read_access(&self) -> bool {
        if self.granted.load(Ordering::SeqCst) {
            return true;
        }

        let granted = match self.prompter.model() {
            PermissionModel::Unrestricted => true,
            PermissionModel::Legacy => self.request_legacy().await,
            PermissionModel::ManageAllFiles => self.request_manage_all_files().await,
        };

        if granted {
            info!("storage permissions granted");
            self.granted.store(true, Ordering::SeqCst);
        } else {
            info!("storage permissions denied");
        }
        granted
    }

    pub fn state(&self) -> PermissionState {
        if self.granted.load(Ordering::SeqCst) {
            PermissionState::Granted
        } else {
            PermissionState::Unknown
        }
    }

    async fn request_legacy(&self) -> bool {
        match self.prompter.request_multiple(&LEGACY_PERMISSIONS).await {
            Ok(results) => LEGACY_PERMISSIONS
                .iter()
                .all(|p| results.get(p) == Some(&PermissionState::Granted)),
            Err(e) => {
                warn!("storage permission request failed: {:#}", e);
                false
            }
        }
    }

    async fn request_manage_all_files(&self) -> bool {
        if self.prompter.has_manage_all_files() {
            return true;
        }
        match self.prompter.request_manage_all_files().await {
            Ok(state) => state == PermissionState::Granted,
            Err(e) => {
                warn!("manage-all-files request failed: {:#}", e);
                false
            }
        }
    }
}
