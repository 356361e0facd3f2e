use anyhow::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub name: String,
    pub path: String,
    pub is_dir: bool,
}

pub trait FileSystem: Send + Sync {
    /// List the immediate children of `path`.
    fn list_dir(&self, path: &str) -> Result<Vec<DirEntry>>;

    fn exists(&self, path: &str) -> bool;

    /// Copy a bundled asset to `dest`. Returns the destination path.
    /// An existing destination is left untouched.
    fn copy_asset(&self, asset_id: &str, dest: &str) -> Result<String>;

    /// Mark `path` executable for the current user
    fn set_executable(&self, path: &str) -> Result<()>;
}
