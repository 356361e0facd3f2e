use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chipster_platform::filesystem::{DirEntry, FileSystem};
use tracing::{debug, info, warn};

pub struct UnixFileSystem {
    /// Root that asset ids are resolved against
    assets_dir: PathBuf,
}

impl UnixFileSystem {
    pub fn new(assets_dir: impl Into<PathBuf>) -> Self {
        Self {
            assets_dir: assets_dir.into(),
        }
    }
}

impl FileSystem for UnixFileSystem {
    fn list_dir(&self, path: &str) -> Result<Vec<DirEntry>> {
        let entries = fs::read_dir(path)
            .with_context(|| format!("failed to read directory {}", path))?;

        let mut result = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!("skipping dir entry: {}", e);
                    continue;
                }
            };

            // Symlinks are reported as non-directories so link cycles
            // cannot trap a breadth-first search.
            let is_dir = match entry.file_type() {
                Ok(t) => t.is_dir(),
                Err(e) => {
                    warn!("skipping {}: {}", entry.path().display(), e);
                    continue;
                }
            };

            result.push(DirEntry {
                name: entry.file_name().to_string_lossy().to_string(),
                path: entry.path().to_string_lossy().to_string(),
                is_dir,
            });
        }

        // read_dir order is unspecified; sort for a stable search order
        result.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(result)
    }

    fn exists(&self, path: &str) -> bool {
        Path::new(path).exists()
    }

    fn copy_asset(&self, asset_id: &str, dest: &str) -> Result<String> {
        let source = self.assets_dir.join(asset_id);
        let dest_path = Path::new(dest);
        debug!("copying asset {} to {}", source.display(), dest);

        if dest_path.exists() {
            debug!("binary already exists at {}", dest);
            return Ok(dest.to_string());
        }

        if let Some(parent) = dest_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create parent dirs for {}", dest))?;
        }
        let bytes = fs::copy(&source, dest_path)
            .with_context(|| format!("failed to copy asset {} to {}", source.display(), dest))?;

        info!("copied asset {} ({} bytes)", asset_id, bytes);
        Ok(dest.to_string())
    }

    fn set_executable(&self, path: &str) -> Result<()> {
        let mut perms = fs::metadata(path)
            .with_context(|| format!("failed to stat {}", path))?
            .permissions();
        perms.set_mode(perms.mode() | 0o755);
        fs::set_permissions(path, perms)
            .with_context(|| format!("failed to set executable permissions on {}", path))
    }
}
