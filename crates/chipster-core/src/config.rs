use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const ANDROID_INTERNAL_ROOT: &str = "/storage/emulated/0";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChipsterConfig {
    /// Name of the content folder to search for
    #[serde(default = "default_target_name")]
    pub target_name: String,

    #[serde(default = "default_listen_host")]
    pub listen_host: String,

    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    /// Root of the internal shared storage (e.g., /storage/emulated/0)
    #[serde(default = "default_internal_storage_root")]
    pub internal_storage_root: String,

    /// Download directory; defaults to `<internal_storage_root>/Download`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_dir: Option<String>,

    /// Removable storage root; defaults to the internal root with the
    /// emulated user segment stripped
    #[serde(skip_serializing_if = "Option::is_none")]
    pub removable_storage_root: Option<String>,

    /// Top-level web folders always served as-is by the rewrite rules
    #[serde(default = "default_web_folders")]
    pub default_web_folders: Vec<String>,

    #[serde(default)]
    pub stop_in_background: bool,

    /// lighttpd executable (looked up on PATH when not absolute)
    #[serde(default = "default_lighttpd_binary")]
    pub lighttpd_binary: String,

    /// Writable directory for generated config and the worker executable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub work_dir: Option<PathBuf>,

    /// Directory bundled assets are copied from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assets_dir: Option<PathBuf>,

    /// FastCGI/PHP worker; absent means static files only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub php: Option<PhpConfig>,

    /// Open the service origin in the system browser once running
    #[serde(default)]
    pub open_browser: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhpConfig {
    /// Use an already-installed php-cgi instead of copying the asset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executable: Option<String>,

    #[serde(default = "default_php_asset")]
    pub asset: String,

    /// File name of the copied executable inside the work dir
    #[serde(default = "default_php_output_name")]
    pub output_name: String,

    /// `host:port` or a unix socket path
    #[serde(default = "default_php_bind")]
    pub bind: String,
}

fn default_target_name() -> String {
    "ChipsterContent".to_string()
}
fn default_listen_host() -> String {
    "127.0.0.1".to_string()
}
fn default_listen_port() -> u16 {
    8432
}
fn default_internal_storage_root() -> String {
    ANDROID_INTERNAL_ROOT.to_string()
}
fn default_web_folders() -> Vec<String> {
    ["css", "js", "images", "fonts"].iter().map(|s| s.to_string()).collect()
}
fn default_lighttpd_binary() -> String {
    "lighttpd".to_string()
}
fn default_php_asset() -> String {
    "php/php-cgi".to_string()
}
fn default_php_output_name() -> String {
    "php-cgi".to_string()
}
fn default_php_bind() -> String {
    "127.0.0.1:9000".to_string()
}

impl Default for ChipsterConfig {
    fn default() -> Self {
        Self {
            target_name: default_target_name(),
            listen_host: default_listen_host(),
            listen_port: default_listen_port(),
            internal_storage_root: default_internal_storage_root(),
            download_dir: None,
            removable_storage_root: None,
            default_web_folders: default_web_folders(),
            stop_in_background: false,
            lighttpd_binary: default_lighttpd_binary(),
            work_dir: None,
            assets_dir: None,
            php: None,
            open_browser: false,
        }
    }
}

impl Default for PhpConfig {
    fn default() -> Self {
        Self {
            executable: None,
            asset: default_php_asset(),
            output_name: default_php_output_name(),
            bind: default_php_bind(),
        }
    }
}

impl ChipsterConfig {
    /// Default config file path for this platform
    pub fn default_path() -> PathBuf {
        if let Some(dirs) = project_dirs() {
            dirs.config_dir().join("config.json")
        } else {
            PathBuf::from("chipster-config.json")
        }
    }

    /// Load config from a file path
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;
        let config: Self =
            serde_json::from_str(&data).with_context(|| "failed to parse config JSON")?;
        Ok(config)
    }

    /// Save config to a file path
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create config dir {}", parent.display()))?;
        }
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(path, data)
            .with_context(|| format!("failed to write config to {}", path.display()))?;
        Ok(())
    }

    pub fn download_dir(&self) -> String {
        match &self.download_dir {
            Some(dir) => dir.clone(),
            None => format!("{}/Download", self.internal_storage_root.trim_end_matches('/')),
        }
    }

    pub fn removable_storage_root(&self) -> String {
        match &self.removable_storage_root {
            Some(root) => root.clone(),
            None => self.internal_storage_root.replacen(ANDROID_INTERNAL_ROOT, "/storage", 1),
        }
    }

    pub fn work_dir(&self) -> PathBuf {
        if let Some(dir) = &self.work_dir {
            return dir.clone();
        }
        match project_dirs() {
            Some(dirs) => dirs.data_dir().to_path_buf(),
            None => std::env::temp_dir().join("chipster"),
        }
    }

    pub fn assets_dir(&self) -> PathBuf {
        match &self.assets_dir {
            Some(dir) => dir.clone(),
            None => self.work_dir().join("assets"),
        }
    }
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("com", "chipster", "chipster")
}
