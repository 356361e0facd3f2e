//! Fixed naming rules from a located content folder to its siblings.
//!
//! Everything here is string manipulation only; the filesystem is never
//! consulted.

use std::collections::BTreeMap;

pub const CONTENT_SUFFIX: &str = "Content";
pub const ENGINE_SUFFIX: &str = "Engine";

pub const SEARCH_HOST: &str = "chipstersearch";
pub const WEB_MAKER_HOST: &str = "chipsterwebmaker";
pub const SUPPORT_HOST: &str = "chipstersupport";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedPaths {
    pub content_root: String,
    pub engine_root: String,
    pub search: String,
    pub web_maker: String,
    pub support: String,
    pub error_pages: String,
    pub logs: String,
    /// Server root of the simple-vhost module
    pub web_content: String,
}

impl DerivedPaths {
    pub fn derive(content_path: &str) -> Self {
        let content_root = match content_path.trim_end_matches('/') {
            "" => "/",
            trimmed => trimmed,
        }
        .to_string();
        let engine_root = engine_root_for(&content_root);
        let under = |name: &str| format!("{}/{}", engine_root.trim_end_matches('/'), name);

        Self {
            search: under("ChipsterSearch"),
            web_maker: under("ChipsterWebMaker"),
            support: under("ChipsterSupport"),
            error_pages: under("ErrorPages"),
            logs: under("logs"),
            web_content: format!("{}/WebContent", content_root.trim_end_matches('/')),
            engine_root,
            content_root,
        }
    }

    /// Reserved virtual host name -> document root
    pub fn virtual_hosts(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (SEARCH_HOST.to_string(), self.search.clone()),
            (WEB_MAKER_HOST.to_string(), self.web_maker.clone()),
            (SUPPORT_HOST.to_string(), self.support.clone()),
        ])
    }

    /// Every derived path with its logical name
    pub fn entries(&self) -> [(&'static str, &str); 8] {
        [
            ("content root", self.content_root.as_str()),
            ("engine root", self.engine_root.as_str()),
            ("search", self.search.as_str()),
            ("web maker", self.web_maker.as_str()),
            ("support", self.support.as_str()),
            ("error pages", self.error_pages.as_str()),
            ("logs", self.logs.as_str()),
            ("web content", self.web_content.as_str()),
        ]
    }
}

/// `.../ChipsterContent` -> `.../ChipsterEngine`. Without the suffix the
/// content folder doubles as engine root.
fn engine_root_for(content_root: &str) -> String {
    match content_root.strip_suffix(CONTENT_SUFFIX) {
        Some(stem) if !stem.is_empty() && !stem.ends_with('/') => {
            format!("{}{}", stem, ENGINE_SUFFIX)
        }
        _ => content_root.to_string(),
    }
}
