//! Breadth-first search for a named directory.

use std::collections::VecDeque;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use chipster_platform::filesystem::FileSystem;

use crate::error::BootstrapError;

/// Path segments of app-private storage; listing them fails on newer
/// platform versions, so they are never entered.
const RESTRICTED_SEGMENTS: [&str; 2] = ["/Android/data", "/Android/obb"];

pub fn is_restricted(path: &str) -> bool {
    RESTRICTED_SEGMENTS.iter().any(|seg| path.contains(seg))
}

pub struct DirectoryWalker<'a> {
    fs: &'a dyn FileSystem,
    cancel: CancellationToken,
}

impl<'a> DirectoryWalker<'a> {
    pub fn new(fs: &'a dyn FileSystem) -> Self {
        Self {
            fs,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancel(fs: &'a dyn FileSystem, cancel: CancellationToken) -> Self {
        Self { fs, cancel }
    }

    /// Find the first directory named `target` below `root`, level by level.
    ///
    /// Children are visited in listing order, so among several matches the
    /// shallowest one reached first wins. A cancelled search returns `None`.
    pub fn find_named(&self, root: &str, target: &str) -> Option<String> {
        debug!("searching for {} under {}", target, root);
        let mut queue = VecDeque::from([root.to_string()]);

        while let Some(dir) = queue.pop_front() {
            if self.cancel.is_cancelled() {
                debug!("search for {} under {} cancelled", target, root);
                return None;
            }
            if is_restricted(&dir) {
                debug!("skipping restricted directory {}", dir);
                continue;
            }

            let entries = match self.fs.list_dir(&dir) {
                Ok(entries) => entries,
                Err(e) => {
                    let failure = BootstrapError::ListingFailure {
                        path: dir,
                        message: format!("{:#}", e),
                    };
                    debug!("{}", failure);
                    continue;
                }
            };

            for entry in entries.into_iter().filter(|e| e.is_dir) {
                if entry.name == target {
                    debug!("found {} at {}", target, entry.path);
                    return Some(entry.path);
                }
                queue.push_back(entry.path);
            }
        }

        debug!("{} not found under {}", target, root);
        None
    }
}
