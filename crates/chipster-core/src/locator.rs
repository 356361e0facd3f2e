use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use chipster_platform::filesystem::FileSystem;

use crate::config::ChipsterConfig;
use crate::walker::DirectoryWalker;

/// Candidate roots for the content search, in priority order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRoots {
    pub download: String,
    pub internal: String,
    pub removable: String,
}

impl SearchRoots {
    pub fn from_config(config: &ChipsterConfig) -> Self {
        Self {
            download: config.download_dir(),
            internal: config.internal_storage_root.clone(),
            removable: config.removable_storage_root(),
        }
    }
}

/// Clears the searching flag on every exit path of `locate`.
struct SearchingGuard<'a>(&'a AtomicBool);

impl Drop for SearchingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct ContentLocator {
    fs: Arc<dyn FileSystem>,
    roots: SearchRoots,
    searching: Arc<AtomicBool>,
    cancel: Mutex<CancellationToken>,
}

impl ContentLocator {
    pub fn new(fs: Arc<dyn FileSystem>, roots: SearchRoots) -> Self {
        Self {
            fs,
            roots,
            searching: Arc::new(AtomicBool::new(false)),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    /// Advisory flag for UI feedback while a search runs
    pub fn is_searching(&self) -> bool {
        self.searching.load(Ordering::SeqCst)
    }

    /// Token that aborts the current (or next) search when cancelled.
    /// Once a cancelled search returns, later searches get a fresh token.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Search the roots in priority order; first match wins.
    pub async fn locate(&self, target: &str) -> Option<String> {
        self.searching.store(true, Ordering::SeqCst);
        let _guard = SearchingGuard(&self.searching);

        let fs = self.fs.clone();
        let roots = self.roots.clone();
        let target = target.to_string();
        let cancel = self.cancel_token();
        let walk_cancel = cancel.clone();

        let found = tokio::task::spawn_blocking(move || {
            locate_blocking(fs.as_ref(), &roots, &target, walk_cancel)
        })
        .await;

        if cancel.is_cancelled() {
            info!("content search cancelled");
            self.reset_cancel();
        }

        match found {
            Ok(found) => found,
            Err(e) => {
                warn!("content search task failed: {}", e);
                None
            }
        }
    }

    fn reset_cancel(&self) {
        let mut current = self.cancel.lock().unwrap_or_else(PoisonError::into_inner);
        if current.is_cancelled() {
            *current = CancellationToken::new();
        }
    }
}

fn locate_blocking(
    fs: &dyn FileSystem,
    roots: &SearchRoots,
    target: &str,
    cancel: CancellationToken,
) -> Option<String> {
    let walker = DirectoryWalker::with_cancel(fs, cancel);

    info!("searching for {} in download directory {}", target, roots.download);
    if let Some(found) = walker.find_named(&roots.download, target) {
        return Some(found);
    }

    info!("searching for {} in internal storage root {}", target, roots.internal);
    if let Some(found) = walker.find_named(&roots.internal, target) {
        return Some(found);
    }

    if roots.removable != roots.internal {
        if fs.exists(&roots.removable) {
            info!(
                "searching for {} in removable storage root {}",
                target, roots.removable
            );
            if let Some(found) = walker.find_named(&roots.removable, target) {
                return Some(found);
            }
        } else {
            info!("removable storage root {} not present, skipping", roots.removable);
        }
    }

    None
}
