#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::process::ExitStatus;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;

use chipster_platform::filesystem::{DirEntry, FileSystem};
use chipster_platform::process::{ChildProcess, OutputReader, ProcessSpawner, SpawnSpec};
use chipster_platform::server::{
    ListenerId, ListenerSet, ServerOptions, ServerState, StateEvent, StateListener, StaticServer,
};
use chipster_platform::storage::{
    PermissionModel, PermissionPrompter, PermissionState, StoragePermission,
};

/// In-memory directory tree. Children list in insertion order.
#[derive(Default)]
pub struct MemoryFs {
    dirs: Mutex<BTreeMap<String, Vec<DirEntry>>>,
    unreadable: Mutex<Vec<String>>,
    pub listed: Mutex<Vec<String>>,
    pub exists_checked: Mutex<Vec<String>>,
    pub copied: Mutex<Vec<(String, String)>>,
    pub fail_copy: AtomicBool,
    pub accesses: AtomicUsize,
}

impl MemoryFs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dirs(paths: &[&str]) -> Self {
        let fs = Self::new();
        for path in paths {
            fs.add_dir(path);
        }
        fs
    }

    pub fn add_dir(&self, path: &str) {
        let mut dirs = self.dirs.lock().unwrap();
        let mut current = String::new();
        dirs.entry("/".to_string()).or_default();
        for segment in path.trim_matches('/').split('/').filter(|s| !s.is_empty()) {
            let parent = if current.is_empty() { "/".to_string() } else { current.clone() };
            current = format!("{}/{}", current, segment);
            let children = dirs.entry(parent).or_default();
            if !children.iter().any(|e| e.path == current) {
                children.push(DirEntry {
                    name: segment.to_string(),
                    path: current.clone(),
                    is_dir: true,
                });
            }
            dirs.entry(current.clone()).or_default();
        }
    }

    pub fn add_file(&self, path: &str) {
        let (parent, name) = path.rsplit_once('/').unwrap();
        self.add_dir(parent);
        let mut dirs = self.dirs.lock().unwrap();
        dirs.entry(parent.to_string()).or_default().push(DirEntry {
            name: name.to_string(),
            path: path.to_string(),
            is_dir: false,
        });
    }

    /// Listing this directory fails as if permission were denied
    pub fn make_unreadable(&self, path: &str) {
        self.unreadable.lock().unwrap().push(path.to_string());
    }

    pub fn listed(&self) -> Vec<String> {
        self.listed.lock().unwrap().clone()
    }

    pub fn exists_checked(&self) -> Vec<String> {
        self.exists_checked.lock().unwrap().clone()
    }
}

impl FileSystem for MemoryFs {
    fn list_dir(&self, path: &str) -> Result<Vec<DirEntry>> {
        self.accesses.fetch_add(1, Ordering::SeqCst);
        self.listed.lock().unwrap().push(path.to_string());
        if self.unreadable.lock().unwrap().iter().any(|p| p == path) {
            anyhow::bail!("permission denied: {}", path);
        }
        self.dirs
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no such directory: {}", path))
    }

    fn exists(&self, path: &str) -> bool {
        self.accesses.fetch_add(1, Ordering::SeqCst);
        self.exists_checked.lock().unwrap().push(path.to_string());
        self.dirs.lock().unwrap().contains_key(path)
    }

    fn copy_asset(&self, asset_id: &str, dest: &str) -> Result<String> {
        self.accesses.fetch_add(1, Ordering::SeqCst);
        if self.fail_copy.load(Ordering::SeqCst) {
            anyhow::bail!("asset {} not bundled", asset_id);
        }
        self.copied.lock().unwrap().push((asset_id.to_string(), dest.to_string()));
        Ok(dest.to_string())
    }

    fn set_executable(&self, _path: &str) -> Result<()> {
        self.accesses.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Counters shared between a test and the boxed [`StubServer`]
#[derive(Default)]
pub struct ServerProbe {
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
    pub listeners: AtomicUsize,
    pub fail_with: Mutex<Option<String>>,
    pub last_options: Mutex<Option<ServerOptions>>,
}

pub struct StubServer {
    probe: Arc<ServerProbe>,
    listeners: ListenerSet,
}

impl StubServer {
    pub fn new() -> (Self, Arc<ServerProbe>) {
        let probe = Arc::new(ServerProbe::default());
        (
            Self {
                probe: probe.clone(),
                listeners: ListenerSet::default(),
            },
            probe,
        )
    }
}

#[async_trait]
impl StaticServer for StubServer {
    async fn start(&mut self, options: &ServerOptions) -> Result<String> {
        self.probe.starts.fetch_add(1, Ordering::SeqCst);
        *self.probe.last_options.lock().unwrap() = Some(options.clone());
        self.listeners.emit(&StateEvent::new(ServerState::Starting, "starting"));

        let failure = self.probe.fail_with.lock().unwrap().clone();
        if let Some(message) = failure {
            self.listeners
                .emit(&StateEvent::failed(ServerState::Crashed, "bind failed", message.clone()));
            anyhow::bail!(message);
        }

        let origin = format!("http://{}:{}", options.hostname, options.port);
        self.listeners.emit(&StateEvent::new(ServerState::Active, origin.clone()));
        Ok(origin)
    }

    async fn stop(&mut self) -> Result<()> {
        self.probe.stops.fetch_add(1, Ordering::SeqCst);
        self.listeners.emit(&StateEvent::new(ServerState::Inactive, "stopped"));
        Ok(())
    }

    fn add_state_listener(&mut self, listener: StateListener) -> ListenerId {
        let id = self.listeners.add(listener);
        self.probe.listeners.store(self.listeners.len(), Ordering::SeqCst);
        id
    }

    fn remove_state_listener(&mut self, id: ListenerId) {
        self.listeners.remove(id);
        self.probe.listeners.store(self.listeners.len(), Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct SpawnProbe {
    pub spawns: AtomicUsize,
    pub terminated: AtomicUsize,
    pub specs: Mutex<Vec<SpawnSpec>>,
    /// Exit code every spawned child reports once set
    pub exit_code: Mutex<Option<i32>>,
}

impl SpawnProbe {
    pub fn exit_with(&self, code: i32) {
        *self.exit_code.lock().unwrap() = Some(code);
    }
}

/// Spawns [`FakeChild`]ren, or fails when the program path does not exist in
/// `known_programs`.
pub struct StubSpawner {
    probe: Arc<SpawnProbe>,
    known_programs: Vec<String>,
}

impl StubSpawner {
    pub fn new(known_programs: &[&str]) -> (Self, Arc<SpawnProbe>) {
        let probe = Arc::new(SpawnProbe::default());
        (
            Self {
                probe: probe.clone(),
                known_programs: known_programs.iter().map(|s| s.to_string()).collect(),
            },
            probe,
        )
    }
}

impl ProcessSpawner for StubSpawner {
    fn spawn(&self, spec: &SpawnSpec) -> Result<Box<dyn ChildProcess>> {
        self.probe.spawns.fetch_add(1, Ordering::SeqCst);
        self.probe.specs.lock().unwrap().push(spec.clone());
        let program = spec.program.to_string_lossy().to_string();
        if !self.known_programs.contains(&program) {
            anyhow::bail!("failed to spawn {}: No such file or directory (os error 2)", program);
        }
        Ok(Box::new(FakeChild {
            probe: self.probe.clone(),
            stdout: Some(Box::new(&b"PHP worker ready\n"[..])),
            stderr: Some(Box::new(&b""[..])),
        }))
    }
}

pub struct FakeChild {
    probe: Arc<SpawnProbe>,
    stdout: Option<OutputReader>,
    stderr: Option<OutputReader>,
}

#[async_trait]
impl ChildProcess for FakeChild {
    fn id(&self) -> Option<u32> {
        Some(4242)
    }

    fn take_stdout(&mut self) -> Option<OutputReader> {
        self.stdout.take()
    }

    fn take_stderr(&mut self) -> Option<OutputReader> {
        self.stderr.take()
    }

    fn try_exit_status(&mut self) -> Result<Option<ExitStatus>> {
        let code = *self.probe.exit_code.lock().unwrap();
        Ok(code.map(exit_status))
    }

    async fn terminate(&mut self) -> Result<()> {
        self.probe.terminated.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(unix)]
fn exit_status(code: i32) -> ExitStatus {
    use std::os::unix::process::ExitStatusExt;
    // Raw wait status: exit code in the second byte
    ExitStatus::from_raw(code << 8)
}

#[cfg(windows)]
fn exit_status(code: i32) -> ExitStatus {
    use std::os::windows::process::ExitStatusExt;
    ExitStatus::from_raw(code as u32)
}

/// Grants or denies everything under a fixed model
pub struct FixedPrompter {
    pub model: PermissionModel,
    pub answer: PermissionState,
}

impl FixedPrompter {
    pub fn allow() -> Self {
        Self {
            model: PermissionModel::Unrestricted,
            answer: PermissionState::Granted,
        }
    }

    pub fn deny() -> Self {
        Self {
            model: PermissionModel::Legacy,
            answer: PermissionState::Denied,
        }
    }
}

#[async_trait]
impl PermissionPrompter for FixedPrompter {
    fn model(&self) -> PermissionModel {
        self.model
    }

    async fn request_multiple(
        &self,
        permissions: &[StoragePermission],
    ) -> Result<HashMap<StoragePermission, PermissionState>> {
        Ok(permissions.iter().map(|p| (*p, self.answer)).collect())
    }

    fn has_manage_all_files(&self) -> bool {
        self.answer == PermissionState::Granted
    }

    async fn request_manage_all_files(&self) -> Result<PermissionState> {
        Ok(self.answer)
    }
}
