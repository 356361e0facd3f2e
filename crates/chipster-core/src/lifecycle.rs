use std::fmt;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use chipster_platform::filesystem::FileSystem;
use chipster_platform::process::{LogSink, ProcessSpawner, SpawnSpec, SupervisedChild};
use chipster_platform::server::{ListenerId, ServerOptions, StateEvent, StaticServer};

use crate::error::{BootstrapError, Result};
use crate::vhost::{FastCgiTarget, ServiceConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Stopped,
    Starting,
    Running,
    FailedToStart,
    Stopping,
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServiceState::Stopped => "Stopped",
            ServiceState::Starting => "Starting",
            ServiceState::Running => "Running",
            ServiceState::FailedToStart => "Failed to start",
            ServiceState::Stopping => "Stopping",
        };
        f.write_str(s)
    }
}

/// Snapshot published to observers on every transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceStatus {
    pub state: ServiceState,
    pub origin: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerExecutable {
    /// Copy a bundled asset into the work dir and run the copy
    Asset { asset_id: String, output_name: String },
    /// Run an executable already on disk
    Path(String),
}

/// The FastCGI worker process started alongside the HTTP service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSpec {
    pub executable: WorkerExecutable,
    pub work_dir: PathBuf,
}

/// Owns the HTTP service and the optional worker process of one session.
pub struct ServiceLifecycle {
    state: ServiceState,
    origin: Option<String>,
    last_error: Option<String>,
    server: Box<dyn StaticServer>,
    listener: Option<ListenerId>,
    last_event: Arc<Mutex<Option<StateEvent>>>,
    fs: Arc<dyn FileSystem>,
    spawner: Arc<dyn ProcessSpawner>,
    worker: Option<WorkerSpec>,
    php_process: Option<SupervisedChild>,
    worker_log: LogSink,
    status_tx: watch::Sender<ServiceStatus>,
}

impl ServiceLifecycle {
    pub fn new(
        mut server: Box<dyn StaticServer>,
        fs: Arc<dyn FileSystem>,
        spawner: Arc<dyn ProcessSpawner>,
    ) -> Self {
        let last_event = Arc::new(Mutex::new(None));
        let sink = last_event.clone();
        let listener = server.add_state_listener(Box::new(move |event: &StateEvent| {
            info!("server state: \"{}\", details: \"{}\"", event.state, event.details);
            if let Some(err) = &event.error {
                error!("server error: {}", err);
            }
            if let Ok(mut last) = sink.lock() {
                *last = Some(event.clone());
            }
        }));

        let (status_tx, _) = watch::channel(ServiceStatus {
            state: ServiceState::Stopped,
            origin: None,
            error: None,
        });

        Self {
            state: ServiceState::Stopped,
            origin: None,
            last_error: None,
            server,
            listener: Some(listener),
            last_event,
            fs,
            spawner,
            worker: None,
            php_process: None,
            worker_log: LogSink::new("php-cgi"),
            status_tx,
        }
    }

    pub fn with_worker(mut self, worker: WorkerSpec) -> Self {
        self.worker = Some(worker);
        self
    }

    pub fn state(&self) -> ServiceState {
        self.state
    }

    pub fn origin(&self) -> Option<&str> {
        self.origin.as_deref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn last_server_event(&self) -> Option<StateEvent> {
        self.last_event.lock().ok().and_then(|last| last.clone())
    }

    /// Pid of the running worker, if any
    pub fn php_process_id(&self) -> Option<u32> {
        self.php_process.as_ref().and_then(|p| p.id())
    }

    pub fn has_php_process(&self) -> bool {
        self.php_process.is_some()
    }

    pub fn worker_log(&self) -> &LogSink {
        &self.worker_log
    }

    pub fn subscribe(&self) -> watch::Receiver<ServiceStatus> {
        self.status_tx.subscribe()
    }

    /// Bring the service up. Valid from Stopped, or FailedToStart as an explicit retry.
    pub async fn start(&mut self, config: ServiceConfig) -> Result<String> {
        match self.state {
            ServiceState::Stopped | ServiceState::FailedToStart => {}
            state => {
                warn!("start rejected: service is {}", state);
                return Err(BootstrapError::AlreadyRunning);
            }
        }

        self.last_error = None;
        self.set_state(ServiceState::Starting);

        match self.bring_up(&config).await {
            Ok(origin) => {
                info!("service running at {}", origin);
                self.origin = Some(origin.clone());
                self.set_state(ServiceState::Running);
                Ok(origin)
            }
            Err(e) => {
                error!("service failed to start: {}", e);
                if let Some(child) = self.php_process.take() {
                    if let Err(kill_err) = child.shutdown().await {
                        warn!("failed to kill worker after failed start: {:#}", kill_err);
                    }
                }
                self.origin = None;
                self.last_error = Some(e.to_string());
                self.set_state(ServiceState::FailedToStart);
                Err(e)
            }
        }
    }

    /// Tear everything down. A no-op when already stopped.
    pub async fn stop(&mut self) -> anyhow::Result<()> {
        if self.state == ServiceState::Stopped {
            debug!("stop requested while already stopped");
            return Ok(());
        }

        self.set_state(ServiceState::Stopping);
        let mut first_error = None;

        if let Err(e) = self.server.stop().await {
            error!("failed to stop HTTP service: {:#}", e);
            first_error.get_or_insert(e);
        }
        if let Some(child) = self.php_process.take() {
            info!("terminating worker process {:?}", child.id());
            if let Err(e) = child.shutdown().await {
                error!("failed to terminate worker: {:#}", e);
                first_error.get_or_insert(e);
            }
        }

        self.origin = None;
        self.set_state(ServiceState::Stopped);
        info!("service stopped");

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Return from FailedToStart to Stopped without touching the service.
    pub fn reset(&mut self) {
        if self.state == ServiceState::FailedToStart {
            self.last_error = None;
            self.set_state(ServiceState::Stopped);
        }
    }

    /// Drop the worker handle if the process has exited on its own.
    pub async fn check_worker(&mut self) -> Option<ExitStatus> {
        let child = self.php_process.as_mut()?;
        match child.try_exit_status() {
            Ok(Some(status)) => {
                warn!("worker process exited: {}", status);
                if let Some(child) = self.php_process.take() {
                    if let Err(e) = child.shutdown().await {
                        warn!("failed to release exited worker: {:#}", e);
                    }
                }
                Some(status)
            }
            Ok(None) => None,
            Err(e) => {
                warn!("failed to poll worker process: {:#}", e);
                None
            }
        }
    }

    /// Stop and unsubscribe from the HTTP service
    pub async fn shutdown(mut self) -> anyhow::Result<()> {
        let result = self.stop().await;
        if let Some(id) = self.listener.take() {
            self.server.remove_state_listener(id);
        }
        result
    }

    async fn bring_up(&mut self, config: &ServiceConfig) -> Result<String> {
        match (self.worker.clone(), &config.fastcgi) {
            (Some(worker), Some(target)) => self.spawn_worker(&worker, target)?,
            (Some(_), None) => warn!("no FastCGI target configured, worker not started"),
            _ => {}
        }

        let options = ServerOptions {
            file_dir: config.root_directory.clone(),
            hostname: config.listen_host.clone(),
            port: config.listen_port,
            extra_config: config.rendered_config.clone(),
            stop_in_background: config.stop_in_background,
        };

        self.server
            .start(&options)
            .await
            .map_err(|e| BootstrapError::BindFailure(format!("{:#}", e)))
    }

    fn spawn_worker(&mut self, worker: &WorkerSpec, target: &FastCgiTarget) -> Result<()> {
        let program = self.prepare_executable(worker)?;

        let spec = SpawnSpec {
            program: PathBuf::from(&program),
            args: vec!["-b".to_string(), target.bind_arg()],
            working_dir: Some(worker.work_dir.clone()),
        };
        info!("spawning worker: {} -b {}", program, target.bind_arg());

        let child = self
            .spawner
            .spawn(&spec)
            .map_err(|e| BootstrapError::SpawnFailure(format!("{:#}", e)))?;
        let mut supervised = SupervisedChild::attach(child, &self.worker_log);

        if let Ok(Some(status)) = supervised.try_exit_status() {
            return Err(BootstrapError::SpawnFailure(format!(
                "{} exited immediately: {}",
                program, status
            )));
        }

        info!("worker started, pid {:?}", supervised.id());
        self.php_process = Some(supervised);
        Ok(())
    }

    fn prepare_executable(&self, worker: &WorkerSpec) -> Result<String> {
        match &worker.executable {
            WorkerExecutable::Path(path) => Ok(path.clone()),
            WorkerExecutable::Asset { asset_id, output_name } => {
                let dest = worker.work_dir.join(output_name);
                let dest = dest.to_string_lossy();
                let path = self
                    .fs
                    .copy_asset(asset_id, &dest)
                    .map_err(|e| BootstrapError::AssetCopyFailure(format!("{:#}", e)))?;
                self.fs
                    .set_executable(&path)
                    .map_err(|e| BootstrapError::AssetCopyFailure(format!("{:#}", e)))?;
                Ok(path)
            }
        }
    }

    fn set_state(&mut self, state: ServiceState) {
        debug!("service state {} -> {}", self.state, state);
        self.state = state;
        self.status_tx.send_replace(ServiceStatus {
            state,
            origin: self.origin.clone(),
            error: self.last_error.clone(),
        });
    }
}

impl Drop for ServiceLifecycle {
    fn drop(&mut self) {
        if let Some(id) = self.listener.take() {
            self.server.remove_state_listener(id);
        }
    }
}
