//! Runs lighttpd as the static-file service.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use chipster_platform::process::{LogSink, ProcessSpawner, SpawnSpec, SupervisedChild};
use chipster_platform::server::{
    ListenerId, ListenerSet, ServerOptions, ServerState, StateEvent, StateListener, StaticServer,
};

const CONFIG_FILE_NAME: &str = "lighttpd.conf";
const READY_POLL_INTERVAL: Duration = Duration::from_millis(100);
const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(10);

const MIME_TYPES: [(&str, &str); 12] = [
    (".html", "text/html"),
    (".htm", "text/html"),
    (".css", "text/css"),
    (".js", "application/javascript"),
    (".json", "application/json"),
    (".svg", "image/svg+xml"),
    (".png", "image/png"),
    (".jpg", "image/jpeg"),
    (".gif", "image/gif"),
    (".woff2", "font/woff2"),
    (".pdf", "application/pdf"),
    (".txt", "text/plain"),
];

pub struct LighttpdServer {
    binary: PathBuf,
    /// Where the generated config is written
    work_dir: PathBuf,
    spawner: Arc<dyn ProcessSpawner>,
    process: Option<SupervisedChild>,
    listeners: ListenerSet,
    log: LogSink,
    ready_timeout: Duration,
}

impl LighttpdServer {
    pub fn new(
        binary: impl Into<PathBuf>,
        work_dir: impl Into<PathBuf>,
        spawner: Arc<dyn ProcessSpawner>,
    ) -> Self {
        Self {
            binary: binary.into(),
            work_dir: work_dir.into(),
            spawner,
            process: None,
            listeners: ListenerSet::default(),
            log: LogSink::new("lighttpd"),
            ready_timeout: DEFAULT_READY_TIMEOUT,
        }
    }

    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    /// Output lighttpd wrote to stdout/stderr
    pub fn log(&self) -> &LogSink {
        &self.log
    }

    pub fn is_running(&self) -> bool {
        self.process.is_some()
    }

    async fn launch(&mut self, options: &ServerOptions) -> Result<String> {
        // Fail with the OS error before lighttpd gets a chance to
        // swallow it into its own log.
        let probe = std::net::TcpListener::bind((options.hostname.as_str(), options.port))
            .with_context(|| format!("cannot bind {}:{}", options.hostname, options.port))?;
        drop(probe);

        std::fs::create_dir_all(&self.work_dir)
            .with_context(|| format!("failed to create {}", self.work_dir.display()))?;
        let conf_path = self.work_dir.join(CONFIG_FILE_NAME);
        std::fs::write(&conf_path, render_config(options))
            .with_context(|| format!("failed to write {}", conf_path.display()))?;
        debug!("lighttpd config written to {}", conf_path.display());

        if options.stop_in_background {
            debug!("stop_in_background has no effect for a desktop process");
        }

        let spec = SpawnSpec {
            program: self.binary.clone(),
            args: vec![
                "-D".to_string(),
                "-f".to_string(),
                conf_path.to_string_lossy().to_string(),
            ],
            working_dir: Some(self.work_dir.clone()),
        };
        let child = self.spawner.spawn(&spec)?;
        let mut supervised = SupervisedChild::attach(child, &self.log);

        let ready = wait_ready(
            &mut supervised,
            &options.hostname,
            options.port,
            self.ready_timeout,
        )
        .await;
        if let Err(e) = ready {
            if let Err(kill_err) = supervised.shutdown().await {
                warn!("failed to clean up lighttpd: {:#}", kill_err);
            }
            return Err(e);
        }

        self.process = Some(supervised);
        Ok(format!("http://{}:{}", options.hostname, options.port))
    }
}

#[async_trait]
impl StaticServer for LighttpdServer {
    async fn start(&mut self, options: &ServerOptions) -> Result<String> {
        if self.process.is_some() {
            bail!("lighttpd is already running");
        }

        self.listeners
            .emit(&StateEvent::new(ServerState::Starting, "launching lighttpd"));
        match self.launch(options).await {
            Ok(origin) => {
                info!("lighttpd serving {} at {}", options.file_dir, origin);
                self.listeners.emit(&StateEvent::new(ServerState::Active, origin.clone()));
                Ok(origin)
            }
            Err(e) => {
                self.listeners.emit(&StateEvent::failed(
                    ServerState::Crashed,
                    "lighttpd failed to start",
                    format!("{:#}", e),
                ));
                Err(e)
            }
        }
    }

    async fn stop(&mut self) -> Result<()> {
        let Some(process) = self.process.take() else {
            return Ok(());
        };

        self.listeners
            .emit(&StateEvent::new(ServerState::Stopping, "stopping lighttpd"));
        let result = process.shutdown().await;
        self.listeners
            .emit(&StateEvent::new(ServerState::Inactive, "lighttpd stopped"));
        result
    }

    fn add_state_listener(&mut self, listener: StateListener) -> ListenerId {
        self.listeners.add(listener)
    }

    fn remove_state_listener(&mut self, id: ListenerId) {
        self.listeners.remove(id);
    }
}

/// Poll until the port accepts connections or the process dies.
async fn wait_ready(
    process: &mut SupervisedChild,
    host: &str,
    port: u16,
    timeout: Duration,
) -> Result<()> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Some(status) = process.try_exit_status()? {
            bail!("lighttpd exited during startup: {}", status);
        }
        if TcpStream::connect((host, port)).await.is_ok() {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            bail!(
                "lighttpd did not accept connections on {}:{} within {:?}",
                host,
                port,
                timeout
            );
        }
        tokio::time::sleep(READY_POLL_INTERVAL).await;
    }
}

/// Base configuration followed by the caller's extra config
pub fn render_config(options: &ServerOptions) -> String {
    let mime_types: String = MIME_TYPES
        .iter()
        .map(|(ext, mime)| format!("    \"{}\" => \"{}\",\n", ext, mime))
        .collect();

    let mut out = format!(
        r#"server.document-root = "{file_dir}"
server.bind = "{hostname}"
server.port = {port}
index-file.names = ("index.html", "index.htm")
mimetype.assign = (
{mime_types})

{extra}"#,
        file_dir = options.file_dir,
        hostname = options.hostname,
        port = options.port,
        mime_types = mime_types,
        extra = options.extra_config,
    );
    if !out.ends_with('\n') {
        out.push('\n');
    }
    out
}
