//! The start sequence of one app session:
//! permission -> locate -> derive -> build config -> start.

use std::sync::Arc;

use tracing::{debug, info};

use chipster_platform::filesystem::FileSystem;
use chipster_platform::process::ProcessSpawner;
use chipster_platform::server::StaticServer;
use chipster_platform::storage::PermissionPrompter;

use crate::config::ChipsterConfig;
use crate::error::{BootstrapError, Result};
use crate::lifecycle::{ServiceLifecycle, ServiceState, WorkerExecutable, WorkerSpec};
use crate::locator::{ContentLocator, SearchRoots};
use crate::paths::DerivedPaths;
use crate::storage::StorageGate;
use crate::vhost::{ConfigBuilder, FastCgiTarget, ServiceConfig};

/// Platform collaborators a session is built from
pub struct Collaborators {
    pub fs: Arc<dyn FileSystem>,
    pub prompter: Arc<dyn PermissionPrompter>,
    pub server: Box<dyn StaticServer>,
    pub spawner: Arc<dyn ProcessSpawner>,
}

pub struct Bootstrap {
    config: ChipsterConfig,
    fs: Arc<dyn FileSystem>,
    gate: StorageGate,
    locator: ContentLocator,
    lifecycle: ServiceLifecycle,
}

impl Bootstrap {
    pub fn new(config: ChipsterConfig, collaborators: Collaborators) -> Self {
        let Collaborators {
            fs,
            prompter,
            server,
            spawner,
        } = collaborators;

        let locator = ContentLocator::new(fs.clone(), SearchRoots::from_config(&config));
        let mut lifecycle = ServiceLifecycle::new(server, fs.clone(), spawner);
        if let Some(worker) = worker_spec(&config) {
            lifecycle = lifecycle.with_worker(worker);
        }

        Self {
            config,
            fs,
            gate: StorageGate::new(prompter),
            locator,
            lifecycle,
        }
    }

    pub fn config(&self) -> &ChipsterConfig {
        &self.config
    }

    pub fn locator(&self) -> &ContentLocator {
        &self.locator
    }

    pub fn lifecycle(&self) -> &ServiceLifecycle {
        &self.lifecycle
    }

    pub fn lifecycle_mut(&mut self) -> &mut ServiceLifecycle {
        &mut self.lifecycle
    }

    /// Permission check and content search
    pub async fn locate(&self) -> Result<String> {
        if !self.gate.ensure_read_access().await {
            return Err(BootstrapError::PermissionDenied);
        }

        let target = &self.config.target_name;
        match self.locator.locate(target).await {
            Some(path) => {
                info!("{} folder found at {}", target, path);
                Ok(path)
            }
            None => Err(BootstrapError::ContentNotFound {
                target: target.clone(),
            }),
        }
    }

    /// Derive paths and render the server config for a located content folder
    pub fn build_config(&self, content_path: &str) -> Result<ServiceConfig> {
        let paths = DerivedPaths::derive(content_path);
        for (name, path) in paths.entries() {
            debug!("{}: {}", name, path);
        }

        let fastcgi = match &self.config.php {
            Some(php) => Some(FastCgiTarget::parse(&php.bind)?),
            None => None,
        };
        let discovered = self.discover_web_folders(&paths.web_content);

        let config = ConfigBuilder::new(self.config.listen_host.clone(), self.config.listen_port)
            .default_folders(self.config.default_web_folders.iter().cloned())
            .fastcgi(fastcgi)
            .access_log(self.fs.exists(&paths.logs))
            .stop_in_background(self.config.stop_in_background)
            .build(&paths, &discovered)?;

        debug!("extra config:\n{}", config.rendered_config);
        Ok(config)
    }

    /// The full start sequence. Returns the service origin.
    pub async fn start(&mut self) -> Result<String> {
        match self.lifecycle.state() {
            ServiceState::Stopped | ServiceState::FailedToStart => {}
            _ => return Err(BootstrapError::AlreadyRunning),
        }

        let content_path = match self.locate().await {
            Ok(path) => path,
            Err(e) => {
                // Nothing was started; a previous failure no longer applies
                self.lifecycle.reset();
                return Err(e);
            }
        };
        let service_config = self.build_config(&content_path)?;
        self.lifecycle.start(service_config).await
    }

    pub async fn stop(&mut self) -> anyhow::Result<()> {
        self.lifecycle.stop().await
    }

    /// End the session, releasing the lifecycle
    pub async fn shutdown(self) -> anyhow::Result<()> {
        self.locator.cancel_token().cancel();
        self.lifecycle.shutdown().await
    }

    fn discover_web_folders(&self, web_content: &str) -> Vec<String> {
        match self.fs.list_dir(web_content) {
            Ok(entries) => entries
                .into_iter()
                .filter(|e| e.is_dir)
                .map(|e| e.name)
                .collect(),
            Err(e) => {
                debug!("no web folders discovered in {}: {:#}", web_content, e);
                Vec::new()
            }
        }
    }
}

fn worker_spec(config: &ChipsterConfig) -> Option<WorkerSpec> {
    let php = config.php.as_ref()?;
    let executable = match &php.executable {
        Some(path) => WorkerExecutable::Path(path.clone()),
        None => WorkerExecutable::Asset {
            asset_id: php.asset.clone(),
            output_name: php.output_name.clone(),
        },
    };
    Some(WorkerSpec {
        executable,
        work_dir: config.work_dir(),
    })
}
