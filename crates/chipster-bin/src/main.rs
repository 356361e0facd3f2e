use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use chipster_core::bootstrap::{Bootstrap, Collaborators};
use chipster_core::config::{ChipsterConfig, PhpConfig};

/// How often a running session checks whether the worker died
const WORKER_CHECK_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "chipster")]
#[command(about = "Locate Chipster content and serve it from a local web server")]
#[command(version)]
struct Cli {
    /// Path to config file
    #[arg(long, env = "CHIPSTER_CONFIG_PATH", global = true)]
    config_path: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "CHIPSTER_LOG_LEVEL", global = true)]
    log_level: String,

    /// Name of the content folder to search for
    #[arg(long, global = true)]
    target: Option<String>,

    /// Internal storage root to search (e.g., /storage/emulated/0)
    #[arg(long, global = true)]
    storage_root: Option<String>,

    #[arg(long, global = true)]
    host: Option<String>,

    #[arg(long, global = true)]
    port: Option<u16>,

    /// Also run a php-cgi FastCGI worker
    #[arg(long, global = true)]
    php: bool,

    /// Use this php-cgi instead of the bundled asset (implies --php)
    #[arg(long, global = true)]
    php_executable: Option<String>,

    /// Open the site in the system browser once the server is up
    #[arg(long)]
    open: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the server and run until Ctrl+C (default)
    Serve,
    /// Print the location of the content folder
    Locate,
    /// Print the generated server configuration
    RenderConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    info!(
        "chipster v{} starting (os={}, arch={})",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
        std::env::consts::ARCH,
    );

    let config_path = cli
        .config_path
        .clone()
        .map(PathBuf::from)
        .unwrap_or_else(ChipsterConfig::default_path);

    let mut config = if config_path.exists() {
        info!("loading config from {}", config_path.display());
        ChipsterConfig::load(&config_path)?
    } else {
        info!("no config found at {}, using defaults", config_path.display());
        ChipsterConfig::default()
    };
    apply_overrides(&mut config, &cli);

    let bootstrap = Bootstrap::new(config.clone(), collaborators(&config)?);

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(bootstrap).await,
        Commands::Locate => {
            let path = bootstrap.locate().await?;
            println!("{}", path);
            Ok(())
        }
        Commands::RenderConfig => {
            let path = bootstrap.locate().await?;
            let service_config = bootstrap.build_config(&path)?;
            print!("{}", service_config.rendered_config);
            Ok(())
        }
    }
}

/// CLI args override config file
fn apply_overrides(config: &mut ChipsterConfig, cli: &Cli) {
    if let Some(target) = &cli.target {
        config.target_name = target.clone();
    }
    if let Some(root) = &cli.storage_root {
        config.internal_storage_root = root.clone();
    }
    if let Some(host) = &cli.host {
        config.listen_host = host.clone();
    }
    if let Some(port) = cli.port {
        config.listen_port = port;
    }
    if cli.php || cli.php_executable.is_some() {
        let php = config.php.get_or_insert_with(PhpConfig::default);
        if let Some(exe) = &cli.php_executable {
            php.executable = Some(exe.clone());
        }
    }
    if cli.open {
        config.open_browser = true;
    }
}

#[cfg(unix)]
fn collaborators(config: &ChipsterConfig) -> Result<Collaborators> {
    use chipster_linux::filesystem::UnixFileSystem;
    use chipster_linux::lighttpd::LighttpdServer;
    use chipster_linux::process::TokioProcessSpawner;
    use chipster_linux::storage::DesktopPermissions;

    let spawner = Arc::new(TokioProcessSpawner::new());
    let server = LighttpdServer::new(&config.lighttpd_binary, config.work_dir(), spawner.clone());

    Ok(Collaborators {
        fs: Arc::new(UnixFileSystem::new(config.assets_dir())),
        prompter: Arc::new(DesktopPermissions),
        server: Box::new(server),
        spawner,
    })
}

#[cfg(not(unix))]
fn collaborators(_config: &ChipsterConfig) -> Result<Collaborators> {
    anyhow::bail!("no platform collaborators for {}", std::env::consts::OS)
}

async fn serve(mut bootstrap: Bootstrap) -> Result<()> {
    // Ctrl+C during the search aborts it instead of waiting for the walk
    let cancel = bootstrap.locator().cancel_token();
    let search_interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received Ctrl+C, cancelling search");
            cancel.cancel();
        }
    });

    let started = bootstrap.start().await;
    search_interrupt.abort();

    let origin = match started {
        Ok(origin) => origin,
        Err(e) => {
            error!("{}", e);
            bootstrap.shutdown().await?;
            return Err(e.into());
        }
    };
    info!("server started at {}", origin);

    if bootstrap.config().open_browser {
        launch_browser(&origin);
    }

    let mut worker_check = tokio::time::interval(WORKER_CHECK_INTERVAL);
    worker_check.tick().await; // consume the immediate first tick

    info!("serving, press Ctrl+C to stop");

    loop {
        tokio::select! {
            _ = worker_check.tick() => {
                if let Some(status) = bootstrap.lifecycle_mut().check_worker().await {
                    warn!("php-cgi worker is gone ({}), PHP pages will fail until restart", status);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("received Ctrl+C, shutting down");
                break;
            }
        }
    }

    bootstrap.shutdown().await
}

fn launch_browser(origin: &str) {
    match open::that(origin) {
        Ok(()) => info!("opened {} in the browser", origin),
        Err(e) => warn!("failed to open browser ({}), please open {} manually", e, origin),
    }
}
