mod common;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use chipster_core::error::ErrorKind;
use chipster_core::lifecycle::{ServiceLifecycle, ServiceState, WorkerExecutable, WorkerSpec};
use chipster_core::vhost::{FastCgiTarget, ServiceConfig};
use chipster_platform::server::ServerState;

use common::{MemoryFs, StubServer, StubSpawner};

fn service_config(fastcgi: Option<FastCgiTarget>) -> ServiceConfig {
    ServiceConfig {
        listen_host: "127.0.0.1".to_string(),
        listen_port: 8432,
        root_directory: "/c/ChipsterContent".to_string(),
        rendered_config: "# test".to_string(),
        virtual_hosts: BTreeMap::new(),
        stop_in_background: false,
        fastcgi,
    }
}

fn new_lifecycle(server: StubServer, fs: Arc<MemoryFs>, spawner: StubSpawner) -> ServiceLifecycle {
    ServiceLifecycle::new(Box::new(server), fs, Arc::new(spawner))
}

fn php_target() -> Option<FastCgiTarget> {
    Some(FastCgiTarget::Tcp {
        host: "127.0.0.1".to_string(),
        port: 9000,
    })
}

#[tokio::test]
async fn test_second_start_is_rejected_without_rebinding() {
    let (server, probe) = StubServer::new();
    let (spawner, _) = StubSpawner::new(&[]);
    let mut lifecycle = new_lifecycle(server, Arc::new(MemoryFs::new()), spawner);

    let origin = lifecycle.start(service_config(None)).await.unwrap();
    assert_eq!(origin, "http://127.0.0.1:8432");

    let err = lifecycle.start(service_config(None)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyRunning);
    assert_eq!(probe.starts.load(Ordering::SeqCst), 1);
    assert_eq!(lifecycle.state(), ServiceState::Running);
    assert_eq!(lifecycle.origin(), Some("http://127.0.0.1:8432"));
}

#[tokio::test]
async fn test_stop_on_stopped_is_noop() {
    let (server, probe) = StubServer::new();
    let (spawner, _) = StubSpawner::new(&[]);
    let mut lifecycle = new_lifecycle(server, Arc::new(MemoryFs::new()), spawner);

    lifecycle.stop().await.unwrap();
    assert_eq!(lifecycle.state(), ServiceState::Stopped);
    assert_eq!(probe.stops.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_stop_clears_origin_and_worker() {
    let (server, probe) = StubServer::new();
    let (spawner, spawn_probe) = StubSpawner::new(&["/usr/bin/php-cgi"]);
    let worker = WorkerSpec {
        executable: WorkerExecutable::Path("/usr/bin/php-cgi".to_string()),
        work_dir: PathBuf::from("/data/files"),
    };
    let mut lifecycle =
        new_lifecycle(server, Arc::new(MemoryFs::new()), spawner).with_worker(worker);

    lifecycle.start(service_config(php_target())).await.unwrap();
    assert!(lifecycle.has_php_process());
    assert_eq!(lifecycle.php_process_id(), Some(4242));

    let spec = spawn_probe.specs.lock().unwrap()[0].clone();
    assert_eq!(spec.args, vec!["-b".to_string(), "127.0.0.1:9000".to_string()]);
    assert_eq!(spec.working_dir, Some(PathBuf::from("/data/files")));

    lifecycle.stop().await.unwrap();
    assert_eq!(lifecycle.state(), ServiceState::Stopped);
    assert!(lifecycle.origin().is_none());
    assert!(!lifecycle.has_php_process());
    assert_eq!(probe.stops.load(Ordering::SeqCst), 1);
    assert_eq!(spawn_probe.terminated.load(Ordering::SeqCst), 1);

    let lines = lifecycle.worker_log().snapshot();
    assert!(lines.iter().any(|l| l.text == "PHP worker ready"));
}

#[tokio::test]
async fn test_nonexistent_worker_executable_fails_to_start() {
    let (server, probe) = StubServer::new();
    let (spawner, _) = StubSpawner::new(&[]);
    let worker = WorkerSpec {
        executable: WorkerExecutable::Path("/nonexistent/php-cgi".to_string()),
        work_dir: PathBuf::from("/data/files"),
    };
    let mut lifecycle =
        new_lifecycle(server, Arc::new(MemoryFs::new()), spawner).with_worker(worker);

    let err = lifecycle.start(service_config(php_target())).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SpawnFailure);
    assert!(err.to_string().contains("No such file or directory"));
    assert_eq!(lifecycle.state(), ServiceState::FailedToStart);
    assert!(!lifecycle.has_php_process());
    assert!(lifecycle.origin().is_none());
    // The HTTP service is never started after a spawn failure
    assert_eq!(probe.starts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_asset_copy_failure() {
    let (server, _) = StubServer::new();
    let (spawner, spawn_probe) = StubSpawner::new(&[]);
    let fs = Arc::new(MemoryFs::new());
    fs.fail_copy.store(true, Ordering::SeqCst);
    let worker = WorkerSpec {
        executable: WorkerExecutable::Asset {
            asset_id: "php/php-cgi".to_string(),
            output_name: "php-cgi".to_string(),
        },
        work_dir: PathBuf::from("/data/files"),
    };
    let mut lifecycle = new_lifecycle(server, fs, spawner).with_worker(worker);

    let err = lifecycle.start(service_config(php_target())).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AssetCopyFailure);
    assert!(err.to_string().contains("php/php-cgi not bundled"));
    assert_eq!(spawn_probe.spawns.load(Ordering::SeqCst), 0);
    assert_eq!(lifecycle.state(), ServiceState::FailedToStart);
}

#[tokio::test]
async fn test_asset_is_copied_into_work_dir_and_spawned() {
    let (server, _) = StubServer::new();
    let (spawner, spawn_probe) = StubSpawner::new(&["/data/files/php-cgi"]);
    let fs = Arc::new(MemoryFs::new());
    let worker = WorkerSpec {
        executable: WorkerExecutable::Asset {
            asset_id: "php/php-cgi".to_string(),
            output_name: "php-cgi".to_string(),
        },
        work_dir: PathBuf::from("/data/files"),
    };
    let mut lifecycle = new_lifecycle(server, fs.clone(), spawner).with_worker(worker);

    lifecycle.start(service_config(php_target())).await.unwrap();
    assert_eq!(
        fs.copied.lock().unwrap().clone(),
        vec![("php/php-cgi".to_string(), "/data/files/php-cgi".to_string())]
    );
    assert_eq!(spawn_probe.spawns.load(Ordering::SeqCst), 1);
    lifecycle.stop().await.unwrap();
}

#[tokio::test]
async fn test_bind_failure_kills_worker_and_allows_retry() {
    let (server, probe) = StubServer::new();
    *probe.fail_with.lock().unwrap() = Some("Address already in use (os error 98)".to_string());
    let (spawner, spawn_probe) = StubSpawner::new(&["/usr/bin/php-cgi"]);
    let worker = WorkerSpec {
        executable: WorkerExecutable::Path("/usr/bin/php-cgi".to_string()),
        work_dir: PathBuf::from("/data/files"),
    };
    let mut lifecycle =
        new_lifecycle(server, Arc::new(MemoryFs::new()), spawner).with_worker(worker);

    let err = lifecycle.start(service_config(php_target())).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BindFailure);
    assert!(err.to_string().contains("Address already in use"));
    assert_eq!(lifecycle.state(), ServiceState::FailedToStart);
    assert_eq!(lifecycle.last_error(), Some(err.to_string().as_str()));
    assert!(!lifecycle.has_php_process());
    assert_eq!(spawn_probe.terminated.load(Ordering::SeqCst), 1);

    let event = lifecycle.last_server_event().unwrap();
    assert_eq!(event.state, ServerState::Crashed);
    assert!(event.error.is_some());

    // The user retries after the port is freed
    *probe.fail_with.lock().unwrap() = None;
    lifecycle.start(service_config(php_target())).await.unwrap();
    assert_eq!(lifecycle.state(), ServiceState::Running);
    assert_eq!(probe.starts.load(Ordering::SeqCst), 2);
}

fn php_path_worker() -> WorkerSpec {
    WorkerSpec {
        executable: WorkerExecutable::Path("/usr/bin/php-cgi".to_string()),
        work_dir: PathBuf::from("/data/files"),
    }
}

#[tokio::test]
async fn test_check_worker_drops_exited_worker() {
    let (server, probe) = StubServer::new();
    let (spawner, spawn_probe) = StubSpawner::new(&["/usr/bin/php-cgi"]);
    let mut lifecycle =
        new_lifecycle(server, Arc::new(MemoryFs::new()), spawner).with_worker(php_path_worker());

    lifecycle.start(service_config(php_target())).await.unwrap();
    assert!(lifecycle.check_worker().await.is_none());
    assert!(lifecycle.has_php_process());

    spawn_probe.exit_with(255);
    let status = lifecycle.check_worker().await.unwrap();
    assert_eq!(status.code(), Some(255));
    assert!(!lifecycle.has_php_process());
    assert!(lifecycle.php_process_id().is_none());

    // The HTTP service keeps running without PHP
    assert_eq!(lifecycle.state(), ServiceState::Running);
    assert_eq!(lifecycle.origin(), Some("http://127.0.0.1:8432"));
    assert!(lifecycle.check_worker().await.is_none());

    lifecycle.stop().await.unwrap();
    assert_eq!(probe.stops.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_worker_exiting_at_once_is_spawn_failure() {
    let (server, probe) = StubServer::new();
    let (spawner, spawn_probe) = StubSpawner::new(&["/usr/bin/php-cgi"]);
    spawn_probe.exit_with(1);
    let mut lifecycle =
        new_lifecycle(server, Arc::new(MemoryFs::new()), spawner).with_worker(php_path_worker());

    let err = lifecycle.start(service_config(php_target())).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SpawnFailure);
    assert!(err.to_string().contains("exited immediately"));
    assert_eq!(lifecycle.state(), ServiceState::FailedToStart);
    assert!(!lifecycle.has_php_process());
    assert_eq!(probe.starts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_stop_after_failed_start() {
    let (server, probe) = StubServer::new();
    *probe.fail_with.lock().unwrap() = Some("Address already in use (os error 98)".to_string());
    let (spawner, _) = StubSpawner::new(&[]);
    let mut lifecycle = new_lifecycle(server, Arc::new(MemoryFs::new()), spawner);

    lifecycle.start(service_config(None)).await.unwrap_err();
    assert_eq!(lifecycle.state(), ServiceState::FailedToStart);

    lifecycle.stop().await.unwrap();
    assert_eq!(lifecycle.state(), ServiceState::Stopped);
    assert!(lifecycle.origin().is_none());
    assert_eq!(probe.stops.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_reset_only_leaves_failed_start() {
    let (server, probe) = StubServer::new();
    let (spawner, _) = StubSpawner::new(&[]);
    let mut lifecycle = new_lifecycle(server, Arc::new(MemoryFs::new()), spawner);

    lifecycle.start(service_config(None)).await.unwrap();
    lifecycle.reset();
    assert_eq!(lifecycle.state(), ServiceState::Running);

    lifecycle.stop().await.unwrap();
    *probe.fail_with.lock().unwrap() = Some("Address already in use (os error 98)".to_string());
    lifecycle.start(service_config(None)).await.unwrap_err();
    assert!(lifecycle.last_error().is_some());

    lifecycle.reset();
    assert_eq!(lifecycle.state(), ServiceState::Stopped);
    assert!(lifecycle.last_error().is_none());
    // Reset never calls into the HTTP service
    assert_eq!(probe.stops.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_status_updates_are_published() {
    let (server, _) = StubServer::new();
    let (spawner, _) = StubSpawner::new(&[]);
    let mut lifecycle = new_lifecycle(server, Arc::new(MemoryFs::new()), spawner);
    let mut status = lifecycle.subscribe();

    lifecycle.start(service_config(None)).await.unwrap();
    assert!(status.has_changed().unwrap());
    let current = status.borrow_and_update().clone();
    assert_eq!(current.state, ServiceState::Running);
    assert_eq!(current.origin.as_deref(), Some("http://127.0.0.1:8432"));

    lifecycle.stop().await.unwrap();
    assert_eq!(status.borrow_and_update().state, ServiceState::Stopped);
}

#[tokio::test]
async fn test_shutdown_unsubscribes_listener() {
    let (server, probe) = StubServer::new();
    let (spawner, _) = StubSpawner::new(&[]);
    let mut lifecycle = new_lifecycle(server, Arc::new(MemoryFs::new()), spawner);
    assert_eq!(probe.listeners.load(Ordering::SeqCst), 1);

    lifecycle.start(service_config(None)).await.unwrap();
    lifecycle.shutdown().await.unwrap();
    assert_eq!(probe.listeners.load(Ordering::SeqCst), 0);
    assert_eq!(probe.stops.load(Ordering::SeqCst), 1);
}
