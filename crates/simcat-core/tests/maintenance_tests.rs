//! Integration tests for database cleanup orchestration.

mod common;

use common::{TestModel, MODEL_DIGEST, MODEL_NAME};
use simcat_core::config::CleanupConfig;
use simcat_core::{
    CleanupOrchestrator, CleanupOutcome, DiskUsageMonitor, DiskUsageService, ServiceConfig,
    SimcatError, SimcatService,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Disk collaborator with a fixed scope that counts rescan requests.
struct FixedDisk {
    command: Option<PathBuf>,
    files: Vec<PathBuf>,
    rescans: AtomicUsize,
}

impl DiskUsageService for FixedDisk {
    fn cleanup_command(&self) -> Option<PathBuf> {
        self.command.clone()
    }

    fn db_files_in_scope(&self) -> Vec<PathBuf> {
        self.files.clone()
    }

    fn request_rescan(&self) {
        self.rescans.fetch_add(1, Ordering::SeqCst);
    }

    fn is_paused(&self) -> bool {
        false
    }
}

#[cfg(unix)]
fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

#[cfg(unix)]
#[tokio::test]
async fn test_cleanup_refused_for_open_database() {
    let fixture = TestModel::new();
    let catalog = Arc::new(fixture.catalog());
    let marker = fixture.dir.path().join("launched");
    let script = write_script(
        fixture.dir.path(),
        "cleanup.sh",
        &format!("touch {}\n", marker.display()),
    );

    let disk = Arc::new(FixedDisk {
        command: Some(script),
        files: vec![fixture.db_path.clone()],
        rescans: AtomicUsize::new(0),
    });
    let orchestrator = CleanupOrchestrator::new(
        Arc::clone(&catalog),
        disk.clone(),
        fixture.dir.path().join("log"),
    );

    let err = orchestrator
        .start_cleanup(&fixture.db_path, MODEL_NAME, MODEL_DIGEST)
        .unwrap_err();
    assert!(matches!(err, SimcatError::CleanupRejected { .. }));
    assert!(err.is_precondition());

    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert!(!marker.exists());
    assert!(orchestrator.list_cleanup_logs().unwrap().is_empty());
}

#[cfg(unix)]
#[tokio::test]
async fn test_cleanup_refused_out_of_scope() {
    let fixture = TestModel::new();
    let script = write_script(fixture.dir.path(), "cleanup.sh", "exit 0\n");

    let disk = Arc::new(FixedDisk {
        command: Some(script),
        files: Vec::new(),
        rescans: AtomicUsize::new(0),
    });
    let orchestrator = CleanupOrchestrator::new(
        Arc::new(simcat_core::Catalog::new()),
        disk,
        fixture.dir.path().to_path_buf(),
    );

    let err = orchestrator
        .start_cleanup(&fixture.db_path, MODEL_NAME, MODEL_DIGEST)
        .unwrap_err();
    assert!(matches!(err, SimcatError::CleanupRejected { .. }));
}

#[cfg(unix)]
#[tokio::test]
async fn test_cleanup_streams_output_and_requests_rescan() {
    let fixture = TestModel::new();
    let catalog = Arc::new(fixture.catalog());
    catalog.close_model(MODEL_NAME).unwrap();

    let script = write_script(
        fixture.dir.path(),
        "cleanup.sh",
        concat!(
            "echo \"cleanup of $1\"\n",
            "echo \"model $2 $3\"\n",
            "echo \"warning on stderr\" 1>&2\n",
            "sleep 1\n",
            "echo \"vacuum finished\"\n",
        ),
    );
    let disk = Arc::new(FixedDisk {
        command: Some(script),
        files: vec![fixture.db_path.clone()],
        rescans: AtomicUsize::new(0),
    });
    let log_dir = fixture.dir.path().join("log");
    let orchestrator =
        CleanupOrchestrator::new(Arc::clone(&catalog), disk.clone(), log_dir.clone());

    let ticket = orchestrator
        .start_cleanup(&fixture.db_path, MODEL_NAME, MODEL_DIGEST)
        .unwrap();
    assert!(ticket.log_name.starts_with(CleanupConfig::LOG_PREFIX));
    assert!(ticket.log_name.ends_with(".modelOne.sqlite.console.txt"));
    assert_eq!(ticket.log_path, log_dir.join(&ticket.log_name));

    let log_name = ticket.log_name.clone();
    assert_eq!(ticket.wait().await, CleanupOutcome::Completed);

    let log = orchestrator.read_cleanup_log(&log_name).unwrap();
    assert!(log.contains("cleanup of "));
    assert!(log.contains(&format!("model {} {}", MODEL_NAME, MODEL_DIGEST)));
    assert!(log.contains("warning on stderr"));
    assert!(log.contains("vacuum finished"));
    assert_eq!(log.lines().last(), Some(CleanupConfig::DONE_MARKER));
    assert_eq!(disk.rescans.load(Ordering::SeqCst), 1);

    assert_eq!(orchestrator.list_cleanup_logs().unwrap(), vec![log_name]);
}

#[cfg(unix)]
#[tokio::test]
async fn test_cleanup_launch_failure_is_logged() {
    let fixture = TestModel::new();
    let disk = Arc::new(FixedDisk {
        command: Some(fixture.dir.path().join("no-such-command")),
        files: vec![fixture.db_path.clone()],
        rescans: AtomicUsize::new(0),
    });
    let orchestrator = CleanupOrchestrator::new(
        Arc::new(simcat_core::Catalog::new()),
        disk.clone(),
        fixture.dir.path().to_path_buf(),
    );

    let ticket = orchestrator
        .start_cleanup(&fixture.db_path, MODEL_NAME, MODEL_DIGEST)
        .unwrap();
    let log_name = ticket.log_name.clone();
    assert!(matches!(ticket.wait().await, CleanupOutcome::Failed(_)));

    let log = orchestrator.read_cleanup_log(&log_name).unwrap();
    assert!(log.contains("Error:"));
    assert_eq!(disk.rescans.load(Ordering::SeqCst), 0);
}

#[cfg(unix)]
#[tokio::test]
async fn test_service_cleanup_after_close() {
    let fixture = TestModel::new();
    let script = write_script(fixture.dir.path(), "cleanup.sh", "echo ok\n");

    let mut config = ServiceConfig::new(fixture.dir.path());
    config.cleanup_command = Some(script);
    config.log_dir = Some(fixture.dir.path().join("log"));
    let service = SimcatService::start(config).unwrap();
    assert_eq!(service.catalog().model_list().unwrap().len(), 1);
    assert_eq!(service.disk().db_files_in_scope().len(), 1);
    let scans_before = service.disk().scan_count();

    let path = fixture.db_path.clone();
    let cleanup = service.cleanup();
    assert!(cleanup.start_cleanup(&path, MODEL_NAME, MODEL_DIGEST).is_err());

    service.catalog().close_model(MODEL_DIGEST).unwrap();
    let ticket = cleanup.start_cleanup(&path, MODEL_NAME, MODEL_DIGEST).unwrap();
    assert_eq!(ticket.wait().await, CleanupOutcome::Completed);

    // the monitor task picks up the rescan request of the completed cleanup
    for _ in 0..100 {
        if service.disk().scan_count() > scans_before {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    assert!(service.disk().scan_count() > scans_before);
    assert_eq!(service.disk().db_files_in_scope().len(), 1);
}

#[test]
fn test_disk_monitor_scope_matches_model_dir() {
    let fixture = TestModel::new();
    let monitor = DiskUsageMonitor::new(&ServiceConfig::new(fixture.dir.path()));
    let state = monitor.rescan_now().unwrap();

    assert_eq!(state.db_files.len(), 1);
    assert_eq!(
        state.db_files[0].path,
        fixture.db_path.canonicalize().unwrap()
    );
    assert!(state.total_bytes > 0);
    assert!(!monitor.is_paused());
}
