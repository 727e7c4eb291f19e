//! Database cleanup orchestration.
//!
//! A cleanup runs an external command against a closed model database. The
//! command output is captured line by line into a log file in the model log
//! directory while the request that started it has already returned.
//!
//! Lifecycle: validated, launched, streaming, then completed or failed.
//! Failures after launch are written to the log, not returned to the caller.

use crate::catalog::Catalog;
use crate::config::CleanupConfig;
use crate::disk::DiskUsageService;
use crate::{Result, SimcatError};
use chrono::Local;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Final state of a cleanup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupOutcome {
    Completed,
    Failed(String),
}

/// Handle of a launched cleanup.
#[derive(Debug)]
pub struct CleanupTicket {
    /// File name of the cleanup log.
    pub log_name: String,
    pub log_path: PathBuf,
    handle: JoinHandle<CleanupOutcome>,
}

impl CleanupTicket {
    /// Wait for the cleanup to finish.
    pub async fn wait(self) -> CleanupOutcome {
        match self.handle.await {
            Ok(outcome) => outcome,
            Err(e) => CleanupOutcome::Failed(format!("cleanup task failed: {}", e)),
        }
    }
}

/// Launches database cleanups and serves their logs.
pub struct CleanupOrchestrator {
    catalog: Arc<Catalog>,
    disk: Arc<dyn DiskUsageService>,
    log_dir: PathBuf,
}

impl CleanupOrchestrator {
    pub fn new(catalog: Arc<Catalog>, disk: Arc<dyn DiskUsageService>, log_dir: PathBuf) -> Self {
        Self {
            catalog,
            disk,
            log_dir,
        }
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Start a cleanup of `db_path` and return without waiting for it.
    ///
    /// The command is called with the database path, model name and model
    /// digest as arguments. Must be called from within a tokio runtime.
    pub fn start_cleanup(&self, db_path: &Path, name: &str, digest: &str) -> Result<CleanupTicket> {
        let command = self.disk.cleanup_command().ok_or_else(|| SimcatError::Config {
            message: "database cleanup command is not configured".to_string(),
        })?;

        let db_path = db_path
            .canonicalize()
            .map_err(|e| SimcatError::io_with_path(e, db_path))?;
        let in_scope = self
            .disk
            .db_files_in_scope()
            .iter()
            .any(|p| p.canonicalize().map_or(false, |p| p == db_path));
        if !in_scope {
            return Err(rejected(&db_path, "database file is not in the model directory"));
        }
        if self.catalog.is_db_path_open(&db_path)? {
            return Err(rejected(&db_path, "model database is open, close the model first"));
        }

        let base_name = db_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| rejected(&db_path, "invalid database file name"))?;
        let log_name = format!(
            "{}{}.{}{}",
            CleanupConfig::LOG_PREFIX,
            Local::now().format(CleanupConfig::LOG_TIMESTAMP_FORMAT),
            base_name,
            CleanupConfig::LOG_SUFFIX
        );
        std::fs::create_dir_all(&self.log_dir)
            .map_err(|e| SimcatError::io_with_path(e, &self.log_dir))?;
        let log_path = self.log_dir.join(&log_name);
        std::fs::write(
            &log_path,
            format!("{} {} {} {}\n", command.display(), db_path.display(), name, digest),
        )
        .map_err(|e| SimcatError::io_with_path(e, &log_path))?;

        info!("Starting cleanup of {}, log: {}", db_path.display(), log_name);

        let job = CleanupJob {
            command,
            args: vec![
                db_path.to_string_lossy().into_owned(),
                name.to_string(),
                digest.to_string(),
            ],
            log_path: log_path.clone(),
        };
        let disk = Arc::clone(&self.disk);
        let handle = tokio::spawn(async move { job.run(disk).await });

        Ok(CleanupTicket {
            log_name,
            log_path,
            handle,
        })
    }

    /// Names of all cleanup logs, oldest first.
    pub fn list_cleanup_logs(&self) -> Result<Vec<String>> {
        let entries = match std::fs::read_dir(&self.log_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(SimcatError::io_with_path(e, &self.log_dir)),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if is_log_name(&name) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// Content of a cleanup log by file name.
    pub fn read_cleanup_log(&self, name: &str) -> Result<String> {
        if name.contains('/') || name.contains('\\') || name.contains("..") {
            return Err(SimcatError::validation("name", "invalid log file name"));
        }
        if !is_log_name(name) {
            return Err(SimcatError::validation("name", "not a cleanup log file name"));
        }

        let path = self.log_dir.join(name);
        match std::fs::read_to_string(&path) {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(SimcatError::FileNotFound(path))
            }
            Err(e) => Err(SimcatError::io_with_path(e, &path)),
        }
    }
}

fn rejected(path: &Path, reason: &str) -> SimcatError {
    warn!("Cleanup of {} rejected: {}", path.display(), reason);
    SimcatError::CleanupRejected {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

fn is_log_name(name: &str) -> bool {
    name.len() > CleanupConfig::LOG_PREFIX.len() + CleanupConfig::LOG_SUFFIX.len()
        && name.starts_with(CleanupConfig::LOG_PREFIX)
        && name.ends_with(CleanupConfig::LOG_SUFFIX)
}

// ============================================================================
// Cleanup job
// ============================================================================

struct CleanupJob {
    command: PathBuf,
    args: Vec<String>,
    log_path: PathBuf,
}

impl CleanupJob {
    async fn run(self, disk: Arc<dyn DiskUsageService>) -> CleanupOutcome {
        match self.stream_output().await {
            Ok(()) => {
                if let Err(e) = self.append(CleanupConfig::DONE_MARKER).await {
                    error!("Failed to write cleanup log {}: {}", self.log_path.display(), e);
                }
                disk.request_rescan();
                info!("Cleanup done: {}", self.log_path.display());
                CleanupOutcome::Completed
            }
            Err(e) => {
                error!("Cleanup failed, log {}: {}", self.log_path.display(), e);
                if let Err(log_err) = self.append(&format!("Error: {}", e)).await {
                    error!(
                        "Failed to write cleanup log {}: {}",
                        self.log_path.display(),
                        log_err
                    );
                }
                CleanupOutcome::Failed(e.to_string())
            }
        }
    }

    /// Run the command, appending its output to the log until both streams
    /// are closed, then check the exit status.
    async fn stream_output(&self) -> Result<()> {
        let mut log = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.log_path)
            .await
            .map_err(|e| SimcatError::io_with_path(e, &self.log_path))?;

        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| SimcatError::io_with_path(e, &self.command))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SimcatError::Other("cleanup stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| SimcatError::Other("cleanup stderr not captured".to_string()))?;

        let (tx, mut rx) = mpsc::channel::<String>(CleanupConfig::OUTPUT_CHANNEL_CAPACITY);
        let stdout_task = tokio::spawn(forward_lines(stdout, tx.clone()));
        let stderr_task = tokio::spawn(forward_lines(stderr, tx));

        // The channel closes once both readers are done.
        let mut keep_alive = tokio::time::interval(CleanupConfig::KEEP_ALIVE_INTERVAL);
        loop {
            tokio::select! {
                line = rx.recv() => match line {
                    Some(line) => {
                        log.write_all(line.as_bytes()).await?;
                        log.write_all(b"\n").await?;
                    }
                    None => break,
                },
                _ = keep_alive.tick() => {
                    debug!("Cleanup running: {}", self.log_path.display());
                    log.flush().await?;
                }
            }
        }
        log.flush().await?;

        for (stream, task) in [("stdout", stdout_task), ("stderr", stderr_task)] {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    return Err(SimcatError::Other(format!(
                        "failed to read cleanup {}: {}",
                        stream, e
                    )))
                }
                Err(e) => {
                    return Err(SimcatError::Other(format!(
                        "cleanup {} reader failed: {}",
                        stream, e
                    )))
                }
            }
        }

        let status = child.wait().await?;
        if !status.success() {
            return Err(SimcatError::Other(format!(
                "cleanup command exited with code {}",
                status.code().unwrap_or(-1)
            )));
        }
        Ok(())
    }

    async fn append(&self, line: &str) -> Result<()> {
        let mut log = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.log_path)
            .await
            .map_err(|e| SimcatError::io_with_path(e, &self.log_path))?;
        log.write_all(line.as_bytes()).await?;
        log.write_all(b"\n").await?;
        log.flush().await?;
        Ok(())
    }
}

/// Send each line of `reader` to the log sink until EOF.
async fn forward_lines<R>(reader: R, tx: mpsc::Sender<String>) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if tx.send(line).await.is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct NoCommand;

    impl DiskUsageService for NoCommand {
        fn cleanup_command(&self) -> Option<PathBuf> {
            None
        }
        fn db_files_in_scope(&self) -> Vec<PathBuf> {
            Vec::new()
        }
        fn request_rescan(&self) {}
        fn is_paused(&self) -> bool {
            false
        }
    }

    struct CountingDisk {
        command: PathBuf,
        files: Vec<PathBuf>,
        rescans: AtomicUsize,
    }

    impl DiskUsageService for CountingDisk {
        fn cleanup_command(&self) -> Option<PathBuf> {
            Some(self.command.clone())
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

    #[test]
    fn test_log_name_filter() {
        assert!(is_log_name("db-cleanup.2024_01_02_03_04_05_006.m.sqlite.console.txt"));
        assert!(!is_log_name("db-cleanup..console.txt"));
        assert!(!is_log_name("m.console.txt"));
        assert!(!is_log_name("db-cleanup.x.log"));
    }

    #[tokio::test]
    async fn test_start_requires_command() {
        let temp_dir = TempDir::new().unwrap();
        let orchestrator = CleanupOrchestrator::new(
            Arc::new(Catalog::new()),
            Arc::new(NoCommand),
            temp_dir.path().to_path_buf(),
        );
        let err = orchestrator
            .start_cleanup(&temp_dir.path().join("m.sqlite"), "m", "d")
            .unwrap_err();
        assert!(matches!(err, SimcatError::Config { .. }));
    }

    #[test]
    fn test_read_log_rejects_traversal() {
        let temp_dir = TempDir::new().unwrap();
        let orchestrator = CleanupOrchestrator::new(
            Arc::new(Catalog::new()),
            Arc::new(NoCommand),
            temp_dir.path().to_path_buf(),
        );
        for name in ["../db-cleanup.x.console.txt", "a/db-cleanup.x.console.txt", "notes.txt"] {
            assert!(matches!(
                orchestrator.read_cleanup_log(name),
                Err(SimcatError::Validation { .. })
            ));
        }
        assert!(matches!(
            orchestrator.read_cleanup_log("db-cleanup.x.console.txt"),
            Err(SimcatError::FileNotFound(_))
        ));
        assert!(orchestrator.list_cleanup_logs().unwrap().is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_command_is_logged_without_rescan() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("m.sqlite");
        std::fs::write(&db_path, "").unwrap();
        let script = temp_dir.path().join("fail.sh");
        std::fs::write(&script, "#!/bin/sh\necho \"cleaning $2\"\nexit 3\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let disk = Arc::new(CountingDisk {
            command: script,
            files: vec![db_path.clone()],
            rescans: AtomicUsize::new(0),
        });
        let orchestrator = CleanupOrchestrator::new(
            Arc::new(Catalog::new()),
            disk.clone(),
            temp_dir.path().join("log"),
        );

        let ticket = orchestrator.start_cleanup(&db_path, "m", "d").unwrap();
        let log_name = ticket.log_name.clone();
        assert!(matches!(ticket.wait().await, CleanupOutcome::Failed(_)));

        let log = orchestrator.read_cleanup_log(&log_name).unwrap();
        assert!(log.contains("cleaning m"));
        assert!(log.contains("exited with code 3"));
        assert!(!log.contains(CleanupConfig::DONE_MARKER));
        assert_eq!(disk.rescans.load(Ordering::SeqCst), 0);
    }
}
