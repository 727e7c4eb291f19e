//! Disk usage of the model directory.
//!
//! The monitor keeps the list of model database files in its scope with
//! their sizes and the free space of the volume. A rescan runs on request
//! and on a fixed interval. When a usage limit is configured and exceeded
//! the run queue is paused.

use crate::config::{CatalogConfig, ServiceConfig};
use crate::db::now_dt;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// What the cleanup orchestrator needs from disk usage tracking.
pub trait DiskUsageService: Send + Sync {
    /// External database cleanup command, if configured.
    fn cleanup_command(&self) -> Option<PathBuf>;

    /// Model database files of this instance.
    fn db_files_in_scope(&self) -> Vec<PathBuf>;

    /// Ask for a usage rescan; returns immediately.
    fn request_rescan(&self);

    /// True if the run queue is paused because usage is over the limit.
    fn is_paused(&self) -> bool;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbFileUsage {
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// Result of the last scan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiskUsageState {
    pub db_files: Vec<DbFileUsage>,
    pub total_bytes: u64,
    pub free_bytes: u64,
    pub limit_bytes: u64,
    pub is_over_limit: bool,
    pub scanned_at: String,
}

/// Scans the model directory and tracks disk usage.
pub struct DiskUsageMonitor {
    model_dir: PathBuf,
    cleanup_command: Option<PathBuf>,
    limit_bytes: u64,
    scan_interval: Duration,
    state: RwLock<DiskUsageState>,
    rescan: Notify,
    scan_count: AtomicU64,
}

impl DiskUsageMonitor {
    pub fn new(config: &ServiceConfig) -> Self {
        Self {
            model_dir: config.model_dir.clone(),
            cleanup_command: config.cleanup_command.clone(),
            limit_bytes: config.disk_limit_bytes,
            scan_interval: config.disk_scan_interval(),
            state: RwLock::new(DiskUsageState::default()),
            rescan: Notify::new(),
            scan_count: AtomicU64::new(0),
        }
    }

    /// Scan the model directory now and store the result.
    pub fn rescan_now(&self) -> Result<DiskUsageState> {
        let mut db_files = Vec::new();
        for entry in WalkDir::new(&self.model_dir).into_iter().filter_map(|e| e.ok()) {
            let path = entry.path();
            let is_db_file = path.extension().and_then(|x| x.to_str())
                == Some(CatalogConfig::DB_FILE_EXTENSION);
            if !entry.file_type().is_file() || !is_db_file {
                continue;
            }
            let size_bytes = entry.metadata().map(|m| m.len()).unwrap_or(0);
            db_files.push(DbFileUsage {
                path: path.canonicalize().unwrap_or_else(|_| path.to_path_buf()),
                size_bytes,
            });
        }
        db_files.sort_by(|a, b| a.path.cmp(&b.path));

        let total_bytes = db_files.iter().map(|f| f.size_bytes).sum();
        let is_over_limit = self.limit_bytes > 0 && total_bytes > self.limit_bytes;
        if is_over_limit {
            warn!(
                "Model databases use {} bytes, over the limit of {}",
                total_bytes, self.limit_bytes
            );
        }

        let state = DiskUsageState {
            db_files,
            total_bytes,
            free_bytes: free_space(&self.model_dir),
            limit_bytes: self.limit_bytes,
            is_over_limit,
            scanned_at: now_dt(),
        };
        *self.state.write().unwrap_or_else(|e| e.into_inner()) = state.clone();
        self.scan_count.fetch_add(1, Ordering::Relaxed);

        debug!(
            "Disk scan of {}: {} files, {} bytes",
            self.model_dir.display(),
            state.db_files.len(),
            state.total_bytes
        );
        Ok(state)
    }

    /// Result of the last scan.
    pub fn state(&self) -> DiskUsageState {
        self.state.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Number of completed scans.
    pub fn scan_count(&self) -> u64 {
        self.scan_count.load(Ordering::Relaxed)
    }

    /// Run scans on request and on the configured interval until the task
    /// is aborted.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.scan_interval);
            interval.tick().await;
            info!(
                "Disk usage monitor started for {}, interval {:?}",
                self.model_dir.display(),
                self.scan_interval
            );

            loop {
                tokio::select! {
                    _ = self.rescan.notified() => debug!("Disk rescan requested"),
                    _ = interval.tick() => {}
                }

                let monitor = Arc::clone(&self);
                match tokio::task::spawn_blocking(move || monitor.rescan_now()).await {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => warn!("Disk scan failed: {}", e),
                    Err(e) => warn!("Disk scan task failed: {}", e),
                }
            }
        })
    }
}

impl DiskUsageService for DiskUsageMonitor {
    fn cleanup_command(&self) -> Option<PathBuf> {
        self.cleanup_command.clone()
    }

    fn db_files_in_scope(&self) -> Vec<PathBuf> {
        self.state().db_files.into_iter().map(|f| f.path).collect()
    }

    fn request_rescan(&self) {
        self.rescan.notify_one();
    }

    fn is_paused(&self) -> bool {
        self.state().is_over_limit
    }
}

/// Free space of the volume holding `path`, by longest mount point match.
fn free_space(path: &Path) -> u64 {
    use sysinfo::Disks;

    let disks = Disks::new_with_refreshed_list();
    let path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());

    let mut best_match: Option<(&sysinfo::Disk, usize)> = None;
    for disk in disks.list() {
        let mount_point = disk.mount_point();
        if path.starts_with(mount_point) {
            let match_len = mount_point.as_os_str().len();
            if best_match.map_or(true, |(_, len)| match_len > len) {
                best_match = Some((disk, match_len));
            }
        }
    }
    best_match.map(|(disk, _)| disk.available_space()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_rescan_lists_db_files() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("a.sqlite"), vec![0u8; 100]).unwrap();
        std::fs::create_dir(temp_dir.path().join("sub")).unwrap();
        std::fs::write(temp_dir.path().join("sub").join("b.sqlite"), vec![0u8; 50]).unwrap();
        std::fs::write(temp_dir.path().join("notes.txt"), "x").unwrap();

        let mut config = ServiceConfig::new(temp_dir.path());
        config.disk_limit_bytes = 120;
        let monitor = DiskUsageMonitor::new(&config);

        let state = monitor.rescan_now().unwrap();
        assert_eq!(state.db_files.len(), 2);
        assert_eq!(state.total_bytes, 150);
        assert!(state.is_over_limit);
        assert!(monitor.is_paused());
        assert_eq!(monitor.db_files_in_scope().len(), 2);
        assert_eq!(monitor.scan_count(), 1);
    }

    #[tokio::test]
    async fn test_requested_rescan_runs() {
        let temp_dir = TempDir::new().unwrap();
        let monitor = Arc::new(DiskUsageMonitor::new(&ServiceConfig::new(temp_dir.path())));
        let task = Arc::clone(&monitor).spawn();

        std::fs::write(temp_dir.path().join("a.sqlite"), "x").unwrap();
        monitor.request_rescan();

        for _ in 0..100 {
            if monitor.scan_count() > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        task.abort();
        assert_eq!(monitor.db_files_in_scope().len(), 1);
    }
}
