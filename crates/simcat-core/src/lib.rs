//! Simcat Core - data-access core of a multi-model simulation service.
//!
//! Each model lives in its own SQLite database file. This crate keeps the
//! catalog of open models, reads parameter and output table values page by
//! page, edits input scenarios (worksets) and runs an external database
//! cleanup command in the background. It has no HTTP layer of its own.
//!
//! # Example
//!
//! ```rust,ignore
//! use simcat_core::{ReadLayout, ReadParamLayout, ServiceConfig, SimcatService};
//!
//! let service = SimcatService::start(ServiceConfig::new("/srv/models"))?;
//! let layout = ReadParamLayout {
//!     layout: ReadLayout::new("ageSex").with_page(0, 100),
//!     is_from_set: true,
//! };
//! let catalog = service.catalog();
//! let page = simcat_core::read::read_parameter(catalog, "modelOne", "Default", &layout)?;
//! println!("{} cells", page.cells.len());
//! ```

pub mod catalog;
pub mod config;
pub mod convert;
pub mod db;
pub mod disk;
pub mod error;
pub mod lang;
pub mod layout;
pub mod maintenance;
pub mod meta;
pub mod read;
pub mod workset;

pub use catalog::{Catalog, LockedModel, ModelInfo, RefreshSummary};
pub use config::ServiceConfig;
pub use convert::{
    DoubleFormat, ParameterCodeConverter, ParameterCsvConverter, ParameterIdConverter,
    TableCodeConverter, TableCsvConverter,
};
pub use db::rows::{RunRow, RunStatus, WorksetRow};
pub use disk::{DiskUsageMonitor, DiskUsageService, DiskUsageState};
pub use error::{Result, SimcatError};
pub use layout::{
    CellValue, FilterColumn, FilterOp, OrderBy, ParamCell, ParamCellCode, ReadLayout,
    ReadPage, ReadParamLayout, ReadTableLayout, TableCell, TableCellCode, TableValueKind,
    ValueMode,
};
pub use maintenance::{CleanupOrchestrator, CleanupOutcome, CleanupTicket};
pub use workset::{LangNote, ParamRunSetPub, WorksetPub, WorksetUpdate};

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

/// The catalog, disk monitor and cleanup orchestrator of one service
/// instance, wired from a `ServiceConfig`.
pub struct SimcatService {
    config: ServiceConfig,
    catalog: Arc<Catalog>,
    disk: Arc<DiskUsageMonitor>,
    cleanup: CleanupOrchestrator,
    disk_task: Option<JoinHandle<()>>,
}

impl SimcatService {
    /// Validate the configuration, scan the model directory and open every
    /// model found there. The disk monitor task is not started.
    pub fn new(config: ServiceConfig) -> Result<Self> {
        config.validate()?;
        DoubleFormat::parse(&config.double_format)?;

        let catalog = Arc::new(Catalog::new());
        let summary = catalog.refresh(&config.model_dir)?;
        info!(
            "Opened {} models from {}",
            summary.added.len(),
            config.model_dir.display()
        );

        let disk = Arc::new(DiskUsageMonitor::new(&config));
        disk.rescan_now()?;

        let cleanup = CleanupOrchestrator::new(
            Arc::clone(&catalog),
            disk.clone(),
            config.model_log_dir(),
        );

        Ok(Self {
            config,
            catalog,
            disk,
            cleanup,
            disk_task: None,
        })
    }

    /// Create the service and start the disk monitor task, which serves the
    /// rescan requests of completed cleanups and rescans on the configured
    /// interval. Must be called from within a tokio runtime.
    pub fn start(config: ServiceConfig) -> Result<Self> {
        let mut service = Self::new(config)?;
        service.disk_task = Some(Arc::clone(&service.disk).spawn());
        Ok(service)
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn disk(&self) -> &Arc<DiskUsageMonitor> {
        &self.disk
    }

    pub fn cleanup(&self) -> &CleanupOrchestrator {
        &self.cleanup
    }

    /// Format of floating point values in CSV output.
    pub fn double_format(&self) -> Result<DoubleFormat> {
        DoubleFormat::parse(&self.config.double_format)
    }

    /// Rescan the model directory and disk usage.
    pub fn refresh(&self) -> Result<RefreshSummary> {
        let summary = self.catalog.refresh(&self.config.model_dir)?;
        self.disk.rescan_now()?;
        Ok(summary)
    }
}

impl Drop for SimcatService {
    fn drop(&mut self) {
        if let Some(task) = self.disk_task.take() {
            task.abort();
        }
    }
}
