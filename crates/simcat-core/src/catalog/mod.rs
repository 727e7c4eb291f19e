//! Model catalog.
//!
//! The catalog owns the registry of open models. Every registry read and
//! mutation happens under one mutex. File system scans, connection opens and
//! metadata queries run with the lock released; their results are installed
//! under the lock afterwards. Lock order is registry, then connection.

mod entry;

pub use entry::{ModelEntry, ModelInfo};

pub(crate) use entry::lock_conn;
use entry::{MetaState, TxtState};

use crate::config::CatalogConfig;
use crate::db::rows::{self, RunRow, WorksetRow};
use crate::meta::{loader, LangRow, ModelMeta, ModelText};
use crate::{Result, SimcatError};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Open models with lookup maps by digest and by name.
#[derive(Default)]
pub struct Registry {
    entries: Vec<ModelEntry>,
    by_digest: HashMap<String, usize>,
    by_name: HashMap<String, usize>,
}

impl Registry {
    /// Index of the model with digest or name `id`; digest is tried first.
    ///
    /// If several models share a name the first registered one is found.
    pub fn index_by_digest_or_name(&self, id: &str) -> Option<usize> {
        self.by_digest
            .get(id)
            .or_else(|| self.by_name.get(id))
            .copied()
    }

    pub fn index_by_digest(&self, digest: &str) -> Option<usize> {
        self.by_digest.get(digest).copied()
    }

    pub fn entry(&self, index: usize) -> Option<&ModelEntry> {
        self.entries.get(index)
    }

    pub fn entries(&self) -> &[ModelEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn index_by_path(&self, path: &Path) -> Option<usize> {
        self.entries.iter().position(|e| e.db_path == path)
    }

    fn rebuild_index(&mut self) {
        self.by_digest.clear();
        self.by_name.clear();
        for (i, e) in self.entries.iter().enumerate() {
            self.by_digest.insert(e.digest().to_string(), i);
            self.by_name.entry(e.name().to_string()).or_insert(i);
        }
    }

    fn push(&mut self, entry: ModelEntry) {
        self.entries.push(entry);
        self.rebuild_index();
    }

    fn remove(&mut self, index: usize) -> ModelEntry {
        let entry = self.entries.remove(index);
        self.rebuild_index();
        entry
    }
}

/// Result of a directory rescan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshSummary {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub kept: usize,
    pub failed: Vec<PathBuf>,
}

/// Connection and metadata of a model, detached from the registry.
#[derive(Clone)]
pub(crate) struct ModelHandle {
    pub conn: Arc<Mutex<Connection>>,
    pub meta: Arc<ModelMeta>,
}

/// A model resolved while the registry lock is held.
pub struct LockedModel<'a> {
    pub meta: &'a ModelMeta,
    pub langs: &'a [LangRow],
}

impl LockedModel<'_> {
    pub fn name(&self) -> &str {
        &self.meta.model.name
    }

    pub fn digest(&self) -> &str {
        &self.meta.model.digest
    }

    pub fn lang_id(&self, code: &str) -> Option<i32> {
        self.langs
            .iter()
            .find(|l| l.code.eq_ignore_ascii_case(code))
            .map(|l| l.lang_id)
    }
}

/// Catalog of open model databases.
#[derive(Default)]
pub struct Catalog {
    registry: Mutex<Registry>,
}

fn canonical(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock the registry.
    pub fn lock(&self) -> Result<MutexGuard<'_, Registry>> {
        self.registry.lock().map_err(|_| SimcatError::Database {
            message: "Failed to acquire model registry lock".to_string(),
            source: None,
        })
    }

    // ========================================
    // Lazy metadata
    // ========================================

    /// Make sure the language-neutral metadata of model `id` is loaded.
    ///
    /// Returns the registry index, or `None` if no such model is open.
    pub fn load_model_meta(&self, id: &str) -> Result<Option<usize>> {
        loop {
            let (conn, digest) = {
                let reg = self.lock()?;
                let Some(i) = reg.index_by_digest_or_name(id) else {
                    debug!("Model not found: {}", id);
                    return Ok(None);
                };
                let e = &reg.entries[i];
                if e.is_meta_full() {
                    return Ok(Some(i));
                }
                (Arc::clone(&e.conn), e.digest().to_string())
            };

            let loaded = {
                let c = lock_conn(&conn)?;
                loader::load_model_meta(&c, &digest)?
            };
            let Some(meta) = loaded else {
                warn!("Model {} is no longer in its database", digest);
                return Ok(None);
            };

            let mut reg = self.lock()?;
            let Some(i) = reg.index_by_digest(&digest) else {
                return Ok(None);
            };
            let e = &mut reg.entries[i];
            if e.is_meta_full() {
                return Ok(Some(i));
            }
            if Arc::ptr_eq(&e.conn, &conn) {
                e.meta = MetaState::Full(Arc::new(meta));
                return Ok(Some(i));
            }
            // reopened while loading, load again from the new connection
        }
    }

    /// Make sure the language-specific metadata of model `id` is loaded.
    pub fn load_model_text(&self, id: &str) -> Result<Option<usize>> {
        loop {
            let (conn, model_id, digest) = {
                let reg = self.lock()?;
                let Some(i) = reg.index_by_digest_or_name(id) else {
                    return Ok(None);
                };
                let e = &reg.entries[i];
                if e.is_txt_full() {
                    return Ok(Some(i));
                }
                let model = e.meta.model_dic();
                (Arc::clone(&e.conn), model.model_id, model.digest.clone())
            };

            let txt = {
                let c = lock_conn(&conn)?;
                loader::load_model_txt(&c, model_id)?
            };

            let mut reg = self.lock()?;
            let Some(i) = reg.index_by_digest(&digest) else {
                return Ok(None);
            };
            let e = &mut reg.entries[i];
            if e.is_txt_full() {
                return Ok(Some(i));
            }
            if Arc::ptr_eq(&e.conn, &conn) {
                e.txt = TxtState::Full(Arc::new(txt));
                return Ok(Some(i));
            }
        }
    }

    /// Connection and full metadata of model `id`.
    pub(crate) fn resolve(&self, id: &str) -> Result<ModelHandle> {
        loop {
            if self.load_model_meta(id)?.is_none() {
                return Err(SimcatError::ModelNotFound {
                    model: id.to_string(),
                });
            }
            let reg = self.lock()?;
            let Some(e) = reg
                .index_by_digest_or_name(id)
                .and_then(|i| reg.entry(i))
            else {
                continue;
            };
            if let Some(meta) = e.meta.full() {
                return Ok(ModelHandle {
                    conn: Arc::clone(&e.conn),
                    meta: Arc::clone(meta),
                });
            }
        }
    }

    /// Full language-neutral metadata of model `id`.
    pub fn model_meta(&self, id: &str) -> Result<Arc<ModelMeta>> {
        Ok(self.resolve(id)?.meta)
    }

    /// Descriptions of the model, its parameters and tables in the language
    /// best matching `preferred`.
    pub fn model_text<S: AsRef<str>>(&self, id: &str, preferred: &[S]) -> Result<ModelText> {
        let not_found = || SimcatError::ModelNotFound {
            model: id.to_string(),
        };
        let meta = self.model_meta(id)?;
        let i = self.load_model_text(id)?.ok_or_else(not_found)?;

        let (txt, lang, default_lang) = {
            let reg = self.lock()?;
            let e = reg.entry(i).ok_or_else(not_found)?;
            let txt = e.txt.full().cloned().ok_or_else(not_found)?;
            (
                txt,
                e.matcher.best_match(preferred),
                e.matcher.default_code().to_string(),
            )
        };
        Ok(txt.localize(&meta, &lang, &default_lang))
    }

    /// Run `f` on model `id` with the registry lock held for its duration.
    pub fn with_model_locked<T>(
        &self,
        id: &str,
        f: impl FnOnce(&LockedModel<'_>, &mut Connection) -> Result<T>,
    ) -> Result<T> {
        loop {
            if self.load_model_meta(id)?.is_none() {
                return Err(SimcatError::ModelNotFound {
                    model: id.to_string(),
                });
            }
            let reg = self.lock()?;
            let Some(e) = reg
                .index_by_digest_or_name(id)
                .and_then(|i| reg.entry(i))
            else {
                continue;
            };
            let Some(meta) = e.meta.full() else {
                continue;
            };

            let locked = LockedModel {
                meta,
                langs: &e.langs,
            };
            let mut conn = lock_conn(&e.conn)?;
            return f(&locked, &mut *conn);
        }
    }

    // ========================================
    // Lifecycle
    // ========================================

    /// Synchronize the registry with the model files under `root`.
    ///
    /// New files are opened and added, open models whose file is gone are
    /// removed, everything else is left untouched. Models opened explicitly
    /// from outside `root` stay open while their file exists.
    pub fn refresh(&self, root: &Path) -> Result<RefreshSummary> {
        if !root.is_dir() {
            return Err(SimcatError::Config {
                message: format!("model directory does not exist: {}", root.display()),
            });
        }
        let root = canonical(root);

        let scanned: HashSet<PathBuf> = WalkDir::new(&root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| {
                e.path().extension().and_then(|x| x.to_str())
                    == Some(CatalogConfig::DB_FILE_EXTENSION)
            })
            .map(|e| canonical(e.path()))
            .collect();

        let known: HashSet<PathBuf> = {
            let reg = self.lock()?;
            reg.entries.iter().map(|e| e.db_path.clone()).collect()
        };

        let mut summary = RefreshSummary::default();
        let mut opened = Vec::new();
        let mut new_paths: Vec<&PathBuf> = scanned.difference(&known).collect();
        new_paths.sort();
        for path in new_paths {
            match ModelEntry::open(path) {
                Ok(entry) => opened.push(entry),
                Err(e) => {
                    warn!("Failed to open model database {}: {}", path.display(), e);
                    summary.failed.push(path.clone());
                }
            }
        }

        let mut reg = self.lock()?;

        let mut i = 0;
        while i < reg.entries.len() {
            let path = &reg.entries[i].db_path;
            let gone = !path.exists() || (path.starts_with(&root) && !scanned.contains(path));
            if gone {
                let e = reg.remove(i);
                info!("Model {} {} removed, file is gone", e.name(), e.digest());
                summary.removed.push(e.digest().to_string());
            } else {
                i += 1;
            }
        }
        summary.kept = reg.len();

        for entry in opened {
            if reg.index_by_digest(entry.digest()).is_some() {
                warn!(
                    "Model {} {} in {} is already open from another file, skipped",
                    entry.name(),
                    entry.digest(),
                    entry.db_path.display()
                );
                continue;
            }
            if reg.index_by_path(&entry.db_path).is_some() {
                continue;
            }
            info!("Model {} {} added", entry.name(), entry.digest());
            summary.added.push(entry.digest().to_string());
            reg.push(entry);
        }

        info!(
            "Refreshed {}: {} added, {} removed, {} kept, {} failed",
            root.display(),
            summary.added.len(),
            summary.removed.len(),
            summary.kept,
            summary.failed.len()
        );
        Ok(summary)
    }

    /// Open one model database file, or return the model if it is already open.
    pub fn open_db_file(&self, path: &Path) -> Result<ModelInfo> {
        if !path.is_file() {
            return Err(SimcatError::FileNotFound(path.to_path_buf()));
        }
        let path = canonical(path);
        {
            let reg = self.lock()?;
            if let Some(i) = reg.index_by_path(&path) {
                return Ok(reg.entries[i].info());
            }
        }

        let entry = ModelEntry::open(&path)?;

        let mut reg = self.lock()?;
        if let Some(i) = reg.index_by_path(&path) {
            return Ok(reg.entries[i].info());
        }
        if let Some(i) = reg.index_by_digest(entry.digest()) {
            return Err(SimcatError::validation(
                "path",
                format!(
                    "model {} is already open from {}",
                    entry.digest(),
                    reg.entries[i].db_path.display()
                ),
            ));
        }
        let info = entry.info();
        info!("Model {} {} opened from {}", info.name, info.digest, path.display());
        reg.push(entry);
        Ok(info)
    }

    /// Close model `id` and remove it from the registry.
    pub fn close_model(&self, id: &str) -> Result<()> {
        let mut reg = self.lock()?;
        let Some(i) = reg.index_by_digest_or_name(id) else {
            return Err(SimcatError::ModelNotFound {
                model: id.to_string(),
            });
        };
        let e = reg.remove(i);
        info!("Model {} {} closed", e.name(), e.digest());
        Ok(())
    }

    /// Close every model; returns how many were open.
    pub fn close_all(&self) -> Result<usize> {
        let mut reg = self.lock()?;
        let n = reg.entries.len();
        reg.entries.clear();
        reg.rebuild_index();
        info!("Closed all {} models", n);
        Ok(n)
    }

    /// Close model `id` and delete its database file with SQLite side files.
    ///
    /// Returns the path of the deleted database.
    pub fn delete_model(&self, id: &str) -> Result<PathBuf> {
        let entry = {
            let mut reg = self.lock()?;
            let Some(i) = reg.index_by_digest_or_name(id) else {
                return Err(SimcatError::ModelNotFound {
                    model: id.to_string(),
                });
            };
            reg.remove(i)
        };
        let path = entry.db_path.clone();
        let (name, digest) = (entry.name().to_string(), entry.digest().to_string());
        // close the connection before the file goes away
        drop(entry);

        std::fs::remove_file(&path).map_err(|err| SimcatError::io_with_path(err, &path))?;
        for suffix in CatalogConfig::DB_SIDECAR_SUFFIXES {
            let mut side = path.clone().into_os_string();
            side.push(suffix);
            let side = PathBuf::from(side);
            match std::fs::remove_file(&side) {
                Ok(()) => debug!("Removed {}", side.display()),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(SimcatError::io_with_path(err, side)),
            }
        }

        info!("Model {} {} deleted: {}", name, digest, path.display());
        Ok(path)
    }

    // ========================================
    // Listings
    // ========================================

    pub fn model_list(&self) -> Result<Vec<ModelInfo>> {
        let reg = self.lock()?;
        Ok(reg.entries.iter().map(ModelEntry::info).collect())
    }

    /// True if a model is open from the database file at `path`.
    pub fn is_db_path_open(&self, path: &Path) -> Result<bool> {
        let path = canonical(path);
        let reg = self.lock()?;
        Ok(reg.index_by_path(&path).is_some())
    }

    pub fn run_list(&self, id: &str) -> Result<Vec<RunRow>> {
        let handle = self.resolve(id)?;
        let conn = lock_conn(&handle.conn)?;
        rows::get_run_list(&conn, handle.meta.model.model_id)
    }

    pub fn workset_list(&self, id: &str) -> Result<Vec<WorksetRow>> {
        let handle = self.resolve(id)?;
        let conn = lock_conn(&handle.conn)?;
        rows::get_workset_list(&conn, handle.meta.model.model_id)
    }
}
