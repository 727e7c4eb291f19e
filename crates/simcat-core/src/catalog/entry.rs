//! One open model: connection, metadata states and languages.

use crate::config::CatalogConfig;
use crate::lang::LangMatcher;
use crate::meta::{loader, LangRow, ModelDicRow, ModelMeta, ModelTxtMeta};
use crate::{Result, SimcatError};
use rusqlite::{Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, warn};

/// Language-neutral metadata of an entry.
#[derive(Debug, Clone)]
pub(crate) enum MetaState {
    /// Only the `model_dic` row is known.
    IdentityOnly(ModelDicRow),
    Full(Arc<ModelMeta>),
}

impl MetaState {
    pub(crate) fn model_dic(&self) -> &ModelDicRow {
        match self {
            MetaState::IdentityOnly(row) => row,
            MetaState::Full(meta) => &meta.model,
        }
    }

    pub(crate) fn full(&self) -> Option<&Arc<ModelMeta>> {
        match self {
            MetaState::Full(meta) => Some(meta),
            MetaState::IdentityOnly(_) => None,
        }
    }
}

/// Language-specific metadata of an entry.
#[derive(Debug, Clone)]
pub(crate) enum TxtState {
    Unloaded,
    Full(Arc<ModelTxtMeta>),
}

impl TxtState {
    pub(crate) fn full(&self) -> Option<&Arc<ModelTxtMeta>> {
        match self {
            TxtState::Full(txt) => Some(txt),
            TxtState::Unloaded => None,
        }
    }
}

/// Summary of an open model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    pub model_id: i32,
    pub name: String,
    pub digest: String,
    pub version: String,
    pub create_dt: String,
    pub db_path: PathBuf,
    pub is_meta_full: bool,
    pub is_txt_full: bool,
    pub lang_codes: Vec<String>,
    pub default_lang_code: String,
}

/// Registry entry of one open model.
///
/// Dropping the entry closes its connection once in-flight reads holding a
/// clone of it finish.
pub struct ModelEntry {
    pub(crate) db_path: PathBuf,
    pub(crate) conn: Arc<Mutex<Connection>>,
    pub(crate) meta: MetaState,
    pub(crate) txt: TxtState,
    pub(crate) langs: Vec<LangRow>,
    pub(crate) matcher: LangMatcher,
}

impl ModelEntry {
    /// Open a model database and read its identity and languages.
    ///
    /// `path` should be canonical; it is the key used to match files on refresh.
    pub(crate) fn open(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(SimcatError::FileNotFound(path.to_path_buf()));
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(Duration::from_millis(u64::from(
            CatalogConfig::BUSY_TIMEOUT_MS,
        )))?;

        let mut models = loader::load_model_list(&conn)?;
        if models.len() > 1 {
            warn!(
                "{} contains {} models, only {} is used",
                path.display(),
                models.len(),
                models[0].name
            );
        }
        if models.is_empty() {
            return Err(SimcatError::Database {
                message: format!("no model found in {}", path.display()),
                source: None,
            });
        }
        let model = models.swap_remove(0);

        let langs = loader::load_lang_list(&conn)?;
        let default_code = langs
            .iter()
            .find(|l| l.lang_id == model.default_lang_id)
            .map(|l| l.code.clone())
            .unwrap_or_default();
        let codes = langs.iter().map(|l| l.code.clone()).collect();
        let matcher = LangMatcher::new(codes, default_code);

        debug!(
            "Opened model {} {} from {}",
            model.name,
            model.digest,
            path.display()
        );

        Ok(Self {
            db_path: path.to_path_buf(),
            conn: Arc::new(Mutex::new(conn)),
            meta: MetaState::IdentityOnly(model),
            txt: TxtState::Unloaded,
            langs,
            matcher,
        })
    }

    pub fn name(&self) -> &str {
        &self.meta.model_dic().name
    }

    pub fn digest(&self) -> &str {
        &self.meta.model_dic().digest
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn is_meta_full(&self) -> bool {
        self.meta.full().is_some()
    }

    pub fn is_txt_full(&self) -> bool {
        self.txt.full().is_some()
    }

    pub fn info(&self) -> ModelInfo {
        let model = self.meta.model_dic();
        ModelInfo {
            model_id: model.model_id,
            name: model.name.clone(),
            digest: model.digest.clone(),
            version: model.version.clone(),
            create_dt: model.create_dt.clone(),
            db_path: self.db_path.clone(),
            is_meta_full: self.is_meta_full(),
            is_txt_full: self.is_txt_full(),
            lang_codes: self.matcher.codes().to_vec(),
            default_lang_code: self.matcher.default_code().to_string(),
        }
    }
}

pub(crate) fn lock_conn(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>> {
    conn.lock().map_err(|_| SimcatError::Database {
        message: "Failed to acquire model connection lock".to_string(),
        source: None,
    })
}
