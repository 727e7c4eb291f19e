//! Workset mutation.
//!
//! Every operation resolves the model and runs its checks and writes with
//! the registry lock held and inside one transaction, so the read-only flag
//! cannot change between the check and the write it guards. A read-only
//! workset only accepts a change of that flag.

use crate::catalog::{Catalog, LockedModel};
use crate::convert::code::find_param;
use crate::convert::{DoubleFormat, ParameterCsvConverter};
use crate::db::rows::{self, WorksetRow};
use crate::db::{now_dt, values};
use crate::error::log_failure;
use crate::layout::{ParamCell, ValueMode};
use crate::meta::{DescrNote, ParamMeta};
use crate::read::completed_run;
use crate::{Result, SimcatError};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::io::Read;
use tracing::{info, warn};

/// Parameter value note in one language.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LangNote {
    pub lang_code: String,
    pub note: String,
}

/// Parameter of a workset in public form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParamRunSetPub {
    pub name: String,
    #[serde(default = "default_sub_count")]
    pub sub_count: i32,
    #[serde(default)]
    pub default_sub_id: i32,
    #[serde(default)]
    pub txt: Vec<LangNote>,
}

fn default_sub_count() -> i32 {
    1
}

impl ParamRunSetPub {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sub_count: default_sub_count(),
            default_sub_id: 0,
            txt: Vec::new(),
        }
    }
}

/// Workset in public form: names and language codes instead of ids.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorksetPub {
    pub model_name: String,
    pub model_digest: String,
    pub name: String,
    /// Digest, stamp or name of the run the workset is based on.
    pub base_run_digest: String,
    pub is_readonly: bool,
    pub txt: Vec<DescrNote>,
    pub params: Vec<ParamRunSetPub>,
}

impl WorksetPub {
    pub fn new(model: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            model_name: model.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    /// Digest if given, otherwise name.
    fn model_id(&self) -> &str {
        if self.model_digest.is_empty() {
            &self.model_name
        } else {
            &self.model_digest
        }
    }
}

/// Outcome of `update_workset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorksetUpdate {
    pub set_id: i32,
    pub created: bool,
    /// A new workset was created empty although parameters were supplied.
    pub params_erased: bool,
}

fn logged<T>(context: impl FnOnce() -> String, result: Result<T>) -> Result<T> {
    if let Err(e) = &result {
        log_failure(&context(), e);
    }
    result
}

// ============================================================================
// Shared steps
// ============================================================================

fn require_name(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(SimcatError::validation(field, "must not be empty"));
    }
    Ok(())
}

fn find_workset(conn: &Connection, m: &LockedModel<'_>, name: &str) -> Result<WorksetRow> {
    rows::get_workset_by_name(conn, m.meta.model.model_id, name)?.ok_or_else(|| {
        SimcatError::WorksetNotFound {
            model: m.name().to_string(),
            workset: name.to_string(),
        }
    })
}

fn find_writable_workset(conn: &Connection, m: &LockedModel<'_>, name: &str) -> Result<WorksetRow> {
    let set = find_workset(conn, m, name)?;
    ensure_writable(&set)?;
    Ok(set)
}

fn ensure_writable(set: &WorksetRow) -> Result<()> {
    if set.is_readonly {
        return Err(SimcatError::WorksetReadOnly {
            workset: set.name.clone(),
        });
    }
    Ok(())
}

fn check_sub_values(param: &ParamRunSetPub) -> Result<()> {
    if param.sub_count < 1 {
        return Err(SimcatError::validation(
            &param.name,
            format!("invalid sub-value count: {}", param.sub_count),
        ));
    }
    if param.default_sub_id < 0 || param.default_sub_id >= param.sub_count {
        return Err(SimcatError::validation(
            &param.name,
            format!(
                "default sub-value id {} out of range [0, {})",
                param.default_sub_id, param.sub_count
            ),
        ));
    }
    Ok(())
}

/// Create an empty read-write workset.
fn create_workset(conn: &Connection, m: &LockedModel<'_>, wp: &WorksetPub) -> Result<WorksetRow> {
    let model_id = m.meta.model.model_id;
    let base_run_id = if wp.base_run_digest.is_empty() {
        None
    } else {
        Some(completed_run(conn, m.name(), model_id, &wp.base_run_digest)?.run_id)
    };

    let set_id: i32 = conn.query_row(
        "SELECT COALESCE(MAX(set_id), 0) + 1 FROM workset_lst",
        [],
        |row| row.get(0),
    )?;
    conn.execute(
        "INSERT INTO workset_lst (set_id, base_run_id, model_id, set_name, is_readonly, update_dt)
         VALUES (?1, ?2, ?3, ?4, 0, ?5)",
        params![set_id, base_run_id, model_id, wp.name, now_dt()],
    )?;
    write_workset_txt(conn, m, set_id, &wp.txt)?;

    info!("Workset {} created in {}, id {}", wp.name, m.name(), set_id);
    rows::get_workset(conn, set_id)?.ok_or_else(|| SimcatError::Database {
        message: format!("workset {} disappeared after insert", wp.name),
        source: None,
    })
}

fn find_or_create_workset(
    conn: &Connection,
    m: &LockedModel<'_>,
    wp: &WorksetPub,
) -> Result<(WorksetRow, bool)> {
    match rows::get_workset_by_name(conn, m.meta.model.model_id, &wp.name)? {
        Some(set) => Ok((set, false)),
        None => Ok((create_workset(conn, m, wp)?, true)),
    }
}

/// Upsert workset descriptions per language; unknown languages are skipped.
fn write_workset_txt(
    conn: &Connection,
    m: &LockedModel<'_>,
    set_id: i32,
    txt: &[DescrNote],
) -> Result<()> {
    for t in txt {
        let Some(lang_id) = m.lang_id(&t.lang_code) else {
            warn!("Workset {} text skipped, unknown language: {}", set_id, t.lang_code);
            continue;
        };
        conn.execute(
            "INSERT OR REPLACE INTO workset_txt (set_id, lang_id, descr, note)
             VALUES (?1, ?2, ?3, ?4)",
            params![set_id, lang_id, t.descr, t.note],
        )?;
    }
    Ok(())
}

fn write_param_txt(
    conn: &Connection,
    m: &LockedModel<'_>,
    set_id: i32,
    param_hid: i32,
    txt: &[LangNote],
) -> Result<()> {
    for t in txt {
        let Some(lang_id) = m.lang_id(&t.lang_code) else {
            warn!("Parameter {} note skipped, unknown language: {}", param_hid, t.lang_code);
            continue;
        };
        conn.execute(
            "INSERT OR REPLACE INTO workset_parameter_txt (set_id, parameter_hid, lang_id, note)
             VALUES (?1, ?2, ?3, ?4)",
            params![set_id, param_hid, lang_id, t.note],
        )?;
    }
    Ok(())
}

/// Add or overwrite the handle and notes of a workset parameter.
///
/// Values with a sub-value id beyond the new count are dropped. Returns
/// true if the parameter was already in the workset.
fn upsert_param(
    conn: &Connection,
    m: &LockedModel<'_>,
    set_id: i32,
    is_replace: bool,
    param: &ParamMeta,
    pp: &ParamRunSetPub,
) -> Result<bool> {
    check_sub_values(pp)?;
    let existed = rows::get_workset_param(conn, set_id, param.hid)?.is_some();

    conn.execute(
        "INSERT OR REPLACE INTO workset_parameter (set_id, parameter_hid, sub_count, default_sub_id)
         VALUES (?1, ?2, ?3, ?4)",
        params![set_id, param.hid, pp.sub_count, pp.default_sub_id],
    )?;
    if existed {
        conn.execute(
            &format!(
                "DELETE FROM {} WHERE set_id = ?1 AND sub_id >= ?2",
                crate::db::schema::quote_ident(&param.db_set_table)
            ),
            params![set_id, pp.sub_count],
        )?;
    }

    if is_replace {
        conn.execute(
            "DELETE FROM workset_parameter_txt WHERE set_id = ?1 AND parameter_hid = ?2",
            params![set_id, param.hid],
        )?;
    }
    write_param_txt(conn, m, set_id, param.hid, &pp.txt)?;
    Ok(existed)
}

/// Remove a parameter with its values and notes from a workset.
fn remove_param(conn: &Connection, set_id: i32, param: &ParamMeta) -> Result<bool> {
    values::delete_param_values(conn, param, set_id)?;
    conn.execute(
        "DELETE FROM workset_parameter_txt WHERE set_id = ?1 AND parameter_hid = ?2",
        params![set_id, param.hid],
    )?;
    let n = conn.execute(
        "DELETE FROM workset_parameter WHERE set_id = ?1 AND parameter_hid = ?2",
        params![set_id, param.hid],
    )?;
    Ok(n > 0)
}

// ============================================================================
// Operations
// ============================================================================

/// Set or clear the read-only flag of a workset.
///
/// Returns the model digest and the updated workset row.
pub fn update_workset_readonly(
    catalog: &Catalog,
    model: &str,
    name: &str,
    is_readonly: bool,
) -> Result<(String, WorksetRow)> {
    let result = catalog.with_model_locked(model, |m, conn| {
        let set = find_workset(conn, m, name)?;
        rows::update_workset_readonly(conn, set.set_id, is_readonly)?;
        let row = rows::get_workset(conn, set.set_id)?.ok_or_else(|| SimcatError::WorksetNotFound {
            model: m.name().to_string(),
            workset: name.to_string(),
        })?;
        info!("Workset {} of {} read-only: {}", name, m.name(), is_readonly);
        Ok((m.digest().to_string(), row))
    });
    logged(|| format!("Update read-only flag of workset {} of {}", name, model), result)
}

/// Create a workset or update its text and parameter list.
///
/// A workset that does not exist is created empty; supplied parameters are
/// not added and `params_erased` reports that. An existing workset must be
/// read-write. Replace supersedes text and parameter list, dropping the
/// values of parameters not in the list; merge upserts text per language and
/// the listed parameters. The read-only flag of `wp` is applied last.
pub fn update_workset(
    catalog: &Catalog,
    is_replace: bool,
    wp: &WorksetPub,
) -> Result<WorksetUpdate> {
    let result = catalog.with_model_locked(wp.model_id(), |m, conn| {
        require_name("workset", &wp.name)?;
        let tx = conn.transaction()?;

        let (set, created) = find_or_create_workset(&tx, m, wp)?;
        let mut params_erased = false;

        if created {
            if !wp.params.is_empty() {
                warn!(
                    "Workset {} created empty, {} supplied parameters ignored",
                    wp.name,
                    wp.params.len()
                );
                params_erased = true;
            }
        } else {
            ensure_writable(&set)?;

            let listed = wp
                .params
                .iter()
                .map(|pp| Ok((find_param(m.meta, &pp.name)?, pp)))
                .collect::<Result<Vec<_>>>()?;

            if is_replace {
                tx.execute("DELETE FROM workset_txt WHERE set_id = ?1", params![set.set_id])?;

                let model_id = m.meta.model.model_id;
                let base_run_id = if wp.base_run_digest.is_empty() {
                    None
                } else {
                    Some(completed_run(&tx, m.name(), model_id, &wp.base_run_digest)?.run_id)
                };
                tx.execute(
                    "UPDATE workset_lst SET base_run_id = ?1 WHERE set_id = ?2",
                    params![base_run_id, set.set_id],
                )?;

                for handle in rows::get_workset_param_list(&tx, set.set_id)? {
                    let keep = listed.iter().any(|(p, _)| p.hid == handle.param_hid);
                    if let (false, Some(param)) = (keep, m.meta.param_by_hid(handle.param_hid)) {
                        remove_param(&tx, set.set_id, param)?;
                        info!("Parameter {} removed from workset {}", param.name, wp.name);
                    }
                }
            }

            write_workset_txt(&tx, m, set.set_id, &wp.txt)?;
            for (param, pp) in &listed {
                upsert_param(&tx, m, set.set_id, is_replace, param, pp)?;
            }
        }

        if wp.is_readonly != set.is_readonly {
            rows::update_workset_readonly(&tx, set.set_id, wp.is_readonly)?;
        } else {
            rows::touch_workset(&tx, set.set_id)?;
        }
        tx.commit()?;

        Ok(WorksetUpdate {
            set_id: set.set_id,
            created,
            params_erased,
        })
    });
    logged(|| format!("Update workset {} of {}", wp.name, wp.model_id()), result)
}

/// Delete a workset with all its parameter values.
///
/// Returns false if there was no such workset.
pub fn delete_workset(catalog: &Catalog, model: &str, name: &str) -> Result<bool> {
    let result = catalog.with_model_locked(model, |m, conn| {
        let Some(set) = rows::get_workset_by_name(conn, m.meta.model.model_id, name)? else {
            return Ok(false);
        };
        ensure_writable(&set)?;

        let tx = conn.transaction()?;
        let existed = rows::delete_workset(&tx, m.meta, set.set_id)?;
        tx.commit()?;

        info!("Workset {} deleted from {}", name, m.name());
        Ok(existed)
    });
    logged(|| format!("Delete workset {} of {}", name, model), result)
}

/// Add, merge or replace one workset parameter and optionally its values.
///
/// The workset is created empty if it does not exist. With a CSV source all
/// stored values of the parameter are replaced by the CSV rows; the first row
/// is a header. Returns true if the parameter was already in the workset.
pub fn update_workset_parameter<R: Read>(
    catalog: &Catalog,
    is_replace: bool,
    wp: &WorksetPub,
    pp: &ParamRunSetPub,
    csv: Option<R>,
    mode: ValueMode,
) -> Result<bool> {
    let result = catalog.with_model_locked(wp.model_id(), |m, conn| {
        require_name("workset", &wp.name)?;
        let param = find_param(m.meta, &pp.name)?;
        check_sub_values(pp)?;

        let cells = match csv {
            Some(source) => {
                let conv =
                    ParameterCsvConverter::new(m.meta, &pp.name, mode, DoubleFormat::default())?;
                Some(conv.read_csv(source)?)
            }
            None => None,
        };

        let tx = conn.transaction()?;
        let (set, _) = find_or_create_workset(&tx, m, wp)?;
        ensure_writable(&set)?;

        let existed = upsert_param(&tx, m, set.set_id, is_replace, param, pp)?;
        if let Some(cells) = &cells {
            let n =
                values::replace_param_values(&tx, m.meta, param, set.set_id, pp.sub_count, cells)?;
            info!(
                "Parameter {} of workset {}: {} values written",
                param.name, wp.name, n
            );
        }
        rows::touch_workset(&tx, set.set_id)?;
        tx.commit()?;

        Ok(existed)
    });
    logged(
        || format!("Update parameter {} of workset {} of {}", pp.name, wp.name, wp.model_id()),
        result,
    )
}

/// Remove a parameter and its values from a workset.
///
/// Returns false if the workset did not contain the parameter.
pub fn delete_workset_parameter(
    catalog: &Catalog,
    model: &str,
    name: &str,
    param_name: &str,
) -> Result<bool> {
    let result = catalog.with_model_locked(model, |m, conn| {
        let param = find_param(m.meta, param_name)?;
        let tx = conn.transaction()?;
        let set = find_writable_workset(&tx, m, name)?;

        let found = remove_param(&tx, set.set_id, param)?;
        if found {
            rows::touch_workset(&tx, set.set_id)?;
        }
        tx.commit()?;
        Ok(found)
    });
    logged(
        || format!("Delete parameter {} of workset {} of {}", param_name, name, model),
        result,
    )
}

/// Write a page of cells into a parameter already in the workset.
///
/// Each cell replaces the stored row with the same key; sub-value ids must
/// be below the parameter's sub-value count. Returns the number of cells
/// written.
pub fn update_workset_parameter_page(
    catalog: &Catalog,
    model: &str,
    name: &str,
    param_name: &str,
    cells: &[ParamCell],
) -> Result<usize> {
    let result = catalog.with_model_locked(model, |m, conn| {
        let param = find_param(m.meta, param_name)?;
        let tx = conn.transaction()?;
        let set = find_writable_workset(&tx, m, name)?;

        let handle = rows::get_workset_param(&tx, set.set_id, param.hid)?.ok_or_else(|| {
            SimcatError::ParameterNotInSource {
                source_name: format!("Workset {}", name),
                parameter: param.name.clone(),
            }
        })?;

        let n = values::write_param_cells(&tx, m.meta, param, set.set_id, handle.sub_count, cells)?;
        rows::touch_workset(&tx, set.set_id)?;
        tx.commit()?;
        Ok(n)
    });
    logged(
        || format!("Update page of parameter {} of workset {} of {}", param_name, name, model),
        result,
    )
}

fn ensure_not_in_workset(conn: &Connection, set: &WorksetRow, param: &ParamMeta) -> Result<()> {
    if rows::get_workset_param(conn, set.set_id, param.hid)?.is_some() {
        return Err(SimcatError::ParameterAlreadyExists {
            workset: set.name.clone(),
            parameter: param.name.clone(),
        });
    }
    Ok(())
}

/// Copy a parameter with its values from a completed run into a workset.
pub fn copy_parameter_from_run(
    catalog: &Catalog,
    model: &str,
    dst: &str,
    param_name: &str,
    run: &str,
) -> Result<()> {
    let result = catalog.with_model_locked(model, |m, conn| {
        let param = find_param(m.meta, param_name)?;
        let tx = conn.transaction()?;

        let set = find_writable_workset(&tx, m, dst)?;
        ensure_not_in_workset(&tx, &set, param)?;

        let run_row = completed_run(&tx, m.name(), m.meta.model.model_id, run)?;
        let run_param = rows::get_run_param(&tx, run_row.run_id, param.hid)?.ok_or_else(|| {
            SimcatError::ParameterNotInSource {
                source_name: format!("Model run {}", run),
                parameter: param.name.clone(),
            }
        })?;

        tx.execute(
            "INSERT INTO workset_parameter (set_id, parameter_hid, sub_count, default_sub_id)
             VALUES (?1, ?2, ?3, 0)",
            params![set.set_id, param.hid, run_param.sub_count],
        )?;
        let n = values::copy_param_values_from_run(&tx, param, run_row.run_id, set.set_id)?;
        rows::touch_workset(&tx, set.set_id)?;
        tx.commit()?;

        info!(
            "Parameter {} copied from run {} into workset {}: {} values",
            param.name, run, dst, n
        );
        Ok(())
    });
    logged(
        || {
            format!(
                "Copy parameter {} from run {} into workset {} of {}",
                param_name, run, dst, model
            )
        },
        result,
    )
}

/// Copy a parameter with its values and notes from a read-only workset into
/// another workset.
pub fn copy_parameter_between_worksets(
    catalog: &Catalog,
    model: &str,
    dst: &str,
    param_name: &str,
    src: &str,
) -> Result<()> {
    let result = catalog.with_model_locked(model, |m, conn| {
        let param = find_param(m.meta, param_name)?;
        let tx = conn.transaction()?;

        let dst_set = find_writable_workset(&tx, m, dst)?;
        ensure_not_in_workset(&tx, &dst_set, param)?;

        let src_set = find_workset(&tx, m, src)?;
        if !src_set.is_readonly {
            return Err(SimcatError::SourceWorksetNotReadOnly {
                workset: src_set.name,
            });
        }
        let handle = rows::get_workset_param(&tx, src_set.set_id, param.hid)?.ok_or_else(|| {
            SimcatError::ParameterNotInSource {
                source_name: format!("Workset {}", src),
                parameter: param.name.clone(),
            }
        })?;

        tx.execute(
            "INSERT INTO workset_parameter (set_id, parameter_hid, sub_count, default_sub_id)
             VALUES (?1, ?2, ?3, ?4)",
            params![dst_set.set_id, param.hid, handle.sub_count, handle.default_sub_id],
        )?;
        tx.execute(
            "INSERT INTO workset_parameter_txt (set_id, parameter_hid, lang_id, note)
             SELECT ?1, parameter_hid, lang_id, note FROM workset_parameter_txt
             WHERE set_id = ?2 AND parameter_hid = ?3",
            params![dst_set.set_id, src_set.set_id, param.hid],
        )?;
        let n = values::copy_param_values_from_set(&tx, param, src_set.set_id, dst_set.set_id)?;
        rows::touch_workset(&tx, dst_set.set_id)?;
        tx.commit()?;

        info!(
            "Parameter {} copied from workset {} into workset {}: {} values",
            param.name, src, dst, n
        );
        Ok(())
    });
    logged(
        || {
            format!(
                "Copy parameter {} from workset {} into workset {} of {}",
                param_name, src, dst, model
            )
        },
        result,
    )
}

/// Workset in public form with its text and parameter list.
pub fn workset_pub(catalog: &Catalog, model: &str, name: &str) -> Result<WorksetPub> {
    let result = catalog.with_model_locked(model, |m, conn| {
        let set = find_workset(conn, m, name)?;

        let base_run_digest = match set.base_run_id {
            Some(run_id) => rows::get_run(conn, run_id)?
                .map(|r| r.digest)
                .unwrap_or_default(),
            None => String::new(),
        };

        let mut params_pub = Vec::new();
        for handle in rows::get_workset_param_list(conn, set.set_id)? {
            let Some(param) = m.meta.param_by_hid(handle.param_hid) else {
                warn!("Workset {} refers to unknown parameter {}", name, handle.param_hid);
                continue;
            };
            params_pub.push(ParamRunSetPub {
                name: param.name.clone(),
                sub_count: handle.sub_count,
                default_sub_id: handle.default_sub_id,
                txt: param_notes(conn, set.set_id, handle.param_hid)?,
            });
        }

        Ok(WorksetPub {
            model_name: m.name().to_string(),
            model_digest: m.digest().to_string(),
            name: set.name.clone(),
            base_run_digest,
            is_readonly: set.is_readonly,
            txt: rows::get_workset_txt(conn, set.set_id)?,
            params: params_pub,
        })
    });
    logged(|| format!("Get workset {} of {}", name, model), result)
}

fn param_notes(conn: &Connection, set_id: i32, param_hid: i32) -> Result<Vec<LangNote>> {
    let mut stmt = conn.prepare(
        "SELECT L.lang_code, T.note
         FROM workset_parameter_txt T
         INNER JOIN lang_lst L ON (L.lang_id = T.lang_id)
         WHERE T.set_id = ?1 AND T.parameter_hid = ?2 ORDER BY T.lang_id",
    )?;
    let rows = stmt.query_map(params![set_id, param_hid], |row| {
        Ok(LangNote {
            lang_code: row.get(0)?,
            note: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
        })
    })?;

    let mut notes = Vec::new();
    for row in rows {
        notes.push(row?);
    }
    Ok(notes)
}
