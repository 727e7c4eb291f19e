//! Paged reads of parameters and output tables.
//!
//! A read resolves the model and the source by name, checks that the source
//! may be read and then delegates to the value store with the registry lock
//! released.

use crate::catalog::{lock_conn, Catalog};
use crate::convert::code::{find_param, find_table};
use crate::db::{rows, values};
use crate::error::log_failure;
use crate::layout::{ParamCell, ReadPage, ReadParamLayout, ReadTableLayout, TableCell};
use crate::{Result, SimcatError};
use rusqlite::Connection;
use tracing::debug;

fn require_id(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(SimcatError::validation(field, "must not be empty"));
    }
    Ok(())
}

/// Find a run by digest, stamp or name and require it to be completed.
pub(crate) fn completed_run(
    conn: &Connection,
    model_name: &str,
    model_id: i32,
    run: &str,
) -> Result<rows::RunRow> {
    let row = rows::get_run_by_digest_stamp_or_name(conn, model_id, run)?.ok_or_else(|| {
        SimcatError::RunNotFound {
            model: model_name.to_string(),
            run: run.to_string(),
        }
    })?;
    if !row.is_completed() {
        return Err(SimcatError::RunNotCompleted {
            run: run.to_string(),
            status: row.status.clone(),
        });
    }
    Ok(row)
}

/// Read a page of parameter values from a workset or a completed run.
///
/// With `layout.is_from_set` the source is a workset name and the workset
/// must contain the parameter; otherwise the source is a run digest, stamp
/// or name.
pub fn read_parameter(
    catalog: &Catalog,
    model: &str,
    source: &str,
    layout: &ReadParamLayout,
) -> Result<ReadPage<ParamCell>> {
    let result = read_parameter_page(catalog, model, source, layout);
    if let Err(e) = &result {
        log_failure(
            &format!("Read parameter {} of {} from {}", layout.layout.name, model, source),
            e,
        );
    }
    result
}

fn read_parameter_page(
    catalog: &Catalog,
    model: &str,
    source: &str,
    layout: &ReadParamLayout,
) -> Result<ReadPage<ParamCell>> {
    require_id("model", model)?;
    require_id("source", source)?;
    require_id("parameter", &layout.layout.name)?;

    let handle = catalog.resolve(model)?;
    let meta = &handle.meta;
    let param = find_param(meta, &layout.layout.name)?;
    let model_id = meta.model.model_id;

    let conn = lock_conn(&handle.conn)?;
    let mut resolved = layout.clone();

    if layout.is_from_set {
        let set = rows::get_workset_by_name(&conn, model_id, source)?.ok_or_else(|| {
            SimcatError::WorksetNotFound {
                model: meta.model.name.clone(),
                workset: source.to_string(),
            }
        })?;
        if rows::get_workset_param(&conn, set.set_id, param.hid)?.is_none() {
            return Err(SimcatError::ParameterNotInSource {
                source_name: format!("Workset {}", source),
                parameter: param.name.clone(),
            });
        }
        resolved.layout.from_id = set.set_id;
    } else {
        let run = completed_run(&conn, &meta.model.name, model_id, source)?;
        if rows::get_run_param(&conn, run.run_id, param.hid)?.is_none() {
            return Err(SimcatError::ParameterNotInSource {
                source_name: format!("Model run {}", source),
                parameter: param.name.clone(),
            });
        }
        resolved.layout.from_id = run.run_id;
    }

    debug!(
        "Reading {} from {} id {}, offset {}, size {}",
        param.name, source, resolved.layout.from_id, layout.layout.offset, layout.layout.size
    );
    values::read_param_page(&conn, meta, param, &resolved)
}

/// Read a page of output table values from a completed run.
pub fn read_output_table(
    catalog: &Catalog,
    model: &str,
    run: &str,
    layout: &ReadTableLayout,
) -> Result<ReadPage<TableCell>> {
    let result = read_output_table_page(catalog, model, run, layout);
    if let Err(e) = &result {
        log_failure(
            &format!("Read output table {} of {} from run {}", layout.layout.name, model, run),
            e,
        );
    }
    result
}

fn read_output_table_page(
    catalog: &Catalog,
    model: &str,
    run: &str,
    layout: &ReadTableLayout,
) -> Result<ReadPage<TableCell>> {
    require_id("model", model)?;
    require_id("run", run)?;
    require_id("table", &layout.layout.name)?;

    let handle = catalog.resolve(model)?;
    let meta = &handle.meta;
    let table = find_table(meta, &layout.layout.name)?;

    let conn = lock_conn(&handle.conn)?;
    let row = completed_run(&conn, &meta.model.name, meta.model.model_id, run)?;

    let mut resolved = layout.clone();
    resolved.layout.from_id = row.run_id;
    values::read_table_page(&conn, meta, table, &resolved)
}
