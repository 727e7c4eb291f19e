//! Single-entity queries on runs and worksets.

use super::now_dt;
use super::schema::quote_ident;
use crate::meta::{DescrNote, ModelMeta};
use crate::Result;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Run status as stored in `run_lst.status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Init,
    Progress,
    Wait,
    Success,
    Exit,
    Error,
}

impl RunStatus {
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "i" => Some(RunStatus::Init),
            "p" => Some(RunStatus::Progress),
            "w" => Some(RunStatus::Wait),
            "s" => Some(RunStatus::Success),
            "x" => Some(RunStatus::Exit),
            "e" => Some(RunStatus::Error),
            _ => None,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            RunStatus::Init => "i",
            RunStatus::Progress => "p",
            RunStatus::Wait => "w",
            RunStatus::Success => "s",
            RunStatus::Exit => "x",
            RunStatus::Error => "e",
        }
    }

    /// Success, exit and error are final states.
    pub fn is_completed(self) -> bool {
        matches!(self, RunStatus::Success | RunStatus::Exit | RunStatus::Error)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// A model run (`run_lst`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRow {
    pub run_id: i32,
    pub model_id: i32,
    pub name: String,
    pub sub_count: i32,
    pub sub_started: i32,
    pub sub_completed: i32,
    pub create_dt: String,
    pub status: String,
    pub update_dt: String,
    pub digest: String,
    pub stamp: String,
}

impl RunRow {
    pub fn run_status(&self) -> Option<RunStatus> {
        RunStatus::from_code(&self.status)
    }

    pub fn is_completed(&self) -> bool {
        self.run_status().is_some_and(RunStatus::is_completed)
    }
}

/// A workset (`workset_lst`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorksetRow {
    pub set_id: i32,
    pub base_run_id: Option<i32>,
    pub model_id: i32,
    pub name: String,
    pub is_readonly: bool,
    pub update_dt: String,
}

/// Parameter handle of a workset (`workset_parameter`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorksetParamRow {
    pub set_id: i32,
    pub param_hid: i32,
    pub sub_count: i32,
    pub default_sub_id: i32,
}

/// Parameter handle of a run (`run_parameter`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunParamRow {
    pub run_id: i32,
    pub param_hid: i32,
    pub sub_count: i32,
}

// ============================================================================
// Runs
// ============================================================================

const RUN_COLUMNS: &str = "run_id, model_id, run_name, sub_count, sub_started, sub_completed,
     create_dt, status, update_dt, COALESCE(run_digest, ''), run_stamp";

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<RunRow> {
    Ok(RunRow {
        run_id: row.get(0)?,
        model_id: row.get(1)?,
        name: row.get(2)?,
        sub_count: row.get(3)?,
        sub_started: row.get(4)?,
        sub_completed: row.get(5)?,
        create_dt: row.get(6)?,
        status: row.get(7)?,
        update_dt: row.get(8)?,
        digest: row.get(9)?,
        stamp: row.get(10)?,
    })
}

fn query_run(
    conn: &Connection,
    where_order: &str,
    args: impl rusqlite::Params,
) -> Result<Option<RunRow>> {
    let sql = format!("SELECT {} FROM run_lst WHERE {} LIMIT 1", RUN_COLUMNS, where_order);
    let row = conn.query_row(&sql, args, run_from_row).optional()?;
    Ok(row)
}

pub fn get_run(conn: &Connection, run_id: i32) -> Result<Option<RunRow>> {
    query_run(conn, "run_id = ?1", params![run_id])
}

/// Find a run by digest, then by stamp, then by name; the lowest run id wins.
pub fn get_run_by_digest_stamp_or_name(
    conn: &Connection,
    model_id: i32,
    rdsn: &str,
) -> Result<Option<RunRow>> {
    for column in ["run_digest", "run_stamp", "run_name"] {
        let found = query_run(
            conn,
            &format!("model_id = ?1 AND {} = ?2 ORDER BY run_id", column),
            params![model_id, rdsn],
        )?;
        if found.is_some() {
            debug!("Run {} resolved by {}", rdsn, column);
            return Ok(found);
        }
    }
    Ok(None)
}

pub fn get_first_run(conn: &Connection, model_id: i32) -> Result<Option<RunRow>> {
    query_run(conn, "model_id = ?1 ORDER BY run_id", params![model_id])
}

pub fn get_last_run(conn: &Connection, model_id: i32) -> Result<Option<RunRow>> {
    query_run(conn, "model_id = ?1 ORDER BY run_id DESC", params![model_id])
}

pub fn get_last_completed_run(conn: &Connection, model_id: i32) -> Result<Option<RunRow>> {
    query_run(
        conn,
        "model_id = ?1 AND status IN ('s', 'x', 'e') ORDER BY run_id DESC",
        params![model_id],
    )
}

pub fn get_run_list(conn: &Connection, model_id: i32) -> Result<Vec<RunRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM run_lst WHERE model_id = ?1 ORDER BY run_id",
        RUN_COLUMNS
    ))?;
    let rows = stmt.query_map(params![model_id], run_from_row)?;

    let mut runs = Vec::new();
    for row in rows {
        runs.push(row?);
    }
    Ok(runs)
}

pub fn get_run_param(
    conn: &Connection,
    run_id: i32,
    param_hid: i32,
) -> Result<Option<RunParamRow>> {
    let row = conn
        .query_row(
            "SELECT run_id, parameter_hid, sub_count FROM run_parameter
             WHERE run_id = ?1 AND parameter_hid = ?2",
            params![run_id, param_hid],
            |row| {
                Ok(RunParamRow {
                    run_id: row.get(0)?,
                    param_hid: row.get(1)?,
                    sub_count: row.get(2)?,
                })
            },
        )
        .optional()?;
    Ok(row)
}

// ============================================================================
// Worksets
// ============================================================================

const WORKSET_COLUMNS: &str = "set_id, base_run_id, model_id, set_name, is_readonly, update_dt";

fn workset_from_row(row: &Row<'_>) -> rusqlite::Result<WorksetRow> {
    Ok(WorksetRow {
        set_id: row.get(0)?,
        base_run_id: row.get(1)?,
        model_id: row.get(2)?,
        name: row.get(3)?,
        is_readonly: row.get::<_, i32>(4)? != 0,
        update_dt: row.get(5)?,
    })
}

pub fn get_workset(conn: &Connection, set_id: i32) -> Result<Option<WorksetRow>> {
    let row = conn
        .query_row(
            &format!("SELECT {} FROM workset_lst WHERE set_id = ?1", WORKSET_COLUMNS),
            params![set_id],
            workset_from_row,
        )
        .optional()?;
    Ok(row)
}

pub fn get_workset_by_name(
    conn: &Connection,
    model_id: i32,
    name: &str,
) -> Result<Option<WorksetRow>> {
    let row = conn
        .query_row(
            &format!(
                "SELECT {} FROM workset_lst WHERE model_id = ?1 AND set_name = ?2",
                WORKSET_COLUMNS
            ),
            params![model_id, name],
            workset_from_row,
        )
        .optional()?;
    Ok(row)
}

pub fn get_workset_list(conn: &Connection, model_id: i32) -> Result<Vec<WorksetRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM workset_lst WHERE model_id = ?1 ORDER BY set_id",
        WORKSET_COLUMNS
    ))?;
    let rows = stmt.query_map(params![model_id], workset_from_row)?;

    let mut sets = Vec::new();
    for row in rows {
        sets.push(row?);
    }
    Ok(sets)
}

/// Descriptions and notes of a workset in every language.
pub fn get_workset_txt(conn: &Connection, set_id: i32) -> Result<Vec<DescrNote>> {
    let mut stmt = conn.prepare(
        "SELECT L.lang_code, W.descr, W.note
         FROM workset_txt W
         INNER JOIN lang_lst L ON (L.lang_id = W.lang_id)
         WHERE W.set_id = ?1 ORDER BY W.lang_id",
    )?;
    let rows = stmt.query_map(params![set_id], |row| {
        Ok(DescrNote {
            lang_code: row.get(0)?,
            descr: row.get(1)?,
            note: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        })
    })?;

    let mut txt = Vec::new();
    for row in rows {
        txt.push(row?);
    }
    Ok(txt)
}

pub fn get_workset_param_list(conn: &Connection, set_id: i32) -> Result<Vec<WorksetParamRow>> {
    let mut stmt = conn.prepare(
        "SELECT set_id, parameter_hid, sub_count, default_sub_id
         FROM workset_parameter WHERE set_id = ?1 ORDER BY parameter_hid",
    )?;
    let rows = stmt.query_map(params![set_id], workset_param_from_row)?;

    let mut params_list = Vec::new();
    for row in rows {
        params_list.push(row?);
    }
    Ok(params_list)
}

pub fn get_workset_param(
    conn: &Connection,
    set_id: i32,
    param_hid: i32,
) -> Result<Option<WorksetParamRow>> {
    let row = conn
        .query_row(
            "SELECT set_id, parameter_hid, sub_count, default_sub_id
             FROM workset_parameter WHERE set_id = ?1 AND parameter_hid = ?2",
            params![set_id, param_hid],
            workset_param_from_row,
        )
        .optional()?;
    Ok(row)
}

fn workset_param_from_row(row: &Row<'_>) -> rusqlite::Result<WorksetParamRow> {
    Ok(WorksetParamRow {
        set_id: row.get(0)?,
        param_hid: row.get(1)?,
        sub_count: row.get(2)?,
        default_sub_id: row.get(3)?,
    })
}

/// Set the read-only flag and touch the update time.
pub fn update_workset_readonly(conn: &Connection, set_id: i32, is_readonly: bool) -> Result<()> {
    conn.execute(
        "UPDATE workset_lst SET is_readonly = ?1, update_dt = ?2 WHERE set_id = ?3",
        params![is_readonly as i32, now_dt(), set_id],
    )?;
    Ok(())
}

pub fn touch_workset(conn: &Connection, set_id: i32) -> Result<()> {
    conn.execute(
        "UPDATE workset_lst SET update_dt = ?1 WHERE set_id = ?2",
        params![now_dt(), set_id],
    )?;
    Ok(())
}

/// Delete a workset with its text, parameter handles and parameter values.
///
/// Returns false if there was no such workset.
pub fn delete_workset(conn: &Connection, meta: &ModelMeta, set_id: i32) -> Result<bool> {
    let hids: Vec<i32> = get_workset_param_list(conn, set_id)?
        .iter()
        .map(|p| p.param_hid)
        .collect();
    for hid in hids {
        if let Some(param) = meta.param_by_hid(hid) {
            conn.execute(
                &format!("DELETE FROM {} WHERE set_id = ?1", quote_ident(&param.db_set_table)),
                params![set_id],
            )?;
        }
    }

    conn.execute("DELETE FROM workset_parameter_txt WHERE set_id = ?1", params![set_id])?;
    conn.execute("DELETE FROM workset_parameter WHERE set_id = ?1", params![set_id])?;
    conn.execute("DELETE FROM workset_txt WHERE set_id = ?1", params![set_id])?;
    let n = conn.execute("DELETE FROM workset_lst WHERE set_id = ?1", params![set_id])?;
    Ok(n > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::create_model_schema;

    fn insert_run(
        conn: &Connection,
        run_id: i32,
        name: &str,
        status: &str,
        digest: &str,
        stamp: &str,
    ) {
        conn.execute(
            "INSERT INTO run_lst (run_id, model_id, run_name, sub_count, sub_started, sub_completed,
                                  create_dt, status, update_dt, run_digest, run_stamp)
             VALUES (?1, 1, ?2, 1, 1, 1, '2026-01-01 00:00:00.000', ?3, '2026-01-01 00:00:00.000', ?4, ?5)",
            params![run_id, name, status, digest, stamp],
        )
        .unwrap();
    }

    fn run_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        create_model_schema(&conn).unwrap();
        insert_run(&conn, 11, "first", "s", "d-11", "2026_01_01");
        insert_run(&conn, 12, "second", "p", "d-12", "2026_01_02");
        insert_run(&conn, 13, "d-11", "s", "d-13", "2026_01_03");
        conn
    }

    #[test]
    fn test_run_status() {
        assert!(RunStatus::from_code("s").unwrap().is_completed());
        assert!(RunStatus::from_code("e").unwrap().is_completed());
        assert!(!RunStatus::from_code("p").unwrap().is_completed());
        assert_eq!(RunStatus::from_code("?"), None);
    }

    #[test]
    fn test_run_lookup_order() {
        let conn = run_db();

        // digest beats a run named the same
        let run = get_run_by_digest_stamp_or_name(&conn, 1, "d-11").unwrap().unwrap();
        assert_eq!(run.run_id, 11);

        let run = get_run_by_digest_stamp_or_name(&conn, 1, "2026_01_02").unwrap().unwrap();
        assert_eq!(run.run_id, 12);
        assert!(!run.is_completed());

        let run = get_run_by_digest_stamp_or_name(&conn, 1, "second").unwrap().unwrap();
        assert_eq!(run.run_id, 12);

        assert!(get_run_by_digest_stamp_or_name(&conn, 1, "none").unwrap().is_none());
        assert!(get_run_by_digest_stamp_or_name(&conn, 2, "first").unwrap().is_none());
    }

    #[test]
    fn test_first_last_completed() {
        let conn = run_db();
        insert_run(&conn, 14, "fourth", "i", "d-14", "2026_01_04");

        assert_eq!(get_first_run(&conn, 1).unwrap().unwrap().run_id, 11);
        assert_eq!(get_last_run(&conn, 1).unwrap().unwrap().run_id, 14);
        assert_eq!(get_last_completed_run(&conn, 1).unwrap().unwrap().run_id, 13);
        assert_eq!(get_run_list(&conn, 1).unwrap().len(), 4);
    }
}
