//! Loading of model metadata from a model database.

use super::types::{
    DescrNote, DimMeta, EnumRow, ItemTxtRow, LangRow, ModelDicRow, ModelMeta, ModelTxtMeta,
    ParamMeta, TableAccRow, TableDimMeta, TableExprRow, TableMeta, TypeMeta, ValueKind,
};
use crate::Result;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use tracing::debug;

const MODEL_DIC_COLUMNS: &str =
    "model_id, model_name, model_digest, model_type, model_ver, create_dt, default_lang_id";

fn model_dic_from_row(row: &Row<'_>) -> rusqlite::Result<ModelDicRow> {
    Ok(ModelDicRow {
        model_id: row.get(0)?,
        name: row.get(1)?,
        digest: row.get(2)?,
        model_type: row.get(3)?,
        version: row.get(4)?,
        create_dt: row.get(5)?,
        default_lang_id: row.get(6)?,
    })
}

/// All model identity rows of a database, ordered by model id.
pub fn load_model_list(conn: &Connection) -> Result<Vec<ModelDicRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM model_dic ORDER BY model_id",
        MODEL_DIC_COLUMNS
    ))?;
    let rows = stmt.query_map([], model_dic_from_row)?;

    let mut models = Vec::new();
    for row in rows {
        models.push(row?);
    }
    Ok(models)
}

/// Identity row of the model with `digest`.
pub fn load_model_dic(conn: &Connection, digest: &str) -> Result<Option<ModelDicRow>> {
    let row = conn
        .query_row(
            &format!(
                "SELECT {} FROM model_dic WHERE model_digest = ?1",
                MODEL_DIC_COLUMNS
            ),
            params![digest],
            model_dic_from_row,
        )
        .optional()?;
    Ok(row)
}

/// Languages of the database, ordered by language id.
pub fn load_lang_list(conn: &Connection) -> Result<Vec<LangRow>> {
    let mut stmt =
        conn.prepare("SELECT lang_id, lang_code, lang_name FROM lang_lst ORDER BY lang_id")?;
    let rows = stmt.query_map([], |row| {
        Ok(LangRow {
            lang_id: row.get(0)?,
            code: row.get(1)?,
            name: row.get(2)?,
        })
    })?;

    let mut langs = Vec::new();
    for row in rows {
        langs.push(row?);
    }
    Ok(langs)
}

/// Load the full language-neutral metadata of the model with `digest`.
///
/// Returns `None` if the database has no such model.
pub fn load_model_meta(conn: &Connection, digest: &str) -> Result<Option<ModelMeta>> {
    let Some(model) = load_model_dic(conn, digest)? else {
        return Ok(None);
    };
    let model_id = model.model_id;

    let types = load_types(conn, model_id)?;
    let params = load_params(conn, model_id)?;
    let tables = load_tables(conn, model_id)?;

    debug!(
        "Loaded metadata of {} {}: {} types, {} parameters, {} tables",
        model.name,
        model.digest,
        types.len(),
        params.len(),
        tables.len()
    );

    Ok(Some(ModelMeta {
        model,
        types,
        params,
        tables,
    }))
}

fn load_types(conn: &Connection, model_id: i32) -> Result<Vec<TypeMeta>> {
    let mut stmt = conn.prepare(
        "SELECT type_id, type_name, dic_id, total_enum_id
         FROM type_dic WHERE model_id = ?1 ORDER BY type_id",
    )?;
    let rows = stmt.query_map(params![model_id], |row| {
        let name: String = row.get(1)?;
        let dic_id: i32 = row.get(2)?;
        Ok(TypeMeta {
            type_id: row.get(0)?,
            kind: ValueKind::from_dic(dic_id, &name),
            name,
            dic_id,
            total_enum_id: row.get(3)?,
            enums: Vec::new(),
        })
    })?;
    let mut types = Vec::new();
    for row in rows {
        types.push(row?);
    }

    let mut stmt = conn.prepare(
        "SELECT type_id, enum_id, enum_name
         FROM type_enum_lst WHERE model_id = ?1 ORDER BY type_id, enum_id",
    )?;
    let rows = stmt.query_map(params![model_id], |row| {
        Ok((
            row.get::<_, i32>(0)?,
            EnumRow {
                enum_id: row.get(1)?,
                name: row.get(2)?,
            },
        ))
    })?;
    for row in rows {
        let (type_id, item) = row?;
        if let Some(t) = types.iter_mut().find(|t| t.type_id == type_id) {
            t.enums.push(item);
        }
    }

    Ok(types)
}

fn load_params(conn: &Connection, model_id: i32) -> Result<Vec<ParamMeta>> {
    let mut stmt = conn.prepare(
        "SELECT parameter_id, parameter_hid, parameter_name, parameter_digest,
                parameter_rank, type_id, db_run_table, db_set_table
         FROM parameter_dic WHERE model_id = ?1 ORDER BY parameter_id",
    )?;
    let rows = stmt.query_map(params![model_id], |row| {
        Ok(ParamMeta {
            param_id: row.get(0)?,
            hid: row.get(1)?,
            name: row.get(2)?,
            digest: row.get(3)?,
            rank: row.get(4)?,
            type_id: row.get(5)?,
            db_run_table: row.get(6)?,
            db_set_table: row.get(7)?,
            dims: Vec::new(),
        })
    })?;
    let mut params_meta = Vec::new();
    for row in rows {
        params_meta.push(row?);
    }

    let mut stmt = conn.prepare(
        "SELECT parameter_id, dim_id, dim_name, type_id
         FROM parameter_dims WHERE model_id = ?1 ORDER BY parameter_id, dim_id",
    )?;
    let rows = stmt.query_map(params![model_id], |row| {
        Ok((
            row.get::<_, i32>(0)?,
            DimMeta {
                dim_id: row.get(1)?,
                name: row.get(2)?,
                type_id: row.get(3)?,
            },
        ))
    })?;
    for row in rows {
        let (param_id, dim) = row?;
        if let Some(p) = params_meta.iter_mut().find(|p| p.param_id == param_id) {
            p.dims.push(dim);
        }
    }

    Ok(params_meta)
}

fn load_tables(conn: &Connection, model_id: i32) -> Result<Vec<TableMeta>> {
    let mut stmt = conn.prepare(
        "SELECT table_id, table_hid, table_name, table_digest, table_rank, is_user,
                db_expr_table, db_acc_table
         FROM table_dic WHERE model_id = ?1 ORDER BY table_id",
    )?;
    let rows = stmt.query_map(params![model_id], |row| {
        Ok(TableMeta {
            table_id: row.get(0)?,
            hid: row.get(1)?,
            name: row.get(2)?,
            digest: row.get(3)?,
            rank: row.get(4)?,
            is_user: row.get::<_, i32>(5)? != 0,
            db_expr_table: row.get(6)?,
            db_acc_table: row.get(7)?,
            dims: Vec::new(),
            accs: Vec::new(),
            exprs: Vec::new(),
        })
    })?;
    let mut tables = Vec::new();
    for row in rows {
        tables.push(row?);
    }
    let position: HashMap<i32, usize> = tables
        .iter()
        .enumerate()
        .map(|(i, t)| (t.table_id, i))
        .collect();

    let mut stmt = conn.prepare(
        "SELECT table_id, dim_id, dim_name, type_id, is_total, dim_size
         FROM table_dims WHERE model_id = ?1 ORDER BY table_id, dim_id",
    )?;
    let rows = stmt.query_map(params![model_id], |row| {
        Ok((
            row.get::<_, i32>(0)?,
            TableDimMeta {
                dim_id: row.get(1)?,
                name: row.get(2)?,
                type_id: row.get(3)?,
                is_total: row.get::<_, i32>(4)? != 0,
                dim_size: row.get(5)?,
            },
        ))
    })?;
    for row in rows {
        let (table_id, dim) = row?;
        if let Some(&i) = position.get(&table_id) {
            tables[i].dims.push(dim);
        }
    }

    let mut stmt = conn.prepare(
        "SELECT table_id, acc_id, acc_name, is_derived, acc_src
         FROM table_acc WHERE model_id = ?1 ORDER BY table_id, acc_id",
    )?;
    let rows = stmt.query_map(params![model_id], |row| {
        Ok((
            row.get::<_, i32>(0)?,
            TableAccRow {
                acc_id: row.get(1)?,
                name: row.get(2)?,
                is_derived: row.get::<_, i32>(3)? != 0,
                src: row.get(4)?,
            },
        ))
    })?;
    for row in rows {
        let (table_id, acc) = row?;
        if let Some(&i) = position.get(&table_id) {
            tables[i].accs.push(acc);
        }
    }

    let mut stmt = conn.prepare(
        "SELECT table_id, expr_id, expr_name, expr_decimals, expr_src
         FROM table_expr WHERE model_id = ?1 ORDER BY table_id, expr_id",
    )?;
    let rows = stmt.query_map(params![model_id], |row| {
        Ok((
            row.get::<_, i32>(0)?,
            TableExprRow {
                expr_id: row.get(1)?,
                name: row.get(2)?,
                decimals: row.get(3)?,
                src: row.get(4)?,
            },
        ))
    })?;
    for row in rows {
        let (table_id, expr) = row?;
        if let Some(&i) = position.get(&table_id) {
            tables[i].exprs.push(expr);
        }
    }

    Ok(tables)
}

/// Load descriptions and notes of the model, its parameters and tables in
/// every language.
pub fn load_model_txt(conn: &Connection, model_id: i32) -> Result<ModelTxtMeta> {
    let mut stmt = conn.prepare(
        "SELECT L.lang_code, M.descr, M.note
         FROM model_dic_txt M
         INNER JOIN lang_lst L ON (L.lang_id = M.lang_id)
         WHERE M.model_id = ?1 ORDER BY M.lang_id",
    )?;
    let rows = stmt.query_map(params![model_id], |row| {
        Ok(DescrNote {
            lang_code: row.get(0)?,
            descr: row.get(1)?,
            note: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        })
    })?;
    let mut model_txt = Vec::new();
    for row in rows {
        model_txt.push(row?);
    }

    let param_txt = load_item_txt(conn, "parameter_dic_txt", "parameter_id", model_id)?;
    let table_txt = load_item_txt(conn, "table_dic_txt", "table_id", model_id)?;

    Ok(ModelTxtMeta {
        model_txt,
        param_txt,
        table_txt,
    })
}

fn load_item_txt(
    conn: &Connection,
    txt_table: &str,
    id_column: &str,
    model_id: i32,
) -> Result<Vec<ItemTxtRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT T.{id}, L.lang_code, T.descr, T.note
         FROM {tbl} T
         INNER JOIN lang_lst L ON (L.lang_id = T.lang_id)
         WHERE T.model_id = ?1 ORDER BY T.{id}, T.lang_id",
        id = id_column,
        tbl = txt_table
    ))?;
    let rows = stmt.query_map(params![model_id], |row| {
        Ok(ItemTxtRow {
            item_id: row.get(0)?,
            text: DescrNote {
                lang_code: row.get(1)?,
                descr: row.get(2)?,
                note: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
            },
        })
    })?;

    let mut items = Vec::new();
    for row in rows {
        items.push(row?);
    }
    Ok(items)
}
