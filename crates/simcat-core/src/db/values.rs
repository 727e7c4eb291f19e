//! Parameter and output table value store.
//!
//! Reads return a page of cells ordered by the requested columns and then by
//! the natural key of the value table, with `LIMIT` / `OFFSET` applied after
//! ordering. One extra row is fetched to tell whether the page is the last.

use super::schema::{dim_column, quote_ident};
use crate::layout::{
    AccCell, AllAccCell, CellValue, ExprCell, FilterColumn, FilterOp, ParamCell, ReadLayout,
    ReadPage, ReadParamLayout, ReadTableLayout, TableCell, TableValueKind, ValueMode,
};
use crate::meta::{ModelMeta, ParamMeta, TableMeta, TypeMeta, ValueKind};
use crate::{Result, SimcatError};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Row};
use tracing::debug;

// ============================================================================
// Key columns, filters and ordering
// ============================================================================

/// A key column a layout may filter or order by.
enum KeyColumn<'a> {
    SubId,
    ExprId(&'a TableMeta),
    AccId(&'a TableMeta),
    Dim { index: usize, typ: &'a TypeMeta },
}

impl KeyColumn<'_> {
    fn sql_name(&self) -> String {
        match self {
            KeyColumn::SubId => "sub_id".to_string(),
            KeyColumn::ExprId(_) => "expr_id".to_string(),
            KeyColumn::AccId(_) => "acc_id".to_string(),
            KeyColumn::Dim { index, .. } => dim_column(*index),
        }
    }

    /// Convert a filter value to the stored integer id.
    fn value_id(&self, value: &str, mode: ValueMode) -> Option<i64> {
        let parsed = || value.trim().parse::<i64>().ok();
        match (self, mode) {
            (KeyColumn::SubId, _) | (_, ValueMode::Id) => parsed(),
            (KeyColumn::ExprId(t), ValueMode::Code) => t.expr_id(value).map(i64::from),
            (KeyColumn::AccId(t), ValueMode::Code) => t.acc_id(value).map(i64::from),
            (KeyColumn::Dim { typ, .. }, ValueMode::Code) => typ.enum_id(value).map(i64::from),
        }
    }
}

/// Named key columns of one value table.
struct KeyColumns<'a> {
    columns: Vec<(String, KeyColumn<'a>)>,
}

impl<'a> KeyColumns<'a> {
    fn find(&self, name: &str) -> Result<&KeyColumn<'a>> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, c)| c)
            .ok_or_else(|| SimcatError::validation(name, "unknown column"))
    }

    /// `AND ...` clauses for the layout filters, binding values into `args`.
    fn where_clause(&self, layout: &ReadLayout, args: &mut Vec<Value>) -> Result<String> {
        let mut sql = String::new();
        for filter in &layout.filters {
            let column = self.find(&filter.name)?;
            let ids = filter_ids(column, filter, layout.value_mode)?;
            let name = column.sql_name();

            match filter.op {
                FilterOp::In => {
                    let marks = vec!["?"; ids.len()].join(", ");
                    sql.push_str(&format!(" AND {} IN ({})", name, marks));
                }
                FilterOp::Between => {
                    sql.push_str(&format!(" AND {} BETWEEN ? AND ?", name));
                }
                op => {
                    sql.push_str(&format!(" AND {} {} ?", name, op.sql()));
                }
            }
            args.extend(ids.into_iter().map(Value::Integer));
        }
        Ok(sql)
    }

    /// `ORDER BY` list: requested columns, then the natural key.
    fn order_clause(&self, layout: &ReadLayout) -> Result<String> {
        let mut terms = Vec::new();
        for order in &layout.order_by {
            let column = self.find(&order.column)?;
            terms.push(format!(
                "{}{}",
                column.sql_name(),
                if order.desc { " DESC" } else { "" }
            ));
        }
        terms.extend(self.columns.iter().map(|(_, c)| c.sql_name()));
        Ok(terms.join(", "))
    }
}

fn filter_ids(column: &KeyColumn<'_>, filter: &FilterColumn, mode: ValueMode) -> Result<Vec<i64>> {
    let expected = match filter.op {
        FilterOp::In => None,
        FilterOp::Between => Some(2),
        _ => Some(1),
    };
    if filter.values.is_empty() || expected.is_some_and(|n| n != filter.values.len()) {
        return Err(SimcatError::validation(
            &filter.name,
            format!("invalid number of filter values for {}", filter.op.sql()),
        ));
    }

    filter
        .values
        .iter()
        .map(|v| {
            column.value_id(v, mode).ok_or_else(|| {
                SimcatError::validation(&filter.name, format!("invalid filter value: {}", v))
            })
        })
        .collect()
}

fn param_key_columns<'a>(meta: &'a ModelMeta, param: &'a ParamMeta) -> Result<KeyColumns<'a>> {
    let mut columns = vec![("sub_id".to_string(), KeyColumn::SubId)];
    for (index, (dim, typ)) in param.dims.iter().zip(meta.param_dim_types(param)?).enumerate() {
        columns.push((dim.name.clone(), KeyColumn::Dim { index, typ }));
    }
    Ok(KeyColumns { columns })
}

fn table_key_columns<'a>(
    meta: &'a ModelMeta,
    table: &'a TableMeta,
    kind: TableValueKind,
) -> Result<KeyColumns<'a>> {
    let mut columns = match kind {
        TableValueKind::Expr => vec![("expr_id".to_string(), KeyColumn::ExprId(table))],
        TableValueKind::Acc => vec![
            ("acc_id".to_string(), KeyColumn::AccId(table)),
            ("sub_id".to_string(), KeyColumn::SubId),
        ],
        TableValueKind::AllAcc => vec![("sub_id".to_string(), KeyColumn::SubId)],
    };
    for (index, (dim, typ)) in table.dims.iter().zip(meta.table_dim_types(table)?).enumerate() {
        columns.push((dim.name.clone(), KeyColumn::Dim { index, typ }));
    }
    Ok(KeyColumns { columns })
}

/// `LIMIT ? OFFSET ?` for the layout; one extra row detects the last page.
fn limit_clause(layout: &ReadLayout, args: &mut Vec<Value>) -> &'static str {
    // no room for the extra row at i64::MAX, read to the end
    let limit = match layout.size {
        n if n > 0 => n.checked_add(1).unwrap_or(-1),
        _ => -1,
    };
    args.push(Value::Integer(limit));
    args.push(Value::Integer(layout.offset.max(0)));
    " LIMIT ? OFFSET ?"
}

fn page_of<T>(mut cells: Vec<T>, layout: &ReadLayout) -> ReadPage<T> {
    let mut is_last_page = true;
    if layout.size > 0 && cells.len() as i64 > layout.size {
        cells.truncate(layout.size as usize);
        is_last_page = false;
    }
    ReadPage {
        cells,
        offset: layout.offset.max(0),
        size: layout.size.max(0),
        is_last_page,
    }
}

fn dim_ids(row: &Row<'_>, first: usize, rank: usize) -> rusqlite::Result<Vec<i32>> {
    (first..first + rank).map(|i| row.get(i)).collect()
}

fn select_dims(rank: usize) -> String {
    (0..rank).map(|i| format!(", {}", dim_column(i))).collect()
}

// ============================================================================
// Reads
// ============================================================================

fn decode_value(value: Value, kind: ValueKind) -> CellValue {
    match (value, kind) {
        (Value::Null, _) | (Value::Blob(_), _) => CellValue::Null,
        (Value::Integer(v), ValueKind::Bool) => CellValue::Bool(v != 0),
        (Value::Integer(v), ValueKind::Float) => CellValue::Float(v as f64),
        (Value::Integer(v), _) => CellValue::Int(v),
        (Value::Real(v), _) => CellValue::Float(v),
        (Value::Text(v), _) => CellValue::Text(v),
    }
}

/// Read a page of parameter values of a run or a workset.
///
/// `layout.layout.from_id` is the run id, or the set id if `is_from_set`.
pub fn read_param_page(
    conn: &Connection,
    meta: &ModelMeta,
    param: &ParamMeta,
    layout: &ReadParamLayout,
) -> Result<ReadPage<ParamCell>> {
    let keys = param_key_columns(meta, param)?;
    let kind = meta.param_type(param)?.kind;
    let rank = param.dims.len();
    let base = &layout.layout;

    let (table, source_column) = if layout.is_from_set {
        (&param.db_set_table, "set_id")
    } else {
        (&param.db_run_table, "run_id")
    };

    let mut args = vec![Value::Integer(base.from_id.into())];
    let filters = keys.where_clause(base, &mut args)?;
    let order = keys.order_clause(base)?;
    let limit = limit_clause(base, &mut args);

    let sql = format!(
        "SELECT sub_id{dims}, param_value FROM {tbl} WHERE {src} = ?{filters} ORDER BY {order}{limit}",
        dims = select_dims(rank),
        tbl = quote_ident(table),
        src = source_column,
    );
    debug!("Parameter page query: {}", sql);

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(args), |row| {
        Ok(ParamCell {
            sub_id: row.get(0)?,
            dim_ids: dim_ids(row, 1, rank)?,
            value: decode_value(row.get(1 + rank)?, kind),
        })
    })?;

    let mut cells = Vec::new();
    for row in rows {
        cells.push(row?);
    }
    Ok(page_of(cells, base))
}

/// Read a page of output table values of a run.
pub fn read_table_page(
    conn: &Connection,
    meta: &ModelMeta,
    table: &TableMeta,
    layout: &ReadTableLayout,
) -> Result<ReadPage<TableCell>> {
    let keys = table_key_columns(meta, table, layout.value_kind)?;
    let rank = table.dims.len();
    let base = &layout.layout;

    let mut args = vec![Value::Integer(base.from_id.into())];
    let filters = keys.where_clause(base, &mut args)?;
    let order = keys.order_clause(base)?;
    let limit = limit_clause(base, &mut args);
    let dims = select_dims(rank);

    let sql = match layout.value_kind {
        TableValueKind::Expr => format!(
            "SELECT expr_id{dims}, expr_value FROM {tbl} WHERE run_id = ?{filters} ORDER BY {order}{limit}",
            tbl = quote_ident(&table.db_expr_table),
        ),
        TableValueKind::Acc => format!(
            "SELECT acc_id, sub_id{dims}, acc_value FROM {tbl} WHERE run_id = ?{filters} ORDER BY {order}{limit}",
            tbl = quote_ident(&table.db_acc_table),
        ),
        TableValueKind::AllAcc => {
            let pivot: String = table
                .accs
                .iter()
                .map(|a| format!(", MAX(CASE WHEN acc_id = {} THEN acc_value END)", a.acc_id))
                .collect();
            format!(
                "SELECT sub_id{dims}{pivot} FROM {tbl} WHERE run_id = ?{filters}
                 GROUP BY sub_id{dims} ORDER BY {order}{limit}",
                tbl = quote_ident(&table.db_acc_table),
            )
        }
    };
    debug!("Output table page query: {}", sql);

    let acc_count = table.accs.len();
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(args), |row| {
        let cell = match layout.value_kind {
            TableValueKind::Expr => TableCell::Expr(ExprCell {
                expr_id: row.get(0)?,
                dim_ids: dim_ids(row, 1, rank)?,
                value: row.get(1 + rank)?,
            }),
            TableValueKind::Acc => TableCell::Acc(AccCell {
                acc_id: row.get(0)?,
                sub_id: row.get(1)?,
                dim_ids: dim_ids(row, 2, rank)?,
                value: row.get(2 + rank)?,
            }),
            TableValueKind::AllAcc => TableCell::AllAcc(AllAccCell {
                sub_id: row.get(0)?,
                dim_ids: dim_ids(row, 1, rank)?,
                values: (0..acc_count)
                    .map(|i| row.get(1 + rank + i))
                    .collect::<rusqlite::Result<_>>()?,
            }),
        };
        Ok(cell)
    })?;

    let mut cells = Vec::new();
    for row in rows {
        cells.push(row?);
    }
    Ok(page_of(cells, base))
}

// ============================================================================
// Writes
// ============================================================================

/// Validate a value against the parameter type and convert it for storage.
fn encode_value(value: &CellValue, typ: &TypeMeta, param: &ParamMeta) -> Result<Value> {
    let invalid = || {
        SimcatError::validation(
            &param.name,
            format!("invalid {} value: {:?}", typ.name, value),
        )
    };

    let encoded = match (typ.kind, value) {
        (ValueKind::Float, CellValue::Null) => Value::Null,
        (ValueKind::Float, CellValue::Float(v)) => Value::Real(*v),
        (ValueKind::Float, CellValue::Int(v)) => Value::Real(*v as f64),
        (ValueKind::Int, CellValue::Int(v)) => Value::Integer(*v),
        (ValueKind::Int, CellValue::Float(v)) if v.fract() == 0.0 => Value::Integer(*v as i64),
        (ValueKind::Bool, CellValue::Bool(v)) => Value::Integer(*v as i64),
        (ValueKind::Bool, CellValue::Int(v)) if *v == 0 || *v == 1 => Value::Integer(*v),
        (ValueKind::Text, CellValue::Text(v)) => Value::Text(v.clone()),
        (ValueKind::Enum, CellValue::Int(v)) => {
            let id = i32::try_from(*v).map_err(|_| invalid())?;
            if !typ.has_enum_id(id) {
                return Err(invalid());
            }
            Value::Integer(*v)
        }
        _ => return Err(invalid()),
    };
    Ok(encoded)
}

/// Check every cell before anything is written.
fn validate_cells(
    meta: &ModelMeta,
    param: &ParamMeta,
    sub_count: i32,
    cells: &[ParamCell],
) -> Result<Vec<Value>> {
    let dim_types = meta.param_dim_types(param)?;
    let value_type = meta.param_type(param)?;

    let mut values = Vec::with_capacity(cells.len());
    for cell in cells {
        if cell.dim_ids.len() != dim_types.len() {
            return Err(SimcatError::validation(
                &param.name,
                format!(
                    "expected {} dimension items, found {}",
                    dim_types.len(),
                    cell.dim_ids.len()
                ),
            ));
        }
        if cell.sub_id < 0 || cell.sub_id >= sub_count {
            return Err(SimcatError::validation(
                &param.name,
                format!("sub-value id {} out of range [0, {})", cell.sub_id, sub_count),
            ));
        }
        for (id, typ) in cell.dim_ids.iter().zip(&dim_types) {
            if !typ.has_enum_id(*id) {
                return Err(SimcatError::validation(
                    &param.name,
                    format!("invalid {} item id: {}", typ.name, id),
                ));
            }
        }
        values.push(encode_value(&cell.value, value_type, param)?);
    }
    Ok(values)
}

/// Write cells into a workset, each replacing the row with the same key.
///
/// Returns the number of cells written.
pub fn write_param_cells(
    conn: &Connection,
    meta: &ModelMeta,
    param: &ParamMeta,
    set_id: i32,
    sub_count: i32,
    cells: &[ParamCell],
) -> Result<usize> {
    let values = validate_cells(meta, param, sub_count, cells)?;
    let rank = param.dims.len();
    let table = quote_ident(&param.db_set_table);

    let key_where: String = (0..rank)
        .map(|i| format!(" AND {} = ?", dim_column(i)))
        .collect();
    let mut delete = conn.prepare(&format!(
        "DELETE FROM {} WHERE set_id = ? AND sub_id = ?{}",
        table, key_where
    ))?;
    let mut insert = conn.prepare(&format!(
        "INSERT INTO {} (set_id, sub_id{}, param_value) VALUES (?, ?{}, ?)",
        table,
        select_dims(rank),
        ", ?".repeat(rank)
    ))?;

    for (cell, value) in cells.iter().zip(values) {
        let mut key = vec![Value::Integer(set_id.into()), Value::Integer(cell.sub_id.into())];
        key.extend(cell.dim_ids.iter().map(|&d| Value::Integer(d.into())));
        delete.execute(params_from_iter(key.iter()))?;

        key.push(value);
        insert.execute(params_from_iter(key))?;
    }
    Ok(cells.len())
}

/// Replace all values of a workset parameter.
pub fn replace_param_values(
    conn: &Connection,
    meta: &ModelMeta,
    param: &ParamMeta,
    set_id: i32,
    sub_count: i32,
    cells: &[ParamCell],
) -> Result<usize> {
    validate_cells(meta, param, sub_count, cells)?;
    delete_param_values(conn, param, set_id)?;
    write_param_cells(conn, meta, param, set_id, sub_count, cells)
}

pub fn delete_param_values(conn: &Connection, param: &ParamMeta, set_id: i32) -> Result<usize> {
    let n = conn.execute(
        &format!("DELETE FROM {} WHERE set_id = ?1", quote_ident(&param.db_set_table)),
        params![set_id],
    )?;
    Ok(n)
}

fn value_columns(param: &ParamMeta) -> String {
    format!("sub_id{}, param_value", select_dims(param.dims.len()))
}

/// Copy all values of a parameter from a run into a workset.
pub fn copy_param_values_from_run(
    conn: &Connection,
    param: &ParamMeta,
    run_id: i32,
    set_id: i32,
) -> Result<usize> {
    let cols = value_columns(param);
    let n = conn.execute(
        &format!(
            "INSERT INTO {dst} (set_id, {cols}) SELECT ?1, {cols} FROM {src} WHERE run_id = ?2",
            dst = quote_ident(&param.db_set_table),
            src = quote_ident(&param.db_run_table),
        ),
        params![set_id, run_id],
    )?;
    Ok(n)
}

/// Copy all values of a parameter from one workset into another.
pub fn copy_param_values_from_set(
    conn: &Connection,
    param: &ParamMeta,
    src_set_id: i32,
    dst_set_id: i32,
) -> Result<usize> {
    let cols = value_columns(param);
    let table = quote_ident(&param.db_set_table);
    let n = conn.execute(
        &format!(
            "INSERT INTO {tbl} (set_id, {cols}) SELECT ?1, {cols} FROM {tbl} WHERE set_id = ?2",
            tbl = table,
        ),
        params![dst_set_id, src_set_id],
    )?;
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::OrderBy;
    use crate::meta::{DimMeta, EnumRow, ModelDicRow};

    fn test_meta() -> ModelMeta {
        ModelMeta {
            model: ModelDicRow {
                model_id: 1,
                name: "m".into(),
                digest: "d".into(),
                model_type: 0,
                version: "1.0".into(),
                create_dt: String::new(),
                default_lang_id: 0,
            },
            types: vec![
                TypeMeta {
                    type_id: 7,
                    name: "double".into(),
                    dic_id: 0,
                    total_enum_id: 0,
                    kind: ValueKind::Float,
                    enums: vec![],
                },
                TypeMeta {
                    type_id: 101,
                    name: "SEX".into(),
                    dic_id: 2,
                    total_enum_id: 2,
                    kind: ValueKind::Enum,
                    enums: vec![
                        EnumRow {
                            enum_id: 0,
                            name: "M".into(),
                        },
                        EnumRow {
                            enum_id: 1,
                            name: "F".into(),
                        },
                    ],
                },
            ],
            params: vec![ParamMeta {
                param_id: 0,
                hid: 1,
                name: "rate".into(),
                digest: "p".into(),
                rank: 1,
                type_id: 7,
                db_run_table: "rate_p".into(),
                db_set_table: "rate_w".into(),
                dims: vec![DimMeta {
                    dim_id: 0,
                    name: "sex".into(),
                    type_id: 101,
                }],
            }],
            tables: vec![],
        }
    }

    fn test_db(meta: &ModelMeta) -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        super::super::schema::create_param_tables(&conn, &meta.params[0], ValueKind::Float)
            .unwrap();
        conn
    }

    fn cell(sub_id: i32, sex: i32, value: f64) -> ParamCell {
        ParamCell {
            sub_id,
            dim_ids: vec![sex],
            value: CellValue::Float(value),
        }
    }

    #[test]
    fn test_write_then_read_ordered() {
        let meta = test_meta();
        let conn = test_db(&meta);
        let param = &meta.params[0];

        let cells = [cell(1, 1, 4.0), cell(0, 1, 2.0), cell(0, 0, 1.0)];
        write_param_cells(&conn, &meta, param, 5, 2, &cells).unwrap();
        // overwrite by key
        write_param_cells(&conn, &meta, param, 5, 2, &[cell(0, 0, 1.5)]).unwrap();

        let mut layout = ReadParamLayout {
            layout: ReadLayout::new("rate"),
            is_from_set: true,
        };
        layout.layout.from_id = 5;
        let page = read_param_page(&conn, &meta, param, &layout).unwrap();

        assert!(page.is_last_page);
        assert_eq!(page.cells, vec![cell(0, 0, 1.5), cell(0, 1, 2.0), cell(1, 1, 4.0)]);

        layout.layout.order_by.push(OrderBy {
            column: "sex".into(),
            desc: true,
        });
        layout.layout.size = 2;
        let page = read_param_page(&conn, &meta, param, &layout).unwrap();
        assert!(!page.is_last_page);
        assert_eq!(page.cells, vec![cell(0, 1, 2.0), cell(1, 1, 4.0)]);
    }

    #[test]
    fn test_limit_clause_bounds() {
        let mut args = Vec::new();
        limit_clause(&ReadLayout::new("rate").with_page(-3, 10), &mut args);
        assert_eq!(args, vec![Value::Integer(11), Value::Integer(0)]);

        args.clear();
        limit_clause(&ReadLayout::new("rate").with_page(4, i64::MAX), &mut args);
        assert_eq!(args, vec![Value::Integer(-1), Value::Integer(4)]);

        args.clear();
        limit_clause(&ReadLayout::new("rate").with_page(0, 0), &mut args);
        assert_eq!(args, vec![Value::Integer(-1), Value::Integer(0)]);
    }

    #[test]
    fn test_filter_by_code() {
        let meta = test_meta();
        let conn = test_db(&meta);
        let param = &meta.params[0];
        let cells = [cell(0, 0, 1.0), cell(0, 1, 2.0)];
        write_param_cells(&conn, &meta, param, 5, 1, &cells).unwrap();

        let mut layout = ReadParamLayout {
            layout: ReadLayout::new("rate").with_filter(FilterColumn {
                name: "sex".into(),
                op: FilterOp::Eq,
                values: vec!["F".into()],
            }),
            is_from_set: true,
        };
        layout.layout.from_id = 5;
        let page = read_param_page(&conn, &meta, param, &layout).unwrap();
        assert_eq!(page.cells, vec![cell(0, 1, 2.0)]);

        layout.layout.filters[0].values = vec!["X".into()];
        assert!(matches!(
            read_param_page(&conn, &meta, param, &layout),
            Err(SimcatError::Validation { .. })
        ));
    }

    #[test]
    fn test_write_rejects_invalid_cells() {
        let meta = test_meta();
        let conn = test_db(&meta);
        let param = &meta.params[0];

        // sub id out of range, unknown enum id, wrong rank
        let wrong_rank = ParamCell {
            sub_id: 0,
            dim_ids: vec![],
            value: CellValue::Null,
        };
        for bad in [cell(2, 0, 1.0), cell(0, 9, 1.0), wrong_rank] {
            let cells = [cell(0, 0, 1.0), bad];
            assert!(write_param_cells(&conn, &meta, param, 5, 2, &cells).is_err());
        }
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM rate_w", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
