//! Model database schema.
//!
//! The dictionary tables describe models, types, parameters and output
//! tables. Every parameter and output table owns its own value tables whose
//! names are recorded in the dictionary (`db_run_table`, `db_set_table`,
//! `db_expr_table`, `db_acc_table`). Dimension columns are named `dim0`,
//! `dim1`, ... in dimension order.

use crate::meta::{ParamMeta, TableMeta, ValueKind};
use crate::Result;
use rusqlite::Connection;

/// Create the dictionary, run and workset tables if they don't exist.
pub fn create_model_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS lang_lst (
            lang_id   INT          NOT NULL PRIMARY KEY,
            lang_code VARCHAR(32)  NOT NULL UNIQUE,
            lang_name VARCHAR(255) NOT NULL
        );

        CREATE TABLE IF NOT EXISTS model_dic (
            model_id        INT          NOT NULL PRIMARY KEY,
            model_name      VARCHAR(255) NOT NULL,
            model_digest    VARCHAR(32)  NOT NULL UNIQUE,
            model_type      INT          NOT NULL DEFAULT 0,
            model_ver       VARCHAR(32)  NOT NULL DEFAULT '1.0',
            create_dt       VARCHAR(32)  NOT NULL,
            default_lang_id INT          NOT NULL
        );

        CREATE TABLE IF NOT EXISTS model_dic_txt (
            model_id INT           NOT NULL,
            lang_id  INT           NOT NULL,
            descr    VARCHAR(255)  NOT NULL,
            note     VARCHAR(32000),
            PRIMARY KEY (model_id, lang_id)
        );

        CREATE TABLE IF NOT EXISTS type_dic (
            model_id      INT          NOT NULL,
            type_id       INT          NOT NULL,
            type_name     VARCHAR(255) NOT NULL,
            dic_id        INT          NOT NULL,
            total_enum_id INT          NOT NULL,
            PRIMARY KEY (model_id, type_id)
        );

        CREATE TABLE IF NOT EXISTS type_enum_lst (
            model_id  INT          NOT NULL,
            type_id   INT          NOT NULL,
            enum_id   INT          NOT NULL,
            enum_name VARCHAR(255) NOT NULL,
            PRIMARY KEY (model_id, type_id, enum_id)
        );

        CREATE TABLE IF NOT EXISTS parameter_dic (
            model_id         INT          NOT NULL,
            parameter_id     INT          NOT NULL,
            parameter_hid    INT          NOT NULL UNIQUE,
            parameter_name   VARCHAR(255) NOT NULL,
            parameter_digest VARCHAR(32)  NOT NULL,
            parameter_rank   INT          NOT NULL,
            type_id          INT          NOT NULL,
            db_run_table     VARCHAR(64)  NOT NULL,
            db_set_table     VARCHAR(64)  NOT NULL,
            PRIMARY KEY (model_id, parameter_id)
        );

        CREATE TABLE IF NOT EXISTS parameter_dic_txt (
            model_id     INT           NOT NULL,
            parameter_id INT           NOT NULL,
            lang_id      INT           NOT NULL,
            descr        VARCHAR(255)  NOT NULL,
            note         VARCHAR(32000),
            PRIMARY KEY (model_id, parameter_id, lang_id)
        );

        CREATE TABLE IF NOT EXISTS parameter_dims (
            model_id     INT          NOT NULL,
            parameter_id INT          NOT NULL,
            dim_id       INT          NOT NULL,
            dim_name     VARCHAR(255) NOT NULL,
            type_id      INT          NOT NULL,
            PRIMARY KEY (model_id, parameter_id, dim_id)
        );

        CREATE TABLE IF NOT EXISTS table_dic (
            model_id      INT          NOT NULL,
            table_id      INT          NOT NULL,
            table_hid     INT          NOT NULL UNIQUE,
            table_name    VARCHAR(255) NOT NULL,
            table_digest  VARCHAR(32)  NOT NULL,
            table_rank    INT          NOT NULL,
            is_user       SMALLINT     NOT NULL DEFAULT 0,
            db_expr_table VARCHAR(64)  NOT NULL,
            db_acc_table  VARCHAR(64)  NOT NULL,
            PRIMARY KEY (model_id, table_id)
        );

        CREATE TABLE IF NOT EXISTS table_dic_txt (
            model_id INT           NOT NULL,
            table_id INT           NOT NULL,
            lang_id  INT           NOT NULL,
            descr    VARCHAR(255)  NOT NULL,
            note     VARCHAR(32000),
            PRIMARY KEY (model_id, table_id, lang_id)
        );

        CREATE TABLE IF NOT EXISTS table_dims (
            model_id INT          NOT NULL,
            table_id INT          NOT NULL,
            dim_id   INT          NOT NULL,
            dim_name VARCHAR(255) NOT NULL,
            type_id  INT          NOT NULL,
            is_total SMALLINT     NOT NULL DEFAULT 0,
            dim_size INT          NOT NULL,
            PRIMARY KEY (model_id, table_id, dim_id)
        );

        CREATE TABLE IF NOT EXISTS table_acc (
            model_id   INT           NOT NULL,
            table_id   INT           NOT NULL,
            acc_id     INT           NOT NULL,
            acc_name   VARCHAR(255)  NOT NULL,
            is_derived SMALLINT      NOT NULL DEFAULT 0,
            acc_src    VARCHAR(4000) NOT NULL DEFAULT '',
            PRIMARY KEY (model_id, table_id, acc_id)
        );

        CREATE TABLE IF NOT EXISTS table_expr (
            model_id      INT           NOT NULL,
            table_id      INT           NOT NULL,
            expr_id       INT           NOT NULL,
            expr_name     VARCHAR(255)  NOT NULL,
            expr_decimals INT           NOT NULL DEFAULT -1,
            expr_src      VARCHAR(4000) NOT NULL DEFAULT '',
            PRIMARY KEY (model_id, table_id, expr_id)
        );

        CREATE TABLE IF NOT EXISTS run_lst (
            run_id        INT          NOT NULL PRIMARY KEY,
            model_id      INT          NOT NULL,
            run_name      VARCHAR(255) NOT NULL,
            sub_count     INT          NOT NULL,
            sub_started   INT          NOT NULL,
            sub_completed INT          NOT NULL,
            create_dt     VARCHAR(32)  NOT NULL,
            status        VARCHAR(1)   NOT NULL,
            update_dt     VARCHAR(32)  NOT NULL,
            run_digest    VARCHAR(32),
            run_stamp     VARCHAR(32)  NOT NULL
        );

        CREATE TABLE IF NOT EXISTS run_parameter (
            run_id        INT NOT NULL,
            parameter_hid INT NOT NULL,
            sub_count     INT NOT NULL,
            PRIMARY KEY (run_id, parameter_hid)
        );

        CREATE TABLE IF NOT EXISTS workset_lst (
            set_id      INT          NOT NULL PRIMARY KEY,
            base_run_id INT,
            model_id    INT          NOT NULL,
            set_name    VARCHAR(255) NOT NULL,
            is_readonly SMALLINT     NOT NULL DEFAULT 0,
            update_dt   VARCHAR(32)  NOT NULL,
            UNIQUE (model_id, set_name)
        );

        CREATE TABLE IF NOT EXISTS workset_txt (
            set_id  INT           NOT NULL,
            lang_id INT           NOT NULL,
            descr   VARCHAR(255)  NOT NULL,
            note    VARCHAR(32000),
            PRIMARY KEY (set_id, lang_id)
        );

        CREATE TABLE IF NOT EXISTS workset_parameter (
            set_id         INT NOT NULL,
            parameter_hid  INT NOT NULL,
            sub_count      INT NOT NULL,
            default_sub_id INT NOT NULL DEFAULT 0,
            PRIMARY KEY (set_id, parameter_hid)
        );

        CREATE TABLE IF NOT EXISTS workset_parameter_txt (
            set_id        INT            NOT NULL,
            parameter_hid INT            NOT NULL,
            lang_id       INT            NOT NULL,
            note          VARCHAR(32000),
            PRIMARY KEY (set_id, parameter_hid, lang_id)
        );",
    )?;
    Ok(())
}

/// Quote an SQL identifier.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Column name of the dimension at `index`.
pub fn dim_column(index: usize) -> String {
    format!("dim{}", index)
}

fn dim_columns_ddl(rank: usize) -> String {
    (0..rank)
        .map(|i| format!("{} INT NOT NULL, ", dim_column(i)))
        .collect()
}

fn dim_key(rank: usize) -> String {
    (0..rank).map(|i| format!(", {}", dim_column(i))).collect()
}

/// Create the run and workset value tables of a parameter.
pub fn create_param_tables(conn: &Connection, param: &ParamMeta, kind: ValueKind) -> Result<()> {
    let rank = param.dims.len();
    let value_null = if kind == ValueKind::Float { "" } else { " NOT NULL" };

    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {run} (
            run_id INT NOT NULL, sub_id INT NOT NULL, {dims}param_value {vt}{vn},
            PRIMARY KEY (run_id, sub_id{key})
        );
        CREATE TABLE IF NOT EXISTS {set} (
            set_id INT NOT NULL, sub_id INT NOT NULL, {dims}param_value {vt}{vn},
            PRIMARY KEY (set_id, sub_id{key})
        );",
        run = quote_ident(&param.db_run_table),
        set = quote_ident(&param.db_set_table),
        dims = dim_columns_ddl(rank),
        vt = kind.sql_type(),
        vn = value_null,
        key = dim_key(rank),
    ))?;
    Ok(())
}

/// Create the expression and accumulator value tables of an output table.
pub fn create_table_tables(conn: &Connection, table: &TableMeta) -> Result<()> {
    let rank = table.dims.len();

    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {expr} (
            run_id INT NOT NULL, expr_id INT NOT NULL, {dims}expr_value FLOAT,
            PRIMARY KEY (run_id, expr_id{key})
        );
        CREATE TABLE IF NOT EXISTS {acc} (
            run_id INT NOT NULL, acc_id INT NOT NULL, sub_id INT NOT NULL, {dims}acc_value FLOAT,
            PRIMARY KEY (run_id, acc_id, sub_id{key})
        );",
        expr = quote_ident(&table.db_expr_table),
        acc = quote_ident(&table.db_acc_table),
        dims = dim_columns_ddl(rank),
        key = dim_key(rank),
    ))?;
    Ok(())
}
