//! Shared fixture: a small `modelOne` database in a temporary directory.
//!
//! Contents:
//! - types `age` (enum ids 10, 20, 30, 40, total 50) and `sex` (0 M, 1 F)
//! - parameters `ageSex` (age x sex, double), `yearRate` (37 years, double)
//!   and `startSeed` (scalar int)
//! - output table `salarySex` over `sex` with a total item, two expressions
//!   and two accumulators
//! - completed run `myRun` and run `pendingRun` still in progress
//! - read-only workset `Default` with every parameter and read-write
//!   workset `mySet` with `startSeed` only

#![allow(dead_code)]

use rusqlite::{params, Connection};
use simcat_core::db::schema::{create_model_schema, create_param_tables, create_table_tables};
use simcat_core::meta::loader::load_model_meta;
use simcat_core::{Catalog, ReadLayout, ReadParamLayout};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const MODEL_NAME: &str = "modelOne";
pub const MODEL_DIGEST: &str = "_201208171604590148_";

pub const RUN_NAME: &str = "myRun";
pub const RUN_DIGEST: &str = "6fbad822cb9ae42deea1ede626890711";
pub const RUN_STAMP: &str = "2024_01_02_03_04_05_678";
pub const RUN_ID: i32 = 11;

pub const PENDING_RUN_NAME: &str = "pendingRun";
pub const PENDING_RUN_DIGEST: &str = "a3b1c9e0f4d24c07b0e5a56b2d9f8c11";
pub const PENDING_RUN_STAMP: &str = "2024_01_03_10_00_00_000";

pub const READONLY_SET: &str = "Default";
pub const WRITABLE_SET: &str = "mySet";

pub const AGE_IDS: [i32; 4] = [10, 20, 30, 40];
pub const YEAR_COUNT: i32 = 37;

/// A model database in its own temporary directory.
pub struct TestModel {
    pub dir: TempDir,
    pub db_path: PathBuf,
}

impl TestModel {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = create_model_one(dir.path(), "modelOne.sqlite", MODEL_NAME, MODEL_DIGEST);
        Self { dir, db_path }
    }

    /// Catalog with every model of the fixture directory open.
    pub fn catalog(&self) -> Catalog {
        let catalog = Catalog::new();
        catalog.refresh(self.dir.path()).unwrap();
        catalog
    }

    /// Direct connection to the fixture database, for checks behind the API.
    pub fn connection(&self) -> Connection {
        Connection::open(&self.db_path).unwrap()
    }
}

pub fn age_sex_value(age: i32, sex: i32) -> f64 {
    f64::from(age) + f64::from(sex) * 0.5
}

pub fn year_rate_value(year: i32) -> f64 {
    f64::from(year) + 0.25
}

pub fn param_layout(name: &str, offset: i64, size: i64, is_from_set: bool) -> ReadParamLayout {
    ReadParamLayout {
        layout: ReadLayout::new(name).with_page(offset, size),
        is_from_set,
    }
}

/// Number of value rows of a workset parameter, read behind the API.
pub fn set_value_count(conn: &Connection, table: &str, set_name: &str) -> i64 {
    conn.query_row(
        &format!(
            "SELECT COUNT(*) FROM {} WHERE set_id = (SELECT set_id FROM workset_lst WHERE set_name = ?1)",
            table
        ),
        params![set_name],
        |row| row.get(0),
    )
    .unwrap()
}

/// Create a `modelOne`-shaped database named `file_name` in `dir`.
pub fn create_model_one(dir: &Path, file_name: &str, name: &str, digest: &str) -> PathBuf {
    let path = dir.join(file_name);
    let conn = Connection::open(&path).unwrap();
    create_model_schema(&conn).unwrap();

    conn.execute_batch(
        "INSERT INTO lang_lst (lang_id, lang_code, lang_name) VALUES (0, 'EN', 'English');
         INSERT INTO lang_lst (lang_id, lang_code, lang_name) VALUES (1, 'FR', 'Français');

         INSERT INTO type_dic (model_id, type_id, type_name, dic_id, total_enum_id) VALUES (1, 4, 'int', 0, 0);
         INSERT INTO type_dic (model_id, type_id, type_name, dic_id, total_enum_id) VALUES (1, 7, 'double', 0, 0);
         INSERT INTO type_dic (model_id, type_id, type_name, dic_id, total_enum_id) VALUES (1, 101, 'age', 2, 50);
         INSERT INTO type_dic (model_id, type_id, type_name, dic_id, total_enum_id) VALUES (1, 102, 'sex', 2, 2);

         INSERT INTO type_enum_lst (model_id, type_id, enum_id, enum_name) VALUES (1, 101, 10, '10-20');
         INSERT INTO type_enum_lst (model_id, type_id, enum_id, enum_name) VALUES (1, 101, 20, '20-30');
         INSERT INTO type_enum_lst (model_id, type_id, enum_id, enum_name) VALUES (1, 101, 30, '30-40');
         INSERT INTO type_enum_lst (model_id, type_id, enum_id, enum_name) VALUES (1, 101, 40, '40+');
         INSERT INTO type_enum_lst (model_id, type_id, enum_id, enum_name) VALUES (1, 102, 0, 'M');
         INSERT INTO type_enum_lst (model_id, type_id, enum_id, enum_name) VALUES (1, 102, 1, 'F');

         INSERT INTO parameter_dic
           (model_id, parameter_id, parameter_hid, parameter_name, parameter_digest, parameter_rank, type_id, db_run_table, db_set_table)
           VALUES (1, 0, 44, 'ageSex', 'p_ageSex', 2, 7, 'ageSex_p44', 'ageSex_w44');
         INSERT INTO parameter_dic
           (model_id, parameter_id, parameter_hid, parameter_name, parameter_digest, parameter_rank, type_id, db_run_table, db_set_table)
           VALUES (1, 1, 45, 'yearRate', 'p_yearRate', 1, 7, 'yearRate_p45', 'yearRate_w45');
         INSERT INTO parameter_dic
           (model_id, parameter_id, parameter_hid, parameter_name, parameter_digest, parameter_rank, type_id, db_run_table, db_set_table)
           VALUES (1, 2, 46, 'startSeed', 'p_startSeed', 0, 4, 'startSeed_p46', 'startSeed_w46');

         INSERT INTO parameter_dims (model_id, parameter_id, dim_id, dim_name, type_id) VALUES (1, 0, 0, 'dim0', 101);
         INSERT INTO parameter_dims (model_id, parameter_id, dim_id, dim_name, type_id) VALUES (1, 0, 1, 'dim1', 102);
         INSERT INTO parameter_dims (model_id, parameter_id, dim_id, dim_name, type_id) VALUES (1, 1, 0, 'year', 4);

         INSERT INTO parameter_dic_txt (model_id, parameter_id, lang_id, descr, note) VALUES (1, 0, 0, 'Age by sex', NULL);
         INSERT INTO parameter_dic_txt (model_id, parameter_id, lang_id, descr, note) VALUES (1, 0, 1, 'Âge par sexe', NULL);

         INSERT INTO table_dic
           (model_id, table_id, table_hid, table_name, table_digest, table_rank, is_user, db_expr_table, db_acc_table)
           VALUES (1, 0, 101, 'salarySex', 't_salarySex', 1, 0, 'salarySex_v101', 'salarySex_a101');
         INSERT INTO table_dims (model_id, table_id, dim_id, dim_name, type_id, is_total, dim_size) VALUES (1, 0, 0, 'dim0', 102, 1, 3);
         INSERT INTO table_acc (model_id, table_id, acc_id, acc_name, is_derived, acc_src) VALUES (1, 0, 0, 'acc0', 0, 'value_sum()');
         INSERT INTO table_acc (model_id, table_id, acc_id, acc_name, is_derived, acc_src) VALUES (1, 0, 1, 'acc1', 0, 'value_count()');
         INSERT INTO table_expr (model_id, table_id, expr_id, expr_name, expr_decimals, expr_src) VALUES (1, 0, 0, 'expr0', 2, 'OM_AVG(acc0)');
         INSERT INTO table_expr (model_id, table_id, expr_id, expr_name, expr_decimals, expr_src) VALUES (1, 0, 1, 'expr1', 2, 'OM_SUM(acc1)');",
    )
    .unwrap();

    conn.execute(
        "INSERT INTO model_dic (model_id, model_name, model_digest, model_type, model_ver, create_dt, default_lang_id)
         VALUES (1, ?1, ?2, 0, '1.0.0.0', '2012-08-17 16:04:59.148', 0)",
        params![name, digest],
    )
    .unwrap();
    conn.execute_batch(
        "INSERT INTO model_dic_txt (model_id, lang_id, descr, note) VALUES (1, 0, 'First model', NULL);
         INSERT INTO model_dic_txt (model_id, lang_id, descr, note) VALUES (1, 1, 'Premier modèle', NULL);",
    )
    .unwrap();

    let meta = load_model_meta(&conn, digest).unwrap().unwrap();
    for param in &meta.params {
        let kind = meta.param_type(param).unwrap().kind;
        create_param_tables(&conn, param, kind).unwrap();
    }
    for table in &meta.tables {
        create_table_tables(&conn, table).unwrap();
    }

    insert_runs(&conn);
    insert_worksets(&conn);
    path
}

fn insert_runs(conn: &Connection) {
    conn.execute(
        "INSERT INTO run_lst
           (run_id, model_id, run_name, sub_count, sub_started, sub_completed, create_dt, status, update_dt, run_digest, run_stamp)
         VALUES (?1, 1, ?2, 1, 1, 1, '2024-01-02 03:04:05.678', 's', '2024-01-02 03:05:00.000', ?3, ?4)",
        params![RUN_ID, RUN_NAME, RUN_DIGEST, RUN_STAMP],
    )
    .unwrap();
    conn.execute(
        "INSERT INTO run_lst
           (run_id, model_id, run_name, sub_count, sub_started, sub_completed, create_dt, status, update_dt, run_digest, run_stamp)
         VALUES (12, 1, ?1, 4, 2, 1, '2024-01-03 10:00:00.000', 'p', '2024-01-03 10:00:00.000', ?2, ?3)",
        params![PENDING_RUN_NAME, PENDING_RUN_DIGEST, PENDING_RUN_STAMP],
    )
    .unwrap();

    for run_id in [RUN_ID, 12] {
        for hid in [44, 45, 46] {
            conn.execute(
                "INSERT INTO run_parameter (run_id, parameter_hid, sub_count) VALUES (?1, ?2, 1)",
                params![run_id, hid],
            )
            .unwrap();
        }

        for age in AGE_IDS {
            for sex in 0..2 {
                conn.execute(
                    "INSERT INTO ageSex_p44 (run_id, sub_id, dim0, dim1, param_value) VALUES (?1, 0, ?2, ?3, ?4)",
                    params![run_id, age, sex, age_sex_value(age, sex)],
                )
                .unwrap();
            }
        }
        for year in 0..YEAR_COUNT {
            conn.execute(
                "INSERT INTO yearRate_p45 (run_id, sub_id, dim0, param_value) VALUES (?1, 0, ?2, ?3)",
                params![run_id, year, year_rate_value(year)],
            )
            .unwrap();
        }
        conn.execute(
            "INSERT INTO startSeed_p46 (run_id, sub_id, param_value) VALUES (?1, 0, 1023)",
            params![run_id],
        )
        .unwrap();
    }

    for expr_id in 0..2 {
        for dim in 0..3 {
            conn.execute(
                "INSERT INTO salarySex_v101 (run_id, expr_id, dim0, expr_value) VALUES (?1, ?2, ?3, ?4)",
                params![RUN_ID, expr_id, dim, f64::from(expr_id * 10 + dim)],
            )
            .unwrap();
        }
    }
    for acc_id in 0..2 {
        for dim in 0..3 {
            conn.execute(
                "INSERT INTO salarySex_a101 (run_id, acc_id, sub_id, dim0, acc_value) VALUES (?1, ?2, 0, ?3, ?4)",
                params![RUN_ID, acc_id, dim, f64::from(acc_id * 100 + dim)],
            )
            .unwrap();
        }
    }
}

fn insert_worksets(conn: &Connection) {
    conn.execute_batch(
        "INSERT INTO workset_lst (set_id, base_run_id, model_id, set_name, is_readonly, update_dt)
           VALUES (1, 11, 1, 'Default', 1, '2024-01-01 00:00:00.000');
         INSERT INTO workset_lst (set_id, base_run_id, model_id, set_name, is_readonly, update_dt)
           VALUES (2, NULL, 1, 'mySet', 0, '2024-01-01 00:00:00.000');

         INSERT INTO workset_txt (set_id, lang_id, descr, note) VALUES (1, 0, 'Default values', NULL);
         INSERT INTO workset_txt (set_id, lang_id, descr, note) VALUES (2, 0, 'My scenario', 'Work in progress');

         INSERT INTO workset_parameter (set_id, parameter_hid, sub_count, default_sub_id) VALUES (1, 44, 1, 0);
         INSERT INTO workset_parameter (set_id, parameter_hid, sub_count, default_sub_id) VALUES (1, 45, 1, 0);
         INSERT INTO workset_parameter (set_id, parameter_hid, sub_count, default_sub_id) VALUES (1, 46, 1, 0);
         INSERT INTO workset_parameter (set_id, parameter_hid, sub_count, default_sub_id) VALUES (2, 46, 1, 0);

         INSERT INTO workset_parameter_txt (set_id, parameter_hid, lang_id, note) VALUES (1, 44, 0, 'Default age by sex');

         INSERT INTO startSeed_w46 (set_id, sub_id, param_value) VALUES (1, 0, 1023);
         INSERT INTO startSeed_w46 (set_id, sub_id, param_value) VALUES (2, 0, 7);",
    )
    .unwrap();

    for age in AGE_IDS {
        for sex in 0..2 {
            conn.execute(
                "INSERT INTO ageSex_w44 (set_id, sub_id, dim0, dim1, param_value) VALUES (1, 0, ?1, ?2, ?3)",
                params![age, sex, 100.0 + age_sex_value(age, sex)],
            )
            .unwrap();
        }
    }
    for year in 0..YEAR_COUNT {
        conn.execute(
            "INSERT INTO yearRate_w45 (set_id, sub_id, dim0, param_value) VALUES (1, 0, ?1, ?2)",
            params![year, year_rate_value(year)],
        )
        .unwrap();
    }
}
