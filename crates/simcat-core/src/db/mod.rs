//! Model database access: schema, single-row accessors and the value store.

pub mod rows;
pub mod schema;
pub mod values;

use chrono::Local;

/// Current local time in the format stored in `*_dt` columns.
pub fn now_dt() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S%.3f").to_string()
}
