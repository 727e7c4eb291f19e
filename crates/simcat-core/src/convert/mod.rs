//! Cell converters.
//!
//! Converters are built once per (model metadata, parameter or table, mode)
//! and are immutable afterwards, so one instance can serve many rows on many
//! threads.

pub(crate) mod code;
mod csv;
mod format;

pub use self::code::{ParameterCodeConverter, ParameterIdConverter, TableCodeConverter};
pub use self::csv::{ParameterCsvConverter, TableCsvConverter};
pub use self::format::DoubleFormat;
