//! Read layouts, cells and pages.
//!
//! A layout describes one paged access: target name, offset and size,
//! filters and ordering. Cells always carry dimension items as enum ids;
//! the `convert` module renders them as codes or CSV at the boundary.

use serde::{Deserialize, Serialize};

/// How dimension items and enum values are represented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueMode {
    /// Internal enum ids.
    Id,
    /// External enum codes.
    #[default]
    Code,
}

/// Comparison applied by a filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOp {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = "IN")]
    In,
    #[serde(rename = "BETWEEN")]
    Between,
}

impl FilterOp {
    pub fn sql(self) -> &'static str {
        match self {
            FilterOp::Eq => "=",
            FilterOp::Ne => "<>",
            FilterOp::Gt => ">",
            FilterOp::Ge => ">=",
            FilterOp::Lt => "<",
            FilterOp::Le => "<=",
            FilterOp::In => "IN",
            FilterOp::Between => "BETWEEN",
        }
    }
}

/// Filter on a dimension or on `sub_id`, `expr_id`, `acc_id`.
///
/// Values are enum codes in `Code` mode and integer ids in `Id` mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterColumn {
    pub name: String,
    pub op: FilterOp,
    pub values: Vec<String>,
}

/// Ordering by a dimension or key column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderBy {
    pub column: String,
    #[serde(default)]
    pub desc: bool,
}

/// Common part of every read layout.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReadLayout {
    /// Parameter or output table name.
    pub name: String,
    /// Resolved source: run id, or workset set id for a workset read.
    /// Set by the read layer, callers leave it at zero.
    pub from_id: i32,
    /// Zero-based row offset.
    pub offset: i64,
    /// Maximum row count, zero or negative is unbounded.
    pub size: i64,
    pub value_mode: ValueMode,
    pub filters: Vec<FilterColumn>,
    pub order_by: Vec<OrderBy>,
}

impl ReadLayout {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_page(mut self, offset: i64, size: i64) -> Self {
        self.offset = offset;
        self.size = size;
        self
    }

    pub fn with_mode(mut self, mode: ValueMode) -> Self {
        self.value_mode = mode;
        self
    }

    pub fn with_filter(mut self, filter: FilterColumn) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn with_order(mut self, column: impl Into<String>, desc: bool) -> Self {
        self.order_by.push(OrderBy {
            column: column.into(),
            desc,
        });
        self
    }
}

/// Read layout of a parameter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadParamLayout {
    #[serde(flatten)]
    pub layout: ReadLayout,
    /// Source is a workset name rather than a model run.
    #[serde(default)]
    pub is_from_set: bool,
}

/// Which values of an output table are read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableValueKind {
    /// Output expressions.
    #[default]
    Expr,
    /// Accumulators, one row per accumulator.
    Acc,
    /// All accumulators of a cell in one row.
    AllAcc,
}

/// Read layout of an output table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadTableLayout {
    #[serde(flatten)]
    pub layout: ReadLayout,
    #[serde(default)]
    pub value_kind: TableValueKind,
}

/// A stored value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl CellValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CellValue::Int(v) => Some(*v as f64),
            CellValue::Float(v) => Some(*v),
            _ => None,
        }
    }
}

/// One parameter row with dimension items as enum ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParamCell {
    pub sub_id: i32,
    pub dim_ids: Vec<i32>,
    pub value: CellValue,
}

/// One parameter row with dimension items (and enum values) as codes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParamCellCode {
    pub sub_id: i32,
    pub dims: Vec<String>,
    pub value: CellValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExprCell {
    pub expr_id: i32,
    pub dim_ids: Vec<i32>,
    pub value: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccCell {
    pub acc_id: i32,
    pub sub_id: i32,
    pub dim_ids: Vec<i32>,
    pub value: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllAccCell {
    pub sub_id: i32,
    pub dim_ids: Vec<i32>,
    /// Accumulator values in accumulator id order.
    pub values: Vec<Option<f64>>,
}

/// One output table row with dimension items as enum ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TableCell {
    Expr(ExprCell),
    Acc(AccCell),
    AllAcc(AllAccCell),
}

/// One output table row with dimension items as codes and
/// expression / accumulator ids as names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableCellCode {
    /// Expression or accumulator name, empty for all-accumulator rows.
    pub value_name: String,
    pub sub_id: Option<i32>,
    pub dims: Vec<String>,
    pub values: Vec<Option<f64>>,
}

/// A bounded, ordered slice of cells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadPage<T> {
    pub cells: Vec<T>,
    pub offset: i64,
    pub size: i64,
    pub is_last_page: bool,
}
