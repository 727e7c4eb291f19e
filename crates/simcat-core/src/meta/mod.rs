//! Model metadata: types, parameters, output tables and their text.
//!
//! Language-neutral metadata is loaded on the first read or write request
//! for a model; language-specific text only when descriptions are asked for.

pub mod loader;
mod types;

pub use types::{
    DescrNote, DimMeta, EnumRow, ItemTxtRow, LangRow, ModelDicRow, ModelMeta, ModelText,
    ModelTxtMeta, NamedText, ParamMeta, TableAccRow, TableDimMeta, TableExprRow, TableMeta,
    TypeMeta, ValueKind,
};
