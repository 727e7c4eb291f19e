//! Language-neutral and language-specific model metadata.

use crate::config::ReadConfig;
use crate::error::{Result, SimcatError};
use serde::{Deserialize, Serialize};

/// Identity row of a model (`model_dic`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelDicRow {
    pub model_id: i32,
    pub name: String,
    pub digest: String,
    pub model_type: i32,
    pub version: String,
    pub create_dt: String,
    pub default_lang_id: i32,
}

/// A model language (`lang_lst`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LangRow {
    pub lang_id: i32,
    pub code: String,
    pub name: String,
}

/// How the values of a type are stored and rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Int,
    Float,
    Bool,
    Text,
    /// Classification, range or partition: values are enum ids.
    Enum,
}

impl ValueKind {
    /// Derive the kind from the `type_dic` dictionary id and type name.
    pub fn from_dic(dic_id: i32, type_name: &str) -> Self {
        match dic_id {
            0 => match type_name {
                "float" | "double" | "ldouble" | "Time" | "real" => ValueKind::Float,
                "file" => ValueKind::Text,
                "bool" => ValueKind::Bool,
                _ => ValueKind::Int,
            },
            1 => ValueKind::Bool,
            _ => ValueKind::Enum,
        }
    }

    /// SQLite column type of values of this kind.
    pub fn sql_type(self) -> &'static str {
        match self {
            ValueKind::Float => "FLOAT",
            ValueKind::Text => "VARCHAR(4096)",
            ValueKind::Bool => "SMALLINT",
            ValueKind::Int | ValueKind::Enum => "INT",
        }
    }
}

/// One enum item of a type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnumRow {
    pub enum_id: i32,
    pub name: String,
}

/// A model type with its enums.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeMeta {
    pub type_id: i32,
    pub name: String,
    pub dic_id: i32,
    pub total_enum_id: i32,
    pub kind: ValueKind,
    pub enums: Vec<EnumRow>,
}

impl TypeMeta {
    pub fn is_enum_based(&self) -> bool {
        self.kind == ValueKind::Enum
    }

    /// Code of an enum id; simple types render the id itself.
    pub fn enum_code(&self, enum_id: i32) -> Option<String> {
        if !self.is_enum_based() {
            return Some(enum_id.to_string());
        }
        if let Some(e) = self.enums.iter().find(|e| e.enum_id == enum_id) {
            return Some(e.name.clone());
        }
        if enum_id == self.total_enum_id {
            return Some(ReadConfig::TOTAL_ENUM_CODE.to_string());
        }
        None
    }

    /// Enum id of a code; simple types parse the code as an integer.
    pub fn enum_id(&self, code: &str) -> Option<i32> {
        if !self.is_enum_based() {
            return code.trim().parse().ok();
        }
        if let Some(e) = self.enums.iter().find(|e| e.name == code) {
            return Some(e.enum_id);
        }
        (code == ReadConfig::TOTAL_ENUM_CODE).then_some(self.total_enum_id)
    }

    /// True if `enum_id` is a valid member, including the total item.
    pub fn has_enum_id(&self, enum_id: i32) -> bool {
        !self.is_enum_based()
            || enum_id == self.total_enum_id
            || self.enums.iter().any(|e| e.enum_id == enum_id)
    }
}

/// A dimension of a parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DimMeta {
    pub dim_id: i32,
    pub name: String,
    pub type_id: i32,
}

/// A model input parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParamMeta {
    pub param_id: i32,
    pub hid: i32,
    pub name: String,
    pub digest: String,
    pub rank: i32,
    pub type_id: i32,
    pub db_run_table: String,
    pub db_set_table: String,
    pub dims: Vec<DimMeta>,
}

/// A dimension of an output table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableDimMeta {
    pub dim_id: i32,
    pub name: String,
    pub type_id: i32,
    pub is_total: bool,
    pub dim_size: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableAccRow {
    pub acc_id: i32,
    pub name: String,
    pub is_derived: bool,
    pub src: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableExprRow {
    pub expr_id: i32,
    pub name: String,
    pub decimals: i32,
    pub src: String,
}

/// A model output table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableMeta {
    pub table_id: i32,
    pub hid: i32,
    pub name: String,
    pub digest: String,
    pub rank: i32,
    pub is_user: bool,
    pub db_expr_table: String,
    pub db_acc_table: String,
    pub dims: Vec<TableDimMeta>,
    pub accs: Vec<TableAccRow>,
    pub exprs: Vec<TableExprRow>,
}

impl TableMeta {
    pub fn acc_name(&self, acc_id: i32) -> Option<&str> {
        self.accs
            .iter()
            .find(|a| a.acc_id == acc_id)
            .map(|a| a.name.as_str())
    }

    pub fn acc_id(&self, name: &str) -> Option<i32> {
        self.accs.iter().find(|a| a.name == name).map(|a| a.acc_id)
    }

    pub fn expr_name(&self, expr_id: i32) -> Option<&str> {
        self.exprs
            .iter()
            .find(|e| e.expr_id == expr_id)
            .map(|e| e.name.as_str())
    }

    pub fn expr_id(&self, name: &str) -> Option<i32> {
        self.exprs.iter().find(|e| e.name == name).map(|e| e.expr_id)
    }
}

/// Full language-neutral metadata of a model.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelMeta {
    pub model: ModelDicRow,
    pub types: Vec<TypeMeta>,
    pub params: Vec<ParamMeta>,
    pub tables: Vec<TableMeta>,
}

impl ModelMeta {
    pub fn param_by_name(&self, name: &str) -> Option<&ParamMeta> {
        self.params.iter().find(|p| p.name == name)
    }

    pub fn param_by_hid(&self, hid: i32) -> Option<&ParamMeta> {
        self.params.iter().find(|p| p.hid == hid)
    }

    pub fn table_by_name(&self, name: &str) -> Option<&TableMeta> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn type_by_id(&self, type_id: i32) -> Option<&TypeMeta> {
        self.types.iter().find(|t| t.type_id == type_id)
    }

    fn required_type(&self, type_id: i32, owner: &str) -> Result<&TypeMeta> {
        self.type_by_id(type_id).ok_or_else(|| SimcatError::Database {
            message: format!(
                "type {} of {} not found in model {}",
                type_id, owner, self.model.name
            ),
            source: None,
        })
    }

    /// Value type of a parameter.
    pub fn param_type(&self, param: &ParamMeta) -> Result<&TypeMeta> {
        self.required_type(param.type_id, &param.name)
    }

    /// Dimension types of a parameter, in dimension order.
    pub fn param_dim_types(&self, param: &ParamMeta) -> Result<Vec<&TypeMeta>> {
        param
            .dims
            .iter()
            .map(|d| self.required_type(d.type_id, &param.name))
            .collect()
    }

    /// Dimension types of an output table, in dimension order.
    pub fn table_dim_types(&self, table: &TableMeta) -> Result<Vec<&TypeMeta>> {
        table
            .dims
            .iter()
            .map(|d| self.required_type(d.type_id, &table.name))
            .collect()
    }
}

/// Description and notes in one language.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescrNote {
    pub lang_code: String,
    pub descr: String,
    #[serde(default)]
    pub note: String,
}

/// Text row of a parameter or output table, keyed by its model-local id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemTxtRow {
    pub item_id: i32,
    #[serde(flatten)]
    pub text: DescrNote,
}

/// Language-specific metadata of a model, all languages.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelTxtMeta {
    pub model_txt: Vec<DescrNote>,
    pub param_txt: Vec<ItemTxtRow>,
    pub table_txt: Vec<ItemTxtRow>,
}

/// Description of a named item in the selected language.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamedText {
    pub name: String,
    pub descr: String,
    pub note: String,
}

/// Model text resolved to one language.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelText {
    pub lang_code: String,
    pub descr: String,
    pub note: String,
    pub params: Vec<NamedText>,
    pub tables: Vec<NamedText>,
}

impl ModelTxtMeta {
    /// Resolve the text to `lang_code`, falling back to `default_code` per item.
    pub fn localize(&self, meta: &ModelMeta, lang_code: &str, default_code: &str) -> ModelText {
        let model = pick_text(self.model_txt.iter(), lang_code, default_code);

        let params = meta
            .params
            .iter()
            .map(|p| {
                let rows = self.param_txt.iter().filter(|r| r.item_id == p.param_id);
                named_text(&p.name, pick_text(rows.map(|r| &r.text), lang_code, default_code))
            })
            .collect();

        let tables = meta
            .tables
            .iter()
            .map(|t| {
                let rows = self.table_txt.iter().filter(|r| r.item_id == t.table_id);
                named_text(&t.name, pick_text(rows.map(|r| &r.text), lang_code, default_code))
            })
            .collect();

        ModelText {
            lang_code: lang_code.to_string(),
            descr: model.descr,
            note: model.note,
            params,
            tables,
        }
    }
}

fn pick_text<'a>(
    rows: impl Iterator<Item = &'a DescrNote>,
    lang_code: &str,
    default_code: &str,
) -> DescrNote {
    let rows: Vec<&DescrNote> = rows.collect();
    rows.iter()
        .find(|t| t.lang_code == lang_code)
        .or_else(|| rows.iter().find(|t| t.lang_code == default_code))
        .map(|t| (*t).clone())
        .unwrap_or_default()
}

fn named_text(name: &str, text: DescrNote) -> NamedText {
    NamedText {
        name: name.to_string(),
        descr: text.descr,
        note: text.note,
    }
}
