//! Conversion between id cells and code cells.

use crate::layout::{CellValue, ParamCell, ParamCellCode, TableCell, TableCellCode};
use crate::meta::{ModelMeta, ParamMeta, TableMeta, TypeMeta};
use crate::{Result, SimcatError};

pub(crate) fn find_param<'a>(meta: &'a ModelMeta, name: &str) -> Result<&'a ParamMeta> {
    meta.param_by_name(name)
        .ok_or_else(|| SimcatError::ParameterNotFound {
            model: meta.model.name.clone(),
            parameter: name.to_string(),
        })
}

pub(crate) fn find_table<'a>(meta: &'a ModelMeta, name: &str) -> Result<&'a TableMeta> {
    meta.table_by_name(name)
        .ok_or_else(|| SimcatError::TableNotFound {
            model: meta.model.name.clone(),
            table: name.to_string(),
        })
}

pub(crate) fn dim_codes(owner: &str, types: &[&TypeMeta], ids: &[i32]) -> Result<Vec<String>> {
    if ids.len() != types.len() {
        return Err(SimcatError::validation(
            owner,
            format!("expected {} dimension items, found {}", types.len(), ids.len()),
        ));
    }
    ids.iter()
        .zip(types)
        .map(|(&id, typ)| {
            typ.enum_code(id).ok_or_else(|| {
                SimcatError::validation(owner, format!("invalid {} item id: {}", typ.name, id))
            })
        })
        .collect()
}

pub(crate) fn dim_ids<S: AsRef<str>>(
    owner: &str,
    types: &[&TypeMeta],
    codes: &[S],
) -> Result<Vec<i32>> {
    if codes.len() != types.len() {
        return Err(SimcatError::validation(
            owner,
            format!("expected {} dimension items, found {}", types.len(), codes.len()),
        ));
    }
    codes
        .iter()
        .zip(types)
        .map(|(code, typ)| {
            let code = code.as_ref();
            typ.enum_id(code).ok_or_else(|| {
                SimcatError::validation(owner, format!("invalid {} item code: {}", typ.name, code))
            })
        })
        .collect()
}

/// Converts parameter cells from enum ids to enum codes.
#[derive(Debug, Clone)]
pub struct ParameterCodeConverter<'a> {
    pub(crate) param: &'a ParamMeta,
    pub(crate) dim_types: Vec<&'a TypeMeta>,
    pub(crate) value_type: &'a TypeMeta,
}

impl<'a> ParameterCodeConverter<'a> {
    pub fn new(meta: &'a ModelMeta, name: &str) -> Result<Self> {
        let param = find_param(meta, name)?;
        Ok(Self {
            param,
            dim_types: meta.param_dim_types(param)?,
            value_type: meta.param_type(param)?,
        })
    }

    pub fn convert(&self, cell: &ParamCell) -> Result<ParamCellCode> {
        let dims = dim_codes(&self.param.name, &self.dim_types, &cell.dim_ids)?;

        let value = match &cell.value {
            CellValue::Int(id) if self.value_type.is_enum_based() => {
                let code = i32::try_from(*id)
                    .ok()
                    .and_then(|id| self.value_type.enum_code(id))
                    .ok_or_else(|| {
                        SimcatError::validation(
                            &self.param.name,
                            format!("invalid enum id: {}", id),
                        )
                    })?;
                CellValue::Text(code)
            }
            v => v.clone(),
        };

        Ok(ParamCellCode {
            sub_id: cell.sub_id,
            dims,
            value,
        })
    }
}

/// Converts parameter cells from enum codes back to enum ids.
#[derive(Debug, Clone)]
pub struct ParameterIdConverter<'a> {
    inner: ParameterCodeConverter<'a>,
}

impl<'a> ParameterIdConverter<'a> {
    pub fn new(meta: &'a ModelMeta, name: &str) -> Result<Self> {
        Ok(Self {
            inner: ParameterCodeConverter::new(meta, name)?,
        })
    }

    pub fn convert(&self, cell: &ParamCellCode) -> Result<ParamCell> {
        let p = &self.inner;
        let dim_ids = dim_ids(&p.param.name, &p.dim_types, &cell.dims)?;

        let value = match &cell.value {
            CellValue::Text(code) if p.value_type.is_enum_based() => {
                let id = p.value_type.enum_id(code).ok_or_else(|| {
                    SimcatError::validation(&p.param.name, format!("invalid enum code: {}", code))
                })?;
                CellValue::Int(id.into())
            }
            v => v.clone(),
        };

        Ok(ParamCell {
            sub_id: cell.sub_id,
            dim_ids,
            value,
        })
    }
}

/// Converts output table cells from ids to codes and names.
#[derive(Debug, Clone)]
pub struct TableCodeConverter<'a> {
    pub(crate) table: &'a TableMeta,
    pub(crate) dim_types: Vec<&'a TypeMeta>,
}

impl<'a> TableCodeConverter<'a> {
    pub fn new(meta: &'a ModelMeta, name: &str) -> Result<Self> {
        let table = find_table(meta, name)?;
        Ok(Self {
            table,
            dim_types: meta.table_dim_types(table)?,
        })
    }

    pub(crate) fn expr_name(&self, expr_id: i32) -> Result<&'a str> {
        self.table.expr_name(expr_id).ok_or_else(|| {
            SimcatError::validation(&self.table.name, format!("invalid expression id: {}", expr_id))
        })
    }

    pub(crate) fn acc_name(&self, acc_id: i32) -> Result<&'a str> {
        self.table.acc_name(acc_id).ok_or_else(|| {
            SimcatError::validation(&self.table.name, format!("invalid accumulator id: {}", acc_id))
        })
    }

    pub fn convert(&self, cell: &TableCell) -> Result<TableCellCode> {
        let name = &self.table.name;
        let code = match cell {
            TableCell::Expr(c) => TableCellCode {
                value_name: self.expr_name(c.expr_id)?.to_string(),
                sub_id: None,
                dims: dim_codes(name, &self.dim_types, &c.dim_ids)?,
                values: vec![c.value],
            },
            TableCell::Acc(c) => TableCellCode {
                value_name: self.acc_name(c.acc_id)?.to_string(),
                sub_id: Some(c.sub_id),
                dims: dim_codes(name, &self.dim_types, &c.dim_ids)?,
                values: vec![c.value],
            },
            TableCell::AllAcc(c) => TableCellCode {
                value_name: String::new(),
                sub_id: Some(c.sub_id),
                dims: dim_codes(name, &self.dim_types, &c.dim_ids)?,
                values: c.values.clone(),
            },
        };
        Ok(code)
    }
}
