//! CSV rows of parameter and output table cells.

use super::code::{dim_codes, dim_ids, ParameterCodeConverter, TableCodeConverter};
use super::format::DoubleFormat;
use crate::config::ReadConfig;
use crate::layout::{CellValue, ParamCell, TableCell, TableValueKind, ValueMode};
use crate::meta::{ModelMeta, ValueKind};
use crate::{Result, SimcatError};
use std::io::Read;

fn float_text(format: &DoubleFormat, value: Option<f64>) -> String {
    match value {
        Some(v) => format.format(v),
        None => ReadConfig::NULL_VALUE.to_string(),
    }
}

/// Parameter cells to CSV rows and CSV records to parameter cells.
///
/// Columns are `sub_id`, one column per dimension and `param_value`.
#[derive(Debug, Clone)]
pub struct ParameterCsvConverter<'a> {
    code: ParameterCodeConverter<'a>,
    mode: ValueMode,
    format: DoubleFormat,
}

impl<'a> ParameterCsvConverter<'a> {
    pub fn new(
        meta: &'a ModelMeta,
        name: &str,
        mode: ValueMode,
        format: DoubleFormat,
    ) -> Result<Self> {
        Ok(Self {
            code: ParameterCodeConverter::new(meta, name)?,
            mode,
            format,
        })
    }

    pub fn header(&self) -> Vec<String> {
        let mut header = vec!["sub_id".to_string()];
        header.extend(self.code.param.dims.iter().map(|d| d.name.clone()));
        header.push("param_value".to_string());
        header
    }

    /// Fill `row` with the CSV fields of `cell`.
    pub fn to_csv_row(&self, cell: &ParamCell, row: &mut Vec<String>) -> Result<()> {
        row.clear();
        row.push(cell.sub_id.to_string());

        match self.mode {
            ValueMode::Id => {
                if cell.dim_ids.len() != self.code.dim_types.len() {
                    return Err(SimcatError::validation(
                        &self.code.param.name,
                        "dimension count mismatch",
                    ));
                }
                row.extend(cell.dim_ids.iter().map(|id| id.to_string()));
            }
            ValueMode::Code => {
                row.extend(dim_codes(&self.code.param.name, &self.code.dim_types, &cell.dim_ids)?);
            }
        }

        let value = match (&cell.value, self.mode) {
            (CellValue::Int(_), ValueMode::Code) if self.code.value_type.is_enum_based() => {
                match self.code.convert(cell)?.value {
                    CellValue::Text(code) => code,
                    other => format!("{:?}", other),
                }
            }
            (CellValue::Null, _) => ReadConfig::NULL_VALUE.to_string(),
            (CellValue::Bool(v), _) => v.to_string(),
            (CellValue::Int(v), _) => v.to_string(),
            (CellValue::Float(v), _) => self.format.format(*v),
            (CellValue::Text(v), _) => v.clone(),
        };
        row.push(value);
        Ok(())
    }

    /// Parse one CSV record into a cell.
    pub fn from_csv_record(&self, record: &csv::StringRecord) -> Result<ParamCell> {
        let p = &self.code;
        let rank = p.dim_types.len();
        let invalid = |msg: String| SimcatError::validation(&p.param.name, msg);

        if record.len() != rank + 2 {
            return Err(invalid(format!(
                "expected {} columns, found {}",
                rank + 2,
                record.len()
            )));
        }

        let sub_id = record[0]
            .trim()
            .parse()
            .map_err(|_| invalid(format!("invalid sub_id: {}", &record[0])))?;

        let fields: Vec<&str> = record.iter().skip(1).take(rank).map(str::trim).collect();
        let dim_ids = match self.mode {
            ValueMode::Code => dim_ids(&p.param.name, &p.dim_types, &fields)?,
            ValueMode::Id => fields
                .iter()
                .map(|f| f.parse().map_err(|_| invalid(format!("invalid item id: {}", f))))
                .collect::<Result<Vec<i32>>>()?,
        };

        let text = record[rank + 1].trim();
        let bad_value = || invalid(format!("invalid {} value: {}", p.value_type.name, text));
        let value = if text.is_empty() || text.eq_ignore_ascii_case(ReadConfig::NULL_VALUE) {
            CellValue::Null
        } else {
            match p.value_type.kind {
                ValueKind::Float => CellValue::Float(text.parse().map_err(|_| bad_value())?),
                ValueKind::Int => CellValue::Int(text.parse().map_err(|_| bad_value())?),
                ValueKind::Bool => match text.to_ascii_lowercase().as_str() {
                    "true" | "1" => CellValue::Bool(true),
                    "false" | "0" => CellValue::Bool(false),
                    _ => return Err(bad_value()),
                },
                ValueKind::Text => CellValue::Text(text.to_string()),
                ValueKind::Enum => {
                    let id = match self.mode {
                        ValueMode::Code => p.value_type.enum_id(text),
                        ValueMode::Id => text.parse().ok(),
                    };
                    CellValue::Int(id.ok_or_else(bad_value)?.into())
                }
            }
        };

        Ok(ParamCell {
            sub_id,
            dim_ids,
            value,
        })
    }

    /// Read all cells of a CSV source; the first row is a header and is skipped.
    pub fn read_csv<R: Read>(&self, source: R) -> Result<Vec<ParamCell>> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(source);

        let mut cells = Vec::new();
        for record in reader.records() {
            cells.push(self.from_csv_record(&record?)?);
        }
        Ok(cells)
    }
}

/// Output table cells to CSV rows.
#[derive(Debug, Clone)]
pub struct TableCsvConverter<'a> {
    code: TableCodeConverter<'a>,
    kind: TableValueKind,
    mode: ValueMode,
    format: DoubleFormat,
}

impl<'a> TableCsvConverter<'a> {
    pub fn new(
        meta: &'a ModelMeta,
        name: &str,
        kind: TableValueKind,
        mode: ValueMode,
        format: DoubleFormat,
    ) -> Result<Self> {
        Ok(Self {
            code: TableCodeConverter::new(meta, name)?,
            kind,
            mode,
            format,
        })
    }

    pub fn header(&self) -> Vec<String> {
        let table = self.code.table;
        let dims = table.dims.iter().map(|d| d.name.clone());
        let id_column = |name: &str, id: &str| match self.mode {
            ValueMode::Code => name.to_string(),
            ValueMode::Id => id.to_string(),
        };

        let mut header = Vec::new();
        match self.kind {
            TableValueKind::Expr => {
                header.push(id_column("expr_name", "expr_id"));
                header.extend(dims);
                header.push("expr_value".to_string());
            }
            TableValueKind::Acc => {
                header.push(id_column("acc_name", "acc_id"));
                header.push("sub_id".to_string());
                header.extend(dims);
                header.push("acc_value".to_string());
            }
            TableValueKind::AllAcc => {
                header.push("sub_id".to_string());
                header.extend(dims);
                header.extend(table.accs.iter().map(|a| a.name.clone()));
            }
        }
        header
    }

    fn push_dims(&self, ids: &[i32], row: &mut Vec<String>) -> Result<()> {
        match self.mode {
            ValueMode::Id => row.extend(ids.iter().map(|id| id.to_string())),
            ValueMode::Code => {
                row.extend(dim_codes(&self.code.table.name, &self.code.dim_types, ids)?)
            }
        }
        Ok(())
    }

    /// Fill `row` with the CSV fields of `cell`.
    pub fn to_csv_row(&self, cell: &TableCell, row: &mut Vec<String>) -> Result<()> {
        row.clear();
        match (cell, self.kind) {
            (TableCell::Expr(c), TableValueKind::Expr) => {
                row.push(match self.mode {
                    ValueMode::Code => self.code.expr_name(c.expr_id)?.to_string(),
                    ValueMode::Id => c.expr_id.to_string(),
                });
                self.push_dims(&c.dim_ids, row)?;
                row.push(float_text(&self.format, c.value));
            }
            (TableCell::Acc(c), TableValueKind::Acc) => {
                row.push(match self.mode {
                    ValueMode::Code => self.code.acc_name(c.acc_id)?.to_string(),
                    ValueMode::Id => c.acc_id.to_string(),
                });
                row.push(c.sub_id.to_string());
                self.push_dims(&c.dim_ids, row)?;
                row.push(float_text(&self.format, c.value));
            }
            (TableCell::AllAcc(c), TableValueKind::AllAcc) => {
                row.push(c.sub_id.to_string());
                self.push_dims(&c.dim_ids, row)?;
                row.extend(c.values.iter().map(|v| float_text(&self.format, *v)));
            }
            _ => {
                return Err(SimcatError::validation(
                    &self.code.table.name,
                    "cell kind does not match the converter",
                ))
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{AllAccCell, ExprCell};
    use crate::meta::{
        DimMeta, EnumRow, ModelDicRow, ParamMeta, TableAccRow, TableDimMeta, TableExprRow,
        TableMeta, TypeMeta,
    };

    fn sex_type() -> TypeMeta {
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
        }
    }

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
                sex_type(),
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
            tables: vec![TableMeta {
                table_id: 0,
                hid: 2,
                name: "income".into(),
                digest: "t".into(),
                rank: 1,
                is_user: false,
                db_expr_table: "income_v".into(),
                db_acc_table: "income_a".into(),
                dims: vec![TableDimMeta {
                    dim_id: 0,
                    name: "sex".into(),
                    type_id: 101,
                    is_total: true,
                    dim_size: 3,
                }],
                accs: vec![
                    TableAccRow {
                        acc_id: 0,
                        name: "acc0".into(),
                        is_derived: false,
                        src: String::new(),
                    },
                    TableAccRow {
                        acc_id: 1,
                        name: "acc1".into(),
                        is_derived: false,
                        src: String::new(),
                    },
                ],
                exprs: vec![TableExprRow {
                    expr_id: 0,
                    name: "expr0".into(),
                    decimals: 2,
                    src: String::new(),
                }],
            }],
        }
    }

    #[test]
    fn test_param_csv_row() {
        let meta = test_meta();
        let conv =
            ParameterCsvConverter::new(&meta, "rate", ValueMode::Code, DoubleFormat::default())
                .unwrap();
        assert_eq!(conv.header(), vec!["sub_id", "sex", "param_value"]);

        let mut row = Vec::new();
        let cell = ParamCell {
            sub_id: 0,
            dim_ids: vec![1],
            value: CellValue::Float(0.25),
        };
        conv.to_csv_row(&cell, &mut row).unwrap();
        assert_eq!(row, vec!["0", "F", "0.25"]);

        let cell = ParamCell {
            sub_id: 1,
            dim_ids: vec![0],
            value: CellValue::Null,
        };
        conv.to_csv_row(&cell, &mut row).unwrap();
        assert_eq!(row, vec!["1", "M", "null"]);
    }

    #[test]
    fn test_read_csv_skips_header() {
        let meta = test_meta();
        let conv =
            ParameterCsvConverter::new(&meta, "rate", ValueMode::Code, DoubleFormat::default())
                .unwrap();
        let cells = conv
            .read_csv("sub_id,sex,param_value\n0,M,1.5\n0,F,null\n".as_bytes())
            .unwrap();
        assert_eq!(cells.len(), 2);
        assert_eq!(cells[0].dim_ids, vec![0]);
        assert_eq!(cells[0].value, CellValue::Float(1.5));
        assert_eq!(cells[1].value, CellValue::Null);

        assert!(conv.read_csv("sub_id,sex,param_value\n0,X,1\n".as_bytes()).is_err());
    }

    #[test]
    fn test_table_csv_rows() {
        let meta = test_meta();
        let conv = TableCsvConverter::new(
            &meta,
            "income",
            TableValueKind::Expr,
            ValueMode::Code,
            DoubleFormat::parse("%.2f").unwrap(),
        )
        .unwrap();
        assert_eq!(conv.header(), vec!["expr_name", "sex", "expr_value"]);

        let mut row = Vec::new();
        let cell = TableCell::Expr(ExprCell {
            expr_id: 0,
            dim_ids: vec![2],
            value: Some(3.14159),
        });
        conv.to_csv_row(&cell, &mut row).unwrap();
        assert_eq!(row, vec!["expr0", "all", "3.14"]);

        let all = TableCsvConverter::new(
            &meta,
            "income",
            TableValueKind::AllAcc,
            ValueMode::Id,
            DoubleFormat::default(),
        )
        .unwrap();
        assert_eq!(all.header(), vec!["sub_id", "sex", "acc0", "acc1"]);
        let cell = TableCell::AllAcc(AllAccCell {
            sub_id: 0,
            dim_ids: vec![1],
            values: vec![Some(2.0), None],
        });
        all.to_csv_row(&cell, &mut row).unwrap();
        assert_eq!(row, vec!["0", "1", "2", "null"]);

        // expression cell through an all-accumulator converter
        let expr = TableCell::Expr(ExprCell {
            expr_id: 0,
            dim_ids: vec![1],
            value: None,
        });
        assert!(all.to_csv_row(&expr, &mut row).is_err());
    }
}
