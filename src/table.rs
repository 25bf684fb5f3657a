use std::borrow::Cow;
use std::collections::HashSet;
use std::io::{Cursor, Read, Write};

use polars::prelude::{
    Column as FrameColumn, CsvReadOptions, CsvWriter, DataFrame, DataType, IdxCa, IdxSize, IntoColumn, NamedFrom,
    SerReader, SerWriter, Series,
};
use serde::{Deserialize, Serialize, Serializer};

use crate::error::{AttritionError, Result};

/// unique employee key, never used as a feature
pub const IDENTIFIER: &str = "EmployeeNumber";
/// event column of the raw training data
pub const ATTRITION: &str = "Attrition";
/// time axis of the survival target
pub const YEARS_AT_COMPANY: &str = "YearsAtCompany";
/// column appended by risk scoring
pub const PREDICTED_RISK: &str = "PredictedRisk";

/// numeric features that get standardized
pub const NUMERIC_FEATURES: [&str; 17] = [
    "Age",
    "DailyRate",
    "MonthlyRate",
    "DistanceFromHome",
    "HourlyRate",
    "JobInvolvement",
    "JobLevel",
    "MonthlyIncome",
    "NumCompaniesWorked",
    "PercentSalaryHike",
    "PerformanceRating",
    "TotalWorkingYears",
    "TrainingTimesLastYear",
    "WorkLifeBalance",
    "YearsInCurrentRole",
    "YearsSinceLastPromotion",
    "YearsWithCurrManager",
];

/// categorical features that get one-hot encoded
pub const CATEGORICAL_FEATURES: [&str; 7] = [
    "Gender",
    "BusinessTravel",
    "Department",
    "EducationField",
    "JobRole",
    "MaritalStatus",
    "OverTime",
];

/// constant columns in the HR export, dropped at load time
pub const CONSTANT_COLUMNS: [&str; 3] = ["EmployeeCount", "StandardHours", "Over18"];

/// largest magnitude an f64 identifier may have and still be an exact integer
const MAX_EXACT_INTEGER: f64 = 9_007_199_254_740_992.0; // 2^53

/// one column of values, owned
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Column {
    Integer(Vec<i64>),
    Numeric(Vec<f64>),
    Categorical(Vec<String>),
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Column::Integer(values) => values.len(),
            Column::Numeric(values) => values.len(),
            Column::Categorical(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_numeric(&self) -> bool {
        !matches!(self, Column::Categorical(_))
    }

    /// cell as a category label - numbers are rendered the way the csv had them
    pub fn label(&self, row: usize) -> Cow<'_, str> {
        match self {
            Column::Integer(values) => Cow::Owned(values[row].to_string()),
            Column::Numeric(values) => Cow::Owned(values[row].to_string()),
            Column::Categorical(values) => Cow::Borrowed(values[row].as_str()),
        }
    }

    fn from_frame_column(column: &FrameColumn) -> Result<Self> {
        Ok(match column.dtype() {
            DataType::Int64 => Column::Integer(column.as_materialized_series().i64()?.into_no_null_iter().collect()),
            DataType::Float64 => Column::Numeric(column.as_materialized_series().f64()?.into_no_null_iter().collect()),
            _ => Column::Categorical(
                column.as_materialized_series().str()?.into_no_null_iter().map(str::to_string).collect(),
            ),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedColumn {
    pub name: String,
    pub values: Column,
}

impl NamedColumn {
    pub fn integer(name: impl Into<String>, values: Vec<i64>) -> Self {
        Self { name: name.into(), values: Column::Integer(values) }
    }

    pub fn numeric(name: impl Into<String>, values: Vec<f64>) -> Self {
        Self { name: name.into(), values: Column::Numeric(values) }
    }

    pub fn categorical<S: Into<String>>(name: impl Into<String>, values: Vec<S>) -> Self {
        Self {
            name: name.into(),
            values: Column::Categorical(values.into_iter().map(Into::into).collect()),
        }
    }

    fn into_series(self) -> Series {
        let name = self.name.into();
        match self.values {
            Column::Integer(values) => Series::new(name, values),
            Column::Numeric(values) => Series::new(name, values),
            Column::Categorical(values) => Series::new(name, values),
        }
    }
}

/// integer columns become Int64, float columns Float64, the rest String; nulls are rejected
fn normalize(frame: &DataFrame) -> Result<DataFrame> {
    let mut columns = Vec::with_capacity(frame.width());
    for column in frame.get_columns() {
        if column.null_count() > 0 {
            return Err(AttritionError::data(format!(
                "column `{}` has {} missing values",
                column.name(),
                column.null_count()
            )));
        }
        let dtype = column.dtype();
        let target = if dtype.is_integer() {
            DataType::Int64
        } else if dtype.is_float() {
            DataType::Float64
        } else {
            DataType::String
        };
        columns.push(column.cast(&target)?);
    }
    Ok(DataFrame::new(columns)?)
}

fn is_number(dtype: &DataType) -> bool {
    matches!(dtype, DataType::Int64 | DataType::Float64)
}

/// employee records, one row per employee, backed by a polars frame
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "Vec<NamedColumn>")]
pub struct EmployeeTable {
    frame: DataFrame,
}

impl Default for EmployeeTable {
    fn default() -> Self {
        Self { frame: DataFrame::empty() }
    }
}

impl PartialEq for EmployeeTable {
    fn eq(&self, other: &Self) -> bool {
        self.frame.schema() == other.frame.schema() && self.frame.equals_missing(&other.frame)
    }
}

impl TryFrom<Vec<NamedColumn>> for EmployeeTable {
    type Error = AttritionError;

    fn try_from(columns: Vec<NamedColumn>) -> Result<Self> {
        Self::new(columns)
    }
}

impl Serialize for EmployeeTable {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.named_columns().map_err(serde::ser::Error::custom)?.serialize(serializer)
    }
}

impl EmployeeTable {
    /// assemble a table, rejecting ragged or duplicated columns
    pub fn new(columns: Vec<NamedColumn>) -> Result<Self> {
        let n_rows = columns.first().map(|c| c.values.len()).unwrap_or(0);

        let mut seen = HashSet::new();
        for column in &columns {
            if !seen.insert(column.name.as_str()) {
                return Err(AttritionError::data(format!("duplicate column `{}`", column.name)));
            }
            if column.values.len() != n_rows {
                return Err(AttritionError::data(format!(
                    "column `{}` has {} rows, expected {}",
                    column.name,
                    column.values.len(),
                    n_rows
                )));
            }
        }

        let columns: Vec<FrameColumn> = columns.into_iter().map(|c| c.into_series().into_column()).collect();
        Ok(Self { frame: DataFrame::new(columns)? })
    }

    /// adopt a polars frame; dtypes are narrowed to Int64 / Float64 / String
    pub fn from_frame(frame: DataFrame) -> Result<Self> {
        Ok(Self { frame: normalize(&frame)? })
    }

    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    pub fn n_rows(&self) -> usize {
        self.frame.height()
    }

    pub fn n_columns(&self) -> usize {
        self.frame.width()
    }

    /// no rows at all (a table with headers only is still empty)
    pub fn is_empty(&self) -> bool {
        self.n_rows() == 0
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.frame.get_columns().iter().map(|c| c.name().as_str())
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.frame.get_column_index(name).is_some()
    }

    /// true for integer and float columns
    pub fn is_numeric(&self, name: &str) -> Result<bool> {
        Ok(is_number(self.frame_column(name)?.dtype()))
    }

    fn frame_column(&self, name: &str) -> Result<&FrameColumn> {
        self.frame
            .column(name)
            .map_err(|_| AttritionError::data(format!("column `{}` missing", name)))
    }

    /// copy of a column that has to be there
    pub fn require(&self, name: &str) -> Result<Column> {
        Column::from_frame_column(self.frame_column(name)?)
    }

    /// numeric column that has to be there, as f64
    pub fn numeric(&self, name: &str) -> Result<Vec<f64>> {
        let column = self.frame_column(name)?;
        if !is_number(column.dtype()) {
            return Err(AttritionError::data(format!("column `{}` is not numeric", name)));
        }
        let values = column.cast(&DataType::Float64)?;
        Ok(values.as_materialized_series().f64()?.into_no_null_iter().collect())
    }

    /// every column, copied out in order
    pub fn named_columns(&self) -> Result<Vec<NamedColumn>> {
        self.frame
            .get_columns()
            .iter()
            .map(|c| Ok(NamedColumn { name: c.name().to_string(), values: Column::from_frame_column(c)? }))
            .collect()
    }

    /// check a whole list of columns at once, reporting every missing one
    pub fn require_columns<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Result<()> {
        let missing: Vec<&str> = names.into_iter().filter(|n| !self.has_column(n)).collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(AttritionError::data(format!("missing required columns: {}", missing.join(", "))))
        }
    }

    /// employee identifiers - must exist, be exact integers and unique
    pub fn identifiers(&self) -> Result<Vec<i64>> {
        let ids: Vec<i64> = match self.require(IDENTIFIER)? {
            Column::Integer(values) => values,
            Column::Numeric(values) => values.into_iter().map(exact_identifier).collect::<Result<_>>()?,
            Column::Categorical(_) => {
                return Err(AttritionError::data(format!("{} must be numeric", IDENTIFIER)));
            }
        };

        let mut seen = HashSet::with_capacity(ids.len());
        for &id in &ids {
            if !seen.insert(id) {
                return Err(AttritionError::data(format!("duplicate {} {}", IDENTIFIER, id)));
            }
        }
        Ok(ids)
    }

    /// rows in the given order (indices may repeat)
    pub fn select_rows(&self, rows: &[usize]) -> Result<Self> {
        if let Some(&bad) = rows.iter().find(|&&i| i >= self.n_rows()) {
            return Err(AttritionError::data(format!(
                "row index {} out of bounds for {} rows",
                bad,
                self.n_rows()
            )));
        }

        let indices = IdxCa::from_vec("rows".into(), rows.iter().map(|&i| i as IdxSize).collect());
        Ok(Self { frame: self.frame.take(&indices)? })
    }

    /// copy without the named columns (unknown names are ignored)
    pub fn without_columns(&self, names: &[&str]) -> Self {
        Self { frame: self.frame.drop_many(names.iter().copied()) }
    }

    /// add a column at the end, or replace one with the same name in place
    pub fn with_column(mut self, column: NamedColumn) -> Result<Self> {
        if column.values.len() != self.n_rows() && self.n_columns() > 0 {
            return Err(AttritionError::data(format!(
                "column `{}` has {} rows, table has {}",
                column.name,
                column.values.len(),
                self.n_rows()
            )));
        }

        self.frame.with_column(column.into_series())?;
        Ok(self)
    }

    /// read a csv with a header row, inferring every column's type from all rows
    pub fn from_csv_reader<R: Read>(mut reader: R) -> Result<Self> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;

        let frame = CsvReadOptions::default()
            .with_has_header(true)
            .with_infer_schema_length(None)
            .into_reader_with_file_handle(Cursor::new(bytes))
            .finish()
            .map_err(|e| AttritionError::data(format!("unreadable csv: {}", e)))?;
        Self::from_frame(frame)
    }

    /// write the table as csv with a header row
    pub fn to_csv_writer<W: Write>(&self, writer: W) -> Result<()> {
        let mut frame = self.frame.clone();
        CsvWriter::new(writer).include_header(true).finish(&mut frame)?;
        Ok(())
    }
}

fn exact_identifier(value: f64) -> Result<i64> {
    if !value.is_finite() || value.fract() != 0.0 || value.abs() >= MAX_EXACT_INTEGER {
        return Err(AttritionError::data(format!(
            "{} must be an exact integer, got {}",
            IDENTIFIER, value
        )));
    }
    Ok(value as i64)
}
