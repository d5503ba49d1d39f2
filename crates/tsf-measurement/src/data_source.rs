//! ---
//! tsf_section: "02-measurement-data-model"
//! tsf_subsection: "module"
//! tsf_type: "source"
//! tsf_scope: "code"
//! tsf_description: "Measurement identity, values and metadata resolution."
//! tsf_version: "v0.0.0-prealpha"
//! tsf_owner: "tbd"
//! ---
//! In-memory tabular metadata.
//!
//! Tables are named, case-insensitive collections of rows. Each row is a positional vector of
//! [`CellValue`]s aligned with the table's column list. The JSON form is an object of table name
//! to an array of row objects:
//!
//! ```json
//! { "ActiveMeasurements": [ { "ID": "PPA:1", "PointTag": "GPA_SHELBY:FREQ", "Adder": 0.0 } ] }
//! ```

use std::cmp::Ordering;
use std::fmt;
use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::filter::FilterExpression;
use crate::{MeasurementError, Result};

/// A single cell in a metadata table.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
}

impl CellValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            CellValue::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Numeric view, converting numeric text and booleans.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CellValue::Number(value) => Some(*value),
            CellValue::Text(text) => text.trim().parse().ok(),
            CellValue::Bool(flag) => Some(if *flag { 1.0 } else { 0.0 }),
            CellValue::Null => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            CellValue::Bool(flag) => Some(*flag),
            CellValue::Number(value) => Some(*value != 0.0),
            CellValue::Text(text) => match text.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => Some(true),
                "false" | "0" => Some(false),
                _ => None,
            },
            CellValue::Null => None,
        }
    }

    /// Loose comparison: numeric when both sides are numeric, otherwise case-insensitive text.
    /// `None` when either side is null.
    pub fn compare(&self, other: &CellValue) -> Option<Ordering> {
        if self.is_null() || other.is_null() {
            return None;
        }
        if let (CellValue::Bool(a), CellValue::Bool(b)) = (self, other) {
            return Some(a.cmp(b));
        }
        let numeric_pair = match (self, other) {
            (CellValue::Text(_), CellValue::Text(_)) => None,
            _ => self.as_f64().zip(other.as_f64()),
        };
        if let Some((a, b)) = numeric_pair {
            return a.partial_cmp(&b);
        }
        let a = self.to_string().to_lowercase();
        let b = other.to_string().to_lowercase();
        Some(a.cmp(&b))
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Null => Ok(()),
            CellValue::Bool(flag) => write!(f, "{}", flag),
            CellValue::Number(value) => write!(f, "{}", value),
            CellValue::Text(text) => f.write_str(text),
        }
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::Text(value.to_owned())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        CellValue::Text(value)
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        CellValue::Number(value)
    }
}

impl From<bool> for CellValue {
    fn from(value: bool) -> Self {
        CellValue::Bool(value)
    }
}

/// A named table of rows with a fixed column list.
#[derive(Debug, Clone, Default)]
pub struct DataTable {
    name: String,
    columns: Vec<String>,
    rows: Vec<Vec<CellValue>>,
}

impl DataTable {
    pub fn new<I, S>(name: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Case-insensitive column position.
    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|candidate| candidate.eq_ignore_ascii_case(column))
    }

    /// Column position or an [`MeasurementError::UnknownColumn`] naming this table.
    pub fn require_column(&self, column: &str) -> Result<usize> {
        self.column_index(column)
            .ok_or_else(|| MeasurementError::UnknownColumn {
                table: self.name.clone(),
                column: column.to_owned(),
            })
    }

    /// Append a positional row; short rows are padded with nulls.
    pub fn push_row(&mut self, mut row: Vec<CellValue>) {
        row.resize(self.columns.len(), CellValue::Null);
        self.rows.push(row);
    }

    /// Append a row given as column/value pairs, adding unseen columns.
    pub fn insert_record<I, S>(&mut self, record: I)
    where
        I: IntoIterator<Item = (S, CellValue)>,
        S: Into<String>,
    {
        let mut row = vec![CellValue::Null; self.columns.len()];
        for (column, value) in record {
            let column = column.into();
            let index = match self.column_index(&column) {
                Some(index) => index,
                None => {
                    self.columns.push(column);
                    for existing in &mut self.rows {
                        existing.push(CellValue::Null);
                    }
                    row.push(CellValue::Null);
                    self.columns.len() - 1
                }
            };
            row[index] = value;
        }
        self.rows.push(row);
    }

    pub fn row(&self, index: usize) -> Option<DataRow<'_>> {
        self.rows.get(index).map(|cells| DataRow { table: self, cells })
    }

    pub fn rows(&self) -> impl Iterator<Item = DataRow<'_>> {
        self.rows.iter().map(move |cells| DataRow { table: self, cells })
    }
}

static NULL_CELL: CellValue = CellValue::Null;

/// Borrowed view of one row.
#[derive(Debug, Clone, Copy)]
pub struct DataRow<'a> {
    table: &'a DataTable,
    cells: &'a [CellValue],
}

impl<'a> DataRow<'a> {
    /// Cell value by column name, `Null` when the column does not exist.
    pub fn get(&self, column: &str) -> &'a CellValue {
        self.table
            .column_index(column)
            .and_then(|index| self.cells.get(index))
            .unwrap_or(&NULL_CELL)
    }

    pub fn at(&self, index: usize) -> &'a CellValue {
        self.cells.get(index).unwrap_or(&NULL_CELL)
    }

    pub fn text(&self, column: &str) -> Option<&'a str> {
        self.get(column).as_text()
    }

    pub fn table(&self) -> &'a DataTable {
        self.table
    }
}

/// Named set of metadata tables shared by all adapters of a session.
#[derive(Debug, Clone, Default)]
pub struct DataSource {
    tables: IndexMap<String, DataTable>,
}

impl DataSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a table.
    pub fn add_table(&mut self, table: DataTable) {
        self.tables.insert(table.name().to_lowercase(), table);
    }

    pub fn table(&self, name: &str) -> Option<&DataTable> {
        self.tables.get(&name.to_lowercase())
    }

    pub fn require_table(&self, name: &str) -> Result<&DataTable> {
        self.table(name)
            .ok_or_else(|| MeasurementError::UnknownTable(name.to_owned()))
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.values().map(DataTable::name)
    }

    /// Evaluate a parsed `FILTER` expression and return the matching rows in result order.
    pub fn select<'a>(&'a self, filter: &FilterExpression) -> Result<Vec<DataRow<'a>>> {
        let table = self.require_table(filter.table())?;
        filter.evaluate(table)
    }

    /// Parse and evaluate a `FILTER` expression in one step.
    pub fn query(&self, expression: &str) -> Result<Vec<DataRow<'_>>> {
        let filter: FilterExpression = expression.parse()?;
        self.select(&filter)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let raw: IndexMap<String, Vec<IndexMap<String, CellValue>>> =
            serde_json::from_str(content)?;
        let mut source = DataSource::new();
        for (name, records) in raw {
            let mut table = DataTable::new(name, Vec::<String>::new());
            for record in records {
                table.insert_record(record);
            }
            source.add_table(table);
        }
        Ok(source)
    }

    pub fn load(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "loading data source");
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const METADATA: &str = r#"{
        "ActiveMeasurements": [
            { "ID": "PPA:1", "PointTag": "GPA_SHELBY:FREQ", "SignalType": "FREQ", "Adder": 0.0, "Multiplier": 1.0 },
            { "ID": "PPA:2", "PointTag": "GPA_SHELBY:VPHM", "SignalType": "VPHM", "Enabled": true },
            { "ID": "PPA:3", "PointTag": "GPA_SHELBY:IPHM" }
        ]
    }"#;

    #[test]
    fn loads_tables_from_json() {
        let source = DataSource::from_json_str(METADATA).unwrap();
        let table = source.table("activemeasurements").unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.columns().len(), 6);
        let second = table.row(1).unwrap();
        assert_eq!(second.text("pointtag"), Some("GPA_SHELBY:VPHM"));
        assert_eq!(second.get("Adder"), &CellValue::Null);
        assert_eq!(second.get("Enabled").as_bool(), Some(true));
        assert_eq!(table.row(0).unwrap().get("Multiplier").as_f64(), Some(1.0));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(METADATA.as_bytes()).unwrap();
        let source = DataSource::load(file.path()).unwrap();
        assert_eq!(source.table_names().collect::<Vec<_>>(), ["ActiveMeasurements"]);
    }

    #[test]
    fn unknown_tables_and_columns_are_reported() {
        let source = DataSource::from_json_str(METADATA).unwrap();
        assert!(matches!(
            source.require_table("Devices"),
            Err(MeasurementError::UnknownTable(_))
        ));
        let table = source.table("ActiveMeasurements").unwrap();
        assert!(matches!(
            table.require_column("Nope"),
            Err(MeasurementError::UnknownColumn { .. })
        ));
    }

    #[test]
    fn cell_comparison_is_loose() {
        assert_eq!(
            CellValue::from("10").compare(&CellValue::from(9.0)),
            Some(Ordering::Greater)
        );
        assert_eq!(
            CellValue::from("freq").compare(&CellValue::from("FREQ")),
            Some(Ordering::Equal)
        );
        assert_eq!(CellValue::Null.compare(&CellValue::from(1.0)), None);
    }
}
