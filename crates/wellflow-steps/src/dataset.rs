//! Tabular production data
//!
//! The monthly data files are comma-separated text with a header row.
//! Quoted fields follow RFC 4180; every field is trimmed and blank lines
//! are skipped.

use serde::{Deserialize, Serialize};
use std::path::Path;
use wellflow_core::{keys, WorkflowContext};

/// Errors reading a data file
#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    /// File could not be read
    #[error("failed to read {path}: {source}")]
    Io {
        /// File path
        path: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Text is not valid CSV
    #[error("malformed data file: {0}")]
    Csv(#[from] csv::Error),

    /// File has no header row
    #[error("data file is empty")]
    Empty,

    /// A row has a different field count than the header
    #[error("row {row} has {found} fields, expected {expected}")]
    Ragged {
        /// 1-based line number
        row: usize,
        /// Fields in the header
        expected: usize,
        /// Fields in the row
        found: usize,
    },
}

/// Header plus rows of string cells
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dataset {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Dataset {
    /// Build a dataset from parts
    ///
    /// # Errors
    /// `DatasetError::Ragged` when a row does not match the header width.
    pub fn new(columns: Vec<String>, rows: Vec<Vec<String>>) -> Result<Self, DatasetError> {
        for (i, row) in rows.iter().enumerate() {
            if row.len() != columns.len() {
                return Err(DatasetError::Ragged {
                    row: i + 2,
                    expected: columns.len(),
                    found: row.len(),
                });
            }
        }
        Ok(Self { columns, rows })
    }

    /// Parse comma-separated text
    ///
    /// # Errors
    /// `Csv` on unreadable records, `Empty` without a header, `Ragged` on
    /// mismatched rows.
    pub fn parse(text: &str) -> Result<Self, DatasetError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(text.trim_start_matches('\u{feff}').as_bytes());

        let mut columns: Option<Vec<String>> = None;
        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            if record.iter().all(str::is_empty) {
                continue;
            }
            let cells: Vec<String> = record.iter().map(str::to_string).collect();
            let Some(expected) = columns.as_ref().map(Vec::len) else {
                columns = Some(cells);
                continue;
            };
            if cells.len() != expected {
                let line = record.position().map_or(0, csv::Position::line);
                return Err(DatasetError::Ragged {
                    row: usize::try_from(line).unwrap_or(usize::MAX),
                    expected,
                    found: cells.len(),
                });
            }
            rows.push(cells);
        }
        let columns = columns.ok_or(DatasetError::Empty)?;
        Ok(Self { columns, rows })
    }

    /// Read and parse a file
    ///
    /// # Errors
    /// `Io` when the file cannot be read, otherwise as [`Dataset::parse`].
    pub async fn load(path: &Path) -> Result<Self, DatasetError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| DatasetError::Io {
                path: path.display().to_string(),
                source,
            })?;
        Self::parse(&text)
    }

    /// Column names
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Number of data rows
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether there are no data rows
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Whether a column exists
    #[must_use]
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    /// Raw cells of a column
    #[must_use]
    pub fn column(&self, name: &str) -> Option<Vec<String>> {
        let idx = self.columns.iter().position(|c| c == name)?;
        Some(self.rows.iter().filter_map(|row| row.get(idx).cloned()).collect())
    }

    /// Numeric values of a column; unparsable cells are skipped
    #[must_use]
    pub fn numeric(&self, name: &str) -> Option<Vec<f64>> {
        let idx = self.columns.iter().position(|c| c == name)?;
        Some(
            self.rows
                .iter()
                .filter_map(|row| row.get(idx).and_then(|cell| cell.parse::<f64>().ok()))
                .collect(),
        )
    }

    /// Columns that are not date or time columns
    #[must_use]
    pub fn value_columns(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| !c.to_lowercase().contains("date") && !c.contains("时间"))
            .map(String::as_str)
            .collect()
    }

    /// Read the dataset stored in a workflow context
    #[must_use]
    pub fn from_context(context: &WorkflowContext) -> Option<Self> {
        context.get_as(keys::DATASET)
    }

    /// Store the dataset in a workflow context
    ///
    /// # Errors
    /// Serialization failure.
    pub fn store(&self, context: &mut WorkflowContext) -> Result<(), serde_json::Error> {
        context.set_as(keys::DATASET, self)
    }
}

/// Minimum and maximum of a non-empty slice
#[must_use]
pub fn min_max(values: &[f64]) -> Option<(f64, f64)> {
    let first = *values.first()?;
    Some(
        values
            .iter()
            .fold((first, first), |(lo, hi), v| (lo.min(*v), hi.max(*v))),
    )
}
