//! Column-oriented table of numeric market observations.

use log::warn;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::error::{AnalysisError, Result};

/// A named column; `None` marks a missing cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub values: Vec<Option<f64>>,
}

impl Column {
    pub fn new(name: impl Into<String>, values: Vec<Option<f64>>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    /// Present values only, in row order.
    pub fn present(&self) -> Vec<f64> {
        self.values.iter().flatten().copied().collect()
    }

    pub fn missing_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_none()).count()
    }
}

/// Time-ordered bid/ask observations loaded from CSV.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GoldFrame {
    columns: Vec<Column>,
    n_rows: usize,
    /// Header names dropped at load time because they held text.
    skipped: Vec<String>,
}

impl GoldFrame {
    /// Builds a frame from columns of equal length.
    pub fn from_columns(columns: Vec<Column>) -> Result<Self> {
        let n_rows = columns.first().map(|c| c.values.len()).unwrap_or(0);
        for column in &columns {
            if column.values.len() != n_rows {
                return Err(AnalysisError::ShapeMismatch {
                    expected: n_rows,
                    found: column.values.len(),
                });
            }
        }
        Ok(Self {
            columns,
            n_rows,
            skipped: Vec::new(),
        })
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        Self::from_reader(file)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(reader);

        let headers: Vec<String> = reader.headers()?.iter().map(|h| h.to_string()).collect();
        let mut cells: Vec<Vec<Option<f64>>> = vec![Vec::new(); headers.len()];
        let mut numeric = vec![true; headers.len()];

        for record in reader.records() {
            let record = record?;
            if record.len() != headers.len() {
                return Err(AnalysisError::ShapeMismatch {
                    expected: headers.len(),
                    found: record.len(),
                });
            }
            for (idx, raw) in record.iter().enumerate() {
                match parse_cell(raw) {
                    Some(value) => cells[idx].push(value),
                    None => {
                        numeric[idx] = false;
                        cells[idx].push(None);
                    }
                }
            }
        }

        let n_rows = cells.first().map(Vec::len).unwrap_or(0);
        let mut columns = Vec::new();
        let mut skipped = Vec::new();
        for ((name, values), is_numeric) in headers.into_iter().zip(cells).zip(numeric) {
            if is_numeric {
                columns.push(Column::new(name, values));
            } else {
                warn!("Skipping non-numeric column {}", name);
                skipped.push(name);
            }
        }

        Ok(Self {
            columns,
            n_rows,
            skipped,
        })
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.n_rows == 0 || self.columns.is_empty()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn skipped_columns(&self) -> &[String] {
        &self.skipped
    }

    pub fn column(&self, name: &str) -> Result<&Column> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| AnalysisError::MissingColumn(name.to_string()))
    }

    /// Appends a column, replacing any existing column with the same name.
    pub fn insert_column(&mut self, name: &str, values: Vec<Option<f64>>) -> Result<()> {
        if !self.columns.is_empty() && values.len() != self.n_rows {
            return Err(AnalysisError::ShapeMismatch {
                expected: self.n_rows,
                found: values.len(),
            });
        }
        if self.columns.is_empty() {
            self.n_rows = values.len();
        }

        match self.columns.iter_mut().find(|c| c.name == name) {
            Some(existing) => existing.values = values,
            None => self.columns.push(Column::new(name, values)),
        }
        Ok(())
    }

    /// Copy of the frame without the named columns. Unknown names are an error.
    pub fn without_columns(&self, names: &[&str]) -> Result<Self> {
        for name in names {
            self.column(name)?;
        }
        let columns = self
            .columns
            .iter()
            .filter(|c| !names.contains(&c.name.as_str()))
            .cloned()
            .collect();
        Ok(Self {
            columns,
            n_rows: self.n_rows,
            skipped: self.skipped.clone(),
        })
    }

    /// Rows with a value in every named column.
    pub fn complete_rows(&self, names: &[&str]) -> Result<Vec<usize>> {
        let selected = names
            .iter()
            .map(|name| self.column(name))
            .collect::<Result<Vec<_>>>()?;

        Ok((0..self.n_rows)
            .filter(|&row| selected.iter().all(|c| c.values[row].is_some()))
            .collect())
    }

    /// Dense matrix of the named columns for the given rows.
    pub fn to_matrix(&self, names: &[&str], rows: &[usize]) -> Result<Array2<f64>> {
        let selected = names
            .iter()
            .map(|name| self.column(name))
            .collect::<Result<Vec<_>>>()?;

        let mut data = Vec::with_capacity(rows.len() * names.len());
        for &row in rows {
            for column in &selected {
                let cell = column.values.get(row).copied().flatten();
                match cell {
                    Some(value) => data.push(value),
                    None => {
                        return Err(AnalysisError::InvalidParameter(format!(
                            "row {} has no value in column {}",
                            row, column.name
                        )))
                    }
                }
            }
        }

        Array2::from_shape_vec((rows.len(), names.len()), data)
            .map_err(|e| AnalysisError::InvalidParameter(e.to_string()))
    }

    /// Preview of the first `n` rows.
    pub fn head(&self, n: usize) -> Head<'_> {
        Head {
            frame: self,
            rows: n.min(self.n_rows),
        }
    }
}

pub struct Head<'a> {
    frame: &'a GoldFrame,
    rows: usize,
}

impl fmt::Display for Head<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let widths: Vec<usize> = self
            .frame
            .columns
            .iter()
            .map(|c| c.name.len().max(10))
            .collect();

        write!(f, "{:>5}", "")?;
        for (column, width) in self.frame.columns.iter().zip(&widths) {
            write!(f, " {:>width$}", column.name, width = width)?;
        }
        writeln!(f)?;

        for row in 0..self.rows {
            write!(f, "{:>5}", row)?;
            for (column, width) in self.frame.columns.iter().zip(&widths) {
                match column.values[row] {
                    Some(value) => write!(f, " {:>width$.6}", value, width = width)?,
                    None => write!(f, " {:>width$}", "NaN", width = width)?,
                }
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// `Some(None)` for a missing cell, `None` for text that is not a number.
fn parse_cell(raw: &str) -> Option<Option<f64>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Some(None);
    }
    match trimmed.to_ascii_lowercase().as_str() {
        "nan" | "na" | "null" => return Some(None),
        _ => {}
    }
    trimmed.parse::<f64>().ok().map(Some)
}
