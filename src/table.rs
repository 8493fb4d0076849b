//! A thin tabular layer over CSV files.
//!
//! The analysis tables carry an open-ended set of ACS columns, so rows are
//! kept as strings and coerced to numbers on demand, the same way the
//! original pipeline treats everything as text until a stage needs a value.

use std::collections::HashMap;
use std::path::Path;

use crate::error::{PipelineError, Result};

/// An in-memory CSV table: trimmed headers plus string rows.
#[derive(Debug, Clone)]
pub struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
    index: HashMap<String, usize>,
}

impl Table {
    pub fn new(headers: Vec<String>) -> Self {
        let index = headers
            .iter()
            .enumerate()
            .map(|(i, h)| (h.clone(), i))
            .collect();
        Self {
            headers,
            rows: Vec::new(),
            index,
        }
    }

    /// Read a CSV file, trimming whitespace from the header row.
    pub fn read_csv(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(PipelineError::MissingInput(path.to_path_buf()));
        }
        let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
        let headers: Vec<String> = reader
            .headers()?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();
        let mut table = Table::new(headers);
        for record in reader.records() {
            let record = record?;
            let mut row: Vec<String> = record.iter().map(|f| f.to_string()).collect();
            row.resize(table.headers.len(), String::new());
            table.rows.push(row);
        }
        Ok(table)
    }

    pub fn write_csv(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(&self.headers)?;
        for row in &self.rows {
            writer.write_record(row)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn push_row(&mut self, row: Vec<String>) {
        debug_assert_eq!(row.len(), self.headers.len());
        self.rows.push(row);
    }

    pub fn get(&self, row: usize, name: &str) -> Option<&str> {
        let col = self.column_index(name)?;
        self.rows.get(row).map(|r| r[col].as_str())
    }

    pub fn set(&mut self, row: usize, name: &str, value: String) {
        if let Some(col) = self.column_index(name) {
            if let Some(r) = self.rows.get_mut(row) {
                r[col] = value;
            }
        }
    }

    /// Append a column; `values` must be one per row (missing entries become
    /// empty cells).
    pub fn add_column(&mut self, name: &str, mut values: Vec<String>) {
        values.resize(self.rows.len(), String::new());
        self.index.insert(name.to_string(), self.headers.len());
        self.headers.push(name.to_string());
        for (row, value) in self.rows.iter_mut().zip(values) {
            row.push(value);
        }
    }

    /// Raw string view of a column.
    pub fn column(&self, name: &str) -> Option<Vec<&str>> {
        let col = self.column_index(name)?;
        Some(self.rows.iter().map(|r| r[col].as_str()).collect())
    }

    /// Numeric view of a column; unparseable or empty cells become `None`.
    /// A missing column yields all-`None`, matching the "coerce and mask"
    /// treatment of the source material.
    pub fn numeric_column(&self, name: &str) -> Vec<Option<f64>> {
        match self.column_index(name) {
            Some(col) => self
                .rows
                .iter()
                .map(|r| parse_number(&r[col]))
                .collect(),
            None => vec![None; self.rows.len()],
        }
    }

    /// Count of cells in a column that parse as finite numbers.
    pub fn non_null_count(&self, name: &str) -> usize {
        self.numeric_column(name).iter().flatten().count()
    }
}

/// Parse a cell into a finite float, treating empty strings as missing.
pub fn parse_number(cell: &str) -> Option<f64> {
    let trimmed = cell.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Normalize a block-group id to its last 12 characters, left-padded with
/// zeros. Returns `None` for blank input.
pub fn normalize_geoid(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let tail: String = if trimmed.len() > 12 {
        trimmed.chars().skip(trimmed.len() - 12).collect()
    } else {
        trimmed.to_string()
    };
    Some(format!("{tail:0>12}"))
}
