//! Source sheet loading
//!
//! The workbook is consumed as a CSV export of its first sheet. The first three
//! lines are header rows (class labels, class dates, column names); every line
//! after that is one student. Rows may be ragged: a row shorter than the
//! header simply lacks its trailing columns.

use std::io::Read;
use std::path::Path;

use crate::error::{PipelineError, SchemaError};

/// Number of header rows preceding the student rows
pub const HEADER_ROWS: usize = 3;

/// Raw, untyped contents of the source sheet
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawSheet {
    /// Line 1: class labels ("Aula 1", ...)
    pub label_row: Vec<String>,
    /// Line 2: class dates under their labels
    pub date_row: Vec<String>,
    /// Line 3: column names
    pub header: Vec<String>,
    /// Student rows with their 1-based source line
    pub rows: Vec<(usize, Vec<String>)>,
}

impl RawSheet {
    /// Read a CSV export from disk
    pub fn from_path(path: &Path, delimiter: u8) -> Result<Self, PipelineError> {
        let reader = csv_reader(delimiter)
            .from_path(path)
            .map_err(PipelineError::Source)?;
        Self::from_csv(reader)
    }

    /// Read a CSV export from any reader
    pub fn from_reader<R: Read>(reader: R, delimiter: u8) -> Result<Self, PipelineError> {
        Self::from_csv(csv_reader(delimiter).from_reader(reader))
    }

    /// Build a sheet from in-memory rows (header rows first)
    pub fn from_rows<I, R, S>(rows: I) -> Result<Self, SchemaError>
    where
        I: IntoIterator<Item = R>,
        R: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let rows = rows
            .into_iter()
            .enumerate()
            .map(|(index, row)| (index + 1, row.into_iter().map(Into::into).collect()))
            .collect();
        Self::assemble(rows)
    }

    fn from_csv<R: Read>(mut reader: csv::Reader<R>) -> Result<Self, PipelineError> {
        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(PipelineError::Source)?;
            let line = record
                .position()
                .map(|position| position.line() as usize)
                .unwrap_or(rows.len() + 1);
            rows.push((line, record.iter().map(str::to_string).collect::<Vec<_>>()));
        }
        Ok(Self::assemble(rows)?)
    }

    fn assemble(mut rows: Vec<(usize, Vec<String>)>) -> Result<Self, SchemaError> {
        if rows.len() < HEADER_ROWS {
            return Err(SchemaError::EmptySource);
        }

        if let Some(first) = rows[0].1.first_mut() {
            if let Some(stripped) = first.strip_prefix('\u{feff}') {
                *first = stripped.to_string();
            }
        }

        let mut iter = rows.into_iter();
        let label_row = iter.next().map(|(_, row)| row).unwrap_or_default();
        let date_row = iter.next().map(|(_, row)| row).unwrap_or_default();
        let header = iter
            .next()
            .map(|(_, row)| row)
            .unwrap_or_default()
            .into_iter()
            .map(|name| name.trim().to_string())
            .collect();

        let rows = iter
            .filter(|(_, row)| row.iter().any(|cell| !cell.trim().is_empty()))
            .collect();

        Ok(Self {
            label_row,
            date_row,
            header,
            rows,
        })
    }

    /// Position of a column in the header row
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.header.iter().position(|column| column == name)
    }
}

fn csv_reader(delimiter: u8) -> csv::ReaderBuilder {
    let mut builder = csv::ReaderBuilder::new();
    builder.has_headers(false).flexible(true).delimiter(delimiter);
    builder
}
