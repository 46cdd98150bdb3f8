//! Schema reading
//!
//! Locates the repeating class groups of the wide sheet. The label row names
//! each class ("Aula 1", "AULA 02", "Class 3"); the date row holds the class
//! date under its label, or the label embeds it ("Aula 1 - 12/02/2024").
//! Class N owns the indicator columns with suffix N-1 (`P`, `P.1`, ...).

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;

use crate::config::{IdentityColumn, SourceLayout};
use crate::error::SchemaError;
use crate::normalizer::parse_pt_br_date;
use crate::source::RawSheet;
use crate::types::{ClassDateMap, Indicator, RawWideRecord};

/// A parsed class label
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassLabel {
    /// 1-based class number
    pub number: usize,
    /// Date text embedded in the label, if any
    pub embedded_date: Option<String>,
}

/// Parse a class label such as `Aula 1`, `AULA nº 02` or `Class 3 (12-fev.-2024)`
pub fn parse_class_label(label: &str) -> Option<ClassLabel> {
    let lowered = label.trim().to_lowercase();
    let prefix = ["classe", "class", "aula"]
        .iter()
        .find(|prefix| lowered.starts_with(**prefix))?;

    let is_separator = |c: char| c.is_whitespace() || "-_#.:".contains(c);
    let rest = lowered[prefix.len()..].trim_start_matches(is_separator);
    let rest = rest
        .strip_prefix("nº")
        .or_else(|| rest.strip_prefix("n°"))
        .unwrap_or(rest)
        .trim_start_matches(is_separator);

    let digits_end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    if digits_end == 0 {
        return None;
    }
    let number: usize = rest[..digits_end].parse().ok()?;
    if number == 0 {
        return None;
    }

    let tail = &rest[digits_end..];
    if !tail.is_empty() && !tail.starts_with(|c: char| c.is_whitespace() || "-:(".contains(c)) {
        return None;
    }
    let embedded = tail
        .trim()
        .trim_start_matches(['-', ':', '('])
        .trim_end_matches(')')
        .trim();

    Some(ClassLabel {
        number,
        embedded_date: (!embedded.is_empty()).then(|| embedded.to_string()),
    })
}

/// Structure of the source sheet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetSchema {
    pub class_dates: ClassDateMap,
    name_column: usize,
    room_column: usize,
    unit_column: usize,
    /// Header position of every indicator column that belongs to a known class
    indicator_columns: Vec<(usize, String)>,
    /// Occurrence suffixes present in the header with no class label
    pub ignored_occurrences: Vec<usize>,
}

/// Schema reader for the wide source sheet
pub struct SchemaReader<'a> {
    layout: &'a SourceLayout,
}

impl<'a> SchemaReader<'a> {
    pub fn new(layout: &'a SourceLayout) -> Self {
        Self { layout }
    }

    /// Read the class date map and column positions
    pub fn read(&self, sheet: &RawSheet) -> Result<SheetSchema, SchemaError> {
        let class_dates = read_class_dates(sheet)?;

        let name_column = required_column(sheet, &self.layout.name)?;
        let room_column = required_column(sheet, &self.layout.room)?;
        let unit_column = required_column(sheet, &self.layout.unit)?;

        let mut indicator_columns = Vec::new();
        let mut ignored = BTreeSet::new();
        for (index, column) in sheet.header.iter().enumerate() {
            let Some((_, occurrence)) = Indicator::parse_column(column) else {
                continue;
            };
            if class_dates.get(occurrence).is_some() {
                indicator_columns.push((index, column.clone()));
            } else {
                ignored.insert(occurrence);
            }
        }

        let ignored_occurrences: Vec<usize> = ignored.into_iter().collect();
        if !ignored_occurrences.is_empty() {
            tracing::warn!(
                occurrences = ?ignored_occurrences,
                "indicator columns without a class header are ignored"
            );
        }
        tracing::debug!(classes = class_dates.len(), "read class headers");

        Ok(SheetSchema {
            class_dates,
            name_column,
            room_column,
            unit_column,
            indicator_columns,
            ignored_occurrences,
        })
    }

    /// Extract one wide record per student row
    pub fn records(&self, sheet: &RawSheet, schema: &SheetSchema) -> Vec<RawWideRecord> {
        let separator = self.layout.segment_separator.as_str();

        sheet
            .rows
            .iter()
            .map(|(line, row)| {
                let cell = move |index: usize| row.get(index).map(String::as_str).unwrap_or("");
                let cells: BTreeMap<String, String> = schema
                    .indicator_columns
                    .iter()
                    .filter_map(|(index, column)| {
                        row.get(*index).map(|value| (column.clone(), value.clone()))
                    })
                    .collect();

                RawWideRecord {
                    line: *line,
                    name: self.layout.name.extract(cell(schema.name_column), separator).to_string(),
                    room: self.layout.room.extract(cell(schema.room_column), separator).to_string(),
                    unit: self.layout.unit.extract(cell(schema.unit_column), separator).to_string(),
                    cells,
                }
            })
            .collect()
    }
}

/// Build the occurrence → date map from the two label rows
pub fn read_class_dates(sheet: &RawSheet) -> Result<ClassDateMap, SchemaError> {
    let mut labels: BTreeMap<usize, (usize, ClassLabel)> = BTreeMap::new();
    for (column, text) in sheet.label_row.iter().enumerate() {
        let Some(label) = parse_class_label(text) else {
            continue;
        };
        if labels.insert(label.number, (column, label.clone())).is_some() {
            return Err(SchemaError::DuplicateClass(label.number));
        }
    }

    if labels.is_empty() {
        return Err(SchemaError::NoClassHeaders);
    }

    let mut dates: BTreeMap<usize, NaiveDate> = BTreeMap::new();
    for (expected, (number, (column, label))) in (1..).zip(labels) {
        if number != expected {
            return Err(SchemaError::NonContiguousClasses {
                expected,
                found: number,
            });
        }

        let cell = sheet
            .date_row
            .get(column)
            .map(|value| value.trim())
            .unwrap_or("");
        let raw = if cell.is_empty() {
            label
                .embedded_date
                .ok_or(SchemaError::MissingClassDate { class: number })?
        } else {
            cell.to_string()
        };

        let date = parse_pt_br_date(&raw).map_err(|e| SchemaError::MalformedClassDate {
            class: number,
            value: raw.clone(),
            reason: e.reason,
        })?;
        dates.insert(number - 1, date);
    }

    Ok(ClassDateMap::new(dates))
}

fn required_column(sheet: &RawSheet, identity: &IdentityColumn) -> Result<usize, SchemaError> {
    sheet
        .column_index(&identity.column)
        .ok_or_else(|| SchemaError::MissingColumn(identity.column.clone()))
}
