//! Student identity resolution
//!
//! Names alone collide across rooms and units, so a student is identified by
//! the (name, room, unit) triple joined with `::`. Fields are whitespace- and
//! case-normalized first; the key is built by concatenation, never hashing.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{Checked, DataIntegrityError, Stage, Violation, ViolationKind};
use crate::types::{CleanedRecord, IdentifiedRecord, LongRecord, StudentId};

/// Character reserved for the key separator
const RESERVED: char = ':';

/// Identity resolver for long-form records
pub struct IdentityResolver;

impl IdentityResolver {
    /// Attach a `StudentId` to every record.
    ///
    /// Fails with every empty or separator-bearing identity field in the
    /// batch, one violation per (source line, field).
    pub fn resolve(
        records: Vec<LongRecord>,
        columns: &IdentityColumns,
    ) -> Result<Vec<IdentifiedRecord>, DataIntegrityError> {
        Self::check(records, columns).into_result(Stage::IdentityResolver)
    }

    /// Resolve the records with valid identity fields and report the rest
    pub fn check(records: Vec<LongRecord>, columns: &IdentityColumns) -> Checked<IdentifiedRecord> {
        let mut resolved = Vec::with_capacity(records.len());
        let mut seen: BTreeSet<(usize, &str)> = BTreeSet::new();
        let mut violations = Vec::new();

        for record in records {
            let name = collapse_whitespace(&record.name);
            let room = collapse_whitespace(&record.room);
            let unit = collapse_whitespace(&record.unit);

            let mut valid = true;
            for (value, column) in [
                (&name, columns.name.as_str()),
                (&room, columns.room.as_str()),
                (&unit, columns.unit.as_str()),
            ] {
                let kind = if value.is_empty() {
                    ViolationKind::EmptyIdentityField
                } else if value.contains(RESERVED) {
                    ViolationKind::ReservedSeparator
                } else {
                    continue;
                };
                valid = false;
                if seen.insert((record.line, column)) {
                    violations.push(Violation {
                        line: record.line,
                        field: column.to_string(),
                        kind,
                    });
                }
            }

            if !valid {
                continue;
            }

            resolved.push(IdentifiedRecord {
                student_id: StudentId::from_parts(
                    &name.to_lowercase(),
                    &room.to_lowercase(),
                    &unit.to_lowercase(),
                ),
                student_name: name,
                room,
                unit,
                line: record.line,
                occurrence: record.occurrence,
                class_date: record.class_date,
                indicators: record.indicators,
            });
        }

        tracing::debug!(
            records = resolved.len(),
            violations = violations.len(),
            "resolved student identities"
        );
        Checked {
            records: resolved,
            violations,
        }
    }

    /// Keep one cleaned row per (student, class).
    ///
    /// A repeated row with the same indicator values is dropped. A repeated
    /// row with different values is a violation naming both source lines.
    pub fn deduplicate(
        records: Vec<CleanedRecord>,
        columns: &IdentityColumns,
    ) -> Checked<CleanedRecord> {
        let mut kept: Vec<CleanedRecord> = Vec::with_capacity(records.len());
        let mut index: BTreeMap<(StudentId, usize), usize> = BTreeMap::new();
        let mut violations = Vec::new();
        let mut dropped = 0usize;

        for record in records {
            let key = (record.student_id.clone(), record.class_number);
            match index.get(&key).copied() {
                None => {
                    index.insert(key, kept.len());
                    kept.push(record);
                }
                Some(first) if kept[first].values() == record.values() => dropped += 1,
                Some(first) => violations.push(Violation {
                    line: record.line,
                    field: columns.name.clone(),
                    kind: ViolationKind::DuplicateIdentity {
                        student_id: record.student_id.to_string(),
                        class_number: record.class_number,
                        first_line: kept[first].line,
                    },
                }),
            }
        }

        if dropped > 0 {
            tracing::warn!(dropped, "dropped repeated student rows");
        }
        Checked {
            records: kept,
            violations,
        }
    }
}

/// Column names reported in identity violations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityColumns {
    pub name: String,
    pub room: String,
    pub unit: String,
}

impl Default for IdentityColumns {
    fn default() -> Self {
        Self::from(&crate::config::SourceLayout::default())
    }
}

impl From<&crate::config::SourceLayout> for IdentityColumns {
    fn from(layout: &crate::config::SourceLayout) -> Self {
        Self {
            name: layout.name.column.clone(),
            room: layout.room.column.clone(),
            unit: layout.unit.column.clone(),
        }
    }
}

/// Trim and collapse internal whitespace runs to a single space
pub fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}
