//! Wide-to-long reshape
//!
//! Expands each student row into one record per class occurrence. The
//! occurrence list comes from the class date map, never from column
//! introspection, so the mapping column name → (occurrence, indicator) stays
//! explicit: `Indicator::column_name(occurrence)`.

use crate::types::{ClassDateMap, Indicator, LongRecord, RawIndicators, RawWideRecord};

/// Reshaper from wide student rows to long (student, class) records
pub struct Reshaper;

impl Reshaper {
    /// Reshape every student row.
    ///
    /// An occurrence whose indicator columns are all absent for a student is
    /// skipped for that student; blank-but-present cells still produce a row.
    pub fn reshape(records: &[RawWideRecord], class_dates: &ClassDateMap) -> Vec<LongRecord> {
        let mut long = Vec::with_capacity(records.len() * class_dates.len());

        for record in records {
            for (occurrence, class_date) in class_dates.iter() {
                let indicators = collect_indicators(record, occurrence);
                if !indicators.any_present() {
                    continue;
                }

                long.push(LongRecord {
                    line: record.line,
                    name: record.name.clone(),
                    room: record.room.clone(),
                    unit: record.unit.clone(),
                    occurrence,
                    class_date,
                    indicators,
                });
            }
        }

        tracing::debug!(
            students = records.len(),
            rows = long.len(),
            "reshaped classes to long form"
        );
        long
    }
}

fn collect_indicators(record: &RawWideRecord, occurrence: usize) -> RawIndicators {
    let mut indicators = RawIndicators::default();
    for indicator in Indicator::ALL {
        if let Some(value) = record.cells.get(&indicator.column_name(occurrence)) {
            indicators.set(indicator, value.clone());
        }
    }
    indicators
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    fn class_dates(count: usize) -> ClassDateMap {
        ClassDateMap::new(
            (0..count)
                .map(|occurrence| {
                    let date = NaiveDate::from_ymd_opt(2024, 2, 5).unwrap()
                        + chrono::Duration::days(7 * occurrence as i64);
                    (occurrence, date)
                })
                .collect(),
        )
    }

    fn record(line: usize, name: &str, cells: &[(&str, &str)]) -> RawWideRecord {
        RawWideRecord {
            line,
            name: name.to_string(),
            room: "8A".to_string(),
            unit: "Paulista".to_string(),
            cells: cells
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    #[test]
    fn test_pairs_values_with_their_class_date() {
        let dates = class_dates(2);
        let records = vec![record(
            4,
            "Ana",
            &[("P", "P"), ("CP", ":-)"), ("P.1", "A"), ("Hw.1", "√")],
        )];

        let long = Reshaper::reshape(&records, &dates);
        assert_eq!(long.len(), 2);

        assert_eq!(long[0].occurrence, 0);
        assert_eq!(long[0].class_date, dates.get(0).unwrap());
        assert_eq!(long[0].indicators.attendance.as_deref(), Some("P"));
        assert_eq!(long[0].indicators.participation.as_deref(), Some(":-)"));
        assert_eq!(long[0].indicators.homework, None);

        assert_eq!(long[1].class_number(), 2);
        assert_eq!(long[1].class_date, dates.get(1).unwrap());
        assert_eq!(long[1].indicators.attendance.as_deref(), Some("A"));
        assert_eq!(long[1].indicators.homework.as_deref(), Some("√"));
    }

    #[test]
    fn test_absent_occurrence_is_skipped_but_blank_is_kept() {
        let dates = class_dates(3);
        let records = vec![
            record(4, "Ana", &[("P", "P"), ("P.1", ""), ("P.2", "P")]),
            record(5, "Bruno", &[("P", "P")]),
        ];

        let long = Reshaper::reshape(&records, &dates);
        let per_student: Vec<(&str, usize)> = long
            .iter()
            .map(|r| (r.name.as_str(), r.occurrence))
            .collect();
        assert_eq!(
            per_student,
            vec![("Ana", 0), ("Ana", 1), ("Ana", 2), ("Bruno", 0)]
        );
        assert_eq!(long[1].indicators.attendance.as_deref(), Some(""));
    }

    #[test]
    fn test_row_count_matches_present_occurrences() {
        let dates = class_dates(4);
        let columns: Vec<String> = (0..4)
            .flat_map(|occ| Indicator::ALL.map(|indicator| indicator.column_name(occ)))
            .collect();

        let mut records = Vec::new();
        let mut expected = 0;
        for student in 0..20usize {
            // deterministic, varied availability per student
            let cells: Vec<(&str, &str)> = columns
                .iter()
                .enumerate()
                .filter(|(index, _)| (student * 7 + index * 3) % 5 == 0)
                .map(|(_, column)| (column.as_str(), "√"))
                .collect();
            expected += (0..4)
                .filter(|occ| {
                    Indicator::ALL.iter().any(|indicator| {
                        cells
                            .iter()
                            .any(|(column, _)| *column == indicator.column_name(*occ))
                    })
                })
                .count();
            records.push(record(student + 4, &format!("S{student}"), &cells));
        }

        assert_eq!(Reshaper::reshape(&records, &dates).len(), expected);
    }

    #[test]
    fn test_columns_beyond_class_map_are_ignored() {
        let dates = class_dates(1);
        let records = vec![record(4, "Ana", &[("P", "P"), ("P.1", "P"), ("P.5", "P")])];
        assert_eq!(Reshaper::reshape(&records, &dates).len(), 1);
    }
}
