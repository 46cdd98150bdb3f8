//! Value normalization
//!
//! This module maps the heterogeneous symbols instructors type into the sheet
//! (check marks, plus/minus, letters, emoticons, emoji) onto closed numeric
//! scales, and parses the PT-BR date formats found in the header rows.
//! - Every indicator has a finite lookup table; unknown tokens are violations
//! - Blank cells and spreadsheet error literals are explicitly missing
//! - Violations are collected across the whole table before failing

use chrono::NaiveDate;
use std::collections::BTreeMap;

use crate::config::SymbolOverrides;
use crate::error::{
    Checked, ConfigError, DataIntegrityError, DateParseError, Stage, Violation, ViolationKind,
};
use crate::types::{CleanedRecord, IdentifiedRecord, Indicator, Scale};

/// Attendance tokens → {0, 1}
const PRESENCE_SYMBOLS: &[(&str, u8)] = &[
    ("p", 1),
    ("presente", 1),
    ("√", 1),
    ("✓", 1),
    ("✔", 1),
    ("1", 1),
    ("s", 1),
    ("sim", 1),
    ("y", 1),
    ("yes", 1),
    ("a", 0),
    ("f", 0),
    ("falta", 0),
    ("ausente", 0),
    ("x", 0),
    ("0", 0),
    ("n", 0),
    ("não", 0),
    ("nao", 0),
    ("no", 0),
];

/// Preparation / homework tokens → {0..3}
const COMPLETION_SYMBOLS: &[(&str, u8)] = &[
    ("√", 3),
    ("✓", 3),
    ("✔", 3),
    ("+", 3),
    ("s", 3),
    ("sim", 3),
    ("3", 3),
    ("+/-", 2),
    ("+-", 2),
    ("±", 2),
    ("2", 2),
    ("-", 1),
    ("1", 1),
    ("n", 0),
    ("x", 0),
    ("não", 0),
    ("nao", 0),
    ("0", 0),
];

/// Participation tokens → {0..3}
const MOOD_SYMBOLS: &[(&str, u8)] = &[
    (":-d", 3),
    (":d", 3),
    ("😃", 3),
    ("😀", 3),
    ("😄", 3),
    ("😁", 3),
    ("+", 3),
    ("3", 3),
    (":-)", 2),
    (":)", 2),
    ("🙂", 2),
    ("😊", 2),
    ("+/-", 2),
    ("+-", 2),
    ("±", 2),
    ("2", 2),
    (":-|", 1),
    (":|", 1),
    (":-/", 1),
    (":/", 1),
    ("😐", 1),
    ("😕", 1),
    ("-", 1),
    ("1", 1),
    (":-&", 0),
    (":-(", 0),
    (":(", 0),
    ("🙁", 0),
    ("☹", 0),
    ("😞", 0),
    ("😠", 0),
    ("0", 0),
];

/// Spreadsheet error literals treated as blank cells
const SPREADSHEET_ERRORS: &[&str] = &[
    "#n/a", "#ref!", "#value!", "#div/0!", "#name?", "#num!", "#null!",
];

/// Result of looking up one cell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token {
    Value(u8),
    Missing,
}

/// Finite token → value table for one scale
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolTable {
    name: &'static str,
    scale: Scale,
    entries: BTreeMap<String, u8>,
}

impl SymbolTable {
    fn build<'a, I>(name: &'static str, scale: Scale, entries: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (&'a str, u8)>,
    {
        let mut table = BTreeMap::new();
        for (token, value) in entries {
            if !scale.contains(value) {
                return Err(ConfigError::SymbolOutOfScale {
                    table: name,
                    token: token.to_string(),
                    value,
                    max: scale.max(),
                });
            }
            table.insert(canonical_token(token), value);
        }
        Ok(Self {
            name,
            scale,
            entries: table,
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn scale(&self) -> Scale {
        self.scale
    }

    /// Look up a raw cell. `None` means the token is not in the table.
    pub fn lookup(&self, raw: &str) -> Option<Token> {
        let token = canonical_token(raw);
        if is_missing(&token) {
            return Some(Token::Missing);
        }
        self.entries.get(&token).map(|value| Token::Value(*value))
    }

    /// Canonical tokens known to the table
    pub fn tokens(&self) -> impl Iterator<Item = (&str, u8)> + '_ {
        self.entries.iter().map(|(token, value)| (token.as_str(), *value))
    }
}

/// The three symbol tables used by the normalizer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolTables {
    pub presence: SymbolTable,
    pub completion: SymbolTable,
    pub mood: SymbolTable,
}

impl Default for SymbolTables {
    fn default() -> Self {
        // Built-in tables are in scale by construction
        Self {
            presence: builtin("presence", Scale::Binary, PRESENCE_SYMBOLS),
            completion: builtin("completion", Scale::Ordinal, COMPLETION_SYMBOLS),
            mood: builtin("mood", Scale::Ordinal, MOOD_SYMBOLS),
        }
    }
}

impl SymbolTables {
    /// Built-in tables with any configured replacements applied
    pub fn from_overrides(overrides: &SymbolOverrides) -> Result<Self, ConfigError> {
        let mut tables = Self::default();
        if let Some(presence) = &overrides.presence {
            tables.presence = SymbolTable::build(
                "presence",
                Scale::Binary,
                presence.iter().map(|(k, v)| (k.as_str(), *v)),
            )?;
        }
        if let Some(completion) = &overrides.completion {
            tables.completion = SymbolTable::build(
                "completion",
                Scale::Ordinal,
                completion.iter().map(|(k, v)| (k.as_str(), *v)),
            )?;
        }
        if let Some(mood) = &overrides.mood {
            tables.mood = SymbolTable::build(
                "mood",
                Scale::Ordinal,
                mood.iter().map(|(k, v)| (k.as_str(), *v)),
            )?;
        }
        Ok(tables)
    }

    /// Table used for an indicator; behavior is not normalized
    pub fn for_indicator(&self, indicator: Indicator) -> Option<&SymbolTable> {
        match indicator {
            Indicator::Attendance => Some(&self.presence),
            Indicator::Preparation | Indicator::Homework => Some(&self.completion),
            Indicator::Participation => Some(&self.mood),
            Indicator::Behavior => None,
        }
    }
}

fn builtin(name: &'static str, scale: Scale, entries: &[(&'static str, u8)]) -> SymbolTable {
    SymbolTable {
        name,
        scale,
        entries: entries
            .iter()
            .map(|(token, value)| (canonical_token(token), *value))
            .collect(),
    }
}

/// Canonical form of a cell: no whitespace, lowercase, ASCII dashes, no
/// emoji variation selector
pub fn canonical_token(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace() && *c != '\u{fe0f}')
        .map(|c| match c {
            '–' | '—' | '−' | '‐' => '-',
            other => other,
        })
        .flat_map(char::to_lowercase)
        .collect()
}

fn is_missing(token: &str) -> bool {
    token.is_empty() || token.contains("error") || SPREADSHEET_ERRORS.contains(&token)
}

/// Normalizer for converting identified records into cleaned records
pub struct Normalizer {
    tables: SymbolTables,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(SymbolTables::default())
    }
}

impl Normalizer {
    pub fn new(tables: SymbolTables) -> Self {
        Self { tables }
    }

    pub fn tables(&self) -> &SymbolTables {
        &self.tables
    }

    /// Normalize every record, collecting all unrecognized tokens
    pub fn normalize(
        &self,
        records: Vec<IdentifiedRecord>,
    ) -> Result<Vec<CleanedRecord>, DataIntegrityError> {
        self.check(records).into_result(Stage::ValueNormalizer)
    }

    /// Normalize the records whose cells are all recognized and report the
    /// others, one violation per offending cell
    pub fn check(&self, records: Vec<IdentifiedRecord>) -> Checked<CleanedRecord> {
        let mut cleaned = Vec::with_capacity(records.len());
        let mut violations = Vec::new();

        for record in records {
            let reported = violations.len();
            let mut values = [None; 4];
            for (slot, indicator) in [
                Indicator::Preparation,
                Indicator::Attendance,
                Indicator::Homework,
                Indicator::Participation,
            ]
            .into_iter()
            .enumerate()
            {
                match self.normalize_cell(indicator, record.indicators.get(indicator)) {
                    Ok(value) => values[slot] = value,
                    Err(kind) => violations.push(Violation {
                        line: record.line,
                        field: indicator.column_name(record.occurrence),
                        kind,
                    }),
                }
            }

            if violations.len() > reported {
                continue;
            }

            let [preparation, attendance, homework, participation] = values;
            cleaned.push(CleanedRecord {
                student_id: record.student_id,
                line: record.line,
                student_name: record.student_name,
                room: record.room,
                unit: record.unit,
                class_number: record.occurrence + 1,
                class_date: record.class_date,
                preparation,
                attendance,
                homework,
                participation,
            });
        }

        tracing::debug!(
            records = cleaned.len(),
            violations = violations.len(),
            "normalized indicator values"
        );
        Checked {
            records: cleaned,
            violations,
        }
    }

    /// Normalize one cell; absent cells are missing
    pub fn normalize_cell(
        &self,
        indicator: Indicator,
        raw: Option<&str>,
    ) -> Result<Option<u8>, ViolationKind> {
        let (Some(table), Some(raw)) = (self.tables.for_indicator(indicator), raw) else {
            return Ok(None);
        };

        match table.lookup(raw) {
            Some(Token::Value(value)) => Ok(Some(value)),
            Some(Token::Missing) => Ok(None),
            None => Err(ViolationKind::UnrecognizedToken {
                indicator,
                token: raw.trim().to_string(),
            }),
        }
    }
}

/// Parse a PT-BR date as found in the sheet header rows
///
/// Accepts `dd/mm/yyyy`, `dd-mm-yyyy`, `dd.mm.yyyy`, `dd/mm/yy`, ISO
/// `yyyy-mm-dd` (optionally followed by a time) and month-name forms such as
/// `12-fev.-2024`, `12 fev 2024` or `12 de fevereiro de 2024`.
pub fn parse_pt_br_date(raw: &str) -> Result<NaiveDate, DateParseError> {
    let text = raw.trim();
    let fail = |reason: &str| DateParseError {
        input: raw.to_string(),
        reason: reason.to_string(),
    };

    if text.is_empty() {
        return Err(fail("empty value"));
    }

    // ISO, as written by spreadsheet exports of real date cells
    let date_part = text.split([' ', 'T']).next().unwrap_or(text);
    if let Ok(date) = NaiveDate::parse_from_str(date_part, "%Y-%m-%d") {
        return Ok(date);
    }

    // chrono's %Y would read "24" as year 24, so pick the year width first
    let two_digit_year = text
        .rsplit(['/', '-', '.'])
        .next()
        .is_some_and(|year| year.len() == 2);
    let formats: [&str; 3] = if two_digit_year {
        ["%d/%m/%y", "%d-%m-%y", "%d.%m.%y"]
    } else {
        ["%d/%m/%Y", "%d-%m-%Y", "%d.%m.%Y"]
    };
    for format in formats {
        if let Ok(date) = NaiveDate::parse_from_str(text, format) {
            return Ok(date);
        }
    }

    parse_month_name_date(text).ok_or_else(|| fail("unrecognized date format"))
}

/// `12-fev.-2024`, `12 fev. 2024`, `12 de fevereiro de 2024`
fn parse_month_name_date(text: &str) -> Option<NaiveDate> {
    let lowered = text.to_lowercase();
    let parts: Vec<&str> = lowered
        .split(|c: char| c == '-' || c == '/' || c.is_whitespace())
        .map(|part| part.trim_end_matches('.'))
        .filter(|part| !part.is_empty() && *part != "de")
        .collect();

    let [day, month, year] = parts.as_slice() else {
        return None;
    };

    let day: u32 = day.parse().ok()?;
    let month = month_number(month)?;
    let year: i32 = match year.len() {
        4 => year.parse().ok()?,
        2 => 2000 + year.parse::<i32>().ok()?,
        _ => return None,
    };
    NaiveDate::from_ymd_opt(year, month, day)
}

fn month_number(name: &str) -> Option<u32> {
    const MONTHS: [(&str, &str); 12] = [
        ("jan", "janeiro"),
        ("fev", "fevereiro"),
        ("mar", "março"),
        ("abr", "abril"),
        ("mai", "maio"),
        ("jun", "junho"),
        ("jul", "julho"),
        ("ago", "agosto"),
        ("set", "setembro"),
        ("out", "outubro"),
        ("nov", "novembro"),
        ("dez", "dezembro"),
    ];

    if name == "marco" {
        return Some(3);
    }
    MONTHS
        .iter()
        .position(|(short, full)| name == *short || name == *full)
        .map(|index| index as u32 + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RawIndicators, StudentId};
    use pretty_assertions::assert_eq;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn make_record(line: usize, indicators: RawIndicators) -> IdentifiedRecord {
        IdentifiedRecord {
            student_id: StudentId::from_parts("ana", "8a", "paulista"),
            student_name: "Ana".to_string(),
            room: "8A".to_string(),
            unit: "Paulista".to_string(),
            line,
            occurrence: 1,
            class_date: NaiveDate::from_ymd_opt(2024, 2, 19).unwrap(),
            indicators,
        }
    }

    fn raw(prep: &str, att: &str, hw: &str, cp: &str) -> RawIndicators {
        RawIndicators {
            preparation: Some(prep.to_string()),
            attendance: Some(att.to_string()),
            homework: Some(hw.to_string()),
            participation: Some(cp.to_string()),
            behavior: None,
        }
    }

    #[test]
    fn test_canonical_token() {
        assert_eq!(canonical_token(" + – "), "+-");
        assert_eq!(canonical_token(":-D"), ":-d");
        assert_eq!(canonical_token("☹\u{fe0f}"), "☹");
        assert_eq!(canonical_token("NÃO"), "não");
    }

    #[test]
    fn test_symbol_variants_normalize() {
        let normalizer = Normalizer::default();
        let cleaned = normalizer
            .normalize(vec![make_record(4, raw("√", "P", "+ –", ":-D"))])
            .unwrap();

        let record = &cleaned[0];
        assert_eq!(record.preparation, Some(3));
        assert_eq!(record.attendance, Some(1));
        assert_eq!(record.homework, Some(2));
        assert_eq!(record.participation, Some(3));
        assert_eq!(record.class_number, 2);
    }

    #[test]
    fn test_plus_minus_variants_agree_across_tables() {
        let normalizer = Normalizer::default();
        for token in ["+/-", "+-", "± ", "+ –", "+ −"] {
            assert_eq!(
                normalizer.normalize_cell(Indicator::Homework, Some(token)),
                Ok(Some(2)),
                "homework {token:?}"
            );
            assert_eq!(
                normalizer.normalize_cell(Indicator::Participation, Some(token)),
                Ok(Some(2)),
                "participation {token:?}"
            );
        }
    }

    #[test]
    fn test_check_keeps_clean_rows_beside_violations() {
        let normalizer = Normalizer::default();
        let checked = normalizer.check(vec![
            make_record(4, raw("√", "P", "√", ":-)")),
            make_record(5, raw("√", "??", "√", ":-)")),
            make_record(6, raw("-", "A", "", "")),
        ]);

        let kept: Vec<usize> = checked.records.iter().map(|r| r.line).collect();
        assert_eq!(kept, vec![4, 6]);
        assert_eq!(checked.violations.len(), 1);
        assert_eq!(checked.violations[0].line, 5);
        assert_eq!(checked.violations[0].field, "P.1");
    }

    #[test]
    fn test_blank_and_error_cells_are_missing() {
        let normalizer = Normalizer::default();
        let cleaned = normalizer
            .normalize(vec![make_record(4, raw("", "#N/A", "#ERROR!", "  "))])
            .unwrap();

        let record = &cleaned[0];
        assert_eq!(record.preparation, None);
        assert_eq!(record.attendance, None);
        assert_eq!(record.homework, None);
        assert_eq!(record.participation, None);
    }

    #[test]
    fn test_unrecognized_tokens_are_all_reported() {
        let normalizer = Normalizer::default();
        let result = normalizer.normalize(vec![
            make_record(4, raw("talvez", "P", "√", ":-)")),
            make_record(9, raw("√", "Q", "√", "🤖")),
        ]);

        let err = result.unwrap_err();
        assert_eq!(err.stage, Stage::ValueNormalizer);
        assert_eq!(err.violations.len(), 3);
        assert_eq!(err.violations[0].line, 4);
        assert_eq!(err.violations[0].field, "Pre-Class.1");
        assert_eq!(err.violations[1].field, "P.1");
        assert_eq!(
            err.violations[2].kind,
            ViolationKind::UnrecognizedToken {
                indicator: Indicator::Participation,
                token: "🤖".to_string(),
            }
        );
    }

    #[test]
    fn test_behavior_is_not_validated() {
        let normalizer = Normalizer::default();
        assert_eq!(
            normalizer.normalize_cell(Indicator::Behavior, Some("anything")),
            Ok(None)
        );
    }

    #[test]
    fn test_random_tokens_land_in_domain_or_fail() {
        let normalizer = Normalizer::default();
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let alphabet: Vec<char> = "+-/√:)(|DPAFNxsim0123 😃🙂😐☹#".chars().collect();

        for _ in 0..2000 {
            let len = rng.gen_range(0..5);
            let token: String = (0..len)
                .map(|_| alphabet[rng.gen_range(0..alphabet.len())])
                .collect();

            for indicator in [
                Indicator::Preparation,
                Indicator::Attendance,
                Indicator::Homework,
                Indicator::Participation,
            ] {
                match normalizer.normalize_cell(indicator, Some(&token)) {
                    Ok(Some(value)) => assert!(indicator.scale().contains(value)),
                    Ok(None) => assert!(is_missing(&canonical_token(&token))),
                    Err(ViolationKind::UnrecognizedToken { indicator: i, .. }) => {
                        assert_eq!(i, indicator)
                    }
                    Err(other) => panic!("unexpected violation {other:?}"),
                }
            }
        }
    }

    #[test]
    fn test_every_table_entry_is_in_scale() {
        let tables = SymbolTables::default();
        for table in [&tables.presence, &tables.completion, &tables.mood] {
            for (_, value) in table.tokens() {
                assert!(table.scale().contains(value), "{}", table.name());
            }
        }
    }

    #[test]
    fn test_overrides_replace_tables() {
        let overrides = SymbolOverrides {
            presence: Some(BTreeMap::from([("Ok".to_string(), 1), ("Falta".to_string(), 0)])),
            ..Default::default()
        };
        let tables = SymbolTables::from_overrides(&overrides).unwrap();

        assert_eq!(tables.presence.lookup("OK"), Some(Token::Value(1)));
        assert_eq!(tables.presence.lookup("P"), None);
        assert_eq!(tables.mood.lookup(":-)"), Some(Token::Value(2)));
    }

    #[test]
    fn test_overrides_out_of_scale_rejected() {
        let overrides = SymbolOverrides {
            presence: Some(BTreeMap::from([("P".to_string(), 2)])),
            ..Default::default()
        };
        assert!(matches!(
            SymbolTables::from_overrides(&overrides),
            Err(ConfigError::SymbolOutOfScale { table: "presence", .. })
        ));
    }

    #[test]
    fn test_parse_pt_br_dates() {
        let expected = NaiveDate::from_ymd_opt(2024, 2, 12).unwrap();
        for input in [
            "12/02/2024",
            "12-02-2024",
            "12.02.2024",
            "12/02/24",
            "2024-02-12",
            "2024-02-12 00:00:00",
            "12-fev.-2024",
            "12 fev. 2024",
            "12 FEV 2024",
            "12 de fevereiro de 2024",
        ] {
            assert_eq!(parse_pt_br_date(input), Ok(expected), "{input}");
        }

        assert_eq!(
            parse_pt_br_date("5 de março de 2024"),
            Ok(NaiveDate::from_ymd_opt(2024, 3, 5).unwrap())
        );
    }

    #[test]
    fn test_unparseable_dates_fail() {
        for input in ["", "amanhã", "31/02/2024", "12-xyz.-2024", "2024"] {
            let err = parse_pt_br_date(input).unwrap_err();
            assert_eq!(err.input, input);
        }
    }
}
