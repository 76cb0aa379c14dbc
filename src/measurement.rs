use crate::error::SchemaError;
use chrono::{Datelike, Duration, NaiveDate};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

lazy_static! {
    static ref DAY_FIRST_REGEX: Regex =
        Regex::new(r"^(\d{1,2})([/.\-])(\d{1,2})([/.\-])(\d{4})(?:[ T].*)?$").unwrap();
    static ref YEAR_FIRST_REGEX: Regex =
        Regex::new(r"^(\d{4})-(\d{1,2})-(\d{1,2})(?:[ T].*)?$").unwrap();
    static ref YEAR_MONTH_REGEX: Regex = Regex::new(r"^(\d{4})-(\d{1,2})$").unwrap();
    static ref MONTH_YEAR_REGEX: Regex = Regex::new(r"^(\d{1,2})[/.\-](\d{4})$").unwrap();
}

static EMPTY_CELL: RawValue = RawValue::Empty;

/// One laboratory result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementRecord {
    pub parameter: String,
    pub sampled_at: NaiveDate,
    pub value: f64,
}

impl MeasurementRecord {
    pub fn new(parameter: impl Into<String>, sampled_at: NaiveDate, value: f64) -> Self {
        MeasurementRecord {
            parameter: parameter.into(),
            sampled_at,
            value,
        }
    }
}

/// A calendar month. The month is not range checked here: an out of range
/// value only becomes an error when it has to be turned into a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct YearMonth {
    pub year: i32,
    pub month: u32,
}

impl YearMonth {
    pub fn new(year: i32, month: u32) -> Self {
        YearMonth { year, month }
    }

    /// Adapts a full date (as picked in a date selector) by dropping the day.
    pub fn from_date(date: NaiveDate) -> Self {
        YearMonth {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date.year() == self.year && date.month() == self.month
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("cannot read '{0}' as a month (expected YYYY-MM, MM/YYYY or a full date)")]
pub struct ParseMonthError(pub String);

impl FromStr for YearMonth {
    type Err = ParseMonthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(caps) = YEAR_MONTH_REGEX.captures(s) {
            return Ok(YearMonth::new(caps[1].parse().unwrap_or(0), caps[2].parse().unwrap_or(0)));
        }
        if let Some(caps) = MONTH_YEAR_REGEX.captures(s) {
            return Ok(YearMonth::new(caps[2].parse().unwrap_or(0), caps[1].parse().unwrap_or(0)));
        }
        parse_sample_date(s)
            .map(YearMonth::from_date)
            .ok_or_else(|| ParseMonthError(s.to_string()))
    }
}

/// Title-case normalization used on both sides of every parameter comparison.
///
/// Each run of letters gets an uppercase first letter and lowercase rest;
/// surrounding and repeated whitespace is collapsed.
///
/// # Examples
/// ```
/// use costance::measurement::normalize_parameter;
///
/// assert_eq!(normalize_parameter("fosforo"), "Fosforo");
/// assert_eq!(normalize_parameter("  AZOTO   ammoniacale "), "Azoto Ammoniacale");
/// assert_eq!(normalize_parameter("BOD5"), "Bod5");
/// ```
pub fn normalize_parameter(name: &str) -> String {
    let mut normalized = String::with_capacity(name.len());
    for (i, word) in name.split_whitespace().enumerate() {
        if i > 0 {
            normalized.push(' ');
        }
        let mut prev_alpha = false;
        for c in word.chars() {
            if c.is_alphabetic() {
                if prev_alpha {
                    normalized.extend(c.to_lowercase());
                } else {
                    normalized.extend(c.to_uppercase());
                }
                prev_alpha = true;
            } else {
                normalized.push(c);
                prev_alpha = false;
            }
        }
    }
    normalized
}

/// Parses a sample date. Textual dates are day-first (`DD/MM/YYYY`, also with
/// `-` or `.`); the only year-first form accepted is ISO `YYYY-MM-DD`.
/// A trailing time of day is ignored. Anything else is `None`.
pub fn parse_sample_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    if let Some(caps) = YEAR_FIRST_REGEX.captures(text) {
        return NaiveDate::from_ymd_opt(
            caps[1].parse().ok()?,
            caps[2].parse().ok()?,
            caps[3].parse().ok()?,
        );
    }
    let caps = DAY_FIRST_REGEX.captures(text)?;
    // "10/02-2025" is not a date
    if caps[2] != caps[4] {
        return None;
    }
    NaiveDate::from_ymd_opt(
        caps[5].parse().ok()?,
        caps[3].parse().ok()?,
        caps[1].parse().ok()?,
    )
}

/// Parses a laboratory result, accepting `,` as decimal separator.
pub fn parse_value(text: &str) -> Option<f64> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    let value = match text.parse::<f64>() {
        Ok(v) => v,
        Err(_) => text.replace(',', ".").parse::<f64>().ok()?,
    };
    value.is_finite().then_some(value)
}

fn excel_epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1899, 12, 30).unwrap_or(NaiveDate::MIN)
}

/// Converts an Excel serial day number (1900 date system) to a date.
///
/// Excel counts a 29 February 1900 that never existed as serial 60, so
/// serials up to 60 do not map onto the calendar and give `None`. Serial 61
/// is 1 March 1900.
pub fn excel_serial_to_date(serial: f64) -> Option<NaiveDate> {
    if !serial.is_finite() || serial < 61.0 {
        return None;
    }
    Duration::try_days(serial.floor() as i64).and_then(|days| excel_epoch().checked_add_signed(days))
}

pub fn date_to_excel_serial(date: NaiveDate) -> f64 {
    (date - excel_epoch()).num_days() as f64
}

/// Canonical column names of a source dataset. The defaults are the headers
/// used by the laboratory spreadsheets.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ColumnNames {
    #[serde(default = "default_parameter_column")]
    pub parameter: String,
    #[serde(default = "default_date_column")]
    pub date: String,
    #[serde(default = "default_value_column")]
    pub value: String,
}

fn default_parameter_column() -> String {
    "componente".to_string()
}

fn default_date_column() -> String {
    "data".to_string()
}

fn default_value_column() -> String {
    "quantita".to_string()
}

impl Default for ColumnNames {
    fn default() -> Self {
        ColumnNames {
            parameter: default_parameter_column(),
            date: default_date_column(),
            value: default_value_column(),
        }
    }
}

/// A cell as read from a source file, before any interpretation.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Empty,
    Text(String),
    Number(f64),
    Date(NaiveDate),
}

impl RawValue {
    pub fn is_empty(&self) -> bool {
        match self {
            RawValue::Empty => true,
            RawValue::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }
}

impl fmt::Display for RawValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawValue::Empty => Ok(()),
            RawValue::Text(s) => write!(f, "{}", s),
            RawValue::Number(n) => write!(f, "{}", n),
            RawValue::Date(d) => write!(f, "{}", d.format("%d/%m/%Y")),
        }
    }
}

/// Header row plus data rows of one sheet.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<RawValue>>,
    /// 1-based sheet row holding the headers.
    pub header_row: usize,
    /// 1-based sheet column of the first header.
    pub first_column: u16,
}

impl RawTable {
    /// Index of a header, compared trimmed and case-insensitively.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        let wanted = name.trim().to_lowercase();
        self.headers
            .iter()
            .position(|h| h.trim().to_lowercase() == wanted)
    }
}

/// Ordered collection of measurements from one source file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    pub records: Vec<MeasurementRecord>,
}

impl Dataset {
    pub fn new(records: Vec<MeasurementRecord>) -> Self {
        Dataset { records }
    }

    /// Maps a raw table onto measurement records.
    ///
    /// Fully empty rows are skipped; every other row must carry a parameter,
    /// a readable date and a numeric value.
    pub fn from_table(table: &RawTable, columns: &ColumnNames) -> Result<Self, SchemaError> {
        let lookup = |name: &str| table.column_index(name).ok_or_else(|| name.to_string());
        let (parameter_col, date_col, value_col) =
            match (lookup(&columns.parameter), lookup(&columns.date), lookup(&columns.value)) {
                (Ok(p), Ok(d), Ok(v)) => (p, d, v),
                (p, d, v) => {
                    let missing = [p, d, v].into_iter().filter_map(Result::err).collect();
                    return Err(SchemaError::MissingColumns(missing));
                }
            };

        let mut records = Vec::with_capacity(table.rows.len());
        for (i, row) in table.rows.iter().enumerate() {
            let row_number = table.header_row + 1 + i;
            let cell = |idx: usize| row.get(idx).unwrap_or(&EMPTY_CELL);
            let (parameter, date, value) = (cell(parameter_col), cell(date_col), cell(value_col));

            if parameter.is_empty() && date.is_empty() && value.is_empty() {
                continue;
            }

            let parameter = match parameter {
                RawValue::Empty => String::new(),
                other => other.to_string().trim().to_string(),
            };
            if parameter.is_empty() {
                return Err(SchemaError::EmptyParameter { row: row_number });
            }

            let sampled_at = match date {
                RawValue::Date(d) => Some(*d),
                RawValue::Number(serial) => excel_serial_to_date(*serial),
                RawValue::Text(s) => parse_sample_date(s),
                RawValue::Empty => None,
            }
            .ok_or_else(|| SchemaError::InvalidDate {
                row: row_number,
                value: date.to_string(),
            })?;

            let value = match value {
                RawValue::Number(n) if n.is_finite() => Some(*n),
                RawValue::Text(s) => parse_value(s),
                _ => None,
            }
            .ok_or_else(|| SchemaError::InvalidValue {
                row: row_number,
                value: value.to_string(),
            })?;

            records.push(MeasurementRecord {
                parameter,
                sampled_at,
                value,
            });
        }

        Ok(Dataset { records })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, MeasurementRecord> {
        self.records.iter()
    }

    /// Distinct parameter names in first-seen order, de-duplicated after
    /// normalization (the spelling of the first occurrence is kept).
    pub fn parameters(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        self.records
            .iter()
            .filter(|r| seen.insert(normalize_parameter(&r.parameter)))
            .map(|r| r.parameter.clone())
            .collect()
    }
}

impl AsRef<[MeasurementRecord]> for Dataset {
    fn as_ref(&self) -> &[MeasurementRecord] {
        &self.records
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn text(s: &str) -> RawValue {
        RawValue::Text(s.to_string())
    }

    fn table(headers: &[&str], rows: Vec<Vec<RawValue>>) -> RawTable {
        RawTable {
            headers: headers.iter().map(|h| h.to_string()).collect(),
            rows,
            header_row: 1,
            first_column: 1,
        }
    }

    #[test]
    fn dates_are_day_first() {
        assert_eq!(parse_sample_date("03/04/2025"), Some(date(2025, 4, 3)));
        assert_eq!(parse_sample_date("3.4.2025"), Some(date(2025, 4, 3)));
        assert_eq!(parse_sample_date("15-02-2025 08:30"), Some(date(2025, 2, 15)));
        assert_eq!(parse_sample_date("2025-02-10"), Some(date(2025, 2, 10)));
        assert_eq!(parse_sample_date("2025-02-10 00:00:00"), Some(date(2025, 2, 10)));
    }

    #[test]
    fn month_first_and_garbage_dates_are_rejected() {
        // would be valid month-first
        assert_eq!(parse_sample_date("02/15/2025"), None);
        assert_eq!(parse_sample_date("10/02/25"), None);
        assert_eq!(parse_sample_date("10/02-2025"), None);
        assert_eq!(parse_sample_date("febbraio"), None);
        assert_eq!(parse_sample_date(""), None);
    }

    #[test]
    fn year_month_accepts_both_selector_shapes() {
        assert_eq!("2025-02".parse(), Ok(YearMonth::new(2025, 2)));
        assert_eq!("02/2025".parse(), Ok(YearMonth::new(2025, 2)));
        assert_eq!("2025-04-03".parse(), Ok(YearMonth::new(2025, 4)));
        assert_eq!("17/02/2025".parse(), Ok(YearMonth::new(2025, 2)));
        assert_eq!("2025-13".parse(), Ok(YearMonth::new(2025, 13)));
        assert!("next month".parse::<YearMonth>().is_err());
        assert_eq!(YearMonth::new(2025, 7).to_string(), "2025-07");
    }

    #[test]
    fn values_accept_decimal_comma() {
        assert_eq!(parse_value("5.25"), Some(5.25));
        assert_eq!(parse_value(" 5,25 "), Some(5.25));
        assert_eq!(parse_value("n.d."), None);
        assert_eq!(parse_value("NaN"), None);
    }

    #[test]
    fn excel_serials_round_trip() {
        assert_eq!(excel_serial_to_date(45698.0), Some(date(2025, 2, 10)));
        assert_eq!(date_to_excel_serial(date(2025, 2, 10)), 45698.0);
        assert_eq!(excel_serial_to_date(-3.0), None);
        assert_eq!(excel_serial_to_date(60.0), None);
        assert_eq!(excel_serial_to_date(59.0), None);
        assert_eq!(excel_serial_to_date(61.0), Some(date(1900, 3, 1)));
    }

    #[test]
    fn missing_columns_are_all_named() {
        let t = table(&["Componente", "valore"], vec![]);
        let err = Dataset::from_table(&t, &ColumnNames::default()).unwrap_err();
        assert_eq!(
            err,
            SchemaError::MissingColumns(vec!["data".to_string(), "quantita".to_string()])
        );
    }

    #[test]
    fn table_rows_become_records() {
        let t = table(
            &[" DATA ", "componente", "quantita", "note"],
            vec![
                vec![text("10/02/2025"), text("Fosforo"), RawValue::Number(5.0)],
                vec![RawValue::Empty, RawValue::Empty, RawValue::Empty, text("blank")],
                vec![RawValue::Date(date(2025, 2, 20)), text("fosforo"), text("7,5")],
                vec![RawValue::Number(45703.0), text("Azoto"), RawValue::Number(3.0)],
            ],
        );
        let dataset = Dataset::from_table(&t, &ColumnNames::default()).unwrap();
        assert_eq!(dataset.len(), 3);
        assert_eq!(dataset.records[1], MeasurementRecord::new("fosforo", date(2025, 2, 20), 7.5));
        assert_eq!(dataset.records[2].sampled_at, date(2025, 2, 15));
        assert_eq!(dataset.parameters(), vec!["Fosforo".to_string(), "Azoto".to_string()]);
    }

    #[test]
    fn bad_rows_report_their_sheet_row() {
        let t = table(
            &["componente", "data", "quantita"],
            vec![
                vec![text("Fosforo"), text("10/02/2025"), RawValue::Number(1.0)],
                vec![text("Fosforo"), text("02/30/2025"), RawValue::Number(1.0)],
            ],
        );
        let err = Dataset::from_table(&t, &ColumnNames::default()).unwrap_err();
        assert_eq!(
            err,
            SchemaError::InvalidDate {
                row: 3,
                value: "02/30/2025".to_string()
            }
        );

        let t = table(
            &["componente", "data", "quantita"],
            vec![vec![text("Fosforo"), text("10/02/2025"), text("n.d.")]],
        );
        assert!(matches!(
            Dataset::from_table(&t, &ColumnNames::default()),
            Err(SchemaError::InvalidValue { row: 2, .. })
        ));

        let t = table(
            &["componente", "data", "quantita"],
            vec![vec![RawValue::Empty, text("10/02/2025"), RawValue::Number(2.0)]],
        );
        assert_eq!(
            Dataset::from_table(&t, &ColumnNames::default()),
            Err(SchemaError::EmptyParameter { row: 2 })
        );
    }
}
