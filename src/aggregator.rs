use crate::error::SchemaError;
use crate::measurement::{normalize_parameter, ColumnNames, Dataset, MeasurementRecord, RawTable, YearMonth};
use std::fmt;

/// Result of a monthly aggregation. `NoData` means nothing matched, which is
/// not the same thing as a mean of zero.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Average {
    Value { mean: f64, samples: usize },
    NoData,
}

impl Average {
    pub fn value(&self) -> Option<f64> {
        match self {
            Average::Value { mean, .. } => Some(*mean),
            Average::NoData => None,
        }
    }

    pub fn is_no_data(&self) -> bool {
        matches!(self, Average::NoData)
    }
}

impl fmt::Display for Average {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Average::Value { mean, samples } => write!(f, "{} ({} samples)", mean, samples),
            Average::NoData => write!(f, "no data"),
        }
    }
}

/// Mean of the values recorded for `parameter` during `month`.
///
/// Parameter names are compared after title-case normalization, so
/// `"fosforo"` matches rows stored as `"Fosforo"`. Only year and month of
/// the sample date are compared.
///
/// # Examples
/// ```
/// use chrono::NaiveDate;
/// use costance::aggregator::{average, Average};
/// use costance::measurement::{MeasurementRecord, YearMonth};
///
/// let day = |d| NaiveDate::from_ymd_opt(2025, 2, d).unwrap();
/// let records = vec![
///     MeasurementRecord::new("Fosforo", day(10), 5.0),
///     MeasurementRecord::new("Fosforo", day(20), 7.0),
///     MeasurementRecord::new("Azoto", day(15), 3.0),
/// ];
/// assert_eq!(average(&records, "fosforo", YearMonth::new(2025, 2)).value(), Some(6.0));
/// assert_eq!(average(&records, "Fosforo", YearMonth::new(2025, 3)), Average::NoData);
/// ```
pub fn average(dataset: &[MeasurementRecord], parameter: &str, month: YearMonth) -> Average {
    let wanted = normalize_parameter(parameter);
    let (sum, samples) = dataset
        .iter()
        .filter(|r| month.contains(r.sampled_at) && normalize_parameter(&r.parameter) == wanted)
        .fold((0.0_f64, 0_usize), |(sum, n), r| (sum + r.value, n + 1));

    if samples == 0 {
        Average::NoData
    } else {
        Average::Value {
            mean: sum / samples as f64,
            samples,
        }
    }
}

/// Same as [`average`], starting from an uninterpreted table.
pub fn average_table(
    table: &RawTable,
    columns: &ColumnNames,
    parameter: &str,
    month: YearMonth,
) -> Result<Average, SchemaError> {
    let dataset = Dataset::from_table(table, columns)?;
    Ok(average(&dataset.records, parameter, month))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::RawValue;
    use chrono::NaiveDate;

    fn record(parameter: &str, date: &str, value: f64) -> MeasurementRecord {
        MeasurementRecord::new(parameter, NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(), value)
    }

    fn sample() -> Vec<MeasurementRecord> {
        vec![
            record("Fosforo", "2025-02-10", 5.0),
            record("Fosforo", "2025-02-20", 7.0),
            record("Azoto", "2025-02-15", 3.0),
        ]
    }

    #[test]
    fn mean_of_matching_month_and_parameter() {
        let avg = average(&sample(), "fosforo", YearMonth::new(2025, 2));
        assert_eq!(avg, Average::Value { mean: 6.0, samples: 2 });
    }

    #[test]
    fn other_month_has_no_data() {
        assert_eq!(average(&sample(), "Fosforo", YearMonth::new(2025, 3)), Average::NoData);
    }

    #[test]
    fn absent_parameter_has_no_data_in_every_month() {
        let data = sample();
        for month in 1..=12 {
            assert!(average(&data, "Cod", YearMonth::new(2025, month)).is_no_data());
        }
    }

    #[test]
    fn same_month_other_year_is_excluded() {
        let mut data = sample();
        data.push(record("Fosforo", "2024-02-11", 100.0));
        data.push(record("Fosforo", "2025-01-31", 100.0));
        data.push(record("Fosforo", "2025-03-01", 100.0));
        assert_eq!(average(&data, "FOSFORO", YearMonth::new(2025, 2)).value(), Some(6.0));
    }

    #[test]
    fn zero_mean_is_a_value() {
        let data = vec![record("Portata", "2025-07-01", 0.0), record("Portata", "2025-07-31", 0.0)];
        assert_eq!(
            average(&data, "portata", YearMonth::new(2025, 7)),
            Average::Value { mean: 0.0, samples: 2 }
        );
    }

    #[test]
    fn table_average_surfaces_schema_errors() {
        let table = RawTable {
            headers: vec!["componente".into(), "quantita".into()],
            rows: vec![vec![RawValue::Text("Fosforo".into()), RawValue::Number(1.0)]],
            header_row: 1,
            first_column: 1,
        };
        let err = average_table(&table, &ColumnNames::default(), "Fosforo", YearMonth::new(2025, 2));
        assert_eq!(err, Err(SchemaError::MissingColumns(vec!["data".into()])));
    }
}
