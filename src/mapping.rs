use crate::cell::CellAddress;
use crate::error::ResolveError;
use crate::job::Source;
use crate::measurement::{normalize_parameter, YearMonth};
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

lazy_static! {
    /// Row layout of the KPI report template.
    pub static ref KPI_TEMPLATE_MAPPING: CellMapping = CellMapping::new()
        .with("Portata", RowMapping::SingleRow(4))
        .with("Cod", RowMapping::DualRow { ingresso: 6, uscita: 7 })
        .with("Bod5", RowMapping::DualRow { ingresso: 8, uscita: 9 })
        .with("Sst", RowMapping::DualRow { ingresso: 10, uscita: 11 })
        .with("Azoto", RowMapping::DualRow { ingresso: 12, uscita: 13 })
        .with("Azoto Ammoniacale", RowMapping::DualRow { ingresso: 14, uscita: 15 })
        .with("Fosforo", RowMapping::DualRow { ingresso: 16, uscita: 17 });
}

/// Where a parameter lives in the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RowMapping {
    /// Parameters measured once for the whole plant, e.g. flow rate.
    SingleRow(u32),
    DualRow { ingresso: u32, uscita: u32 },
}

impl RowMapping {
    pub fn row_for(&self, source: Source) -> u32 {
        match (*self, source) {
            (RowMapping::SingleRow(row), _) => row,
            (RowMapping::DualRow { ingresso, .. }, Source::Ingresso) => ingresso,
            (RowMapping::DualRow { uscita, .. }, Source::Uscita) => uscita,
        }
    }
}

/// Parameter → row table. Keys are stored normalized.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CellMapping {
    rows: BTreeMap<String, RowMapping>,
}

impl CellMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, parameter: &str, mapping: RowMapping) -> Self {
        self.rows.insert(normalize_parameter(parameter), mapping);
        self
    }

    pub fn get(&self, parameter: &str) -> Option<RowMapping> {
        self.rows.get(&normalize_parameter(parameter)).copied()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, RowMapping)> + '_ {
        self.rows.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Destination cell of the monthly average of `parameter` from `source`.
    ///
    /// The month is checked first, so an invalid month is reported as
    /// [`ResolveError::Range`] even for an unknown parameter.
    ///
    /// # Examples
    /// ```
    /// use costance::job::Source;
    /// use costance::mapping::KPI_TEMPLATE_MAPPING;
    /// use costance::measurement::YearMonth;
    ///
    /// let cell = KPI_TEMPLATE_MAPPING
    ///     .resolve("Portata", Source::Ingresso, YearMonth::new(2025, 7))
    ///     .unwrap();
    /// assert_eq!(cell.to_string(), "H4");
    /// ```
    pub fn resolve(
        &self,
        parameter: &str,
        source: Source,
        month: YearMonth,
    ) -> Result<CellAddress, ResolveError> {
        let col = month_column(month.month)?;
        let mapping = self
            .get(parameter)
            .ok_or_else(|| ResolveError::Lookup(parameter.trim().to_string()))?;
        Ok(CellAddress::new(mapping.row_for(source), col))
    }
}

/// Report column of a month: January is B, December is M.
pub fn month_column(month: u32) -> Result<u16, ResolveError> {
    match month {
        1..=12 => Ok(month as u16 + 1),
        _ => Err(ResolveError::Range(month)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::col_to_letter;

    #[test]
    fn months_map_to_b_through_m() {
        let letters: Vec<String> = (1..=12)
            .map(|m| col_to_letter(month_column(m).unwrap()))
            .collect();
        assert_eq!(letters, ["B", "C", "D", "E", "F", "G", "H", "I", "J", "K", "L", "M"]);
        assert_eq!(month_column(0), Err(ResolveError::Range(0)));
        assert_eq!(month_column(13), Err(ResolveError::Range(13)));
    }

    #[test]
    fn single_row_ignores_source() {
        let m = &*KPI_TEMPLATE_MAPPING;
        let july = YearMonth::new(2025, 7);
        let a = m.resolve("Portata", Source::Ingresso, july).unwrap();
        let b = m.resolve("portata", Source::Uscita, july).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "H4");
    }

    #[test]
    fn dual_row_selects_by_source() {
        let m = &*KPI_TEMPLATE_MAPPING;
        let feb = YearMonth::new(2025, 2);
        assert_eq!(m.resolve("fosforo", Source::Ingresso, feb).unwrap().to_string(), "C16");
        assert_eq!(m.resolve("FOSFORO", Source::Uscita, feb).unwrap().to_string(), "C17");
        assert_eq!(
            m.resolve("azoto  ammoniacale", Source::Uscita, YearMonth::new(2024, 12))
                .unwrap()
                .to_string(),
            "M15"
        );
    }

    #[test]
    fn resolve_is_deterministic() {
        let m = &*KPI_TEMPLATE_MAPPING;
        let month = YearMonth::new(2025, 5);
        let first = m.resolve("Cod", Source::Uscita, month);
        for _ in 0..10 {
            assert_eq!(m.resolve("Cod", Source::Uscita, month), first);
        }
    }

    #[test]
    fn unknown_parameter_and_bad_month() {
        let m = &*KPI_TEMPLATE_MAPPING;
        assert_eq!(
            m.resolve("UnknownParam", Source::Ingresso, YearMonth::new(2025, 3)),
            Err(ResolveError::Lookup("UnknownParam".to_string()))
        );
        assert_eq!(
            m.resolve("Cod", Source::Ingresso, YearMonth::new(2025, 13)),
            Err(ResolveError::Range(13))
        );
        assert_eq!(
            m.resolve("Cod", Source::Uscita, YearMonth::new(2025, 0)),
            Err(ResolveError::Range(0))
        );
    }
}
