use crate::error::ConfigError;
use crate::loader::FileDatasets;
use crate::mapping::{CellMapping, RowMapping, KPI_TEMPLATE_MAPPING};
use crate::measurement::{normalize_parameter, ColumnNames};
use crate::saving::default_output_path;
use chrono::NaiveDateTime;
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = "costance.json";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SourcePaths {
    pub ingresso: PathBuf,
    pub uscita: PathBuf,
}

/// One row of a custom cell map: either `row`, or both `ingresso` and `uscita`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MappingEntry {
    pub parameter: String,
    #[serde(default)]
    pub row: Option<u32>,
    #[serde(default)]
    pub ingresso: Option<u32>,
    #[serde(default)]
    pub uscita: Option<u32>,
}

impl MappingEntry {
    fn row_mapping(&self) -> Result<RowMapping, ConfigError> {
        let mapping = match (self.row, self.ingresso, self.uscita) {
            (Some(row), None, None) => RowMapping::SingleRow(row),
            (None, Some(ingresso), Some(uscita)) => RowMapping::DualRow { ingresso, uscita },
            _ => {
                return Err(ConfigError::Invalid(format!(
                    "cell_map entry '{}' needs either \"row\" or both \"ingresso\" and \"uscita\"",
                    self.parameter
                )));
            }
        };
        let zero = match mapping {
            RowMapping::SingleRow(row) => row == 0,
            RowMapping::DualRow { ingresso, uscita } => ingresso == 0 || uscita == 0,
        };
        if zero {
            return Err(ConfigError::Invalid(format!(
                "cell_map entry '{}': rows start at 1",
                self.parameter
            )));
        }
        Ok(mapping)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Settings {
    pub template: PathBuf,
    #[serde(default)]
    pub output: Option<PathBuf>,
    #[serde(default)]
    pub report_sheet: Option<String>,
    pub sources: SourcePaths,
    #[serde(default)]
    pub source_sheet: Option<String>,
    #[serde(default)]
    pub columns: ColumnNames,
    #[serde(default)]
    pub cell_map: Option<Vec<MappingEntry>>,
}

impl Settings {
    /// The configured cell map, or the KPI template layout when none is given.
    pub fn mapping(&self) -> Result<CellMapping, ConfigError> {
        let Some(entries) = &self.cell_map else {
            return Ok(KPI_TEMPLATE_MAPPING.clone());
        };
        if entries.is_empty() {
            return Err(ConfigError::Invalid("cell_map is empty".to_string()));
        }

        let mut seen = HashSet::new();
        let mut mapping = CellMapping::new();
        for entry in entries {
            let name = normalize_parameter(&entry.parameter);
            if name.is_empty() {
                return Err(ConfigError::Invalid(
                    "cell_map entry with an empty parameter name".to_string(),
                ));
            }
            if !seen.insert(name.clone()) {
                return Err(ConfigError::Invalid(format!(
                    "parameter '{}' appears twice in cell_map",
                    name
                )));
            }
            mapping = mapping.with(&name, entry.row_mapping()?);
        }
        Ok(mapping)
    }

    pub fn datasets(&self) -> FileDatasets {
        FileDatasets {
            ingresso: self.sources.ingresso.clone(),
            uscita: self.sources.uscita.clone(),
            columns: self.columns.clone(),
            sheet: self.source_sheet.clone(),
        }
    }

    /// Configured output, or a timestamped copy name next to the template.
    pub fn output_path(&self, now: NaiveDateTime) -> PathBuf {
        self.output
            .clone()
            .unwrap_or_else(|| default_output_path(&self.template, now))
    }

    fn resolve_relative_to(&mut self, base: &Path) {
        let join = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        join(&mut self.template);
        join(&mut self.sources.ingresso);
        join(&mut self.sources.uscita);
        if let Some(output) = self.output.as_mut() {
            join(output);
        }
    }
}

/// Load the settings file
///
/// Relative paths inside the file are taken relative to the file's own
/// directory. The cell map is validated here so that a bad entry is reported
/// before any report is touched.
///
/// # Arguments
/// * `path` - JSON settings file
///
/// # Returns
/// * `Result<Settings, ConfigError>` - The settings or an error
pub fn load_config(path: &Path) -> Result<Settings, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound {
            path: path.to_path_buf(),
        });
    }
    let file = File::open(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut settings: Settings =
        serde_json::from_reader(BufReader::new(file)).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })?;

    if let Some(base) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        settings.resolve_relative_to(base);
    }
    settings.mapping()?;

    info!("loaded configuration from {}", path.display());
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::Source;
    use crate::measurement::YearMonth;
    use std::fs;
    use tempfile::tempdir;

    fn write_config(dir: &Path, json: &str) -> PathBuf {
        let path = dir.join("costance.json");
        fs::write(&path, json).unwrap();
        path
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = write_config(
            dir.path(),
            r#"{
                "template": "KPI_template.xlsx",
                "sources": { "ingresso": "in.xlsx", "uscita": "/data/out.csv" }
            }"#,
        );
        let settings = load_config(&path).unwrap();

        assert_eq!(settings.template, dir.path().join("KPI_template.xlsx"));
        assert_eq!(settings.sources.ingresso, dir.path().join("in.xlsx"));
        assert_eq!(settings.sources.uscita, PathBuf::from("/data/out.csv"));
        assert_eq!(settings.columns, ColumnNames::default());
        assert_eq!(settings.mapping().unwrap(), *KPI_TEMPLATE_MAPPING);
        assert!(settings.output.is_none());
    }

    #[test]
    fn custom_cell_map_replaces_the_default() {
        let dir = tempdir().unwrap();
        let path = write_config(
            dir.path(),
            r#"{
                "template": "t.csv",
                "output": "out/r.csv",
                "sources": { "ingresso": "i.csv", "uscita": "u.csv" },
                "columns": { "parameter": "parametro" },
                "cell_map": [
                    { "parameter": "pH", "ingresso": 20, "uscita": 21 },
                    { "parameter": "portata", "row": 3 }
                ]
            }"#,
        );
        let settings = load_config(&path).unwrap();
        assert_eq!(settings.columns.parameter, "parametro");
        assert_eq!(settings.columns.date, "data");
        assert_eq!(settings.output, Some(dir.path().join("out/r.csv")));

        let mapping = settings.mapping().unwrap();
        assert_eq!(mapping.len(), 2);
        let march = YearMonth::new(2025, 3);
        assert_eq!(mapping.resolve("PH", Source::Uscita, march).unwrap().to_string(), "D21");
        assert_eq!(mapping.resolve("Portata", Source::Uscita, march).unwrap().to_string(), "D3");
        assert!(mapping.resolve("Cod", Source::Uscita, march).is_err());
    }

    #[test]
    fn invalid_cell_maps_are_rejected() {
        let dir = tempdir().unwrap();
        for cell_map in [
            r#"[{ "parameter": "Cod", "ingresso": 6 }]"#,
            r#"[{ "parameter": "Cod", "row": 4, "uscita": 6 }]"#,
            r#"[{ "parameter": "Cod", "row": 0 }]"#,
            r#"[{ "parameter": "Cod", "row": 4 }, { "parameter": "COD", "row": 5 }]"#,
            r#"[]"#,
        ] {
            let json = format!(
                r#"{{ "template": "t.xlsx", "sources": {{ "ingresso": "i", "uscita": "u" }}, "cell_map": {} }}"#,
                cell_map
            );
            let path = write_config(dir.path(), &json);
            assert!(
                matches!(load_config(&path), Err(ConfigError::Invalid(_))),
                "accepted {}",
                cell_map
            );
        }
    }

    #[test]
    fn missing_and_malformed_files() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            load_config(&dir.path().join("none.json")),
            Err(ConfigError::NotFound { .. })
        ));
        let path = write_config(dir.path(), "{ \"template\": ");
        assert!(matches!(load_config(&path), Err(ConfigError::Json { .. })));
    }
}
