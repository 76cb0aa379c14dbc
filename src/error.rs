use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// A dataset does not have the shape the aggregator needs.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    #[error("missing required column(s): {}", .0.join(", "))]
    MissingColumns(Vec<String>),
    #[error("row {row}: cannot read '{value}' as a day-first date (DD/MM/YYYY)")]
    InvalidDate { row: usize, value: String },
    #[error("row {row}: cannot read '{value}' as a number")]
    InvalidValue { row: usize, value: String },
    #[error("row {row}: parameter name is empty")]
    EmptyParameter { row: usize },
}

/// Why a job has no destination cell.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("parameter '{0}' has no row in the report template")]
    Lookup(String),
    #[error("month {0} is outside 1-12")]
    Range(u32),
}

#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("dataset file not found at {path}")]
    NotFound { path: PathBuf },
    #[error("IO error reading dataset {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("CSV error in dataset {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("failed to open workbook {path}: {source}")]
    Excel {
        path: PathBuf,
        #[source]
        source: calamine::Error,
    },
    #[error("worksheet '{sheet}' not found in {path}")]
    SheetNotFound { path: PathBuf, sheet: String },
    #[error("unsupported dataset format for {path}")]
    Unsupported { path: PathBuf },
    #[error("schema error in {path}: {source}")]
    Schema {
        path: PathBuf,
        #[source]
        source: SchemaError,
    },
    #[error("failed to write dataset: {0}")]
    Write(#[from] ReportError),
}

/// Failures on the destination report. All of them abort the batch.
#[derive(Error, Debug)]
pub enum ReportError {
    #[error("report template not found at {path}")]
    TemplateNotFound { path: PathBuf },
    #[error("output {path} is the template itself; refusing to overwrite it")]
    OutputIsTemplate { path: PathBuf },
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to read workbook {path}: {source}")]
    Excel {
        path: PathBuf,
        #[source]
        source: calamine::Error,
    },
    #[error("failed to write workbook {path}: {source}")]
    Xlsx {
        path: PathBuf,
        #[source]
        source: rust_xlsxwriter::XlsxError,
    },
    #[error("failed to update workbook {path}: {source}")]
    Workbook {
        path: PathBuf,
        #[source]
        source: umya_spreadsheet::XlsxError,
    },
    #[error("CSV error on {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("row {row} of {path} is inside a multi-line CSV field")]
    MultilineRow { path: PathBuf, row: u32 },
    #[error("worksheet '{sheet}' not found in {path}")]
    SheetNotFound { path: PathBuf, sheet: String },
    #[error("cannot write {path}: only .xlsx and .csv files can be saved")]
    Unsupported { path: PathBuf },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("configuration file not found at {path}")]
    NotFound { path: PathBuf },
    #[error("IO error reading config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse JSON configuration in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
