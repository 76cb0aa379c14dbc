/*!
# Costance

Fills the monthly KPI report of a wastewater treatment plant from the
laboratory measurement spreadsheets.

## Overview

The laboratory keeps two datasets, one for the plant inflow (`ingresso`) and
one for the outflow (`uscita`). Each row is one result: a parameter name, a
sample date and a value. The KPI report is a template workbook with one row
per parameter (two for parameters measured on both streams) and one column per
month, January in column B through December in column M.

A report run takes a queue of jobs, each asking for the monthly average of one
parameter from one stream, and writes every average into a fresh copy of the
template.

## Flow

1. **Load**: the source file is read with `calamine` (xlsx, xlsm, xls, ods)
   or `csv`, headers are matched to the configured column names and every row
   becomes a [`MeasurementRecord`].
2. **Aggregate**: [`average`] filters by normalized parameter name and by
   calendar month. No matching row gives [`Average::NoData`], which is never
   written.
3. **Resolve**: the [`CellMapping`] turns parameter, stream and month into a
   cell such as `H4`.
4. **Write**: results accumulate in a [`Workbook`] whose written cells are patched
   into the copy once, through a temporary file, when the batch ends.

Unknown parameters, invalid months and unreadable datasets only affect their
own job. Failing to write the report aborts the batch and hands the job queue
back.

## Modules

- **measurement**: records, date and value parsing, dataset loading from a raw table
- **aggregator**: monthly averages
- **cell**: A1-style cell addresses
- **mapping**: parameter to row table and month to column
- **job**: streams, jobs and the job queue
- **loader**: reading and appending to dataset files
- **spreadsheet**: the report workbook
- **downloader**: patching CSV text and xlsx workbooks with the written cells
- **saving**: template copy and atomic saves
- **batch**: the batch runner
- **config**: JSON settings
- **shell**: interactive job queue
*/

pub mod aggregator;
pub mod batch;
pub mod cell;
pub mod config;
pub mod downloader;
pub mod error;
pub mod job;
pub mod loader;
pub mod mapping;
pub mod measurement;
pub mod saving;
pub mod shell;
pub mod spreadsheet;

pub use aggregator::{average, Average};
pub use batch::{run_batch, run_report, BatchFailure, BatchReport, DatasetSource, JobOutcome, JobReport};
pub use cell::CellAddress;
pub use config::{load_config, Settings};
pub use error::{ConfigError, DatasetError, ReportError, ResolveError, SchemaError};
pub use job::{AggregationJob, JobList, Source};
pub use loader::{append_measurement, load_dataset, FileDatasets};
pub use mapping::{CellMapping, RowMapping, KPI_TEMPLATE_MAPPING};
pub use measurement::{Dataset, MeasurementRecord, YearMonth};
pub use spreadsheet::{ReportSink, Workbook};
