use crate::batch::DatasetSource;
use crate::cell::CellAddress;
use crate::error::{DatasetError, SchemaError};
use crate::job::Source;
use crate::measurement::{date_to_excel_serial, ColumnNames, Dataset, MeasurementRecord, RawTable, RawValue};
use crate::spreadsheet::{CellContent, Workbook};
use calamine::{open_workbook_auto, Data, Reader};
use log::{debug, info};
use std::path::{Path, PathBuf};

/// Spreadsheet flavours recognised from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Csv,
    Xlsx,
    /// xls, xlsm, xlsb and ods: readable, but never written back.
    ReadOnlyExcel,
}

impl FileKind {
    pub fn from_path(path: &Path) -> Option<Self> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_lowercase());

        match extension.as_deref() {
            Some("csv") => Some(FileKind::Csv),
            Some("xlsx") => Some(FileKind::Xlsx),
            Some("xlsm") | Some("xls") | Some("xlsb") | Some("ods") => Some(FileKind::ReadOnlyExcel),
            _ => None,
        }
    }

    pub fn is_writable(self) -> bool {
        !matches!(self, FileKind::ReadOnlyExcel)
    }
}

/// Picks `;` when the first non-blank line has more semicolons than commas,
/// as in CSV exported by an Italian-locale Excel.
pub fn sniff_delimiter(content: &str) -> u8 {
    let first_line = content
        .lines()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("");
    let semicolons = first_line.matches(';').count();
    let commas = first_line.matches(',').count();
    if semicolons > commas { b';' } else { b',' }
}

/// Read the header row and data rows of a dataset file
///
/// For CSV files the first line holds the headers. For workbooks the first
/// non-empty row of `sheet` (or of the first sheet) holds them.
///
/// # Arguments
/// * `path` - Dataset file (.csv, .xlsx, .xlsm, .xls, .xlsb, .ods)
/// * `sheet` - Worksheet name, ignored for CSV
///
/// # Returns
/// * `Result<RawTable, DatasetError>` - The uninterpreted table or an error
pub fn read_table(path: &Path, sheet: Option<&str>) -> Result<RawTable, DatasetError> {
    if !path.exists() {
        return Err(DatasetError::NotFound {
            path: path.to_path_buf(),
        });
    }
    match FileKind::from_path(path) {
        Some(FileKind::Csv) => read_csv_table(path),
        Some(_) => read_excel_table(path, sheet),
        None => Err(DatasetError::Unsupported {
            path: path.to_path_buf(),
        }),
    }
}

fn read_csv_table(path: &Path) -> Result<RawTable, DatasetError> {
    let content = std::fs::read_to_string(path).map_err(|source| DatasetError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let content = content.trim_start_matches('\u{feff}');
    let csv_err = |source| DatasetError::Csv {
        path: path.to_path_buf(),
        source,
    };

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .delimiter(sniff_delimiter(content))
        .from_reader(content.as_bytes());

    let headers = reader
        .headers()
        .map_err(csv_err)?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(csv_err)?;
        rows.push(
            record
                .iter()
                .map(|field| {
                    if field.trim().is_empty() {
                        RawValue::Empty
                    } else {
                        RawValue::Text(field.to_string())
                    }
                })
                .collect(),
        );
    }

    Ok(RawTable {
        headers,
        rows,
        header_row: 1,
        first_column: 1,
    })
}

fn read_excel_table(path: &Path, sheet: Option<&str>) -> Result<RawTable, DatasetError> {
    let mut workbook = open_workbook_auto(path).map_err(|source| DatasetError::Excel {
        path: path.to_path_buf(),
        source,
    })?;

    let names = workbook.sheet_names();
    let name = match sheet {
        Some(wanted) => names.iter().find(|n| n.as_str() == wanted).cloned(),
        None => names.first().cloned(),
    }
    .ok_or_else(|| DatasetError::SheetNotFound {
        path: path.to_path_buf(),
        sheet: sheet.unwrap_or("<first>").to_string(),
    })?;

    let range = workbook
        .worksheet_range(&name)
        .map_err(|source| DatasetError::Excel {
            path: path.to_path_buf(),
            source,
        })?;

    let Some((row0, col0)) = range.start() else {
        debug!("sheet '{}' of {} is empty", name, path.display());
        return Ok(RawTable {
            header_row: 1,
            first_column: 1,
            ..RawTable::default()
        });
    };

    let mut rows = range
        .rows()
        .enumerate()
        .skip_while(|(_, row)| row.iter().all(|d| raw_value(d).is_empty()));

    let Some((header_idx, header)) = rows.next() else {
        return Ok(RawTable {
            header_row: row0 as usize + 1,
            first_column: col0 as u16 + 1,
            ..RawTable::default()
        });
    };

    Ok(RawTable {
        headers: header.iter().map(|d| raw_value(d).to_string().trim().to_string()).collect(),
        rows: rows.map(|(_, row)| row.iter().map(raw_value).collect()).collect(),
        header_row: row0 as usize + header_idx + 1,
        first_column: col0 as u16 + 1,
    })
}

fn raw_value(data: &Data) -> RawValue {
    match data {
        Data::Empty => RawValue::Empty,
        Data::String(s) if s.trim().is_empty() => RawValue::Empty,
        Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => RawValue::Text(s.clone()),
        Data::Int(i) => RawValue::Number(*i as f64),
        Data::Float(f) => RawValue::Number(*f),
        Data::Bool(b) => RawValue::Text(b.to_string()),
        Data::DateTime(dt) => match dt.as_datetime() {
            Some(datetime) => RawValue::Date(datetime.date()),
            None => RawValue::Number(dt.as_f64()),
        },
        Data::Error(e) => RawValue::Text(format!("#{:?}", e)),
    }
}

/// Load the measurements of one dataset file
///
/// # Arguments
/// * `path` - Dataset file
/// * `columns` - Header names of the parameter, date and value columns
/// * `sheet` - Worksheet name, `None` for the first one
///
/// # Returns
/// * `Result<Dataset, DatasetError>` - The records in file order, or a
///   schema/IO error naming the file
///
/// # Examples
/// ```no_run
/// use std::path::Path;
/// use costance::loader::load_dataset;
/// use costance::measurement::ColumnNames;
///
/// match load_dataset(Path::new("Dati_Ingresso.xlsx"), &ColumnNames::default(), None) {
///     Ok(dataset) => println!("{} measurements", dataset.len()),
///     Err(e) => eprintln!("Error loading dataset: {}", e),
/// }
/// ```
pub fn load_dataset(
    path: &Path,
    columns: &ColumnNames,
    sheet: Option<&str>,
) -> Result<Dataset, DatasetError> {
    let table = read_table(path, sheet)?;
    let dataset = Dataset::from_table(&table, columns).map_err(|source| DatasetError::Schema {
        path: path.to_path_buf(),
        source,
    })?;
    info!("loaded {} measurement(s) from {}", dataset.len(), path.display());
    Ok(dataset)
}

/// Append one measurement to a dataset file
///
/// The record lands on the row after the last used row, in the columns
/// named by `columns`. A file that does not exist yet is created with a
/// `date, parameter, value` header row. CSV and XLSX files can be appended
/// to; other workbook formats are rejected.
pub fn append_measurement(
    path: &Path,
    columns: &ColumnNames,
    sheet: Option<&str>,
    record: &MeasurementRecord,
) -> Result<(), DatasetError> {
    if !FileKind::from_path(path).is_some_and(FileKind::is_writable) {
        return Err(DatasetError::Unsupported {
            path: path.to_path_buf(),
        });
    }

    let parameter = record.parameter.trim();

    if !path.exists() {
        if parameter.is_empty() {
            return Err(schema_error(path, SchemaError::EmptyParameter { row: 2 }));
        }
        let mut book = Workbook::create(path, sheet.unwrap_or("Sheet1"))?;
        book.set(CellAddress::new(1, 1), CellContent::Text(columns.date.clone()));
        book.set(CellAddress::new(1, 2), CellContent::Text(columns.parameter.clone()));
        book.set(CellAddress::new(1, 3), CellContent::Text(columns.value.clone()));
        write_record(&mut book, 2, [1, 2, 3], parameter, record);
        book.save()?;
        info!("created {} with its first measurement", path.display());
        return Ok(());
    }

    let table = read_table(path, sheet)?;
    let lookup = |name: &str| table.column_index(name).ok_or_else(|| name.to_string());
    let indexes = match (lookup(&columns.date), lookup(&columns.parameter), lookup(&columns.value)) {
        (Ok(d), Ok(p), Ok(v)) => [d, p, v],
        (d, p, v) => {
            let missing = [p, d, v].into_iter().filter_map(Result::err).collect();
            return Err(schema_error(path, SchemaError::MissingColumns(missing)));
        }
    };

    let mut book = Workbook::open(path, sheet)?;
    let row = book.active_sheet().last_row().max(table.header_row as u32) + 1;
    if parameter.is_empty() {
        return Err(schema_error(path, SchemaError::EmptyParameter { row: row as usize }));
    }
    let cols = indexes.map(|i| table.first_column + i as u16);
    write_record(&mut book, row, cols, parameter, record);
    book.save()?;

    info!(
        "appended {} = {} ({}) to {} at row {}",
        parameter,
        record.value,
        record.sampled_at.format("%d/%m/%Y"),
        path.display(),
        row
    );
    Ok(())
}

fn write_record(book: &mut Workbook, row: u32, [date_col, parameter_col, value_col]: [u16; 3], parameter: &str, record: &MeasurementRecord) {
    book.set(
        CellAddress::new(row, date_col),
        CellContent::Date(date_to_excel_serial(record.sampled_at)),
    );
    book.set(CellAddress::new(row, parameter_col), CellContent::Text(parameter.to_string()));
    book.set(CellAddress::new(row, value_col), CellContent::Number(record.value));
}

fn schema_error(path: &Path, source: SchemaError) -> DatasetError {
    DatasetError::Schema {
        path: path.to_path_buf(),
        source,
    }
}

/// The two source files, re-read on every request.
#[derive(Debug, Clone, PartialEq)]
pub struct FileDatasets {
    pub ingresso: PathBuf,
    pub uscita: PathBuf,
    pub columns: ColumnNames,
    pub sheet: Option<String>,
}

impl FileDatasets {
    pub fn path(&self, source: Source) -> &Path {
        match source {
            Source::Ingresso => &self.ingresso,
            Source::Uscita => &self.uscita,
        }
    }
}

impl DatasetSource for FileDatasets {
    fn load(&self, source: Source) -> Result<Dataset, DatasetError> {
        load_dataset(self.path(source), &self.columns, self.sheet.as_deref())
    }
}
