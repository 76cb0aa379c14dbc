use crate::cell::CellAddress;
use crate::downloader;
use crate::error::ReportError;
use crate::loader::{sniff_delimiter, FileKind};
use crate::measurement::excel_serial_to_date;
use crate::saving;
use calamine::{open_workbook_auto, Data, Reader};
use log::debug;
use std::collections::BTreeMap;
use std::fmt;
use std::io::Cursor;
use std::path::{Path, PathBuf};

/// Anything batch results can be written into. The workbook is the real
/// implementation; the trait lets the batch runner be driven without files.
pub trait ReportSink {
    fn write_value(&mut self, cell: CellAddress, value: f64) -> Result<(), ReportError>;
    fn save(&mut self) -> Result<(), ReportError>;
}

#[derive(Clone, Debug, PartialEq)]
pub enum CellContent {
    Number(f64),
    Text(String),
    Bool(bool),
    /// Excel serial day number, written back with a date format.
    Date(f64),
    Formula(String),
}

impl CellContent {
    fn from_data(data: &Data) -> Option<Self> {
        match data {
            Data::Empty => None,
            Data::String(s) if s.is_empty() => None,
            Data::String(s) => Some(CellContent::Text(s.clone())),
            Data::Int(i) => Some(CellContent::Number(*i as f64)),
            Data::Float(f) => Some(CellContent::Number(*f)),
            Data::Bool(b) => Some(CellContent::Bool(*b)),
            Data::DateTime(dt) => Some(CellContent::Date(dt.as_f64())),
            Data::DateTimeIso(s) | Data::DurationIso(s) => Some(CellContent::Text(s.clone())),
            Data::Error(e) => Some(CellContent::Text(format!("#{:?}", e))),
        }
    }
}

impl fmt::Display for CellContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellContent::Number(n) => write!(f, "{}", n),
            CellContent::Text(s) => f.write_str(s),
            CellContent::Bool(true) => f.write_str("TRUE"),
            CellContent::Bool(false) => f.write_str("FALSE"),
            CellContent::Date(serial) => match excel_serial_to_date(*serial) {
                Some(date) => write!(f, "{}", date.format("%d/%m/%Y")),
                None => write!(f, "{}", serial),
            },
            CellContent::Formula(formula) => write!(f, "={}", formula.trim_start_matches('=')),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Sheet {
    pub name: String,
    pub cells: BTreeMap<CellAddress, CellContent>,
}

impl Sheet {
    pub fn new(name: impl Into<String>) -> Self {
        Sheet {
            name: name.into(),
            cells: BTreeMap::new(),
        }
    }

    pub fn last_row(&self) -> u32 {
        self.cells.keys().map(|c| c.row).max().unwrap_or(0)
    }

    pub fn last_col(&self) -> u16 {
        self.cells.keys().map(|c| c.col).max().unwrap_or(0)
    }
}

/// A CSV file as it was read: its physical lines, and where each record
/// starts and ends. Saving rewrites only the lines that received writes.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CsvLayout {
    /// Physical lines without their terminators.
    pub lines: Vec<String>,
    /// Records keyed by the 1-based line they start on.
    pub records: BTreeMap<u32, CsvRecord>,
    pub delimiter: u8,
    pub terminator: String,
    pub trailing_newline: bool,
    pub bom: bool,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct CsvRecord {
    /// Last physical line of the record; differs from the first only when a
    /// quoted field spans lines.
    pub last_line: u32,
    pub fields: Vec<String>,
}

impl CsvLayout {
    /// Splits `content` into lines and records. Content the CSV reader
    /// rejects ends the record list early; those lines are still kept.
    pub fn parse(content: &str) -> Self {
        let bom = content.starts_with('\u{feff}');
        let content = content.trim_start_matches('\u{feff}');
        let trailing_newline = content.ends_with('\n');
        let terminator = if content.contains("\r\n") { "\r\n" } else { "\n" };

        let mut lines: Vec<String> = if content.is_empty() {
            Vec::new()
        } else {
            content
                .split('\n')
                .map(|l| l.strip_suffix('\r').unwrap_or(l).to_string())
                .collect()
        };
        if trailing_newline {
            lines.pop();
        }

        let delimiter = sniff_delimiter(content);
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .delimiter(delimiter)
            .from_reader(content.as_bytes());

        let mut records = BTreeMap::new();
        let mut record = csv::StringRecord::new();
        loop {
            match reader.read_record(&mut record) {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    debug!("csv reading stopped early: {}", e);
                    break;
                }
            }
            let Some(start) = record.position().map(|p| p.byte() as usize) else {
                continue;
            };
            let end = (reader.position().byte() as usize).min(content.len());
            let first_line = line_of(content, start);
            let raw = content.get(start..end).unwrap_or("").trim_end_matches(['\r', '\n']);
            records.insert(
                first_line,
                CsvRecord {
                    last_line: first_line + raw.matches('\n').count() as u32,
                    fields: record.iter().map(str::to_string).collect(),
                },
            );
        }

        CsvLayout {
            lines,
            records,
            delimiter,
            terminator: terminator.to_string(),
            trailing_newline,
            bom,
        }
    }

    /// Cells of every non-empty field, addressed by physical line.
    fn sheet(&self, name: &str) -> Sheet {
        let mut sheet = Sheet::new(name);
        for (line, record) in &self.records {
            for (c, field) in record.fields.iter().enumerate() {
                if !field.is_empty() {
                    let cell = CellAddress::new(*line, c as u16 + 1);
                    sheet.cells.insert(cell, CellContent::Text(field.clone()));
                }
            }
        }
        sheet
    }

    /// Whether `row` is a continuation line of a multi-line record.
    fn continues_record(&self, row: u32) -> bool {
        self.records
            .range(..row)
            .next_back()
            .is_some_and(|(_, record)| record.last_line >= row)
    }
}

fn line_of(content: &str, byte: usize) -> u32 {
    let byte = byte.min(content.len());
    content.as_bytes()[..byte].iter().filter(|b| **b == b'\n').count() as u32 + 1
}

#[derive(Clone, Debug)]
enum Backing {
    Csv(CsvLayout),
    /// An xlsx file on disk, edited in place on save.
    Xlsx,
    /// An xlsx file that does not exist yet.
    NewXlsx,
    ReadOnly,
}

/// A workbook file opened for cell writes.
///
/// Every sheet is read up front so cells can be looked up. Writes are kept
/// aside and only reach the file when [`Workbook::save`] replaces it in one
/// go; everything that was not written stays as it was in the file.
#[derive(Clone, Debug)]
pub struct Workbook {
    path: PathBuf,
    backing: Backing,
    sheets: Vec<Sheet>,
    active: usize,
    edits: BTreeMap<CellAddress, CellContent>,
}

impl Workbook {
    /// Starts an empty workbook that will be saved to `path`.
    pub fn create(path: impl AsRef<Path>, sheet_name: &str) -> Result<Self, ReportError> {
        let path = path.as_ref().to_path_buf();
        let backing = match FileKind::from_path(&path) {
            Some(FileKind::Csv) => Backing::Csv(CsvLayout {
                delimiter: b',',
                terminator: "\n".to_string(),
                ..CsvLayout::default()
            }),
            Some(FileKind::Xlsx) => Backing::NewXlsx,
            _ => return Err(ReportError::Unsupported { path }),
        };
        Ok(Workbook {
            path,
            backing,
            sheets: vec![Sheet::new(sheet_name)],
            active: 0,
            edits: BTreeMap::new(),
        })
    }

    /// Reads every sheet of `path`. Writes go to `sheet`, or to the first
    /// sheet when `None`.
    pub fn open(path: impl AsRef<Path>, sheet: Option<&str>) -> Result<Self, ReportError> {
        let path = path.as_ref().to_path_buf();
        let kind = FileKind::from_path(&path).ok_or_else(|| ReportError::Unsupported {
            path: path.clone(),
        })?;

        let (sheets, backing) = match kind {
            FileKind::Csv => {
                let content = std::fs::read_to_string(&path).map_err(|source| ReportError::Io {
                    path: path.clone(),
                    source,
                })?;
                let layout = CsvLayout::parse(&content);
                let name = path.file_stem().and_then(|s| s.to_str()).unwrap_or("Sheet1");
                (vec![layout.sheet(name)], Backing::Csv(layout))
            }
            FileKind::Xlsx => (read_excel_sheets(&path)?, Backing::Xlsx),
            FileKind::ReadOnlyExcel => (read_excel_sheets(&path)?, Backing::ReadOnly),
        };

        let active = match sheet {
            Some(name) => sheets
                .iter()
                .position(|s| s.name == name)
                .ok_or_else(|| ReportError::SheetNotFound {
                    path: path.clone(),
                    sheet: name.to_string(),
                })?,
            None if sheets.is_empty() => {
                return Err(ReportError::SheetNotFound {
                    path,
                    sheet: "<first>".to_string(),
                });
            }
            None => 0,
        };

        debug!(
            "opened {} with {} sheet(s), writing to '{}'",
            path.display(),
            sheets.len(),
            sheets[active].name
        );

        Ok(Workbook {
            path,
            backing,
            sheets,
            active,
            edits: BTreeMap::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn sheets(&self) -> &[Sheet] {
        &self.sheets
    }

    pub fn active_sheet(&self) -> &Sheet {
        &self.sheets[self.active]
    }

    pub fn get(&self, cell: CellAddress) -> Option<&CellContent> {
        self.active_sheet().cells.get(&cell)
    }

    pub fn set(&mut self, cell: CellAddress, content: CellContent) {
        self.sheets[self.active].cells.insert(cell, content.clone());
        self.edits.insert(cell, content);
    }

    /// Replaces the file on disk with the original plus every write.
    pub fn save(&self) -> Result<(), ReportError> {
        match &self.backing {
            Backing::Csv(layout) => {
                if let Some(cell) = self.edits.keys().find(|c| layout.continues_record(c.row)) {
                    return Err(ReportError::MultilineRow {
                        path: self.path.clone(),
                        row: cell.row,
                    });
                }
                let bytes = downloader::patch_csv(layout, &self.edits).map_err(|source| {
                    ReportError::Csv {
                        path: self.path.clone(),
                        source,
                    }
                })?;
                saving::write_atomically(&self.path, &bytes)
            }
            Backing::Xlsx => {
                let workbook_err = |source| ReportError::Workbook {
                    path: self.path.clone(),
                    source,
                };
                let mut book =
                    umya_spreadsheet::reader::xlsx::read(&self.path).map_err(workbook_err)?;
                let sheet = &self.active_sheet().name;
                if !downloader::patch_xlsx(&mut book, sheet, &self.edits) {
                    return Err(ReportError::SheetNotFound {
                        path: self.path.clone(),
                        sheet: sheet.clone(),
                    });
                }
                let mut buffer = Cursor::new(Vec::new());
                umya_spreadsheet::writer::xlsx::write_writer(&book, &mut buffer).map_err(workbook_err)?;
                saving::write_atomically(&self.path, buffer.get_ref())
            }
            Backing::NewXlsx => {
                let bytes = downloader::to_xlsx(self.active_sheet()).map_err(|source| {
                    ReportError::Xlsx {
                        path: self.path.clone(),
                        source,
                    }
                })?;
                saving::write_atomically(&self.path, &bytes)
            }
            Backing::ReadOnly => Err(ReportError::Unsupported {
                path: self.path.clone(),
            }),
        }
    }
}

impl ReportSink for Workbook {
    fn write_value(&mut self, cell: CellAddress, value: f64) -> Result<(), ReportError> {
        self.set(cell, CellContent::Number(value));
        Ok(())
    }

    fn save(&mut self) -> Result<(), ReportError> {
        Workbook::save(self)
    }
}

fn read_excel_sheets(path: &Path) -> Result<Vec<Sheet>, ReportError> {
    let excel_err = |source| ReportError::Excel {
        path: path.to_path_buf(),
        source,
    };
    let mut workbook = open_workbook_auto(path).map_err(excel_err)?;
    let names = workbook.sheet_names().to_owned();

    let mut sheets = Vec::with_capacity(names.len());
    for name in names {
        let mut sheet = Sheet::new(name.as_str());

        let range = workbook.worksheet_range(&name).map_err(excel_err)?;
        if let Some((row0, col0)) = range.start() {
            for (r, c, data) in range.cells() {
                if let Some(content) = CellContent::from_data(data) {
                    let cell = CellAddress::new(row0 + r as u32 + 1, (col0 as usize + c + 1) as u16);
                    sheet.cells.insert(cell, content);
                }
            }
        }

        // Not every format exposes formulas; values are enough then.
        if let Ok(formulas) = workbook.worksheet_formula(&name) {
            if let Some((row0, col0)) = formulas.start() {
                for (r, c, formula) in formulas.cells() {
                    if !formula.is_empty() {
                        let cell = CellAddress::new(row0 + r as u32 + 1, (col0 as usize + c + 1) as u16);
                        sheet.cells.insert(cell, CellContent::Formula(formula.clone()));
                    }
                }
            }
        }

        sheets.push(sheet);
    }
    Ok(sheets)
}
