use crate::cell::CellAddress;
use crate::spreadsheet::{CellContent, CsvLayout, Sheet};
use rust_xlsxwriter::{Format, XlsxError};
use std::collections::BTreeMap;

/// Apply cell writes to the original CSV text
///
/// Lines without a write are copied byte for byte, blank lines included.
/// A written line keeps every field it had and grows only when a write
/// lands past its last field. Writes below the end of the file add lines.
///
/// # Arguments
/// * `layout` - The file as it was read
/// * `edits` - Cells written since then
///
/// # Returns
/// * `Result<Vec<u8>, csv::Error>` - The new file content or an error
pub fn patch_csv(
    layout: &CsvLayout,
    edits: &BTreeMap<CellAddress, CellContent>,
) -> Result<Vec<u8>, csv::Error> {
    let mut by_row: BTreeMap<u32, Vec<(u16, String)>> = BTreeMap::new();
    for (cell, content) in edits {
        if cell.row > 0 && cell.col > 0 {
            by_row
                .entry(cell.row)
                .or_default()
                .push((cell.col, content.to_string()));
        }
    }

    let last_edit = by_row.keys().next_back().copied().unwrap_or(0);
    let total = (layout.lines.len() as u32).max(last_edit);
    let mut out: Vec<String> = Vec::with_capacity(total as usize);

    let mut line = 1;
    while line <= total {
        let record = layout.records.get(&line);
        match (record, by_row.get(&line)) {
            (Some(record), Some(writes)) => {
                out.push(csv_line(&record.fields, writes, layout.delimiter)?);
                line = record.last_line + 1;
            }
            (Some(record), None) => {
                let end = (record.last_line as usize).min(layout.lines.len());
                out.push(layout.lines[line as usize - 1..end].join(layout.terminator.as_str()));
                line = record.last_line + 1;
            }
            (None, Some(writes)) => {
                out.push(csv_line(&[], writes, layout.delimiter)?);
                line += 1;
            }
            (None, None) => {
                out.push(layout.lines.get(line as usize - 1).cloned().unwrap_or_default());
                line += 1;
            }
        }
    }

    let mut text = String::new();
    if layout.bom {
        text.push('\u{feff}');
    }
    text.push_str(&out.join(layout.terminator.as_str()));
    if !out.is_empty() && (layout.trailing_newline || layout.lines.is_empty()) {
        text.push_str(&layout.terminator);
    }
    Ok(text.into_bytes())
}

fn csv_line(fields: &[String], writes: &[(u16, String)], delimiter: u8) -> Result<String, csv::Error> {
    let width = writes
        .iter()
        .map(|(col, _)| *col as usize)
        .max()
        .unwrap_or(0)
        .max(fields.len());
    let mut row = fields.to_vec();
    row.resize(width, String::new());
    for (col, value) in writes {
        row[*col as usize - 1] = value.clone();
    }

    let mut writer = csv::WriterBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_writer(Vec::new());
    writer.write_record(&row)?;
    let bytes = writer
        .into_inner()
        .map_err(|e| csv::Error::from(e.into_error()))?;
    Ok(String::from_utf8_lossy(&bytes)
        .trim_end_matches(['\r', '\n'])
        .to_string())
}

/// Write cells into an already loaded xlsx workbook
///
/// Only the value of each written cell changes; its style, the other cells,
/// merged ranges and column widths are left as they are. Returns `false`
/// when the workbook has no sheet called `sheet`.
pub fn patch_xlsx(
    book: &mut umya_spreadsheet::Spreadsheet,
    sheet: &str,
    edits: &BTreeMap<CellAddress, CellContent>,
) -> bool {
    let Some(worksheet) = book.get_sheet_by_name_mut(sheet) else {
        return false;
    };
    for (cell, content) in edits {
        let target = worksheet.get_cell_mut((cell.col as u32, cell.row));
        match content {
            CellContent::Number(n) => {
                target.set_value_number(*n);
            }
            CellContent::Text(s) => {
                target.set_value_string(s.as_str());
            }
            CellContent::Bool(b) => {
                target.set_value_bool(*b);
            }
            CellContent::Date(serial) => {
                target.set_value_number(*serial);
                target
                    .get_style_mut()
                    .get_number_format_mut()
                    .set_format_code("dd/mm/yyyy");
            }
            CellContent::Formula(formula) => {
                target.set_formula(formula.trim_start_matches('='));
            }
        }
    }
    true
}

/// Convert a sheet to a new XLSX file
///
/// Used for workbooks that do not exist on disk yet, so there is no layout
/// to keep. Dates get a `dd/mm/yyyy` number format.
///
/// # Arguments
/// * `sheet` - Sheet to export
///
/// # Returns
/// * `Result<Vec<u8>, XlsxError>` - XLSX file content as bytes or an error
pub fn to_xlsx(sheet: &Sheet) -> Result<Vec<u8>, XlsxError> {
    let mut workbook = rust_xlsxwriter::Workbook::new();
    let date_format = Format::new().set_num_format("dd/mm/yyyy");

    let worksheet = workbook.add_worksheet();
    worksheet.set_name(sheet.name.as_str())?;

    for (cell, content) in &sheet.cells {
        if cell.row == 0 || cell.col == 0 {
            continue;
        }
        let (row, col) = cell.zero_based();
        match content {
            CellContent::Number(n) => {
                worksheet.write_number(row, col, *n)?;
            }
            CellContent::Text(s) => {
                worksheet.write_string(row, col, s.as_str())?;
            }
            CellContent::Bool(b) => {
                worksheet.write_boolean(row, col, *b)?;
            }
            CellContent::Date(serial) => {
                worksheet.write_number_with_format(row, col, *serial, &date_format)?;
            }
            CellContent::Formula(formula) => {
                worksheet.write_formula(row, col, formula.as_str())?;
            }
        }
    }

    workbook.save_to_buffer()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edits(cells: &[(&str, CellContent)]) -> BTreeMap<CellAddress, CellContent> {
        cells
            .iter()
            .map(|(name, content)| (name.parse().unwrap(), content.clone()))
            .collect()
    }

    fn patched(text: &str, cells: &[(&str, CellContent)]) -> String {
        let layout = CsvLayout::parse(text);
        String::from_utf8(patch_csv(&layout, &edits(cells)).unwrap()).unwrap()
    }

    #[test]
    fn untouched_lines_are_copied_verbatim() {
        let text = "KPI;Gen;Feb\n\nnote;\"q;uoted\";x\nPortata;;\n";
        assert_eq!(patched(text, &[]), text);
        assert_eq!(
            patched(text, &[("C4", CellContent::Number(6.0))]),
            "KPI;Gen;Feb\n\nnote;\"q;uoted\";x\nPortata;;6\n"
        );
    }

    #[test]
    fn written_line_keeps_its_width_or_grows() {
        assert_eq!(
            patched("a,b,c,d,e\nx,,,,\n", &[("B2", CellContent::Number(1.5))]),
            "a,b,c,d,e\nx,1.5,,,\n"
        );
        assert_eq!(
            patched("a,b\nx\n", &[("D2", CellContent::Text("y".into()))]),
            "a,b\nx,,,y\n"
        );
    }

    #[test]
    fn writes_past_the_end_add_lines() {
        assert_eq!(
            patched("a,b\r\n", &[("B3", CellContent::Date(45698.0))]),
            "a,b\r\n\r\n,10/02/2025\r\n"
        );
        assert_eq!(patched("", &[("A1", CellContent::Text("h".into()))]), "h\n");
    }

    #[test]
    fn missing_final_newline_stays_missing() {
        assert_eq!(patched("a,b\nc,d", &[("A2", CellContent::Number(1.0))]), "a,b\n1,d");
    }

    #[test]
    fn new_sheet_to_xlsx() {
        let mut sheet = Sheet::new("Dati");
        sheet.cells.insert(CellAddress::new(1, 1), CellContent::Text("data".into()));
        sheet.cells.insert(CellAddress::new(2, 1), CellContent::Date(45698.0));
        assert!(!to_xlsx(&sheet).unwrap().is_empty());
    }
}
