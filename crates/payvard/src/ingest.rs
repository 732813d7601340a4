use std::io::Cursor;

use calamine::{Data, Reader, open_workbook_auto_from_rs};
use payvar_core::Table;
use thiserror::Error;

pub const MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const OLE_MAGIC: &[u8] = b"\xD0\xCF\x11\xE0";

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("upload body is empty")]
    Empty,
    #[error("failed to read workbook: {0}")]
    Workbook(#[from] calamine::Error),
    #[error("workbook has no worksheets")]
    NoSheet,
    #[error("upload has no header row")]
    MissingHeader,
    #[error("upload has a header row but no data rows")]
    NoRows,
    #[error("upload is larger than {} bytes", MAX_UPLOAD_BYTES)]
    TooLarge,
    #[error("failed to read CSV: {0}")]
    Csv(#[from] csv::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadKind {
    Workbook,
    Csv,
}

impl UploadKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Workbook => "workbook",
            Self::Csv => "csv",
        }
    }

    /// `.xlsx` files are ZIP archives and `.xls` files OLE containers;
    /// anything else is read as CSV.
    pub fn detect(body: &[u8]) -> Self {
        if body.starts_with(ZIP_MAGIC) || body.starts_with(OLE_MAGIC) {
            Self::Workbook
        } else {
            Self::Csv
        }
    }
}

/// Decodes an uploaded spreadsheet (`.xlsx`/`.xls`/`.ods` or CSV) into
/// headers plus string cells.
pub fn decode_upload(body: &[u8]) -> Result<Table, IngestError> {
    if body.len() > MAX_UPLOAD_BYTES {
        return Err(IngestError::TooLarge);
    }

    let kind = UploadKind::detect(body);
    let table = match kind {
        UploadKind::Workbook => decode_workbook(body)?,
        UploadKind::Csv => decode_csv(body)?,
    };
    tracing::debug!(
        kind = kind.as_str(),
        columns = table.headers.len(),
        rows = table.rows.len(),
        "decoded upload"
    );
    Ok(table)
}

/// First worksheet only; its first row is the header.
pub fn decode_workbook(body: &[u8]) -> Result<Table, IngestError> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(body))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or(IngestError::NoSheet)??;

    let mut rows = range.rows();
    let headers: Vec<String> = rows
        .next()
        .map(|row| row.iter().map(|cell| cell_text(cell).trim().to_owned()).collect())
        .unwrap_or_default();
    let rows: Vec<Vec<String>> = rows
        .map(|row| row.iter().map(cell_text).collect::<Vec<_>>())
        .filter(|row| !is_blank(row))
        .collect();
    finish(headers, rows)
}

/// Non-UTF-8 bytes are replaced rather than rejected.
pub fn decode_csv(body: &[u8]) -> Result<Table, IngestError> {
    let body = body.strip_prefix(UTF8_BOM).unwrap_or(body);
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(IngestError::Empty);
    }

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(body);

    let headers: Vec<String> = reader
        .byte_headers()?
        .iter()
        .map(|cell| String::from_utf8_lossy(cell).into_owned())
        .collect();

    let mut rows = Vec::new();
    for record in reader.byte_records() {
        let row: Vec<String> = record?
            .iter()
            .map(|cell| String::from_utf8_lossy(cell).into_owned())
            .collect();
        if !is_blank(&row) {
            rows.push(row);
        }
    }
    finish(headers, rows)
}

fn finish(headers: Vec<String>, rows: Vec<Vec<String>>) -> Result<Table, IngestError> {
    if is_blank(&headers) {
        return Err(IngestError::MissingHeader);
    }
    if rows.is_empty() {
        return Err(IngestError::NoRows);
    }
    Ok(Table { headers, rows })
}

fn is_blank(cells: &[String]) -> bool {
    cells.iter().all(|cell| cell.trim().is_empty())
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(value) => value.clone(),
        Data::Float(value) => value.to_string(),
        Data::Int(value) => value.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use rust_xlsxwriter::Workbook;

    use super::*;

    fn workbook(rows: &[&[&str]]) -> Vec<u8> {
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        for (row_index, row) in rows.iter().enumerate() {
            for (col_index, cell) in row.iter().enumerate() {
                let (row_index, col_index) = (row_index as u32, col_index as u16);
                match cell.parse::<f64>() {
                    Ok(number) if row_index > 0 => {
                        sheet.write_number(row_index, col_index, number).expect("write number");
                    }
                    _ if cell.is_empty() => {}
                    _ => {
                        sheet.write_string(row_index, col_index, *cell).expect("write string");
                    }
                }
            }
        }
        workbook.save_to_buffer().expect("save workbook")
    }

    #[test]
    fn decodes_headers_and_rows() {
        let table = decode_upload(b"Emp ID, Name ,Basic\n1001,Asha,\"50,000\"\n1002,Ravi,42000\n")
            .expect("decode");

        assert_eq!(table.headers, vec!["Emp ID", "Name", "Basic"]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0], vec!["1001", "Asha", "50,000"]);
    }

    #[test]
    fn strips_bom_and_skips_blank_rows() {
        let table = decode_upload(b"\xEF\xBB\xBFid,basic\n1,10\n,\n\n2,20\n").expect("decode");

        assert_eq!(table.headers[0], "id");
        assert_eq!(table.rows.len(), 2);
    }

    #[test]
    fn accepts_ragged_rows() {
        let table = decode_upload(b"id,basic,bonus\n1,10\n2,20,5,extra\n").expect("decode");

        assert_eq!(table.rows[0], vec!["1", "10"]);
        assert_eq!(table.rows[1].len(), 4);
    }

    #[test]
    fn rejects_empty_and_corrupt_bodies() {
        assert!(matches!(decode_upload(b""), Err(IngestError::Empty)));
        assert!(matches!(decode_upload(b" \n\n"), Err(IngestError::Empty)));
        assert!(matches!(
            decode_upload(b"PK\x03\x04\x14\x00\x06\x00"),
            Err(IngestError::Workbook(_))
        ));
        assert!(matches!(decode_upload(b"id,basic\n"), Err(IngestError::NoRows)));
    }

    #[test]
    fn latin1_cells_are_replaced_not_rejected() {
        let table = decode_upload(b"id,name\n1,Jos\xE9\n").expect("decode");

        assert_eq!(table.rows[0][1], "Jos\u{fffd}");
    }

    #[test]
    fn decodes_the_first_worksheet_of_a_workbook() {
        let bytes = workbook(&[
            &[" Emp ID ", "Employee Name", "Basic", "Bonus"],
            &["1001", "Asha Rao", "50000", "1500.5"],
            &["", "", "", ""],
            &["1002", "Ravi Kumar", "60000", ""],
        ]);
        assert_eq!(UploadKind::detect(&bytes), UploadKind::Workbook);

        let table = decode_upload(&bytes).expect("decode workbook");

        assert_eq!(table.headers, vec!["Emp ID", "Employee Name", "Basic", "Bonus"]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0], vec!["1001", "Asha Rao", "50000", "1500.5"]);
        assert_eq!(table.rows[1][3], "");
    }

    #[test]
    fn header_only_workbook_has_no_rows() {
        let bytes = workbook(&[&["Emp ID", "Basic"]]);

        assert!(matches!(decode_upload(&bytes), Err(IngestError::NoRows)));
    }
}
