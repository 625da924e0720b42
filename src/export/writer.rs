//! File sinks for exported rows.
//!
//! Both sinks are synchronous; the export service drives them from
//! `spawn_blocking` one batch at a time. The header row is always written,
//! so an export matching no subscribers still yields a valid file.

use rust_xlsxwriter::{Format, Workbook};
use std::fs::File;
use std::path::{Path, PathBuf};

use super::fields::CellValue;
use super::filters::ExportFormat;
use crate::jobs::JobResult;

pub const XLSX_SHEET_NAME: &str = "Subscribers";

pub enum ExportSink {
    Csv(csv::Writer<File>),
    Xlsx(XlsxSink),
}

/// Rows are buffered and the workbook is assembled when the export finishes.
pub struct XlsxSink {
    path: PathBuf,
    headers: Vec<String>,
    rows: Vec<Vec<CellValue>>,
}

impl XlsxSink {
    fn save(self) -> JobResult<()> {
        let mut workbook = Workbook::new();
        let worksheet = workbook.add_worksheet();
        worksheet.set_name(XLSX_SHEET_NAME)?;

        let bold = Format::new().set_bold();
        for (col, header) in self.headers.iter().enumerate() {
            worksheet.write_string_with_format(0, col as u16, header, &bold)?;
        }

        for (index, row) in self.rows.iter().enumerate() {
            let row_num = index as u32 + 1;
            for (col, cell) in row.iter().enumerate() {
                let col = col as u16;
                match cell {
                    CellValue::Text(value) => {
                        worksheet.write_string(row_num, col, value)?;
                    }
                    CellValue::Number(value) => {
                        worksheet.write_number(row_num, col, *value as f64)?;
                    }
                }
            }
        }

        worksheet.autofit();
        workbook.save(&self.path)?;
        Ok(())
    }
}

impl ExportSink {
    /// Create the output and write the header row.
    pub fn create(format: ExportFormat, path: &Path, headers: &[&str]) -> JobResult<Self> {
        match format {
            ExportFormat::Csv => {
                let mut writer = csv::Writer::from_path(path)?;
                writer.write_record(headers)?;
                Ok(ExportSink::Csv(writer))
            }
            ExportFormat::Xlsx => Ok(ExportSink::Xlsx(XlsxSink {
                path: path.to_path_buf(),
                headers: headers.iter().map(|h| h.to_string()).collect(),
                rows: Vec::new(),
            })),
        }
    }

    pub fn write_rows(&mut self, rows: &[Vec<CellValue>]) -> JobResult<()> {
        match self {
            ExportSink::Csv(writer) => {
                for row in rows {
                    writer.write_record(row.iter().map(CellValue::to_text))?;
                }
                writer.flush()?;
            }
            ExportSink::Xlsx(sink) => sink.rows.extend_from_slice(rows),
        }
        Ok(())
    }

    /// Flush everything to disk and return the file size in bytes.
    pub fn finish(self) -> JobResult<u64> {
        let path = match self {
            ExportSink::Csv(writer) => {
                let file = writer
                    .into_inner()
                    .map_err(|e| std::io::Error::other(e.to_string()))?;
                file.sync_all()?;
                return Ok(file.metadata()?.len());
            }
            ExportSink::Xlsx(sink) => {
                let path = sink.path.clone();
                sink.save()?;
                path
            }
        };
        Ok(std::fs::metadata(path)?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_sink_writes_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");

        let mut sink = ExportSink::create(ExportFormat::Csv, &path, &["Email", "Opens"]).unwrap();
        sink.write_rows(&[
            vec![CellValue::Text("a@example.com".into()), CellValue::Number(3)],
            vec![CellValue::Text("b, \"quoted\"".into()), CellValue::Number(0)],
        ])
        .unwrap();
        let size = sink.finish().unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(size, content.len() as u64);
        assert_eq!(
            content,
            "Email,Opens\na@example.com,3\n\"b, \"\"quoted\"\"\",0\n"
        );
    }

    #[test]
    fn csv_sink_keeps_header_without_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.csv");

        let sink = ExportSink::create(ExportFormat::Csv, &path, &["Email"]).unwrap();
        sink.finish().unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "Email\n");
    }

    #[test]
    fn xlsx_sink_produces_a_workbook() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.xlsx");

        let mut sink =
            ExportSink::create(ExportFormat::Xlsx, &path, &["Email", "Clicks"]).unwrap();
        sink.write_rows(&[vec![
            CellValue::Text("a@example.com".into()),
            CellValue::Number(2),
        ]])
        .unwrap();
        let size = sink.finish().unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert!(size > 0);
        assert_eq!(&bytes[..2], b"PK");
    }
}
