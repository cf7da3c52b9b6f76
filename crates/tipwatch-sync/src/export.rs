//! Spreadsheet export of the records collected in one run.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use rust_xlsxwriter::{Workbook, Worksheet};
use tipwatch_core::{MatchRecord, CAPTURED_AT_COLUMN, RECORD_TEXT_COLUMNS};
use tracing::info;

pub fn export_file_name(date: NaiveDate) -> String {
    format!("match_predictions_{}.xlsx", date.format("%Y-%m-%d"))
}

/// Header row followed by one row per record, columns in storage order.
pub fn export_rows(records: &[MatchRecord]) -> Vec<Vec<String>> {
    let header: Vec<String> = std::iter::once(CAPTURED_AT_COLUMN)
        .chain(RECORD_TEXT_COLUMNS)
        .map(str::to_string)
        .collect();

    std::iter::once(header)
        .chain(records.iter().map(|record| {
            std::iter::once(record.captured_at().to_rfc3339())
                .chain(record.text_values().into_iter().map(str::to_string))
                .collect::<Vec<String>>()
        }))
        .collect()
}

pub fn export_records(records: &[MatchRecord], dir: &Path, date: NaiveDate) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    let path = dir.join(export_file_name(date));

    let mut workbook = Workbook::new();
    {
        let sheet = workbook.add_worksheet();
        sheet.set_name("Predictions")?;
        write_rows(sheet, &export_rows(records))?;
    }
    workbook
        .save(&path)
        .with_context(|| format!("failed writing workbook to {}", path.display()))?;

    info!(path = %path.display(), records = records.len(), "spreadsheet exported");
    Ok(path)
}

fn write_rows(worksheet: &mut Worksheet, rows: &[Vec<String>]) -> Result<()> {
    for (row_idx, row) in rows.iter().enumerate() {
        for (col_idx, value) in row.iter().enumerate() {
            worksheet
                .write_string(row_idx as u32, col_idx as u16, value)
                .with_context(|| format!("write cell ({row_idx},{col_idx})"))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tipwatch_core::MatchSummary;

    fn record() -> MatchRecord {
        let captured_at = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).single().unwrap();
        let mut summary = MatchSummary::new("A vs B", "A", "B", "https://x.test/m/1", captured_at);
        summary.prediction = "1".to_string();
        MatchRecord::from_summary(summary)
    }

    #[test]
    fn rows_follow_storage_column_order() {
        let rows = export_rows(&[record()]);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][0], "captured_at");
        assert_eq!(rows[0][1], "game");
        assert_eq!(rows[0].len(), RECORD_TEXT_COLUMNS.len() + 1);
        assert_eq!(rows[1][0], "2025-03-01T12:00:00+00:00");
        assert_eq!(rows[1][1], "A vs B");
        assert_eq!(rows[1].len(), rows[0].len());
    }

    #[test]
    fn workbook_is_written_with_dated_name() {
        let dir = tempfile::tempdir().unwrap();
        let date = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        let path = export_records(&[record()], &dir.path().join("out"), date).unwrap();
        assert!(path.ends_with("match_predictions_2025-03-01.xlsx"));
        assert!(std::fs::metadata(&path).unwrap().len() > 0);
    }
}
