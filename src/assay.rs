//! Dumas analyzer result tables: cleanup and bulk append, no versioning.
//!
//! The exports are tab-delimited with one banner line before the header row.
//! Column names are normalized (`Protein [%]` → `protein_percent`) and the
//! rows mapped onto the fixed `dumas_results` layout.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use crate::data::validate::percentage_warning;
use crate::report::{EventSink, IngestEvent};
use crate::store::Store;

const DAY_FIRST_FORMATS: [&str; 7] = [
    "%d.%m.%Y %H:%M:%S",
    "%d.%m.%Y %H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
    "%d-%m-%Y %H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
];

const PERCENT_COLUMNS: [&str; 3] = ["n_percent", "protein_percent", "moisture_percent"];

/// One row of `dumas_results`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AssayRow {
    pub no: Option<i64>,
    pub hole_pos: Option<String>,
    pub weight_mg: Option<f64>,
    pub title: String,
    pub method: Option<String>,
    pub n_area: Option<f64>,
    pub n_percent: Option<f64>,
    pub n_mg: Option<f64>,
    pub n_factor: Option<f64>,
    pub n_blank: Option<f64>,
    pub protein_percent: Option<f64>,
    pub protein_mg: Option<f64>,
    pub protein_factor: Option<f64>,
    pub moisture_percent: Option<f64>,
    pub memo: Option<String>,
    pub info: Option<String>,
    pub date: Option<NaiveDate>,
    pub time: Option<NaiveTime>,
    pub datetime: Option<NaiveDateTime>,
}

/// A cleaned, untyped table: normalized column names and string cells.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssayTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl AssayTable {
    fn column(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }
}

pub fn clean_column_name(name: &str) -> String {
    let replaced = name
        .trim()
        .replace('%', "percent")
        .replace(['[', ']', '.'], "");
    replaced
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .to_lowercase()
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

/// Parse one export. Rows with more cells than headers are skipped with a
/// warning; short rows are padded with empty cells.
pub fn read_assay_text(text: &str, source: &str, sink: &mut dyn EventSink) -> AssayTable {
    // First line is an instrument banner, not the header row.
    let body = text.split_once('\n').map(|(_, rest)| rest).unwrap_or("");

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .flexible(true)
        .has_headers(true)
        .from_reader(body.as_bytes());

    let raw_headers: Vec<String> = match reader.headers() {
        Ok(h) => h.iter().map(str::to_string).collect(),
        Err(e) => {
            sink.record(IngestEvent::AssayFileFailed {
                path: source.to_string(),
                message: format!("reading header row: {e}"),
            });
            return AssayTable::default();
        }
    };

    // Columns without a name are index artifacts of the export.
    let keep: Vec<usize> = raw_headers
        .iter()
        .enumerate()
        .filter(|(_, h)| !h.trim().is_empty())
        .map(|(i, _)| i)
        .collect();
    let columns = keep.iter().map(|&i| clean_column_name(&raw_headers[i])).collect();

    let mut rows = Vec::new();
    for (line, result) in reader.records().enumerate() {
        let record = match result {
            Ok(r) => r,
            Err(e) => {
                sink.record(IngestEvent::ValidationWarning {
                    title: None,
                    message: format!("{source} row {}: {e}", line + 1),
                });
                continue;
            }
        };
        if record.len() > raw_headers.len() {
            sink.record(IngestEvent::ValidationWarning {
                title: None,
                message: format!(
                    "{source} row {}: {} fields for {} columns, skipped",
                    line + 1,
                    record.len(),
                    raw_headers.len()
                ),
            });
            continue;
        }
        rows.push(
            keep.iter()
                .map(|&i| record.get(i).unwrap_or("").trim().to_string())
                .collect(),
        );
    }

    AssayTable { columns, rows }
}

pub fn read_assay_file(path: &Path, sink: &mut dyn EventSink) -> Result<AssayTable> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    // Instrument software writes Latin-1 now and then.
    let text = String::from_utf8_lossy(&bytes);
    Ok(read_assay_text(&text, &path.display().to_string(), sink))
}

/// Concatenate tables by column name and drop exact duplicate rows.
pub fn combine(tables: Vec<AssayTable>) -> AssayTable {
    let mut columns: Vec<String> = Vec::new();
    for t in &tables {
        for c in &t.columns {
            if !columns.contains(c) {
                columns.push(c.clone());
            }
        }
    }

    let mut seen = HashSet::new();
    let mut rows = Vec::new();
    for t in tables {
        let mapping: Vec<Option<usize>> = columns.iter().map(|c| t.column(c)).collect();
        for row in t.rows {
            let aligned: Vec<String> = mapping
                .iter()
                .map(|m| m.and_then(|i| row.get(i).cloned()).unwrap_or_default())
                .collect();
            if seen.insert(aligned.clone()) {
                rows.push(aligned);
            }
        }
    }
    AssayTable { columns, rows }
}

// ---------------------------------------------------------------------------
// Typing
// ---------------------------------------------------------------------------

fn parse_number(cell: &str) -> Option<f64> {
    let cell = cell.trim();
    if cell.is_empty() {
        return None;
    }
    cell.parse::<f64>()
        .or_else(|_| cell.replace(',', ".").parse::<f64>())
        .ok()
}

pub fn parse_day_first(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    DAY_FIRST_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(raw, f).ok())
}

/// Map a cleaned table onto `dumas_results` rows.
pub fn to_rows(table: &AssayTable, sink: &mut dyn EventSink) -> Vec<AssayRow> {
    let idx = |name: &str| table.column(name);
    let title_col = idx("name").or_else(|| idx("title"));
    let date_time_col = idx("date_time");
    let date_col = idx("date");
    let time_col = idx("time");

    let mut missing_titles = 0usize;
    let mut out = Vec::with_capacity(table.rows.len());

    for row in &table.rows {
        let cell = |col: Option<usize>| col.and_then(|i| row.get(i)).map(String::as_str);
        let text = |name: &str| cell(idx(name)).filter(|s| !s.is_empty()).map(str::to_string);
        let number = |name: &str| cell(idx(name)).and_then(parse_number);

        let Some(title) = cell(title_col).filter(|t| !t.is_empty()) else {
            missing_titles += 1;
            continue;
        };

        let raw_datetime = match (date_time_col, date_col, time_col) {
            (Some(_), _, _) => cell(date_time_col).map(str::to_string),
            (None, Some(_), Some(_)) => Some(format!(
                "{} {}",
                cell(date_col).unwrap_or(""),
                cell(time_col).unwrap_or("")
            )),
            _ => None,
        };
        let datetime = raw_datetime.as_deref().and_then(|raw| {
            let parsed = parse_day_first(raw);
            if parsed.is_none() {
                sink.record(IngestEvent::ValidationWarning {
                    title: Some(title.to_string()),
                    message: format!("unparsable assay datetime {raw:?}"),
                });
            }
            parsed
        });

        for column in PERCENT_COLUMNS {
            if let Some(message) = number(column).and_then(|v| percentage_warning(column, v)) {
                sink.record(IngestEvent::ValidationWarning {
                    title: Some(title.to_string()),
                    message,
                });
            }
        }

        out.push(AssayRow {
            no: number("no").filter(|v| v.fract() == 0.0).map(|v| v as i64),
            hole_pos: text("hole_pos"),
            weight_mg: number("weight_mg"),
            title: title.to_string(),
            method: text("method"),
            n_area: number("n_area"),
            n_percent: number("n_percent"),
            n_mg: number("n_mg"),
            n_factor: number("n_factor"),
            n_blank: number("n_blank"),
            protein_percent: number("protein_percent"),
            protein_mg: number("protein_mg"),
            protein_factor: number("protein_factor"),
            moisture_percent: number("moisture_percent"),
            memo: text("memo"),
            info: text("info"),
            date: datetime.map(|dt| dt.date()),
            time: datetime.map(|dt| dt.time()),
            datetime,
        });
    }

    if missing_titles > 0 {
        sink.record(IngestEvent::ValidationWarning {
            title: None,
            message: format!("{missing_titles} assay rows missing 'title', dropped"),
        });
    }
    out
}

/// Read, clean and append every readable file. Unreadable files are
/// reported and skipped.
pub fn load_assay_files(
    paths: &[PathBuf],
    store: &mut Store,
    sink: &mut dyn EventSink,
) -> Result<usize> {
    let mut tables = Vec::new();
    for path in paths {
        match read_assay_file(path, sink) {
            Ok(table) => {
                sink.record(IngestEvent::AssayFileRead {
                    path: path.display().to_string(),
                    rows: table.rows.len(),
                });
                tables.push(table);
            }
            Err(e) => sink.record(IngestEvent::AssayFileFailed {
                path: path.display().to_string(),
                message: format!("{e:#}"),
            }),
        }
    }

    if tables.is_empty() {
        sink.record(IngestEvent::ValidationWarning {
            title: None,
            message: "no valid assay files provided".to_string(),
        });
        return Ok(0);
    }

    let table = combine(tables);
    log::info!("{} assay rows after cleaning", table.rows.len());
    let rows = to_rows(&table, sink);
    let count = store
        .append_assay_rows(&rows)
        .context("appending assay rows")?;
    sink.record(IngestEvent::AssayRowsAppended { count });
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::RunReport;

    const EXPORT: &str = "Dumas results export\n\
        No.\tHole Pos.\tWeight [mg]\tName\tMethod\tN [%]\tProtein [%]\tMoisture [%]\tDate Time\t\n\
        1\tA1\t150,2\tWheat 01\tGrain\t2.1\t12.0\t11.5\t30.12.2024 10:15:00\t\n\
        2\tA2\t149.8\t\tGrain\t2.0\t11.4\t11.0\t30.12.2024 10:20:00\t\n\
        3\tA3\t151.0\tWheat 02\tGrain\t2.2\t112.5\t10.9\tsoon\t\n\
        4\tA4\t150.0\tWheat 03\tGrain\t2.2\t12.5\t10.9\t30.12.2024 10:30:00\t\textra\n";

    #[test]
    fn test_clean_column_name() {
        assert_eq!(clean_column_name(" Protein [%] "), "protein_percent");
        assert_eq!(clean_column_name("Weight [mg]"), "weight_mg");
        assert_eq!(clean_column_name("Hole Pos."), "hole_pos");
        assert_eq!(clean_column_name("Date  Time"), "date_time");
        assert_eq!(clean_column_name("No."), "no");
    }

    #[test]
    fn test_read_skips_banner_and_wide_rows() {
        let mut report = RunReport::default();
        let table = read_assay_text(EXPORT, "dumas.txt", &mut report);
        assert_eq!(
            table.columns,
            vec![
                "no",
                "hole_pos",
                "weight_mg",
                "name",
                "method",
                "n_percent",
                "protein_percent",
                "moisture_percent",
                "date_time"
            ]
        );
        assert_eq!(table.rows.len(), 3);
        assert_eq!(report.warnings().count(), 1);
    }

    #[test]
    fn test_to_rows_types_and_warnings() {
        let mut report = RunReport::default();
        let table = read_assay_text(EXPORT, "dumas.txt", &mut report);
        let mut report = RunReport::default();
        let rows = to_rows(&table, &mut report);

        assert_eq!(rows.len(), 2);
        let first = &rows[0];
        assert_eq!(first.no, Some(1));
        assert_eq!(first.title, "Wheat 01");
        assert_eq!(first.weight_mg, Some(150.2));
        assert_eq!(
            first.datetime,
            NaiveDate::from_ymd_opt(2024, 12, 30).and_then(|d| d.and_hms_opt(10, 15, 0))
        );
        assert_eq!(first.date, NaiveDate::from_ymd_opt(2024, 12, 30));

        let messages: Vec<String> = report.warnings().map(|e| e.describe()).collect();
        assert_eq!(
            messages,
            vec![
                "Wheat 02: unparsable assay datetime \"soon\"".to_string(),
                "Wheat 02: protein_percent = 112.5 is outside 0..100".to_string(),
                "1 assay rows missing 'title', dropped".to_string(),
            ]
        );
    }

    #[test]
    fn test_combine_aligns_and_dedups() {
        let a = AssayTable {
            columns: vec!["name".into(), "method".into()],
            rows: vec![vec!["S1".into(), "M".into()], vec!["S1".into(), "M".into()]],
        };
        let b = AssayTable {
            columns: vec!["method".into(), "memo".into(), "name".into()],
            rows: vec![vec!["M".into(), "".into(), "S1".into()], vec!["M".into(), "x".into(), "S2".into()]],
        };
        let combined = combine(vec![a, b]);
        assert_eq!(combined.columns, vec!["name", "method", "memo"]);
        assert_eq!(
            combined.rows,
            vec![
                vec!["S1".to_string(), "M".into(), "".into()],
                vec!["S2".to_string(), "M".into(), "x".into()],
            ]
        );
    }

    #[test]
    fn test_load_appends_and_reports_unreadable_files() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("dumas.txt");
        std::fs::write(&good, EXPORT).unwrap();
        let missing = dir.path().join("missing.txt");

        let mut store = Store::open_in_memory().unwrap();
        let mut report = RunReport::default();
        let n = load_assay_files(&[missing, good], &mut store, &mut report).unwrap();

        assert_eq!(n, 2);
        assert_eq!(store.assay_row_count().unwrap(), 2);
        assert_eq!(
            report.count(|e| matches!(e, IngestEvent::AssayFileFailed { .. })),
            1
        );
        assert_eq!(
            report.count(|e| matches!(e, IngestEvent::AssayRowsAppended { count: 2 })),
            1
        );
    }
}
