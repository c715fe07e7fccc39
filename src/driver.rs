//! Orchestration of the two NIR phases.
//!
//! *Parse*: export text → blocks → measurements, written to the interchange
//! JSON. *Load*: interchange JSON → fingerprints and spectral points → store.
//! Neither phase aborts on a bad block; every problem becomes an event.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::data::expander::{build_curve, expand, ExpandError};
use crate::data::fingerprint::fingerprint;
use crate::data::interchange;
use crate::data::model::Measurement;
use crate::data::parser::{parse_block, BlockOutcome};
use crate::data::splitter::split_blocks;
use crate::data::validate::{duplicate_titles, normalize_timestamp};
use crate::report::{EventSink, IngestEvent};
use crate::scd2::Decision;
use crate::store::{Store, StoreError};

// ---------------------------------------------------------------------------
// Parse phase
// ---------------------------------------------------------------------------

/// Parse one export into measurements, in block order.
pub fn parse_export(text: &str, source_file: &str, sink: &mut dyn EventSink) -> Vec<Measurement> {
    let mut out = Vec::new();
    for (block_no, block) in split_blocks(text).iter().enumerate() {
        match parse_block(block, source_file) {
            Ok(BlockOutcome::Parsed(parsed)) => {
                let curve = build_curve(&parsed.header, &parsed.data_lines, sink);
                out.push(Measurement {
                    header: parsed.header,
                    curve,
                });
            }
            Ok(BlockOutcome::Dropped { title, reason }) => sink.record(IngestEvent::BlockDropped {
                block: block_no,
                source_file: source_file.to_string(),
                title,
                reason,
            }),
            Err(e) => sink.record(IngestEvent::StructuralParseError {
                block: block_no,
                source_file: source_file.to_string(),
                message: e.to_string(),
            }),
        }
    }
    out
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Parse every export, concatenating measurements in file order.
pub fn parse_files(paths: &[PathBuf], sink: &mut dyn EventSink) -> Result<Vec<Measurement>> {
    let mut all = Vec::new();
    for path in paths {
        let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        let text = String::from_utf8_lossy(&bytes);
        let measurements = parse_export(&text, &file_name(path), sink);
        log::info!("{}: {} measurements", path.display(), measurements.len());
        all.extend(measurements);
    }
    Ok(all)
}

/// Parse phase end to end: exports → interchange JSON. Returns the number
/// of measurements written.
pub fn run_parse(paths: &[PathBuf], json_path: &Path, sink: &mut dyn EventSink) -> Result<usize> {
    let measurements = parse_files(paths, sink)?;
    interchange::write_json(json_path, &measurements)?;
    Ok(measurements.len())
}

// ---------------------------------------------------------------------------
// Load phase
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct LoadSummary {
    pub inserted: usize,
    pub superseded: usize,
    pub skipped: usize,
    pub expansion_failed: usize,
    pub store_failed: usize,
    pub points_written: usize,
}

impl LoadSummary {
    /// Measurements whose header decision was committed.
    pub fn ingested(&self) -> usize {
        self.inserted + self.superseded + self.skipped
    }
}

fn expansion_event(e: &ExpandError) -> IngestEvent {
    let (title, timestamp) = match e {
        ExpandError::MissingParameter {
            title, timestamp, ..
        }
        | ExpandError::InvalidParameter {
            title, timestamp, ..
        } => (title.clone(), timestamp.clone()),
    };
    IngestEvent::NumericParseError {
        title,
        timestamp,
        line: None,
        message: e.to_string(),
    }
}

fn store_event(title: &str, timestamp: &str, e: &StoreError) -> IngestEvent {
    let (operation, message) = match e {
        StoreError::Write {
            operation, source, ..
        } => (operation.to_string(), source.to_string()),
        other => ("apply measurement".to_string(), other.to_string()),
    };
    IngestEvent::StoreError {
        title: title.to_string(),
        timestamp: timestamp.to_string(),
        operation,
        message,
    }
}

fn load_one(
    store: &mut Store,
    m: &Measurement,
    sink: &mut dyn EventSink,
    summary: &mut LoadSummary,
) {
    let header = &m.header;
    let title = header.title.as_str();

    let (timestamp, comparable) = match normalize_timestamp(&header.acquired) {
        Ok(ts) => (ts, true),
        Err(raw) => {
            sink.record(IngestEvent::ValidationWarning {
                title: Some(title.to_string()),
                message: format!("unparsable timestamp {raw:?}, stored as-is"),
            });
            (raw, false)
        }
    };

    let points = match expand(header, &timestamp, &m.curve) {
        Ok(points) => points,
        Err(e) => {
            sink.record(expansion_event(&e));
            summary.expansion_failed += 1;
            return;
        }
    };

    let fp = fingerprint(header);
    let outcome = match store.apply(header, &timestamp, &fp, &points) {
        Ok(outcome) => outcome,
        Err(e) => {
            sink.record(store_event(title, &timestamp, &e));
            summary.store_failed += 1;
            return;
        }
    };

    match outcome.decision {
        Decision::Insert => {
            summary.inserted += 1;
            sink.record(IngestEvent::VersionInserted {
                title: title.to_string(),
                timestamp: timestamp.clone(),
                version_id: outcome.version_id,
            });
        }
        Decision::Skip { .. } => {
            summary.skipped += 1;
            sink.record(IngestEvent::SkippedUnchanged {
                title: title.to_string(),
                timestamp: timestamp.clone(),
            });
        }
        Decision::Supersede {
            previous_id,
            previous_valid_from,
        } => {
            summary.superseded += 1;
            if comparable && timestamp < previous_valid_from {
                sink.record(IngestEvent::ValidationWarning {
                    title: Some(title.to_string()),
                    message: format!(
                        "version at {timestamp} supersedes a later one valid from {previous_valid_from}"
                    ),
                });
            }
            sink.record(IngestEvent::VersionSuperseded {
                title: title.to_string(),
                timestamp: timestamp.clone(),
                previous_id,
                version_id: outcome.version_id,
            });
        }
    }

    if outcome.points_written > 0 {
        summary.points_written += outcome.points_written;
        sink.record(IngestEvent::PointsWritten {
            title: title.to_string(),
            timestamp,
            count: outcome.points_written,
        });
    }
}

/// Load measurements in order, one transaction per measurement.
///
/// Measurements sharing a title are applied strictly one after another, so
/// each decision sees the version the previous one committed.
pub fn load_measurements(
    store: &mut Store,
    measurements: &[Measurement],
    sink: &mut dyn EventSink,
) -> LoadSummary {
    for (title, n) in duplicate_titles(measurements.iter().map(|m| m.header.title.as_str())) {
        sink.record(IngestEvent::ValidationWarning {
            title: Some(title.to_string()),
            message: format!("title occurs {n} times in this load"),
        });
    }

    let mut summary = LoadSummary::default();
    for m in measurements {
        load_one(store, m, sink, &mut summary);
    }
    log::info!(
        "load finished: {} inserted, {} superseded, {} unchanged, {} failed",
        summary.inserted,
        summary.superseded,
        summary.skipped,
        summary.expansion_failed + summary.store_failed
    );
    summary
}

/// Load phase end to end: interchange JSON → store.
pub fn run_load(json_path: &Path, store: &mut Store, sink: &mut dyn EventSink) -> Result<LoadSummary> {
    let measurements = interchange::read_json(json_path, sink)?;
    Ok(load_measurements(store, &measurements, sink))
}
