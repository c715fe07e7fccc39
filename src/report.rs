use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

// ---------------------------------------------------------------------------
// IngestEvent – everything a run can tell its caller
// ---------------------------------------------------------------------------

/// Why a block was dropped without being an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// `TITLE=DATA`: the compound-file container, not a sample.
    TitleSentinel,
    /// `DATA TYPE=LINK`: a cross-reference block without inline data.
    LinkBlock,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum IngestEvent {
    BlockDropped {
        block: usize,
        source_file: String,
        title: Option<String>,
        reason: DropReason,
    },
    StructuralParseError {
        block: usize,
        source_file: String,
        message: String,
    },
    NumericParseError {
        title: String,
        timestamp: String,
        /// 1-based line within the data region, when a single line failed.
        line: Option<usize>,
        message: String,
    },
    ValidationWarning {
        title: Option<String>,
        message: String,
    },
    VersionInserted {
        title: String,
        timestamp: String,
        version_id: i64,
    },
    VersionSuperseded {
        title: String,
        timestamp: String,
        previous_id: i64,
        version_id: i64,
    },
    SkippedUnchanged {
        title: String,
        timestamp: String,
    },
    PointsWritten {
        title: String,
        timestamp: String,
        count: usize,
    },
    StoreError {
        title: String,
        timestamp: String,
        operation: String,
        message: String,
    },
    AssayFileRead {
        path: String,
        rows: usize,
    },
    AssayFileFailed {
        path: String,
        message: String,
    },
    AssayRowsAppended {
        count: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl IngestEvent {
    pub fn severity(&self) -> Severity {
        use IngestEvent::*;
        match self {
            StructuralParseError { .. }
            | NumericParseError { .. }
            | StoreError { .. }
            | AssayFileFailed { .. } => Severity::Error,
            ValidationWarning { .. } => Severity::Warning,
            _ => Severity::Info,
        }
    }

    /// One-line human description, used by [`LogSink`].
    pub fn describe(&self) -> String {
        use IngestEvent::*;
        match self {
            BlockDropped {
                block,
                source_file,
                title,
                reason,
            } => format!(
                "{source_file} block {block} ({}) dropped: {reason:?}",
                title.as_deref().unwrap_or("untitled")
            ),
            StructuralParseError {
                block,
                source_file,
                message,
            } => format!("{source_file} block {block}: {message}"),
            NumericParseError {
                title,
                timestamp,
                line,
                message,
            } => match line {
                Some(line) => format!("{title} @ {timestamp}, data line {line}: {message}"),
                None => format!("{title} @ {timestamp}: {message}"),
            },
            ValidationWarning { title, message } => match title {
                Some(title) => format!("{title}: {message}"),
                None => message.clone(),
            },
            VersionInserted {
                title,
                timestamp,
                version_id,
            } => format!("{title} @ {timestamp}: inserted version {version_id}"),
            VersionSuperseded {
                title,
                timestamp,
                previous_id,
                version_id,
            } => format!(
                "{title} @ {timestamp}: version {version_id} supersedes {previous_id}"
            ),
            SkippedUnchanged { title, timestamp } => {
                format!("{title} @ {timestamp}: unchanged, skipped")
            }
            PointsWritten {
                title,
                timestamp,
                count,
            } => format!("{title} @ {timestamp}: wrote {count} spectral points"),
            StoreError {
                title,
                timestamp,
                operation,
                message,
            } => format!("{title} @ {timestamp}: {operation} failed: {message}"),
            AssayFileRead { path, rows } => format!("read {path} ({rows} rows)"),
            AssayFileFailed { path, message } => format!("failed to read {path}: {message}"),
            AssayRowsAppended { count } => format!("appended {count} rows to dumas_results"),
        }
    }
}

// ---------------------------------------------------------------------------
// EventSink – injected into every phase
// ---------------------------------------------------------------------------

pub trait EventSink {
    fn record(&mut self, event: IngestEvent);
}

impl<S: EventSink + ?Sized> EventSink for &mut S {
    fn record(&mut self, event: IngestEvent) {
        (**self).record(event);
    }
}

/// Accumulates events so callers can inspect exact counts and messages.
#[derive(Debug, Default, Clone, Serialize)]
pub struct RunReport {
    pub events: Vec<IngestEvent>,
}

impl EventSink for RunReport {
    fn record(&mut self, event: IngestEvent) {
        self.events.push(event);
    }
}

impl RunReport {
    pub fn count(&self, pred: impl Fn(&IngestEvent) -> bool) -> usize {
        self.events.iter().filter(|e| pred(e)).count()
    }

    pub fn errors(&self) -> impl Iterator<Item = &IngestEvent> {
        self.events
            .iter()
            .filter(|e| e.severity() == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &IngestEvent> {
        self.events
            .iter()
            .filter(|e| e.severity() == Severity::Warning)
    }

    /// Persist the report as pretty JSON, creating parent directories.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self).context("serializing run report")?;
        std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))
    }
}

/// Emits every event through `log` before handing it to the inner sink.
pub struct LogSink<S> {
    inner: S,
}

impl<S: EventSink> LogSink<S> {
    pub fn new(inner: S) -> Self {
        LogSink { inner }
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: EventSink> EventSink for LogSink<S> {
    fn record(&mut self, event: IngestEvent) {
        match event.severity() {
            Severity::Error => log::error!("{}", event.describe()),
            Severity::Warning => log::warn!("{}", event.describe()),
            Severity::Info => match event {
                IngestEvent::PointsWritten { .. } | IngestEvent::BlockDropped { .. } => {
                    log::debug!("{}", event.describe())
                }
                _ => log::info!("{}", event.describe()),
            },
        }
        self.inner.record(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn warning(msg: &str) -> IngestEvent {
        IngestEvent::ValidationWarning {
            title: None,
            message: msg.to_string(),
        }
    }

    #[test]
    fn test_report_partitions_by_severity() {
        let mut report = RunReport::default();
        report.record(warning("duplicate title"));
        report.record(IngestEvent::SkippedUnchanged {
            title: "S1".into(),
            timestamp: "2024-12-30 10:00:00".into(),
        });
        report.record(IngestEvent::StoreError {
            title: "S1".into(),
            timestamp: "2024-12-30 10:00:00".into(),
            operation: "insert header version".into(),
            message: "disk full".into(),
        });

        assert_eq!(report.warnings().count(), 1);
        assert_eq!(report.errors().count(), 1);
        assert_eq!(
            report.count(|e| matches!(e, IngestEvent::SkippedUnchanged { .. })),
            1
        );
    }

    #[test]
    fn test_log_sink_forwards_in_order() {
        let mut sink = LogSink::new(RunReport::default());
        sink.record(warning("a"));
        sink.record(warning("b"));
        let report = sink.into_inner();
        assert_eq!(report.events, vec![warning("a"), warning("b")]);
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let json = serde_json::to_value(IngestEvent::AssayRowsAppended { count: 3 }).unwrap();
        assert_eq!(json["event"], "assay_rows_appended");
        assert_eq!(json["count"], 3);
    }

    #[test]
    fn test_write_json_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("run_report.json");
        let mut report = RunReport::default();
        report.record(warning("x"));
        report.write_json(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("validation_warning"));
    }
}
