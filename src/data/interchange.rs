//! JSON artifact between the parse and load phases.
//!
//! ```json
//! [
//!   {
//!     "TITLE": "Wheat 01",
//!     "LONG DATE": "2024/12/30 10:15:32",
//!     "FIRSTX": "950",
//!     "SOURCE_FILE": "Device2_20241230.dx",
//!     "XY": [ { "X": 950.0, "Y": [0.41, 0.43] }, ... ]
//!   },
//!   ...
//! ]
//! ```
//!
//! Compressed curves are stored as a flat `"Y": [...]` array instead of `XY`.

use std::path::Path;

use anyhow::{Context, Result};
use serde_json::{Map, Value as JsonValue};

use super::model::{Curve, Header, Measurement, XyRow};
use crate::report::{EventSink, IngestEvent};

const XY_KEY: &str = "XY";
const Y_KEY: &str = "Y";

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

pub fn to_record(measurement: &Measurement) -> JsonValue {
    let mut obj: Map<String, JsonValue> = measurement
        .header
        .to_pairs()
        .into_iter()
        .map(|(k, v)| (k, JsonValue::String(v)))
        .collect();

    match &measurement.curve {
        Curve::Explicit(rows) if rows.is_empty() => {}
        Curve::Explicit(rows) => {
            // XyRow is plain data; serialization cannot fail.
            let rows = serde_json::to_value(rows).unwrap_or(JsonValue::Null);
            obj.insert(XY_KEY.to_string(), rows);
        }
        Curve::Compressed(ys) => {
            obj.insert(
                Y_KEY.to_string(),
                JsonValue::Array(ys.iter().map(|&y| JsonValue::from(y)).collect()),
            );
        }
    }
    JsonValue::Object(obj)
}

/// Write measurements as a pretty JSON array, block order preserved.
/// The file is replaced atomically.
pub fn write_json(path: &Path, measurements: &[Measurement]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let records: Vec<JsonValue> = measurements.iter().map(to_record).collect();
    let json = serde_json::to_string_pretty(&records).context("serializing measurements")?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).with_context(|| format!("writing {}", tmp.display()))?;
    std::fs::rename(&tmp, path).with_context(|| format!("replacing {}", path.display()))?;
    log::info!("wrote {} measurements to {}", measurements.len(), path.display());
    Ok(())
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

fn scalar_to_string(val: &JsonValue) -> Option<String> {
    match val {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Bool(b) => Some(b.to_string()),
        JsonValue::Null => None,
        other => Some(other.to_string()),
    }
}

fn f64_array(val: &JsonValue) -> Result<Vec<f64>, String> {
    val.as_array()
        .ok_or_else(|| "expected an array".to_string())?
        .iter()
        .enumerate()
        .map(|(j, v)| v.as_f64().ok_or_else(|| format!("[{j}] is not a number")))
        .collect()
}

/// Rebuild one measurement. `Err` carries a message for the run report.
pub fn from_record(rec: &JsonValue) -> Result<Measurement, String> {
    let obj = rec.as_object().ok_or("record is not a JSON object")?;

    let pairs = obj
        .iter()
        .filter(|(k, _)| k.as_str() != XY_KEY && k.as_str() != Y_KEY)
        .filter_map(|(k, v)| scalar_to_string(v).map(|v| (k.clone(), v)));
    let header = Header::from_pairs(pairs).map_err(|m| format!("record has no {m} field"))?;

    let curve = if let Some(ys) = obj.get(Y_KEY) {
        Curve::Compressed(f64_array(ys).map_err(|e| format!("{}: Y{e}", header.title))?)
    } else if let Some(xy) = obj.get(XY_KEY) {
        let rows: Vec<XyRow> = serde_json::from_value(xy.clone())
            .map_err(|e| format!("{}: invalid XY array: {e}", header.title))?;
        Curve::Explicit(rows)
    } else {
        Curve::default()
    };

    Ok(Measurement { header, curve })
}

/// Read measurements back. A malformed record is reported as a structural
/// error and skipped; a malformed file is an error.
pub fn read_json(path: &Path, sink: &mut dyn EventSink) -> Result<Vec<Measurement>> {
    let text =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let root: JsonValue = serde_json::from_str(&text).context("parsing interchange JSON")?;
    let records = root
        .as_array()
        .context("expected a top-level JSON array")?;

    let source = path.display().to_string();
    let mut out = Vec::with_capacity(records.len());
    for (i, rec) in records.iter().enumerate() {
        match from_record(rec) {
            Ok(m) => out.push(m),
            Err(message) => sink.record(IngestEvent::StructuralParseError {
                block: i,
                source_file: source.clone(),
                message,
            }),
        }
    }
    Ok(out)
}
