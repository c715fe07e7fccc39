use thiserror::Error;

use super::model::{Curve, Header, HeaderField, SpectralPoint, XyRow};
use super::validate::normalize_timestamp;
use crate::report::{EventSink, IngestEvent};

/// Title and timestamp travel with the error for diagnostics.
#[derive(Debug, Error, PartialEq)]
pub enum ExpandError {
    #[error("{field} is missing, cannot synthesize x-values")]
    MissingParameter {
        title: String,
        timestamp: String,
        field: HeaderField,
    },
    #[error("{field}={value:?} is not numeric, cannot synthesize x-values")]
    InvalidParameter {
        title: String,
        timestamp: String,
        field: HeaderField,
        value: String,
    },
}

/// Keys whose data lines are `x, y; x, y` groups, e.g. `##XYPOINTS=(XY..XY)`.
const PAIR_KEYS: [&str; 2] = ["XYPOINTS", "PEAK TABLE"];

/// Layout of the data lines of one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DataForm {
    /// `x y1 y2 ..` per line.
    Rows,
    /// Ordinates only; abscissae come from the header.
    YOnly,
    /// `x, y` groups separated by `;`.
    Pairs,
}

fn data_form(header: &Header) -> DataForm {
    match header.get(HeaderField::XyData) {
        Some(declaration) => {
            let d = declaration.replace(char::is_whitespace, "").to_ascii_uppercase();
            if d == "(Y..Y)" || d == "(Y)" {
                DataForm::YOnly
            } else {
                DataForm::Rows
            }
        }
        None if PAIR_KEYS.iter().any(|k| header.extra.contains_key(*k)) => DataForm::Pairs,
        None => DataForm::Rows,
    }
}

/// A finite number; `nan` and `inf` parse as `f64` but cannot be stored.
fn finite(token: &str) -> Option<f64> {
    token.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Timestamp under which parse-phase events are reported, matching the form
/// the load phase uses.
fn event_timestamp(header: &Header) -> String {
    normalize_timestamp(&header.acquired).unwrap_or_else(|raw| raw)
}

// ---------------------------------------------------------------------------
// Parse phase: data lines → Curve
// ---------------------------------------------------------------------------

/// Turn the verbatim data lines of a block into a [`Curve`].
///
/// Explicit rows: first token is x, the rest are y-values. A row with any
/// non-numeric token is dropped and reported; the block carries on.
/// Pair tables (`XYPOINTS`, `PEAK TABLE`) yield one row per `x, y` group.
/// Y-only declarations produce a compressed curve whose abscissae are
/// synthesized later by [`expand`].
pub fn build_curve(header: &Header, data_lines: &[&str], sink: &mut dyn EventSink) -> Curve {
    let parse_line: fn(&str) -> Result<Vec<XyRow>, String> = match data_form(header) {
        DataForm::YOnly => return build_compressed(header, data_lines, sink),
        DataForm::Rows => row_line,
        DataForm::Pairs => pair_line,
    };

    let mut rows = Vec::with_capacity(data_lines.len());
    for (i, &line) in data_lines.iter().enumerate() {
        match parse_line(line) {
            Ok(parsed) => rows.extend(parsed),
            Err(message) => {
                log::warn!("{}: skipping data line {}: {message}", header.title, i + 1);
                sink.record(IngestEvent::NumericParseError {
                    title: header.title.clone(),
                    timestamp: event_timestamp(header),
                    line: Some(i + 1),
                    message,
                });
            }
        }
    }
    Curve::Explicit(rows)
}

/// `x y1 y2 ..`; a blank line yields nothing.
fn row_line(line: &str) -> Result<Vec<XyRow>, String> {
    let values = line
        .split_whitespace()
        .map(|t| finite(t).ok_or_else(|| format!("token {t:?} is not numeric")))
        .collect::<Result<Vec<f64>, String>>()?;
    Ok(match values.split_first() {
        Some((&x, ys)) => vec![XyRow { x, y: ys.to_vec() }],
        None => Vec::new(),
    })
}

/// `x, y; x, y ..`. Values past the ordinate (peak widths) are ignored.
fn pair_line(line: &str) -> Result<Vec<XyRow>, String> {
    line.split(';')
        .map(str::trim)
        .filter(|group| !group.is_empty())
        .map(|group| {
            let mut values = group.split(',').map(str::trim);
            match (values.next().and_then(finite), values.next().and_then(finite)) {
                (Some(x), Some(y)) => Ok(XyRow { x, y: vec![y] }),
                _ => Err(format!("group {group:?} is not an x, y pair")),
            }
        })
        .collect()
}

/// Partial y-sequences are meaningless once indices shift, so a single bad
/// token empties the whole curve.
fn build_compressed(header: &Header, data_lines: &[&str], sink: &mut dyn EventSink) -> Curve {
    let mut ys = Vec::new();
    for (i, line) in data_lines.iter().enumerate() {
        for token in line.split_whitespace() {
            match finite(token) {
                Some(y) => ys.push(y),
                None => {
                    sink.record(IngestEvent::NumericParseError {
                        title: header.title.clone(),
                        timestamp: event_timestamp(header),
                        line: Some(i + 1),
                        message: format!("y-value {token:?} is not numeric, curve discarded"),
                    });
                    return Curve::Compressed(Vec::new());
                }
            }
        }
    }
    Curve::Compressed(ys)
}

// ---------------------------------------------------------------------------
// Load phase: Curve → SpectralPoint
// ---------------------------------------------------------------------------

fn required(header: &Header, timestamp: &str, field: HeaderField) -> Result<f64, ExpandError> {
    match header.number(field) {
        Some(Ok(v)) if v.is_finite() => Ok(v),
        Some(Ok(v)) => Err(ExpandError::InvalidParameter {
            title: header.title.clone(),
            timestamp: timestamp.to_string(),
            field,
            value: v.to_string(),
        }),
        Some(Err(value)) => Err(ExpandError::InvalidParameter {
            title: header.title.clone(),
            timestamp: timestamp.to_string(),
            field,
            value,
        }),
        None => Err(ExpandError::MissingParameter {
            title: header.title.clone(),
            timestamp: timestamp.to_string(),
            field,
        }),
    }
}

/// Flatten a curve into spectral points stamped with `timestamp`.
///
/// Explicit rows keep source order, one point per y-value with the y's
/// position as index. Compressed curves need `FIRSTX`, `DELTAX` and
/// `NPOINTS`; without all three nothing is expanded.
pub fn expand(
    header: &Header,
    timestamp: &str,
    curve: &Curve,
) -> Result<Vec<SpectralPoint>, ExpandError> {
    let point = |x: f64, y: f64, index: usize| SpectralPoint {
        title: header.title.clone(),
        timestamp: timestamp.to_string(),
        x,
        y,
        index,
    };

    match curve {
        Curve::Explicit(rows) => Ok(rows
            .iter()
            .flat_map(|row| {
                row.y
                    .iter()
                    .enumerate()
                    .map(move |(index, &y)| (row.x, y, index))
            })
            .map(|(x, y, index)| point(x, y, index))
            .collect()),
        Curve::Compressed(ys) => {
            let first_x = required(header, timestamp, HeaderField::FirstX)?;
            let delta_x = required(header, timestamp, HeaderField::DeltaX)?;
            let n_points = required(header, timestamp, HeaderField::NPoints)?;
            if n_points < 0.0 || n_points.fract() != 0.0 {
                return Err(ExpandError::InvalidParameter {
                    title: header.title.clone(),
                    timestamp: timestamp.to_string(),
                    field: HeaderField::NPoints,
                    value: n_points.to_string(),
                });
            }
            let n_points = n_points as usize;
            if ys.len() < n_points {
                log::debug!(
                    "{}: {} y-values for NPOINTS={n_points}",
                    header.title,
                    ys.len()
                );
            }
            Ok(ys
                .iter()
                .take(n_points)
                .enumerate()
                .map(|(i, &y)| point(first_x + i as f64 * delta_x, y, i))
                .collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::RunReport;

    fn header(extra: &[(&str, &str)]) -> Header {
        let mut pairs = vec![("TITLE", "S1"), ("LONG DATE", "2024/12/30 10:00:00")];
        pairs.extend_from_slice(extra);
        Header::from_pairs(pairs).unwrap()
    }

    fn xy(points: &[SpectralPoint]) -> Vec<(f64, f64, usize)> {
        points.iter().map(|p| (p.x, p.y, p.index)).collect()
    }

    #[test]
    fn test_explicit_multi_channel_row() {
        let h = header(&[("XYDATA", "(X++(Y..Y))")]);
        let mut report = RunReport::default();
        let curve = build_curve(&h, &["1000 0.1 0.2"], &mut report);
        let points = expand(&h, "t", &curve).unwrap();
        assert_eq!(xy(&points), vec![(1000.0, 0.1, 0), (1000.0, 0.2, 1)]);
        assert!(report.events.is_empty());
    }

    #[test]
    fn test_bad_explicit_line_is_dropped_alone() {
        let h = header(&[("XYDATA", "(X++(Y..Y))")]);
        let mut report = RunReport::default();
        let curve = build_curve(&h, &["1000 0.1", "1002 n/a", "", "1004 0.3"], &mut report);
        let points = expand(&h, "t", &curve).unwrap();
        assert_eq!(xy(&points), vec![(1000.0, 0.1, 0), (1004.0, 0.3, 0)]);
        assert_eq!(report.events.len(), 1);
        assert!(matches!(
            &report.events[0],
            IngestEvent::NumericParseError { line: Some(2), .. }
        ));
    }

    #[test]
    fn test_compressed_expansion() {
        let h = header(&[
            ("XYDATA", "(Y..Y)"),
            ("FIRSTX", "1000"),
            ("DELTAX", "2"),
            ("NPOINTS", "3"),
        ]);
        let mut report = RunReport::default();
        let curve = build_curve(&h, &["0.1 0.2", "0.3 0.4"], &mut report);
        assert_eq!(curve, Curve::Compressed(vec![0.1, 0.2, 0.3, 0.4]));
        let points = expand(&h, "t", &curve).unwrap();
        assert_eq!(
            xy(&points),
            vec![(1000.0, 0.1, 0), (1002.0, 0.2, 1), (1004.0, 0.3, 2)]
        );
    }

    #[test]
    fn test_compressed_requires_all_parameters() {
        let curve = Curve::Compressed(vec![0.1, 0.2]);
        let missing = header(&[("FIRSTX", "1000"), ("NPOINTS", "2")]);
        assert_eq!(
            expand(&missing, "t", &curve).unwrap_err(),
            ExpandError::MissingParameter {
                title: "S1".into(),
                timestamp: "t".into(),
                field: HeaderField::DeltaX,
            }
        );
        let invalid = header(&[("FIRSTX", "1000"), ("DELTAX", "two"), ("NPOINTS", "2")]);
        assert!(matches!(
            expand(&invalid, "t", &curve).unwrap_err(),
            ExpandError::InvalidParameter { field: HeaderField::DeltaX, .. }
        ));
    }

    #[test]
    fn test_compressed_bad_token_discards_curve() {
        let h = header(&[("XYDATA", "( Y..Y )")]);
        let mut report = RunReport::default();
        let curve = build_curve(&h, &["0.1 x 0.3"], &mut report);
        assert!(curve.is_empty());
        assert_eq!(report.errors().count(), 1);
    }

    #[test]
    fn test_non_finite_token_drops_only_its_row() {
        let h = header(&[("XYDATA", "(X++(Y..Y))")]);
        let mut report = RunReport::default();
        let curve = build_curve(&h, &["1000 0.1", "1002 nan", "1004 inf", "1006 0.3"], &mut report);
        let points = expand(&h, "t", &curve).unwrap();
        assert_eq!(xy(&points), vec![(1000.0, 0.1, 0), (1006.0, 0.3, 0)]);
        assert_eq!(report.errors().count(), 2);
    }

    #[test]
    fn test_non_finite_compressed_value_discards_curve() {
        let h = header(&[("XYDATA", "(Y..Y)")]);
        let mut report = RunReport::default();
        assert!(build_curve(&h, &["0.1 -inf 0.3"], &mut report).is_empty());
        assert_eq!(report.errors().count(), 1);
    }

    #[test]
    fn test_pair_table_groups() {
        let h = header(&[("XYPOINTS", "(XY..XY)")]);
        let mut report = RunReport::default();
        let curve = build_curve(&h, &["1000, 0.1; 1002, 0.2", "1004,0.3;", "1006, x"], &mut report);
        let points = expand(&h, "t", &curve).unwrap();
        assert_eq!(
            xy(&points),
            vec![(1000.0, 0.1, 0), (1002.0, 0.2, 0), (1004.0, 0.3, 0)]
        );
        assert_eq!(report.errors().count(), 1);
    }

    #[test]
    fn test_peak_table_ignores_widths() {
        let h = header(&[("PEAK TABLE", "(XYW..XYW)")]);
        let mut report = RunReport::default();
        let curve = build_curve(&h, &["1450, 0.8, 12; 1940, 0.6, 20"], &mut report);
        assert_eq!(
            curve,
            Curve::Explicit(vec![
                XyRow { x: 1450.0, y: vec![0.8] },
                XyRow { x: 1940.0, y: vec![0.6] },
            ])
        );
        assert!(report.events.is_empty());
    }

    #[test]
    fn test_parse_events_use_normalized_timestamp() {
        let h = header(&[("XYDATA", "(X++(Y..Y))")]);
        let mut report = RunReport::default();
        build_curve(&h, &["1000 ?"], &mut report);
        assert!(matches!(
            &report.events[0],
            IngestEvent::NumericParseError { timestamp, .. } if timestamp == "2024-12-30 10:00:00.000"
        ));
    }
}
