use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime};

/// Storage format of every normalized timestamp. Lexicographic order equals
/// chronological order.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// `valid_to` of a current header version.
pub const OPEN_VALIDITY_END: &str = "9999-12-31 23:59:59.000";

/// Layouts seen in `LONG DATE` fields, most specific first.
const ZONED_FORMATS: [&str; 2] = ["%Y/%m/%d %H:%M:%S%.f %z", "%Y-%m-%dT%H:%M:%S%.f%:z"];
const NAIVE_FORMATS: [&str; 5] = [
    "%Y/%m/%d %H:%M:%S%.f",
    "%Y/%m/%d %H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%d/%m/%Y %H:%M:%S",
];

/// Parse an instrument timestamp. Zoned values keep their local wall time.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    ZONED_FORMATS
        .iter()
        .find_map(|f| DateTime::parse_from_str(raw, f).ok())
        .map(|dt| dt.naive_local())
        .or_else(|| {
            NAIVE_FORMATS
                .iter()
                .find_map(|f| NaiveDateTime::parse_from_str(raw, f).ok())
        })
}

/// Normalize a timestamp for storage. On failure the trimmed raw text is
/// returned as the error so the caller can warn and keep going with it.
pub fn normalize_timestamp(raw: &str) -> Result<String, String> {
    parse_timestamp(raw)
        .map(|ts| ts.format(TIMESTAMP_FORMAT).to_string())
        .ok_or_else(|| raw.trim().to_string())
}

/// A warning message when a percentage lies outside `[0, 100]`.
pub fn percentage_warning(column: &str, value: f64) -> Option<String> {
    if (0.0..=100.0).contains(&value) {
        None
    } else {
        Some(format!("{column} = {value} is outside 0..100"))
    }
}

/// Titles that occur more than once, with their counts, in first-seen order.
pub fn duplicate_titles<'a>(titles: impl IntoIterator<Item = &'a str>) -> Vec<(&'a str, usize)> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    let mut order = Vec::new();
    for title in titles {
        let n = counts.entry(title).or_insert(0);
        if *n == 0 {
            order.push(title);
        }
        *n += 1;
    }
    order
        .into_iter()
        .filter_map(|t| counts.get(t).filter(|&&n| n > 1).map(|&n| (t, n)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalizes_common_layouts() {
        assert_eq!(
            normalize_timestamp("2024/12/30 10:15:32").unwrap(),
            "2024-12-30 10:15:32.000"
        );
        assert_eq!(
            normalize_timestamp(" 2024/12/30 10:15:32.25 +0200").unwrap(),
            "2024-12-30 10:15:32.250"
        );
        assert_eq!(
            normalize_timestamp("30/12/2024 10:15:32").unwrap(),
            "2024-12-30 10:15:32.000"
        );
    }

    #[test]
    fn test_unparsable_timestamp_returns_raw() {
        assert_eq!(normalize_timestamp(" yesterday ").unwrap_err(), "yesterday");
    }

    #[test]
    fn test_open_end_sorts_last() {
        let ts = normalize_timestamp("2999/01/01 00:00:00").unwrap();
        assert!(ts.as_str() < OPEN_VALIDITY_END);
    }

    #[test]
    fn test_percentage_bounds() {
        assert!(percentage_warning("protein_percent", 12.5).is_none());
        assert!(percentage_warning("protein_percent", 100.0).is_none());
        assert_eq!(
            percentage_warning("n_percent", 101.0).unwrap(),
            "n_percent = 101 is outside 0..100"
        );
    }

    #[test]
    fn test_duplicate_titles() {
        let dups = duplicate_titles(["b", "a", "b", "c", "a", "b"]);
        assert_eq!(dups, vec![("b", 3), ("a", 2)]);
        assert!(duplicate_titles(["x", "y"]).is_empty());
    }
}
