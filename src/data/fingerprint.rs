use std::collections::BTreeMap;
use std::fmt;

use sha2::{Digest, Sha256};

use super::model::{ColumnKind, Header, HeaderField};

/// Lower-case hex SHA-256 over a header's versioned content.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Wrap a digest read back from the store.
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Fingerprint(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Numeric parameters are compared by value, so `1000` and `1000.0` agree.
fn normalize(field: HeaderField, value: &str) -> String {
    let value = value.trim();
    if field.column_kind() != ColumnKind::Text {
        if let Ok(v) = value.parse::<f64>() {
            return v.to_string();
        }
    }
    value.to_string()
}

/// Canonical text that the fingerprint is computed over: a JSON object of the
/// fingerprinted, non-empty fields keyed by export key in sorted order.
pub fn canonical_form(header: &Header) -> String {
    let subset: BTreeMap<&'static str, String> = header
        .fields
        .iter()
        .filter(|(field, value)| field.is_fingerprinted() && !value.trim().is_empty())
        .map(|(field, value)| (field.key(), normalize(*field, value)))
        .collect();
    // A map of strings always serializes.
    serde_json::to_string(&subset).unwrap_or_default()
}

/// Digest of the fields that define a header version.
///
/// Title and timestamp are the lookup key and are not hashed; neither are
/// the source file name and vendor extension keys.
pub fn fingerprint(header: &Header) -> Fingerprint {
    let mut hasher = Sha256::new();
    hasher.update(canonical_form(header).as_bytes());
    Fingerprint(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(pairs: &[(&str, &str)]) -> Header {
        let mut all = vec![("TITLE", "S1"), ("LONG DATE", "2024/12/30 10:00:00")];
        all.extend_from_slice(pairs);
        Header::from_pairs(all).unwrap()
    }

    const BASE: [(&str, &str); 4] = [
        ("INSTRUMENT S/N", "1234"),
        ("FIRSTX", "950"),
        ("DELTAX", "2"),
        ("SOURCE_FILE", "a.dx"),
    ];

    #[test]
    fn test_field_order_is_irrelevant() {
        let mut reversed = BASE;
        reversed.reverse();
        assert_eq!(fingerprint(&header(&BASE)), fingerprint(&header(&reversed)));
    }

    #[test]
    fn test_excluded_fields_do_not_change_digest() {
        let base = fingerprint(&header(&BASE));
        let mut moved = header(&BASE);
        moved.set(HeaderField::SourceFile, "b.dx");
        moved.title = "S2".into();
        moved.acquired = "2025/01/01 00:00:00".into();
        moved.extra.insert("JCAMP-DX".into(), "5.01".into());
        assert_eq!(fingerprint(&moved), base);
    }

    #[test]
    fn test_included_field_changes_digest() {
        let base = fingerprint(&header(&BASE));
        let mut changed = header(&BASE);
        changed.set(HeaderField::InstrumentSn, "9999");
        assert_ne!(fingerprint(&changed), base);
    }

    #[test]
    fn test_numeric_normalization() {
        let a = header(&[("FIRSTX", "1000"), ("NPOINTS", "351")]);
        let b = header(&[("FIRSTX", "1000.0 "), ("NPOINTS", "351.0")]);
        assert_eq!(fingerprint(&a), fingerprint(&b));
        assert_eq!(canonical_form(&a), r#"{"FIRSTX":"1000","NPOINTS":"351"}"#);
    }

    #[test]
    fn test_digest_is_hex_sha256() {
        let fp = fingerprint(&header(&[]));
        assert_eq!(fp.as_str().len(), 64);
        // sha256("{}")
        assert_eq!(
            fp.as_str(),
            "44136fa355b3678a1146ad16f7e8649e94fb4fc21fe77e8310c060f61caaff8a"
        );
    }
}
