use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// HeaderField – the closed set of header keys the store knows about
// ---------------------------------------------------------------------------

/// A header key recognised by the ingester.
///
/// Keys outside this set are kept in [`Header::extra`] and travel with the
/// measurement, but are neither fingerprinted nor given their own column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HeaderField {
    DataType,
    InstrumentSn,
    SpectrometerSn,
    InstrumentType,
    SampleDescription,
    Smoothed,
    XUnits,
    YUnits,
    Concentrations,
    PertenTypes,
    PertenRepack,
    PertenRepeat,
    PertenSubscan,
    PertenGoodRepacks,
    PertenTotalRepacks,
    PertenRejected,
    PertenSampleInfo,
    XFactor,
    YFactor,
    FirstX,
    LastX,
    NPoints,
    DeltaX,
    XyData,
    SourceFile,
}

/// Storage type of a field's column in `header_versions`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Text,
    Real,
    Integer,
}

impl HeaderField {
    /// Every known field, in column order.
    pub const ALL: [HeaderField; 25] = [
        HeaderField::DataType,
        HeaderField::InstrumentSn,
        HeaderField::SpectrometerSn,
        HeaderField::InstrumentType,
        HeaderField::SampleDescription,
        HeaderField::Smoothed,
        HeaderField::XUnits,
        HeaderField::YUnits,
        HeaderField::Concentrations,
        HeaderField::PertenTypes,
        HeaderField::PertenRepack,
        HeaderField::PertenRepeat,
        HeaderField::PertenSubscan,
        HeaderField::PertenGoodRepacks,
        HeaderField::PertenTotalRepacks,
        HeaderField::PertenRejected,
        HeaderField::PertenSampleInfo,
        HeaderField::XFactor,
        HeaderField::YFactor,
        HeaderField::FirstX,
        HeaderField::LastX,
        HeaderField::NPoints,
        HeaderField::DeltaX,
        HeaderField::XyData,
        HeaderField::SourceFile,
    ];

    /// The upper-case key as it appears after `##` in an export.
    pub fn key(self) -> &'static str {
        use HeaderField::*;
        match self {
            DataType => "DATA TYPE",
            InstrumentSn => "INSTRUMENT S/N",
            SpectrometerSn => "SPECTROMETER S/N",
            InstrumentType => "INSTRUMENT TYPE",
            SampleDescription => "SAMPLE DESCRIPTION",
            Smoothed => "SMOOTHED",
            XUnits => "XUNITS",
            YUnits => "YUNITS",
            Concentrations => "CONCENTRATIONS",
            PertenTypes => "PERTEN-TYPES",
            PertenRepack => "PERTEN-REPACK",
            PertenRepeat => "PERTEN-REPEAT",
            PertenSubscan => "PERTEN-SUBSCAN",
            PertenGoodRepacks => "PERTEN-GOODREPACKS",
            PertenTotalRepacks => "PERTEN-TOTALREPACKS",
            PertenRejected => "PERTEN-REJECTED",
            PertenSampleInfo => "PERTEN-SAMPLEINFO",
            XFactor => "XFACTOR",
            YFactor => "YFACTOR",
            FirstX => "FIRSTX",
            LastX => "LASTX",
            NPoints => "NPOINTS",
            DeltaX => "DELTAX",
            XyData => "XYDATA",
            SourceFile => "SOURCE_FILE",
        }
    }

    /// Column name in `header_versions`.
    pub fn column(self) -> &'static str {
        use HeaderField::*;
        match self {
            DataType => "data_type",
            InstrumentSn => "instrument_sn",
            SpectrometerSn => "spectrometer_sn",
            InstrumentType => "instrument_type",
            SampleDescription => "sample_description",
            Smoothed => "smoothed",
            XUnits => "xunits",
            YUnits => "yunits",
            Concentrations => "concentrations",
            PertenTypes => "perten_types",
            PertenRepack => "perten_repack",
            PertenRepeat => "perten_repeat",
            PertenSubscan => "perten_subscan",
            PertenGoodRepacks => "perten_goodrepacks",
            PertenTotalRepacks => "perten_totalrepacks",
            PertenRejected => "perten_rejected",
            PertenSampleInfo => "perten_sampleinfo",
            XFactor => "xfactor",
            YFactor => "yfactor",
            FirstX => "firstx",
            LastX => "lastx",
            NPoints => "npoints",
            DeltaX => "deltax",
            XyData => "xydata",
            SourceFile => "source_file",
        }
    }

    pub fn column_kind(self) -> ColumnKind {
        use HeaderField::*;
        match self {
            XFactor | YFactor | FirstX | LastX | DeltaX => ColumnKind::Real,
            NPoints => ColumnKind::Integer,
            _ => ColumnKind::Text,
        }
    }

    /// Whether a change in this field makes a new header version.
    /// The source file name is audit data only.
    pub fn is_fingerprinted(self) -> bool {
        self != HeaderField::SourceFile
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|f| f.key() == key)
    }
}

impl fmt::Display for HeaderField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Header key of the measurement title; also the block-start marker.
pub const TITLE_KEY: &str = "TITLE";
/// Header key of the acquisition timestamp.
pub const LONG_DATE_KEY: &str = "LONG DATE";

// ---------------------------------------------------------------------------
// Header – identity + known fields + vendor extensions
// ---------------------------------------------------------------------------

/// Parsed header of one measurement.
///
/// `title` and `acquired` are the natural identity of a measurement and are
/// always non-empty; construction goes through [`Header::from_pairs`].
#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    pub title: String,
    /// Raw `LONG DATE` value as exported.
    pub acquired: String,
    pub fields: BTreeMap<HeaderField, String>,
    /// Keys outside [`HeaderField`], e.g. `JCAMP-DX` or vendor extensions.
    pub extra: BTreeMap<String, String>,
}

/// Which identity field a header is missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingIdentity {
    Title,
    Timestamp,
}

impl fmt::Display for MissingIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MissingIdentity::Title => f.write_str(TITLE_KEY),
            MissingIdentity::Timestamp => f.write_str(LONG_DATE_KEY),
        }
    }
}

impl Header {
    /// Build a header from upper-case key/value pairs. Later duplicates win.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, MissingIdentity>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut title = None;
        let mut acquired = None;
        let mut fields = BTreeMap::new();
        let mut extra = BTreeMap::new();

        for (key, value) in pairs {
            let key: String = key.into();
            let value: String = value.into();
            match key.as_str() {
                TITLE_KEY => title = Some(value),
                LONG_DATE_KEY => acquired = Some(value),
                other => match HeaderField::from_key(other) {
                    Some(field) => {
                        fields.insert(field, value);
                    }
                    None => {
                        extra.insert(key, value);
                    }
                },
            }
        }

        let title = title
            .filter(|t| !t.trim().is_empty())
            .ok_or(MissingIdentity::Title)?;
        let acquired = acquired
            .filter(|d| !d.trim().is_empty())
            .ok_or(MissingIdentity::Timestamp)?;

        Ok(Header {
            title,
            acquired,
            fields,
            extra,
        })
    }

    pub fn get(&self, field: HeaderField) -> Option<&str> {
        self.fields.get(&field).map(String::as_str)
    }

    pub fn set(&mut self, field: HeaderField, value: impl Into<String>) {
        self.fields.insert(field, value.into());
    }

    /// Numeric value of a field: `None` when absent or blank, `Some(Err)`
    /// when present but not a number.
    pub fn number(&self, field: HeaderField) -> Option<Result<f64, String>> {
        let raw = self.get(field)?.trim();
        if raw.is_empty() {
            return None;
        }
        Some(raw.parse::<f64>().map_err(|_| raw.to_string()))
    }

    pub fn source_file(&self) -> Option<&str> {
        self.get(HeaderField::SourceFile)
    }

    /// All entries under their export keys, identity included.
    pub fn to_pairs(&self) -> BTreeMap<String, String> {
        let mut out = self.extra.clone();
        for (field, value) in &self.fields {
            out.insert(field.key().to_string(), value.clone());
        }
        out.insert(TITLE_KEY.to_string(), self.title.clone());
        out.insert(LONG_DATE_KEY.to_string(), self.acquired.clone());
        out
    }
}

// ---------------------------------------------------------------------------
// Curve – the spectral payload of one block
// ---------------------------------------------------------------------------

/// One explicit data row: an abscissa and one or more ordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XyRow {
    #[serde(rename = "X")]
    pub x: f64,
    #[serde(rename = "Y")]
    pub y: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Curve {
    /// `(x, [y..])` rows in source order.
    Explicit(Vec<XyRow>),
    /// Flat y-values; abscissae are synthesized from `FIRSTX`, `DELTAX`
    /// and `NPOINTS` of the header.
    Compressed(Vec<f64>),
}

impl Default for Curve {
    fn default() -> Self {
        Curve::Explicit(Vec::new())
    }
}

impl Curve {
    pub fn is_empty(&self) -> bool {
        match self {
            Curve::Explicit(rows) => rows.is_empty(),
            Curve::Compressed(ys) => ys.is_empty(),
        }
    }
}

// ---------------------------------------------------------------------------
// Measurement / SpectralPoint
// ---------------------------------------------------------------------------

/// A parsed block: the unit passed from the parse phase to the load phase.
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    pub header: Header,
    pub curve: Curve,
}

/// The flattened unit written to `spectral_points`.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectralPoint {
    pub title: String,
    pub timestamp: String,
    pub x: f64,
    pub y: f64,
    /// Position of `y` within its row; not a global ordinal.
    pub index: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_pairs_sorts_known_and_extra() {
        let header = Header::from_pairs([
            ("TITLE", "S1"),
            ("LONG DATE", "2024/12/30 10:00:00"),
            ("FIRSTX", "1000"),
            ("JCAMP-DX", "4.24"),
        ])
        .unwrap();
        assert_eq!(header.title, "S1");
        assert_eq!(header.get(HeaderField::FirstX), Some("1000"));
        assert_eq!(header.extra.get("JCAMP-DX").map(String::as_str), Some("4.24"));
    }

    #[test]
    fn test_from_pairs_requires_identity() {
        assert_eq!(
            Header::from_pairs([("LONG DATE", "2024/12/30")]).unwrap_err(),
            MissingIdentity::Title
        );
        assert_eq!(
            Header::from_pairs([("TITLE", "S1"), ("LONG DATE", "  ")]).unwrap_err(),
            MissingIdentity::Timestamp
        );
    }

    #[test]
    fn test_number_distinguishes_absent_and_invalid() {
        let mut header =
            Header::from_pairs([("TITLE", "S1"), ("LONG DATE", "2024/12/30")]).unwrap();
        assert!(header.number(HeaderField::DeltaX).is_none());
        header.set(HeaderField::DeltaX, "abc");
        assert_eq!(header.number(HeaderField::DeltaX), Some(Err("abc".to_string())));
        header.set(HeaderField::DeltaX, " 2.5 ");
        assert_eq!(header.number(HeaderField::DeltaX), Some(Ok(2.5)));
    }

    #[test]
    fn test_key_lookup_covers_all_fields() {
        for field in HeaderField::ALL {
            assert_eq!(HeaderField::from_key(field.key()), Some(field));
        }
        assert_eq!(HeaderField::from_key("TITLE"), None);
    }
}
