use thiserror::Error;

use super::model::{Header, HeaderField, MissingIdentity, TITLE_KEY};
use super::splitter::RawBlock;
use crate::report::DropReason;

/// Keys whose value announces that the remaining lines are numeric data.
const DATA_KEYS: [&str; 3] = ["XYDATA", "XYPOINTS", "PEAK TABLE"];
const END_KEY: &str = "END";
/// Title of the compound-file container block.
const TITLE_SENTINEL: &str = "DATA";
const LINK_DATA_TYPE: &str = "LINK";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("block has no {0} field")]
    Structural(MissingIdentity),
}

/// A block reduced to its header plus the verbatim lines of its data region.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedBlock<'a> {
    pub header: Header,
    pub data_lines: Vec<&'a str>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BlockOutcome<'a> {
    Parsed(ParsedBlock<'a>),
    /// A structural artifact of the export format rather than a measurement.
    Dropped {
        title: Option<String>,
        reason: DropReason,
    },
}

/// Split a `##KEY=VALUE` line. Key is upper-cased and trimmed, value trimmed.
fn header_pair(line: &str) -> Option<(String, String)> {
    let rest = line.strip_prefix("##")?;
    let (key, value) = rest.split_once('=')?;
    let key = key.trim().to_ascii_uppercase();
    if key.is_empty() {
        return None;
    }
    Some((key, value.trim().to_string()))
}

/// Extract the header and data lines of one block.
pub fn parse_block<'a>(
    block: &RawBlock<'a>,
    source_file: &str,
) -> Result<BlockOutcome<'a>, ParseError> {
    let mut pairs: Vec<(String, String)> = Vec::new();
    let mut data_lines = Vec::new();
    let mut in_data = false;

    for &line in &block.lines {
        if line.starts_with("$$") {
            continue;
        }
        if let Some((key, value)) = header_pair(line) {
            if key == END_KEY {
                in_data = false;
                continue;
            }
            if !in_data {
                in_data = DATA_KEYS.contains(&key.as_str());
                pairs.push((key, value));
                continue;
            }
        }
        if in_data {
            data_lines.push(line);
        }
    }

    let lookup = |wanted: &str| {
        pairs
            .iter()
            .rev()
            .find(|(k, _)| k == wanted)
            .map(|(_, v)| v.as_str())
    };
    let title = lookup(TITLE_KEY);
    if title == Some(TITLE_SENTINEL) {
        return Ok(BlockOutcome::Dropped {
            title: title.map(str::to_string),
            reason: DropReason::TitleSentinel,
        });
    }
    if lookup(HeaderField::DataType.key()).is_some_and(|t| t.eq_ignore_ascii_case(LINK_DATA_TYPE)) {
        return Ok(BlockOutcome::Dropped {
            title: title.map(str::to_string),
            reason: DropReason::LinkBlock,
        });
    }

    let mut header = Header::from_pairs(pairs).map_err(ParseError::Structural)?;
    header.set(HeaderField::SourceFile, source_file);

    Ok(BlockOutcome::Parsed(ParsedBlock { header, data_lines }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::splitter::split_blocks;

    fn parse_one(text: &str) -> Result<BlockOutcome<'_>, ParseError> {
        let blocks = split_blocks(text);
        assert_eq!(blocks.len(), 1);
        let block = blocks.into_iter().next().unwrap();
        parse_block(&block, "device2.dx")
    }

    fn parsed(text: &str) -> ParsedBlock<'_> {
        match parse_one(text).unwrap() {
            BlockOutcome::Parsed(p) => p,
            other => panic!("expected parsed block, got {other:?}"),
        }
    }

    #[test]
    fn test_extracts_header_and_data() {
        let text = "##TITLE= Wheat 01 \n##long date=2024/12/30 10:15:32\n\
                    ##Instrument S/N=1234\n##VENDOR-X=abc\n##XYDATA=(X++(Y..Y))\n\
                    1000 0.1 0.2\n1002 0.3 0.4\n##END=\n";
        let block = parsed(text);
        assert_eq!(block.header.title, "Wheat 01");
        assert_eq!(block.header.acquired, "2024/12/30 10:15:32");
        assert_eq!(block.header.get(HeaderField::InstrumentSn), Some("1234"));
        assert_eq!(block.header.get(HeaderField::XyData), Some("(X++(Y..Y))"));
        assert_eq!(block.header.source_file(), Some("device2.dx"));
        assert_eq!(block.header.extra.get("VENDOR-X").map(String::as_str), Some("abc"));
        assert_eq!(block.data_lines, vec!["1000 0.1 0.2", "1002 0.3 0.4"]);
    }

    #[test]
    fn test_data_region_lines_are_not_headers() {
        let text = "##TITLE=S\n##LONG DATE=d\n##XYDATA=(X++(Y..Y))\n1000 1\n##NPOINTS=7\n##END=\n";
        let block = parsed(text);
        assert_eq!(block.data_lines, vec!["1000 1", "##NPOINTS=7"]);
        assert_eq!(block.header.get(HeaderField::NPoints), None);
    }

    #[test]
    fn test_comments_are_skipped() {
        let text = "##TITLE=S\n$$ operator note\n##LONG DATE=d\n##XYDATA=(X++(Y..Y))\n$$ c\n1 2\n";
        assert_eq!(parsed(text).data_lines, vec!["1 2"]);
    }

    #[test]
    fn test_drop_rules() {
        let container = parse_one("##TITLE=DATA\n##BLOCKS=3\n").unwrap();
        assert_eq!(
            container,
            BlockOutcome::Dropped {
                title: Some("DATA".into()),
                reason: DropReason::TitleSentinel
            }
        );
        let link = parse_one("##TITLE=S\n##DATA TYPE=LINK\n").unwrap();
        assert!(matches!(
            link,
            BlockOutcome::Dropped {
                reason: DropReason::LinkBlock,
                ..
            }
        ));
    }

    #[test]
    fn test_missing_timestamp_is_structural() {
        let err = parse_one("##TITLE=S\n##XYDATA=(X++(Y..Y))\n1 2\n").unwrap_err();
        assert_eq!(err, ParseError::Structural(MissingIdentity::Timestamp));
        assert_eq!(err.to_string(), "block has no LONG DATE field");
    }
}
