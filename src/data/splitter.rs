use super::model::TITLE_KEY;

/// Lines of one measurement, borrowed from the export text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawBlock<'a> {
    pub lines: Vec<&'a str>,
}

impl RawBlock<'_> {
    fn is_blank(&self) -> bool {
        self.lines.iter().all(|l| l.trim().is_empty())
    }
}

fn is_block_start(line: &str) -> bool {
    line.strip_prefix("##")
        .and_then(|rest| rest.strip_prefix(TITLE_KEY))
        .is_some_and(|rest| rest.trim_start().starts_with('='))
}

/// Split an export into blocks, one per `##TITLE=` line.
///
/// The marker is only recognised at the start of a line. Anything before the
/// first marker belongs to no measurement and is discarded.
pub fn split_blocks(text: &str) -> Vec<RawBlock<'_>> {
    let mut blocks = Vec::new();
    let mut current: Option<RawBlock<'_>> = None;
    let mut preamble = 0usize;

    for line in text.lines() {
        if is_block_start(line) {
            if let Some(done) = current.take() {
                blocks.push(done);
            }
            current = Some(RawBlock { lines: vec![line] });
        } else if let Some(block) = current.as_mut() {
            block.lines.push(line);
        } else if !line.trim().is_empty() {
            preamble += 1;
        }
    }
    if let Some(done) = current {
        blocks.push(done);
    }

    if preamble > 0 {
        log::debug!("discarded {preamble} non-blank line(s) before the first {TITLE_KEY} marker");
    }

    blocks.retain(|b| !b.is_blank());
    blocks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_splits_on_title_lines() {
        let text = "##TITLE=A\n##LONG DATE=1\n\n##TITLE=B\n##LONG DATE=2\n";
        let blocks = split_blocks(text);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].lines, vec!["##TITLE=A", "##LONG DATE=1", ""]);
        assert_eq!(blocks[1].lines[0], "##TITLE=B");
    }

    #[test]
    fn test_marker_only_at_line_start() {
        let text = "##TITLE=A\n  ##TITLE=not a block\n##SAMPLE DESCRIPTION=see ##TITLE=x\n";
        assert_eq!(split_blocks(text).len(), 1);
    }

    #[test]
    fn test_empty_input_yields_nothing() {
        assert!(split_blocks("").is_empty());
        assert!(split_blocks("   \n\n").is_empty());
        assert!(split_blocks("stray preamble\n").is_empty());
    }

    #[test]
    fn test_crlf_line_endings() {
        let blocks = split_blocks("##TITLE=A\r\n##LONG DATE=1\r\n##TITLE=B\r\n");
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].lines[1], "##LONG DATE=1");
    }
}
