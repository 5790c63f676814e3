//! Comment marker primitives over inline content.
//!
//! Selections are character ranges over a block's visible text (see
//! [`crate::block::plain_text`]). A marker may only replace text that lies in
//! plain text runs; it never splits a link or an existing marker.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::block::{Block, InlineNode, TextRun};

/// Half-open character range `[start, end)` within a block's visible text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TextRange {
    pub start: usize,
    pub end: usize,
}

impl TextRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AnnotateError {
    #[error("selection is empty")]
    EmptySelection,

    #[error("selection {start}..{end} exceeds block text length {len}")]
    OutOfBounds { start: usize, end: usize, len: usize },

    #[error("selection {start}..{end} overlaps a link or comment marker")]
    CrossesInline { start: usize, end: usize },

    #[error("block `{0}` not found")]
    BlockNotFound(String),
}

/// Replace `range` of `content` with a marker for `thread_id`.
///
/// Returns the new content and the text the marker covers.
pub fn splice_marker(
    content: &[InlineNode],
    range: TextRange,
    thread_id: &str,
) -> Result<(Vec<InlineNode>, String), AnnotateError> {
    if range.is_empty() {
        return Err(AnnotateError::EmptySelection);
    }
    let total: usize = content.iter().map(InlineNode::char_len).sum();
    if range.end > total {
        return Err(AnnotateError::OutOfBounds {
            start: range.start,
            end: range.end,
            len: total,
        });
    }

    let mut out = Vec::with_capacity(content.len() + 2);
    let mut selected = String::new();
    let mut marker_at = None;
    let mut offset = 0;

    for node in content {
        let len = node.char_len();
        let (node_start, node_end) = (offset, offset + len);
        offset = node_end;

        let overlaps = node_start < range.end && node_end > range.start;
        if !overlaps {
            out.push(node.clone());
            continue;
        }
        let InlineNode::Text(run) = node else {
            return Err(AnnotateError::CrossesInline {
                start: range.start,
                end: range.end,
            });
        };

        let local_start = range.start.saturating_sub(node_start);
        let local_end = (range.end - node_start).min(len);
        let (before, rest) = split_at_char(&run.text, local_start);
        let (inside, after) = split_at_char(rest, local_end - local_start);

        push_piece(&mut out, run, before);
        if marker_at.is_none() {
            marker_at = Some(out.len());
        }
        selected.push_str(inside);
        push_piece(&mut out, run, after);
    }

    let index = marker_at.unwrap_or(out.len());
    out.insert(index, InlineNode::marker(thread_id, selected.clone()));
    Ok((out, selected))
}

fn split_at_char(text: &str, chars: usize) -> (&str, &str) {
    let byte = text
        .char_indices()
        .nth(chars)
        .map_or(text.len(), |(index, _)| index);
    text.split_at(byte)
}

fn push_piece(out: &mut Vec<InlineNode>, source: &TextRun, text: &str) {
    if !text.is_empty() {
        out.push(InlineNode::styled(text, source.styles));
    }
}

/// Splice a marker into the block with `block_id` anywhere in `blocks`.
pub fn splice_block_marker(
    blocks: &mut [Block],
    block_id: &str,
    range: TextRange,
    thread_id: &str,
) -> Result<String, AnnotateError> {
    let block = blocks
        .iter_mut()
        .find_map(|b| b.find_mut(block_id))
        .ok_or_else(|| AnnotateError::BlockNotFound(block_id.to_string()))?;
    let (content, selected) = splice_marker(&block.content, range, thread_id)?;
    block.content = content;
    Ok(selected)
}

/// Replace every marker for `thread_id` with its commented text.
///
/// Searches link content too. Markers with no stored text are dropped.
/// Returns the number of markers removed.
pub fn strip_markers(content: &mut Vec<InlineNode>, thread_id: &str) -> usize {
    let mut removed = 0;
    let mut out = Vec::with_capacity(content.len());
    for node in content.drain(..) {
        match node {
            InlineNode::Comment(marker) if marker.props.thread_id == thread_id => {
                removed += 1;
                if !marker.props.commented_text.is_empty() {
                    out.push(InlineNode::text(marker.props.commented_text));
                }
            }
            InlineNode::Link(mut link) => {
                removed += strip_markers(&mut link.content, thread_id);
                out.push(InlineNode::Link(link));
            }
            other => out.push(other),
        }
    }
    *content = out;
    removed
}

/// [`strip_markers`] over a block and all of its descendants.
pub fn strip_block_markers(block: &mut Block, thread_id: &str) -> usize {
    let mut removed = strip_markers(&mut block.content, thread_id);
    for child in &mut block.children {
        removed += strip_block_markers(child, thread_id);
    }
    removed
}

/// Every thread id referenced by a marker in `blocks`.
pub fn marker_thread_ids(blocks: &[Block]) -> BTreeSet<String> {
    let mut ids = BTreeSet::new();
    for block in blocks {
        block.walk(&mut |b| collect_ids(&b.content, &mut ids));
    }
    ids
}

fn collect_ids(content: &[InlineNode], ids: &mut BTreeSet<String>) {
    for node in content {
        match node {
            InlineNode::Comment(marker) => {
                ids.insert(marker.props.thread_id.clone());
            }
            InlineNode::Link(link) => collect_ids(&link.content, ids),
            InlineNode::Text(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{plain_text, Styles};

    #[test]
    fn test_splice_inside_single_run() {
        let content = vec![InlineNode::text("Hello brave world")];
        let (out, selected) = splice_marker(&content, TextRange::new(6, 11), "t1").unwrap();
        assert_eq!(selected, "brave");
        assert_eq!(
            out,
            vec![
                InlineNode::text("Hello "),
                InlineNode::marker("t1", "brave"),
                InlineNode::text(" world"),
            ]
        );
        assert_eq!(plain_text(&out), "Hello brave world");
    }

    #[test]
    fn test_splice_across_styled_runs() {
        let bold = Styles {
            bold: true,
            ..Styles::default()
        };
        let content = vec![InlineNode::text("one "), InlineNode::styled("two", bold), InlineNode::text(" three")];
        let (out, selected) = splice_marker(&content, TextRange::new(2, 9), "t").unwrap();
        assert_eq!(selected, "e two t");
        assert_eq!(
            out,
            vec![
                InlineNode::text("on"),
                InlineNode::marker("t", "e two t"),
                InlineNode::text("hree"),
            ]
        );
    }

    #[test]
    fn test_splice_whole_block_and_multibyte() {
        let content = vec![InlineNode::text("héllo")];
        let (out, _) = splice_marker(&content, TextRange::new(0, 5), "t").unwrap();
        assert_eq!(out, vec![InlineNode::marker("t", "héllo")]);

        let (out, selected) = splice_marker(&content, TextRange::new(1, 2), "t").unwrap();
        assert_eq!(selected, "é");
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn test_splice_rejects_bad_selections() {
        let content = vec![
            InlineNode::text("abc "),
            InlineNode::link("https://x.example", "link", Styles::default()),
        ];
        assert_eq!(
            splice_marker(&content, TextRange::new(2, 2), "t"),
            Err(AnnotateError::EmptySelection)
        );
        assert_eq!(
            splice_marker(&content, TextRange::new(0, 99), "t"),
            Err(AnnotateError::OutOfBounds {
                start: 0,
                end: 99,
                len: 8
            })
        );
        assert_eq!(
            splice_marker(&content, TextRange::new(2, 6), "t"),
            Err(AnnotateError::CrossesInline { start: 2, end: 6 })
        );
        // adjacent to the link without touching it
        assert!(splice_marker(&content, TextRange::new(0, 4), "t").is_ok());
    }

    #[test]
    fn test_strip_restores_text() {
        let mut content = vec![
            InlineNode::text("Say "),
            InlineNode::marker("t1", "hello"),
            InlineNode::marker("t2", "keep"),
        ];
        assert_eq!(strip_markers(&mut content, "t1"), 1);
        assert_eq!(
            content,
            vec![
                InlineNode::text("Say "),
                InlineNode::text("hello"),
                InlineNode::marker("t2", "keep"),
            ]
        );
    }

    #[test]
    fn test_strip_skips_empty_text_and_reaches_links() {
        let mut content = vec![
            InlineNode::marker("t1", ""),
            InlineNode::Link(crate::block::Link {
                href: "https://x.example".into(),
                content: vec![InlineNode::marker("t1", "inner")],
            }),
        ];
        assert_eq!(strip_markers(&mut content, "t1"), 2);
        assert_eq!(
            content,
            vec![InlineNode::link("https://x.example", "inner", Styles::default())]
        );
    }

    #[test]
    fn test_strip_block_markers_recurses() {
        let mut block = Block::new("p", crate::block::BlockKind::Paragraph, vec![InlineNode::marker("t", "a")])
            .with_children(vec![Block::new(
                "c",
                crate::block::BlockKind::Quote,
                vec![InlineNode::marker("t", "b")],
            )]);
        assert_eq!(strip_block_markers(&mut block, "t"), 2);
        assert_eq!(block.children[0].plain_text(), "b");
        assert_eq!(strip_block_markers(&mut block, "t"), 0);
    }

    #[test]
    fn test_marker_thread_ids() {
        let blocks = vec![
            Block::new("a", crate::block::BlockKind::Paragraph, vec![InlineNode::marker("t2", "x")]),
            Block::paragraph("b", "").with_children(vec![Block::new(
                "c",
                crate::block::BlockKind::Paragraph,
                vec![InlineNode::marker("t1", "y"), InlineNode::marker("t2", "z")],
            )]),
        ];
        let ids: Vec<_> = marker_thread_ids(&blocks).into_iter().collect();
        assert_eq!(ids, vec!["t1".to_string(), "t2".to_string()]);
    }

    #[test]
    fn test_splice_block_marker_nested() {
        let mut blocks = vec![Block::paragraph("a", "top").with_children(vec![Block::paragraph("b", "nested text")])];
        let selected = splice_block_marker(&mut blocks, "b", TextRange::new(0, 6), "t").unwrap();
        assert_eq!(selected, "nested");
        assert_eq!(
            splice_block_marker(&mut blocks, "zz", TextRange::new(0, 1), "t"),
            Err(AnnotateError::BlockNotFound("zz".into()))
        );
    }
}
