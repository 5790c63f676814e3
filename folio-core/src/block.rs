//! Block tree model for article documents.
//!
//! A document is an ordered list of [`Block`]s. Every block and every inline
//! node is an exhaustive tagged union keyed by `type` in JSON:
//!
//! ```text
//! Block      { id, type, props?, content: [InlineNode], children: [Block] }
//! InlineNode = text    { text, styles }
//!            | link    { href, content: [InlineNode] }
//!            | comment { props: { threadId, commentedText } }
//! ```
//!
//! Unknown `type` tags fail to decode. Legacy content shapes are folded into
//! this single representation by [`crate::legacy`].

use serde::{Deserialize, Serialize};

use crate::legacy;

/// Block id of the bootstrap document's only block.
pub const INITIAL_BLOCK_ID: &str = "initial";

/// Heading level used when a heading carries none.
pub const DEFAULT_HEADING_LEVEL: i64 = 2;

/// Inclusive bounds for heading levels.
pub const HEADING_LEVELS: std::ops::RangeInclusive<i64> = 1..=6;

/// A single block of an article document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub id: String,
    #[serde(flatten)]
    pub kind: BlockKind,
    #[serde(default, deserialize_with = "legacy::inline_content")]
    pub content: Vec<InlineNode>,
    #[serde(default)]
    pub children: Vec<Block>,
}

/// Block kinds understood by the editor schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum BlockKind {
    Paragraph,
    Heading {
        #[serde(default)]
        props: HeadingProps,
    },
    BulletListItem,
    NumberedListItem,
    CheckListItem {
        #[serde(default)]
        props: CheckListProps,
    },
    Quote,
    CodeBlock {
        #[serde(default)]
        props: CodeBlockProps,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadingProps {
    /// Raw level as received; may be missing or out of range until normalized.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckListProps {
    #[serde(default)]
    pub checked: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeBlockProps {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

/// Inline content of a block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum InlineNode {
    Text(TextRun),
    Link(Link),
    Comment(CommentMarker),
}

/// A run of text sharing one set of styles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextRun {
    pub text: String,
    #[serde(default)]
    pub styles: Styles,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Styles {
    #[serde(default, skip_serializing_if = "is_false")]
    pub bold: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub italic: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub underline: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub strike: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub code: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub href: String,
    #[serde(default, deserialize_with = "legacy::inline_content")]
    pub content: Vec<InlineNode>,
}

/// Inline marker anchoring a comment thread inside the document.
///
/// The marker replaces the commented span; `commented_text` keeps that span so
/// the marker can be turned back into plain text when the thread goes away.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentMarker {
    pub props: MarkerProps,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkerProps {
    #[serde(alias = "commentId")]
    pub thread_id: String,
    #[serde(default, alias = "text")]
    pub commented_text: String,
}

impl Block {
    pub fn new(id: impl Into<String>, kind: BlockKind, content: Vec<InlineNode>) -> Self {
        Self {
            id: id.into(),
            kind,
            content,
            children: Vec::new(),
        }
    }

    /// Paragraph holding one plain text run.
    pub fn paragraph(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(id, BlockKind::Paragraph, vec![InlineNode::text(text)])
    }

    /// Heading holding one plain text run.
    pub fn heading(id: impl Into<String>, level: Option<i64>, text: impl Into<String>) -> Self {
        Self::new(
            id,
            BlockKind::Heading {
                props: HeadingProps { level },
            },
            vec![InlineNode::text(text)],
        )
    }

    pub fn with_children(mut self, children: Vec<Block>) -> Self {
        self.children = children;
        self
    }

    pub fn is_heading(&self) -> bool {
        matches!(self.kind, BlockKind::Heading { .. })
    }

    pub fn is_paragraph(&self) -> bool {
        matches!(self.kind, BlockKind::Paragraph)
    }

    /// Visible text of this block's own content (children excluded).
    pub fn plain_text(&self) -> String {
        plain_text(&self.content)
    }

    /// Find a block by id in this block or its descendants.
    pub fn find(&self, id: &str) -> Option<&Block> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(id))
    }

    pub fn find_mut(&mut self, id: &str) -> Option<&mut Block> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter_mut().find_map(|child| child.find_mut(id))
    }

    /// Visit this block and all descendants, depth-first.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Block)) {
        visit(self);
        for child in &self.children {
            child.walk(visit);
        }
    }
}

impl InlineNode {
    /// Unstyled text run.
    pub fn text(text: impl Into<String>) -> Self {
        InlineNode::Text(TextRun {
            text: text.into(),
            styles: Styles::default(),
        })
    }

    pub fn styled(text: impl Into<String>, styles: Styles) -> Self {
        InlineNode::Text(TextRun {
            text: text.into(),
            styles,
        })
    }

    /// Link whose label is a single run with the given styles.
    pub fn link(href: impl Into<String>, label: impl Into<String>, styles: Styles) -> Self {
        InlineNode::Link(Link {
            href: href.into(),
            content: vec![InlineNode::styled(label, styles)],
        })
    }

    pub fn marker(thread_id: impl Into<String>, commented_text: impl Into<String>) -> Self {
        InlineNode::Comment(CommentMarker {
            props: MarkerProps {
                thread_id: thread_id.into(),
                commented_text: commented_text.into(),
            },
        })
    }

    /// Append the visible text of this node to `out`.
    ///
    /// Links contribute their label, markers the text they cover.
    pub fn write_text(&self, out: &mut String) {
        match self {
            InlineNode::Text(run) => out.push_str(&run.text),
            InlineNode::Link(link) => {
                for node in &link.content {
                    node.write_text(out);
                }
            }
            InlineNode::Comment(marker) => out.push_str(&marker.props.commented_text),
        }
    }

    /// Visible length in characters.
    pub fn char_len(&self) -> usize {
        match self {
            InlineNode::Text(run) => run.text.chars().count(),
            InlineNode::Link(link) => link.content.iter().map(InlineNode::char_len).sum(),
            InlineNode::Comment(marker) => marker.props.commented_text.chars().count(),
        }
    }

    pub fn thread_id(&self) -> Option<&str> {
        match self {
            InlineNode::Comment(marker) => Some(&marker.props.thread_id),
            _ => None,
        }
    }
}

/// Visible text of a list of inline nodes.
pub fn plain_text(nodes: &[InlineNode]) -> String {
    let mut out = String::new();
    for node in nodes {
        node.write_text(&mut out);
    }
    out
}

/// The document every article starts from: one empty paragraph.
pub fn empty_document() -> Vec<Block> {
    vec![Block::paragraph(INITIAL_BLOCK_ID, "")]
}
