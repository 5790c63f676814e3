//! Content normalizer for externally generated blocks.
//!
//! Three fixed passes, applied to every block and its children:
//!
//! ```text
//!   1. headings:  demote prose-like headings, clamp heading levels
//!   2. markdown:  [label](url) in paragraph text → link node
//!   3. bare urls: http(s)://… in paragraph text → link node
//! ```
//!
//! [`normalize`] is pure and idempotent: running it on its own output changes
//! nothing.

pub mod headings;
pub mod links;

pub use headings::{
    clamp_level, is_explanatory, paragraph_rule, ParagraphRule, EXPLANATORY_MARKERS,
    PARAGRAPH_RULES,
};
pub use links::{extract_bare_urls, extract_links, extract_markdown_links, TRAILING_PUNCTUATION};

use crate::block::Block;

/// Normalize a list of blocks, recursing into children.
pub fn normalize(blocks: Vec<Block>) -> Vec<Block> {
    blocks.into_iter().map(normalize_block).collect()
}

fn normalize_block(mut block: Block) -> Block {
    headings::reclassify(&mut block);
    if block.is_paragraph() {
        block.content = links::extract_links(std::mem::take(&mut block.content));
    }
    block.children = normalize(std::mem::take(&mut block.children));
    block
}
