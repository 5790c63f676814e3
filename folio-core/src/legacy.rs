//! Migration of legacy inline-content shapes.
//!
//! Older snapshots store block `content` as bare strings or as nested generic
//! arrays mixing strings and structured nodes. Everything is folded into a flat
//! `Vec<InlineNode>` at decode time, depth-first, so the rest of the crate only
//! ever sees one representation.

use serde::{Deserialize, Deserializer};

use crate::block::InlineNode;

#[derive(Deserialize)]
#[serde(untagged)]
enum LegacyContent {
    Items(Vec<LegacyItem>),
    Plain(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LegacyItem {
    Node(InlineNode),
    Plain(String),
    Group(Vec<LegacyItem>),
}

/// `deserialize_with` hook for inline content fields.
pub(crate) fn inline_content<'de, D>(deserializer: D) -> Result<Vec<InlineNode>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<LegacyContent>::deserialize(deserializer)?;
    let mut out = Vec::new();
    match raw {
        Some(LegacyContent::Items(items)) => {
            for item in items {
                flatten_into(item, &mut out);
            }
        }
        Some(LegacyContent::Plain(text)) => out.push(InlineNode::text(text)),
        None => {}
    }
    Ok(out)
}

fn flatten_into(item: LegacyItem, out: &mut Vec<InlineNode>) {
    match item {
        LegacyItem::Node(node) => out.push(node),
        LegacyItem::Plain(text) => out.push(InlineNode::text(text)),
        LegacyItem::Group(items) => {
            for item in items {
                flatten_into(item, out);
            }
        }
    }
}
