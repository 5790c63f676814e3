//! Snapshot codec: block tree ⇄ bytes.
//!
//! A snapshot is the JSON encoding of a non-empty list of blocks with unique
//! ids. Encoding is deterministic: equal trees always produce equal bytes, which
//! is what lets the version store deduplicate by byte comparison.

use std::collections::HashSet;

use crate::block::{self, Block};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("malformed document tree: {0}")]
    Malformed(String),

    #[error("document tree has no blocks")]
    Empty,

    #[error("duplicate block id `{0}`")]
    DuplicateBlockId(String),

    #[error("failed to encode document tree: {0}")]
    Encode(String),
}

/// Decode and validate snapshot bytes.
pub fn decode_blocks(bytes: &[u8]) -> Result<Vec<Block>, CodecError> {
    let blocks: Vec<Block> =
        serde_json::from_slice(bytes).map_err(|e| CodecError::Malformed(e.to_string()))?;
    validate_blocks(&blocks)?;
    Ok(blocks)
}

/// Encode a block tree as snapshot bytes.
pub fn encode_blocks(blocks: &[Block]) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(blocks).map_err(|e| CodecError::Encode(e.to_string()))
}

/// Structural checks shared by decode and session writes.
pub fn validate_blocks(blocks: &[Block]) -> Result<(), CodecError> {
    if blocks.is_empty() {
        return Err(CodecError::Empty);
    }
    let mut seen = HashSet::new();
    let mut stack: Vec<&Block> = blocks.iter().collect();
    while let Some(block) = stack.pop() {
        if !seen.insert(block.id.as_str()) {
            return Err(CodecError::DuplicateBlockId(block.id.clone()));
        }
        stack.extend(block.children.iter());
    }
    Ok(())
}

/// Snapshot bytes of the bootstrap document.
pub fn empty_snapshot() -> Result<Vec<u8>, CodecError> {
    encode_blocks(&block::empty_document())
}
