//! # folio-core: Document model and live session for Folio articles
//!
//! An article is a tree of blocks. Snapshots of that tree are what the version
//! log stores; the live, concurrently edited copy is a yrs document.
//!
//! ## Architecture
//!
//! ```text
//!  generated blocks ──► normalize ──┐
//!                                   ▼
//!  snapshot bytes ──► codec ──► DocumentSession (yrs) ──► local updates
//!        ▲                          │   ▲                    (transport)
//!        │                          │   └── remote updates
//!        └──── encode_snapshot ◄────┘
//!                                   │
//!                       annotate: splice / strip comment markers
//! ```
//!
//! ## Modules
//!
//! - [`block`]: Block tree, inline nodes, comment markers
//! - [`codec`]: Snapshot bytes ⇄ block tree, validation
//! - [`normalize`]: Heading reclassification and link extraction
//! - [`annotate`]: Marker splice/strip over inline content
//! - [`session`]: CRDT document session with hydration guard

pub mod annotate;
pub mod block;
pub mod codec;
mod legacy;
pub mod normalize;
pub mod session;

pub use annotate::{AnnotateError, TextRange};
pub use block::{
    empty_document, plain_text, Block, BlockKind, CommentMarker, InlineNode, Link, MarkerProps,
    Styles, TextRun, INITIAL_BLOCK_ID,
};
pub use codec::{decode_blocks, encode_blocks, CodecError};
pub use normalize::normalize;
pub use session::{
    ChangeListener, ContentChange, DocumentSession, HydrationGuard, ListenerId, SessionError,
};

/// Session id recorded on the bootstrap version of every article.
pub const INITIAL_SESSION_ID: &str = "initial";
