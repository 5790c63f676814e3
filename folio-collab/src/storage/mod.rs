//! Persistent storage for article versions.
//!
//! Architecture:
//! ```text
//! ┌──────────────┐   append    ┌──────────────┐
//! │ Persister /  │ ──────────► │ VersionStore │
//! │ Service      │ ◄────────── │ (RocksDB)    │
//! └──────────────┘  snapshots  └──────┬───────┘
//!                                     │ column family
//!                                     ▼
//!                  ┌──────────────────────────────────────┐
//!                  │ CF "versions": article ‖ version(BE) │
//!                  │   → bincode row, LZ4 snapshot        │
//!                  └──────────────────────────────────────┘
//! ```
//!
//! Keys sort by article then version, so the head of an article is one
//! reverse seek away and listing is a single reverse scan.

pub mod versions;

pub use versions::{
    AppendOutcome, DocumentVersion, StoreConfig, StoreError, VersionStore, VersionSummary,
};
