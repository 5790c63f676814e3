//! # folio-collab: Versioning, persistence and comments for Folio articles
//!
//! Builds on the document model of `folio-core`: stores snapshots in an
//! append-only RocksDB log, persists live sessions on a debounce, keeps
//! comment markers in step with the thread store and fans updates out
//! between replicas of one article.
//!
//! ## Architecture
//!
//! ```text
//!                  ┌──────────────────┐
//!   editors ─────► │ DocumentSession  │ ◄──── ReplicationHub ────► other replicas
//!                  │ (folio-core)     │
//!                  └───┬──────────┬───┘
//!          on_change   │          │  splice / strip markers
//!                      ▼          ▼
//!              ┌───────────┐  ┌─────────────────┐
//!              │ Persister │  │ AnnotationIndex │ ◄──► ThreadApi
//!              │ (debounce)│  └─────────────────┘
//!              └─────┬─────┘
//!                    ▼
//!              ┌──────────────┐      ┌─────────────────┐
//!              │ VersionStore │ ◄─── │ DocumentService │ ◄──── readers
//!              │ (RocksDB)    │      └─────────────────┘
//!              └──────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`storage`]: Append-only version log (RocksDB + bincode + LZ4)
//! - [`service`]: Latest/version/list/append/restore, session opening
//! - [`persist`]: Debounced session → version persistence
//! - [`annotations`]: Comment threads and their inline markers
//! - [`broadcast`]: Per-article fan-out of CRDT updates

pub mod annotations;
pub mod broadcast;
pub mod persist;
pub mod service;
pub mod storage;

pub use annotations::{
    AnnotationError, AnnotationIndex, Comment, CommentThread, MemoryThreadApi, NewThread,
    Selection, SessionContext, ThreadAction, ThreadAnchor, ThreadApi, ThreadApiError,
};
pub use broadcast::{ArticleChannel, ChannelStats, HubConfig, RemoteUpdate, Replica, ReplicationHub};
pub use persist::{PersistConfig, PersistError, PersistStats, Persister};
pub use service::{ArticleDirectory, DocumentService, LatestDocument, RestoredVersion, ServiceError};
pub use storage::{
    AppendOutcome, DocumentVersion, StoreConfig, StoreError, VersionStore, VersionSummary,
};
