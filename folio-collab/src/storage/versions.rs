//! RocksDB-backed append-only version log.
//!
//! Column family:
//! - `versions`: one row per `(article_id, version)`, snapshot LZ4 compressed
//!
//! Key format: `<article_id:16 bytes><version:8 bytes big-endian>`, so an
//! article's versions are contiguous and sorted. The head is found with a
//! reverse seek from `(article_id, u64::MAX)`.
//!
//! Appends are serialized per store by `append_lock`; "head + 1" is computed
//! and written under it, so two appends never claim the same version.

use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode,
    Direction, IteratorMode, Options, SingleThreaded, WriteBatch, WriteOptions,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;
use uuid::Uuid;

use folio_core::codec::{self, CodecError};
use folio_core::INITIAL_SESSION_ID;

const CF_VERSIONS: &str = "versions";

const KEY_LEN: usize = 24;

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Block cache size in bytes (default: 128MB)
    pub block_cache_size: usize,
    /// Bloom filter bits per key (default: 10)
    pub bloom_filter_bits: i32,
    /// fsync on every append (default: true)
    pub sync_writes: bool,
    /// Max open files for RocksDB (default: 512)
    pub max_open_files: i32,
    /// Write buffer size (default: 32MB)
    pub write_buffer_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("folio_data"),
            block_cache_size: 128 * 1024 * 1024, // 128MB
            bloom_filter_bits: 10,
            sync_writes: true,
            max_open_files: 512,
            write_buffer_size: 32 * 1024 * 1024, // 32MB
        }
    }
}

impl StoreConfig {
    /// Create config for testing (small caches, no fsync).
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 8 * 1024 * 1024, // 8MB
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 64,
            write_buffer_size: 4 * 1024 * 1024, // 4MB
        }
    }
}

/// One entry of an article's version log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentVersion {
    pub article_id: Uuid,
    /// Starts at 1, no gaps
    pub version: u64,
    /// Encoded block tree (see `folio_core::codec`)
    pub snapshot: Vec<u8>,
    pub session_id: String,
    pub author_id: Uuid,
    /// Seconds since epoch
    pub created_at: u64,
}

/// Listing row: everything but the snapshot bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionSummary {
    pub version: u64,
    pub author_id: Uuid,
    pub session_id: String,
    pub created_at: u64,
    /// Uncompressed snapshot size in bytes
    pub snapshot_size: u64,
}

/// Result of an append: `created` is false when the snapshot matched the head.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendOutcome {
    pub created: bool,
    pub version: u64,
}

/// Value stored under a version key.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct VersionRow {
    session_id: String,
    author_id: Uuid,
    created_at: u64,
    snapshot_size: u64,
    /// LZ4, size-prepended
    snapshot: Vec<u8>,
}

impl VersionRow {
    fn encode(&self) -> Result<Vec<u8>, StoreError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        let (row, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| StoreError::Deserialization(e.to_string()))?;
        Ok(row)
    }

    fn snapshot(&self) -> Result<Vec<u8>, StoreError> {
        lz4_flex::decompress_size_prepended(&self.snapshot)
            .map_err(|e| StoreError::Compression(e.to_string()))
    }

    fn summary(&self, version: u64) -> VersionSummary {
        VersionSummary {
            version,
            author_id: self.author_id,
            session_id: self.session_id.clone(),
            created_at: self.created_at,
            snapshot_size: self.snapshot_size,
        }
    }

    fn into_version(self, article_id: Uuid, version: u64) -> Result<DocumentVersion, StoreError> {
        let snapshot = self.snapshot()?;
        Ok(DocumentVersion {
            article_id,
            version,
            snapshot,
            session_id: self.session_id,
            author_id: self.author_id,
            created_at: self.created_at,
        })
    }
}

/// Storage errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),

    #[error("article not found: {0}")]
    ArticleNotFound(Uuid),

    #[error("version {version} of article {article_id} not found")]
    VersionNotFound { article_id: Uuid, version: u64 },

    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(#[from] CodecError),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("compression error: {0}")]
    Compression(String),
}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

/// Append-only, per-article version log.
pub struct VersionStore {
    /// RocksDB instance (single-threaded mode; appends serialized below)
    db: DBWithThreadMode<SingleThreaded>,
    config: StoreConfig,
    append_lock: Mutex<()>,
}

impl VersionStore {
    /// Open the store at the configured path, creating it if missing.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);

        let cf_descriptors = vec![ColumnFamilyDescriptor::new(
            CF_VERSIONS,
            Self::cf_options(&config),
        )];

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            cf_descriptors,
        )?;

        log::info!("Opened version store at {}", config.path.display());

        Ok(Self {
            db,
            config,
            append_lock: Mutex::new(()),
        })
    }

    fn cf_options(config: &StoreConfig) -> Options {
        let mut opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(config.bloom_filter_bits as f64, false);
        block_opts.set_block_size(16 * 1024); // 16KB blocks
        opts.set_block_based_table_factory(&block_opts);

        opts.set_compression_type(DBCompressionType::Lz4);
        opts.set_write_buffer_size(config.write_buffer_size);
        opts.set_max_write_buffer_number(2);

        opts
    }

    // ─── Reads ────────────────────────────────────────────────────────

    /// Highest version of an article, if any.
    pub fn latest(&self, article_id: Uuid) -> Result<Option<DocumentVersion>, StoreError> {
        match self.head_row(article_id)? {
            Some((version, row)) => Ok(Some(row.into_version(article_id, version)?)),
            None => Ok(None),
        }
    }

    /// Highest version of an article, bootstrapping version 1 (an empty
    /// paragraph attributed to `owner`) when the log is empty.
    pub fn get_latest(&self, article_id: Uuid, owner: Uuid) -> Result<DocumentVersion, StoreError> {
        if let Some(latest) = self.latest(article_id)? {
            return Ok(latest);
        }

        let _guard = self.lock_appends();
        // another caller may have bootstrapped while we waited
        if let Some((version, row)) = self.head_row(article_id)? {
            return row.into_version(article_id, version);
        }

        let snapshot = codec::empty_snapshot()?;
        let created_at = self.write_version(article_id, 1, &snapshot, INITIAL_SESSION_ID, owner)?;
        log::info!("Bootstrapped article {article_id} with an empty document");

        Ok(DocumentVersion {
            article_id,
            version: 1,
            snapshot,
            session_id: INITIAL_SESSION_ID.to_string(),
            author_id: owner,
            created_at,
        })
    }

    /// A specific version.
    pub fn get_version(&self, article_id: Uuid, version: u64) -> Result<DocumentVersion, StoreError> {
        let cf = self.cf()?;
        match self.db.get_cf(cf, Self::version_key(article_id, version))? {
            Some(bytes) => VersionRow::decode(&bytes)?.into_version(article_id, version),
            None => Err(StoreError::VersionNotFound {
                article_id,
                version,
            }),
        }
    }

    /// Metadata for every version, newest first.
    pub fn list_versions(&self, article_id: Uuid) -> Result<Vec<VersionSummary>, StoreError> {
        let cf = self.cf()?;
        let end_key = Self::version_key(article_id, u64::MAX);

        let mut summaries = Vec::new();
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&end_key, Direction::Reverse));

        for item in iter {
            let (key, value) = item?;
            let Some(version) = Self::parse_key(article_id, &key) else {
                break;
            };
            summaries.push(VersionRow::decode(&value)?.summary(version));
        }

        Ok(summaries)
    }

    /// Head version number, 0 when the article has no versions.
    pub fn head_version(&self, article_id: Uuid) -> Result<u64, StoreError> {
        Ok(self.head_row(article_id)?.map_or(0, |(version, _)| version))
    }

    // ─── Writes ───────────────────────────────────────────────────────

    /// Append a snapshot as the new head.
    ///
    /// Undecodable snapshots are rejected before anything is written. A
    /// snapshot byte-identical to the head is a no-op.
    pub fn append(
        &self,
        article_id: Uuid,
        snapshot: &[u8],
        session_id: &str,
        author_id: Uuid,
    ) -> Result<AppendOutcome, StoreError> {
        codec::decode_blocks(snapshot)?;

        let _guard = self.lock_appends();
        let head = self.head_row(article_id)?;

        if let Some((version, row)) = &head {
            if row.snapshot_size == snapshot.len() as u64 && row.snapshot()? == snapshot {
                log::debug!("Snapshot for article {article_id} matches v{version}, skipping");
                return Ok(AppendOutcome {
                    created: false,
                    version: *version,
                });
            }
        }

        let version = head.map_or(1, |(version, _)| version + 1);
        self.write_version(article_id, version, snapshot, session_id, author_id)?;
        log::info!(
            "Article {article_id} v{version} appended by {author_id} (session {session_id}, {} bytes)",
            snapshot.len()
        );

        Ok(AppendOutcome {
            created: true,
            version,
        })
    }

    /// Copy `target_version`'s snapshot forward as a new head.
    pub fn restore(
        &self,
        article_id: Uuid,
        target_version: u64,
        session_id: &str,
        author_id: Uuid,
    ) -> Result<AppendOutcome, StoreError> {
        let target = self.get_version(article_id, target_version)?;
        let outcome = self.append(article_id, &target.snapshot, session_id, author_id)?;
        if outcome.created {
            log::info!(
                "Article {article_id} restored v{target_version} as v{}",
                outcome.version
            );
        }
        Ok(outcome)
    }

    /// Flush memtables to disk.
    pub fn sync(&self) -> Result<(), StoreError> {
        self.db.flush_cf(self.cf()?)?;
        Ok(())
    }

    /// Get the database path.
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    // ─── Helpers ──────────────────────────────────────────────────────

    fn lock_appends(&self) -> MutexGuard<'_, ()> {
        self.append_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn head_row(&self, article_id: Uuid) -> Result<Option<(u64, VersionRow)>, StoreError> {
        let cf = self.cf()?;
        let end_key = Self::version_key(article_id, u64::MAX);
        let mut iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&end_key, Direction::Reverse));

        match iter.next() {
            Some(item) => {
                let (key, value) = item?;
                match Self::parse_key(article_id, &key) {
                    Some(version) => Ok(Some((version, VersionRow::decode(&value)?))),
                    None => Ok(None),
                }
            }
            None => Ok(None),
        }
    }

    /// Write one row. Callers hold `append_lock`. Returns `created_at`.
    fn write_version(
        &self,
        article_id: Uuid,
        version: u64,
        snapshot: &[u8],
        session_id: &str,
        author_id: Uuid,
    ) -> Result<u64, StoreError> {
        let cf = self.cf()?;
        let created_at = now_secs();
        let row = VersionRow {
            session_id: session_id.to_string(),
            author_id,
            created_at,
            snapshot_size: snapshot.len() as u64,
            snapshot: lz4_flex::compress_prepend_size(snapshot),
        };

        let mut batch = WriteBatch::default();
        batch.put_cf(cf, Self::version_key(article_id, version), row.encode()?);

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        self.db.write_opt(batch, &write_opts)?;

        Ok(created_at)
    }

    fn cf(&self) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(CF_VERSIONS)
            .ok_or_else(|| StoreError::Database(format!("Column family '{CF_VERSIONS}' not found")))
    }

    /// article_id (16 bytes) + version (8 bytes big-endian).
    fn version_key(article_id: Uuid, version: u64) -> Vec<u8> {
        let mut key = Vec::with_capacity(KEY_LEN);
        key.extend_from_slice(article_id.as_bytes());
        key.extend_from_slice(&version.to_be_bytes());
        key
    }

    /// Version number of `key` if it belongs to `article_id`.
    fn parse_key(article_id: Uuid, key: &[u8]) -> Option<u64> {
        if key.len() != KEY_LEN || &key[..16] != article_id.as_bytes() {
            return None;
        }
        let mut ver_buf = [0u8; 8];
        ver_buf.copy_from_slice(&key[16..KEY_LEN]);
        Some(u64::from_be_bytes(ver_buf))
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
