//! Live CRDT document for one article.
//!
//! ```text
//! DocumentSession
//!   ├── yrs Doc
//!   │     ├── map   "blocks"  block id → block JSON
//!   │     └── array "order"   top-level block ids
//!   ├── hydrating counter     (HydrationGuard)
//!   └── change listeners      fired on local mutations
//! ```
//!
//! Local mutations run in one transaction each and return the encoded yrs
//! update for the replication transport. Remote updates are merged with
//! [`DocumentSession::apply_remote_update`] and never fire the change signal.
//!
//! The session bridges to the version log through snapshots:
//! [`DocumentSession::hydrate`] loads one (signal suppressed) and
//! [`DocumentSession::encode_snapshot`] produces one.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use uuid::Uuid;
use yrs::updates::decoder::Decode;
use yrs::{Any, Array, ArrayRef, Doc, Map, MapRef, Out, ReadTxn, StateVector, TransactionMut, Update};

use crate::annotate::AnnotateError;
use crate::block::Block;
use crate::codec::{self, CodecError};
use crate::normalize;

const BLOCKS_MAP: &str = "blocks";
const ORDER_ARRAY: &str = "order";

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Annotate(#[from] AnnotateError),

    #[error("CRDT error: {0}")]
    Crdt(String),

    #[error("block `{0}` not found")]
    BlockNotFound(String),

    #[error("block `{0}` already exists")]
    DuplicateBlock(String),

    #[error("block `{id}` holds unreadable content: {reason}")]
    CorruptBlock { id: String, reason: String },
}

impl From<yrs::encoding::read::Error> for SessionError {
    fn from(e: yrs::encoding::read::Error) -> Self {
        SessionError::Crdt(e.to_string())
    }
}

/// Payload handed to change listeners after a local mutation.
#[derive(Debug, Clone)]
pub struct ContentChange {
    pub article_id: Uuid,
    /// yrs v1 update produced by the mutation.
    pub update: Arc<Vec<u8>>,
}

pub type ChangeListener = Arc<dyn Fn(&ContentChange) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Suppresses the change signal while alive.
#[must_use = "the hydrating flag clears as soon as the guard is dropped"]
pub struct HydrationGuard<'a> {
    session: &'a DocumentSession,
}

impl Drop for HydrationGuard<'_> {
    fn drop(&mut self) {
        self.session.hydrating.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct DocumentSession {
    article_id: Uuid,
    session_id: String,
    doc: Doc,
    blocks: MapRef,
    order: ArrayRef,
    hydrating: AtomicUsize,
    listeners: RwLock<Vec<(ListenerId, ChangeListener)>>,
    next_listener: AtomicU64,
    local_changes: AtomicU64,
}

impl fmt::Debug for DocumentSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentSession")
            .field("article_id", &self.article_id)
            .field("session_id", &self.session_id)
            .field("blocks", &self.block_count())
            .field("hydrating", &self.is_hydrating())
            .finish()
    }
}

impl DocumentSession {
    /// Empty session. Call [`hydrate`](Self::hydrate) or apply remote state
    /// before editing.
    pub fn new(article_id: Uuid, session_id: impl Into<String>) -> Self {
        let doc = Doc::new();
        let blocks = doc.get_or_insert_map(BLOCKS_MAP);
        let order = doc.get_or_insert_array(ORDER_ARRAY);
        Self {
            article_id,
            session_id: session_id.into(),
            doc,
            blocks,
            order,
            hydrating: AtomicUsize::new(0),
            listeners: RwLock::new(Vec::new()),
            next_listener: AtomicU64::new(1),
            local_changes: AtomicU64::new(0),
        }
    }

    /// New session loaded from snapshot bytes.
    pub fn from_snapshot(
        article_id: Uuid,
        session_id: impl Into<String>,
        snapshot: &[u8],
    ) -> Result<Self, SessionError> {
        let session = Self::new(article_id, session_id);
        session.hydrate(snapshot)?;
        Ok(session)
    }

    pub fn article_id(&self) -> Uuid {
        self.article_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    // ─── Hydration ──────────────────────────────────────────────

    /// Mark the session as loading until the guard drops.
    pub fn begin_hydration(&self) -> HydrationGuard<'_> {
        self.hydrating.fetch_add(1, Ordering::SeqCst);
        HydrationGuard { session: self }
    }

    pub fn is_hydrating(&self) -> bool {
        self.hydrating.load(Ordering::SeqCst) > 0
    }

    /// Replace the replica's content with a snapshot without signalling.
    pub fn hydrate(&self, snapshot: &[u8]) -> Result<(), SessionError> {
        let blocks = codec::decode_blocks(snapshot)?;
        let _guard = self.begin_hydration();
        self.commit(|txn| {
            self.clear(txn);
            for block in &blocks {
                self.put_block(txn, block)?;
                self.order.push_back(txn, block.id.clone());
            }
            Ok(())
        })?;
        log::info!(
            "Hydrated session {} for article {} ({} blocks)",
            self.session_id,
            self.article_id,
            blocks.len()
        );
        Ok(())
    }

    // ─── Listeners ──────────────────────────────────────────────

    /// Register a listener for local content changes.
    pub fn on_change<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&ContentChange) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(listener)));
        id
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    /// Number of local mutations that fired the change signal.
    pub fn local_change_count(&self) -> u64 {
        self.local_changes.load(Ordering::Relaxed)
    }

    fn notify(&self, update: &[u8]) {
        if self.is_hydrating() {
            log::debug!("Change signal suppressed while hydrating {}", self.session_id);
            return;
        }
        self.local_changes.fetch_add(1, Ordering::Relaxed);
        let listeners: Vec<ChangeListener> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        if listeners.is_empty() {
            return;
        }
        let change = ContentChange {
            article_id: self.article_id,
            update: Arc::new(update.to_vec()),
        };
        for listener in listeners {
            listener(&change);
        }
    }

    // ─── Reads ──────────────────────────────────────────────────

    /// Top-level blocks in document order.
    pub fn blocks(&self) -> Result<Vec<Block>, SessionError> {
        let txn = yrs::Transact::transact(&self.doc);
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for id in self.read_order(&txn) {
            // concurrent inserts of one id can leave duplicates in the order array
            if !seen.insert(id.clone()) {
                continue;
            }
            if let Some(block) = self.read_block(&txn, &id)? {
                out.push(block);
            }
        }
        Ok(out)
    }

    /// Find a block by id, including nested children.
    pub fn block(&self, id: &str) -> Result<Option<Block>, SessionError> {
        Ok(self
            .blocks()?
            .iter()
            .find_map(|b| b.find(id))
            .cloned())
    }

    pub fn block_count(&self) -> u32 {
        let txn = yrs::Transact::transact(&self.doc);
        self.blocks.len(&txn)
    }

    fn read_order<T: ReadTxn>(&self, txn: &T) -> Vec<String> {
        self.order
            .iter(txn)
            .filter_map(|value| match value {
                Out::Any(Any::String(id)) => Some(id.to_string()),
                _ => None,
            })
            .collect()
    }

    fn read_block<T: ReadTxn>(&self, txn: &T, id: &str) -> Result<Option<Block>, SessionError> {
        match self.blocks.get(txn, id) {
            Some(Out::Any(Any::String(json))) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| SessionError::CorruptBlock {
                    id: id.to_string(),
                    reason: e.to_string(),
                }),
            Some(_) => Err(SessionError::CorruptBlock {
                id: id.to_string(),
                reason: "value is not a JSON string".to_string(),
            }),
            None => Ok(None),
        }
    }

    fn position_of<T: ReadTxn>(&self, txn: &T, id: &str) -> Option<u32> {
        self.read_order(txn)
            .iter()
            .position(|candidate| candidate == id)
            .map(|index| index as u32)
    }

    // ─── Local mutations ────────────────────────────────────────

    /// Insert top-level blocks after `after`, or at the end when `None`.
    pub fn insert_blocks(&self, after: Option<&str>, blocks: Vec<Block>) -> Result<Vec<u8>, SessionError> {
        check_unique_ids(&self.blocks()?, &blocks)?;
        self.commit(|txn| {
            let mut incoming = HashSet::new();
            for block in &blocks {
                if self.blocks.contains_key(&*txn, &block.id) || !incoming.insert(block.id.as_str()) {
                    return Err(SessionError::DuplicateBlock(block.id.clone()));
                }
            }
            let mut index = match after {
                Some(anchor) => self
                    .position_of(&*txn, anchor)
                    .ok_or_else(|| SessionError::BlockNotFound(anchor.to_string()))?
                    + 1,
                None => self.order.len(&*txn),
            };
            for block in &blocks {
                self.put_block(txn, block)?;
                self.order.insert(txn, index, block.id.clone());
                index += 1;
            }
            Ok(())
        })
    }

    /// Overwrite an existing top-level block, keeping its position.
    pub fn replace_block(&self, block: Block) -> Result<Vec<u8>, SessionError> {
        let others: Vec<Block> = self
            .blocks()?
            .into_iter()
            .filter(|existing| existing.id != block.id)
            .collect();
        check_unique_ids(&others, std::slice::from_ref(&block))?;
        self.commit(|txn| {
            if !self.blocks.contains_key(&*txn, &block.id) {
                return Err(SessionError::BlockNotFound(block.id.clone()));
            }
            self.put_block(txn, &block)
        })
    }

    pub fn remove_block(&self, id: &str) -> Result<Vec<u8>, SessionError> {
        self.commit(|txn| {
            if !self.blocks.contains_key(&*txn, id) {
                return Err(SessionError::BlockNotFound(id.to_string()));
            }
            while let Some(index) = self.position_of(&*txn, id) {
                self.order.remove(txn, index);
            }
            self.blocks.remove(txn, id);
            Ok(())
        })
    }

    /// Replace the whole document.
    pub fn replace_all(&self, blocks: Vec<Block>) -> Result<Vec<u8>, SessionError> {
        codec::validate_blocks(&blocks)?;
        self.commit(|txn| {
            self.clear(txn);
            for block in &blocks {
                self.put_block(txn, block)?;
                self.order.push_back(txn, block.id.clone());
            }
            Ok(())
        })
    }

    /// Run `edit` over every top-level block and write back the ones it
    /// reports as changed. Returns `None` when nothing changed.
    pub fn rewrite_blocks<F>(&self, mut edit: F) -> Result<Option<Vec<u8>>, SessionError>
    where
        F: FnMut(&mut Block) -> bool,
    {
        let mut all = Vec::new();
        let mut changed = Vec::new();
        for mut block in self.blocks()? {
            if edit(&mut block) {
                changed.push(block.clone());
            }
            all.push(block);
        }
        if changed.is_empty() {
            return Ok(None);
        }
        check_unique_ids(&[], &all)?;
        self.commit(|txn| {
            for block in &changed {
                self.put_block(txn, block)?;
            }
            Ok(())
        })
        .map(Some)
    }

    /// Normalize externally generated blocks and insert them.
    pub fn merge_generated(&self, after: Option<&str>, blocks: Vec<Block>) -> Result<Vec<u8>, SessionError> {
        let blocks = normalize::normalize(blocks);
        log::debug!("Merging {} generated blocks into {}", blocks.len(), self.article_id);
        self.insert_blocks(after, blocks)
    }

    fn put_block(&self, txn: &mut TransactionMut, block: &Block) -> Result<(), SessionError> {
        let json = serde_json::to_string(block).map_err(|e| CodecError::Encode(e.to_string()))?;
        self.blocks.insert(txn, block.id.clone(), json);
        Ok(())
    }

    fn clear(&self, txn: &mut TransactionMut) {
        let len = self.order.len(&*txn);
        if len > 0 {
            self.order.remove_range(txn, 0, len);
        }
        self.blocks.clear(txn);
    }

    /// Run `apply` in one write transaction and signal the resulting update.
    /// Validation inside `apply` must happen before its first write.
    fn commit<F>(&self, apply: F) -> Result<Vec<u8>, SessionError>
    where
        F: FnOnce(&mut TransactionMut) -> Result<(), SessionError>,
    {
        let update = {
            let mut txn = yrs::Transact::transact_mut(&self.doc);
            apply(&mut txn)?;
            txn.encode_update_v1()
        };
        self.notify(&update);
        Ok(update)
    }

    // ─── Replication ────────────────────────────────────────────

    /// Merge an update from another replica. Does not signal.
    pub fn apply_remote_update(&self, update: &[u8]) -> Result<(), SessionError> {
        let update = Update::decode_v1(update)?;
        let mut txn = yrs::Transact::transact_mut(&self.doc);
        txn.apply_update(update)
            .map_err(|e| SessionError::Crdt(e.to_string()))?;
        Ok(())
    }

    /// Full replica state as a v1 update, for joining replicas.
    pub fn encode_state(&self) -> Vec<u8> {
        let txn = yrs::Transact::transact(&self.doc);
        txn.encode_state_as_update_v1(&StateVector::default())
    }

    /// Encoded state vector, sent by a replica asking for a diff.
    pub fn state_vector(&self) -> Vec<u8> {
        let txn = yrs::Transact::transact(&self.doc);
        yrs::updates::encoder::Encode::encode_v1(&txn.state_vector())
    }

    /// Updates the holder of `remote_state_vector` is missing.
    pub fn encode_diff(&self, remote_state_vector: &[u8]) -> Result<Vec<u8>, SessionError> {
        let sv = StateVector::decode_v1(remote_state_vector)?;
        let txn = yrs::Transact::transact(&self.doc);
        Ok(txn.encode_state_as_update_v1(&sv))
    }

    // ─── Snapshots ──────────────────────────────────────────────

    /// Encode the current content as snapshot bytes.
    pub fn encode_snapshot(&self) -> Result<Vec<u8>, SessionError> {
        let blocks = self.blocks()?;
        codec::validate_blocks(&blocks)?;
        Ok(codec::encode_blocks(&blocks)?)
    }
}

/// Reject the first id in `incoming` that `existing` already uses or that
/// `incoming` repeats, at any depth.
fn check_unique_ids(existing: &[Block], incoming: &[Block]) -> Result<(), SessionError> {
    let mut seen = HashSet::new();
    for block in existing {
        block.walk(&mut |b| {
            seen.insert(b.id.as_str());
        });
    }
    let mut duplicate = None;
    for block in incoming {
        block.walk(&mut |b| {
            if duplicate.is_none() && !seen.insert(b.id.as_str()) {
                duplicate = Some(b.id.clone());
            }
        });
    }
    match duplicate {
        Some(id) => Err(SessionError::DuplicateBlock(id)),
        None => Ok(()),
    }
}
