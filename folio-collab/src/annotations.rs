//! Comment threads anchored to document text.
//!
//! ```text
//!  create:   validate selection ─► ThreadApi::create_thread ─► splice marker
//!  resolve:  strip markers ─► ThreadApi::resolve_thread   (NotFound = done)
//!  load:     ThreadApi::get_thread ─┬─► cache
//!                                   └─ NotFound ─► strip stale markers, Ok(None)
//! ```
//!
//! Marker edits go through the session, so they replicate and persist like any
//! other edit. The thread store and the document are updated in separate
//! steps; a failure between them leaves a stale marker or an orphaned thread,
//! which the next load or [`AnnotationIndex::reconcile`] repairs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use folio_core::annotate::{self, AnnotateError, TextRange};
use folio_core::session::{DocumentSession, SessionError};

// ─── Thread model ─────────────────────────────────────────────────────

/// Where a thread was opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadAnchor {
    pub block_id: String,
    pub range: TextRange,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub thread_id: String,
    pub author_id: Uuid,
    pub body: String,
    pub created_at: u64,
    pub edited: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentThread {
    pub id: String,
    pub article_id: Uuid,
    pub anchor: ThreadAnchor,
    /// Text covered by the marker when the thread was opened
    pub quoted_text: String,
    pub resolved: bool,
    pub comments: Vec<Comment>,
}

/// Request body for [`ThreadApi::create_thread`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewThread {
    pub article_id: Uuid,
    pub author_id: Uuid,
    pub anchor: ThreadAnchor,
    pub quoted_text: String,
    pub body: String,
}

/// A user's text selection inside one block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub block_id: String,
    pub range: TextRange,
}

impl Selection {
    pub fn new(block_id: impl Into<String>, start: usize, end: usize) -> Self {
        Self {
            block_id: block_id.into(),
            range: TextRange::new(start, end),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadAction {
    Resolve,
    Delete,
}

// ─── Errors ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ThreadApiError {
    #[error("thread not found: {0}")]
    NotFound(String),

    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("thread service unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, thiserror::Error)]
pub enum AnnotationError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Annotate(#[from] AnnotateError),

    #[error(transparent)]
    ThreadApi(#[from] ThreadApiError),
}

// ─── Thread API ───────────────────────────────────────────────────────

/// Remote store of comment threads. `token` is the caller's bearer token.
#[async_trait]
pub trait ThreadApi: Send + Sync {
    async fn create_thread(&self, token: Option<&str>, thread: NewThread) -> Result<CommentThread, ThreadApiError>;
    async fn get_thread(&self, token: Option<&str>, thread_id: &str) -> Result<CommentThread, ThreadApiError>;
    async fn delete_thread(&self, token: Option<&str>, thread_id: &str) -> Result<(), ThreadApiError>;
    async fn resolve_thread(&self, token: Option<&str>, thread_id: &str) -> Result<CommentThread, ThreadApiError>;
    async fn unresolve_thread(&self, token: Option<&str>, thread_id: &str) -> Result<CommentThread, ThreadApiError>;
    async fn add_comment(
        &self,
        token: Option<&str>,
        thread_id: &str,
        author_id: Uuid,
        body: &str,
    ) -> Result<Comment, ThreadApiError>;
    async fn edit_comment(
        &self,
        token: Option<&str>,
        thread_id: &str,
        comment_id: &str,
        body: &str,
    ) -> Result<Comment, ThreadApiError>;
    async fn delete_comment(&self, token: Option<&str>, thread_id: &str, comment_id: &str) -> Result<(), ThreadApiError>;
}

// ─── Per-session context ──────────────────────────────────────────────

/// Everything an annotation call needs about the caller and the document.
pub struct SessionContext {
    pub article_id: Uuid,
    pub user_id: Uuid,
    pub token: Option<String>,
    pub session: Arc<DocumentSession>,
    threads: Mutex<HashMap<String, CommentThread>>,
}

impl SessionContext {
    pub fn new(session: Arc<DocumentSession>, user_id: Uuid, token: Option<String>) -> Self {
        Self {
            article_id: session.article_id(),
            user_id,
            token,
            session,
            threads: Mutex::new(HashMap::new()),
        }
    }

    /// A thread as last seen by this context.
    pub fn cached_thread(&self, thread_id: &str) -> Option<CommentThread> {
        self.cache().get(thread_id).cloned()
    }

    fn cache(&self) -> MutexGuard<'_, HashMap<String, CommentThread>> {
        self.threads.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }
}

// ─── Index ────────────────────────────────────────────────────────────

/// Placeholder used to validate a selection before the thread exists.
const PENDING_THREAD_ID: &str = "pending";

pub struct AnnotationIndex<A> {
    api: A,
}

impl<A: ThreadApi> AnnotationIndex<A> {
    pub fn new(api: A) -> Self {
        Self { api }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    /// Open a thread on `selection` and mark the selected text.
    pub async fn create_thread(
        &self,
        ctx: &SessionContext,
        selection: Selection,
        body: &str,
    ) -> Result<CommentThread, AnnotationError> {
        let block = ctx
            .session
            .block(&selection.block_id)?
            .ok_or_else(|| AnnotateError::BlockNotFound(selection.block_id.clone()))?;
        let (_, quoted_text) = annotate::splice_marker(&block.content, selection.range, PENDING_THREAD_ID)?;

        let request = NewThread {
            article_id: ctx.article_id,
            author_id: ctx.user_id,
            anchor: ThreadAnchor {
                block_id: selection.block_id.clone(),
                range: selection.range,
            },
            quoted_text,
            body: body.to_string(),
        };
        let thread = self.api.create_thread(ctx.token(), request).await?;

        let mut outcome = None;
        ctx.session.rewrite_blocks(|top| {
            let Some(target) = top.find_mut(&selection.block_id) else {
                return false;
            };
            match annotate::splice_marker(&target.content, selection.range, &thread.id) {
                Ok((content, _)) => {
                    target.content = content;
                    outcome = Some(Ok(()));
                    true
                }
                Err(e) => {
                    outcome = Some(Err(e));
                    false
                }
            }
        })?;

        match outcome {
            Some(Ok(())) => {}
            Some(Err(e)) => {
                log::warn!("Thread {} created but its marker could not be placed: {e}", thread.id);
                return Err(e.into());
            }
            None => {
                log::warn!(
                    "Thread {} created but block {} disappeared",
                    thread.id,
                    selection.block_id
                );
                return Err(AnnotateError::BlockNotFound(selection.block_id).into());
            }
        }

        log::info!(
            "Thread {} opened on block {} of article {}",
            thread.id,
            thread.anchor.block_id,
            ctx.article_id
        );
        ctx.cache().insert(thread.id.clone(), thread.clone());
        Ok(thread)
    }

    /// Remove the thread's markers, then resolve or delete it remotely.
    pub async fn resolve_or_delete(
        &self,
        ctx: &SessionContext,
        thread_id: &str,
        action: ThreadAction,
    ) -> Result<(), AnnotationError> {
        let removed = self.strip(ctx, thread_id)?;
        log::debug!("Removed {removed} marker(s) for thread {thread_id}");

        let result = match action {
            ThreadAction::Resolve => self.api.resolve_thread(ctx.token(), thread_id).await.map(Some),
            ThreadAction::Delete => self.api.delete_thread(ctx.token(), thread_id).await.map(|()| None),
        };

        match result {
            Ok(Some(thread)) => {
                ctx.cache().insert(thread.id.clone(), thread);
            }
            Ok(None) => {
                ctx.cache().remove(thread_id);
            }
            Err(ThreadApiError::NotFound(_)) => {
                log::debug!("Thread {thread_id} already gone");
                ctx.cache().remove(thread_id);
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    pub async fn resolve_thread(&self, ctx: &SessionContext, thread_id: &str) -> Result<(), AnnotationError> {
        self.resolve_or_delete(ctx, thread_id, ThreadAction::Resolve).await
    }

    pub async fn delete_thread(&self, ctx: &SessionContext, thread_id: &str) -> Result<(), AnnotationError> {
        self.resolve_or_delete(ctx, thread_id, ThreadAction::Delete).await
    }

    /// Reopen a resolved thread. Its markers are not restored.
    pub async fn unresolve_thread(
        &self,
        ctx: &SessionContext,
        thread_id: &str,
    ) -> Result<CommentThread, AnnotationError> {
        let thread = self.api.unresolve_thread(ctx.token(), thread_id).await?;
        ctx.cache().insert(thread.id.clone(), thread.clone());
        Ok(thread)
    }

    /// Fetch a thread. A thread the store no longer knows is not an error:
    /// its markers are removed and `None` is returned.
    pub async fn load_thread(
        &self,
        ctx: &SessionContext,
        thread_id: &str,
    ) -> Result<Option<CommentThread>, AnnotationError> {
        match self.api.get_thread(ctx.token(), thread_id).await {
            Ok(thread) => {
                ctx.cache().insert(thread.id.clone(), thread.clone());
                Ok(Some(thread))
            }
            Err(ThreadApiError::NotFound(_)) => {
                let removed = self.strip(ctx, thread_id)?;
                ctx.cache().remove(thread_id);
                log::warn!("Thread {thread_id} no longer exists, removed {removed} stale marker(s)");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn add_comment(
        &self,
        ctx: &SessionContext,
        thread_id: &str,
        body: &str,
    ) -> Result<Comment, AnnotationError> {
        let comment = self
            .api
            .add_comment(ctx.token(), thread_id, ctx.user_id, body)
            .await?;
        if let Some(thread) = ctx.cache().get_mut(thread_id) {
            thread.comments.push(comment.clone());
        }
        Ok(comment)
    }

    pub async fn edit_comment(
        &self,
        ctx: &SessionContext,
        thread_id: &str,
        comment_id: &str,
        body: &str,
    ) -> Result<Comment, AnnotationError> {
        let comment = self
            .api
            .edit_comment(ctx.token(), thread_id, comment_id, body)
            .await?;
        if let Some(thread) = ctx.cache().get_mut(thread_id) {
            if let Some(cached) = thread.comments.iter_mut().find(|c| c.id == comment.id) {
                *cached = comment.clone();
            }
        }
        Ok(comment)
    }

    pub async fn delete_comment(
        &self,
        ctx: &SessionContext,
        thread_id: &str,
        comment_id: &str,
    ) -> Result<(), AnnotationError> {
        self.api.delete_comment(ctx.token(), thread_id, comment_id).await?;
        if let Some(thread) = ctx.cache().get_mut(thread_id) {
            thread.comments.retain(|c| c.id != comment_id);
        }
        Ok(())
    }

    /// Cached threads anchored to `block_id`, by id.
    pub fn threads_for_block(&self, ctx: &SessionContext, block_id: &str) -> Vec<CommentThread> {
        let mut threads: Vec<_> = ctx
            .cache()
            .values()
            .filter(|t| t.anchor.block_id == block_id)
            .cloned()
            .collect();
        threads.sort_by(|a, b| a.id.cmp(&b.id));
        threads
    }

    /// Load every thread referenced by a marker. Returns how many were stale.
    pub async fn reconcile(&self, ctx: &SessionContext) -> Result<usize, AnnotationError> {
        let referenced = annotate::marker_thread_ids(&ctx.session.blocks()?);
        let mut healed = 0;
        for thread_id in &referenced {
            if self.load_thread(ctx, thread_id).await?.is_none() {
                healed += 1;
            }
        }
        log::info!(
            "Reconciled {} thread(s) for article {}, {healed} stale",
            referenced.len(),
            ctx.article_id
        );
        Ok(healed)
    }

    fn strip(&self, ctx: &SessionContext, thread_id: &str) -> Result<usize, SessionError> {
        let mut removed = 0;
        ctx.session.rewrite_blocks(|block| {
            let count = annotate::strip_block_markers(block, thread_id);
            removed += count;
            count > 0
        })?;
        Ok(removed)
    }
}

// ─── In-process thread store ──────────────────────────────────────────

/// Thread store kept in memory. Serves tests and single-process setups.
#[derive(Default)]
pub struct MemoryThreadApi {
    threads: Mutex<HashMap<String, CommentThread>>,
    next_id: AtomicU64,
    unavailable: AtomicBool,
}

impl MemoryThreadApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop a thread behind every client's back.
    pub fn forget(&self, thread_id: &str) -> bool {
        self.lock().remove(thread_id).is_some()
    }

    /// Make every call fail with `Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn thread_count(&self) -> usize {
        self.lock().len()
    }

    pub fn contains(&self, thread_id: &str) -> bool {
        self.lock().contains_key(thread_id)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CommentThread>> {
        self.threads.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check(&self) -> Result<(), ThreadApiError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ThreadApiError::Unavailable("thread store offline".to_string()));
        }
        Ok(())
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("{prefix}-{}", self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    fn with_thread<T>(
        &self,
        thread_id: &str,
        f: impl FnOnce(&mut CommentThread) -> Result<T, ThreadApiError>,
    ) -> Result<T, ThreadApiError> {
        self.check()?;
        let mut threads = self.lock();
        let thread = threads
            .get_mut(thread_id)
            .ok_or_else(|| ThreadApiError::NotFound(thread_id.to_string()))?;
        f(thread)
    }

    fn comment(&self, thread_id: &str, author_id: Uuid, body: &str) -> Comment {
        Comment {
            id: self.next_id("comment"),
            thread_id: thread_id.to_string(),
            author_id,
            body: body.to_string(),
            created_at: now_secs(),
            edited: false,
        }
    }
}

#[async_trait]
impl ThreadApi for MemoryThreadApi {
    async fn create_thread(&self, _token: Option<&str>, thread: NewThread) -> Result<CommentThread, ThreadApiError> {
        self.check()?;
        if thread.body.trim().is_empty() {
            return Err(ThreadApiError::Rejected("empty comment body".to_string()));
        }
        let id = self.next_id("thread");
        let opening = self.comment(&id, thread.author_id, &thread.body);
        let created = CommentThread {
            id,
            article_id: thread.article_id,
            anchor: thread.anchor,
            quoted_text: thread.quoted_text,
            resolved: false,
            comments: vec![opening],
        };
        self.lock().insert(created.id.clone(), created.clone());
        Ok(created)
    }

    async fn get_thread(&self, _token: Option<&str>, thread_id: &str) -> Result<CommentThread, ThreadApiError> {
        self.with_thread(thread_id, |thread| Ok(thread.clone()))
    }

    async fn delete_thread(&self, _token: Option<&str>, thread_id: &str) -> Result<(), ThreadApiError> {
        self.check()?;
        self.lock()
            .remove(thread_id)
            .map(|_| ())
            .ok_or_else(|| ThreadApiError::NotFound(thread_id.to_string()))
    }

    async fn resolve_thread(&self, _token: Option<&str>, thread_id: &str) -> Result<CommentThread, ThreadApiError> {
        self.with_thread(thread_id, |thread| {
            thread.resolved = true;
            Ok(thread.clone())
        })
    }

    async fn unresolve_thread(&self, _token: Option<&str>, thread_id: &str) -> Result<CommentThread, ThreadApiError> {
        self.with_thread(thread_id, |thread| {
            thread.resolved = false;
            Ok(thread.clone())
        })
    }

    async fn add_comment(
        &self,
        _token: Option<&str>,
        thread_id: &str,
        author_id: Uuid,
        body: &str,
    ) -> Result<Comment, ThreadApiError> {
        let comment = self.comment(thread_id, author_id, body);
        self.with_thread(thread_id, |thread| {
            thread.comments.push(comment.clone());
            Ok(comment)
        })
    }

    async fn edit_comment(
        &self,
        _token: Option<&str>,
        thread_id: &str,
        comment_id: &str,
        body: &str,
    ) -> Result<Comment, ThreadApiError> {
        self.with_thread(thread_id, |thread| {
            let comment = thread
                .comments
                .iter_mut()
                .find(|c| c.id == comment_id)
                .ok_or_else(|| ThreadApiError::NotFound(comment_id.to_string()))?;
            comment.body = body.to_string();
            comment.edited = true;
            Ok(comment.clone())
        })
    }

    async fn delete_comment(&self, _token: Option<&str>, thread_id: &str, comment_id: &str) -> Result<(), ThreadApiError> {
        self.with_thread(thread_id, |thread| {
            let before = thread.comments.len();
            thread.comments.retain(|c| c.id != comment_id);
            if thread.comments.len() == before {
                return Err(ThreadApiError::NotFound(comment_id.to_string()));
            }
            Ok(())
        })
    }
}

#[async_trait]
impl<A: ThreadApi + ?Sized> ThreadApi for Arc<A> {
    async fn create_thread(&self, token: Option<&str>, thread: NewThread) -> Result<CommentThread, ThreadApiError> {
        (**self).create_thread(token, thread).await
    }

    async fn get_thread(&self, token: Option<&str>, thread_id: &str) -> Result<CommentThread, ThreadApiError> {
        (**self).get_thread(token, thread_id).await
    }

    async fn delete_thread(&self, token: Option<&str>, thread_id: &str) -> Result<(), ThreadApiError> {
        (**self).delete_thread(token, thread_id).await
    }

    async fn resolve_thread(&self, token: Option<&str>, thread_id: &str) -> Result<CommentThread, ThreadApiError> {
        (**self).resolve_thread(token, thread_id).await
    }

    async fn unresolve_thread(&self, token: Option<&str>, thread_id: &str) -> Result<CommentThread, ThreadApiError> {
        (**self).unresolve_thread(token, thread_id).await
    }

    async fn add_comment(
        &self,
        token: Option<&str>,
        thread_id: &str,
        author_id: Uuid,
        body: &str,
    ) -> Result<Comment, ThreadApiError> {
        (**self).add_comment(token, thread_id, author_id, body).await
    }

    async fn edit_comment(
        &self,
        token: Option<&str>,
        thread_id: &str,
        comment_id: &str,
        body: &str,
    ) -> Result<Comment, ThreadApiError> {
        (**self).edit_comment(token, thread_id, comment_id, body).await
    }

    async fn delete_comment(&self, token: Option<&str>, thread_id: &str, comment_id: &str) -> Result<(), ThreadApiError> {
        (**self).delete_comment(token, thread_id, comment_id).await
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
