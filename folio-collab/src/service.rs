//! Document service: the operations exposed to the rest of the application.
//!
//! Thin layer over [`VersionStore`] that resolves article owners for
//! bootstrap, validates snapshots and opens hydrated sessions.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use folio_core::block::Block;
use folio_core::normalize;
use folio_core::session::{DocumentSession, SessionError};

use crate::storage::{AppendOutcome, StoreError, VersionStore, VersionSummary};

/// Resolves which user owns an article.
pub trait ArticleDirectory: Send + Sync {
    fn owner_of(&self, article_id: Uuid) -> Option<Uuid>;
}

impl ArticleDirectory for HashMap<Uuid, Uuid> {
    fn owner_of(&self, article_id: Uuid) -> Option<Uuid> {
        self.get(&article_id).copied()
    }
}

impl<D: ArticleDirectory + ?Sized> ArticleDirectory for Arc<D> {
    fn owner_of(&self, article_id: Uuid) -> Option<Uuid> {
        (**self).owner_of(article_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatestDocument {
    pub snapshot: Vec<u8>,
    pub version: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoredVersion {
    pub version: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Session(#[from] SessionError),
}

pub struct DocumentService<D> {
    store: Arc<VersionStore>,
    directory: D,
}

impl<D: ArticleDirectory> DocumentService<D> {
    pub fn new(store: Arc<VersionStore>, directory: D) -> Self {
        Self { store, directory }
    }

    pub fn store(&self) -> &Arc<VersionStore> {
        &self.store
    }

    /// Latest snapshot, bootstrapping version 1 for known articles.
    pub fn get_latest_document(&self, article_id: Uuid) -> Result<LatestDocument, ServiceError> {
        let latest = match self.store.latest(article_id)? {
            Some(latest) => latest,
            None => {
                let owner = self.owner(article_id)?;
                self.store.get_latest(article_id, owner)?
            }
        };
        Ok(LatestDocument {
            snapshot: latest.snapshot,
            version: latest.version,
        })
    }

    pub fn get_document_version(&self, article_id: Uuid, version: u64) -> Result<Vec<u8>, ServiceError> {
        Ok(self.store.get_version(article_id, version)?.snapshot)
    }

    /// Version metadata, newest first.
    pub fn list_versions(&self, article_id: Uuid) -> Result<Vec<VersionSummary>, ServiceError> {
        let versions = self.store.list_versions(article_id)?;
        if versions.is_empty() {
            // known but never opened: no versions yet
            self.owner(article_id)?;
        }
        Ok(versions)
    }

    pub fn append_document_version(
        &self,
        article_id: Uuid,
        snapshot: &[u8],
        session_id: &str,
        author_id: Uuid,
    ) -> Result<AppendOutcome, ServiceError> {
        self.owner(article_id)?;
        Ok(self.store.append(article_id, snapshot, session_id, author_id)?)
    }

    /// Copy an old version forward as the new head.
    pub fn restore_version(
        &self,
        article_id: Uuid,
        version: u64,
        session_id: &str,
        author_id: Uuid,
    ) -> Result<RestoredVersion, ServiceError> {
        let outcome = self.store.restore(article_id, version, session_id, author_id)?;
        Ok(RestoredVersion {
            version: outcome.version,
        })
    }

    pub fn normalize(&self, blocks: Vec<Block>) -> Vec<Block> {
        normalize::normalize(blocks)
    }

    /// Load the latest snapshot into a new session.
    pub fn open_session(
        &self,
        article_id: Uuid,
        session_id: &str,
    ) -> Result<(DocumentSession, u64), ServiceError> {
        let latest = self.get_latest_document(article_id)?;
        let session = DocumentSession::from_snapshot(article_id, session_id, &latest.snapshot)?;
        Ok((session, latest.version))
    }

    fn owner(&self, article_id: Uuid) -> Result<Uuid, StoreError> {
        self.directory
            .owner_of(article_id)
            .ok_or(StoreError::ArticleNotFound(article_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StoreConfig;
    use folio_core::block::INITIAL_BLOCK_ID;
    use folio_core::codec::{decode_blocks, encode_blocks};

    fn temp_db_path(name: &str) -> String {
        format!("/tmp/folio_test_service_{}_{}", name, Uuid::new_v4())
    }

    fn cleanup(path: &str) {
        let _ = std::fs::remove_dir_all(path);
    }

    fn service(path: &str) -> (DocumentService<HashMap<Uuid, Uuid>>, Uuid, Uuid) {
        let store = Arc::new(VersionStore::open(StoreConfig::for_testing(path)).unwrap());
        let (article, owner) = (Uuid::new_v4(), Uuid::new_v4());
        let directory = HashMap::from([(article, owner)]);
        (DocumentService::new(store, directory), article, owner)
    }

    #[test]
    fn test_latest_bootstraps_known_article() {
        let path = temp_db_path("bootstrap");
        {
            let (svc, article, owner) = service(&path);
            let latest = svc.get_latest_document(article).unwrap();
            assert_eq!(latest.version, 1);
            let blocks = decode_blocks(&latest.snapshot).unwrap();
            assert_eq!(blocks.len(), 1);
            assert_eq!(blocks[0].id, INITIAL_BLOCK_ID);

            let listed = svc.list_versions(article).unwrap();
            assert_eq!(listed.len(), 1);
            assert_eq!(listed[0].author_id, owner);
        }
        cleanup(&path);
    }

    #[test]
    fn test_unknown_article() {
        let path = temp_db_path("unknown");
        {
            let (svc, _, _) = service(&path);
            let stranger = Uuid::new_v4();
            assert!(matches!(
                svc.get_latest_document(stranger),
                Err(ServiceError::Store(StoreError::ArticleNotFound(id))) if id == stranger
            ));
            assert!(matches!(
                svc.list_versions(stranger),
                Err(ServiceError::Store(StoreError::ArticleNotFound(_)))
            ));
            let bytes = encode_blocks(&[Block::paragraph("p", "x")]).unwrap();
            assert!(svc
                .append_document_version(stranger, &bytes, "s", Uuid::new_v4())
                .is_err());
        }
        cleanup(&path);
    }

    #[test]
    fn test_known_article_without_versions_lists_empty() {
        let path = temp_db_path("empty_list");
        {
            let (svc, article, _) = service(&path);
            assert!(svc.list_versions(article).unwrap().is_empty());
        }
        cleanup(&path);
    }

    #[test]
    fn test_restore_round_trip() {
        let path = temp_db_path("restore");
        {
            let (svc, article, owner) = service(&path);
            let v1 = svc.get_latest_document(article).unwrap();
            let edited = encode_blocks(&[Block::paragraph("p", "edited")]).unwrap();
            let outcome = svc.append_document_version(article, &edited, "s1", owner).unwrap();
            assert_eq!(outcome.version, 2);

            let restored = svc.restore_version(article, 1, "s1", owner).unwrap();
            assert_eq!(restored.version, 3);
            let latest = svc.get_latest_document(article).unwrap();
            assert_eq!(latest.snapshot, v1.snapshot);
            assert_eq!(svc.get_document_version(article, 2).unwrap(), edited);

            // restoring the head again changes nothing
            assert_eq!(svc.restore_version(article, 3, "s1", owner).unwrap().version, 3);
        }
        cleanup(&path);
    }

    #[test]
    fn test_open_session_hydrates_without_signal() {
        let path = temp_db_path("open");
        {
            let (svc, article, _) = service(&path);
            let (session, version) = svc.open_session(article, "s1").unwrap();
            assert_eq!(version, 1);
            assert_eq!(session.block_count(), 1);
            assert_eq!(session.local_change_count(), 0);
            assert_eq!(svc.list_versions(article).unwrap().len(), 1);
        }
        cleanup(&path);
    }

    #[test]
    fn test_normalize_passthrough() {
        let path = temp_db_path("normalize");
        {
            let (svc, _, _) = service(&path);
            let out = svc.normalize(vec![Block::heading("h", Some(9), "Title")]);
            assert!(out[0].is_heading());
        }
        cleanup(&path);
    }
}
