//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use folio_collab::service::DocumentService;
use folio_collab::storage::{StoreConfig, VersionStore};
use tempfile::TempDir;
use uuid::Uuid;

pub struct Fixture {
    // keeps the database directory alive
    pub dir: TempDir,
    pub store: Arc<VersionStore>,
    pub service: DocumentService<HashMap<Uuid, Uuid>>,
    pub article: Uuid,
    pub owner: Uuid,
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn fixture() -> Fixture {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(VersionStore::open(StoreConfig::for_testing(dir.path().join("db"))).unwrap());
    let (article, owner) = (Uuid::new_v4(), Uuid::new_v4());
    let service = DocumentService::new(store.clone(), HashMap::from([(article, owner)]));
    Fixture {
        dir,
        store,
        service,
        article,
        owner,
    }
}
