//! Version log behaviour through the document service.
//!
//! Verifies:
//! - Bootstrap of a version-less article
//! - Idempotent appends and gap-free numbering
//! - Restore copies an old snapshot forward
//! - Rejection of malformed snapshots
//! - Data survives reopening the store

mod common;

use std::sync::Arc;

use folio_collab::service::ServiceError;
use folio_collab::storage::{StoreConfig, StoreError, VersionStore};
use folio_core::block::{Block, INITIAL_BLOCK_ID};
use folio_core::codec::{decode_blocks, encode_blocks};
use folio_core::INITIAL_SESSION_ID;
use uuid::Uuid;

fn snapshot(text: &str) -> Vec<u8> {
    encode_blocks(&[Block::heading("title", Some(1), "Title"), Block::paragraph("body", text)]).unwrap()
}

// ─── Bootstrap ───────────────────────────────────────────────────────────────

#[test]
fn test_bootstrap_creates_single_empty_paragraph() {
    let fx = common::fixture();

    let latest = fx.service.get_latest_document(fx.article).unwrap();
    assert_eq!(latest.version, 1);
    let blocks = decode_blocks(&latest.snapshot).unwrap();
    assert_eq!(blocks, vec![Block::paragraph(INITIAL_BLOCK_ID, "")]);

    let versions = fx.service.list_versions(fx.article).unwrap();
    assert_eq!(versions.len(), 1);
    assert_eq!(versions[0].session_id, INITIAL_SESSION_ID);
    assert_eq!(versions[0].author_id, fx.owner);

    // a second read does not bootstrap again
    assert_eq!(fx.service.get_latest_document(fx.article).unwrap().version, 1);
}

// ─── Appends ─────────────────────────────────────────────────────────────────

#[test]
fn test_identical_append_is_idempotent() {
    let fx = common::fixture();
    let bytes = snapshot("hello");

    let first = fx
        .service
        .append_document_version(fx.article, &bytes, "s1", fx.owner)
        .unwrap();
    let second = fx
        .service
        .append_document_version(fx.article, &bytes, "s2", Uuid::new_v4())
        .unwrap();

    assert!(first.created);
    assert!(!second.created);
    assert_eq!(first.version, second.version);
    assert_eq!(fx.service.list_versions(fx.article).unwrap().len(), 1);
}

#[test]
fn test_versions_are_gap_free_and_newest_first() {
    let fx = common::fixture();
    for i in 0..10 {
        fx.service
            .append_document_version(fx.article, &snapshot(&format!("edit {i}")), "s1", fx.owner)
            .unwrap();
    }

    let listed: Vec<u64> = fx
        .service
        .list_versions(fx.article)
        .unwrap()
        .iter()
        .map(|v| v.version)
        .collect();
    assert_eq!(listed, (1..=10).rev().collect::<Vec<_>>());
    assert_eq!(
        fx.service.get_document_version(fx.article, 4).unwrap(),
        snapshot("edit 3")
    );
}

#[test]
fn test_malformed_snapshot_writes_nothing() {
    let fx = common::fixture();
    let cases: [&[u8]; 3] = [b"not json", b"[]", br#"[{"id":"a","type":"mystery"}]"#];

    for bytes in cases {
        let err = fx
            .service
            .append_document_version(fx.article, bytes, "s1", fx.owner)
            .unwrap_err();
        assert!(matches!(err, ServiceError::Store(StoreError::InvalidSnapshot(_))));
    }
    assert!(fx.service.list_versions(fx.article).unwrap().is_empty());
}

#[test]
fn test_missing_version() {
    let fx = common::fixture();
    fx.service.get_latest_document(fx.article).unwrap();
    assert!(matches!(
        fx.service.get_document_version(fx.article, 7),
        Err(ServiceError::Store(StoreError::VersionNotFound { version: 7, .. }))
    ));
}

// ─── Restore ─────────────────────────────────────────────────────────────────

#[test]
fn test_restore_copies_snapshot_forward() {
    let fx = common::fixture();
    for text in ["one", "two", "three"] {
        fx.service
            .append_document_version(fx.article, &snapshot(text), "s1", fx.owner)
            .unwrap();
    }

    let restored = fx.service.restore_version(fx.article, 1, "s2", fx.owner).unwrap();
    assert_eq!(restored.version, 4);

    let latest = fx.service.get_latest_document(fx.article).unwrap();
    assert_eq!(latest.version, 4);
    assert_eq!(latest.snapshot, snapshot("one"));
    // history is untouched
    assert_eq!(fx.service.get_document_version(fx.article, 3).unwrap(), snapshot("three"));
}

#[test]
fn test_restore_unknown_version_fails() {
    let fx = common::fixture();
    fx.service.get_latest_document(fx.article).unwrap();
    assert!(fx.service.restore_version(fx.article, 9, "s1", fx.owner).is_err());
    assert_eq!(fx.store.head_version(fx.article).unwrap(), 1);
}

// ─── Durability ──────────────────────────────────────────────────────────────

#[test]
fn test_versions_survive_reopen() {
    let fx = common::fixture();
    fx.service
        .append_document_version(fx.article, &snapshot("durable"), "s1", fx.owner)
        .unwrap();
    fx.store.sync().unwrap();
    let path = fx.store.path().to_path_buf();
    drop(fx.service);
    drop(fx.store);

    let reopened = VersionStore::open(StoreConfig::for_testing(&path)).unwrap();
    let latest = reopened.latest(fx.article).unwrap().unwrap();
    assert_eq!(latest.version, 1);
    assert_eq!(latest.snapshot, snapshot("durable"));
}

#[test]
fn test_concurrent_appends_are_totally_ordered() {
    let fx = common::fixture();
    let store = fx.store.clone();
    let article = fx.article;

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                for i in 0..5 {
                    let bytes = snapshot(&format!("thread {t} edit {i}"));
                    store.append(article, &bytes, &format!("s{t}"), Uuid::new_v4()).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let versions: Vec<u64> = store.list_versions(article).unwrap().iter().map(|v| v.version).collect();
    assert_eq!(versions, (1..=20).rev().collect::<Vec<_>>());
}
