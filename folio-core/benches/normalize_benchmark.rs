use criterion::{criterion_group, criterion_main, Criterion};
use folio_core::{codec, normalize, Block, DocumentSession};
use std::hint::black_box;
use uuid::Uuid;

fn generated_article(sections: usize) -> Vec<Block> {
    let mut blocks = Vec::with_capacity(sections * 3);
    for i in 0..sections {
        blocks.push(Block::heading(format!("h{i}"), None, format!("Section {i}")));
        blocks.push(Block::heading(
            format!("s{i}"),
            Some(3),
            "We provide comprehensive SEO services, including audits, and we ensure fast turnaround.",
        ));
        blocks.push(Block::paragraph(
            format!("p{i}"),
            "Read [the guide](https://guide.example/seo) or visit https://example.com/page, it's great.",
        ));
    }
    blocks
}

fn bench_normalize(c: &mut Criterion) {
    let blocks = generated_article(100);

    c.bench_function("normalize_300_blocks", |b| {
        b.iter(|| black_box(normalize(black_box(blocks.clone()))))
    });
}

fn bench_normalize_idempotent_pass(c: &mut Criterion) {
    let normalized = normalize(generated_article(100));

    c.bench_function("normalize_already_normalized_300_blocks", |b| {
        b.iter(|| black_box(normalize(black_box(normalized.clone()))))
    });
}

fn bench_snapshot_codec(c: &mut Criterion) {
    let bytes = codec::encode_blocks(&normalize(generated_article(100))).unwrap();

    c.bench_function("snapshot_decode_encode_300_blocks", |b| {
        b.iter(|| {
            let blocks = codec::decode_blocks(black_box(&bytes)).unwrap();
            black_box(codec::encode_blocks(&blocks).unwrap());
        })
    });
}

fn bench_session_hydrate(c: &mut Criterion) {
    let bytes = codec::encode_blocks(&normalize(generated_article(100))).unwrap();
    let article = Uuid::new_v4();

    c.bench_function("session_hydrate_300_blocks", |b| {
        b.iter(|| {
            let session = DocumentSession::from_snapshot(article, "bench", black_box(&bytes)).unwrap();
            black_box(session.block_count());
        })
    });
}

criterion_group!(
    benches,
    bench_normalize,
    bench_normalize_idempotent_pass,
    bench_snapshot_codec,
    bench_session_hydrate,
);
criterion_main!(benches);
