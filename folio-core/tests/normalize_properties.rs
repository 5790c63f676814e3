use folio_core::block::{Block, BlockKind, InlineNode, Styles};
use folio_core::normalize::normalize;
use proptest::prelude::*;

const TOKENS: &[&str] = &[
    "word",
    " ",
    "We provide",
    "for example",
    "however",
    ". ",
    ".",
    "!",
    "?",
    ",",
    "—",
    " - ",
    "[label]",
    "(https://x.example/a)",
    "[docs](http://b.example)",
    "https://",
    "http://.",
    "https://c.example/p?q=1",
    "(",
    ")",
    "]",
    "Ünïcödé",
];

fn cases() -> u32 {
    std::env::var("PROPTEST_CASES")
        .ok()
        .and_then(|value| value.parse::<u32>().ok())
        .unwrap_or(128)
}

fn text_strategy() -> impl Strategy<Value = String> {
    prop::collection::vec(prop::sample::select(TOKENS), 0..40).prop_map(|parts| parts.concat())
}

fn styles_strategy() -> impl Strategy<Value = Styles> {
    (any::<bool>(), any::<bool>()).prop_map(|(bold, italic)| Styles {
        bold,
        italic,
        ..Styles::default()
    })
}

fn content_strategy() -> impl Strategy<Value = Vec<InlineNode>> {
    prop::collection::vec(
        prop_oneof![
            4 => (text_strategy(), styles_strategy()).prop_map(|(t, s)| InlineNode::styled(t, s)),
            1 => text_strategy().prop_map(|t| InlineNode::link("https://kept.example", t, Styles::default())),
            1 => text_strategy().prop_map(|t| InlineNode::marker("thread", t)),
        ],
        0..4,
    )
}

fn kind_strategy() -> impl Strategy<Value = BlockKind> {
    prop_oneof![
        Just(BlockKind::Paragraph),
        prop::option::of(-3i64..10).prop_map(|level| BlockKind::Heading {
            props: folio_core::block::HeadingProps { level },
        }),
        Just(BlockKind::Quote),
    ]
}

fn block_strategy() -> impl Strategy<Value = Block> {
    let leaf = (kind_strategy(), content_strategy()).prop_map(|(kind, content)| Block::new("leaf", kind, content));
    (kind_strategy(), content_strategy(), prop::collection::vec(leaf, 0..3))
        .prop_map(|(kind, content, children)| Block::new("root", kind, content).with_children(children))
}

fn headings_are_clamped(blocks: &[Block]) -> bool {
    blocks.iter().all(|block| {
        let own = match &block.kind {
            BlockKind::Heading { props } => matches!(props.level, Some(1..=6)),
            _ => true,
        };
        own && headings_are_clamped(&block.children)
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(cases()))]
    #[test]
    fn test_normalize_is_idempotent(blocks in prop::collection::vec(block_strategy(), 0..6)) {
        let once = normalize(blocks);
        let twice = normalize(once.clone());
        prop_assert_eq!(twice, once);
    }

    #[test]
    fn test_surviving_headings_have_valid_level(blocks in prop::collection::vec(block_strategy(), 0..6)) {
        let out = normalize(blocks);
        prop_assert!(headings_are_clamped(&out));
    }

    #[test]
    fn test_block_count_and_ids_preserved(blocks in prop::collection::vec(block_strategy(), 0..6)) {
        let ids: Vec<String> = blocks.iter().map(|b| b.id.clone()).collect();
        let out = normalize(blocks);
        let out_ids: Vec<String> = out.iter().map(|b| b.id.clone()).collect();
        prop_assert_eq!(out_ids, ids);
    }
}
