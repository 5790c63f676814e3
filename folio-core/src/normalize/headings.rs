//! Pass 1: demote headings that read like prose.
//!
//! Generated content often marks whole sentences as headings. Each heading's
//! trimmed text is run through [`PARAGRAPH_RULES`] in order; the first rule that
//! matches turns the block into a paragraph. Lengths are in `char`s.

use crate::block::{Block, BlockKind, HeadingProps, DEFAULT_HEADING_LEVEL, HEADING_LEVELS};

/// Phrases that mark a sentence as explanatory prose rather than a title.
/// Matched case-insensitively as substrings.
pub const EXPLANATORY_MARKERS: [&str; 41] = [
    "we provide",
    "we offer",
    "we ensure",
    "we help",
    "we believe",
    "we will",
    "you can",
    "you will",
    "you should",
    "you need",
    "for example",
    "for instance",
    "such as",
    "including",
    "however",
    "therefore",
    "in addition",
    "additionally",
    "furthermore",
    "moreover",
    "as a result",
    "because",
    "in order to",
    "this means",
    "which means",
    "in other words",
    "on the other hand",
    "in fact",
    "as well as",
    "it is important",
    "it's important",
    "make sure",
    "allows you",
    "helps you",
    "designed to",
    "can help",
    "according to",
    "due to",
    "in this article",
    "in this guide",
    "keep in mind",
];

/// Reasons a heading is reclassified as a paragraph, in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParagraphRule {
    /// Ends in `.`, `!` or `?` and is longer than 10.
    TerminalPunctuation,
    /// Longer than 250.
    TooLong,
    /// Three or more `". "` sentence breaks.
    MultipleSentences,
    /// Ends in `.`, longer than 60, contains an explanatory marker.
    Explanatory,
    /// Contains an em-dash or spaced hyphen and is longer than 80.
    DashClause,
}

pub const PARAGRAPH_RULES: [ParagraphRule; 5] = [
    ParagraphRule::TerminalPunctuation,
    ParagraphRule::TooLong,
    ParagraphRule::MultipleSentences,
    ParagraphRule::Explanatory,
    ParagraphRule::DashClause,
];

const TERMINAL_MIN_LEN: usize = 10;
const MAX_HEADING_LEN: usize = 250;
const SENTENCE_BREAK_LIMIT: usize = 3;
const EXPLANATORY_MIN_LEN: usize = 60;
const DASH_CLAUSE_MIN_LEN: usize = 80;

impl ParagraphRule {
    /// Whether this rule fires for already-trimmed heading text.
    pub fn matches(self, text: &str) -> bool {
        let len = text.chars().count();
        match self {
            ParagraphRule::TerminalPunctuation => {
                text.ends_with(['.', '!', '?']) && len > TERMINAL_MIN_LEN
            }
            ParagraphRule::TooLong => len > MAX_HEADING_LEN,
            ParagraphRule::MultipleSentences => text.matches(". ").count() >= SENTENCE_BREAK_LIMIT,
            ParagraphRule::Explanatory => {
                text.ends_with('.') && len > EXPLANATORY_MIN_LEN && is_explanatory(text)
            }
            ParagraphRule::DashClause => {
                (text.contains('—') || text.contains(" - ")) && len > DASH_CLAUSE_MIN_LEN
            }
        }
    }
}

/// First rule demoting `text` to a paragraph, if any.
pub fn paragraph_rule(text: &str) -> Option<ParagraphRule> {
    let text = text.trim();
    PARAGRAPH_RULES.into_iter().find(|rule| rule.matches(text))
}

pub fn is_explanatory(text: &str) -> bool {
    let lower = text.to_lowercase();
    EXPLANATORY_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// Missing levels become 2, others are clamped into 1..=6.
pub fn clamp_level(level: Option<i64>) -> i64 {
    match level {
        None => DEFAULT_HEADING_LEVEL,
        Some(level) => level.clamp(*HEADING_LEVELS.start(), *HEADING_LEVELS.end()),
    }
}

/// Apply pass 1 to a single block (children untouched).
pub(crate) fn reclassify(block: &mut Block) {
    let BlockKind::Heading { props } = &block.kind else {
        return;
    };
    if let Some(rule) = paragraph_rule(&block.plain_text()) {
        log::debug!("block {} demoted to paragraph ({:?})", block.id, rule);
        block.kind = BlockKind::Paragraph;
        return;
    }
    let level = clamp_level(props.level);
    block.kind = BlockKind::Heading {
        props: HeadingProps { level: Some(level) },
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_lexicon_is_lowercase_and_unique() {
        let mut seen = std::collections::HashSet::new();
        for marker in EXPLANATORY_MARKERS {
            assert_eq!(marker, marker.to_lowercase());
            assert!(seen.insert(marker), "duplicate marker {marker}");
        }
        assert_eq!(seen.len(), 41);
    }

    #[test]
    fn test_rule_order() {
        assert_eq!(PARAGRAPH_RULES[0], ParagraphRule::TerminalPunctuation);
        assert_eq!(PARAGRAPH_RULES[4], ParagraphRule::DashClause);
    }

    #[test]
    fn test_short_titles_survive() {
        assert_eq!(paragraph_rule("Our Services"), None);
        assert_eq!(paragraph_rule("Why SEO?"), None);
        assert_eq!(paragraph_rule("  Pricing  "), None);
    }

    #[test]
    fn test_terminal_punctuation() {
        assert_eq!(
            paragraph_rule("This is a full sentence."),
            Some(ParagraphRule::TerminalPunctuation)
        );
        assert_eq!(paragraph_rule("Really now?!"), Some(ParagraphRule::TerminalPunctuation));
        // exactly 10 chars stays a heading
        assert_eq!(paragraph_rule("Ten chars!"), None);
    }

    #[test]
    fn test_too_long() {
        let text = "word ".repeat(60);
        assert_eq!(paragraph_rule(&text), Some(ParagraphRule::TooLong));
    }

    #[test]
    fn test_multiple_sentences() {
        assert_eq!(
            paragraph_rule("One. Two. Three. Four"),
            Some(ParagraphRule::MultipleSentences)
        );
        assert_eq!(paragraph_rule("One. Two. Three"), None);
    }

    #[test]
    fn test_explanatory_rule_in_isolation() {
        let text = "We provide comprehensive SEO services, including audits, and we ensure fast turnaround.";
        assert!(ParagraphRule::Explanatory.matches(text));
        assert!(!ParagraphRule::Explanatory.matches("We provide SEO."));
        assert!(is_explanatory("HOWEVER it goes"));
    }

    #[test]
    fn test_dash_clause() {
        let text = format!("A guide to structured data — {}", "with schema markup ".repeat(4));
        assert_eq!(paragraph_rule(&text), Some(ParagraphRule::DashClause));
        let spaced = format!("Local search - {}", "map pack ranking factors ".repeat(4));
        assert_eq!(paragraph_rule(&spaced), Some(ParagraphRule::DashClause));
        assert_eq!(paragraph_rule("Short — title"), None);
    }

    #[test]
    fn test_length_counts_chars_not_bytes() {
        // 9 chars, 18+ bytes
        assert_eq!(paragraph_rule("Привет!!!"), None);
    }

    #[test]
    fn test_clamp_level() {
        assert_eq!(clamp_level(None), 2);
        assert_eq!(clamp_level(Some(0)), 1);
        assert_eq!(clamp_level(Some(-4)), 1);
        assert_eq!(clamp_level(Some(3)), 3);
        assert_eq!(clamp_level(Some(9)), 6);
    }

    #[test]
    fn test_reclassify_block() {
        let mut heading = Block::heading("h", Some(12), "Keep me");
        reclassify(&mut heading);
        assert_eq!(
            heading.kind,
            BlockKind::Heading {
                props: HeadingProps { level: Some(6) }
            }
        );

        let mut prose = Block::heading(
            "p",
            None,
            "We provide comprehensive SEO services, including audits, and we ensure fast turnaround.",
        );
        reclassify(&mut prose);
        assert!(prose.is_paragraph());
    }
}
