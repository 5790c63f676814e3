//! Passes 2 and 3: turn link syntax inside text runs into link nodes.
//!
//! ```text
//! "See [docs](https://d.example) or https://e.example."
//!   → text("See ") link(d.example, "docs") text(" or ") link(e.example) text(".")
//! ```
//!
//! Only plain text runs are scanned; existing links and markers pass through.
//! Split pieces inherit the styles of the run they came from, and runs without
//! a match are kept as they are.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::block::{InlineNode, Styles, TextRun};

static MARKDOWN_LINK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[([^\]]+)\]\(([^)\s]+)\)").expect("markdown link regex must compile")
});

static BARE_URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"https?://\S+").expect("bare url regex must compile"));

/// Characters stripped from the end of a bare URL and kept as text.
pub const TRAILING_PUNCTUATION: [char; 6] = ['.', ',', ';', ':', '!', '?'];

/// Pass 2 then pass 3.
pub fn extract_links(content: Vec<InlineNode>) -> Vec<InlineNode> {
    extract_bare_urls(extract_markdown_links(content))
}

/// Pass 2: `[label](url)` becomes a link labelled `label`.
pub fn extract_markdown_links(content: Vec<InlineNode>) -> Vec<InlineNode> {
    split_runs(content, &MARKDOWN_LINK_RE, |caps| {
        let label = caps.get(1)?.as_str();
        let href = caps.get(2)?.as_str();
        Some(Found {
            href: href.to_string(),
            label: label.to_string(),
            trailing_len: 0,
        })
    })
}

/// Pass 3: bare `http(s)://` tokens become links labelled with the URL.
pub fn extract_bare_urls(content: Vec<InlineNode>) -> Vec<InlineNode> {
    split_runs(content, &BARE_URL_RE, |caps| {
        let token = caps.get(0)?.as_str();
        let url = token.trim_end_matches(TRAILING_PUNCTUATION);
        if is_bare_scheme(url) {
            return None;
        }
        Some(Found {
            href: url.to_string(),
            label: url.to_string(),
            trailing_len: token.len() - url.len(),
        })
    })
}

fn is_bare_scheme(url: &str) -> bool {
    url.ends_with("://")
}

/// A match accepted as a link. The last `trailing_len` bytes of the match
/// stay plain text.
struct Found {
    href: String,
    label: String,
    trailing_len: usize,
}

fn split_runs<F>(content: Vec<InlineNode>, re: &Regex, accept: F) -> Vec<InlineNode>
where
    F: Fn(&Captures<'_>) -> Option<Found>,
{
    let mut out = Vec::with_capacity(content.len());
    for node in content {
        match node {
            InlineNode::Text(run) if re.is_match(&run.text) => split_run(run, re, &accept, &mut out),
            other => out.push(other),
        }
    }
    out
}

fn split_run<F>(run: TextRun, re: &Regex, accept: &F, out: &mut Vec<InlineNode>)
where
    F: Fn(&Captures<'_>) -> Option<Found>,
{
    let text = run.text.as_str();
    let styles = run.styles;
    let mut emitted = false;
    let mut pending = String::new();
    let mut cursor = 0;

    for caps in re.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        let Some(found) = accept(&caps) else { continue };
        pending.push_str(&text[cursor..whole.start()]);
        flush_text(&mut pending, styles, out);
        out.push(InlineNode::link(found.href, found.label, styles));
        pending.push_str(&text[whole.end() - found.trailing_len..whole.end()]);
        cursor = whole.end();
        emitted = true;
    }

    if !emitted {
        out.push(InlineNode::Text(run));
        return;
    }
    pending.push_str(&text[cursor..]);
    flush_text(&mut pending, styles, out);
}

fn flush_text(pending: &mut String, styles: Styles, out: &mut Vec<InlineNode>) {
    if !pending.is_empty() {
        out.push(InlineNode::styled(std::mem::take(pending), styles));
    }
}
