//! Deterministic wikitext-to-prose rewriting.
//!
//! The rewrites run in a fixed order: templates, references and tags, links,
//! whitespace. Every rule is a pure function of its input string; none of them
//! consult locale, time, or unordered containers. Any change to the output of
//! this module must come with a bump of `PREPROCESSING_VERSION`.

use memchr::memchr2;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::borrow::Cow;
use thiserror::Error;

static COMMENT_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<!--.*?-->").unwrap());

static REF_SELF_CLOSING_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<ref\b[^>]*/\s*>").unwrap());

static REF_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<ref\b[^>]*>.*?</ref\s*>").unwrap());

static TAG_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"</?[A-Za-z][^<>]*>").unwrap());

/// A link with no nested `[[` inside, so repeated passes resolve innermost first.
static INNER_LINK_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[\[([^\[\]]*)\]\]").unwrap());

static EXTERNAL_LINK_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[(?:(?:https?|ftp):)?//[^\s\[\]]+(?:[ \t]+([^\[\]]*))?\]").unwrap()
});

/// Wikitext whose template braces do not balance.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MarkupError {
    #[error("template opened at byte {offset} is never closed")]
    UnclosedTemplate { offset: usize },
    #[error("template close at byte {offset} has no opening")]
    UnmatchedTemplateClose { offset: usize },
}

impl MarkupError {
    pub fn offset(&self) -> usize {
        match self {
            Self::UnclosedTemplate { offset } | Self::UnmatchedTemplateClose { offset } => *offset,
        }
    }
}

/// Reduces one raw article body to plain prose.
///
/// An empty result is valid and must be kept by the caller.
pub fn normalize(text: &str) -> Result<String, MarkupError> {
    let text = strip_templates(text)?;
    let text = strip_references(&text);
    let text = replace_links(&text);
    Ok(collapse_whitespace(&text))
}

/// Removes every balanced `{{ ... }}` region. Nested templates go with their
/// outermost parent, so no orphaned braces survive. Triple-brace parameters
/// `{{{1}}}` count as one unit.
pub fn strip_templates(text: &str) -> Result<String, MarkupError> {
    let bytes = text.as_bytes();
    let mut result = String::with_capacity(text.len());
    // Width (2 or 3) of each open brace group
    let mut open: Vec<usize> = Vec::new();
    let mut open_at = 0;
    let mut run_start = 0;
    let mut i = 0;

    while let Some(pos) = memchr2(b'{', b'}', &bytes[i..]) {
        let j = i + pos;
        let brace = bytes[j];
        let run = bytes[j..].iter().take_while(|&&b| b == brace).count();
        i = j + run;
        if run < 2 {
            continue;
        }

        if brace == b'{' {
            if open.is_empty() {
                result.push_str(&text[run_start..j]);
                open_at = j;
            }
            let mut left = run;
            while left >= 2 {
                let width = if left == 3 { 3 } else { 2 };
                open.push(width);
                left -= width;
            }
        } else {
            let mut left = run;
            while left >= 2 {
                let Some(width) = open.pop() else {
                    return Err(MarkupError::UnmatchedTemplateClose {
                        offset: j + run - left,
                    });
                };
                left -= width.min(left);
                if open.is_empty() {
                    run_start = j + run - left;
                }
            }
        }
    }

    if !open.is_empty() {
        return Err(MarkupError::UnclosedTemplate { offset: open_at });
    }
    result.push_str(&text[run_start..]);
    Ok(result)
}

/// Drops comments and `<ref>` citations with their content, then any other
/// tag while keeping the text it wraps.
pub fn strip_references(text: &str) -> String {
    let text = COMMENT_REGEX.replace_all(text, "");
    let text = REF_SELF_CLOSING_REGEX.replace_all(&text, "");
    let text = REF_REGEX.replace_all(&text, "");
    TAG_REGEX.replace_all(&text, "").into_owned()
}

/// Replaces internal and external link markup with its display text.
pub fn replace_links(text: &str) -> String {
    let mut current = Cow::Borrowed(text);
    while INNER_LINK_REGEX.is_match(&current) {
        current = Cow::Owned(
            INNER_LINK_REGEX
                .replace_all(&current, |caps: &Captures| {
                    internal_link_display(&caps[1]).to_string()
                })
                .into_owned(),
        );
    }

    EXTERNAL_LINK_REGEX
        .replace_all(&current, |caps: &Captures| {
            caps.get(1).map_or("", |m| m.as_str()).to_string()
        })
        .into_owned()
}

/// `Target|Display` gives the last piped segment (image captions come last);
/// a bare or empty-piped target loses its namespace prefix.
fn internal_link_display(inner: &str) -> &str {
    match inner.rsplit_once('|') {
        Some((target, display)) if display.trim().is_empty() => {
            strip_namespace(target.split('|').next().unwrap_or(target))
        }
        Some((_, display)) => display,
        None => strip_namespace(inner),
    }
}

/// Namespace and interwiki prefixes dropped from link targets, compared
/// case-insensitively. Each also matches with a trailing ` talk`. Changing this
/// list changes corpus output.
const LINK_PREFIXES: &[&str] = &[
    "book",
    "category",
    "commons",
    "draft",
    "file",
    "help",
    "image",
    "media",
    "mediawiki",
    "meta",
    "module",
    "portal",
    "project",
    "special",
    "species",
    "talk",
    "template",
    "timedtext",
    "user",
    "wikibooks",
    "wikidata",
    "wikinews",
    "wikipedia",
    "wikiquote",
    "wikisource",
    "wikiversity",
    "wikivoyage",
    "wikt",
    "wiktionary",
    "wp",
];

/// `:Category:Foo` -> `Foo`, `wikt:fr:mot` -> `mot`, `Halo: Reach` unchanged.
fn strip_namespace(target: &str) -> &str {
    let mut rest = target.trim().trim_start_matches(':');
    while let Some((prefix, tail)) = rest.split_once(':') {
        if !is_link_prefix(prefix.trim()) {
            break;
        }
        rest = tail;
    }
    rest
}

fn is_link_prefix(prefix: &str) -> bool {
    let name = prefix.replace('_', " ").to_ascii_lowercase();
    let base = name.strip_suffix(" talk").unwrap_or(&name);
    LINK_PREFIXES.contains(&base) || is_language_code(prefix)
}

/// Lowercase interlanguage codes such as `fr`, `de`, `zh-yue` or `simple`.
fn is_language_code(prefix: &str) -> bool {
    if prefix == "simple" {
        return true;
    }
    let (lang, variant) = match prefix.split_once('-') {
        Some((lang, variant)) => (lang, Some(variant)),
        None => (prefix, None),
    };
    (2..=3).contains(&lang.len())
        && lang.bytes().all(|b| b.is_ascii_lowercase())
        && variant.map_or(true, |v| !v.is_empty() && v.bytes().all(|b| b.is_ascii_lowercase()))
}

pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
