use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Words kept from a description when building a name
const MAX_NAME_WORDS: usize = 8;
const MAX_TAGS: usize = 5;
const MIN_TAG_LEN: usize = 4;

pub const FALLBACK_STEM: &str = "untitled";

const STOP_WORDS: &[&str] = &[
    "about", "above", "after", "again", "also", "among", "an", "and", "are", "around", "been",
    "being", "below", "between", "both", "from", "have", "image", "into", "just", "like", "more",
    "near", "over", "photo", "picture", "shows", "some", "than", "that", "their", "them", "there",
    "these", "this", "those", "through", "under", "very", "were", "what", "when", "where", "which",
    "while", "with", "within",
];

/// Split into lowercase ASCII-folded alphanumeric words.
fn words(text: &str) -> Vec<String> {
    let folded: String = text
        .nfkd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase();
    folded
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

/// Turn a free-text description into a kebab-case name.
pub fn suggest_name(description: &str) -> String {
    let name = words(description)
        .into_iter()
        .take(MAX_NAME_WORDS)
        .collect::<Vec<_>>()
        .join("-");
    if name.is_empty() {
        FALLBACK_STEM.to_string()
    } else {
        name
    }
}

/// Distinct content words from a description, in encounter order.
pub fn extract_tags(description: &str) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    for w in words(description) {
        if tags.len() >= MAX_TAGS {
            break;
        }
        if w.chars().count() < MIN_TAG_LEN
            || w.chars().all(|c| c.is_ascii_digit())
            || STOP_WORDS.contains(&w.as_str())
            || tags.contains(&w)
        {
            continue;
        }
        tags.push(w);
    }
    tags
}

/// Make a file stem safe for every common filesystem.
///
/// Illegal and control characters are dropped, whitespace runs become a
/// single `-`, and the result is capped at `max_len` characters.
pub fn sanitize_stem(name: &str, max_len: usize) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_sep = false;
    for c in name.chars() {
        if c.is_whitespace() {
            pending_sep = !out.is_empty();
            continue;
        }
        if c.is_control() || matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|') {
            continue;
        }
        if pending_sep {
            out.push('-');
            pending_sep = false;
        }
        out.push(c);
    }

    let capped: String = out.chars().take(max_len.max(1)).collect();
    let trimmed = capped.trim_matches(|c: char| c == '-' || c == '.' || c == '_');
    if trimmed.is_empty() {
        FALLBACK_STEM.to_string()
    } else {
        trimmed.to_string()
    }
}
