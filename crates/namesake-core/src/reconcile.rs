use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Description used when nothing usable could be parsed.
pub const PLACEHOLDER_DESCRIPTION: &str = "untitled media";

/// `ITEM3: text`, tolerating list bullets, markdown emphasis and `.`/`)` separators.
static MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?im)^[ \t>*#\-]*ITEM[ \t]*#?[ \t]*(\d+)[ \t]*(?:\*\*)?[ \t]*[:.)\-][ \t]*(?:\*\*)?[ \t]*(.*?)[ \t]*$",
    )
    .unwrap()
});

/// How a batch response was turned into descriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reconciliation {
    /// Marker count matched exactly.
    Exact,
    /// Fewer markers than frames; the last description was repeated.
    Padded,
    /// More markers than frames; extras were dropped.
    Truncated,
    /// No markers; the first non-blank lines were used.
    LineSplit,
    /// Nothing parsable; every frame got the placeholder.
    Placeholder,
}

impl Reconciliation {
    /// Results from anything but an exact or line-split parse are lower confidence.
    pub fn is_degraded(self) -> bool {
        matches!(self, Self::Padded | Self::Truncated | Self::Placeholder)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciled {
    pub descriptions: Vec<String>,
    pub method: Reconciliation,
}

/// Descriptions carried by `ITEM<n>:` lines, in encounter order.
///
/// Every marker line counts, so an empty body keeps its slot and gets
/// [`PLACEHOLDER_DESCRIPTION`].
pub fn parse_markers(raw: &str) -> Vec<String> {
    MARKER_RE
        .captures_iter(raw)
        .map(|c| match c[2].trim_end_matches("**").trim() {
            "" => PLACEHOLDER_DESCRIPTION.to_string(),
            body => body.to_string(),
        })
        .collect()
}

/// Align a raw batch response to exactly `expected` descriptions.
///
/// Markers win when present, padded by repeating the last one or truncated
/// when their count is off. Without markers the first `expected` non-blank
/// lines are used, and failing that every frame gets
/// [`PLACEHOLDER_DESCRIPTION`].
pub fn reconcile(raw: &str, expected: usize) -> Reconciled {
    let mut markers = parse_markers(raw);

    if !markers.is_empty() {
        let method = match markers.len() {
            n if n == expected => Reconciliation::Exact,
            n if n < expected => Reconciliation::Padded,
            _ => Reconciliation::Truncated,
        };
        if let Some(last) = markers.last().cloned() {
            markers.resize(expected, last);
        }
        return Reconciled { descriptions: markers, method };
    }

    let lines: Vec<String> = raw
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect();
    if lines.len() >= expected {
        return Reconciled {
            descriptions: lines.into_iter().take(expected).collect(),
            method: Reconciliation::LineSplit,
        };
    }

    Reconciled {
        descriptions: vec![PLACEHOLDER_DESCRIPTION.to_string(); expected],
        method: Reconciliation::Placeholder,
    }
}
