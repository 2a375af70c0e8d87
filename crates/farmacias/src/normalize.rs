//! Canonical comparison form for commune strings.
//!
//! Every matching strategy compares normalized text only, so "Viña del Mar",
//! "VINA DEL MAR" and "viña-del-mar" all reduce to the same shape.

use ahash::AHashSet as HashSet;
use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::{UnicodeNormalization, char::is_combining_mark};

static RE_NOT_WORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^\p{L}\p{N}\s]").expect("invalid RE_NOT_WORD"));

/// Strips diacritics, case and punctuation, then trims.
///
/// Idempotent: `normalize(&normalize(s)) == normalize(s)`.
#[must_use]
pub fn normalize(text: &str) -> String {
    let stripped = text
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase();
    RE_NOT_WORD.replace_all(&stripped, "").trim().to_owned()
}

/// The 3-character shingles of `normalized`, padded with one space on
/// each side. Strings shorter than one character yield no shingles.
#[must_use]
pub fn trigrams(normalized: &str) -> HashSet<String> {
    if normalized.is_empty() {
        return HashSet::new();
    }
    let padded = format!(" {normalized} ").chars().collect::<Vec<_>>();
    padded
        .windows(3)
        .map(|w| w.iter().collect::<String>())
        .collect()
}

/// Jaccard similarity of two shingle sets; 0 when both are empty.
#[must_use]
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}
