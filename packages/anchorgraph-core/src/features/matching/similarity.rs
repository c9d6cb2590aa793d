//! Textual similarity of reconstructed fingerprints.
//!
//! Scores are Jaro similarity in [0, 1], computed after a canonicalization
//! pass that strips presentation differences two versions of the same code
//! commonly have: case, HTML entity encodings, English contractions in
//! message strings, and whitespace.

static HTML_ENTITIES: &[(&str, &str, &str)] = &[
    (" ", "&nbsp;", "&#160;"),
    ("<", "&lt;", "&#60;"),
    (">", "&gt;", "&#62;"),
    ("&", "&amp;", "&#38;"),
    ("\"", "&quot;", "&#34;"),
    ("'", "&apos;", "&#39;"),
];

static CONTRACTIONS: &[(&str, &str)] = &[
    ("does not", "doesn't"),
    ("do not", "don't"),
    ("must not", "mustn't"),
    ("should not", "shouldn't"),
    ("can not", "can't"),
    ("is not", "isn't"),
    ("are not", "aren't"),
];

/// Canonical form used for fingerprint comparison.
pub fn canonicalize(text: &str) -> String {
    let mut out = text.to_lowercase();
    for (plain, named, numeric) in HTML_ENTITIES {
        out = out.replace(named, plain);
        out = out.replace(numeric, plain);
    }
    for (expanded, contracted) in CONTRACTIONS {
        out = out.replace(contracted, expanded);
    }
    out.retain(|c| !c.is_whitespace());
    out
}

/// Jaro similarity over chars; two empty strings are identical.
///
/// Jaro tolerates a short insertion inside long matching text far better
/// than edit distance does, which is what fingerprint comparison needs: a
/// one-line sanitizer added by a patch should barely dent the score of an
/// otherwise identical slice.
pub fn jaro_similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let window = (a.len().max(b.len()) / 2).saturating_sub(1);
    let mut a_matched = vec![false; a.len()];
    let mut b_matched = vec![false; b.len()];
    let mut matches = 0usize;
    for (i, &ca) in a.iter().enumerate() {
        let lo = i.saturating_sub(window);
        let hi = (i + window + 1).min(b.len());
        for (j, matched) in b_matched.iter_mut().enumerate().take(hi).skip(lo) {
            if !*matched && b[j] == ca {
                a_matched[i] = true;
                *matched = true;
                matches += 1;
                break;
            }
        }
    }
    if matches == 0 {
        return 0.0;
    }
    let mut transpositions = 0usize;
    let mut j = 0usize;
    for (i, &ca) in a.iter().enumerate() {
        if !a_matched[i] {
            continue;
        }
        while !b_matched[j] {
            j += 1;
        }
        if ca != b[j] {
            transpositions += 1;
        }
        j += 1;
    }
    let m = matches as f64;
    (m / a.len() as f64 + m / b.len() as f64 + (m - transpositions as f64 / 2.0) / m) / 3.0
}

/// Scores `candidates` against `origin`, canonicalizing both sides.
pub fn similarity_scores(origin: &str, candidates: &[String]) -> Vec<f64> {
    let origin = canonicalize(origin);
    candidates
        .iter()
        .map(|candidate| jaro_similarity(&origin, &canonicalize(candidate)))
        .collect()
}
