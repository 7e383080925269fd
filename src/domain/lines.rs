//! Emission-line identifiers.
//!
//! Grid tables and measurement catalogues spell the same line differently
//! (`o3_5007`, `OIII5007`, `[OIII]5007`). Everything inside the crate uses the
//! canonical ids below; raw column names go through [`canonical_line_id`] once,
//! at ingest.

/// Lines fitted when the caller does not choose.
pub const DEFAULT_FIT_LINES: [&str; 5] = ["OIII4959", "OIII5007", "HB", "HA", "OII3727"];

/// Unresolved doublets: `(component, component, blend)`.
pub const DOUBLETS: [(&str, &str, &str); 2] = [
    ("OII3726", "OII3729", "OII3727"),
    ("SII6717", "SII6731", "SII6716_6731"),
];

/// `(alias, canonical)` pairs. Aliases are compared after normalisation.
const ALIASES: &[(&str, &str)] = &[
    ("ha", "HA"),
    ("halpha", "HA"),
    ("h_alpha", "HA"),
    ("hb", "HB"),
    ("hbeta", "HB"),
    ("h_beta", "HB"),
    ("o1_6300", "OI6300"),
    ("o2_3726", "OII3726"),
    ("o2_3729", "OII3729"),
    ("o2_3727", "OII3727"),
    ("o3_1666", "OIII1666"),
    ("o3_4959", "OIII4959"),
    ("o3_5007", "OIII5007"),
    ("n2_6548", "NII6548"),
    ("n2_6584", "NII6584"),
    ("n5_1243", "NV1240"),
    ("s2_6716", "SII6717"),
    ("s2_6717", "SII6717"),
    ("s2_6731", "SII6731"),
    ("s2_6716_6731", "SII6716_6731"),
    ("he1_1083", "HEI1083"),
    ("he1_3965", "HEI3965"),
    ("he1_4471", "HEI4471"),
    ("he1_5876", "HEI5876"),
    ("he1_6678", "HEI6678"),
    ("he2_1640", "HEII1640"),
    ("he2_4686", "HEII4686"),
    ("c3_1909", "CIII1909"),
    ("c4_1551", "CIV1551"),
    ("si3_1892", "SIIII1892"),
];

/// Map a raw line label to its canonical id.
///
/// Unknown labels are upper-cased with brackets and spaces stripped, so
/// `[O III] 5007` and `OIII5007` agree even without a table entry.
pub fn canonical_line_id(raw: &str) -> String {
    let key = normalize_label(raw);
    ALIASES
        .iter()
        .find(|(alias, _)| *alias == key)
        .map(|(_, canonical)| canonical.to_string())
        .unwrap_or_else(|| key.to_ascii_uppercase())
}

fn normalize_label(raw: &str) -> String {
    raw.trim()
        .trim_start_matches('\u{feff}')
        .chars()
        .filter(|c| !matches!(c, '[' | ']' | ' '))
        .collect::<String>()
        .to_ascii_lowercase()
}

/// Labels at least this similar are treated as the same line when no exact
/// match exists.
pub const SIMILAR_LABEL_RATIO: f64 = 0.8;

/// Similarity of two labels in `[0, 1]`: twice the number of characters in
/// matching blocks over the total length.
///
/// Blocks are found by taking the longest common run and recursing on both
/// sides of it.
pub fn label_similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    2.0 * matched_chars(&a, &b) as f64 / (a.len() + b.len()) as f64
}

fn matched_chars(a: &[char], b: &[char]) -> usize {
    // Longest common run, earliest in `a` then `b` on ties.
    let mut best = (0, 0, 0);
    let mut prev = vec![0usize; b.len() + 1];
    for i in 0..a.len() {
        let mut cur = vec![0usize; b.len() + 1];
        for j in 0..b.len() {
            if a[i] == b[j] {
                cur[j + 1] = prev[j] + 1;
                if cur[j + 1] > best.2 {
                    best = (i + 1 - cur[j + 1], j + 1 - cur[j + 1], cur[j + 1]);
                }
            }
        }
        prev = cur;
    }
    let (i, j, k) = best;
    if k == 0 {
        return 0;
    }
    k + matched_chars(&a[..i], &b[..j]) + matched_chars(&a[i + k..], &b[j + k..])
}

/// Index of the candidate most similar to `line`, if any clears
/// [`SIMILAR_LABEL_RATIO`]. Ties go to the earliest candidate.
pub fn closest_label<S: AsRef<str>>(line: &str, candidates: &[S]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, c) in candidates.iter().enumerate() {
        let r = label_similarity(line, c.as_ref());
        if r > SIMILAR_LABEL_RATIO && best.is_none_or(|(_, b)| r > b) {
            best = Some((i, r));
        }
    }
    best.map(|(i, _)| i)
}

/// Canonicalise a list of labels, dropping duplicates but keeping order.
pub fn canonical_line_list<S: AsRef<str>>(raw: &[S]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(raw.len());
    for label in raw {
        let id = canonical_line_id(label.as_ref());
        if !out.contains(&id) {
            out.push(id);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_style_aliases_map_to_canonical() {
        assert_eq!(canonical_line_id("o3_5007"), "OIII5007");
        assert_eq!(canonical_line_id("hb"), "HB");
        assert_eq!(canonical_line_id("s2_6716"), "SII6717");
    }

    #[test]
    fn unknown_labels_are_normalised() {
        assert_eq!(canonical_line_id("[O III] 5007"), "OIII5007");
        assert_eq!(canonical_line_id(" ar3_7135 "), "AR3_7135");
    }

    #[test]
    fn similarity_counts_matching_blocks() {
        assert_eq!(label_similarity("OIII5007", "OIII5007"), 1.0);
        assert_eq!(label_similarity("OIII5008", "OIII5007"), 14.0 / 16.0);
        assert_eq!(label_similarity("HB", "HA"), 0.5);
        assert_eq!(label_similarity("abc", "xyz"), 0.0);
    }

    #[test]
    fn closest_label_needs_a_close_match() {
        let columns = vec!["HB".to_string(), "OIII5007".to_string(), "NII6584".to_string()];
        assert_eq!(closest_label("OIII5008", &columns), Some(1));
        assert_eq!(closest_label("NII6583", &columns), Some(2));
        assert_eq!(closest_label("HA", &columns), None);
        assert_eq!(closest_label("OIII4959", &columns), None);
    }

    #[test]
    fn list_dedupes_in_order() {
        let ids = canonical_line_list(&["hb", "HB", "o3_5007"]);
        assert_eq!(ids, vec!["HB".to_string(), "OIII5007".to_string()]);
    }
}
