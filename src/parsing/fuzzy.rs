//! String-similarity primitives and composite address scoring, used for
//! deduplication and verification of resolved addresses. Pure functions,
//! deterministic, no I/O.

use crate::domain::ParsedAddress;

// Composite weights. Fields missing on either side are skipped and the
// remaining weights renormalize.
const WEIGHT_HOUSE_NUMBER: f64 = 0.30;
const WEIGHT_STREET_NAME: f64 = 0.40;
const WEIGHT_STREET_SUFFIX: f64 = 0.10;
const WEIGHT_CITY: f64 = 0.10;
const WEIGHT_POSTAL_CODE: f64 = 0.10;

/// Levenshtein edit distance between two raw strings.
pub fn edit_distance(a: &str, b: &str) -> usize {
    strsim::levenshtein(a, b)
}

/// Prefix-weighted similarity in [0, 1]: agreement early in the string
/// counts for more, which suits street and city names where the stem is the
/// signal and the tail is noise.
pub fn phonetic_similarity(a: &str, b: &str) -> f64 {
    strsim::jaro_winkler(&a.to_uppercase(), &b.to_uppercase())
}

/// Bigram sequence-ratio similarity in [0, 1].
pub fn sequence_similarity(a: &str, b: &str) -> f64 {
    let a = a.to_uppercase();
    let b = b.to_uppercase();
    if a == b {
        return 1.0;
    }
    strsim::sorensen_dice(&a, &b)
}

/// Identifier fields: equal or not, no partial credit.
fn exact_similarity(a: &str, b: &str) -> f64 {
    if a.eq_ignore_ascii_case(b) {
        1.0
    } else {
        0.0
    }
}

/// Name fields: take the friendlier of the two text measures so that both
/// transpositions and token reorderings score well.
fn text_similarity(a: &str, b: &str) -> f64 {
    phonetic_similarity(a, b).max(sequence_similarity(a, b))
}

/// Composite similarity of two parsed addresses in [0, 1].
///
/// house_number 0.30, street_name 0.40, street_suffix 0.10, city 0.10,
/// postal_code 0.10; a field missing on either side is skipped and the
/// remaining weight mass renormalizes. Symmetric; identity scores 1.0.
pub fn address_similarity(a: &ParsedAddress, b: &ParsedAddress) -> f64 {
    let mut score = 0.0;
    let mut total_weight = 0.0;

    let comparisons: [(Option<(&str, &str)>, f64, fn(&str, &str) -> f64); 5] = [
        (zip_fields(&a.house_number, &b.house_number), WEIGHT_HOUSE_NUMBER, exact_similarity),
        (zip_fields(&a.street_name, &b.street_name), WEIGHT_STREET_NAME, text_similarity),
        (zip_fields(&a.street_suffix, &b.street_suffix), WEIGHT_STREET_SUFFIX, exact_similarity),
        (zip_fields(&a.city, &b.city), WEIGHT_CITY, text_similarity),
        (zip_fields(&a.postal_code, &b.postal_code), WEIGHT_POSTAL_CODE, exact_similarity),
    ];

    for (pair, weight, measure) in comparisons {
        if let Some((left, right)) = pair {
            score += weight * measure(left, right);
            total_weight += weight;
        }
    }

    if total_weight == 0.0 {
        return 0.0;
    }
    score / total_weight
}

fn zip_fields<'a>(a: &'a Option<String>, b: &'a Option<String>) -> Option<(&'a str, &'a str)> {
    match (a, b) {
        (Some(x), Some(y)) => Some((x.as_str(), y.as_str())),
        _ => None,
    }
}

/// The highest-scoring candidate at or above `threshold`, with its score.
pub fn find_best_match<'a>(
    target: &ParsedAddress,
    candidates: &'a [ParsedAddress],
    threshold: f64,
) -> Option<(&'a ParsedAddress, f64)> {
    let mut best: Option<(&'a ParsedAddress, f64)> = None;
    for candidate in candidates {
        let score = address_similarity(target, candidate);
        if score < threshold {
            continue;
        }
        match best {
            Some((_, best_score)) if best_score >= score => {}
            _ => best = Some((candidate, score)),
        }
    }
    best
}
