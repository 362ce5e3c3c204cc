use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

use crate::config::RegionDefault;
use crate::domain::{ParsedAddress, ParsingMethod};
use crate::parsing::normalizer::normalize;

/// Canonical street suffix abbreviations (USPS style).
static STREET_SUFFIXES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    let mut m = HashMap::new();
    for (canonical, variants) in [
        ("ST", &["ST", "STR", "STREET"][..]),
        ("AVE", &["AVE", "AV", "AVENUE"][..]),
        ("BLVD", &["BLVD", "BOULEVARD"][..]),
        ("DR", &["DR", "DRIVE"][..]),
        ("RD", &["RD", "ROAD"][..]),
        ("LN", &["LN", "LANE"][..]),
        ("CT", &["CT", "COURT"][..]),
        ("PL", &["PL", "PLACE"][..]),
        ("WAY", &["WAY", "WY"][..]),
        ("CIR", &["CIR", "CIRCLE"][..]),
        ("TER", &["TER", "TERR", "TERRACE"][..]),
        ("PKWY", &["PKWY", "PKY", "PARKWAY"][..]),
        ("HWY", &["HWY", "HIGHWAY"][..]),
        ("TRL", &["TRL", "TRAIL"][..]),
        ("SQ", &["SQ", "SQUARE"][..]),
        ("WALK", &["WALK"][..]),
    ] {
        for v in variants {
            m.insert(*v, canonical);
        }
    }
    m
});

/// Canonical directional abbreviations.
static DIRECTIONALS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    let mut m = HashMap::new();
    for (canonical, variants) in [
        ("N", &["N", "NORTH"][..]),
        ("S", &["S", "SOUTH"][..]),
        ("E", &["E", "EAST"][..]),
        ("W", &["W", "WEST"][..]),
        ("NE", &["NE", "NORTHEAST"][..]),
        ("NW", &["NW", "NORTHWEST"][..]),
        ("SE", &["SE", "SOUTHEAST"][..]),
        ("SW", &["SW", "SOUTHWEST"][..]),
    ] {
        for v in variants {
            m.insert(*v, canonical);
        }
    }
    m
});

/// Canonical secondary-unit designators.
static UNIT_DESIGNATORS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    let mut m = HashMap::new();
    for (canonical, variants) in [
        ("APT", &["APT", "APARTMENT"][..]),
        ("UNIT", &["UNIT"][..]),
        ("STE", &["STE", "SUITE"][..]),
        ("BLDG", &["BLDG", "BUILDING"][..]),
        ("FL", &["FL", "FLOOR"][..]),
        ("RM", &["RM", "ROOM"][..]),
        ("SP", &["SP", "SPACE"][..]),
        ("#", &["#"][..]),
    ] {
        for v in variants {
            m.insert(*v, canonical);
        }
    }
    m
});

const STATE_CODES: [&str; 51] = [
    "AL", "AK", "AZ", "AR", "CA", "CO", "CT", "DE", "FL", "GA", "HI", "ID", "IL", "IN", "IA",
    "KS", "KY", "LA", "MA", "MD", "ME", "MI", "MN", "MO", "MS", "MT", "NC", "ND", "NE", "NH",
    "NJ", "NM", "NV", "NY", "OH", "OK", "OR", "PA", "RI", "SC", "SD", "TN", "TX", "UT", "VA",
    "VT", "WA", "WI", "WV", "WY", "DC",
];

static HOUSE_NUMBER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+[A-Z]?(?:-\d+)?$").expect("house number regex"));
static ZIP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{5})(?:-\d{4})?$").expect("zip regex"));
static UNIT_VALUE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z0-9][A-Z0-9-]*$").expect("unit value regex"));

// Fallback-tier layered patterns over the whole normalized string.
static FB_HOUSE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+[A-Z]?(?:-\d+)?)[,\s]+").expect("fallback house regex"));
static FB_UNIT_HASH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"#\s*([A-Z0-9][A-Z0-9-]*)").expect("fallback unit regex"));
static FB_ZIP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{5})(?:-\d{4})?\s*$").expect("fallback zip regex"));
static FB_STATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[,\s]\s*([A-Z]{2})\.?\s*$").expect("fallback state regex"));
static FB_CITY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r",\s*([^,]+)\s*$").expect("fallback city regex"));
static PARTIAL_NUMBER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{1,6}[A-Z]?)\b").expect("partial number regex"));
static PARTIAL_ZIP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{5})(?:-\d{4})?\s*$").expect("partial zip regex"));

/// Best-effort structured address parser. Two tiers plus a partial-parse
/// escape; total — the worst case is a mostly-empty, low-confidence result.
pub struct AddressParser {
    default_region: RegionDefault,
}

/// Strip token-trailing punctuation before table lookups ("ST." → "ST").
fn lookup_key(token: &str) -> &str {
    token.trim_end_matches(['.', ','])
}

fn tokenize(segment: &str) -> Vec<String> {
    segment
        .split_whitespace()
        .map(|t| t.trim_matches(','))
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

impl AddressParser {
    pub fn new(default_region: RegionDefault) -> Self {
        Self { default_region }
    }

    /// Parse a free-text address. Never fails; blank input yields an empty
    /// result with `parsing_method = EmptyInput` and zero confidence.
    pub fn parse(&self, raw: &str) -> ParsedAddress {
        let normalized = normalize(raw);
        if normalized.is_empty() {
            return ParsedAddress {
                confidence_score: 0.0,
                parsing_method: ParsingMethod::EmptyInput,
                ..Default::default()
            };
        }

        let mut parsed = self
            .parse_primary(&normalized)
            .or_else(|| self.parse_fallback(&normalized))
            .unwrap_or_else(|| self.parse_partial(&normalized));

        // Regional default: a street address with no locality is assumed to
        // sit in the platform's home region. Explicit configuration; does
        // not contribute confidence.
        if parsed.house_number.is_some()
            && parsed.street_name.is_some()
            && parsed.city.is_none()
            && parsed.state.is_none()
            && self.default_region.is_enabled()
        {
            parsed.city = Some(self.default_region.city.clone());
            parsed.state = Some(self.default_region.state.clone());
        }

        parsed.confidence_score = parsed.confidence_score.clamp(0.0, 1.0);
        parsed
    }

    /// Primary tier: comma-aware structured decomposition. Requires a house
    /// number and a street name to claim success.
    fn parse_primary(&self, text: &str) -> Option<ParsedAddress> {
        let segments: Vec<&str> = text
            .split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect();
        let (street_segment, tail_segments) = segments.split_first()?;

        let mut parsed = ParsedAddress::default();

        // Locality: walk tail segments from the end, pulling zip and state
        // off the last one; the nearest remaining segment is the city.
        let mut tails: Vec<Vec<String>> = tail_segments.iter().map(|s| tokenize(s)).collect();
        if let Some(last) = tails.last_mut() {
            if let Some(tok) = last.last() {
                if ZIP_RE.is_match(lookup_key(tok)) {
                    parsed.postal_code =
                        Some(lookup_key(tok).split('-').next().unwrap_or(tok).to_string());
                    last.pop();
                }
            }
            if last.is_empty() {
                tails.pop();
            }
        }
        if let Some(last) = tails.last_mut() {
            if let Some(tok) = last.last() {
                let key = lookup_key(tok).to_string();
                if STATE_CODES.contains(&key.as_str()) {
                    parsed.state = Some(key);
                    last.pop();
                }
            }
            if last.is_empty() {
                tails.pop();
            }
        }
        if let Some(city_tokens) = tails.last() {
            parsed.city = Some(city_tokens.join(" "));
        }

        // Street segment decomposition.
        let mut tokens = tokenize(street_segment);

        // Single-segment input may still carry "... CA 90028" at the end.
        if tail_segments.is_empty() {
            if let Some(tok) = tokens.last() {
                if ZIP_RE.is_match(lookup_key(tok)) {
                    parsed.postal_code =
                        Some(lookup_key(tok).split('-').next().unwrap_or(tok).to_string());
                    tokens.pop();
                }
            }
            if let Some(tok) = tokens.last() {
                let key = lookup_key(tok).to_string();
                if STATE_CODES.contains(&key.as_str()) && tokens.len() > 2 {
                    parsed.state = Some(key);
                    tokens.pop();
                }
            }
        }

        if tokens.is_empty() {
            return None;
        }

        // House number anchors the street segment.
        if HOUSE_NUMBER_RE.is_match(lookup_key(&tokens[0])) {
            parsed.house_number = Some(lookup_key(&tokens[0]).to_string());
            tokens.remove(0);
        } else {
            return None;
        }

        if tokens.len() >= 2 {
            // "10 E ST" is E street, not a directional on a bare suffix.
            let next_is_lone_suffix =
                tokens.len() == 2 && STREET_SUFFIXES.contains_key(lookup_key(&tokens[1]));
            if !next_is_lone_suffix {
                if let Some(canonical) = DIRECTIONALS.get(lookup_key(&tokens[0])) {
                    parsed.pre_directional = Some((*canonical).to_string());
                    tokens.remove(0);
                }
            }
        }

        Self::extract_trailing_unit(&mut tokens, &mut parsed);

        if tokens.len() >= 2 {
            if let Some(last) = tokens.last() {
                if let Some(canonical) = DIRECTIONALS.get(lookup_key(last)) {
                    // Only a post-directional when a street name survives.
                    if tokens.len() >= 2 {
                        parsed.post_directional = Some((*canonical).to_string());
                        tokens.pop();
                    }
                }
            }
        }

        // Find the last suffix occurrence; anything after it is a city for
        // comma-less input ("123 MAIN ST LOS ANGELES").
        let mut suffix_index = None;
        for (i, tok) in tokens.iter().enumerate().rev() {
            if i == 0 {
                break;
            }
            if STREET_SUFFIXES.contains_key(lookup_key(tok)) {
                suffix_index = Some(i);
                break;
            }
        }
        if let Some(i) = suffix_index {
            parsed.street_suffix = STREET_SUFFIXES
                .get(lookup_key(&tokens[i]))
                .map(|s| (*s).to_string());
            let after: Vec<String> = tokens.drain(i + 1..).collect();
            tokens.pop();
            if parsed.city.is_none() && !after.is_empty() {
                parsed.city = Some(after.join(" "));
            }
        }

        if tokens.is_empty() {
            return None;
        }
        parsed.street_name = Some(
            tokens
                .iter()
                .map(|t| lookup_key(t))
                .collect::<Vec<_>>()
                .join(" "),
        );

        parsed.parsing_method = ParsingMethod::Primary;
        parsed.confidence_score = Self::primary_confidence(&parsed);
        Some(parsed)
    }

    /// Unit forms at the end of a street segment: "APT 4B", "# 12", "#12".
    fn extract_trailing_unit(tokens: &mut Vec<String>, parsed: &mut ParsedAddress) {
        if tokens.len() < 2 {
            return;
        }
        let last = tokens[tokens.len() - 1].clone();
        let prev = tokens[tokens.len() - 2].clone();

        if let Some(rest) = last.strip_prefix('#') {
            if !rest.is_empty() && UNIT_VALUE_RE.is_match(rest) {
                parsed.unit_designator = Some("#".to_string());
                parsed.unit_number = Some(rest.to_string());
                tokens.pop();
                return;
            }
        }
        if let Some(canonical) = UNIT_DESIGNATORS.get(lookup_key(&prev)) {
            if UNIT_VALUE_RE.is_match(lookup_key(&last)) && tokens.len() >= 3 {
                parsed.unit_designator = Some((*canonical).to_string());
                parsed.unit_number = Some(lookup_key(&last).to_string());
                tokens.pop();
                tokens.pop();
            }
        }
    }

    fn primary_confidence(parsed: &ParsedAddress) -> f64 {
        let mut score: f64 = 0.3;
        if parsed.house_number.is_some() {
            score += 0.2;
        }
        if parsed.street_name.is_some() {
            score += 0.2;
        }
        if parsed.postal_code.is_some() {
            score += 0.15;
        }
        if parsed.city.is_some() {
            score += 0.1;
        }
        if parsed.state.is_some() {
            score += 0.1;
        }
        if parsed.street_suffix.is_some() {
            score += 0.05;
        }
        if parsed.pre_directional.is_some() || parsed.post_directional.is_some() {
            score += 0.05;
        }
        if parsed.unit_number.is_some() {
            score += 0.05;
        }
        score.min(1.0)
    }

    /// Fallback tier: layered pattern extraction, each successful layer
    /// adding to a running confidence that starts at 0.3. Anchored on a
    /// leading house number.
    fn parse_fallback(&self, text: &str) -> Option<ParsedAddress> {
        let mut rest = text.to_string();
        let mut parsed = ParsedAddress { parsing_method: ParsingMethod::FallbackRegex, ..Default::default() };
        let mut score: f64 = 0.3;

        let captures = FB_HOUSE_RE.captures(&rest)?;
        parsed.house_number = Some(captures[1].to_string());
        rest = rest[captures.get(0).map(|m| m.end()).unwrap_or(0)..].to_string();
        score += 0.15;

        // Leading directional
        let tokens = tokenize(&rest);
        if tokens.len() >= 2 {
            if let Some(canonical) = DIRECTIONALS.get(lookup_key(&tokens[0])) {
                parsed.pre_directional = Some((*canonical).to_string());
                rest = tokens[1..].join(" ");
                score += 0.05;
            }
        }

        // Hash-marked unit, anywhere
        if let Some(captures) = FB_UNIT_HASH_RE.captures(&rest) {
            parsed.unit_designator = Some("#".to_string());
            parsed.unit_number = Some(captures[1].to_string());
            let range = captures.get(0).map(|m| m.range()).unwrap_or(0..0);
            rest.replace_range(range, "");
            score += 0.05;
        }

        // Trailing postal code
        if let Some(captures) = FB_ZIP_RE.captures(&rest) {
            parsed.postal_code = Some(captures[1].to_string());
            let start = captures.get(0).map(|m| m.start()).unwrap_or(rest.len());
            rest.truncate(start);
            score += 0.15;
        }

        // Trailing state
        if let Some(captures) = FB_STATE_RE.captures(&rest) {
            let code = captures[1].to_string();
            if STATE_CODES.contains(&code.as_str()) {
                parsed.state = Some(code);
                let start = captures.get(0).map(|m| m.start()).unwrap_or(rest.len());
                rest.truncate(start);
                score += 0.1;
            }
        }

        // Trailing city, after the last comma
        if let Some(captures) = FB_CITY_RE.captures(&rest) {
            let city = captures[1].trim().to_string();
            if !city.is_empty() {
                parsed.city = Some(city);
                let start = captures.get(0).map(|m| m.start()).unwrap_or(rest.len());
                rest.truncate(start);
                score += 0.1;
            }
        }

        let mut tokens = tokenize(&rest);

        // Trailing street suffix
        if tokens.len() >= 2 {
            if let Some(last) = tokens.last() {
                if let Some(canonical) = STREET_SUFFIXES.get(lookup_key(last)) {
                    parsed.street_suffix = Some((*canonical).to_string());
                    tokens.pop();
                    score += 0.1;
                }
            }
        }

        // Trailing directional
        if tokens.len() >= 2 {
            if let Some(last) = tokens.last() {
                if let Some(canonical) = DIRECTIONALS.get(lookup_key(last)) {
                    parsed.post_directional = Some((*canonical).to_string());
                    tokens.pop();
                    score += 0.05;
                }
            }
        }

        // Trailing spelled unit ("APT 4B") when the hash form didn't hit
        if parsed.unit_number.is_none() && tokens.len() >= 3 {
            let last = tokens[tokens.len() - 1].clone();
            let prev = tokens[tokens.len() - 2].clone();
            if let Some(canonical) = UNIT_DESIGNATORS.get(lookup_key(&prev)) {
                if UNIT_VALUE_RE.is_match(lookup_key(&last)) {
                    parsed.unit_designator = Some((*canonical).to_string());
                    parsed.unit_number = Some(lookup_key(&last).to_string());
                    tokens.pop();
                    tokens.pop();
                    score += 0.05;
                }
            }
        }

        // Remainder is the street name
        if !tokens.is_empty() {
            parsed.street_name = Some(
                tokens
                    .iter()
                    .map(|t| lookup_key(t))
                    .collect::<Vec<_>>()
                    .join(" "),
            );
            score += 0.15;
        }

        parsed.confidence_score = score;
        Some(parsed)
    }

    /// Partial-parse escape: no structured shape matched. Pull a house
    /// number and a postal code independently and take a heuristic guess at
    /// an irregular multi-word street name.
    fn parse_partial(&self, text: &str) -> ParsedAddress {
        let mut parsed = ParsedAddress { parsing_method: ParsingMethod::Partial, ..Default::default() };
        let mut score: f64 = 0.2;

        let mut zip_start = text.len();
        if let Some(captures) = PARTIAL_ZIP_RE.captures(text) {
            parsed.postal_code = Some(captures[1].to_string());
            zip_start = captures.get(0).map(|m| m.start()).unwrap_or(text.len());
            score += 0.1;
        }

        let head = &text[..zip_start];
        if let Some(captures) = PARTIAL_NUMBER_RE.captures(head) {
            parsed.house_number = Some(captures[1].to_string());
            score += 0.1;
        }

        // Irregular street names ("AVENUE OF THE STARS", "VIA MARINA"):
        // the longest run of alphabetic tokens.
        let mut best: Vec<&str> = Vec::new();
        let mut current: Vec<&str> = Vec::new();
        for token in head.split_whitespace() {
            let key = lookup_key(token);
            if key.chars().all(|c| c.is_ascii_alphabetic()) && !key.is_empty() {
                current.push(key);
            } else {
                if current.len() > best.len() {
                    best = current.clone();
                }
                current.clear();
            }
        }
        if current.len() > best.len() {
            best = current;
        }
        if !best.is_empty() {
            parsed.street_name = Some(best.join(" "));
            score += 0.1;
        }

        parsed.confidence_score = score.min(0.5);
        parsed
    }
}
