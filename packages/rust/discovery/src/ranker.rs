//! Candidate ranking: how well does a search result match an organization name?

use optout_shared::Confidence;

/// Tokens this short or shorter are ignored ("of", "&", "co").
const MIN_TOKEN_CHARS: usize = 3;

/// Ratio at or above which a match is `High`.
const HIGH_RATIO: f64 = 0.7;

/// Ratio at or above which a match is `Medium`.
const MEDIUM_RATIO: f64 = 0.4;

/// Fraction of the name's significant tokens that appear in the title or URL.
///
/// Returns `None` when the name has no token longer than two characters.
pub fn match_ratio(org_name: &str, title: &str, url: &str) -> Option<f64> {
    let tokens: Vec<String> = org_name
        .split_whitespace()
        .filter(|t| t.chars().count() >= MIN_TOKEN_CHARS)
        .map(str::to_lowercase)
        .collect();

    if tokens.is_empty() {
        return None;
    }

    let haystack = format!("{} {}", title, url).to_lowercase();
    let found = tokens.iter().filter(|t| haystack.contains(t.as_str())).count();

    Some(found as f64 / tokens.len() as f64)
}

/// Assign a confidence tier to one search result for `org_name`.
pub fn rank(org_name: &str, title: &str, url: &str) -> Confidence {
    match match_ratio(org_name, title, url) {
        Some(r) if r >= HIGH_RATIO => Confidence::High,
        Some(r) if r >= MEDIUM_RATIO => Confidence::Medium,
        _ => Confidence::Low,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_match_is_high() {
        assert_eq!(
            rank("Acme Org", "Acme | Home", "https://acme.org/"),
            Confidence::High
        );
    }

    #[test]
    fn tiers_follow_ratio_thresholds() {
        let name = "The Red Cross Foundation";
        // red, cross, foundation of four tokens → 0.75
        assert_eq!(
            rank(name, "Red Cross Foundation", "https://redcross.org"),
            Confidence::High
        );
        // red, cross → 0.5
        assert_eq!(rank(name, "Red Cross", "https://example.com"), Confidence::Medium);
        // red → 0.25
        assert_eq!(rank(name, "Red Wine Club", "https://wine.com"), Confidence::Low);
    }

    #[test]
    fn short_tokens_are_ignored() {
        let ratio = match_ratio("Friends of the Park", "Friends Park", "https://x.org").unwrap();
        // "of" dropped; "the" is kept and missing → 2 of 3
        assert!((ratio - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn matching_is_case_insensitive_and_checks_url() {
        assert_eq!(
            rank("GREENPEACE", "Welcome", "https://www.greenpeace.org/usa/"),
            Confidence::High
        );
    }

    #[test]
    fn names_without_significant_tokens_are_low() {
        assert_eq!(match_ratio("AB CD", "AB CD", "https://ab.cd"), None);
        assert_eq!(rank("AB CD", "AB CD", "https://ab.cd"), Confidence::Low);
        assert_eq!(rank("", "anything", "https://x.org"), Confidence::Low);
        assert_eq!(rank("   ", "anything", "https://x.org"), Confidence::Low);
    }

    #[test]
    fn token_length_counts_characters() {
        // Two multibyte characters: shorter than three chars, so ignored.
        assert_eq!(match_ratio("éé", "éé", "https://x.org"), None);
        assert_eq!(
            rank("Café Zürich", "Café Zürich", "https://cafe.ch"),
            Confidence::High
        );
    }
}
