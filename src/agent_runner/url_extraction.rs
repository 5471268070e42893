//! URL extraction from a free-text query (§4.3 *URL extraction*).
//!
//! Tried in order: a full `http(s)://` URL, a bare domain with a recognized TLD, then a word
//! following a navigation preposition. Falls back to a placeholder string that the identifier
//! agent is expected to search for in the query text itself.

use regex::Regex;
use std::sync::OnceLock;

const RECOGNIZED_TLDS: &[&str] = &["com", "in", "org", "net", "co", "io", "ai", "app", "dev", "tech"];
const PREPOSITIONS: &[&str] = &["on", "at", "from", "in", "visit", "go to", "open"];

/// Placeholder handed to the identifier when no URL-like token can be found.
pub const URL_PLACEHOLDER: &str = "website mentioned in query";

fn full_url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)https?://[^\s]+").unwrap())
}

fn bare_domain_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b[a-z0-9][a-z0-9\-]*(?:\.[a-z0-9][a-z0-9\-]*)*\.([a-z]{2,})\b").unwrap()
    })
}

/// Extract a usable target URL from `query`, falling back to [`URL_PLACEHOLDER`] when nothing
/// matches. Never fails, never panics on adversarial input.
pub fn extract_url(query: &str) -> String {
    if let Some(url) = extract_full_url(query) {
        return url;
    }
    if let Some(url) = extract_bare_domain(query) {
        return url;
    }
    if let Some(url) = extract_after_preposition(query) {
        return url;
    }
    URL_PLACEHOLDER.to_string()
}

fn extract_full_url(query: &str) -> Option<String> {
    let found = full_url_regex().find(query)?.as_str();
    Some(trim_trailing_punctuation(found).to_string())
}

fn extract_bare_domain(query: &str) -> Option<String> {
    for capture in bare_domain_regex().find_iter(query) {
        let candidate = trim_trailing_punctuation(capture.as_str());
        let tld = candidate.rsplit('.').next().unwrap_or("").to_lowercase();
        if RECOGNIZED_TLDS.contains(&tld.as_str()) {
            return Some(format!("https://{}", candidate));
        }
    }
    None
}

fn extract_after_preposition(query: &str) -> Option<String> {
    let lower = query.to_lowercase();
    let tokens: Vec<&str> = lower.split_whitespace().collect();
    for preposition in PREPOSITIONS {
        let prep_tokens: Vec<&str> = preposition.split(' ').collect();
        for window_start in 0..tokens.len() {
            if window_start + prep_tokens.len() >= tokens.len() {
                continue;
            }
            let window = &tokens[window_start..window_start + prep_tokens.len()];
            if window == prep_tokens.as_slice() {
                let candidate_idx = window_start + prep_tokens.len();
                let candidate = trim_trailing_punctuation(tokens[candidate_idx]);
                let word: String = candidate
                    .chars()
                    .filter(|c| c.is_alphanumeric())
                    .collect();
                if !word.is_empty() {
                    return Some(format!("https://www.{}.com", word.to_lowercase()));
                }
            }
        }
    }
    None
}

fn trim_trailing_punctuation(s: &str) -> &str {
    s.trim_end_matches(['.', ',', ';', '!', '?'])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_full_url_and_trims_punctuation() {
        assert_eq!(
            extract_url("Search for 'robot framework' on https://www.google.com."),
            "https://www.google.com"
        );
    }

    #[test]
    fn extracts_bare_domain_with_recognized_tld() {
        assert_eq!(extract_url("go check out example.io for details"), "https://example.io");
    }

    #[test]
    fn extracts_word_after_preposition_when_no_domain_present() {
        assert_eq!(extract_url("open github and search for rust"), "https://www.github.com");
    }

    #[test]
    fn falls_back_to_placeholder_when_nothing_matches() {
        assert_eq!(extract_url("do something useful please"), URL_PLACEHOLDER);
    }

    #[test]
    fn bare_domain_with_unrecognized_tld_is_ignored() {
        assert_eq!(extract_url("look at readme.xyzzy now"), URL_PLACEHOLDER);
    }
}
