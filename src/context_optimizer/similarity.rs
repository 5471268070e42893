//! Deterministic, dependency-free similarity substrate.
//!
//! No embedding service or crate is in scope (the LLM provider and any embedding microservice
//! are out-of-scope collaborators, §1). Every string this crate needs to compare — queries,
//! category reference descriptions, keyword names — is hashed into a fixed-length numeric vector
//! by a simple bag-of-words scheme, then compared by cosine similarity. This is sufficient to
//! satisfy the threshold-based tier/category selection contracts in §4.2 without a model
//! download or network call (see DESIGN.md for the Open-Question resolution this implements).

const VECTOR_DIMENSIONS: usize = 256;

/// Embed `text` into a fixed-length `f32` vector.
///
/// The text is lower-cased and split on non-alphanumeric boundaries into tokens; each token is
/// hashed (FNV-1a) into one of [`VECTOR_DIMENSIONS`] buckets and contributes `1.0` to that
/// bucket. The result is L2-normalized so that cosine similarity reduces to a plain dot product
/// for unit vectors, though callers should still use [`cosine_similarity`] directly since the
/// zero vector (empty text) cannot be normalized.
pub fn embed(text: &str) -> [f32; VECTOR_DIMENSIONS] {
    let mut vector = [0f32; VECTOR_DIMENSIONS];
    for token in tokenize(text) {
        let bucket = fnv1a(&token) as usize % VECTOR_DIMENSIONS;
        vector[bucket] += 1.0;
    }
    vector
}

/// Cosine similarity between two embeddings, in `[0.0, 1.0]` for non-negative bag-of-words
/// vectors. Returns `0.0` when either vector has zero magnitude (e.g. an empty string).
pub fn cosine_similarity(a: &[f32; VECTOR_DIMENSIONS], b: &[f32; VECTOR_DIMENSIONS]) -> f64 {
    let mut dot = 0f64;
    let mut norm_a = 0f64;
    let mut norm_b = 0f64;
    for i in 0..VECTOR_DIMENSIONS {
        dot += (a[i] as f64) * (b[i] as f64);
        norm_a += (a[i] as f64).powi(2);
        norm_b += (b[i] as f64).powi(2);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Convenience: embed both strings and return their cosine similarity directly.
pub fn text_similarity(a: &str, b: &str) -> f64 {
    cosine_similarity(&embed(a), &embed(b))
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn fnv1a(token: &str) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;
    let mut hash = OFFSET_BASIS;
    for byte in token.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_text_has_similarity_one() {
        let sim = text_similarity("search for robot framework", "search for robot framework");
        assert!((sim - 1.0).abs() < 1e-9);
    }

    #[test]
    fn unrelated_text_has_low_similarity() {
        let sim = text_similarity("click the login button", "wait for the spinner to disappear");
        assert!(sim < 0.6);
    }

    #[test]
    fn empty_string_never_panics_and_returns_zero() {
        assert_eq!(text_similarity("", "anything"), 0.0);
        assert_eq!(text_similarity("", ""), 0.0);
    }

    #[test]
    fn overlapping_tokens_raise_similarity() {
        let a = text_similarity("input text into the search box", "input text into the field");
        let b = text_similarity("input text into the search box", "navigate to the homepage");
        assert!(a > b);
    }
}
