//! Character-bigram Jaccard similarity.

use std::collections::HashSet;

/// Bigram set of `text` with all whitespace removed.
///
/// Text of one character (or none) becomes the singleton set of itself.
fn bigrams(text: &str) -> HashSet<String> {
    let chars: Vec<char> = text.chars().filter(|c| !c.is_whitespace()).collect();
    if chars.len() <= 1 {
        return HashSet::from([chars.into_iter().collect::<String>()]);
    }
    chars.windows(2).map(|pair| pair.iter().collect()).collect()
}

/// Jaccard similarity of the bigram sets of `a` and `b`, in `[0.0, 1.0]`.
///
/// Either input empty gives 0.0.
pub fn bigram_similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let set_a = bigrams(a);
    let set_b = bigrams(b);
    let union = set_a.union(&set_b).count();
    if union == 0 {
        return 0.0;
    }
    set_a.intersection(&set_b).count() as f64 / union as f64
}
