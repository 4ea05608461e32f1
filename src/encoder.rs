//! Feature Encoder - text to fixed-length normalized vectors
//!
//! The encoder is a pure function: the same text always yields the same vector,
//! across calls and across processes. There is no cache, no RNG and no shared
//! state, so it is safe to call from any thread.
//!
//! ## Block Layout (128 dims)
//!
//! | Range | Block | Content |
//! |-------|-------|---------|
//! | 0..16 | Orthographic | length, character-class ratios, shape |
//! | 16..112 | N-gram | signed FNV-1a buckets of bigrams/trigrams over `^word$` |
//! | 112..120 | Phonetic | syllable and consonant-cluster approximations |
//! | 120..128 | Statistical | character entropy and code-point moments |
//!
//! The n-gram block carries most of the energy. The other blocks are scaled
//! down so that two unrelated words do not look alike just because both are
//! short lowercase strings.

use serde::{Deserialize, Serialize};

/// Total feature dimensionality
pub const FEATURE_DIM: usize = 128;

const ORTHO_START: usize = 0;
const ORTHO_LEN: usize = 16;
const NGRAM_START: usize = 16;
const NGRAM_LEN: usize = 96;
const PHONETIC_START: usize = 112;
const PHONETIC_LEN: usize = 8;
const STAT_START: usize = 120;

/// Scale applied to the non-n-gram blocks before normalization
const AUX_BLOCK_WEIGHT: f32 = 0.5;

const BIGRAM_WEIGHT: f32 = 0.7;
const TRIGRAM_WEIGHT: f32 = 1.0;

/// Maximum tokens taken from a single input
pub const MAX_TOKENS: usize = 32;

/// Fixed-length, L2-normalized feature vector
///
/// Immutable once produced: the values are only reachable through shared
/// borrows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    values: Vec<f32>,
}

impl FeatureVector {
    /// Build from raw values, normalizing to unit length.
    ///
    /// An all-zero (or non-finite) input yields the zero vector.
    pub fn from_raw(mut values: Vec<f32>) -> Self {
        for v in values.iter_mut() {
            if !v.is_finite() {
                *v = 0.0;
            }
        }
        let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in values.iter_mut() {
                *v /= norm;
            }
        }
        Self { values }
    }

    /// The zero vector of the standard dimensionality
    pub fn zero() -> Self {
        Self {
            values: vec![0.0; FEATURE_DIM],
        }
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// True if every component is zero (degenerate input)
    pub fn is_zero(&self) -> bool {
        self.values.iter().all(|v| *v == 0.0)
    }

    /// Cosine similarity to another vector
    pub fn cosine(&self, other: &FeatureVector) -> f32 {
        cosine_similarity(&self.values, other.as_slice())
    }
}

/// Compute cosine similarity between two slices
///
/// Returns 0.0 for mismatched lengths or zero-magnitude inputs.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    let sim = dot / (mag_a * mag_b);
    if sim.is_finite() {
        sim.clamp(-1.0, 1.0)
    } else {
        0.0
    }
}

/// Split text into concept tokens: lowercased alphanumeric runs.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .take(MAX_TOKENS)
        .collect()
}

/// Encode text into a feature vector. Total: never fails.
pub fn encode(text: &str) -> FeatureVector {
    let mut raw = vec![0.0f32; FEATURE_DIM];

    orthographic_block(text, &mut raw[ORTHO_START..ORTHO_START + ORTHO_LEN]);
    ngram_block(text, &mut raw[NGRAM_START..NGRAM_START + NGRAM_LEN]);
    phonetic_block(text, &mut raw[PHONETIC_START..PHONETIC_START + PHONETIC_LEN]);
    statistical_block(text, &mut raw[STAT_START..FEATURE_DIM]);

    for (i, v) in raw.iter_mut().enumerate() {
        if !(NGRAM_START..NGRAM_START + NGRAM_LEN).contains(&i) {
            *v *= AUX_BLOCK_WEIGHT;
        }
    }

    FeatureVector::from_raw(raw)
}

/// Structural complexity of a text in [0, 1]
///
/// Half length (saturating at 12 chars), half character diversity.
pub fn complexity(text: &str) -> f32 {
    let chars: Vec<char> = text.chars().filter(|c| !c.is_whitespace()).collect();
    if chars.is_empty() {
        return 0.0;
    }
    let mut distinct = chars.clone();
    distinct.sort_unstable();
    distinct.dedup();

    let length_term = (chars.len() as f32 / 12.0).min(1.0);
    let diversity_term = distinct.len() as f32 / chars.len() as f32;
    (0.5 * length_term + 0.5 * diversity_term).clamp(0.0, 1.0)
}

fn is_vowel(c: char) -> bool {
    matches!(c.to_ascii_lowercase(), 'a' | 'e' | 'i' | 'o' | 'u' | 'y')
}

fn ratio(count: usize, total: usize) -> f32 {
    if total == 0 {
        0.0
    } else {
        count as f32 / total as f32
    }
}

/// FNV-1a over the given bytes
fn fnv1a(bytes: &[u8]) -> u64 {
    let mut h = 0xcbf29ce484222325u64;
    for b in bytes {
        h ^= *b as u64;
        h = h.wrapping_mul(0x100000001b3);
    }
    h
}

fn orthographic_block(text: &str, out: &mut [f32]) {
    let chars: Vec<char> = text.chars().collect();
    let n = chars.len();
    if n == 0 {
        return;
    }

    let alpha = chars.iter().filter(|c| c.is_alphabetic()).count();
    let digits = chars.iter().filter(|c| c.is_numeric()).count();
    let upper = chars.iter().filter(|c| c.is_uppercase()).count();
    let space = chars.iter().filter(|c| c.is_whitespace()).count();
    let punct = chars.iter().filter(|c| c.is_ascii_punctuation()).count();
    let vowels = chars.iter().filter(|c| is_vowel(**c)).count();
    let non_ascii = chars.iter().filter(|c| !c.is_ascii()).count();

    let mut distinct = chars.clone();
    distinct.sort_unstable();
    distinct.dedup();

    let words: Vec<&str> = text.split_whitespace().collect();
    let mean_word_len = if words.is_empty() {
        0.0
    } else {
        words.iter().map(|w| w.chars().count()).sum::<usize>() as f32 / words.len() as f32
    };

    let mut max_run = 1usize;
    let mut run = 1usize;
    for pair in chars.windows(2) {
        if pair[0] == pair[1] {
            run += 1;
            max_run = max_run.max(run);
        } else {
            run = 1;
        }
    }

    let first = chars[0];
    let last = chars[n - 1];

    out[0] = (n as f32 / 32.0).min(1.0);
    out[1] = ratio(alpha, n);
    out[2] = ratio(digits, n);
    out[3] = ratio(upper, n);
    out[4] = ratio(space, n);
    out[5] = ratio(punct, n);
    out[6] = ratio(vowels, alpha.max(1));
    out[7] = ratio(alpha.saturating_sub(vowels), alpha.max(1));
    out[8] = ratio(distinct.len(), n);
    out[9] = (words.len() as f32 / 8.0).min(1.0);
    out[10] = (mean_word_len / 12.0).min(1.0);
    out[11] = ratio(max_run, n);
    out[12] = if is_vowel(first) { 1.0 } else { 0.0 };
    out[13] = if is_vowel(last) { 1.0 } else { 0.0 };
    out[14] = ratio(non_ascii, n);
    out[15] = if first.is_uppercase() { 1.0 } else { 0.0 };
}

fn ngram_block(text: &str, out: &mut [f32]) {
    let buckets = out.len() as u64;
    for word in text.split_whitespace() {
        let padded: Vec<char> = std::iter::once('^')
            .chain(word.chars().flat_map(|c| c.to_lowercase()))
            .chain(std::iter::once('$'))
            .collect();

        for (n, weight) in [(2usize, BIGRAM_WEIGHT), (3usize, TRIGRAM_WEIGHT)] {
            if padded.len() < n {
                continue;
            }
            for gram in padded.windows(n) {
                let mut key = String::with_capacity(n * 4 + 1);
                key.push(char::from(b'0' + n as u8));
                key.extend(gram.iter());
                let h = fnv1a(key.as_bytes());
                let bucket = (h % buckets) as usize;
                // High bit picks the sign so collisions cancel on average
                let sign = if h >> 63 == 1 { -1.0 } else { 1.0 };
                out[bucket] += sign * weight;
            }
        }
    }
}

fn phonetic_block(text: &str, out: &mut [f32]) {
    let letters: Vec<char> = text
        .chars()
        .filter(|c| c.is_alphabetic())
        .flat_map(|c| c.to_lowercase())
        .collect();
    let n = letters.len();
    if n == 0 {
        return;
    }

    let mut vowel_groups = 0usize;
    let mut consonant_clusters = 0usize;
    let mut longest_cluster = 0usize;
    let mut current_cluster = 0usize;
    let mut prev_vowel: Option<bool> = None;

    for &c in &letters {
        let v = is_vowel(c);
        if v {
            if prev_vowel != Some(true) {
                vowel_groups += 1;
            }
            if current_cluster >= 2 {
                consonant_clusters += 1;
            }
            current_cluster = 0;
        } else {
            current_cluster += 1;
            longest_cluster = longest_cluster.max(current_cluster);
        }
        prev_vowel = Some(v);
    }
    if current_cluster >= 2 {
        consonant_clusters += 1;
    }

    let sibilants = letters.iter().filter(|c| matches!(c, 's' | 'z' | 'x' | 'c')).count();
    let plosives = letters
        .iter()
        .filter(|c| matches!(c, 'p' | 'b' | 't' | 'd' | 'k' | 'g'))
        .count();
    let joined: String = letters.iter().collect();
    let digraphs = ["th", "sh", "ch", "ph", "wh", "ng"]
        .iter()
        .map(|d| joined.matches(d).count())
        .sum::<usize>();

    out[0] = (vowel_groups as f32 / 8.0).min(1.0);
    out[1] = (consonant_clusters as f32 / 8.0).min(1.0);
    out[2] = (longest_cluster as f32 / 5.0).min(1.0);
    out[3] = ratio(vowel_groups, n);
    out[4] = ratio(sibilants, n);
    out[5] = ratio(plosives, n);
    out[6] = ratio(digraphs, n);
    out[7] = if letters.last() == Some(&'e') && n > 2 { 1.0 } else { 0.0 };
}

fn statistical_block(text: &str, out: &mut [f32]) {
    let chars: Vec<char> = text.chars().collect();
    let n = chars.len();
    if n == 0 {
        return;
    }

    let mut counts: std::collections::BTreeMap<char, usize> = std::collections::BTreeMap::new();
    for &c in &chars {
        *counts.entry(c).or_insert(0) += 1;
    }
    let entropy: f32 = counts
        .values()
        .map(|&k| {
            let p = k as f32 / n as f32;
            -p * p.log2()
        })
        .sum();
    let max_entropy = (n as f32).log2().max(1.0);

    let codes: Vec<f32> = chars.iter().map(|c| (*c as u32).min(0x2FF) as f32 / 767.0).collect();
    let mean = codes.iter().sum::<f32>() / n as f32;
    let var = codes.iter().map(|c| (c - mean) * (c - mean)).sum::<f32>() / n as f32;

    out[0] = (entropy / max_entropy).clamp(0.0, 1.0);
    out[1] = mean;
    out[2] = var.sqrt();
    // 3..8 reserved for corpus-level statistics; left at zero
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_deterministic() {
        let a = encode("the quick brown fox");
        let b = encode("the quick brown fox");
        assert_eq!(a, b);
        assert_eq!(a.len(), FEATURE_DIM);
    }

    #[test]
    fn test_encode_normalized() {
        let v = encode("apple");
        let norm: f32 = v.as_slice().iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_empty_input_is_zero_vector() {
        let v = encode("");
        assert_eq!(v.len(), FEATURE_DIM);
        assert!(v.is_zero());
        assert!(v.as_slice().iter().all(|x| x.is_finite()));
    }

    #[test]
    fn test_unrelated_words_are_dissimilar() {
        let cat = encode("cat");
        let noise = encode("qzxjklvwmp");
        assert!(cat.cosine(&noise) < 0.5, "got {}", cat.cosine(&noise));
    }

    #[test]
    fn test_related_words_are_similar() {
        let a = encode("running");
        let b = encode("runnings");
        let c = encode("zebra");
        assert!(a.cosine(&b) > a.cosine(&c));
    }

    #[test]
    fn test_tokenize() {
        assert_eq!(tokenize("The cat, the DOG!"), vec!["the", "cat", "the", "dog"]);
        assert!(tokenize("  ...  ").is_empty());
    }

    #[test]
    fn test_complexity_bounds() {
        assert_eq!(complexity(""), 0.0);
        let c = complexity("photosynthesis");
        assert!(c > 0.0 && c <= 1.0);
        assert!(complexity("aaaa") < complexity("abcd"));
    }

    #[test]
    fn test_cosine_degenerate() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
    }
}
