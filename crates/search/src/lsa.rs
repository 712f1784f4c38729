//! Latent semantic analysis over session text.
//!
//! Documents are sessions (all turn text concatenated in turn order).
//! A TF-IDF term-document matrix is factorized with a thin SVD and
//! truncated; session embeddings are rows of `Vk` scaled by the singular
//! values, and queries are projected with `q^T * Uk / sigma`.

use std::collections::{BTreeMap, HashMap};

use nalgebra::DMatrix;

/// Default SVD truncation rank.
pub const DEFAULT_DIMENSION: usize = 128;

/// Minimum number of sessions a term must appear in to enter the vocabulary.
const MIN_TERM_SESSIONS: usize = 2;

/// Minimum stem length left after suffix stripping.
const MIN_STEM_LEN: usize = 3;

/// Ordered suffix list; the first match is stripped.
const SUFFIXES: &[&str] = &[
    "tion", "sion", "ment", "ness", "able", "ible", "ful", "less", "ous", "ive", "ing", "ied",
    "ies", "ers", "est", "ely", "ed", "ly", "er", "es", "al", "en", "s",
];

/// Trained LSA components.
pub struct Model {
    /// term -> row index in the term-document matrix.
    vocabulary: HashMap<String, usize>,
    /// IDF weight per term row.
    idf: Vec<f64>,
    /// Truncated left singular vectors (terms x k).
    uk: DMatrix<f64>,
    /// Truncated singular values.
    sk: Vec<f64>,
    /// Truncated right singular vectors (sessions x k).
    vk: DMatrix<f64>,
    /// Row index in `vk` -> session id.
    session_ids: Vec<String>,
    /// Actual dimensionality (<= requested).
    dim: usize,
}

impl Model {
    /// Build a model from `session_id -> concatenated content` pairs.
    ///
    /// Returns `None` when there are fewer than 2 sessions or fewer than
    /// 2 vocabulary terms, or when the factorization fails.
    #[must_use]
    pub fn build(sessions: &[(String, String)], requested_dim: usize) -> Option<Self> {
        if sessions.len() < 2 {
            return None;
        }
        let dim = if requested_dim == 0 {
            DEFAULT_DIMENSION
        } else {
            requested_dim
        };

        // Stable session ordering.
        let mut ordered: Vec<(&str, &str)> = sessions
            .iter()
            .map(|(id, content)| (id.as_str(), content.as_str()))
            .collect();
        ordered.sort_by_key(|(id, _)| *id);

        // Per-document term frequencies and document frequency.
        let mut doc_terms: Vec<HashMap<String, f64>> = Vec::with_capacity(ordered.len());
        let mut df: BTreeMap<String, usize> = BTreeMap::new();
        for (_, content) in &ordered {
            let mut tf: HashMap<String, f64> = HashMap::new();
            for token in tokenize(content) {
                *tf.entry(token).or_insert(0.0) += 1.0;
            }
            for term in tf.keys() {
                *df.entry(term.clone()).or_insert(0) += 1;
            }
            doc_terms.push(tf);
        }

        // Vocabulary: terms in >= 2 distinct sessions, in sorted order.
        let mut vocabulary: HashMap<String, usize> = HashMap::new();
        let mut idf: Vec<f64> = Vec::new();
        let n_docs = ordered.len();
        for (term, count) in &df {
            if *count >= MIN_TERM_SESSIONS {
                vocabulary.insert(term.clone(), vocabulary.len());
                idf.push((n_docs as f64 / *count as f64).ln() + 1.0);
            }
        }
        let n_terms = vocabulary.len();
        if n_terms < 2 {
            return None;
        }

        let dim = dim.min(n_terms).min(n_docs);

        // TF-IDF matrix, terms x documents, augmented TF normalization.
        let mut matrix = DMatrix::<f64>::zeros(n_terms, n_docs);
        for (doc_idx, tf) in doc_terms.iter().enumerate() {
            let max_tf = tf
                .iter()
                .filter(|(term, _)| vocabulary.contains_key(*term))
                .map(|(_, count)| *count)
                .fold(0.0_f64, f64::max);
            if max_tf == 0.0 {
                continue;
            }
            for (term, count) in tf {
                let Some(&row) = vocabulary.get(term) else {
                    continue;
                };
                let tf_norm = 0.5 + 0.5 * (count / max_tf);
                matrix[(row, doc_idx)] = tf_norm * idf[row];
            }
        }

        let svd = matrix.svd(true, true);
        let u = svd.u?;
        let v_t = svd.v_t?;
        let singular = svd.singular_values;

        let uk = u.columns(0, dim).into_owned();
        // v_t is (min(m,n) x docs); session rows are columns of v_t.
        let vk = v_t.rows(0, dim).transpose().into_owned();
        let sk: Vec<f64> = singular.iter().take(dim).copied().collect();

        Some(Self {
            vocabulary,
            idf,
            uk,
            sk,
            vk,
            session_ids: ordered.iter().map(|(id, _)| (*id).to_owned()).collect(),
            dim,
        })
    }

    /// Actual embedding dimensionality.
    #[must_use]
    pub const fn dim(&self) -> usize {
        self.dim
    }

    /// `session_id -> embedding` for bulk storage: rows of `Vk` scaled
    /// component-wise by the singular values.
    #[must_use]
    pub fn vectors(&self) -> Vec<(String, Vec<f64>)> {
        self.session_ids
            .iter()
            .enumerate()
            .map(|(row, id)| {
                let vec = (0..self.dim)
                    .map(|j| self.vk[(row, j)] * self.sk[j])
                    .collect();
                (id.clone(), vec)
            })
            .collect()
    }

    /// Project a query into the embedding space.
    #[must_use]
    pub fn embed(&self, text: &str) -> Vec<f64> {
        let tokens = tokenize(text);
        if tokens.is_empty() {
            return vec![0.0; self.dim];
        }

        let mut tf: HashMap<String, f64> = HashMap::new();
        for token in tokens {
            *tf.entry(token).or_insert(0.0) += 1.0;
        }
        let max_tf = tf.values().copied().fold(0.0_f64, f64::max);

        // Sparse query vector in term space.
        let mut q = vec![0.0_f64; self.vocabulary.len()];
        for (term, count) in &tf {
            if let Some(&row) = self.vocabulary.get(term) {
                let tf_norm = 0.5 + 0.5 * (count / max_tf);
                q[row] = tf_norm * self.idf[row];
            }
        }

        // q_k[j] = (q^T * Uk)[j] / sigma_j, zero where sigma_j == 0.
        (0..self.dim)
            .map(|j| {
                if self.sk[j] == 0.0 {
                    return 0.0;
                }
                let dot: f64 = q
                    .iter()
                    .enumerate()
                    .map(|(i, qi)| qi * self.uk[(i, j)])
                    .sum();
                dot / self.sk[j]
            })
            .collect()
    }
}

/// Cosine similarity; zero vectors or mismatched dimensions yield 0.
#[must_use]
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0;
    let mut norm_a = 0.0;
    let mut norm_b = 0.0;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Lowercase, split on non-alphanumerics, drop short tokens and
/// stopwords, then apply suffix-stripping stemming.
#[must_use]
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();

    for c in text.chars() {
        if c.is_alphanumeric() {
            current.extend(c.to_lowercase());
        } else if !current.is_empty() {
            push_token(&mut tokens, &current);
            current.clear();
        }
    }
    if !current.is_empty() {
        push_token(&mut tokens, &current);
    }

    tokens
}

fn push_token(tokens: &mut Vec<String>, word: &str) {
    if word.chars().count() >= 2 && !STOPWORDS.contains(&word) {
        tokens.push(stem(word));
    }
}

/// Table-driven suffix stripping: remove the first matching suffix when
/// the remaining stem keeps at least 3 characters.
fn stem(word: &str) -> String {
    for suffix in SUFFIXES {
        if word.len() >= suffix.len() + MIN_STEM_LEN && word.ends_with(suffix) {
            return word[..word.len() - suffix.len()].to_owned();
        }
    }
    word.to_owned()
}

/// Fixed English stopword set.
pub(crate) const STOPWORDS: &[&str] = &[
    "the", "be", "to", "of", "and", "in", "that", "have", "it", "for", "not", "on", "with", "he",
    "as", "you", "do", "at", "this", "but", "his", "by", "from", "they", "we", "say", "her",
    "she", "or", "an", "will", "my", "one", "all", "would", "there", "their", "what", "so", "up",
    "out", "if", "about", "who", "get", "which", "go", "me", "when", "make", "can", "like", "no",
    "just", "him", "know", "take", "come", "could", "than", "look", "use", "into", "some",
    "them", "see", "other", "then", "now", "only", "its", "also", "after", "way", "our", "how",
    "more", "been", "was", "were", "are", "is", "am", "has", "had", "did", "does", "let", "may",
    "should", "must", "shall", "very", "much", "too",
];

#[cfg(test)]
mod tests {
    use super::*;

    fn sessions(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(id, content)| ((*id).to_owned(), (*content).to_owned()))
            .collect()
    }

    #[test]
    fn tokenize_filters_stopwords() {
        let tokens = tokenize("Hello World! This is a test.");
        assert!(tokens.contains(&"hello".to_owned()));
        assert!(tokens.contains(&"world".to_owned()));
        assert!(tokens.contains(&"test".to_owned()));
        assert!(!tokens.contains(&"this".to_owned()));
        assert!(!tokens.contains(&"is".to_owned()));
    }

    #[test]
    fn tokenize_empty() {
        assert!(tokenize("").is_empty());
    }

    #[test]
    fn tokenize_keeps_numbers() {
        let tokens = tokenize("error 404 not found");
        assert!(tokens.contains(&"error".to_owned()));
        assert!(tokens.contains(&"404".to_owned()));
        assert!(tokens.contains(&"found".to_owned()));
    }

    #[test]
    fn stem_strips_first_matching_suffix() {
        assert_eq!(stem("running"), "runn");
        assert_eq!(stem("authentication"), "authentica");
        assert_eq!(stem("connections"), "connection");
        assert_eq!(stem("go"), "go");
    }

    #[test]
    fn cosine_identical_is_one() {
        let a = [1.0, 2.0, 3.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn cosine_orthogonal_is_zero() {
        assert!(cosine_similarity(&[1.0, 0.0, 0.0], &[0.0, 1.0, 0.0]).abs() < 1e-9);
    }

    #[test]
    fn cosine_degenerate_cases() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0, 2.0, 3.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn build_requires_two_sessions() {
        assert!(Model::build(&sessions(&[("s1", "hello world")]), DEFAULT_DIMENSION).is_none());
        assert!(Model::build(&[], DEFAULT_DIMENSION).is_none());
    }

    #[test]
    fn build_and_embed_groups_topics() {
        let corpus = sessions(&[
            (
                "s1",
                "JWT authentication token expiry refresh login security middleware",
            ),
            (
                "s2",
                "JWT token validation auth middleware bearer header claims expiry",
            ),
            (
                "s3",
                "database connection pooling query optimization index performance SQL",
            ),
            (
                "s4",
                "database schema migration table column index query performance tuning",
            ),
        ]);

        let model = Model::build(&corpus, 3).unwrap();
        assert_eq!(model.dim(), 3);

        let vectors: std::collections::HashMap<String, Vec<f64>> =
            model.vectors().into_iter().collect();
        assert_eq!(vectors.len(), 4);

        let query = model.embed("JWT authentication");
        let auth_avg = (cosine_similarity(&query, &vectors["s1"])
            + cosine_similarity(&query, &vectors["s2"]))
            / 2.0;
        let db_avg = (cosine_similarity(&query, &vectors["s3"])
            + cosine_similarity(&query, &vectors["s4"]))
            / 2.0;
        assert!(
            auth_avg > db_avg,
            "auth sessions should score higher: auth={auth_avg}, db={db_avg}"
        );
    }

    #[test]
    fn dim_is_capped_by_corpus() {
        let corpus = sessions(&[
            ("s1", "alpha beta gamma"),
            ("s2", "alpha beta delta"),
        ]);
        let model = Model::build(&corpus, DEFAULT_DIMENSION).unwrap();
        assert!(model.dim() <= 2);
    }

    #[test]
    fn embed_unknown_terms_is_zero_vector() {
        let corpus = sessions(&[
            ("s1", "alpha beta gamma"),
            ("s2", "alpha beta delta"),
        ]);
        let model = Model::build(&corpus, DEFAULT_DIMENSION).unwrap();
        let query = model.embed("zzz qqq");
        assert!(query.iter().all(|x| x.abs() < 1e-12));
    }
}
