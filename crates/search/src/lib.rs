//! Hybrid keyword + semantic retrieval over captured sessions.
//!
//! BM25 (lexical, via the index store's FTS) and LSA (semantic, truncated
//! SVD over a TF-IDF matrix) are each reduced to a per-session score,
//! min-max normalized, and blended 0.4/0.6. Structured filters apply on
//! top of either mode.

pub mod hybrid;
pub mod lsa;
pub mod snippet;

pub use hybrid::{
    run_search, RecallFilters, SearchOutput, SearchResult, SessionDetail, DEFAULT_LIMIT,
};
pub use lsa::{cosine_similarity, tokenize, Model, DEFAULT_DIMENSION};
pub use snippet::{extract_snippet, truncate_snippet, SNIPPET_SIZE};
