//! Hybrid search: BM25 over turns blended with LSA cosine similarity,
//! reduced per session, normalized, filtered, and snippeted.

use std::collections::HashMap;

use anyhow::{Context, Result};
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use rekal_store::{Bm25Hit, IndexStore, SessionFacet};

use crate::lsa::{cosine_similarity, Model, DEFAULT_DIMENSION};
use crate::snippet::{extract_snippet, truncate_snippet, SNIPPET_SIZE};

const BM25_WEIGHT: f64 = 0.4;
const LSA_WEIGHT: f64 = 0.6;
const BM25_HIT_LIMIT: i64 = 200;
pub const DEFAULT_LIMIT: usize = 20;

/// Structured search parameters.
#[derive(Debug, Clone, Default)]
pub struct RecallFilters {
    pub query: String,
    /// File path filter, a regex over associated files.
    pub file: String,
    /// Commit SHA prefix.
    pub commit: String,
    /// Author email, exact.
    pub author: String,
    /// Actor kind, exact ("human" | "agent").
    pub actor: String,
    /// Max results; 0 means the default.
    pub limit: usize,
}

/// One search result in the output document.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub session_id: String,
    pub score: f64,
    pub snippet: String,
    pub snippet_turn_index: i64,
    pub snippet_role: String,
    pub session: SessionDetail,
}

/// Facet sub-object attached to each result.
#[derive(Debug, Clone, Serialize)]
pub struct SessionDetail {
    pub author: String,
    pub actor: String,
    pub branch: String,
    pub captured_at: String,
    pub commit: String,
    pub turn_count: i64,
    pub tool_call_count: i64,
    pub files: Vec<String>,
}

/// The full output document.
#[derive(Debug, Serialize)]
pub struct SearchOutput {
    pub results: Vec<SearchResult>,
    pub query: String,
    pub filters: HashMap<String, String>,
    pub mode: String,
    pub total: usize,
}

/// Run a recall over the index store: hybrid mode when the query is
/// non-empty, filter mode otherwise.
pub fn run_search(index: &IndexStore, filters: &RecallFilters) -> Result<SearchOutput> {
    let limit = if filters.limit == 0 {
        DEFAULT_LIMIT
    } else {
        filters.limit
    };

    let (mode, results) = if filters.query.is_empty() {
        ("filter", filter_search(index, filters, limit)?)
    } else {
        ("hybrid", hybrid_search(index, filters, limit)?)
    };

    let mut filter_echo = HashMap::new();
    filter_echo.insert("file".to_owned(), filters.file.clone());
    filter_echo.insert("actor".to_owned(), filters.actor.clone());
    filter_echo.insert("commit".to_owned(), filters.commit.clone());
    filter_echo.insert("author".to_owned(), filters.author.clone());

    Ok(SearchOutput {
        total: results.len(),
        results,
        query: filters.query.clone(),
        filters: filter_echo,
        mode: mode.to_owned(),
    })
}

struct SessionHit {
    bm25_max: f64,
    lsa_score: f64,
    best_turn: Option<Bm25Hit>,
}

fn hybrid_search(
    index: &IndexStore,
    filters: &RecallFilters,
    limit: usize,
) -> Result<Vec<SearchResult>> {
    let mut sessions: HashMap<String, SessionHit> = HashMap::new();

    // Lexical leg: top turn hits, reduced to the per-session max.
    for hit in bm25_hits(index, &filters.query)? {
        let entry = sessions.entry(hit.session_id.clone()).or_insert(SessionHit {
            bm25_max: 0.0,
            lsa_score: 0.0,
            best_turn: None,
        });
        if hit.score > entry.bm25_max || entry.best_turn.is_none() {
            entry.bm25_max = entry.bm25_max.max(hit.score);
            entry.best_turn = Some(hit);
        }
    }

    // Semantic leg: cosine against every stored embedding, positives only.
    // LSA failure degrades to BM25-only rather than failing the search.
    match lsa_scores(index, &filters.query) {
        Ok(scores) => {
            for (session_id, score) in scores {
                sessions
                    .entry(session_id)
                    .or_insert(SessionHit {
                        bm25_max: 0.0,
                        lsa_score: 0.0,
                        best_turn: None,
                    })
                    .lsa_score = score;
            }
        }
        Err(err) => debug!("lsa leg skipped: {err}"),
    }

    // Min-max normalize per source and blend.
    let max_bm25 = sessions
        .values()
        .map(|s| s.bm25_max)
        .fold(0.0_f64, f64::max);
    let max_lsa = sessions
        .values()
        .map(|s| s.lsa_score)
        .fold(0.0_f64, f64::max);

    let mut scored: Vec<(String, f64, SessionHit)> = sessions
        .into_iter()
        .map(|(session_id, hit)| {
            let bm25_norm = if max_bm25 > 0.0 {
                hit.bm25_max / max_bm25
            } else {
                0.0
            };
            let lsa_norm = if max_lsa > 0.0 {
                hit.lsa_score / max_lsa
            } else {
                0.0
            };
            let score = BM25_WEIGHT * bm25_norm + LSA_WEIGHT * lsa_norm;
            (session_id, score, hit)
        })
        .collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    build_results(index, scored, filters, limit)
}

fn bm25_hits(index: &IndexStore, query: &str) -> Result<Vec<Bm25Hit>> {
    let Some(match_expr) = fts_match_expr(query) else {
        return Ok(Vec::new());
    };
    index.bm25_search(&match_expr, BM25_HIT_LIMIT)
}

/// Quote and OR-join the query terms for FTS5, dropping stopwords.
fn fts_match_expr(query: &str) -> Option<String> {
    let terms: Vec<String> = query
        .split_whitespace()
        .map(|word| word.to_lowercase().replace('"', ""))
        .filter(|word| !word.is_empty() && !crate::lsa::STOPWORDS.contains(&word.as_str()))
        .map(|word| format!("\"{word}\""))
        .collect();
    if terms.is_empty() {
        return None;
    }
    Some(terms.join(" OR "))
}

/// Project the query through a model rebuilt from the indexed session
/// content and score every stored embedding; keep positive scores.
fn lsa_scores(index: &IndexStore, query: &str) -> Result<HashMap<String, f64>> {
    let embeddings = index.load_embeddings().context("load embeddings")?;
    if embeddings.is_empty() {
        return Ok(HashMap::new());
    }

    let content = index.session_content().context("session content")?;
    let Some(model) = Model::build(&content, DEFAULT_DIMENSION) else {
        return Ok(HashMap::new());
    };
    let query_vec = model.embed(query);

    let mut scores = HashMap::new();
    for (session_id, embedding) in embeddings {
        let sim = cosine_similarity(&query_vec, &embedding);
        if sim > 0.0 {
            scores.insert(session_id, sim);
        }
    }
    Ok(scores)
}

fn build_results(
    index: &IndexStore,
    scored: Vec<(String, f64, SessionHit)>,
    filters: &RecallFilters,
    limit: usize,
) -> Result<Vec<SearchResult>> {
    let file_re = compile_file_filter(&filters.file)?;

    let mut results = Vec::new();
    for (session_id, score, hit) in scored {
        if results.len() >= limit {
            break;
        }

        let Some(facet) = index.facet(&session_id)? else {
            continue;
        };
        if !facet_matches(&facet, filters) {
            continue;
        }

        let files = index.session_files(&session_id)?;
        if let Some(re) = &file_re {
            if !files.iter().any(|f| re.is_match(f)) {
                continue;
            }
        }

        let (snippet, snippet_turn_index, snippet_role) = match &hit.best_turn {
            Some(turn) if !turn.content.is_empty() => (
                extract_snippet(&turn.content, &filters.query),
                turn.turn_index,
                turn.role.clone(),
            ),
            _ => first_turn_snippet(index, &session_id)?,
        };

        results.push(SearchResult {
            session_id,
            score: (score * 100.0).round() / 100.0,
            snippet,
            snippet_turn_index,
            snippet_role,
            session: detail_from_facet(&facet, files),
        });
    }
    Ok(results)
}

fn filter_search(
    index: &IndexStore,
    filters: &RecallFilters,
    limit: usize,
) -> Result<Vec<SearchResult>> {
    let file_re = compile_file_filter(&filters.file)?;

    let facets = index.facets_filtered(
        non_empty(&filters.actor),
        non_empty(&filters.author),
        non_empty(&filters.commit),
    )?;

    let mut results = Vec::new();
    for facet in facets {
        if results.len() >= limit {
            break;
        }

        let files = index.session_files(&facet.session_id)?;
        if let Some(re) = &file_re {
            if !files.iter().any(|f| re.is_match(f)) {
                continue;
            }
        }

        let (snippet, snippet_turn_index, snippet_role) =
            first_turn_snippet(index, &facet.session_id)?;

        results.push(SearchResult {
            session_id: facet.session_id.clone(),
            score: 0.0,
            snippet,
            snippet_turn_index,
            snippet_role,
            session: detail_from_facet(&facet, files),
        });
    }
    Ok(results)
}

fn compile_file_filter(file: &str) -> Result<Option<Regex>> {
    if file.is_empty() {
        return Ok(None);
    }
    Ok(Some(
        Regex::new(file).with_context(|| format!("invalid file regex: {file}"))?,
    ))
}

fn facet_matches(facet: &SessionFacet, filters: &RecallFilters) -> bool {
    if !filters.actor.is_empty() && facet.actor_type != filters.actor {
        return false;
    }
    if !filters.author.is_empty() && facet.user_email != filters.author {
        return false;
    }
    if !filters.commit.is_empty() && !facet.git_sha.starts_with(&filters.commit) {
        return false;
    }
    true
}

fn detail_from_facet(facet: &SessionFacet, files: Vec<String>) -> SessionDetail {
    SessionDetail {
        author: facet.user_email.clone(),
        actor: facet.actor_type.clone(),
        branch: facet.git_branch.clone(),
        captured_at: facet.captured_at.clone(),
        commit: facet.git_sha.clone(),
        turn_count: facet.turn_count,
        tool_call_count: facet.tool_call_count,
        files,
    }
}

fn first_turn_snippet(index: &IndexStore, session_id: &str) -> Result<(String, i64, String)> {
    match index.first_turn(session_id)? {
        Some((turn_index, role, content)) => {
            Ok((truncate_snippet(&content, SNIPPET_SIZE), turn_index, role))
        }
        None => Ok((String::new(), 0, String::new())),
    }
}

fn non_empty(s: &str) -> Option<&str> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}
