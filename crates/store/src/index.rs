//! Derived index store.
//!
//! Rebuilt wholesale from the data store (plus team imports); never the
//! source of truth. Holds FTS rows, per-session facets, file edges,
//! embeddings, and a key/value state table.

use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};

use crate::query::query_json;

pub(crate) const INDEX_DDL: &str = "
CREATE TABLE IF NOT EXISTS turns_ft (
    id          TEXT PRIMARY KEY,
    session_id  TEXT NOT NULL,
    turn_index  INTEGER NOT NULL,
    role        TEXT NOT NULL,
    content     TEXT NOT NULL,
    ts          TEXT
);

CREATE VIRTUAL TABLE IF NOT EXISTS turns_fts USING fts5(
    content,
    content='turns_ft',
    content_rowid='rowid',
    tokenize='porter unicode61'
);

CREATE TABLE IF NOT EXISTS tool_calls_index (
    id          TEXT PRIMARY KEY,
    session_id  TEXT NOT NULL,
    call_order  INTEGER NOT NULL,
    tool        TEXT NOT NULL,
    path        TEXT,
    cmd_prefix  TEXT
);

CREATE TABLE IF NOT EXISTS files_index (
    checkpoint_id TEXT,
    session_id    TEXT NOT NULL,
    file_path     TEXT NOT NULL,
    change_type   TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS session_facets (
    session_id      TEXT PRIMARY KEY,
    user_email      TEXT,
    git_branch      TEXT,
    actor_type      TEXT NOT NULL,
    agent_id        TEXT,
    captured_at     TEXT NOT NULL,
    turn_count      INTEGER NOT NULL DEFAULT 0,
    tool_call_count INTEGER NOT NULL DEFAULT 0,
    file_count      INTEGER NOT NULL DEFAULT 0,
    checkpoint_id   TEXT,
    git_sha         TEXT
);

CREATE TABLE IF NOT EXISTS file_cooccurrence (
    file_a TEXT NOT NULL,
    file_b TEXT NOT NULL,
    count  INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS session_embeddings (
    session_id   TEXT PRIMARY KEY,
    embedding    TEXT NOT NULL,
    model        TEXT NOT NULL,
    generated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS index_state (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_turns_ft_session ON turns_ft(session_id);
CREATE INDEX IF NOT EXISTS idx_files_index_session ON files_index(session_id);
";

/// All index tables, dropped in reverse dependency order on rebuild.
pub(crate) const INDEX_TABLES: &[&str] = &[
    "index_state",
    "session_embeddings",
    "file_cooccurrence",
    "session_facets",
    "files_index",
    "tool_calls_index",
    "turns_fts",
    "turns_ft",
];

/// Denormalized per-session metadata used for filtering and sorting.
#[derive(Debug, Clone)]
pub struct SessionFacet {
    pub session_id: String,
    pub user_email: String,
    pub git_branch: String,
    pub actor_type: String,
    pub agent_id: String,
    pub captured_at: String,
    pub turn_count: i64,
    pub tool_call_count: i64,
    pub file_count: i64,
    pub checkpoint_id: String,
    pub git_sha: String,
}

/// One BM25 hit from the FTS index.
#[derive(Debug, Clone)]
pub struct Bm25Hit {
    pub turn_id: String,
    pub session_id: String,
    pub turn_index: i64,
    pub role: String,
    pub content: String,
    /// BM25 magnitude; larger is better.
    pub score: f64,
}

pub struct IndexStore {
    pub(crate) conn: Connection,
}

impl IndexStore {
    /// Open (or create) the index store at `<git_root>/.rekal/index.db`.
    pub fn open(git_root: &Path) -> Result<Self> {
        Self::open_at(&git_root.join(".rekal").join("index.db"))
    }

    pub fn open_at(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("open index store {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "busy_timeout", 5000i32)?;
        conn.execute_batch(INDEX_DDL).context("init index schema")?;
        Ok(Self { conn })
    }

    /// Whether a rebuild has completed at least once.
    #[must_use]
    pub fn is_populated(&self) -> bool {
        self.read_state("last_indexed_at")
            .ok()
            .flatten()
            .is_some()
    }

    pub fn write_state(&self, key: &str, value: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO index_state (key, value) VALUES (?1, ?2)
                 ON CONFLICT (key) DO UPDATE SET value = ?2",
                params![key, value],
            )
            .context("write index_state")?;
        Ok(())
    }

    pub fn read_state(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM index_state WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .context("read index_state")?;
        Ok(value)
    }

    pub fn session_count(&self) -> Result<i64> {
        Ok(self
            .conn
            .query_row("SELECT count(*) FROM session_facets", [], |row| row.get(0))?)
    }

    pub fn turn_count(&self) -> Result<i64> {
        Ok(self
            .conn
            .query_row("SELECT count(*) FROM turns_ft", [], |row| row.get(0))?)
    }

    // Insert paths used by the team-sync importer.

    pub fn insert_turn_ft(
        &self,
        id: &str,
        session_id: &str,
        turn_index: i64,
        role: &str,
        content: &str,
        ts: &str,
    ) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO turns_ft (id, session_id, turn_index, role, content, ts)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![id, session_id, turn_index, role, content, ts],
            )
            .context("insert turn_ft")?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn insert_session_facet(
        &self,
        session_id: &str,
        user_email: &str,
        git_branch: &str,
        actor_type: &str,
        agent_id: &str,
        captured_at: &str,
        turn_count: i64,
        tool_call_count: i64,
        file_count: i64,
    ) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR IGNORE INTO session_facets (
                    session_id, user_email, git_branch, actor_type, agent_id,
                    captured_at, turn_count, tool_call_count, file_count
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    session_id,
                    user_email,
                    git_branch,
                    actor_type,
                    agent_id,
                    captured_at,
                    turn_count,
                    tool_call_count,
                    file_count,
                ],
            )
            .context("insert session_facet")?;
        Ok(())
    }

    pub fn insert_files_index(
        &self,
        checkpoint_id: &str,
        session_id: &str,
        file_path: &str,
        change_type: &str,
    ) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO files_index (checkpoint_id, session_id, file_path, change_type)
                 VALUES (?1, ?2, ?3, ?4)",
                params![checkpoint_id, session_id, file_path, change_type],
            )
            .context("insert files_index")?;
        Ok(())
    }

    pub fn update_facet_checkpoint(
        &self,
        session_id: &str,
        checkpoint_id: &str,
        git_sha: &str,
        file_count: i64,
    ) -> Result<()> {
        self.conn
            .execute(
                "UPDATE session_facets SET checkpoint_id = ?1, git_sha = ?2, file_count = ?3
                 WHERE session_id = ?4",
                params![checkpoint_id, git_sha, file_count, session_id],
            )
            .context("update session_facet")?;
        Ok(())
    }

    // Read paths used by the search engine.

    /// BM25 retrieval over turn content. `match_expr` is an FTS5 MATCH
    /// expression; scores are returned as magnitudes (larger = better).
    pub fn bm25_search(&self, match_expr: &str, limit: i64) -> Result<Vec<Bm25Hit>> {
        let turn_count = self.turn_count()?;
        if turn_count == 0 {
            return Ok(Vec::new());
        }

        let mut stmt = self.conn.prepare(
            "SELECT t.id, t.session_id, t.turn_index, t.role, t.content,
                    -bm25(turns_fts) AS score
             FROM turns_fts
             JOIN turns_ft t ON t.rowid = turns_fts.rowid
             WHERE turns_fts MATCH ?1
             ORDER BY score DESC
             LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![match_expr, limit], |row| {
                Ok(Bm25Hit {
                    turn_id: row.get(0)?,
                    session_id: row.get(1)?,
                    turn_index: row.get(2)?,
                    role: row.get(3)?,
                    content: row.get(4)?,
                    score: row.get(5)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn facet(&self, session_id: &str) -> Result<Option<SessionFacet>> {
        let row = self
            .conn
            .query_row(
                &format!("{FACET_SELECT} WHERE session_id = ?1"),
                params![session_id],
                facet_from_row,
            )
            .optional()
            .context("query facet")?;
        Ok(row)
    }

    /// Facets matching the structured filters, newest first. The file
    /// regex filter is applied by the caller against [`Self::session_files`].
    pub fn facets_filtered(
        &self,
        actor: Option<&str>,
        author: Option<&str>,
        commit_prefix: Option<&str>,
    ) -> Result<Vec<SessionFacet>> {
        let mut sql = FACET_SELECT.to_owned();
        let mut clauses: Vec<String> = Vec::new();
        let mut args: Vec<String> = Vec::new();

        if let Some(actor) = actor {
            args.push(actor.to_owned());
            clauses.push(format!("actor_type = ?{}", args.len()));
        }
        if let Some(author) = author {
            args.push(author.to_owned());
            clauses.push(format!("user_email = ?{}", args.len()));
        }
        if let Some(prefix) = commit_prefix {
            args.push(format!("{}%", like_escape(prefix)));
            clauses.push(format!("git_sha LIKE ?{} ESCAPE '\\'", args.len()));
        }
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY captured_at DESC");

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(args.iter()), facet_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Distinct file paths associated with a session.
    pub fn session_files(&self, session_id: &str) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT file_path FROM files_index WHERE session_id = ?1 ORDER BY file_path",
        )?;
        let rows = stmt
            .query_map(params![session_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(rows)
    }

    /// The first turn of a session: `(turn_index, role, content)`.
    pub fn first_turn(&self, session_id: &str) -> Result<Option<(i64, String, String)>> {
        let row = self
            .conn
            .query_row(
                "SELECT turn_index, role, content FROM turns_ft
                 WHERE session_id = ?1 ORDER BY turn_index LIMIT 1",
                params![session_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .context("query first turn")?;
        Ok(row)
    }

    /// Concatenated turn text per session, in turn order. LSA documents.
    pub fn session_content(&self) -> Result<Vec<(String, String)>> {
        let mut stmt = self.conn.prepare(
            "SELECT session_id, group_concat(content, ' ' ORDER BY turn_index)
             FROM turns_ft
             GROUP BY session_id
             ORDER BY session_id",
        )?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn store_embedding(&self, session_id: &str, vector: &[f64], model: &str) -> Result<()> {
        let encoded = serde_json::to_string(vector)?;
        self.conn
            .execute(
                "INSERT INTO session_embeddings (session_id, embedding, model, generated_at)
                 VALUES (?1, ?2, ?3, datetime('now'))
                 ON CONFLICT (session_id) DO UPDATE SET embedding = ?2, model = ?3",
                params![session_id, encoded, model],
            )
            .context("store embedding")?;
        Ok(())
    }

    /// All stored embeddings as `(session_id, vector)` pairs.
    pub fn load_embeddings(&self) -> Result<Vec<(String, Vec<f64>)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT session_id, embedding FROM session_embeddings")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut out = Vec::with_capacity(rows.len());
        for (session_id, encoded) in rows {
            let vector: Vec<f64> =
                serde_json::from_str(&encoded).context("decode embedding")?;
            out.push((session_id, vector));
        }
        Ok(out)
    }

    /// Run a read-only SELECT and return one JSON object per row.
    pub fn query_json(&self, sql: &str) -> Result<Vec<serde_json::Value>> {
        query_json(&self.conn, sql)
    }
}

const FACET_SELECT: &str = "SELECT session_id, COALESCE(user_email, ''), COALESCE(git_branch, ''),
        actor_type, COALESCE(agent_id, ''), captured_at, turn_count,
        tool_call_count, file_count, COALESCE(checkpoint_id, ''), COALESCE(git_sha, '')
 FROM session_facets";

fn facet_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionFacet> {
    Ok(SessionFacet {
        session_id: row.get(0)?,
        user_email: row.get(1)?,
        git_branch: row.get(2)?,
        actor_type: row.get(3)?,
        agent_id: row.get(4)?,
        captured_at: row.get(5)?,
        turn_count: row.get(6)?,
        tool_call_count: row.get(7)?,
        file_count: row.get(8)?,
        checkpoint_id: row.get(9)?,
        git_sha: row.get(10)?,
    })
}

/// Escape LIKE wildcards in user input.
fn like_escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}
