//! Authoritative data store.
//!
//! Append-only source of truth, owned by the checkpoint and export
//! engines. Session, turn, and tool-call rows are never updated or
//! deleted; the only mutations are the exported flag on checkpoints and
//! the per-file checkpoint-state cache.

use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};

use crate::query::query_json;

const DATA_DDL: &str = "
CREATE TABLE IF NOT EXISTS sessions (
    id                TEXT PRIMARY KEY,
    parent_session_id TEXT,
    session_hash      TEXT NOT NULL UNIQUE,
    captured_at       TEXT NOT NULL,
    actor_type        TEXT NOT NULL DEFAULT 'human',
    agent_id          TEXT,
    user_email        TEXT,
    branch            TEXT
);

CREATE TABLE IF NOT EXISTS turns (
    id          TEXT PRIMARY KEY,
    session_id  TEXT NOT NULL REFERENCES sessions(id),
    turn_index  INTEGER NOT NULL,
    role        TEXT NOT NULL,
    content     TEXT NOT NULL,
    ts          TEXT,
    UNIQUE (session_id, turn_index)
);

CREATE TABLE IF NOT EXISTS tool_calls (
    id          TEXT PRIMARY KEY,
    session_id  TEXT NOT NULL REFERENCES sessions(id),
    call_order  INTEGER NOT NULL,
    tool        TEXT NOT NULL,
    path        TEXT,
    cmd_prefix  TEXT
);

CREATE TABLE IF NOT EXISTS checkpoints (
    id          TEXT PRIMARY KEY,
    git_sha     TEXT NOT NULL,
    git_branch  TEXT NOT NULL,
    user_email  TEXT NOT NULL,
    ts          TEXT NOT NULL,
    actor_type  TEXT NOT NULL DEFAULT 'human',
    agent_id    TEXT,
    exported    INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS files_touched (
    id            TEXT PRIMARY KEY,
    checkpoint_id TEXT NOT NULL REFERENCES checkpoints(id),
    file_path     TEXT NOT NULL,
    change_type   TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS checkpoint_sessions (
    checkpoint_id TEXT NOT NULL REFERENCES checkpoints(id),
    session_id    TEXT NOT NULL REFERENCES sessions(id),
    PRIMARY KEY (checkpoint_id, session_id)
);

CREATE TABLE IF NOT EXISTS checkpoint_state (
    file_path TEXT PRIMARY KEY,
    byte_size INTEGER NOT NULL,
    file_hash TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_turns_session ON turns(session_id);
CREATE INDEX IF NOT EXISTS idx_tool_calls_session ON tool_calls(session_id);
CREATE INDEX IF NOT EXISTS idx_files_touched_checkpoint ON files_touched(checkpoint_id);
CREATE INDEX IF NOT EXISTS idx_checkpoints_exported ON checkpoints(exported);
";

/// A checkpoint row as read back for export and log.
#[derive(Debug, Clone)]
pub struct CheckpointRow {
    pub id: String,
    pub git_sha: String,
    pub git_branch: String,
    pub user_email: String,
    pub ts: String,
    pub actor_type: String,
    pub agent_id: String,
}

/// A session row as read back for export and drill-down.
#[derive(Debug, Clone)]
pub struct SessionRow {
    pub id: String,
    pub session_hash: String,
    pub captured_at: String,
    pub actor_type: String,
    pub agent_id: String,
    pub user_email: String,
    pub branch: String,
}

#[derive(Debug, Clone)]
pub struct TurnRow {
    pub turn_index: i64,
    pub role: String,
    pub content: String,
    pub ts: String,
}

#[derive(Debug, Clone)]
pub struct ToolCallRow {
    pub call_order: i64,
    pub tool: String,
    pub path: String,
    pub cmd_prefix: String,
}

/// One entry of the checkpoint log, newest first.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub id: String,
    pub git_sha: String,
    pub git_branch: String,
    pub user_email: String,
    pub ts: String,
    pub actor_type: String,
    pub session_count: i64,
}

pub struct DataStore {
    conn: Connection,
}

impl DataStore {
    /// Open (or create) the data store at `<git_root>/.rekal/data.db`.
    pub fn open(git_root: &Path) -> Result<Self> {
        Self::open_at(&git_root.join(".rekal").join("data.db"))
    }

    pub fn open_at(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("open data store {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "busy_timeout", 5000i32)?;
        conn.execute_batch(DATA_DDL).context("init data schema")?;
        Ok(Self { conn })
    }

    pub fn session_exists_by_hash(&self, hash: &str) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT count(*) FROM sessions WHERE session_hash = ?1",
            params![hash],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn session_exists_by_id(&self, id: &str) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT count(*) FROM sessions WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Insert a session row. Fails if the content hash already exists.
    #[allow(clippy::too_many_arguments)]
    pub fn insert_session(
        &self,
        id: &str,
        parent_session_id: &str,
        session_hash: &str,
        actor_type: &str,
        agent_id: &str,
        user_email: &str,
        branch: &str,
        captured_at: &str,
    ) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO sessions (id, parent_session_id, session_hash, captured_at, actor_type, agent_id, user_email, branch)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    id,
                    null_if_empty(parent_session_id),
                    session_hash,
                    captured_at,
                    actor_type,
                    null_if_empty(agent_id),
                    null_if_empty(user_email),
                    null_if_empty(branch),
                ],
            )
            .context("insert session")?;
        Ok(())
    }

    pub fn insert_turn(
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
                "INSERT INTO turns (id, session_id, turn_index, role, content, ts)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![id, session_id, turn_index, role, content, null_if_empty(ts)],
            )
            .context("insert turn")?;
        Ok(())
    }

    pub fn insert_tool_call(
        &self,
        id: &str,
        session_id: &str,
        call_order: i64,
        tool: &str,
        path: &str,
        cmd_prefix: &str,
    ) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO tool_calls (id, session_id, call_order, tool, path, cmd_prefix)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![id, session_id, call_order, tool, path, cmd_prefix],
            )
            .context("insert tool_call")?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn insert_checkpoint(
        &self,
        id: &str,
        git_sha: &str,
        git_branch: &str,
        user_email: &str,
        ts: &str,
        actor_type: &str,
        agent_id: &str,
        exported: bool,
    ) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO checkpoints (id, git_sha, git_branch, user_email, ts, actor_type, agent_id, exported)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    id,
                    git_sha,
                    git_branch,
                    user_email,
                    ts,
                    actor_type,
                    null_if_empty(agent_id),
                    exported,
                ],
            )
            .context("insert checkpoint")?;
        Ok(())
    }

    pub fn insert_file_touched(
        &self,
        id: &str,
        checkpoint_id: &str,
        file_path: &str,
        change_type: &str,
    ) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO files_touched (id, checkpoint_id, file_path, change_type)
                 VALUES (?1, ?2, ?3, ?4)",
                params![id, checkpoint_id, file_path, change_type],
            )
            .context("insert file_touched")?;
        Ok(())
    }

    pub fn link_checkpoint_session(&self, checkpoint_id: &str, session_id: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR IGNORE INTO checkpoint_sessions (checkpoint_id, session_id)
                 VALUES (?1, ?2)",
                params![checkpoint_id, session_id],
            )
            .context("insert checkpoint_session")?;
        Ok(())
    }

    pub fn checkpoint_exists_by_sha(&self, git_sha: &str) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT count(*) FROM checkpoints WHERE git_sha = ?1",
            params![git_sha],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Cached `(byte_size, file_hash)` for a transcript path, if any.
    pub fn get_checkpoint_state(&self, file_path: &str) -> Result<Option<(i64, String)>> {
        let row = self
            .conn
            .query_row(
                "SELECT byte_size, file_hash FROM checkpoint_state WHERE file_path = ?1",
                params![file_path],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .context("get checkpoint_state")?;
        Ok(row)
    }

    pub fn upsert_checkpoint_state(
        &self,
        file_path: &str,
        byte_size: i64,
        file_hash: &str,
    ) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO checkpoint_state (file_path, byte_size, file_hash)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT (file_path) DO UPDATE SET byte_size = ?2, file_hash = ?3",
                params![file_path, byte_size, file_hash],
            )
            .context("upsert checkpoint_state")?;
        Ok(())
    }

    /// Checkpoints with `exported = false`, ordered by timestamp.
    pub fn unexported_checkpoints(&self) -> Result<Vec<CheckpointRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, git_sha, git_branch, user_email, ts, actor_type, COALESCE(agent_id, '')
             FROM checkpoints WHERE exported = 0 ORDER BY ts",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(CheckpointRow {
                    id: row.get(0)?,
                    git_sha: row.get(1)?,
                    git_branch: row.get(2)?,
                    user_email: row.get(3)?,
                    ts: row.get(4)?,
                    actor_type: row.get(5)?,
                    agent_id: row.get(6)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Flip the exported flag for a set of checkpoints in one transaction.
    pub fn mark_exported(&self, checkpoint_ids: &[String]) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        for id in checkpoint_ids {
            tx.execute(
                "UPDATE checkpoints SET exported = 1 WHERE id = ?1",
                params![id],
            )?;
        }
        tx.commit().context("mark checkpoints exported")?;
        Ok(())
    }

    pub fn sessions_for_checkpoint(&self, checkpoint_id: &str) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT session_id FROM checkpoint_sessions WHERE checkpoint_id = ?1 ORDER BY session_id",
        )?;
        let rows = stmt
            .query_map(params![checkpoint_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(rows)
    }

    pub fn session(&self, id: &str) -> Result<Option<SessionRow>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, session_hash, captured_at, actor_type, COALESCE(agent_id, ''),
                        COALESCE(user_email, ''), COALESCE(branch, '')
                 FROM sessions WHERE id = ?1",
                params![id],
                |row| {
                    Ok(SessionRow {
                        id: row.get(0)?,
                        session_hash: row.get(1)?,
                        captured_at: row.get(2)?,
                        actor_type: row.get(3)?,
                        agent_id: row.get(4)?,
                        user_email: row.get(5)?,
                        branch: row.get(6)?,
                    })
                },
            )
            .optional()
            .context("query session")?;
        Ok(row)
    }

    /// Turns of a session, ordered by turn index.
    pub fn turns(&self, session_id: &str) -> Result<Vec<TurnRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT turn_index, role, content, COALESCE(ts, '')
             FROM turns WHERE session_id = ?1 ORDER BY turn_index",
        )?;
        let rows = stmt
            .query_map(params![session_id], |row| {
                Ok(TurnRow {
                    turn_index: row.get(0)?,
                    role: row.get(1)?,
                    content: row.get(2)?,
                    ts: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Tool calls of a session, ordered by call order.
    pub fn tool_calls(&self, session_id: &str) -> Result<Vec<ToolCallRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT call_order, tool, COALESCE(path, ''), COALESCE(cmd_prefix, '')
             FROM tool_calls WHERE session_id = ?1 ORDER BY call_order",
        )?;
        let rows = stmt
            .query_map(params![session_id], |row| {
                Ok(ToolCallRow {
                    call_order: row.get(0)?,
                    tool: row.get(1)?,
                    path: row.get(2)?,
                    cmd_prefix: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// `(file_path, change_type)` rows for a checkpoint.
    pub fn files_touched(&self, checkpoint_id: &str) -> Result<Vec<(String, String)>> {
        let mut stmt = self.conn.prepare(
            "SELECT file_path, change_type FROM files_touched WHERE checkpoint_id = ?1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![checkpoint_id], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Distinct file paths linked to a session via its checkpoints.
    pub fn files_for_session(&self, session_id: &str) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT ft.file_path
             FROM checkpoint_sessions cs
             JOIN files_touched ft ON ft.checkpoint_id = cs.checkpoint_id
             WHERE cs.session_id = ?1
             ORDER BY ft.file_path",
        )?;
        let rows = stmt
            .query_map(params![session_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(rows)
    }

    /// Checkpoints joined with session counts, newest first.
    pub fn checkpoint_log(&self, limit: i64) -> Result<Vec<LogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT c.id, c.git_sha, c.git_branch, c.user_email, c.ts, c.actor_type,
                    count(cs.session_id)
             FROM checkpoints c
             LEFT JOIN checkpoint_sessions cs ON cs.checkpoint_id = c.id
             GROUP BY c.id
             ORDER BY c.ts DESC
             LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit], |row| {
                Ok(LogEntry {
                    id: row.get(0)?,
                    git_sha: row.get(1)?,
                    git_branch: row.get(2)?,
                    user_email: row.get(3)?,
                    ts: row.get(4)?,
                    actor_type: row.get(5)?,
                    session_count: row.get(6)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Run a read-only SELECT and return one JSON object per row.
    pub fn query_json(&self, sql: &str) -> Result<Vec<serde_json::Value>> {
        query_json(&self.conn, sql)
    }
}

fn null_if_empty(s: &str) -> Option<&str> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, DataStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = DataStore::open_at(&dir.path().join("data.db")).unwrap();
        (dir, store)
    }

    fn seed_session(store: &DataStore, id: &str, hash: &str) {
        store
            .insert_session(
                id,
                "",
                hash,
                "human",
                "",
                "alice@example.com",
                "main",
                "2026-02-25T10:00:00+00:00",
            )
            .unwrap();
    }

    #[test]
    fn session_dedup_by_hash() {
        let (_dir, store) = store();
        seed_session(&store, "s1", "hash-1");

        assert!(store.session_exists_by_hash("hash-1").unwrap());
        assert!(!store.session_exists_by_hash("hash-2").unwrap());

        // Same hash again must fail: the content hash is the dedup key.
        let err = store.insert_session(
            "s2",
            "",
            "hash-1",
            "human",
            "",
            "alice@example.com",
            "main",
            "2026-02-25T10:00:00+00:00",
        );
        assert!(err.is_err());
    }

    #[test]
    fn turn_indices_are_unique_per_session() {
        let (_dir, store) = store();
        seed_session(&store, "s1", "hash-1");

        store.insert_turn("t0", "s1", 0, "human", "hello", "").unwrap();
        store.insert_turn("t1", "s1", 1, "assistant", "hi", "").unwrap();
        assert!(store.insert_turn("t2", "s1", 1, "human", "dup", "").is_err());

        let turns = store.turns("s1").unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].turn_index, 0);
        assert_eq!(turns[1].turn_index, 1);
        assert_eq!(turns[1].content, "hi");
    }

    #[test]
    fn unexported_then_marked() {
        let (_dir, store) = store();
        store
            .insert_checkpoint(
                "cp1",
                &"a".repeat(40),
                "main",
                "alice@example.com",
                "2026-02-25T10:00:00+00:00",
                "human",
                "",
                false,
            )
            .unwrap();
        store
            .insert_checkpoint(
                "cp2",
                &"b".repeat(40),
                "main",
                "alice@example.com",
                "2026-02-25T11:00:00+00:00",
                "human",
                "",
                false,
            )
            .unwrap();

        let unexported = store.unexported_checkpoints().unwrap();
        assert_eq!(unexported.len(), 2);
        assert_eq!(unexported[0].id, "cp1"); // ordered by ts

        store.mark_exported(&["cp1".to_owned()]).unwrap();
        let unexported = store.unexported_checkpoints().unwrap();
        assert_eq!(unexported.len(), 1);
        assert_eq!(unexported[0].id, "cp2");
    }

    #[test]
    fn checkpoint_state_cache_roundtrip() {
        let (_dir, store) = store();
        assert!(store.get_checkpoint_state("/tmp/x.jsonl").unwrap().is_none());

        store
            .upsert_checkpoint_state("/tmp/x.jsonl", 1234, "hash-a")
            .unwrap();
        assert_eq!(
            store.get_checkpoint_state("/tmp/x.jsonl").unwrap(),
            Some((1234, "hash-a".to_owned()))
        );

        store
            .upsert_checkpoint_state("/tmp/x.jsonl", 5678, "hash-b")
            .unwrap();
        assert_eq!(
            store.get_checkpoint_state("/tmp/x.jsonl").unwrap(),
            Some((5678, "hash-b".to_owned()))
        );
    }

    #[test]
    fn link_and_files_for_session() {
        let (_dir, store) = store();
        seed_session(&store, "s1", "hash-1");
        store
            .insert_checkpoint(
                "cp1",
                &"a".repeat(40),
                "main",
                "alice@example.com",
                "2026-02-25T10:00:00+00:00",
                "human",
                "",
                false,
            )
            .unwrap();
        store.link_checkpoint_session("cp1", "s1").unwrap();
        store
            .insert_file_touched("f1", "cp1", "src/auth.rs", "M")
            .unwrap();
        store
            .insert_file_touched("f2", "cp1", "src/login.rs", "T")
            .unwrap();

        assert_eq!(store.sessions_for_checkpoint("cp1").unwrap(), vec!["s1"]);
        assert_eq!(
            store.files_for_session("s1").unwrap(),
            vec!["src/auth.rs", "src/login.rs"]
        );

        let log = store.checkpoint_log(10).unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].session_count, 1);
    }

    #[test]
    fn query_json_rows() {
        let (_dir, store) = store();
        seed_session(&store, "s1", "hash-1");

        let rows = store
            .query_json("SELECT id, actor_type FROM sessions")
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], "s1");
        assert_eq!(rows[0]["actor_type"], "human");
    }
}
