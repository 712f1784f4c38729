//! Index rebuild: drop, recreate, and repopulate the derived store from
//! the authoritative data store.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use crate::index::{IndexStore, INDEX_DDL, INDEX_TABLES};

impl IndexStore {
    /// Drop and recreate every index table, then bulk-populate from the
    /// data store. The data store is attached read-only for the duration;
    /// the drop + recreate + load runs as one transaction.
    pub fn rebuild_from_data(&mut self, git_root: &Path) -> Result<()> {
        let data_path = git_root.join(".rekal").join("data.db");
        let git_root_prefix = format!("{}/", git_root.display());

        // ATTACH cannot run inside a transaction.
        let uri = format!("file:{}?mode=ro", data_path.display());
        self.conn
            .execute("ATTACH DATABASE ?1 AS data_db", [&uri])
            .context("attach data store")?;

        let result = self.populate_attached(&git_root_prefix);

        // Always detach, even when population failed.
        let detach = self.conn.execute("DETACH DATABASE data_db", []);
        result?;
        detach.context("detach data store")?;
        Ok(())
    }

    fn populate_attached(&self, git_root_prefix: &str) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;

        info!("dropping index tables");
        for table in INDEX_TABLES {
            tx.execute_batch(&format!("DROP TABLE IF EXISTS {table}"))?;
        }
        tx.execute_batch(INDEX_DDL)?;

        tx.execute(
            "INSERT INTO turns_ft (id, session_id, turn_index, role, content, ts)
             SELECT id, session_id, turn_index, role, content, ts
             FROM data_db.turns",
            [],
        )
        .context("populate turns_ft")?;

        tx.execute(
            "INSERT INTO tool_calls_index (id, session_id, call_order, tool, path, cmd_prefix)
             SELECT id, session_id, call_order, tool, path, cmd_prefix
             FROM data_db.tool_calls",
            [],
        )
        .context("populate tool_calls_index")?;

        // Denormalize session ids onto file rows via the link table.
        tx.execute(
            "INSERT INTO files_index (checkpoint_id, session_id, file_path, change_type)
             SELECT ft.checkpoint_id, cs.session_id, ft.file_path, ft.change_type
             FROM data_db.files_touched ft
             JOIN data_db.checkpoint_sessions cs ON cs.checkpoint_id = ft.checkpoint_id",
            [],
        )
        .context("populate files_index")?;

        // Supplement with write-class tool-call paths under the git root;
        // covers rows checkpointed before capture started tagging them.
        tx.execute(
            "INSERT INTO files_index (checkpoint_id, session_id, file_path, change_type)
             SELECT DISTINCT cs.checkpoint_id, tc.session_id,
                    substr(tc.path, length(?1) + 1), 'T'
             FROM data_db.tool_calls tc
             JOIN data_db.checkpoint_sessions cs ON cs.session_id = tc.session_id
             WHERE tc.tool IN ('Write', 'Edit', 'NotebookEdit')
               AND tc.path IS NOT NULL AND length(tc.path) > 0
               AND substr(tc.path, 1, length(?1)) = ?1
               AND NOT EXISTS (
                 SELECT 1 FROM files_index fi
                 WHERE fi.checkpoint_id = cs.checkpoint_id
                   AND fi.session_id = tc.session_id
                   AND fi.file_path = substr(tc.path, length(?1) + 1)
               )",
            [git_root_prefix],
        )
        .context("populate files_index from tool_calls")?;

        tx.execute(
            "INSERT INTO session_facets (
                session_id, user_email, git_branch, actor_type, agent_id,
                captured_at, turn_count, tool_call_count, file_count,
                checkpoint_id, git_sha
             )
             SELECT
                s.id,
                s.user_email,
                COALESCE(c.git_branch, s.branch),
                s.actor_type,
                s.agent_id,
                s.captured_at,
                (SELECT count(*) FROM data_db.turns t WHERE t.session_id = s.id),
                (SELECT count(*) FROM data_db.tool_calls tc WHERE tc.session_id = s.id),
                COALESCE(fc.file_count, 0),
                c.id,
                c.git_sha
             FROM data_db.sessions s
             LEFT JOIN data_db.checkpoint_sessions cs ON cs.session_id = s.id
             LEFT JOIN data_db.checkpoints c ON c.id = cs.checkpoint_id
             LEFT JOIN (
                SELECT cs2.session_id, count(DISTINCT ft.file_path) AS file_count
                FROM data_db.checkpoint_sessions cs2
                JOIN data_db.files_touched ft ON ft.checkpoint_id = cs2.checkpoint_id
                GROUP BY cs2.session_id
             ) fc ON fc.session_id = s.id",
            [],
        )
        .context("populate session_facets")?;

        // Unordered file pairs co-touched within a session.
        tx.execute(
            "INSERT INTO file_cooccurrence (file_a, file_b, count)
             SELECT a.path, b.path, count(*)
             FROM data_db.tool_calls a
             JOIN data_db.tool_calls b
               ON a.session_id = b.session_id AND a.path < b.path
             WHERE a.path IS NOT NULL AND a.path != ''
               AND b.path IS NOT NULL AND b.path != ''
             GROUP BY a.path, b.path",
            [],
        )
        .context("populate file_cooccurrence")?;

        tx.commit().context("commit index rebuild")?;
        Ok(())
    }

    /// Rebuild the FTS index over the freshly loaded turn rows.
    pub fn rebuild_fts(&self) -> Result<()> {
        self.conn
            .execute("INSERT INTO turns_fts(turns_fts) VALUES('rebuild')", [])
            .context("rebuild fts index")?;
        Ok(())
    }
}
