//! `rekal query`: raw read-only SQL, or a session drill-down.

use anyhow::{bail, Result};
use serde::Serialize;

use rekal_store::{DataStore, IndexStore};

use crate::git;
use crate::paths::ensure_init_done;

#[derive(Serialize)]
struct SessionOutput {
    session_id: String,
    author: String,
    actor: String,
    branch: String,
    captured_at: String,
    turns: Vec<TurnOutput>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<ToolCallOutput>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    files_touched: Vec<String>,
}

#[derive(Serialize)]
struct TurnOutput {
    index: i64,
    role: String,
    content: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    ts: String,
}

#[derive(Serialize)]
struct ToolCallOutput {
    order: i64,
    tool: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    path: String,
}

pub fn run(sql: Option<String>, use_index: bool, session: Option<String>, full: bool) -> Result<()> {
    let git_root = git::git_root()?;
    ensure_init_done(&git_root)?;

    if let Some(session_id) = session {
        if sql.is_some() {
            bail!("--session and a sql argument are mutually exclusive");
        }
        return run_drilldown(&git_root, &session_id, full);
    }

    let Some(sql) = sql else {
        bail!("provide a sql query or use --session <id>");
    };

    // Read-only surface: anything that is not a SELECT is rejected.
    if !sql.trim_start().to_uppercase().starts_with("SELECT") {
        bail!("only select statements are allowed");
    }

    let rows = if use_index {
        IndexStore::open(&git_root)?.query_json(&sql)?
    } else {
        DataStore::open(&git_root)?.query_json(&sql)?
    };

    for row in rows {
        println!("{}", serde_json::to_string(&row)?);
    }
    Ok(())
}

fn run_drilldown(git_root: &std::path::Path, session_id: &str, full: bool) -> Result<()> {
    let data = DataStore::open(git_root)?;

    let Some(session) = data.session(session_id)? else {
        bail!("session not found: {session_id}");
    };

    let turns = data
        .turns(session_id)?
        .into_iter()
        .map(|turn| TurnOutput {
            index: turn.turn_index,
            role: turn.role,
            content: turn.content,
            ts: turn.ts,
        })
        .collect();

    let (tool_calls, files_touched) = if full {
        let calls = data
            .tool_calls(session_id)?
            .into_iter()
            .map(|call| ToolCallOutput {
                order: call.call_order,
                tool: call.tool,
                path: call.path,
            })
            .collect();
        (calls, data.files_for_session(session_id)?)
    } else {
        (Vec::new(), Vec::new())
    };

    let output = SessionOutput {
        session_id: session.id,
        author: session.user_email,
        actor: session.actor_type,
        branch: session.branch,
        captured_at: session.captured_at,
        turns,
        tool_calls,
        files_touched,
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
