//! Streaming transcript parser.
//!
//! Consumes newline-delimited JSON records from an AI host session file and
//! extracts conversation turns and tool calls, discarding tool results,
//! thinking blocks, file-history snapshots, and sidechain messages.
//! Malformed lines are skipped; the parser never fails the whole file.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::value::RawValue;

use crate::error::Result;
use crate::types::{ActorKind, Role, SessionPayload, ToolCall, Turn};

/// Command prefixes are truncated to this many bytes at capture time.
pub const CMD_PREFIX_MAX: usize = 100;

const PLAN_PATH_MARKER: &str = ".claude/plans/";

/// Top-level structure of a JSONL line from a host session file.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLine<'a> {
    #[serde(default)]
    session_id: String,
    #[serde(default)]
    timestamp: String,
    #[serde(rename = "type", default)]
    line_type: String,
    #[serde(borrow)]
    message: Option<&'a RawValue>,
    #[serde(default)]
    git_branch: String,
    #[serde(default)]
    is_sidechain: bool,
}

/// The `message` field within a line.
#[derive(Deserialize)]
struct RawMessage<'a> {
    #[serde(default)]
    role: String,
    #[serde(borrow)]
    content: Option<&'a RawValue>,
}

/// A single block in a content array. Also covers tool_result blocks
/// in user messages.
#[derive(Deserialize, Default)]
struct ContentBlock<'a> {
    #[serde(rename = "type", default)]
    block_type: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    id: String,
    #[serde(default)]
    tool_use_id: String,
    #[serde(borrow)]
    input: Option<&'a RawValue>,
    #[serde(borrow)]
    content: Option<&'a RawValue>,
}

/// Common fields from tool_use input blocks.
#[derive(Deserialize, Default)]
struct ToolInput {
    #[serde(default)]
    file_path: String,
    #[serde(default)]
    path: String,
    #[serde(default)]
    command: String,
    #[serde(default)]
    content: String,
}

/// Parse raw JSONL bytes into a [`SessionPayload`].
pub fn parse_transcript(data: &[u8]) -> Result<SessionPayload> {
    let mut payload = SessionPayload {
        actor: ActorKind::Human,
        ..SessionPayload::default()
    };

    // tool_use ids for Read calls targeting plan files; the matching
    // tool_result in a later user message carries the plan text.
    let mut pending_plan_reads: HashSet<String> = HashSet::new();

    let text = String::from_utf8_lossy(data);
    for line in text.lines() {
        if line.is_empty() {
            continue;
        }

        let Ok(raw) = serde_json::from_str::<RawLine<'_>>(line) else {
            continue;
        };

        if raw.is_sidechain || raw.line_type == "file-history-snapshot" {
            continue;
        }

        // Session metadata comes from the first line that has it.
        if payload.session_id.is_empty() && !raw.session_id.is_empty() {
            payload.session_id = raw.session_id;
        }
        if payload.branch.is_empty() && !raw.git_branch.is_empty() {
            payload.branch = raw.git_branch;
        }

        let ts = parse_timestamp(&raw.timestamp);
        let Some(message) = raw.message else {
            continue;
        };

        match raw.line_type.as_str() {
            "user" => parse_user_record(message, ts, &mut payload, &mut pending_plan_reads),
            "assistant" => parse_assistant_record(message, ts, &mut payload, &mut pending_plan_reads),
            _ => {}
        }
    }

    payload.captured_at = Some(Utc::now());
    Ok(payload)
}

/// Extract the text content of a user record as a single human turn.
/// tool_result blocks are skipped, except those matching a pending plan
/// read — their text is emitted as an assistant turn first.
fn parse_user_record(
    message: &RawValue,
    ts: Option<DateTime<Utc>>,
    payload: &mut SessionPayload,
    pending_plan_reads: &mut HashSet<String>,
) {
    let Ok(msg) = serde_json::from_str::<RawMessage<'_>>(message.get()) else {
        return;
    };
    if msg.role != "user" {
        return;
    }
    let Some(content) = msg.content else {
        return;
    };

    if !pending_plan_reads.is_empty() {
        for text in plan_tool_result_texts(content, pending_plan_reads) {
            payload.turns.push(Turn {
                role: Role::Assistant,
                content: text,
                timestamp: ts,
            });
        }
    }

    let text = extract_text_content(content);
    if !text.is_empty() {
        payload.turns.push(Turn {
            role: Role::Human,
            content: text,
            timestamp: ts,
        });
    }
}

/// Extract text turns and tool calls from an assistant record.
/// Thinking blocks and tool results are discarded.
fn parse_assistant_record(
    message: &RawValue,
    ts: Option<DateTime<Utc>>,
    payload: &mut SessionPayload,
    pending_plan_reads: &mut HashSet<String>,
) {
    let Ok(msg) = serde_json::from_str::<RawMessage<'_>>(message.get()) else {
        return;
    };
    if msg.role != "assistant" {
        return;
    }
    let Some(content) = msg.content else {
        return;
    };

    // Content is either a plain string or an array of typed blocks.
    if let Ok(text) = serde_json::from_str::<String>(content.get()) {
        if !text.is_empty() {
            payload.turns.push(Turn {
                role: Role::Assistant,
                content: text,
                timestamp: ts,
            });
        }
        return;
    }

    let Ok(blocks) = serde_json::from_str::<Vec<ContentBlock<'_>>>(content.get()) else {
        return;
    };

    let mut text_parts: Vec<&str> = Vec::new();
    for block in &blocks {
        match block.block_type.as_str() {
            "text" => {
                if !block.text.is_empty() {
                    text_parts.push(&block.text);
                }
            }
            "tool_use" => {
                let input = block
                    .input
                    .and_then(|raw| serde_json::from_str::<ToolInput>(raw.get()).ok())
                    .unwrap_or_default();

                // Plan files written by the assistant are searchable context.
                if let Some(plan) = plan_content(block, &input) {
                    payload.turns.push(Turn {
                        role: Role::Assistant,
                        content: plan,
                        timestamp: ts,
                    });
                }
                if is_plan_read(block, &input) {
                    pending_plan_reads.insert(block.id.clone());
                }

                payload.tool_calls.push(extract_tool_call(block, &input));
            }
            // "thinking", "tool_result" and anything else: discarded.
            _ => {}
        }
    }

    if !text_parts.is_empty() {
        payload.turns.push(Turn {
            role: Role::Assistant,
            content: text_parts.join("\n"),
            timestamp: ts,
        });
    }
}

/// Pull text from a content field, which is a plain string or an array of
/// blocks. Only text blocks contribute.
fn extract_text_content(content: &RawValue) -> String {
    if let Ok(text) = serde_json::from_str::<String>(content.get()) {
        return text;
    }
    let Ok(blocks) = serde_json::from_str::<Vec<ContentBlock<'_>>>(content.get()) else {
        return String::new();
    };
    blocks
        .iter()
        .filter(|b| b.block_type == "text" && !b.text.is_empty())
        .map(|b| b.text.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

fn extract_tool_call(block: &ContentBlock<'_>, input: &ToolInput) -> ToolCall {
    let path = if !input.file_path.is_empty() {
        input.file_path.clone()
    } else {
        input.path.clone()
    };
    let cmd_prefix = if input.command.is_empty() {
        String::new()
    } else {
        truncate_bytes(&input.command, CMD_PREFIX_MAX)
    };
    ToolCall {
        tool: block.name.clone(),
        path,
        cmd_prefix,
    }
}

/// Plan text from a Write/Edit tool_use targeting a plan file, if any.
fn plan_content(block: &ContentBlock<'_>, input: &ToolInput) -> Option<String> {
    if block.name != "Write" && block.name != "Edit" {
        return None;
    }
    let path = tool_path(input);
    if !path.contains(PLAN_PATH_MARKER) || input.content.is_empty() {
        return None;
    }
    Some(input.content.clone())
}

fn is_plan_read(block: &ContentBlock<'_>, input: &ToolInput) -> bool {
    block.name == "Read" && !block.id.is_empty() && tool_path(input).contains(PLAN_PATH_MARKER)
}

fn tool_path<'a>(input: &'a ToolInput) -> &'a str {
    if !input.file_path.is_empty() {
        &input.file_path
    } else {
        &input.path
    }
}

/// Texts of tool_result blocks whose id matches a pending plan read.
/// Matched ids are removed from the pending set.
fn plan_tool_result_texts(content: &RawValue, pending: &mut HashSet<String>) -> Vec<String> {
    let Ok(blocks) = serde_json::from_str::<Vec<ContentBlock<'_>>>(content.get()) else {
        return Vec::new();
    };

    let mut texts = Vec::new();
    for block in &blocks {
        if block.block_type != "tool_result" || !pending.contains(&block.tool_use_id) {
            continue;
        }
        if let Some(inner) = block.content {
            let text = extract_text_content(inner);
            if !text.is_empty() {
                texts.push(text);
            }
        }
        pending.remove(&block.tool_use_id);
    }
    texts
}

/// Truncate to at most `max` bytes without splitting a UTF-8 sequence.
fn truncate_bytes(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_owned();
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_owned()
}

/// RFC 3339 with or without fractional seconds; anything else is absent.
fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if s.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = concat!(
        r#"{"uuid":"a1","sessionId":"sess-001","timestamp":"2025-01-15T10:00:00Z","type":"user","message":{"role":"user","content":"Add a login page"},"cwd":"/tmp/repo","gitBranch":"main"}"#,
        "\n",
        r#"{"uuid":"a2","sessionId":"sess-001","timestamp":"2025-01-15T10:00:05Z","type":"assistant","message":{"role":"assistant","content":[{"type":"text","text":"I'll create a login page for you."},{"type":"tool_use","name":"Write","input":{"file_path":"src/login.tsx","content":"export default function Login() {}"}}]},"gitBranch":"main"}"#,
        "\n",
        r#"{"uuid":"a3","sessionId":"sess-001","timestamp":"2025-01-15T10:00:10Z","type":"user","message":{"role":"user","content":[{"type":"tool_result","tool_use_id":"tu1","content":"File written"}]},"gitBranch":"main"}"#,
        "\n",
        r#"{"uuid":"a4","sessionId":"sess-001","timestamp":"2025-01-15T10:00:15Z","type":"assistant","message":{"role":"assistant","content":[{"type":"text","text":"Done."},{"type":"tool_use","name":"Bash","input":{"command":"npm run build"}}]},"gitBranch":"main"}"#,
        "\n",
        r#"{"uuid":"a5","sessionId":"sess-001","timestamp":"2025-01-15T10:00:20Z","type":"file-history-snapshot","message":{},"gitBranch":"main"}"#,
        "\n",
        r#"{"uuid":"a6","sessionId":"sess-001","timestamp":"2025-01-15T10:00:25Z","type":"assistant","message":{"role":"assistant","content":"Build succeeded."},"gitBranch":"main","isSidechain":true}"#,
        "\n",
    );

    #[test]
    fn parses_turns_and_tool_calls() {
        let payload = parse_transcript(FIXTURE.as_bytes()).unwrap();

        assert_eq!(payload.session_id, "sess-001");
        assert_eq!(payload.branch, "main");
        assert_eq!(payload.actor, ActorKind::Human);

        // 1 user prompt + 2 assistant text turns. The tool_result-only user
        // message and the sidechain line are filtered out.
        assert_eq!(payload.turns.len(), 3);
        assert_eq!(payload.turns[0].role, Role::Human);
        assert_eq!(payload.turns[0].content, "Add a login page");
        assert_eq!(payload.turns[1].role, Role::Assistant);
        assert_eq!(payload.turns[1].content, "I'll create a login page for you.");
        assert_eq!(payload.turns[2].content, "Done.");

        assert_eq!(payload.tool_calls.len(), 2);
        assert_eq!(payload.tool_calls[0].tool, "Write");
        assert_eq!(payload.tool_calls[0].path, "src/login.tsx");
        assert_eq!(payload.tool_calls[1].tool, "Bash");
        assert_eq!(payload.tool_calls[1].cmd_prefix, "npm run build");
    }

    #[test]
    fn empty_input_yields_nothing() {
        let payload = parse_transcript(b"").unwrap();
        assert!(payload.turns.is_empty());
        assert!(payload.tool_calls.is_empty());
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let input = concat!(
            "not json at all\n",
            r#"{"sessionId":"s1","timestamp":"2025-01-15T10:00:00Z","type":"user","message":{"role":"user","content":"hello"},"gitBranch":"dev"}"#,
            "\n",
            "also not json\n",
        );
        let payload = parse_transcript(input.as_bytes()).unwrap();
        assert_eq!(payload.turns.len(), 1);
        assert_eq!(payload.turns[0].content, "hello");
        assert_eq!(payload.branch, "dev");
    }

    #[test]
    fn cmd_prefix_truncates_to_100_bytes() {
        let long_cmd = "x".repeat(150);
        let line = format!(
            r#"{{"sessionId":"s2","timestamp":"2025-01-15T10:00:00Z","type":"assistant","message":{{"role":"assistant","content":[{{"type":"tool_use","name":"Bash","input":{{"command":"{long_cmd}"}}}}]}},"gitBranch":"main"}}"#,
        );
        let payload = parse_transcript(line.as_bytes()).unwrap();
        assert_eq!(payload.tool_calls.len(), 1);
        assert_eq!(payload.tool_calls[0].cmd_prefix.len(), 100);
    }

    #[test]
    fn malformed_timestamp_is_dropped() {
        let line = r#"{"sessionId":"s3","timestamp":"yesterday at noon","type":"user","message":{"role":"user","content":"hi"},"gitBranch":"main"}"#;
        let payload = parse_transcript(line.as_bytes()).unwrap();
        assert_eq!(payload.turns.len(), 1);
        assert!(payload.turns[0].timestamp.is_none());
    }

    #[test]
    fn plan_write_content_becomes_assistant_turn() {
        let line = r#"{"sessionId":"s4","timestamp":"2025-01-15T10:00:00Z","type":"assistant","message":{"role":"assistant","content":[{"type":"tool_use","name":"Write","input":{"file_path":"/repo/.claude/plans/refactor.md","content":"Plan: split the auth module"}}]},"gitBranch":"main"}"#;
        let payload = parse_transcript(line.as_bytes()).unwrap();
        assert_eq!(payload.turns.len(), 1);
        assert_eq!(payload.turns[0].role, Role::Assistant);
        assert_eq!(payload.turns[0].content, "Plan: split the auth module");
        assert_eq!(payload.tool_calls.len(), 1);
    }

    #[test]
    fn plan_read_result_is_captured() {
        let input = concat!(
            r#"{"sessionId":"s5","timestamp":"2025-01-15T10:00:00Z","type":"assistant","message":{"role":"assistant","content":[{"type":"tool_use","id":"tu9","name":"Read","input":{"file_path":"/repo/.claude/plans/plan.md"}}]},"gitBranch":"main"}"#,
            "\n",
            r#"{"sessionId":"s5","timestamp":"2025-01-15T10:00:05Z","type":"user","message":{"role":"user","content":[{"type":"tool_result","tool_use_id":"tu9","content":"Plan body here"}]},"gitBranch":"main"}"#,
            "\n",
        );
        let payload = parse_transcript(input.as_bytes()).unwrap();
        assert_eq!(payload.turns.len(), 1);
        assert_eq!(payload.turns[0].role, Role::Assistant);
        assert_eq!(payload.turns[0].content, "Plan body here");
    }

    #[test]
    fn non_plan_tool_results_are_discarded() {
        let input = concat!(
            r#"{"sessionId":"s6","timestamp":"2025-01-15T10:00:00Z","type":"assistant","message":{"role":"assistant","content":[{"type":"tool_use","id":"tu1","name":"Read","input":{"file_path":"src/main.rs"}}]},"gitBranch":"main"}"#,
            "\n",
            r#"{"sessionId":"s6","timestamp":"2025-01-15T10:00:05Z","type":"user","message":{"role":"user","content":[{"type":"tool_result","tool_use_id":"tu1","content":"fn main() {}"}]},"gitBranch":"main"}"#,
            "\n",
        );
        let payload = parse_transcript(input.as_bytes()).unwrap();
        assert!(payload.turns.is_empty());
        assert_eq!(payload.tool_calls.len(), 1);
    }
}
