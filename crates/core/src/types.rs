//! Domain types for captured sessions and checkpoints.

use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RekalError;

/// Who owns a session: a human user or an automated agent.
///
/// Independent of per-turn [`Role`] — an agent-owned session still has
/// human-role turns for the prompts that drove it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActorKind {
    Human,
    Agent,
}

impl ActorKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match *self {
            Self::Human => "human",
            Self::Agent => "agent",
        }
    }
}

impl Default for ActorKind {
    fn default() -> Self {
        Self::Human
    }
}

impl Display for ActorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActorKind {
    type Err = RekalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "human" => Ok(Self::Human),
            "agent" => Ok(Self::Agent),
            _ => Err(RekalError::InvalidValue(format!("actor kind: {s}"))),
        }
    }
}

/// Speaker of a single conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Human,
    Assistant,
}

impl Role {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match *self {
            Self::Human => "human",
            Self::Assistant => "assistant",
        }
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = RekalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "human" => Ok(Self::Human),
            "assistant" => Ok(Self::Assistant),
            _ => Err(RekalError::InvalidValue(format!("role: {s}"))),
        }
    }
}

/// How a file was touched by a checkpoint.
///
/// `A`/`M`/`D`/`R` come from `git diff --name-status`; `T` marks a path
/// derived from a write-class tool call rather than the git diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
    Renamed,
    ToolDerived,
}

impl ChangeKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match *self {
            Self::Added => "A",
            Self::Modified => "M",
            Self::Deleted => "D",
            Self::Renamed => "R",
            Self::ToolDerived => "T",
        }
    }
}

/// A parsed, filtered transcript ready for insertion into the data store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionPayload {
    /// Opaque session id from the AI host (may collide across users).
    pub session_id: String,
    pub turns: Vec<Turn>,
    pub tool_calls: Vec<ToolCall>,
    /// Git branch at capture, from the transcript metadata.
    pub branch: String,
    /// Wall clock at parse end.
    pub captured_at: Option<DateTime<Utc>>,
    pub actor: ActorKind,
    /// Agent identifier; empty for human sessions.
    pub agent_id: String,
}

/// One conversation turn within a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    /// Absent when the transcript record carried no (or a malformed) timestamp.
    pub timestamp: Option<DateTime<Utc>>,
}

/// One tool invocation extracted from assistant content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Tool name as a free string (enumerated only at the wire layer).
    pub tool: String,
    /// File path argument if the tool took one.
    pub path: String,
    /// First 100 bytes of the command for Bash-like tools.
    pub cmd_prefix: String,
}

/// Tool names whose calls imply a file write, used to supplement
/// files-touched rows beyond the git diff.
pub const WRITE_CLASS_TOOLS: &[&str] = &["Write", "Edit", "NotebookEdit"];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actor_kind_roundtrip() {
        assert_eq!("human".parse::<ActorKind>().unwrap(), ActorKind::Human);
        assert_eq!("agent".parse::<ActorKind>().unwrap(), ActorKind::Agent);
        assert_eq!(ActorKind::Agent.as_str(), "agent");
        assert!("robot".parse::<ActorKind>().is_err());
    }

    #[test]
    fn role_roundtrip() {
        assert_eq!("assistant".parse::<Role>().unwrap(), Role::Assistant);
        assert_eq!(Role::Human.as_str(), "human");
        assert!("system".parse::<Role>().is_err());
    }

    #[test]
    fn change_kind_letters() {
        assert_eq!(ChangeKind::Added.as_str(), "A");
        assert_eq!(ChangeKind::ToolDerived.as_str(), "T");
    }
}
