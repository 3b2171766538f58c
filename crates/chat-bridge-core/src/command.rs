//! Classification of inbound host lines.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::error::PayloadError;
use crate::state::{ChatMessage, ChatRole};

pub const TOOL_RESULT_PREFIX: &str = "TOOL_RESULT:";
pub const RESTORE_PREFIX: &str = "RESTORE_AND_GREET:";
pub const SUMMARIZE_PREFIX: &str = "SUMMARIZE:";
pub const EXIT_COMMAND: &str = "EXIT";

/// One parsed host line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    ToolResult(String),
    RestoreAndGreet(Result<Vec<ChatMessage>, PayloadError>),
    Summarize(Result<SummarizeRequest, PayloadError>),
    Exit,
    PlainMessage(String),
}

impl Command {
    pub fn kind(&self) -> &'static str {
        match self {
            Command::ToolResult(_) => "tool_result",
            Command::RestoreAndGreet(_) => "restore_and_greet",
            Command::Summarize(_) => "summarize",
            Command::Exit => "exit",
            Command::PlainMessage(_) => "plain_message",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SummarizeRequest {
    #[serde(default, deserialize_with = "lenient_text")]
    pub previous_summary: String,
    #[serde(default)]
    pub messages: Vec<TranscriptTurn>,
}

/// A loosely typed turn handed over for summarization. Non-string values
/// are kept as their JSON text rather than rejected.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TranscriptTurn {
    #[serde(default = "unknown_role", deserialize_with = "lenient_text")]
    pub role: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub content: String,
}

fn unknown_role() -> String {
    "unknown".to_string()
}

fn lenient_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(text) => text,
        other => other.to_string(),
    })
}

pub fn parse(line: &str) -> Command {
    let line = line.trim();

    if let Some(rest) = line.strip_prefix(TOOL_RESULT_PREFIX) {
        return Command::ToolResult(rest.trim().to_string());
    }
    if let Some(rest) = line.strip_prefix(RESTORE_PREFIX) {
        return Command::RestoreAndGreet(parse_restored_turns(rest.trim()));
    }
    if let Some(rest) = line.strip_prefix(SUMMARIZE_PREFIX) {
        return Command::Summarize(parse_summarize(rest.trim()));
    }
    if line == EXIT_COMMAND {
        return Command::Exit;
    }

    Command::PlainMessage(line.to_string())
}

/// Restored turns must all be user/assistant entries with string content;
/// a single bad entry rejects the whole payload.
fn parse_restored_turns(payload: &str) -> Result<Vec<ChatMessage>, PayloadError> {
    let entries: Vec<Value> = serde_json::from_str(payload)?;

    entries
        .iter()
        .enumerate()
        .map(|(index, entry)| {
            let role = entry
                .get("role")
                .and_then(|v| v.as_str())
                .ok_or(PayloadError::MissingField {
                    index,
                    field: "role",
                })?;
            let content = entry
                .get("content")
                .and_then(|v| v.as_str())
                .ok_or(PayloadError::MissingField {
                    index,
                    field: "content",
                })?;

            match ChatRole::from_str(role) {
                Some(role @ (ChatRole::User | ChatRole::Assistant)) => Ok(ChatMessage {
                    role,
                    content: content.to_string(),
                }),
                _ => Err(PayloadError::Role {
                    index,
                    role: role.to_string(),
                }),
            }
        })
        .collect()
}

fn parse_summarize(payload: &str) -> Result<SummarizeRequest, PayloadError> {
    Ok(serde_json::from_str(payload)?)
}
