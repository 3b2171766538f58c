//! Detection of `TOOL_REQUEST:` directives in assistant output.
//!
//! The host executes tools; the session only needs to know whether a reply
//! asked for one.

use serde::Deserialize;
use serde_json::{Map, Value};

pub const TOOL_REQUEST_MARKER: &str = "TOOL_REQUEST:";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ToolRequest {
    pub tool: String,
    #[serde(default)]
    pub params: Map<String, Value>,
}

/// Extract the first complete tool request after the marker, if any.
pub fn extract(text: &str) -> Option<ToolRequest> {
    let start = text.find(TOOL_REQUEST_MARKER)? + TOOL_REQUEST_MARKER.len();
    let tail = &text[start..];
    let open = tail.find('{')?;
    let end = balanced_object_end(&tail[open..])?;

    serde_json::from_str(&tail[open..open + end]).ok()
}

/// Byte length of the JSON object at the start of `text`, counting braces
/// outside of string literals.
fn balanced_object_end(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }

    None
}
