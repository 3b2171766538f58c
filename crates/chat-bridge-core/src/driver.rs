//! Streaming generation: forward fragments to the host as they arrive and
//! hand the raw text back for the history.

use std::io::Write;

use futures_util::StreamExt;

use crate::ai::{ChatBackend, ChatRequest};
use crate::error::{BridgeError, Result};
use crate::protocol::{LineWriter, Outbound};

/// Run one generation call.
///
/// Always emits `[Thinking]` first and `[DONE]` last. On a backend failure
/// the error message is shown and returned in place of any partial reply.
/// Only output errors are returned as `Err`.
pub async fn stream_chat<B, W>(
    backend: &B,
    out: &mut LineWriter<W>,
    request: &ChatRequest,
) -> Result<String>
where
    B: ChatBackend,
    W: Write,
{
    out.emit(&Outbound::Thinking)?;

    let mut full_response = String::new();
    let outcome = forward_fragments(backend, out, request, &mut full_response).await;

    match outcome {
        Ok(()) => {}
        Err(BridgeError::Io(e)) => return Err(BridgeError::Io(e)),
        Err(e) => {
            tracing::warn!(model = %request.model, error = %e, "generation failed");
            let error_msg = format!("Backend error: {}", e);
            // Start on a fresh line after partial output.
            let visible = if full_response.is_empty() {
                error_msg.clone()
            } else {
                format!("\n{}", error_msg)
            };
            out.emit(&Outbound::Token(visible))?;
            full_response = error_msg;
        }
    }

    out.emit(&Outbound::Done)?;
    Ok(full_response)
}

async fn forward_fragments<B, W>(
    backend: &B,
    out: &mut LineWriter<W>,
    request: &ChatRequest,
    full_response: &mut String,
) -> Result<()>
where
    B: ChatBackend,
    W: Write,
{
    let mut fragments = backend.stream_chat(request).await?;

    while let Some(fragment) = fragments.next().await {
        let content = fragment?;
        if content.is_empty() {
            continue;
        }
        full_response.push_str(&content);
        out.emit(&Outbound::Token(content))?;
    }

    Ok(())
}
