//! Model backend contract and implementations.

pub mod ollama;
#[cfg(any(test, feature = "test-support"))]
pub mod scripted;

pub use ollama::OllamaClient;
#[cfg(any(test, feature = "test-support"))]
pub use scripted::{ScriptedBackend, ScriptedReply};

use std::future::Future;

use futures_util::stream::BoxStream;
use serde::Serialize;

use crate::error::Result;
use crate::state::ChatMessage;

/// Content fragments as they arrive from the backend.
pub type FragmentStream = BoxStream<'static, Result<String>>;

/// Sampling settings sent with every call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GenerationOptions {
    pub temperature: f32,
    pub num_ctx: u32,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            num_ctx: 8192,
        }
    }
}

/// Ask the backend to unload the model as soon as the call finishes.
pub const EVICT_IMMEDIATELY: &str = "0s";

#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub options: GenerationOptions,
    pub keep_alive: Option<String>,
}

impl ChatRequest {
    pub fn new(model: &str, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.to_string(),
            messages,
            options: GenerationOptions::default(),
            keep_alive: Some(EVICT_IMMEDIATELY.to_string()),
        }
    }
}

/// What the session needs from a chat model.
pub trait ChatBackend {
    /// Start a streamed completion; fragments are yielded as they arrive.
    fn stream_chat(
        &self,
        request: &ChatRequest,
    ) -> impl Future<Output = Result<FragmentStream>> + Send;

    /// Single non-streamed completion.
    fn complete(&self, request: &ChatRequest) -> impl Future<Output = Result<String>> + Send;
}
