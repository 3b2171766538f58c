use std::collections::VecDeque;
use std::pin::Pin;

use futures_util::stream::{self, Stream, StreamExt};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};

use super::{ChatBackend, ChatRequest, FragmentStream, GenerationOptions};
use crate::error::{BridgeError, Result};
use crate::state::ChatMessage;

pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

#[derive(Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    keep_alive: Option<&'a str>,
    options: GenerationOptions,
}

impl<'a> OllamaChatRequest<'a> {
    fn new(request: &'a ChatRequest, stream: bool) -> Self {
        Self {
            model: &request.model,
            messages: &request.messages,
            stream,
            keep_alive: request.keep_alive.as_deref(),
            options: request.options,
        }
    }
}

/// One NDJSON line of `/api/chat`, or the whole body when not streaming.
#[derive(Deserialize)]
struct OllamaChatChunk {
    #[serde(default)]
    message: Option<OllamaChunkMessage>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct OllamaChunkMessage {
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct OllamaModel {
    name: String,
}

#[derive(Deserialize)]
struct OllamaModelsResponse {
    models: Vec<OllamaModel>,
}

#[derive(Clone)]
pub struct OllamaClient {
    client: Client,
    base_url: String,
}

impl OllamaClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: normalize_base_url(base_url),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn list_models(&self) -> Result<Vec<String>> {
        let url = format!("{}/api/tags", self.base_url);

        let response = self.client.get(&url).send().await?;
        let response = check_status(response).await?;

        let models_response: OllamaModelsResponse = response.json().await?;
        let model_names: Vec<String> = models_response
            .models
            .into_iter()
            .map(|model| model.name)
            .collect();

        Ok(model_names)
    }

    async fn post_chat(&self, request: &ChatRequest, stream: bool) -> Result<Response> {
        let url = format!("{}/api/chat", self.base_url);
        let body = OllamaChatRequest::new(request, stream);

        let response = self.client.post(&url).json(&body).send().await?;
        check_status(response).await
    }
}

impl ChatBackend for OllamaClient {
    async fn stream_chat(&self, request: &ChatRequest) -> Result<FragmentStream> {
        let response = self.post_chat(request, true).await?;
        Ok(decode_chat_stream(response.bytes_stream()))
    }

    async fn complete(&self, request: &ChatRequest) -> Result<String> {
        let response = self.post_chat(request, false).await?;
        let chunk: OllamaChatChunk = response.json().await?;

        if let Some(error) = chunk.error {
            return Err(BridgeError::Backend(error));
        }
        Ok(chunk.message.map(|m| m.content).unwrap_or_default())
    }
}

async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(BridgeError::Status {
        status,
        body: body.trim().to_string(),
    })
}

fn normalize_base_url(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    }
}

/// Incremental decoder for newline-delimited chat chunks.
///
/// Bytes are buffered raw so a UTF-8 sequence split across network reads is
/// only decoded once its line is complete.
#[derive(Debug, Default)]
pub struct ChatChunkDecoder {
    buffer: Vec<u8>,
}

impl ChatChunkDecoder {
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Result<String>> {
        self.buffer.extend_from_slice(bytes);
        let mut out = Vec::new();

        while let Some(split) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=split).collect();
            if let Some(item) = decode_line(&line) {
                out.push(item);
            }
        }

        out
    }

    /// Decode whatever is left once the body ends without a final newline.
    pub fn finish(&mut self) -> Vec<Result<String>> {
        let line = std::mem::take(&mut self.buffer);
        decode_line(&line).into_iter().collect()
    }
}

fn decode_line(line: &[u8]) -> Option<Result<String>> {
    let text = String::from_utf8_lossy(line);
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    let chunk: OllamaChatChunk = match serde_json::from_str(text) {
        Ok(chunk) => chunk,
        Err(e) => return Some(Err(e.into())),
    };

    if let Some(error) = chunk.error {
        return Some(Err(BridgeError::Backend(error)));
    }

    match chunk.message {
        Some(message) if !message.content.is_empty() => Some(Ok(message.content)),
        _ => None,
    }
}

/// Turn a raw body stream into content fragments. The stream ends after the
/// first error.
pub fn decode_chat_stream<S, B, E>(bytes: S) -> FragmentStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<BridgeError> + Send + 'static,
{
    struct State<S> {
        bytes: Pin<Box<S>>,
        decoder: ChatChunkDecoder,
        pending: VecDeque<Result<String>>,
        finished: bool,
    }

    let state = State {
        bytes: Box::pin(bytes),
        decoder: ChatChunkDecoder::default(),
        pending: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                if item.is_err() {
                    state.pending.clear();
                    state.finished = true;
                }
                return Some((item, state));
            }
            if state.finished {
                return None;
            }

            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    let decoded = state.decoder.feed(chunk.as_ref());
                    state.pending.extend(decoded);
                }
                Some(Err(err)) => {
                    state.finished = true;
                    state.pending.push_back(Err(err.into()));
                }
                None => {
                    state.finished = true;
                    let decoded = state.decoder.finish();
                    state.pending.extend(decoded);
                }
            }
        }
    })
    .boxed()
}
