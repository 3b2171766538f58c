//! Deterministic in-process backend for tests.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use futures_util::stream::{self, StreamExt};

use super::{ChatBackend, ChatRequest, FragmentStream};
use crate::error::{BridgeError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedReply {
    /// Stream these fragments and finish normally.
    Fragments(Vec<String>),
    /// Fail before any fragment is produced.
    Fail(String),
    /// Stream the fragments, then fail.
    FailAfter(Vec<String>, String),
}

impl ScriptedReply {
    pub fn text(text: &str) -> Self {
        ScriptedReply::Fragments(vec![text.to_string()])
    }
}

/// Pops one scripted reply per call and records every request it receives.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    replies: Mutex<VecDeque<ScriptedReply>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedBackend {
    pub fn new(replies: Vec<ScriptedReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        lock(&self.requests).clone()
    }

    fn next_reply(&self, request: &ChatRequest) -> ScriptedReply {
        lock(&self.requests).push(request.clone());
        lock(&self.replies)
            .pop_front()
            .unwrap_or_else(|| ScriptedReply::text("ok"))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ChatBackend for ScriptedBackend {
    async fn stream_chat(&self, request: &ChatRequest) -> Result<FragmentStream> {
        let items: Vec<Result<String>> = match self.next_reply(request) {
            ScriptedReply::Fragments(fragments) => fragments.into_iter().map(Ok).collect(),
            ScriptedReply::Fail(message) => return Err(BridgeError::Backend(message)),
            ScriptedReply::FailAfter(fragments, message) => fragments
                .into_iter()
                .map(Ok)
                .chain(std::iter::once(Err(BridgeError::Backend(message))))
                .collect(),
        };
        Ok(stream::iter(items).boxed())
    }

    async fn complete(&self, request: &ChatRequest) -> Result<String> {
        match self.next_reply(request) {
            ScriptedReply::Fragments(fragments) => Ok(fragments.concat()),
            ScriptedReply::Fail(message) | ScriptedReply::FailAfter(_, message) => {
                Err(BridgeError::Backend(message))
            }
        }
    }
}
