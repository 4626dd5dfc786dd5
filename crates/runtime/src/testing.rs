//! Scripted completion client for tests.

use crate::client::{ByteStream, CompletionClient};
use async_trait::async_trait;
use bytes::Bytes;
use chatrelay_common::{ChatCompletionRequest, ChatCompletionResponse, Error, Result};
use serde_json::json;
use std::sync::{Arc, Mutex};

/// Event line carrying one content delta
pub fn event_line(content: &str) -> String {
    format!(
        "data: {}\n\n",
        json!({ "choices": [{ "index": 0, "delta": { "content": content } }] })
    )
}

/// Complete event-stream document for `fragments`, sentinel included
pub fn event_document(fragments: &[&str]) -> String {
    let mut doc = format!(
        "data: {}\n\n",
        json!({ "choices": [{ "index": 0, "delta": { "role": "assistant" } }] })
    );
    for fragment in fragments {
        doc.push_str(&event_line(fragment));
    }
    doc.push_str("data: [DONE]\n\n");
    doc
}

/// Replays a fixed response and records every request it receives
#[derive(Clone, Default)]
pub struct ScriptedClient {
    body: Vec<u8>,
    chunk_size: Option<usize>,
    transport_error: Option<String>,
    rejection: Option<(u16, serde_json::Value)>,
    completion: Option<String>,
    requests: Arc<Mutex<Vec<(ChatCompletionRequest, String)>>>,
}

impl ScriptedClient {
    /// Stream `body` verbatim
    pub fn streaming(body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: body.into(),
            ..Self::default()
        }
    }

    /// Stream a well-formed document carrying `fragments`
    pub fn with_fragments(fragments: &[&str]) -> Self {
        Self::streaming(event_document(fragments))
    }

    /// Answer non-streamed requests with `content`
    pub fn completing(content: &str) -> Self {
        Self {
            completion: Some(content.to_string()),
            ..Self::default()
        }
    }

    /// Refuse every request with `status` and `body`
    pub fn rejecting(status: u16, body: serde_json::Value) -> Self {
        Self {
            rejection: Some((status, body)),
            ..Self::default()
        }
    }

    /// Deliver the body in pieces of `size` bytes
    pub fn chunked(mut self, size: usize) -> Self {
        self.chunk_size = Some(size.max(1));
        self
    }

    /// Fail the byte stream after the body has been delivered
    pub fn failing_after_body(mut self, message: &str) -> Self {
        self.transport_error = Some(message.to_string());
        self
    }

    /// Requests received so far with the credential each one used
    pub fn requests(&self) -> Vec<(ChatCompletionRequest, String)> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    fn record(&self, request: &ChatCompletionRequest, credential: &str) -> Result<()> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push((request.clone(), credential.to_string()));
        }
        match &self.rejection {
            Some((status, body)) => Err(Error::Upstream {
                status: *status,
                body: body.clone(),
            }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl CompletionClient for ScriptedClient {
    async fn stream_chat(
        &self,
        request: &ChatCompletionRequest,
        credential: &str,
    ) -> Result<ByteStream> {
        self.record(request, credential)?;

        let size = self.chunk_size.unwrap_or(self.body.len().max(1));
        let mut items: Vec<Result<Bytes>> = self
            .body
            .chunks(size)
            .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
            .collect();
        if let Some(message) = &self.transport_error {
            items.push(Err(Error::Transport(message.clone())));
        }

        Ok(Box::pin(futures::stream::iter(items)))
    }

    async fn complete_chat(
        &self,
        request: &ChatCompletionRequest,
        credential: &str,
    ) -> Result<ChatCompletionResponse> {
        self.record(request, credential)?;

        let content = self.completion.clone().unwrap_or_default();
        let response = serde_json::from_value(json!({
            "choices": [{ "index": 0, "message": { "role": "assistant", "content": content } }]
        }))?;
        Ok(response)
    }
}
