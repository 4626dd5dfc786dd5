use crate::client::{ByteStream, CompletionClient};
use async_trait::async_trait;
use chatrelay_common::{ChatCompletionRequest, ChatCompletionResponse, Error, Result};
use futures::StreamExt;
use reqwest::{Client, Response};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, error};

/// Client for an OpenAI-compatible `/chat/completions` endpoint
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    client: Client,
    base_url: String,
}

impl OpenAiClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        // No overall timeout: streamed responses stay open for the whole generation
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| Error::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    async fn send(&self, request: &ChatCompletionRequest, credential: &str) -> Result<Response> {
        debug!(
            "Requesting completion from {} ({} turns, stream={})",
            self.base_url,
            request.messages.len(),
            request.stream
        );

        let response = self
            .client
            .post(self.completions_url())
            .bearer_auth(credential)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                error!("Error with completion request: {}", e);
                Error::Transport(e.to_string())
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        error!("Completion service returned {}: {}", status, text);

        // Forward JSON bodies as-is; wrap anything else in the usual error shape
        let body = serde_json::from_str(&text)
            .unwrap_or_else(|_| json!({ "error": { "message": text } }));

        Err(Error::Upstream {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl CompletionClient for OpenAiClient {
    async fn stream_chat(
        &self,
        request: &ChatCompletionRequest,
        credential: &str,
    ) -> Result<ByteStream> {
        let response = self.send(request, credential).await?;
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| Error::Transport(format!("Stream error: {}", e))));

        Ok(Box::pin(body))
    }

    async fn complete_chat(
        &self,
        request: &ChatCompletionRequest,
        credential: &str,
    ) -> Result<ChatCompletionResponse> {
        let response = self.send(request, credential).await?;
        response
            .json::<ChatCompletionResponse>()
            .await
            .map_err(|e| Error::Transport(format!("Invalid completion response: {}", e)))
    }
}
