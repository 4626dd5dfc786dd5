use async_trait::async_trait;
use bytes::Bytes;
use chatrelay_common::{ChatCompletionRequest, ChatCompletionResponse, Result};
use futures::Stream;
use std::pin::Pin;

/// Raw response body of a streamed completion
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Trait for remote completion services
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Start a streamed completion.
    ///
    /// Resolves once the service has accepted the request. A non-success
    /// status is returned as `Error::Upstream` before any body is read.
    async fn stream_chat(
        &self,
        request: &ChatCompletionRequest,
        credential: &str,
    ) -> Result<ByteStream>;

    /// Run a completion and wait for the whole response
    async fn complete_chat(
        &self,
        request: &ChatCompletionRequest,
        credential: &str,
    ) -> Result<ChatCompletionResponse>;
}
