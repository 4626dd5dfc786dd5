use crate::client::CompletionClient;
use crate::decoder::event_payloads;
use chatrelay_common::{
    ChatCompletionChunk, ChatCompletionRequest, ConversationRecord, ConversationRequest, Error,
    ObservableMetrics, Result,
};
use chatrelay_config::UpstreamConfig;
use chatrelay_store::StoreHandle;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Assistant text fragments in arrival order
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Model parameters sent with every completion
#[derive(Debug, Clone)]
pub struct CompletionSettings {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

impl From<&UpstreamConfig> for CompletionSettings {
    fn from(config: &UpstreamConfig) -> Self {
        Self {
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }
}

/// Outcome of [`CompletionOrchestrator::run`]
pub enum Completion {
    /// Fragments are persisted as they are pulled from the stream
    Streaming(FragmentStream),
    /// Whole response, already persisted
    Finished(ConversationRecord),
}

/// Drives one user turn through the completion service and the store
///
/// Every request works on its own copy of the record. The record is created
/// (and saved) on first sight of an id. The user turn is saved once the
/// completion service has accepted the request, so a rejected call leaves no
/// unanswered turn behind. In streaming mode every assistant fragment is saved
/// before it is handed to the caller.
#[derive(Clone)]
pub struct CompletionOrchestrator {
    store: StoreHandle,
    client: Arc<dyn CompletionClient>,
    settings: CompletionSettings,
    metrics: ObservableMetrics,
}

impl CompletionOrchestrator {
    pub fn new(
        store: StoreHandle,
        client: Arc<dyn CompletionClient>,
        settings: CompletionSettings,
    ) -> Self {
        Self {
            store,
            client,
            settings,
            metrics: ObservableMetrics::new(),
        }
    }

    /// Report decode warnings into shared metrics
    pub fn with_metrics(mut self, metrics: ObservableMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Run in streaming or whole-response mode
    pub async fn run(
        &self,
        request: ConversationRequest,
        credential: &str,
        stream: bool,
    ) -> Result<Completion> {
        if stream {
            self.stream(request, credential).await.map(Completion::Streaming)
        } else {
            self.complete(request, credential).await.map(Completion::Finished)
        }
    }

    /// Load the record for `request`, creating and saving it when unseen
    pub async fn resolve(&self, request: &ConversationRequest) -> Result<ConversationRecord> {
        let id = &request.conversation_id;
        if let Some(record) = self.store.get(id).await? {
            return Ok(record);
        }

        let record = ConversationRecord::new(id.as_str(), &request.text);
        self.store.set(id, &record).await?;
        info!("Created conversation {} ({})", id, record.name());
        Ok(record)
    }

    fn completion_request(
        &self,
        record: &ConversationRecord,
        stream: bool,
    ) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: self.settings.model.clone(),
            messages: record.messages().to_vec(),
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
            stream,
        }
    }

    /// Start a streamed completion.
    ///
    /// Validation, store and upstream errors are returned before any fragment
    /// exists. Errors after that end the stream as its last item; fragments
    /// already yielded stay saved.
    pub async fn stream(
        &self,
        request: ConversationRequest,
        credential: &str,
    ) -> Result<FragmentStream> {
        request.validate()?;

        let mut record = self.resolve(&request).await?;
        record.push_user(request.text.as_str());

        let upstream = self
            .client
            .stream_chat(&self.completion_request(&record, true), credential)
            .await?;
        self.store.set(&request.conversation_id, &record).await?;

        let store = self.store.clone();
        let metrics = self.metrics.clone();
        let id = request.conversation_id;

        let fragments = async_stream::stream! {
            let mut payloads = Box::pin(event_payloads(upstream));
            let mut appended = 0usize;

            while let Some(payload) = payloads.next().await {
                let payload = match payload {
                    Ok(payload) => payload,
                    Err(e) => {
                        error!("Completion stream for {} aborted: {}", id, e);
                        yield Err(e);
                        return;
                    }
                };

                let fragment = match parse_fragment(&payload) {
                    Ok(Some(fragment)) => fragment,
                    Ok(None) => continue,
                    Err(e) => {
                        warn!("{} ({})", e, payload);
                        metrics.record_decode_warning().await;
                        continue;
                    }
                };

                if let Err(e) = record.push_assistant(fragment.as_str()) {
                    yield Err(e);
                    return;
                }
                if let Err(e) = store.set(&id, &record).await {
                    error!("Failed to save fragment for {}: {}", id, e);
                    yield Err(e);
                    return;
                }
                appended += 1;
                yield Ok(fragment);
            }

            debug!("Completion for {} finished with {} fragments", id, appended);
        };

        Ok(Box::pin(fragments))
    }

    /// Run a completion in one call and save the result once
    pub async fn complete(
        &self,
        request: ConversationRequest,
        credential: &str,
    ) -> Result<ConversationRecord> {
        request.validate()?;

        let mut record = self.resolve(&request).await?;
        record.push_user(request.text.as_str());

        let response = self
            .client
            .complete_chat(&self.completion_request(&record, false), credential)
            .await?;

        match response.content().filter(|content| !content.is_empty()) {
            Some(content) => record.push_assistant(content)?,
            None => warn!("Completion for {} carried no content", request.conversation_id),
        }

        self.store.set(&request.conversation_id, &record).await?;
        Ok(record)
    }
}

/// Assistant text carried by one payload.
///
/// `Ok(None)` for payloads without content, such as the opening role delta.
pub fn parse_fragment(payload: &str) -> Result<Option<String>> {
    let chunk: ChatCompletionChunk = serde_json::from_str(payload)
        .map_err(|e| Error::DecodeWarning(e.to_string()))?;

    Ok(chunk
        .content()
        .filter(|content| !content.is_empty())
        .map(str::to_string))
}
