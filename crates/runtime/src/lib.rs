mod client;
pub mod decoder;
mod openai;
mod orchestrator;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

#[cfg(test)]
mod tests;

pub use client::{ByteStream, CompletionClient};
pub use decoder::{decode_lines, event_payloads, extract_payloads, FrameDecoder};
pub use openai::OpenAiClient;
pub use orchestrator::{
    parse_fragment, Completion, CompletionOrchestrator, CompletionSettings, FragmentStream,
};
