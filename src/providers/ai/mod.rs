//! LLM provider abstraction and the OpenAI-compatible implementation.

mod openai;
mod traits;

pub use openai::OpenAiClient;
pub use traits::{
    CompletionRequest, CompletionResponse, EmbeddingClient, LlmClient, LlmError, LlmResult,
    Message, Role,
};
