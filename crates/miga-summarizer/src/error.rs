use thiserror::Error;

#[derive(Debug, Error)]
pub enum SummarizerError {
    #[error("Memory store error: {0}")]
    Memory(#[from] miga_memory::MemoryError),

    #[error("LLM error: {0}")]
    Llm(#[from] miga_llm::LlmError),

    #[error("Conversation {0} no longer has enough messages to summarize")]
    TooFewMessages(i64),
}

pub type Result<T> = std::result::Result<T, SummarizerError>;
