use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// The LLM step failed before any reply was produced. The selector
    /// falls back to the legacy flow on this.
    #[error("LLM error: {0}")]
    Llm(#[from] miga_llm::LlmError),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
