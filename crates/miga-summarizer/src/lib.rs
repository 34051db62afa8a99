pub mod engine;
pub mod error;

pub use engine::{CycleReport, Summarizer};
pub use error::{Result, SummarizerError};
