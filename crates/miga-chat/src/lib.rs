pub mod client;
pub mod error;

pub use client::{ChatClient, ReplySender};
pub use error::{ChatError, Result};
