pub mod client;
pub mod error;
pub mod knowledge;
pub mod registry;
pub mod schema;
pub mod types;

pub use client::{LanguageModel, LlmClient};
pub use error::{LlmError, Result};
pub use registry::{ModelCapabilities, ModelParams, ModelRegistry, RouteOverride, RoutingTable};
pub use schema::SchemaKey;
pub use types::{
    AgentReply, ChatMessage, ConversationDigest, ExtractedFact, MessageAnalysis,
    ValidationVerdict, Verdict,
};
