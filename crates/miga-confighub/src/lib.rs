pub mod error;
pub mod hub;
pub mod parse;
pub mod projection;
pub mod sheets;
pub mod types;

pub use error::{HubError, Result};
pub use hub::ConfigHub;
pub use types::{
    Branch, CannedReply, ConfigSnapshot, Faq, KnowledgeItem, OrderModifyPolicy, Product,
    SeasonRule,
};
