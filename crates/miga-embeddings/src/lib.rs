pub mod cache;
pub mod client;
pub mod normalize;

pub use client::{Embedder, OpenAiEmbedder};
pub use normalize::{canonical_form, content_hash, content_hash_hex, normalize_for_embedding};
