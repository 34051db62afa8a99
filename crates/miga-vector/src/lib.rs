pub mod db;
pub mod error;
pub mod store;
pub mod types;

pub use error::{Result, VectorError};
pub use store::VectorStore;
pub use types::{CachedResponse, Document, SearchHit, SearchOptions, StoreStats};
