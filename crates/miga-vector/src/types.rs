use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One document to index. `ttl_secs = None` means the row never expires.
#[derive(Debug, Clone)]
pub struct Document {
    pub content: String,
    pub category: String,
    pub source: String,
    pub metadata: Value,
    pub ttl_secs: Option<i64>,
}

impl Document {
    pub fn new(content: impl Into<String>, category: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            category: category.into(),
            source: source.into(),
            metadata: Value::Null,
            ttl_secs: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_ttl(mut self, ttl_secs: i64) -> Self {
        self.ttl_secs = Some(ttl_secs);
        self
    }
}

/// A similarity match returned to callers, similarity included.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub content: String,
    pub category: String,
    pub source: String,
    pub metadata: Value,
    pub similarity: f32,
}

#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub category: Option<String>,
    pub source: Option<String>,
    pub limit: Option<i64>,
    /// Overrides the per-category threshold from config when set.
    pub threshold: Option<f32>,
}

impl SearchOptions {
    pub fn category(cat: impl Into<String>) -> Self {
        Self {
            category: Some(cat.into()),
            ..Default::default()
        }
    }
}

/// A semantic-cache hit.
#[derive(Debug, Clone, Serialize)]
pub struct CachedResponse {
    pub response: String,
    pub metadata: Value,
    pub similarity: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryCount {
    pub category: String,
    pub documents: i64,
    pub hits: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreStats {
    pub categories: Vec<CategoryCount>,
    pub total_documents: i64,
    pub total_hits: i64,
    pub avg_hits: f64,
    pub cache_entries: i64,
}
