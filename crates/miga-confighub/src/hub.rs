//! The config hub: fetches the spreadsheet, publishes immutable snapshots,
//! and keeps the previous snapshot readable until the swap completes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::Utc;
use tracing::{info, warn};

use miga_core::config::ConfigHubConfig;

use crate::parse;
use crate::sheets::SheetsClient;
use crate::types::{CannedReply, ConfigSnapshot, RawDocument};

pub struct ConfigHub {
    sheets: Option<SheetsClient>,
    snapshot: RwLock<Arc<ConfigSnapshot>>,
    last_raw: RwLock<Option<Arc<RawDocument>>>,
    version: AtomicU64,
}

impl ConfigHub {
    /// Build the hub. Without sheet credentials the built-in fallback
    /// snapshot (version 1, `is_fallback = true`) is published immediately.
    pub fn new(cfg: &ConfigHubConfig) -> Self {
        let sheets = SheetsClient::from_config(cfg);
        if sheets.is_none() {
            warn!("sheet credentials missing, running on fallback snapshot");
        }
        Self {
            sheets,
            snapshot: RwLock::new(Arc::new(fallback_snapshot(1))),
            last_raw: RwLock::new(None),
            version: AtomicU64::new(1),
        }
    }

    /// Pin the current snapshot. Callers hold the `Arc` for the duration of
    /// a request so a mid-request refresh never changes what they see.
    pub fn current(&self) -> Arc<ConfigSnapshot> {
        self.snapshot.read().unwrap().clone()
    }

    /// Raw tabs from the last successful fetch (for the schema analyzer).
    pub fn last_raw(&self) -> Option<Arc<RawDocument>> {
        self.last_raw.read().unwrap().clone()
    }

    /// Fetch, parse, and publish a new snapshot. Returns the published
    /// snapshot. Without credentials this republishes the fallback under a
    /// fresh version so `version` stays strictly monotonic.
    pub async fn refresh(&self) -> Arc<ConfigSnapshot> {
        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;

        let snapshot = match &self.sheets {
            Some(client) => {
                let raw = client.fetch_document().await;
                let snapshot = build_snapshot(version, &raw);
                *self.last_raw.write().unwrap() = Some(Arc::new(raw));
                snapshot
            }
            None => fallback_snapshot(version),
        };

        let published = Arc::new(snapshot);
        *self.snapshot.write().unwrap() = published.clone();
        info!(
            version,
            is_fallback = published.is_fallback,
            branches = published.branches.len(),
            products = published.products.len(),
            canned = published.canned.len(),
            "config snapshot published"
        );
        published
    }
}

fn build_snapshot(version: u64, raw: &RawDocument) -> ConfigSnapshot {
    let empty: Vec<Vec<String>> = Vec::new();
    let tab = |name: &str| -> &Vec<Vec<String>> { raw.get(name).unwrap_or(&empty) };

    ConfigSnapshot {
        version,
        fetched_at: Utc::now(),
        is_fallback: false,
        branches: parse::parse_branches(tab("branches")),
        products: parse::parse_products(tab("products")),
        faqs: parse::parse_faqs(tab("faqs")),
        canned: parse::parse_canned(tab("canned")),
        knowledge: parse::parse_knowledge(tab("knowledge")),
        agent: parse::parse_kv(tab("agent_config")),
        tools: parse::parse_tools(tab("tools")),
        season_rules: parse::parse_season_rules(tab("season_rules")),
        season_config: parse::parse_kv(tab("season_config")),
        order_modify_policy: parse::parse_order_policy(tab("order_modify_policy")),
        model_routing: parse::parse_model_routing(tab("model_routing")),
    }
}

/// Minimal built-in snapshot used when the sheet is unreachable or
/// credentials are missing: enough to greet and hand off, nothing more.
fn fallback_snapshot(version: u64) -> ConfigSnapshot {
    let mut snapshot = ConfigSnapshot::empty(version, true);
    snapshot.canned.push(CannedReply {
        trigger: "hola".to_string(),
        response: "¡Hola! Soy Miga 🥐 ¿En qué te puedo ayudar hoy?".to_string(),
        keywords: vec!["hola".to_string(), "buenos dias".to_string()],
        enabled: true,
    });
    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hub() -> ConfigHub {
        ConfigHub::new(&ConfigHubConfig::default())
    }

    #[tokio::test]
    async fn versions_are_strictly_monotonic() {
        let hub = hub();
        let v1 = hub.current().version;
        let v2 = hub.refresh().await.version;
        let v3 = hub.refresh().await.version;
        assert!(v1 < v2 && v2 < v3);
    }

    #[tokio::test]
    async fn fallback_snapshot_is_marked() {
        let hub = hub();
        let snap = hub.current();
        assert!(snap.is_fallback);
        assert!(!snap.canned.is_empty());
    }

    #[tokio::test]
    async fn pinned_snapshot_survives_a_refresh() {
        let hub = hub();
        let pinned = hub.current();
        let version_before = pinned.version;
        hub.refresh().await;
        // The pinned Arc still reads the old value; the hub serves the new one.
        assert_eq!(pinned.version, version_before);
        assert!(hub.current().version > version_before);
    }
}
