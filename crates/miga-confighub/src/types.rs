use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use miga_llm::RoutingTable;

/// Raw tab contents as fetched from the spreadsheet: tab title → rows.
pub type RawDocument = HashMap<String, Vec<Vec<String>>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Branch {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub short_name: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub hours: Option<String>,
    #[serde(default)]
    pub synonyms: Vec<String>,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    #[serde(default)]
    pub woo_id: Option<i64>,
    #[serde(default)]
    pub sku: Option<String>,
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub fuzzy_keywords: Vec<String>,
    #[serde(default)]
    pub seasonal: bool,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Faq {
    pub question: String,
    pub answer: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CannedReply {
    pub trigger: String,
    pub response: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeItem {
    pub topic: String,
    pub content: String,
    pub enabled: bool,
}

/// A seasonal availability window ("rosca" in January, etc.).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeasonRule {
    pub name: String,
    /// Inclusive window bounds as "MM-DD".
    pub starts: String,
    pub ends: String,
    #[serde(default)]
    pub note: Option<String>,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderModifyPolicy {
    pub allow_modifications: bool,
    pub cutoff_hours: i64,
    #[serde(default)]
    pub note: Option<String>,
}

impl Default for OrderModifyPolicy {
    fn default() -> Self {
        Self {
            allow_modifications: true,
            cutoff_hours: 24,
            note: None,
        }
    }
}

/// Immutable value produced by one sheet fetch. Readers pin an
/// `Arc<ConfigSnapshot>` for the duration of a request; `version` is
/// strictly monotonic across publishes.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigSnapshot {
    pub version: u64,
    pub fetched_at: DateTime<Utc>,
    /// True when built from the built-in fallback instead of the sheet.
    pub is_fallback: bool,
    pub branches: Vec<Branch>,
    pub products: Vec<Product>,
    pub faqs: Vec<Faq>,
    pub canned: Vec<CannedReply>,
    pub knowledge: Vec<KnowledgeItem>,
    /// Free-form persona/behavior settings from the agent_config tab.
    pub agent: HashMap<String, String>,
    /// Feature switches from the tools tab.
    pub tools: HashMap<String, bool>,
    pub season_rules: Vec<SeasonRule>,
    pub season_config: HashMap<String, String>,
    pub order_modify_policy: OrderModifyPolicy,
    pub model_routing: RoutingTable,
}

impl ConfigSnapshot {
    pub fn empty(version: u64, is_fallback: bool) -> Self {
        Self {
            version,
            fetched_at: Utc::now(),
            is_fallback,
            branches: Vec::new(),
            products: Vec::new(),
            faqs: Vec::new(),
            canned: Vec::new(),
            knowledge: Vec::new(),
            agent: HashMap::new(),
            tools: HashMap::new(),
            season_rules: Vec::new(),
            season_config: HashMap::new(),
            order_modify_policy: OrderModifyPolicy::default(),
            model_routing: RoutingTable::new(),
        }
    }

    /// Season rules active on the given date (month-day window, inclusive,
    /// wrapping across new year when starts > ends).
    pub fn active_season_rules(&self, date: DateTime<Utc>) -> Vec<&SeasonRule> {
        let today = date.format("%m-%d").to_string();
        self.season_rules
            .iter()
            .filter(|r| r.enabled)
            .filter(|r| {
                if r.starts <= r.ends {
                    r.starts.as_str() <= today.as_str() && today.as_str() <= r.ends.as_str()
                } else {
                    // Window wraps the year boundary (e.g. 12-01 .. 01-06).
                    today.as_str() >= r.starts.as_str() || today.as_str() <= r.ends.as_str()
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn rule(starts: &str, ends: &str) -> SeasonRule {
        SeasonRule {
            name: "rosca".to_string(),
            starts: starts.to_string(),
            ends: ends.to_string(),
            note: None,
            enabled: true,
        }
    }

    #[test]
    fn season_window_within_year() {
        let mut snap = ConfigSnapshot::empty(1, false);
        snap.season_rules.push(rule("01-01", "01-31"));
        let jan = Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).unwrap();
        let feb = Utc.with_ymd_and_hms(2026, 2, 15, 12, 0, 0).unwrap();
        assert_eq!(snap.active_season_rules(jan).len(), 1);
        assert_eq!(snap.active_season_rules(feb).len(), 0);
    }

    #[test]
    fn season_window_wrapping_new_year() {
        let mut snap = ConfigSnapshot::empty(1, false);
        snap.season_rules.push(rule("12-01", "01-06"));
        let dec = Utc.with_ymd_and_hms(2025, 12, 20, 12, 0, 0).unwrap();
        let jan = Utc.with_ymd_and_hms(2026, 1, 3, 12, 0, 0).unwrap();
        let jul = Utc.with_ymd_and_hms(2026, 7, 1, 12, 0, 0).unwrap();
        assert_eq!(snap.active_season_rules(dec).len(), 1);
        assert_eq!(snap.active_season_rules(jan).len(), 1);
        assert_eq!(snap.active_season_rules(jul).len(), 0);
    }
}
