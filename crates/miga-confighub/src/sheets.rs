//! Read-only Google Sheets client (values API, API-key auth).

use serde::Deserialize;
use tracing::{debug, warn};

use miga_core::config::ConfigHubConfig;

use crate::error::{HubError, Result};
use crate::types::RawDocument;

/// Tab titles the hub understands. Missing tabs are tolerated.
pub const KNOWN_TABS: &[&str] = &[
    "branches",
    "products",
    "faqs",
    "knowledge",
    "canned",
    "agent_config",
    "tools",
    "season_rules",
    "season_config",
    "order_modify_policy",
    "model_routing",
];

pub struct SheetsClient {
    client: reqwest::Client,
    base_url: String,
    spreadsheet_id: String,
    api_key: String,
}

impl SheetsClient {
    /// Returns `None` when credentials are absent; the hub then publishes
    /// its built-in fallback snapshot instead.
    pub fn from_config(cfg: &ConfigHubConfig) -> Option<Self> {
        let spreadsheet_id = cfg.spreadsheet_id.clone()?;
        let api_key = cfg.api_key.clone()?;
        Some(Self {
            client: reqwest::Client::new(),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            spreadsheet_id,
            api_key,
        })
    }

    /// Fetch one tab's cell grid by title.
    pub async fn fetch_tab(&self, title: &str) -> Result<Vec<Vec<String>>> {
        let url = format!(
            "{}/v4/spreadsheets/{}/values/{}",
            self.base_url, self.spreadsheet_id, title
        );
        let resp = self
            .client
            .get(&url)
            .query(&[("key", self.api_key.as_str())])
            .send()
            .await?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(HubError::Api { status, message });
        }

        let body: ValuesResponse = resp.json().await?;
        Ok(body.values)
    }

    /// Fetch every known tab. A tab that errors is logged and omitted so one
    /// broken tab never blocks the whole refresh.
    pub async fn fetch_document(&self) -> RawDocument {
        let mut doc = RawDocument::new();
        for tab in KNOWN_TABS {
            match self.fetch_tab(tab).await {
                Ok(rows) => {
                    debug!(tab, rows = rows.len(), "tab fetched");
                    doc.insert((*tab).to_string(), rows);
                }
                Err(e) => warn!(tab, error = %e, "tab fetch failed, omitting"),
            }
        }
        doc
    }
}

#[derive(Deserialize)]
struct ValuesResponse {
    #[serde(default)]
    values: Vec<Vec<String>>,
}
