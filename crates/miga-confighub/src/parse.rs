//! Tolerant parsers from raw sheet grids into typed snapshot collections.
//!
//! The first row of every tab is a header; lookups are by lowercased header
//! name so column order in the sheet does not matter. Rows missing required
//! fields are skipped, never fatal.

use std::collections::HashMap;

use miga_llm::{RouteOverride, RoutingTable};

use crate::types::{
    Branch, CannedReply, Faq, KnowledgeItem, OrderModifyPolicy, Product, SeasonRule,
};

/// Column-name → index map from a header row.
struct Header(HashMap<String, usize>);

impl Header {
    fn parse(row: &[String]) -> Self {
        Self(
            row.iter()
                .enumerate()
                .map(|(i, name)| (name.trim().to_lowercase(), i))
                .collect(),
        )
    }

    fn get<'a>(&self, row: &'a [String], name: &str) -> Option<&'a str> {
        let idx = *self.0.get(name)?;
        let value = row.get(idx)?.trim();
        if value.is_empty() {
            None
        } else {
            Some(value)
        }
    }

    fn text(&self, row: &[String], name: &str) -> Option<String> {
        self.get(row, name).map(String::from)
    }

    fn bool_or(&self, row: &[String], name: &str, default: bool) -> bool {
        self.get(row, name).map(parse_bool).unwrap_or(default)
    }

    fn list(&self, row: &[String], name: &str) -> Vec<String> {
        self.get(row, name).map(parse_list).unwrap_or_default()
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.to_lowercase().as_str(),
        "true" | "1" | "yes" | "si" | "sí" | "x"
    )
}

/// Split on comma or pipe, trimming empties.
fn parse_list(value: &str) -> Vec<String> {
    value
        .split(|c| c == ',' || c == '|')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn rows_with_header(grid: &[Vec<String>]) -> Option<(Header, &[Vec<String>])> {
    let (first, rest) = grid.split_first()?;
    Some((Header::parse(first), rest))
}

pub fn parse_branches(grid: &[Vec<String>]) -> Vec<Branch> {
    let Some((header, rows)) = rows_with_header(grid) else {
        return Vec::new();
    };
    rows.iter()
        .filter_map(|row| {
            Some(Branch {
                id: header.text(row, "id")?,
                name: header.text(row, "name")?,
                short_name: header.text(row, "short_name"),
                address: header.text(row, "address"),
                city: header.text(row, "city"),
                phone: header.text(row, "phone"),
                hours: header.text(row, "hours"),
                synonyms: header.list(row, "synonyms"),
                enabled: header.bool_or(row, "enabled", true),
            })
        })
        .collect()
}

pub fn parse_products(grid: &[Vec<String>]) -> Vec<Product> {
    let Some((header, rows)) = rows_with_header(grid) else {
        return Vec::new();
    };
    rows.iter()
        .filter_map(|row| {
            Some(Product {
                woo_id: header.get(row, "woo_id").and_then(|v| v.parse().ok()),
                sku: header.text(row, "sku"),
                name: header.text(row, "name")?,
                category: header.text(row, "category"),
                price: header
                    .get(row, "price")
                    .and_then(|v| v.trim_start_matches('$').replace(',', "").parse().ok()),
                description: header.text(row, "description"),
                fuzzy_keywords: header.list(row, "fuzzy_keywords"),
                seasonal: header.bool_or(row, "seasonal", false),
                enabled: header.bool_or(row, "enabled", true),
            })
        })
        .collect()
}

pub fn parse_faqs(grid: &[Vec<String>]) -> Vec<Faq> {
    let Some((header, rows)) = rows_with_header(grid) else {
        return Vec::new();
    };
    rows.iter()
        .filter_map(|row| {
            Some(Faq {
                question: header.text(row, "question")?,
                answer: header.text(row, "answer")?,
                keywords: header.list(row, "keywords"),
                enabled: header.bool_or(row, "enabled", true),
            })
        })
        .collect()
}

pub fn parse_canned(grid: &[Vec<String>]) -> Vec<CannedReply> {
    let Some((header, rows)) = rows_with_header(grid) else {
        return Vec::new();
    };
    rows.iter()
        .filter_map(|row| {
            Some(CannedReply {
                trigger: header.text(row, "trigger")?,
                response: header.text(row, "response")?,
                keywords: header.list(row, "keywords"),
                enabled: header.bool_or(row, "enabled", true),
            })
        })
        .collect()
}

pub fn parse_knowledge(grid: &[Vec<String>]) -> Vec<KnowledgeItem> {
    let Some((header, rows)) = rows_with_header(grid) else {
        return Vec::new();
    };
    rows.iter()
        .filter_map(|row| {
            Some(KnowledgeItem {
                topic: header.text(row, "topic")?,
                content: header.text(row, "content")?,
                enabled: header.bool_or(row, "enabled", true),
            })
        })
        .collect()
}

pub fn parse_season_rules(grid: &[Vec<String>]) -> Vec<SeasonRule> {
    let Some((header, rows)) = rows_with_header(grid) else {
        return Vec::new();
    };
    rows.iter()
        .filter_map(|row| {
            Some(SeasonRule {
                name: header.text(row, "name")?,
                starts: header.text(row, "starts")?,
                ends: header.text(row, "ends")?,
                note: header.text(row, "note"),
                enabled: header.bool_or(row, "enabled", true),
            })
        })
        .collect()
}

/// Two-column key/value tabs (agent_config, season_config).
pub fn parse_kv(grid: &[Vec<String>]) -> HashMap<String, String> {
    grid.iter()
        .filter_map(|row| {
            let key = row.first()?.trim();
            let value = row.get(1)?.trim();
            if key.is_empty() || key.eq_ignore_ascii_case("key") || value.is_empty() {
                return None;
            }
            Some((key.to_lowercase(), value.to_string()))
        })
        .collect()
}

/// Tools tab: name + enabled flag.
pub fn parse_tools(grid: &[Vec<String>]) -> HashMap<String, bool> {
    let Some((header, rows)) = rows_with_header(grid) else {
        return HashMap::new();
    };
    rows.iter()
        .filter_map(|row| {
            Some((
                header.text(row, "name")?.to_lowercase(),
                header.bool_or(row, "enabled", true),
            ))
        })
        .collect()
}

pub fn parse_order_policy(grid: &[Vec<String>]) -> OrderModifyPolicy {
    let kv = parse_kv(grid);
    OrderModifyPolicy {
        allow_modifications: kv
            .get("allow_modifications")
            .map(|v| parse_bool(v))
            .unwrap_or(true),
        cutoff_hours: kv
            .get("cutoff_hours")
            .and_then(|v| v.parse().ok())
            .unwrap_or(24),
        note: kv.get("note").cloned(),
    }
}

pub fn parse_model_routing(grid: &[Vec<String>]) -> RoutingTable {
    let Some((header, rows)) = rows_with_header(grid) else {
        return RoutingTable::new();
    };
    rows.iter()
        .filter_map(|row| {
            let task = header.text(row, "task")?.to_lowercase();
            let model = header.text(row, "model")?;
            Some((
                task,
                RouteOverride {
                    model,
                    temperature: header.get(row, "temperature").and_then(|v| v.parse().ok()),
                    max_tokens: header.get(row, "max_tokens").and_then(|v| v.parse().ok()),
                },
            ))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(rows: &[&[&str]]) -> Vec<Vec<String>> {
        rows.iter()
            .map(|r| r.iter().map(|c| c.to_string()).collect())
            .collect()
    }

    #[test]
    fn branches_parse_with_shuffled_columns() {
        let g = grid(&[
            &["City", "enabled", "id", "name", "synonyms"],
            &["CDMX", "true", "centro", "Sucursal Centro", "centro historico, zocalo"],
            &["", "", "", "Sin Id", ""],
        ]);
        let branches = parse_branches(&g);
        assert_eq!(branches.len(), 1);
        assert_eq!(branches[0].id, "centro");
        assert_eq!(branches[0].synonyms, vec!["centro historico", "zocalo"]);
    }

    #[test]
    fn products_tolerate_currency_formatting() {
        let g = grid(&[
            &["name", "price", "fuzzy_keywords", "seasonal"],
            &["Rosca de Reyes", "$1,250.50", "rosca|pan de reyes", "sí"],
        ]);
        let products = parse_products(&g);
        assert_eq!(products[0].price, Some(1250.50));
        assert!(products[0].seasonal);
        assert_eq!(products[0].fuzzy_keywords, vec!["rosca", "pan de reyes"]);
    }

    #[test]
    fn kv_skips_header_and_blank_rows() {
        let g = grid(&[&["key", "value"], &["persona", "Miga"], &["", ""]]);
        let kv = parse_kv(&g);
        assert_eq!(kv.len(), 1);
        assert_eq!(kv["persona"], "Miga");
    }

    #[test]
    fn model_routing_rows_become_overrides() {
        let g = grid(&[
            &["task", "model", "temperature", "max_tokens"],
            &["reply", "gpt-4o", "0.2", "350"],
            &["validator", "gpt-4o-mini", "", ""],
        ]);
        let table = parse_model_routing(&g);
        assert_eq!(table["reply"].model, "gpt-4o");
        assert_eq!(table["reply"].temperature, Some(0.2));
        assert_eq!(table["validator"].temperature, None);
    }

    #[test]
    fn empty_grid_yields_empty_collections() {
        assert!(parse_branches(&[]).is_empty());
        assert!(parse_model_routing(&[]).is_empty());
    }
}
