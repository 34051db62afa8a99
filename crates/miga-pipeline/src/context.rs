//! Minimal context assembly for the optimized flow.
//!
//! Only the snapshot sections the message plausibly needs are injected,
//! keyword-gated, and the whole block is capped so one verbose sheet can
//! never blow up the prompt.

use chrono::Utc;

use miga_confighub::ConfigSnapshot;
use miga_core::config::PipelineConfig;
use miga_memory::StoredMessage;

const BRANCH_KEYWORDS: &[&str] = &[
    "sucursal", "direccion", "dirección", "donde", "dónde", "ubicacion", "ubicación",
    "horario", "abren", "cierran", "telefono", "teléfono",
];
const PRICE_KEYWORDS: &[&str] = &[
    "precio", "cuanto", "cuánto", "cuesta", "vale", "venden", "tienen", "hay",
];
const ORDER_KEYWORDS: &[&str] = &["pedido", "orden", "cambiar", "cancelar", "modificar"];

/// Build the keyword-gated context block from a pinned snapshot.
pub fn build_minimal_context(
    snapshot: &ConfigSnapshot,
    message: &str,
    cfg: &PipelineConfig,
) -> String {
    let lower = message.to_lowercase();
    let mut sections: Vec<String> = Vec::new();

    if contains_any(&lower, BRANCH_KEYWORDS) || mentions_branch(snapshot, &lower) {
        let mut lines = vec!["Sucursales:".to_string()];
        for b in snapshot.branches.iter().filter(|b| b.enabled) {
            let mut line = format!("- {}", b.name);
            if let Some(addr) = &b.address {
                line.push_str(&format!(", {addr}"));
            }
            if let Some(hours) = &b.hours {
                line.push_str(&format!(" ({hours})"));
            }
            lines.push(line);
        }
        if lines.len() > 1 {
            sections.push(lines.join("\n"));
        }
    }

    let matched_products: Vec<_> = snapshot
        .products
        .iter()
        .filter(|p| p.enabled)
        .filter(|p| {
            lower.contains(&p.name.to_lowercase())
                || p.fuzzy_keywords
                    .iter()
                    .any(|k| lower.contains(&k.to_lowercase()))
        })
        .collect();
    if !matched_products.is_empty() || contains_any(&lower, PRICE_KEYWORDS) {
        let pool: Vec<_> = if matched_products.is_empty() {
            snapshot
                .products
                .iter()
                .filter(|p| p.enabled)
                .take(10)
                .collect()
        } else {
            matched_products
        };
        if !pool.is_empty() {
            let mut lines = vec!["Productos:".to_string()];
            for p in pool {
                let mut line = format!("- {}", p.name);
                if let Some(price) = p.price {
                    line.push_str(&format!(": ${price:.2}"));
                }
                lines.push(line);
            }
            sections.push(lines.join("\n"));
        }
    }

    let active_rules = snapshot.active_season_rules(Utc::now());
    if !active_rules.is_empty() {
        let mut lines = vec!["Temporada activa:".to_string()];
        for rule in active_rules {
            let mut line = format!("- {}", rule.name);
            if let Some(note) = &rule.note {
                line.push_str(&format!(": {note}"));
            }
            lines.push(line);
        }
        sections.push(lines.join("\n"));
    }

    if contains_any(&lower, ORDER_KEYWORDS) {
        let policy = &snapshot.order_modify_policy;
        let mut line = if policy.allow_modifications {
            format!(
                "Política de pedidos: se aceptan cambios hasta {} horas antes de la entrega.",
                policy.cutoff_hours
            )
        } else {
            "Política de pedidos: no se aceptan cambios una vez confirmado.".to_string()
        };
        if let Some(note) = &policy.note {
            line.push_str(&format!(" {note}"));
        }
        sections.push(line);
    }

    cap_chars(&sections.join("\n\n"), cfg.context_max_chars)
}

/// Render the history tail as plain turns, capped from the end so the most
/// recent exchange always survives.
pub fn format_history(messages: &[StoredMessage], max_chars: usize) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut total = 0usize;
    for m in messages.iter().rev() {
        let line = format!("{}: {}", m.role, m.content);
        total += line.len() + 1;
        if total > max_chars && !lines.is_empty() {
            break;
        }
        lines.push(line);
    }
    lines.reverse();
    lines.join("\n")
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

fn mentions_branch(snapshot: &ConfigSnapshot, lower: &str) -> bool {
    snapshot.branches.iter().filter(|b| b.enabled).any(|b| {
        lower.contains(&b.name.to_lowercase())
            || b.synonyms.iter().any(|s| lower.contains(&s.to_lowercase()))
    })
}

fn cap_chars(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use miga_confighub::{Branch, Product};
    use miga_core::types::Role;

    fn snapshot() -> ConfigSnapshot {
        let mut snap = ConfigSnapshot::empty(1, false);
        snap.branches.push(Branch {
            id: "centro".to_string(),
            name: "Centro".to_string(),
            short_name: None,
            address: Some("Av. Juárez 10".to_string()),
            city: None,
            phone: None,
            hours: Some("7-21".to_string()),
            synonyms: vec!["zócalo".to_string()],
            enabled: true,
        });
        snap.products.push(Product {
            woo_id: None,
            sku: None,
            name: "Rosca de Reyes".to_string(),
            category: None,
            price: Some(350.0),
            description: None,
            fuzzy_keywords: vec!["pan de reyes".to_string()],
            seasonal: true,
            enabled: true,
        });
        snap.products.push(Product {
            woo_id: None,
            sku: None,
            name: "Concha".to_string(),
            category: None,
            price: Some(18.0),
            description: None,
            fuzzy_keywords: vec![],
            seasonal: false,
            enabled: true,
        });
        snap
    }

    #[test]
    fn product_mention_injects_only_matching_products() {
        let ctx = build_minimal_context(&snapshot(), "quiero pan de reyes", &Default::default());
        assert!(ctx.contains("Rosca de Reyes"));
        assert!(!ctx.contains("Concha"));
        assert!(!ctx.contains("Sucursales"));
    }

    #[test]
    fn branch_question_injects_branches() {
        let ctx = build_minimal_context(&snapshot(), "¿dónde están?", &Default::default());
        assert!(ctx.contains("Av. Juárez 10"));
    }

    #[test]
    fn unrelated_smalltalk_injects_nothing() {
        let ctx = build_minimal_context(&snapshot(), "gracias!", &Default::default());
        assert!(ctx.is_empty());
    }

    #[test]
    fn context_is_capped() {
        let mut snap = snapshot();
        for i in 0..500 {
            snap.products.push(Product {
                woo_id: None,
                sku: None,
                name: format!("Producto número {i} con nombre largo"),
                category: None,
                price: Some(10.0),
                description: None,
                fuzzy_keywords: vec![],
                seasonal: false,
                enabled: true,
            });
        }
        let cfg = PipelineConfig::default();
        let ctx = build_minimal_context(&snap, "¿cuánto cuesta todo?", &cfg);
        assert!(ctx.len() <= cfg.context_max_chars);
    }

    #[test]
    fn history_keeps_the_most_recent_turns() {
        let messages: Vec<StoredMessage> = (0..50)
            .map(|i| StoredMessage {
                id: i,
                conversation_id: 1,
                contact_id: None,
                role: if i % 2 == 0 { Role::User } else { Role::Assistant },
                content: format!("mensaje número {i} con contenido"),
                metadata: serde_json::Value::Null,
                message_timestamp: Utc::now(),
                summarized: false,
                summary_id: None,
            })
            .collect();
        let out = format_history(&messages, 200);
        assert!(out.len() <= 230);
        assert!(out.contains("mensaje número 49"));
        assert!(!out.contains("mensaje número 0 "));
    }
}
