//! Projection of a config snapshot into the vector store.
//!
//! Runs after every successful refresh: stale `config_hub` rows are
//! invalidated first so removed branches/products do not linger. Matching
//! text goes into the document content; the text the pipeline should answer
//! with (canned/FAQ responses) rides in metadata under `response`.

use std::sync::Arc;

use serde_json::json;
use tracing::{info, warn};

use miga_core::config::ConfigHubConfig;
use miga_llm::{ChatMessage, LanguageModel, SchemaKey};
use miga_vector::{Document, VectorStore};

use crate::types::{ConfigSnapshot, RawDocument};

/// Source tag on every projected row; used for targeted invalidation.
pub const SOURCE: &str = "config_hub";

/// Build the projection documents for every active entity in the snapshot.
pub fn documents_for(snapshot: &ConfigSnapshot, cfg: &ConfigHubConfig) -> Vec<Document> {
    let mut docs = Vec::new();

    for branch in snapshot.branches.iter().filter(|b| b.enabled) {
        let mut parts = vec![branch.name.clone()];
        parts.extend(branch.short_name.clone());
        parts.extend(branch.address.clone());
        parts.extend(branch.city.clone());
        parts.push(format!("branch:{}", branch.id));
        parts.extend(branch.synonyms.iter().cloned());
        docs.push(
            Document::new(parts.join(" | "), "branch", SOURCE)
                .with_metadata(json!({
                    "branch_id": branch.id,
                    "name": branch.name,
                    "phone": branch.phone,
                    "hours": branch.hours,
                }))
                .with_ttl(cfg.projection_ttl_secs),
        );
    }

    for product in snapshot.products.iter().filter(|p| p.enabled) {
        let mut parts = vec![product.name.clone()];
        parts.extend(product.category.clone());
        parts.extend(product.description.clone());
        parts.extend(product.fuzzy_keywords.iter().cloned());
        docs.push(
            Document::new(parts.join(" | "), "product", SOURCE)
                .with_metadata(json!({
                    "name": product.name,
                    "sku": product.sku,
                    "woo_id": product.woo_id,
                    "price": product.price,
                    "seasonal": product.seasonal,
                }))
                .with_ttl(cfg.projection_ttl_secs),
        );
    }

    for faq in snapshot.faqs.iter().filter(|f| f.enabled) {
        let mut parts = vec![faq.question.clone()];
        parts.extend(faq.keywords.iter().cloned());
        docs.push(
            Document::new(parts.join(" | "), "faq", SOURCE)
                .with_metadata(json!({ "response": faq.answer }))
                .with_ttl(cfg.projection_ttl_secs),
        );
    }

    for canned in snapshot.canned.iter().filter(|c| c.enabled) {
        let mut parts = vec![canned.trigger.clone()];
        parts.extend(canned.keywords.iter().cloned());
        docs.push(
            Document::new(parts.join(" | "), "canned", SOURCE)
                .with_metadata(json!({ "response": canned.response }))
                .with_ttl(cfg.canned_ttl_secs),
        );
    }

    for item in snapshot.knowledge.iter().filter(|k| k.enabled) {
        docs.push(
            Document::new(format!("{} | {}", item.topic, item.content), "knowledge", SOURCE)
                .with_metadata(json!({ "topic": item.topic }))
                .with_ttl(cfg.projection_ttl_secs),
        );
    }

    docs
}

/// Invalidate the previous projection and write the new one.
pub async fn project(
    snapshot: &ConfigSnapshot,
    store: &VectorStore,
    cfg: &ConfigHubConfig,
) -> miga_vector::Result<usize> {
    let docs = documents_for(snapshot, cfg);
    store.invalidate_by_source(SOURCE).await?;
    let written = store.upsert_batch(&docs).await?;
    info!(
        snapshot_version = snapshot.version,
        documents = docs.len(),
        written,
        "config projection complete"
    );
    Ok(written)
}

/// LLM-assisted projection: a schema analyzer classifies raw tabs and emits
/// documents directly. Any failure falls back to the hardcoded projection.
pub async fn project_auto(
    snapshot: &ConfigSnapshot,
    raw: Option<Arc<RawDocument>>,
    llm: &dyn LanguageModel,
    store: &VectorStore,
    cfg: &ConfigHubConfig,
) -> miga_vector::Result<usize> {
    let Some(raw) = raw else {
        return project(snapshot, store, cfg).await;
    };

    match analyze_tabs(&raw, llm, cfg).await {
        Ok(docs) if !docs.is_empty() => {
            store.invalidate_by_source(SOURCE).await?;
            let written = store.upsert_batch(&docs).await?;
            info!(documents = docs.len(), written, "auto-discovered projection complete");
            Ok(written)
        }
        Ok(_) => {
            warn!("schema analyzer produced no documents, using hardcoded projection");
            project(snapshot, store, cfg).await
        }
        Err(e) => {
            warn!(error = %e, "schema analyzer failed, using hardcoded projection");
            project(snapshot, store, cfg).await
        }
    }
}

async fn analyze_tabs(
    raw: &RawDocument,
    llm: &dyn LanguageModel,
    cfg: &ConfigHubConfig,
) -> miga_llm::Result<Vec<Document>> {
    // Show the analyzer each tab's header plus a few sample rows.
    let mut description = String::new();
    for (tab, rows) in raw {
        description.push_str(&format!("### {tab}\n"));
        for row in rows.iter().take(4) {
            description.push_str(&row.join(" | "));
            description.push('\n');
        }
        description.push('\n');
    }

    let value = llm
        .structured(
            "schema_analyzer",
            SchemaKey::SheetSchemaAnalysis,
            "Eres un analista de datos. Clasifica cada pestaña de la hoja de \
             cálculo y genera un documento de búsqueda por cada fila relevante.",
            &[ChatMessage::user(description)],
        )
        .await?;

    let mut docs = Vec::new();
    if let Some(tabs) = value.get("tabs").and_then(|t| t.as_array()) {
        for tab in tabs {
            let category = tab.get("category").and_then(|c| c.as_str()).unwrap_or("other");
            if category == "other" {
                continue;
            }
            if let Some(contents) = tab.get("documents").and_then(|d| d.as_array()) {
                for content in contents.iter().filter_map(|c| c.as_str()) {
                    docs.push(
                        Document::new(content, category, SOURCE)
                            .with_ttl(cfg.projection_ttl_secs),
                    );
                }
            }
        }
    }
    Ok(docs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Branch, CannedReply, Faq, Product};

    fn snapshot() -> ConfigSnapshot {
        let mut snap = ConfigSnapshot::empty(3, false);
        snap.branches.push(Branch {
            id: "centro".to_string(),
            name: "Sucursal Centro".to_string(),
            short_name: Some("Centro".to_string()),
            address: Some("Av. Juárez 10".to_string()),
            city: Some("CDMX".to_string()),
            phone: None,
            hours: None,
            synonyms: vec!["zócalo".to_string()],
            enabled: true,
        });
        snap.branches.push(Branch {
            id: "norte".to_string(),
            name: "Sucursal Norte".to_string(),
            short_name: None,
            address: None,
            city: None,
            phone: None,
            hours: None,
            synonyms: vec![],
            enabled: false,
        });
        snap.products.push(Product {
            woo_id: Some(881),
            sku: None,
            name: "Rosca de Reyes".to_string(),
            category: Some("temporada".to_string()),
            price: Some(350.0),
            description: None,
            fuzzy_keywords: vec!["pan de reyes".to_string()],
            seasonal: true,
            enabled: true,
        });
        snap.faqs.push(Faq {
            question: "¿Hacen envíos?".to_string(),
            answer: "Sí, a toda la ciudad".to_string(),
            keywords: vec!["envío".to_string()],
            enabled: true,
        });
        snap.canned.push(CannedReply {
            trigger: "horario".to_string(),
            response: "Abrimos de 7:00 a 21:00".to_string(),
            keywords: vec![],
            enabled: true,
        });
        snap
    }

    #[test]
    fn disabled_entities_are_not_projected() {
        let docs = documents_for(&snapshot(), &Default::default());
        let branches: Vec<_> = docs.iter().filter(|d| d.category == "branch").collect();
        assert_eq!(branches.len(), 1);
        assert!(branches[0].content.contains("zócalo"));
        assert!(branches[0].content.contains("branch:centro"));
    }

    #[test]
    fn canned_and_faq_carry_the_response_in_metadata() {
        let docs = documents_for(&snapshot(), &Default::default());
        let canned = docs.iter().find(|d| d.category == "canned").unwrap();
        assert_eq!(canned.metadata["response"], "Abrimos de 7:00 a 21:00");
        let faq = docs.iter().find(|d| d.category == "faq").unwrap();
        assert_eq!(faq.metadata["response"], "Sí, a toda la ciudad");
        // Matching text stays in the content, not the answer.
        assert!(faq.content.contains("envíos") || faq.content.contains("envío"));
    }

    #[test]
    fn product_synonyms_are_searchable() {
        let docs = documents_for(&snapshot(), &Default::default());
        let product = docs.iter().find(|d| d.category == "product").unwrap();
        assert!(product.content.contains("pan de reyes"));
        assert_eq!(product.metadata["price"], 350.0);
    }
}
