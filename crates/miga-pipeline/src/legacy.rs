//! The legacy reasoning flow: analyze → retrieve → generate → validate →
//! revise. Slower and costlier than the optimized flow but more deliberate;
//! it is also the safety net the selector falls back to. This flow never
//! errors outward: unrecoverable generation failure produces the fixed
//! apology reply.

use std::time::Instant;

use serde_json::json;
use tracing::{debug, warn};

use miga_core::types::{FlowType, ReplyOutcome, ReplySource, Role};
use miga_llm::{
    AgentReply, ChatMessage, MessageAnalysis, SchemaKey, ValidationVerdict, Verdict,
};
use miga_memory::ContextOptions;
use miga_vector::SearchOptions;

use crate::context;
use crate::optimized::finish;
use crate::prompt;
use crate::sanitize::sanitize_channel_hints;
use crate::selector::{PipelineDeps, ReplyRequest};
use crate::{APOLOGY_CONFIDENCE, APOLOGY_REPLY};

pub async fn run(deps: &PipelineDeps, req: &ReplyRequest) -> ReplyOutcome {
    let start = Instant::now();
    let mut ai_calls: u32 = 0;

    // Idempotent: when the optimized flow already appended this inbound
    // message before failing over, the duplicate is elided.
    deps.memory
        .add_message(
            req.conversation_id,
            Role::User,
            &req.message_text,
            req.contact_id,
            json!({"direction": "inbound"}),
        )
        .await;

    let snapshot = deps.hub.current();
    let memory_ctx = deps
        .memory
        .get_context_for_llm(
            req.conversation_id,
            &ContextOptions {
                max_messages: Some(deps.cfg.max_history),
                contact_id: req.contact_id,
                current_query: Some(req.message_text.clone()),
            },
        )
        .await;
    let mut history_messages = memory_ctx.messages;
    if history_messages
        .last()
        .is_some_and(|m| m.role == Role::User && m.content == req.message_text)
    {
        history_messages.pop();
    }
    let history = context::format_history(&history_messages, deps.cfg.history_max_chars);

    // 1. Analyzer. A failure here degrades to a neutral analysis rather
    // than losing the turn.
    ai_calls += 1;
    let analysis = match deps
        .llm
        .structured(
            "analyzer",
            SchemaKey::MessageAnalysis,
            &prompt::analyzer_system(),
            &[ChatMessage::user(req.message_text.clone())],
        )
        .await
        .and_then(MessageAnalysis::from_value)
    {
        Ok(a) => a,
        Err(e) => {
            warn!(error = %e, "analyzer failed, using neutral analysis");
            MessageAnalysis {
                intent: "unknown".to_string(),
                frustration_level: 0,
                loop_detected: false,
                strategy: "direct".to_string(),
                data_needs: Vec::new(),
            }
        }
    };

    // 2. Retriever (code, no LLM). Works off the snapshot pinned above so a
    // mid-request refresh cannot split what this turn sees.
    let mut retrieved = retrieve(deps, req, &analysis, &snapshot).await;
    if !memory_ctx.context_text.is_empty() {
        if !retrieved.is_empty() {
            retrieved.push_str("\n\n");
        }
        retrieved.push_str(&memory_ctx.context_text);
    }

    // 3/4. Generate, validate, revise.
    let mut revision_instructions: Option<String> = None;
    let mut revisions_left = deps.cfg.max_revisions;

    loop {
        ai_calls += 1;
        let system = prompt::generator_system(
            &snapshot,
            &analysis,
            &retrieved,
            &history,
            revision_instructions.as_deref(),
        );
        let reply = match deps
            .llm
            .structured(
                "generator",
                SchemaKey::MigaReply,
                &system,
                &[ChatMessage::user(req.message_text.clone())],
            )
            .await
            .and_then(AgentReply::from_value)
        {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "generator failed, emitting apology");
                return apology(deps, req, ai_calls, start).await;
            }
        };

        let text = sanitize_channel_hints(
            &reply.reply,
            &req.message_text,
            reply.needs_handoff,
            &deps.cfg.blocked_channel_hints,
        );

        if deps.cfg.skip_validator {
            return committed(deps, req, text, ai_calls, reply.confidence, start).await;
        }

        ai_calls += 1;
        let verdict = match deps
            .llm
            .structured(
                "validator",
                SchemaKey::ResponseValidation,
                &prompt::validator_system(),
                &[ChatMessage::user(format!(
                    "Mensaje del cliente: {}\n\nRespuesta propuesta: {}",
                    req.message_text, text
                ))],
            )
            .await
            .and_then(ValidationVerdict::from_value)
        {
            Ok(v) => v,
            Err(e) => {
                // A broken validator must not block replies.
                warn!(error = %e, "validator failed, committing unvalidated reply");
                return committed(deps, req, text, ai_calls, reply.confidence, start).await;
            }
        };

        match verdict.verdict {
            Verdict::Approve => {
                return committed(deps, req, text, ai_calls, reply.confidence, start).await;
            }
            Verdict::Reject => {
                warn!(
                    conversation_id = req.conversation_id,
                    reasons = ?verdict.reasons,
                    "validator rejected the candidate reply"
                );
                return apology(deps, req, ai_calls, start).await;
            }
            Verdict::NeedsRevision if revisions_left > 0 => {
                revisions_left -= 1;
                revision_instructions = verdict.revision_instructions.clone();
                debug!(
                    conversation_id = req.conversation_id,
                    revisions_left, "revising candidate reply"
                );
            }
            Verdict::NeedsRevision => {
                // Revision budget spent; the last candidate ships as-is.
                warn!(
                    conversation_id = req.conversation_id,
                    "revision budget exhausted, committing last candidate"
                );
                return committed(deps, req, text, ai_calls, reply.confidence, start).await;
            }
        }
    }
}

async fn committed(
    deps: &PipelineDeps,
    req: &ReplyRequest,
    text: String,
    ai_calls: u32,
    confidence: f64,
    start: Instant,
) -> ReplyOutcome {
    finish(
        deps,
        req,
        text,
        ReplySource::Ai,
        ai_calls,
        confidence,
        FlowType::Legacy,
        start,
    )
    .await
}

async fn apology(
    deps: &PipelineDeps,
    req: &ReplyRequest,
    ai_calls: u32,
    start: Instant,
) -> ReplyOutcome {
    finish(
        deps,
        req,
        APOLOGY_REPLY.to_string(),
        ReplySource::Ai,
        ai_calls,
        APOLOGY_CONFIDENCE,
        FlowType::Legacy,
        start,
    )
    .await
}

/// Load the data the analyzer asked for from the pinned snapshot, plus a
/// best-effort vector search. Pure retrieval, no LLM.
async fn retrieve(
    deps: &PipelineDeps,
    req: &ReplyRequest,
    analysis: &MessageAnalysis,
    snapshot: &miga_confighub::ConfigSnapshot,
) -> String {
    let lower = req.message_text.to_lowercase();
    let needs = |what: &str| analysis.data_needs.iter().any(|n| n == what);
    let mut sections: Vec<String> = Vec::new();

    let matching_canned: Vec<_> = snapshot
        .canned
        .iter()
        .filter(|c| c.enabled)
        .filter(|c| {
            lower.contains(&c.trigger.to_lowercase())
                || c.keywords.iter().any(|k| lower.contains(&k.to_lowercase()))
        })
        .collect();
    if !matching_canned.is_empty() {
        let mut lines = vec!["Respuestas sugeridas:".to_string()];
        for c in matching_canned.iter().take(3) {
            lines.push(format!("- {}", c.response));
        }
        sections.push(lines.join("\n"));
    }

    let matching_faqs: Vec<_> = snapshot
        .faqs
        .iter()
        .filter(|f| f.enabled)
        .filter(|f| {
            f.keywords.iter().any(|k| lower.contains(&k.to_lowercase()))
                || lower.contains(&f.question.to_lowercase())
        })
        .take(3)
        .collect();
    if !matching_faqs.is_empty() {
        let mut lines = vec!["Preguntas frecuentes:".to_string()];
        for f in matching_faqs {
            lines.push(format!("- {}: {}", f.question, f.answer));
        }
        sections.push(lines.join("\n"));
    }

    if needs("branch_info") {
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

    if needs("product_info") {
        let mut lines = vec!["Productos:".to_string()];
        for p in snapshot.products.iter().filter(|p| p.enabled).take(15) {
            let mut line = format!("- {}", p.name);
            if let Some(price) = p.price {
                line.push_str(&format!(": ${price:.2}"));
            }
            lines.push(line);
        }
        if lines.len() > 1 {
            sections.push(lines.join("\n"));
        }
    }

    if needs("promo_info") {
        let active = snapshot.active_season_rules(chrono::Utc::now());
        if !active.is_empty() {
            let mut lines = vec!["Temporada activa:".to_string()];
            for rule in active {
                lines.push(format!(
                    "- {}{}",
                    rule.name,
                    rule.note.as_deref().map(|n| format!(": {n}")).unwrap_or_default()
                ));
            }
            sections.push(lines.join("\n"));
        }
    }

    // Vector-store knowledge, best-effort: outages just mean less context.
    match deps
        .vector
        .search(
            &req.message_text,
            &SearchOptions {
                limit: Some(3),
                ..Default::default()
            },
        )
        .await
    {
        Ok(hits) if !hits.is_empty() => {
            let mut lines = vec!["Información relacionada:".to_string()];
            for hit in hits {
                lines.push(format!("- {}", hit.content));
            }
            sections.push(lines.join("\n"));
        }
        Ok(_) => {}
        Err(e) => debug!(error = %e, "knowledge search unavailable, skipping"),
    }

    let joined = sections.join("\n\n");
    if joined.len() > deps.cfg.context_max_chars {
        let mut end = deps.cfg.context_max_chars;
        while end > 0 && !joined.is_char_boundary(end) {
            end -= 1;
        }
        joined[..end].to_string()
    } else {
        joined
    }
}
