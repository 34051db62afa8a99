//! The optimized reply flow (hot path): semantic cache → canned match →
//! one LLM call with minimal context. Zero LLM calls on the first two
//! outcomes; the third writes the cache for next time.

use std::time::Instant;

use serde_json::json;
use tracing::{debug, warn};

use miga_core::types::{FlowType, ReplyOutcome, ReplySource, Role};
use miga_llm::{AgentReply, ChatMessage, SchemaKey};
use miga_memory::ContextOptions;
use miga_vector::SearchOptions;

use crate::context;
use crate::error::Result;
use crate::prompt;
use crate::sanitize::sanitize_channel_hints;
use crate::selector::{PipelineDeps, ReplyRequest};

pub async fn run(deps: &PipelineDeps, req: &ReplyRequest) -> Result<ReplyOutcome> {
    let start = Instant::now();

    deps.memory
        .add_message(
            req.conversation_id,
            Role::User,
            &req.message_text,
            req.contact_id,
            json!({"direction": "inbound"}),
        )
        .await;

    // 1. Semantic cache: a prior reply to an equivalent question.
    match deps
        .vector
        .get_cached_response(&req.message_text, deps.cfg.cache_similarity_threshold)
        .await
    {
        Ok(Some(hit)) => {
            debug!(
                conversation_id = req.conversation_id,
                similarity = hit.similarity,
                "semantic cache hit"
            );
            let confidence = hit
                .metadata
                .get("confidence")
                .and_then(|v| v.as_f64())
                .unwrap_or(f64::from(hit.similarity));
            return Ok(finish(
                deps,
                req,
                hit.response,
                ReplySource::Cache,
                0,
                confidence,
                FlowType::Optimized,
                start,
            )
            .await);
        }
        Ok(None) => {}
        // Embedding or store outage: skip the semantic path, never fail.
        Err(e) => debug!(error = %e, "semantic cache unavailable, skipping"),
    }

    // 2. Canned/FAQ match at the stricter threshold.
    for category in ["canned", "faq"] {
        let opts = SearchOptions {
            category: Some(category.to_string()),
            threshold: Some(deps.cfg.canned_similarity_threshold),
            ..Default::default()
        };
        match deps.vector.find_best_match(&req.message_text, &opts).await {
            Ok(Some(hit)) => {
                debug!(
                    conversation_id = req.conversation_id,
                    category,
                    similarity = hit.similarity,
                    "canned hit"
                );
                let response = hit
                    .metadata
                    .get("response")
                    .and_then(|v| v.as_str())
                    .map(String::from)
                    .unwrap_or(hit.content);
                return Ok(finish(
                    deps,
                    req,
                    response,
                    ReplySource::Canned,
                    0,
                    f64::from(hit.similarity),
                    FlowType::Optimized,
                    start,
                )
                .await);
            }
            Ok(None) => {}
            Err(e) => {
                debug!(error = %e, "canned lookup unavailable, skipping");
                break;
            }
        }
    }

    // 3. Single LLM call with minimal, keyword-gated context.
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

    let mut business_context = context::build_minimal_context(&snapshot, &req.message_text, &deps.cfg);
    if !memory_ctx.context_text.is_empty() {
        if !business_context.is_empty() {
            business_context.push_str("\n\n");
        }
        business_context.push_str(&memory_ctx.context_text);
    }

    // The inbound message is already in the tail; keep it out of the
    // history block since it is sent as the user turn.
    let mut history_messages = memory_ctx.messages;
    if history_messages
        .last()
        .is_some_and(|m| m.role == Role::User && m.content == req.message_text)
    {
        history_messages.pop();
    }
    let history = context::format_history(&history_messages, deps.cfg.history_max_chars);

    let system = prompt::optimized_system(&snapshot, &business_context, &history);
    let value = deps
        .llm
        .structured(
            "reply",
            SchemaKey::MigaReply,
            &system,
            &[ChatMessage::user(req.message_text.clone())],
        )
        .await?;
    let reply = AgentReply::from_value(value)?;

    let text = sanitize_channel_hints(
        &reply.reply,
        &req.message_text,
        reply.needs_handoff,
        &deps.cfg.blocked_channel_hints,
    );

    if reply.confidence > deps.cfg.cache_min_confidence {
        if let Err(e) = deps
            .vector
            .set_cached_response(
                &req.message_text,
                &text,
                "general",
                json!({"confidence": reply.confidence, "intent": reply.intent}),
                deps.cfg.cache_entry_ttl_secs,
            )
            .await
        {
            debug!(error = %e, "semantic cache write skipped");
        }
    }

    Ok(finish(
        deps,
        req,
        text,
        ReplySource::Ai,
        1,
        reply.confidence,
        FlowType::Optimized,
        start,
    )
    .await)
}

/// Shared tail of both flows: record the outbound turn, send it, and build
/// the outcome. Send failures are logged and swallowed; the reply already
/// exists and a queue retry would duplicate LLM cost.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn finish(
    deps: &PipelineDeps,
    req: &ReplyRequest,
    response: String,
    source: ReplySource,
    ai_calls: u32,
    confidence: f64,
    flow_type: FlowType,
    start: Instant,
) -> ReplyOutcome {
    deps.memory
        .add_message(
            req.conversation_id,
            Role::Assistant,
            &response,
            req.contact_id,
            json!({"source": source.as_str(), "flow": flow_type.as_str()}),
        )
        .await;

    if let Err(e) = deps
        .sender
        .send_reply(req.account_id, req.conversation_id, &response)
        .await
    {
        warn!(
            conversation_id = req.conversation_id,
            error = %e,
            "outbound send failed after reply was recorded"
        );
    }

    ReplyOutcome {
        response,
        source,
        ai_calls,
        duration_ms: start.elapsed().as_millis() as u64,
        flow_type,
        confidence,
    }
}
