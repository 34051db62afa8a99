//! Queue consumer: turns inbound jobs into pipeline runs.
//!
//! The handler is idempotent by construction (duplicate deliveries are
//! elided by the memory append and answered from the semantic cache), and
//! it always reports success once a visible reply was produced so queue
//! retries never duplicate LLM spend.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use miga_core::types::InboundJob;
use miga_pipeline::{PipelineSelector, ReplyRequest};
use miga_queue::{HandlerError, JobHandler};

pub struct ReplyJobHandler {
    selector: Arc<PipelineSelector>,
}

impl ReplyJobHandler {
    pub fn new(selector: Arc<PipelineSelector>) -> Self {
        Self { selector }
    }
}

#[async_trait]
impl JobHandler for ReplyJobHandler {
    async fn handle(&self, job: InboundJob) -> Result<(), HandlerError> {
        let request = ReplyRequest {
            conversation_id: job.conversation_id,
            account_id: job.account_id,
            contact_id: job.contact_id,
            message_text: job.content,
        };

        // The selector is total: worst case it produces the apology reply.
        // Anything that happens after that reply exists must not bubble up
        // into a redelivery.
        let outcome = self.selector.handle(&request).await;
        info!(
            conversation_id = request.conversation_id,
            source = outcome.source.as_str(),
            flow = outcome.flow_type.as_str(),
            ai_calls = outcome.ai_calls,
            duration_ms = outcome.duration_ms,
            "job handled"
        );
        Ok(())
    }
}
