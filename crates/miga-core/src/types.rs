use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One unit of webhook work carried by the queue.
///
/// Deliberately contains only serializable identifiers: a send callback can
/// not cross a broker, so the consumer reconstructs the outbound send from
/// `(account_id, conversation_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundJob {
    pub conversation_id: i64,
    pub account_id: i64,
    pub contact_id: Option<i64>,
    pub content: String,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a reply came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplySource {
    Cache,
    Canned,
    Ai,
}

impl ReplySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplySource::Cache => "cache",
            ReplySource::Canned => "canned",
            ReplySource::Ai => "ai",
        }
    }
}

/// Which pipeline produced a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowType {
    Optimized,
    Legacy,
}

impl FlowType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowType::Optimized => "optimized",
            FlowType::Legacy => "legacy",
        }
    }
}

/// Uniform result returned by the pipeline selector.
#[derive(Debug, Clone, Serialize)]
pub struct ReplyOutcome {
    pub response: String,
    pub source: ReplySource,
    pub ai_calls: u32,
    pub duration_ms: u64,
    pub flow_type: FlowType,
    pub confidence: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trip() {
        for role in [Role::User, Role::Assistant, Role::System] {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
    }

    #[test]
    fn job_survives_serialization() {
        let job = InboundJob {
            conversation_id: 42,
            account_id: 7,
            contact_id: Some(99),
            content: "¿tienen rosca?".to_string(),
            received_at: Utc::now(),
        };
        let json = serde_json::to_string(&job).unwrap();
        let back: InboundJob = serde_json::from_str(&json).unwrap();
        assert_eq!(back.conversation_id, 42);
        assert_eq!(back.contact_id, Some(99));
        assert_eq!(back.content, job.content);
    }
}
