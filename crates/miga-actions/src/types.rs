use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// How much human oversight an action needs before it may execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutonomyLevel {
    /// Executes immediately, approved by the system itself.
    Auto,
    /// Held as a draft until a staff member confirms (24 h expiry).
    Draft,
    /// Requires explicit human approval (48 h expiry).
    Approval,
    /// Requires approval plus a second factor.
    Critical,
}

impl AutonomyLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AutonomyLevel::Auto => "auto",
            AutonomyLevel::Draft => "draft",
            AutonomyLevel::Approval => "approval",
            AutonomyLevel::Critical => "critical",
        }
    }
}

impl std::str::FromStr for AutonomyLevel {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "auto" => Ok(AutonomyLevel::Auto),
            "draft" => Ok(AutonomyLevel::Draft),
            "approval" => Ok(AutonomyLevel::Approval),
            "critical" => Ok(AutonomyLevel::Critical),
            other => Err(format!("unknown autonomy level '{other}'")),
        }
    }
}

/// Which external plane executes an approved action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerKind {
    ChatProvider,
    Sheets,
    Webhook,
    Internal,
}

impl HandlerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HandlerKind::ChatProvider => "chat_provider",
            HandlerKind::Sheets => "sheets",
            HandlerKind::Webhook => "webhook",
            HandlerKind::Internal => "internal",
        }
    }
}

impl std::str::FromStr for HandlerKind {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "chat_provider" => Ok(HandlerKind::ChatProvider),
            "sheets" => Ok(HandlerKind::Sheets),
            "webhook" => Ok(HandlerKind::Webhook),
            "internal" => Ok(HandlerKind::Internal),
            other => Err(format!("unknown handler kind '{other}'")),
        }
    }
}

/// Lifecycle states. Only the four pre-approval states are cancellable and
/// only `Approved` may start executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionState {
    Proposed,
    Draft,
    PendingApproval,
    Pending2fa,
    Approved,
    Executing,
    Executed,
    Failed,
    Rejected,
    Cancelled,
    Expired,
}

impl ActionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionState::Proposed => "proposed",
            ActionState::Draft => "draft",
            ActionState::PendingApproval => "pending_approval",
            ActionState::Pending2fa => "pending_2fa",
            ActionState::Approved => "approved",
            ActionState::Executing => "executing",
            ActionState::Executed => "executed",
            ActionState::Failed => "failed",
            ActionState::Rejected => "rejected",
            ActionState::Cancelled => "cancelled",
            ActionState::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ActionState::Executed
                | ActionState::Failed
                | ActionState::Rejected
                | ActionState::Cancelled
                | ActionState::Expired
        )
    }

    pub fn is_cancellable(&self) -> bool {
        matches!(
            self,
            ActionState::Proposed
                | ActionState::Draft
                | ActionState::PendingApproval
                | ActionState::Pending2fa
        )
    }

    /// The legal state graph; every transition the bus performs goes
    /// through this predicate.
    pub fn can_transition_to(&self, to: ActionState) -> bool {
        use ActionState::*;
        match (self, to) {
            (Proposed, Draft | PendingApproval | Approved) => true,
            (Proposed, Rejected | Cancelled | Expired) => true,
            (Draft, Approved | Rejected | Cancelled | Expired) => true,
            (PendingApproval, Approved | Pending2fa | Rejected | Cancelled | Expired) => true,
            (Pending2fa, Approved | Rejected | Cancelled | Expired) => true,
            (Approved, Executing) => true,
            (Executing, Executed | Failed) => true,
            _ => false,
        }
    }
}

impl std::str::FromStr for ActionState {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "proposed" => Ok(ActionState::Proposed),
            "draft" => Ok(ActionState::Draft),
            "pending_approval" => Ok(ActionState::PendingApproval),
            "pending_2fa" => Ok(ActionState::Pending2fa),
            "approved" => Ok(ActionState::Approved),
            "executing" => Ok(ActionState::Executing),
            "executed" => Ok(ActionState::Executed),
            "failed" => Ok(ActionState::Failed),
            "rejected" => Ok(ActionState::Rejected),
            "cancelled" => Ok(ActionState::Cancelled),
            "expired" => Ok(ActionState::Expired),
            other => Err(format!("unknown action state '{other}'")),
        }
    }
}

/// A proposed side effect, before the bus assigns identity and level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposedAction {
    pub action_type: String,
    pub payload: Value,
    #[serde(default)]
    pub context: Value,
    pub requested_by: String,
    pub reason: String,
}

/// One persisted action with its full lifecycle bookkeeping.
#[derive(Debug, Clone, Serialize)]
pub struct ActionRecord {
    pub action_id: Uuid,
    pub action_type: String,
    pub payload: Value,
    pub context: Value,
    pub requested_by: String,
    pub reason: String,
    pub autonomy_level: AutonomyLevel,
    pub handler: HandlerKind,
    pub state: ActionState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    /// approved_by, executed_at, execution_result, failure_reason, 2FA
    /// bookkeeping.
    pub metadata: Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use ActionState::*;

    const ALL: [ActionState; 11] = [
        Proposed,
        Draft,
        PendingApproval,
        Pending2fa,
        Approved,
        Executing,
        Executed,
        Failed,
        Rejected,
        Cancelled,
        Expired,
    ];

    #[test]
    fn terminal_states_have_no_outgoing_edges() {
        for from in ALL.iter().filter(|s| s.is_terminal()) {
            for to in ALL {
                assert!(!from.can_transition_to(to), "{from:?} → {to:?} must be illegal");
            }
        }
    }

    #[test]
    fn only_approved_can_start_executing() {
        for from in ALL {
            assert_eq!(
                from.can_transition_to(Executing),
                from == Approved,
                "{from:?} → Executing"
            );
        }
    }

    #[test]
    fn cancellable_set_matches_the_contract() {
        let cancellable: Vec<_> = ALL.iter().filter(|s| s.is_cancellable()).collect();
        assert_eq!(
            cancellable,
            vec![&Proposed, &Draft, &PendingApproval, &Pending2fa]
        );
        for state in cancellable {
            assert!(state.can_transition_to(Cancelled));
        }
    }

    #[test]
    fn critical_path_is_reachable() {
        // PROPOSED → PENDING_APPROVAL → PENDING_2FA → APPROVED → EXECUTING → EXECUTED
        assert!(Proposed.can_transition_to(PendingApproval));
        assert!(PendingApproval.can_transition_to(Pending2fa));
        assert!(Pending2fa.can_transition_to(Approved));
        assert!(Approved.can_transition_to(Executing));
        assert!(Executing.can_transition_to(Executed));
    }

    #[test]
    fn state_strings_round_trip() {
        for state in ALL {
            assert_eq!(state.as_str().parse::<ActionState>().unwrap(), state);
        }
    }
}
