//! Static action registry: the closed set of action types the platform can
//! execute, each mapped to an autonomy level and a handler kind. The lookup
//! table stays data so deployments can override levels in configuration,
//! but the type set itself is exhaustive at the boundary.

use std::collections::HashMap;

use crate::error::ActionError;
use crate::types::{AutonomyLevel, HandlerKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionType {
    SendMessage,
    SendNote,
    TagConversation,
    AssignConversation,
    ResolveConversation,
    NotifyWebhook,
    UpdateSheetRow,
    RestockProduct,
    IssueRefund,
    SuspendEmployeeAccess,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::SendMessage => "send_message",
            ActionType::SendNote => "send_note",
            ActionType::TagConversation => "tag_conversation",
            ActionType::AssignConversation => "assign_conversation",
            ActionType::ResolveConversation => "resolve_conversation",
            ActionType::NotifyWebhook => "notify_webhook",
            ActionType::UpdateSheetRow => "update_sheet_row",
            ActionType::RestockProduct => "restock_product",
            ActionType::IssueRefund => "issue_refund",
            ActionType::SuspendEmployeeAccess => "suspend_employee_access",
        }
    }

    pub fn parse(s: &str) -> Result<Self, ActionError> {
        match s {
            "send_message" => Ok(ActionType::SendMessage),
            "send_note" => Ok(ActionType::SendNote),
            "tag_conversation" => Ok(ActionType::TagConversation),
            "assign_conversation" => Ok(ActionType::AssignConversation),
            "resolve_conversation" => Ok(ActionType::ResolveConversation),
            "notify_webhook" => Ok(ActionType::NotifyWebhook),
            "update_sheet_row" => Ok(ActionType::UpdateSheetRow),
            "restock_product" => Ok(ActionType::RestockProduct),
            "issue_refund" => Ok(ActionType::IssueRefund),
            "suspend_employee_access" => Ok(ActionType::SuspendEmployeeAccess),
            other => Err(ActionError::UnknownActionType(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ActionSpec {
    pub autonomy: AutonomyLevel,
    pub handler: HandlerKind,
}

pub struct ActionRegistry {
    entries: HashMap<ActionType, ActionSpec>,
}

impl Default for ActionRegistry {
    fn default() -> Self {
        use ActionType::*;
        use AutonomyLevel::*;
        use HandlerKind::*;

        let table: [(ActionType, AutonomyLevel, HandlerKind); 10] = [
            (SendMessage, Auto, ChatProvider),
            (SendNote, Auto, ChatProvider),
            (TagConversation, Auto, ChatProvider),
            (AssignConversation, Draft, ChatProvider),
            (ResolveConversation, Draft, ChatProvider),
            (NotifyWebhook, Auto, Webhook),
            (UpdateSheetRow, Approval, Sheets),
            (RestockProduct, Approval, Sheets),
            (IssueRefund, Critical, Internal),
            (SuspendEmployeeAccess, Critical, Internal),
        ];
        Self {
            entries: table
                .into_iter()
                .map(|(t, autonomy, handler)| (t, ActionSpec { autonomy, handler }))
                .collect(),
        }
    }
}

impl ActionRegistry {
    /// Override a type's autonomy level (configuration-driven routing).
    pub fn set_autonomy(&mut self, action_type: ActionType, autonomy: AutonomyLevel) {
        if let Some(spec) = self.entries.get_mut(&action_type) {
            spec.autonomy = autonomy;
        }
    }

    pub fn spec(&self, action_type: ActionType) -> ActionSpec {
        // Every variant is seeded in Default; the fallback guards custom
        // registries built by hand.
        self.entries
            .get(&action_type)
            .copied()
            .unwrap_or(ActionSpec {
                autonomy: AutonomyLevel::Approval,
                handler: HandlerKind::Internal,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_type_round_trips_and_has_a_spec() {
        let registry = ActionRegistry::default();
        for t in [
            ActionType::SendMessage,
            ActionType::SendNote,
            ActionType::TagConversation,
            ActionType::AssignConversation,
            ActionType::ResolveConversation,
            ActionType::NotifyWebhook,
            ActionType::UpdateSheetRow,
            ActionType::RestockProduct,
            ActionType::IssueRefund,
            ActionType::SuspendEmployeeAccess,
        ] {
            assert_eq!(ActionType::parse(t.as_str()).unwrap(), t);
            let _ = registry.spec(t);
        }
    }

    #[test]
    fn destructive_actions_are_gated_hardest() {
        let registry = ActionRegistry::default();
        assert_eq!(
            registry.spec(ActionType::SuspendEmployeeAccess).autonomy,
            AutonomyLevel::Critical
        );
        assert_eq!(
            registry.spec(ActionType::SendMessage).autonomy,
            AutonomyLevel::Auto
        );
    }

    #[test]
    fn unknown_type_is_rejected_at_the_boundary() {
        assert!(matches!(
            ActionType::parse("drop_database"),
            Err(ActionError::UnknownActionType(_))
        ));
    }

    #[test]
    fn autonomy_can_be_overridden() {
        let mut registry = ActionRegistry::default();
        registry.set_autonomy(ActionType::SendMessage, AutonomyLevel::Approval);
        assert_eq!(
            registry.spec(ActionType::SendMessage).autonomy,
            AutonomyLevel::Approval
        );
    }
}
