use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::conversation::ConversationId;
use crate::domain::workspace::WorkspaceId;
use crate::errors::DomainError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditCategory {
    Ingress,
    Dialogue,
    Billing,
    Escalation,
    Persistence,
    System,
}

impl AuditCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ingress => "ingress",
            Self::Dialogue => "dialogue",
            Self::Billing => "billing",
            Self::Escalation => "escalation",
            Self::Persistence => "persistence",
            Self::System => "system",
        }
    }
}

impl FromStr for AuditCategory {
    type Err = DomainError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "ingress" => Ok(Self::Ingress),
            "dialogue" => Ok(Self::Dialogue),
            "billing" => Ok(Self::Billing),
            "escalation" => Ok(Self::Escalation),
            "persistence" => Ok(Self::Persistence),
            "system" => Ok(Self::System),
            _ => Err(DomainError::UnknownStatus { kind: "audit category", value: raw.to_owned() }),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Rejected,
    Failed,
}

impl AuditOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Rejected => "rejected",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for AuditOutcome {
    type Err = DomainError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "success" => Ok(Self::Success),
            "rejected" => Ok(Self::Rejected),
            "failed" => Ok(Self::Failed),
            _ => Err(DomainError::UnknownStatus { kind: "audit outcome", value: raw.to_owned() }),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditContext {
    pub workspace_id: WorkspaceId,
    pub conversation_id: Option<ConversationId>,
    pub correlation_id: String,
    pub actor: String,
}

impl AuditContext {
    pub fn new(
        workspace_id: WorkspaceId,
        conversation_id: Option<ConversationId>,
        correlation_id: impl Into<String>,
        actor: impl Into<String>,
    ) -> Self {
        Self {
            workspace_id,
            conversation_id,
            correlation_id: correlation_id.into(),
            actor: actor.into(),
        }
    }

    pub fn event(
        &self,
        event_type: impl Into<String>,
        category: AuditCategory,
        outcome: AuditOutcome,
    ) -> AuditEvent {
        AuditEvent::new(
            self.workspace_id,
            self.conversation_id,
            self.correlation_id.clone(),
            event_type,
            category,
            self.actor.clone(),
            outcome,
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: String,
    pub workspace_id: WorkspaceId,
    pub conversation_id: Option<ConversationId>,
    pub correlation_id: String,
    pub event_type: String,
    pub category: AuditCategory,
    pub actor: String,
    pub outcome: AuditOutcome,
    pub metadata: BTreeMap<String, String>,
    pub occurred_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(
        workspace_id: WorkspaceId,
        conversation_id: Option<ConversationId>,
        correlation_id: impl Into<String>,
        event_type: impl Into<String>,
        category: AuditCategory,
        actor: impl Into<String>,
        outcome: AuditOutcome,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            workspace_id,
            conversation_id,
            correlation_id: correlation_id.into(),
            event_type: event_type.into(),
            category,
            actor: actor.into(),
            outcome,
            metadata: BTreeMap::new(),
            occurred_at: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use crate::audit::{AuditCategory, AuditContext, AuditOutcome};
    use crate::domain::conversation::ConversationId;
    use crate::domain::workspace::WorkspaceId;

    #[test]
    fn context_stamps_correlation_fields_on_events() {
        let context =
            AuditContext::new(WorkspaceId(7), Some(ConversationId(42)), "msg-123", "billing-flow");
        let event = context
            .event("billing.unblock", AuditCategory::Billing, AuditOutcome::Failed)
            .with_metadata("invoice_id", "991")
            .with_metadata("detail", "contract not found");

        assert_eq!(event.workspace_id, WorkspaceId(7));
        assert_eq!(event.conversation_id, Some(ConversationId(42)));
        assert_eq!(event.correlation_id, "msg-123");
        assert_eq!(event.actor, "billing-flow");
        assert_eq!(event.metadata.get("invoice_id").map(String::as_str), Some("991"));
        assert!(!event.event_id.is_empty());
    }

    #[test]
    fn category_and_outcome_round_trip_storage_form() {
        for category in [AuditCategory::Billing, AuditCategory::Escalation, AuditCategory::System] {
            assert_eq!(category.as_str().parse::<AuditCategory>(), Ok(category));
        }
        assert_eq!("failed".parse::<AuditOutcome>(), Ok(AuditOutcome::Failed));
        assert!("maybe".parse::<AuditOutcome>().is_err());
    }
}
