//! Interaction log entries
//!
//! Entries are immutable once appended to a lead. Each carries exactly one
//! shape: a quick log, free-form feedback, a structured outcome, or one of the
//! system entries (import provenance, merge note) that never drive the AFC.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{InteractionId, LeadId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QuickLogType {
    Enrolled,
    Withdrawn,
    Invalid,
    Unresponsive,
    Followup,
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    Info,
    Later,
    #[serde(rename = "Event Scheduled")]
    EventScheduled,
    #[serde(rename = "Event Completed")]
    EventCompleted,
    #[serde(rename = "Event Cancelled")]
    EventCancelled,
}

/// The event a reschedule replaces
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PreviousEvent {
    #[serde(rename = "type", default)]
    pub event_type: Option<String>,
    #[serde(default)]
    pub date_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct EventDetails {
    #[serde(rename = "type", default)]
    pub event_type: Option<String>,
    #[serde(default)]
    pub date_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub rescheduled_from: Option<PreviousEvent>,
}

impl EventDetails {
    /// Event type with the generic fallback used in task descriptions
    pub fn type_or_default(&self) -> &str {
        self.event_type.as_deref().filter(|t| !t.is_empty()).unwrap_or("Event")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeLog {
    pub outcome: Outcome,
    #[serde(default)]
    pub follow_up_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub event_details: Option<EventDetails>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum InteractionKind {
    QuickLog { quick_log_type: QuickLogType },
    Feedback { feedback: String },
    Outcome(OutcomeLog),
    /// Import provenance; never triggers the AFC
    Initiated { source: String },
    /// Written on the surviving lead of a merge
    MergeNote { merged_lead_id: LeadId },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Interaction {
    pub id: InteractionId,
    pub created_at: DateTime<Utc>,
    pub kind: InteractionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Interaction {
    pub fn new(kind: InteractionKind, created_at: DateTime<Utc>) -> Self {
        Self {
            id: InteractionId::generate(),
            created_at,
            kind,
            notes: None,
        }
    }

    pub fn quick_log(quick_log_type: QuickLogType, created_at: DateTime<Utc>) -> Self {
        Self::new(InteractionKind::QuickLog { quick_log_type }, created_at)
    }

    pub fn feedback(text: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self::new(InteractionKind::Feedback { feedback: text.into() }, created_at)
    }

    pub fn outcome(log: OutcomeLog, created_at: DateTime<Utc>) -> Self {
        Self::new(InteractionKind::Outcome(log), created_at)
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn notes_str(&self) -> &str {
        self.notes.as_deref().unwrap_or("")
    }

    pub fn quick_log_type(&self) -> Option<QuickLogType> {
        match &self.kind {
            InteractionKind::QuickLog { quick_log_type } => Some(*quick_log_type),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_outcome_names_match_log_vocabulary() {
        let value = serde_json::to_value(Outcome::EventScheduled).unwrap();
        assert_eq!(value, json!("Event Scheduled"));
    }

    #[test]
    fn test_parse_outcome_interaction_from_json() {
        let raw = json!({
            "id": "i-1",
            "createdAt": "2026-04-01T10:00:00Z",
            "notes": "Booked a demo",
            "kind": {
                "type": "outcome",
                "outcome": "Event Scheduled",
                "eventDetails": { "type": "Demo", "dateTime": "2026-04-08T14:00:00Z" }
            }
        });
        let interaction: Interaction = serde_json::from_value(raw).unwrap();
        match interaction.kind {
            InteractionKind::Outcome(log) => {
                assert_eq!(log.outcome, Outcome::EventScheduled);
                let details = log.event_details.unwrap();
                assert_eq!(details.type_or_default(), "Demo");
                assert!(details.rescheduled_from.is_none());
            }
            other => panic!("unexpected kind {:?}", other),
        }
    }

    #[test]
    fn test_parse_quick_log_from_json() {
        let raw = json!({
            "id": "i-2",
            "createdAt": "2026-04-01T10:00:00Z",
            "kind": { "type": "quickLog", "quickLogType": "Unresponsive" }
        });
        let interaction: Interaction = serde_json::from_value(raw).unwrap();
        assert_eq!(interaction.quick_log_type(), Some(QuickLogType::Unresponsive));
    }

    #[test]
    fn test_event_type_fallback() {
        let details = EventDetails::default();
        assert_eq!(details.type_or_default(), "Event");
    }
}
