//! Task documents
//!
//! Tasks are derived from lead state and never created by end users. The
//! `kind` field is the task's identity for reconciliation; `description` is
//! only for people.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::ids::{InstallmentId, LeadId, TaskId};
use crate::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskNature {
    /// Awaiting a response from the lead; drives AFC advancement
    Interactive,
    /// Operator chore
    Procedural,
}

impl TaskNature {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskNature::Interactive => "Interactive",
            TaskNature::Procedural => "Procedural",
        }
    }
}

impl fmt::Display for TaskNature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskNature {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Interactive" => Ok(TaskNature::Interactive),
            "Procedural" => Ok(TaskNature::Procedural),
            other => Err(Error::Validation(format!("unknown task nature '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum TaskKind {
    /// "Day N Follow-up" for AFC step `step`
    FollowUp { step: u8 },
    /// Operator-chosen follow-up date from a `Later` outcome
    ScheduledFollowUp,
    /// Chore created by an `Info` outcome
    InfoRequest,
    EventConfirmation { event_type: String },
    EventReminder { event_type: String },
    LearnerSetup,
    PaymentReminder { installment_id: InstallmentId },
}

impl TaskKind {
    pub fn nature(&self) -> TaskNature {
        match self {
            TaskKind::FollowUp { .. } | TaskKind::ScheduledFollowUp => TaskNature::Interactive,
            _ => TaskNature::Procedural,
        }
    }

    /// Follow-up tasks are what `DeleteFollowUps` removes
    pub fn is_follow_up(&self) -> bool {
        matches!(self, TaskKind::FollowUp { .. } | TaskKind::ScheduledFollowUp)
    }

    /// AFC step follow-ups only (the afc_step invariant counts these)
    pub fn is_cycle_follow_up(&self) -> bool {
        matches!(self, TaskKind::FollowUp { .. })
    }

    pub fn is_event_task_for(&self, event: &str) -> bool {
        match self {
            TaskKind::EventConfirmation { event_type } | TaskKind::EventReminder { event_type } => {
                event_type == event
            }
            _ => false,
        }
    }
}

/// "Day N Follow-up"
pub fn follow_up_description(day_offset: u32) -> String {
    format!("Day {} Follow-up", day_offset)
}

pub const SCHEDULED_FOLLOW_UP_DESCRIPTION: &str = "Scheduled Follow-up";

pub fn confirmation_description(event_type: &str) -> String {
    format!("Confirm attendance for {}", event_type)
}

pub fn reminder_description(event_type: &str) -> String {
    format!("Remind about {}", event_type)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub lead_id: LeadId,
    /// Snapshot of the lead's name at creation
    pub lead_name: String,
    pub description: String,
    pub nature: TaskNature,
    pub kind: TaskKind,
    pub completed: bool,
    pub due_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Task {
    /// New open task; nature follows from the kind
    pub fn new(
        lead_id: LeadId,
        lead_name: impl Into<String>,
        kind: TaskKind,
        description: impl Into<String>,
        due_date: Option<DateTime<Utc>>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: TaskId::generate(),
            lead_id,
            lead_name: lead_name.into(),
            description: description.into(),
            nature: kind.nature(),
            kind,
            completed: false,
            due_date,
            created_at,
        }
    }

    pub fn is_open(&self) -> bool {
        !self.completed
    }
}
