//! AFC Policy
//!
//! Pure decision function of the Automated Follow-up Cycle: given a lead
//! snapshot and one new interaction, compute the lead's new pursuit state and
//! the ordered task mutations that go with it. No I/O happens here; the
//! dispatcher applies the result inside the lead's transaction.

mod schedule;

pub use schedule::AfcSchedule;

use afc_common::model::task::{
    confirmation_description, follow_up_description, reminder_description,
    SCHEDULED_FOLLOW_UP_DESCRIPTION,
};
use afc_common::model::{
    Interaction, InteractionKind, Lead, LeadStatus, Outcome, OutcomeLog, QuickLogType,
    Relationship, TaskKind,
};
use afc_common::time::{add_days, at_local_time};
use afc_common::{Error, Result};
use chrono::{DateTime, FixedOffset, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::fmt;

/// Legacy free-text cancellation log, e.g. "Event Demo on 12 May marked as Cancelled"
static LEGACY_CANCELLATION: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"Event\s+(\S+).*marked as Cancelled").ok());

/// Chore text when an `Info` outcome carries no notes
pub const DEFAULT_INFO_DESCRIPTION: &str = "Provide requested information.";

pub const LEARNER_SETUP_DESCRIPTION: &str = "Set up learner enrollment";

/// Reminder only when the event is at least this many whole days away
const REMINDER_MIN_LEAD_DAYS: i64 = 3;

/// Task mutation requested by a decision, applied in order
#[derive(Debug, Clone, PartialEq)]
pub enum TaskIntent {
    /// Interactive "Day N Follow-up" for AFC step `step`
    CreateFollowUp {
        step: u8,
        day_offset: u32,
        due: DateTime<Utc>,
    },
    /// Interactive follow-up at an operator-chosen date
    CreateScheduledFollowUp { due: DateTime<Utc> },
    CreateProcedural {
        kind: TaskKind,
        description: String,
        due: Option<DateTime<Utc>>,
    },
    /// Mark every open Interactive task of the lead completed
    CompleteOpenInteractive,
    /// Remove open follow-up tasks
    DeleteFollowUps,
    /// Remove open confirmation/reminder tasks for one event type
    DeleteEventTasks { event_type: String },
}

/// Which dispatch rule produced a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Rule {
    /// System entries (import provenance, merge notes)
    Ignored,
    Feedback,
    Info,
    Later,
    EventScheduled,
    EventCancelled,
    EventCompleted,
    /// Enrolled / Withdrawn / Invalid
    Closed,
    Unresponsive,
    /// Any other responsive log restarts the cycle
    Restart,
    /// Lead-created initialization
    Initiate,
    /// Explicit stage from an import row
    Seed,
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// New lead state plus task intents
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub rule: Rule,
    pub has_engaged: bool,
    pub status: Option<LeadStatus>,
    pub relationship: Relationship,
    pub afc_step: u8,
    pub intents: Vec<TaskIntent>,
}

impl Decision {
    /// Start from the lead's current state with no intents
    fn unchanged(lead: &Lead, rule: Rule) -> Self {
        Self {
            rule,
            has_engaged: lead.has_engaged,
            status: lead.status,
            relationship: lead.relationship,
            afc_step: lead.afc_step,
            intents: Vec::new(),
        }
    }

    /// Copy the state deltas onto `lead`
    pub fn apply_to(&self, lead: &mut Lead) {
        // hasEngaged never goes back to false
        lead.has_engaged |= self.has_engaged;
        lead.status = self.status;
        lead.relationship = self.relationship;
        lead.afc_step = self.afc_step;
    }

    /// True when applying the decision would change nothing
    pub fn is_noop_for(&self, lead: &Lead) -> bool {
        self.intents.is_empty()
            && (lead.has_engaged || !self.has_engaged)
            && lead.status == self.status
            && lead.relationship == self.relationship
            && lead.afc_step == self.afc_step
    }
}

/// The AFC state machine
#[derive(Debug, Clone)]
pub struct AfcPolicy {
    schedule: AfcSchedule,
    local_offset: FixedOffset,
}

impl AfcPolicy {
    pub fn new(schedule: AfcSchedule, local_offset: FixedOffset) -> Self {
        Self {
            schedule,
            local_offset,
        }
    }

    pub fn schedule(&self) -> &AfcSchedule {
        &self.schedule
    }

    /// Decide how `interaction` moves `lead`
    ///
    /// **Dispatch order (first match wins):**
    /// 1. feedback: engagement only
    /// 2. Info: chore due tomorrow, cycle paused
    /// 3. Later: scheduled follow-up at the chosen date, cycle paused
    /// 4. Event Scheduled: event tasks, cycle paused
    /// 5. Event Cancelled (typed, or legacy notes): drop event tasks
    /// 6. Enrolled / Withdrawn / Invalid: close the lead
    /// 7. Unresponsive: advance one step, or cool down / go dormant
    /// 8. anything else responsive: restart at step 1
    pub fn decide(&self, lead: &Lead, interaction: &Interaction, now: DateTime<Utc>) -> Decision {
        match &interaction.kind {
            InteractionKind::Initiated { .. } | InteractionKind::MergeNote { .. } => {
                Decision::unchanged(lead, Rule::Ignored)
            }
            InteractionKind::Feedback { .. } => {
                let mut decision = Decision::unchanged(lead, Rule::Feedback);
                decision.has_engaged = true;
                decision
            }
            InteractionKind::Outcome(log) => self.decide_outcome(lead, log, interaction, now),
            InteractionKind::QuickLog { quick_log_type } => match quick_log_type {
                QuickLogType::Enrolled | QuickLogType::Withdrawn | QuickLogType::Invalid => {
                    self.close(lead, *quick_log_type, now)
                }
                QuickLogType::Unresponsive => self.advance(lead, now),
                QuickLogType::Followup | QuickLogType::Unchanged => self.restart_on_response(lead, now),
            },
        }
    }

    fn decide_outcome(
        &self,
        lead: &Lead,
        log: &OutcomeLog,
        interaction: &Interaction,
        now: DateTime<Utc>,
    ) -> Decision {
        match log.outcome {
            Outcome::Info => {
                let mut decision = Decision::unchanged(lead, Rule::Info);
                decision.has_engaged = true;
                decision.afc_step = 0;
                let description = interaction
                    .notes
                    .as_deref()
                    .map(str::trim)
                    .filter(|n| !n.is_empty())
                    .unwrap_or(DEFAULT_INFO_DESCRIPTION);
                decision.intents = vec![
                    TaskIntent::CompleteOpenInteractive,
                    TaskIntent::CreateProcedural {
                        kind: TaskKind::InfoRequest,
                        description: description.to_string(),
                        due: Some(add_days(now, 1)),
                    },
                ];
                decision
            }
            Outcome::Later => {
                let mut decision = Decision::unchanged(lead, Rule::Later);
                decision.has_engaged = true;
                if let Some(due) = log.follow_up_date {
                    decision.afc_step = 0;
                    decision.intents = vec![
                        TaskIntent::CompleteOpenInteractive,
                        TaskIntent::CreateScheduledFollowUp { due },
                    ];
                }
                decision
            }
            Outcome::EventScheduled => self.schedule_event(lead, log, now),
            Outcome::EventCancelled => {
                let mut decision = Decision::unchanged(lead, Rule::EventCancelled);
                decision.has_engaged = true;
                let event_type = log
                    .event_details
                    .as_ref()
                    .and_then(|d| d.event_type.clone())
                    .filter(|t| !t.is_empty())
                    .or_else(|| legacy_cancelled_event(interaction.notes_str()));
                if let Some(event_type) = event_type {
                    decision.intents.push(TaskIntent::DeleteEventTasks { event_type });
                }
                decision
            }
            Outcome::EventCompleted => {
                let mut decision = Decision::unchanged(lead, Rule::EventCompleted);
                decision.has_engaged = true;
                if let Some(event_type) = legacy_cancelled_event(interaction.notes_str()) {
                    decision.rule = Rule::EventCancelled;
                    decision.intents.push(TaskIntent::DeleteEventTasks { event_type });
                }
                decision
            }
        }
    }

    fn schedule_event(&self, lead: &Lead, log: &OutcomeLog, now: DateTime<Utc>) -> Decision {
        let mut decision = Decision::unchanged(lead, Rule::EventScheduled);
        decision.has_engaged = true;
        decision.afc_step = 0;

        let details = log.event_details.clone().unwrap_or_default();
        let event_type = details.type_or_default().to_string();

        if let Some(previous) = &details.rescheduled_from {
            let old_type = previous
                .event_type
                .clone()
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| event_type.clone());
            decision.intents.push(TaskIntent::DeleteEventTasks { event_type: old_type });
        }

        decision.intents.push(TaskIntent::CompleteOpenInteractive);

        if let Some(event_time) = details.date_time {
            decision.intents.push(TaskIntent::CreateProcedural {
                kind: TaskKind::EventConfirmation {
                    event_type: event_type.clone(),
                },
                description: confirmation_description(&event_type),
                due: Some(at_local_time(event_time, self.local_offset, 6, 0)),
            });

            if (event_time - now).num_days() >= REMINDER_MIN_LEAD_DAYS {
                decision.intents.push(TaskIntent::CreateProcedural {
                    kind: TaskKind::EventReminder {
                        event_type: event_type.clone(),
                    },
                    description: reminder_description(&event_type),
                    due: Some(add_days(event_time, -1)),
                });
            }
        }

        decision
    }

    fn close(&self, lead: &Lead, log_type: QuickLogType, now: DateTime<Utc>) -> Decision {
        let mut decision = Decision::unchanged(lead, Rule::Closed);
        decision.has_engaged = true;
        decision.afc_step = 0;
        decision.intents.push(TaskIntent::CompleteOpenInteractive);

        decision.status = Some(match log_type {
            QuickLogType::Enrolled => LeadStatus::Enrolled,
            QuickLogType::Withdrawn => LeadStatus::Withdrawn,
            _ => LeadStatus::Invalid,
        });

        if log_type == QuickLogType::Enrolled {
            decision.relationship = Relationship::Learner;
            decision.intents.push(TaskIntent::CreateProcedural {
                kind: TaskKind::LearnerSetup,
                description: LEARNER_SETUP_DESCRIPTION.to_string(),
                due: Some(add_days(now, 1)),
            });
        }

        decision.intents.push(TaskIntent::DeleteFollowUps);
        decision
    }

    /// No response to the current follow-up
    fn advance(&self, lead: &Lead, now: DateTime<Utc>) -> Decision {
        let mut decision = Decision::unchanged(lead, Rule::Unresponsive);
        decision.intents.push(TaskIntent::CompleteOpenInteractive);

        if !lead.is_pursuable() {
            return decision;
        }

        // An engaged lead that goes quiet at the third-day checkpoint cools
        // down without running the rest of the schedule
        if lead.afc_step == 2 && lead.has_engaged {
            decision.status = Some(LeadStatus::Cooling);
            decision.afc_step = 0;
            return decision;
        }

        let next = lead.afc_step.saturating_add(1);
        match self.follow_up(next, now) {
            Some(intent) => {
                decision.status = Some(LeadStatus::Active);
                decision.afc_step = next;
                decision.intents.push(intent);
            }
            None => {
                decision.status = Some(if lead.has_engaged {
                    LeadStatus::Cooling
                } else {
                    LeadStatus::Dormant
                });
                decision.afc_step = 0;
            }
        }
        decision
    }

    /// The lead responded: the cycle starts over
    fn restart_on_response(&self, lead: &Lead, now: DateTime<Utc>) -> Decision {
        let mut decision = Decision::unchanged(lead, Rule::Restart);
        decision.has_engaged = true;
        decision.intents.push(TaskIntent::CompleteOpenInteractive);

        if !lead.is_pursuable() {
            return decision;
        }

        decision.intents.push(TaskIntent::DeleteFollowUps);
        self.enter_step(&mut decision, 1, now);
        decision
    }

    /// Initialization for a newly created lead
    ///
    /// Returns None for leads that already carry a status (imported or
    /// otherwise pre-initialized) and for leads without a name.
    pub fn initiate(&self, lead: &Lead, now: DateTime<Utc>) -> Option<Decision> {
        if lead.status.is_some() || lead.name.trim().is_empty() {
            return None;
        }

        let mut decision = Decision::unchanged(lead, Rule::Initiate);
        match lead.relationship {
            Relationship::Lead => {
                self.enter_step(&mut decision, 1, now);
            }
            Relationship::Learner => {
                decision.status = Some(LeadStatus::Enrolled);
                decision.afc_step = 0;
            }
            Relationship::Trainer | Relationship::Other => {
                decision.status = Some(LeadStatus::Active);
                decision.afc_step = 0;
            }
        }
        Some(decision)
    }

    /// Put the lead directly at `step`
    ///
    /// Used by import stage hints and by the sweep's repair pass; engagement
    /// is left as it is.
    pub fn seed(&self, lead: &Lead, step: u8, now: DateTime<Utc>) -> Result<Decision> {
        if !self.schedule.contains(step) {
            return Err(Error::Validation(format!(
                "AFC stage {} is outside the schedule (1..={})",
                step,
                self.schedule.last_step()
            )));
        }
        let mut decision = Decision::unchanged(lead, Rule::Seed);
        self.enter_step(&mut decision, step, now);
        Ok(decision)
    }

    fn enter_step(&self, decision: &mut Decision, step: u8, now: DateTime<Utc>) {
        if let Some(intent) = self.follow_up(step, now) {
            decision.status = Some(LeadStatus::Active);
            decision.afc_step = step;
            decision.intents.push(intent);
        }
    }

    /// Follow-up intent for `step`, due `now + offset` days
    fn follow_up(&self, step: u8, now: DateTime<Utc>) -> Option<TaskIntent> {
        self.schedule.offset(step).map(|day_offset| TaskIntent::CreateFollowUp {
            step,
            day_offset,
            due: add_days(now, i64::from(day_offset)),
        })
    }
}

impl TaskIntent {
    /// Kind and description of the task this intent creates, if any
    pub fn task_template(&self) -> Option<(TaskKind, String)> {
        match self {
            TaskIntent::CreateFollowUp { step, day_offset, .. } => Some((
                TaskKind::FollowUp { step: *step },
                follow_up_description(*day_offset),
            )),
            TaskIntent::CreateScheduledFollowUp { .. } => Some((
                TaskKind::ScheduledFollowUp,
                SCHEDULED_FOLLOW_UP_DESCRIPTION.to_string(),
            )),
            TaskIntent::CreateProcedural {
                kind, description, ..
            } => Some((kind.clone(), description.clone())),
            _ => None,
        }
    }
}

/// Event type named by a legacy "Event <Type> ... marked as Cancelled" note
fn legacy_cancelled_event(notes: &str) -> Option<String> {
    LEGACY_CANCELLATION
        .as_ref()?
        .captures(notes)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}
