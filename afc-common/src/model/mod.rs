//! Document models
//!
//! Leads embed their interaction log, phones, commitment snapshot and payment
//! plan; tasks are separate documents owned by a lead.

pub mod interaction;
pub mod lead;
pub mod task;

pub use interaction::{
    EventDetails, Interaction, InteractionKind, Outcome, OutcomeLog, PreviousEvent, QuickLogType,
};
pub use lead::{
    CommitmentSnapshot, Installment, InstallmentStatus, Lead, LeadStatus, PaymentPlan, Phone,
    PhoneType, QuoteLine, Relationship,
};
pub use task::{Task, TaskKind, TaskNature};
