//! Lead document: identity plus pursuit record

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::ids::{InstallmentId, InteractionId, LeadId};
use crate::model::Interaction;
use crate::Error;

/// Lifecycle track of a contact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Relationship {
    #[default]
    Lead,
    Learner,
    Trainer,
    Other,
}

impl Relationship {
    pub fn as_str(&self) -> &'static str {
        match self {
            Relationship::Lead => "Lead",
            Relationship::Learner => "Learner",
            Relationship::Trainer => "Trainer",
            Relationship::Other => "Other",
        }
    }
}

impl fmt::Display for Relationship {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Relationship {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lead" => Ok(Relationship::Lead),
            "learner" => Ok(Relationship::Learner),
            "trainer" => Ok(Relationship::Trainer),
            "other" => Ok(Relationship::Other),
            other => Err(Error::Validation(format!("unknown relationship '{}'", other))),
        }
    }
}

/// Pursuit status
///
/// `Active` is the only state the AFC drives. `Enrolled`, `Withdrawn` and
/// `Invalid` are terminal; `Cooling` and `Dormant` end the cycle but may be
/// reactivated by an operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LeadStatus {
    Active,
    Enrolled,
    Withdrawn,
    Invalid,
    Cooling,
    Dormant,
}

impl LeadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeadStatus::Active => "Active",
            LeadStatus::Enrolled => "Enrolled",
            LeadStatus::Withdrawn => "Withdrawn",
            LeadStatus::Invalid => "Invalid",
            LeadStatus::Cooling => "Cooling",
            LeadStatus::Dormant => "Dormant",
        }
    }

    /// Enrolled, Withdrawn and Invalid never return to the cycle
    pub fn is_terminal(&self) -> bool {
        matches!(self, LeadStatus::Enrolled | LeadStatus::Withdrawn | LeadStatus::Invalid)
    }
}

impl fmt::Display for LeadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LeadStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(LeadStatus::Active),
            "enrolled" => Ok(LeadStatus::Enrolled),
            "withdrawn" => Ok(LeadStatus::Withdrawn),
            "invalid" => Ok(LeadStatus::Invalid),
            "cooling" => Ok(LeadStatus::Cooling),
            "dormant" => Ok(LeadStatus::Dormant),
            other => Err(Error::Validation(format!("unknown status '{}'", other))),
        }
    }
}

/// How a phone number may be used
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PhoneType {
    Calling,
    Chat,
    #[default]
    Both,
}

impl PhoneType {
    /// Parse a free-form tag; anything unrecognized is `Both`
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "calling" | "call" => PhoneType::Calling,
            "chat" => PhoneType::Chat,
            _ => PhoneType::Both,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phone {
    /// Digits only
    pub number: String,
    #[serde(rename = "type", default)]
    pub phone_type: PhoneType,
}

/// A priced course offering attached to the commitment snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct QuoteLine {
    /// Position taken from the `d<N>` import key
    pub index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub course: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CommitmentSnapshot {
    #[serde(default)]
    pub quote_lines: Vec<QuoteLine>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum InstallmentStatus {
    #[default]
    Unpaid,
    Paid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Installment {
    pub id: InstallmentId,
    pub amount: f64,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: InstallmentStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PaymentPlan {
    #[serde(default)]
    pub installments: Vec<Installment>,
}

/// Lead document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lead {
    pub id: LeadId,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phones: Vec<Phone>,
    #[serde(default)]
    pub relationship: Relationship,
    /// Absent until the creating write or the sweep initializes the AFC
    #[serde(default)]
    pub status: Option<LeadStatus>,
    /// 0 = cycle idle, 1..=5 = index into the follow-up schedule
    #[serde(default, rename = "afc_step")]
    pub afc_step: u8,
    #[serde(default)]
    pub has_engaged: bool,
    #[serde(default)]
    pub on_follow_list: bool,
    #[serde(default)]
    pub interactions: Vec<Interaction>,
    #[serde(default)]
    pub commitment_snapshot: CommitmentSnapshot,
    #[serde(default)]
    pub payment_plan: Option<PaymentPlan>,
    #[serde(default, rename = "last_interaction_date")]
    pub last_interaction_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Lead {
    /// New, uninitialized lead (no status, cycle idle)
    pub fn new(name: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: LeadId::generate(),
            name: name.into(),
            email: None,
            phones: Vec::new(),
            relationship: Relationship::Lead,
            status: None,
            afc_step: 0,
            has_engaged: false,
            on_follow_list: false,
            interactions: Vec::new(),
            commitment_snapshot: CommitmentSnapshot::default(),
            payment_plan: None,
            last_interaction_date: None,
            created_at,
        }
    }

    /// True when the interaction is already part of this lead's log
    pub fn has_interaction(&self, id: &InteractionId) -> bool {
        self.interactions.iter().any(|i| &i.id == id)
    }

    /// The AFC only drives leads that are Active (or not yet initialized)
    pub fn is_pursuable(&self) -> bool {
        matches!(self.status, None | Some(LeadStatus::Active))
    }

    pub fn phone_numbers(&self) -> impl Iterator<Item = &str> {
        self.phones.iter().map(|p| p.number.as_str())
    }
}
