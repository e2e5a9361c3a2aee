//! Import row parsing
//!
//! A row is a flat JSON object of contact fields. Values may arrive as
//! strings or numbers depending on the exporting spreadsheet; both are
//! accepted. Quote fields use a dynamic `d<N><property>` key pattern
//! (`d1course`, `d1variant`, `d1price`, `d2course`, ...).

use afc_common::model::{LeadStatus, Phone, PhoneType, QuoteLine, Relationship};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use super::normalize::{normalize_email, normalize_name, normalize_phone};

static QUOTE_KEY: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^[dD](\d+)([A-Za-z_][A-Za-z0-9_]*)$").ok());

/// At most this many phone columns are read per row
const MAX_PHONES: usize = 2;

/// A row that passed validation
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRow {
    pub name: String,
    pub email: Option<String>,
    pub phones: Vec<Phone>,
    /// Present only when the row names one
    pub relationship: Option<Relationship>,
    /// Present only when the row names one
    pub status: Option<LeadStatus>,
    pub quote_lines: Vec<QuoteLine>,
    pub afc_stage: Option<u8>,
}

impl ParsedRow {
    pub fn relationship_or_default(&self) -> Relationship {
        self.relationship.unwrap_or_default()
    }

    /// Explicit status, else Enrolled for learners and Active for everyone else
    pub fn derived_status(&self) -> LeadStatus {
        self.status.unwrap_or(match self.relationship_or_default() {
            Relationship::Learner => LeadStatus::Enrolled,
            _ => LeadStatus::Active,
        })
    }

    /// Normalized identity keys for dedup
    pub fn phone_numbers(&self) -> impl Iterator<Item = &str> {
        self.phones.iter().map(|p| p.number.as_str())
    }
}

/// Field as trimmed text; numbers are rendered, everything else is absent
fn text(row: &Map<String, Value>, key: &str) -> Option<String> {
    let value = match row.get(key)? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

/// Validate and normalize one row; `Err` carries the skip reason
pub fn parse_row(row: &Map<String, Value>) -> Result<ParsedRow, String> {
    let name = text(row, "name").map(|n| normalize_name(&n)).unwrap_or_default();
    if name.is_empty() {
        return Err("missing name".to_string());
    }

    let email = text(row, "email").and_then(|e| normalize_email(&e));

    let mut phones = Vec::new();
    for (number_key, type_key) in [("phone1", "phone1Type"), ("phone2", "phone2Type"), ("phone", "phoneType")] {
        if phones.len() == MAX_PHONES {
            break;
        }
        let Some(raw) = text(row, number_key) else {
            continue;
        };
        let number = normalize_phone(&raw);
        if number.is_empty() || phones.iter().any(|p: &Phone| p.number == number) {
            continue;
        }
        let phone_type = text(row, type_key)
            .map(|t| PhoneType::parse_lenient(&t))
            .unwrap_or_default();
        phones.push(Phone { number, phone_type });
    }

    let relationship = text(row, "relationship")
        .map(|r| r.parse::<Relationship>())
        .transpose()
        .map_err(|e| e.to_string())?;
    let status = text(row, "status")
        .map(|s| s.parse::<LeadStatus>())
        .transpose()
        .map_err(|e| e.to_string())?;

    let afc_stage = match text(row, "afcStage") {
        None => None,
        Some(raw) => Some(
            raw.parse::<u8>()
                .map_err(|_| format!("afcStage '{}' is not a step number", raw))?,
        ),
    };

    Ok(ParsedRow {
        name,
        email,
        phones,
        relationship,
        status,
        quote_lines: parse_quote_lines(row),
        afc_stage,
    })
}

/// Collect `d<N><property>` fields into quote lines ordered by N
///
/// A plain `courseName` fills line 1's course when no `d1course` exists.
pub fn parse_quote_lines(row: &Map<String, Value>) -> Vec<QuoteLine> {
    let mut lines: BTreeMap<u32, QuoteLine> = BTreeMap::new();

    if let Some(pattern) = QUOTE_KEY.as_ref() {
        for key in row.keys() {
            let Some(caps) = pattern.captures(key) else {
                continue;
            };
            let (Some(index), Some(property)) = (caps.get(1), caps.get(2)) else {
                continue;
            };
            let Ok(index) = index.as_str().parse::<u32>() else {
                continue;
            };
            let Some(value) = text(row, key) else {
                continue;
            };

            let line = lines.entry(index).or_insert_with(|| QuoteLine {
                index,
                ..Default::default()
            });
            match property.as_str().to_ascii_lowercase().as_str() {
                "course" | "coursename" => line.course = Some(value),
                "variant" => line.variant = Some(value),
                "price" => match value.replace(',', "").parse::<f64>() {
                    Ok(price) => line.price = Some(price),
                    Err(_) => {
                        line.properties.insert(property.as_str().to_string(), value);
                    }
                },
                _ => {
                    line.properties.insert(property.as_str().to_string(), value);
                }
            }
        }
    }

    if let Some(course) = text(row, "courseName") {
        let first = lines.entry(1).or_insert_with(|| QuoteLine {
            index: 1,
            ..Default::default()
        });
        if first.course.is_none() {
            first.course = Some(course);
        }
    }

    lines.into_values().collect()
}
