//! Dedup Matcher
//!
//! Resolves a candidate contact to an existing lead by normalized identity:
//! exact email first, then any of the candidate's phone numbers against any
//! stored phone entry. At most one match is used.

use afc_common::db::leads;
use afc_common::model::Lead;
use afc_common::Result;
use sqlx::SqliteConnection;
use std::collections::HashMap;

/// What a row's identity resolved to
#[derive(Debug)]
pub enum Match {
    /// An earlier row of the same import (1-based row number)
    Pending(usize),
    Stored(Lead),
    None,
}

/// Resolve a row against earlier rows and the store
///
/// Email is tried first in both places; phones are only consulted when the
/// email matched nothing.
pub async fn resolve(
    conn: &mut SqliteConnection,
    pending: &PendingIndex,
    email: Option<&str>,
    phones: &[&str],
) -> Result<Match> {
    if let Some(email) = email {
        if let Some(row) = pending.find_email(email) {
            return Ok(Match::Pending(row));
        }
        if let Some(lead) = leads::find_lead_by_email(conn, email).await? {
            return Ok(Match::Stored(lead));
        }
    }

    if let Some(row) = pending.find_phone(phones.iter().copied()) {
        return Ok(Match::Pending(row));
    }
    for number in phones.iter().filter(|n| !n.is_empty()) {
        if let Some(lead) = leads::find_lead_by_phone(conn, number).await? {
            return Ok(Match::Stored(lead));
        }
    }

    Ok(Match::None)
}

/// Identities already claimed by earlier rows of the same import
///
/// A file listing the same contact twice yields one lead.
#[derive(Debug, Default)]
pub struct PendingIndex {
    by_email: HashMap<String, usize>,
    by_phone: HashMap<String, usize>,
}

impl PendingIndex {
    /// Row number that first claimed this email
    pub fn find_email(&self, email: &str) -> Option<usize> {
        self.by_email.get(email).copied()
    }

    /// Row number that first claimed any of these phone numbers
    pub fn find_phone<'a, I>(&self, phones: I) -> Option<usize>
    where
        I: IntoIterator<Item = &'a str>,
    {
        phones
            .into_iter()
            .find_map(|number| self.by_phone.get(number).copied())
    }

    pub fn claim<'a, I>(&mut self, row: usize, email: Option<&str>, phones: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        if let Some(email) = email {
            self.by_email.entry(email.to_string()).or_insert(row);
        }
        for number in phones {
            if !number.is_empty() {
                self.by_phone.entry(number.to_string()).or_insert(row);
            }
        }
    }
}
