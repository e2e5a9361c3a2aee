//! Follow-up schedule
//!
//! Maps an AFC step to the number of days between scheduling a follow-up and
//! its due date. Loaded once from configuration and shared read-only.

use afc_common::config::AfcConfig;
use afc_common::Result;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AfcSchedule {
    offsets: BTreeMap<u8, u32>,
}

impl AfcSchedule {
    /// Build from validated config (`[afc] schedule`)
    pub fn from_config(config: &AfcConfig) -> Result<Self> {
        Ok(Self {
            offsets: config.steps()?,
        })
    }

    /// Day offset for `step`, or None past the end of the cycle
    pub fn offset(&self, step: u8) -> Option<u32> {
        if step == 0 {
            return None;
        }
        self.offsets.get(&step).copied()
    }

    pub fn contains(&self, step: u8) -> bool {
        self.offset(step).is_some()
    }

    /// Highest step in the cycle
    pub fn last_step(&self) -> u8 {
        self.offsets.keys().next_back().copied().unwrap_or(0)
    }
}

impl Default for AfcSchedule {
    fn default() -> Self {
        Self {
            offsets: [(1, 1), (2, 3), (3, 5), (4, 7), (5, 15)].into_iter().collect(),
        }
    }
}
