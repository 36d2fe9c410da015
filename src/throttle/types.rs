//! Admission Types
//!
//! Request priorities, admission outcomes and the stats snapshot.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Priority class of a request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Normal,
    /// Sheddable: never queues behind another request
    Low,
}

impl Priority {
    pub const ALL: [Priority; 3] = [Priority::High, Priority::Normal, Priority::Low];

    /// Parse a priority, case-insensitively. Absent or unknown input is `Normal`.
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(v) if v.eq_ignore_ascii_case("high") => Priority::High,
            Some(v) if v.eq_ignore_ascii_case("low") => Priority::Low,
            _ => Priority::Normal,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one admission decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionResult {
    Accepted,
    RejectedFullQueue,
    RejectedPriorityQuota,
    RejectedConsumerQuota,
    /// Rejected by an unconditional quota
    RejectedQuota,
}

impl AdmissionResult {
    pub const ALL: [AdmissionResult; 5] = [
        AdmissionResult::Accepted,
        AdmissionResult::RejectedFullQueue,
        AdmissionResult::RejectedPriorityQuota,
        AdmissionResult::RejectedConsumerQuota,
        AdmissionResult::RejectedQuota,
    ];

    /// The only truthy outcome
    pub fn is_accepted(&self) -> bool {
        matches!(self, AdmissionResult::Accepted)
    }

    /// Human-readable reason, stable enough to put in a response header
    pub fn reason(&self) -> &'static str {
        match self {
            AdmissionResult::Accepted => "accepted",
            AdmissionResult::RejectedFullQueue => "rejected due to full queue",
            AdmissionResult::RejectedPriorityQuota => "rejected due to priority quota",
            AdmissionResult::RejectedConsumerQuota => "rejected due to consumer quota",
            AdmissionResult::RejectedQuota => "rejected due to quota",
        }
    }
}

impl fmt::Display for AdmissionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.reason())
    }
}

/// Point-in-time view of a throttler
///
/// Advisory only: admission decisions read the live counters, not this.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    /// Free permits
    pub available_capacity: usize,

    /// Total permits
    pub capacity_limit: usize,

    /// Requests currently queued
    pub queue_size: usize,

    /// Maximum queued requests
    pub queue_limit: usize,

    /// In-flight requests per consumer; unused consumers are absent
    pub consumers_used_capacity: HashMap<String, usize>,

    /// In-flight requests per priority; unused priorities are absent
    pub priorities_used_capacity: HashMap<Priority, usize>,
}

impl Stats {
    /// Permits currently held
    pub fn used_capacity(&self) -> usize {
        self.capacity_limit - self.available_capacity
    }

    /// In-flight requests of `consumer`
    pub fn consumer_used(&self, consumer: &str) -> usize {
        self.consumers_used_capacity
            .get(consumer)
            .copied()
            .unwrap_or(0)
    }

    /// In-flight requests of `priority`
    pub fn priority_used(&self, priority: Priority) -> usize {
        self.priorities_used_capacity
            .get(&priority)
            .copied()
            .unwrap_or(0)
    }
}
