//! Throttle Configuration
//!
//! Construction-time settings for a [`Throttler`](super::Throttler).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

use super::types::Priority;
use crate::error::{Result, ThrottleError};

/// Default throttle limits
pub const DEFAULT_CAPACITY_LIMIT: usize = 128;
pub const DEFAULT_QUEUE_LIMIT: usize = 512;
pub const DEFAULT_CONSUMER_MAX_FRACTION: f64 = 0.7;
pub const DEFAULT_NORMAL_PRIORITY_MAX_FRACTION: f64 = 0.9;

/// Throttle configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThrottleConfig {
    /// Maximum concurrently executing requests
    pub capacity_limit: usize,

    /// Maximum requests waiting for capacity
    pub queue_limit: usize,

    /// Share of capacity any single consumer may hold
    #[serde(default)]
    pub consumer_max_fraction: Option<f64>,

    /// Share of capacity each listed priority may hold
    #[serde(default)]
    pub priority_max_fractions: HashMap<Priority, f64>,

    /// Probability of shedding a request regardless of load
    #[serde(default)]
    pub random_reject_probability: Option<f64>,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            capacity_limit: DEFAULT_CAPACITY_LIMIT,
            queue_limit: DEFAULT_QUEUE_LIMIT,
            consumer_max_fraction: Some(DEFAULT_CONSUMER_MAX_FRACTION),
            priority_max_fractions: HashMap::from([(
                Priority::Normal,
                DEFAULT_NORMAL_PRIORITY_MAX_FRACTION,
            )]),
            random_reject_probability: None,
        }
    }
}

impl ThrottleConfig {
    /// Create a new configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration with the given limits and no quotas
    pub fn unlimited(capacity_limit: usize, queue_limit: usize) -> Self {
        Self {
            capacity_limit,
            queue_limit,
            consumer_max_fraction: None,
            priority_max_fractions: HashMap::new(),
            random_reject_probability: None,
        }
    }

    /// Load configuration from environment variables on top of the defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(limit) = env_var("THROTTLE_CAPACITY_LIMIT")? {
            config.capacity_limit = limit;
        }

        if let Some(limit) = env_var("THROTTLE_QUEUE_LIMIT")? {
            config.queue_limit = limit;
        }

        if let Some(fraction) = env_var("THROTTLE_CONSUMER_MAX_FRACTION")? {
            config.consumer_max_fraction = Some(fraction);
        }

        if let Some(probability) = env_var("THROTTLE_RANDOM_REJECT_PROBABILITY")? {
            config.random_reject_probability = Some(probability);
        }

        config.validate()?;
        Ok(config)
    }

    /// Check limits and fractions
    pub fn validate(&self) -> Result<()> {
        if self.capacity_limit < 1 {
            return Err(ThrottleError::InvalidCapacityLimit(self.capacity_limit));
        }

        let fractions = self
            .consumer_max_fraction
            .iter()
            .chain(self.priority_max_fractions.values());
        for &fraction in fractions {
            if !(0.0..=1.0).contains(&fraction) {
                return Err(ThrottleError::InvalidFraction(fraction));
            }
        }

        if let Some(probability) = self.random_reject_probability {
            if !(0.0..=1.0).contains(&probability) {
                return Err(ThrottleError::InvalidProbability(probability));
            }
        }

        Ok(())
    }
}

fn env_var<T: FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(val) => val
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ThrottleError::InvalidConfig(format!("{name}={val:?}"))),
        Err(_) => Ok(None),
    }
}
