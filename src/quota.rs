//! Quota Types
//!
//! Quotas are small predicates consulted on the admission path. Two families
//! exist:
//!
//! - [`CapacityQuota`]: keyed by a resource key (consumer id, priority) and
//!   judged against the projected in-flight count for that key.
//! - [`Quota`]: unconditional, independent of who is asking.
//!
//! Quotas of one family compose by logical AND. Evaluation is inline and must
//! never block; quotas with mutable state synchronise internally.

use std::borrow::Borrow;
use std::fmt;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{Result, ThrottleError};

/// A quota over the capacity used by one resource key
pub trait CapacityQuota<K: ?Sized>: fmt::Debug + Send + Sync {
    /// Whether a request for `key` may run if `used` requests for that key
    /// would then be in flight out of `capacity_limit`.
    fn can_be_accepted(&self, key: &K, used: usize, capacity_limit: usize) -> bool;
}

/// A quota that does not depend on any request attribute
pub trait Quota: fmt::Debug + Send + Sync {
    /// Whether the next request may run
    fn can_be_accepted(&self) -> bool;
}

/// Rejects once the used share of capacity exceeds `max_fraction`.
///
/// Scoped to one key value, it accepts every other key unconditionally.
/// Unscoped, it applies to every key.
pub struct MaxFractionQuota<K>
where
    K: ?Sized + ToOwned,
{
    max_fraction: f64,
    key: Option<K::Owned>,
}

impl<K> MaxFractionQuota<K>
where
    K: ?Sized + ToOwned,
{
    /// Quota applying to every key
    pub fn new(max_fraction: f64) -> Result<Self> {
        Self::validate(max_fraction)?;
        Ok(Self {
            max_fraction,
            key: None,
        })
    }

    /// Quota applying only to `key`
    pub fn scoped(max_fraction: f64, key: impl Into<K::Owned>) -> Result<Self> {
        Self::validate(max_fraction)?;
        Ok(Self {
            max_fraction,
            key: Some(key.into()),
        })
    }

    pub fn max_fraction(&self) -> f64 {
        self.max_fraction
    }

    fn validate(max_fraction: f64) -> Result<()> {
        if !(0.0..=1.0).contains(&max_fraction) {
            return Err(ThrottleError::InvalidFraction(max_fraction));
        }
        Ok(())
    }
}

impl<K> fmt::Debug for MaxFractionQuota<K>
where
    K: ?Sized + ToOwned,
    K::Owned: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MaxFractionQuota")
            .field("max_fraction", &self.max_fraction)
            .field("key", &self.key)
            .finish()
    }
}

impl<K> CapacityQuota<K> for MaxFractionQuota<K>
where
    K: ?Sized + ToOwned + PartialEq,
    K::Owned: fmt::Debug + Send + Sync,
{
    fn can_be_accepted(&self, key: &K, used: usize, capacity_limit: usize) -> bool {
        if let Some(bound) = &self.key {
            let bound: &K = bound.borrow();
            if bound != key {
                return true;
            }
        }

        (used as f64 / capacity_limit as f64) <= self.max_fraction
    }
}

/// AND of capacity quotas; empty accepts everything
pub struct CompositeCapacityQuota<K: ?Sized> {
    quotas: Vec<Box<dyn CapacityQuota<K>>>,
}

impl<K: ?Sized> CompositeCapacityQuota<K> {
    pub fn new(quotas: Vec<Box<dyn CapacityQuota<K>>>) -> Self {
        Self { quotas }
    }

    /// Append a quota, evaluated after the existing ones
    pub fn push(&mut self, quota: impl CapacityQuota<K> + 'static) {
        self.quotas.push(Box::new(quota));
    }

    pub fn len(&self) -> usize {
        self.quotas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.quotas.is_empty()
    }
}

impl<K: ?Sized> Default for CompositeCapacityQuota<K> {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl<K: ?Sized> fmt::Debug for CompositeCapacityQuota<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(&self.quotas).finish()
    }
}

impl<K: ?Sized> CapacityQuota<K> for CompositeCapacityQuota<K> {
    fn can_be_accepted(&self, key: &K, used: usize, capacity_limit: usize) -> bool {
        self.quotas
            .iter()
            .all(|quota| quota.can_be_accepted(key, used, capacity_limit))
    }
}

/// AND of unconditional quotas; empty accepts everything
#[derive(Debug, Default)]
pub struct CompositeQuota {
    quotas: Vec<Box<dyn Quota>>,
}

impl CompositeQuota {
    pub fn new(quotas: Vec<Box<dyn Quota>>) -> Self {
        Self { quotas }
    }

    /// Append a quota, evaluated after the existing ones
    pub fn push(&mut self, quota: impl Quota + 'static) {
        self.quotas.push(Box::new(quota));
    }

    pub fn len(&self) -> usize {
        self.quotas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.quotas.is_empty()
    }
}

impl Quota for CompositeQuota {
    fn can_be_accepted(&self) -> bool {
        self.quotas.iter().all(|quota| quota.can_be_accepted())
    }
}

/// Always gives the same answer
#[derive(Debug, Clone, Copy)]
pub struct StaticQuota(pub bool);

impl Quota for StaticQuota {
    fn can_be_accepted(&self) -> bool {
        self.0
    }
}

impl<K: ?Sized> CapacityQuota<K> for StaticQuota {
    fn can_be_accepted(&self, _key: &K, _used: usize, _capacity_limit: usize) -> bool {
        self.0
    }
}

/// Rejects each request with a fixed probability
#[derive(Debug)]
pub struct RandomRejectQuota {
    reject_probability: f64,
    rng: Mutex<StdRng>,
}

impl RandomRejectQuota {
    /// Quota drawing from an OS-seeded generator
    pub fn new(reject_probability: f64) -> Result<Self> {
        Self::with_rng(reject_probability, StdRng::from_os_rng())
    }

    /// Quota with a deterministic rejection sequence
    pub fn seeded(reject_probability: f64, seed: u64) -> Result<Self> {
        Self::with_rng(reject_probability, StdRng::seed_from_u64(seed))
    }

    fn with_rng(reject_probability: f64, rng: StdRng) -> Result<Self> {
        if !(0.0..=1.0).contains(&reject_probability) {
            return Err(ThrottleError::InvalidProbability(reject_probability));
        }
        Ok(Self {
            reject_probability,
            rng: Mutex::new(rng),
        })
    }

    pub fn reject_probability(&self) -> f64 {
        self.reject_probability
    }
}

impl Quota for RandomRejectQuota {
    fn can_be_accepted(&self) -> bool {
        let roll: f64 = self.rng.lock().random();
        roll >= self.reject_probability
    }
}
