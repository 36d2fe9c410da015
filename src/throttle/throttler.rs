//! Throttler
//!
//! The admission engine. Each request passes through:
//!
//! 1. Queue admissibility: LOW priority never queues behind anyone, and
//!    nobody queues once the queue is full and no permit is free.
//! 2. Quotas against projected usage, in order: unconditional, priority,
//!    consumer. The first failure decides the result.
//! 3. Fast path: take a free permit and count the request.
//! 4. Slow path: queue on the semaphore, then re-run the quotas once woken.
//!    A request rejected at this point gives its permit straight back.
//!
//! Usage counters are only touched in steps 3 and 4 and are undone by the
//! [`Admission`] guard when it drops, on every exit path.

use parking_lot::Mutex;
use std::borrow::Borrow;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use tracing::{debug, error, trace};

use super::config::ThrottleConfig;
use super::types::{AdmissionResult, Priority, Stats};
use crate::error::Result;
use crate::metrics::{MetricsProvider, NoopMetrics};
use crate::quota::{
    CapacityQuota, CompositeCapacityQuota, CompositeQuota, MaxFractionQuota, Quota,
    RandomRejectQuota,
};
use crate::semaphore::LifoSemaphore;

/// Admission controller for one bounded resource
#[derive(Debug)]
pub struct Throttler {
    capacity_limit: usize,
    queue_limit: usize,
    semaphore: LifoSemaphore,

    // Lock order: usage, then the semaphore's internal lock.
    usage: Mutex<Usage>,

    consumer_quota: CompositeCapacityQuota<str>,
    priority_quota: CompositeCapacityQuota<Priority>,
    quota: CompositeQuota,
    metrics: Arc<dyn MetricsProvider>,
}

/// In-flight request counts. Entries never hold zero.
#[derive(Debug, Default)]
struct Usage {
    consumers: HashMap<String, usize>,
    priorities: HashMap<Priority, usize>,
}

impl Usage {
    fn consumer(&self, consumer: &str) -> usize {
        self.consumers.get(consumer).copied().unwrap_or(0)
    }

    fn priority(&self, priority: Priority) -> usize {
        self.priorities.get(&priority).copied().unwrap_or(0)
    }

    fn increment(&mut self, consumer: Option<&str>, priority: Option<Priority>) {
        if let Some(consumer) = consumer {
            increment_counter(&mut self.consumers, consumer);
        }
        if let Some(priority) = priority {
            increment_counter(&mut self.priorities, &priority);
        }
    }

    fn decrement(&mut self, consumer: Option<&str>, priority: Option<Priority>) {
        if let Some(consumer) = consumer {
            decrement_counter(&mut self.consumers, consumer);
        }
        if let Some(priority) = priority {
            decrement_counter(&mut self.priorities, &priority);
        }
    }
}

fn increment_counter<K, Q>(counters: &mut HashMap<K, usize>, key: &Q)
where
    K: Borrow<Q> + Eq + Hash,
    Q: ?Sized + ToOwned<Owned = K> + Eq + Hash,
{
    match counters.get_mut(key) {
        Some(count) => *count += 1,
        None => {
            counters.insert(key.to_owned(), 1);
        }
    }
}

fn decrement_counter<K, Q>(counters: &mut HashMap<K, usize>, key: &Q)
where
    K: Borrow<Q> + Eq + Hash,
    Q: ?Sized + Eq + Hash,
{
    let Some(count) = counters.get_mut(key) else {
        error!("usage counter decremented below zero");
        return;
    };

    *count -= 1;
    if *count == 0 {
        counters.remove(key);
    }
}

/// Builder for [`Throttler`]
#[derive(Debug)]
pub struct ThrottlerBuilder {
    capacity_limit: usize,
    queue_limit: usize,
    consumer_quota: CompositeCapacityQuota<str>,
    priority_quota: CompositeCapacityQuota<Priority>,
    quota: CompositeQuota,
    metrics: Arc<dyn MetricsProvider>,
}

impl ThrottlerBuilder {
    /// Builder with no queue, no quotas and no-op metrics
    pub fn new(capacity_limit: usize) -> Self {
        Self {
            capacity_limit,
            queue_limit: 0,
            consumer_quota: CompositeCapacityQuota::default(),
            priority_quota: CompositeCapacityQuota::default(),
            quota: CompositeQuota::default(),
            metrics: Arc::new(NoopMetrics),
        }
    }

    /// Builder with the limits and quotas described by `config`
    pub fn from_config(config: &ThrottleConfig) -> Result<Self> {
        config.validate()?;

        let mut builder = Self::new(config.capacity_limit).queue_limit(config.queue_limit);

        if let Some(fraction) = config.consumer_max_fraction {
            builder = builder.consumer_quota(MaxFractionQuota::<str>::new(fraction)?);
        }

        for priority in Priority::ALL {
            if let Some(&fraction) = config.priority_max_fractions.get(&priority) {
                builder =
                    builder.priority_quota(MaxFractionQuota::<Priority>::scoped(fraction, priority)?);
            }
        }

        if let Some(probability) = config.random_reject_probability {
            builder = builder.quota(RandomRejectQuota::new(probability)?);
        }

        Ok(builder)
    }

    /// Maximum number of queued requests
    pub fn queue_limit(mut self, queue_limit: usize) -> Self {
        self.queue_limit = queue_limit;
        self
    }

    /// Add a quota keyed by consumer
    pub fn consumer_quota(mut self, quota: impl CapacityQuota<str> + 'static) -> Self {
        self.consumer_quota.push(quota);
        self
    }

    /// Add a quota keyed by priority
    pub fn priority_quota(mut self, quota: impl CapacityQuota<Priority> + 'static) -> Self {
        self.priority_quota.push(quota);
        self
    }

    /// Add an unconditional quota
    pub fn quota(mut self, quota: impl Quota + 'static) -> Self {
        self.quota.push(quota);
        self
    }

    /// Report admission outcomes to `metrics`
    pub fn metrics(mut self, metrics: Arc<dyn MetricsProvider>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn build(self) -> Result<Throttler> {
        Ok(Throttler {
            capacity_limit: self.capacity_limit,
            queue_limit: self.queue_limit,
            semaphore: LifoSemaphore::new(self.capacity_limit)?,
            usage: Mutex::new(Usage::default()),
            consumer_quota: self.consumer_quota,
            priority_quota: self.priority_quota,
            quota: self.quota,
            metrics: self.metrics,
        })
    }
}

impl Throttler {
    /// Throttler without quotas
    pub fn new(capacity_limit: usize, queue_limit: usize) -> Result<Self> {
        ThrottlerBuilder::new(capacity_limit)
            .queue_limit(queue_limit)
            .build()
    }

    pub fn builder(capacity_limit: usize) -> ThrottlerBuilder {
        ThrottlerBuilder::new(capacity_limit)
    }

    pub fn capacity_limit(&self) -> usize {
        self.capacity_limit
    }

    pub fn queue_limit(&self) -> usize {
        self.queue_limit
    }

    /// Snapshot of capacity, queue and per-key usage
    pub fn stats(&self) -> Stats {
        let usage = self.usage.lock();
        let (available_capacity, queue_size) = self.semaphore.counts();
        Stats {
            available_capacity,
            capacity_limit: self.capacity_limit,
            queue_size,
            queue_limit: self.queue_limit,
            consumers_used_capacity: usage.consumers.clone(),
            priorities_used_capacity: usage.priorities.clone(),
        }
    }

    /// Decide whether a request may run.
    ///
    /// The returned guard holds the request's slot until dropped. Callers
    /// should only do the protected work when
    /// [`Admission::is_accepted`] is true. Cancelling this future while it
    /// waits for capacity leaves no trace on the throttler.
    pub async fn throttle(
        &self,
        consumer: Option<&str>,
        priority: Option<Priority>,
    ) -> Admission<'_> {
        let admission = self.admit(consumer, priority).await;
        self.metrics
            .record_admission(consumer, priority, admission.result);
        admission
    }

    /// Run `f` inside an admission scope.
    ///
    /// `f` receives the admission result and decides what to do with a
    /// rejection. The slot is released when `f` completes, fails or is
    /// cancelled.
    pub async fn run<F, Fut, T>(
        &self,
        consumer: Option<&str>,
        priority: Option<Priority>,
        f: F,
    ) -> T
    where
        F: FnOnce(AdmissionResult) -> Fut,
        Fut: Future<Output = T>,
    {
        let admission = self.throttle(consumer, priority).await;
        let output = f(admission.result()).await;
        drop(admission);
        output
    }

    async fn admit(&self, consumer: Option<&str>, priority: Option<Priority>) -> Admission<'_> {
        let acquire = {
            let mut usage = self.usage.lock();

            if let Some(rejection) = self.check_queue(priority) {
                return self.reject(consumer, priority, rejection);
            }

            if let Some(rejection) = self.check_quotas(&usage, consumer, priority) {
                return self.reject(consumer, priority, rejection);
            }

            if self.semaphore.try_acquire() {
                usage.increment(consumer, priority);
                trace!(?consumer, ?priority, "accepted");
                return Admission {
                    throttler: self,
                    result: AdmissionResult::Accepted,
                    counted: Some(Counted::new(consumer, priority)),
                    holds_permit: true,
                };
            }

            // Registered while `usage` is held, so the queue check above
            // and this enqueue are one step for other arrivals.
            self.semaphore.acquire()
        };

        acquire.await;

        // The permit is ours; the guard hands it back on every path.
        let mut admission = Admission {
            throttler: self,
            result: AdmissionResult::Accepted,
            counted: None,
            holds_permit: true,
        };

        let mut usage = self.usage.lock();
        if let Some(rejection) = self.check_quotas(&usage, consumer, priority) {
            drop(usage);
            debug!(?consumer, ?priority, reason = %rejection, "rejected after waiting");
            admission.result = rejection;
            admission.release_permit();
            return admission;
        }

        usage.increment(consumer, priority);
        admission.counted = Some(Counted::new(consumer, priority));
        trace!(?consumer, ?priority, "accepted after waiting");
        admission
    }

    fn check_queue(&self, priority: Option<Priority>) -> Option<AdmissionResult> {
        let (available, waiting) = self.semaphore.counts();

        if priority == Some(Priority::Low) && waiting > 0 {
            return Some(AdmissionResult::RejectedFullQueue);
        }

        if waiting >= self.queue_limit && available == 0 {
            return Some(AdmissionResult::RejectedFullQueue);
        }

        None
    }

    fn check_quotas(
        &self,
        usage: &Usage,
        consumer: Option<&str>,
        priority: Option<Priority>,
    ) -> Option<AdmissionResult> {
        if !self.quota.can_be_accepted() {
            return Some(AdmissionResult::RejectedQuota);
        }

        if let Some(priority) = priority {
            let projected = usage.priority(priority) + 1;
            if !self
                .priority_quota
                .can_be_accepted(&priority, projected, self.capacity_limit)
            {
                return Some(AdmissionResult::RejectedPriorityQuota);
            }
        }

        if let Some(consumer) = consumer {
            let projected = usage.consumer(consumer) + 1;
            if !self
                .consumer_quota
                .can_be_accepted(consumer, projected, self.capacity_limit)
            {
                return Some(AdmissionResult::RejectedConsumerQuota);
            }
        }

        None
    }

    fn reject(
        &self,
        consumer: Option<&str>,
        priority: Option<Priority>,
        result: AdmissionResult,
    ) -> Admission<'_> {
        debug!(?consumer, ?priority, reason = %result, "rejected");
        Admission {
            throttler: self,
            result,
            counted: None,
            holds_permit: false,
        }
    }
}

#[derive(Debug)]
struct Counted {
    consumer: Option<String>,
    priority: Option<Priority>,
}

impl Counted {
    fn new(consumer: Option<&str>, priority: Option<Priority>) -> Self {
        Self {
            consumer: consumer.map(str::to_owned),
            priority,
        }
    }
}

/// The admission slot of one request
///
/// Dropping it ends the scope: usage counters are decremented, then the
/// permit (if any) is returned to the throttler.
#[derive(Debug)]
#[must_use = "dropping an `Admission` immediately ends the admitted scope"]
pub struct Admission<'a> {
    throttler: &'a Throttler,
    result: AdmissionResult,
    counted: Option<Counted>,
    holds_permit: bool,
}

impl Admission<'_> {
    pub fn result(&self) -> AdmissionResult {
        self.result
    }

    pub fn is_accepted(&self) -> bool {
        self.result.is_accepted()
    }

    fn release_permit(&mut self) {
        if std::mem::take(&mut self.holds_permit) {
            if let Err(err) = self.throttler.semaphore.release() {
                error!(error = %err, "admission released an unowned permit");
            }
        }
    }
}

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        if let Some(counted) = self.counted.take() {
            self.throttler
                .usage
                .lock()
                .decrement(counted.consumer.as_deref(), counted.priority);
        }
        self.release_permit();
    }
}
