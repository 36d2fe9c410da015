//! Property-Based Tests for the Throttler
//!
//! Random admit/release sequences against a throttler with no queue, so every
//! `throttle` call resolves on first poll. After every step the accounting
//! invariants must hold and each decision must match a simple model.
//!
//! # Running the Tests
//!
//! ```bash
//! cargo test --lib throttle::proptests
//! ```

use futures::FutureExt;
use proptest::prelude::*;

use crate::quota::MaxFractionQuota;
use crate::semaphore::LifoSemaphore;
use crate::throttle::{Admission, AdmissionResult, Priority, Throttler};
use crate::ThrottleError;

const CONSUMERS: [&str; 4] = ["alpha", "beta", "gamma", "delta"];
const CONSUMER_MAX_FRACTION: f64 = 0.5;

#[derive(Debug, Clone)]
enum Op {
    Admit {
        consumer: Option<usize>,
        priority: Option<Priority>,
    },
    Release(usize),
}

fn arb_priority() -> impl Strategy<Value = Option<Priority>> {
    prop::option::of(prop_oneof![
        Just(Priority::High),
        Just(Priority::Normal),
        Just(Priority::Low),
    ])
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (prop::option::of(0..CONSUMERS.len()), arb_priority())
            .prop_map(|(consumer, priority)| Op::Admit { consumer, priority }),
        2 => any::<usize>().prop_map(Op::Release),
    ]
}

fn expected_result(throttler: &Throttler, consumer: Option<&str>) -> AdmissionResult {
    let stats = throttler.stats();
    if stats.available_capacity == 0 {
        return AdmissionResult::RejectedFullQueue;
    }

    if let Some(consumer) = consumer {
        let projected = (stats.consumer_used(consumer) + 1) as f64 / stats.capacity_limit as f64;
        if projected > CONSUMER_MAX_FRACTION {
            return AdmissionResult::RejectedConsumerQuota;
        }
    }

    AdmissionResult::Accepted
}

fn check_invariants(throttler: &Throttler, held: usize) -> Result<(), TestCaseError> {
    let stats = throttler.stats();

    prop_assert!(stats.available_capacity <= stats.capacity_limit);
    prop_assert_eq!(stats.available_capacity + held, stats.capacity_limit);
    prop_assert_eq!(stats.queue_size, 0);

    let consumers_total: usize = stats.consumers_used_capacity.values().sum();
    let priorities_total: usize = stats.priorities_used_capacity.values().sum();
    prop_assert!(consumers_total <= stats.capacity_limit);
    prop_assert!(priorities_total <= stats.capacity_limit);

    prop_assert!(stats.consumers_used_capacity.values().all(|&used| used > 0));
    prop_assert!(stats.priorities_used_capacity.values().all(|&used| used > 0));

    for &used in stats.consumers_used_capacity.values() {
        prop_assert!(used as f64 / stats.capacity_limit as f64 <= CONSUMER_MAX_FRACTION);
    }

    Ok(())
}

proptest! {
    /// Accounting stays balanced over any admit/release sequence
    #[test]
    fn prop_accounting_invariants(
        capacity in 1usize..8,
        ops in prop::collection::vec(arb_op(), 1..64)
    ) {
        let throttler = Throttler::builder(capacity)
            .consumer_quota(MaxFractionQuota::<str>::new(CONSUMER_MAX_FRACTION).unwrap())
            .build()
            .unwrap();
        let mut held: Vec<Admission<'_>> = Vec::new();

        for op in ops {
            match op {
                Op::Admit { consumer, priority } => {
                    let consumer = consumer.map(|i| CONSUMERS[i]);
                    let expected = expected_result(&throttler, consumer);

                    let admission = throttler
                        .throttle(consumer, priority)
                        .now_or_never()
                        .expect("a throttler without queue never suspends");
                    prop_assert_eq!(admission.result(), expected);

                    if admission.is_accepted() {
                        held.push(admission);
                    }
                }
                Op::Release(index) => {
                    if !held.is_empty() {
                        let index = index % held.len();
                        drop(held.swap_remove(index));
                    }
                }
            }

            check_invariants(&throttler, held.len())?;
        }

        drop(held);

        let stats = throttler.stats();
        prop_assert_eq!(stats.available_capacity, capacity);
        prop_assert!(stats.consumers_used_capacity.is_empty());
        prop_assert!(stats.priorities_used_capacity.is_empty());
    }

    /// The semaphore never hands out more than `limit` permits and refuses
    /// releases beyond what was acquired
    #[test]
    fn prop_semaphore_balance(
        limit in 1usize..6,
        acquires in prop::collection::vec(any::<bool>(), 1..128)
    ) {
        let semaphore = LifoSemaphore::new(limit).unwrap();
        let mut held = 0usize;

        for acquire in acquires {
            if acquire {
                let acquired = semaphore.try_acquire();
                prop_assert_eq!(acquired, held < limit);
                if acquired {
                    held += 1;
                }
            } else {
                let released = semaphore.release();
                if held == 0 {
                    prop_assert_eq!(released, Err(ThrottleError::ReleasedTooManyTimes(limit)));
                } else {
                    prop_assert!(released.is_ok());
                    held -= 1;
                }
            }

            prop_assert_eq!(semaphore.available(), limit - held);
        }
    }
}
