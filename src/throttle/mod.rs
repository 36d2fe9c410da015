//! Admission Control Module
//!
//! Decides, per request, whether to run it now, queue it briefly, or reject
//! it, based on a bounded concurrency budget, a bounded wait queue and
//! pluggable quotas keyed by consumer and priority.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────┐
//! │                       Throttler                       │
//! ├───────────────────────────────────────────────────────┤
//! │  ┌───────────┐   ┌───────────┐   ┌───────────────┐    │
//! │  │ Consumer  │   │ Priority  │   │ Unconditional │    │
//! │  │ quotas    │   │ quotas    │   │ quotas        │    │
//! │  └───────────┘   └───────────┘   └───────────────┘    │
//! ├───────────────────────────────────────────────────────┤
//! │  ┌─────────────────────────────────────────────────┐  │
//! │  │   LIFO semaphore (capacity + wait queue)        │  │
//! │  └─────────────────────────────────────────────────┘  │
//! └───────────────────────────────────────────────────────┘
//! ```

pub mod config;
mod throttler;
pub mod types;

#[cfg(test)]
mod proptests;

pub use config::ThrottleConfig;
pub use throttler::{Admission, Throttler, ThrottlerBuilder};
pub use types::{AdmissionResult, Priority, Stats};
