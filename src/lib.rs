//! lifo-throttle
//!
//! In-process admission control for a limited resource. A [`Throttler`]
//! owns a LIFO waiting semaphore sized to its capacity, a bounded wait queue
//! and three quota slots (consumer, priority, unconditional), and turns each
//! incoming request into one [`AdmissionResult`].
//!
//! ```no_run
//! use lifo_throttle::{Priority, Throttler};
//!
//! # async fn handle() -> lifo_throttle::Result<()> {
//! let throttler = Throttler::new(16, 64)?;
//!
//! let admission = throttler.throttle(Some("billing"), Some(Priority::High)).await;
//! if admission.is_accepted() {
//!     // do the protected work while `admission` is alive
//! } else {
//!     eprintln!("throttled: {}", admission.result());
//! }
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod metrics;
pub mod quota;
pub mod semaphore;
pub mod throttle;

pub use error::{Result, ThrottleError};
pub use metrics::{MetricsProvider, NoopMetrics, PrometheusMetrics};
pub use quota::{
    CapacityQuota, CompositeCapacityQuota, CompositeQuota, MaxFractionQuota, Quota,
    RandomRejectQuota, StaticQuota,
};
pub use semaphore::LifoSemaphore;
pub use throttle::{
    Admission, AdmissionResult, Priority, Stats, ThrottleConfig, Throttler, ThrottlerBuilder,
};
