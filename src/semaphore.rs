//! LIFO Waiting Semaphore
//!
//! A counting permit pool of fixed size. Callers either take a permit
//! immediately ([`LifoSemaphore::try_acquire`]) or queue for one
//! ([`LifoSemaphore::acquire`]). Queued callers are served newest-first.
//!
//! Permits are handed off directly: releasing while callers are queued
//! transfers the permit to the most recent waiter instead of returning it to
//! the pool, so the free count only grows when nobody is waiting.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll, Waker};

use parking_lot::Mutex;
use tracing::{debug, error};

use crate::error::{Result, ThrottleError};

/// Counting semaphore with LIFO wake order
#[derive(Debug)]
pub struct LifoSemaphore {
    limit: usize,
    state: Mutex<SemaphoreState>,
}

#[derive(Debug)]
struct SemaphoreState {
    available: usize,

    // Stack of queued callers, newest last.
    waiters: Vec<Waiter>,

    // Waiters that were handed a permit but have not observed it yet.
    granted: HashSet<u64>,

    next_id: u64,
}

#[derive(Debug)]
struct Waiter {
    id: u64,
    waker: Option<Waker>,
}

impl SemaphoreState {
    /// Give one permit back: to the newest waiter if any, otherwise the pool.
    fn release(&mut self, limit: usize) -> Result<Option<Waker>> {
        // Granted permits are not in caller hands until their waiter resumes.
        if self.available + self.granted.len() >= limit {
            return Err(ThrottleError::ReleasedTooManyTimes(limit));
        }

        if let Some(waiter) = self.waiters.pop() {
            self.granted.insert(waiter.id);
            return Ok(waiter.waker);
        }

        self.available += 1;
        Ok(None)
    }
}

impl LifoSemaphore {
    /// Create a semaphore with `limit` permits, all of them free
    pub fn new(limit: usize) -> Result<Self> {
        if limit < 1 {
            return Err(ThrottleError::InvalidCapacityLimit(limit));
        }

        Ok(Self {
            limit,
            state: Mutex::new(SemaphoreState {
                available: limit,
                waiters: Vec::new(),
                granted: HashSet::new(),
                next_id: 0,
            }),
        })
    }

    /// Total number of permits
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Number of free permits
    pub fn available(&self) -> usize {
        self.state.lock().available
    }

    /// Number of queued callers
    pub fn waiting(&self) -> usize {
        self.state.lock().waiters.len()
    }

    /// Free permits and queued callers, read together
    pub fn counts(&self) -> (usize, usize) {
        let state = self.state.lock();
        (state.available, state.waiters.len())
    }

    /// Take a permit if one is free. Never waits.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock();
        if state.available == 0 {
            return false;
        }
        state.available -= 1;
        true
    }

    /// Take a permit, waiting for one if none is free.
    ///
    /// The caller is queued as soon as this returns, not on first poll, so
    /// [`waiting`](Self::waiting) already counts it. Dropping the returned
    /// future before it completes cancels the wait without losing a permit.
    /// Once it completes the caller owns one permit and must
    /// [`release`](Self::release) it.
    pub fn acquire(&self) -> Acquire<'_> {
        let mut state = self.state.lock();
        let stage = if state.available > 0 {
            state.available -= 1;
            Stage::Acquired
        } else {
            let id = state.next_id;
            state.next_id += 1;
            state.waiters.push(Waiter { id, waker: None });
            Stage::Waiting(id)
        };

        Acquire {
            semaphore: self,
            stage,
        }
    }

    /// Return one permit, waking the newest waiter if any.
    ///
    /// Fails without touching the pool or the queue if no permit is held by
    /// a caller, counting permits granted to waiters that have not resumed
    /// yet as not held.
    pub fn release(&self) -> Result<()> {
        let waker = self.state.lock().release(self.limit)?;
        if let Some(waker) = waker {
            waker.wake();
        }
        Ok(())
    }
}

/// Future returned by [`LifoSemaphore::acquire`]
#[derive(Debug)]
#[must_use = "dropping an `Acquire` cancels the wait"]
pub struct Acquire<'a> {
    semaphore: &'a LifoSemaphore,
    stage: Stage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    // A free permit was taken at creation.
    Acquired,
    Waiting(u64),
    // The permit now belongs to the caller.
    Done,
}

impl Acquire<'_> {
    /// Whether this caller had to queue for its permit
    pub fn is_queued(&self) -> bool {
        matches!(self.stage, Stage::Waiting(_))
    }
}

impl Future for Acquire<'_> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        match this.stage {
            Stage::Acquired => {
                this.stage = Stage::Done;
                Poll::Ready(())
            }
            Stage::Waiting(id) => {
                let mut state = this.semaphore.state.lock();
                if state.granted.remove(&id) {
                    drop(state);
                    this.stage = Stage::Done;
                    return Poll::Ready(());
                }

                if let Some(waiter) = state.waiters.iter_mut().rev().find(|w| w.id == id) {
                    match &waiter.waker {
                        Some(waker) if waker.will_wake(cx.waker()) => {}
                        _ => waiter.waker = Some(cx.waker().clone()),
                    }
                }
                Poll::Pending
            }
            Stage::Done => panic!("`Acquire` polled after completion"),
        }
    }
}

impl Drop for Acquire<'_> {
    fn drop(&mut self) {
        let released = match self.stage {
            Stage::Done => return,
            Stage::Acquired => self.semaphore.state.lock().release(self.semaphore.limit),
            Stage::Waiting(id) => {
                let mut state = self.semaphore.state.lock();
                if !state.granted.remove(&id) {
                    // Still queued: leave without consuming anything.
                    state.waiters.retain(|w| w.id != id);
                    return;
                }

                // Woken but cancelled before resuming. Pass the permit on.
                debug!(waiter = id, "cancelled waiter forwards its granted permit");
                state.release(self.semaphore.limit)
            }
        };

        match released {
            Ok(Some(waker)) => waker.wake(),
            Ok(None) => {}
            Err(err) => error!(error = %err, "failed to return permit of dropped acquire"),
        }
    }
}
