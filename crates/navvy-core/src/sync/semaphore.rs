//! Async counting semaphore with FIFO hand-off.
//!
//! Bounds how many tasks may hold a resource at once. Waiters queue in
//! submission order and a released slot is handed directly to the queue
//! head, so a late arrival can never barge past an earlier one.
//!
//! ```text
//!   acquire ──▶ [slot free?] ──yes──▶ Permit
//!                    │no
//!                    ▼
//!              [waiter queue] ◀── release hands the slot to the head
//! ```
//!
//! Uses `std::sync::Mutex` for the queue state — critical sections are just
//! VecDeque operations. The hand-off channel carries the `Permit` itself:
//! if a queued acquirer was cancelled, the undelivered permit's drop returns
//! the slot, so no capacity is lost.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::oneshot;

/// A forgotten slot was handed back more times than it was taken.
///
/// Returned by [`Semaphore::release_forgotten`] when no [`Permit::forget`]
/// call is outstanding — the double-release case.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("semaphore misuse: release without a matching forgotten permit")]
pub struct SemaphoreMisuse;

struct SemState {
    /// Slots currently held, via live permits or forgotten hand-offs.
    outstanding: usize,
    /// Slots detached from RAII by [`Permit::forget`].
    forgotten: usize,
    /// Queued acquirers, oldest first.
    waiters: VecDeque<oneshot::Sender<Permit>>,
}

struct SemInner {
    capacity: usize,
    state: Mutex<SemState>,
}

/// Bounded concurrent-permit pool. Cloning yields another handle to the
/// same pool.
#[derive(Clone)]
pub struct Semaphore {
    inner: Arc<SemInner>,
}

/// A single occupied slot in a [`Semaphore`].
///
/// Released by [`Permit::release`], by drop, or — after [`Permit::forget`]
/// — by a later [`Semaphore::release_forgotten`].
pub struct Permit {
    inner: Arc<SemInner>,
    held: bool,
}

impl Semaphore {
    /// Create a pool with `capacity` slots. A zero capacity never grants.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(SemInner {
                capacity,
                state: Mutex::new(SemState {
                    outstanding: 0,
                    forgotten: 0,
                    waiters: VecDeque::new(),
                }),
            }),
        }
    }

    /// Acquire a permit, waiting in FIFO order while the pool is full.
    ///
    /// Cancel-safe: dropping the returned future forfeits the queue
    /// position without consuming a slot.
    pub async fn acquire(&self) -> Permit {
        loop {
            let rx = {
                let mut st = lock(&self.inner.state);
                if st.waiters.is_empty() && st.outstanding < self.inner.capacity {
                    st.outstanding += 1;
                    return Permit {
                        inner: self.inner.clone(),
                        held: true,
                    };
                }
                let (tx, rx) = oneshot::channel();
                st.waiters.push_back(tx);
                rx
            };

            match rx.await {
                Ok(permit) => return permit,
                // Sender dropped without a hand-off only happens during
                // teardown races; re-queue rather than panic.
                Err(_) => continue,
            }
        }
    }

    /// Acquire without waiting. Refuses while earlier acquirers queue, so
    /// it cannot barge past the FIFO.
    pub fn try_acquire(&self) -> Option<Permit> {
        let mut st = lock(&self.inner.state);
        if st.waiters.is_empty() && st.outstanding < self.inner.capacity {
            st.outstanding += 1;
            Some(Permit {
                inner: self.inner.clone(),
                held: true,
            })
        } else {
            None
        }
    }

    /// Return a slot previously detached with [`Permit::forget`].
    ///
    /// The runtime check is the guard the type system cannot provide on
    /// this path: handing back more slots than were forgotten is an error.
    pub fn release_forgotten(&self) -> Result<(), SemaphoreMisuse> {
        {
            let mut st = lock(&self.inner.state);
            if st.forgotten == 0 {
                return Err(SemaphoreMisuse);
            }
            st.forgotten -= 1;
        }
        release_slot(&self.inner);
        Ok(())
    }

    /// Slots currently held.
    pub fn outstanding(&self) -> usize {
        lock(&self.inner.state).outstanding
    }

    /// Total slots.
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Acquirers currently queued.
    pub fn waiting(&self) -> usize {
        lock(&self.inner.state).waiters.len()
    }
}

impl Permit {
    /// Release the slot, resuming the longest-waiting acquirer if any.
    ///
    /// Consuming `self` makes a second release unrepresentable; dropping a
    /// permit releases it just the same.
    pub fn release(mut self) {
        self.held = false;
        release_slot(&self.inner);
    }

    /// Detach the slot from RAII. It stays occupied until someone calls
    /// [`Semaphore::release_forgotten`] — the hand-off pattern for
    /// callback boundaries that outlive the acquiring scope.
    pub fn forget(mut self) {
        self.held = false;
        lock(&self.inner.state).forgotten += 1;
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        if self.held {
            self.held = false;
            release_slot(&self.inner);
        }
    }
}

impl std::fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = lock(&self.inner.state);
        f.debug_struct("Semaphore")
            .field("capacity", &self.inner.capacity)
            .field("outstanding", &st.outstanding)
            .field("waiting", &st.waiters.len())
            .finish()
    }
}

impl std::fmt::Debug for Permit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Permit").field("held", &self.held).finish()
    }
}

/// Hand the freed slot to the next live waiter, or decrement the count.
fn release_slot(inner: &Arc<SemInner>) {
    let mut st = lock(&inner.state);
    loop {
        match st.waiters.pop_front() {
            Some(tx) => {
                let permit = Permit {
                    inner: inner.clone(),
                    held: true,
                };
                match tx.send(permit) {
                    // Slot moved to the waiter; outstanding is unchanged.
                    Ok(()) => return,
                    // Waiter cancelled. Neutralize the returned permit so
                    // its drop does not re-enter the lock, and try the next.
                    Err(mut permit) => {
                        permit.held = false;
                        continue;
                    }
                }
            }
            None => {
                st.outstanding -= 1;
                return;
            }
        }
    }
}

fn lock(state: &Mutex<SemState>) -> std::sync::MutexGuard<'_, SemState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}
