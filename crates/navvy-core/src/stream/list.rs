//! Push-based buffered stream with an explicit close protocol.
//!
//! ```text
//!   producer ──push──▶ [buffer] ──next──▶ consumer(s)
//!                         │
//!   close: Open ─▶ Closing (closing listeners stage final items)
//!                     └──▶ Closed (consumers drain, then see None)
//! ```
//!
//! Buffer access is serialized through a one-permit [`Semaphore`], so a
//! `push_all` batch lands contiguously even with concurrent producers.
//! The flow state only moves forward; a closed stream stays closed.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll, Waker};

use async_trait::async_trait;

use crate::sync::Semaphore;

use super::{AsyncSource, Step};

/// Monotonic flow state of a [`ListStream`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Accepting pushes.
    Open,
    /// Close begun; closing listeners are staging final items.
    Closing,
    /// No further items will arrive.
    Closed,
}

type ClosingListener<T> = Box<dyn FnOnce(&mut Vec<T>) + Send>;
type ClosedListener = Box<dyn FnOnce() + Send>;

struct ListState<T> {
    buffer: VecDeque<T>,
    flow: Flow,
    /// Consumers parked on an empty buffer.
    wakers: Vec<Waker>,
    on_closing: Vec<ClosingListener<T>>,
    on_closed: Vec<ClosedListener>,
}

/// Push-based single-producer buffered stream.
///
/// Cheap to clone; every clone is a handle to the same buffer, so one
/// side can push while another consumes. Consumers pull with
/// [`next`](ListStream::next), which suspends on an empty open buffer
/// and yields `None` only once the stream is closed and drained.
pub struct ListStream<T> {
    state: Arc<Mutex<ListState<T>>>,
    gate: Semaphore,
}

impl<T> Clone for ListStream<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            gate: self.gate.clone(),
        }
    }
}

impl<T: Send + 'static> ListStream<T> {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ListState {
                buffer: VecDeque::new(),
                flow: Flow::Open,
                wakers: Vec::new(),
                on_closing: Vec::new(),
                on_closed: Vec::new(),
            })),
            gate: Semaphore::new(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ListState<T>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append one item, waking a parked consumer. Ignored once closed.
    pub async fn push(&self, item: T) {
        let permit = self.gate.acquire().await;
        {
            let mut st = self.lock();
            if st.flow == Flow::Closed {
                tracing::debug!(target: "navvy::stream", "push after close dropped");
            } else {
                st.buffer.push_back(item);
                for w in st.wakers.drain(..) {
                    w.wake();
                }
            }
        }
        permit.release();
    }

    /// Append a batch under a single permit, so concurrent producers
    /// never interleave within it. Ignored once closed.
    pub async fn push_all<I>(&self, items: I)
    where
        I: IntoIterator<Item = T>,
    {
        let permit = self.gate.acquire().await;
        {
            let mut st = self.lock();
            if st.flow == Flow::Closed {
                tracing::debug!(target: "navvy::stream", "push after close dropped");
            } else {
                st.buffer.extend(items);
                for w in st.wakers.drain(..) {
                    w.wake();
                }
            }
        }
        permit.release();
    }

    /// Close the stream. Idempotent; only the first call runs the
    /// protocol:
    ///
    /// 1. flow moves to [`Flow::Closing`] under the push permit;
    /// 2. closing listeners run, each staging any final items;
    /// 3. under the re-acquired permit the staged items are appended,
    ///    flow moves to [`Flow::Closed`] and parked consumers wake;
    /// 4. closed listeners run.
    ///
    /// A consumer may close early: items already buffered stay
    /// drainable, but nobody ends up waiting for production that will
    /// never come.
    pub async fn close(&self) {
        let closing = {
            let permit = self.gate.acquire().await;
            let listeners = {
                let mut st = self.lock();
                if st.flow == Flow::Open {
                    st.flow = Flow::Closing;
                    Some(std::mem::take(&mut st.on_closing))
                } else {
                    None
                }
            };
            permit.release();
            listeners
        };
        let Some(listeners) = closing else {
            return;
        };

        let mut staged: Vec<T> = Vec::new();
        for listener in listeners {
            listener(&mut staged);
        }

        let permit = self.gate.acquire().await;
        let closed_listeners = {
            let mut st = self.lock();
            st.buffer.extend(staged);
            st.flow = Flow::Closed;
            for w in st.wakers.drain(..) {
                w.wake();
            }
            std::mem::take(&mut st.on_closed)
        };
        permit.release();

        for listener in closed_listeners {
            listener();
        }
    }

    /// Run `f` while the stream is closing, before it reaches
    /// [`Flow::Closed`]. Items pushed into the staging buffer become the
    /// stream's final items. Listeners run in insertion order; one
    /// registered after close never runs.
    pub fn on_closing<F>(&self, f: F)
    where
        F: FnOnce(&mut Vec<T>) + Send + 'static,
    {
        let mut st = self.lock();
        if st.flow == Flow::Open {
            st.on_closing.push(Box::new(f));
        }
    }

    /// Run `f` once the stream has fully closed. Listeners run in
    /// insertion order; one registered after close never runs.
    pub fn on_closed<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut st = self.lock();
        if st.flow != Flow::Closed {
            st.on_closed.push(Box::new(f));
        }
    }

    /// Pop the oldest buffered item, suspending while the buffer is
    /// empty and the stream open. `None` means closed and drained.
    pub async fn next(&self) -> Option<T> {
        std::future::poll_fn(|cx| self.poll_pop(cx)).await
    }

    fn poll_pop(&self, cx: &mut Context<'_>) -> Poll<Option<T>> {
        let mut st = self.lock();
        if let Some(item) = st.buffer.pop_front() {
            return Poll::Ready(Some(item));
        }
        if st.flow == Flow::Closed {
            return Poll::Ready(None);
        }
        if !st.wakers.iter().any(|w| w.will_wake(cx.waker())) {
            st.wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }

    /// Items currently buffered.
    pub fn len(&self) -> usize {
        self.lock().buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.lock().flow == Flow::Closed
    }

    pub fn flow(&self) -> Flow {
        self.lock().flow
    }
}

impl<T: Send + 'static> Default for ListStream<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Combinator-ecosystem access: a `ListStream` is a `futures::Stream`
/// ending when closed and drained.
impl<T: Send + 'static> futures::Stream for ListStream<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.poll_pop(cx)
    }
}

/// A `ListStream` can feed an [`AsyncStream`](super::AsyncStream)
/// directly as its source.
#[async_trait]
impl<T: Send + 'static> AsyncSource<T> for ListStream<T> {
    async fn pull(&mut self) -> Step<T> {
        match ListStream::next(self).await {
            Some(item) => Step::Next(item),
            None => Step::Done,
        }
    }
}

impl<T> std::fmt::Debug for ListStream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f.debug_struct("ListStream")
            .field("flow", &st.flow)
            .field("buffered", &st.buffer.len())
            .finish()
    }
}
