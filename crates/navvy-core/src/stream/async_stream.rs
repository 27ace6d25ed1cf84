//! Pull streams over asynchronous sources.
//!
//! Same single-pass contract as [`Stream`](super::Stream), but each pull
//! may suspend the caller until the source resolves.

use async_trait::async_trait;

use super::{Step, StreamError};

/// An asynchronous stream source: one [`Step`] per pull.
///
/// A source is free to suspend for as long as it needs; the consuming
/// task parks on `next().await` until the pull resolves.
#[async_trait]
pub trait AsyncSource<T>: Send {
    async fn pull(&mut self) -> Step<T>;
}

/// Where the stream stands between its source and its consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cursor {
    Running,
    Exhausted,
    Drained,
}

/// Single-pass pull stream over an [`AsyncSource`].
///
/// `next` yields `Ok(Some(item))` per item, `Ok(None)` exactly once at
/// exhaustion, then [`StreamError::Drained`].
pub struct AsyncStream<T> {
    source: Box<dyn AsyncSource<T>>,
    cursor: Cursor,
}

impl<T: Send + 'static> AsyncStream<T> {
    pub fn new(source: impl AsyncSource<T> + 'static) -> Self {
        Self {
            source: Box::new(source),
            cursor: Cursor::Running,
        }
    }

    /// Pull the next item, suspending until the source resolves.
    pub async fn next(&mut self) -> Result<Option<T>, StreamError> {
        match self.cursor {
            Cursor::Drained => Err(StreamError::Drained),
            Cursor::Exhausted => {
                self.cursor = Cursor::Drained;
                Ok(None)
            }
            Cursor::Running => match self.source.pull().await {
                Step::Next(item) => Ok(Some(item)),
                Step::Last(item) => {
                    self.cursor = Cursor::Exhausted;
                    Ok(Some(item))
                }
                Step::Done => {
                    self.cursor = Cursor::Drained;
                    Ok(None)
                }
            },
        }
    }

    /// Map items through `f`, dropping those mapped to `None`.
    pub fn filter_map<U, F>(self, f: F) -> AsyncStream<U>
    where
        U: Send + 'static,
        F: FnMut(T) -> Option<U> + Send + 'static,
    {
        AsyncStream::new(FilterMapSource { inner: self, f })
    }

    /// Map every item through `f`.
    pub fn map<U, F>(self, mut f: F) -> AsyncStream<U>
    where
        U: Send + 'static,
        F: FnMut(T) -> U + Send + 'static,
    {
        self.filter_map(move |item| Some(f(item)))
    }

    /// Keep only items satisfying `pred`.
    pub fn filter<F>(self, mut pred: F) -> AsyncStream<T>
    where
        F: FnMut(&T) -> bool + Send + 'static,
    {
        self.filter_map(move |item| if pred(&item) { Some(item) } else { None })
    }

    /// Left-fold the remaining items into `init`, awaiting the full drain.
    pub async fn fold<A, F>(mut self, init: A, mut f: F) -> Result<A, StreamError>
    where
        A: Send,
        F: FnMut(A, T) -> A + Send,
    {
        let mut acc = init;
        while let Some(item) = self.next().await? {
            acc = f(acc, item);
        }
        Ok(acc)
    }

    /// Await the full drain into a vector.
    pub async fn collect(self) -> Result<Vec<T>, StreamError> {
        self.fold(Vec::new(), |mut items, item| {
            items.push(item);
            items
        })
        .await
    }
}

struct FilterMapSource<T, F> {
    inner: AsyncStream<T>,
    f: F,
}

#[async_trait]
impl<T, U, F> AsyncSource<U> for FilterMapSource<T, F>
where
    T: Send + 'static,
    U: Send + 'static,
    F: FnMut(T) -> Option<U> + Send,
{
    async fn pull(&mut self) -> Step<U> {
        loop {
            match self.inner.next().await {
                Ok(Some(item)) => {
                    if let Some(mapped) = (self.f)(item) {
                        return Step::Next(mapped);
                    }
                }
                Ok(None) | Err(_) => return Step::Done,
            }
        }
    }
}

impl<T> std::fmt::Debug for AsyncStream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncStream")
            .field("cursor", &self.cursor)
            .finish()
    }
}
