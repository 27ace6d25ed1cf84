//! Pull- and push-based item streams.
//!
//! [`Stream`] pulls items from a synchronous source function; [`AsyncStream`]
//! does the same over an async source; [`ListStream`] is a push-based
//! buffered queue with an explicit open/closing/closed flow state.
//!
//! All three share the single-pass contract: items are observed once, in
//! order, and a stream that has reported exhaustion refuses further pulls
//! with [`StreamError::Drained`] instead of quietly yielding nothing
//! forever.

mod async_stream;
mod list;

pub use async_stream::{AsyncSource, AsyncStream};
pub use list::{Flow, ListStream};

use std::collections::VecDeque;
use std::ops::{Bound, RangeBounds};
use std::sync::{Arc, Mutex};

use thiserror::Error;

/// One pull from a stream source.
///
/// `Last` carries the final item and marks the source exhausted, saving
/// sources that know their end from answering one extra `Done` pull.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step<T> {
    /// An item, with more possibly to come.
    Next(T),
    /// The final item; the source is exhausted after this.
    Last(T),
    /// Exhausted, no item.
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    /// The stream already reported exhaustion to this consumer.
    #[error("stream already drained")]
    Drained,
}

/// Where a single-pass stream stands between its source and its consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cursor {
    /// Items may still be pulled from the source.
    Running,
    /// Source exhausted via `Last`; exhaustion not yet reported.
    Exhausted,
    /// Exhaustion reported; further pulls are an error.
    Drained,
}

/// Single-pass pull stream over a source function.
///
/// `next` yields `Ok(Some(item))` per item, then `Ok(None)` exactly once
/// at exhaustion; pulling again is [`StreamError::Drained`]. Combinators
/// consume the stream and are lazy, pulling from the source only as the
/// result stream is pulled.
pub struct Stream<T> {
    source: Box<dyn FnMut() -> Step<T> + Send>,
    cursor: Cursor,
}

impl<T: Send + 'static> Stream<T> {
    /// Build a stream from a source function, called once per pull.
    pub fn from_fn<F>(source: F) -> Self
    where
        F: FnMut() -> Step<T> + Send + 'static,
    {
        Self {
            source: Box::new(source),
            cursor: Cursor::Running,
        }
    }

    /// Build a stream over the items of an iterator.
    pub fn from_iter<I>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Send + 'static,
    {
        let mut iter = items.into_iter();
        Self::from_fn(move || match iter.next() {
            Some(item) => Step::Next(item),
            None => Step::Done,
        })
    }

    /// Pull the next item.
    pub fn next(&mut self) -> Result<Option<T>, StreamError> {
        match self.cursor {
            Cursor::Drained => Err(StreamError::Drained),
            Cursor::Exhausted => {
                self.cursor = Cursor::Drained;
                Ok(None)
            }
            Cursor::Running => match (self.source)() {
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
    ///
    /// This is the primitive the other shaping combinators derive from.
    pub fn filter_map<U, F>(mut self, mut f: F) -> Stream<U>
    where
        U: Send + 'static,
        F: FnMut(T) -> Option<U> + Send + 'static,
    {
        Stream::from_fn(move || loop {
            match self.next() {
                Ok(Some(item)) => {
                    if let Some(mapped) = f(item) {
                        return Step::Next(mapped);
                    }
                }
                Ok(None) | Err(_) => return Step::Done,
            }
        })
    }

    /// Map every item through `f`.
    pub fn map<U, F>(self, mut f: F) -> Stream<U>
    where
        U: Send + 'static,
        F: FnMut(T) -> U + Send + 'static,
    {
        self.filter_map(move |item| Some(f(item)))
    }

    /// Keep only items satisfying `pred`.
    pub fn filter<F>(self, mut pred: F) -> Stream<T>
    where
        F: FnMut(&T) -> bool + Send + 'static,
    {
        self.filter_map(move |item| if pred(&item) { Some(item) } else { None })
    }

    /// Bound the pulled index range. Pulling stops at the range end, so
    /// slicing an unbounded source terminates.
    pub fn slice<R>(mut self, range: R) -> Stream<T>
    where
        R: RangeBounds<usize>,
    {
        let start = match range.start_bound() {
            Bound::Included(&n) => n,
            Bound::Excluded(&n) => n + 1,
            Bound::Unbounded => 0,
        };
        let end = match range.end_bound() {
            Bound::Included(&n) => Some(n + 1),
            Bound::Excluded(&n) => Some(n),
            Bound::Unbounded => None,
        };
        let mut index = 0usize;
        Stream::from_fn(move || loop {
            if end.is_some_and(|e| index >= e) {
                return Step::Done;
            }
            match self.next() {
                Ok(Some(item)) => {
                    let i = index;
                    index += 1;
                    if i >= start {
                        return Step::Next(item);
                    }
                }
                Ok(None) | Err(_) => return Step::Done,
            }
        })
    }

    /// Number items from zero in pull order.
    pub fn indexed(self) -> Stream<(usize, T)> {
        let mut index = 0usize;
        self.map(move |item| {
            let i = index;
            index += 1;
            (i, item)
        })
    }

    /// Left-fold the remaining items into `init`.
    pub fn fold<A, F>(mut self, init: A, mut f: F) -> Result<A, StreamError>
    where
        F: FnMut(A, T) -> A,
    {
        let mut acc = init;
        while let Some(item) = self.next()? {
            acc = f(acc, item);
        }
        Ok(acc)
    }

    /// Left-fold seeded by the first pulled item. `Ok(None)` on an empty
    /// stream.
    pub fn reduce<F>(mut self, mut f: F) -> Result<Option<T>, StreamError>
    where
        F: FnMut(T, T) -> T,
    {
        let mut acc = match self.next()? {
            Some(item) => item,
            None => return Ok(None),
        };
        while let Some(item) = self.next()? {
            acc = f(acc, item);
        }
        Ok(Some(acc))
    }

    /// Pull everything that remains.
    pub fn collect(self) -> Result<Vec<T>, StreamError> {
        self.fold(Vec::new(), |mut items, item| {
            items.push(item);
            items
        })
    }

    /// Fork the stream at its current cursor. Both sides observe every
    /// remaining item; the source is pulled once per item, whichever side
    /// asks first, and the other side reads from a catch-up buffer.
    pub fn tee(self) -> (Stream<T>, Stream<T>)
    where
        T: Clone,
    {
        let shared = Arc::new(Mutex::new(TeeShared {
            inner: self,
            buffers: [VecDeque::new(), VecDeque::new()],
            done: false,
        }));
        (tee_side(shared.clone(), 0), tee_side(shared, 1))
    }
}

struct TeeShared<T> {
    inner: Stream<T>,
    buffers: [VecDeque<T>; 2],
    done: bool,
}

fn tee_side<T>(shared: Arc<Mutex<TeeShared<T>>>, side: usize) -> Stream<T>
where
    T: Clone + Send + 'static,
{
    Stream::from_fn(move || {
        let mut sh = shared.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(item) = sh.buffers[side].pop_front() {
            return Step::Next(item);
        }
        if sh.done {
            return Step::Done;
        }
        match sh.inner.next() {
            Ok(Some(item)) => {
                sh.buffers[1 - side].push_back(item.clone());
                Step::Next(item)
            }
            Ok(None) | Err(_) => {
                sh.done = true;
                Step::Done
            }
        }
    })
}

impl<T> std::fmt::Debug for Stream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream").field("cursor", &self.cursor).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_yields_items_then_none_then_drained() {
        let mut s = Stream::from_iter(vec![1, 2]);
        assert_eq!(s.next(), Ok(Some(1)));
        assert_eq!(s.next(), Ok(Some(2)));
        assert_eq!(s.next(), Ok(None));
        assert_eq!(s.next(), Err(StreamError::Drained));
        assert_eq!(s.next(), Err(StreamError::Drained));
    }

    #[test]
    fn test_last_step_marks_exhaustion() {
        let mut served = false;
        let mut s = Stream::from_fn(move || {
            if served {
                Step::Done
            } else {
                served = true;
                Step::Last(42)
            }
        });
        assert_eq!(s.next(), Ok(Some(42)));
        assert_eq!(s.next(), Ok(None));
        assert_eq!(s.next(), Err(StreamError::Drained));
    }

    #[test]
    fn test_filter_map_skips_none() {
        let s = Stream::from_iter(1..=6);
        let evens_doubled = s
            .filter_map(|n| if n % 2 == 0 { Some(n * 10) } else { None })
            .collect()
            .unwrap();
        assert_eq!(evens_doubled, vec![20, 40, 60]);
    }

    #[test]
    fn test_map_and_filter_derive_from_filter_map() {
        let out = Stream::from_iter(vec!["a", "bb", "ccc"])
            .filter(|s| s.len() > 1)
            .map(|s| s.to_uppercase())
            .collect()
            .unwrap();
        assert_eq!(out, vec!["BB", "CCC"]);
    }

    #[test]
    fn test_slice_bounds_pulled_range() {
        let s = Stream::from_iter(0..10);
        assert_eq!(s.slice(2..5).collect().unwrap(), vec![2, 3, 4]);

        let s = Stream::from_iter(0..10);
        assert_eq!(s.slice(..=2).collect().unwrap(), vec![0, 1, 2]);

        let s = Stream::from_iter(0..10);
        assert_eq!(s.slice(7..).collect().unwrap(), vec![7, 8, 9]);
    }

    #[test]
    fn test_slice_terminates_unbounded_source() {
        let mut n = 0u64;
        let s = Stream::from_fn(move || {
            n += 1;
            Step::Next(n)
        });
        assert_eq!(s.slice(..3).collect().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_fold_and_reduce() {
        let sum = Stream::from_iter(1..=4).fold(0, |acc, n| acc + n).unwrap();
        assert_eq!(sum, 10);

        let max = Stream::from_iter(vec![3, 9, 1])
            .reduce(|a, b| a.max(b))
            .unwrap();
        assert_eq!(max, Some(9));

        let empty: Option<i32> = Stream::from_iter(Vec::new()).reduce(|a, _| a).unwrap();
        assert_eq!(empty, None);
    }

    #[test]
    fn test_indexed_pairs_items_with_pull_order() {
        let out = Stream::from_iter(vec!["x", "y"]).indexed().collect().unwrap();
        assert_eq!(out, vec![(0, "x"), (1, "y")]);
    }

    #[test]
    fn test_shaping_matches_direct_transform() {
        let words = vec!["alpha", "beta", "gamma", "delta", "epsilon"];

        let streamed = Stream::from_iter(words.clone())
            .indexed()
            .filter(|(i, _)| i % 2 == 1)
            .map(|(_, w)| w.to_uppercase())
            .fold(String::new(), |acc, w| acc + &w)
            .unwrap();

        let direct: String = words
            .iter()
            .enumerate()
            .filter(|(i, _)| i % 2 == 1)
            .map(|(_, w)| w.to_uppercase())
            .collect();

        assert_eq!(streamed, direct);
    }

    #[test]
    fn test_tee_sides_see_every_remaining_item() {
        let mut s = Stream::from_iter(vec![1, 2, 3, 4]);
        // Advance the cursor before forking.
        assert_eq!(s.next(), Ok(Some(1)));

        let (mut left, mut right) = s.tee();
        assert_eq!(left.next(), Ok(Some(2)));
        assert_eq!(left.next(), Ok(Some(3)));
        // The lagging side replays from its catch-up buffer.
        assert_eq!(right.next(), Ok(Some(2)));
        assert_eq!(right.next(), Ok(Some(3)));
        assert_eq!(right.next(), Ok(Some(4)));
        assert_eq!(left.next(), Ok(Some(4)));

        assert_eq!(left.next(), Ok(None));
        assert_eq!(right.next(), Ok(None));
    }

    #[test]
    fn test_combinators_are_lazy() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let pulls = Arc::new(AtomicUsize::new(0));
        let p = pulls.clone();

        let mut n = 0;
        let mut s = Stream::from_fn(move || {
            p.fetch_add(1, Ordering::SeqCst);
            n += 1;
            Step::Next(n)
        })
        .map(|n| n * 2);

        assert_eq!(pulls.load(Ordering::SeqCst), 0);
        assert_eq!(s.next(), Ok(Some(2)));
        assert_eq!(pulls.load(Ordering::SeqCst), 1);
    }
}
