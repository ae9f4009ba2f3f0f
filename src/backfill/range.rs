use std::sync::Mutex;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RangeError {
    #[error("invalid range: end bound precedes start bound")]
    InvalidRange,

    #[error("index {0} written twice")]
    DuplicateIndex(usize),

    #[error("index {0} out of bounds for result of {1} indices")]
    IndexOutOfBounds(usize, usize),

    #[error("index {0} has no value; result iterated before all workers joined")]
    MissingIndex(usize),

    #[error("iterator already consumed all {0} indices")]
    IteratorExhausted(usize),
}

/// Ascending inclusive sequence `[lo, lo+1, ..., hi]`, generic over the
/// fixed-width unsigned integer types. Errors when `hi < lo`.
pub fn make_range<T: RangeBound>(lo: T, hi: T) -> Result<Vec<T>, RangeError> {
    if hi < lo {
        return Err(RangeError::InvalidRange);
    }

    let mut out = Vec::new();
    let mut current = lo;
    loop {
        out.push(current);
        if current == hi {
            break;
        }
        current = current.successor();
    }
    Ok(out)
}

pub trait RangeBound: Copy + Ord {
    fn successor(self) -> Self;
}

macro_rules! impl_range_bound {
    ($($t:ty),*) => {
        $(impl RangeBound for $t {
            fn successor(self) -> Self {
                self + 1
            }
        })*
    };
}

impl_range_bound!(u8, u16, u32, u64, usize);

/// Index-keyed collector for the results of concurrently dispatched
/// sub-queries. Workers `put` out of order; once every worker has joined,
/// [`RangeFetchResult::iterator`] yields `(index, value)` pairs in strictly
/// ascending index order. Writing an index twice is an invariant violation,
/// not a recoverable condition.
#[derive(Debug)]
pub struct RangeFetchResult<T> {
    slots: Mutex<Vec<Option<T>>>,
    count: usize,
}

impl<T: Clone> RangeFetchResult<T> {
    pub fn new(count: usize) -> Self {
        let mut slots = Vec::with_capacity(count);
        slots.resize_with(count, || None);
        Self {
            slots: Mutex::new(slots),
            count,
        }
    }

    /// Number of indices this result was dispatched for.
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn put(&self, index: usize, value: T) -> Result<(), RangeError> {
        if index >= self.count {
            return Err(RangeError::IndexOutOfBounds(index, self.count));
        }
        let mut slots = self.lock_slots();
        if slots[index].is_some() {
            return Err(RangeError::DuplicateIndex(index));
        }
        slots[index] = Some(value);
        Ok(())
    }

    /// A fresh iterator from index 0. Restartable: every call starts over.
    pub fn iterator(&self) -> RangeIterator<'_, T> {
        RangeIterator {
            result: self,
            position: 0,
        }
    }

    fn lock_slots(&self) -> std::sync::MutexGuard<'_, Vec<Option<T>>> {
        // A slot is written in a single assignment, so a poisoned lock still
        // holds consistent state.
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub struct RangeIterator<'a, T> {
    result: &'a RangeFetchResult<T>,
    position: usize,
}

impl<T: Clone> RangeIterator<'_, T> {
    /// True once every index in `[0, count)` has been consumed.
    pub fn done(&self) -> bool {
        self.position >= self.result.count
    }

    /// The next `(index, value)` pair in ascending index order. Calling past
    /// `done()` or hitting an unfilled slot is a caller error.
    pub fn next(&mut self) -> Result<(usize, T), RangeError> {
        if self.done() {
            return Err(RangeError::IteratorExhausted(self.result.count));
        }
        let index = self.position;
        let slots = self.result.lock_slots();
        let value = slots[index]
            .as_ref()
            .cloned()
            .ok_or(RangeError::MissingIndex(index))?;
        self.position += 1;
        Ok((index, value))
    }
}
