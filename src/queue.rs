//! Blocking MPMC FIFO queue with batch operations, timeouts, and interruption.
//!
//! [`BlockingQueue`] is an unbounded, mutex-guarded queue for coordinating
//! producer and consumer threads. Consumers can wait for one element or for a
//! whole batch of N; producers never block.
//!
//! # Overview
//!
//! - `push_one` / `push_batch` - append to the tail, wake every waiter
//! - `pop_one` / `pop_batch` - remove from the front, blocking until enough
//!   elements are available
//! - `front` / `front_batch` - clone from the front without removing
//! - `try_*` variants of the pop/peek family check availability exactly once
//!   and never block
//!
//! # Waiting and wakeups
//!
//! Every blocking call waits on the predicate "at least `demand` elements are
//! stored, or the queue is interrupted". Wakeups are broadcast: waiters may
//! be blocked on different batch sizes, so a single-wake discipline could
//! starve a waiter whose demand just became satisfiable. Each woken thread
//! re-checks its own predicate and either proceeds or goes back to sleep.
//!
//! A batch pop therefore never splits: it waits until all `count` elements
//! are present, then extracts them in one critical section. Concurrent pops
//! cannot interleave inside a batch.
//!
//! # Interruption
//!
//! [`BlockingQueue::interrupt`] sets a sticky flag and releases every blocked
//! waiter. While the flag is set, all operations fail with `Interrupted` and
//! mutate nothing; stored elements stay in place. [`BlockingQueue::clear_interrupt`]
//! returns the queue to normal operation. Interruption takes priority over
//! both available data and an expired timeout.
//!
//! # Example
//!
//! ```
//! use cistern::BlockingQueue;
//!
//! let queue = BlockingQueue::new();
//! queue.push_batch([1, 2, 3, 4, 5]).unwrap();
//!
//! assert_eq!(queue.pop_batch(3).unwrap(), vec![1, 2, 3]);
//! assert_eq!(queue.len(), 2);
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use thiserror::Error;

use crate::trace::{debug, trace};

/// Error returned by the push family when the queue is interrupted.
///
/// Carries the rejected input back to the caller so no element is lost:
/// `PushError<T>` for [`BlockingQueue::push_one`], `PushError<Vec<T>>` for
/// [`BlockingQueue::push_batch`].
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PushError<T>(pub T);

impl<T> PushError<T> {
    /// Consumes the error, returning the rejected input.
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Debug for PushError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PushError").finish()
    }
}

impl<T> fmt::Display for PushError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("pushing into an interrupted queue")
    }
}

impl<T> std::error::Error for PushError<T> {}

/// Error returned by the pop/peek family.
///
/// Every variant leaves the queue untouched: a failed pop never removes a
/// partial batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PopError {
    /// The queue was or became interrupted during the call.
    ///
    /// Takes priority over available data and over an expired timeout.
    #[error("queue is interrupted")]
    Interrupted,
    /// The configured wait timeout elapsed before enough elements arrived.
    #[error("timed out waiting for elements")]
    Timeout,
    /// Fewer elements than requested were available.
    ///
    /// Returned by the `try_*` family when the one-shot availability check
    /// fails. Blocking calls report [`Timeout`](Self::Timeout) or
    /// [`Interrupted`](Self::Interrupted) instead, since their wait only
    /// ends once the demand is met.
    #[error("not enough elements available")]
    Insufficient,
}

/// Everything guarded by the queue's single lock.
struct State<T> {
    /// FIFO storage; front = next element to be consumed.
    items: VecDeque<T>,
    /// Sticky interruption flag. Never mutates `items`.
    interrupted: bool,
    /// Applied to every blocking wait; `None` waits forever.
    wait_timeout: Option<Duration>,
}

/// A thread-safe, unbounded, blocking FIFO queue.
///
/// All methods take `&self`; share the queue between threads with
/// [`std::sync::Arc`] or scoped-thread borrows. One coarse lock guards the
/// elements, the interruption flag, and the timeout setting.
///
/// A waiter necessarily borrows the queue, so Rust's ownership rules prevent
/// dropping it while another thread is still blocked. To shut down cleanly,
/// call [`interrupt`](Self::interrupt) so waiters return and their threads
/// can be joined.
pub struct BlockingQueue<T> {
    state: Mutex<State<T>>,
    available: Condvar,
}

impl<T> BlockingQueue<T> {
    /// Creates an empty queue with no timeout configured.
    #[must_use]
    pub fn new() -> Self {
        Self::with_items(VecDeque::new())
    }

    fn with_items(items: VecDeque<T>) -> Self {
        Self {
            state: Mutex::new(State {
                items,
                interrupted: false,
                wait_timeout: None,
            }),
            available: Condvar::new(),
        }
    }

    /// Appends a single element to the tail and wakes all waiters.
    ///
    /// Never blocks.
    ///
    /// # Errors
    ///
    /// Returns `Err(PushError(value))` if the queue is interrupted; the
    /// rejected value is handed back and nothing is mutated.
    pub fn push_one(&self, value: T) -> Result<(), PushError<T>> {
        let mut state = self.state.lock();
        if state.interrupted {
            return Err(PushError(value));
        }
        state.items.push_back(value);
        trace!(len = state.items.len(), "pushed one element");
        drop(state);
        self.available.notify_all();
        Ok(())
    }

    /// Appends a batch of elements to the tail, preserving input order, and
    /// wakes all waiters.
    ///
    /// Never blocks. An empty batch on an active queue is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `Err(PushError(values))` if the queue is interrupted; the
    /// collected input is handed back and nothing is mutated. The flag is
    /// checked even for an empty batch, matching the pop side.
    pub fn push_batch<I>(&self, values: I) -> Result<(), PushError<Vec<T>>>
    where
        I: IntoIterator<Item = T>,
    {
        let values: Vec<T> = values.into_iter().collect();
        let mut state = self.state.lock();
        if state.interrupted {
            return Err(PushError(values));
        }
        if values.is_empty() {
            return Ok(());
        }
        state.items.extend(values);
        trace!(len = state.items.len(), "pushed batch");
        drop(state);
        self.available.notify_all();
        Ok(())
    }

    /// Removes and returns the front element, blocking until one is
    /// available.
    ///
    /// # Errors
    ///
    /// Returns `Err(PopError::Interrupted)` if the queue is or becomes
    /// interrupted, or `Err(PopError::Timeout)` if a configured wait timeout
    /// elapses first. The queue is left unchanged on error.
    pub fn pop_one(&self) -> Result<T, PopError> {
        self.wait_then_extract(1, true, VecDeque::pop_front)
    }

    /// Removes and returns the front element if one is available right now.
    ///
    /// # Errors
    ///
    /// Returns `Err(PopError::Interrupted)` if the queue is interrupted, or
    /// `Err(PopError::Insufficient)` if it is empty.
    pub fn try_pop_one(&self) -> Result<T, PopError> {
        self.wait_then_extract(1, false, VecDeque::pop_front)
    }

    /// Removes and returns the front `count` elements in FIFO order,
    /// blocking until the queue holds at least `count`.
    ///
    /// The batch is extracted atomically: waiting on "size >= count" rather
    /// than "non-empty" guarantees that once the wait ends, all `count`
    /// elements are taken in one critical section with no second wait and no
    /// interleaving pop. `pop_batch(0)` is a no-op returning an empty `Vec`
    /// (unless the queue is interrupted, which is checked first).
    ///
    /// # Errors
    ///
    /// Returns `Err(PopError::Interrupted)` if the queue is or becomes
    /// interrupted, or `Err(PopError::Timeout)` if a configured wait timeout
    /// elapses first. The queue is left unchanged on error.
    pub fn pop_batch(&self, count: usize) -> Result<Vec<T>, PopError> {
        self.wait_then_extract(count, true, |items| take_front(items, count))
    }

    /// Removes and returns the front `count` elements if they are all
    /// available right now.
    ///
    /// # Errors
    ///
    /// Returns `Err(PopError::Interrupted)` if the queue is interrupted, or
    /// `Err(PopError::Insufficient)` if fewer than `count` elements are
    /// stored (in which case none are removed).
    pub fn try_pop_batch(&self, count: usize) -> Result<Vec<T>, PopError> {
        self.wait_then_extract(count, false, |items| take_front(items, count))
    }

    /// Sets the timeout applied to every blocking wait.
    ///
    /// `None` makes blocking calls wait indefinitely. The value is sampled
    /// once when a wait begins; changing it does not affect waits already in
    /// progress.
    pub fn set_wait_timeout(&self, timeout: Option<Duration>) {
        self.state.lock().wait_timeout = timeout;
    }

    /// Returns the currently configured wait timeout.
    #[must_use]
    pub fn wait_timeout(&self) -> Option<Duration> {
        self.state.lock().wait_timeout
    }

    /// Interrupts the queue: sets the sticky flag and wakes all waiters.
    ///
    /// Every blocked and future operation fails with `Interrupted` until
    /// [`clear_interrupt`](Self::clear_interrupt) is called. Stored elements
    /// are not touched.
    pub fn interrupt(&self) {
        let mut state = self.state.lock();
        state.interrupted = true;
        drop(state);
        self.available.notify_all();
        debug!("queue interrupted, all waiters released");
    }

    /// Clears the interruption flag, returning the queue to normal
    /// operation.
    ///
    /// Wakes nobody: waiters blocked at interrupt time already returned on
    /// that transition, and new callers proceed normally.
    pub fn clear_interrupt(&self) {
        self.state.lock().interrupted = false;
        debug!("queue interruption cleared");
    }

    /// Returns whether the queue is currently interrupted.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.state.lock().interrupted
    }

    /// Returns the number of stored elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Returns whether the queue holds no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    /// Drops all stored elements.
    ///
    /// Leaves the interruption flag and the timeout setting untouched, and
    /// wakes no waiters: clearing produces no new data, so a waiter's
    /// predicate cannot have become satisfiable.
    pub fn clear(&self) {
        self.state.lock().items.clear();
    }

    /// Consumes the queue and returns its stored elements in FIFO order.
    #[must_use]
    pub fn into_items(self) -> VecDeque<T> {
        self.state.into_inner().items
    }

    /// Shared wait-then-extract path behind the whole pop/peek family.
    ///
    /// Waits (if `blocking`) until `items.len() >= demand` or the queue is
    /// interrupted, then resolves in a fixed order: interruption first, then
    /// sufficiency, then extraction. The extraction closure runs inside the
    /// critical section, so a satisfied predicate cannot race away before
    /// the elements are taken.
    fn wait_then_extract<R>(
        &self,
        demand: usize,
        blocking: bool,
        extract: impl FnOnce(&mut VecDeque<T>) -> Option<R>,
    ) -> Result<R, PopError> {
        let mut state = self.state.lock();

        if blocking && state.items.len() < demand && !state.interrupted {
            trace!(demand, available = state.items.len(), "waiting for elements");
            // Timeout is sampled once here; later set_wait_timeout calls do
            // not affect this wait.
            match state.wait_timeout {
                Some(timeout) => {
                    let deadline = Instant::now() + timeout;
                    let wait = self.available.wait_while_until(
                        &mut state,
                        |s| s.items.len() < demand && !s.interrupted,
                        deadline,
                    );
                    if wait.timed_out() && state.items.len() < demand && !state.interrupted {
                        trace!(demand, "wait timed out");
                        return Err(PopError::Timeout);
                    }
                }
                None => {
                    self.available
                        .wait_while(&mut state, |s| s.items.len() < demand && !s.interrupted);
                }
            }
        }

        // Interruption beats available data and beats an expired timeout.
        if state.interrupted {
            return Err(PopError::Interrupted);
        }
        if state.items.len() < demand {
            return Err(PopError::Insufficient);
        }
        extract(&mut state.items).ok_or(PopError::Insufficient)
    }
}

impl<T: Clone> BlockingQueue<T> {
    /// Creates a queue pre-populated with `count` clones of `value`.
    #[must_use]
    pub fn filled(count: usize, value: T) -> Self {
        Self::with_items(std::iter::repeat(value).take(count).collect())
    }

    /// Returns a clone of the front element without removing it, blocking
    /// until one is available.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`pop_one`](Self::pop_one).
    pub fn front(&self) -> Result<T, PopError> {
        self.wait_then_extract(1, true, |items| items.front().cloned())
    }

    /// Returns a clone of the front element if one is available right now.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`try_pop_one`](Self::try_pop_one).
    pub fn try_front(&self) -> Result<T, PopError> {
        self.wait_then_extract(1, false, |items| items.front().cloned())
    }

    /// Returns clones of the front `count` elements in FIFO order without
    /// removing them, blocking until the queue holds at least `count`.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`pop_batch`](Self::pop_batch).
    pub fn front_batch(&self, count: usize) -> Result<Vec<T>, PopError> {
        self.wait_then_extract(count, true, |items| clone_front(items, count))
    }

    /// Returns clones of the front `count` elements if they are all
    /// available right now.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`try_pop_batch`](Self::try_pop_batch).
    pub fn try_front_batch(&self, count: usize) -> Result<Vec<T>, PopError> {
        self.wait_then_extract(count, false, |items| clone_front(items, count))
    }
}

/// Removes the front `count` elements, or none if fewer are stored.
fn take_front<T>(items: &mut VecDeque<T>, count: usize) -> Option<Vec<T>> {
    if items.len() < count {
        return None;
    }
    Some(items.drain(..count).collect())
}

/// Clones the front `count` elements, or none if fewer are stored.
fn clone_front<T: Clone>(items: &mut VecDeque<T>, count: usize) -> Option<Vec<T>> {
    if items.len() < count {
        return None;
    }
    Some(items.iter().take(count).cloned().collect())
}

impl<T> Default for BlockingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> FromIterator<T> for BlockingQueue<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::with_items(iter.into_iter().collect())
    }
}

impl<T> From<Vec<T>> for BlockingQueue<T> {
    fn from(items: Vec<T>) -> Self {
        Self::with_items(items.into())
    }
}

impl<T> From<VecDeque<T>> for BlockingQueue<T> {
    fn from(items: VecDeque<T>) -> Self {
        Self::with_items(items)
    }
}

/// Clones the element sequence only. The clone starts with fresh
/// synchronization state: not interrupted, no timeout configured.
impl<T: Clone> Clone for BlockingQueue<T> {
    fn clone(&self) -> Self {
        Self::with_items(self.state.lock().items.clone())
    }
}

impl<T> fmt::Debug for BlockingQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("BlockingQueue")
            .field("len", &state.items.len())
            .field("interrupted", &state.interrupted)
            .field("wait_timeout", &state.wait_timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_fifo_order() {
        let queue = BlockingQueue::new();
        for i in 0..10 {
            queue.push_one(i).unwrap();
        }
        for i in 0..10 {
            assert_eq!(queue.try_pop_one(), Ok(i));
        }
        assert_eq!(queue.try_pop_one(), Err(PopError::Insufficient));
    }

    #[test]
    fn test_push_batch_then_pop_batch() {
        let queue = BlockingQueue::new();
        queue.push_batch([1, 2, 3, 4, 5]).unwrap();

        assert_eq!(queue.pop_batch(3).unwrap(), vec![1, 2, 3]);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop_batch(2).unwrap(), vec![4, 5]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_try_pop_batch_insufficient_leaves_queue_intact() {
        let queue = BlockingQueue::from(vec![1, 2]);

        assert_eq!(queue.try_pop_batch(5), Err(PopError::Insufficient));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.try_pop_batch(2).unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_zero_count_and_empty_batch_are_noops() {
        let queue = BlockingQueue::<u32>::new();

        assert_eq!(queue.try_pop_batch(0).unwrap(), Vec::<u32>::new());
        queue.push_batch(Vec::new()).unwrap();
        assert!(queue.is_empty());
    }

    #[test]
    fn test_zero_count_still_observes_interruption() {
        let queue = BlockingQueue::<u32>::new();
        queue.interrupt();

        assert_eq!(queue.try_pop_batch(0), Err(PopError::Interrupted));
        assert!(queue.push_batch(Vec::new()).is_err());
    }

    #[test]
    fn test_interrupted_push_returns_input() {
        let queue = BlockingQueue::new();
        queue.interrupt();

        let err = queue.push_one(7).unwrap_err();
        assert_eq!(err.into_inner(), 7);

        let err = queue.push_batch([1, 2, 3]).unwrap_err();
        assert_eq!(err.into_inner(), vec![1, 2, 3]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_interruption_beats_available_data() {
        let queue = BlockingQueue::from(vec![1, 2, 3]);
        queue.interrupt();

        assert_eq!(queue.try_pop_one(), Err(PopError::Interrupted));
        assert_eq!(queue.pop_one(), Err(PopError::Interrupted));
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn test_clear_interrupt_resumes_operation() {
        let queue = BlockingQueue::from(vec![1]);
        queue.interrupt();
        assert!(queue.is_interrupted());

        queue.clear_interrupt();
        assert!(!queue.is_interrupted());
        assert_eq!(queue.try_pop_one(), Ok(1));
        queue.push_one(2).unwrap();
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_peek_does_not_mutate() {
        let queue = BlockingQueue::from(vec!["a", "b", "c"]);

        assert_eq!(queue.front(), Ok("a"));
        assert_eq!(queue.try_front(), Ok("a"));
        assert_eq!(queue.front_batch(2).unwrap(), vec!["a", "b"]);
        assert_eq!(queue.try_front_batch(3).unwrap(), vec!["a", "b", "c"]);
        assert_eq!(queue.len(), 3);

        assert_eq!(queue.try_front_batch(4), Err(PopError::Insufficient));
    }

    #[test]
    fn test_timeout_expires_without_data() {
        let queue = BlockingQueue::<u32>::new();
        queue.set_wait_timeout(Some(Duration::from_millis(50)));

        let start = Instant::now();
        assert_eq!(queue.pop_one(), Err(PopError::Timeout));
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_timeout_applies_to_batch_demand() {
        let queue = BlockingQueue::from(vec![1, 2]);
        queue.set_wait_timeout(Some(Duration::from_millis(50)));

        assert_eq!(queue.pop_batch(5), Err(PopError::Timeout));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_wait_timeout_accessor_roundtrip() {
        let queue = BlockingQueue::<u32>::new();
        assert_eq!(queue.wait_timeout(), None);

        queue.set_wait_timeout(Some(Duration::from_secs(1)));
        assert_eq!(queue.wait_timeout(), Some(Duration::from_secs(1)));

        queue.set_wait_timeout(None);
        assert_eq!(queue.wait_timeout(), None);
    }

    #[test]
    fn test_clear_keeps_flag_and_timeout() {
        let queue = BlockingQueue::from(vec![1, 2, 3]);
        queue.set_wait_timeout(Some(Duration::from_millis(10)));
        queue.interrupt();

        queue.clear();
        assert!(queue.is_empty());
        assert!(queue.is_interrupted());
        assert_eq!(queue.wait_timeout(), Some(Duration::from_millis(10)));
    }

    #[test]
    fn test_construction_variants() {
        let from_iter: BlockingQueue<u32> = (1..=3).collect();
        assert_eq!(from_iter.try_pop_batch(3).unwrap(), vec![1, 2, 3]);

        let filled = BlockingQueue::filled(4, 9u32);
        assert_eq!(filled.try_pop_batch(4).unwrap(), vec![9, 9, 9, 9]);

        let from_deque = BlockingQueue::from(VecDeque::from(vec![1, 2]));
        assert_eq!(from_deque.len(), 2);
    }

    #[test]
    fn test_clone_copies_elements_with_fresh_flags() {
        let queue = BlockingQueue::from(vec![1, 2, 3]);
        queue.set_wait_timeout(Some(Duration::from_millis(5)));
        queue.interrupt();

        let copy = queue.clone();
        assert_eq!(copy.len(), 3);
        assert!(!copy.is_interrupted());
        assert_eq!(copy.wait_timeout(), None);
        assert_eq!(copy.try_pop_one(), Ok(1));
        // The source queue still holds its own elements.
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn test_into_items_preserves_order() {
        let queue = BlockingQueue::from(vec![1, 2, 3]);
        assert_eq!(queue.into_items(), VecDeque::from(vec![1, 2, 3]));
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            PushError(1).to_string(),
            "pushing into an interrupted queue"
        );
        assert_eq!(PopError::Timeout.to_string(), "timed out waiting for elements");
    }

    proptest! {
        #[test]
        fn prop_pop_order_equals_push_order(items in proptest::collection::vec(any::<u32>(), 0..64)) {
            let queue: BlockingQueue<u32> = items.iter().copied().collect();
            let mut popped = Vec::with_capacity(items.len());
            while let Ok(value) = queue.try_pop_one() {
                popped.push(value);
            }
            prop_assert_eq!(popped, items);
        }
    }
}
