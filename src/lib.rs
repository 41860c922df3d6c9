//! A thread-safe, unbounded, blocking FIFO queue for producer/consumer
//! coordination.
//!
//! The single component is [`BlockingQueue`]: a mutex-guarded,
//! condition-variable-coordinated queue where consumers can block until one
//! element or a whole batch of N is available, with an optional per-queue
//! wait timeout and a queue-wide interruption signal that releases every
//! waiter.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::thread;
//!
//! use cistern::BlockingQueue;
//!
//! let queue = Arc::new(BlockingQueue::new());
//!
//! let producer = {
//!     let queue = Arc::clone(&queue);
//!     thread::spawn(move || {
//!         queue.push_batch(1..=5).unwrap();
//!     })
//! };
//!
//! // Blocks until all three elements are available, then takes them at once.
//! let batch = queue.pop_batch(3).unwrap();
//! assert_eq!(batch, vec![1, 2, 3]);
//!
//! producer.join().unwrap();
//! ```

pub mod queue;

mod trace;

pub use queue::{BlockingQueue, PopError, PushError};
pub use trace::init_tracing;
