//! Bounded, thread-safe FIFO queue.
//!
//! [`BoundedSafeQueue`] is shared between the producer-facing and consumer-facing
//! sides of the frame pipeline and between log writers and the log drain. Every
//! read and mutation of the backing deque happens inside one critical section
//! owned by the queue; the lock never escapes its methods, so two queues can never
//! be locked in a nested fashion.
//!
//! # Overflow
//!
//! A full queue reacts according to its [`PreservationPolicy`]. Overflow is not a
//! failure, so `enqueue` returns an [`Enqueued`] outcome instead of an error:
//!
//! ```
//! use virtual_camera::queue::{BoundedSafeQueue, Enqueued, PreservationPolicy};
//!
//! let queue = BoundedSafeQueue::new(2, PreservationPolicy::Newest)?;
//! assert!(queue.enqueue("A").is_stored());
//! assert!(queue.enqueue("B").is_stored());
//! // "C" is stored, the oldest element makes room for it
//! assert_eq!(queue.enqueue("C"), Enqueued::Evicted("A"));
//! assert_eq!(queue.dequeue(), Some("B"));
//! # Ok::<(), virtual_camera::error::CameraError>(())
//! ```

use crate::error::{CameraError, CameraResult};
use parking_lot::Mutex;
use std::collections::VecDeque;

/// Default capacity, sized for diagnostic log messages.
pub const DEFAULT_CAPACITY: usize = 200;

/// The policy determining how a queue at capacity behaves when adding a new element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreservationPolicy {
    /// Add the new element, discard the oldest element.
    Newest,
    /// Discard the new element, keep the oldest elements.
    Oldest,
    /// Add the new element by growing the queue beyond its capacity.
    Grow,
}

/// Outcome of [`BoundedSafeQueue::enqueue`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub enum Enqueued<T> {
    /// The value was stored and nothing was dropped.
    Stored,
    /// The value was stored; the oldest element was evicted to make room.
    Evicted(T),
    /// The queue was full; the incoming value was dropped.
    Rejected(T),
}

impl<T> Enqueued<T> {
    /// Whether the incoming value ended up in the queue.
    pub fn is_stored(&self) -> bool {
        !matches!(self, Self::Rejected(_))
    }

    /// The element dropped by this enqueue, if any.
    pub fn dropped(self) -> Option<T> {
        match self {
            Self::Stored => None,
            Self::Evicted(value) | Self::Rejected(value) => Some(value),
        }
    }
}

/// A bounded FIFO queue, suitable to be accessed by concurrent threads.
pub struct BoundedSafeQueue<T> {
    policy: PreservationPolicy,
    capacity: usize,
    backing_store: Mutex<VecDeque<T>>,
}

impl<T> BoundedSafeQueue<T> {
    /// Creates a queue.
    ///
    /// # Errors
    /// Returns [`CameraError::InvalidCapacity`] if `capacity` is smaller than 1.
    pub fn new(capacity: usize, policy: PreservationPolicy) -> CameraResult<Self> {
        if capacity < 1 {
            return Err(CameraError::InvalidCapacity { capacity });
        }

        Ok(Self {
            policy,
            capacity,
            backing_store: Mutex::new(VecDeque::with_capacity(capacity)),
        })
    }

    /// Creates a queue holding [`DEFAULT_CAPACITY`] elements that keeps the oldest ones.
    pub fn with_defaults() -> Self {
        Self {
            policy: PreservationPolicy::Oldest,
            capacity: DEFAULT_CAPACITY,
            backing_store: Mutex::new(VecDeque::with_capacity(DEFAULT_CAPACITY)),
        }
    }

    /// The queue's capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The queue's overflow policy.
    pub fn policy(&self) -> PreservationPolicy {
        self.policy
    }

    /// Adds a new value to the back of the queue.
    pub fn enqueue(&self, value: T) -> Enqueued<T> {
        let mut store = self.backing_store.lock();

        debug_assert!(
            self.policy == PreservationPolicy::Grow || store.len() <= self.capacity,
            "count can't exceed capacity"
        );

        if store.len() >= self.capacity {
            match self.policy {
                PreservationPolicy::Newest => {
                    let evicted = store.pop_front();
                    store.push_back(value);
                    return match evicted {
                        Some(evicted) => Enqueued::Evicted(evicted),
                        None => Enqueued::Stored,
                    };
                }
                PreservationPolicy::Oldest => return Enqueued::Rejected(value),
                PreservationPolicy::Grow => {}
            }
        }

        store.push_back(value);
        Enqueued::Stored
    }

    /// Removes an element from the front of the queue, never blocking on an empty queue.
    pub fn dequeue(&self) -> Option<T> {
        self.backing_store.lock().pop_front()
    }

    /// Removes an element from the front of the queue if `count_predicate` holds.
    ///
    /// The predicate receives the element count observed inside the same critical
    /// section as the pop, so checking and removing cannot race.
    pub fn dequeue_if<F>(&self, count_predicate: F) -> Option<T>
    where
        F: FnOnce(usize) -> bool,
    {
        let mut store = self.backing_store.lock();
        if count_predicate(store.len()) {
            store.pop_front()
        } else {
            None
        }
    }

    /// Removes all elements at once, oldest first.
    pub fn drain(&self) -> Vec<T> {
        self.backing_store.lock().drain(..).collect()
    }

    /// Current number of elements.
    pub fn len(&self) -> usize {
        self.backing_store.lock().len()
    }

    /// Whether the queue holds no elements.
    pub fn is_empty(&self) -> bool {
        self.backing_store.lock().is_empty()
    }
}

impl<T> std::fmt::Debug for BoundedSafeQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedSafeQueue")
            .field("policy", &self.policy)
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}
