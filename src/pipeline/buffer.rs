use log::trace;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::error::BufferError;
use crate::models::{MediaItem, NO_TS};
use crate::pipeline::events::{EventBus, PipelineEvent};
use crate::pipeline::stage::CancellationToken;

/// Default slice for bounded waits; blocked callers re-check cancellation at this rate
pub const DEFAULT_WAIT_SLICE: Duration = Duration::from_millis(10);

/// Result of a `put`
#[derive(Debug, PartialEq)]
pub enum PutOutcome<T> {
    Inserted,
    /// An item with the same timestamp is already buffered; the new one is handed back
    Duplicate(T),
    /// The buffer was cleared while the caller waited for room
    Invalidated(T),
    /// The caller was cancelled while waiting; the buffer has been cleared
    Cancelled(T),
}

impl<T> PutOutcome<T> {
    pub fn is_inserted(&self) -> bool {
        matches!(self, PutOutcome::Inserted)
    }
}

/// Result of a `take`
#[derive(Debug, PartialEq)]
pub enum TakeOutcome<T> {
    Item(T),
    /// The buffer was cleared while the caller waited; nothing from the old epoch is returned
    Invalidated,
    Cancelled,
    TimedOut,
}

struct Slots<T> {
    items: VecDeque<T>,
    /// Bumped by every clear so blocked callers can detect it
    epoch: u64,
    start_timestamp: i64,
    full_signalled: bool,
    empty_signalled: bool,
}

/// Fixed-capacity FIFO of timestamped items, kept in non-decreasing timestamp order
pub struct BoundedOrderedBuffer<T: MediaItem> {
    name: String,
    capacity: usize,
    wait_slice: Duration,
    slots: Mutex<Slots<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    events: Option<EventBus>,
}

impl<T: MediaItem> BoundedOrderedBuffer<T> {
    /// Create a buffer holding at most `capacity` items
    pub fn new(name: impl Into<String>, capacity: usize) -> Result<Self, BufferError> {
        let name = name.into();
        if capacity == 0 {
            return Err(BufferError::ZeroCapacity { name });
        }

        Ok(Self {
            name,
            capacity,
            wait_slice: DEFAULT_WAIT_SLICE,
            slots: Mutex::new(Slots {
                items: VecDeque::with_capacity(capacity),
                epoch: 0,
                start_timestamp: NO_TS,
                full_signalled: false,
                empty_signalled: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            events: None,
        })
    }

    /// Publish full/empty notifications on `bus`
    pub fn with_events(mut self, bus: EventBus) -> Self {
        self.events = Some(bus);
        self
    }

    pub fn with_wait_slice(mut self, slice: Duration) -> Self {
        self.wait_slice = slice.max(Duration::from_millis(1));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Insert `item`, blocking while the buffer is full.
    ///
    /// Items older than the current tail are moved back into timestamp order;
    /// an item whose timestamp is already present is rejected.
    pub fn put(&self, item: T, cancel: &CancellationToken) -> PutOutcome<T> {
        let slots = self.slots.lock();
        let epoch = slots.epoch;
        self.put_locked(slots, item, epoch, cancel)
    }

    /// Like `put`, but only if no clear happened since `epoch` was observed.
    ///
    /// Producers capture the epoch before reading their input so that an item read
    /// before a seek cannot land in the buffer after the seek cleared it.
    pub fn put_in_epoch(&self, item: T, epoch: u64, cancel: &CancellationToken) -> PutOutcome<T> {
        let slots = self.slots.lock();
        if slots.epoch != epoch {
            return PutOutcome::Invalidated(item);
        }
        self.put_locked(slots, item, epoch, cancel)
    }

    fn put_locked(
        &self,
        mut slots: MutexGuard<'_, Slots<T>>,
        item: T,
        epoch: u64,
        cancel: &CancellationToken,
    ) -> PutOutcome<T> {
        if slots.items.len() >= self.capacity {
            if !slots.full_signalled {
                slots.full_signalled = true;
                self.signal(PipelineEvent::BufferFull(self.name.clone()));
            }

            while slots.items.len() >= self.capacity {
                if cancel.is_cancelled() {
                    self.clear_locked(&mut slots);
                    return PutOutcome::Cancelled(item);
                }
                self.not_full.wait_for(&mut slots, self.wait_slice);
            }

            if slots.epoch != epoch {
                return PutOutcome::Invalidated(item);
            }
            if cancel.is_cancelled() {
                self.clear_locked(&mut slots);
                return PutOutcome::Cancelled(item);
            }
        }

        self.insert_ordered(&mut slots, item)
    }

    fn insert_ordered(&self, slots: &mut Slots<T>, item: T) -> PutOutcome<T> {
        let ts = item.timestamp();
        let len = slots.items.len();
        let mut position = len;

        if ts != NO_TS {
            // Walk back from the tail past every later item
            while position > 0 {
                let previous = slots.items[position - 1].timestamp();
                if previous == ts {
                    trace!("{}: rejecting duplicate timestamp {}", self.name, ts);
                    return PutOutcome::Duplicate(item);
                }
                if previous < ts {
                    break;
                }
                position -= 1;
            }
        }

        if position < len {
            trace!("{}: repaired order, {} placed {} slots before tail", self.name, ts, len - position);
        }

        slots.items.insert(position, item);
        if position == 0 {
            slots.start_timestamp = ts;
        }
        slots.empty_signalled = false;
        self.not_empty.notify_all();
        PutOutcome::Inserted
    }

    /// Remove the oldest item, blocking while the buffer is empty
    pub fn take(&self, cancel: &CancellationToken) -> TakeOutcome<T> {
        self.take_until(cancel, None)
    }

    /// Like `take`, giving up after `timeout`
    pub fn take_timeout(&self, cancel: &CancellationToken, timeout: Duration) -> TakeOutcome<T> {
        self.take_until(cancel, Some(Instant::now() + timeout))
    }

    fn take_until(&self, cancel: &CancellationToken, deadline: Option<Instant>) -> TakeOutcome<T> {
        let mut slots = self.slots.lock();
        let epoch = slots.epoch;

        if slots.items.is_empty() {
            self.signal_empty(&mut slots);
        }

        while slots.items.is_empty() {
            if cancel.is_cancelled() {
                return TakeOutcome::Cancelled;
            }
            let slice = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return TakeOutcome::TimedOut;
                    }
                    self.wait_slice.min(deadline - now)
                }
                None => self.wait_slice,
            };
            self.not_empty.wait_for(&mut slots, slice);
            if slots.epoch != epoch {
                return TakeOutcome::Invalidated;
            }
        }

        if slots.epoch != epoch {
            return TakeOutcome::Invalidated;
        }
        if cancel.is_cancelled() {
            return TakeOutcome::Cancelled;
        }

        match self.pop_locked(&mut slots) {
            Some(item) => TakeOutcome::Item(item),
            None => TakeOutcome::Invalidated,
        }
    }

    /// Remove the oldest item without waiting
    pub fn try_take(&self) -> Option<T> {
        let mut slots = self.slots.lock();
        self.pop_locked(&mut slots)
    }

    fn pop_locked(&self, slots: &mut Slots<T>) -> Option<T> {
        let item = slots.items.pop_front()?;
        if let Some(head) = slots.items.front() {
            slots.start_timestamp = head.timestamp();
        }
        slots.full_signalled = false;
        self.not_full.notify_all();
        Some(item)
    }

    /// Wait up to `timeout` for the buffer to become non-empty
    pub fn wait_for_item(&self, cancel: &CancellationToken, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut slots = self.slots.lock();

        if slots.items.is_empty() {
            self.signal_empty(&mut slots);
        }

        while slots.items.is_empty() {
            let now = Instant::now();
            if cancel.is_cancelled() || now >= deadline {
                return false;
            }
            self.not_empty.wait_for(&mut slots, self.wait_slice.min(deadline - now));
        }
        true
    }

    /// Evict everything; blocked callers observe the new epoch
    pub fn clear(&self) -> usize {
        let mut slots = self.slots.lock();
        self.clear_locked(&mut slots)
    }

    /// Evict everything, handing each evicted item to `recycle`
    pub fn clear_with<F: FnMut(T)>(&self, mut recycle: F) -> usize {
        let evicted: Vec<T> = {
            let mut slots = self.slots.lock();
            let drained = slots.items.drain(..).collect();
            self.reset_locked(&mut slots);
            drained
        };
        let count = evicted.len();
        evicted.into_iter().for_each(&mut recycle);
        count
    }

    fn clear_locked(&self, slots: &mut Slots<T>) -> usize {
        let count = slots.items.len();
        slots.items.clear();
        self.reset_locked(slots);
        count
    }

    fn reset_locked(&self, slots: &mut Slots<T>) {
        slots.epoch = slots.epoch.wrapping_add(1);
        slots.start_timestamp = NO_TS;
        slots.full_signalled = false;
        slots.empty_signalled = false;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    fn signal_empty(&self, slots: &mut Slots<T>) {
        if !slots.empty_signalled {
            slots.empty_signalled = true;
            self.signal(PipelineEvent::BufferEmpty(self.name.clone()));
        }
    }

    fn signal(&self, event: PipelineEvent) {
        if let Some(bus) = &self.events {
            bus.publish(event);
        }
    }

    /// Timestamp of the oldest item
    pub fn peek_head(&self) -> Option<i64> {
        self.slots.lock().items.front().map(|item| item.timestamp())
    }

    /// Timestamp of the newest item
    pub fn peek_tail(&self) -> Option<i64> {
        self.slots.lock().items.back().map(|item| item.timestamp())
    }

    /// Timestamp of the head as of the last insert/take, `NO_TS` after a clear
    pub fn start_timestamp(&self) -> i64 {
        self.slots.lock().start_timestamp
    }

    pub fn end_timestamp(&self) -> i64 {
        self.peek_tail().unwrap_or(NO_TS)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn size(&self) -> usize {
        self.slots.lock().items.len()
    }

    pub fn is_full(&self) -> bool {
        self.size() >= self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().items.is_empty()
    }

    /// Fill level between 0.0 and 1.0
    pub fn fill_level(&self) -> f32 {
        self.size() as f32 / self.capacity as f32
    }

    pub fn epoch(&self) -> u64 {
        self.slots.lock().epoch
    }
}

impl<T: MediaItem> std::fmt::Debug for BoundedOrderedBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedOrderedBuffer")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("size", &self.size())
            .finish()
    }
}
