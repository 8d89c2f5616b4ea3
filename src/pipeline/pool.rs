use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::models::Reusable;

/// Recycles packet and frame payloads between stages.
///
/// A disabled pool always allocates and drops returned payloads.
#[derive(Debug)]
pub struct PayloadPool<P: Reusable + Default> {
    name: String,
    enabled: bool,
    max_idle: usize,
    idle: Mutex<Vec<P>>,

    active: AtomicUsize,
    created: AtomicUsize,
    reused: AtomicUsize,
}

/// Pool usage snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub name: String,
    pub active: usize,
    pub idle: usize,
    pub created: usize,
    pub reused: usize,
}

impl<P: Reusable + Default> PayloadPool<P> {
    pub fn new(name: impl Into<String>, enabled: bool, max_idle: usize) -> Self {
        Self {
            name: name.into(),
            enabled,
            max_idle,
            idle: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            created: AtomicUsize::new(0),
            reused: AtomicUsize::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Take an idle payload or allocate a fresh one
    pub fn borrow_or_alloc(&self) -> P {
        self.active.fetch_add(1, Ordering::Relaxed);

        if self.enabled {
            if let Some(payload) = self.idle.lock().pop() {
                self.reused.fetch_add(1, Ordering::Relaxed);
                return payload;
            }
        }

        self.created.fetch_add(1, Ordering::Relaxed);
        P::default()
    }

    /// Return a payload; its contents are cleared, its capacity kept
    pub fn give_back(&self, mut payload: P) {
        // Saturate so payloads allocated outside the pool cannot underflow the count
        let _ = self
            .active
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| Some(n.saturating_sub(1)));

        if !self.enabled {
            return;
        }

        payload.reset();
        let mut idle = self.idle.lock();
        if idle.len() < self.max_idle {
            idle.push(payload);
        }
    }

    /// Drop every idle payload
    pub fn shrink(&self) {
        self.idle.lock().clear();
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            name: self.name.clone(),
            active: self.active.load(Ordering::Relaxed),
            idle: self.idle.lock().len(),
            created: self.created.load(Ordering::Relaxed),
            reused: self.reused.load(Ordering::Relaxed),
        }
    }

    /// Bytes held by idle payloads
    pub fn idle_footprint(&self) -> usize {
        self.idle.lock().iter().map(Reusable::footprint).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payloads_are_reused() {
        let pool = PayloadPool::<Vec<u8>>::new("packets", true, 64);

        let mut payload = pool.borrow_or_alloc();
        payload.extend_from_slice(&[1u8; 4096]);
        pool.give_back(payload);

        let again = pool.borrow_or_alloc();
        assert!(again.is_empty(), "Recycled payloads come back cleared");
        assert!(again.capacity() >= 4096);

        let stats = pool.stats();
        assert_eq!(stats.created, 1);
        assert_eq!(stats.reused, 1);
        assert_eq!(stats.active, 1);
        assert_eq!(stats.idle, 0);
    }

    #[test]
    fn test_disabled_pool_always_allocates() {
        let pool: PayloadPool<Vec<f32>> = PayloadPool::new("audio-frames", false, 8);

        let first = pool.borrow_or_alloc();
        pool.give_back(first);
        let _second = pool.borrow_or_alloc();

        let stats = pool.stats();
        assert_eq!(stats.created, 2);
        assert_eq!(stats.reused, 0);
        assert_eq!(stats.idle, 0);
    }

    #[test]
    fn test_idle_limit_and_shrink() {
        let pool = PayloadPool::<Vec<u8>>::new("frames", true, 2);
        for _ in 0..5 {
            pool.give_back(vec![0u8; 16]);
        }
        assert_eq!(pool.stats().idle, 2);
        assert_eq!(pool.stats().active, 0, "Foreign payloads must not underflow");
        assert!(pool.idle_footprint() >= 32);

        pool.shrink();
        assert_eq!(pool.stats().idle, 0);
    }
}
