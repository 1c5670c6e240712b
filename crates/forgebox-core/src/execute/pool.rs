//! Counting permit that caps concurrent executions.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

struct PoolState {
    available: Mutex<usize>,
    released: Condvar,
    capacity: usize,
}

impl PoolState {
    fn lock(&self) -> MutexGuard<'_, usize> {
        // The counter is a plain integer and is valid even after a panic.
        self.available
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Fixed-capacity pool of execution slots.
///
/// Cloning shares the same slots.
#[derive(Clone)]
pub struct ProcessPool {
    state: Arc<PoolState>,
}

impl std::fmt::Debug for ProcessPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessPool")
            .field("capacity", &self.state.capacity)
            .field("available", &self.available())
            .finish()
    }
}

impl ProcessPool {
    /// Create a pool with `capacity` slots. Zero is rejected.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::Config(
                "max_concurrent must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            state: Arc::new(PoolState {
                available: Mutex::new(capacity),
                released: Condvar::new(),
                capacity,
            }),
        })
    }

    /// Block until a slot is free.
    pub fn acquire(&self) -> Permit {
        let mut available = self.state.lock();
        while *available == 0 {
            available = self
                .state
                .released
                .wait(available)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        *available -= 1;
        self.permit()
    }

    /// Take a slot only if one is free right now.
    pub fn try_acquire(&self) -> Option<Permit> {
        let mut available = self.state.lock();
        if *available == 0 {
            return None;
        }
        *available -= 1;
        Some(self.permit())
    }

    /// Wait at most `timeout` for a slot.
    pub fn acquire_timeout(&self, timeout: Duration) -> Option<Permit> {
        let deadline = Instant::now() + timeout;
        let mut available = self.state.lock();
        while *available == 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            let (guard, _) = self
                .state
                .released
                .wait_timeout(available, remaining)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            available = guard;
        }
        *available -= 1;
        Some(self.permit())
    }

    pub fn capacity(&self) -> usize {
        self.state.capacity
    }

    /// Slots free at this instant.
    pub fn available(&self) -> usize {
        *self.state.lock()
    }

    fn permit(&self) -> Permit {
        Permit {
            state: Arc::clone(&self.state),
        }
    }
}

/// A held slot. Dropping it frees the slot and wakes one waiter.
pub struct Permit {
    state: Arc<PoolState>,
}

impl std::fmt::Debug for Permit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Permit").finish_non_exhaustive()
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        let mut available = self.state.lock();
        *available += 1;
        drop(available);
        self.state.released.notify_one();
    }
}
