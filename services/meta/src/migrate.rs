//! Migration credit register.
//!
//! Bounds how many partition migrations may be in flight at once.

use std::sync::atomic::{AtomicU32, Ordering};

use tracing::debug;

/// Receiver of released migration credits.
pub trait CreditRegister: Send + Sync {
    /// Return `n` credits to the pool.
    fn put_n(&self, n: u32);
}

/// Bounded counter of migration slots.
#[derive(Debug)]
pub struct MigrateRegister {
    limit: u32,
    available: AtomicU32,
}

impl MigrateRegister {
    /// Create a register with all `limit` credits available.
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            available: AtomicU32::new(limit),
        }
    }

    /// Try to take `n` credits.
    ///
    /// Returns false, taking nothing, if fewer than `n` are available.
    pub fn get_n(&self, n: u32) -> bool {
        self.available
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |cur| cur.checked_sub(n))
            .is_ok()
    }

    pub fn available(&self) -> u32 {
        self.available.load(Ordering::SeqCst)
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }
}

impl CreditRegister for MigrateRegister {
    fn put_n(&self, n: u32) {
        let limit = self.limit;
        // The closure always returns Some, so this cannot fail.
        let _ = self
            .available
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |cur| {
                Some(cur.saturating_add(n).min(limit))
            });
        debug!(released = n, available = self.available(), "Migration credits released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_and_put() {
        let register = MigrateRegister::new(3);
        assert!(register.get_n(2));
        assert_eq!(register.available(), 1);

        assert!(!register.get_n(2));
        assert_eq!(register.available(), 1);

        register.put_n(1);
        assert_eq!(register.available(), 2);
        assert!(register.get_n(2));
        assert_eq!(register.available(), 0);
    }

    #[test]
    fn test_put_saturates_at_limit() {
        let register = MigrateRegister::new(2);
        register.put_n(5);
        assert_eq!(register.available(), 2);
        assert_eq!(register.limit(), 2);
    }
}
