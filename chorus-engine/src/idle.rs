//! Deferred event mask monitor.
//!
//! Worker threads raise bits from any thread; the embedder's main loop
//! drains them. Bits are coalesced: raising a bit that is already pending
//! is a no-op, and all pending bits are taken atomically at dispatch.

use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::Notify;

#[derive(Debug, Default)]
pub struct MaskMonitor {
    pending: AtomicU32,
    notify: Notify,
}

impl MaskMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// OR `mask` into the pending set. Safe from any thread.
    pub fn or_mask(&self, mask: u32) {
        if mask == 0 {
            return;
        }
        let prev = self.pending.fetch_or(mask, Ordering::AcqRel);
        if prev & mask != mask {
            // at least one bit is new
            self.notify.notify_one();
        }
    }

    /// Take and clear all pending bits.
    pub fn take(&self) -> u32 {
        self.pending.swap(0, Ordering::AcqRel)
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire) != 0
    }

    /// Wait until at least one bit is pending.
    pub async fn wait(&self) {
        loop {
            if self.is_pending() {
                return;
            }
            self.notify.notified().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coalescing() {
        let monitor = MaskMonitor::new();
        monitor.or_mask(0x1);
        monitor.or_mask(0x4);
        monitor.or_mask(0x1); // idempotent
        assert_eq!(monitor.take(), 0x5);
        assert_eq!(monitor.take(), 0);
        assert!(!monitor.is_pending());
    }

    #[tokio::test]
    async fn test_wait_wakes_on_new_bit() {
        let monitor = std::sync::Arc::new(MaskMonitor::new());

        let waiter = {
            let monitor = std::sync::Arc::clone(&monitor);
            tokio::spawn(async move {
                monitor.wait().await;
                monitor.take()
            })
        };

        tokio::task::yield_now().await;
        monitor.or_mask(0x2);
        assert_eq!(waiter.await.unwrap(), 0x2);
    }
}
