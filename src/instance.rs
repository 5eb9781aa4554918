//! Once-per-process construction slot.
//!
//! Both the device session and the gateway may be created only once. A slot
//! stays free until an initializer succeeds, so a failed creation leaves
//! nothing behind and may be retried; a second creation while one is running
//! or after one succeeded is refused.

use once_cell::sync::OnceCell;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub struct InstanceSlot<T> {
    cell: OnceCell<Arc<T>>,
    claimed: AtomicBool,
}

impl<T> InstanceSlot<T> {
    pub const fn new() -> Self {
        Self {
            cell: OnceCell::new(),
            claimed: AtomicBool::new(false),
        }
    }

    /// Run `init` and store its output, unless the slot is already taken.
    ///
    /// `occupied` builds the error returned when it is.
    pub async fn try_init<E, F, Fut>(
        &self,
        occupied: impl FnOnce() -> E,
        init: F,
    ) -> Result<Arc<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if self.claimed.swap(true, Ordering::AcqRel) {
            return Err(occupied());
        }
        let mut claim = Claim {
            flag: &self.claimed,
            committed: false,
        };

        let value = Arc::new(init().await?);
        // Only the claim holder ever sets the cell.
        let stored = Arc::clone(self.cell.get_or_init(|| value));
        claim.committed = true;
        Ok(stored)
    }

    /// The stored instance, if creation has completed.
    pub fn get(&self) -> Option<Arc<T>> {
        self.cell.get().cloned()
    }
}

impl<T> Default for InstanceSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Releases the claim if initialization fails or is dropped midway.
struct Claim<'a> {
    flag: &'a AtomicBool,
    committed: bool,
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.flag.store(false, Ordering::Release);
        }
    }
}
