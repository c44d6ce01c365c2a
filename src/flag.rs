//! Skip-if-running flag for periodic work

use std::sync::atomic::{AtomicBool, Ordering};

/// Marks a unit of periodic work as running.
///
/// A second trigger while the work is running gets `None` from
/// [`try_begin`](Self::try_begin) and is expected to skip, not wait.
#[derive(Debug, Default)]
pub(crate) struct InProgress(AtomicBool);

impl InProgress {
    pub(crate) fn try_begin(&self) -> Option<InProgressGuard<'_>> {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InProgressGuard(&self.0))
    }

    pub(crate) fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Clears the flag on drop, including on early return and unwind
pub(crate) struct InProgressGuard<'a>(&'a AtomicBool);

impl Drop for InProgressGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
