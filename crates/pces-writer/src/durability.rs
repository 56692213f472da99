use parking_lot::{Condvar, Mutex};
use pces_core::NO_STREAM_SEQUENCE_NUMBER;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Highest stream sequence number known to be on stable storage.
///
/// Cloning shares the watermark. The writer advances it, any number of
/// threads may query it or block until it reaches a target.
#[derive(Debug, Clone)]
pub struct DurabilityWatermark {
    inner: Arc<(Mutex<i64>, Condvar)>,
}

impl Default for DurabilityWatermark {
    fn default() -> Self {
        Self {
            inner: Arc::new((Mutex::new(NO_STREAM_SEQUENCE_NUMBER), Condvar::new())),
        }
    }
}

impl DurabilityWatermark {
    pub fn get(&self) -> i64 {
        *self.inner.0.lock()
    }

    /// Raises the watermark. Lower values are ignored.
    pub(crate) fn advance(&self, sequence_number: i64) {
        let (lock, condvar) = &*self.inner;
        let mut watermark = lock.lock();
        if sequence_number > *watermark {
            *watermark = sequence_number;
            condvar.notify_all();
        }
    }

    /// Blocks until the watermark reaches `sequence_number` or `timeout`
    /// elapses. Returns whether it was reached.
    ///
    /// A timeout too large to express as a deadline waits without one.
    pub fn wait_for(&self, sequence_number: i64, timeout: Duration) -> bool {
        let (lock, condvar) = &*self.inner;
        let deadline = Instant::now().checked_add(timeout);

        let mut watermark = lock.lock();
        while *watermark < sequence_number {
            match deadline {
                Some(deadline) => {
                    if condvar.wait_until(&mut watermark, deadline).timed_out() {
                        return *watermark >= sequence_number;
                    }
                }
                None => condvar.wait(&mut watermark),
            }
        }
        true
    }
}
