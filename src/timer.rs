//! Cancellable one-shot timers.
//!
//! Each timer owns a named worker thread parked on a cancellation channel. If the
//! delay elapses first the task runs once; cancelling (or dropping the timer)
//! wakes the thread and it exits without running the task.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};

use crate::error::{StreamError, StreamResult};

/// Handle to a scheduled one-shot task.
#[derive(Debug)]
pub struct CloseTimer {
    cancel_tx: Sender<()>,
    done: Arc<AtomicBool>,
}

impl CloseTimer {
    /// Runs `task` on a dedicated thread after `delay` unless cancelled first.
    pub fn schedule<F>(name: &str, delay: Duration, task: F) -> StreamResult<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let (cancel_tx, cancel_rx) = bounded::<()>(1);
        let done = Arc::new(AtomicBool::new(false));
        let thread_done = Arc::clone(&done);

        thread::Builder::new()
            .name(name.to_string())
            .spawn(move || match cancel_rx.recv_timeout(delay) {
                Err(RecvTimeoutError::Timeout) => {
                    if !thread_done.swap(true, Ordering::AcqRel) {
                        task();
                    }
                }
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {}
            })
            .map_err(|e| StreamError::internal(format!("failed to spawn timer thread: {e}")))?;

        Ok(Self { cancel_tx, done })
    }

    /// Prevents the task from running if it has not started yet.
    ///
    /// Idempotent and non-blocking; safe to call from inside the task itself.
    /// Returns true if this call is what stopped the task.
    pub fn cancel(&self) -> bool {
        if self.done.swap(true, Ordering::AcqRel) {
            return false;
        }
        let _ = self.cancel_tx.try_send(());
        true
    }

    /// Returns true once the task has run or been cancelled.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }
}

impl Drop for CloseTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    #[test]
    fn test_timer_fires_once() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let (tx, rx) = bounded::<Instant>(1);
        let started = Instant::now();

        let timer = CloseTimer::schedule("test-timer", Duration::from_millis(50), move || {
            h.fetch_add(1, Ordering::SeqCst);
            let _ = tx.send(Instant::now());
        })
        .unwrap();

        let fired_at = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(fired_at.duration_since(started) >= Duration::from_millis(50));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(timer.is_done());
        assert!(!timer.cancel());
    }

    #[test]
    fn test_cancel_before_expiry() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);

        let timer = CloseTimer::schedule("test-timer", Duration::from_millis(50), move || {
            h.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        assert!(timer.cancel());
        assert!(!timer.cancel());
        thread::sleep(Duration::from_millis(120));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_drop_cancels() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);

        drop(
            CloseTimer::schedule("test-timer", Duration::from_millis(30), move || {
                h.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap(),
        );

        thread::sleep(Duration::from_millis(100));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
