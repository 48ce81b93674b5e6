//! Cancellation token shared between a run and whoever may stop it.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

type CancelCallback = Box<dyn Fn(&str) + Send + Sync>;

/// A flag requesting that a pipeline run stop starting new stages.
///
/// Cancellation is idempotent: the first reason is kept and callbacks run
/// once. Share it across tasks behind an `Arc`.
#[derive(Default)]
pub struct CancellationToken {
    cancelled: AtomicBool,
    reason: RwLock<Option<String>>,
    callbacks: RwLock<Vec<CancelCallback>>,
}

impl CancellationToken {
    /// Creates a token that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    ///
    /// Registered callbacks receive the reason. A panicking callback is
    /// logged and does not prevent the others from running.
    pub fn cancel(&self, reason: impl Into<String>) {
        if self
            .cancelled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let reason = reason.into();
        info!(reason = %reason, "Cancellation requested");
        *self.reason.write() = Some(reason.clone());

        // Registrations after this point see the reason and run inline.
        let callbacks = std::mem::take(&mut *self.callbacks.write());
        for callback in &callbacks {
            invoke(callback.as_ref(), &reason);
        }
    }

    /// Registers a callback for cancellation.
    ///
    /// Runs immediately if the token is already cancelled.
    pub fn on_cancel<F>(&self, callback: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let mut callbacks = self.callbacks.write();
        let Some(reason) = self.reason() else {
            callbacks.push(Box::new(callback));
            return;
        };
        drop(callbacks);
        invoke(&callback, &reason);
    }

    /// Returns true once cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Returns the first cancellation reason.
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        self.reason.read().clone()
    }
}

fn invoke(callback: &(dyn Fn(&str) + Send + Sync), reason: &str) {
    if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| callback(reason))) {
        warn!("Cancellation callback panicked: {:?}", e);
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .field("reason", &self.reason())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn test_new_token_is_not_cancelled() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        assert!(token.reason().is_none());
    }

    #[test]
    fn test_first_reason_wins() {
        let token = CancellationToken::new();
        token.cancel("operator abort");
        token.cancel("second");

        assert!(token.is_cancelled());
        assert_eq!(token.reason().as_deref(), Some("operator abort"));
    }

    #[test]
    fn test_callbacks_receive_reason_once() {
        let token = CancellationToken::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(RwLock::new(String::new()));

        let calls_clone = Arc::clone(&calls);
        let seen_clone = Arc::clone(&seen);
        token.on_cancel(move |reason| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            *seen_clone.write() = reason.to_string();
        });

        token.cancel("shutdown");
        token.cancel("again");

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(seen.read().as_str(), "shutdown");
    }

    #[test]
    fn test_late_callback_runs_immediately() {
        let token = CancellationToken::new();
        token.cancel("done");

        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        token.on_cancel(move |_| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_callback_registered_during_cancel_runs_once() {
        for _ in 0..200 {
            let token = Arc::new(CancellationToken::new());
            let calls = Arc::new(AtomicUsize::new(0));
            let barrier = Arc::new(std::sync::Barrier::new(2));

            let canceller = {
                let token = Arc::clone(&token);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    token.cancel("race");
                })
            };

            barrier.wait();
            for _ in 0..8 {
                let calls = Arc::clone(&calls);
                token.on_cancel(move |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                });
            }
            canceller.join().unwrap();

            assert_eq!(calls.load(Ordering::SeqCst), 8);
        }
    }

    #[test]
    fn test_panicking_callback_is_contained() {
        let token = CancellationToken::new();
        token.on_cancel(|_| panic!("callback failure"));
        token.cancel("test");
        assert!(token.is_cancelled());
    }
}
