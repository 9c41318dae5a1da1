//! Observers notified when admission is delayed.
//!
//! The controller calls [`Observer::on_delayed`] exactly once per submission
//! whose rounded delay is positive, before the work reaches the backend.
//! Observers run on the submitting thread, so keep them cheap.

use std::fmt;
use std::time::Duration;
use tracing::info;

/// Receives throttling notifications together with the payload that caused
/// them.
///
/// Any `Fn(&P, Duration) + Send + Sync` closure is an observer:
///
/// ```rust
/// use flowgate::Observer;
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let hits = Arc::new(AtomicUsize::new(0));
/// let counter = hits.clone();
/// let observer = move |_: &&str, _: Duration| {
///     counter.fetch_add(1, Ordering::Relaxed);
/// };
/// observer.on_delayed(&"job", Duration::from_millis(100));
/// assert_eq!(hits.load(Ordering::Relaxed), 1);
/// ```
pub trait Observer<P>: Send + Sync {
    /// Called when `payload` will be handed to the backend after `delay`.
    fn on_delayed(&self, payload: &P, delay: Duration);
}

impl<P, F> Observer<P> for F
where
    F: Fn(&P, Duration) + Send + Sync,
{
    fn on_delayed(&self, payload: &P, delay: Duration) {
        self(payload, delay)
    }
}

/// Observer that does nothing. Used whenever none is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl<P> Observer<P> for NoopObserver {
    #[inline(always)]
    fn on_delayed(&self, _payload: &P, _delay: Duration) {}
}

/// Observer that records every delayed admission as a `tracing` event.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingObserver;

impl<P: fmt::Debug> Observer<P> for LoggingObserver {
    fn on_delayed(&self, payload: &P, delay: Duration) {
        info!(?payload, delay_ms = delay.as_millis() as u64, "Admission delayed");
    }
}
