//! Injected logging handle.
//!
//! Components hold a [`Logger`] instead of reaching for a process-wide subscriber: every
//! public operation runs inside [`Logger::in_scope`], so `tracing` events emitted by the
//! component go to the dispatcher that was handed to it.

use tracing::Dispatch;
use tracing::Subscriber;

/// Dispatcher handle carried by each pipeline component.
#[derive(Clone, Debug)]
pub struct Logger {
    dispatch: Dispatch,
}

impl Logger {
    /// Wrap an explicit dispatcher.
    pub fn new(dispatch: Dispatch) -> Self {
        Self { dispatch }
    }

    /// Wrap a subscriber.
    pub fn from_subscriber<S>(subscriber: S) -> Self
    where
        S: Subscriber + Send + Sync + 'static,
    {
        Self::new(Dispatch::new(subscriber))
    }

    /// Capture the dispatcher that is active for the calling thread.
    pub fn current() -> Self {
        tracing::dispatcher::get_default(|d| Self::new(d.clone()))
    }

    /// Discard everything.
    pub fn silent() -> Self {
        Self::new(Dispatch::none())
    }

    /// Run `f` with this logger's dispatcher as the default.
    pub fn in_scope<T>(&self, f: impl FnOnce() -> T) -> T {
        tracing::dispatcher::with_default(&self.dispatch, f)
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::current()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Buffer(Arc<Mutex<Vec<u8>>>);

    impl Write for Buffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_events_go_to_injected_dispatcher() {
        let buf = Buffer::default();
        let writer = buf.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        let logger = Logger::from_subscriber(subscriber);

        logger.in_scope(|| tracing::warn!(kind = "FailFail", "empty dataset"));
        tracing::warn!("outside scope");

        let out = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        assert!(out.contains("empty dataset"));
        assert!(out.contains("FailFail"));
        assert!(!out.contains("outside scope"));
    }

    #[test]
    fn test_silent_logger_runs_closure() {
        let v = Logger::silent().in_scope(|| 41 + 1);
        assert_eq!(v, 42);
    }
}
