//! Fatal drain: last words for a panicking process.
//!
//! A panic is this crate's notion of an uncaught failure. The drain is a
//! process-wide panic hook that:
//!
//! 1. logs one `fatal` `"Uncaught exception"` record carrying the panic as
//!    `err`;
//! 2. flushes every stream (a [`SinkStream`](crate::SinkStream) flush waits
//!    until its background task has handed queued records to the sink), then
//!    sleeps for a short grace period;
//! 3. runs the previously installed hook (the default one prints the panic);
//! 4. terminates the process per [`ExitPolicy`].
//!
//! Panics raised inside a handler or middleware that [`App`](crate::App) is
//! running are not uncaught: the pipeline turns them into a
//! [`Failure`](crate::Failure) for the error chain. For those the hook only
//! runs the previous hook.
//!
//! Only one drain can be installed per process. Later attempts get
//! [`DrainError::AlreadyInstalled`] and change nothing.

use std::cell::Cell;
use std::future::Future;
use std::pin::Pin;
use std::sync::OnceLock;
use std::task::{Context, Poll};
use std::time::Duration;

use crate::error::DrainError;
use crate::failure::Failure;
use crate::fields;
use crate::logger::{Level, Logger};

static INSTALLED: OnceLock<()> = OnceLock::new();

thread_local! {
    // Depth of pipeline sections on this thread whose panics are caught.
    static CONTAINED: Cell<usize> = const { Cell::new(0) };
    static DRAINING: Cell<bool> = const { Cell::new(false) };
}

/// What happens after the drain has logged and waited.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ExitPolicy {
    /// `std::process::exit` with the given code.
    Exit(i32),
    /// `std::process::abort`.
    Abort,
    /// Return from the hook and let the panic keep unwinding. Only the
    /// panicking thread dies unless the panic reaches `main`.
    Unwind,
}

impl Default for ExitPolicy {
    fn default() -> Self {
        // Same code the runtime uses for a panic in `main`.
        Self::Exit(101)
    }
}

/// Drain settings carried by [`LoggerConfig`](crate::LoggerConfig).
#[derive(Clone, Debug)]
pub struct DrainConfig {
    /// Install the panic hook when the logger is built.
    pub enabled: bool,
    /// Delay between logging the panic and terminating.
    pub grace: Duration,
    pub exit: ExitPolicy,
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            grace: Duration::from_millis(25),
            exit: ExitPolicy::default(),
        }
    }
}

impl DrainConfig {
    /// A config that never installs the hook.
    pub fn disabled() -> Self {
        Self { enabled: false, ..Self::default() }
    }
}

/// Logs a fatal failure and holds the thread for the grace period.
#[derive(Clone, Debug)]
pub struct FatalDrain {
    logger: Logger,
    grace: Duration,
}

impl FatalDrain {
    pub fn new(logger: Logger, grace: Duration) -> Self {
        Self { logger, grace }
    }

    pub fn grace(&self) -> Duration { self.grace }

    /// Emits the `"Uncaught exception"` record, flushes, and sleeps.
    ///
    /// While this runs, streams give up on locks they cannot take quickly,
    /// so a panic raised while this thread held a stream lock does not
    /// deadlock the drain. That stream misses the record.
    pub fn drain(&self, failure: &Failure) {
        let _draining = DrainingGuard::enter();
        self.logger.log(Level::Fatal, fields! { "err" => failure.to_value() }, "Uncaught exception");
        self.logger.flush();
        std::thread::sleep(self.grace);
    }

    /// Installs this drain as the process panic hook.
    ///
    /// Returns [`DrainError::AlreadyInstalled`] if any drain was installed
    /// before; the existing hook is left untouched in that case.
    pub fn install(self, exit: ExitPolicy) -> Result<(), DrainError> {
        INSTALLED.set(()).map_err(|()| DrainError::AlreadyInstalled)?;

        let grace_ms = self.grace.as_millis() as u64;
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            if is_contained() {
                previous(info);
                return;
            }
            self.drain(&Failure::from_panic(info));
            previous(info);
            match exit {
                ExitPolicy::Exit(code) => std::process::exit(code),
                ExitPolicy::Abort => std::process::abort(),
                ExitPolicy::Unwind => {}
            }
        }));

        tracing::debug!(grace_ms, ?exit, "fatal drain installed");
        Ok(())
    }
}

/// Whether a drain has been installed in this process.
pub fn is_installed() -> bool {
    INSTALLED.get().is_some()
}

fn is_contained() -> bool {
    CONTAINED.with(|c| c.get() > 0)
}

/// True while this thread is inside [`FatalDrain::drain`].
pub(crate) fn is_draining() -> bool {
    DRAINING.with(Cell::get)
}

struct ContainGuard;

impl ContainGuard {
    fn enter() -> Self {
        CONTAINED.with(|c| c.set(c.get() + 1));
        ContainGuard
    }
}

// Dropped during unwinding, i.e. after the hook has already run.
impl Drop for ContainGuard {
    fn drop(&mut self) {
        CONTAINED.with(|c| c.set(c.get() - 1));
    }
}

struct DrainingGuard(bool);

impl DrainingGuard {
    fn enter() -> Self {
        DrainingGuard(DRAINING.with(|d| d.replace(true)))
    }
}

impl Drop for DrainingGuard {
    fn drop(&mut self) {
        DRAINING.with(|d| d.set(self.0));
    }
}

/// Runs `f` with panics marked as caught by the caller.
pub(crate) fn contained<R>(f: impl FnOnce() -> R) -> R {
    let _guard = ContainGuard::enter();
    f()
}

/// Marks panics raised while polling the inner future as caught by the
/// caller. The mark is per poll, so other tasks sharing the thread between
/// polls are unaffected.
pub(crate) struct Contained<F>(pub(crate) F);

impl<F> Future for Contained<F>
where
    F: Future + Unpin,
{
    type Output = F::Output;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<F::Output> {
        let _guard = ContainGuard::enter();
        Pin::new(&mut self.0).poll(cx)
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error;
    use std::io::{self, Write};
    use std::sync::{Arc, Mutex};
    use std::time::Instant;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::logger::{LogRecord, LogSink, RingBuffer, Serializers, SinkConfig, SinkStream, Stream, WriterStream};

    fn logger(ring: &RingBuffer, stack_trace: bool) -> Logger {
        Logger::new(
            "svc_test",
            Serializers::defaults(stack_trace, json!([])),
            vec![Arc::new(ring.clone()) as Arc<dyn Stream>],
        )
    }

    #[test]
    fn drain_logs_a_fatal_record_and_waits() {
        let ring = RingBuffer::new(10);
        let drain = FatalDrain::new(logger(&ring, false), Duration::from_millis(20));

        let started = Instant::now();
        drain.drain(&Failure::new("kaput").with_prop("stack", "at main"));
        assert!(started.elapsed() >= Duration::from_millis(20));

        let records = ring.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].msg, "Uncaught exception");
        assert_eq!(records[0].level, Level::Fatal);
        let err = records[0].field("err").unwrap();
        assert_eq!(err["message"], "kaput");
        assert!(err.get("stack").is_none());
    }

    #[test]
    fn second_installation_is_rejected() {
        let ring = RingBuffer::new(10);
        let first = FatalDrain::new(logger(&ring, false), Duration::from_millis(1));
        let second = FatalDrain::new(logger(&ring, false), Duration::from_millis(1));

        // Another test may have installed one already; either way the second
        // attempt must fail.
        let _ = first.install(ExitPolicy::Unwind);
        assert!(is_installed());
        assert_eq!(second.install(ExitPolicy::Unwind), Err(DrainError::AlreadyInstalled));
    }

    struct Collect(Arc<Mutex<Vec<String>>>);

    #[async_trait]
    impl LogSink for Collect {
        async fn send(&self, record: &LogRecord) -> Result<(), Box<dyn Error + Send + Sync>> {
            self.0.lock().unwrap().push(record.msg.clone());
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn drain_reaches_asynchronous_sinks_before_returning() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (stream, _task) = SinkStream::spawn(Arc::new(Collect(Arc::clone(&seen))), SinkConfig::default());
        let logger = Logger::new(
            "svc_test",
            Serializers::defaults(false, json!([])),
            vec![Arc::new(stream) as Arc<dyn Stream>],
        );
        let drain = FatalDrain::new(logger, Duration::from_millis(1));

        // The hook runs on a plain thread, never on the sink's runtime thread.
        tokio::task::spawn_blocking(move || drain.drain(&Failure::new("boom")))
            .await
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), ["Uncaught exception"]);
    }

    /// Calls the drain from inside `write`, i.e. while `WriterStream` holds
    /// its lock on this thread.
    struct Reenter {
        drain: Arc<OnceLock<FatalDrain>>,
        fired: bool,
    }

    impl Write for Reenter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if !self.fired {
                self.fired = true;
                if let Some(drain) = self.drain.get() {
                    drain.drain(&Failure::new("inside write"));
                }
            }
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> { Ok(()) }
    }

    #[test]
    fn drain_skips_streams_locked_by_the_failing_thread() {
        let slot = Arc::new(OnceLock::new());
        let ring = RingBuffer::new(10);
        let writer = WriterStream::new("reenter", Reenter { drain: Arc::clone(&slot), fired: false });
        let logger = Logger::new(
            "svc_test",
            Serializers::defaults(false, json!([])),
            vec![Arc::new(writer) as Arc<dyn Stream>, Arc::new(ring.clone())],
        );
        let _ = slot.set(FatalDrain::new(logger.clone(), Duration::from_millis(1)));

        logger.info("first");

        let msgs: Vec<_> = ring.records().into_iter().map(|r| r.msg).collect();
        assert_eq!(msgs, ["Uncaught exception", "first"]);
        assert!(!is_draining());
    }

    #[test]
    fn panics_inside_contained_sections_are_flagged() {
        assert!(!is_contained());
        contained(|| assert!(is_contained()));
        assert!(!is_contained());
    }
}
