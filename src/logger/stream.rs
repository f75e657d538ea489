//! Streams: the destinations log records are written to.
//!
//! A [`Stream`] receives every record a logger emits. Writing never fails
//! outward: a logging facility that errors while logging a failure is the one
//! situation it must avoid, so sinks report their own trouble through
//! `tracing` and carry on.
//!
//! | Stream | Destination |
//! |---|---|
//! | [`RingBuffer`] | in memory, newest `limit` records |
//! | [`WriterStream`] | JSON lines to stdout, stderr, a file or any writer |
//! | [`SinkStream`] | bounded channel drained by a background task into a [`LogSink`] |
//! | [`TracingStream`] | re-emitted as `tracing` events |

use std::collections::VecDeque;
use std::error::Error;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, TryLockError};

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, sleep, sleep_until};

use super::record::{Level, LogRecord};

/// A destination for [`LogRecord`]s.
pub trait Stream: Send + Sync {
    /// Writes one record. Must not block for long and must not panic.
    fn write(&self, record: &LogRecord);

    /// Pushes buffered output to the underlying destination, if the stream
    /// buffers at all.
    fn flush(&self) {}

    /// Short description reported by the `streams` serializer.
    fn describe(&self) -> Value;
}

// Poisoning only means another writer panicked mid-write; the data is still
// usable for logging.
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Longest a write waits for a stream lock while the fatal drain runs.
const DRAIN_LOCK_WAIT: Duration = Duration::from_millis(50);

/// The lock used by writes. Inside the fatal drain the lock may be held by
/// the very thread that panicked, so it is only tried for a short while;
/// `None` means the record is skipped for this stream.
fn lock_for_write<T>(m: &Mutex<T>) -> Option<MutexGuard<'_, T>> {
    if !crate::drain::is_draining() {
        return Some(lock(m));
    }
    let deadline = std::time::Instant::now() + DRAIN_LOCK_WAIT;
    loop {
        match m.try_lock() {
            Ok(guard) => return Some(guard),
            Err(TryLockError::Poisoned(p)) => return Some(p.into_inner()),
            Err(TryLockError::WouldBlock) if std::time::Instant::now() < deadline => {
                std::thread::sleep(Duration::from_millis(1));
            }
            Err(TryLockError::WouldBlock) => return None,
        }
    }
}

// ── RingBuffer ────────────────────────────────────────────────────────────────

/// Keeps the last `limit` records in memory. Clones share the same buffer.
#[derive(Clone)]
pub struct RingBuffer {
    limit: usize,
    records: Arc<Mutex<VecDeque<LogRecord>>>,
}

impl RingBuffer {
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self { limit, records: Arc::new(Mutex::new(VecDeque::with_capacity(limit))) }
    }

    /// Snapshot of the buffered records, oldest first.
    pub fn records(&self) -> Vec<LogRecord> {
        lock(&self.records).iter().cloned().collect()
    }

    pub fn len(&self) -> usize { lock(&self.records).len() }
    pub fn is_empty(&self) -> bool { lock(&self.records).is_empty() }
    pub fn clear(&self) { lock(&self.records).clear() }
}

impl Stream for RingBuffer {
    fn write(&self, record: &LogRecord) {
        let Some(mut records) = lock_for_write(&self.records) else {
            return;
        };
        if records.len() == self.limit {
            records.pop_front();
        }
        records.push_back(record.clone());
    }

    fn describe(&self) -> Value {
        json!({ "type": "raw", "stream": "ring_buffer", "limit": self.limit })
    }
}

// ── WriterStream ──────────────────────────────────────────────────────────────

/// Writes each record as one JSON line.
pub struct WriterStream {
    label: String,
    writer: Mutex<Box<dyn Write + Send>>,
}

impl WriterStream {
    pub fn new(label: impl Into<String>, writer: impl Write + Send + 'static) -> Self {
        Self { label: label.into(), writer: Mutex::new(Box::new(writer)) }
    }

    pub fn stdout() -> Self {
        Self::new("stdout", io::stdout())
    }

    pub fn stderr() -> Self {
        Self::new("stderr", io::stderr())
    }

    /// Appends to `path`, creating the file if needed.
    pub fn file(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self::new(path.display().to_string(), io::BufWriter::new(file)))
    }
}

impl Stream for WriterStream {
    fn write(&self, record: &LogRecord) {
        let mut line = match serde_json::to_vec(record) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(stream = %self.label, "failed to encode log record: {e}");
                return;
            }
        };
        line.push(b'\n');

        let Some(mut writer) = lock_for_write(&self.writer) else {
            return;
        };
        // One write per record keeps lines intact under concurrency.
        if let Err(e) = writer.write_all(&line).and_then(|()| writer.flush()) {
            tracing::warn!(stream = %self.label, "failed to write log record: {e}");
        }
    }

    fn flush(&self) {
        let Some(mut writer) = lock_for_write(&self.writer) else {
            return;
        };
        if let Err(e) = writer.flush() {
            tracing::warn!(stream = %self.label, "failed to flush log stream: {e}");
        }
    }

    fn describe(&self) -> Value {
        json!({ "type": "stream", "stream": self.label })
    }
}

// ── SinkStream ────────────────────────────────────────────────────────────────

/// Asynchronous destination for records shipped by a [`SinkStream`].
///
/// `send` is called from the stream's background task, never on the thread
/// that logged the record.
#[async_trait]
pub trait LogSink: Send + Sync {
    async fn send(&self, record: &LogRecord) -> Result<(), Box<dyn Error + Send + Sync>>;

    /// Flush anything the backend buffers itself. Default is a no-op.
    async fn flush(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        Ok(())
    }
}

/// Buffering and batching knobs for [`SinkStream`].
#[derive(Clone, Debug)]
pub struct SinkConfig {
    /// Records queued before new ones are dropped.
    pub buffer: usize,
    /// Records sent per batch.
    pub batch_size: usize,
    /// Longest a partial batch waits before it is sent anyway.
    pub flush_interval: Duration,
    /// Attempts per batch before it is given up.
    pub max_attempts: u32,
    /// Longest [`Stream::flush`] blocks waiting for the background task.
    pub flush_timeout: Duration,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            buffer: 1024,
            batch_size: 64,
            flush_interval: Duration::from_millis(100),
            max_attempts: 5,
            flush_timeout: Duration::from_secs(1),
        }
    }
}

/// Hands records to a background tokio task through a bounded channel.
///
/// Writing is `try_send`: when the channel is full the record is dropped and
/// counted. [`Stream::flush`] wakes the task, which sends everything queued
/// so far and flushes the sink, and blocks until it has done so or
/// [`SinkConfig::flush_timeout`] elapses. Call it from a thread that is not
/// driving the task's runtime (the fatal drain's hook, `spawn_blocking`),
/// otherwise it can only time out.
pub struct SinkStream {
    sender: mpsc::Sender<LogRecord>,
    control: Arc<FlushControl>,
    buffer: usize,
    flush_timeout: Duration,
    dropped: Arc<AtomicU64>,
}

impl SinkStream {
    /// Spawns the delivery task. Must be called inside a tokio runtime.
    pub fn spawn(sink: Arc<dyn LogSink>, config: SinkConfig) -> (Self, JoinHandle<()>) {
        let buffer = config.buffer.max(16);
        let batch_size = config.batch_size.max(1);
        let flush_interval = config.flush_interval.max(Duration::from_millis(10));
        let max_attempts = config.max_attempts.max(1);

        let (tx, mut rx) = mpsc::channel::<LogRecord>(buffer);
        let control = Arc::new(FlushControl::default());
        let task_control = Arc::clone(&control);

        let handle = tokio::spawn(async move {
            let mut batch = Vec::with_capacity(batch_size);
            // Set when the first record enters an empty batch.
            let mut deadline: Option<Instant> = None;
            loop {
                let flush_at = deadline.unwrap_or_else(|| Instant::now() + flush_interval);
                tokio::select! {
                    received = rx.recv() => match received {
                        Some(record) => {
                            deadline.get_or_insert_with(|| Instant::now() + flush_interval);
                            batch.push(record);
                            if batch.len() >= batch_size {
                                send_batch(&*sink, &mut batch, max_attempts).await;
                                deadline = None;
                            }
                        }
                        None => break,
                    },
                    () = sleep_until(flush_at), if deadline.is_some() => {
                        send_batch(&*sink, &mut batch, max_attempts).await;
                        deadline = None;
                    }
                    () = task_control.wake.notified() => {
                        let ticket = task_control.requested();
                        while let Ok(record) = rx.try_recv() {
                            batch.push(record);
                        }
                        send_batch(&*sink, &mut batch, max_attempts).await;
                        deadline = None;
                        if let Err(e) = sink.flush().await {
                            tracing::warn!("log sink flush failed: {e}");
                        }
                        task_control.complete(ticket);
                    }
                }
            }

            // Every sender is gone: deliver what is left and stop.
            send_batch(&*sink, &mut batch, max_attempts).await;
            if let Err(e) = sink.flush().await {
                tracing::warn!("log sink flush failed: {e}");
            }
            task_control.complete(task_control.requested());
        });

        let stream = Self {
            sender: tx,
            control,
            buffer,
            flush_timeout: config.flush_timeout,
            dropped: Arc::new(AtomicU64::new(0)),
        };
        (stream, handle)
    }

    /// Records dropped because the channel was full or closed.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Stream for SinkStream {
    fn write(&self, record: &LogRecord) {
        if self.sender.try_send(record.clone()).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn flush(&self) {
        if self.sender.is_closed() {
            return;
        }
        let ticket = self.control.request();
        if !self.control.wait(ticket, self.flush_timeout) {
            tracing::warn!(timeout = ?self.flush_timeout, "log sink flush timed out");
        }
    }

    fn describe(&self) -> Value {
        json!({ "type": "raw", "stream": "sink", "buffer": self.buffer })
    }
}

/// Flush handshake between [`SinkStream::flush`] and the delivery task.
/// Each request takes a ticket; the task completes every ticket issued
/// before it woke up.
#[derive(Default)]
struct FlushControl {
    wake: Notify,
    state: Mutex<FlushState>,
    done: Condvar,
}

#[derive(Default)]
struct FlushState {
    requested: u64,
    completed: u64,
}

impl FlushControl {
    fn request(&self) -> u64 {
        let ticket = {
            let mut state = lock(&self.state);
            state.requested += 1;
            state.requested
        };
        self.wake.notify_one();
        ticket
    }

    fn requested(&self) -> u64 {
        lock(&self.state).requested
    }

    fn complete(&self, ticket: u64) {
        let mut state = lock(&self.state);
        state.completed = state.completed.max(ticket);
        self.done.notify_all();
    }

    /// Whether `ticket` completed within `timeout`.
    fn wait(&self, ticket: u64, timeout: Duration) -> bool {
        let state = lock(&self.state);
        let (state, _) = self
            .done
            .wait_timeout_while(state, timeout, |s| s.completed < ticket)
            .unwrap_or_else(PoisonError::into_inner);
        state.completed >= ticket
    }
}

async fn send_batch(sink: &dyn LogSink, batch: &mut Vec<LogRecord>, max_attempts: u32) {
    let mut backoff = Duration::from_millis(50);
    let mut sent = 0;

    for attempt in 1..=max_attempts {
        match send_from(sink, &batch[sent..]).await {
            Ok(()) => {
                batch.clear();
                return;
            }
            Err((delivered, e)) => {
                sent += delivered;
                if attempt == max_attempts {
                    tracing::warn!(lost = batch.len() - sent, "giving up on log batch: {e}");
                    break;
                }
                tracing::debug!(?backoff, "log sink send failed, retrying: {e}");
                sleep(backoff).await;
                backoff = (backoff * 2).min(Duration::from_secs(2));
            }
        }
    }
    batch.clear();
}

async fn send_from(
    sink: &dyn LogSink,
    records: &[LogRecord],
) -> Result<(), (usize, Box<dyn Error + Send + Sync>)> {
    for (i, record) in records.iter().enumerate() {
        sink.send(record).await.map_err(|e| (i, e))?;
    }
    Ok(())
}

// ── TracingStream ─────────────────────────────────────────────────────────────

/// Re-emits every record as a `tracing` event with target `reqlog`.
///
/// The record's fields are attached as one JSON-encoded `fields` value.
/// `fatal` maps to `ERROR`, tracing having no higher level.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingStream;

impl Stream for TracingStream {
    fn write(&self, record: &LogRecord) {
        let fields = Value::Object(record.fields.clone().into_iter().collect());
        let name = record.name.as_str();
        let msg = record.msg.as_str();
        match record.level {
            Level::Trace => tracing::trace!(target: "reqlog", logger = name, fields = %fields, "{msg}"),
            Level::Debug => tracing::debug!(target: "reqlog", logger = name, fields = %fields, "{msg}"),
            Level::Info => tracing::info!(target: "reqlog", logger = name, fields = %fields, "{msg}"),
            Level::Warn => tracing::warn!(target: "reqlog", logger = name, fields = %fields, "{msg}"),
            Level::Error | Level::Fatal => {
                tracing::error!(target: "reqlog", logger = name, level_name = record.level.as_str(), fields = %fields, "{msg}")
            }
        }
    }

    fn describe(&self) -> Value {
        json!({ "type": "raw", "stream": "tracing" })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::Utc;

    use super::*;

    fn record(msg: &str) -> LogRecord {
        LogRecord {
            name: "svc_test".to_owned(),
            pid: 1,
            level: Level::Info,
            msg: msg.to_owned(),
            time: Utc::now(),
            fields: BTreeMap::new(),
        }
    }

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> { Ok(()) }
    }

    #[test]
    fn ring_buffer_keeps_the_newest_records() {
        let ring = RingBuffer::new(2);
        for msg in ["a", "b", "c"] {
            ring.write(&record(msg));
        }
        let msgs: Vec<_> = ring.records().into_iter().map(|r| r.msg).collect();
        assert_eq!(msgs, ["b", "c"]);
    }

    #[test]
    fn writer_stream_emits_one_json_line_per_record() {
        let buf = SharedBuf::default();
        let stream = WriterStream::new("memory", buf.clone());
        stream.write(&record("one"));
        stream.write(&record("two"));

        let out = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        let lines: Vec<Value> = out.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1]["msg"], "two");
        assert_eq!(stream.describe()["stream"], "memory");
    }

    struct Collect(Arc<Mutex<Vec<String>>>);

    #[async_trait]
    impl LogSink for Collect {
        async fn send(&self, record: &LogRecord) -> Result<(), Box<dyn Error + Send + Sync>> {
            self.0.lock().unwrap().push(record.msg.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn sink_stream_delivers_everything_once_senders_are_gone() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (stream, handle) = SinkStream::spawn(
            Arc::new(Collect(Arc::clone(&seen))),
            SinkConfig { batch_size: 2, ..SinkConfig::default() },
        );
        for msg in ["a", "b", "c"] {
            stream.write(&record(msg));
        }
        drop(stream);
        handle.await.unwrap();

        assert_eq!(*seen.lock().unwrap(), ["a", "b", "c"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn flush_delivers_the_partial_batch() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (stream, _task) = SinkStream::spawn(
            Arc::new(Collect(Arc::clone(&seen))),
            SinkConfig { flush_interval: Duration::from_secs(60), ..SinkConfig::default() },
        );
        stream.write(&record("a"));
        stream.write(&record("b"));

        tokio::task::spawn_blocking(move || stream.flush()).await.unwrap();
        assert_eq!(*seen.lock().unwrap(), ["a", "b"]);
    }

    #[tokio::test]
    async fn partial_batches_wait_at_most_the_flush_interval() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (stream, _task) = SinkStream::spawn(
            Arc::new(Collect(Arc::clone(&seen))),
            SinkConfig { flush_interval: Duration::from_millis(50), ..SinkConfig::default() },
        );
        // A steady trickle, faster than the interval, never fills a batch.
        for i in 0..15 {
            stream.write(&record(&i.to_string()));
            sleep(Duration::from_millis(20)).await;
        }

        assert!(seen.lock().unwrap().len() >= 5);
    }
}
