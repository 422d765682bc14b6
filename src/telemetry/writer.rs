//! Generic batching writer with size- and time-triggered background flush.
//!
//! [`BatchWriter::append`] only touches the in-memory buffer. A background
//! task owns the flush timer: it flushes on every tick, when an append
//! fills the buffer to the batch size, and once more when stopped.
//!
//! # Flush protocol
//!
//! The buffer is swapped out under the mutex and written outside it, so
//! records appended during the write land in the next flush. Sink errors
//! are logged and the batch is discarded; they never reach the caller of
//! `append`.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Notify, oneshot};
use tokio::task::JoinHandle;

use crate::config::WriterConfig;
use crate::error::StoreError;

/// Destination of flushed batches.
#[async_trait]
pub trait BatchSink<R>: Send + Sync {
    /// Persists `records` in one bulk operation and returns the number of
    /// rows written.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the batch could not be written.
    async fn write_batch(&self, records: Vec<R>) -> Result<u64, StoreError>;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Pending records plus the closed flag, guarded together so no append
/// can land after the final flush has drained the buffer.
struct Buffer<R> {
    records: Vec<R>,
    closed: bool,
}

struct Shared<R> {
    name: &'static str,
    buffer: Mutex<Buffer<R>>,
    batch_size: usize,
    sink: Arc<dyn BatchSink<R>>,
    wake: Notify,
}

impl<R: Send + 'static> Shared<R> {
    fn take(&self) -> Vec<R> {
        std::mem::take(&mut lock(&self.buffer).records)
    }

    async fn flush(&self) -> usize {
        let batch = self.take();
        if batch.is_empty() {
            return 0;
        }
        let records = batch.len();
        match self.sink.write_batch(batch).await {
            Ok(rows) => tracing::debug!(writer = self.name, records, rows, "batch flushed"),
            Err(err) => {
                tracing::warn!(writer = self.name, records, error = %err, "batch flush failed, records dropped");
            }
        }
        records
    }
}

/// Buffers records and writes them to a [`BatchSink`] in bulk.
pub struct BatchWriter<R> {
    shared: Arc<Shared<R>>,
    stop: Mutex<Option<oneshot::Sender<()>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<R> fmt::Debug for BatchWriter<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let buffer = lock(&self.shared.buffer);
        f.debug_struct("BatchWriter")
            .field("name", &self.shared.name)
            .field("batch_size", &self.shared.batch_size)
            .field("buffered", &buffer.records.len())
            .field("closed", &buffer.closed)
            .finish_non_exhaustive()
    }
}

impl<R: Send + 'static> BatchWriter<R> {
    /// Spawns the background flush task and returns the writer.
    ///
    /// Must be called inside a Tokio runtime.
    #[must_use]
    pub fn start(name: &'static str, sink: Arc<dyn BatchSink<R>>, config: WriterConfig) -> Self {
        let shared = Arc::new(Shared {
            name,
            buffer: Mutex::new(Buffer {
                records: Vec::with_capacity(config.batch_size),
                closed: false,
            }),
            batch_size: config.batch_size.max(1),
            sink,
            wake: Notify::new(),
        });
        let (stop_tx, stop_rx) = oneshot::channel();
        let period = config.flush_interval.max(Duration::from_millis(1));
        let task = tokio::spawn(run(Arc::clone(&shared), period, stop_rx));

        tracing::debug!(
            writer = name,
            batch_size = shared.batch_size,
            interval_ms = period.as_millis(),
            "batch writer started"
        );
        Self {
            shared,
            stop: Mutex::new(Some(stop_tx)),
            task: Mutex::new(Some(task)),
        }
    }

    /// Buffers one record. Never performs I/O.
    ///
    /// Reaching the batch size wakes the background task for an immediate
    /// flush. Records appended after [`BatchWriter::close`] are dropped and
    /// `false` is returned; an accepted record is always written by a later
    /// flush.
    pub fn append(&self, record: R) -> bool {
        let full = {
            let mut buffer = lock(&self.shared.buffer);
            if buffer.closed {
                drop(buffer);
                tracing::debug!(writer = self.shared.name, "append after close ignored");
                return false;
            }
            buffer.records.push(record);
            buffer.records.len() >= self.shared.batch_size
        };
        if full {
            self.shared.wake.notify_one();
        }
        true
    }

    /// Writes everything buffered right now. Returns the record count.
    pub async fn flush(&self) -> usize {
        self.shared.flush().await
    }

    /// Number of records waiting for the next flush.
    #[must_use]
    pub fn buffered(&self) -> usize {
        lock(&self.shared.buffer).records.len()
    }

    /// Stops the background task, waits for its final flush, then flushes
    /// once more. Later calls return immediately.
    pub async fn close(&self) {
        let Some(stop) = lock(&self.stop).take() else {
            return;
        };
        lock(&self.shared.buffer).closed = true;
        if stop.send(()).is_err() {
            tracing::debug!(writer = self.shared.name, "flush task already stopped");
        }

        let task = lock(&self.task).take();
        if let Some(task) = task
            && let Err(err) = task.await
        {
            tracing::warn!(writer = self.shared.name, error = %err, "flush task ended abnormally");
        }
        self.shared.flush().await;
        tracing::debug!(writer = self.shared.name, "batch writer closed");
    }
}

async fn run<R: Send + 'static>(
    shared: Arc<Shared<R>>,
    period: Duration,
    mut stop: oneshot::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                shared.flush().await;
            }
            () = shared.wake.notified() => {
                shared.flush().await;
            }
            // A dropped writer also ends the task.
            _ = &mut stop => {
                shared.flush().await;
                break;
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingSink {
        batches: Mutex<Vec<Vec<u32>>>,
        fail: bool,
    }

    impl RecordingSink {
        fn failing() -> Self {
            Self {
                batches: Mutex::new(Vec::new()),
                fail: true,
            }
        }

        fn written(&self) -> Vec<u32> {
            lock(&self.batches).iter().flatten().copied().collect()
        }

        fn batch_count(&self) -> usize {
            lock(&self.batches).len()
        }
    }

    #[async_trait]
    impl BatchSink<u32> for RecordingSink {
        async fn write_batch(&self, records: Vec<u32>) -> Result<u64, StoreError> {
            if self.fail {
                return Err(StoreError::Timeout);
            }
            let rows = records.len() as u64;
            lock(&self.batches).push(records);
            Ok(rows)
        }
    }

    fn writer(sink: &Arc<RecordingSink>, batch_size: usize, interval: Duration) -> BatchWriter<u32> {
        let sink: Arc<dyn BatchSink<u32>> = Arc::clone(sink) as Arc<dyn BatchSink<u32>>;
        BatchWriter::start("test", sink, WriterConfig::new(batch_size, interval))
    }

    async fn wait_for(sink: &RecordingSink, count: usize) {
        let waited = tokio::time::timeout(Duration::from_secs(2), async {
            while sink.written().len() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        if waited.is_err() {
            panic!("sink saw {} records, expected {count}", sink.written().len());
        }
    }

    #[tokio::test]
    async fn reaching_batch_size_flushes_before_the_tick() {
        let sink = Arc::new(RecordingSink::default());
        let writer = writer(&sink, 2, Duration::from_secs(3600));

        writer.append(1);
        writer.append(2);
        wait_for(&sink, 2).await;

        assert_eq!(writer.buffered(), 0);
        assert_eq!(sink.written(), vec![1, 2]);
        writer.close().await;
    }

    #[tokio::test]
    async fn close_flushes_remainder_exactly_once() {
        let sink = Arc::new(RecordingSink::default());
        let writer = writer(&sink, 10, Duration::from_secs(3600));

        for n in 1..=3 {
            writer.append(n);
        }
        writer.close().await;
        writer.close().await;

        assert_eq!(sink.written(), vec![1, 2, 3]);
        assert_eq!(sink.batch_count(), 1);
        assert_eq!(writer.buffered(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_tick_flushes_partial_batches() {
        let sink = Arc::new(RecordingSink::default());
        let writer = writer(&sink, 100, Duration::from_secs(10));

        writer.append(7);
        tokio::time::sleep(Duration::from_secs(11)).await;

        assert_eq!(sink.written(), vec![7]);
        writer.close().await;
    }

    #[tokio::test]
    async fn sink_errors_are_swallowed() {
        let sink = Arc::new(RecordingSink::failing());
        let writer = writer(&sink, 1, Duration::from_secs(3600));

        writer.append(1);
        assert_eq!(writer.flush().await, 1);
        writer.close().await;
        assert_eq!(writer.buffered(), 0);
    }

    #[tokio::test]
    async fn appends_after_close_are_dropped() {
        let sink = Arc::new(RecordingSink::default());
        let writer = writer(&sink, 10, Duration::from_secs(3600));
        writer.close().await;

        assert!(!writer.append(1));
        assert_eq!(writer.buffered(), 0);
        assert!(sink.written().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_appends_are_written_exactly_once() {
        let sink = Arc::new(RecordingSink::default());
        let writer = Arc::new(writer(&sink, 7, Duration::from_millis(3)));

        let mut producers = Vec::new();
        for producer in 0..4_u32 {
            let writer = Arc::clone(&writer);
            producers.push(tokio::spawn(async move {
                for n in 0..250_u32 {
                    writer.append(producer * 1_000 + n);
                    if n % 50 == 0 {
                        tokio::task::yield_now().await;
                    }
                }
            }));
        }
        for producer in producers {
            if producer.await.is_err() {
                panic!("producer panicked");
            }
        }
        writer.close().await;

        let mut written = sink.written();
        written.sort_unstable();
        let mut expected: Vec<u32> = (0..4_u32)
            .flat_map(|p| (0..250_u32).map(move |n| p * 1_000 + n))
            .collect();
        expected.sort_unstable();
        assert_eq!(written, expected);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn records_accepted_while_closing_are_never_stranded() {
        for _ in 0..20 {
            let sink = Arc::new(RecordingSink::default());
            let writer = Arc::new(writer(&sink, 1_000, Duration::from_secs(3600)));

            let producer = {
                let writer = Arc::clone(&writer);
                tokio::spawn(async move {
                    let mut accepted = 0_usize;
                    for n in 0..100_000_u32 {
                        if !writer.append(n) {
                            break;
                        }
                        accepted += 1;
                        if n % 64 == 0 {
                            tokio::task::yield_now().await;
                        }
                    }
                    accepted
                })
            };
            tokio::task::yield_now().await;
            writer.close().await;

            let Ok(accepted) = producer.await else {
                panic!("producer panicked");
            };
            assert_eq!(writer.buffered(), 0);
            assert_eq!(sink.written().len(), accepted);
        }
    }
}
