//! Append-only routing history journal with a single background writer.
//!
//! Grounded on the teacher's `TimeProvider`-driven background task pattern
//! (`time_provider.rs`) and the "writer task + reply channel instead of
//! futures" design note: one long-lived `tokio::task` owns the file handle
//! and selects among a queued write, a flush ticker, and a shutdown signal.

use crate::domain_types::UserHash;
use crate::error::{ErrorClass, ErrorKind};
use crate::memory::decision::RoutingDecision;
use crate::time_provider::SharedTimeProvider;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, instrument, warn};

/// Minimum free disk space required before a write is accepted.
const MIN_FREE_DISK_BYTES: u64 = 100 * 1024 * 1024 + 10 * 1024;
/// Bound on a single journal line; a longer line aborts the read that hit it.
const MAX_LINE_BYTES: usize = 1024 * 1024;
/// Capacity of the writer's queued-write channel.
const WRITE_QUEUE_CAPACITY: usize = 1000;
/// How long `record_routing` waits for the writer's acknowledgement.
const ACK_TIMEOUT: Duration = Duration::from_secs(10);
/// How often the writer fsyncs the journal.
const FLUSH_INTERVAL: Duration = Duration::from_secs(5);
/// Default number of entries returned by history queries.
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// Errors from the routing history store.
#[derive(Debug, thiserror::Error)]
pub enum HistoryStoreError {
    /// Free disk space is below the 100 MiB + 10 KiB precondition.
    #[error("insufficient free disk space for journal write")]
    DiskPressure,
    /// The writer's queue is full; the caller may retry or drop the write.
    #[error("routing history write queue is full")]
    QueueFull,
    /// The writer did not acknowledge the write within the deadline.
    #[error("timed out waiting for routing history write acknowledgement")]
    AckTimeout,
    /// The store has been closed.
    #[error("routing history store is shutting down")]
    ShuttingDown,
    /// A filesystem or serialization fault.
    #[error("routing history I/O error: {0}")]
    Io(String),
}

impl ErrorClass for HistoryStoreError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::DiskPressure | Self::Io(_) => ErrorKind::Io,
            Self::QueueFull => ErrorKind::Backpressure,
            Self::AckTimeout => ErrorKind::Timeout,
            Self::ShuttingDown => ErrorKind::ShuttingDown,
        }
    }
}

type StoreResult<T> = Result<T, HistoryStoreError>;

struct WriteOp {
    decision: RoutingDecision,
    reply: oneshot::Sender<StoreResult<()>>,
}

/// Append-only journal of routing decisions, backed by a single background
/// writer task.
pub struct HistoryStore {
    path: PathBuf,
    tx: mpsc::Sender<WriteOp>,
    shutdown_tx: Option<oneshot::Sender<oneshot::Sender<()>>>,
    writer: Option<tokio::task::JoinHandle<()>>,
    closed: Arc<AtomicBool>,
}

impl HistoryStore {
    /// Opens (creating if necessary) the journal at `path` and spawns its
    /// writer task.
    ///
    /// # Errors
    ///
    /// Returns an error if the journal file cannot be opened for append.
    #[instrument(skip_all)]
    pub async fn open(path: impl AsRef<Path>, time_provider: SharedTimeProvider) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| HistoryStoreError::Io(e.to_string()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| HistoryStoreError::Io(e.to_string()))?;

        let (tx, rx) = mpsc::channel(WRITE_QUEUE_CAPACITY);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let closed = Arc::new(AtomicBool::new(false));

        let writer = tokio::spawn(writer_loop(file, rx, shutdown_rx, time_provider));

        info!(path = %path.display(), "routing history store opened");
        Ok(Self { path, tx, shutdown_tx: Some(shutdown_tx), writer: Some(writer), closed })
    }

    /// Records a routing decision.
    ///
    /// Enqueues the write on a bounded channel and waits for the writer's
    /// acknowledgement. A full queue returns [`HistoryStoreError::QueueFull`]
    /// immediately without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryStoreError::DiskPressure`] if free disk space is
    /// below the precondition, `QueueFull` if the writer is backed up,
    /// `AckTimeout` if the writer does not reply within 10s, or `Io` for a
    /// propagated filesystem fault.
    #[instrument(skip(self, decision), fields(user_hash = %decision.user_hash))]
    pub async fn record_routing(&self, decision: RoutingDecision) -> StoreResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(HistoryStoreError::ShuttingDown);
        }
        check_free_disk(&self.path)?;

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .try_send(WriteOp { decision, reply: reply_tx })
            .map_err(|_| HistoryStoreError::QueueFull)?;

        match tokio::time::timeout(ACK_TIMEOUT, reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(HistoryStoreError::Io("writer dropped reply channel".to_string())),
            Err(_) => Err(HistoryStoreError::AckTimeout),
        }
    }

    /// Returns up to `limit` (default [`DEFAULT_HISTORY_LIMIT`] when `None`)
    /// of the most recent decisions for `user_hash`, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error only if a line exceeds the maximum line size; a
    /// missing file yields an empty result and malformed lines are skipped.
    pub async fn get_history(&self, user_hash: &UserHash, limit: Option<usize>) -> StoreResult<Vec<RoutingDecision>> {
        self.read_filtered(Some(user_hash), limit).await
    }

    /// Returns up to `limit` (default [`DEFAULT_HISTORY_LIMIT`] when `None`)
    /// of the most recent decisions across all users, newest first.
    ///
    /// # Errors
    ///
    /// See [`Self::get_history`].
    pub async fn get_all_history(&self, limit: Option<usize>) -> StoreResult<Vec<RoutingDecision>> {
        self.read_filtered(None, limit).await
    }

    async fn read_filtered(&self, user_hash: Option<&UserHash>, limit: Option<usize>) -> StoreResult<Vec<RoutingDecision>> {
        let limit = limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
        let file = match tokio::fs::File::open(&self.path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(HistoryStoreError::Io(e.to_string())),
        };
        let mut reader = BufReader::with_capacity(MAX_LINE_BYTES, file);
        let mut matched = Vec::new();

        loop {
            let mut line = Vec::new();
            let read = reader
                .read_until(b'\n', &mut line)
                .await
                .map_err(|e| HistoryStoreError::Io(e.to_string()))?;
            if read == 0 {
                break;
            }
            if line.len() > MAX_LINE_BYTES {
                return Err(HistoryStoreError::Io("routing history line exceeds 1 MiB".to_string()));
            }
            let text = match std::str::from_utf8(&line) {
                Ok(t) => t.trim_end(),
                Err(_) => continue,
            };
            if text.is_empty() {
                continue;
            }
            let Ok(decision) = serde_json::from_str::<RoutingDecision>(text) else {
                warn!("skipping corrupt routing history line");
                continue;
            };
            if user_hash.is_none_or(|h| &decision.user_hash == h) {
                matched.push(decision);
            }
        }

        let start = matched.len().saturating_sub(limit);
        let mut tail: Vec<_> = matched.split_off(start);
        tail.reverse();
        Ok(tail)
    }

    /// Counts non-empty lines in the journal.
    ///
    /// # Errors
    ///
    /// Returns an error on a filesystem fault other than a missing file.
    pub async fn count(&self) -> StoreResult<usize> {
        let file = match tokio::fs::File::open(&self.path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(HistoryStoreError::Io(e.to_string())),
        };
        let reader = BufReader::with_capacity(MAX_LINE_BYTES, file);
        let mut lines = reader.lines();
        let mut count = 0;
        while let Some(line) = lines.next_line().await.map_err(|e| HistoryStoreError::Io(e.to_string()))? {
            if !line.trim().is_empty() {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Signals the writer to drain its queue, fsync, and stop.
    ///
    /// Idempotent; a 10s wall clock bounds the drain wait.
    #[instrument(skip(self))]
    pub async fn close(&mut self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(shutdown_tx) = self.shutdown_tx.take() else { return };
        let (done_tx, done_rx) = oneshot::channel();
        if shutdown_tx.send(done_tx).is_err() {
            debug!("routing history writer already gone");
            return;
        }
        let _ = tokio::time::timeout(Duration::from_secs(10), done_rx).await;
        if let Some(handle) = self.writer.take() {
            let _ = tokio::time::timeout(Duration::from_secs(10), handle).await;
        }
        info!("routing history store closed");
    }
}

fn check_free_disk(path: &Path) -> StoreResult<()> {
    let probe = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."));
    match fs2::available_space(probe) {
        Ok(free) if free < MIN_FREE_DISK_BYTES => Err(HistoryStoreError::DiskPressure),
        // Ok(_) here or Err: platform cannot report free space, do not block writes on it
        Ok(_) | Err(_) => Ok(()),
    }
}

async fn writer_loop(
    file: tokio::fs::File,
    mut rx: mpsc::Receiver<WriteOp>,
    mut shutdown_rx: oneshot::Receiver<oneshot::Sender<()>>,
    time_provider: SharedTimeProvider,
) {
    let mut writer = BufWriter::new(file);
    let mut flush_ticker = tokio::time::interval(FLUSH_INTERVAL);
    flush_ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let _ = time_provider.instant();

    loop {
        tokio::select! {
            biased;
            done = &mut shutdown_rx => {
                drain_remaining(&mut rx, &mut writer).await;
                fsync(&mut writer).await;
                if let Ok(done_tx) = done {
                    let _ = done_tx.send(());
                }
                return;
            }
            maybe_op = rx.recv() => {
                if let Some(op) = maybe_op {
                    apply_write(&mut writer, op).await;
                } else {
                    fsync(&mut writer).await;
                    return;
                }
            }
            _ = flush_ticker.tick() => {
                fsync(&mut writer).await;
            }
        }
    }
}

async fn drain_remaining(rx: &mut mpsc::Receiver<WriteOp>, writer: &mut BufWriter<tokio::fs::File>) {
    while let Ok(op) = rx.try_recv() {
        apply_write(writer, op).await;
    }
}

async fn apply_write(writer: &mut BufWriter<tokio::fs::File>, op: WriteOp) {
    let result = match serde_json::to_string(&op.decision) {
        Ok(line) => match writer.write_all(line.as_bytes()).await.and(writer.write_all(b"\n").await) {
            Ok(()) => writer.flush().await.map_err(|e| HistoryStoreError::Io(e.to_string())),
            Err(e) => Err(HistoryStoreError::Io(e.to_string())),
        },
        Err(e) => Err(HistoryStoreError::Io(e.to_string())),
    };
    if result.is_err() {
        error!(?result, "failed to append routing decision");
    }
    let _ = op.reply.send(result);
}

async fn fsync(writer: &mut BufWriter<tokio::fs::File>) {
    if let Err(e) = writer.flush().await {
        warn!(error = %e, "failed to flush routing history writer");
        return;
    }
    if let Err(e) = writer.get_ref().sync_all().await {
        warn!(error = %e, "failed to fsync routing history file");
    }
}
