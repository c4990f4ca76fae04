//! Batched NDJSON loader
//!
//! Pulls chunks from a blocking reader, splits them into lines, parses each
//! line as one JSON record and publishes records to shared state in batches.
//! A batch is flushed when it reaches `batch_size` or when more than
//! `flush_interval` has passed since the previous flush. Between chunks the
//! loop applies its [`YieldPolicy`] so other work gets a turn.

use std::fmt;
use std::io::{ErrorKind, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;

use crate::consts::{
    DEFAULT_BATCH_SIZE, DEFAULT_FLUSH_INTERVAL, DEFAULT_MILESTONE, NDJSON_MIME, PROGRESS_CAP,
    PROGRESS_STEP, READ_CHUNK_SIZE,
};
use crate::core::{Clock, lock};
use crate::error::StreamError;
use crate::http::ApiClient;

use super::lines::LineDecoder;

/// What the loop does between chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum YieldPolicy {
    None,
    #[default]
    Yield,
    Sleep(Duration),
}

impl YieldPolicy {
    fn pause(self) {
        match self {
            YieldPolicy::None => {}
            YieldPolicy::Yield => std::thread::yield_now(),
            YieldPolicy::Sleep(duration) => std::thread::sleep(duration),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct StreamOptions {
    pub(crate) batch_size: usize,
    pub(crate) flush_interval: Duration,
    /// Emit a progress message every this many parsed records
    pub(crate) milestone: u64,
    pub(crate) yield_policy: YieldPolicy,
    pub(crate) chunk_size: usize,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            milestone: DEFAULT_MILESTONE,
            yield_policy: YieldPolicy::default(),
            chunk_size: READ_CHUNK_SIZE,
        }
    }
}

/// Shared cancellation flag for one load.
#[derive(Debug, Clone, Default)]
pub(crate) struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub(crate) fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn same_as(&self, other: &CancelToken) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum LoadStatus {
    #[default]
    Idle,
    Connecting,
    Processed(u64),
    Loaded,
    Failed,
    Cancelled,
}

impl fmt::Display for LoadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadStatus::Idle => f.write_str("Idle"),
            LoadStatus::Connecting => f.write_str("Connecting to server..."),
            LoadStatus::Processed(n) => write!(f, "Processed {} records...", group_thousands(*n)),
            LoadStatus::Loaded => f.write_str("Records loaded"),
            LoadStatus::Failed => f.write_str("Connection or NDJSON format error"),
            LoadStatus::Cancelled => f.write_str("Load cancelled"),
        }
    }
}

fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// Observable state of the most recent load.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct StreamBatch {
    /// Parsed records in arrival order
    pub(crate) records: Vec<Value>,
    pub(crate) count: u64,
    /// Lines that were not valid JSON
    pub(crate) skipped: u64,
    pub(crate) batches: u64,
    pub(crate) completed: bool,
    pub(crate) cancelled: bool,
    /// 0..=95 while loading, 100 only once completed
    pub(crate) progress: u8,
    pub(crate) status: LoadStatus,
    pub(crate) elapsed: Duration,
    pub(crate) error: Option<StreamError>,
}

impl StreamBatch {
    fn connecting() -> Self {
        Self {
            status: LoadStatus::Connecting,
            ..Self::default()
        }
    }
}

/// Summary handed to observers after each flush.
#[derive(Debug)]
pub(crate) struct FlushContext<'a> {
    pub(crate) added: usize,
    pub(crate) count: u64,
    pub(crate) progress: u8,
    /// Lets an observer stop the load it is watching
    pub(crate) cancel: &'a CancelToken,
}

pub(crate) trait LoadObserver {
    fn on_status(&mut self, _status: LoadStatus) {}

    fn on_flush(&mut self, _flush: &FlushContext<'_>) {}
}

impl LoadObserver for () {}

pub(crate) struct StreamLoader {
    options: StreamOptions,
    clock: Arc<dyn Clock>,
    state: Mutex<StreamBatch>,
    current: Mutex<Option<CancelToken>>,
}

/// Per-load bookkeeping that never leaves the loop.
struct Run<'a> {
    token: CancelToken,
    observer: &'a mut dyn LoadObserver,
    pending: Vec<Value>,
    parsed: u64,
    skipped: u64,
    line_no: u64,
    started_ms: i64,
    last_flush_ms: i64,
}

impl StreamLoader {
    pub(crate) fn new(options: StreamOptions, clock: Arc<dyn Clock>) -> Self {
        Self {
            options,
            clock,
            state: Mutex::new(StreamBatch::default()),
            current: Mutex::new(None),
        }
    }

    pub(crate) fn snapshot(&self) -> StreamBatch {
        lock(&self.state).clone()
    }

    /// Stop the running load, if any. Nothing it has not flushed yet is
    /// applied; the loop notices before its next read.
    pub(crate) fn cancel(&self) {
        if let Some(token) = lock(&self.current).as_ref() {
            tracing::debug!("cancelling stream load");
            token.cancel();
        }
    }

    /// Stream `path` from the API and return the final state. Starting a load
    /// cancels the one before it. Errors end up in
    /// [`StreamBatch::error`], never as a `Result`.
    pub(crate) fn load(
        &self,
        api: &ApiClient,
        path: &str,
        observer: &mut dyn LoadObserver,
    ) -> StreamBatch {
        let mut run = self.begin(observer);
        tracing::debug!(path, "opening stream");

        match api.open_stream(path, NDJSON_MIME) {
            Ok(response) => self.consume(&mut run, response.body),
            Err(err) => self.fail(&mut run, err.into()),
        }
        self.snapshot()
    }

    /// Run the loop over an already open reader.
    #[cfg(test)]
    pub(crate) fn ingest(&self, reader: impl Read, observer: &mut dyn LoadObserver) -> StreamBatch {
        let mut run = self.begin(observer);
        self.consume(&mut run, reader);
        self.snapshot()
    }

    fn begin<'a>(&self, observer: &'a mut dyn LoadObserver) -> Run<'a> {
        let token = CancelToken::default();
        {
            let mut state = lock(&self.state);
            if let Some(previous) = lock(&self.current).replace(token.clone()) {
                previous.cancel();
            }
            *state = StreamBatch::connecting();
        }
        observer.on_status(LoadStatus::Connecting);

        let now = self.clock.now_ms();
        Run {
            token,
            observer,
            pending: Vec::with_capacity(self.options.batch_size.min(4096)),
            parsed: 0,
            skipped: 0,
            line_no: 0,
            started_ms: now,
            last_flush_ms: now,
        }
    }

    fn consume(&self, run: &mut Run<'_>, mut reader: impl Read) {
        let mut decoder = LineDecoder::new();
        let mut buf = vec![0u8; self.options.chunk_size.max(1)];

        loop {
            if run.token.is_cancelled() {
                self.mark_cancelled(run);
                return;
            }

            let read = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    self.fail(run, StreamError::Read(err.to_string()));
                    return;
                }
            };

            for line in decoder.push(&buf[..read]) {
                self.accept_line(run, &line);
                if run.pending.len() >= self.options.batch_size {
                    self.flush(run);
                    if run.token.is_cancelled() {
                        self.mark_cancelled(run);
                        return;
                    }
                }
            }

            let since_flush = self.clock.now_ms() - run.last_flush_ms;
            if since_flush > self.options.flush_interval.as_millis() as i64 && !run.pending.is_empty() {
                self.flush(run);
            }

            self.options.yield_policy.pause();
        }

        let dropped = decoder.finish();
        if dropped > 0 {
            tracing::debug!(bytes = dropped, "discarding unterminated trailing line");
        }
        self.complete(run);
    }

    fn accept_line(&self, run: &mut Run<'_>, line: &str) {
        run.line_no += 1;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return;
        }

        match serde_json::from_str::<Value>(trimmed) {
            Ok(record) => {
                run.pending.push(record);
                run.parsed += 1;
                if self.options.milestone > 0 && run.parsed % self.options.milestone == 0 {
                    self.announce(run, LoadStatus::Processed(run.parsed));
                }
            }
            Err(err) => {
                run.skipped += 1;
                tracing::warn!(line = run.line_no, error = %err, "skipping malformed record");
            }
        }
    }

    fn announce(&self, run: &mut Run<'_>, status: LoadStatus) {
        {
            let mut state = lock(&self.state);
            if run.token.is_cancelled() {
                return;
            }
            state.status = status;
        }
        run.observer.on_status(status);
    }

    fn flush(&self, run: &mut Run<'_>) {
        run.last_flush_ms = self.clock.now_ms();
        if run.pending.is_empty() {
            return;
        }

        let (added, count, progress) = {
            let mut state = lock(&self.state);
            if run.token.is_cancelled() {
                run.pending.clear();
                return;
            }
            let added = run.pending.len();
            state.records.append(&mut run.pending);
            state.count = state.records.len() as u64;
            state.skipped = run.skipped;
            state.batches += 1;
            state.progress = state.progress.saturating_add(PROGRESS_STEP).min(PROGRESS_CAP);
            state.elapsed = elapsed_between(run.started_ms, run.last_flush_ms);
            (added, state.count, state.progress)
        };

        tracing::debug!(added, count, progress, "flushed batch");
        run.observer.on_flush(&FlushContext {
            added,
            count,
            progress,
            cancel: &run.token,
        });
    }

    fn complete(&self, run: &mut Run<'_>) {
        let now = self.clock.now_ms();
        {
            let mut state = lock(&self.state);
            if run.token.is_cancelled() {
                drop(state);
                self.mark_cancelled(run);
                return;
            }
            if !run.pending.is_empty() {
                state.records.append(&mut run.pending);
                state.batches += 1;
            }
            state.count = state.records.len() as u64;
            state.skipped = run.skipped;
            state.completed = true;
            state.progress = 100;
            state.status = LoadStatus::Loaded;
            state.elapsed = elapsed_between(run.started_ms, now);
            state.error = None;
        }

        tracing::info!(
            records = run.parsed,
            skipped = run.skipped,
            elapsed_ms = now - run.started_ms,
            "stream loaded"
        );
        run.observer.on_status(LoadStatus::Loaded);
    }

    fn fail(&self, run: &mut Run<'_>, error: StreamError) {
        let now = self.clock.now_ms();
        {
            let mut state = lock(&self.state);
            if run.token.is_cancelled() {
                drop(state);
                self.mark_cancelled(run);
                return;
            }
            // Only what was already flushed stays visible
            run.pending.clear();
            state.skipped = run.skipped;
            state.status = LoadStatus::Failed;
            state.elapsed = elapsed_between(run.started_ms, now);
            state.error = Some(error.clone());
        }

        tracing::warn!(error = %error, "stream load failed");
        run.observer.on_status(LoadStatus::Failed);
    }

    fn mark_cancelled(&self, run: &mut Run<'_>) {
        run.pending.clear();
        let still_current = {
            let mut state = lock(&self.state);
            let current = lock(&self.current);
            let still_current = current.as_ref().is_some_and(|t| t.same_as(&run.token));
            if still_current {
                state.cancelled = true;
                state.status = LoadStatus::Cancelled;
                state.elapsed = elapsed_between(run.started_ms, self.clock.now_ms());
            }
            still_current
        };

        tracing::debug!(records = run.parsed, "stream load cancelled");
        if still_current {
            run.observer.on_status(LoadStatus::Cancelled);
        }
    }
}

fn elapsed_between(start_ms: i64, end_ms: i64) -> Duration {
    Duration::from_millis((end_ms - start_ms).max(0) as u64)
}
