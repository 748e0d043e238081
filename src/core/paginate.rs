//! Purpose: Drive the fetch -> decode -> persist loop with checkpointed resumption.
//! Exports: `PageSource`, `Paginator`, `RunConfig`, `RetryPolicy`, `RunReport`, `StopReason`.
//! Role: Owns termination, cancellation, and resume policy for one export run.
//! Invariants: Rows are durably committed before the checkpoint that covers them is saved.
//! Invariants: Cancellation is only observed outside PERSISTING; a page is committed or skipped whole.
//! Invariants: A short or empty page ends the run; a full page continues with its cursor.
//! Invariants: Transport failures may be retried; decode failures never are.
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::core::checkpoint::{Checkpoint, CheckpointStore};
use crate::core::cursor::ResumeCursor;
use crate::core::decode::{DecodedPage, decode};
use crate::core::error::{Error, ErrorKind};
use crate::core::normalize::Normalizer;
use crate::core::sink::{RowSink, SinkMode};

/// Maximum rows the upstream service returns per page.
pub const DEFAULT_PAGE_SIZE: usize = 500;

const MAX_BACKOFF: Duration = Duration::from_secs(30);
const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// Fetches one raw page. `None` requests the first page.
pub trait PageSource {
    fn fetch(&mut self, cursor: Option<&ResumeCursor>) -> Result<String, Error>;
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_backoff: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_backoff: Duration::ZERO,
        }
    }

    /// Delay before retry number `retry` (1-based): base doubled per retry, capped.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_backoff.saturating_mul(factor).min(MAX_BACKOFF)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

#[derive(Clone, Debug)]
pub struct RunConfig {
    pub page_size: usize,
    pub inter_page_delay: Duration,
    pub fresh_start: bool,
    pub retry: RetryPolicy,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            inter_page_delay: Duration::from_secs(1),
            fresh_start: false,
            retry: RetryPolicy::none(),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StopReason {
    /// The service returned a page with no rows.
    EndOfData,
    /// The last page held fewer rows than the page size.
    ShortPage,
    /// A full page came back without a continuation cursor.
    MissingCursor,
    Cancelled,
}

impl StopReason {
    pub fn as_str(self) -> &'static str {
        match self {
            StopReason::EndOfData => "end_of_data",
            StopReason::ShortPage => "short_page",
            StopReason::MissingCursor => "missing_cursor",
            StopReason::Cancelled => "cancelled",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RunReport {
    pub resumed: bool,
    pub pages: u64,
    pub rows_this_run: u64,
    pub rows_total: u64,
    pub cursor: Option<ResumeCursor>,
    pub stop: StopReason,
}

enum State {
    Fetching,
    Decoding(String),
    Persisting(DecodedPage),
    Pausing,
    Done(StopReason),
}

struct Start {
    resumed: bool,
    cursor: Option<ResumeCursor>,
    rows_total: u64,
    mode: SinkMode,
}

pub struct Paginator {
    config: RunConfig,
    normalizer: Normalizer,
    stop: Option<Arc<AtomicBool>>,
}

impl Paginator {
    pub fn new(config: RunConfig, normalizer: Normalizer) -> Self {
        Self {
            config,
            normalizer,
            stop: None,
        }
    }

    /// Cooperative cancellation flag, checked between steps.
    pub fn with_stop(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = Some(stop);
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn run<S, K, C>(&self, source: &mut S, sink: &mut K, store: &mut C) -> Result<RunReport, Error>
    where
        S: PageSource + ?Sized,
        K: RowSink + ?Sized,
        C: CheckpointStore + ?Sized,
    {
        if self.config.page_size == 0 {
            return Err(Error::new(ErrorKind::Usage).with_message("page size must be positive"));
        }
        let start = self.start(store);
        // The output lock is held before any prior state is discarded.
        sink.open(start.mode)?;
        if self.config.fresh_start {
            store.clear()?;
        }

        let mut cursor = start.cursor;
        let mut rows_total = start.rows_total;
        let mut rows_this_run = 0u64;
        let mut pages = 0u64;
        let mut header_pending = !start.resumed;
        let mut page_no = 0u64;

        let mut state = State::Fetching;
        let stop = loop {
            state = match state {
                State::Fetching => {
                    if self.cancelled() {
                        State::Done(StopReason::Cancelled)
                    } else {
                        page_no += 1;
                        match self.fetch_with_retry(source, cursor.as_ref(), page_no)? {
                            Some(body) => State::Decoding(body),
                            None => State::Done(StopReason::Cancelled),
                        }
                    }
                }
                State::Decoding(body) => {
                    let page = decode(&body, &self.normalizer).map_err(|err| err.with_page(page_no))?;
                    if page.is_empty() {
                        tracing::info!(page = page_no, "no rows returned; end of data");
                        State::Done(StopReason::EndOfData)
                    } else if self.cancelled() {
                        tracing::info!(page = page_no, "cancelled before commit; page abandoned");
                        State::Done(StopReason::Cancelled)
                    } else {
                        State::Persisting(page)
                    }
                }
                State::Persisting(page) => {
                    if header_pending {
                        sink.write_header(&page.columns)?;
                        header_pending = false;
                    }
                    sink.append(&page.rows)?;
                    let output_len = sink.commit()?;

                    let count = page.rows.len();
                    rows_total += count as u64;
                    rows_this_run += count as u64;
                    pages += 1;
                    cursor = page.next_cursor;
                    store.save(&Checkpoint::new(cursor.clone(), rows_total, Some(output_len)))?;
                    tracing::info!(page = page_no, rows = count, total = rows_total, "page committed");

                    if count < self.config.page_size {
                        State::Done(StopReason::ShortPage)
                    } else if cursor.is_none() {
                        tracing::warn!(page = page_no, "full page without a continuation cursor; stopping");
                        State::Done(StopReason::MissingCursor)
                    } else {
                        State::Pausing
                    }
                }
                State::Pausing => {
                    if self.pause(self.config.inter_page_delay) {
                        State::Fetching
                    } else {
                        State::Done(StopReason::Cancelled)
                    }
                }
                State::Done(stop) => break stop,
            };
        };

        Ok(RunReport {
            resumed: start.resumed,
            pages,
            rows_this_run,
            rows_total,
            cursor,
            stop,
        })
    }

    fn start<C>(&self, store: &C) -> Start
    where
        C: CheckpointStore + ?Sized,
    {
        let checkpoint = if self.config.fresh_start {
            tracing::info!("fresh start requested; discarding previous progress");
            None
        } else {
            match store.load() {
                Ok(checkpoint) => checkpoint,
                Err(err) => {
                    tracing::warn!(error = %err, "checkpoint unreadable; starting fresh");
                    None
                }
            }
        };

        match checkpoint {
            Some(Checkpoint {
                cursor: Some(cursor),
                rows_written,
                output_len,
                ..
            }) => {
                tracing::info!(rows = rows_written, "resuming from checkpoint");
                Start {
                    resumed: true,
                    cursor: Some(cursor),
                    rows_total: rows_written,
                    mode: SinkMode::Resume {
                        committed_len: output_len,
                    },
                }
            }
            other => {
                if let Some(previous) = other {
                    tracing::info!(
                        rows = previous.rows_written,
                        "checkpoint has no cursor; starting a fresh export"
                    );
                } else if !self.config.fresh_start {
                    tracing::info!("no checkpoint; starting a fresh export");
                }
                Start {
                    resumed: false,
                    cursor: None,
                    rows_total: 0,
                    mode: SinkMode::Fresh,
                }
            }
        }
    }

    fn fetch_with_retry<S>(
        &self,
        source: &mut S,
        cursor: Option<&ResumeCursor>,
        page_no: u64,
    ) -> Result<Option<String>, Error>
    where
        S: PageSource + ?Sized,
    {
        let mut retry = 0u32;
        loop {
            tracing::debug!(page = page_no, resume = cursor.is_some(), "fetching page");
            match source.fetch(cursor) {
                Ok(body) => return Ok(Some(body)),
                Err(err)
                    if err.kind() == ErrorKind::Transport
                        && retry < self.config.retry.max_retries =>
                {
                    retry += 1;
                    let delay = self.config.retry.backoff(retry);
                    tracing::warn!(
                        page = page_no,
                        retry,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "fetch failed; retrying"
                    );
                    if !self.pause(delay) {
                        return Ok(None);
                    }
                }
                Err(err) => return Err(err.with_page(page_no)),
            }
        }
    }

    fn cancelled(&self) -> bool {
        self.stop
            .as_ref()
            .is_some_and(|stop| stop.load(Ordering::SeqCst))
    }

    /// Sleeps for `duration` in short slices. Returns false when cancelled.
    fn pause(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep((deadline - now).min(SLEEP_SLICE));
        }
    }
}
