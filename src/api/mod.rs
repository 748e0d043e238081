//! Purpose: Define the public Rust API boundary for dsrsync.
//! Exports: Core types and operations needed by the CLI and integration tests.
//! Role: Single import path for callers; internal module layout may change.
//! Invariants: The HTTP source is the only component that talks to the network.

mod http;
mod query;

pub use crate::core::checkpoint::{Checkpoint, CheckpointStore, FileCheckpointStore};
pub use crate::core::cursor::ResumeCursor;
pub use crate::core::decode::{DecodedPage, decode};
#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::normalize::{CalendarZone, Normalizer};
pub use crate::core::paginate::{
    DEFAULT_PAGE_SIZE, PageSource, Paginator, RetryPolicy, RunConfig, RunReport, StopReason,
};
pub use crate::core::sink::{CsvFileSink, RowSink, SinkMode};
pub use http::{
    DEFAULT_ENDPOINT, DEFAULT_ORIGIN, DEFAULT_RESOURCE_KEY, DEFAULT_TIMEOUT, DEFAULT_USER_AGENT,
    HttpPageSource, TransportConfig,
};
pub use query::QueryTemplate;
