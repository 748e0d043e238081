//! Purpose: Library crate backing the `dsrsync` CLI and its tests.
//! Exports: `core` (decoding, checkpointing, pagination, errors) and `api` (HTTP source, query).
//! Role: Keeps the export engine independent of the command-line surface.
//! Invariants: Core modules take explicit inputs/outputs; no process-wide mutable state.
//! Invariants: Network access lives only in `api`; `core` is testable offline.
pub mod api;
pub mod core;
