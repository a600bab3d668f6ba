// src/lib.rs
// Public library surface for the binaries and integration tests.

pub mod alert;
pub mod api;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod ingest;
pub mod metrics;
pub mod store;

pub use crate::api::{create_router, AppState};
pub use crate::error::{FetchError, RunError, StoreError};
pub use crate::ingest::coordinator::{CrawlCoordinator, RunHandle};
pub use crate::ingest::run::{CrawlRun, RunStatus, SourceReport, SourceStatus};
pub use crate::ingest::types::{ContentRecord, RawRecord, SourceAdapter, SourceConfig, SourceKind};
