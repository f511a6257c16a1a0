//! CafeLedger Service
//!
//! The boundary between the request-handling layer and the ledger engine.
//! Maps inbound requests to engine operations and engine errors to
//! responses, applies deadlines, and tracks operation metrics.

pub mod service;
pub mod config;
pub mod request;
pub mod state;
pub mod metrics;
pub mod telemetry;
pub mod daemon;

pub use service::{LedgerService, ServiceError};
pub use config::{LogFormat, ServiceConfig, StorageConfig};
pub use request::{LedgerRequest, LedgerResponse, RawAccountId, RequestError, RequestKind};
pub use state::ServiceState;
pub use metrics::{Metrics, MetricsSnapshot, SharedMetrics};
pub use daemon::serve_lines;
