//! # Keyturn Events
//!
//! Access-log events for the keyturn authentication service.
//!
//! ## Overview
//!
//! - **Event Types**: `AccessLogAction`, `AccessLogEntry`, `ClientInfo`
//! - **Recorders**: the `AccessLogRecorder` capability, with an in-memory
//!   log and a `tracing`-backed log
//!
//! ## Usage
//!
//! ```rust,no_run
//! use keyturn_auth::UserId;
//! use keyturn_events::{AccessLogAction, AccessLogEntry, AccessLogRecorder, MemoryAccessLog};
//! use uuid::Uuid;
//!
//! async fn record_example() {
//!     let log = MemoryAccessLog::new();
//!
//!     let entry = AccessLogEntry::new(UserId(42), AccessLogAction::Login, Uuid::new_v4());
//!     log.record(entry).await.unwrap();
//! }
//! ```

pub mod recorder;
pub mod types;

// Re-export main types
pub use recorder::{
    AccessLogError, AccessLogRecorder, AccessLogResult, MemoryAccessLog, TracingAccessLog,
};
pub use types::{truncate_user_agent, AccessLogAction, AccessLogEntry, ClientInfo, MAX_USER_AGENT_LEN};
