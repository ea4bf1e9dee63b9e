//! Mapper Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, logging, and error handling for the mapper workspace.
//!
//! # Overview
//!
//! - **Types**: the mapping message wire format and the deployment mode
//! - **Logging**: `tracing` subscriber setup shared by every binary
//! - **Error Handling**: the common error type and result alias
//!
//! # Example
//!
//! ```no_run
//! use mapper_common::types::{MapperMode, StableIdMapping};
//!
//! let mode: MapperMode = "resolve".parse().unwrap();
//! let records: Vec<StableIdMapping> =
//!     serde_json::from_str(r#"[{"stableId":"EGAF001","datasetId":"EGAD001"}]"#).unwrap();
//! assert!(mode.requires_resolution());
//! assert_eq!(records.len(), 1);
//! ```

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{MapperError, Result};
