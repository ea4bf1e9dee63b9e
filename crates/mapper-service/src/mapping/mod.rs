//! File-to-dataset mapping pipeline
//!
//! - **decoder**: payload bytes to mapping records, all-or-nothing
//! - **resolver**: stable id to file id lookups (resolve-mode)
//! - **writer**: transactional inserts into `filedataset`
//! - **orchestrator**: runs one batch at a time through the steps above
//! - **testing**: in-memory resolver and writer

pub mod decoder;
pub mod orchestrator;
pub mod resolver;
pub mod testing;
pub mod writer;

pub use orchestrator::{BatchOrchestrator, BatchReport, BatchState, ResolveStrategy};
pub use resolver::{PgReferenceResolver, ReferenceResolver};
pub use writer::{MappingWriter, PgMappingWriter};
