//! Error types shared across the mapper workspace

use thiserror::Error;

/// Result type alias for shared mapper operations
pub type Result<T> = std::result::Result<T, MapperError>;

/// Errors raised by the shared wire types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MapperError {
    #[error("Unknown mapper mode '{0}', expected 'resolve' or 'direct'")]
    UnknownMode(String),
}
