//! UniHelp SDK
//!
//! Shared library providing the message vocabulary and error types used
//! across the UniHelp engine, its CLI and its HTTP surface.

/// Error types and handling
pub mod errors;

/// Chat message types
pub mod types;

// Re-export commonly used types
pub use errors::{EngineError, ErrorHint};
pub use types::{Message, MessageRole};
