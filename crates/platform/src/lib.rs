//! # Ember Platform
//!
//! Shared types for the Ember SSH transport.
//!
//! This crate provides:
//! - The unified error type (`EmberError`, `EmberResult`)
//! - Boundary traits the protocol core calls out to (`EventSink`)
//!
//! # Examples
//!
//! ```
//! use ember_platform::{EmberError, EmberResult};
//!
//! fn check_length(len: usize) -> EmberResult<usize> {
//!     if len > 35000 {
//!         return Err(EmberError::ResourceExhaustion { declared: len, limit: 35000 });
//!     }
//!     Ok(len)
//! }
//!
//! # fn main() -> EmberResult<()> {
//! assert_eq!(check_length(64)?, 64);
//! assert!(check_length(1 << 20).is_err());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod error;
pub mod traits;

pub use error::{EmberError, EmberResult};
pub use traits::{ConnectionEvent, EventSink, NullSink, TracingSink};

/// Platform version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
