//! Shared types, errors, config, backend client, and duplex-frame
//! definitions used by the `nds-gateway`, `nds-scanner`, and `nds-parser`
//! binaries.

pub mod backend;
pub mod config;
pub mod duplex;
pub mod error;
pub mod model;

pub use error::{NdsError, NdsResult};
