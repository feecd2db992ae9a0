//! Infrastructure layer module
//!
//! Configuration loading and logging setup. Storage and embedding
//! adapters live under `crate::adapters`.

pub mod config;
pub mod logging;
