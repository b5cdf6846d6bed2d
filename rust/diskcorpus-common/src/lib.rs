//! Core definitions shared by all diskcorpus-* crates: the error type, result helpers
//! and the task spawning shims.

pub mod async_runtime;
pub mod error;
pub mod result;

pub use result::Result;
