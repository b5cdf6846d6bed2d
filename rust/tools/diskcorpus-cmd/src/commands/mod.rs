//! Command implementations for diskcorpus-cmd

pub mod build;
pub mod fetch;
pub mod inspect;
pub mod purge;
