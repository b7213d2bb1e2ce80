//! Common types and primitives shared across the `taskmeta` crates.
#![deny(warnings)]
#![deny(missing_docs)]

pub mod cache;
pub mod hash;
