//! Public API surface.
//!
//! Configuration, errors, statistics snapshots, and the ambient
//! (process-wide) allocator handles. The allocators themselves live in
//! [`crate::allocators`].

pub mod ambient;
pub mod config;
pub mod error;
pub mod stats;
