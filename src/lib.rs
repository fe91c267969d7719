//! # bankalloc
//!
//! Allocation for workloads whose objects die together: short-lived data
//! whose end of life is a synchronization point, not an individual `free`.
//!
//! Three cooperating disciplines:
//!
//! - [`FrameAllocator`]: double-buffered frame allocator. Two banks over
//!   one buffer; lock-free bump allocation from the active bank, bulk
//!   reclamation when the banks swap, optional per-object cleanup
//!   callbacks, and an opt-in keep protocol that copies chosen objects
//!   forward across swaps.
//! - [`RegionAllocator`]: the same allocation model inside a single
//!   region, reclaimed by one `clear` call.
//! - [`shared`]: reference-counted heap blocks with atomically counted
//!   shared ownership and optional destructors.
//!
//! ## Quick start
//!
//! ```rust
//! use bankalloc::FrameAllocator;
//!
//! let alloc = FrameAllocator::new(64 * 1024).unwrap();
//!
//! // Per-frame work: allocate freely, never free
//! let scratch = alloc.alloc_zeroed(256);
//! assert!(!scratch.is_null());
//!
//! // Frame boundary: reclaim everything from two frames ago
//! unsafe { alloc.swap(true) };
//! ```
//!
//! Allocation is safe from any number of threads; swapping belongs to a
//! single master thread. An allocation lives through the epoch it was made
//! in and the next one; the keep protocol
//! ([`keep_ptr`](FrameAllocator::keep_ptr)) is the only way to stretch a
//! lifetime further.
//!
//! ## Features
//!
//! - `realloc` *(default)*: size headers on every allocation, enabling
//!   `realloc`, `realloc_with_cleanup` and the keep/discard protocol
//! - `parking_lot`: faster mutexes for the ambient handles
//! - `log`: log-crate integration for lifecycle events
//! - `debug`: poison cleared banks with `0xCD`

mod allocators;
mod api;
mod util;

pub use api::ambient;
pub use api::config::{FrameConfig, RegionConfig};
pub use api::error::AllocError;
pub use api::stats::{FrameStats, RegionStats};

pub use allocators::cleanup::CleanupFn;
pub use allocators::frame::FrameAllocator;
#[cfg(feature = "realloc")]
pub use allocators::keep::CopyFn;
pub use allocators::region::RegionAllocator;
pub use allocators::shared;
