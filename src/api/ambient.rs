//! Ambient (process-wide) allocator handles.
//!
//! A thin convenience for programs that want one allocator per process and
//! the short calling convention that goes with it. Each slot is a
//! module-owned value behind a mutex; every operation clones the installed
//! `Arc` handle out of the slot and delegates. Prefer passing
//! [`FrameAllocator`]/[`RegionAllocator`] handles explicitly on hot paths
//! and anywhere more than one allocator is in play.

use std::sync::Arc;

#[cfg(feature = "parking_lot")]
use parking_lot::Mutex;
#[cfg(not(feature = "parking_lot"))]
use std::sync::Mutex;

use crate::allocators::frame::FrameAllocator;
use crate::allocators::region::RegionAllocator;
use crate::api::error::AllocError;

static FRAME: Mutex<Option<Arc<FrameAllocator>>> = Mutex::new(None);
static REGION: Mutex<Option<Arc<RegionAllocator>>> = Mutex::new(None);

#[cfg(feature = "parking_lot")]
fn slot<T>(mutex: &Mutex<T>) -> parking_lot::MutexGuard<'_, T> {
    mutex.lock()
}

#[cfg(not(feature = "parking_lot"))]
fn slot<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().expect("ambient slot poisoned")
}

/// The ambient frame allocator.
pub mod frame {
    use super::*;
    use crate::allocators::cleanup::CleanupFn;
    #[cfg(feature = "realloc")]
    use crate::allocators::keep::CopyFn;
    use crate::api::stats::FrameStats;

    /// Install a fresh ambient allocator with `bank_size` bytes per bank.
    /// Any previously installed one is released.
    pub fn init(bank_size: usize) -> Result<(), AllocError> {
        install(Arc::new(FrameAllocator::new(bank_size)?));
        Ok(())
    }

    /// Install an existing allocator as the ambient one.
    pub fn install(alloc: Arc<FrameAllocator>) {
        *slot(&FRAME) = Some(alloc);
    }

    /// Release the ambient allocator. Cleanups for both banks run when the
    /// last outstanding handle drops (immediately, unless callers kept
    /// clones).
    pub fn destroy() {
        slot(&FRAME).take();
    }

    /// Whether an ambient allocator is installed.
    pub fn is_installed() -> bool {
        slot(&FRAME).is_some()
    }

    /// Clone the installed handle.
    ///
    /// # Panics
    ///
    /// Panics when no ambient frame allocator is installed.
    pub fn handle() -> Arc<FrameAllocator> {
        slot(&FRAME)
            .clone()
            .expect("no ambient frame allocator; call ambient::frame::init first")
    }

    /// See [`FrameAllocator::alloc`].
    pub fn malloc(size: usize) -> *mut u8 {
        handle().alloc(size)
    }

    /// See [`FrameAllocator::alloc_zeroed`].
    pub fn malloc0(size: usize) -> *mut u8 {
        handle().alloc_zeroed(size)
    }

    /// See [`FrameAllocator::alloc_with_cleanup`].
    pub fn malloc_with_cleanup(size: usize, cleanup: CleanupFn) -> *mut u8 {
        handle().alloc_with_cleanup(size, cleanup)
    }

    /// See [`FrameAllocator::swap`].
    ///
    /// # Safety
    ///
    /// Same contract: one swap master, paced swaps, two-epoch rule.
    pub unsafe fn swap(clear: bool) {
        handle().swap(clear)
    }

    /// See [`FrameAllocator::realloc`].
    ///
    /// # Safety
    ///
    /// Same contract as the method.
    #[cfg(feature = "realloc")]
    pub unsafe fn realloc(ptr: *mut u8, size: usize) -> *mut u8 {
        handle().realloc(ptr, size)
    }

    /// See [`FrameAllocator::realloc_with_cleanup`].
    ///
    /// # Safety
    ///
    /// Same contract as the method.
    #[cfg(feature = "realloc")]
    pub unsafe fn realloc_with_cleanup(ptr: *mut u8, size: usize) -> *mut u8 {
        handle().realloc_with_cleanup(ptr, size)
    }

    /// See [`FrameAllocator::keep_ptr`].
    ///
    /// # Safety
    ///
    /// Same contract as the method.
    #[cfg(feature = "realloc")]
    pub unsafe fn keep_ptr(slot: *mut *mut u8, copy: Option<CopyFn>) -> Result<(), AllocError> {
        handle().keep_ptr(slot, copy)
    }

    /// See [`FrameAllocator::discard_ptr`].
    #[cfg(feature = "realloc")]
    pub fn discard_ptr(slot: *mut *mut u8) -> Result<(), AllocError> {
        handle().discard_ptr(slot)
    }

    /// See [`FrameAllocator::bank_of_ptr`].
    pub fn bank_of_ptr(ptr: *const u8) -> Option<usize> {
        handle().bank_of_ptr(ptr)
    }

    /// See [`FrameAllocator::stats`].
    pub fn stats() -> FrameStats {
        handle().stats()
    }
}

/// The ambient region allocator.
pub mod region {
    use super::*;
    use crate::allocators::cleanup::CleanupFn;
    use crate::api::stats::RegionStats;

    /// Install a fresh ambient region of `region_size` bytes.
    pub fn init(region_size: usize) -> Result<(), AllocError> {
        install(Arc::new(RegionAllocator::new(region_size)?));
        Ok(())
    }

    /// Install an existing region as the ambient one.
    pub fn install(alloc: Arc<RegionAllocator>) {
        *slot(&REGION) = Some(alloc);
    }

    /// Release the ambient region; cleanups run when the last handle
    /// drops.
    pub fn destroy() {
        slot(&REGION).take();
    }

    /// Whether an ambient region is installed.
    pub fn is_installed() -> bool {
        slot(&REGION).is_some()
    }

    /// Clone the installed handle.
    ///
    /// # Panics
    ///
    /// Panics when no ambient region allocator is installed.
    pub fn handle() -> Arc<RegionAllocator> {
        slot(&REGION)
            .clone()
            .expect("no ambient region allocator; call ambient::region::init first")
    }

    /// See [`RegionAllocator::alloc`].
    pub fn malloc(size: usize) -> *mut u8 {
        handle().alloc(size)
    }

    /// See [`RegionAllocator::alloc_zeroed`].
    pub fn malloc0(size: usize) -> *mut u8 {
        handle().alloc_zeroed(size)
    }

    /// See [`RegionAllocator::alloc_with_cleanup`].
    pub fn malloc_with_cleanup(size: usize, cleanup: CleanupFn) -> *mut u8 {
        handle().alloc_with_cleanup(size, cleanup)
    }

    /// See [`RegionAllocator::clear`].
    ///
    /// # Safety
    ///
    /// Same contract: single master, every outstanding allocation is
    /// invalidated.
    pub unsafe fn clear() {
        handle().clear()
    }

    /// See [`RegionAllocator::stats`].
    pub fn stats() -> RegionStats {
        handle().stats()
    }
}
