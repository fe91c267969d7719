//! Single-region arena allocator.
//!
//! The frame allocator's allocation model without the double-buffering:
//! one region, one frontier, reclaimed in a single [`clear`] call. Shares
//! the bank machinery (a bank with index 0 carries no tag).
//!
//! [`clear`]: RegionAllocator::clear

use std::alloc::{alloc as sys_alloc, dealloc as sys_dealloc, Layout};
use std::mem;
use std::ptr::{self, NonNull};

#[cfg(feature = "realloc")]
use crate::allocators::bank::{read_alloc_size, write_alloc_size};
use crate::allocators::bank::{Bank, Bump, GRAIN};
use crate::allocators::cleanup::{CleanupFn, CleanupNode};
use crate::api::config::RegionConfig;
use crate::api::error::AllocError;
use crate::api::stats::RegionStats;
use crate::util::layout::align_up;
use crate::util::wipe;

/// Alignment of the backing buffer.
const AREA_ALIGN: usize = 16;

/// A bump allocator over one contiguous region, with per-object cleanup
/// callbacks and bulk reset.
///
/// Allocation is lock-free and callable from any thread; [`clear`] must be
/// driven by a single master, like a frame swap.
///
/// [`clear`]: RegionAllocator::clear
pub struct RegionAllocator {
    area: *mut u8,
    layout: Layout,
    capacity: usize,
    bank: Bank,
    wipe_on_clear: bool,
}

// SAFETY: shared state is atomic or immutable after construction; the
// backing buffer is only handed out in disjoint reservations.
unsafe impl Send for RegionAllocator {}
unsafe impl Sync for RegionAllocator {}

impl RegionAllocator {
    /// Create a region of `region_size` bytes (rounded up to the grain).
    pub fn new(region_size: usize) -> Result<Self, AllocError> {
        Self::with_config(RegionConfig::new(region_size))
    }

    /// Create a region from a full configuration.
    pub fn with_config(config: RegionConfig) -> Result<Self, AllocError> {
        let capacity = align_up(config.region_size.max(GRAIN), GRAIN);
        let layout = Layout::from_size_align(capacity, AREA_ALIGN)
            .map_err(|_| AllocError::OutOfMemory)?;

        // SAFETY: layout has non-zero size
        let area = unsafe { sys_alloc(layout) };
        if area.is_null() {
            return Err(AllocError::OutOfMemory);
        }

        let base = area as usize;
        Ok(Self {
            area,
            layout,
            capacity,
            bank: Bank::new(base, base + capacity, 0),
            wipe_on_clear: config.wipe_on_clear,
        })
    }

    /// Bytes in the region.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Allocate `size` bytes. Null when the region is full.
    pub fn alloc(&self, size: usize) -> *mut u8 {
        loop {
            match self.bank.try_bump(size, false) {
                Bump::Done(r) => {
                    #[cfg(feature = "realloc")]
                    // SAFETY: the header cell lies inside the reservation
                    unsafe {
                        write_alloc_size(r.payload, size)
                    };
                    return r.payload as *mut u8;
                }
                Bump::Full => return ptr::null_mut(),
                Bump::Contended => continue,
            }
        }
    }

    /// Allocate `size` zeroed bytes.
    pub fn alloc_zeroed(&self, size: usize) -> *mut u8 {
        let payload = self.alloc(size);
        if !payload.is_null() {
            // SAFETY: freshly reserved payload of `size` bytes
            unsafe { wipe::wipe(payload, size) };
        }
        payload
    }

    /// Allocate `size` zeroed bytes and register `cleanup` to run at the
    /// next [`clear`](Self::clear) (or at drop).
    pub fn alloc_with_cleanup(&self, size: usize, cleanup: CleanupFn) -> *mut u8 {
        loop {
            match self.bank.try_bump(size, true) {
                Bump::Done(r) => {
                    let payload = r.payload as *mut u8;
                    // SAFETY: node and payload cells lie inside the
                    // reservation
                    unsafe {
                        let node = CleanupNode::init(r.node, cleanup, payload);
                        wipe::wipe(payload, size);
                        self.bank.cleanups().push(node);
                        #[cfg(feature = "realloc")]
                        write_alloc_size(r.payload, size);
                    }
                    return payload;
                }
                Bump::Full => return ptr::null_mut(),
                Bump::Contended => continue,
            }
        }
    }

    /// Fallible variant of [`alloc`](Self::alloc).
    pub fn try_alloc(&self, size: usize) -> Option<NonNull<u8>> {
        NonNull::new(self.alloc(size))
    }

    /// Fallible variant of [`alloc_zeroed`](Self::alloc_zeroed).
    pub fn try_alloc_zeroed(&self, size: usize) -> Option<NonNull<u8>> {
        NonNull::new(self.alloc_zeroed(size))
    }

    /// Allocate room for a `T`. Fails (null) when `T` needs stricter
    /// alignment than the allocation grain.
    pub fn alloc_typed<T>(&self) -> *mut T {
        if mem::align_of::<T>() > GRAIN {
            return ptr::null_mut();
        }
        self.alloc(mem::size_of::<T>()) as *mut T
    }

    /// Whether `ptr` lies inside the region.
    pub fn contains(&self, ptr: *const u8) -> bool {
        let addr = ptr as usize;
        let base = self.area as usize;
        addr >= base && addr < base + self.capacity
    }

    /// Recorded size of an allocation made by this region.
    ///
    /// # Safety
    ///
    /// `payload` must be a live allocation returned by this region.
    #[cfg(feature = "realloc")]
    pub unsafe fn alloc_size(&self, payload: *const u8) -> usize {
        read_alloc_size(payload)
    }

    /// Grow an allocation that has no cleanup callback.
    ///
    /// Returns `ptr` unchanged when its recorded size already suffices;
    /// otherwise allocates fresh and copies the surviving bytes.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live allocation from this region. Allocations with a
    /// cleanup callback must use
    /// [`realloc_with_cleanup`](Self::realloc_with_cleanup).
    #[cfg(feature = "realloc")]
    pub unsafe fn realloc(&self, ptr: *mut u8, size: usize) -> *mut u8 {
        let old_size = read_alloc_size(ptr);
        if old_size >= size {
            return ptr;
        }

        let newp = self.alloc(size);
        if newp.is_null() {
            return ptr::null_mut();
        }
        ptr::copy_nonoverlapping(ptr, newp, old_size.min(size));
        newp
    }

    /// Reallocate an allocation registered with a cleanup callback,
    /// disarming the old node so the callback cannot fire twice.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live allocation from this region, made with
    /// [`alloc_with_cleanup`](Self::alloc_with_cleanup).
    #[cfg(feature = "realloc")]
    pub unsafe fn realloc_with_cleanup(&self, ptr: *mut u8, size: usize) -> *mut u8 {
        let old_size = read_alloc_size(ptr);
        if old_size >= size {
            return ptr;
        }

        let node = match self.bank.cleanups().find(ptr) {
            Some(node) => node,
            None => return ptr::null_mut(),
        };
        let cleanup = match node.callback() {
            Some(cb) => cb,
            None => return ptr::null_mut(),
        };

        let newp = self.alloc_with_cleanup(size, cleanup);
        if newp.is_null() {
            return ptr::null_mut();
        }
        ptr::copy_nonoverlapping(ptr, newp, old_size.min(size));
        node.disarm();
        newp
    }

    /// Run all cleanup callbacks and reset the frontier to the upper
    /// bound, reclaiming every allocation at once.
    ///
    /// # Safety
    ///
    /// Single master only, with the same registration-cadence rule as a
    /// frame swap; every outstanding allocation is invalidated.
    pub unsafe fn clear(&self) {
        let _fired = self.bank.cleanups().run();
        #[cfg(feature = "log")]
        if _fired > 0 {
            log::debug!("region cleared: {} cleanups fired", _fired);
        }
        #[cfg(feature = "debug")]
        wipe::poison_cleared(self.area, self.capacity);
        if self.wipe_on_clear {
            wipe::wipe(self.area, self.capacity);
        }
        self.bank.reset();
    }

    /// Bytes still allocatable.
    pub fn remaining(&self) -> usize {
        self.bank.remaining()
    }

    /// Snapshot of the region's state.
    pub fn stats(&self) -> RegionStats {
        RegionStats {
            capacity: self.capacity,
            remaining: self.bank.remaining(),
        }
    }
}

impl Drop for RegionAllocator {
    fn drop(&mut self) {
        // SAFETY: exclusive access; the chain points into the still-live
        // backing buffer.
        unsafe {
            self.bank.cleanups().run();
        }
        // SAFETY: allocated in with_config with this layout
        unsafe { sys_dealloc(self.area, self.layout) };
    }
}
