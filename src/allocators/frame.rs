//! The double-buffered frame allocator.
//!
//! One backing buffer, split into two banks. Exactly one bank accepts
//! allocations at a time; the other holds the previous epoch's objects,
//! still readable. [`FrameAllocator::swap`] flips the roles, reclaiming the
//! incoming bank wholesale instead of freeing objects one by one.
//!
//! Allocation is lock-free and safe from any thread. Swapping must be
//! driven by a single master thread.

use std::alloc::{alloc as sys_alloc, dealloc as sys_dealloc, Layout};
use std::mem;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering::SeqCst};

#[cfg(feature = "realloc")]
use crate::allocators::bank::{read_alloc_size, write_alloc_size};
use crate::allocators::bank::{Bank, Bump, GRAIN};
use crate::allocators::cleanup::{CleanupFn, CleanupNode};
#[cfg(feature = "realloc")]
use crate::allocators::keep::{CopyFn, KeepList};
use crate::api::config::FrameConfig;
use crate::api::error::AllocError;
use crate::api::stats::FrameStats;
use crate::util::layout::align_up;
use crate::util::wipe;

/// Alignment of the backing buffer.
const AREA_ALIGN: usize = 16;

/// A double-buffered bump allocator with per-object cleanup callbacks and
/// an opt-in keep protocol.
///
/// All allocation operations take `&self` and are safe to call from any
/// number of threads concurrently. An allocation made during epoch *k*
/// stays valid through epoch *k + 1* and is reclaimed when its bank is
/// cleared at epoch *k + 2*:
///
/// ```rust
/// # let alloc = bankalloc::FrameAllocator::new(4096).unwrap();
/// let a = alloc.alloc(4) as *mut u32;
/// unsafe { *a = 1 };                  // ok
/// unsafe { alloc.swap(true) };
/// let b = alloc.alloc(4) as *mut u32;
/// unsafe { *b = 2 };                  // ok
/// unsafe { *a = 3 };                  // ok, a's bank is dormant
/// unsafe { alloc.swap(true) };
/// let c = alloc.alloc(4) as *mut u32;
/// unsafe { *c = 4 };                  // ok
/// unsafe { *b = 5 };                  // ok
/// // *a is gone: its bank was cleared by the second swap
/// ```
///
/// Use [`keep_ptr`](Self::keep_ptr) to carry an object across that
/// boundary. Use-after-swap is not detected; the two-epoch rule is the
/// caller's responsibility.
pub struct FrameAllocator {
    area: *mut u8,
    layout: Layout,
    bank_size: usize,
    banks: [Bank; 2],
    /// Index of the bank currently accepting allocations. Written only by
    /// the swap master.
    active: AtomicUsize,
    epochs: AtomicU64,
    wipe_on_clear: bool,
    #[cfg(feature = "realloc")]
    keep: KeepList,
}

// SAFETY: shared state is atomic or immutable after construction; the
// backing buffer is only handed out in disjoint reservations.
unsafe impl Send for FrameAllocator {}
unsafe impl Sync for FrameAllocator {}

impl FrameAllocator {
    /// Create an allocator with two banks of `bank_size` bytes each.
    ///
    /// The backing buffer is one contiguous allocation of twice that size;
    /// `bank_size` is rounded up to the allocation grain.
    pub fn new(bank_size: usize) -> Result<Self, AllocError> {
        Self::with_config(FrameConfig::new(bank_size))
    }

    /// Create an allocator from a full configuration.
    pub fn with_config(config: FrameConfig) -> Result<Self, AllocError> {
        let bank_size = align_up(config.bank_size.max(GRAIN), GRAIN);
        let layout = Layout::from_size_align(bank_size * 2, AREA_ALIGN)
            .map_err(|_| AllocError::OutOfMemory)?;

        // SAFETY: layout has non-zero size
        let area = unsafe { sys_alloc(layout) };
        if area.is_null() {
            return Err(AllocError::OutOfMemory);
        }

        let base = area as usize;
        let banks = [
            Bank::new(base, base + bank_size, 0),
            Bank::new(base + bank_size, base + 2 * bank_size, 1),
        ];

        #[cfg(feature = "log")]
        log::debug!("frame allocator ready: 2 x {} bytes, bank 0 active", bank_size);

        Ok(Self {
            area,
            layout,
            bank_size,
            banks,
            active: AtomicUsize::new(0),
            epochs: AtomicU64::new(0),
            wipe_on_clear: config.wipe_on_clear,
            #[cfg(feature = "realloc")]
            keep: KeepList::new(),
        })
    }

    /// Bytes per bank.
    pub fn bank_size(&self) -> usize {
        self.bank_size
    }

    /// Index of the bank currently accepting allocations.
    pub fn active_bank_index(&self) -> usize {
        self.active.load(SeqCst) & 1
    }

    #[inline]
    fn active_bank(&self) -> &Bank {
        &self.banks[self.active.load(SeqCst) & 1]
    }

    /// Allocate `size` bytes from the active bank.
    ///
    /// Returns null when the bank cannot satisfy the request. The returned
    /// memory is uninitialized and word-aligned.
    pub fn alloc(&self, size: usize) -> *mut u8 {
        loop {
            // Re-read the handle every round: a swap may have republished
            // the active bank between attempts.
            let bank = self.active_bank();
            match bank.try_bump(size, false) {
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

    /// Allocate `size` zeroed bytes from the active bank.
    pub fn alloc_zeroed(&self, size: usize) -> *mut u8 {
        let payload = self.alloc(size);
        if !payload.is_null() {
            // SAFETY: freshly reserved payload of `size` bytes
            unsafe { wipe::wipe(payload, size) };
        }
        payload
    }

    /// Allocate `size` zeroed bytes and register `cleanup` to run when the
    /// bank is cleared (or at drop).
    ///
    /// The callback receives the payload address and fires exactly once,
    /// unless disarmed by [`realloc_with_cleanup`](Self::realloc_with_cleanup).
    pub fn alloc_with_cleanup(&self, size: usize, cleanup: CleanupFn) -> *mut u8 {
        loop {
            let bank = self.active_bank();
            match bank.try_bump(size, true) {
                Bump::Done(r) => {
                    let payload = r.payload as *mut u8;
                    // SAFETY: node and payload cells lie inside the
                    // reservation; the node is linked only after both are
                    // initialized.
                    unsafe {
                        let node = CleanupNode::init(r.node, cleanup, payload);
                        wipe::wipe(payload, size);
                        bank.cleanups().push(node);
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

    /// Which bank holds `ptr`: `Some(0)`, `Some(1)`, or `None` for
    /// pointers outside the backing buffer.
    pub fn bank_of_ptr(&self, ptr: *const u8) -> Option<usize> {
        let addr = ptr as usize;
        let base = self.area as usize;
        if addr < base || addr >= base + 2 * self.bank_size {
            return None;
        }
        Some((addr - base) / self.bank_size)
    }

    /// Recorded size of an allocation made by this allocator.
    ///
    /// # Safety
    ///
    /// `payload` must be a live allocation returned by this allocator.
    #[cfg(feature = "realloc")]
    pub unsafe fn alloc_size(&self, payload: *const u8) -> usize {
        read_alloc_size(payload)
    }

    /// Grow or shrink an allocation that has no cleanup callback.
    ///
    /// Returns `ptr` unchanged when it already lives in the active bank
    /// with enough room; otherwise allocates fresh in the active bank and
    /// copies the surviving bytes. Null when the active bank is full.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live allocation from this allocator. Allocations
    /// carrying a cleanup callback must go through
    /// [`realloc_with_cleanup`](Self::realloc_with_cleanup) instead, or
    /// their callback will fire on the stale copy.
    #[cfg(feature = "realloc")]
    pub unsafe fn realloc(&self, ptr: *mut u8, size: usize) -> *mut u8 {
        let old_size = read_alloc_size(ptr);
        if self.bank_of_ptr(ptr) == Some(self.active_bank_index()) && old_size >= size {
            return ptr;
        }

        let newp = self.alloc(size);
        if newp.is_null() {
            return ptr::null_mut();
        }
        ptr::copy_nonoverlapping(ptr, newp, old_size.min(size));
        newp
    }

    /// Reallocate an allocation registered with a cleanup callback.
    ///
    /// When a copy is made, a fresh cleanup node carrying the same callback
    /// is registered in the active bank and the old node is disarmed, so
    /// the pending sweep of the old bank will not fire the callback on the
    /// stale copy. Returns null when the pointer has no armed cleanup node
    /// or the active bank is full.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live allocation from this allocator, made with
    /// [`alloc_with_cleanup`](Self::alloc_with_cleanup).
    #[cfg(feature = "realloc")]
    pub unsafe fn realloc_with_cleanup(&self, ptr: *mut u8, size: usize) -> *mut u8 {
        let old_size = read_alloc_size(ptr);
        let home = match self.bank_of_ptr(ptr) {
            Some(bank) => bank,
            None => return ptr::null_mut(),
        };
        if home == self.active_bank_index() && old_size >= size {
            return ptr;
        }

        let node = match self.banks[home].cleanups().find(ptr) {
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

    /// Swap the active bank.
    ///
    /// With `clear`, the incoming bank's cleanup callbacks run and its
    /// frontier resets before the bank is published; every object allocated
    /// there two epochs ago is reclaimed. Kept objects are then copied
    /// forward into the newly active bank and their slots rewritten.
    ///
    /// Swapping is concurrent with allocation: an allocator that loses the
    /// race simply retries and lands in the new bank.
    ///
    /// # Safety
    ///
    /// - Exactly one thread may drive swaps.
    /// - Enough real time must pass between consecutive swaps for every
    ///   in-flight [`alloc_with_cleanup`](Self::alloc_with_cleanup) to
    ///   finish linking its node. Do not swap in a tight loop.
    /// - Clearing reclaims objects allocated two epochs ago; the caller
    ///   must not touch them afterwards (not detected, per the two-epoch
    ///   contract).
    pub unsafe fn swap(&self, clear: bool) {
        let target_index = self.active_bank_index() ^ 1;
        let target = &self.banks[target_index];

        #[cfg(feature = "log")]
        log::debug!("activating bank {}", target_index);

        if clear {
            let _fired = target.cleanups().run();
            #[cfg(feature = "log")]
            if _fired > 0 {
                log::debug!("bank {}: {} cleanups fired", target_index, _fired);
            }
            #[cfg(feature = "debug")]
            wipe::poison_cleared(target.floor() as *mut u8, self.bank_size);
            if self.wipe_on_clear {
                wipe::wipe(target.floor() as *mut u8, self.bank_size);
            }
            target.reset();
        }

        self.active.store(target_index, SeqCst);
        self.epochs.fetch_add(1, SeqCst);

        // Copies land in the bank published above.
        #[cfg(feature = "realloc")]
        {
            let _copied = self.keep.sweep(self);
            #[cfg(feature = "log")]
            if _copied > 0 {
                log::debug!("keep list: {} objects copied forward", _copied);
            }
        }
    }

    /// Enroll `slot` in the keep protocol: at every swap, `*slot` is
    /// rewritten with a copy of its pointee made in the newly active bank.
    ///
    /// Without a copy function the pointee is moved with
    /// [`realloc`](Self::realloc), byte-for-byte at its recorded size; pass
    /// `copy` to transfer cleanup callbacks or deep structure.
    ///
    /// # Safety
    ///
    /// `slot` must stay valid and hold either null or a live allocation
    /// from this allocator until discarded (and one further swap) or the
    /// allocator is dropped. Only the swap master writes through it during
    /// a sweep; the caller must not race those writes. Enroll an object
    /// during the epoch it was allocated in: a pointee already dormant at
    /// the next swap is copied out of a bank that was just cleared.
    #[cfg(feature = "realloc")]
    pub unsafe fn keep_ptr(&self, slot: *mut *mut u8, copy: Option<CopyFn>) -> Result<(), AllocError> {
        self.keep.enroll(slot, copy)
    }

    /// Withdraw `slot` from the keep protocol. The entry is dropped at the
    /// next swap; from that point the two-epoch rule applies to the pointee
    /// again.
    #[cfg(feature = "realloc")]
    pub fn discard_ptr(&self, slot: *mut *mut u8) -> Result<(), AllocError> {
        self.keep.discard(slot)
    }

    /// Bytes still allocatable from the active bank.
    pub fn remaining(&self) -> usize {
        self.active_bank().remaining()
    }

    /// Snapshot of the allocator's state.
    pub fn stats(&self) -> FrameStats {
        let active = self.active_bank_index();
        FrameStats {
            bank_size: self.bank_size,
            active_bank: active,
            active_remaining: self.banks[active].remaining(),
            dormant_remaining: self.banks[active ^ 1].remaining(),
            epochs: self.epochs.load(SeqCst),
            kept: self.kept_len(),
        }
    }

    #[cfg(feature = "realloc")]
    fn kept_len(&self) -> usize {
        self.keep.len()
    }

    #[cfg(not(feature = "realloc"))]
    fn kept_len(&self) -> usize {
        0
    }
}

impl Drop for FrameAllocator {
    fn drop(&mut self) {
        // SAFETY: exclusive access; both chains point into the still-live
        // backing buffer.
        unsafe {
            self.banks[0].cleanups().run();
            self.banks[1].cleanups().run();
        }

        #[cfg(feature = "realloc")]
        self.keep.dispose();

        #[cfg(feature = "log")]
        log::debug!(
            "frame allocator destroyed after {} epochs",
            self.epochs.load(SeqCst)
        );

        // SAFETY: allocated in with_config with this layout
        unsafe { sys_dealloc(self.area, self.layout) };
    }
}
