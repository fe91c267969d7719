//! Reference-counted heap blocks.
//!
//! Each block carries its bookkeeping in a header reached by negative
//! offset from the payload: the `u32` directly below the payload holds the
//! reference count in its upper 31 bits and a has-destructor flag in its
//! low bit, so [`retain`]/[`release`] step the word by 2 and never disturb
//! the flag. Below that sit the recorded payload size and, for blocks made
//! with [`alloc_with_cleanup`], the destructor pointer.
//!
//! There is no allocator object; blocks live on the system heap and free
//! themselves when the last reference is released.

use std::alloc::{alloc as sys_alloc, dealloc as sys_dealloc, Layout};
use std::mem;
use std::ptr;
use std::sync::atomic::{AtomicU32, Ordering::SeqCst};

use crate::allocators::cleanup::CleanupFn;
use crate::util::wipe;

/// Payload alignment.
const ALIGN: usize = 8;

/// One reference, expressed in refcount-word steps.
const UNIT: u32 = 1 << 1;

/// Low bit of the refcount word: a destructor slot precedes the header.
const HAS_CLEANUP: u32 = 1;

/// Header bytes directly below the payload: `[size u32][refcount u32]`.
const BASE_HEADER: usize = mem::size_of::<u32>() * 2;

/// Additional bytes for the destructor slot.
const CLEANUP_SLOT: usize = mem::size_of::<usize>();

#[inline]
unsafe fn refcount(payload: *const u8) -> &'static AtomicU32 {
    &*((payload as usize - mem::size_of::<u32>()) as *const AtomicU32)
}

#[inline]
unsafe fn stored_size(payload: *const u8) -> usize {
    ((payload as usize - BASE_HEADER) as *const u32).read() as usize
}

/// Allocate a block with one reference. Null on heap exhaustion.
pub fn alloc(size: usize) -> *mut u8 {
    if size > u32::MAX as usize {
        return ptr::null_mut();
    }
    let total = match size.checked_add(BASE_HEADER) {
        Some(t) => t,
        None => return ptr::null_mut(),
    };
    let layout = match Layout::from_size_align(total, ALIGN) {
        Ok(l) => l,
        Err(_) => return ptr::null_mut(),
    };

    // SAFETY: layout has non-zero size
    let base = unsafe { sys_alloc(layout) };
    if base.is_null() {
        return ptr::null_mut();
    }

    // SAFETY: header cells lie inside the fresh allocation
    unsafe {
        (base as *mut u32).write(size as u32);
        (base.add(mem::size_of::<u32>()) as *mut u32).write(UNIT);
        base.add(BASE_HEADER)
    }
}

/// Allocate a zeroed block with one reference.
pub fn alloc_zeroed(size: usize) -> *mut u8 {
    let payload = alloc(size);
    if !payload.is_null() {
        // SAFETY: fresh payload of `size` bytes
        unsafe { wipe::wipe(payload, size) };
    }
    payload
}

/// Allocate a block with one reference and a destructor that runs when the
/// count returns to zero. The destructor receives the payload address.
pub fn alloc_with_cleanup(size: usize, cleanup: CleanupFn) -> *mut u8 {
    if size > u32::MAX as usize {
        return ptr::null_mut();
    }
    let total = match size.checked_add(BASE_HEADER + CLEANUP_SLOT) {
        Some(t) => t,
        None => return ptr::null_mut(),
    };
    let layout = match Layout::from_size_align(total, ALIGN) {
        Ok(l) => l,
        Err(_) => return ptr::null_mut(),
    };

    // SAFETY: layout has non-zero size
    let base = unsafe { sys_alloc(layout) };
    if base.is_null() {
        return ptr::null_mut();
    }

    // SAFETY: slot and header cells lie inside the fresh allocation
    unsafe {
        (base as *mut usize).write(cleanup as usize);
        (base.add(CLEANUP_SLOT) as *mut u32).write(size as u32);
        (base.add(CLEANUP_SLOT + mem::size_of::<u32>()) as *mut u32).write(UNIT | HAS_CLEANUP);
        base.add(CLEANUP_SLOT + BASE_HEADER)
    }
}

/// Take another reference on `payload`.
///
/// Returns null when the count has already reached zero, i.e. another
/// thread is completing destruction.
///
/// # Safety
///
/// `payload` must point at memory laid out by [`alloc`] or
/// [`alloc_with_cleanup`] that has not yet been deallocated.
pub unsafe fn retain(payload: *mut u8) -> *mut u8 {
    let rc = refcount(payload);
    let mut cur = rc.load(SeqCst);
    loop {
        if cur >> 1 == 0 {
            return ptr::null_mut();
        }
        match rc.compare_exchange_weak(cur, cur + UNIT, SeqCst, SeqCst) {
            Ok(_) => return payload,
            Err(seen) => cur = seen,
        }
    }
}

/// Drop a reference on `payload`. When the count reaches zero, the
/// destructor (if any) runs and the block is freed.
///
/// Releasing a block whose count is already zero is a no-op.
///
/// # Safety
///
/// `payload` must have been returned by [`alloc`] or
/// [`alloc_with_cleanup`], with this release matched to a reference the
/// caller owns.
pub unsafe fn release(payload: *mut u8) {
    let rc = refcount(payload);
    let mut cur = rc.load(SeqCst);
    loop {
        if cur >> 1 == 0 {
            return;
        }
        match rc.compare_exchange_weak(cur, cur - UNIT, SeqCst, SeqCst) {
            Ok(_) => break,
            Err(seen) => cur = seen,
        }
    }
    if (cur - UNIT) >> 1 != 0 {
        return;
    }

    // Last reference gone: destroy and free from the block's true base.
    let size = stored_size(payload);
    if cur & HAS_CLEANUP != 0 {
        let base = (payload as usize - BASE_HEADER - CLEANUP_SLOT) as *mut u8;
        let dtor: CleanupFn = mem::transmute((base as *const usize).read());
        dtor(payload);
        let layout = Layout::from_size_align_unchecked(size + BASE_HEADER + CLEANUP_SLOT, ALIGN);
        sys_dealloc(base, layout);
    } else {
        let base = (payload as usize - BASE_HEADER) as *mut u8;
        let layout = Layout::from_size_align_unchecked(size + BASE_HEADER, ALIGN);
        sys_dealloc(base, layout);
    }
}
