//! Keep list: caller-held pointer slots whose pointees are copied forward
//! into the newly active bank at every swap.
//!
//! Nodes are heap allocations, outside either bank, so they survive swaps.
//! Enrollment prepends with CAS from any thread; removal is reserved to the
//! swap master. A removed node may still be in sight of a concurrent
//! `discard_ptr` traversal, so its memory is retired to a queue and freed
//! only at teardown.

use std::alloc::{alloc as sys_alloc, dealloc as sys_dealloc, Layout};
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering::SeqCst};

use crossbeam_queue::SegQueue;

use crate::allocators::frame::FrameAllocator;
use crate::api::error::AllocError;

/// Copy callback for kept objects: given the allocator and the old payload,
/// return the payload's new home in the active bank.
pub type CopyFn = unsafe fn(&FrameAllocator, *mut u8) -> *mut u8;

#[repr(C)]
struct KeepNode {
    /// The caller's pointer slot; null once discarded.
    slot: AtomicPtr<*mut u8>,
    copy: Option<CopyFn>,
    next: AtomicPtr<KeepNode>,
}

/// An unlinked node pending reclamation.
struct Retired(*mut KeepNode);

// SAFETY: ownership of the node memory moves with the queue entry
unsafe impl Send for Retired {}

pub(crate) struct KeepList {
    head: AtomicPtr<KeepNode>,
    retired: SegQueue<Retired>,
    live: AtomicUsize,
}

// SAFETY: all fields are lock-free structures
unsafe impl Send for KeepList {}
unsafe impl Sync for KeepList {}

impl KeepList {
    pub fn new() -> Self {
        Self {
            head: AtomicPtr::new(ptr::null_mut()),
            retired: SegQueue::new(),
            live: AtomicUsize::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.live.load(SeqCst)
    }

    /// Enroll a pointer slot.
    pub fn enroll(&self, slot: *mut *mut u8, copy: Option<CopyFn>) -> Result<(), AllocError> {
        let layout = Layout::new::<KeepNode>();
        // SAFETY: KeepNode has non-zero size
        let node = unsafe { sys_alloc(layout) } as *mut KeepNode;
        if node.is_null() {
            return Err(AllocError::OutOfMemory);
        }
        // SAFETY: fresh allocation, not yet shared
        unsafe {
            node.write(KeepNode {
                slot: AtomicPtr::new(slot),
                copy,
                next: AtomicPtr::new(ptr::null_mut()),
            });
        }

        let mut head = self.head.load(SeqCst);
        loop {
            // SAFETY: node is still exclusively ours until the CAS lands
            unsafe { (*node).next.store(head, SeqCst) };
            match self.head.compare_exchange_weak(head, node, SeqCst, SeqCst) {
                Ok(_) => break,
                Err(seen) => head = seen,
            }
        }
        self.live.fetch_add(1, SeqCst);
        Ok(())
    }

    /// Null out the entry for `slot`. The node itself is unlinked and
    /// retired at the next sweep.
    pub fn discard(&self, slot: *mut *mut u8) -> Result<(), AllocError> {
        let mut cur = self.head.load(SeqCst);
        while !cur.is_null() {
            // SAFETY: linked nodes are only reclaimed at teardown
            let node = unsafe { &*cur };
            if node.slot.load(SeqCst) == slot {
                node.slot.store(ptr::null_mut(), SeqCst);
                return Ok(());
            }
            cur = node.next.load(SeqCst);
        }
        Err(AllocError::NotFound)
    }

    /// Copy every live entry's pointee forward and rewrite its slot; unlink
    /// and retire discarded entries. Returns the number of copies made.
    ///
    /// # Safety
    ///
    /// Swap-master only. Every live slot must still point at a valid slot
    /// location, and every pointee must carry a size header.
    pub unsafe fn sweep(&self, alloc: &FrameAllocator) -> usize {
        let mut copied = 0;
        let mut prev: *mut KeepNode = ptr::null_mut();
        let mut cur = self.head.load(SeqCst);
        while !cur.is_null() {
            let node = &*cur;
            let next = node.next.load(SeqCst);
            let slot = node.slot.load(SeqCst);
            if slot.is_null() {
                self.unlink(prev, cur, next);
                self.retired.push(Retired(cur));
                self.live.fetch_sub(1, SeqCst);
            } else {
                let old = *slot;
                if !old.is_null() {
                    let moved = match node.copy {
                        Some(copy) => copy(alloc, old),
                        None => alloc.realloc(old, alloc.alloc_size(old)),
                    };
                    *slot = moved;
                    copied += 1;
                }
                prev = cur;
            }
            cur = next;
        }
        copied
    }

    /// Unlink `cur` (successor `next`) following `prev`. Only the sweep
    /// removes nodes; concurrent enrollments only swing the head.
    unsafe fn unlink(&self, prev: *mut KeepNode, cur: *mut KeepNode, next: *mut KeepNode) {
        if !prev.is_null() {
            (*prev).next.store(next, SeqCst);
            return;
        }
        if self.head.compare_exchange(cur, next, SeqCst, SeqCst).is_ok() {
            return;
        }
        // Lost to a concurrent enrollment: cur is interior now.
        let mut walk = self.head.load(SeqCst);
        while !walk.is_null() {
            if (*walk).next.load(SeqCst) == cur {
                (*walk).next.store(next, SeqCst);
                return;
            }
            walk = (*walk).next.load(SeqCst);
        }
    }

    /// Free every node, linked or retired. Exclusive access required.
    pub fn dispose(&mut self) {
        let layout = Layout::new::<KeepNode>();
        let mut cur = self.head.swap(ptr::null_mut(), SeqCst);
        while !cur.is_null() {
            // SAFETY: exclusive access; nodes came from enroll
            unsafe {
                let next = (*cur).next.load(SeqCst);
                sys_dealloc(cur as *mut u8, layout);
                cur = next;
            }
        }
        while let Some(Retired(node)) = self.retired.pop() {
            // SAFETY: retired nodes are unlinked and unreachable
            unsafe { sys_dealloc(node as *mut u8, layout) };
        }
        self.live.store(0, SeqCst);
    }
}
