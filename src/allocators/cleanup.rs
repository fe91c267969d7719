//! Intrusive cleanup-callback chain.
//!
//! Nodes live in-band, inside the same reservation as the payload they
//! describe, directly above it. The chain head is swung by CAS so any
//! thread may register; running the chain is reserved to whoever owns the
//! bank's lifecycle (the swap master, or teardown).

use std::mem;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering::SeqCst};

/// Destructor callback invoked with the payload address.
pub type CleanupFn = unsafe fn(*mut u8);

/// One chain element. Disarmed nodes (null callback and data) stay linked
/// until their bank is cleared; sweeps skip them.
#[repr(C)]
pub(crate) struct CleanupNode {
    cb: AtomicPtr<()>,
    data: AtomicPtr<u8>,
    next: AtomicPtr<CleanupNode>,
}

/// Bytes a node occupies inside a reservation.
pub(crate) const NODE_BYTES: usize = mem::size_of::<CleanupNode>();

impl CleanupNode {
    /// Initialize a node in place.
    ///
    /// # Safety
    ///
    /// `addr` must be aligned for and valid to hold a `CleanupNode`.
    pub unsafe fn init(addr: usize, cb: CleanupFn, data: *mut u8) -> *mut CleanupNode {
        let node = addr as *mut CleanupNode;
        node.write(CleanupNode {
            cb: AtomicPtr::new(cb as *mut ()),
            data: AtomicPtr::new(data),
            next: AtomicPtr::new(ptr::null_mut()),
        });
        node
    }

    /// Null the callback and data so the pending sweep skips this node.
    pub fn disarm(&self) {
        self.cb.store(ptr::null_mut(), SeqCst);
        self.data.store(ptr::null_mut(), SeqCst);
    }

    pub fn data(&self) -> *mut u8 {
        self.data.load(SeqCst)
    }

    pub fn callback(&self) -> Option<CleanupFn> {
        let raw = self.cb.load(SeqCst);
        if raw.is_null() {
            None
        } else {
            // SAFETY: non-null values in `cb` are always `CleanupFn`
            Some(unsafe { mem::transmute::<*mut (), CleanupFn>(raw) })
        }
    }
}

/// Head of a bank's cleanup chain.
pub(crate) struct CleanupList {
    head: AtomicPtr<CleanupNode>,
}

impl CleanupList {
    pub const fn new() -> Self {
        Self {
            head: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// Lock-free prepend.
    pub fn push(&self, node: *mut CleanupNode) {
        let mut head = self.head.load(SeqCst);
        loop {
            // SAFETY: the node was just initialized and is not yet shared
            unsafe { (*node).next.store(head, SeqCst) };
            match self.head.compare_exchange_weak(head, node, SeqCst, SeqCst) {
                Ok(_) => return,
                Err(seen) => head = seen,
            }
        }
    }

    /// Detach the chain and fire every armed callback exactly once.
    /// Returns the number fired.
    ///
    /// # Safety
    ///
    /// Caller must be the bank's single lifecycle master, and every linked
    /// node's payload must still be valid.
    pub unsafe fn run(&self) -> usize {
        let mut node = self.head.swap(ptr::null_mut(), SeqCst);
        let mut fired = 0;
        while !node.is_null() {
            let n = &*node;
            if let Some(cb) = n.callback() {
                cb(n.data());
                fired += 1;
            }
            node = n.next.load(SeqCst);
        }
        fired
    }

    /// Find the armed node registered for `payload`.
    pub fn find(&self, payload: *mut u8) -> Option<&CleanupNode> {
        let mut node = self.head.load(SeqCst);
        while !node.is_null() {
            // SAFETY: linked nodes stay valid until the chain is detached
            let n = unsafe { &*node };
            if n.data() == payload {
                return Some(n);
            }
            node = n.next.load(SeqCst);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    static FIRE_COUNT: AtomicUsize = AtomicUsize::new(0);

    unsafe fn count_fire(_p: *mut u8) {
        FIRE_COUNT.fetch_add(1, SeqCst);
    }

    #[test]
    fn test_push_find_run() {
        FIRE_COUNT.store(0, SeqCst);
        let list = CleanupList::new();
        // usize-backed storage keeps the in-place nodes aligned
        let mut slots = [0usize; (NODE_BYTES * 2) / std::mem::size_of::<usize>()];
        let base = slots.as_mut_ptr() as usize;
        let a_payload = 0x1000 as *mut u8;
        let b_payload = 0x2000 as *mut u8;

        unsafe {
            let a = CleanupNode::init(base, count_fire, a_payload);
            let b = CleanupNode::init(base + NODE_BYTES, count_fire, b_payload);
            list.push(a);
            list.push(b);

            assert!(list.find(a_payload).is_some());
            assert!(list.find(0x3000 as *mut u8).is_none());

            // Disarmed nodes are invisible to find and skipped by run
            list.find(b_payload).unwrap().disarm();
            assert!(list.find(b_payload).is_none());

            assert_eq!(list.run(), 1);
            assert_eq!(FIRE_COUNT.load(SeqCst), 1);
            assert!(list.find(a_payload).is_none());
        }
    }
}
