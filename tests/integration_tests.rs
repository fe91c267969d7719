//! Integration tests for bankalloc.

use std::mem;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering::SeqCst};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use bankalloc::{ambient, FrameAllocator, RegionAllocator};

unsafe fn bytes<'a>(p: *const u8, n: usize) -> &'a [u8] {
    core::slice::from_raw_parts(p, n)
}

// ============ BANK LIFECYCLE ============

static LIFECYCLE_EVENTS: Mutex<Vec<i32>> = Mutex::new(Vec::new());

unsafe fn record_lifecycle(p: *mut u8) {
    LIFECYCLE_EVENTS.lock().unwrap().push((p as *const i32).read());
}

#[test]
fn test_bank_lifecycle_cleanup_firing() {
    let alloc = FrameAllocator::new(4096).unwrap();
    unsafe {
        let a = alloc.alloc_with_cleanup(4, record_lifecycle) as *mut i32;
        *a = 1;
        alloc.swap(true);

        let b = alloc.alloc_with_cleanup(4, record_lifecycle) as *mut i32;
        *b = 2;
        *a = 3; // a's bank is dormant, still writable

        alloc.swap(true); // clears a's bank: fires with the last value

        let c = alloc.alloc_with_cleanup(4, record_lifecycle) as *mut i32;
        *c = 4;
        *b = 5;
    }
    drop(alloc); // fires b and c, either order

    let events = LIFECYCLE_EVENTS.lock().unwrap();
    assert_eq!(events.len(), 3);
    assert_eq!(events[0], 3);
    assert!(events[1..].contains(&4));
    assert!(events[1..].contains(&5));
}

// ============ REALLOC ============

#[cfg(feature = "realloc")]
unsafe fn noop_cleanup(_p: *mut u8) {}

#[cfg(feature = "realloc")]
#[test]
fn test_realloc_with_cleanup_in_place() {
    let alloc = FrameAllocator::new(4096).unwrap();
    let p = alloc.alloc_with_cleanup(8, noop_cleanup);
    assert!(!p.is_null());

    let before = alloc.remaining();
    unsafe {
        // Shrinking in the active bank returns the block untouched, with
        // no new cleanup node registered
        assert_eq!(alloc.realloc_with_cleanup(p, 4), p);
    }
    assert_eq!(alloc.remaining(), before);
}

#[cfg(feature = "realloc")]
static CROSS_SWAP_FIRED: AtomicUsize = AtomicUsize::new(0);

#[cfg(feature = "realloc")]
unsafe fn count_cross_swap(_p: *mut u8) {
    CROSS_SWAP_FIRED.fetch_add(1, SeqCst);
}

#[cfg(feature = "realloc")]
#[test]
fn test_realloc_with_cleanup_across_swap() {
    let alloc = FrameAllocator::new(4096).unwrap();
    unsafe {
        let a = alloc.alloc_with_cleanup(4, count_cross_swap);
        ptr::copy_nonoverlapping(b"foo\0".as_ptr(), a, 4);

        alloc.swap(true);

        let moved = alloc.realloc_with_cleanup(a, 7);
        assert!(!moved.is_null());
        assert_ne!(moved, a);
        assert_eq!(alloc.bank_of_ptr(moved), Some(1));
        assert_eq!(bytes(moved, 4), b"foo\0");

        // The old node was disarmed: clearing its bank fires nothing
        alloc.swap(true);
        assert_eq!(CROSS_SWAP_FIRED.load(SeqCst), 0);

        // The fresh node fires once when the new bank is cleared
        alloc.swap(true);
        assert_eq!(CROSS_SWAP_FIRED.load(SeqCst), 1);
    }
}

// ============ KEEP PROTOCOL ============

#[cfg(feature = "realloc")]
unsafe fn copy_with_cleanup(alloc: &FrameAllocator, p: *mut u8) -> *mut u8 {
    alloc.realloc_with_cleanup(p, alloc.alloc_size(p))
}

#[cfg(feature = "realloc")]
#[test]
fn test_keep_preserves_bytes_across_swaps() {
    let alloc = FrameAllocator::new(4096).unwrap();
    unsafe {
        let mut a = alloc.alloc_with_cleanup(7, noop_cleanup);
        ptr::copy_nonoverlapping(b"foobar\0".as_ptr(), a, 7);
        alloc.keep_ptr(&mut a, Some(copy_with_cleanup)).unwrap();
        assert_eq!(alloc.stats().kept, 1);

        for _ in 0..3 {
            alloc.swap(true);
            assert!(!a.is_null());
            assert_eq!(alloc.bank_of_ptr(a), Some(alloc.active_bank_index()));
            assert_eq!(bytes(a, 7), b"foobar\0");
        }

        alloc.discard_ptr(&mut a).unwrap();
        let parked = a;
        alloc.swap(true); // entry unlinked; the slot is left alone
        assert_eq!(a, parked);
        assert_eq!(alloc.stats().kept, 0);
    }
}

#[cfg(feature = "realloc")]
#[test]
fn test_keep_with_default_copy() {
    let alloc = FrameAllocator::new(4096).unwrap();
    unsafe {
        let mut a = alloc.alloc(8);
        (a as *mut u64).write(0x00C0FFEE);
        alloc.keep_ptr(&mut a, None).unwrap();

        for _ in 0..4 {
            alloc.swap(true);
            assert_eq!(alloc.bank_of_ptr(a), Some(alloc.active_bank_index()));
            assert_eq!((a as *const u64).read(), 0x00C0FFEE);
        }
    }
}

#[cfg(feature = "realloc")]
#[test]
fn test_discard_unknown_slot() {
    let alloc = FrameAllocator::new(1024).unwrap();
    let mut never_kept: *mut u8 = ptr::null_mut();
    assert!(alloc.discard_ptr(&mut never_kept).is_err());
}

// ============ THREADED STRESS ============

#[test]
fn test_threaded_alloc_with_periodic_swaps() {
    let alloc = Arc::new(FrameAllocator::new(4 * 1024 * 1024).unwrap());
    let running = Arc::new(AtomicBool::new(true));

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let alloc = Arc::clone(&alloc);
            let running = Arc::clone(&running);
            thread::spawn(move || {
                let mut counter: u32 = 0;
                while running.load(SeqCst) {
                    let p = alloc.alloc(mem::size_of::<u32>()) as *mut u32;
                    assert!(!p.is_null(), "bank exhausted mid-stress");
                    unsafe { p.write(counter) };
                    thread::sleep(Duration::from_micros(200));
                    // Still dormant at worst: one swap fits in the window
                    unsafe { assert_eq!(p.read(), counter) };
                    counter = counter.wrapping_add(1);
                }
                counter
            })
        })
        .collect();

    for _ in 0..10 {
        thread::sleep(Duration::from_millis(60));
        unsafe { alloc.swap(true) };
    }
    running.store(false, SeqCst);

    for worker in workers {
        let iterations = worker.join().expect("worker panicked");
        assert!(iterations > 0);
    }
}

#[test]
fn test_concurrent_allocations_are_disjoint() {
    let alloc = Arc::new(FrameAllocator::new(1024 * 1024).unwrap());

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let alloc = Arc::clone(&alloc);
            thread::spawn(move || {
                let mut ptrs = Vec::with_capacity(1000);
                for _ in 0..1000 {
                    let p = alloc.alloc(4) as usize;
                    assert_ne!(p, 0);
                    ptrs.push(p);
                }
                ptrs
            })
        })
        .collect();

    let mut all: Vec<usize> = workers
        .into_iter()
        .flat_map(|w| w.join().expect("worker panicked"))
        .collect();

    for &p in &all {
        assert_eq!(alloc.bank_of_ptr(p as *const u8), Some(0));
    }

    let total = all.len();
    all.sort_unstable();
    all.dedup();
    assert_eq!(all.len(), total, "an address was handed out twice");
}

// ============ REFCOUNTED FAN-OUT ============

static FANOUT_SEEN: AtomicUsize = AtomicUsize::new(0);

unsafe fn record_fanout(p: *mut u8) {
    FANOUT_SEEN.store((p as *const u64).read() as usize, SeqCst);
}

#[test]
fn test_shared_fanout_destroys_once() {
    use bankalloc::shared;

    let p = shared::alloc_with_cleanup(8, record_fanout);
    assert!(!p.is_null());
    unsafe {
        (p as *mut u64).write(717);

        let q = shared::retain(p);
        let r = shared::retain(p);
        assert_eq!(q, p);
        assert_eq!(r, p);

        shared::release(p);
        shared::release(q);
        assert_eq!(FANOUT_SEEN.load(SeqCst), 0, "destructor ran early");
        shared::release(r);
        assert_eq!(FANOUT_SEEN.load(SeqCst), 717);
    }
}

// ============ REGION COLLABORATOR ============

static REGION_FIRED: AtomicUsize = AtomicUsize::new(0);

unsafe fn count_region(_p: *mut u8) {
    REGION_FIRED.fetch_add(1, SeqCst);
}

#[test]
fn test_region_bulk_reset() {
    let region = RegionAllocator::new(8192).unwrap();
    unsafe {
        for i in 0..8 {
            let p = region.alloc_with_cleanup(16, count_region);
            assert!(!p.is_null());
            (p as *mut u64).write(i);
        }
        region.clear();
    }
    assert_eq!(REGION_FIRED.load(SeqCst), 8);
    assert_eq!(region.remaining(), region.capacity());
}

// ============ MULTIPLE ALLOCATORS ============

#[test]
fn test_allocators_swap_independently() {
    let a = FrameAllocator::new(2048).unwrap();
    let b = FrameAllocator::new(2048).unwrap();

    let pa = a.alloc(32);
    let pb = b.alloc(32);
    assert_eq!(a.bank_of_ptr(pa), Some(0));
    assert_eq!(b.bank_of_ptr(pb), Some(0));
    assert_eq!(a.bank_of_ptr(pb), None);

    unsafe { a.swap(true) };
    assert_eq!(a.active_bank_index(), 1);
    assert_eq!(b.active_bank_index(), 0);
    assert_eq!(a.stats().epochs, 1);
    assert_eq!(b.stats().epochs, 0);
}

// ============ AMBIENT HANDLES ============

// Exactly one test drives each ambient slot; the slots are process-wide.

#[test]
fn test_ambient_frame_lifecycle() {
    ambient::frame::init(8192).unwrap();
    assert!(ambient::frame::is_installed());

    let p = ambient::frame::malloc0(32);
    assert!(!p.is_null());
    assert_eq!(ambient::frame::bank_of_ptr(p), Some(0));
    unsafe {
        assert!(bytes(p, 32).iter().all(|&b| b == 0));
        ambient::frame::swap(true);
    }
    assert_eq!(ambient::frame::stats().active_bank, 1);

    ambient::frame::destroy();
    assert!(!ambient::frame::is_installed());
}

#[test]
fn test_ambient_region_lifecycle() {
    ambient::region::init(4096).unwrap();
    assert!(ambient::region::is_installed());

    let p = ambient::region::malloc(64);
    assert!(!p.is_null());
    let stats = ambient::region::stats();
    assert!(stats.remaining < stats.capacity);

    unsafe { ambient::region::clear() };
    let stats = ambient::region::stats();
    assert_eq!(stats.remaining, stats.capacity);

    ambient::region::destroy();
    assert!(!ambient::region::is_installed());
}
