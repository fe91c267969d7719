//! Byte wiping and debug poisoning.
//!
//! Zeroed payloads are part of the allocation contract: a cleanup callback
//! may observe its payload before the caller has written anything, so the
//! zeros must actually land. `zeroize` guarantees the writes are not
//! elided.

use zeroize::Zeroize;

/// Pattern written over cleared banks under the `debug` feature.
#[cfg(feature = "debug")]
pub const CLEARED_PATTERN: u8 = 0xCD;

/// Zero a byte range, with a guarantee the writes are not optimized out.
///
/// # Safety
///
/// `ptr..ptr + len` must be valid for writes.
#[inline]
pub unsafe fn wipe(ptr: *mut u8, len: usize) {
    if len > 0 {
        core::slice::from_raw_parts_mut(ptr, len).zeroize();
    }
}

/// Poison a cleared range so stale reads are recognizable in a debugger.
///
/// # Safety
///
/// `ptr..ptr + len` must be valid for writes.
#[cfg(feature = "debug")]
#[inline]
pub unsafe fn poison_cleared(ptr: *mut u8, len: usize) {
    core::ptr::write_bytes(ptr, CLEARED_PATTERN, len);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wipe_zeroes() {
        let mut buf = [0xFFu8; 64];
        unsafe { wipe(buf.as_mut_ptr(), buf.len()) };
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[cfg(feature = "debug")]
    #[test]
    fn test_poison_pattern() {
        let mut buf = [0u8; 16];
        unsafe { poison_cleared(buf.as_mut_ptr(), buf.len()) };
        assert!(buf.iter().all(|&b| b == CLEARED_PATTERN));
    }
}
