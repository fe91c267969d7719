//! Allocator statistics snapshots.
//!
//! Snapshots are taken with plain atomic loads and are approximate under
//! concurrent allocation; they are meant for overlays and logs, not for
//! accounting.

use crate::util::size::format_bytes;

/// Point-in-time view of a frame allocator.
#[derive(Debug, Clone, Default)]
pub struct FrameStats {
    /// Bytes per bank.
    pub bank_size: usize,

    /// Index of the active bank (0 or 1).
    pub active_bank: usize,

    /// Bytes still allocatable from the active bank.
    pub active_remaining: usize,

    /// Bytes still allocatable from the dormant bank.
    pub dormant_remaining: usize,

    /// Number of completed swaps since construction.
    pub epochs: u64,

    /// Live keep-list entries (0 when the `realloc` feature is off).
    pub kept: usize,
}

impl std::fmt::Display for FrameStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "bank {} active, {} of {} free, epoch {}, {} kept",
            self.active_bank,
            format_bytes(self.active_remaining),
            format_bytes(self.bank_size),
            self.epochs,
            self.kept
        )
    }
}

/// Point-in-time view of a region allocator.
#[derive(Debug, Clone, Default)]
pub struct RegionStats {
    /// Bytes in the region.
    pub capacity: usize,

    /// Bytes still allocatable.
    pub remaining: usize,
}

impl std::fmt::Display for RegionStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} of {} free",
            format_bytes(self.remaining),
            format_bytes(self.capacity)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let stats = FrameStats {
            bank_size: 4096,
            active_bank: 1,
            active_remaining: 1024,
            dormant_remaining: 4096,
            epochs: 3,
            kept: 2,
        };
        let s = stats.to_string();
        assert!(s.contains("bank 1"));
        assert!(s.contains("epoch 3"));
    }
}
