//! Allocator configuration.

use crate::util::size::{kb, mb};

/// Configuration for a [`FrameAllocator`](crate::FrameAllocator).
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Bytes per bank; the backing buffer is twice this (default: 16 MB).
    /// Rounded up to the allocation grain.
    pub bank_size: usize,

    /// Securely wipe a bank's bytes whenever it is cleared.
    ///
    /// Off by default; cleared banks are normally left as-is (payloads are
    /// zeroed individually at allocation time where the contract needs it).
    pub wipe_on_clear: bool,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            bank_size: mb(16),
            wipe_on_clear: false,
        }
    }
}

impl FrameConfig {
    /// Create a config with the given bank size.
    pub fn new(bank_size: usize) -> Self {
        Self {
            bank_size,
            ..Self::default()
        }
    }

    /// Builder pattern: set the bank size.
    pub fn with_bank_size(mut self, size: usize) -> Self {
        self.bank_size = size;
        self
    }

    /// Builder pattern: wipe banks on clear.
    pub fn with_wipe_on_clear(mut self, wipe: bool) -> Self {
        self.wipe_on_clear = wipe;
        self
    }
}

/// Configuration for a [`RegionAllocator`](crate::RegionAllocator).
#[derive(Debug, Clone)]
pub struct RegionConfig {
    /// Bytes in the region (default: 64 KB). Rounded up to the grain.
    pub region_size: usize,

    /// Securely wipe the region's bytes on `clear`.
    pub wipe_on_clear: bool,
}

impl Default for RegionConfig {
    fn default() -> Self {
        Self {
            region_size: kb(64),
            wipe_on_clear: false,
        }
    }
}

impl RegionConfig {
    /// Create a config with the given region size.
    pub fn new(region_size: usize) -> Self {
        Self {
            region_size,
            ..Self::default()
        }
    }

    /// Builder pattern: set the region size.
    pub fn with_region_size(mut self, size: usize) -> Self {
        self.region_size = size;
        self
    }

    /// Builder pattern: wipe the region on clear.
    pub fn with_wipe_on_clear(mut self, wipe: bool) -> Self {
        self.wipe_on_clear = wipe;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = FrameConfig::default();
        assert_eq!(cfg.bank_size, mb(16));
        assert!(!cfg.wipe_on_clear);
    }

    #[test]
    fn test_builders() {
        let cfg = FrameConfig::new(kb(4)).with_wipe_on_clear(true);
        assert_eq!(cfg.bank_size, kb(4));
        assert!(cfg.wipe_on_clear);

        let cfg = RegionConfig::default().with_region_size(kb(8));
        assert_eq!(cfg.region_size, kb(8));
    }
}
