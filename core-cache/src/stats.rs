//! Cache statistics and eviction reports

use serde::{Deserialize, Serialize};

/// Snapshot of one repository's cache directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Entry directories under the repository root
    pub entries: usize,

    /// Entries whose manifest lists a preview
    pub previews: usize,

    /// Entries whose manifest lists an original
    pub originals: usize,

    /// Directories without a readable manifest
    pub orphaned: usize,

    /// Bytes on disk, manifests included
    pub total_bytes: u64,

    /// Configured byte budget
    pub budget_bytes: u64,

    /// Unix milliseconds when the snapshot was taken
    pub calculated_at: i64,
}

impl CacheStats {
    pub fn usage_percentage(&self) -> f64 {
        if self.budget_bytes == 0 {
            return 0.0;
        }

        (self.total_bytes as f64 / self.budget_bytes as f64) * 100.0
    }

    pub fn is_over_budget(&self) -> bool {
        self.total_bytes > self.budget_bytes
    }

    /// Bytes above the budget, zero when within it.
    pub fn space_needed(&self) -> u64 {
        self.total_bytes.saturating_sub(self.budget_bytes)
    }

    pub fn average_entry_size(&self) -> u64 {
        if self.entries == 0 {
            0
        } else {
            self.total_bytes / self.entries as u64
        }
    }
}

/// Outcome of one eviction pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvictionReport {
    /// The pass was skipped because one ran within the eviction interval.
    pub throttled: bool,
    /// Directories removed for lacking a readable manifest
    pub orphans_removed: usize,
    /// Entries removed for exceeding their age threshold
    pub expired_removed: usize,
    /// Entries removed to get back under budget
    pub over_budget_removed: usize,
    pub bytes_freed: u64,
    /// Size of the repository cache after the pass
    pub remaining_bytes: u64,
}

impl EvictionReport {
    pub fn throttled() -> Self {
        Self {
            throttled: true,
            ..Self::default()
        }
    }

    pub fn removed(&self) -> usize {
        self.orphans_removed + self.expired_removed + self.over_budget_removed
    }
}

/// Outcome of a preview prefetch run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefetchReport {
    pub ready: usize,
    pub failed: usize,
}
