//! Deterministic I/O fault injection for the durable log.
//!
//! Used by rollback and recovery tests, and by chaos runs that need to
//! exercise fail-stop handling without a broken disk.

use std::io;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FaultProfile {
    /// Number of upcoming appends that fail
    pub fail_appends: u32,
    /// Bytes of the record written before an injected append failure
    pub torn_bytes: usize,
    /// Number of upcoming compactions that fail after writing the temp file
    pub fail_compactions: u32,
    /// Number of upcoming compactions that fail after the rename, before the
    /// directory sync
    pub fail_compactions_after_rename: u32,
}

impl FaultProfile {
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn fail_next_append() -> Self {
        Self {
            fail_appends: 1,
            ..Self::default()
        }
    }

    /// Next append writes `bytes` bytes of the record, then fails.
    pub fn torn_append(bytes: usize) -> Self {
        Self {
            fail_appends: 1,
            torn_bytes: bytes,
            ..Self::default()
        }
    }

    pub fn fail_next_compaction() -> Self {
        Self {
            fail_compactions: 1,
            ..Self::default()
        }
    }

    /// Next compaction swaps the file in, then fails its directory sync.
    pub fn fail_next_compaction_after_rename() -> Self {
        Self {
            fail_compactions_after_rename: 1,
            ..Self::default()
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.fail_appends == 0 && self.fail_compactions == 0 && self.fail_compactions_after_rename == 0
    }

    /// Consume one append fault; returns how many bytes to write first.
    pub fn take_append_fault(&mut self) -> Option<usize> {
        if self.fail_appends == 0 {
            return None;
        }
        self.fail_appends -= 1;
        Some(self.torn_bytes)
    }

    pub fn take_compaction_fault(&mut self) -> bool {
        if self.fail_compactions == 0 {
            return false;
        }
        self.fail_compactions -= 1;
        true
    }

    pub fn take_post_rename_fault(&mut self) -> bool {
        if self.fail_compactions_after_rename == 0 {
            return false;
        }
        self.fail_compactions_after_rename -= 1;
        true
    }
}

pub fn injected_error(what: &str) -> io::Error {
    io::Error::new(io::ErrorKind::Other, format!("injected fault: {}", what))
}
