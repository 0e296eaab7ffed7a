use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::MergeError;
use crate::geometry::BlockIndex;

/// Per-block progress through the merge pipeline. A block with no ledger
/// entry is `Pending`; `applied` is terminal until explicitly cleaned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockState {
    Pending,
    Pooled,
    Applied,
}

impl std::fmt::Display for BlockState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockState::Pending => write!(f, "pending"),
            BlockState::Pooled => write!(f, "pooled"),
            BlockState::Applied => write!(f, "applied"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LedgerEntry {
    index: BlockIndex,
    state: BlockState,
}

/// Persistent per-block status table: one JSON entry file per block, each
/// written atomically (temp file, then rename), so every observable state
/// is a state some single transition produced. The ledger is the sole
/// source of truth when a run restarts.
pub struct ProgressLedger {
    dir: PathBuf,
}

impl ProgressLedger {
    pub fn open(dir: &Path) -> Result<Self, MergeError> {
        fs::create_dir_all(dir).map_err(MergeError::Io)?;
        Ok(Self { dir: dir.to_path_buf() })
    }

    fn entry_path(&self, index: BlockIndex) -> PathBuf {
        self.dir.join(format!("block_{:04}.json", index))
    }

    fn lock_path(&self, index: BlockIndex) -> PathBuf {
        self.dir.join(format!("block_{:04}.lock", index))
    }

    pub fn state(&self, index: BlockIndex) -> Result<BlockState, MergeError> {
        let path = self.entry_path(index);
        if !path.exists() {
            return Ok(BlockState::Pending);
        }
        let raw = fs::read_to_string(&path).map_err(MergeError::Io)?;
        let entry: LedgerEntry = serde_json::from_str(&raw)?;
        Ok(entry.state)
    }

    fn write_entry(&self, index: BlockIndex, state: BlockState) -> Result<(), MergeError> {
        let entry = LedgerEntry { index, state };
        let path = self.entry_path(index);
        let tmp = self.dir.join(format!("block_{:04}.json.tmp", index));
        fs::write(&tmp, serde_json::to_string_pretty(&entry)?).map_err(MergeError::Io)?;
        fs::rename(&tmp, &path).map_err(MergeError::Io)?;
        Ok(())
    }

    /// pending -> pooled. Re-marking a pooled block is a no-op; an applied
    /// block must go through clean (or `force_pooled`) first.
    pub fn mark_pooled(&self, index: BlockIndex) -> Result<(), MergeError> {
        match self.state(index)? {
            BlockState::Pending | BlockState::Pooled => self.write_entry(index, BlockState::Pooled),
            BlockState::Applied => Err(MergeError::InvalidTransition {
                block: index,
                from: BlockState::Applied.to_string(),
                to: BlockState::Pooled.to_string(),
            }),
        }
    }

    /// Reset a block to pooled regardless of current state. Used when pool
    /// construction restarts and supersedes the pool earlier applies used.
    pub fn force_pooled(&self, index: BlockIndex) -> Result<(), MergeError> {
        self.write_entry(index, BlockState::Pooled)
    }

    /// pooled -> applied. Skipping straight from pending is rejected;
    /// re-marking an applied block is a no-op.
    pub fn mark_applied(&self, index: BlockIndex) -> Result<(), MergeError> {
        match self.state(index)? {
            BlockState::Pooled | BlockState::Applied => self.write_entry(index, BlockState::Applied),
            BlockState::Pending => Err(MergeError::InvalidTransition {
                block: index,
                from: BlockState::Pending.to_string(),
                to: BlockState::Applied.to_string(),
            }),
        }
    }

    /// Discard a block's entry, returning it to pending.
    pub fn clean(&self, index: BlockIndex) -> Result<(), MergeError> {
        let path = self.entry_path(index);
        if path.exists() {
            fs::remove_file(&path).map_err(MergeError::Io)?;
        }
        let lock = self.lock_path(index);
        if lock.exists() {
            fs::remove_file(&lock).map_err(MergeError::Io)?;
        }
        Ok(())
    }

    /// Discard every entry.
    pub fn clean_all(&self) -> Result<(), MergeError> {
        for (index, _) in self.entries()? {
            self.clean(index)?;
        }
        Ok(())
    }

    /// All recorded entries, index-sorted.
    pub fn entries(&self) -> Result<Vec<(BlockIndex, BlockState)>, MergeError> {
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.dir).map_err(MergeError::Io)? {
            let entry = entry.map_err(MergeError::Io)?;
            let path = entry.path();
            if path.extension().map_or(false, |ext| ext == "json") {
                let raw = fs::read_to_string(&path).map_err(MergeError::Io)?;
                let parsed: LedgerEntry = serde_json::from_str(&raw)?;
                out.push((parsed.index, parsed.state));
            }
        }
        out.sort_by_key(|&(index, _)| index);
        Ok(out)
    }

    /// Claim a block for exclusive processing. Returns false when another
    /// worker holds the claim. Lock creation is atomic (create-new), which
    /// serializes concurrent apply runs at block granularity.
    pub fn try_claim(&self, index: BlockIndex) -> Result<bool, MergeError> {
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.lock_path(index))
        {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(MergeError::Io(e)),
        }
    }

    pub fn release(&self, index: BlockIndex) -> Result<(), MergeError> {
        let lock = self.lock_path(index);
        if lock.exists() {
            fs::remove_file(&lock).map_err(MergeError::Io)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger() -> (tempfile::TempDir, ProgressLedger) {
        let temp_dir = tempfile::tempdir().unwrap();
        let ledger = ProgressLedger::open(&temp_dir.path().join("ledger")).unwrap();
        (temp_dir, ledger)
    }

    #[test]
    fn test_absent_entry_is_pending() {
        let (_t, ledger) = ledger();
        assert_eq!(ledger.state(0).unwrap(), BlockState::Pending);
    }

    #[test]
    fn test_normal_lifecycle() {
        let (_t, ledger) = ledger();
        ledger.mark_pooled(3).unwrap();
        assert_eq!(ledger.state(3).unwrap(), BlockState::Pooled);
        ledger.mark_applied(3).unwrap();
        assert_eq!(ledger.state(3).unwrap(), BlockState::Applied);
    }

    #[test]
    fn test_cannot_skip_pooled() {
        let (_t, ledger) = ledger();
        assert!(matches!(
            ledger.mark_applied(1),
            Err(MergeError::InvalidTransition { block: 1, .. })
        ));
    }

    #[test]
    fn test_applied_rejects_plain_repool() {
        let (_t, ledger) = ledger();
        ledger.mark_pooled(2).unwrap();
        ledger.mark_applied(2).unwrap();
        assert!(ledger.mark_pooled(2).is_err());

        ledger.force_pooled(2).unwrap();
        assert_eq!(ledger.state(2).unwrap(), BlockState::Pooled);
    }

    #[test]
    fn test_idempotent_marks() {
        let (_t, ledger) = ledger();
        ledger.mark_pooled(0).unwrap();
        ledger.mark_pooled(0).unwrap();
        ledger.mark_applied(0).unwrap();
        ledger.mark_applied(0).unwrap();
        assert_eq!(ledger.state(0).unwrap(), BlockState::Applied);
    }

    #[test]
    fn test_clean_returns_block_to_pending() {
        let (_t, ledger) = ledger();
        ledger.mark_pooled(5).unwrap();
        ledger.mark_applied(5).unwrap();
        ledger.clean(5).unwrap();
        assert_eq!(ledger.state(5).unwrap(), BlockState::Pending);
        assert!(ledger.entries().unwrap().is_empty());

        // After a clean, the full lifecycle restarts from the beginning.
        assert!(ledger.mark_applied(5).is_err());
        ledger.mark_pooled(5).unwrap();
    }

    #[test]
    fn test_entries_are_index_sorted() {
        let (_t, ledger) = ledger();
        ledger.mark_pooled(4).unwrap();
        ledger.mark_pooled(1).unwrap();
        ledger.mark_pooled(9).unwrap();
        let entries = ledger.entries().unwrap();
        let indices: Vec<u32> = entries.iter().map(|&(i, _)| i).collect();
        assert_eq!(indices, vec![1, 4, 9]);
    }

    #[test]
    fn test_claim_is_exclusive_until_released() {
        let (_t, ledger) = ledger();
        assert!(ledger.try_claim(0).unwrap());
        assert!(!ledger.try_claim(0).unwrap());
        ledger.release(0).unwrap();
        assert!(ledger.try_claim(0).unwrap());
    }

    #[test]
    fn test_clean_all() {
        let (_t, ledger) = ledger();
        ledger.mark_pooled(0).unwrap();
        ledger.mark_pooled(1).unwrap();
        ledger.clean_all().unwrap();
        assert!(ledger.entries().unwrap().is_empty());
    }
}
