//! The chain manager: sole writer of the ledger and judge of its integrity.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

use crate::model::{compute_block_hash, Action, Block, Entry, GENESIS_PREVIOUS_HASH};
use crate::storage::{LedgerStore, Slot, StoreError};

#[derive(Debug, Error)]
pub enum ChainError {
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Every attempt lost the race for the next index.
    #[error("append still conflicting after {attempts} attempts")]
    AppendConflict { attempts: u32 },
}

/// Why validation rejected a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChainFault {
    /// Stored `block_hash` differs from the recomputed one.
    HashMismatch,
    /// `previous_hash` does not point at the preceding block.
    BrokenLink,
    /// Index is not the expected position.
    IndexGap,
    /// The slot exists but its stored content no longer decodes.
    Undecodable,
    /// A GENESIS action anywhere but block 0, or block 0 without one.
    GenesisMisplaced,
}

impl std::fmt::Display for ChainFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ChainFault::HashMismatch => "block hash mismatch",
            ChainFault::BrokenLink => "broken link to previous block",
            ChainFault::IndexGap => "index gap",
            ChainFault::Undecodable => "block content unreadable",
            ChainFault::GenesisMisplaced => "genesis action out of place",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub blocks_checked: u64,
    pub first_invalid_index: Option<u64>,
    pub reason: Option<ChainFault>,
}

impl ValidationReport {
    fn ok(blocks_checked: u64) -> Self {
        Self {
            valid: true,
            blocks_checked,
            first_invalid_index: None,
            reason: None,
        }
    }

    fn fault(at: u64, reason: ChainFault, blocks_checked: u64) -> Self {
        Self {
            valid: false,
            blocks_checked,
            first_invalid_index: Some(at),
            reason: Some(reason),
        }
    }
}

/// Check slot contiguity, decodability, stored index, hash integrity,
/// back-links and genesis placement, stopping at the first bad block. An
/// empty sequence has no genesis and fails at index 0.
pub fn validate_slots(slots: &[Slot]) -> ValidationReport {
    if slots.is_empty() {
        return ValidationReport::fault(0, ChainFault::IndexGap, 0);
    }
    let mut prev_hash: &str = GENESIS_PREVIOUS_HASH;
    for (pos, slot) in slots.iter().enumerate() {
        let expected = pos as u64;
        let checked = expected + 1;
        if slot.index != expected {
            return ValidationReport::fault(expected, ChainFault::IndexGap, checked);
        }
        let Some(b) = &slot.block else {
            return ValidationReport::fault(expected, ChainFault::Undecodable, checked);
        };
        if b.index != expected {
            return ValidationReport::fault(expected, ChainFault::IndexGap, checked);
        }
        if compute_block_hash(b) != b.block_hash {
            return ValidationReport::fault(expected, ChainFault::HashMismatch, checked);
        }
        if b.previous_hash != prev_hash {
            return ValidationReport::fault(expected, ChainFault::BrokenLink, checked);
        }
        if (expected == 0) != (b.action == Action::Genesis) {
            return ValidationReport::fault(expected, ChainFault::GenesisMisplaced, checked);
        }
        prev_hash = &b.block_hash;
    }
    ValidationReport::ok(slots.len() as u64)
}

/// [`validate_slots`] over blocks already in memory, each in the slot of
/// its position.
pub fn validate_blocks(blocks: &[Block]) -> ValidationReport {
    let slots: Vec<Slot> = blocks
        .iter()
        .enumerate()
        .map(|(i, b)| Slot {
            index: i as u64,
            block: Some(b.clone()),
        })
        .collect();
    validate_slots(&slots)
}

/// Result of [`ChainManager::append_unique`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Appended {
    New(Block),
    /// A REGISTER block with the same file hash already existed.
    Existing(Block),
}

/// Owns the ledger. Appends are serialized on the cached tip; the store's
/// compare-and-append catches anything that slips past the lock.
pub struct ChainManager {
    store: Arc<dyn LedgerStore>,
    tip: Mutex<Block>,
    max_attempts: u32,
}

fn now_unix() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

impl ChainManager {
    /// Load the tip from `store`, writing the genesis block if it is empty.
    pub fn open(store: Arc<dyn LedgerStore>, max_attempts: u32) -> Result<Self, ChainError> {
        let tip = match store.last()? {
            Some(last) => {
                tracing::info!(tip = last.index, "loaded ledger");
                last
            }
            None => {
                let genesis = Block::genesis(now_unix());
                match store.append(&genesis) {
                    Ok(()) => {
                        tracing::info!(block_hash = %genesis.block_hash, "created genesis block");
                        genesis
                    }
                    // Someone else initialized it first.
                    Err(StoreError::Conflict { .. }) => store
                        .last()?
                        .ok_or(ChainError::AppendConflict { attempts: 1 })?,
                    Err(e) => return Err(e.into()),
                }
            }
        };
        Ok(Self {
            store,
            tip: Mutex::new(tip),
            max_attempts: max_attempts.max(1),
        })
    }

    /// The most recently appended block.
    pub fn tip(&self) -> Block {
        self.tip.lock().clone()
    }

    /// Append a new block after the current tip.
    pub fn append(&self, entry: Entry) -> Result<Block, ChainError> {
        let mut tip = self.tip.lock();
        self.append_locked(&mut tip, entry)
    }

    /// Append a REGISTER-style entry only if no REGISTER block already holds
    /// its file hash. Check and append happen under the same lock.
    pub fn append_unique(&self, entry: Entry) -> Result<Appended, ChainError> {
        let mut tip = self.tip.lock();
        let existing = self
            .store
            .find_by_file_hash(&entry.file_hash)?
            .into_iter()
            .find(|b| b.action == Action::Register);
        if let Some(b) = existing {
            return Ok(Appended::Existing(b));
        }
        self.append_locked(&mut tip, entry).map(Appended::New)
    }

    fn append_locked(&self, tip: &mut Block, entry: Entry) -> Result<Block, ChainError> {
        for attempt in 1..=self.max_attempts {
            let block = Block::seal(
                tip.index + 1,
                now_unix(),
                entry.clone(),
                tip.block_hash.clone(),
            );
            match self.store.append(&block) {
                Ok(()) => {
                    tracing::info!(
                        index = block.index,
                        action = %block.action,
                        file_hash = %block.file_hash,
                        "appended block"
                    );
                    *tip = block.clone();
                    return Ok(block);
                }
                Err(StoreError::Conflict { expected, attempted }) => {
                    tracing::warn!(attempt, expected, attempted, "append conflict, reloading tip");
                    if let Some(last) = self.store.last()? {
                        *tip = last;
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "append failed");
                    return Err(e.into());
                }
            }
        }
        Err(ChainError::AppendConflict {
            attempts: self.max_attempts,
        })
    }

    /// Walk the persisted ledger from genesis, re-reading it from the
    /// store. Never mutates anything.
    pub fn validate(&self) -> Result<ValidationReport, ChainError> {
        let report = validate_slots(&self.store.audit()?);
        if report.valid {
            tracing::info!(blocks = report.blocks_checked, "ledger validated");
        } else {
            tracing::warn!(
                index = ?report.first_invalid_index,
                reason = ?report.reason,
                "ledger validation failed"
            );
        }
        Ok(report)
    }

    /// Non-genesis blocks carrying `file_hash`, oldest first.
    pub fn find_by_file_hash(&self, file_hash: &str) -> Result<Vec<Block>, ChainError> {
        Ok(self.store.find_by_file_hash(file_hash)?)
    }

    /// Every block, genesis included.
    pub fn all_blocks(&self) -> Result<Vec<Block>, ChainError> {
        Ok(self.store.scan()?)
    }

    /// Blocks whose `uploader_id` equals `uploader_id`, oldest first.
    pub fn blocks_by_uploader(&self, uploader_id: &str) -> Result<Vec<Block>, ChainError> {
        Ok(self.store.find_by_uploader(uploader_id)?)
    }
}
