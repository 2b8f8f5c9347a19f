//! Read-only projections of the ledger.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::Serialize;

use crate::model::{Action, Block};
use crate::storage::{LedgerStore, StoreResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerStats {
    pub total_blocks: usize,
    pub files_tracked: usize,
    pub unique_uploaders: usize,
    pub actions: BTreeMap<Action, usize>,
}

/// Reads straight from the store; never appends.
#[derive(Clone)]
pub struct HistoryService {
    store: Arc<dyn LedgerStore>,
}

impl HistoryService {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    pub fn history(&self) -> StoreResult<Vec<Block>> {
        self.store.scan()
    }

    pub fn user_history(&self, uploader_id: &str) -> StoreResult<Vec<Block>> {
        self.store.find_by_uploader(uploader_id)
    }

    pub fn file_history(&self, filename: &str) -> StoreResult<Vec<Block>> {
        self.store.find_by_filename(filename)
    }

    /// Counts over every non-genesis block.
    pub fn statistics(&self) -> StoreResult<LedgerStats> {
        let blocks = self.store.scan()?;
        let mut files = BTreeSet::new();
        let mut uploaders = BTreeSet::new();
        let mut actions = BTreeMap::new();
        for b in blocks.iter().filter(|b| !b.is_genesis()) {
            files.insert(b.filename.as_str());
            if let Some(u) = b.uploader_id.as_deref() {
                uploaders.insert(u);
            }
            *actions.entry(b.action).or_insert(0) += 1;
        }
        Ok(LedgerStats {
            total_blocks: blocks.len(),
            files_tracked: files.len(),
            unique_uploaders: uploaders.len(),
            actions,
        })
    }
}
