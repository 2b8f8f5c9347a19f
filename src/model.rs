//! Block data model and the canonical encoding used to hash blocks.

use serde::{Deserialize, Serialize};

use crate::crypto::sha256_hex;

/// `previous_hash` (and `file_hash`) of the genesis block.
pub const GENESIS_PREVIOUS_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// Uploader recorded on the genesis block.
pub const GENESIS_UPLOADER: &str = "system";

const GENESIS_FILENAME: &str = "genesis";

/// Domain tag prefixed to every canonical encoding.
const CODEC_TAG: &[u8] = b"fil-block-v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    Genesis,
    Register,
    Verify,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Genesis => "GENESIS",
            Action::Register => "REGISTER",
            Action::Verify => "VERIFY",
        }
    }

    fn code(self) -> u8 {
        match self {
            Action::Genesis => 0,
            Action::Register => 1,
            Action::Verify => 2,
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// 0 for genesis, then +1 per block.
    pub index: u64,
    /// Unix seconds at creation.
    pub timestamp: i64,
    pub action: Action,
    /// SHA-256 hex of the file content.
    pub file_hash: String,
    /// Name supplied with the upload; not part of file identity.
    pub filename: String,
    pub file_size: u64,
    pub uploader_id: Option<String>,
    /// `block_hash` of the preceding block, or [`GENESIS_PREVIOUS_HASH`].
    pub previous_hash: String,
    /// SHA-256 hex of [`canonical_bytes`] of this block.
    pub block_hash: String,
}

/// The caller-supplied part of a block; the chain fills in the rest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub action: Action,
    pub file_hash: String,
    pub filename: String,
    pub file_size: u64,
    pub uploader_id: Option<String>,
}

impl Block {
    /// Build a block on top of `previous_hash` and compute its hash.
    pub fn seal(index: u64, timestamp: i64, entry: Entry, previous_hash: String) -> Self {
        let mut block = Block {
            index,
            timestamp,
            action: entry.action,
            file_hash: entry.file_hash,
            filename: entry.filename,
            file_size: entry.file_size,
            uploader_id: entry.uploader_id,
            previous_hash,
            block_hash: String::new(),
        };
        block.block_hash = compute_block_hash(&block);
        block
    }

    pub fn genesis(timestamp: i64) -> Self {
        let entry = Entry {
            action: Action::Genesis,
            file_hash: GENESIS_PREVIOUS_HASH.to_string(),
            filename: GENESIS_FILENAME.to_string(),
            file_size: 0,
            uploader_id: Some(GENESIS_UPLOADER.to_string()),
        };
        Self::seal(0, timestamp, entry, GENESIS_PREVIOUS_HASH.to_string())
    }

    pub fn is_genesis(&self) -> bool {
        self.index == 0 && self.action == Action::Genesis
    }
}

fn put_str(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u64).to_be_bytes());
    out.extend_from_slice(s.as_bytes());
}

/// Canonical encoding of every field except `block_hash`.
///
/// Fields are written in declaration order. Integers are fixed-width
/// big-endian, strings are length-prefixed, and the optional uploader carries
/// a presence byte, so distinct field tuples never share an encoding.
pub fn canonical_bytes(b: &Block) -> Vec<u8> {
    let mut out = Vec::with_capacity(
        CODEC_TAG.len() + 64 + b.file_hash.len() + b.filename.len() + b.previous_hash.len(),
    );
    out.extend_from_slice(CODEC_TAG);
    out.extend_from_slice(&b.index.to_be_bytes());
    out.extend_from_slice(&b.timestamp.to_be_bytes());
    out.push(b.action.code());
    put_str(&mut out, &b.file_hash);
    put_str(&mut out, &b.filename);
    out.extend_from_slice(&b.file_size.to_be_bytes());
    match &b.uploader_id {
        Some(id) => {
            out.push(1);
            put_str(&mut out, id);
        }
        None => out.push(0),
    }
    put_str(&mut out, &b.previous_hash);
    out
}

/// SHA-256 hex of [`canonical_bytes`]. Shared by append and validation.
pub fn compute_block_hash(b: &Block) -> String {
    sha256_hex(&canonical_bytes(b))
}
