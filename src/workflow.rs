//! Registration and verification of uploaded files against the ledger.

use std::io::Read;
use std::str::FromStr;
use std::sync::Arc;

use thiserror::Error;

use crate::chain::{Appended, ChainError, ChainManager};
use crate::crypto::{hash_reader, ContentDigest, HashError};
use crate::model::{Action, Block, Entry};

/// What to do when content that is already registered is registered again.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DuplicatePolicy {
    /// Record another REGISTER block.
    #[default]
    Allow,
    /// Refuse with [`WorkflowError::Duplicate`].
    Reject,
    /// Write nothing and hand back the original registration.
    Ignore,
}

impl FromStr for DuplicatePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "allow" => Ok(Self::Allow),
            "reject" => Ok(Self::Reject),
            "ignore" => Ok(Self::Ignore),
            other => Err(format!("unknown duplicate policy {other:?}")),
        }
    }
}

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("no file content supplied")]
    EmptyInput,
    #[error("could not read uploaded content: {0}")]
    InputRead(String),
    #[error("file already registered in block {index}")]
    Duplicate { index: u64 },
    #[error(transparent)]
    Chain(#[from] ChainError),
}

impl From<HashError> for WorkflowError {
    fn from(e: HashError) -> Self {
        WorkflowError::InputRead(e.to_string())
    }
}

/// A hashed upload ready to be recorded.
#[derive(Debug, Clone)]
pub struct Submission {
    pub filename: String,
    pub digest: ContentDigest,
    pub uploader_id: Option<String>,
}

impl Submission {
    fn entry(self, action: Action) -> Entry {
        Entry {
            action,
            file_hash: self.digest.hash,
            filename: self.filename,
            file_size: self.digest.size,
            uploader_id: self.uploader_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    Registered(Block),
    /// Returned under [`DuplicatePolicy::Ignore`]; nothing was written.
    AlreadyRegistered(Block),
}

impl Registration {
    pub fn block(&self) -> &Block {
        match self {
            Registration::Registered(b) | Registration::AlreadyRegistered(b) => b,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verification {
    pub file_hash: String,
    /// REGISTER blocks holding this hash, oldest first. Empty means the file
    /// was never registered or has been altered.
    pub matches: Vec<Block>,
    /// The VERIFY block recording this check.
    pub audit_block: Block,
}

impl Verification {
    pub fn is_match(&self) -> bool {
        !self.matches.is_empty()
    }
}

/// Entry point for register/verify requests.
pub struct IntegrityService {
    chain: Arc<ChainManager>,
    policy: DuplicatePolicy,
}

impl IntegrityService {
    pub fn new(chain: Arc<ChainManager>, policy: DuplicatePolicy) -> Self {
        Self { chain, policy }
    }

    /// Record a REGISTER block for `sub`, subject to the duplicate policy.
    pub fn register(&self, sub: Submission) -> Result<Registration, WorkflowError> {
        if sub.digest.is_empty() {
            return Err(WorkflowError::EmptyInput);
        }
        let entry = sub.entry(Action::Register);
        match self.policy {
            DuplicatePolicy::Allow => Ok(Registration::Registered(self.chain.append(entry)?)),
            DuplicatePolicy::Reject => match self.chain.append_unique(entry)? {
                Appended::New(b) => Ok(Registration::Registered(b)),
                Appended::Existing(b) => {
                    tracing::info!(index = b.index, "rejected duplicate registration");
                    Err(WorkflowError::Duplicate { index: b.index })
                }
            },
            DuplicatePolicy::Ignore => match self.chain.append_unique(entry)? {
                Appended::New(b) => Ok(Registration::Registered(b)),
                Appended::Existing(b) => Ok(Registration::AlreadyRegistered(b)),
            },
        }
    }

    /// Look up REGISTER blocks for `sub` and record a VERIFY block either way.
    pub fn verify(&self, sub: Submission) -> Result<Verification, WorkflowError> {
        if sub.digest.is_empty() {
            return Err(WorkflowError::EmptyInput);
        }
        let matches: Vec<Block> = self
            .chain
            .find_by_file_hash(&sub.digest.hash)?
            .into_iter()
            .filter(|b| b.action == Action::Register)
            .collect();
        let file_hash = sub.digest.hash.clone();
        let audit_block = self.chain.append(sub.entry(Action::Verify))?;
        tracing::info!(
            file_hash = %file_hash,
            matched = matches.len(),
            audit_index = audit_block.index,
            "verification recorded"
        );
        Ok(Verification {
            file_hash,
            matches,
            audit_block,
        })
    }

    /// Hash `reader` to its end, then [`Self::register`].
    pub fn register_reader<R: Read>(
        &self,
        reader: R,
        filename: &str,
        uploader_id: Option<String>,
    ) -> Result<Registration, WorkflowError> {
        let digest = hash_reader(reader)?;
        self.register(Submission {
            filename: filename.to_string(),
            digest,
            uploader_id,
        })
    }

    /// Hash `reader` to its end, then [`Self::verify`].
    pub fn verify_reader<R: Read>(
        &self,
        reader: R,
        filename: &str,
        uploader_id: Option<String>,
    ) -> Result<Verification, WorkflowError> {
        let digest = hash_reader(reader)?;
        self.verify(Submission {
            filename: filename.to_string(),
            digest,
            uploader_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::sha256_hex;
    use crate::storage::{LedgerStore, MemoryStore};
    use std::io;

    fn service(policy: DuplicatePolicy) -> (Arc<MemoryStore>, Arc<ChainManager>, IntegrityService) {
        let store = Arc::new(MemoryStore::new());
        let chain = Arc::new(ChainManager::open(store.clone(), 3).unwrap());
        let svc = IntegrityService::new(chain.clone(), policy);
        (store, chain, svc)
    }

    #[test]
    fn report_scenario() {
        let (store, chain, svc) = service(DuplicatePolicy::Allow);
        let b1: &[u8] = b"%PDF-1.7 quarterly report";
        let b2: &[u8] = b"%PDF-1.7 quarterly report (edited)";

        let reg = svc
            .register_reader(b1, "report.pdf", Some("alice".into()))
            .unwrap();
        let block = reg.block().clone();
        assert_eq!(block.index, 1);
        assert_eq!(block.file_hash, sha256_hex(b1));
        assert_eq!(block.file_size, b1.len() as u64);

        let ok = svc.verify_reader(b1, "report-copy.pdf", None).unwrap();
        assert!(ok.is_match());
        assert_eq!(ok.matches, vec![block.clone()]);
        assert_eq!(ok.audit_block.action, Action::Verify);

        let bad = svc.verify_reader(b2, "report.pdf", None).unwrap();
        assert!(!bad.is_match());
        assert_eq!(bad.audit_block.file_hash, sha256_hex(b2));

        assert!(chain.validate().unwrap().valid);

        store.tamper(1, |b| {
            let c = if b.file_hash.starts_with('f') { "e" } else { "f" };
            b.file_hash.replace_range(0..1, c);
        });
        let report = chain.validate().unwrap();
        assert!(!report.valid);
        assert_eq!(report.first_invalid_index, Some(1));
    }

    #[test]
    fn empty_upload_writes_nothing() {
        let (store, _, svc) = service(DuplicatePolicy::Allow);
        assert!(matches!(
            svc.register_reader(io::empty(), "empty.txt", None),
            Err(WorkflowError::EmptyInput)
        ));
        assert!(matches!(
            svc.verify_reader(io::empty(), "empty.txt", None),
            Err(WorkflowError::EmptyInput)
        ));
        assert_eq!(store.scan().unwrap().len(), 1);
    }

    #[test]
    fn unreadable_upload_writes_nothing() {
        struct Broken;
        impl Read for Broken {
            fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::UnexpectedEof, "client went away"))
            }
        }
        let (store, _, svc) = service(DuplicatePolicy::Allow);
        assert!(matches!(
            svc.register_reader(Broken, "x.bin", None),
            Err(WorkflowError::InputRead(_))
        ));
        assert_eq!(store.scan().unwrap().len(), 1);
    }

    #[test]
    fn allow_policy_records_each_registration() {
        let (_, chain, svc) = service(DuplicatePolicy::Allow);
        let a = svc.register_reader(&b"same"[..], "a.txt", None).unwrap();
        let b = svc.register_reader(&b"same"[..], "b.txt", None).unwrap();
        assert!(matches!(a, Registration::Registered(_)));
        assert!(matches!(b, Registration::Registered(_)));
        assert_ne!(a.block().block_hash, b.block().block_hash);
        assert_eq!(chain.tip().index, 2);
        assert!(chain.validate().unwrap().valid);
    }

    #[test]
    fn reject_policy_refuses_duplicates() {
        let (_, chain, svc) = service(DuplicatePolicy::Reject);
        svc.register_reader(&b"same"[..], "a.txt", None).unwrap();
        let err = svc.register_reader(&b"same"[..], "b.txt", None).unwrap_err();
        assert!(matches!(err, WorkflowError::Duplicate { index: 1 }));
        assert_eq!(chain.tip().index, 1);
        assert!(chain.validate().unwrap().valid);
    }

    #[test]
    fn reject_policy_ignores_earlier_verify_blocks() {
        let (_, chain, svc) = service(DuplicatePolicy::Reject);
        svc.verify_reader(&b"fresh"[..], "a.txt", None).unwrap();
        let reg = svc.register_reader(&b"fresh"[..], "a.txt", None).unwrap();
        assert_eq!(reg.block().index, 2);
        assert_eq!(chain.tip().index, 2);
    }

    #[test]
    fn ignore_policy_returns_original() {
        let (_, chain, svc) = service(DuplicatePolicy::Ignore);
        let first = svc.register_reader(&b"same"[..], "a.txt", None).unwrap();
        let again = svc.register_reader(&b"same"[..], "b.txt", None).unwrap();
        assert_eq!(again, Registration::AlreadyRegistered(first.block().clone()));
        assert_eq!(chain.tip().index, 1);
    }

    #[test]
    fn policy_parses_case_insensitively() {
        assert_eq!("Reject".parse::<DuplicatePolicy>(), Ok(DuplicatePolicy::Reject));
        assert_eq!(" ignore ".parse::<DuplicatePolicy>(), Ok(DuplicatePolicy::Ignore));
        assert!("dedupe".parse::<DuplicatePolicy>().is_err());
    }
}
