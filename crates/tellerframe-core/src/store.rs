//! Block-granular persistent storage.
//!
//! Both endpoints keep their durable state in flash or EEPROM that can only
//! be written a whole block at a time. [`PersistentStore`] models exactly
//! that: every record is addressed by a [`RecordKey`] and every write carries
//! a full [`Block`], even when only one byte of it is meaningful. A record
//! that was never written reads back as an erased (all-zero) block.
//!
//! # Layout
//!
//! | Key            | Contents                                   |
//! |----------------|--------------------------------------------|
//! | `provisioned`  | byte 0 non-zero once provisioning finished |
//! | `pin`          | 8-byte card PIN                            |
//! | `uuid`         | card account UUID or vault UUID            |
//! | `ledger`       | vault `bills_left` and dispense cursor     |
//! | `bill/000-127` | one 16-byte bill record each               |

use std::{collections::HashMap, fmt};

use thiserror::Error;

/// Size of one durable block.
pub const BLOCK_SIZE: usize = 128;

/// Number of bill slots in the vault stack.
pub const BILL_SLOTS: usize = 128;

/// Address of a durable record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordKey {
    /// First-boot flag
    Provisioned,
    /// Card PIN
    Pin,
    /// Card account UUID or vault UUID
    Uuid,
    /// Vault `bills_left` and dispense cursor
    Ledger,
    /// Vault bill slot
    Bill(u8),
}

impl RecordKey {
    /// Stable string form used by keyed backends.
    pub fn name(self) -> String {
        match self {
            Self::Provisioned => "provisioned".to_string(),
            Self::Pin => "pin".to_string(),
            Self::Uuid => "uuid".to_string(),
            Self::Ledger => "ledger".to_string(),
            Self::Bill(slot) => format!("bill/{slot:03}"),
        }
    }

    /// Whether the key addresses a slot that exists.
    pub fn is_valid(self) -> bool {
        match self {
            Self::Bill(slot) => (slot as usize) < BILL_SLOTS,
            _ => true,
        }
    }

    fn check(self) -> Result<Self, StoreError> {
        if self.is_valid() { Ok(self) } else { Err(StoreError::InvalidKey(self)) }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// One full write unit.
#[derive(Clone, PartialEq, Eq)]
pub struct Block([u8; BLOCK_SIZE]);

impl Block {
    /// Contents of a block that was never written.
    pub const ERASED: Self = Self([0; BLOCK_SIZE]);

    /// Place `field` at the start of an otherwise zeroed block.
    pub fn from_field(field: &[u8]) -> Result<Self, StoreError> {
        if field.len() > BLOCK_SIZE {
            return Err(StoreError::FieldTooLarge { len: field.len(), max: BLOCK_SIZE });
        }
        let mut bytes = [0u8; BLOCK_SIZE];
        bytes[..field.len()].copy_from_slice(field);
        Ok(Self(bytes))
    }

    /// Rebuild a block read back from a backend.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StoreError> {
        let bytes: [u8; BLOCK_SIZE] =
            bytes.try_into().map_err(|_| StoreError::PartialBlock { len: bytes.len() })?;
        Ok(Self(bytes))
    }

    /// Raw block contents.
    pub fn as_bytes(&self) -> &[u8; BLOCK_SIZE] {
        &self.0
    }

    /// First `len` bytes of the block.
    pub fn field(&self, len: usize) -> &[u8] {
        &self.0[..len.min(BLOCK_SIZE)]
    }

    /// Whether the block is still erased.
    pub fn is_erased(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }
}

impl Default for Block {
    fn default() -> Self {
        Self::ERASED
    }
}

// Blocks carry PINs and bills, keep them out of logs.
impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_erased() { f.write_str("Block(erased)") } else { f.write_str("Block(..)") }
    }
}

/// Storage failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A field does not fit in one block.
    #[error("field of {len} bytes exceeds block size {max}")]
    FieldTooLarge {
        /// Field width
        len: usize,
        /// Block size
        max: usize,
    },

    /// A backend returned something other than a full block.
    #[error("partial block of {len} bytes")]
    PartialBlock {
        /// Bytes actually returned
        len: usize,
    },

    /// The key addresses a slot outside the layout.
    #[error("no such record: {0}")]
    InvalidKey(RecordKey),

    /// The device lost power before the write landed.
    #[error("power lost during write to {0}")]
    PowerLoss(RecordKey),

    /// Backend-specific failure.
    #[error("storage backend: {0}")]
    Backend(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// Durable key to block storage surviving power loss.
///
/// Writes are independent: a crash between two writes leaves the first one
/// durable and the second one absent. Callers order their writes so that
/// every intermediate state is safe.
pub trait PersistentStore {
    /// Read a record, returning an erased block if it was never written.
    fn read(&self, key: RecordKey) -> Result<Block, StoreError>;

    /// Durably replace a record.
    fn write(&mut self, key: RecordKey, block: &Block) -> Result<(), StoreError>;

    /// Whether first-boot provisioning has completed.
    fn is_provisioned(&self) -> Result<bool, StoreError> {
        Ok(self.read(RecordKey::Provisioned)?.as_bytes()[0] != 0)
    }

    /// Record that provisioning has completed. Never undone.
    fn mark_provisioned(&mut self) -> Result<(), StoreError> {
        self.write(RecordKey::Provisioned, &Block::from_field(&[1])?)
    }
}

impl<S: PersistentStore + ?Sized> PersistentStore for &mut S {
    fn read(&self, key: RecordKey) -> Result<Block, StoreError> {
        (**self).read(key)
    }

    fn write(&mut self, key: RecordKey, block: &Block) -> Result<(), StoreError> {
        (**self).write(key, block)
    }
}

/// In-memory store for tests and simulation.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    blocks: HashMap<RecordKey, Block>,
    writes: u64,
}

impl MemoryStore {
    /// Create an erased store, as shipped from manufacture.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of block writes performed.
    pub fn writes(&self) -> u64 {
        self.writes
    }
}

impl PersistentStore for MemoryStore {
    fn read(&self, key: RecordKey) -> Result<Block, StoreError> {
        let key = key.check()?;
        Ok(self.blocks.get(&key).cloned().unwrap_or_default())
    }

    fn write(&mut self, key: RecordKey, block: &Block) -> Result<(), StoreError> {
        let key = key.check()?;
        self.blocks.insert(key, block.clone());
        self.writes += 1;
        Ok(())
    }
}
