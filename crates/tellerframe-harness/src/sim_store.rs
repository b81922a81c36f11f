//! Stores for simulation.
//!
//! - [`SharedStore`]: a [`MemoryStore`] the test keeps a handle to while the
//!   endpoint runtime owns another, so oracles can inspect durable state after
//!   (or between) sessions.
//! - [`PowerCutStore`]: wraps any store and loses power after a fixed number
//!   of writes. Every write from then on fails with
//!   [`StoreError::PowerLoss`] until [`PowerCutStore::restore`] is called,
//!   which models the device rebooting with whatever reached the medium.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tellerframe_core::{Block, MemoryStore, PersistentStore, RecordKey, StoreError};

/// Cloneable handle to one in-memory store.
#[derive(Debug, Clone, Default)]
pub struct SharedStore {
    inner: Arc<Mutex<MemoryStore>>,
}

impl SharedStore {
    /// Create an erased store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryStore> {
        // A panicking test thread must not hide the store from the oracle
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Total block writes so far.
    pub fn writes(&self) -> u64 {
        self.lock().writes()
    }
}

impl PersistentStore for SharedStore {
    fn read(&self, key: RecordKey) -> Result<Block, StoreError> {
        self.lock().read(key)
    }

    fn write(&mut self, key: RecordKey, block: &Block) -> Result<(), StoreError> {
        self.lock().write(key, block)
    }
}

/// Store that stops accepting writes after a budget.
#[derive(Debug, Clone)]
pub struct PowerCutStore<S> {
    inner: S,
    writes_left: Option<u64>,
    powered: bool,
}

impl<S: PersistentStore> PowerCutStore<S> {
    /// Wrap `inner` with unlimited power.
    pub fn new(inner: S) -> Self {
        Self { inner, writes_left: None, powered: true }
    }

    /// Lose power once `writes` more writes have landed.
    pub fn cut_after(&mut self, writes: u64) {
        self.writes_left = Some(writes);
    }

    /// Power back on; writes succeed again with no budget.
    pub fn restore(&mut self) {
        self.writes_left = None;
        self.powered = true;
    }

    /// Whether the budget has been exhausted.
    pub fn is_cut(&self) -> bool {
        !self.powered
    }

    /// Underlying store.
    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: PersistentStore> PersistentStore for PowerCutStore<S> {
    fn read(&self, key: RecordKey) -> Result<Block, StoreError> {
        self.inner.read(key)
    }

    fn write(&mut self, key: RecordKey, block: &Block) -> Result<(), StoreError> {
        if self.writes_left == Some(0) {
            self.powered = false;
        }
        if !self.powered {
            return Err(StoreError::PowerLoss(key));
        }

        self.inner.write(key, block)?;
        if let Some(left) = self.writes_left.as_mut() {
            *left -= 1;
        }
        Ok(())
    }
}
