//! Firmware slot storage.
//!
//! The receiver never touches flash directly. It drives an [`OtaStorage`]
//! backend through a write session that is opened with
//! [`begin_write`](OtaStorage::begin_write) and closed by exactly one of
//! [`end_write`](OtaStorage::end_write) or [`abort_write`](OtaStorage::abort_write).
//! Both take the writer by value, so a session can't be closed twice or used
//! after it was closed.
//!
//! Two backends are provided:
//!
//! - [`MemoryStorage`]: slots held in RAM, with fault injection
//! - [`FileStorage`]: one file per slot plus an `otadata` file naming the boot slot

mod file;
mod memory;

pub use file::{FileStorage, FileWriter};
pub use memory::{Faults, MemoryStorage, MemoryWriter, StorageCall};

use async_trait::async_trait;

use crate::protocol::StorageError;

/// A firmware slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    label: String,
    index: usize,
    capacity: u64,
}

impl Slot {
    pub fn new<S: Into<String>>(label: S, index: usize, capacity: u64) -> Self {
        Self { label: label.into(), index, capacity }
    }

    /// The slot name reported to the peer, e.g. `ota_1`
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Position of the slot in the backend's slot table
    pub fn index(&self) -> usize {
        self.index
    }

    /// Maximum image size in bytes
    pub fn capacity(&self) -> u64 {
        self.capacity
    }
}

/// The storage manager consumed by the receiver.
#[async_trait]
pub trait OtaStorage: Send {
    /// An open write session on one slot.
    type Writer: Send;

    /// The slot the next image should be written to, `None` if there is no such slot.
    fn update_target(&self) -> Option<Slot>;

    /// Opens a write session on `slot`. `declared_len` is the expected image size.
    async fn begin_write(&mut self, slot: &Slot, declared_len: u64) -> Result<Self::Writer, StorageError>;

    /// Appends `bytes` to the image.
    async fn write(&mut self, writer: &mut Self::Writer, bytes: &[u8]) -> Result<(), StorageError>;

    /// Finishes the image and verifies it. The session is closed whatever the result.
    async fn end_write(&mut self, writer: Self::Writer) -> Result<(), StorageError>;

    /// Discards the image written so far.
    async fn abort_write(&mut self, writer: Self::Writer);

    /// Marks `slot` as the one to boot next.
    async fn set_boot_target(&mut self, slot: &Slot) -> Result<(), StorageError>;

    /// Version string of the running firmware.
    fn running_version(&self) -> String;
}

/// Picks the slot after the running one, wrapping around the slot table.
///
/// Returns `None` when there is only one slot, which is then always the running one.
pub(crate) fn next_update_slot(slots: &[Slot], running: usize) -> Option<Slot> {
    if slots.len() < 2 {
        return None;
    }
    slots.get((running + 1) % slots.len()).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_update_slot_wraps() {
        let slots = vec![Slot::new("ota_0", 0, 16), Slot::new("ota_1", 1, 16), Slot::new("ota_2", 2, 16)];
        assert_eq!(next_update_slot(&slots, 0).unwrap().label(), "ota_1");
        assert_eq!(next_update_slot(&slots, 2).unwrap().label(), "ota_0");
        assert!(next_update_slot(&slots[..1], 0).is_none());
    }
}
