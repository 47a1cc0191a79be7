use async_trait::async_trait;
use tracing::{debug, warn};

use crate::ensure;
use crate::protocol::{ERR_FAIL, StorageError};
use crate::storage::{OtaStorage, Slot, next_update_slot};

/// Failures to inject into a [`MemoryStorage`].
#[derive(Debug, Clone, Default)]
pub struct Faults {
    /// `begin_write` refuses to open a session
    pub fail_begin: bool,
    /// `write` fails once the image would grow past this many bytes
    pub fail_write_after: Option<u64>,
    /// `end_write` fails verification
    pub fail_end: bool,
    /// `set_boot_target` fails
    pub fail_set_boot: bool,
}

/// A storage call as observed by [`MemoryStorage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageCall {
    Begin { slot: String, declared_len: u64 },
    Write { len: usize },
    End,
    Abort,
    SetBoot { slot: String },
}

/// Open write session of a [`MemoryStorage`].
#[derive(Debug)]
pub struct MemoryWriter {
    id: u64,
    slot: usize,
    declared_len: u64,
    staged: Vec<u8>,
}

/// Firmware slots held in RAM.
///
/// Images are staged in the writer and only copied into the slot once
/// `end_write` verified them, so an aborted session leaves the slot untouched.
/// Every call is recorded and can be inspected with [`calls`](MemoryStorage::calls).
#[derive(Debug)]
pub struct MemoryStorage {
    slots: Vec<Slot>,
    images: Vec<Vec<u8>>,
    running: usize,
    boot: usize,
    version: String,
    pending: Option<u64>,
    next_id: u64,
    faults: Faults,
    calls: Vec<StorageCall>,
}

impl MemoryStorage {
    /// Creates `count` slots named `ota_0`, `ota_1`, ... of `capacity` bytes each.
    /// The device runs from `ota_0`.
    pub fn new<S: Into<String>>(version: S, count: usize, capacity: u64) -> Self {
        let slots: Vec<Slot> = (0..count).map(|index| Slot::new(format!("ota_{index}"), index, capacity)).collect();
        Self {
            images: vec![Vec::new(); slots.len()],
            slots,
            running: 0,
            boot: 0,
            version: version.into(),
            pending: None,
            next_id: 0,
            faults: Faults::default(),
            calls: Vec::new(),
        }
    }

    pub fn with_faults(mut self, faults: Faults) -> Self {
        self.faults = faults;
        self
    }

    pub fn faults_mut(&mut self) -> &mut Faults {
        &mut self.faults
    }

    /// Every call made so far, in order
    pub fn calls(&self) -> &[StorageCall] {
        &self.calls
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    /// Number of `begin_write` calls made so far
    pub fn begin_count(&self) -> usize {
        self.calls.iter().filter(|call| matches!(call, StorageCall::Begin { .. })).count()
    }

    /// Returns true while a write session is open
    pub fn has_pending_write(&self) -> bool {
        self.pending.is_some()
    }

    /// The finalized image stored in slot `index`
    pub fn image(&self, index: usize) -> Option<&[u8]> {
        self.images.get(index).map(Vec::as_slice)
    }

    /// The slot the device will boot next
    pub fn boot_slot(&self) -> &Slot {
        &self.slots[self.boot]
    }

    /// The slot the device is running from
    pub fn running_slot(&self) -> &Slot {
        &self.slots[self.running]
    }

    fn close(&mut self, writer: &MemoryWriter) {
        if self.pending == Some(writer.id) {
            self.pending = None;
        }
    }
}

#[async_trait]
impl OtaStorage for MemoryStorage {
    type Writer = MemoryWriter;

    fn update_target(&self) -> Option<Slot> {
        next_update_slot(&self.slots, self.running)
    }

    async fn begin_write(&mut self, slot: &Slot, declared_len: u64) -> Result<Self::Writer, StorageError> {
        self.calls.push(StorageCall::Begin { slot: slot.label().to_string(), declared_len });

        ensure!(!self.faults.fail_begin, StorageError::device(ERR_FAIL, "begin refused"));
        ensure!(self.pending.is_none(), StorageError::Busy);
        let index = self.slots.iter().position(|s| s == slot).ok_or_else(|| StorageError::invalid_slot(slot.label()))?;
        ensure!(index != self.running, StorageError::invalid_slot(slot.label()));
        ensure!(declared_len <= slot.capacity(), StorageError::invalid_size(declared_len, slot.capacity()));

        let id = self.next_id;
        self.next_id += 1;
        self.pending = Some(id);
        debug!(slot = slot.label(), declared_len, "memory write session opened");
        Ok(MemoryWriter { id, slot: index, declared_len, staged: Vec::new() })
    }

    async fn write(&mut self, writer: &mut Self::Writer, bytes: &[u8]) -> Result<(), StorageError> {
        self.calls.push(StorageCall::Write { len: bytes.len() });

        let size = (writer.staged.len() + bytes.len()) as u64;
        if let Some(limit) = self.faults.fail_write_after {
            ensure!(size <= limit, StorageError::device(ERR_FAIL, "flash write failed"));
        }
        let capacity = self.slots[writer.slot].capacity();
        ensure!(size <= capacity, StorageError::invalid_size(size, capacity));

        writer.staged.extend_from_slice(bytes);
        Ok(())
    }

    async fn end_write(&mut self, writer: Self::Writer) -> Result<(), StorageError> {
        self.calls.push(StorageCall::End);
        self.close(&writer);

        ensure!(!self.faults.fail_end, StorageError::validation("injected verification failure"));
        ensure!(!writer.staged.is_empty(), StorageError::validation("empty image"));
        ensure!(
            writer.staged.len() as u64 == writer.declared_len,
            StorageError::validation(format!("image size {} differs from declared {}", writer.staged.len(), writer.declared_len))
        );

        self.images[writer.slot] = writer.staged;
        Ok(())
    }

    async fn abort_write(&mut self, writer: Self::Writer) {
        self.calls.push(StorageCall::Abort);
        if self.pending != Some(writer.id) {
            warn!(slot = self.slots[writer.slot].label(), "abort on a write session that is not open");
        }
        self.close(&writer);
    }

    async fn set_boot_target(&mut self, slot: &Slot) -> Result<(), StorageError> {
        self.calls.push(StorageCall::SetBoot { slot: slot.label().to_string() });

        ensure!(!self.faults.fail_set_boot, StorageError::device(ERR_FAIL, "otadata update failed"));
        let index = self.slots.iter().position(|s| s == slot).ok_or_else(|| StorageError::invalid_slot(slot.label()))?;
        ensure!(!self.images[index].is_empty(), StorageError::validation("slot holds no image"));

        self.boot = index;
        Ok(())
    }

    fn running_version(&self) -> String {
        self.version.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_and_commit() {
        let mut storage = MemoryStorage::new("1.0.0", 2, 64);
        let slot = storage.update_target().unwrap();
        assert_eq!(slot.label(), "ota_1");

        let mut writer = storage.begin_write(&slot, 4).await.unwrap();
        assert!(storage.has_pending_write());
        storage.write(&mut writer, b"AB").await.unwrap();
        storage.write(&mut writer, b"CD").await.unwrap();
        storage.end_write(writer).await.unwrap();
        assert!(!storage.has_pending_write());

        storage.set_boot_target(&slot).await.unwrap();
        assert_eq!(storage.image(1), Some(&b"ABCD"[..]));
        assert_eq!(storage.boot_slot().label(), "ota_1");
        assert_eq!(storage.running_slot().label(), "ota_0");
    }

    #[tokio::test]
    async fn abort_leaves_slot_untouched() {
        let mut storage = MemoryStorage::new("1.0.0", 2, 64);
        let slot = storage.update_target().unwrap();

        let mut writer = storage.begin_write(&slot, 4).await.unwrap();
        storage.write(&mut writer, b"AB").await.unwrap();
        storage.abort_write(writer).await;

        assert!(!storage.has_pending_write());
        assert_eq!(storage.image(1), Some(&b""[..]));
        assert!(storage.set_boot_target(&slot).await.is_err());
        assert_eq!(storage.boot_slot().label(), "ota_0");
    }

    #[tokio::test]
    async fn size_is_enforced() {
        let mut storage = MemoryStorage::new("1.0.0", 2, 4);
        let slot = storage.update_target().unwrap();

        let error = storage.begin_write(&slot, 5).await.unwrap_err();
        assert!(matches!(error, StorageError::InvalidSize { size: 5, capacity: 4 }));
        assert!(!storage.has_pending_write());

        let writer = storage.begin_write(&slot, 3).await.unwrap();
        let error = storage.end_write(writer).await.unwrap_err();
        assert!(matches!(error, StorageError::Validation { .. }));
        assert!(!storage.has_pending_write());
    }

    #[tokio::test]
    async fn single_slot_has_no_update_target() {
        let storage = MemoryStorage::new("1.0.0", 1, 64);
        assert!(storage.update_target().is_none());
    }

    #[tokio::test]
    async fn injected_faults() {
        let mut storage = MemoryStorage::new("1.0.0", 2, 64).with_faults(Faults { fail_write_after: Some(2), ..Faults::default() });
        let slot = storage.update_target().unwrap();

        let mut writer = storage.begin_write(&slot, 4).await.unwrap();
        storage.write(&mut writer, b"AB").await.unwrap();
        assert!(storage.write(&mut writer, b"C").await.is_err());
        storage.abort_write(writer).await;

        storage.faults_mut().fail_begin = true;
        assert_eq!(storage.begin_write(&slot, 4).await.unwrap_err().code(), ERR_FAIL);
        assert_eq!(storage.begin_count(), 2);
        assert_eq!(storage.calls().last(), Some(&StorageCall::Begin { slot: "ota_1".into(), declared_len: 4 }));
    }
}
