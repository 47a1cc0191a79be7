use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::ensure;
use crate::protocol::StorageError;
use crate::storage::{OtaStorage, Slot, next_update_slot};

/// Name of the file recording the slot to boot next
const OTADATA: &str = "otadata";

/// Open write session of a [`FileStorage`].
#[derive(Debug)]
pub struct FileWriter {
    slot: Slot,
    file: File,
    part_path: PathBuf,
    declared_len: u64,
    written: u64,
}

/// Firmware slots stored as files in one directory.
///
/// Slot `ota_1` lives in `<dir>/ota_1.bin`. An image is streamed into
/// `<dir>/ota_1.bin.part` and only renamed over the slot file once it was
/// verified, so an aborted or failed write never replaces a good image.
/// `<dir>/otadata` holds the label of the slot to boot next.
#[derive(Debug)]
pub struct FileStorage {
    dir: PathBuf,
    slots: Vec<Slot>,
    running: usize,
    boot: usize,
    version: String,
    pending: bool,
}

impl FileStorage {
    /// Opens the slot directory, creating it if needed.
    ///
    /// The running slot is the one named in `otadata`, or the first slot when
    /// the file does not exist yet.
    pub async fn open<P, S, V>(dir: P, labels: &[S], capacity: u64, version: V) -> Result<Self, StorageError>
    where
        P: AsRef<Path>,
        S: AsRef<str>,
        V: Into<String>,
    {
        ensure!(!labels.is_empty(), StorageError::invalid_slot("<none>"));

        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await?;

        let slots: Vec<Slot> =
            labels.iter().enumerate().map(|(index, label)| Slot::new(label.as_ref(), index, capacity)).collect();

        let running = match fs::read_to_string(dir.join(OTADATA)).await {
            Ok(label) => slots.iter().position(|slot| slot.label() == label.trim()).unwrap_or_else(|| {
                warn!(label = label.trim(), "otadata names an unknown slot, falling back to the first slot");
                0
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => 0,
            Err(e) => return Err(e.into()),
        };

        info!(dir = %dir.display(), running = slots[running].label(), "opened slot directory");
        Ok(Self { dir, slots, running, boot: running, version: version.into(), pending: false })
    }

    /// Path of the file holding the image of `slot`
    pub fn slot_path(&self, slot: &Slot) -> PathBuf {
        self.dir.join(format!("{}.bin", slot.label()))
    }

    /// The slot the device will boot next
    pub fn boot_slot(&self) -> &Slot {
        &self.slots[self.boot]
    }

    /// The slot the device is running from
    pub fn running_slot(&self) -> &Slot {
        &self.slots[self.running]
    }

    fn resolve(&self, slot: &Slot) -> Result<usize, StorageError> {
        self.slots.iter().position(|s| s == slot).ok_or_else(|| StorageError::invalid_slot(slot.label()))
    }
}

#[async_trait]
impl OtaStorage for FileStorage {
    type Writer = FileWriter;

    fn update_target(&self) -> Option<Slot> {
        next_update_slot(&self.slots, self.running)
    }

    async fn begin_write(&mut self, slot: &Slot, declared_len: u64) -> Result<Self::Writer, StorageError> {
        let index = self.resolve(slot)?;
        ensure!(index != self.running, StorageError::invalid_slot(slot.label()));
        ensure!(!self.pending, StorageError::Busy);
        ensure!(declared_len <= slot.capacity(), StorageError::invalid_size(declared_len, slot.capacity()));

        let part_path = self.dir.join(format!("{}.bin.part", slot.label()));
        let file = File::create(&part_path).await?;
        self.pending = true;

        debug!(path = %part_path.display(), declared_len, "file write session opened");
        Ok(FileWriter { slot: slot.clone(), file, part_path, declared_len, written: 0 })
    }

    async fn write(&mut self, writer: &mut Self::Writer, bytes: &[u8]) -> Result<(), StorageError> {
        let size = writer.written + bytes.len() as u64;
        ensure!(size <= writer.slot.capacity(), StorageError::invalid_size(size, writer.slot.capacity()));

        writer.file.write_all(bytes).await?;
        writer.written = size;
        Ok(())
    }

    async fn end_write(&mut self, writer: Self::Writer) -> Result<(), StorageError> {
        self.pending = false;
        let FileWriter { slot, mut file, part_path, declared_len, written } = writer;

        let verified = async {
            file.flush().await?;
            file.sync_all().await?;
            ensure!(written != 0, StorageError::validation("empty image"));
            ensure!(
                written == declared_len,
                StorageError::validation(format!("image size {written} differs from declared {declared_len}"))
            );
            Ok::<_, StorageError>(())
        }
        .await;
        drop(file);

        if let Err(e) = verified {
            if let Err(remove_error) = fs::remove_file(&part_path).await {
                warn!(path = %part_path.display(), cause = %remove_error, "can't remove rejected image");
            }
            return Err(e);
        }

        fs::rename(&part_path, self.slot_path(&slot)).await?;
        Ok(())
    }

    async fn abort_write(&mut self, writer: Self::Writer) {
        self.pending = false;
        let FileWriter { file, part_path, .. } = writer;
        drop(file);

        if let Err(e) = fs::remove_file(&part_path).await {
            warn!(path = %part_path.display(), cause = %e, "can't remove aborted image");
        }
    }

    async fn set_boot_target(&mut self, slot: &Slot) -> Result<(), StorageError> {
        let index = self.resolve(slot)?;
        let image = fs::metadata(self.slot_path(slot)).await?;
        ensure!(image.len() > 0, StorageError::validation("slot holds no image"));

        let tmp = self.dir.join(format!("{OTADATA}.tmp"));
        fs::write(&tmp, slot.label()).await?;
        fs::rename(&tmp, self.dir.join(OTADATA)).await?;

        self.boot = index;
        Ok(())
    }

    fn running_version(&self) -> String {
        self.version.clone()
    }
}
