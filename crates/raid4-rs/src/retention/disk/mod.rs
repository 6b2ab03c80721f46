
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::layout::address::stripe_byte_offset;
use crate::retention::checkpoint;

/// Disk is the storage owned by one worker process. It starts zeroed, only
/// WRITE commands mutate it, and it never leaves the process except as a
/// checkpoint.
pub struct Disk {
    id: usize,
    block_size: usize,
    storage: Vec<u8>,
}

impl Disk {
    /// `allocate` reserves and zeroes `capacity` bytes for disk `id`.
    ///
    /// # Errors
    /// Returns `Allocation` if the buffer cannot be reserved, or `Config`
    /// if `block_size` is zero.
    pub fn allocate(id: usize, capacity: usize, block_size: usize) -> Result<Self> {
        if block_size == 0 {
            return Err(Error::Config("block size must be non-zero".into()));
        }
        let mut storage = Vec::new();
        storage
            .try_reserve_exact(capacity)
            .map_err(|_| Error::Allocation {
                what: "disk storage",
                bytes: capacity,
            })?;
        storage.resize(capacity, 0);
        Ok(Self {
            id,
            block_size,
            storage,
        })
    }

    #[must_use]
    pub const fn id(&self) -> usize {
        self.id
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.storage.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    #[must_use]
    pub const fn block_size(&self) -> usize {
        self.block_size
    }

    #[must_use]
    pub fn stripes(&self) -> usize {
        self.storage.len() / self.block_size
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.storage
    }

    fn span(&self, stripe: i32) -> Result<std::ops::Range<usize>> {
        let stripes = self.stripes();
        let out_of_range = || Error::StripeOutOfRange {
            stripe: i64::from(stripe),
            stripes: i64::try_from(stripes).unwrap_or(i64::MAX),
        };
        let index = usize::try_from(stripe).map_err(|_| out_of_range())?;
        if index >= stripes {
            return Err(out_of_range());
        }
        let off = stripe_byte_offset(index, self.block_size).ok_or_else(out_of_range)?;
        let end = off.checked_add(self.block_size).ok_or_else(out_of_range)?;
        Ok(off..end)
    }

    /// # Errors
    /// Returns `StripeOutOfRange` rather than reading past the buffer.
    pub fn read_stripe(&self, stripe: i32) -> Result<&[u8]> {
        let span = self.span(stripe)?;
        Ok(&self.storage[span])
    }

    /// # Errors
    /// Returns `StripeOutOfRange` or `BlockLength`; storage is untouched on error.
    pub fn write_stripe(&mut self, stripe: i32, data: &[u8]) -> Result<()> {
        if data.len() != self.block_size {
            return Err(Error::BlockLength {
                expected: self.block_size,
                actual: data.len(),
            });
        }
        let span = self.span(stripe)?;
        self.storage[span].copy_from_slice(data);
        Ok(())
    }

    /// `checkpoint` persists the whole buffer as `disk_<id>.dat` under `dir`.
    ///
    /// # Errors
    /// Returns `Checkpoint` if the file cannot be written in full.
    pub fn checkpoint(&self, dir: &Path) -> Result<PathBuf> {
        checkpoint::write_checkpoint(dir, self.id, &self.storage)
    }
}
