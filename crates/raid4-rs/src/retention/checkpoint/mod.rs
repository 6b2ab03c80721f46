//! Checkpoint files written by workers on a clean exit.
//!
//! A checkpoint is the raw disk buffer: exactly `disk_size` bytes, no header,
//! named `disk_<index>.dat`.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use memmap2::{Mmap, MmapOptions};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

#[must_use]
pub fn checkpoint_path(dir: &Path, id: usize) -> PathBuf {
    dir.join(format!("disk_{id}.dat"))
}

/// `write_checkpoint` replaces the checkpoint for disk `id` with `bytes`.
///
/// # Errors
/// Returns `Checkpoint` if the file cannot be created, written or synced.
pub fn write_checkpoint(dir: &Path, id: usize, bytes: &[u8]) -> Result<PathBuf> {
    let path = checkpoint_path(dir, id);
    let wrap = |source| Error::Checkpoint {
        path: path.clone(),
        source,
    };
    let mut file = File::create(&path).map_err(wrap)?;
    file.write_all(bytes).map_err(wrap)?;
    file.sync_all().map_err(wrap)?;
    Ok(path)
}

/// Checkpoint is a read-only view of a checkpoint file.
pub struct Checkpoint {
    path: PathBuf,
    map: Option<Mmap>,
}

impl Checkpoint {
    /// # Errors
    /// Returns `Checkpoint` if the file cannot be opened or mapped.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let wrap = |source| Error::Checkpoint {
            path: path.clone(),
            source,
        };
        let file = File::open(&path).map_err(wrap)?;
        let len = file.metadata().map_err(wrap)?.len();
        let map = if len == 0 {
            None
        } else {
            let len = usize::try_from(len).map_err(|_| {
                wrap(std::io::Error::other(format!(
                    "checkpoint length {len} exceeds addressable size"
                )))
            })?;
            // SAFETY: the mapping is read-only and checkpoints are only
            // rewritten by a worker exiting, never while being inspected.
            Some(unsafe { MmapOptions::new().len(len).map(&file) }.map_err(wrap)?)
        };
        Ok(Self { path, map })
    }

    /// # Errors
    /// See [`Self::open`].
    pub fn open_for(dir: &Path, id: usize) -> Result<Self> {
        Self::open(checkpoint_path(dir, id))
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.map.as_deref().unwrap_or(&[])
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `block` returns the bytes stored at `stripe`, if the file holds them.
    #[must_use]
    pub fn block(&self, stripe: usize, block_size: usize) -> Option<&[u8]> {
        let off = stripe.checked_mul(block_size)?;
        let end = off.checked_add(block_size)?;
        if end > self.len() {
            return None;
        }
        Some(&self.as_bytes()[off..end])
    }

    #[must_use]
    pub fn digest(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.as_bytes());
        hasher.finalize().into()
    }
}
