//! The per-disk worker: a single-threaded loop serving one command at a time.


use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::PathBuf;

use tracing::{debug, error, info};

use crate::config::ArrayConfig;
use crate::error::Result;
use crate::protocol::{self, Command};
use crate::registry::ignore_sigpipe;
use crate::retention::disk::Disk;

/// Worker owns one disk and answers the controller over a byte stream.
pub struct Worker {
    disk: Disk,
    checkpoint_dir: PathBuf,
    scratch: Vec<u8>,
}

impl Worker {
    /// # Errors
    /// Returns `Allocation` if the disk buffer cannot be reserved.
    pub fn new(id: usize, cfg: &ArrayConfig) -> Result<Self> {
        let disk = Disk::allocate(id, cfg.disk_size(), cfg.block_size())?;
        Ok(Self {
            scratch: vec![0u8; cfg.block_size()],
            disk,
            checkpoint_dir: cfg.checkpoint_dir().to_path_buf(),
        })
    }

    #[must_use]
    pub const fn disk(&self) -> &Disk {
        &self.disk
    }

    /// `serve` runs the command loop until EXIT arrives or a command fails.
    ///
    /// On EXIT the disk is checkpointed and the checkpoint path returned.
    ///
    /// # Arguments
    /// * `from_controller` - Inbound command stream.
    /// * `to_controller` - Outbound reply stream.
    ///
    /// # Errors
    /// Any protocol error, an out-of-range stripe, or a failed checkpoint.
    pub fn serve<R: Read, W: Write>(
        &mut self,
        mut from_controller: R,
        mut to_controller: W,
    ) -> Result<PathBuf> {
        let id = self.disk.id();
        loop {
            match protocol::recv_command(&mut from_controller)? {
                Command::Read => {
                    let stripe = protocol::recv_stripe(&mut from_controller)?;
                    debug!(disk = id, stripe, "read");
                    let block = self.disk.read_stripe(stripe)?;
                    protocol::send_block(&mut to_controller, block)?;
                }
                Command::Write => {
                    let stripe = protocol::recv_stripe(&mut from_controller)?;
                    protocol::recv_block(&mut from_controller, &mut self.scratch)?;
                    debug!(disk = id, stripe, "write");
                    self.disk.write_stripe(stripe, &self.scratch)?;
                }
                Command::Exit => {
                    let path = self.disk.checkpoint(&self.checkpoint_dir)?;
                    info!(disk = id, path = %path.display(), "checkpointed");
                    return Ok(path);
                }
            }
        }
    }
}

/// `run` is the body of a worker process. It returns the process exit code:
/// 0 after a clean EXIT, 1 after any failure.
#[must_use]
pub fn run(id: usize, cfg: &ArrayConfig, from_controller: File, to_controller: File) -> i32 {
    // A reply to a controller that went away must surface as EPIPE.
    if let Err(e) = ignore_sigpipe() {
        error!(disk = id, "cannot ignore SIGPIPE: {e}");
        return 1;
    }
    let mut worker = match Worker::new(id, cfg) {
        Ok(w) => w,
        Err(e) => {
            error!(disk = id, "worker start failed: {e}");
            return 1;
        }
    };
    match worker.serve(from_controller, BufWriter::new(to_controller)) {
        Ok(_) => 0,
        Err(e) => {
            error!(disk = id, "worker terminating: {e}");
            1
        }
    }
}
