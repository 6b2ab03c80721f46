use std::fs::File;

use nix::unistd::Pid;
use tracing::debug;

use crate::error::Result;
use crate::protocol::{self, Request};

/// Lifecycle of the worker occupying a slot.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SlotState {
    Running,
    /// Killed by failure injection and reaped; waiting for a restart.
    Failed,
    /// Reaped after EXIT (or after hanging up its channels).
    Exited,
}

/// WorkerHandle holds the controller's side of one worker: its process id,
/// the write end of the command pipe and the read end of the reply pipe.
/// The worker-side ends are never held here.
pub struct WorkerHandle {
    pub(super) slot: usize,
    pub(super) pid: Pid,
    pub(super) to_worker: File,
    pub(super) from_worker: File,
    pub(super) state: SlotState,
}

impl WorkerHandle {
    #[must_use]
    pub const fn state(&self) -> SlotState {
        self.state
    }

    /// `read` asks the worker for the block at `stripe` and waits for it.
    ///
    /// # Errors
    /// Protocol error if the request or the reply is cut short, which is how
    /// a dead worker shows up.
    pub fn read(&mut self, stripe: i32, out: &mut [u8]) -> Result<()> {
        debug!(slot = self.slot, stripe, "-> READ");
        Request::Read { stripe }.send(&mut self.to_worker)?;
        protocol::recv_block(&mut self.from_worker, out)
    }

    /// `write` sends a block to the worker. There is no acknowledgement.
    ///
    /// # Errors
    /// Protocol error if any field of the frame is not delivered.
    pub fn write(&mut self, stripe: i32, payload: &[u8]) -> Result<()> {
        debug!(slot = self.slot, stripe, "-> WRITE");
        Request::Write { stripe, payload }.send(&mut self.to_worker)
    }

    /// # Errors
    /// Protocol error if the EXIT tag is not delivered.
    pub fn exit(&mut self) -> Result<()> {
        debug!(slot = self.slot, "-> EXIT");
        Request::Exit.send(&mut self.to_worker)
    }
}
