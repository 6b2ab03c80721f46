use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use raid4_rs::{ArrayConfig, ParityMode};

pub const DEFAULT_DISK_SIZE: usize = 4096;
pub const DEFAULT_BLOCK_SIZE: usize = 64;

#[derive(Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the array and read commands from stdin.
    Run(ArrayArgs),

    /// Print the size and SHA-256 digest of checkpoint files.
    Inspect(InspectArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ArrayArgs {
    /// Number of data disks; one parity disk is added.
    #[arg(long, env = "RAID4_DISKS", default_value_t = 3)]
    pub disks: usize,

    #[arg(long, env = "RAID4_DISK_SIZE", default_value_t = DEFAULT_DISK_SIZE)]
    pub disk_size: usize,

    #[arg(long, env = "RAID4_BLOCK_SIZE", default_value_t = DEFAULT_BLOCK_SIZE)]
    pub block_size: usize,

    #[arg(long, env = "RAID4_CHECKPOINT_DIR", default_value = ".")]
    pub checkpoint_dir: PathBuf,

    #[arg(long, env = "RAID4_PARITY_MODE", value_enum, default_value_t = ParityArg::Recompute)]
    pub parity_mode: ParityArg,

    /// Count requests per disk and log a traffic summary on exit.
    #[arg(long, env = "RAID4_METRICS")]
    pub metrics: bool,
}

#[derive(Args, Debug, Clone)]
pub struct InspectArgs {
    /// Total number of disks (data plus parity) to look for.
    #[arg(long, env = "RAID4_TOTAL_DISKS", default_value_t = 4)]
    pub total_disks: usize,

    #[arg(long, env = "RAID4_CHECKPOINT_DIR", default_value = ".")]
    pub checkpoint_dir: PathBuf,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum ParityArg {
    Recompute,
    ReadModifyWrite,
}

impl From<ParityArg> for ParityMode {
    fn from(arg: ParityArg) -> Self {
        match arg {
            ParityArg::Recompute => Self::Recompute,
            ParityArg::ReadModifyWrite => Self::ReadModifyWrite,
        }
    }
}

impl ArrayArgs {
    pub fn to_config(&self) -> ArrayConfig {
        ArrayConfig::new(self.disks, self.disk_size, self.block_size)
            .with_checkpoint_dir(&self.checkpoint_dir)
            .with_parity_mode(self.parity_mode.into())
    }
}
