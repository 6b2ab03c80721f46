use std::fmt::Write as _;
use std::io::Write;

use anyhow::{Context, Result};
use raid4_rs::retention::checkpoint::Checkpoint;

use crate::cli::InspectArgs;

pub fn run(args: &InspectArgs, out: &mut impl Write) -> Result<()> {
    for id in 0..args.total_disks {
        let ck = Checkpoint::open_for(&args.checkpoint_dir, id)
            .with_context(|| format!("cannot open checkpoint for disk {id}"))?;
        writeln!(
            out,
            "disk {id}: {} bytes sha256={} ({})",
            ck.len(),
            hex(&ck.digest()),
            ck.path().display()
        )?;
    }
    Ok(())
}

fn hex(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{b:02x}");
    }
    s
}
