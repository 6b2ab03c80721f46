//! Worker-side primitives: disk state, checkpoints and the command loop.

pub mod checkpoint;
pub mod disk;
pub mod worker;
