//! Block buffers and the logical-to-physical addressing of a RAID-4 array.

pub mod address;
pub mod block;
