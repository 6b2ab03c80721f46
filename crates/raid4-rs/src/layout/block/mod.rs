//! Owned block buffers with the XOR helpers parity maintenance needs.

use std::ops::{BitXor, BitXorAssign};


#[derive(Clone, Eq, PartialEq, Hash, Debug)]
/// Block stores exactly one `block_size` worth of bytes.
pub struct Block(Vec<u8>);

impl Block {
    #[inline]
    #[must_use]
    /// `zero` returns a zero-filled block of `len` bytes.
    pub fn zero(len: usize) -> Self {
        Self(vec![0u8; len])
    }

    #[inline]
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[inline]
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.0
    }

    #[inline]
    /// `xor_in_place` folds `rhs` into this block byte by byte.
    ///
    /// # Arguments
    /// * `rhs` - Bytes to XOR in; must be as long as this block.
    ///
    /// # Panics
    /// Panics if the lengths differ.
    pub fn xor_in_place(&mut self, rhs: &[u8]) {
        assert_eq!(
            self.0.len(),
            rhs.len(),
            "XOR operands must be the same length."
        );
        for (a, b) in self.0.iter_mut().zip(rhs) {
            *a ^= *b;
        }
    }
}

impl From<Vec<u8>> for Block {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Block {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl BitXor<&Self> for Block {
    type Output = Self;
    #[inline]
    fn bitxor(mut self, rhs: &Self) -> Self::Output {
        self.xor_in_place(&rhs.0);
        self
    }
}

impl BitXorAssign<&Self> for Block {
    #[inline]
    fn bitxor_assign(&mut self, rhs: &Self) {
        self.xor_in_place(&rhs.0);
    }
}

impl BitXorAssign<&[u8]> for Block {
    #[inline]
    fn bitxor_assign(&mut self, rhs: &[u8]) {
        self.xor_in_place(rhs);
    }
}

/// `parity_of` returns the XOR of every block in `members`.
///
/// # Arguments
/// * `block_size` - Width of the result; also the width every member must have.
/// * `members` - The blocks of one stripe.
#[must_use]
pub fn parity_of<'a, I>(block_size: usize, members: I) -> Block
where
    I: IntoIterator<Item = &'a [u8]>,
{
    let mut parity = Block::zero(block_size);
    for member in members {
        parity ^= member;
    }
    parity
}
