//! Fixed-size bit mask.
//!
//! Used by dropout to mark output indices as dropped. A set bit means "dropped".

use crate::{Error, Result};

const WORD_BITS: usize = u64::BITS as usize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitMask {
    words: Vec<u64>,
    len: usize,
}

impl BitMask {
    /// All bits clear.
    pub fn new(len: usize) -> Self {
        Self {
            words: vec![0; len.div_ceil(WORD_BITS)],
            len,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    fn check(&self, index: usize) -> Result<()> {
        if index >= self.len {
            return Err(Error::MaskOutOfBounds {
                index,
                len: self.len,
            });
        }
        Ok(())
    }

    pub fn set(&mut self, index: usize) -> Result<()> {
        self.check(index)?;
        self.words[index / WORD_BITS] |= 1 << (index % WORD_BITS);
        Ok(())
    }

    pub fn clear(&mut self, index: usize) -> Result<()> {
        self.check(index)?;
        self.words[index / WORD_BITS] &= !(1 << (index % WORD_BITS));
        Ok(())
    }

    pub fn get(&self, index: usize) -> Result<bool> {
        self.check(index)?;
        Ok(self.contains(index))
    }

    /// Unchecked variant of [`BitMask::get`] for hot loops.
    ///
    /// Returns `false` past the end in release builds.
    #[inline]
    pub fn contains(&self, index: usize) -> bool {
        debug_assert!(index < self.len, "mask index out of bounds");
        self.words
            .get(index / WORD_BITS)
            .is_some_and(|w| (w >> (index % WORD_BITS)) & 1 == 1)
    }

    pub fn clear_all(&mut self) {
        self.words.fill(0);
    }

    pub fn set_all(&mut self) {
        self.words.fill(u64::MAX);
        self.trim_tail();
    }

    /// Flip every bit in `0..len`.
    pub fn invert(&mut self) {
        for w in &mut self.words {
            *w = !*w;
        }
        self.trim_tail();
    }

    pub fn count_ones(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Heap bytes held by the mask.
    pub fn estimate_size(&self) -> usize {
        std::mem::size_of::<Self>() + self.words.capacity() * std::mem::size_of::<u64>()
    }

    fn trim_tail(&mut self) {
        let rem = self.len % WORD_BITS;
        if rem == 0 {
            return;
        }
        if let Some(last) = self.words.last_mut() {
            *last &= (1_u64 << rem) - 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_clear() {
        let mut mask = BitMask::new(70);
        mask.set(0).unwrap();
        mask.set(69).unwrap();
        assert!(mask.get(0).unwrap());
        assert!(mask.get(69).unwrap());
        assert!(!mask.get(1).unwrap());

        mask.clear(69).unwrap();
        assert!(!mask.get(69).unwrap());
        assert_eq!(mask.count_ones(), 1);
    }

    #[test]
    fn out_of_bounds_is_an_error() {
        let mut mask = BitMask::new(8);
        assert_eq!(
            mask.set(8),
            Err(Error::MaskOutOfBounds { index: 8, len: 8 })
        );
        assert!(mask.get(100).is_err());
        assert!(mask.clear(9).is_err());
    }

    #[test]
    fn invert_keeps_tail_clear() {
        let mut mask = BitMask::new(10);
        mask.set(3).unwrap();
        mask.invert();
        assert_eq!(mask.count_ones(), 9);
        assert!(!mask.get(3).unwrap());

        mask.set_all();
        assert_eq!(mask.count_ones(), 10);
        mask.clear_all();
        assert_eq!(mask.count_ones(), 0);
    }
}
