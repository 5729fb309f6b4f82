//! Epoch-scoped permutation of dataset indices.

use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use wsi_core::{Error, Result};

/// Ordering over `[0, len)`, regenerated at every epoch boundary.
///
/// With shuffling disabled the order is the identity. With it enabled each
/// [`reinit`](Self::reinit) draws a fresh uniform permutation from the
/// index's own generator, so a seeded index replays the same sequence of
/// epochs.
#[derive(Debug, Clone)]
pub struct ShuffleIndex {
    order: Vec<usize>,
    shuffle: bool,
    rng: ChaCha8Rng,
}

impl ShuffleIndex {
    pub fn new(len: usize, shuffle: bool, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };

        let mut index = Self {
            order: Vec::with_capacity(len),
            shuffle,
            rng,
        };
        index.order.extend(0..len);
        index.reinit();
        index
    }

    /// Resets to `[0, 1, ..., len - 1]` and shuffles if enabled
    pub fn reinit(&mut self) {
        let len = self.order.len();
        self.order.clear();
        self.order.extend(0..len);

        if self.shuffle {
            self.order.shuffle(&mut self.rng);
        }
    }

    pub fn get(&self, position: usize) -> Result<usize> {
        self.order.get(position).copied().ok_or(Error::IndexOutOfRange {
            index: position,
            len: self.order.len(),
        })
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn is_shuffled(&self) -> bool {
        self.shuffle
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.order
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_without_shuffle() {
        let mut index = ShuffleIndex::new(17, false, Some(3));
        for _ in 0..3 {
            for i in 0..17 {
                assert_eq!(index.get(i).unwrap(), i);
            }
            index.reinit();
        }
    }

    #[test]
    fn test_shuffle_is_permutation() {
        let mut index = ShuffleIndex::new(100, true, Some(42));
        for _ in 0..5 {
            let mut sorted = index.as_slice().to_vec();
            sorted.sort_unstable();
            assert_eq!(sorted, (0..100).collect::<Vec<_>>());
            index.reinit();
        }
    }

    #[test]
    fn test_shuffle_differs_from_identity() {
        let mut index = ShuffleIndex::new(50, true, None);
        let identity: Vec<usize> = (0..50).collect();

        let mut differs = 0;
        for _ in 0..10 {
            if index.as_slice() != identity.as_slice() {
                differs += 1;
            }
            index.reinit();
        }
        assert!(differs >= 9);
    }

    #[test]
    fn test_seeded_epochs_replay() {
        let mut a = ShuffleIndex::new(30, true, Some(7));
        let mut b = ShuffleIndex::new(30, true, Some(7));
        for _ in 0..3 {
            assert_eq!(a.as_slice(), b.as_slice());
            a.reinit();
            b.reinit();
        }
    }

    #[test]
    fn test_out_of_range() {
        let index = ShuffleIndex::new(4, true, Some(1));
        assert!(matches!(
            index.get(4),
            Err(Error::IndexOutOfRange { index: 4, len: 4 })
        ));

        let empty = ShuffleIndex::new(0, true, Some(1));
        assert!(empty.is_empty());
        assert!(empty.get(0).is_err());
    }
}
