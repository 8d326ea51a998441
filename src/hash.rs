//! Fixed-seed hashing for the engine's internal collections.
//!
//! Channel ids, subscriber ids, and property keys are never
//! attacker-controlled, so HashDoS resistance buys nothing here. A
//! zero-sized `BuildHasher` over foldhash keeps the ordered sets and slot
//! maps free of per-collection hasher state.

use std::hash::BuildHasher;

use foldhash::fast::{FixedState, FoldHasher};

/// Zero-sized `BuildHasher` using foldhash with a fixed seed.
///
/// Deterministic: every instance hashes identically, which also keeps
/// iteration-order-sensitive tests stable.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct FixedHashBuilder;

impl BuildHasher for FixedHashBuilder {
    type Hasher = FoldHasher<'static>;

    #[inline]
    fn build_hasher(&self) -> Self::Hasher {
        FixedState::with_seed(0x7c9a_63f2_1db4_5e08).build_hasher()
    }
}

/// Insertion-ordered set over the fixed-seed hasher.
///
/// Registration order is load-bearing throughout the engine: channels
/// notify subscribers in the order they registered, and dependency sets
/// keep first-read order.
pub(crate) type OrderedSet<T> = indexmap::IndexSet<T, FixedHashBuilder>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_occupies_no_space() {
        assert_eq!(std::mem::size_of::<FixedHashBuilder>(), 0);
    }

    #[test]
    fn identical_inputs_hash_identically() {
        let a = FixedHashBuilder.hash_one("user.name");
        let b = FixedHashBuilder.hash_one("user.name");
        assert_eq!(a, b);
    }
}
