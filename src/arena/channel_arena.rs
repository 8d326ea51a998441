// Channel arena - storage for subscription-channel metadata.
//
// One channel exists per observed property. The arena is insert-only:
// replacing a subtree strands the channels underneath it rather than
// freeing them, so a ChannelId stays valid for the life of its store.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use slab::Slab;

use super::SubscriberId;
use crate::hash::OrderedSet;

// Channel uids are monotonic across the whole process, never reused,
// regardless of which store allocated the channel.
static NEXT_CHANNEL_UID: AtomicU64 = AtomicU64::new(0);

/// Identifier for a channel within one store's arena.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub(crate) struct ChannelId(u32);

impl ChannelId {
    pub(crate) fn new(index: u32) -> Self {
        Self(index)
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Per-property broadcast state.
pub(crate) struct ChannelMetadata {
    /// Process-wide unique id, monotonically increasing.
    uid: u64,

    /// Subscribers in registration order.
    ///
    /// `IndexSet` gives duplicate-free O(1) insertion while preserving
    /// the order notification must run in.
    subscribers: RwLock<OrderedSet<SubscriberId>>,
}

impl ChannelMetadata {
    fn new() -> Self {
        Self {
            uid: NEXT_CHANNEL_UID.fetch_add(1, Ordering::Relaxed),
            subscribers: RwLock::new(OrderedSet::default()),
        }
    }
}

/// Store-owned channel storage.
///
/// Unlike a process-global arena, every store carries its own; channel
/// ids from one store mean nothing to another.
pub(crate) struct ChannelArena {
    slab: RwLock<Slab<ChannelMetadata>>,
}

impl ChannelArena {
    pub(crate) fn new() -> Self {
        Self {
            slab: RwLock::new(Slab::new()),
        }
    }

    /// Allocate a channel for a freshly observed property.
    pub(crate) fn insert(&self) -> ChannelId {
        let metadata = ChannelMetadata::new();
        let uid = metadata.uid;
        let mut slab = self.slab.write();
        let entry = slab.vacant_entry();
        let key = entry.key();
        entry.insert(metadata);
        tracing::trace!(uid, index = key, "channel allocated");
        ChannelId::new(key as u32)
    }

    /// Access channel metadata with a closure; `None` for a stale id.
    fn with<F, R>(&self, id: ChannelId, f: F) -> Option<R>
    where
        F: FnOnce(&ChannelMetadata) -> R,
    {
        let slab = self.slab.read();
        slab.get(id.index()).map(f)
    }

    /// The channel's process-wide unique id.
    #[cfg(test)]
    pub(crate) fn uid(&self, id: ChannelId) -> Option<u64> {
        self.with(id, |meta| meta.uid)
    }

    /// Add a subscriber at the end of the registration order.
    ///
    /// Inserting an already-registered subscriber is a no-op; the
    /// evaluator-side dependency set normally catches duplicates before
    /// this is even called.
    pub(crate) fn register(&self, id: ChannelId, subscriber: SubscriberId) {
        self.with(id, |meta| {
            meta.subscribers.write().insert(subscriber);
        });
    }

    /// Remove a subscriber, preserving the order of the remaining ones.
    pub(crate) fn unregister(&self, id: ChannelId, subscriber: SubscriberId) {
        self.with(id, |meta| {
            meta.subscribers.write().shift_remove(&subscriber);
        });
    }

    /// Snapshot the subscriber list in registration order.
    ///
    /// Notification iterates the snapshot, not the live set: a
    /// subscriber re-registering mid-pass must not grow or reorder the
    /// iteration it is part of.
    pub(crate) fn snapshot(&self, id: ChannelId) -> Vec<SubscriberId> {
        self.with(id, |meta| meta.subscribers.read().iter().copied().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uids_are_unique_and_increasing() {
        let arena = ChannelArena::new();
        let a = arena.uid(arena.insert()).unwrap();
        let b = arena.uid(arena.insert()).unwrap();
        assert!(b > a);
    }

    #[test]
    fn registration_order_is_preserved() {
        let arena = ChannelArena::new();
        let channel = arena.insert();
        let subs: Vec<_> = (0..4).map(SubscriberId::new).collect();
        for &sub in &subs {
            arena.register(channel, sub);
        }
        assert_eq!(arena.snapshot(channel), subs);
    }

    #[test]
    fn duplicate_registration_keeps_single_entry() {
        let arena = ChannelArena::new();
        let channel = arena.insert();
        let sub = SubscriberId::new(7);
        arena.register(channel, sub);
        arena.register(channel, sub);
        assert_eq!(arena.snapshot(channel), vec![sub]);
    }

    #[test]
    fn unregister_keeps_order_of_the_rest() {
        let arena = ChannelArena::new();
        let channel = arena.insert();
        let subs: Vec<_> = (0..3).map(SubscriberId::new).collect();
        for &sub in &subs {
            arena.register(channel, sub);
        }
        arena.unregister(channel, subs[1]);
        assert_eq!(arena.snapshot(channel), vec![subs[0], subs[2]]);
    }

    #[test]
    fn stale_id_yields_empty_snapshot() {
        let arena = ChannelArena::new();
        assert!(arena.snapshot(ChannelId::new(99)).is_empty());
    }
}
