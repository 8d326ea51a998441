// Subscriber arena - storage for dependent-evaluator state.
//
// The public Evaluator handle is a thin wrapper over a SubscriberId; the
// expression, cached value, dependency set, and change callback all live
// here. Removing an evaluator frees its slab entry, so a SubscriberId
// held elsewhere can go stale; every accessor returns None in that case.

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use slab::Slab;

use super::ChannelId;
use crate::evaluator::{ChangeCallback, EvalValue, Expression};
use crate::hash::OrderedSet;

/// Identifier for a dependent evaluator within one store's arena.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub(crate) struct SubscriberId(u32);

impl SubscriberId {
    pub(crate) fn new(index: u32) -> Self {
        Self(index)
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Everything one dependent evaluator owns.
pub(crate) struct SubscriberMetadata {
    /// What to recompute: a compiled path or a recomputation function.
    pub(crate) expr: Expression,

    /// Channels the latest evaluation read, in first-read order. Doubles
    /// as the idempotence set: a channel already present is not
    /// registered a second time within an evaluation.
    pub(crate) deps: RwLock<OrderedSet<ChannelId>>,

    /// Result of the latest evaluation; `None` means the expression
    /// resolved to nothing.
    pub(crate) last: Mutex<Option<EvalValue>>,

    /// Change callback. Taken out of the arena while it runs, so a
    /// callback that writes back into the store cannot deadlock on its
    /// own entry.
    pub(crate) callback: Mutex<Option<ChangeCallback>>,
}

impl SubscriberMetadata {
    pub(crate) fn new(expr: Expression, callback: ChangeCallback) -> Self {
        Self {
            expr,
            deps: RwLock::new(OrderedSet::default()),
            last: Mutex::new(None),
            callback: Mutex::new(Some(callback)),
        }
    }
}

/// Store-owned evaluator storage.
pub(crate) struct SubscriberArena {
    slab: RwLock<Slab<SubscriberMetadata>>,
}

impl SubscriberArena {
    pub(crate) fn new() -> Self {
        Self {
            slab: RwLock::new(Slab::new()),
        }
    }

    pub(crate) fn insert(&self, metadata: SubscriberMetadata) -> SubscriberId {
        let mut slab = self.slab.write();
        let entry = slab.vacant_entry();
        let key = entry.key();
        entry.insert(metadata);
        SubscriberId::new(key as u32)
    }

    pub(crate) fn remove(&self, id: SubscriberId) -> Option<SubscriberMetadata> {
        let mut slab = self.slab.write();
        if slab.contains(id.index()) {
            Some(slab.remove(id.index()))
        } else {
            None
        }
    }

    /// Access subscriber metadata with a closure; `None` for a stale id.
    pub(crate) fn with<F, R>(&self, id: SubscriberId, f: F) -> Option<R>
    where
        F: FnOnce(&SubscriberMetadata) -> R,
    {
        let slab = self.slab.read();
        slab.get(id.index()).map(f)
    }

    /// Record a dependency on `channel`.
    ///
    /// Returns true when the channel is new to this evaluation's set —
    /// only then does the caller register on the channel itself. Repeat
    /// reads of the same property land in the `false` branch.
    pub(crate) fn add_dep(&self, id: SubscriberId, channel: ChannelId) -> bool {
        self.with(id, |meta| meta.deps.write().insert(channel))
            .unwrap_or(false)
    }

    /// Drain the dependency set, returning the channels in first-read
    /// order. Used both when a re-evaluation rebuilds the set and when
    /// the evaluator is torn down.
    pub(crate) fn take_deps(&self, id: SubscriberId) -> Vec<ChannelId> {
        self.with(id, |meta| meta.deps.write().drain(..).collect())
            .unwrap_or_default()
    }

    #[cfg(test)]
    pub(crate) fn dep_count(&self, id: SubscriberId) -> usize {
        self.with(id, |meta| meta.deps.read().len()).unwrap_or(0)
    }

    /// Swap in a freshly computed value.
    ///
    /// Returns `Some(previous)` when the value actually changed under the
    /// engine's shallow comparison; `None` when the result is unchanged
    /// (or the id is stale) and no callback must fire.
    pub(crate) fn replace_if_changed(
        &self,
        id: SubscriberId,
        new: Option<EvalValue>,
    ) -> Option<Option<EvalValue>> {
        self.with(id, |meta| {
            let mut last = meta.last.lock();
            if EvalValue::same(&last, &new) {
                cov_mark::hit!(reevaluation_suppressed);
                None
            } else {
                Some(std::mem::replace(&mut *last, new))
            }
        })
        .flatten()
    }

    /// Overwrite the cached value without comparing (the seeding pass).
    pub(crate) fn seed_last(&self, id: SubscriberId, value: Option<EvalValue>) {
        self.with(id, |meta| {
            *meta.last.lock() = value;
        });
    }

    /// Plain snapshot of the cached value.
    pub(crate) fn last_value(&self, id: SubscriberId) -> Option<Value> {
        self.with(id, |meta| {
            meta.last.lock().as_ref().map(|ev| ev.as_value().clone())
        })
        .flatten()
    }

    /// Run the change callback with the callback taken out of the arena.
    ///
    /// The drop guard puts it back even if the callback panics; no store
    /// state may stick because host code misbehaved.
    pub(crate) fn invoke_callback(
        &self,
        id: SubscriberId,
        new: Option<&Value>,
        old: Option<&Value>,
    ) {
        struct Restore<'a> {
            arena: &'a SubscriberArena,
            id: SubscriberId,
            callback: Option<ChangeCallback>,
        }

        impl Drop for Restore<'_> {
            fn drop(&mut self) {
                if let Some(callback) = self.callback.take() {
                    self.arena.with(self.id, |meta| {
                        *meta.callback.lock() = Some(callback);
                    });
                }
            }
        }

        let Some(callback) = self.with(id, |meta| meta.callback.lock().take()).flatten() else {
            // Already out: a callback re-entering its own notification.
            return;
        };

        let mut guard = Restore {
            arena: self,
            id,
            callback: Some(callback),
        };
        if let Some(callback) = guard.callback.as_mut() {
            callback(new, old);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::PathExpr;

    fn metadata() -> SubscriberMetadata {
        SubscriberMetadata::new(
            Expression::Path(PathExpr::compile("a").unwrap()),
            Box::new(|_, _| {}),
        )
    }

    #[test]
    fn stale_access_returns_nothing() {
        let arena = SubscriberArena::new();
        let id = arena.insert(metadata());
        arena.remove(id);

        assert!(arena.with(id, |_| ()).is_none());
        assert!(!arena.add_dep(id, ChannelId::new(0)));
        assert!(arena.take_deps(id).is_empty());
        assert!(arena.last_value(id).is_none());
    }

    #[test]
    fn dep_set_deduplicates_and_keeps_order() {
        let arena = SubscriberArena::new();
        let id = arena.insert(metadata());
        let (a, b) = (ChannelId::new(3), ChannelId::new(1));

        assert!(arena.add_dep(id, a));
        assert!(arena.add_dep(id, b));
        assert!(!arena.add_dep(id, a));

        assert_eq!(arena.take_deps(id), vec![a, b]);
        assert_eq!(arena.dep_count(id), 0);
    }

    #[test]
    fn unchanged_value_is_not_replaced() {
        let arena = SubscriberArena::new();
        let id = arena.insert(metadata());
        arena.seed_last(id, Some(EvalValue::from_plain(Value::from(1))));

        assert!(
            arena
                .replace_if_changed(id, Some(EvalValue::from_plain(Value::from(1))))
                .is_none()
        );
        let old = arena
            .replace_if_changed(id, Some(EvalValue::from_plain(Value::from(2))))
            .expect("value changed");
        assert_eq!(old.unwrap().as_value(), &Value::from(1));
    }
}
