use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;

use crate::arena::{ChannelArena, ChannelId, SubscriberArena, SubscriberId};
use crate::error::{Error, Result};
use crate::evaluator::{self, EvalValue};
use crate::observe::{self, Node};
use crate::path::PathExpr;

/// The store: owner of one instrumented state tree, its channel and
/// subscriber arenas, and the active-subscriber slot.
///
/// Cloning a `Store` clones a handle; all clones share the same state.
/// Everything is synchronous: a write runs the full
/// compare / swap / notify / re-evaluate chain before it returns.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl Store {
    /// Instrument `root` and return the store owning it.
    ///
    /// This is the only place instrumentation of a root happens, and it
    /// runs exactly once per store - evaluators can only be built
    /// against an already-observed store. A non-object root is held
    /// uninstrumented: reads resolve to `None`, writes fail with
    /// [`Error::UnresolvedPath`], and no error is raised here.
    pub fn observe(root: Value) -> Self {
        let channels = ChannelArena::new();
        let root = observe::instrument(root, &channels);
        Self {
            inner: Arc::new(StoreInner {
                root: RwLock::new(root),
                channels,
                subscribers: SubscriberArena::new(),
                active: Mutex::new(None),
            }),
        }
    }

    /// One-off read through the instrumented chain.
    ///
    /// Registers no dependency, regardless of any evaluation in flight;
    /// meant for initial renders before bindings exist. Broken chains
    /// degrade to `Ok(None)`; only a malformed path is an error.
    pub fn read_path(&self, path: &str) -> Result<Option<Value>> {
        let expr = PathExpr::compile(path)?;
        Ok(self.inner.resolve_untracked(expr.segments()))
    }

    /// Assign `value` to the property at `path` through the instrumented
    /// accessor chain.
    ///
    /// Writing a scalar equal to the current scalar is a silent no-op:
    /// nothing is stored and nobody is notified. Otherwise the new value
    /// is swapped in (a fresh object subtree becomes reactive on the
    /// spot) and every evaluator depending on the property re-runs
    /// before this returns.
    pub fn write_path(&self, path: &str, value: Value) -> Result<()> {
        let expr = PathExpr::compile(path)?;
        self.inner.write(&expr, value)
    }

    /// Plain snapshot of the entire state tree.
    pub fn snapshot(&self) -> Value {
        observe::snapshot(&self.inner.root.read())
    }

    pub(crate) fn inner(&self) -> &StoreInner {
        &self.inner
    }
}

/// Shared state behind a [`Store`] handle.
pub(crate) struct StoreInner {
    root: RwLock<Node>,
    pub(crate) channels: ChannelArena,
    pub(crate) subscribers: SubscriberArena,

    /// The evaluator currently inside its evaluation, if any. Claimed
    /// and released through [`StoreInner::activate`]; must be `None`
    /// outside of an evaluation.
    active: Mutex<Option<SubscriberId>>,
}

/// Scoped claim on the active-subscriber slot.
///
/// Dropping the guard clears the slot unconditionally, so it cannot
/// stick across an error or a panic in host code.
pub(crate) struct ActiveGuard<'a> {
    inner: &'a StoreInner,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        *self.inner.active.lock() = None;
    }
}

impl StoreInner {
    /// Claim the active-subscriber slot for one evaluation.
    ///
    /// An occupied slot means an evaluation is triggering another
    /// evaluation on the same store - a dependency cycle or recursive
    /// binding construction. Fatal, never retried.
    pub(crate) fn activate(&self, subscriber: SubscriberId) -> Result<ActiveGuard<'_>> {
        let mut slot = self.active.lock();
        if slot.is_some() {
            return Err(Error::ReentrantEvaluation);
        }
        *slot = Some(subscriber);
        Ok(ActiveGuard { inner: self })
    }

    fn active_subscriber(&self) -> Option<SubscriberId> {
        *self.active.lock()
    }

    /// Register the active subscriber (if any) on `channel`.
    ///
    /// The subscriber-side dependency set makes this idempotent: repeat
    /// reads of one property within an evaluation register exactly once.
    fn touch(&self, channel: ChannelId) {
        if let Some(subscriber) = self.active_subscriber() {
            if self.subscribers.add_dep(subscriber, channel) {
                self.channels.register(channel, subscriber);
            } else {
                cov_mark::hit!(duplicate_read_skipped);
            }
        }
    }

    /// Walk `segments` from the root, registering the active subscriber
    /// on every channel the traversal passes through.
    ///
    /// Yields `None` as soon as a link is missing or cannot be descended
    /// into (a null or other leaf mid-path). Channels below the break
    /// are never touched; there is nothing below a leaf to touch.
    pub(crate) fn resolve_tracked(&self, segments: &[String]) -> Option<EvalValue> {
        let root = self.root.read();
        let mut node: &Node = &root;
        for segment in segments {
            let Node::Object(object) = node else {
                cov_mark::hit!(broken_chain_reads_none);
                return None;
            };
            let slot = object.slots.get(segment)?;
            self.touch(slot.channel);
            node = &slot.node;
        }
        Some(EvalValue::of_node(node))
    }

    /// Untracked variant of the same walk.
    pub(crate) fn resolve_untracked(&self, segments: &[String]) -> Option<Value> {
        let root = self.root.read();
        let mut node: &Node = &root;
        for segment in segments {
            let Node::Object(object) = node else {
                return None;
            };
            node = &object.slots.get(segment)?.node;
        }
        Some(observe::snapshot(node))
    }

    /// The intercepted setter: resolve the terminal slot, suppress
    /// no-change writes, otherwise swap the value in and notify the
    /// slot's channel.
    pub(crate) fn write(&self, path: &PathExpr, value: Value) -> Result<()> {
        let unresolved = || Error::UnresolvedPath(path.as_str().to_owned());

        let channel = {
            let mut root = self.root.write();
            let mut node: &mut Node = &mut root;
            let [parents @ .., last] = path.segments() else {
                return Err(unresolved());
            };
            for segment in parents {
                let Node::Object(object) = node else {
                    return Err(unresolved());
                };
                let Some(slot) = object.slots.get_mut(segment) else {
                    return Err(unresolved());
                };
                node = &mut slot.node;
            }
            let Node::Object(object) = node else {
                return Err(unresolved());
            };
            let Some(slot) = object.slots.get_mut(last) else {
                return Err(unresolved());
            };

            if observe::write_is_noop(&slot.node, &value) {
                cov_mark::hit!(write_suppressed_equal);
                tracing::trace!(path = path.as_str(), "write suppressed: value unchanged");
                return Ok(());
            }

            slot.node = observe::instrument(value, &self.channels);
            slot.channel
        };

        // Root lock is released before fan-out; subscribers re-read the
        // tree while re-evaluating.
        self.notify(path, channel)
    }

    /// Fan a change out to every subscriber on `channel`, in
    /// registration order, over a snapshot of the list.
    ///
    /// Subscribers re-registering mid-pass mutate the live set, not this
    /// iteration. A subscriber triggering further notifications from
    /// inside its callback is unsupported territory; it will not
    /// deadlock, but ordering guarantees end there.
    fn notify(&self, path: &PathExpr, channel: ChannelId) -> Result<()> {
        let subscribers = self.channels.snapshot(channel);
        tracing::debug!(
            path = path.as_str(),
            fanout = subscribers.len(),
            "property changed"
        );
        for subscriber in subscribers {
            evaluator::reevaluate(self, subscriber)?;
        }
        Ok(())
    }
}

/// Read scope handed to recomputation functions.
///
/// Reads through the scope traverse the instrumented tree and register
/// the evaluator currently being evaluated on every property they touch,
/// exactly like path-expression traversal does.
pub struct Scope<'a> {
    inner: &'a StoreInner,
}

impl<'a> Scope<'a> {
    pub(crate) fn new(inner: &'a StoreInner) -> Self {
        Self { inner }
    }

    /// Tracked read of a dotted path.
    ///
    /// `None` for broken chains and for paths that do not parse; a
    /// recomputation function has no error channel, so a malformed path
    /// degrades the same way a missing property does.
    pub fn get(&self, path: &str) -> Option<Value> {
        let expr = PathExpr::compile(path).ok()?;
        self.inner
            .resolve_tracked(expr.segments())
            .map(EvalValue::into_value)
    }
}
