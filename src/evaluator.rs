use parking_lot::Mutex;
use serde_json::Value;

use crate::arena::{SubscriberId, SubscriberMetadata};
use crate::error::Result;
use crate::observe::{self, Node};
use crate::path::PathExpr;
use crate::store::{Scope, Store, StoreInner};

/// Change callback: receives the new and previous value of the bound
/// expression. Either side is `None` when the expression resolved to
/// nothing.
pub(crate) type ChangeCallback = Box<dyn FnMut(Option<&Value>, Option<&Value>) + Send>;

/// Recomputation function for [`Evaluator::func`] bindings.
pub(crate) type GetterFn = Box<dyn FnMut(&Scope<'_>) -> Option<Value> + Send>;

/// Result of one evaluation pass.
///
/// Carries enough identity to implement the engine's shallow comparison:
/// scalars compare by value, objects read from the instrumented tree by
/// identity, and everything else never compares equal (arrays are opaque;
/// composites produced by recomputation functions have no tree identity).
#[derive(Clone)]
pub(crate) enum EvalValue {
    Scalar(Value),
    Object { identity: u64, snapshot: Value },
    Opaque(Value),
}

impl EvalValue {
    /// Classify a value produced outside the instrumented tree.
    pub(crate) fn from_plain(value: Value) -> Self {
        if observe::is_scalar(&value) {
            Self::Scalar(value)
        } else {
            Self::Opaque(value)
        }
    }

    /// Classify a node read from the instrumented tree.
    pub(crate) fn of_node(node: &Node) -> Self {
        match node {
            Node::Leaf(value) => Self::from_plain(value.clone()),
            Node::Object(object) => Self::Object {
                identity: object.identity,
                snapshot: observe::snapshot(node),
            },
        }
    }

    pub(crate) fn as_value(&self) -> &Value {
        match self {
            Self::Scalar(value) | Self::Opaque(value) => value,
            Self::Object { snapshot, .. } => snapshot,
        }
    }

    pub(crate) fn into_value(self) -> Value {
        match self {
            Self::Scalar(value) | Self::Opaque(value) => value,
            Self::Object { snapshot, .. } => snapshot,
        }
    }

    /// The second change-suppression layer's comparison. Shallow on
    /// purpose: object contents are irrelevant, only identity counts.
    pub(crate) fn same(a: &Option<Self>, b: &Option<Self>) -> bool {
        match (a, b) {
            (None, None) => true,
            (Some(Self::Scalar(x)), Some(Self::Scalar(y))) => x == y,
            (Some(Self::Object { identity: x, .. }), Some(Self::Object { identity: y, .. })) => {
                x == y
            }
            _ => false,
        }
    }
}

/// What a dependent evaluator recomputes.
pub(crate) enum Expression {
    /// Precompiled dotted path.
    Path(PathExpr),

    /// Recomputation function. Taken out of the slot while it runs; the
    /// arena lock cannot be held across host code.
    Func(Mutex<Option<GetterFn>>),
}

enum Work {
    Path(PathExpr),
    Func(Option<GetterFn>),
}

/// One evaluation pass: claim the active slot, resolve the expression
/// (reads register the subscriber on every channel they touch), release
/// the slot, return the value.
///
/// The slot is released on every exit path - the guard clears it even
/// when host recomputation code panics.
pub(crate) fn evaluate(inner: &StoreInner, id: SubscriberId) -> Result<Option<EvalValue>> {
    let _active = inner.activate(id)?;

    let Some(work) = inner.subscribers.with(id, |meta| match &meta.expr {
        Expression::Path(path) => Work::Path(path.clone()),
        Expression::Func(slot) => Work::Func(slot.lock().take()),
    }) else {
        return Ok(None);
    };

    match work {
        Work::Path(path) => Ok(inner.resolve_tracked(path.segments())),
        // Getter already out of its slot; nothing to evaluate.
        Work::Func(None) => Ok(None),
        Work::Func(Some(getter)) => {
            struct Restore<'a> {
                inner: &'a StoreInner,
                id: SubscriberId,
                getter: Option<GetterFn>,
            }

            impl Drop for Restore<'_> {
                fn drop(&mut self) {
                    if let Some(getter) = self.getter.take() {
                        self.inner.subscribers.with(self.id, |meta| {
                            if let Expression::Func(slot) = &meta.expr {
                                *slot.lock() = Some(getter);
                            }
                        });
                    }
                }
            }

            let mut guard = Restore {
                inner,
                id,
                getter: Some(getter),
            };
            let scope = Scope::new(inner);
            let result = match guard.getter.as_mut() {
                Some(getter) => getter(&scope),
                None => None,
            };
            Ok(result.map(EvalValue::from_plain))
        }
    }
}

/// Construction-time pass: evaluate once to establish the initial
/// dependency set and cache the current value. The change callback is
/// not invoked for this pass.
pub(crate) fn seed(inner: &StoreInner, id: SubscriberId) -> Result<()> {
    let initial = evaluate(inner, id)?;
    inner.subscribers.seed_last(id, initial);
    Ok(())
}

/// Channel-notification entry: re-run the expression and fire the change
/// callback only when the result actually changed.
pub(crate) fn reevaluate(inner: &StoreInner, id: SubscriberId) -> Result<()> {
    // Shed the previous dependency set first; the evaluation below
    // rebuilds it from what the expression reads this time around.
    for channel in inner.subscribers.take_deps(id) {
        inner.channels.unregister(channel, id);
    }

    let new = evaluate(inner, id)?;
    let new_plain = new.as_ref().map(|value| value.as_value().clone());

    let Some(previous) = inner.subscribers.replace_if_changed(id, new) else {
        return Ok(());
    };
    let old_plain = previous.map(EvalValue::into_value);

    tracing::trace!(subscriber = ?id, "value changed, firing callback");
    inner
        .subscribers
        .invoke_callback(id, new_plain.as_ref(), old_plain.as_ref());
    Ok(())
}

/// A dependent evaluator: one bindable expression, re-run whenever a
/// property it read changes, reporting only real value changes to its
/// callback.
///
/// The handle scopes the binding's lifetime. Dropping it unregisters the
/// evaluator from every channel it depends on; no callback fires after
/// the drop.
///
/// # Example
///
/// ```ignore
/// let store = Store::observe(json!({"user": {"name": "Ann"}}));
/// let binding = Evaluator::path(&store, "user.name", |new, old| {
///     println!("{old:?} -> {new:?}");
/// })?;
/// assert_eq!(binding.value(), Some(json!("Ann")));
/// ```
pub struct Evaluator {
    store: Store,
    id: SubscriberId,
}

impl Evaluator {
    /// Bind a dotted property path.
    ///
    /// The path is compiled and validated here; a malformed path fails
    /// with [`crate::Error::InvalidExpression`] instead of producing an
    /// evaluator that silently resolves to nothing. The first evaluation
    /// runs before this returns, so [`Evaluator::value`] is immediately
    /// available.
    pub fn path<C>(store: &Store, path: &str, on_change: C) -> Result<Self>
    where
        C: FnMut(Option<&Value>, Option<&Value>) + Send + 'static,
    {
        let expr = PathExpr::compile(path)?;
        Self::build(store, Expression::Path(expr), Box::new(on_change))
    }

    /// Bind an arbitrary recomputation function.
    ///
    /// The function reads state through the [`Scope`] it is handed; every
    /// property it reads becomes a dependency of this evaluator. Reads
    /// that happen through other means (a captured [`Store`] handle) do
    /// not register dependencies.
    pub fn func<G, C>(store: &Store, getter: G, on_change: C) -> Result<Self>
    where
        G: FnMut(&Scope<'_>) -> Option<Value> + Send + 'static,
        C: FnMut(Option<&Value>, Option<&Value>) + Send + 'static,
    {
        Self::build(
            store,
            Expression::Func(Mutex::new(Some(Box::new(getter)))),
            Box::new(on_change),
        )
    }

    fn build(store: &Store, expr: Expression, on_change: ChangeCallback) -> Result<Self> {
        let inner = store.inner();
        let id = inner
            .subscribers
            .insert(SubscriberMetadata::new(expr, on_change));
        if let Err(err) = seed(inner, id) {
            // Roll the half-built entry back out before reporting.
            for channel in inner.subscribers.take_deps(id) {
                inner.channels.unregister(channel, id);
            }
            inner.subscribers.remove(id);
            return Err(err);
        }
        Ok(Self {
            store: store.clone(),
            id,
        })
    }

    /// The result of the latest evaluation. `None` when the expression
    /// resolves to nothing (a broken or null chain).
    pub fn value(&self) -> Option<Value> {
        self.store.inner().subscribers.last_value(self.id)
    }

    #[cfg(test)]
    pub(crate) fn id(&self) -> SubscriberId {
        self.id
    }
}

impl Drop for Evaluator {
    fn drop(&mut self) {
        let inner = self.store.inner();
        for channel in inner.subscribers.take_deps(self.id) {
            inner.channels.unregister(channel, self.id);
        }
        inner.subscribers.remove(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plain_values_classify_by_shape() {
        assert!(matches!(
            EvalValue::from_plain(json!("s")),
            EvalValue::Scalar(_)
        ));
        assert!(matches!(
            EvalValue::from_plain(json!(null)),
            EvalValue::Scalar(_)
        ));
        assert!(matches!(
            EvalValue::from_plain(json!([1])),
            EvalValue::Opaque(_)
        ));
        assert!(matches!(
            EvalValue::from_plain(json!({"a": 1})),
            EvalValue::Opaque(_)
        ));
    }

    #[test]
    fn comparison_is_shallow() {
        let scalar = |v: Value| Some(EvalValue::from_plain(v));
        assert!(EvalValue::same(&None, &None));
        assert!(EvalValue::same(&scalar(json!(1)), &scalar(json!(1))));
        assert!(!EvalValue::same(&scalar(json!(1)), &scalar(json!(2))));
        assert!(!EvalValue::same(&scalar(json!(1)), &None));

        let object = |identity: u64| {
            Some(EvalValue::Object {
                identity,
                snapshot: json!({}),
            })
        };
        assert!(EvalValue::same(&object(4), &object(4)));
        assert!(!EvalValue::same(&object(4), &object(5)));

        // Opaque composites never repeat, even with equal contents.
        let opaque = || Some(EvalValue::from_plain(json!([1, 2])));
        assert!(!EvalValue::same(&opaque(), &opaque()));
    }
}
