#![deny(missing_docs)]

//! Minimal fine-grained reactive state binding for plain JSON data.
//!
//! Hand the engine a plain [`serde_json::Value`] and every object
//! property becomes observable. Bindings register interest in derived
//! values - a dotted property path or an arbitrary recomputation
//! function - and when underlying data changes, exactly the affected
//! bindings re-run. No manual change-notification code anywhere.
//!
//! # Quick Start
//!
//! ```
//! use rebind::{Evaluator, Store};
//! use serde_json::json;
//! use std::sync::{Arc, Mutex};
//!
//! # fn main() -> rebind::Result<()> {
//! let store = Store::observe(json!({"user": {"name": "Ann"}}));
//!
//! let seen = Arc::new(Mutex::new(Vec::new()));
//! let sink = Arc::clone(&seen);
//! let binding = Evaluator::path(&store, "user.name", move |new, old| {
//!     sink.lock().unwrap().push((new.cloned(), old.cloned()));
//! })?;
//!
//! // The first evaluation already ran; no callback for it.
//! assert_eq!(binding.value(), Some(json!("Ann")));
//! assert!(seen.lock().unwrap().is_empty());
//!
//! // A real change notifies exactly the bindings that read the property.
//! store.write_path("user.name", json!("Bea"))?;
//! assert_eq!(
//!     seen.lock().unwrap().last().unwrap(),
//!     &(Some(json!("Bea")), Some(json!("Ann")))
//! );
//!
//! // Writing the same value again is suppressed end to end.
//! store.write_path("user.name", json!("Bea"))?;
//! assert_eq!(seen.lock().unwrap().len(), 1);
//! # Ok(())
//! # }
//! ```
//!
//! # Core Types
//!
//! - [`Store`] - owns the instrumented state tree. [`Store::observe`]
//!   instruments a plain value; [`Store::write_path`] assigns through
//!   the intercepted accessors; [`Store::read_path`] reads without
//!   registering a dependency.
//! - [`Evaluator`] - one bindable expression. Re-runs when a property it
//!   read changes; invokes its callback only when the computed value
//!   actually changed. Dropping the handle tears the binding down.
//! - [`Scope`] - the read handle given to recomputation functions;
//!   reads through it register dependencies.
//!
//! # Dependency Tracking
//!
//! While an evaluator runs, the store marks it active. Every property
//! the evaluation reads registers the evaluator on that property's
//! channel, idempotently - reading the same property five times yields
//! one subscription. Each re-evaluation rebuilds the dependency set from
//! scratch, so an expression that reads different properties on
//! different runs sheds the stale ones.
//!
//! ```ignore
//! // Depends on "flag" plus whichever branch the flag selects.
//! let binding = Evaluator::func(&store, |scope| {
//!     if scope.get("flag") == Some(json!(true)) {
//!         scope.get("a")
//!     } else {
//!         scope.get("b")
//!     }
//! }, on_change)?;
//! ```
//!
//! # Change Suppression
//!
//! Two layers keep redundant work out of callbacks: the setter drops
//! writes that store a scalar equal to the current scalar, and the
//! evaluator drops re-evaluations whose result is unchanged (scalars by
//! value, tree objects by identity). Arrays are opaque values - their
//! contents are neither tracked nor compared.
//!
//! # Tolerant Reads, Strict Everything Else
//!
//! Reading through a missing or null link yields `None`, never an
//! error, and registers nothing below the break. Malformed paths,
//! writes through broken chains, and re-entrant evaluation (a dependency
//! cycle) fail fast with [`Error`].
//!
//! The engine is synchronous and single-threaded in design: a write runs
//! the full compare / swap / notify / re-evaluate chain on the calling
//! stack before returning. There is no batching, no scheduler, and no
//! async anything.

// Internal modules
pub(crate) mod arena;
mod error;
mod evaluator;
mod hash;
mod observe;
mod path;
mod store;

// Core types
pub use error::{Error, Result};
pub use evaluator::Evaluator;
pub use path::PathExpr;
pub use store::{Scope, Store};
