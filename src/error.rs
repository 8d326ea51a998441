use thiserror::Error;

/// Errors surfaced by the binding engine.
///
/// Only genuinely fatal conditions become errors. Tolerant behavior is
/// the default everywhere else: a read through a missing or null link
/// resolves to `None`, and observing a non-object root leaves the store
/// inert rather than failing.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A path expression contains a character outside `[\w.$]` or an
    /// empty segment. Rejected when the expression is compiled, instead
    /// of silently evaluating to nothing forever after.
    #[error("invalid path expression `{0}`")]
    InvalidExpression(String),

    /// An evaluation started while another evaluator was already active
    /// on the same store. Indicates a dependency cycle or a recursive
    /// evaluation; fatal, never retried.
    #[error("re-entrant evaluation: another evaluator is already active")]
    ReentrantEvaluation,

    /// A write could not reach a property slot because an intermediate
    /// segment was missing, null, or not an object. Reads degrade to
    /// `None` in this situation; losing a write silently is not
    /// acceptable.
    #[error("cannot write through `{0}`: path does not resolve to a property")]
    UnresolvedPath(String),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;
