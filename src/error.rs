use std::fmt;

use thiserror::Error;

/// Errors reported to the caller of the matching engine and the dispatch rewriter.
///
/// A traversal that finds nothing is not an error; these variants only describe
/// misuse of the API or a rewrite target that does not qualify.
#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum Error {
    /// A single-result finder was queried before it found its location.
    #[error("no location found yet; check did_find_location() before reading results")]
    ResultsNotReady,

    /// A match sequence was built without a final matcher.
    #[error("match sequence has no final matcher")]
    MissingFinalMatcher,

    /// The method was already registered in this rewrite session.
    #[error("{0} is already rewritten in this session")]
    DuplicateRewrite(String),

    /// The rewrite target does not qualify for virtual dispatch.
    #[error("cannot rewrite {method}: {precondition}")]
    PreconditionFailed {
        method: String,
        precondition: Precondition,
    },

    /// The rewrite target is not declared on the given class.
    #[error("method {0} is not declared on its class")]
    MethodNotFound(String),
}

/// Rewriter precondition that a target method failed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Precondition {
    /// Static methods have no receiver to dispatch on.
    Static,
    /// Constructors and static initializers always use special dispatch.
    Initializer,
    /// Public and protected methods are already overridable.
    NotRestricted,
    /// Interface methods cannot be widened this way.
    InterfaceOwner,
}

impl fmt::Display for Precondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Precondition::Static => "method is static",
            Precondition::Initializer => "method is an initializer",
            Precondition::NotRestricted => "method is already public or protected",
            Precondition::InterfaceOwner => "method is declared on an interface",
        };
        f.write_str(text)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
