//! Patch-anchor location and dispatch rewriting for decoded JVM method bodies.
//!
//! The pieces, leaves first:
//!
//! * [`ir`] holds decoded classes, methods and instructions.
//! * [`expr`] classifies one forward walk of a method into [`expr::ExpressionKind`]s.
//! * [`matcher`] defines kind-bound matchers and ordered [`matcher::MatchSequence`]s.
//! * [`finder`] runs a sequence over a walk and reports [`finder::PatchAnchor`]s.
//! * [`rewrite`] widens restricted methods and turns their `invokespecial`
//!   call sites into `invokevirtual`.

pub mod error;
pub mod expr;
pub mod finder;
pub mod ir;
pub mod matcher;
pub mod opcodes;
pub mod rewrite;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{Error, Precondition};
pub use expr::{ExpressionKind, ExpressionNode};
pub use finder::{
    locate_all, locate_first, AllMatchesFinder, FirstMatchFinder, LocationFinder, PatchAnchor,
};
pub use matcher::{Criteria, MatchSequence, Matcher, SequenceSpec};
pub use rewrite::{RestrictedMethodDescriptor, RewriteSession};
