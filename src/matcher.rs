//! Matchers and ordered match sequences.
//!
//! A [`Matcher`] is bound to exactly one [`ExpressionKind`]; finders check the
//! kind before calling [`Matcher::matches`], so implementations never see a
//! node of another kind. A [`MatchSequence`] is an ordered prefix of matchers
//! followed by one final matcher whose hits become patch anchors.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::expr::{same_type_name, ExpressionKind, ExpressionNode};

/// Predicate over expression nodes of a single kind.
pub trait Matcher {
    fn kind(&self) -> ExpressionKind;
    fn matches(&self, node: &ExpressionNode<'_>) -> bool;
}

/// Kind-gated evaluation; the only way finders invoke a matcher.
pub(crate) fn accepts(matcher: &dyn Matcher, kind: ExpressionKind, node: &ExpressionNode<'_>) -> bool {
    matcher.kind() == kind && matcher.matches(node)
}

/// Field access direction for [`Criteria`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    Read,
    Write,
}

/// Declarative matcher: a kind plus optional constraints on the node's attributes.
///
/// Unset constraints match anything. `owner` accepts binary or internal names.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Criteria {
    pub kind: ExpressionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub descriptor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access: Option<AccessMode>,
}

impl Criteria {
    pub fn new(kind: ExpressionKind) -> Self {
        Criteria {
            kind,
            owner: None,
            name: None,
            descriptor: None,
            access: None,
        }
    }

    pub fn method_call(name: &str) -> Self {
        Criteria::new(ExpressionKind::MethodCall).named(name)
    }

    pub fn field(owner: &str, name: &str) -> Self {
        Criteria::new(ExpressionKind::FieldAccess)
            .owned_by(owner)
            .named(name)
    }

    pub fn owned_by(mut self, owner: &str) -> Self {
        self.owner = Some(owner.to_string());
        self
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn with_descriptor(mut self, descriptor: &str) -> Self {
        self.descriptor = Some(descriptor.to_string());
        self
    }

    pub fn with_access(mut self, access: AccessMode) -> Self {
        self.access = Some(access);
        self
    }
}

impl Matcher for Criteria {
    fn kind(&self) -> ExpressionKind {
        self.kind
    }

    fn matches(&self, node: &ExpressionNode<'_>) -> bool {
        if let Some(owner) = &self.owner {
            match node.owner_type() {
                Some(actual) if same_type_name(owner, actual) => {}
                _ => return false,
            }
        }
        if let Some(name) = &self.name {
            if node.member_name() != Some(name.as_str()) {
                return false;
            }
        }
        if let Some(descriptor) = &self.descriptor {
            if node.descriptor() != Some(descriptor.as_str()) {
                return false;
            }
        }
        if let Some(access) = self.access {
            let Some(field) = node.field() else {
                return false;
            };
            if field.is_write != (access == AccessMode::Write) {
                return false;
            }
        }
        true
    }
}

impl fmt::Display for Criteria {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        match (&self.owner, &self.name) {
            (Some(owner), Some(name)) => write!(f, "({owner}.{name}")?,
            (Some(owner), None) => write!(f, "({owner}")?,
            (None, Some(name)) => write!(f, "({name}")?,
            (None, None) => return Ok(()),
        }
        if let Some(descriptor) = &self.descriptor {
            write!(f, "{descriptor}")?;
        }
        f.write_str(")")
    }
}

/// Matcher backed by a closure.
pub struct FnMatcher<F> {
    kind: ExpressionKind,
    predicate: F,
}

impl<F> Matcher for FnMatcher<F>
where
    F: Fn(&ExpressionNode<'_>) -> bool,
{
    fn kind(&self) -> ExpressionKind {
        self.kind
    }

    fn matches(&self, node: &ExpressionNode<'_>) -> bool {
        (self.predicate)(node)
    }
}

/// Bind a closure to one expression kind.
pub fn matcher_fn<F>(kind: ExpressionKind, predicate: F) -> FnMatcher<F>
where
    F: Fn(&ExpressionNode<'_>) -> bool,
{
    FnMatcher { kind, predicate }
}

/// Ordered prefix plus final matcher. Immutable once built.
pub struct MatchSequence {
    prefix: Vec<Box<dyn Matcher>>,
    final_matcher: Box<dyn Matcher>,
}

impl MatchSequence {
    /// Sequence with an empty prefix.
    pub fn new(final_matcher: impl Matcher + 'static) -> Self {
        MatchSequence {
            prefix: Vec::new(),
            final_matcher: Box::new(final_matcher),
        }
    }

    pub fn builder() -> MatchSequenceBuilder {
        MatchSequenceBuilder::default()
    }

    pub fn from_spec(spec: &SequenceSpec) -> Result<Self> {
        let final_matcher = spec.final_matcher.clone().ok_or(Error::MissingFinalMatcher)?;
        let builder = spec
            .prefix
            .iter()
            .cloned()
            .fold(MatchSequence::builder(), |builder, criteria| builder.then(criteria));
        builder.finally(final_matcher).build()
    }

    pub fn prefix(&self) -> &[Box<dyn Matcher>] {
        &self.prefix
    }

    pub fn final_matcher(&self) -> &dyn Matcher {
        self.final_matcher.as_ref()
    }
}

impl fmt::Debug for MatchSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix: Vec<ExpressionKind> = self.prefix.iter().map(|matcher| matcher.kind()).collect();
        f.debug_struct("MatchSequence")
            .field("prefix", &prefix)
            .field("final", &self.final_matcher.kind())
            .finish()
    }
}

#[derive(Default)]
pub struct MatchSequenceBuilder {
    prefix: Vec<Box<dyn Matcher>>,
    final_matcher: Option<Box<dyn Matcher>>,
}

impl MatchSequenceBuilder {
    /// Append a prefix matcher.
    pub fn then(mut self, matcher: impl Matcher + 'static) -> Self {
        self.prefix.push(Box::new(matcher));
        self
    }

    /// Set the final matcher, replacing any earlier one.
    pub fn finally(mut self, matcher: impl Matcher + 'static) -> Self {
        self.final_matcher = Some(Box::new(matcher));
        self
    }

    pub fn build(self) -> Result<MatchSequence> {
        let final_matcher = self.final_matcher.ok_or(Error::MissingFinalMatcher)?;
        Ok(MatchSequence {
            prefix: self.prefix,
            final_matcher,
        })
    }
}

/// Serialized form of a [`MatchSequence`].
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SequenceSpec {
    #[serde(default)]
    pub prefix: Vec<Criteria>,
    #[serde(rename = "final", default)]
    pub final_matcher: Option<Criteria>,
}
