//! Ordered, non-backtracking location finders.
//!
//! Both finders consume the prefix of a [`MatchSequence`] left to right, one
//! matcher per accepted node. A node that fails the current prefix matcher is
//! skipped; nothing resets and nothing is retried. Once the prefix is consumed
//! the final matcher is tested on each later node. [`FirstMatchFinder`] stops at
//! the first hit, [`AllMatchesFinder`] collects every hit for the rest of the
//! walk.

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::expr::{walk, ExpressionKind, ExpressionNode};
use crate::ir::Method;
use crate::matcher::{accepts, MatchSequence};

/// Located attachment point for injected behavior.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct PatchAnchor {
    pub offset: u32,
    pub line: Option<u32>,
    pub kind: ExpressionKind,
}

impl PatchAnchor {
    fn at(kind: ExpressionKind, node: &ExpressionNode<'_>) -> Self {
        PatchAnchor {
            offset: node.position.offset,
            line: node.position.line,
            kind,
        }
    }
}

/// Consumer of one classified traversal that reports anchors afterwards.
pub trait LocationFinder {
    fn visit(&mut self, kind: ExpressionKind, node: &ExpressionNode<'_>);
    fn did_find_location(&self) -> bool;
    fn found_locations(&self) -> Result<&[PatchAnchor]>;
}

/// Progress through the ordered prefix.
#[derive(Debug, Default)]
struct PrefixCursor {
    next: usize,
}

impl PrefixCursor {
    fn is_consumed(&self, sequence: &MatchSequence) -> bool {
        self.next >= sequence.prefix().len()
    }

    /// Offer a node to the current prefix matcher, advancing on success.
    fn offer(&mut self, sequence: &MatchSequence, kind: ExpressionKind, node: &ExpressionNode<'_>) {
        let matcher = &sequence.prefix()[self.next];
        if accepts(&**matcher, kind, node) {
            trace!(
                step = self.next,
                offset = node.position.offset,
                %kind,
                "prefix matcher accepted node"
            );
            self.next += 1;
        }
    }
}

/// Reports the first final-matcher hit after the prefix.
#[derive(Debug)]
pub struct FirstMatchFinder<'s> {
    sequence: &'s MatchSequence,
    cursor: PrefixCursor,
    found: Option<PatchAnchor>,
}

impl<'s> FirstMatchFinder<'s> {
    pub fn new(sequence: &'s MatchSequence) -> Self {
        FirstMatchFinder {
            sequence,
            cursor: PrefixCursor::default(),
            found: None,
        }
    }
}

impl LocationFinder for FirstMatchFinder<'_> {
    fn visit(&mut self, kind: ExpressionKind, node: &ExpressionNode<'_>) {
        if self.found.is_some() {
            return;
        }
        if self.cursor.is_consumed(self.sequence) {
            if accepts(self.sequence.final_matcher(), kind, node) {
                let anchor = PatchAnchor::at(kind, node);
                debug!(offset = anchor.offset, line = ?anchor.line, %kind, "found patch anchor");
                self.found = Some(anchor);
            }
        } else {
            self.cursor.offer(self.sequence, kind, node);
        }
    }

    fn did_find_location(&self) -> bool {
        self.found.is_some()
    }

    fn found_locations(&self) -> Result<&[PatchAnchor]> {
        self.found
            .as_ref()
            .map(std::slice::from_ref)
            .ok_or(Error::ResultsNotReady)
    }
}

/// Reports every final-matcher hit after the prefix, in traversal order.
///
/// The prefix is consumed once; its cursor is never reset after a hit.
#[derive(Debug)]
pub struct AllMatchesFinder<'s> {
    sequence: &'s MatchSequence,
    cursor: PrefixCursor,
    found: Vec<PatchAnchor>,
}

impl<'s> AllMatchesFinder<'s> {
    pub fn new(sequence: &'s MatchSequence) -> Self {
        AllMatchesFinder {
            sequence,
            cursor: PrefixCursor::default(),
            found: Vec::new(),
        }
    }

    pub fn into_locations(self) -> Vec<PatchAnchor> {
        self.found
    }
}

impl LocationFinder for AllMatchesFinder<'_> {
    fn visit(&mut self, kind: ExpressionKind, node: &ExpressionNode<'_>) {
        if self.cursor.is_consumed(self.sequence) {
            if accepts(self.sequence.final_matcher(), kind, node) {
                let anchor = PatchAnchor::at(kind, node);
                debug!(
                    offset = anchor.offset,
                    line = ?anchor.line,
                    %kind,
                    count = self.found.len() + 1,
                    "found patch anchor"
                );
                self.found.push(anchor);
            }
        } else {
            self.cursor.offer(self.sequence, kind, node);
        }
    }

    fn did_find_location(&self) -> bool {
        !self.found.is_empty()
    }

    fn found_locations(&self) -> Result<&[PatchAnchor]> {
        Ok(&self.found)
    }
}

/// Run `finder` over one walk of `method`.
pub fn run_finder<F: LocationFinder>(finder: &mut F, owner: &str, method: &Method) {
    walk(owner, method, |kind, node| finder.visit(kind, node));
}

/// First anchor for `sequence` in `method`, if any.
pub fn locate_first(owner: &str, method: &Method, sequence: &MatchSequence) -> Option<PatchAnchor> {
    let mut finder = FirstMatchFinder::new(sequence);
    run_finder(&mut finder, owner, method);
    finder.found
}

/// Every anchor for `sequence` in `method`.
pub fn locate_all(owner: &str, method: &Method, sequence: &MatchSequence) -> Vec<PatchAnchor> {
    let mut finder = AllMatchesFinder::new(sequence);
    run_finder(&mut finder, owner, method);
    finder.into_locations()
}
