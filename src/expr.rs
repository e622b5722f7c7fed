//! Expression classification over a decoded method body.
//!
//! [`walk`] performs one forward pass over a method's instructions and hands
//! every node the matching engine cares about to a single handler, tagged with
//! exactly one [`ExpressionKind`]. Instructions outside the kind set (loads,
//! arithmetic, bare `new`) are skipped. Exception handlers are visited after
//! the instruction pass, in exception-table order.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ir::{CallSite, ExceptionHandler, FieldRef, InstructionKind, Method};

/// Closed set of expression kinds a matcher can be bound to.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpressionKind {
    MethodCall,
    FieldAccess,
    ConstructorCall,
    ObjectConstruction,
    TypeCast,
    TypeCheck,
    ArrayConstruction,
    ExceptionHandlerEntry,
}

impl ExpressionKind {
    pub const ALL: [ExpressionKind; 8] = [
        ExpressionKind::MethodCall,
        ExpressionKind::FieldAccess,
        ExpressionKind::ConstructorCall,
        ExpressionKind::ObjectConstruction,
        ExpressionKind::TypeCast,
        ExpressionKind::TypeCheck,
        ExpressionKind::ArrayConstruction,
        ExpressionKind::ExceptionHandlerEntry,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ExpressionKind::MethodCall => "method_call",
            ExpressionKind::FieldAccess => "field_access",
            ExpressionKind::ConstructorCall => "constructor_call",
            ExpressionKind::ObjectConstruction => "object_construction",
            ExpressionKind::TypeCast => "type_cast",
            ExpressionKind::TypeCheck => "type_check",
            ExpressionKind::ArrayConstruction => "array_construction",
            ExpressionKind::ExceptionHandlerEntry => "exception_handler_entry",
        }
    }
}

impl fmt::Display for ExpressionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Location of a node inside its method body.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct SourcePosition {
    pub offset: u32,
    pub line: Option<u32>,
}

/// Kind-specific attributes of an expression node.
#[derive(Clone, Copy, Debug)]
pub enum NodeDetail<'m> {
    /// Method call or explicit constructor chaining.
    Call(&'m CallSite),
    Field(&'m FieldRef),
    /// `new T(..)`: the `<init>` call paired with its `new` instruction.
    Construction { call: &'m CallSite, new_offset: u32 },
    /// Target type of a cast or instanceof.
    Type(&'m str),
    Array { component: &'m str, dimensions: u8 },
    Handler(&'m ExceptionHandler),
}

/// One classified node, borrowed from the method being walked.
#[derive(Clone, Copy, Debug)]
pub struct ExpressionNode<'m> {
    pub kind: ExpressionKind,
    /// Internal name of the class declaring `method`.
    pub owner: &'m str,
    pub method: &'m Method,
    pub position: SourcePosition,
    pub detail: NodeDetail<'m>,
}

impl<'m> ExpressionNode<'m> {
    /// Type the node refers to: callee owner, field owner, constructed,
    /// cast or checked type, array component, or caught exception type.
    pub fn owner_type(&self) -> Option<&'m str> {
        match self.detail {
            NodeDetail::Call(call) => Some(call.owner.as_str()),
            NodeDetail::Field(field) => Some(field.owner.as_str()),
            NodeDetail::Construction { call, .. } => Some(call.owner.as_str()),
            NodeDetail::Type(name) => Some(name),
            NodeDetail::Array { component, .. } => Some(component),
            NodeDetail::Handler(handler) => handler.catch_type.as_deref(),
        }
    }

    /// Callee or field name.
    pub fn member_name(&self) -> Option<&'m str> {
        match self.detail {
            NodeDetail::Call(call) => Some(call.name.as_str()),
            NodeDetail::Field(field) => Some(field.name.as_str()),
            NodeDetail::Construction { call, .. } => Some(call.name.as_str()),
            _ => None,
        }
    }

    pub fn descriptor(&self) -> Option<&'m str> {
        match self.detail {
            NodeDetail::Call(call) => Some(call.descriptor.as_str()),
            NodeDetail::Field(field) => Some(field.descriptor.as_str()),
            NodeDetail::Construction { call, .. } => Some(call.descriptor.as_str()),
            _ => None,
        }
    }

    pub fn field(&self) -> Option<&'m FieldRef> {
        match self.detail {
            NodeDetail::Field(field) => Some(field),
            _ => None,
        }
    }
}

/// Map one decoded instruction to its expression kind.
///
/// `pairs_with_new` tells whether an `<init>` call completes a pending `new`.
pub fn classify(kind: &InstructionKind, pairs_with_new: bool) -> Option<ExpressionKind> {
    // The paired `new` offset never changes the kind.
    classify_node(kind, pairs_with_new.then_some(0)).map(|(kind, _)| kind)
}

/// Kind and attributes of one instruction; `paired_new` is the offset of the
/// `new` an `<init>` call completes.
fn classify_node(
    kind: &InstructionKind,
    paired_new: Option<u32>,
) -> Option<(ExpressionKind, NodeDetail<'_>)> {
    let classified = match kind {
        InstructionKind::Invoke(call) if call.is_constructor() => match paired_new {
            Some(new_offset) => (
                ExpressionKind::ObjectConstruction,
                NodeDetail::Construction { call, new_offset },
            ),
            None => (ExpressionKind::ConstructorCall, NodeDetail::Call(call)),
        },
        InstructionKind::Invoke(call) => (ExpressionKind::MethodCall, NodeDetail::Call(call)),
        InstructionKind::Field(field) => (ExpressionKind::FieldAccess, NodeDetail::Field(field)),
        InstructionKind::CheckCast(name) => (ExpressionKind::TypeCast, NodeDetail::Type(name)),
        InstructionKind::InstanceOf(name) => (ExpressionKind::TypeCheck, NodeDetail::Type(name)),
        InstructionKind::NewArray {
            component,
            dimensions,
        } => (
            ExpressionKind::ArrayConstruction,
            NodeDetail::Array {
                component,
                dimensions: *dimensions,
            },
        ),
        InstructionKind::New(_) | InstructionKind::ConstString(_) | InstructionKind::Other(_) => {
            return None;
        }
    };
    Some(classified)
}

/// Walk `method` once and relay every classified node to `handler`.
pub fn walk<'m, F>(owner: &'m str, method: &'m Method, mut handler: F)
where
    F: FnMut(ExpressionKind, &ExpressionNode<'m>),
{
    // Unpaired `new` instructions, innermost last: (class, offset).
    let mut pending_new: Vec<(&'m str, u32)> = Vec::new();

    for inst in &method.instructions {
        if let InstructionKind::New(class) = &inst.kind {
            pending_new.push((class.as_str(), inst.offset));
            continue;
        }

        let paired_new = match &inst.kind {
            InstructionKind::Invoke(call) if call.is_constructor() => {
                let pairs = matches!(
                    pending_new.last(),
                    Some((class, _)) if same_type_name(class, &call.owner)
                );
                if pairs {
                    pending_new.pop().map(|(_, new_offset)| new_offset)
                } else {
                    None
                }
            }
            _ => None,
        };

        let Some((kind, detail)) = classify_node(&inst.kind, paired_new) else {
            continue;
        };
        let node = ExpressionNode {
            kind,
            owner,
            method,
            position: position_of(method, inst.offset),
            detail,
        };
        handler(kind, &node);
    }

    for exception_handler in &method.exception_handlers {
        let node = ExpressionNode {
            kind: ExpressionKind::ExceptionHandlerEntry,
            owner,
            method,
            position: position_of(method, exception_handler.handler_pc),
            detail: NodeDetail::Handler(exception_handler),
        };
        handler(ExpressionKind::ExceptionHandlerEntry, &node);
    }
}

fn position_of(method: &Method, offset: u32) -> SourcePosition {
    SourcePosition {
        offset,
        line: method.line_for(offset),
    }
}

/// Compare type names, treating binary (`a.b.C`) and internal (`a/b/C`) forms alike.
pub fn same_type_name(left: &str, right: &str) -> bool {
    left.len() == right.len()
        && left
            .bytes()
            .zip(right.bytes())
            .all(|(l, r)| l == r || matches!((l, r), (b'.', b'/') | (b'/', b'.')))
}
