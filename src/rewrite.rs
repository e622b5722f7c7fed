//! Invocation-mode rewriting for restricted methods.
//!
//! Making a private or package-private method overridable takes two edits:
//! its access is widened to protected, and every `invokespecial` of that exact
//! method made from its declaring class is turned into `invokevirtual`. Calls
//! from other classes are `super` calls and keep special dispatch. A [`RewriteSession`] owns the chain
//! of call-site rules for one rewrite pass; rules are only ever appended.

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{Error, Precondition, Result};
use crate::expr::same_type_name;
use crate::ir::{CallKind, CallSite, Class, Instruction, InstructionKind, Method, MethodAccess};
use crate::opcodes;

/// Identity of a method: declaring class, name, descriptor.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize)]
pub struct MethodKey {
    pub owner: String,
    pub name: String,
    pub descriptor: String,
}

impl fmt::Display for MethodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}{}", self.owner, self.name, self.descriptor)
    }
}

/// A method considered for rewriting, with the facts the preconditions need.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RestrictedMethodDescriptor {
    pub key: MethodKey,
    pub access: MethodAccess,
    pub owner_is_interface: bool,
}

impl RestrictedMethodDescriptor {
    pub fn of(class: &Class, method: &Method) -> Self {
        RestrictedMethodDescriptor {
            key: MethodKey {
                owner: class.name.clone(),
                name: method.name.clone(),
                descriptor: method.descriptor.clone(),
            },
            access: method.access,
            owner_is_interface: class.is_interface,
        }
    }

    /// Check every precondition, reporting the first one that fails.
    pub fn check(&self) -> Result<()> {
        let precondition = if self.access.is_static {
            Some(Precondition::Static)
        } else if self.key.name.starts_with('<') {
            Some(Precondition::Initializer)
        } else if !self.access.is_restricted() {
            Some(Precondition::NotRestricted)
        } else if self.owner_is_interface {
            Some(Precondition::InterfaceOwner)
        } else {
            None
        };
        match precondition {
            Some(precondition) => Err(Error::PreconditionFailed {
                method: self.key.to_string(),
                precondition,
            }),
            None => Ok(()),
        }
    }
}

/// Call-site rule: dispatch calls to `target` virtually.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct CallSiteRewrite {
    pub target: MethodKey,
}

impl CallSiteRewrite {
    /// Whether `call`, made from a method of `caller`, dispatches to the target specially.
    pub fn applies_to(&self, caller: &str, call: &CallSite) -> bool {
        call.kind == CallKind::Special
            && call.name == self.target.name
            && call.descriptor == self.target.descriptor
            && same_type_name(&call.owner, &self.target.owner)
            && same_type_name(caller, &self.target.owner)
    }

    /// Whether `inst` in `caller`'s `method` would be rewritten by this rule.
    pub fn rewrites(&self, caller: &str, method: &Method, inst: &Instruction) -> bool {
        matches!(&inst.kind, InstructionKind::Invoke(call) if self.applies_to(caller, call))
            && holds_invokespecial(&method.bytecode, inst.offset)
    }
}

/// Raw bytecode, when present, must hold `invokespecial` at `offset`.
fn holds_invokespecial(bytecode: &[u8], offset: u32) -> bool {
    bytecode.is_empty() || bytecode.get(offset as usize) == Some(&opcodes::INVOKESPECIAL)
}

/// Rewrite rules registered during one rewrite pass.
///
/// Registration takes `&mut self`; a session has a single writer.
#[derive(Debug, Default)]
pub struct RewriteSession {
    rules: Vec<CallSiteRewrite>,
    registered: BTreeSet<MethodKey>,
}

impl RewriteSession {
    pub fn new() -> Self {
        RewriteSession::default()
    }

    /// Widen `name descriptor` on `class` to protected and register its call-site rule.
    ///
    /// Nothing is mutated when an error is returned.
    pub fn make_overridable(
        &mut self,
        class: &mut Class,
        name: &str,
        descriptor: &str,
    ) -> Result<&CallSiteRewrite> {
        let class_name = class.name.clone();
        let owner_is_interface = class.is_interface;
        let Some(method) = class.method_mut(name, descriptor) else {
            return Err(Error::MethodNotFound(format!("{class_name}.{name}{descriptor}")));
        };
        let target = RestrictedMethodDescriptor {
            key: MethodKey {
                owner: class_name,
                name: name.to_string(),
                descriptor: descriptor.to_string(),
            },
            access: method.access,
            owner_is_interface,
        };
        if self.registered.contains(&target.key) {
            return Err(Error::DuplicateRewrite(target.key.to_string()));
        }
        target.check()?;

        widen_to_protected(&mut method.access);
        info!(method = %target.key, "widened method access to protected");

        self.registered.insert(target.key.clone());
        self.rules.push(CallSiteRewrite { target: target.key });
        Ok(&self.rules[self.rules.len() - 1])
    }

    pub fn rules(&self) -> &[CallSiteRewrite] {
        &self.rules
    }

    pub fn is_rewritten(&self, key: &MethodKey) -> bool {
        self.registered.contains(key)
    }

    /// Rewrite matching `invokespecial` sites in `method` of class `caller`;
    /// returns how many changed.
    ///
    /// A site whose raw bytecode does not hold `invokespecial` is left alone.
    pub fn apply_to_method(&self, caller: &str, method: &mut Method) -> usize {
        let Method {
            name,
            bytecode,
            instructions,
            ..
        } = method;
        let mut rewritten = 0;
        for inst in instructions.iter_mut() {
            let InstructionKind::Invoke(call) = &mut inst.kind else {
                continue;
            };
            if !self.rules.iter().any(|rule| rule.applies_to(caller, call)) {
                continue;
            }
            if !holds_invokespecial(bytecode.as_slice(), inst.offset) {
                warn!(
                    caller = %name,
                    offset = inst.offset,
                    found = ?bytecode.get(inst.offset as usize),
                    "bytecode does not hold invokespecial; call site left unchanged"
                );
                continue;
            }
            call.kind = CallKind::Virtual;
            inst.opcode = opcodes::INVOKEVIRTUAL;
            if let Some(byte) = bytecode.get_mut(inst.offset as usize) {
                *byte = opcodes::INVOKEVIRTUAL;
            }
            debug!(
                caller = %name,
                offset = inst.offset,
                owner = %call.owner,
                callee = %call.name,
                "rewrote call site to virtual dispatch"
            );
            rewritten += 1;
        }
        rewritten
    }

    /// Apply the rule chain to every method of `class`.
    pub fn apply(&self, class: &mut Class) -> usize {
        let Class { name, methods, .. } = class;
        let caller = name.as_str();
        methods
            .iter_mut()
            .map(|method| self.apply_to_method(caller, method))
            .sum()
    }
}

fn widen_to_protected(access: &mut MethodAccess) {
    access.is_private = false;
    access.is_protected = true;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Method;
    use crate::testing::{
        class_with_methods, constructor, encode, invoke, method_with, special, static_call,
    };

    const APP: &str = "com/example/App";

    fn private_method(name: &str) -> Method {
        let mut method = method_with(name, Vec::new());
        method.access = MethodAccess {
            is_private: true,
            ..MethodAccess::default()
        };
        method
    }

    fn caller() -> Method {
        let instructions = vec![
            special(0, APP, "draw"),
            special(3, APP, "layout"),
            special(6, "com/example/Base", "draw"),
            invoke(9, APP, "draw"),
            static_call(12, APP, "draw"),
            constructor(15, APP),
        ];
        let mut method = method_with("render", instructions);
        method.bytecode = encode(&method.instructions);
        method
    }

    fn app() -> Class {
        class_with_methods(
            APP,
            vec![private_method("draw"), private_method("layout"), caller()],
        )
    }

    fn call_kinds(method: &Method) -> Vec<CallKind> {
        method.calls().map(|call| call.kind).collect()
    }

    #[test]
    fn private_method_becomes_virtual() {
        let mut class = app();
        let mut session = RewriteSession::new();

        let rule = session
            .make_overridable(&mut class, "draw", "()V")
            .expect("rewrite draw")
            .clone();
        let rewritten = session.apply(&mut class);

        assert_eq!("com/example/App.draw()V", rule.target.to_string());
        assert_eq!(1, rewritten);
        let draw = class.method("draw", "()V").expect("draw");
        assert!(!draw.access.is_private);
        assert!(draw.access.is_protected);
        assert!(!draw.access.is_restricted());
        let render = class.method("render", "()V").expect("render");
        assert_eq!(
            vec![
                CallKind::Virtual,
                CallKind::Special,
                CallKind::Special,
                CallKind::Virtual,
                CallKind::Static,
                CallKind::Special,
            ],
            call_kinds(render)
        );
        assert_eq!(opcodes::INVOKEVIRTUAL, render.instructions[0].opcode);
        assert_eq!(opcodes::INVOKEVIRTUAL, render.bytecode[0]);
        assert_eq!(opcodes::INVOKESPECIAL, render.bytecode[3]);
        assert_eq!(opcodes::INVOKESPECIAL, render.bytecode[6]);
    }

    #[test]
    fn rules_chain_across_methods() {
        let mut class = app();
        let mut session = RewriteSession::new();

        session
            .make_overridable(&mut class, "draw", "()V")
            .expect("rewrite draw");
        session
            .make_overridable(&mut class, "layout", "()V")
            .expect("rewrite layout");
        let rewritten = session.apply(&mut class);

        assert_eq!(2, session.rules().len());
        assert_eq!(2, rewritten);
        let render = class.method("render", "()V").expect("render");
        assert_eq!(CallKind::Virtual, call_kinds(render)[1]);
        assert_eq!(opcodes::INVOKEVIRTUAL, render.bytecode[3]);
    }

    #[test]
    fn package_private_method_is_restricted() {
        let mut class = app();
        class.methods[0].access = MethodAccess::default();
        let mut session = RewriteSession::new();

        session
            .make_overridable(&mut class, "draw", "()V")
            .expect("rewrite package-private draw");

        assert!(class.methods[0].access.is_protected);
    }

    fn expect_precondition(class: &mut Class, name: &str, expected: Precondition) {
        let before = class.method(name, "()V").expect("method").access;
        let mut session = RewriteSession::new();

        let err = session
            .make_overridable(class, name, "()V")
            .expect_err("precondition should fail");

        assert_eq!(
            Error::PreconditionFailed {
                method: format!("{}.{}()V", class.name, name),
                precondition: expected,
            },
            err
        );
        assert!(session.rules().is_empty());
        assert_eq!(before, class.method(name, "()V").expect("method").access);
        assert_eq!(0, session.apply(class));
    }

    #[test]
    fn static_method_is_rejected() {
        let mut class = app();
        class.methods[0].access.is_static = true;

        expect_precondition(&mut class, "draw", Precondition::Static);
        let render = class.method("render", "()V").expect("render");
        assert_eq!(CallKind::Special, call_kinds(render)[0]);
    }

    #[test]
    fn public_and_protected_methods_are_rejected() {
        let mut class = app();
        class.methods[0].access = MethodAccess {
            is_public: true,
            ..MethodAccess::default()
        };
        class.methods[1].access = MethodAccess {
            is_protected: true,
            ..MethodAccess::default()
        };

        expect_precondition(&mut class, "draw", Precondition::NotRestricted);
        expect_precondition(&mut class, "layout", Precondition::NotRestricted);
    }

    #[test]
    fn interface_method_is_rejected() {
        let mut class = app();
        class.is_interface = true;

        expect_precondition(&mut class, "draw", Precondition::InterfaceOwner);
    }

    #[test]
    fn constructor_is_rejected() {
        let mut class = app();
        class.methods.push(private_method("<init>"));

        expect_precondition(&mut class, "<init>", Precondition::Initializer);
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut class = app();
        let mut session = RewriteSession::new();
        session
            .make_overridable(&mut class, "draw", "()V")
            .expect("first rewrite");

        let err = session
            .make_overridable(&mut class, "draw", "()V")
            .expect_err("second rewrite");

        assert_eq!(
            Error::DuplicateRewrite("com/example/App.draw()V".to_string()),
            err
        );
        assert_eq!(1, session.rules().len());
        assert!(session.is_rewritten(&session.rules()[0].target));
    }

    #[test]
    fn unknown_method_is_reported() {
        let mut class = app();
        let mut session = RewriteSession::new();

        let err = session
            .make_overridable(&mut class, "draw", "(I)V")
            .expect_err("missing overload");

        assert_eq!(
            Error::MethodNotFound("com/example/App.draw(I)V".to_string()),
            err
        );
    }

    #[test]
    fn descriptor_check_is_usable_before_rewriting() {
        let class = app();
        let draw = class.method("draw", "()V").expect("draw");
        let render = class.method("render", "()V").expect("render");

        assert!(RestrictedMethodDescriptor::of(&class, draw).check().is_ok());
        assert!(RestrictedMethodDescriptor::of(&class, render).check().is_err());
    }

    fn subclass_calling_super_draw() -> Class {
        let mut draw = method_with("draw", vec![special(0, "com/example/Base", "draw")]);
        draw.bytecode = encode(&draw.instructions);
        let mut class = class_with_methods("com/example/Sub", vec![draw]);
        class.super_name = Some("com/example/Base".to_string());
        class
    }

    #[test]
    fn super_call_from_subclass_keeps_special_dispatch() {
        let base_draw = {
            let mut method = method_with("draw", Vec::new());
            method.access = MethodAccess::default();
            method
        };
        let mut base = class_with_methods("com/example/Base", vec![base_draw]);
        let mut sub = subclass_calling_super_draw();
        let mut session = RewriteSession::new();

        let rule = session
            .make_overridable(&mut base, "draw", "()V")
            .expect("rewrite package-private draw")
            .clone();
        let rewritten = session.apply(&mut base) + session.apply(&mut sub);

        assert_eq!(0, rewritten);
        let draw = sub.method("draw", "()V").expect("sub draw");
        assert!(!rule.rewrites(&sub.name, draw, &draw.instructions[0]));
        assert_eq!(vec![CallKind::Special], call_kinds(draw));
        assert_eq!(opcodes::INVOKESPECIAL, draw.instructions[0].opcode);
        assert_eq!(opcodes::INVOKESPECIAL, draw.bytecode[0]);
    }

    #[test]
    fn mismatched_bytecode_leaves_call_site_unchanged() {
        let mut class = app();
        let render = class.method_mut("render", "()V").expect("render");
        render.bytecode[0] = opcodes::NOP;
        let mut session = RewriteSession::new();
        session
            .make_overridable(&mut class, "draw", "()V")
            .expect("rewrite draw");
        let rule = session.rules()[0].clone();
        let render = class.method("render", "()V").expect("render");
        assert!(!rule.rewrites(APP, render, &render.instructions[0]));

        let rewritten = session.apply(&mut class);

        assert_eq!(0, rewritten);
        let render = class.method("render", "()V").expect("render");
        assert_eq!(CallKind::Special, call_kinds(render)[0]);
        assert_eq!(opcodes::INVOKESPECIAL, render.instructions[0].opcode);
        assert_eq!(opcodes::NOP, render.bytecode[0]);
    }

    #[test]
    fn missing_bytecode_rewrites_decoded_form_only() {
        let mut class = app();
        class.method_mut("render", "()V").expect("render").bytecode.clear();
        let mut session = RewriteSession::new();
        session
            .make_overridable(&mut class, "draw", "()V")
            .expect("rewrite draw");

        assert_eq!(1, session.apply(&mut class));
        let render = class.method("render", "()V").expect("render");
        assert_eq!(CallKind::Virtual, call_kinds(render)[0]);
        assert!(render.bytecode.is_empty());
    }
}
