//! Builders for decoded method bodies used across unit tests.

use crate::ir::{
    CallKind, CallSite, Class, FieldRef, Instruction, InstructionKind, Method, MethodAccess,
};
use crate::opcodes;

pub(crate) fn method_with(name: &str, instructions: Vec<Instruction>) -> Method {
    Method {
        name: name.to_string(),
        descriptor: "()V".to_string(),
        access: MethodAccess {
            is_public: true,
            ..MethodAccess::default()
        },
        bytecode: Vec::new(),
        instructions,
        line_numbers: Vec::new(),
        exception_handlers: Vec::new(),
    }
}

pub(crate) fn class_with_methods(name: &str, methods: Vec<Method>) -> Class {
    Class {
        name: name.to_string(),
        super_name: None,
        is_interface: false,
        methods,
        artifact_index: 0,
    }
}

pub(crate) fn op(offset: u32) -> Instruction {
    Instruction::new(offset, InstructionKind::Other(opcodes::NOP))
}

fn call(offset: u32, owner: &str, name: &str, kind: CallKind) -> Instruction {
    Instruction::new(
        offset,
        InstructionKind::Invoke(CallSite {
            owner: owner.to_string(),
            name: name.to_string(),
            descriptor: "()V".to_string(),
            kind,
            offset,
        }),
    )
}

pub(crate) fn invoke(offset: u32, owner: &str, name: &str) -> Instruction {
    call(offset, owner, name, CallKind::Virtual)
}

pub(crate) fn special(offset: u32, owner: &str, name: &str) -> Instruction {
    call(offset, owner, name, CallKind::Special)
}

pub(crate) fn static_call(offset: u32, owner: &str, name: &str) -> Instruction {
    call(offset, owner, name, CallKind::Static)
}

pub(crate) fn constructor(offset: u32, owner: &str) -> Instruction {
    call(offset, owner, "<init>", CallKind::Special)
}

pub(crate) fn field_read(offset: u32, owner: &str, name: &str) -> Instruction {
    field(offset, owner, name, false)
}

pub(crate) fn field_write(offset: u32, owner: &str, name: &str) -> Instruction {
    field(offset, owner, name, true)
}

fn field(offset: u32, owner: &str, name: &str, is_write: bool) -> Instruction {
    Instruction::new(
        offset,
        InstructionKind::Field(FieldRef {
            owner: owner.to_string(),
            name: name.to_string(),
            descriptor: "I".to_string(),
            is_static: false,
            is_write,
        }),
    )
}

pub(crate) fn new_object(offset: u32, class: &str) -> Instruction {
    Instruction::new(offset, InstructionKind::New(class.to_string()))
}

pub(crate) fn cast(offset: u32, class: &str) -> Instruction {
    Instruction::new(offset, InstructionKind::CheckCast(class.to_string()))
}

pub(crate) fn instance_of(offset: u32, class: &str) -> Instruction {
    Instruction::new(offset, InstructionKind::InstanceOf(class.to_string()))
}

pub(crate) fn new_array(offset: u32, component: &str, dimensions: u8) -> Instruction {
    Instruction::new(
        offset,
        InstructionKind::NewArray {
            component: component.to_string(),
            dimensions,
        },
    )
}

/// Raw bytecode with each instruction's opcode at its offset, padded with `nop`.
pub(crate) fn encode(instructions: &[Instruction]) -> Vec<u8> {
    let len = instructions
        .iter()
        .map(|inst| inst.offset as usize + 3)
        .max()
        .unwrap_or(0);
    let mut code = vec![opcodes::NOP; len];
    for inst in instructions {
        code[inst.offset as usize] = inst.opcode;
    }
    if let Some(last) = code.last_mut() {
        *last = opcodes::RETURN;
    }
    code
}
