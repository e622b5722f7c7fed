use serde::{Deserialize, Serialize};

use crate::opcodes;

/// Intermediate representation for a decoded JVM class.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Class {
    pub name: String,
    #[serde(default)]
    pub super_name: Option<String>,
    #[serde(default)]
    pub is_interface: bool,
    pub methods: Vec<Method>,
    #[serde(skip)]
    pub artifact_index: i64,
}

impl Class {
    /// Find a declared method by name and descriptor.
    pub fn method(&self, name: &str, descriptor: &str) -> Option<&Method> {
        self.methods
            .iter()
            .find(|method| method.name == name && method.descriptor == descriptor)
    }

    pub fn method_mut(&mut self, name: &str, descriptor: &str) -> Option<&mut Method> {
        self.methods
            .iter_mut()
            .find(|method| method.name == name && method.descriptor == descriptor)
    }
}

/// Intermediate representation for a method and its decoded bytecode.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Method {
    pub name: String,
    pub descriptor: String,
    #[serde(default)]
    pub access: MethodAccess,
    #[serde(default)]
    pub bytecode: Vec<u8>,
    pub instructions: Vec<Instruction>,
    #[serde(default)]
    pub line_numbers: Vec<LineNumber>,
    #[serde(default)]
    pub exception_handlers: Vec<ExceptionHandler>,
}

impl Method {
    /// Call sites in instruction order.
    pub fn calls(&self) -> impl Iterator<Item = &CallSite> {
        self.instructions.iter().filter_map(|inst| match &inst.kind {
            InstructionKind::Invoke(call) => Some(call),
            _ => None,
        })
    }

    /// Resolve the source line for a bytecode offset.
    ///
    /// Offsets before the first entry map to the first entry's line.
    pub fn line_for(&self, offset: u32) -> Option<u32> {
        let covering = self
            .line_numbers
            .iter()
            .filter(|entry| entry.start_pc <= offset)
            .max_by_key(|entry| entry.start_pc);
        match covering {
            Some(entry) => Some(entry.line),
            None => self
                .line_numbers
                .iter()
                .min_by_key(|entry| entry.start_pc)
                .map(|entry| entry.line),
        }
    }
}

/// Method access flags used for dispatch decisions.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct MethodAccess {
    pub is_public: bool,
    pub is_protected: bool,
    pub is_private: bool,
    pub is_static: bool,
    pub is_abstract: bool,
}

impl MethodAccess {
    /// Neither public nor protected, so subclasses outside the package cannot override it.
    pub fn is_restricted(&self) -> bool {
        !self.is_public && !self.is_protected
    }
}

/// Entry of the LineNumberTable attribute.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct LineNumber {
    pub start_pc: u32,
    pub line: u32,
}

/// Exception handler metadata from the Code attribute.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct ExceptionHandler {
    pub start_pc: u32,
    pub end_pc: u32,
    pub handler_pc: u32,
    #[serde(default)]
    pub catch_type: Option<String>,
}

/// Bytecode instruction captured for analysis.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Instruction {
    pub offset: u32,
    pub opcode: u8,
    pub kind: InstructionKind,
}

impl Instruction {
    /// Build an instruction whose opcode is derived from its decoded kind.
    pub fn new(offset: u32, kind: InstructionKind) -> Self {
        Instruction {
            offset,
            opcode: kind.opcode(),
            kind,
        }
    }
}

/// Instruction kinds the expression walk distinguishes.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstructionKind {
    Invoke(CallSite),
    Field(FieldRef),
    New(String),
    CheckCast(String),
    InstanceOf(String),
    NewArray { component: String, dimensions: u8 },
    ConstString(String),
    Other(u8),
}

impl InstructionKind {
    /// Canonical opcode for the decoded instruction.
    pub fn opcode(&self) -> u8 {
        match self {
            InstructionKind::Invoke(call) => call.kind.opcode(),
            InstructionKind::Field(field) => field.opcode(),
            InstructionKind::New(_) => opcodes::NEW,
            InstructionKind::CheckCast(_) => opcodes::CHECKCAST,
            InstructionKind::InstanceOf(_) => opcodes::INSTANCEOF,
            InstructionKind::NewArray {
                component,
                dimensions,
            } => {
                if *dimensions > 1 {
                    opcodes::MULTIANEWARRAY
                } else if is_primitive_descriptor(component) {
                    opcodes::NEWARRAY
                } else {
                    opcodes::ANEWARRAY
                }
            }
            InstructionKind::ConstString(_) => opcodes::LDC,
            InstructionKind::Other(opcode) => *opcode,
        }
    }
}

fn is_primitive_descriptor(component: &str) -> bool {
    matches!(component, "Z" | "B" | "C" | "S" | "I" | "J" | "F" | "D")
}

/// Call site extracted from bytecode.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct CallSite {
    pub owner: String,
    pub name: String,
    pub descriptor: String,
    pub kind: CallKind,
    pub offset: u32,
}

impl CallSite {
    pub fn is_constructor(&self) -> bool {
        self.name == "<init>"
    }
}

/// Call opcode classification.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallKind {
    Virtual,
    Interface,
    Special,
    Static,
}

impl CallKind {
    pub fn opcode(self) -> u8 {
        match self {
            CallKind::Virtual => opcodes::INVOKEVIRTUAL,
            CallKind::Interface => opcodes::INVOKEINTERFACE,
            CallKind::Special => opcodes::INVOKESPECIAL,
            CallKind::Static => opcodes::INVOKESTATIC,
        }
    }
}

/// Field reference touched by a get/put instruction.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct FieldRef {
    pub owner: String,
    pub name: String,
    pub descriptor: String,
    #[serde(default)]
    pub is_static: bool,
    #[serde(default)]
    pub is_write: bool,
}

impl FieldRef {
    pub fn opcode(&self) -> u8 {
        match (self.is_static, self.is_write) {
            (true, false) => opcodes::GETSTATIC,
            (true, true) => opcodes::PUTSTATIC,
            (false, false) => opcodes::GETFIELD,
            (false, true) => opcodes::PUTFIELD,
        }
    }
}
