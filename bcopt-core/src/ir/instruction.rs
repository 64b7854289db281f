//! Instruction Model
//!
//! Instructions carry an opcode category, an optional destination register,
//! the ordered source registers, and at most one referenced field, method, or
//! type. The analysis never interprets instruction payloads beyond these
//! pieces, so no encoding details live here.
//!
//! # Register Conventions
//! - `Construct`: `dest` receives the new instance, `type_ref` names its type
//! - `Move`: `dest` receives the value in `srcs[0]`
//! - `FieldWrite`: `srcs[0]` is the stored value, `srcs[1]` the receiver
//! - `FieldRead`: `dest` receives the value of `field_ref` on `srcs[0]`
//! - `InvokeVirtual`: `srcs[0]` is the receiver, `srcs[1..]` the arguments
//! - `InvokeStatic`: all of `srcs` are arguments
//! - `Return`: `srcs[0]` is the returned register (absent for void)
//! - `ArrayStore`: `srcs[0]` is the stored value, `srcs[1]` the array,
//!   `srcs[2]` the index
//! - `Branch` / `Other`: opaque to the analysis

use smallvec::SmallVec;

use crate::ir::{FieldId, MethodId, TypeId};

/// Register index within a method frame.
///
/// 16 bits cover the full register file of the source format.
pub type Reg = u16;

/// Instruction category.
///
/// Uses `#[repr(u8)]` to reduce size from the default enum size to 1 byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// Allocates a new instance of `type_ref` into `dest`
    Construct = 0,
    /// Register-to-register copy
    Move = 1,
    /// Reads `field_ref` from the receiver in `srcs[0]`
    FieldRead = 2,
    /// Writes `srcs[0]` into `field_ref` of the receiver in `srcs[1]`
    FieldWrite = 3,
    /// Virtual dispatch on the receiver in `srcs[0]`
    InvokeVirtual = 4,
    /// Static call; every source register is an argument
    InvokeStatic = 5,
    /// Returns `srcs[0]` (or nothing) to the caller
    Return = 6,
    /// Stores `srcs[0]` into an array element
    ArrayStore = 7,
    /// Conditional or unconditional control transfer
    Branch = 8,
    /// Any instruction the analysis treats as opaque
    Other = 9,
}

/// A single IR instruction.
///
/// Identity matters: instructions live in the program's instruction store and
/// are referred to by [`InsnId`](crate::ir::InsnId) everywhere, so two
/// occurrences of the same id denote the same instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    /// Opcode category (1 byte enum)
    pub opcode: Opcode,
    /// Destination register, if the instruction defines one
    pub dest: Option<Reg>,
    /// Source registers in operand order
    /// Uses SmallVec with inline capacity for 4 (most instructions have <=4)
    pub srcs: SmallVec<[Reg; 4]>,
    /// Referenced type (constructions)
    pub type_ref: Option<TypeId>,
    /// Referenced field (field reads/writes)
    pub field_ref: Option<FieldId>,
    /// Referenced method (invokes)
    pub method_ref: Option<MethodId>,
}

impl Instruction {
    fn bare(opcode: Opcode) -> Self {
        Instruction {
            opcode,
            dest: None,
            srcs: SmallVec::new(),
            type_ref: None,
            field_ref: None,
            method_ref: None,
        }
    }

    /// `dest = new type_ref`
    pub fn construct(ty: TypeId, dest: Reg) -> Self {
        let mut insn = Self::bare(Opcode::Construct);
        insn.dest = Some(dest);
        insn.type_ref = Some(ty);
        insn
    }

    /// `dest = src`
    pub fn move_value(dest: Reg, src: Reg) -> Self {
        let mut insn = Self::bare(Opcode::Move);
        insn.dest = Some(dest);
        insn.srcs.push(src);
        insn
    }

    /// `receiver.field = value`
    pub fn field_write(field: FieldId, value: Reg, receiver: Reg) -> Self {
        let mut insn = Self::bare(Opcode::FieldWrite);
        insn.srcs.push(value);
        insn.srcs.push(receiver);
        insn.field_ref = Some(field);
        insn
    }

    /// `dest = receiver.field`
    pub fn field_read(field: FieldId, dest: Reg, receiver: Reg) -> Self {
        let mut insn = Self::bare(Opcode::FieldRead);
        insn.dest = Some(dest);
        insn.srcs.push(receiver);
        insn.field_ref = Some(field);
        insn
    }

    /// `receiver.method(args...)`
    pub fn invoke_virtual(method: MethodId, receiver: Reg, args: &[Reg]) -> Self {
        let mut insn = Self::bare(Opcode::InvokeVirtual);
        insn.srcs.push(receiver);
        insn.srcs.extend_from_slice(args);
        insn.method_ref = Some(method);
        insn
    }

    /// `method(args...)`
    pub fn invoke_static(method: MethodId, args: &[Reg]) -> Self {
        let mut insn = Self::bare(Opcode::InvokeStatic);
        insn.srcs.extend_from_slice(args);
        insn.method_ref = Some(method);
        insn
    }

    /// `return src` (or a void return when `src` is `None`)
    pub fn ret(src: Option<Reg>) -> Self {
        let mut insn = Self::bare(Opcode::Return);
        if let Some(reg) = src {
            insn.srcs.push(reg);
        }
        insn
    }

    /// `array[index] = value`
    pub fn array_store(value: Reg, array: Reg, index: Reg) -> Self {
        let mut insn = Self::bare(Opcode::ArrayStore);
        insn.srcs.push(value);
        insn.srcs.push(array);
        insn.srcs.push(index);
        insn
    }

    /// Control transfer reading the given condition registers.
    pub fn branch(condition: &[Reg]) -> Self {
        let mut insn = Self::bare(Opcode::Branch);
        insn.srcs.extend_from_slice(condition);
        insn
    }

    /// Opaque instruction, optionally clobbering a destination register.
    pub fn other(dest: Option<Reg>) -> Self {
        let mut insn = Self::bare(Opcode::Other);
        insn.dest = dest;
        insn
    }
}
