//! IR Program Model
//!
//! The in-memory view of a loaded program that the analyses consume: types
//! with supertype links, classes with their methods, fields, and a global
//! instruction store. Everything is referred to through small copyable id
//! newtypes (`u32` indices into the program's stores), which gives every
//! entity the stable identity the analysis keys its maps on.
//!
//! Methods come in two flavors: defined methods carry a CFG, while external
//! references (callees that exist only as targets of invoke instructions)
//! carry none. Both are ordinary `MethodId`s.

pub mod cfg;
pub mod instruction;

use std::collections::HashMap;

pub use cfg::{BasicBlock, ControlFlowGraph};
pub use instruction::{Instruction, Opcode, Reg};

/// Identity of a type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub u32);

/// Identity of a class definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(pub u32);

/// Identity of a method (defined or referenced).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodId(pub u32);

/// Identity of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldId(pub u32);

/// Identity of an instruction in the program's instruction store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InsnId(pub u32);

#[derive(Debug, Clone)]
pub struct TypeDef {
    pub name: String,
    pub supertype: Option<TypeId>,
}

#[derive(Debug, Clone)]
pub struct ClassDef {
    /// The type this class defines
    pub ty: TypeId,
    /// Methods defined on this class
    pub methods: Vec<MethodId>,
}

#[derive(Debug, Clone)]
pub struct MethodDef {
    pub name: String,
    /// Type of the class the method belongs to
    pub owner: TypeId,
    /// Absent for external method references and abstract methods
    pub cfg: Option<ControlFlowGraph>,
}

#[derive(Debug, Clone)]
pub struct FieldDef {
    pub name: String,
    pub owner: TypeId,
}

/// The whole program: all stores plus the class index.
#[derive(Debug, Clone, Default)]
pub struct Program {
    types: Vec<TypeDef>,
    classes: Vec<ClassDef>,
    methods: Vec<MethodDef>,
    fields: Vec<FieldDef>,
    insns: Vec<Instruction>,
    /// Class lookup by defined type
    class_index: HashMap<TypeId, ClassId>,
}

impl Program {
    pub fn new() -> Self {
        Program::default()
    }

    /// Register a type, returning its id.
    pub fn add_type(&mut self, name: impl Into<String>, supertype: Option<TypeId>) -> TypeId {
        let id = TypeId(self.types.len() as u32);
        self.types.push(TypeDef {
            name: name.into(),
            supertype,
        });
        id
    }

    /// Set or replace the supertype link of an already-registered type.
    pub fn set_supertype(&mut self, ty: TypeId, supertype: Option<TypeId>) {
        self.types[ty.0 as usize].supertype = supertype;
    }

    /// Register a class definition for an already-registered type.
    pub fn add_class(&mut self, ty: TypeId) -> ClassId {
        let id = ClassId(self.classes.len() as u32);
        self.classes.push(ClassDef {
            ty,
            methods: Vec::new(),
        });
        self.class_index.insert(ty, id);
        id
    }

    /// Register a method on `owner`.
    ///
    /// If a class definition exists for `owner` the method is attached to it;
    /// otherwise the method acts as an external reference.
    pub fn add_method(&mut self, owner: TypeId, name: impl Into<String>) -> MethodId {
        let id = MethodId(self.methods.len() as u32);
        self.methods.push(MethodDef {
            name: name.into(),
            owner,
            cfg: None,
        });
        if let Some(&class) = self.class_index.get(&owner) {
            self.classes[class.0 as usize].methods.push(id);
        }
        id
    }

    pub fn add_field(&mut self, owner: TypeId, name: impl Into<String>) -> FieldId {
        let id = FieldId(self.fields.len() as u32);
        self.fields.push(FieldDef {
            name: name.into(),
            owner,
        });
        id
    }

    /// Append an instruction to the instruction store.
    pub fn add_insn(&mut self, insn: Instruction) -> InsnId {
        let id = InsnId(self.insns.len() as u32);
        self.insns.push(insn);
        id
    }

    pub fn set_method_cfg(&mut self, method: MethodId, cfg: ControlFlowGraph) {
        self.methods[method.0 as usize].cfg = Some(cfg);
    }

    pub fn type_def(&self, ty: TypeId) -> &TypeDef {
        &self.types[ty.0 as usize]
    }

    pub fn class(&self, class: ClassId) -> &ClassDef {
        &self.classes[class.0 as usize]
    }

    pub fn method(&self, method: MethodId) -> &MethodDef {
        &self.methods[method.0 as usize]
    }

    pub fn field(&self, field: FieldId) -> &FieldDef {
        &self.fields[field.0 as usize]
    }

    pub fn insn(&self, insn: InsnId) -> &Instruction {
        &self.insns[insn.0 as usize]
    }

    pub fn classes(&self) -> impl Iterator<Item = (ClassId, &ClassDef)> {
        self.classes
            .iter()
            .enumerate()
            .map(|(i, c)| (ClassId(i as u32), c))
    }

    pub fn class_of(&self, ty: TypeId) -> Option<ClassId> {
        self.class_index.get(&ty).copied()
    }

    pub fn type_name(&self, ty: TypeId) -> &str {
        &self.types[ty.0 as usize].name
    }

    pub fn find_type(&self, name: &str) -> Option<TypeId> {
        self.types
            .iter()
            .position(|t| t.name == name)
            .map(|i| TypeId(i as u32))
    }

    pub fn find_method(&self, owner: TypeId, name: &str) -> Option<MethodId> {
        self.methods
            .iter()
            .position(|m| m.owner == owner && m.name == name)
            .map(|i| MethodId(i as u32))
    }

    /// `Owner.name` display form of a method.
    pub fn method_display(&self, method: MethodId) -> String {
        let m = self.method(method);
        format!("{}.{}", self.type_name(m.owner), m.name)
    }

    /// `Owner.name` display form of a field.
    pub fn field_display(&self, field: FieldId) -> String {
        let f = self.field(field);
        format!("{}.{}", self.type_name(f.owner), f.name)
    }

    /// Whether `ty` is a strict descendant of `ancestor`.
    ///
    /// Walks the supertype chain; the walk is capped at the number of
    /// registered types so a malformed (cyclic) hierarchy terminates.
    pub fn is_descendant(&self, ty: TypeId, ancestor: TypeId) -> bool {
        let mut current = self.types[ty.0 as usize].supertype;
        let mut steps = 0usize;
        while let Some(t) = current {
            if t == ancestor {
                return true;
            }
            steps += 1;
            if steps > self.types.len() {
                return false;
            }
            current = self.types[t.0 as usize].supertype;
        }
        false
    }
}
