//! JSON Program Loader
//!
//! Builds an [`ir::Program`](bcopt_core::ir::Program) from a JSON program
//! description. The format is name-based; the loader interns names into the
//! program's id-based stores in two passes (declarations first, method
//! bodies second) so forward references work.
//!
//! ```json
//! {
//!   "types": [{ "name": "Base" }, { "name": "Child", "super": "Base" }],
//!   "fields": [{ "owner": "Child", "name": "value" }],
//!   "classes": [
//!     {
//!       "type": "Main",
//!       "methods": [
//!         {
//!           "name": "build",
//!           "entry": 0,
//!           "blocks": [
//!             {
//!               "succs": [],
//!               "insns": [
//!                 { "op": "construct", "type": "Child", "dest": 0 },
//!                 { "op": "return", "srcs": [0] }
//!               ]
//!             }
//!           ]
//!         }
//!       ]
//!     }
//!   ]
//! }
//! ```

use std::collections::HashMap;

use anyhow::{Context, Result};
use serde::Deserialize;

use bcopt_core::error::OptimizerError;
use bcopt_core::ir::{ControlFlowGraph, FieldId, Instruction, MethodId, Program, Reg, TypeId};

#[derive(Debug, Deserialize)]
pub struct ProgramDoc {
    #[serde(default)]
    types: Vec<TypeDoc>,
    #[serde(default)]
    fields: Vec<FieldDoc>,
    #[serde(default)]
    classes: Vec<ClassDoc>,
}

#[derive(Debug, Deserialize)]
struct TypeDoc {
    name: String,
    #[serde(rename = "super", default)]
    superclass: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FieldDoc {
    owner: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct ClassDoc {
    #[serde(rename = "type")]
    ty: String,
    #[serde(default)]
    methods: Vec<MethodDoc>,
}

#[derive(Debug, Deserialize)]
struct MethodDoc {
    name: String,
    #[serde(default)]
    entry: u32,
    #[serde(default)]
    blocks: Vec<BlockDoc>,
}

#[derive(Debug, Deserialize)]
struct BlockDoc {
    #[serde(default)]
    succs: Vec<u32>,
    #[serde(default)]
    insns: Vec<InsnDoc>,
}

#[derive(Debug, Deserialize)]
struct InsnDoc {
    op: String,
    #[serde(default)]
    dest: Option<Reg>,
    #[serde(default)]
    srcs: Vec<Reg>,
    #[serde(rename = "type", default)]
    ty: Option<String>,
    #[serde(default)]
    field: Option<String>,
    #[serde(default)]
    method: Option<String>,
}

/// Parse a JSON program description into an IR program.
pub fn load_program(json: &str) -> Result<Program> {
    let doc: ProgramDoc = serde_json::from_str(json).context("failed to parse program JSON")?;
    build_program(&doc)
}

fn build_program(doc: &ProgramDoc) -> Result<Program> {
    let mut program = Program::new();
    let mut builder = Builder {
        program: &mut program,
        fields: HashMap::new(),
        methods: HashMap::new(),
    };

    // Declarations first: types (with supertype links), fields, classes and
    // method signatures. Bodies may then reference any of them.
    for ty in &doc.types {
        let id = builder.intern_type(&ty.name);
        if let Some(superclass) = &ty.superclass {
            let superclass = builder.intern_type(superclass);
            builder.program.set_supertype(id, Some(superclass));
        }
    }
    for field in &doc.fields {
        builder.intern_field(&field.owner, &field.name);
    }
    for class in &doc.classes {
        let ty = builder.intern_type(&class.ty);
        builder.program.add_class(ty);
        for method in &class.methods {
            builder.intern_method(&class.ty, &method.name);
        }
    }

    // Second pass: method bodies.
    for class in &doc.classes {
        for method in &class.methods {
            if method.blocks.is_empty() {
                continue;
            }
            let method_id = builder.intern_method(&class.ty, &method.name);
            let mut cfg = ControlFlowGraph::new();
            cfg.entry = method.entry;
            let mut block_succs = Vec::with_capacity(method.blocks.len());
            for block in &method.blocks {
                let mut insns = Vec::with_capacity(block.insns.len());
                for insn in &block.insns {
                    let built = builder.build_insn(insn)?;
                    insns.push(builder.program.add_insn(built));
                }
                let id = cfg.add_block(insns);
                block_succs.push((id, block.succs.clone()));
            }
            for (id, succs) in block_succs {
                for succ in succs {
                    cfg.add_edge(id, succ);
                }
            }
            builder.program.set_method_cfg(method_id, cfg);
        }
    }

    Ok(program)
}

struct Builder<'p> {
    program: &'p mut Program,
    fields: HashMap<String, FieldId>,
    methods: HashMap<String, MethodId>,
}

impl Builder<'_> {
    fn intern_type(&mut self, name: &str) -> TypeId {
        match self.program.find_type(name) {
            Some(id) => id,
            None => self.program.add_type(name, None),
        }
    }

    fn intern_field(&mut self, owner: &str, name: &str) -> FieldId {
        let key = format!("{owner}.{name}");
        if let Some(&id) = self.fields.get(&key) {
            return id;
        }
        let owner_ty = self.intern_type(owner);
        let id = self.program.add_field(owner_ty, name);
        self.fields.insert(key, id);
        id
    }

    fn intern_method(&mut self, owner: &str, name: &str) -> MethodId {
        let key = format!("{owner}.{name}");
        if let Some(&id) = self.methods.get(&key) {
            return id;
        }
        let owner_ty = self.intern_type(owner);
        let id = self.program.add_method(owner_ty, name);
        self.methods.insert(key, id);
        id
    }

    fn qualified_method(&mut self, reference: &str) -> Result<MethodId> {
        let (owner, name) = reference
            .rsplit_once('.')
            .ok_or_else(|| OptimizerError::UnknownMethod(reference.to_string()))?;
        Ok(self.intern_method(owner, name))
    }

    fn qualified_field(&mut self, reference: &str) -> Result<FieldId> {
        let (owner, name) = reference
            .rsplit_once('.')
            .ok_or_else(|| OptimizerError::MalformedProgram(format!(
                "field reference {reference:?} is not in Owner.name form"
            )))?;
        Ok(self.intern_field(owner, name))
    }

    fn build_insn(&mut self, doc: &InsnDoc) -> Result<Instruction> {
        let insn = match doc.op.as_str() {
            "construct" => {
                let ty_name = doc.ty.as_deref().ok_or_else(|| {
                    OptimizerError::MalformedProgram("construct without a type".into())
                })?;
                let ty = self.intern_type(ty_name);
                let dest = required_dest(doc)?;
                Instruction::construct(ty, dest)
            }
            "move" => Instruction::move_value(required_dest(doc)?, required_src(doc, 0)?),
            "field_write" => {
                let field = self.qualified_field(required_field(doc)?)?;
                Instruction::field_write(field, required_src(doc, 0)?, required_src(doc, 1)?)
            }
            "field_read" => {
                let field = self.qualified_field(required_field(doc)?)?;
                Instruction::field_read(field, required_dest(doc)?, required_src(doc, 0)?)
            }
            "invoke_virtual" => {
                let method = self.qualified_method(required_method(doc)?)?;
                Instruction::invoke_virtual(method, required_src(doc, 0)?, &doc.srcs[1..])
            }
            "invoke_static" => {
                let method = self.qualified_method(required_method(doc)?)?;
                Instruction::invoke_static(method, &doc.srcs)
            }
            "return" => Instruction::ret(doc.srcs.first().copied()),
            "array_store" => Instruction::array_store(
                required_src(doc, 0)?,
                required_src(doc, 1)?,
                required_src(doc, 2)?,
            ),
            "branch" => Instruction::branch(&doc.srcs),
            "other" => Instruction::other(doc.dest),
            unknown => {
                return Err(
                    OptimizerError::MalformedProgram(format!("unknown opcode {unknown:?}")).into(),
                )
            }
        };
        Ok(insn)
    }
}

fn required_dest(doc: &InsnDoc) -> Result<Reg> {
    doc.dest.ok_or_else(|| {
        OptimizerError::MalformedProgram(format!("{} without a dest register", doc.op)).into()
    })
}

fn required_src(doc: &InsnDoc, index: usize) -> Result<Reg> {
    doc.srcs.get(index).copied().ok_or_else(|| {
        OptimizerError::MalformedProgram(format!("{} missing source {index}", doc.op)).into()
    })
}

fn required_field(doc: &InsnDoc) -> Result<&str> {
    doc.field.as_deref().ok_or_else(|| {
        OptimizerError::MalformedProgram(format!("{} without a field reference", doc.op)).into()
    })
}

fn required_method(doc: &InsnDoc) -> Result<&str> {
    doc.method.as_deref().ok_or_else(|| {
        OptimizerError::MalformedProgram(format!("{} without a method reference", doc.op)).into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_types_classes_and_bodies() {
        let json = r#"{
            "types": [
                { "name": "Base" },
                { "name": "Child", "super": "Base" }
            ],
            "classes": [
                {
                    "type": "Main",
                    "methods": [
                        {
                            "name": "build",
                            "blocks": [
                                {
                                    "succs": [],
                                    "insns": [
                                        { "op": "construct", "type": "Child", "dest": 0 },
                                        { "op": "return", "srcs": [0] }
                                    ]
                                }
                            ]
                        }
                    ]
                }
            ]
        }"#;
        let program = load_program(json).expect("valid program");
        let base = program.find_type("Base").expect("Base registered");
        let child = program.find_type("Child").expect("Child registered");
        assert!(program.is_descendant(child, base));
        let main = program.find_type("Main").expect("Main registered");
        let method = program.find_method(main, "build").expect("build registered");
        let cfg = program.method(method).cfg.as_ref().expect("body attached");
        assert_eq!(cfg.blocks.len(), 1);
        assert_eq!(cfg.blocks[0].instructions.len(), 2);
    }

    #[test]
    fn unknown_opcode_is_rejected() {
        let json = r#"{
            "classes": [
                {
                    "type": "Main",
                    "methods": [
                        {
                            "name": "bad",
                            "blocks": [
                                { "succs": [], "insns": [{ "op": "teleport" }] }
                            ]
                        }
                    ]
                }
            ]
        }"#;
        let err = load_program(json).expect_err("teleport is not an opcode");
        assert!(err.to_string().contains("malformed program"));
    }

    #[test]
    fn invoke_references_are_interned_as_external_methods() {
        let json = r#"{
            "types": [{ "name": "Base" }, { "name": "T", "super": "Base" }],
            "classes": [
                {
                    "type": "Main",
                    "methods": [
                        {
                            "name": "run",
                            "blocks": [
                                {
                                    "succs": [],
                                    "insns": [
                                        { "op": "construct", "type": "T", "dest": 0 },
                                        { "op": "invoke_static", "method": "Util.keep", "srcs": [0] },
                                        { "op": "return" }
                                    ]
                                }
                            ]
                        }
                    ]
                }
            ]
        }"#;
        let program = load_program(json).expect("valid program");
        let util = program.find_type("Util").expect("Util interned");
        assert!(program.find_method(util, "keep").is_some());
        assert!(program.class_of(util).is_none());
    }
}
