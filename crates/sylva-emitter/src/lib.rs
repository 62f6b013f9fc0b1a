//! Code-generation backend: annotated AST in, abstract stack-machine
//! bytecode out.
//!
//! The front end hands over fully annotated syntax trees (types inferred,
//! locals numbered, captures analyzed); this crate lowers them to
//! instruction sequences and assembles the classes they require —
//! synthesized function classes, type definitions, reified objects, and the
//! per-unit class holding pooled constants and call-site caches. A separate
//! serializer turns the resulting [`ClassDef`]s into loadable binaries.
//!
//! The emitter itself is a pure translation: no optimization passes beyond
//! the arithmetic intrinsics, no I/O, no interning of global state. Each
//! compilation unit runs against its own [`ClassRegistry`].

pub mod ast;
pub mod bytecode;
pub mod emitter;
pub mod error;
pub mod registry;

pub use ast::{Node, Op, TypeTag, Value, VarTable};
pub use bytecode::{ClassDef, Instr, InstrSeq, MethodSig};
pub use emitter::{EmitOptions, Emitter};
pub use error::{EmitError, EmitResult};
pub use registry::ClassRegistry;

/// The output of emitting one top-level form.
#[derive(Debug)]
pub struct CompiledUnit {
    /// Instruction sequence of the form itself
    pub code: InstrSeq,
    /// Every class the form produced, in registration order; the synthetic
    /// unit class is last
    pub classes: Vec<ClassDef>,
}

/// Emit one top-level form as a self-contained unit.
///
/// `unit_name` names the synthetic class holding the form's constants and
/// call-site caches.
pub fn emit_unit(node: &Node, vars: &VarTable, unit_name: &str) -> EmitResult<CompiledUnit> {
    let mut registry = ClassRegistry::new();
    let mut emitter = Emitter::new(vars, &mut registry);
    let code = emitter.emit_top_level(node, unit_name)?;
    Ok(CompiledUnit {
        code,
        classes: registry.into_classes(),
    })
}
