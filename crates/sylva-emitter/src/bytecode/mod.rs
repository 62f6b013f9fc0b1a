//! Abstract bytecode definitions.
//!
//! The instruction vocabulary, method signatures, and class descriptors that
//! form the emitter's output format.

pub mod class;
pub mod instr;

pub use class::{rt, ClassDef, ExceptionRange, FieldDef, MethodDef};
pub use instr::{ArithOp, CmpOp, Cond, Instr, InstrSeq, InvokeKind, Label, MethodSig};
