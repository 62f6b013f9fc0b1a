//! Abstract instruction vocabulary.
//!
//! Every component of the emitter produces these records; a separate
//! serializer resolves them to the binary class-file format. Instructions
//! are organized into categories:
//! - stack manipulation
//! - constants
//! - locals
//! - fields
//! - objects and arrays
//! - arithmetic and comparison intrinsics
//! - invocation
//! - control flow and exception ranges

use crate::ast::{PrimType, TypeTag};

/// Symbolic jump target, scoped to the method being assembled.
///
/// A label is marked exactly once and may be branched to from many places.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(pub u32);

/// A method signature: name, parameter types, return type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodSig {
    pub name: String,
    pub params: Vec<TypeTag>,
    pub ret: TypeTag,
}

impl MethodSig {
    pub fn new(name: &str, params: Vec<TypeTag>, ret: TypeTag) -> Self {
        MethodSig {
            name: name.to_string(),
            params,
            ret,
        }
    }

    /// Compact signature string, e.g. `invoke(JJ)J`.
    pub fn descriptor(&self) -> String {
        let mut out = String::new();
        out.push_str(&self.name);
        out.push('(');
        for p in &self.params {
            out.push_str(&p.descriptor());
        }
        out.push(')');
        out.push_str(&self.ret.descriptor());
        out
    }
}

/// Condition of a conditional branch. `RefEq`/`RefNe` pop two references;
/// the rest pop one value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cond {
    /// Reference is null
    Null,
    /// Reference is non-null
    NonNull,
    /// Two references are identical
    RefEq,
    /// Two references differ
    RefNe,
    /// Boolean test value is true
    True,
    /// Boolean test value is false
    False,
}

/// Primitive arithmetic operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Neg,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Ushr,
}

/// Primitive comparisons; push a boolean.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Invocation linkage kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvokeKind {
    Static,
    Virtual,
    Interface,
    /// Constructors and super calls
    Special,
}

/// One abstract stack-machine instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Instr {
    // ===== Stack manipulation =====
    /// Discard the top value
    Pop,
    /// Discard a two-slot value
    Pop2,
    /// Duplicate the top value
    Dup,
    /// Duplicate the top value beneath the value under it
    DupX1,

    // ===== Constants =====
    /// Push the null reference
    PushNull,
    /// Push a primitive boolean
    PushBool(bool),
    /// Push a primitive long
    PushInt(i64),
    /// Push a primitive double
    PushFloat(f64),
    /// Push an interned string reference
    PushStr(String),
    /// Push a class literal
    PushClass(String),

    // ===== Locals =====
    /// Push the receiver (slot 0 of an instance method)
    LoadThis,
    /// Push a local slot
    LoadLocal { slot: u16, ty: TypeTag },
    /// Pop into a local slot
    StoreLocal { slot: u16, ty: TypeTag },
    /// Live-range annotation for a named local (no stack effect)
    LocalRange {
        slot: u16,
        name: String,
        start: Label,
        end: Label,
    },

    // ===== Fields =====
    GetField { owner: String, name: String, ty: TypeTag },
    /// Pops receiver then value
    PutField { owner: String, name: String, ty: TypeTag },
    GetStatic { owner: String, name: String, ty: TypeTag },
    PutStatic { owner: String, name: String, ty: TypeTag },

    // ===== Objects and arrays =====
    /// Allocate an uninitialized instance
    New { class: String },
    /// Pop a length, push a new array
    NewArray { elem: TypeTag },
    /// Pop array, index, value
    ArrayStore { elem: TypeTag },
    /// Checked downcast of the top reference
    CheckCast { class: String },
    /// Pop a reference, push a boolean
    InstanceOf { class: String },
    /// Wrap the top primitive into its box class
    Box { prim: PrimType },
    /// Extract a primitive from the top boxed reference
    Unbox { prim: PrimType },
    /// Native primitive-to-primitive conversion
    PrimCast { from: PrimType, to: PrimType },

    // ===== Arithmetic and comparison =====
    /// Primitive arithmetic on one or two operands of `ty`
    Arith { op: ArithOp, ty: PrimType },
    /// Primitive comparison pushing a boolean
    Cmp { op: CmpOp, ty: PrimType },

    // ===== Invocation =====
    /// Direct call with a resolved signature
    Invoke {
        kind: InvokeKind,
        owner: String,
        sig: MethodSig,
    },
    /// Dynamically linked call-site request: symbolic var name plus arity.
    /// Link-time resolution is supplied by an external collaborator.
    InvokeDynamic { name: String, arity: usize },

    // ===== Control flow =====
    /// Define the label's position
    Mark(Label),
    /// Unconditional jump
    Jump(Label),
    /// Conditional jump
    JumpIf { cond: Cond, target: Label },
    /// Dense dispatch over `low..low+targets.len()`
    TableSwitch {
        low: i64,
        targets: Vec<Label>,
        default: Label,
    },
    /// Sparse key dispatch
    LookupSwitch {
        keys: Vec<i64>,
        targets: Vec<Label>,
        default: Label,
    },
    /// Pop and raise the top exception reference
    Throw,
    /// Return from the current method
    Return { ty: TypeTag },

    // ===== Exception ranges =====
    /// Declare that exceptions of `class` (or any, for None) raised between
    /// `start` and `end` transfer control to `handler` with the exception
    /// on the stack. No stack effect; collected into the method's table.
    Catch {
        start: Label,
        end: Label,
        handler: Label,
        class: Option<String>,
    },
}

/// An ordered instruction sequence with its stack-contract flags.
///
/// The flags are a contract between nested emission calls:
/// - `constant`: the result is compile-time known; in statement position the
///   whole sequence is dropped with no stack effect
/// - `untyped`: control transfers out of normal flow and no stack slot is
///   produced
/// - `container`: the sequence balances statement-vs-expression stack effects
///   for its children itself, so the caller must not pop on its behalf
/// - `predicate`: the sequence ends in a primitive comparison a conditional
///   branch may consume directly
#[derive(Debug, Clone, Default)]
pub struct InstrSeq {
    pub instrs: Vec<Instr>,
    pub constant: bool,
    pub untyped: bool,
    pub container: bool,
    pub predicate: bool,
}

impl InstrSeq {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sequence that manages its own statement/expression balancing.
    pub fn container() -> Self {
        InstrSeq {
            container: true,
            ..Self::default()
        }
    }

    /// A sequence whose result is a compile-time-known constant.
    pub fn constant() -> Self {
        InstrSeq {
            constant: true,
            ..Self::default()
        }
    }

    pub fn push(&mut self, instr: Instr) {
        self.instrs.push(instr);
    }

    /// Append another sequence's instructions. Flags do not propagate; they
    /// describe whole sequences, not fragments.
    pub fn extend(&mut self, other: InstrSeq) {
        self.instrs.extend(other.instrs);
    }

    pub fn mark(&mut self, label: Label) {
        self.instrs.push(Instr::Mark(label));
    }

    pub fn jump(&mut self, target: Label) {
        self.instrs.push(Instr::Jump(target));
    }

    pub fn jump_if(&mut self, cond: Cond, target: Label) {
        self.instrs.push(Instr::JumpIf { cond, target });
    }

    pub fn is_empty(&self) -> bool {
        self.instrs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.instrs.len()
    }
}
