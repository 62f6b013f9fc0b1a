//! Annotated AST input model.
//!
//! The front end (analyzer, macro expander, type inference, capture analysis)
//! produces these nodes fully annotated; the emitter only reads them. A node
//! pairs an operation tag with its observed type and an optional declared
//! type the surrounding context requires (`cast`).

use rustc_hash::FxHashMap;

use crate::bytecode::{rt, MethodSig};

// ============================================================================
// Types
// ============================================================================

/// Primitive value kinds of the target machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimType {
    Boolean,
    Byte,
    Short,
    Char,
    Int,
    Long,
    Float,
    Double,
}

impl PrimType {
    /// Long and double occupy two operand-stack slots.
    pub fn is_wide(self) -> bool {
        matches!(self, PrimType::Long | PrimType::Double)
    }

    /// Wrapper class used when this primitive crosses into object position.
    pub fn box_class(self) -> &'static str {
        match self {
            PrimType::Boolean => rt::BOOLEAN,
            PrimType::Byte => rt::BYTE,
            PrimType::Short => rt::SHORT,
            PrimType::Char => rt::CHARACTER,
            PrimType::Int => rt::INTEGER,
            PrimType::Long => rt::LONG,
            PrimType::Float => rt::FLOAT,
            PrimType::Double => rt::DOUBLE,
        }
    }

    /// Single-letter signature code.
    pub fn descriptor(self) -> char {
        match self {
            PrimType::Boolean => 'Z',
            PrimType::Byte => 'B',
            PrimType::Short => 'S',
            PrimType::Char => 'C',
            PrimType::Int => 'I',
            PrimType::Long => 'J',
            PrimType::Float => 'F',
            PrimType::Double => 'D',
        }
    }
}

/// Type annotation attached to AST nodes, locals, fields, and signatures.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeTag {
    /// No value produced
    Void,
    /// Unboxed primitive
    Prim(PrimType),
    /// Reference type, by class name
    Object(String),
}

impl TypeTag {
    /// The universal object type.
    pub fn object() -> Self {
        TypeTag::Object(rt::OBJECT.to_string())
    }

    /// Reference type with the given class name.
    pub fn of(class: &str) -> Self {
        TypeTag::Object(class.to_string())
    }

    pub fn is_void(&self) -> bool {
        matches!(self, TypeTag::Void)
    }

    /// Whether a value of this type occupies two stack slots.
    pub fn is_wide(&self) -> bool {
        matches!(self, TypeTag::Prim(p) if p.is_wide())
    }

    pub fn as_prim(&self) -> Option<PrimType> {
        match self {
            TypeTag::Prim(p) => Some(*p),
            _ => None,
        }
    }

    /// Signature fragment for this type.
    pub fn descriptor(&self) -> String {
        match self {
            TypeTag::Void => "V".to_string(),
            TypeTag::Prim(p) => p.descriptor().to_string(),
            TypeTag::Object(name) => format!("L{};", name),
        }
    }
}

// ============================================================================
// Literal values
// ============================================================================

/// A literal value as produced by the reader and constant folding.
///
/// Collections hold their elements in source order; maps as key/value pairs.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Char(char),
    Str(String),
    Symbol { ns: Option<String>, name: String },
    Keyword { ns: Option<String>, name: String },
    Vector(Vec<Value>),
    Map(Vec<(Value, Value)>),
    Set(Vec<Value>),
    List(Vec<Value>),
    /// Reference to a compiled var
    VarRef { ns: String, name: String },
    /// Arbitrary host object; `printed` is its readable form when one exists
    Opaque {
        type_name: String,
        printed: Option<String>,
    },
}

// ============================================================================
// AST nodes
// ============================================================================

/// One annotated syntax-tree element.
#[derive(Debug, Clone)]
pub struct Node {
    /// Operation tag with per-tag attributes
    pub op: Op,
    /// Observed (inferred) type of the produced value
    pub ty: TypeTag,
    /// Declared type the context requires, when it differs from `ty`
    pub cast: Option<TypeTag>,
}

impl Node {
    pub fn new(op: Op, ty: TypeTag) -> Self {
        Node { op, ty, cast: None }
    }

    pub fn with_cast(op: Op, ty: TypeTag, cast: TypeTag) -> Self {
        Node {
            op,
            ty,
            cast: Some(cast),
        }
    }

    /// Literal constants are exempt from the generic coercion pass: their
    /// emission honors `ty` directly.
    pub fn is_literal(&self) -> bool {
        matches!(self.op, Op::Const(_))
    }
}

/// Use of a local variable slot.
#[derive(Debug, Clone)]
pub struct LocalUse {
    pub name: String,
    pub slot: u16,
    pub ty: TypeTag,
    /// Liveness analysis marked this as the last use on this path; the slot
    /// is nulled after the load when clearing is enabled
    pub to_clear: bool,
}

/// One `let`/`loop` binding.
#[derive(Debug, Clone)]
pub struct Binding {
    pub name: String,
    pub slot: u16,
    pub ty: TypeTag,
    pub init: Node,
    /// The binding is never read; evaluate the initializer and discard it
    pub discard: bool,
}

/// One catch clause of a `try` form, most specific first in source order.
#[derive(Debug, Clone)]
pub struct CatchClause {
    /// Exception class this clause handles
    pub class: String,
    /// Local slot the caught exception is stored into
    pub slot: u16,
    pub name: String,
    pub body: Node,
}

/// Physical layout strategy of a `case` dispatch, chosen by the front end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchKind {
    /// Contiguous integer range, jump table
    Table,
    /// Explicit key lookup
    Sparse,
}

/// How the `case` test value is turned into a dispatch key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseTest {
    /// The value is numeric and dispatches on its integer value
    Int,
    /// Dispatch on the value's hash; arms re-check with equality
    Hash,
    /// Dispatch on identity hash; arms re-check with an identity compare
    HashIdentity,
}

/// One arm of a `case` form.
#[derive(Debug, Clone)]
pub struct CaseArm {
    /// Dispatch key after any shift/mask compression
    pub key: i64,
    /// The arm's test constant, for the collision re-check
    pub test: Value,
    pub body: Node,
    /// The front end proved no other value collides with this key
    pub unambiguous: bool,
}

/// A complete `case` form.
#[derive(Debug, Clone)]
pub struct CaseNode {
    pub test: Node,
    /// Right shift applied to the key, 0 for none
    pub shift: u32,
    /// Mask applied after the shift, 0 for none
    pub mask: i64,
    /// Lowest key of a table switch
    pub low: i64,
    /// Highest key of a table switch
    pub high: i64,
    pub switch_kind: SwitchKind,
    pub test_kind: CaseTest,
    pub arms: Vec<CaseArm>,
    pub default: Node,
}

/// A declared parameter of a synthesized method.
#[derive(Debug, Clone)]
pub struct ParamDecl {
    pub name: String,
    /// Local slot inside the method body (slot 0 is the receiver)
    pub slot: u16,
    pub ty: TypeTag,
}

/// A variable closed over by a function, reify, or hoisted construct.
#[derive(Debug, Clone)]
pub struct Capture {
    pub name: String,
    pub ty: TypeTag,
    /// Mutable captures become non-final fields
    pub mutable: bool,
    /// Local slot in the enclosing method, or None when the value is itself
    /// a capture field of the enclosing class
    pub source_slot: Option<u16>,
}

/// One arity of a function literal.
#[derive(Debug, Clone)]
pub struct FnArity {
    pub params: Vec<ParamDecl>,
    /// The last parameter collects the remaining arguments
    pub variadic: bool,
    pub body: Node,
    /// Specialized entry-point interface when any parameter or the return
    /// is a native primitive type (e.g. an `LL` or `DO` shape)
    pub prim_interface: Option<String>,
    /// Return type of the specialized entry point
    pub prim_ret: Option<TypeTag>,
}

/// A function literal, one synthesized class per occurrence.
#[derive(Debug, Clone)]
pub struct FnNode {
    pub name: Option<String>,
    /// Stable class identity used for registry deduplication
    pub class_name: String,
    pub arities: Vec<FnArity>,
    pub variadic: bool,
    pub closed_overs: Vec<Capture>,
    pub meta: Option<Value>,
}

/// A method implementation inside `deftype`/`reify`.
#[derive(Debug, Clone)]
pub struct MethodImpl {
    /// Interface/declared signature being implemented
    pub sig: MethodSig,
    pub params: Vec<ParamDecl>,
    pub body: Node,
    /// Erased signature requiring a cast-and-forward bridge, when the
    /// declared types are covariant refinements of the interface's
    pub bridge: Option<MethodSig>,
}

/// An explicit type definition.
#[derive(Debug, Clone)]
pub struct TypeDefNode {
    pub name: String,
    /// Class identity
    pub class_name: String,
    pub fields: Vec<FieldSpec>,
    pub interfaces: Vec<String>,
    pub methods: Vec<MethodImpl>,
}

/// A declared field of a type definition.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: String,
    pub ty: TypeTag,
    pub mutable: bool,
}

/// An anonymous reified object.
#[derive(Debug, Clone)]
pub struct ReifyNode {
    /// Class identity
    pub class_name: String,
    pub interfaces: Vec<String>,
    pub methods: Vec<MethodImpl>,
    pub closed_overs: Vec<Capture>,
    pub meta: Option<Value>,
}

/// Operation tags. The emitter matches this sum exhaustively; there is no
/// default arm and no open dispatch.
#[derive(Debug, Clone)]
pub enum Op {
    /// Literal constant
    Const(Value),
    /// Local slot read
    Local(LocalUse),
    /// Read of a variable captured by the enclosing class
    CapturedUse { name: String, ty: TypeTag },
    /// Dereference of a var's current binding
    VarDeref { ns: String, name: String },
    /// The var object itself
    TheVar { ns: String, name: String },
    /// Two-way conditional; falsy values are exactly nil and false
    If {
        test: Box<Node>,
        then: Box<Node>,
        els: Box<Node>,
    },
    /// Sequencing: statements then a final value expression
    Do { statements: Vec<Node>, ret: Box<Node> },
    /// Local bindings, optionally a loop entry
    Let {
        bindings: Vec<Binding>,
        body: Box<Node>,
        loop_form: bool,
    },
    /// Tail jump to the nearest enclosing loop
    Recur { args: Vec<Node> },
    /// Structured exception handling
    Try {
        body: Box<Node>,
        catches: Vec<CatchClause>,
        finally: Option<Box<Node>>,
    },
    /// Multiway constant dispatch
    Case(Box<CaseNode>),
    /// Generic call of a function value
    Invoke { f: Box<Node>, args: Vec<Node> },
    /// Dynamically linked call through a named var
    VarCall {
        ns: String,
        name: String,
        args: Vec<Node>,
    },
    /// Keyword used as a field accessor, through a lookup-site cache
    KeywordInvoke {
        ns: Option<String>,
        name: String,
        target: Box<Node>,
    },
    /// Polymorphic protocol call with per-site class caching
    ProtocolCall {
        var_ns: String,
        var_name: String,
        /// The protocol's native interface
        iface: String,
        method: MethodSig,
        target: Box<Node>,
        args: Vec<Node>,
    },
    /// Statically resolved static method call
    StaticCall {
        owner: String,
        sig: MethodSig,
        args: Vec<Node>,
    },
    /// Statically resolved instance method call
    InstanceCall {
        target: Box<Node>,
        owner: String,
        /// The owner is an interface
        iface: bool,
        sig: MethodSig,
        args: Vec<Node>,
    },
    /// Call whose target member could not be statically resolved
    ReflectiveCall {
        /// Receiver; None for a static call on `class`
        target: Option<Box<Node>>,
        class: Option<String>,
        method: String,
        args: Vec<Node>,
    },
    /// Constructor invocation
    New {
        class: String,
        params: Vec<TypeTag>,
        args: Vec<Node>,
    },
    /// Static field read
    StaticField { owner: String, field: String },
    /// Static field write, value is also the result
    StaticFieldSet {
        owner: String,
        field: String,
        value: Box<Node>,
    },
    /// Instance field read
    InstanceField { target: Box<Node>, owner: String, field: String },
    /// Instance field write, value is also the result
    InstanceFieldSet {
        target: Box<Node>,
        owner: String,
        field: String,
        value: Box<Node>,
    },
    /// Raise an exception; control leaves normal flow
    Throw { exception: Box<Node> },
    /// Function literal
    Fn(Box<FnNode>),
    /// Type definition
    DefType(Box<TypeDefNode>),
    /// Anonymous reified object
    Reify(Box<ReifyNode>),
    /// A loop/try subtree promoted to a private instance method by the
    /// front end, invoked virtually with the live locals as arguments
    HoistedCall {
        method: String,
        params: Vec<ParamDecl>,
        args: Vec<LocalUse>,
        body: Box<Node>,
    },
}

impl Op {
    /// Short tag name, used in diagnostics.
    pub fn tag(&self) -> &'static str {
        match self {
            Op::Const(_) => "const",
            Op::Local(_) => "local",
            Op::CapturedUse { .. } => "captured",
            Op::VarDeref { .. } => "var",
            Op::TheVar { .. } => "the-var",
            Op::If { .. } => "if",
            Op::Do { .. } => "do",
            Op::Let { .. } => "let",
            Op::Recur { .. } => "recur",
            Op::Try { .. } => "try",
            Op::Case(_) => "case",
            Op::Invoke { .. } => "invoke",
            Op::VarCall { .. } => "var-call",
            Op::KeywordInvoke { .. } => "keyword-invoke",
            Op::ProtocolCall { .. } => "protocol-call",
            Op::StaticCall { .. } => "static-call",
            Op::InstanceCall { .. } => "instance-call",
            Op::ReflectiveCall { .. } => "reflective-call",
            Op::New { .. } => "new",
            Op::StaticField { .. } => "static-field",
            Op::StaticFieldSet { .. } => "static-field-set",
            Op::InstanceField { .. } => "instance-field",
            Op::InstanceFieldSet { .. } => "instance-field-set",
            Op::Throw { .. } => "throw",
            Op::Fn(_) => "fn",
            Op::DefType(_) => "deftype",
            Op::Reify(_) => "reify",
            Op::HoistedCall { .. } => "hoisted-call",
        }
    }
}

// ============================================================================
// Var info table
// ============================================================================

/// What the front end knows about a namespace-qualified var.
#[derive(Debug, Clone)]
pub enum VarKind {
    /// Nothing known beyond existence; calls link dynamically
    Ordinary,
    /// Bound to a statically known function body
    StaticFn {
        arities: Vec<usize>,
        /// Minimum argument count of the variadic arity, when present
        variadic: Option<usize>,
    },
    /// Compile-time constant; uses inline the value
    Constant { value: Value },
}

/// Per-var entry in the [`VarTable`].
#[derive(Debug, Clone)]
pub struct VarInfo {
    pub kind: VarKind,
}

/// Resolution table for namespace-qualified names, supplied by the front end.
#[derive(Debug, Clone, Default)]
pub struct VarTable {
    vars: FxHashMap<String, VarInfo>,
}

impl VarTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register info for `ns/name`.
    pub fn insert(&mut self, ns: &str, name: &str, info: VarInfo) {
        self.vars.insert(format!("{}/{}", ns, name), info);
    }

    /// Look up `ns/name`.
    pub fn lookup(&self, ns: &str, name: &str) -> Option<&VarInfo> {
        self.vars.get(&format!("{}/{}", ns, name))
    }
}
