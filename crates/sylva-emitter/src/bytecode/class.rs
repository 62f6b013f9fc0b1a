//! Class descriptors.
//!
//! A [`ClassDef`] fully specifies one emitted class — superclass, interfaces,
//! fields, and methods with their instruction-sequence bodies and
//! exception-range tables — sufficient for an out-of-scope serializer to
//! produce a loadable binary unit.

use crate::ast::TypeTag;
use crate::bytecode::instr::{Instr, InstrSeq, Label, MethodSig};

/// Well-known runtime class names targeted by emitted code.
pub mod rt {
    pub const OBJECT: &str = "sylva.lang.Object";
    pub const CLASS: &str = "sylva.lang.Class";
    pub const STRING: &str = "sylva.lang.String";
    pub const THROWABLE: &str = "sylva.lang.Throwable";

    pub const BOOLEAN: &str = "sylva.lang.Boolean";
    pub const BYTE: &str = "sylva.lang.Byte";
    pub const SHORT: &str = "sylva.lang.Short";
    pub const CHARACTER: &str = "sylva.lang.Character";
    pub const INTEGER: &str = "sylva.lang.Integer";
    pub const LONG: &str = "sylva.lang.Long";
    pub const FLOAT: &str = "sylva.lang.Float";
    pub const DOUBLE: &str = "sylva.lang.Double";
    pub const NUMBER: &str = "sylva.lang.Number";

    /// Runtime support: collection constructors, var lookup, reader
    pub const RT: &str = "sylva.lang.RT";
    /// Runtime support: identity, hashing, equivalence
    pub const UTIL: &str = "sylva.lang.Util";
    /// Boxed numeric tower operations
    pub const NUMBERS: &str = "sylva.lang.Numbers";
    /// Reflective invocation helpers, called only by generated code
    pub const REFLECTOR: &str = "sylva.lang.Reflector";

    pub const SYMBOL: &str = "sylva.lang.Symbol";
    pub const KEYWORD: &str = "sylva.lang.Keyword";
    pub const VAR: &str = "sylva.lang.Var";

    /// Function invocation interface
    pub const IFN: &str = "sylva.lang.IFn";
    /// Fixed-arity function base class
    pub const AFN: &str = "sylva.lang.AFn";
    /// Variable-arity function base class
    pub const RESTFN: &str = "sylva.lang.RestFn";

    /// Metadata-carrying object interface
    pub const IOBJ: &str = "sylva.lang.IObj";
    pub const IPERSISTENT_MAP: &str = "sylva.lang.IPersistentMap";

    /// Keyword call-site cache object
    pub const KEYWORD_LOOKUP_SITE: &str = "sylva.lang.KeywordLookupSite";
    /// Keyword call-site cache thunk
    pub const ILOOKUP_THUNK: &str = "sylva.lang.ILookupThunk";

    /// Reference array of `OBJECT`
    pub const OBJECT_ARRAY: &str = "sylva.lang.Object[]";
}

/// One declared field.
#[derive(Debug, Clone)]
pub struct FieldDef {
    pub name: String,
    pub ty: TypeTag,
    pub is_static: bool,
    pub is_final: bool,
}

impl FieldDef {
    pub fn instance(name: &str, ty: TypeTag, is_final: bool) -> Self {
        FieldDef {
            name: name.to_string(),
            ty,
            is_static: false,
            is_final,
        }
    }

    pub fn static_(name: &str, ty: TypeTag, is_final: bool) -> Self {
        FieldDef {
            name: name.to_string(),
            ty,
            is_static: true,
            is_final,
        }
    }
}

/// One row of a method's exception table: exceptions of `class` (any, when
/// None) raised in `[start, end)` transfer control to `handler`.
#[derive(Debug, Clone, PartialEq)]
pub struct ExceptionRange {
    pub start: Label,
    pub end: Label,
    pub handler: Label,
    pub class: Option<String>,
}

/// One declared method with its body.
#[derive(Debug, Clone)]
pub struct MethodDef {
    pub sig: MethodSig,
    pub is_static: bool,
    pub code: InstrSeq,
    /// Exception-range table, in declaration order. Declared order is
    /// authoritative for handler selection; no reordering.
    pub exceptions: Vec<ExceptionRange>,
}

impl MethodDef {
    /// Build a method, collecting in-stream [`Instr::Catch`] declarations
    /// into the exception table.
    pub fn new(sig: MethodSig, is_static: bool, code: InstrSeq) -> Self {
        let exceptions = code
            .instrs
            .iter()
            .filter_map(|i| match i {
                Instr::Catch {
                    start,
                    end,
                    handler,
                    class,
                } => Some(ExceptionRange {
                    start: *start,
                    end: *end,
                    handler: *handler,
                    class: class.clone(),
                }),
                _ => None,
            })
            .collect();
        MethodDef {
            sig,
            is_static,
            code,
            exceptions,
        }
    }
}

/// The assembled description of one emitted class.
///
/// Created when an AST node requiring a new class is emitted, registered
/// exactly once into the registry keyed by `identity`, never mutated after
/// registration.
#[derive(Debug, Clone)]
pub struct ClassDef {
    pub name: String,
    /// Registration identity; stable per originating definition
    pub identity: String,
    pub superclass: String,
    pub interfaces: Vec<String>,
    pub fields: Vec<FieldDef>,
    pub methods: Vec<MethodDef>,
}

impl ClassDef {
    /// Find a method by name (first match).
    pub fn method(&self, name: &str) -> Option<&MethodDef> {
        self.methods.iter().find(|m| m.sig.name == name)
    }

    /// Find a field by name.
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }
}
