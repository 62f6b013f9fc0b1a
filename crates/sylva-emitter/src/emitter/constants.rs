//! Literal classification and the per-class constant pool.
//!
//! Every literal is classified into a fixed set of kinds, each with a
//! construction sequence that rebuilds an equal value at load time.
//! Non-trivial literals are deduplicated into `const__N` static fields,
//! materialized once by the class's static initializer.

use rustc_hash::FxHashMap;

use crate::ast::{PrimType, TypeTag, Value};
use crate::bytecode::{rt, Instr, InstrSeq, InvokeKind, MethodSig};
use crate::error::{EmitError, EmitResult};

use super::Emitter;

/// Classified literal kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiteralKind {
    Nil,
    Bool,
    Int,
    Float,
    Char,
    Str,
    Symbol,
    Keyword,
    Vector,
    Map,
    Set,
    List,
    VarRef,
    Opaque,
}

/// Classify a literal value.
pub fn classify(value: &Value) -> LiteralKind {
    match value {
        Value::Nil => LiteralKind::Nil,
        Value::Bool(_) => LiteralKind::Bool,
        Value::Int(_) => LiteralKind::Int,
        Value::Float(_) => LiteralKind::Float,
        Value::Char(_) => LiteralKind::Char,
        Value::Str(_) => LiteralKind::Str,
        Value::Symbol { .. } => LiteralKind::Symbol,
        Value::Keyword { .. } => LiteralKind::Keyword,
        Value::Vector(_) => LiteralKind::Vector,
        Value::Map(_) => LiteralKind::Map,
        Value::Set(_) => LiteralKind::Set,
        Value::List(_) => LiteralKind::List,
        Value::VarRef { .. } => LiteralKind::VarRef,
        Value::Opaque { .. } => LiteralKind::Opaque,
    }
}

/// Construction sequence rebuilding `value` on the operand stack.
///
/// Fails with [`EmitError::UnembeddableLiteral`] when an opaque value has no
/// readable round-trip form.
pub(crate) fn value_ctor_seq(value: &Value) -> EmitResult<InstrSeq> {
    let mut seq = InstrSeq::new();
    build_value(value, &mut seq)?;
    Ok(seq)
}

fn build_value(value: &Value, seq: &mut InstrSeq) -> EmitResult<()> {
    match value {
        Value::Nil => seq.push(Instr::PushNull),
        Value::Bool(b) => seq.push(Instr::GetStatic {
            owner: rt::BOOLEAN.to_string(),
            name: if *b { "TRUE" } else { "FALSE" }.to_string(),
            ty: TypeTag::of(rt::BOOLEAN),
        }),
        Value::Int(n) => {
            seq.push(Instr::PushInt(*n));
            seq.push(Instr::Box {
                prim: PrimType::Long,
            });
        }
        Value::Float(f) => {
            seq.push(Instr::PushFloat(*f));
            seq.push(Instr::Box {
                prim: PrimType::Double,
            });
        }
        Value::Char(c) => {
            seq.push(Instr::PushInt(*c as i64));
            seq.push(Instr::PrimCast {
                from: PrimType::Long,
                to: PrimType::Char,
            });
            seq.push(Instr::Box {
                prim: PrimType::Char,
            });
        }
        Value::Str(s) => seq.push(Instr::PushStr(s.clone())),
        Value::Symbol { ns, name } => {
            push_opt_str(ns, seq);
            seq.push(Instr::PushStr(name.clone()));
            seq.push(intern_call(rt::SYMBOL));
        }
        Value::Keyword { ns, name } => {
            push_opt_str(ns, seq);
            seq.push(Instr::PushStr(name.clone()));
            seq.push(intern_call(rt::KEYWORD));
        }
        Value::Vector(items) => {
            build_object_array(items.iter(), items.len(), seq)?;
            seq.push(rt_collection_call("vector"));
        }
        Value::Map(pairs) => {
            let flat = pairs.iter().flat_map(|(k, v)| [k, v]);
            build_object_array(flat, pairs.len() * 2, seq)?;
            seq.push(rt_collection_call("map"));
        }
        Value::Set(items) => {
            build_object_array(items.iter(), items.len(), seq)?;
            seq.push(rt_collection_call("set"));
        }
        Value::List(items) => {
            build_object_array(items.iter(), items.len(), seq)?;
            seq.push(rt_collection_call("list"));
        }
        Value::VarRef { ns, name } => {
            seq.push(Instr::PushStr(ns.clone()));
            seq.push(Instr::PushStr(name.clone()));
            seq.push(Instr::Invoke {
                kind: InvokeKind::Static,
                owner: rt::RT.to_string(),
                sig: MethodSig::new(
                    "var",
                    vec![TypeTag::of(rt::STRING), TypeTag::of(rt::STRING)],
                    TypeTag::of(rt::VAR),
                ),
            });
        }
        Value::Opaque { type_name, printed } => match printed {
            // Textual round-trip through the reader.
            Some(form) => {
                seq.push(Instr::PushStr(form.clone()));
                seq.push(Instr::Invoke {
                    kind: InvokeKind::Static,
                    owner: rt::RT.to_string(),
                    sig: MethodSig::new(
                        "readString",
                        vec![TypeTag::of(rt::STRING)],
                        TypeTag::object(),
                    ),
                });
            }
            None => {
                return Err(EmitError::UnembeddableLiteral {
                    type_name: type_name.clone(),
                })
            }
        },
    }
    Ok(())
}

fn push_opt_str(s: &Option<String>, seq: &mut InstrSeq) {
    match s {
        Some(s) => seq.push(Instr::PushStr(s.clone())),
        None => seq.push(Instr::PushNull),
    }
}

fn intern_call(owner: &str) -> Instr {
    Instr::Invoke {
        kind: InvokeKind::Static,
        owner: owner.to_string(),
        sig: MethodSig::new(
            "intern",
            vec![TypeTag::of(rt::STRING), TypeTag::of(rt::STRING)],
            TypeTag::of(owner),
        ),
    }
}

fn rt_collection_call(name: &str) -> Instr {
    Instr::Invoke {
        kind: InvokeKind::Static,
        owner: rt::RT.to_string(),
        sig: MethodSig::new(name, vec![TypeTag::of(rt::OBJECT_ARRAY)], TypeTag::object()),
    }
}

/// Build an object array of `len` elements on the stack.
fn build_object_array<'v>(
    values: impl Iterator<Item = &'v Value>,
    len: usize,
    seq: &mut InstrSeq,
) -> EmitResult<()> {
    seq.push(Instr::PushInt(len as i64));
    seq.push(Instr::NewArray {
        elem: TypeTag::object(),
    });
    for (i, v) in values.enumerate() {
        seq.push(Instr::Dup);
        seq.push(Instr::PushInt(i as i64));
        build_value(v, seq)?;
        seq.push(Instr::ArrayStore {
            elem: TypeTag::object(),
        });
    }
    Ok(())
}

// ============================================================================
// Constant pool
// ============================================================================

/// One deduplicated constant backed by a static field.
#[derive(Debug, Clone)]
pub struct ConstantEntry {
    pub id: u32,
    pub value: Value,
    /// Static field holding the materialized value
    pub field_name: String,
    pub ty: TypeTag,
    /// Construction sequence used by the static initializer
    pub(crate) ctor: InstrSeq,
}

/// Per-class table of deduplicated literal constants.
///
/// Identity is stable per distinct literal: interning the same value twice
/// yields the same entry, guaranteeing at most one static field per constant.
#[derive(Debug, Default)]
pub struct ConstantPool {
    entries: Vec<ConstantEntry>,
    index: FxHashMap<String, u32>,
}

impl ConstantPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a value, returning its pool id. The construction sequence is
    /// built eagerly so an unembeddable literal aborts emission immediately.
    pub fn intern(&mut self, value: &Value) -> EmitResult<u32> {
        let mut key = String::new();
        render_key(value, &mut key);
        if let Some(&id) = self.index.get(&key) {
            return Ok(id);
        }
        let ctor = value_ctor_seq(value)?;
        let id = self.entries.len() as u32;
        self.entries.push(ConstantEntry {
            id,
            value: value.clone(),
            field_name: format!("const__{}", id),
            ty: const_type(value),
            ctor,
        });
        self.index.insert(key, id);
        Ok(id)
    }

    pub fn get(&self, id: u32) -> &ConstantEntry {
        &self.entries[id as usize]
    }

    pub fn entries(&self) -> &[ConstantEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Static field type for a pooled constant.
fn const_type(value: &Value) -> TypeTag {
    match value {
        Value::Symbol { .. } => TypeTag::of(rt::SYMBOL),
        Value::Keyword { .. } => TypeTag::of(rt::KEYWORD),
        Value::VarRef { .. } => TypeTag::of(rt::VAR),
        _ => TypeTag::object(),
    }
}

/// Render a dedup key: value structure plus kind, so distinct kinds never
/// collide (e.g. the symbol `x` vs the string `"x"`).
fn render_key(value: &Value, out: &mut String) {
    use std::fmt::Write;
    match value {
        Value::Nil => out.push_str("nil"),
        Value::Bool(b) => {
            let _ = write!(out, "b:{}", b);
        }
        Value::Int(n) => {
            let _ = write!(out, "i:{}", n);
        }
        Value::Float(f) => {
            let _ = write!(out, "f:{}", f.to_bits());
        }
        Value::Char(c) => {
            let _ = write!(out, "c:{}", *c as u32);
        }
        Value::Str(s) => {
            let _ = write!(out, "s:{}:{}", s.len(), s);
        }
        Value::Symbol { ns, name } => {
            let _ = write!(out, "sym:{:?}/{}", ns, name);
        }
        Value::Keyword { ns, name } => {
            let _ = write!(out, "kw:{:?}/{}", ns, name);
        }
        Value::VarRef { ns, name } => {
            let _ = write!(out, "var:{}/{}", ns, name);
        }
        Value::Vector(items) => {
            out.push_str("v[");
            for i in items {
                render_key(i, out);
                out.push(' ');
            }
            out.push(']');
        }
        Value::List(items) => {
            out.push_str("l[");
            for i in items {
                render_key(i, out);
                out.push(' ');
            }
            out.push(']');
        }
        Value::Set(items) => {
            out.push_str("set[");
            for i in items {
                render_key(i, out);
                out.push(' ');
            }
            out.push(']');
        }
        Value::Map(pairs) => {
            out.push_str("m[");
            for (k, v) in pairs {
                render_key(k, out);
                out.push(' ');
                render_key(v, out);
                out.push(' ');
            }
            out.push(']');
        }
        Value::Opaque { type_name, printed } => {
            let _ = write!(out, "o:{}:{:?}", type_name, printed);
        }
    }
}

// ============================================================================
// Emitter constant rules
// ============================================================================

impl<'a> Emitter<'a> {
    /// Emit a literal constant. Primitive-annotated literals push raw
    /// machine values; object-annotated literals either construct inline
    /// (nil, booleans, numbers, strings) or load a pooled static field.
    pub(crate) fn emit_const(&mut self, value: &Value, ty: &TypeTag) -> EmitResult<InstrSeq> {
        let mut seq = InstrSeq::constant();
        match ty.as_prim() {
            Some(prim) => self.emit_prim_const(value, prim, &mut seq)?,
            None => match classify(value) {
                LiteralKind::Nil | LiteralKind::Bool | LiteralKind::Int | LiteralKind::Float
                | LiteralKind::Char | LiteralKind::Str => {
                    build_value(value, &mut seq)?;
                }
                _ => {
                    let id = self.class_scope().constants.intern(value)?;
                    let owner = self.class_name();
                    let entry = {
                        let e = self
                            .classes
                            .last()
                            .expect("no open class scope")
                            .constants
                            .get(id);
                        (e.field_name.clone(), e.ty.clone())
                    };
                    seq.push(Instr::GetStatic {
                        owner,
                        name: entry.0,
                        ty: entry.1,
                    });
                }
            },
        }
        Ok(seq)
    }

    /// Raw primitive push for a literal annotated with a primitive type.
    fn emit_prim_const(
        &mut self,
        value: &Value,
        prim: PrimType,
        seq: &mut InstrSeq,
    ) -> EmitResult<()> {
        match (value, prim) {
            (Value::Bool(b), PrimType::Boolean) => seq.push(Instr::PushBool(*b)),
            (Value::Int(n), PrimType::Long) => seq.push(Instr::PushInt(*n)),
            (Value::Int(n), p) if p != PrimType::Double && p != PrimType::Float => {
                seq.push(Instr::PushInt(*n));
                seq.push(Instr::PrimCast {
                    from: PrimType::Long,
                    to: p,
                });
            }
            (Value::Int(n), p) => {
                seq.push(Instr::PushFloat(*n as f64));
                if p == PrimType::Float {
                    seq.push(Instr::PrimCast {
                        from: PrimType::Double,
                        to: PrimType::Float,
                    });
                }
            }
            (Value::Float(f), PrimType::Double) => seq.push(Instr::PushFloat(*f)),
            (Value::Float(f), PrimType::Float) => {
                seq.push(Instr::PushFloat(*f));
                seq.push(Instr::PrimCast {
                    from: PrimType::Double,
                    to: PrimType::Float,
                });
            }
            (Value::Char(c), PrimType::Char) => {
                seq.push(Instr::PushInt(*c as i64));
                seq.push(Instr::PrimCast {
                    from: PrimType::Long,
                    to: PrimType::Char,
                });
            }
            (v, p) => {
                return self.unsupported(&format!(
                    "literal {:?} annotated as primitive {:?}",
                    classify(v),
                    p
                ))
            }
        }
        Ok(())
    }

    /// Load the pooled var object for `ns/name`.
    pub(crate) fn emit_var_const(&mut self, ns: &str, name: &str) -> EmitResult<InstrSeq> {
        let value = Value::VarRef {
            ns: ns.to_string(),
            name: name.to_string(),
        };
        let id = self.class_scope().constants.intern(&value)?;
        let owner = self.class_name();
        let field = self
            .classes
            .last()
            .expect("no open class scope")
            .constants
            .get(id)
            .field_name
            .clone();
        let mut seq = InstrSeq::new();
        seq.push(Instr::GetStatic {
            owner,
            name: field,
            ty: TypeTag::of(rt::VAR),
        });
        Ok(seq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_kinds() {
        assert_eq!(classify(&Value::Nil), LiteralKind::Nil);
        assert_eq!(
            classify(&Value::Keyword {
                ns: None,
                name: "a".into()
            }),
            LiteralKind::Keyword
        );
        assert_eq!(classify(&Value::Vector(vec![])), LiteralKind::Vector);
    }

    #[test]
    fn test_pool_dedups_identical_values() {
        let mut pool = ConstantPool::new();
        let kw = Value::Keyword {
            ns: Some("core".into()),
            name: "x".into(),
        };
        let a = pool.intern(&kw).unwrap();
        let b = pool.intern(&kw).unwrap();
        assert_eq!(a, b);
        assert_eq!(pool.entries().len(), 1);
    }

    #[test]
    fn test_pool_distinguishes_kinds() {
        let mut pool = ConstantPool::new();
        let sym = Value::Symbol {
            ns: None,
            name: "x".into(),
        };
        let kw = Value::Keyword {
            ns: None,
            name: "x".into(),
        };
        assert_ne!(pool.intern(&sym).unwrap(), pool.intern(&kw).unwrap());
    }

    #[test]
    fn test_unembeddable_literal_fails_at_intern() {
        let mut pool = ConstantPool::new();
        let opaque = Value::Opaque {
            type_name: "FileHandle".into(),
            printed: None,
        };
        assert!(matches!(
            pool.intern(&opaque),
            Err(EmitError::UnembeddableLiteral { .. })
        ));
    }

    #[test]
    fn test_collection_ctor_builds_array() {
        let seq = value_ctor_seq(&Value::Vector(vec![Value::Int(1), Value::Int(2)])).unwrap();
        assert!(seq
            .instrs
            .iter()
            .any(|i| matches!(i, Instr::NewArray { .. })));
        let stores = seq
            .instrs
            .iter()
            .filter(|i| matches!(i, Instr::ArrayStore { .. }))
            .count();
        assert_eq!(stores, 2);
    }
}
