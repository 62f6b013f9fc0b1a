//! Call and field-access lowering.
//!
//! Function invocation in all its linkage forms: generic function values,
//! dynamically linked var calls, keyword accessor sites, protocol calls with
//! per-site class caches, statically resolved host calls, reflective
//! fallbacks, constructors, and field access.

use once_cell::sync::Lazy;
use rustc_hash::FxHashMap;

use crate::ast::{Node, PrimType, TypeTag, VarKind};
use crate::bytecode::{rt, ArithOp, CmpOp, Cond, Instr, InstrSeq, InvokeKind, MethodSig};
use crate::error::EmitResult;

use super::{Emitter, Frame};

/// Arguments beyond this count are passed in a trailing boxed array.
pub(crate) const MAX_POSITIONAL_ARITY: usize = 20;

/// Statically resolved calls replaced by machine instructions. Keyed by
/// owner plus compact signature; the flag marks comparison intrinsics whose
/// result a conditional branch may consume directly.
struct Intrinsic {
    instrs: Vec<Instr>,
    predicate: bool,
}

fn arith(op: ArithOp, ty: PrimType) -> Intrinsic {
    Intrinsic {
        instrs: vec![Instr::Arith { op, ty }],
        predicate: false,
    }
}

fn cmp(op: CmpOp, ty: PrimType) -> Intrinsic {
    Intrinsic {
        instrs: vec![Instr::Cmp { op, ty }],
        predicate: true,
    }
}

static INTRINSICS: Lazy<FxHashMap<String, Intrinsic>> = Lazy::new(|| {
    let mut m = FxHashMap::default();
    let num = |d: &str| format!("{}/{}", rt::NUMBERS, d);

    m.insert(num("add(JJ)J"), arith(ArithOp::Add, PrimType::Long));
    m.insert(num("minus(JJ)J"), arith(ArithOp::Sub, PrimType::Long));
    m.insert(num("multiply(JJ)J"), arith(ArithOp::Mul, PrimType::Long));
    m.insert(num("quotient(JJ)J"), arith(ArithOp::Div, PrimType::Long));
    m.insert(num("remainder(JJ)J"), arith(ArithOp::Rem, PrimType::Long));
    m.insert(num("and(JJ)J"), arith(ArithOp::And, PrimType::Long));
    m.insert(num("or(JJ)J"), arith(ArithOp::Or, PrimType::Long));
    m.insert(num("xor(JJ)J"), arith(ArithOp::Xor, PrimType::Long));
    m.insert(num("shiftLeft(JJ)J"), arith(ArithOp::Shl, PrimType::Long));
    m.insert(num("shiftRight(JJ)J"), arith(ArithOp::Shr, PrimType::Long));
    m.insert(
        num("unsignedShiftRight(JJ)J"),
        arith(ArithOp::Ushr, PrimType::Long),
    );

    m.insert(num("add(DD)D"), arith(ArithOp::Add, PrimType::Double));
    m.insert(num("minus(DD)D"), arith(ArithOp::Sub, PrimType::Double));
    m.insert(num("multiply(DD)D"), arith(ArithOp::Mul, PrimType::Double));
    m.insert(num("divide(DD)D"), arith(ArithOp::Div, PrimType::Double));

    m.insert(num("lt(JJ)Z"), cmp(CmpOp::Lt, PrimType::Long));
    m.insert(num("lte(JJ)Z"), cmp(CmpOp::Le, PrimType::Long));
    m.insert(num("gt(JJ)Z"), cmp(CmpOp::Gt, PrimType::Long));
    m.insert(num("gte(JJ)Z"), cmp(CmpOp::Ge, PrimType::Long));
    m.insert(num("equiv(JJ)Z"), cmp(CmpOp::Eq, PrimType::Long));
    m.insert(num("lt(DD)Z"), cmp(CmpOp::Lt, PrimType::Double));
    m.insert(num("lte(DD)Z"), cmp(CmpOp::Le, PrimType::Double));
    m.insert(num("gt(DD)Z"), cmp(CmpOp::Gt, PrimType::Double));
    m.insert(num("gte(DD)Z"), cmp(CmpOp::Ge, PrimType::Double));
    m.insert(num("equiv(DD)Z"), cmp(CmpOp::Eq, PrimType::Double));

    m
});

/// Native conversion between two primitives, when one exists. Boolean has
/// none; everything else converts directly.
pub(crate) fn prim_conversion(from: PrimType, to: PrimType) -> Option<Instr> {
    if from == PrimType::Boolean || to == PrimType::Boolean {
        return None;
    }
    Some(Instr::PrimCast { from, to })
}

/// `invoke` signature with `argc` boxed positional parameters.
fn invoke_sig(argc: usize) -> MethodSig {
    MethodSig::new("invoke", vec![TypeTag::object(); argc], TypeTag::object())
}

/// `invoke` signature for the overflow shape: the maximum positional count
/// plus a trailing argument array.
fn invoke_rest_sig() -> MethodSig {
    let mut params = vec![TypeTag::object(); MAX_POSITIONAL_ARITY];
    params.push(TypeTag::of(rt::OBJECT_ARRAY));
    MethodSig::new("invoke", params, TypeTag::object())
}

impl<'a> Emitter<'a> {
    // ── Function invocation ─────────────────────────────────────────────

    /// Generic call of a function value through the function interface.
    pub(crate) fn emit_invoke(
        &mut self,
        f: &Node,
        args: &[Node],
        frame: &Frame,
    ) -> EmitResult<InstrSeq> {
        let mut seq = self.emit_boxed(f, frame)?;
        seq.push(Instr::CheckCast {
            class: rt::IFN.to_string(),
        });
        self.emit_ifn_args_and_call(args, frame, &mut seq)?;
        Ok(seq)
    }

    /// Call through a named var. Vars the front end resolved to a statically
    /// known function of a matching arity link through a dynamic call site;
    /// everything else goes through the generic deref-and-invoke path.
    pub(crate) fn emit_var_call(
        &mut self,
        ns: &str,
        name: &str,
        args: &[Node],
        frame: &Frame,
    ) -> EmitResult<InstrSeq> {
        let linkable = args.len() <= MAX_POSITIONAL_ARITY
            && match self.vars().lookup(ns, name).map(|i| &i.kind) {
                Some(VarKind::StaticFn { arities, variadic }) => {
                    arities.contains(&args.len())
                        || variadic.map_or(false, |min| args.len() >= min)
                }
                _ => false,
            };

        if linkable {
            let mut seq = InstrSeq::new();
            for arg in args {
                seq.extend(self.emit_boxed(arg, frame)?);
            }
            seq.push(Instr::InvokeDynamic {
                name: format!("{}/{}", ns, name),
                arity: args.len(),
            });
            return Ok(seq);
        }

        let mut seq = self.emit_var_deref(ns, name)?;
        seq.push(Instr::CheckCast {
            class: rt::IFN.to_string(),
        });
        self.emit_ifn_args_and_call(args, frame, &mut seq)?;
        Ok(seq)
    }

    /// Box and push `args`, then invoke through the function interface.
    /// Beyond the maximum positional arity the overflow arguments are packed
    /// into one trailing array.
    fn emit_ifn_args_and_call(
        &mut self,
        args: &[Node],
        frame: &Frame,
        seq: &mut InstrSeq,
    ) -> EmitResult<()> {
        if args.len() <= MAX_POSITIONAL_ARITY {
            for arg in args {
                seq.extend(self.emit_boxed(arg, frame)?);
            }
            seq.push(Instr::Invoke {
                kind: InvokeKind::Interface,
                owner: rt::IFN.to_string(),
                sig: invoke_sig(args.len()),
            });
        } else {
            let (head, tail) = args.split_at(MAX_POSITIONAL_ARITY);
            for arg in head {
                seq.extend(self.emit_boxed(arg, frame)?);
            }
            self.emit_object_array(tail, frame, seq)?;
            seq.push(Instr::Invoke {
                kind: InvokeKind::Interface,
                owner: rt::IFN.to_string(),
                sig: invoke_rest_sig(),
            });
        }
        Ok(())
    }

    // ── Keyword accessor sites ──────────────────────────────────────────

    /// Keyword used as a map accessor, through a per-site lookup cache.
    ///
    /// The thunk field holds the current fast-path accessor; a thunk
    /// signals a miss by returning itself, which re-faults through the site
    /// object (installing a fresh thunk) and produces the value.
    pub(crate) fn emit_keyword_invoke(
        &mut self,
        ns: Option<&str>,
        name: &str,
        target: &Node,
        frame: &Frame,
    ) -> EmitResult<InstrSeq> {
        let owner = self.class_name();
        let site_id = {
            let scope = self.class_scope();
            scope
                .keyword_sites
                .push((ns.map(str::to_string), name.to_string()));
            scope.keyword_sites.len() - 1
        };

        let target_slot = self.alloc_local(&TypeTag::object());
        let fault_label = self.new_label();
        let end_label = self.new_label();

        let mut seq = self.emit_boxed(target, frame)?;
        seq.push(Instr::StoreLocal {
            slot: target_slot,
            ty: TypeTag::object(),
        });

        seq.push(Instr::GetStatic {
            owner: owner.clone(),
            name: format!("thunk__{}", site_id),
            ty: TypeTag::of(rt::ILOOKUP_THUNK),
        });
        seq.push(Instr::Dup);
        seq.push(Instr::LoadLocal {
            slot: target_slot,
            ty: TypeTag::object(),
        });
        seq.push(Instr::Invoke {
            kind: InvokeKind::Interface,
            owner: rt::ILOOKUP_THUNK.to_string(),
            sig: MethodSig::new("get", vec![TypeTag::object()], TypeTag::object()),
        });
        // Stack: thunk, result. Keep the result under the compare operands.
        seq.push(Instr::DupX1);
        seq.jump_if(Cond::RefEq, fault_label);
        seq.jump(end_label);

        seq.mark(fault_label);
        seq.push(Instr::Pop);
        seq.push(Instr::GetStatic {
            owner,
            name: format!("site__{}", site_id),
            ty: TypeTag::of(rt::KEYWORD_LOOKUP_SITE),
        });
        seq.push(Instr::LoadLocal {
            slot: target_slot,
            ty: TypeTag::object(),
        });
        seq.push(Instr::Invoke {
            kind: InvokeKind::Virtual,
            owner: rt::KEYWORD_LOOKUP_SITE.to_string(),
            sig: MethodSig::new("fault", vec![TypeTag::object()], TypeTag::object()),
        });
        seq.mark(end_label);
        Ok(seq)
    }

    // ── Protocol calls ──────────────────────────────────────────────────

    /// Polymorphic protocol call with a per-site class cache.
    ///
    /// The cache field remembers the last receiver class dispatched through
    /// the var (i.e. one that does not implement the protocol's interface),
    /// short-circuiting the instance-of probe for monomorphic sites.
    /// Receivers implementing the interface call it directly.
    pub(crate) fn emit_protocol_call(
        &mut self,
        var_ns: &str,
        var_name: &str,
        iface: &str,
        method: &MethodSig,
        target: &Node,
        args: &[Node],
        frame: &Frame,
    ) -> EmitResult<InstrSeq> {
        let owner = self.class_name();
        let site_id = {
            let scope = self.class_scope();
            scope
                .protocol_sites
                .push(format!("{}/{}", var_ns, var_name));
            scope.protocol_sites.len() - 1
        };
        let cache_field = format!("cached_class__{}", site_id);

        let target_slot = self.alloc_local(&TypeTag::object());
        let var_label = self.new_label();
        let iface_label = self.new_label();
        let end_label = self.new_label();

        let mut seq = self.emit_boxed(target, frame)?;
        seq.push(Instr::StoreLocal {
            slot: target_slot,
            ty: TypeTag::object(),
        });

        // Probe the cache.
        seq.push(Instr::LoadLocal {
            slot: target_slot,
            ty: TypeTag::object(),
        });
        seq.push(class_of_call());
        seq.push(Instr::GetStatic {
            owner: owner.clone(),
            name: cache_field.clone(),
            ty: TypeTag::of(rt::CLASS),
        });
        seq.jump_if(Cond::RefEq, var_label);

        seq.push(Instr::LoadLocal {
            slot: target_slot,
            ty: TypeTag::object(),
        });
        seq.push(Instr::InstanceOf {
            class: iface.to_string(),
        });
        seq.jump_if(Cond::True, iface_label);

        // Not an implementer: remember its class, then dispatch via the var.
        seq.push(Instr::LoadLocal {
            slot: target_slot,
            ty: TypeTag::object(),
        });
        seq.push(class_of_call());
        seq.push(Instr::PutStatic {
            owner,
            name: cache_field,
            ty: TypeTag::of(rt::CLASS),
        });

        seq.mark(var_label);
        seq.extend(self.emit_var_const(var_ns, var_name)?);
        seq.push(Instr::Invoke {
            kind: InvokeKind::Virtual,
            owner: rt::VAR.to_string(),
            sig: MethodSig::new("getRawRoot", vec![], TypeTag::object()),
        });
        seq.push(Instr::CheckCast {
            class: rt::IFN.to_string(),
        });
        seq.push(Instr::LoadLocal {
            slot: target_slot,
            ty: TypeTag::object(),
        });
        // The receiver takes the first positional slot; the overflow policy
        // applies to the combined count like any other function call.
        if args.len() + 1 <= MAX_POSITIONAL_ARITY {
            for arg in args {
                seq.extend(self.emit_boxed(arg, frame)?);
            }
            seq.push(Instr::Invoke {
                kind: InvokeKind::Interface,
                owner: rt::IFN.to_string(),
                sig: invoke_sig(args.len() + 1),
            });
        } else {
            let (head, tail) = args.split_at(MAX_POSITIONAL_ARITY - 1);
            for arg in head {
                seq.extend(self.emit_boxed(arg, frame)?);
            }
            self.emit_object_array(tail, frame, &mut seq)?;
            seq.push(Instr::Invoke {
                kind: InvokeKind::Interface,
                owner: rt::IFN.to_string(),
                sig: invoke_rest_sig(),
            });
        }
        seq.jump(end_label);

        seq.mark(iface_label);
        seq.push(Instr::LoadLocal {
            slot: target_slot,
            ty: TypeTag::object(),
        });
        seq.push(Instr::CheckCast {
            class: iface.to_string(),
        });
        let arg_seq = self.emit_typed_args(args, &method.params, frame)?;
        seq.extend(arg_seq);
        seq.push(Instr::Invoke {
            kind: InvokeKind::Interface,
            owner: iface.to_string(),
            sig: method.clone(),
        });
        // Both paths must produce one object.
        match &method.ret {
            TypeTag::Prim(p) => seq.push(Instr::Box { prim: *p }),
            TypeTag::Void => seq.push(Instr::PushNull),
            TypeTag::Object(_) => {}
        }
        seq.mark(end_label);
        Ok(seq)
    }

    // ── Statically resolved host calls ──────────────────────────────────

    /// Static method call; known arithmetic and comparison helpers lower to
    /// machine instructions instead.
    pub(crate) fn emit_static_call(
        &mut self,
        class: &str,
        sig: &MethodSig,
        args: &[Node],
        frame: &Frame,
    ) -> EmitResult<InstrSeq> {
        let mut seq = self.emit_typed_args(args, &sig.params, frame)?;
        let key = format!("{}/{}", class, sig.descriptor());
        match INTRINSICS.get(&key) {
            Some(intrinsic) => {
                for instr in &intrinsic.instrs {
                    seq.push(instr.clone());
                }
                seq.predicate = intrinsic.predicate;
            }
            None => seq.push(Instr::Invoke {
                kind: InvokeKind::Static,
                owner: class.to_string(),
                sig: sig.clone(),
            }),
        }
        Ok(seq)
    }

    /// Statically resolved instance method call.
    pub(crate) fn emit_instance_call(
        &mut self,
        target: &Node,
        owner: &str,
        iface: bool,
        sig: &MethodSig,
        args: &[Node],
        frame: &Frame,
    ) -> EmitResult<InstrSeq> {
        let mut seq = self.emit(target, &frame.expr())?;
        self.checkcast_receiver(target, owner, &mut seq);
        seq.extend(self.emit_typed_args(args, &sig.params, frame)?);
        seq.push(Instr::Invoke {
            kind: if iface {
                InvokeKind::Interface
            } else {
                InvokeKind::Virtual
            },
            owner: owner.to_string(),
            sig: sig.clone(),
        });
        Ok(seq)
    }

    /// Member access unresolved at compile time; deferred to the runtime's
    /// reflective helpers with boxed arguments.
    pub(crate) fn emit_reflective_call(
        &mut self,
        target: Option<&Node>,
        class: Option<&str>,
        method: &str,
        args: &[Node],
        frame: &Frame,
    ) -> EmitResult<InstrSeq> {
        let mut seq = InstrSeq::new();
        match (target, class) {
            (Some(target), _) => {
                seq.extend(self.emit_boxed(target, frame)?);
                seq.push(Instr::PushStr(method.to_string()));
                self.emit_object_array(args, frame, &mut seq)?;
                seq.push(Instr::Invoke {
                    kind: InvokeKind::Static,
                    owner: rt::REFLECTOR.to_string(),
                    sig: MethodSig::new(
                        "invokeInstanceMethod",
                        vec![
                            TypeTag::object(),
                            TypeTag::of(rt::STRING),
                            TypeTag::of(rt::OBJECT_ARRAY),
                        ],
                        TypeTag::object(),
                    ),
                });
            }
            (None, Some(class)) => {
                seq.push(Instr::PushStr(class.to_string()));
                seq.push(Instr::PushStr(method.to_string()));
                self.emit_object_array(args, frame, &mut seq)?;
                seq.push(Instr::Invoke {
                    kind: InvokeKind::Static,
                    owner: rt::REFLECTOR.to_string(),
                    sig: MethodSig::new(
                        "invokeStaticMethod",
                        vec![
                            TypeTag::of(rt::STRING),
                            TypeTag::of(rt::STRING),
                            TypeTag::of(rt::OBJECT_ARRAY),
                        ],
                        TypeTag::object(),
                    ),
                });
            }
            (None, None) => {
                return self.unsupported("reflective call with neither receiver nor class")
            }
        }
        Ok(seq)
    }

    /// Constructor invocation: allocate, duplicate, evaluate arguments,
    /// run the initializer against the copy.
    pub(crate) fn emit_new(
        &mut self,
        class: &str,
        params: &[TypeTag],
        args: &[Node],
        frame: &Frame,
    ) -> EmitResult<InstrSeq> {
        let mut seq = InstrSeq::new();
        seq.push(Instr::New {
            class: class.to_string(),
        });
        seq.push(Instr::Dup);
        seq.extend(self.emit_typed_args(args, params, frame)?);
        seq.push(Instr::Invoke {
            kind: InvokeKind::Special,
            owner: class.to_string(),
            sig: MethodSig::new("<init>", params.to_vec(), TypeTag::Void),
        });
        Ok(seq)
    }

    // ── Field access ────────────────────────────────────────────────────

    pub(crate) fn emit_static_field(&mut self, owner: &str, field: &str, ty: &TypeTag) -> InstrSeq {
        let mut seq = InstrSeq::new();
        seq.push(Instr::GetStatic {
            owner: owner.to_string(),
            name: field.to_string(),
            ty: ty.clone(),
        });
        seq
    }

    /// Static field write; the written value is also the expression result.
    pub(crate) fn emit_static_field_set(
        &mut self,
        owner: &str,
        field: &str,
        value: &Node,
        frame: &Frame,
    ) -> EmitResult<InstrSeq> {
        let ty = result_type(value);
        let tmp = self.alloc_local(&ty);
        let mut seq = self.emit(value, &frame.expr())?;
        seq.push(Instr::StoreLocal {
            slot: tmp,
            ty: ty.clone(),
        });
        seq.push(Instr::LoadLocal {
            slot: tmp,
            ty: ty.clone(),
        });
        seq.push(Instr::PutStatic {
            owner: owner.to_string(),
            name: field.to_string(),
            ty: ty.clone(),
        });
        seq.push(Instr::LoadLocal { slot: tmp, ty });
        Ok(seq)
    }

    pub(crate) fn emit_instance_field(
        &mut self,
        target: &Node,
        owner: &str,
        field: &str,
        ty: &TypeTag,
        frame: &Frame,
    ) -> EmitResult<InstrSeq> {
        let mut seq = self.emit(target, &frame.expr())?;
        self.checkcast_receiver(target, owner, &mut seq);
        seq.push(Instr::GetField {
            owner: owner.to_string(),
            name: field.to_string(),
            ty: ty.clone(),
        });
        Ok(seq)
    }

    /// Instance field write; the written value is also the expression
    /// result. The value rides in a temporary so wide primitives need no
    /// deep stack shuffling.
    pub(crate) fn emit_instance_field_set(
        &mut self,
        target: &Node,
        owner: &str,
        field: &str,
        value: &Node,
        frame: &Frame,
    ) -> EmitResult<InstrSeq> {
        let ty = result_type(value);
        let tmp = self.alloc_local(&ty);
        let mut seq = self.emit(target, &frame.expr())?;
        self.checkcast_receiver(target, owner, &mut seq);
        seq.extend(self.emit(value, &frame.expr())?);
        seq.push(Instr::StoreLocal {
            slot: tmp,
            ty: ty.clone(),
        });
        seq.push(Instr::LoadLocal {
            slot: tmp,
            ty: ty.clone(),
        });
        seq.push(Instr::PutField {
            owner: owner.to_string(),
            name: field.to_string(),
            ty: ty.clone(),
        });
        seq.push(Instr::LoadLocal { slot: tmp, ty });
        Ok(seq)
    }

    // ── Shared helpers ──────────────────────────────────────────────────

    /// Evaluate arguments left-to-right, each coerced to its declared
    /// parameter type. The counts must agree; a mismatch is a front-end
    /// contract violation, not something to emit around.
    pub(crate) fn emit_typed_args(
        &mut self,
        args: &[Node],
        params: &[TypeTag],
        frame: &Frame,
    ) -> EmitResult<InstrSeq> {
        if args.len() != params.len() {
            return self.unsupported(&format!(
                "call with {} arguments against a {}-parameter signature",
                args.len(),
                params.len()
            ));
        }
        let mut seq = InstrSeq::new();
        for (arg, param) in args.iter().zip(params) {
            seq.extend(self.emit(arg, &frame.expr())?);
            let observed = result_type(arg);
            if observed != *param {
                self.emit_coercion(&observed, param, &mut seq);
            }
        }
        Ok(seq)
    }

    /// Build a boxed argument array on the stack.
    pub(crate) fn emit_object_array(
        &mut self,
        args: &[Node],
        frame: &Frame,
        seq: &mut InstrSeq,
    ) -> EmitResult<()> {
        seq.push(Instr::PushInt(args.len() as i64));
        seq.push(Instr::NewArray {
            elem: TypeTag::object(),
        });
        for (i, arg) in args.iter().enumerate() {
            seq.push(Instr::Dup);
            seq.push(Instr::PushInt(i as i64));
            seq.extend(self.emit_boxed(arg, frame)?);
            seq.push(Instr::ArrayStore {
                elem: TypeTag::object(),
            });
        }
        Ok(())
    }

    /// Downcast the receiver to the resolved owner unless the front end
    /// already observed that exact class.
    fn checkcast_receiver(&self, target: &Node, owner: &str, seq: &mut InstrSeq) {
        if owner == rt::OBJECT {
            return;
        }
        if matches!(result_type(target), TypeTag::Object(c) if c == owner) {
            return;
        }
        seq.push(Instr::CheckCast {
            class: owner.to_string(),
        });
    }
}

/// The type a node's emission actually leaves behind: the declared type when
/// a coercion was requested, the observed type otherwise.
fn result_type(node: &Node) -> TypeTag {
    node.cast.clone().unwrap_or_else(|| node.ty.clone())
}

fn class_of_call() -> Instr {
    Instr::Invoke {
        kind: InvokeKind::Static,
        owner: rt::UTIL.to_string(),
        sig: MethodSig::new("classOf", vec![TypeTag::object()], TypeTag::of(rt::CLASS)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intrinsic_table_lookup() {
        let key = format!("{}/add(JJ)J", rt::NUMBERS);
        let hit = INTRINSICS.get(&key).unwrap();
        assert!(!hit.predicate);
        assert_eq!(
            hit.instrs,
            vec![Instr::Arith {
                op: ArithOp::Add,
                ty: PrimType::Long
            }]
        );
        let key = format!("{}/lt(JJ)Z", rt::NUMBERS);
        assert!(INTRINSICS.get(&key).unwrap().predicate);
    }

    #[test]
    fn test_prim_conversion_excludes_boolean() {
        assert!(prim_conversion(PrimType::Long, PrimType::Double).is_some());
        assert!(prim_conversion(PrimType::Boolean, PrimType::Long).is_none());
        assert!(prim_conversion(PrimType::Long, PrimType::Boolean).is_none());
    }

    #[test]
    fn test_rest_sig_shape() {
        let sig = invoke_rest_sig();
        assert_eq!(sig.params.len(), MAX_POSITIONAL_ARITY + 1);
        assert_eq!(*sig.params.last().unwrap(), TypeTag::of(rt::OBJECT_ARRAY));
    }
}
