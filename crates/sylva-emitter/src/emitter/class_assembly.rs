//! Synthesized class assembly.
//!
//! Function literals, explicit type definitions, and reified objects each
//! become one emitted class. Assembly runs once per originating definition
//! (the registry deduplicates by class identity); the expression result is
//! an instantiation sequence, or the class object for a type definition.

use crate::ast::{
    Capture, FnArity, FnNode, MethodImpl, Node, ParamDecl, PrimType, ReifyNode, TypeDefNode,
    TypeTag, Value,
};
use crate::bytecode::{
    rt, ClassDef, FieldDef, Instr, InstrSeq, InvokeKind, MethodDef, MethodSig,
};
use crate::error::{EmitError, EmitResult};

use super::constants::value_ctor_seq;
use super::{ClassScope, Emitter, Frame, LoopLocal, MethodScope};

/// Method-descriptor limit on declared parameters.
const MAX_DECLARED_PARAMS: usize = 255;

impl<'a> Emitter<'a> {
    // ── Function literals ───────────────────────────────────────────────

    /// Emit a function literal: assemble its class on first encounter, then
    /// produce the instantiation sequence capturing the closed-over values.
    pub(crate) fn emit_fn(&mut self, f: &FnNode, _frame: &Frame) -> EmitResult<InstrSeq> {
        if !self.registry.contains(&f.class_name) {
            let class = self.assemble_fn_class(f)?;
            self.registry.register(class);
        }
        self.emit_instantiation(&f.class_name, f.meta.as_ref(), &f.closed_overs)
    }

    fn assemble_fn_class(&mut self, f: &FnNode) -> EmitResult<ClassDef> {
        let superclass = if f.variadic { rt::RESTFN } else { rt::AFN };
        let with_meta = f.meta.is_some();

        let mut interfaces: Vec<String> = f
            .arities
            .iter()
            .filter_map(|a| a.prim_interface.clone())
            .collect();
        if with_meta {
            interfaces.push(rt::IOBJ.to_string());
        }

        self.classes.push(ClassScope::new(&f.class_name));

        let mut fields = capture_fields(&f.closed_overs);
        if with_meta {
            fields.insert(
                0,
                FieldDef::instance("__meta", TypeTag::of(rt::IPERSISTENT_MAP), true),
            );
        }

        let mut methods = Vec::new();
        methods.push(self.build_ctor(
            &f.class_name,
            superclass,
            with_meta,
            &f.closed_overs,
        ));
        if with_meta {
            methods.push(build_meta_getter(&f.class_name));
            methods.push(build_with_meta(&f.class_name, &f.closed_overs));
        }

        let direct_linkable = f.closed_overs.is_empty() && !with_meta;
        let mut result = Ok(());
        for arity in &f.arities {
            if arity.params.len() > MAX_DECLARED_PARAMS {
                result = Err(EmitError::InvalidArgumentCount {
                    count: arity.params.len(),
                    max: MAX_DECLARED_PARAMS,
                });
                break;
            }
            match self.build_arity_methods(&f.class_name, arity, direct_linkable) {
                Ok(mut ms) => methods.append(&mut ms),
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }
        if f.variadic {
            if let Some(arity) = f.arities.iter().find(|a| a.variadic) {
                methods.push(build_required_arity(arity));
            }
        }

        let scope = self.classes.pop().expect("class scope underflow");
        result?;
        self.finalize_scope(scope, superclass, interfaces, fields, methods)
    }

    /// The invoke method(s) for one arity. A primitive-specialized arity
    /// carries its body in the typed entry point plus a boxing bridge; a
    /// plain arity carries it in the boxed entry point directly. Capture-free
    /// functions additionally get a static delegate for direct linking.
    fn build_arity_methods(
        &mut self,
        class_name: &str,
        arity: &FnArity,
        direct_linkable: bool,
    ) -> EmitResult<Vec<MethodDef>> {
        let mut methods = Vec::new();
        let argc = arity.params.len();

        if let Some(prim_ret) = arity
            .prim_interface
            .as_ref()
            .and_then(|_| arity.prim_ret.clone())
        {
            let sig = MethodSig::new(
                "invokePrim",
                arity.params.iter().map(|p| p.ty.clone()).collect(),
                prim_ret.clone(),
            );
            let code = self.emit_method_body(&arity.params, &arity.body, &prim_ret)?;
            methods.push(MethodDef::new(sig.clone(), false, code));
            methods.push(build_boxing_bridge(class_name, &sig));
        } else if arity.variadic {
            let sig = MethodSig::new(
                "doInvoke",
                vec![TypeTag::object(); argc],
                TypeTag::object(),
            );
            let code = self.emit_method_body(&arity.params, &arity.body, &TypeTag::object())?;
            methods.push(MethodDef::new(sig, false, code));
        } else {
            let sig = invoke_object_sig(argc);
            let code = self.emit_method_body(&arity.params, &arity.body, &TypeTag::object())?;
            methods.push(MethodDef::new(sig, false, code));
            if direct_linkable {
                methods.push(build_static_delegate(class_name, argc));
            }
        }
        Ok(methods)
    }

    // ── Type definitions ────────────────────────────────────────────────

    /// Emit a type definition: assemble the class on first encounter; the
    /// expression result is the class object.
    pub(crate) fn emit_deftype(&mut self, t: &TypeDefNode) -> EmitResult<InstrSeq> {
        if !self.registry.contains(&t.class_name) {
            let class = self.assemble_deftype_class(t)?;
            self.registry.register(class);
        }
        let mut seq = InstrSeq::new();
        seq.push(Instr::PushClass(t.class_name.clone()));
        Ok(seq)
    }

    fn assemble_deftype_class(&mut self, t: &TypeDefNode) -> EmitResult<ClassDef> {
        self.classes.push(ClassScope::new(&t.class_name));

        let fields: Vec<FieldDef> = t
            .fields
            .iter()
            .map(|f| FieldDef::instance(&f.name, f.ty.clone(), !f.mutable))
            .collect();

        let ctor_captures: Vec<Capture> = t
            .fields
            .iter()
            .map(|f| Capture {
                name: f.name.clone(),
                ty: f.ty.clone(),
                mutable: f.mutable,
                source_slot: None,
            })
            .collect();

        let mut methods = Vec::new();
        methods.push(self.build_ctor(&t.class_name, rt::OBJECT, false, &ctor_captures));
        let result = self.build_impl_methods(&t.class_name, &t.methods, &mut methods);

        let scope = self.classes.pop().expect("class scope underflow");
        result?;
        self.finalize_scope(scope, rt::OBJECT, t.interfaces.clone(), fields, methods)
    }

    // ── Reified objects ─────────────────────────────────────────────────

    /// Emit an anonymous reified object: one class per occurrence, closing
    /// over the captured values like a function literal.
    pub(crate) fn emit_reify(&mut self, r: &ReifyNode, _frame: &Frame) -> EmitResult<InstrSeq> {
        if !self.registry.contains(&r.class_name) {
            let class = self.assemble_reify_class(r)?;
            self.registry.register(class);
        }
        self.emit_instantiation(&r.class_name, r.meta.as_ref(), &r.closed_overs)
    }

    fn assemble_reify_class(&mut self, r: &ReifyNode) -> EmitResult<ClassDef> {
        let with_meta = r.meta.is_some();
        let mut interfaces = r.interfaces.clone();
        if with_meta {
            interfaces.push(rt::IOBJ.to_string());
        }

        self.classes.push(ClassScope::new(&r.class_name));

        let mut fields = capture_fields(&r.closed_overs);
        if with_meta {
            fields.insert(
                0,
                FieldDef::instance("__meta", TypeTag::of(rt::IPERSISTENT_MAP), true),
            );
        }

        let mut methods = Vec::new();
        methods.push(self.build_ctor(&r.class_name, rt::OBJECT, with_meta, &r.closed_overs));
        if with_meta {
            methods.push(build_meta_getter(&r.class_name));
            methods.push(build_with_meta(&r.class_name, &r.closed_overs));
        }
        let result = self.build_impl_methods(&r.class_name, &r.methods, &mut methods);

        let scope = self.classes.pop().expect("class scope underflow");
        result?;
        self.finalize_scope(scope, rt::OBJECT, interfaces, fields, methods)
    }

    // ── Shared assembly pieces ──────────────────────────────────────────

    /// Interface method implementations, each with its optional erased
    /// bridge.
    fn build_impl_methods(
        &mut self,
        class_name: &str,
        impls: &[MethodImpl],
        out: &mut Vec<MethodDef>,
    ) -> EmitResult<()> {
        for m in impls {
            if m.params.len() > MAX_DECLARED_PARAMS {
                return Err(EmitError::InvalidArgumentCount {
                    count: m.params.len(),
                    max: MAX_DECLARED_PARAMS,
                });
            }
            let code = self.emit_method_body(&m.params, &m.body, &m.sig.ret)?;
            out.push(MethodDef::new(m.sig.clone(), false, code));
            if let Some(bridge) = &m.bridge {
                out.push(build_bridge(class_name, &m.sig, bridge));
            }
        }
        Ok(())
    }

    /// Emit a method body in a fresh method scope. The entry label is a
    /// loop target re-binding the parameters, so tail recursion inside the
    /// body jumps here.
    fn emit_method_body(
        &mut self,
        params: &[ParamDecl],
        body: &Node,
        ret: &TypeTag,
    ) -> EmitResult<InstrSeq> {
        let first_temp = first_free_slot(params).max(super::first_temp_slot(body));
        self.methods.push(MethodScope::new(first_temp));
        let entry = self.new_label();
        let loop_locals = params
            .iter()
            .map(|p| LoopLocal {
                slot: p.slot,
                ty: p.ty.clone(),
            })
            .collect();
        let base = Frame::expression(self.options.clear_tail_locals).with_loop(entry, loop_locals);
        let frame = if ret.is_void() { base.stmt() } else { base };

        let mut code = InstrSeq::new();
        code.mark(entry);
        let result = self.emit(body, &frame);
        self.methods.pop();
        code.extend(result?);

        if !ret.is_void() {
            let observed = body.cast.clone().unwrap_or_else(|| body.ty.clone());
            if observed != *ret {
                self.emit_coercion(&observed, ret, &mut code);
            }
        }
        code.push(Instr::Return { ty: ret.clone() });
        Ok(code)
    }

    /// Constructor: run the superclass initializer, then store each
    /// parameter into its capture field (metadata first, when carried).
    fn build_ctor(
        &mut self,
        class_name: &str,
        superclass: &str,
        with_meta: bool,
        captures: &[Capture],
    ) -> MethodDef {
        let mut params = Vec::new();
        if with_meta {
            params.push(TypeTag::of(rt::IPERSISTENT_MAP));
        }
        params.extend(captures.iter().map(|c| c.ty.clone()));

        let mut code = InstrSeq::new();
        code.push(Instr::LoadThis);
        code.push(Instr::Invoke {
            kind: InvokeKind::Special,
            owner: superclass.to_string(),
            sig: MethodSig::new("<init>", vec![], TypeTag::Void),
        });

        let mut slot: u16 = 1;
        if with_meta {
            code.push(Instr::LoadThis);
            code.push(Instr::LoadLocal {
                slot,
                ty: TypeTag::of(rt::IPERSISTENT_MAP),
            });
            code.push(Instr::PutField {
                owner: class_name.to_string(),
                name: "__meta".to_string(),
                ty: TypeTag::of(rt::IPERSISTENT_MAP),
            });
            slot += 1;
        }
        for c in captures {
            code.push(Instr::LoadThis);
            code.push(Instr::LoadLocal {
                slot,
                ty: c.ty.clone(),
            });
            code.push(Instr::PutField {
                owner: class_name.to_string(),
                name: c.name.clone(),
                ty: c.ty.clone(),
            });
            slot += if c.ty.is_wide() { 2 } else { 1 };
        }
        code.push(Instr::Return { ty: TypeTag::Void });
        MethodDef::new(MethodSig::new("<init>", params, TypeTag::Void), false, code)
    }

    /// Instantiation sequence at the originating expression: allocate,
    /// push metadata and captured values, run the initializer.
    fn emit_instantiation(
        &mut self,
        class_name: &str,
        meta: Option<&Value>,
        captures: &[Capture],
    ) -> EmitResult<InstrSeq> {
        let enclosing = self.class_name();
        let mut seq = InstrSeq::new();
        seq.push(Instr::New {
            class: class_name.to_string(),
        });
        seq.push(Instr::Dup);

        let mut params = Vec::new();
        if let Some(meta) = meta {
            seq.extend(self.emit_const(meta, &TypeTag::object())?);
            seq.push(Instr::CheckCast {
                class: rt::IPERSISTENT_MAP.to_string(),
            });
            params.push(TypeTag::of(rt::IPERSISTENT_MAP));
        }
        for c in captures {
            match c.source_slot {
                Some(slot) => seq.push(Instr::LoadLocal {
                    slot,
                    ty: c.ty.clone(),
                }),
                // The captured value is itself a capture field of the
                // enclosing class.
                None => {
                    seq.push(Instr::LoadThis);
                    seq.push(Instr::GetField {
                        owner: enclosing.clone(),
                        name: c.name.clone(),
                        ty: c.ty.clone(),
                    });
                }
            }
            params.push(c.ty.clone());
        }
        seq.push(Instr::Invoke {
            kind: InvokeKind::Special,
            owner: class_name.to_string(),
            sig: MethodSig::new("<init>", params, TypeTag::Void),
        });
        Ok(seq)
    }

    // ── Scope finalization ──────────────────────────────────────────────

    /// Close a class scope into a complete class definition: static fields
    /// for pooled constants and call-site caches, the static initializer
    /// materializing them, and any hoisted private methods.
    pub(crate) fn finalize_scope(
        &mut self,
        scope: ClassScope,
        superclass: &str,
        interfaces: Vec<String>,
        mut fields: Vec<FieldDef>,
        mut methods: Vec<MethodDef>,
    ) -> EmitResult<ClassDef> {
        let owner = scope.class_name.clone();
        let mut clinit = InstrSeq::new();

        for entry in scope.constants.entries() {
            fields.push(FieldDef::static_(&entry.field_name, entry.ty.clone(), true));
            clinit.extend(entry.ctor.clone());
            clinit.push(Instr::PutStatic {
                owner: owner.clone(),
                name: entry.field_name.clone(),
                ty: entry.ty.clone(),
            });
        }

        for (i, (ns, name)) in scope.keyword_sites.iter().enumerate() {
            let site_field = format!("site__{}", i);
            let thunk_field = format!("thunk__{}", i);
            fields.push(FieldDef::static_(
                &site_field,
                TypeTag::of(rt::KEYWORD_LOOKUP_SITE),
                true,
            ));
            // The thunk is swapped on every fault.
            fields.push(FieldDef::static_(
                &thunk_field,
                TypeTag::of(rt::ILOOKUP_THUNK),
                false,
            ));

            clinit.push(Instr::New {
                class: rt::KEYWORD_LOOKUP_SITE.to_string(),
            });
            clinit.push(Instr::Dup);
            let kw = Value::Keyword {
                ns: ns.clone(),
                name: name.clone(),
            };
            clinit.extend(value_ctor_seq(&kw)?);
            clinit.push(Instr::Invoke {
                kind: InvokeKind::Special,
                owner: rt::KEYWORD_LOOKUP_SITE.to_string(),
                sig: MethodSig::new(
                    "<init>",
                    vec![TypeTag::of(rt::KEYWORD)],
                    TypeTag::Void,
                ),
            });
            clinit.push(Instr::Dup);
            clinit.push(Instr::PutStatic {
                owner: owner.clone(),
                name: site_field,
                ty: TypeTag::of(rt::KEYWORD_LOOKUP_SITE),
            });
            clinit.push(Instr::PutStatic {
                owner: owner.clone(),
                name: thunk_field,
                ty: TypeTag::of(rt::ILOOKUP_THUNK),
            });
        }

        for i in 0..scope.protocol_sites.len() {
            // Starts null; filled as receivers are seen.
            fields.push(FieldDef::static_(
                &format!("cached_class__{}", i),
                TypeTag::of(rt::CLASS),
                false,
            ));
        }

        if !clinit.is_empty() {
            clinit.push(Instr::Return { ty: TypeTag::Void });
            methods.push(MethodDef::new(
                MethodSig::new("<clinit>", vec![], TypeTag::Void),
                true,
                clinit,
            ));
        }

        methods.extend(scope.hoisted);

        Ok(ClassDef {
            name: owner.clone(),
            identity: owner,
            superclass: superclass.to_string(),
            interfaces,
            fields,
            methods,
        })
    }
}

// ── Synthesized method bodies with no AST behind them ────────────────────

fn invoke_object_sig(argc: usize) -> MethodSig {
    MethodSig::new("invoke", vec![TypeTag::object(); argc], TypeTag::object())
}

fn capture_fields(captures: &[Capture]) -> Vec<FieldDef> {
    captures
        .iter()
        .map(|c| FieldDef::instance(&c.name, c.ty.clone(), !c.mutable))
        .collect()
}

fn first_free_slot(params: &[ParamDecl]) -> u16 {
    params
        .iter()
        .map(|p| p.slot + if p.ty.is_wide() { 2 } else { 1 })
        .max()
        .unwrap_or(1)
}

/// `meta()`: return the metadata field.
fn build_meta_getter(class_name: &str) -> MethodDef {
    let mut code = InstrSeq::new();
    code.push(Instr::LoadThis);
    code.push(Instr::GetField {
        owner: class_name.to_string(),
        name: "__meta".to_string(),
        ty: TypeTag::of(rt::IPERSISTENT_MAP),
    });
    code.push(Instr::Return {
        ty: TypeTag::of(rt::IPERSISTENT_MAP),
    });
    MethodDef::new(
        MethodSig::new("meta", vec![], TypeTag::of(rt::IPERSISTENT_MAP)),
        false,
        code,
    )
}

/// `withMeta(m)`: construct a copy with the same captures and new metadata.
fn build_with_meta(class_name: &str, captures: &[Capture]) -> MethodDef {
    let mut code = InstrSeq::new();
    code.push(Instr::New {
        class: class_name.to_string(),
    });
    code.push(Instr::Dup);
    code.push(Instr::LoadLocal {
        slot: 1,
        ty: TypeTag::of(rt::IPERSISTENT_MAP),
    });
    let mut params = vec![TypeTag::of(rt::IPERSISTENT_MAP)];
    for c in captures {
        code.push(Instr::LoadThis);
        code.push(Instr::GetField {
            owner: class_name.to_string(),
            name: c.name.clone(),
            ty: c.ty.clone(),
        });
        params.push(c.ty.clone());
    }
    code.push(Instr::Invoke {
        kind: InvokeKind::Special,
        owner: class_name.to_string(),
        sig: MethodSig::new("<init>", params, TypeTag::Void),
    });
    code.push(Instr::Return {
        ty: TypeTag::of(rt::IOBJ),
    });
    MethodDef::new(
        MethodSig::new(
            "withMeta",
            vec![TypeTag::of(rt::IPERSISTENT_MAP)],
            TypeTag::of(rt::IOBJ),
        ),
        false,
        code,
    )
}

/// Boxed `invoke` bridging into a primitive-specialized entry point:
/// unbox each argument, delegate, box the result.
fn build_boxing_bridge(class_name: &str, prim_sig: &MethodSig) -> MethodDef {
    let argc = prim_sig.params.len();
    let mut code = InstrSeq::new();
    code.push(Instr::LoadThis);
    for (i, param) in prim_sig.params.iter().enumerate() {
        code.push(Instr::LoadLocal {
            slot: (i + 1) as u16,
            ty: TypeTag::object(),
        });
        match param {
            TypeTag::Prim(p) => code.push(Instr::Unbox { prim: *p }),
            TypeTag::Object(c) if c != rt::OBJECT => {
                code.push(Instr::CheckCast { class: c.clone() })
            }
            _ => {}
        }
    }
    code.push(Instr::Invoke {
        kind: InvokeKind::Virtual,
        owner: class_name.to_string(),
        sig: prim_sig.clone(),
    });
    match &prim_sig.ret {
        TypeTag::Prim(p) => code.push(Instr::Box { prim: *p }),
        TypeTag::Void => code.push(Instr::PushNull),
        TypeTag::Object(_) => {}
    }
    code.push(Instr::Return {
        ty: TypeTag::object(),
    });
    MethodDef::new(invoke_object_sig(argc), false, code)
}

/// Erased bridge: cast each argument to the refined signature and forward.
fn build_bridge(class_name: &str, impl_sig: &MethodSig, bridge_sig: &MethodSig) -> MethodDef {
    let mut code = InstrSeq::new();
    code.push(Instr::LoadThis);
    let mut slot: u16 = 1;
    for (bridge_param, impl_param) in bridge_sig.params.iter().zip(&impl_sig.params) {
        code.push(Instr::LoadLocal {
            slot,
            ty: bridge_param.clone(),
        });
        match (bridge_param, impl_param) {
            (TypeTag::Object(_), TypeTag::Object(c)) if c != rt::OBJECT => {
                code.push(Instr::CheckCast { class: c.clone() })
            }
            (TypeTag::Object(_), TypeTag::Prim(p)) => code.push(Instr::Unbox { prim: *p }),
            _ => {}
        }
        slot += if bridge_param.is_wide() { 2 } else { 1 };
    }
    code.push(Instr::Invoke {
        kind: InvokeKind::Virtual,
        owner: class_name.to_string(),
        sig: impl_sig.clone(),
    });
    if let (TypeTag::Prim(p), TypeTag::Object(_)) = (&impl_sig.ret, &bridge_sig.ret) {
        code.push(Instr::Box { prim: *p });
    }
    code.push(Instr::Return {
        ty: bridge_sig.ret.clone(),
    });
    MethodDef::new(bridge_sig.clone(), false, code)
}

/// Static delegate for direct linking of capture-free functions: construct
/// an instance and forward to the boxed entry point.
fn build_static_delegate(class_name: &str, argc: usize) -> MethodDef {
    let mut code = InstrSeq::new();
    code.push(Instr::New {
        class: class_name.to_string(),
    });
    code.push(Instr::Dup);
    code.push(Instr::Invoke {
        kind: InvokeKind::Special,
        owner: class_name.to_string(),
        sig: MethodSig::new("<init>", vec![], TypeTag::Void),
    });
    for i in 0..argc {
        code.push(Instr::LoadLocal {
            slot: i as u16,
            ty: TypeTag::object(),
        });
    }
    code.push(Instr::Invoke {
        kind: InvokeKind::Virtual,
        owner: class_name.to_string(),
        sig: invoke_object_sig(argc),
    });
    code.push(Instr::Return {
        ty: TypeTag::object(),
    });
    MethodDef::new(
        MethodSig::new(
            "invokeStatic",
            vec![TypeTag::object(); argc],
            TypeTag::object(),
        ),
        true,
        code,
    )
}

/// `getRequiredArity()`: fixed-parameter count of the variadic arity.
fn build_required_arity(arity: &FnArity) -> MethodDef {
    let required = arity.params.len().saturating_sub(1);
    let mut code = InstrSeq::new();
    code.push(Instr::PushInt(required as i64));
    code.push(Instr::PrimCast {
        from: PrimType::Long,
        to: PrimType::Int,
    });
    code.push(Instr::Return {
        ty: TypeTag::Prim(PrimType::Int),
    });
    MethodDef::new(
        MethodSig::new("getRequiredArity", vec![], TypeTag::Prim(PrimType::Int)),
        false,
        code,
    )
}
