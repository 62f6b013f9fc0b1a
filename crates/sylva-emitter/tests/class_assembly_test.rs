//! Class assembly tests: function literals, type definitions, reified
//! objects, and the per-unit scope finalization.

use sylva_emitter::ast::{
    Capture, FieldSpec, FnArity, FnNode, LocalUse, MethodImpl, Op, ParamDecl, PrimType,
    ReifyNode, TypeDefNode, TypeTag, Value, VarTable,
};
use sylva_emitter::bytecode::{rt, Instr, InvokeKind};
use sylva_emitter::{emit_unit, CompiledUnit, EmitError, MethodSig, Node};

fn obj(op: Op) -> Node {
    Node::new(op, TypeTag::object())
}

fn int_lit(n: i64) -> Node {
    Node::new(Op::Const(Value::Int(n)), TypeTag::object())
}

fn param(name: &str, slot: u16) -> ParamDecl {
    ParamDecl {
        name: name.into(),
        slot,
        ty: TypeTag::object(),
    }
}

fn emit(node: &Node) -> CompiledUnit {
    emit_unit(node, &VarTable::new(), "user$eval1").expect("emission failed")
}

fn simple_fn(class_name: &str, closed_overs: Vec<Capture>) -> FnNode {
    FnNode {
        name: Some("f".into()),
        class_name: class_name.into(),
        arities: vec![FnArity {
            params: vec![param("x", 1)],
            variadic: false,
            body: obj(Op::Local(LocalUse {
                name: "x".into(),
                slot: 1,
                ty: TypeTag::object(),
                to_clear: false,
            })),
            prim_interface: None,
            prim_ret: None,
        }],
        variadic: false,
        closed_overs,
        meta: None,
    }
}

#[test]
fn test_fn_class_extends_fixed_arity_base() {
    let unit = emit(&obj(Op::Fn(Box::new(simple_fn("user$f__1", vec![])))));
    assert_eq!(unit.classes.len(), 2);
    let fn_class = &unit.classes[0];
    assert_eq!(fn_class.name, "user$f__1");
    assert_eq!(fn_class.superclass, rt::AFN);

    let invoke = fn_class.method("invoke").expect("invoke method");
    assert!(!invoke.is_static);
    assert_eq!(invoke.sig.params.len(), 1);
    assert!(matches!(
        invoke.code.instrs.last(),
        Some(Instr::Return { ty: TypeTag::Object(_) })
    ));
}

#[test]
fn test_fn_expression_instantiates() {
    let unit = emit(&obj(Op::Fn(Box::new(simple_fn("user$f__1", vec![])))));
    assert_eq!(
        &unit.code.instrs[..2],
        &[
            Instr::New {
                class: "user$f__1".into()
            },
            Instr::Dup
        ]
    );
    assert!(matches!(
        unit.code.instrs.last(),
        Some(Instr::Invoke { kind: InvokeKind::Special, sig, .. }) if sig.name == "<init>"
    ));
}

#[test]
fn test_fn_class_is_assembled_once() {
    let f = || obj(Op::Fn(Box::new(simple_fn("user$f__1", vec![]))));
    let node = obj(Op::Do {
        statements: vec![f()],
        ret: Box::new(f()),
    });
    let unit = emit(&node);
    let count = unit
        .classes
        .iter()
        .filter(|c| c.name == "user$f__1")
        .count();
    assert_eq!(count, 1);
}

#[test]
fn test_captures_become_ctor_stored_fields() {
    let captures = vec![Capture {
        name: "acc".into(),
        ty: TypeTag::object(),
        mutable: false,
        source_slot: Some(2),
    }];
    let unit = emit(&obj(Op::Fn(Box::new(simple_fn("user$f__1", captures)))));
    let fn_class = &unit.classes[0];

    let field = fn_class.field("acc").expect("capture field");
    assert!(!field.is_static);
    assert!(field.is_final);

    let ctor = fn_class.method("<init>").unwrap();
    assert_eq!(ctor.sig.params.len(), 1);
    assert!(ctor.code.instrs.iter().any(|i| matches!(
        i,
        Instr::PutField { name, .. } if name == "acc"
    )));

    // The instantiation site loads the captured slot.
    assert!(unit
        .code
        .instrs
        .iter()
        .any(|i| matches!(i, Instr::LoadLocal { slot: 2, .. })));
}

#[test]
fn test_capture_free_fn_gets_static_delegate() {
    let unit = emit(&obj(Op::Fn(Box::new(simple_fn("user$f__1", vec![])))));
    let fn_class = &unit.classes[0];
    let delegate = fn_class.method("invokeStatic").expect("static delegate");
    assert!(delegate.is_static);
    assert_eq!(delegate.sig.params.len(), 1);

    let captures = vec![Capture {
        name: "acc".into(),
        ty: TypeTag::object(),
        mutable: false,
        source_slot: Some(2),
    }];
    let unit = emit(&obj(Op::Fn(Box::new(simple_fn("user$g__2", captures)))));
    assert!(unit.classes[0].method("invokeStatic").is_none());
}

#[test]
fn test_variadic_fn_extends_rest_base() {
    let mut f = simple_fn("user$f__1", vec![]);
    f.variadic = true;
    f.arities = vec![FnArity {
        params: vec![param("x", 1), param("rest", 2)],
        variadic: true,
        body: obj(Op::Const(Value::Nil)),
        prim_interface: None,
        prim_ret: None,
    }];
    let unit = emit(&obj(Op::Fn(Box::new(f))));
    let fn_class = &unit.classes[0];
    assert_eq!(fn_class.superclass, rt::RESTFN);
    assert!(fn_class.method("doInvoke").is_some());

    let req = fn_class.method("getRequiredArity").unwrap();
    assert!(req.code.instrs.contains(&Instr::PushInt(1)));
}

#[test]
fn test_prim_arity_emits_typed_entry_and_bridge() {
    let mut f = simple_fn("user$f__1", vec![]);
    f.arities = vec![FnArity {
        params: vec![ParamDecl {
            name: "n".into(),
            slot: 1,
            ty: TypeTag::Prim(PrimType::Long),
        }],
        variadic: false,
        body: Node::new(
            Op::Local(LocalUse {
                name: "n".into(),
                slot: 1,
                ty: TypeTag::Prim(PrimType::Long),
                to_clear: false,
            }),
            TypeTag::Prim(PrimType::Long),
        ),
        prim_interface: Some("sylva.lang.IFn$LL".into()),
        prim_ret: Some(TypeTag::Prim(PrimType::Long)),
    }];
    let unit = emit(&obj(Op::Fn(Box::new(f))));
    let fn_class = &unit.classes[0];
    assert!(fn_class
        .interfaces
        .contains(&"sylva.lang.IFn$LL".to_string()));

    let prim = fn_class.method("invokePrim").expect("typed entry");
    assert_eq!(prim.sig.ret, TypeTag::Prim(PrimType::Long));

    // The boxed entry unboxes, delegates, re-boxes.
    let bridge = fn_class.method("invoke").expect("boxing bridge");
    assert!(bridge.code.instrs.contains(&Instr::Unbox {
        prim: PrimType::Long
    }));
    assert!(bridge.code.instrs.iter().any(|i| matches!(
        i,
        Instr::Invoke { sig, .. } if sig.name == "invokePrim"
    )));
    assert!(bridge.code.instrs.contains(&Instr::Box {
        prim: PrimType::Long
    }));
}

#[test]
fn test_fn_with_meta_supports_the_meta_protocol() {
    let mut f = simple_fn("user$f__1", vec![]);
    f.meta = Some(Value::Map(vec![(
        Value::Keyword {
            ns: None,
            name: "doc".into(),
        },
        Value::Str("docstring".into()),
    )]));
    let unit = emit(&obj(Op::Fn(Box::new(f))));
    let fn_class = &unit.classes[0];

    assert!(fn_class.interfaces.contains(&rt::IOBJ.to_string()));
    assert!(fn_class.field("__meta").is_some());
    assert!(fn_class.method("meta").is_some());

    let with_meta = fn_class.method("withMeta").unwrap();
    assert!(with_meta.code.instrs.iter().any(|i| matches!(
        i,
        Instr::New { class } if class == "user$f__1"
    )));

    // The ctor takes the metadata map first.
    let ctor = fn_class.method("<init>").unwrap();
    assert_eq!(ctor.sig.params[0], TypeTag::of(rt::IPERSISTENT_MAP));
}

#[test]
fn test_too_many_params_is_rejected() {
    let mut f = simple_fn("user$f__1", vec![]);
    f.arities = vec![FnArity {
        params: (0..256).map(|i| param("p", i as u16 + 1)).collect(),
        variadic: false,
        body: obj(Op::Const(Value::Nil)),
        prim_interface: None,
        prim_ret: None,
    }];
    let err = emit_unit(
        &obj(Op::Fn(Box::new(f))),
        &VarTable::new(),
        "user$eval1",
    )
    .unwrap_err();
    assert!(matches!(
        err,
        EmitError::InvalidArgumentCount { count: 256, max: 255 }
    ));
}

fn point_deftype() -> TypeDefNode {
    TypeDefNode {
        name: "Point".into(),
        class_name: "app.Point".into(),
        fields: vec![
            FieldSpec {
                name: "x".into(),
                ty: TypeTag::Prim(PrimType::Long),
                mutable: false,
            },
            FieldSpec {
                name: "tag".into(),
                ty: TypeTag::object(),
                mutable: true,
            },
        ],
        interfaces: vec!["app.ITagged".into()],
        methods: vec![MethodImpl {
            sig: MethodSig::new("tag", vec![], TypeTag::object()),
            params: vec![],
            body: obj(Op::CapturedUse {
                name: "tag".into(),
                ty: TypeTag::object(),
            }),
            bridge: None,
        }],
    }
}

#[test]
fn test_deftype_assembles_fields_and_ctor() {
    let unit = emit(&obj(Op::DefType(Box::new(point_deftype()))));
    let class = &unit.classes[0];
    assert_eq!(class.name, "app.Point");
    assert_eq!(class.superclass, rt::OBJECT);
    assert!(class.interfaces.contains(&"app.ITagged".to_string()));

    assert!(class.field("x").unwrap().is_final);
    assert!(!class.field("tag").unwrap().is_final);

    let ctor = class.method("<init>").unwrap();
    assert_eq!(
        ctor.sig.params,
        vec![TypeTag::Prim(PrimType::Long), TypeTag::object()]
    );

    // Field access inside a method body goes through the receiver.
    let tag = class.method("tag").unwrap();
    assert!(tag.code.instrs.contains(&Instr::LoadThis));
    assert!(tag.code.instrs.iter().any(|i| matches!(
        i,
        Instr::GetField { owner, name, .. } if owner == "app.Point" && name == "tag"
    )));
}

#[test]
fn test_deftype_expression_is_the_class_object() {
    let unit = emit(&obj(Op::DefType(Box::new(point_deftype()))));
    assert_eq!(
        unit.code.instrs,
        vec![Instr::PushClass("app.Point".into())]
    );
}

#[test]
fn test_deftype_bridge_casts_and_forwards() {
    let mut t = point_deftype();
    t.methods = vec![MethodImpl {
        sig: MethodSig::new(
            "compareTo",
            vec![TypeTag::of("app.Point")],
            TypeTag::Prim(PrimType::Long),
        ),
        params: vec![ParamDecl {
            name: "other".into(),
            slot: 1,
            ty: TypeTag::of("app.Point"),
        }],
        body: Node::new(Op::Const(Value::Int(0)), TypeTag::Prim(PrimType::Long)),
        bridge: Some(MethodSig::new(
            "compareTo",
            vec![TypeTag::object()],
            TypeTag::Prim(PrimType::Long),
        )),
    }];
    let unit = emit(&obj(Op::DefType(Box::new(t))));
    let class = &unit.classes[0];

    let bridges: Vec<_> = class
        .methods
        .iter()
        .filter(|m| m.sig.name == "compareTo")
        .collect();
    assert_eq!(bridges.len(), 2);
    let erased = bridges
        .iter()
        .find(|m| m.sig.params[0] == TypeTag::object())
        .unwrap();
    assert!(erased.code.instrs.contains(&Instr::CheckCast {
        class: "app.Point".into()
    }));
    assert!(erased.code.instrs.iter().any(|i| matches!(
        i,
        Instr::Invoke { kind: InvokeKind::Virtual, sig, .. }
            if sig.params[0] == TypeTag::of("app.Point")
    )));
}

#[test]
fn test_reify_closes_over_and_instantiates() {
    let r = ReifyNode {
        class_name: "user$reify__7".into(),
        interfaces: vec!["app.Handler".into()],
        methods: vec![MethodImpl {
            sig: MethodSig::new("handle", vec![TypeTag::object()], TypeTag::object()),
            params: vec![param("req", 1)],
            body: obj(Op::CapturedUse {
                name: "state".into(),
                ty: TypeTag::object(),
            }),
            bridge: None,
        }],
        closed_overs: vec![Capture {
            name: "state".into(),
            ty: TypeTag::object(),
            mutable: false,
            source_slot: Some(3),
        }],
        meta: None,
    };
    let unit = emit(&obj(Op::Reify(Box::new(r))));
    let class = &unit.classes[0];
    assert_eq!(class.superclass, rt::OBJECT);
    assert!(class.interfaces.contains(&"app.Handler".to_string()));
    assert!(class.field("state").is_some());
    assert!(class.method("handle").is_some());

    assert!(unit.code.instrs.iter().any(|i| matches!(
        i,
        Instr::New { class } if class == "user$reify__7"
    )));
    assert!(unit
        .code
        .instrs
        .iter()
        .any(|i| matches!(i, Instr::LoadLocal { slot: 3, .. })));
}

#[test]
fn test_protocol_call_site_caches_receiver_class() {
    let node = obj(Op::ProtocolCall {
        var_ns: "core".into(),
        var_name: "render".into(),
        iface: "core.IRender".into(),
        method: MethodSig::new("render", vec![TypeTag::object()], TypeTag::object()),
        target: Box::new(obj(Op::Local(LocalUse {
            name: "x".into(),
            slot: 1,
            ty: TypeTag::object(),
            to_clear: false,
        }))),
        args: vec![int_lit(1)],
    });
    let unit = emit(&node);
    let unit_class = unit.classes.last().unwrap();

    let cache = unit_class.field("cached_class__0").expect("cache field");
    assert!(cache.is_static);
    assert!(!cache.is_final);

    // Probe, interface test, direct call, and the var fallback.
    assert!(unit.code.instrs.iter().any(|i| matches!(
        i,
        Instr::Invoke { owner, sig, .. } if owner == rt::UTIL && sig.name == "classOf"
    )));
    assert!(unit.code.instrs.contains(&Instr::InstanceOf {
        class: "core.IRender".into()
    }));
    assert!(unit.code.instrs.iter().any(|i| matches!(
        i,
        Instr::Invoke { kind: InvokeKind::Interface, owner, .. } if owner == "core.IRender"
    )));
    assert!(unit.code.instrs.iter().any(|i| matches!(
        i,
        Instr::Invoke { owner, sig, .. } if owner == rt::VAR && sig.name == "getRawRoot"
    )));
    assert!(unit.code.instrs.iter().any(|i| matches!(
        i,
        Instr::PutStatic { name, .. } if name == "cached_class__0"
    )));
}

#[test]
fn test_protocol_var_path_packs_overflow_arity() {
    // 25 arguments plus the receiver: the var fallback takes the same
    // boxed-array tail as every other call shape.
    let argc = 25;
    let node = obj(Op::ProtocolCall {
        var_ns: "core".into(),
        var_name: "render".into(),
        iface: "core.IRender".into(),
        method: MethodSig::new(
            "render",
            vec![TypeTag::object(); argc],
            TypeTag::object(),
        ),
        target: Box::new(obj(Op::Local(LocalUse {
            name: "x".into(),
            slot: 1,
            ty: TypeTag::object(),
            to_clear: false,
        }))),
        args: (0..argc as i64).map(int_lit).collect(),
    });
    let unit = emit(&node);

    let ifn_invokes: Vec<_> = unit
        .code
        .instrs
        .iter()
        .filter_map(|i| match i {
            Instr::Invoke { owner, sig, .. } if owner == rt::IFN => Some(sig),
            _ => None,
        })
        .collect();
    assert_eq!(ifn_invokes.len(), 1);
    // 20 positional slots (receiver first) plus one trailing array.
    assert_eq!(ifn_invokes[0].params.len(), 21);
    assert_eq!(
        *ifn_invokes[0].params.last().unwrap(),
        TypeTag::of(rt::OBJECT_ARRAY)
    );

    // Receiver + 19 positional leaves 6 arguments in the array.
    let stores = unit
        .code
        .instrs
        .iter()
        .filter(|i| matches!(i, Instr::ArrayStore { .. }))
        .count();
    assert_eq!(stores, 6);
}

#[test]
fn test_nested_fn_captures_enclosing_field() {
    // A fn inside a fn: the inner capture has no slot and loads the
    // enclosing class's field instead.
    let inner = FnNode {
        name: None,
        class_name: "user$f__1$inner__2".into(),
        arities: vec![FnArity {
            params: vec![],
            variadic: false,
            body: obj(Op::CapturedUse {
                name: "acc".into(),
                ty: TypeTag::object(),
            }),
            prim_interface: None,
            prim_ret: None,
        }],
        variadic: false,
        closed_overs: vec![Capture {
            name: "acc".into(),
            ty: TypeTag::object(),
            mutable: false,
            source_slot: None,
        }],
        meta: None,
    };
    let outer = FnNode {
        name: None,
        class_name: "user$f__1".into(),
        arities: vec![FnArity {
            params: vec![],
            variadic: false,
            body: obj(Op::Fn(Box::new(inner))),
            prim_interface: None,
            prim_ret: None,
        }],
        variadic: false,
        closed_overs: vec![Capture {
            name: "acc".into(),
            ty: TypeTag::object(),
            mutable: false,
            source_slot: Some(1),
        }],
        meta: None,
    };
    let unit = emit(&obj(Op::Fn(Box::new(outer))));

    // Inner class assembled first, then outer, then the unit class.
    assert_eq!(unit.classes.len(), 3);
    let outer_class = unit
        .classes
        .iter()
        .find(|c| c.name == "user$f__1")
        .unwrap();
    let outer_invoke = outer_class.method("invoke").unwrap();
    assert!(outer_invoke.code.instrs.iter().any(|i| matches!(
        i,
        Instr::GetField { owner, name, .. } if owner == "user$f__1" && name == "acc"
    )));
}
