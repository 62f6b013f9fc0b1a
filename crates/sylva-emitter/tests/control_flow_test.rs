//! Control-flow lowering tests: conditionals, bindings, loops, exception
//! handling, and multiway dispatch.

use sylva_emitter::ast::{
    Binding, CaseArm, CaseNode, CaseTest, CatchClause, LocalUse, Op, PrimType, SwitchKind,
    TypeTag, Value, VarTable,
};
use sylva_emitter::bytecode::{rt, Cond, Instr};
use sylva_emitter::{emit_unit, CompiledUnit, EmitError, Node};

fn obj(op: Op) -> Node {
    Node::new(op, TypeTag::object())
}

fn int_lit(n: i64) -> Node {
    Node::new(Op::Const(Value::Int(n)), TypeTag::object())
}

fn local(name: &str, slot: u16) -> Node {
    obj(Op::Local(LocalUse {
        name: name.into(),
        slot,
        ty: TypeTag::object(),
        to_clear: false,
    }))
}

fn emit(node: &Node) -> CompiledUnit {
    emit_unit(node, &VarTable::new(), "user$eval1").expect("emission failed")
}

fn count<'a>(unit: &'a CompiledUnit, pred: impl Fn(&&'a Instr) -> bool) -> usize {
    unit.code.instrs.iter().filter(pred).count()
}

#[test]
fn test_if_general_test_checks_nil_and_false() {
    let node = obj(Op::If {
        test: Box::new(local("x", 1)),
        then: Box::new(int_lit(1)),
        els: Box::new(int_lit(2)),
    });
    let unit = emit(&node);

    // The duplicated test value feeds a null check and an identity compare
    // against the canonical false.
    assert!(unit.code.instrs.contains(&Instr::Dup));
    assert!(unit
        .code
        .instrs
        .iter()
        .any(|i| matches!(i, Instr::JumpIf { cond: Cond::Null, .. })));
    assert!(unit.code.instrs.iter().any(|i| matches!(
        i,
        Instr::GetStatic { owner, name, .. } if owner == rt::BOOLEAN && name == "FALSE"
    )));
    assert!(unit
        .code
        .instrs
        .iter()
        .any(|i| matches!(i, Instr::JumpIf { cond: Cond::RefEq, .. })));

    // The null path pops the leftover duplicate.
    assert!(unit.code.instrs.contains(&Instr::Pop));
}

#[test]
fn test_predicate_if_marks_only_targeted_labels() {
    // A comparison test takes the single-branch path; the nil-check label
    // must not leak into the stream unmarked or unreferenced.
    let prim = |n: i64| {
        Node::new(
            Op::Const(Value::Int(n)),
            TypeTag::Prim(PrimType::Long),
        )
    };
    let test = Node::new(
        Op::StaticCall {
            owner: rt::NUMBERS.into(),
            sig: sylva_emitter::MethodSig::new(
                "lt",
                vec![TypeTag::Prim(PrimType::Long), TypeTag::Prim(PrimType::Long)],
                TypeTag::Prim(PrimType::Boolean),
            ),
            args: vec![prim(1), prim(2)],
        },
        TypeTag::Prim(PrimType::Boolean),
    );
    let node = obj(Op::If {
        test: Box::new(test),
        then: Box::new(int_lit(1)),
        els: Box::new(int_lit(2)),
    });
    let unit = emit(&node);

    let targets: Vec<_> = unit
        .code
        .instrs
        .iter()
        .filter_map(|i| match i {
            Instr::Jump(target) | Instr::JumpIf { target, .. } => Some(*target),
            _ => None,
        })
        .collect();
    for i in &unit.code.instrs {
        if let Instr::Mark(label) = i {
            assert!(targets.contains(label), "marked label {label:?} never branched to");
        }
    }
    // Exactly the false branch and the join point.
    assert_eq!(count(&unit, |i| matches!(i, Instr::Mark(_))), 2);
}

#[test]
fn test_do_keeps_only_final_value() {
    let node = obj(Op::Do {
        statements: vec![local("a", 1), local("b", 2)],
        ret: Box::new(local("c", 3)),
    });
    let unit = emit(&node);
    assert_eq!(count(&unit, |i| matches!(i, Instr::Pop)), 2);
    assert_eq!(count(&unit, |i| matches!(i, Instr::LoadLocal { .. })), 3);
}

#[test]
fn test_let_stores_and_annotates_bindings() {
    let node = obj(Op::Let {
        bindings: vec![Binding {
            name: "x".into(),
            slot: 1,
            ty: TypeTag::object(),
            init: int_lit(1),
            discard: false,
        }],
        body: Box::new(local("x", 1)),
        loop_form: false,
    });
    let unit = emit(&node);
    assert!(unit
        .code
        .instrs
        .iter()
        .any(|i| matches!(i, Instr::StoreLocal { slot: 1, .. })));
    assert!(unit.code.instrs.iter().any(|i| matches!(
        i,
        Instr::LocalRange { slot: 1, name, .. } if name == "x"
    )));
}

#[test]
fn test_discarded_binding_is_popped() {
    let node = obj(Op::Let {
        bindings: vec![Binding {
            name: "_".into(),
            slot: 1,
            ty: TypeTag::object(),
            init: local("side", 2),
            discard: true,
        }],
        body: Box::new(int_lit(0)),
        loop_form: false,
    });
    let unit = emit(&node);
    assert!(unit.code.instrs.contains(&Instr::Pop));
    assert!(!unit
        .code
        .instrs
        .iter()
        .any(|i| matches!(i, Instr::StoreLocal { slot: 1, .. })));
}

#[test]
fn test_loop_recur_rebinds_in_reverse_then_jumps() {
    let node = obj(Op::Let {
        bindings: vec![
            Binding {
                name: "a".into(),
                slot: 1,
                ty: TypeTag::object(),
                init: int_lit(0),
                discard: false,
            },
            Binding {
                name: "b".into(),
                slot: 2,
                ty: TypeTag::object(),
                init: int_lit(1),
                discard: false,
            },
        ],
        body: Box::new(obj(Op::Recur {
            args: vec![local("b", 2), local("a", 1)],
        })),
        loop_form: true,
    });
    let unit = emit(&node);

    // Stores after the loop entry run highest slot first.
    let stores: Vec<u16> = unit
        .code
        .instrs
        .iter()
        .filter_map(|i| match i {
            Instr::StoreLocal { slot, .. } => Some(*slot),
            _ => None,
        })
        .collect();
    assert_eq!(stores, vec![1, 2, 2, 1]);

    // The jump goes back to a marked label.
    let target = unit
        .code
        .instrs
        .iter()
        .find_map(|i| match i {
            Instr::Jump(l) => Some(*l),
            _ => None,
        })
        .expect("no loop jump");
    assert!(unit.code.instrs.contains(&Instr::Mark(target)));
}

#[test]
fn test_recur_outside_loop_is_an_error() {
    let node = obj(Op::Recur { args: vec![] });
    let err = emit_unit(&node, &VarTable::new(), "user$eval1").unwrap_err();
    assert!(matches!(err, EmitError::NoLoopTarget));
}

fn try_node(catches: Vec<CatchClause>, finally: Option<Node>) -> Node {
    obj(Op::Try {
        body: Box::new(local("x", 1)),
        catches,
        finally: finally.map(Box::new),
    })
}

fn catch_clause(class: &str, slot: u16) -> CatchClause {
    CatchClause {
        class: class.into(),
        slot,
        name: "e".into(),
        body: int_lit(-1),
    }
}

#[test]
fn test_try_catch_declares_one_range_per_clause() {
    let node = try_node(
        vec![
            catch_clause("app.NotFound", 2),
            catch_clause(rt::THROWABLE, 3),
        ],
        None,
    );
    let unit = emit(&node);
    let ranges: Vec<_> = unit
        .code
        .instrs
        .iter()
        .filter(|i| matches!(i, Instr::Catch { .. }))
        .collect();
    assert_eq!(ranges.len(), 2);
    // Declared order preserved: most specific first.
    assert!(matches!(
        ranges[0],
        Instr::Catch { class: Some(c), .. } if c == "app.NotFound"
    ));
}

#[test]
fn test_try_finally_covers_body_and_handlers() {
    let node = try_node(
        vec![catch_clause(rt::THROWABLE, 2)],
        Some(obj(Op::Do {
            statements: vec![local("cleanup", 4)],
            ret: Box::new(obj(Op::Const(Value::Nil))),
        })),
    );
    let unit = emit(&node);

    let ranges: Vec<_> = unit
        .code
        .instrs
        .iter()
        .filter(|i| matches!(i, Instr::Catch { .. }))
        .collect();
    // One typed range, plus catch-all ranges for the body and the handler.
    assert_eq!(ranges.len(), 3);
    assert_eq!(
        ranges
            .iter()
            .filter(|i| matches!(i, Instr::Catch { class: None, .. }))
            .count(),
        2
    );

    // The finally body runs on the normal path, after the handler, and
    // before the re-throw.
    assert_eq!(
        count(&unit, |i| matches!(
            i,
            Instr::LoadLocal { slot: 4, .. }
        )),
        3
    );
    assert!(unit.code.instrs.contains(&Instr::Throw));
}

#[test]
fn test_try_result_rides_in_a_local() {
    let node = try_node(vec![catch_clause(rt::THROWABLE, 2)], None);
    let unit = emit(&node);
    // Body and handler both store the result; the end reloads it.
    let result_stores = count(&unit, |i| matches!(i, Instr::StoreLocal { slot, .. } if *slot > 2));
    assert_eq!(result_stores, 2);
    let last = unit.code.instrs.last().unwrap();
    assert!(matches!(last, Instr::LoadLocal { .. }));
}

fn case_node(switch_kind: SwitchKind, test_kind: CaseTest, arms: Vec<CaseArm>) -> Node {
    let (low, high) = (
        arms.iter().map(|a| a.key).min().unwrap_or(0),
        arms.iter().map(|a| a.key).max().unwrap_or(0),
    );
    obj(Op::Case(Box::new(CaseNode {
        test: local("x", 1),
        shift: 0,
        mask: 0,
        low,
        high,
        switch_kind,
        test_kind,
        arms,
        default: int_lit(-1),
    })))
}

fn arm(key: i64, test: Value, unambiguous: bool) -> CaseArm {
    CaseArm {
        key,
        test,
        body: int_lit(key),
        unambiguous,
    }
}

#[test]
fn test_case_table_switch_routes_gaps_to_default() {
    let node = case_node(
        SwitchKind::Table,
        CaseTest::Int,
        vec![
            arm(1, Value::Int(1), true),
            arm(3, Value::Int(3), true),
        ],
    );
    let unit = emit(&node);
    let (low, targets, default) = unit
        .code
        .instrs
        .iter()
        .find_map(|i| match i {
            Instr::TableSwitch {
                low,
                targets,
                default,
            } => Some((*low, targets.clone(), *default)),
            _ => None,
        })
        .expect("no table switch");
    assert_eq!(low, 1);
    assert_eq!(targets.len(), 3);
    // Key 2 has no arm.
    assert_eq!(targets[1], default);

    // The test value dispatches on its long value.
    assert!(unit.code.instrs.iter().any(|i| matches!(
        i,
        Instr::Invoke { owner, sig, .. } if owner == rt::RT && sig.name == "longCast"
    )));
}

#[test]
fn test_case_hash_arms_recheck_equality() {
    let node = case_node(
        SwitchKind::Sparse,
        CaseTest::Hash,
        vec![arm(
            77,
            Value::Keyword {
                ns: None,
                name: "a".into(),
            },
            false,
        )],
    );
    let unit = emit(&node);
    assert!(unit
        .code
        .instrs
        .iter()
        .any(|i| matches!(i, Instr::LookupSwitch { .. })));
    assert!(unit.code.instrs.iter().any(|i| matches!(
        i,
        Instr::Invoke { owner, sig, .. } if owner == rt::UTIL && sig.name == "hash"
    )));
    assert!(unit.code.instrs.iter().any(|i| matches!(
        i,
        Instr::Invoke { owner, sig, .. } if owner == rt::UTIL && sig.name == "equiv"
    )));
}

#[test]
fn test_case_unambiguous_arm_skips_guard() {
    let node = case_node(
        SwitchKind::Sparse,
        CaseTest::Hash,
        vec![arm(
            77,
            Value::Keyword {
                ns: None,
                name: "a".into(),
            },
            true,
        )],
    );
    let unit = emit(&node);
    assert!(!unit.code.instrs.iter().any(|i| matches!(
        i,
        Instr::Invoke { sig, .. } if sig.name == "equiv"
    )));
}

#[test]
fn test_case_identity_arms_compare_references() {
    let node = case_node(
        SwitchKind::Sparse,
        CaseTest::HashIdentity,
        vec![arm(
            5,
            Value::Keyword {
                ns: None,
                name: "k".into(),
            },
            false,
        )],
    );
    let unit = emit(&node);
    assert!(unit
        .code
        .instrs
        .iter()
        .any(|i| matches!(i, Instr::JumpIf { cond: Cond::RefNe, .. })));
    assert!(!unit.code.instrs.iter().any(|i| matches!(
        i,
        Instr::Invoke { sig, .. } if sig.name == "equiv"
    )));
}

#[test]
fn test_throw_in_statement_position_adds_no_pop() {
    let node = obj(Op::Do {
        statements: vec![Node::new(
            Op::Throw {
                exception: Box::new(local("e", 1)),
            },
            TypeTag::Void,
        )],
        ret: Box::new(obj(Op::Const(Value::Nil))),
    });
    let unit = emit(&node);
    assert!(unit.code.instrs.contains(&Instr::Throw));
    assert!(!unit.code.instrs.contains(&Instr::Pop));
}

#[test]
fn test_hoisted_call_registers_private_method() {
    let node = obj(Op::HoistedCall {
        method: "loop__0".into(),
        params: vec![sylva_emitter::ast::ParamDecl {
            name: "n".into(),
            slot: 1,
            ty: TypeTag::Prim(PrimType::Long),
        }],
        args: vec![LocalUse {
            name: "n".into(),
            slot: 3,
            ty: TypeTag::Prim(PrimType::Long),
            to_clear: false,
        }],
        body: Box::new(Node::new(
            Op::Const(Value::Int(0)),
            TypeTag::Prim(PrimType::Long),
        )),
    });
    // Give the hoisted call a primitive observed type.
    let node = Node::new(node.op, TypeTag::Prim(PrimType::Long));
    let unit = emit(&node);

    // Call site: receiver, live locals, virtual invoke.
    assert!(unit.code.instrs.contains(&Instr::LoadThis));
    assert!(unit.code.instrs.iter().any(|i| matches!(
        i,
        Instr::Invoke { sig, .. } if sig.name == "loop__0"
    )));

    // The method itself lands on the unit class.
    let unit_class = unit.classes.last().unwrap();
    let hoisted = unit_class.method("loop__0").expect("hoisted method");
    assert!(!hoisted.is_static);
    assert!(matches!(
        hoisted.code.instrs.last(),
        Some(Instr::Return { .. })
    ));
}
