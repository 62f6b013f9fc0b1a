//! Structured control-flow lowering.
//!
//! Conditionals, sequencing, local bindings, loops with tail recursion,
//! exception handling, and multiway dispatch, lowered into label-addressed
//! instruction graphs with exception-range declarations.

use crate::ast::{Binding, CaseNode, CaseTest, CatchClause, LocalUse, Node, ParamDecl, SwitchKind, TypeTag, Value};
use crate::bytecode::{rt, CmpOp, Cond, Instr, InstrSeq, InvokeKind, MethodDef, MethodSig};
use crate::error::{EmitError, EmitResult};

use super::{emit_falsy_branch, Emitter, Frame, LoopLocal, MethodScope, Position};

impl<'a> Emitter<'a> {
    /// `do`: statements in statement position, the final expression in the
    /// parent's position. The sequence balances its own children.
    pub(crate) fn emit_do(
        &mut self,
        statements: &[Node],
        ret: &Node,
        frame: &Frame,
    ) -> EmitResult<InstrSeq> {
        let mut seq = InstrSeq::container();
        let stmt_frame = frame.stmt();
        for s in statements {
            seq.extend(self.emit(s, &stmt_frame)?);
        }
        seq.extend(self.emit(ret, frame)?);
        Ok(seq)
    }

    /// `if`: both arms converge on one end label. A predicate-flagged test
    /// is consumed by a single branch; otherwise the nil/false check decides.
    pub(crate) fn emit_if(
        &mut self,
        test: &Node,
        then: &Node,
        els: &Node,
        frame: &Frame,
    ) -> EmitResult<InstrSeq> {
        let false_label = self.new_label();
        let end_label = self.new_label();

        let test_seq = self.emit(test, &frame.expr())?;
        let predicate = test_seq.predicate;

        let mut seq = InstrSeq::container();
        seq.extend(test_seq);
        let null_label = if predicate {
            seq.jump_if(Cond::False, false_label);
            None
        } else {
            let null_label = self.new_label();
            emit_falsy_branch(&mut seq, null_label, false_label);
            Some(null_label)
        };

        seq.extend(self.emit(then, frame)?);
        seq.jump(end_label);

        if let Some(null_label) = null_label {
            // The null path still holds the duplicated test value.
            seq.mark(null_label);
            seq.push(Instr::Pop);
        }
        seq.mark(false_label);
        seq.extend(self.emit(els, frame)?);
        seq.mark(end_label);
        Ok(seq)
    }

    /// `let`/`loop`: initializers stored into dedicated slots (or popped
    /// when the binding is flagged as discarded), the loop variant marking
    /// its entry label and recording the binding list for `recur`.
    pub(crate) fn emit_let(
        &mut self,
        bindings: &[Binding],
        body: &Node,
        loop_form: bool,
        frame: &Frame,
    ) -> EmitResult<InstrSeq> {
        let mut seq = InstrSeq::container();
        let init_frame = frame.expr();
        for b in bindings {
            seq.extend(self.emit(&b.init, &init_frame)?);
            if b.discard {
                seq.push(if b.ty.is_wide() { Instr::Pop2 } else { Instr::Pop });
            } else {
                seq.push(Instr::StoreLocal {
                    slot: b.slot,
                    ty: b.ty.clone(),
                });
            }
        }

        let body_start = self.new_label();
        let body_end = self.new_label();
        seq.mark(body_start);

        let body_frame = if loop_form {
            let locals = bindings
                .iter()
                .filter(|b| !b.discard)
                .map(|b| LoopLocal {
                    slot: b.slot,
                    ty: b.ty.clone(),
                })
                .collect();
            frame.with_loop(body_start, locals)
        } else {
            frame.clone()
        };
        seq.extend(self.emit(body, &body_frame)?);

        seq.mark(body_end);
        for b in bindings.iter().filter(|b| !b.discard) {
            seq.push(Instr::LocalRange {
                slot: b.slot,
                name: b.name.clone(),
                start: body_start,
                end: body_end,
            });
        }
        Ok(seq)
    }

    /// `recur`: simultaneous re-binding of the enclosing loop's slots.
    /// All new values are evaluated left-to-right onto the stack before any
    /// slot is overwritten; stores then run in reverse declaration order.
    pub(crate) fn emit_recur(&mut self, args: &[Node], frame: &Frame) -> EmitResult<InstrSeq> {
        let loop_label = frame.loop_label.ok_or(EmitError::NoLoopTarget)?;
        if args.len() != frame.loop_locals.len() {
            return self.unsupported(&format!(
                "recur with {} args to a loop of {} bindings",
                args.len(),
                frame.loop_locals.len()
            ));
        }
        let mut seq = InstrSeq::new();
        let arg_frame = frame.expr();
        for arg in args {
            seq.extend(self.emit(arg, &arg_frame)?);
        }
        for local in frame.loop_locals.iter().rev() {
            seq.push(Instr::StoreLocal {
                slot: local.slot,
                ty: local.ty.clone(),
            });
        }
        seq.jump(loop_label);
        seq.untyped = true;
        Ok(seq)
    }

    /// `try`: the native exception-table mechanism. One range per catch
    /// clause in declared order, plus catch-all ranges into the finally
    /// handler covering the body and every catch handler. The finally body
    /// is duplicated on the normal path, after each handler, and before the
    /// re-throw.
    pub(crate) fn emit_try(
        &mut self,
        body: &Node,
        catches: &[CatchClause],
        finally: Option<&Node>,
        ty: &TypeTag,
        frame: &Frame,
    ) -> EmitResult<InstrSeq> {
        let is_void = ty.is_void();
        // The result slot is allocated even in statement position, keeping
        // code generation uniform across positions.
        let ret_slot = self.alloc_local(if is_void { &TypeTag::Void } else { ty });
        let ret_ty = if is_void { TypeTag::object() } else { ty.clone() };

        let body_start = self.new_label();
        let body_end = self.new_label();
        let end_label = self.new_label();
        let finally_handler = finally.map(|_| self.new_label());

        let inner_frame = if is_void { frame.stmt() } else { frame.expr() };
        let finally_frame = frame.stmt();

        let mut seq = InstrSeq::container();
        seq.mark(body_start);
        seq.extend(self.emit(body, &inner_frame)?);
        if !is_void {
            seq.push(Instr::StoreLocal {
                slot: ret_slot,
                ty: ret_ty.clone(),
            });
        }
        seq.mark(body_end);
        if let Some(f) = finally {
            seq.extend(self.emit(f, &finally_frame)?);
        }
        seq.jump(end_label);

        let mut handler_ranges = Vec::with_capacity(catches.len());
        for clause in catches {
            let handler_start = self.new_label();
            let handler_end = self.new_label();
            seq.mark(handler_start);
            seq.push(Instr::StoreLocal {
                slot: clause.slot,
                ty: TypeTag::of(&clause.class),
            });
            seq.extend(self.emit(&clause.body, &inner_frame)?);
            if !is_void {
                seq.push(Instr::StoreLocal {
                    slot: ret_slot,
                    ty: ret_ty.clone(),
                });
            }
            seq.mark(handler_end);
            if let Some(f) = finally {
                seq.extend(self.emit(f, &finally_frame)?);
            }
            seq.jump(end_label);
            handler_ranges.push((handler_start, handler_end));
        }

        if let Some(handler) = finally_handler {
            let exc_slot = self.alloc_local(&TypeTag::object());
            seq.mark(handler);
            seq.push(Instr::StoreLocal {
                slot: exc_slot,
                ty: TypeTag::object(),
            });
            seq.extend(self.emit(finally.expect("finally handler"), &finally_frame)?);
            seq.push(Instr::LoadLocal {
                slot: exc_slot,
                ty: TypeTag::object(),
            });
            seq.push(Instr::Throw);
        }

        // Exception ranges, declared order authoritative.
        for (clause, (handler_start, _)) in catches.iter().zip(&handler_ranges) {
            seq.push(Instr::Catch {
                start: body_start,
                end: body_end,
                handler: *handler_start,
                class: Some(clause.class.clone()),
            });
        }
        if let Some(handler) = finally_handler {
            seq.push(Instr::Catch {
                start: body_start,
                end: body_end,
                handler,
                class: None,
            });
            for (handler_start, handler_end) in &handler_ranges {
                seq.push(Instr::Catch {
                    start: *handler_start,
                    end: *handler_end,
                    handler,
                    class: None,
                });
            }
        }

        seq.mark(end_label);
        if frame.position == Position::Expression && !is_void {
            seq.push(Instr::LoadLocal {
                slot: ret_slot,
                ty: ret_ty,
            });
        }
        Ok(seq)
    }

    /// `case`: table or sparse dispatch over an integer or hash key, with
    /// per-arm collision re-checks unless the front end proved the arm
    /// unambiguous. Every arm jumps to one shared end label.
    pub(crate) fn emit_case(&mut self, case: &CaseNode, frame: &Frame) -> EmitResult<InstrSeq> {
        let test_ty = case.test.cast.clone().unwrap_or_else(|| case.test.ty.clone());
        let test_slot = self.alloc_local(&test_ty);
        let default_label = self.new_label();
        let end_label = self.new_label();
        let arm_labels: Vec<_> = case.arms.iter().map(|_| self.new_label()).collect();

        let mut seq = InstrSeq::container();
        seq.extend(self.emit(&case.test, &frame.expr())?);
        seq.push(Instr::StoreLocal {
            slot: test_slot,
            ty: test_ty.clone(),
        });

        // Dispatch key.
        seq.push(Instr::LoadLocal {
            slot: test_slot,
            ty: test_ty.clone(),
        });
        match case.test_kind {
            CaseTest::Int => self.emit_long_key(&test_ty, &mut seq),
            CaseTest::Hash | CaseTest::HashIdentity => {
                if let TypeTag::Prim(p) = &test_ty {
                    seq.push(Instr::Box { prim: *p });
                }
                seq.push(Instr::Invoke {
                    kind: InvokeKind::Static,
                    owner: rt::UTIL.to_string(),
                    sig: MethodSig::new(
                        "hash",
                        vec![TypeTag::object()],
                        TypeTag::Prim(crate::ast::PrimType::Long),
                    ),
                });
            }
        }
        if case.shift > 0 {
            seq.push(Instr::PushInt(case.shift as i64));
            seq.push(Instr::Arith {
                op: crate::bytecode::ArithOp::Shr,
                ty: crate::ast::PrimType::Long,
            });
        }
        if case.mask > 0 {
            seq.push(Instr::PushInt(case.mask));
            seq.push(Instr::Arith {
                op: crate::bytecode::ArithOp::And,
                ty: crate::ast::PrimType::Long,
            });
        }

        match case.switch_kind {
            SwitchKind::Table => {
                let mut targets = Vec::new();
                for key in case.low..=case.high {
                    let target = case
                        .arms
                        .iter()
                        .position(|a| a.key == key)
                        .map(|i| arm_labels[i])
                        .unwrap_or(default_label);
                    targets.push(target);
                }
                seq.push(Instr::TableSwitch {
                    low: case.low,
                    targets,
                    default: default_label,
                });
            }
            SwitchKind::Sparse => {
                seq.push(Instr::LookupSwitch {
                    keys: case.arms.iter().map(|a| a.key).collect(),
                    targets: arm_labels.clone(),
                    default: default_label,
                });
            }
        }

        for (arm, label) in case.arms.iter().zip(&arm_labels) {
            seq.mark(*label);
            if !arm.unambiguous {
                self.emit_arm_guard(arm, case.test_kind, test_slot, &test_ty, default_label, &mut seq)?;
            }
            seq.extend(self.emit(&arm.body, frame)?);
            seq.jump(end_label);
        }

        seq.mark(default_label);
        seq.extend(self.emit(&case.default, frame)?);
        seq.mark(end_label);
        Ok(seq)
    }

    /// Convert the loaded test value to a primitive long dispatch key.
    fn emit_long_key(&mut self, test_ty: &TypeTag, seq: &mut InstrSeq) {
        use crate::ast::PrimType;
        match test_ty {
            TypeTag::Prim(PrimType::Long) => {}
            TypeTag::Prim(p) => seq.push(Instr::PrimCast {
                from: *p,
                to: PrimType::Long,
            }),
            _ => seq.push(Instr::Invoke {
                kind: InvokeKind::Static,
                owner: rt::RT.to_string(),
                sig: MethodSig::new(
                    "longCast",
                    vec![TypeTag::object()],
                    TypeTag::Prim(PrimType::Long),
                ),
            }),
        }
    }

    /// Collision re-check at the head of a case arm: branch to the default
    /// label when the stored test value does not actually match.
    fn emit_arm_guard(
        &mut self,
        arm: &crate::ast::CaseArm,
        test_kind: CaseTest,
        test_slot: u16,
        test_ty: &TypeTag,
        default_label: crate::bytecode::Label,
        seq: &mut InstrSeq,
    ) -> EmitResult<()> {
        use crate::ast::PrimType;
        match test_kind {
            CaseTest::Int => {
                let expected = match &arm.test {
                    Value::Int(n) => *n,
                    other => {
                        return self.unsupported(&format!(
                            "integer case arm with non-integer test {:?}",
                            super::classify(other)
                        ))
                    }
                };
                seq.push(Instr::LoadLocal {
                    slot: test_slot,
                    ty: test_ty.clone(),
                });
                self.emit_long_key(test_ty, seq);
                seq.push(Instr::PushInt(expected));
                seq.push(Instr::Cmp {
                    op: CmpOp::Eq,
                    ty: PrimType::Long,
                });
                seq.jump_if(Cond::False, default_label);
            }
            CaseTest::Hash => {
                seq.push(Instr::LoadLocal {
                    slot: test_slot,
                    ty: test_ty.clone(),
                });
                if let TypeTag::Prim(p) = test_ty {
                    seq.push(Instr::Box { prim: *p });
                }
                seq.extend(self.emit_const(&arm.test, &TypeTag::object())?);
                seq.push(Instr::Invoke {
                    kind: InvokeKind::Static,
                    owner: rt::UTIL.to_string(),
                    sig: MethodSig::new(
                        "equiv",
                        vec![TypeTag::object(), TypeTag::object()],
                        TypeTag::Prim(PrimType::Boolean),
                    ),
                });
                seq.jump_if(Cond::False, default_label);
            }
            CaseTest::HashIdentity => {
                seq.push(Instr::LoadLocal {
                    slot: test_slot,
                    ty: test_ty.clone(),
                });
                seq.extend(self.emit_const(&arm.test, &TypeTag::object())?);
                seq.jump_if(Cond::RefNe, default_label);
            }
        }
        Ok(())
    }

    /// A loop/try subtree promoted out of a primitive-returning context:
    /// assembled once as a private instance method taking the live locals
    /// as parameters, invoked virtually at the original site.
    pub(crate) fn emit_hoisted_call(
        &mut self,
        method: &str,
        params: &[ParamDecl],
        args: &[LocalUse],
        body: &Node,
        ret_ty: &TypeTag,
    ) -> EmitResult<InstrSeq> {
        let owner = self.class_name();
        let sig = MethodSig::new(
            method,
            params.iter().map(|p| p.ty.clone()).collect(),
            ret_ty.clone(),
        );

        let already = self
            .classes
            .last()
            .expect("no open class scope")
            .hoisted
            .iter()
            .any(|m| m.sig.name == method);
        if !already {
            let first_free = params
                .iter()
                .map(|p| p.slot + if p.ty.is_wide() { 2 } else { 1 })
                .max()
                .unwrap_or(1)
                .max(super::first_temp_slot(body));
            self.methods.push(MethodScope::new(first_free));
            let body_frame = Frame::expression(self.options.clear_tail_locals);
            let result = self.emit(body, &body_frame);
            self.methods.pop();
            let mut code = result?;
            code.push(Instr::Return { ty: ret_ty.clone() });
            self.class_scope()
                .hoisted
                .push(MethodDef::new(sig.clone(), false, code));
        }

        let mut seq = InstrSeq::new();
        seq.push(Instr::LoadThis);
        for arg in args {
            seq.push(Instr::LoadLocal {
                slot: arg.slot,
                ty: arg.ty.clone(),
            });
        }
        seq.push(Instr::Invoke {
            kind: InvokeKind::Virtual,
            owner,
            sig,
        });
        Ok(seq)
    }
}
