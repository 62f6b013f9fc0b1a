//! AST to instruction emission.
//!
//! The recursive core: maps every annotated AST node to an instruction
//! sequence, threading an emission context (the [`Frame`]) and accumulating
//! per-class state (constants, call sites, captures) in scope stacks.

mod class_assembly;
mod constants;
mod control_flow;
mod dispatch;

pub use constants::{classify, ConstantEntry, ConstantPool, LiteralKind};

use crate::ast::{Node, Op, TypeTag, VarKind, VarTable};
use crate::bytecode::{rt, Cond, Instr, InstrSeq, InvokeKind, Label, MethodDef, MethodSig};
use crate::error::{EmitError, EmitResult};
use crate::registry::ClassRegistry;

/// Emission options.
#[derive(Debug, Clone)]
pub struct EmitOptions {
    /// Null out local slots after their last read, when liveness analysis
    /// marked the use as clearable
    pub clear_tail_locals: bool,
}

impl Default for EmitOptions {
    fn default() -> Self {
        Self {
            clear_tail_locals: true,
        }
    }
}

/// Whether a node's value is consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    /// Result discarded; emission must leave the stack balanced
    Statement,
    /// Result left on the operand stack
    Expression,
}

/// One local participating in the nearest enclosing loop, in binding order.
#[derive(Debug, Clone)]
pub struct LoopLocal {
    pub slot: u16,
    pub ty: TypeTag,
}

/// The emission context threaded through every recursive call.
///
/// Read-mostly: each nested construct derives a frame for its subtree and
/// discards it on return.
#[derive(Debug, Clone)]
pub struct Frame {
    pub position: Position,
    /// Jump target of the nearest enclosing loop
    pub loop_label: Option<Label>,
    /// Binding slots of that loop, in declaration order
    pub loop_locals: Vec<LoopLocal>,
    /// Tail-local clearing enabled on this path
    pub allow_clear: bool,
}

impl Frame {
    pub fn expression(allow_clear: bool) -> Self {
        Frame {
            position: Position::Expression,
            loop_label: None,
            loop_locals: Vec::new(),
            allow_clear,
        }
    }

    /// Same frame in expression position.
    pub fn expr(&self) -> Frame {
        Frame {
            position: Position::Expression,
            ..self.clone()
        }
    }

    /// Same frame in statement position.
    pub fn stmt(&self) -> Frame {
        Frame {
            position: Position::Statement,
            ..self.clone()
        }
    }

    /// Derived frame for a loop body.
    pub fn with_loop(&self, label: Label, locals: Vec<LoopLocal>) -> Frame {
        Frame {
            loop_label: Some(label),
            loop_locals: locals,
            ..self.clone()
        }
    }
}

/// Per-class accumulating state while the class's method bodies are emitted.
pub(crate) struct ClassScope {
    pub class_name: String,
    pub constants: ConstantPool,
    /// Keyword per call site; fields `site__N` / `thunk__N`
    pub keyword_sites: Vec<(Option<String>, String)>,
    /// Protocol var per call site; field `cached_class__N`
    pub protocol_sites: Vec<String>,
    /// Private instance methods promoted out of expression bodies
    pub hoisted: Vec<MethodDef>,
}

impl ClassScope {
    pub(crate) fn new(class_name: &str) -> Self {
        ClassScope {
            class_name: class_name.to_string(),
            constants: ConstantPool::new(),
            keyword_sites: Vec::new(),
            protocol_sites: Vec::new(),
            hoisted: Vec::new(),
        }
    }
}

/// Per-method allocators: labels and local slots.
pub(crate) struct MethodScope {
    next_label: u32,
    next_local: u16,
}

impl MethodScope {
    pub(crate) fn new(first_local: u16) -> Self {
        MethodScope {
            next_label: 0,
            next_local: first_local,
        }
    }
}

/// The instruction emitter for one compilation unit.
pub struct Emitter<'a> {
    vars: &'a VarTable,
    pub(crate) registry: &'a mut ClassRegistry,
    pub(crate) options: EmitOptions,
    pub(crate) classes: Vec<ClassScope>,
    pub(crate) methods: Vec<MethodScope>,
}

impl<'a> Emitter<'a> {
    pub fn new(vars: &'a VarTable, registry: &'a mut ClassRegistry) -> Self {
        Self::with_options(vars, registry, EmitOptions::default())
    }

    pub fn with_options(
        vars: &'a VarTable,
        registry: &'a mut ClassRegistry,
        options: EmitOptions,
    ) -> Self {
        Emitter {
            vars,
            registry,
            options,
            classes: Vec::new(),
            methods: Vec::new(),
        }
    }

    /// Emit one top-level form. The synthetic unit class collects the
    /// form's constants and call sites; it is registered alongside any
    /// classes the form itself produces.
    pub fn emit_top_level(&mut self, node: &Node, unit_name: &str) -> EmitResult<InstrSeq> {
        self.classes.push(ClassScope::new(unit_name));
        self.methods.push(MethodScope::new(first_temp_slot(node)));
        let frame = Frame::expression(self.options.clear_tail_locals);
        let result = self.emit(node, &frame);
        self.methods.pop();
        let scope = self.classes.pop().expect("class scope underflow");
        let seq = result?;
        let class = self.finalize_scope(scope, rt::OBJECT, vec![], vec![], vec![])?;
        self.registry.register(class);
        Ok(seq)
    }

    // ── Core dispatch ───────────────────────────────────────────────────

    /// Emit one node. Dispatches on the operation tag, then applies the two
    /// universal post-processing rules: the statement-position discard and
    /// the declared-vs-observed type coercion.
    pub(crate) fn emit(&mut self, node: &Node, frame: &Frame) -> EmitResult<InstrSeq> {
        let mut seq = match &node.op {
            Op::Const(v) => self.emit_const(v, &node.ty)?,
            Op::Local(l) => self.emit_local(l, frame),
            Op::CapturedUse { name, ty } => self.emit_captured(name, ty),
            Op::VarDeref { ns, name } => self.emit_var_deref(ns, name)?,
            Op::TheVar { ns, name } => self.emit_the_var(ns, name)?,
            Op::If { test, then, els } => self.emit_if(test, then, els, frame)?,
            Op::Do { statements, ret } => self.emit_do(statements, ret, frame)?,
            Op::Let {
                bindings,
                body,
                loop_form,
            } => self.emit_let(bindings, body, *loop_form, frame)?,
            Op::Recur { args } => self.emit_recur(args, frame)?,
            Op::Try {
                body,
                catches,
                finally,
            } => self.emit_try(body, catches, finally.as_deref(), &node.ty, frame)?,
            Op::Case(case) => self.emit_case(case, frame)?,
            Op::Invoke { f, args } => self.emit_invoke(f, args, frame)?,
            Op::VarCall { ns, name, args } => self.emit_var_call(ns, name, args, frame)?,
            Op::KeywordInvoke { ns, name, target } => {
                self.emit_keyword_invoke(ns.as_deref(), name, target, frame)?
            }
            Op::ProtocolCall {
                var_ns,
                var_name,
                iface,
                method,
                target,
                args,
            } => self.emit_protocol_call(var_ns, var_name, iface, method, target, args, frame)?,
            Op::StaticCall { owner, sig, args } => {
                self.emit_static_call(owner, sig, args, frame)?
            }
            Op::InstanceCall {
                target,
                owner,
                iface,
                sig,
                args,
            } => self.emit_instance_call(target, owner, *iface, sig, args, frame)?,
            Op::ReflectiveCall {
                target,
                class,
                method,
                args,
            } => self.emit_reflective_call(target.as_deref(), class.as_deref(), method, args, frame)?,
            Op::New {
                class,
                params,
                args,
            } => self.emit_new(class, params, args, frame)?,
            Op::StaticField { owner, field } => self.emit_static_field(owner, field, &node.ty),
            Op::StaticFieldSet {
                owner,
                field,
                value,
            } => self.emit_static_field_set(owner, field, value, frame)?,
            Op::InstanceField {
                target,
                owner,
                field,
            } => self.emit_instance_field(target, owner, field, &node.ty, frame)?,
            Op::InstanceFieldSet {
                target,
                owner,
                field,
                value,
            } => self.emit_instance_field_set(target, owner, field, value, frame)?,
            Op::Throw { exception } => self.emit_throw(exception, frame)?,
            Op::Fn(f) => self.emit_fn(f, frame)?,
            Op::DefType(t) => self.emit_deftype(t)?,
            Op::Reify(r) => self.emit_reify(r, frame)?,
            Op::HoistedCall {
                method,
                params,
                args,
                body,
            } => self.emit_hoisted_call(method, params, args, body, &node.ty)?,
        };

        // Rule 1: discard a surplus value in statement position. Constant
        // sequences contribute nothing at all; containers balance their own
        // children; untyped sequences leave no slot to discard.
        if frame.position == Position::Statement {
            if seq.constant {
                return Ok(InstrSeq::constant());
            }
            if !seq.container && !seq.untyped && !node.ty.is_void() {
                seq.push(if node.ty.is_wide() { Instr::Pop2 } else { Instr::Pop });
            }
            return Ok(seq);
        }

        // Rule 2: reconcile declared and observed types. Literals honor
        // their annotated type directly and are exempt.
        if let Some(cast) = &node.cast {
            if *cast != node.ty && !node.is_literal() && !cast.is_void() {
                if seq.untyped || node.ty.is_void() {
                    // Control left normal flow (or nothing was produced);
                    // substitute a placeholder so position-dependent code
                    // that follows still sees a well-shaped stack.
                    push_placeholder(cast, &mut seq);
                } else {
                    self.emit_coercion(&node.ty, cast, &mut seq);
                }
            }
        }

        Ok(seq)
    }

    // ── Leaf emission rules ─────────────────────────────────────────────

    fn emit_local(&mut self, local: &crate::ast::LocalUse, frame: &Frame) -> InstrSeq {
        let mut seq = InstrSeq::new();
        seq.push(Instr::LoadLocal {
            slot: local.slot,
            ty: local.ty.clone(),
        });
        // Unreachable-after-use liveness clearing: reference slots only,
        // and only when the frame allows it on this path.
        if local.to_clear && frame.allow_clear && matches!(local.ty, TypeTag::Object(_)) {
            seq.push(Instr::PushNull);
            seq.push(Instr::StoreLocal {
                slot: local.slot,
                ty: TypeTag::object(),
            });
        }
        seq
    }

    fn emit_captured(&mut self, name: &str, ty: &TypeTag) -> InstrSeq {
        let owner = self.class_name();
        let mut seq = InstrSeq::new();
        seq.push(Instr::LoadThis);
        seq.push(Instr::GetField {
            owner,
            name: name.to_string(),
            ty: ty.clone(),
        });
        seq
    }

    fn emit_var_deref(&mut self, ns: &str, name: &str) -> EmitResult<InstrSeq> {
        // Compile-time constants are inlined; no var indirection remains.
        if let Some(info) = self.vars.lookup(ns, name) {
            if let VarKind::Constant { value } = &info.kind {
                let value = value.clone();
                return self.emit_const(&value, &TypeTag::object());
            }
        }
        let mut seq = self.emit_var_const(ns, name)?;
        seq.push(Instr::Invoke {
            kind: InvokeKind::Virtual,
            owner: rt::VAR.to_string(),
            sig: MethodSig::new("deref", vec![], TypeTag::object()),
        });
        Ok(seq)
    }

    fn emit_the_var(&mut self, ns: &str, name: &str) -> EmitResult<InstrSeq> {
        let mut seq = self.emit_var_const(ns, name)?;
        seq.constant = true;
        Ok(seq)
    }

    fn emit_throw(&mut self, exception: &Node, frame: &Frame) -> EmitResult<InstrSeq> {
        let mut seq = InstrSeq::new();
        seq.extend(self.emit(exception, &frame.expr())?);
        seq.push(Instr::CheckCast {
            class: rt::THROWABLE.to_string(),
        });
        seq.push(Instr::Throw);
        seq.untyped = true;
        Ok(seq)
    }

    // ── Coercion ────────────────────────────────────────────────────────

    /// Append a coercion from the observed type to the declared type.
    pub(crate) fn emit_coercion(&mut self, from: &TypeTag, to: &TypeTag, seq: &mut InstrSeq) {
        match (from, to) {
            (TypeTag::Object(_), TypeTag::Object(c)) => {
                if c != rt::OBJECT {
                    seq.push(Instr::CheckCast { class: c.clone() });
                }
            }
            (TypeTag::Prim(p), TypeTag::Object(c)) => {
                seq.push(Instr::Box { prim: *p });
                if c != rt::OBJECT && c != p.box_class() {
                    seq.push(Instr::CheckCast { class: c.clone() });
                }
            }
            (TypeTag::Object(_), TypeTag::Prim(p)) => {
                seq.push(Instr::Unbox { prim: *p });
            }
            (TypeTag::Prim(a), TypeTag::Prim(b)) => {
                if a != b {
                    match dispatch::prim_conversion(*a, *b) {
                        Some(instr) => seq.push(instr),
                        None => {
                            // No native conversion; round-trip through the
                            // boxed numeric tower.
                            seq.push(Instr::Box { prim: *a });
                            seq.push(Instr::Unbox { prim: *b });
                        }
                    }
                }
            }
            // A void-producing source has no value to convert; the caller
            // substitutes a placeholder instead of reaching here.
            (TypeTag::Void, _) => push_placeholder(to, seq),
            (_, TypeTag::Void) => {}
        }
    }

    // ── Scope and allocator access ──────────────────────────────────────

    pub(crate) fn class_scope(&mut self) -> &mut ClassScope {
        self.classes.last_mut().expect("no open class scope")
    }

    pub(crate) fn class_name(&self) -> String {
        self.classes
            .last()
            .expect("no open class scope")
            .class_name
            .clone()
    }

    pub(crate) fn vars(&self) -> &VarTable {
        self.vars
    }

    /// Allocate a fresh label in the method being assembled.
    pub(crate) fn new_label(&mut self) -> Label {
        let scope = self.methods.last_mut().expect("no open method scope");
        let label = Label(scope.next_label);
        scope.next_label += 1;
        label
    }

    /// Allocate a local slot; wide primitives take two.
    pub(crate) fn alloc_local(&mut self, ty: &TypeTag) -> u16 {
        let scope = self.methods.last_mut().expect("no open method scope");
        let slot = scope.next_local;
        scope.next_local += if ty.is_wide() { 2 } else { 1 };
        slot
    }

    /// Emit a node in expression position, boxed into object shape.
    pub(crate) fn emit_boxed(&mut self, node: &Node, frame: &Frame) -> EmitResult<InstrSeq> {
        let mut seq = self.emit(node, &frame.expr())?;
        let result_ty = node.cast.as_ref().unwrap_or(&node.ty);
        if let TypeTag::Prim(p) = result_ty {
            seq.push(Instr::Box { prim: *p });
        }
        Ok(seq)
    }

    /// Report an unmapped node/attribute combination — a front-end defect.
    pub(crate) fn unsupported<T>(&self, tag: &str) -> EmitResult<T> {
        Err(EmitError::UnsupportedNode {
            tag: tag.to_string(),
        })
    }
}

/// First local slot safely above every slot the subtree reads or writes.
/// Front-end-assigned slots and emitter temporaries share one numbering;
/// temporaries start here.
pub(crate) fn first_temp_slot(node: &Node) -> u16 {
    let mut max = 0u16;
    scan_slots(node, &mut max);
    max
}

fn bump(slot: u16, max: &mut u16) {
    // Reserve two slots; the user of the slot may be wide.
    *max = (*max).max(slot + 2);
}

fn scan_slots(node: &Node, max: &mut u16) {
    match &node.op {
        Op::Const(_)
        | Op::CapturedUse { .. }
        | Op::VarDeref { .. }
        | Op::TheVar { .. }
        | Op::StaticField { .. } => {}
        Op::Local(l) => bump(l.slot, max),
        Op::If { test, then, els } => {
            scan_slots(test, max);
            scan_slots(then, max);
            scan_slots(els, max);
        }
        Op::Do { statements, ret } => {
            for s in statements {
                scan_slots(s, max);
            }
            scan_slots(ret, max);
        }
        Op::Let { bindings, body, .. } => {
            for b in bindings {
                bump(b.slot, max);
                scan_slots(&b.init, max);
            }
            scan_slots(body, max);
        }
        Op::Recur { args } => {
            for a in args {
                scan_slots(a, max);
            }
        }
        Op::Try {
            body,
            catches,
            finally,
        } => {
            scan_slots(body, max);
            for c in catches {
                bump(c.slot, max);
                scan_slots(&c.body, max);
            }
            if let Some(f) = finally {
                scan_slots(f, max);
            }
        }
        Op::Case(case) => {
            scan_slots(&case.test, max);
            for arm in &case.arms {
                scan_slots(&arm.body, max);
            }
            scan_slots(&case.default, max);
        }
        Op::Invoke { f, args } => {
            scan_slots(f, max);
            for a in args {
                scan_slots(a, max);
            }
        }
        Op::VarCall { args, .. } | Op::New { args, .. } | Op::StaticCall { args, .. } => {
            for a in args {
                scan_slots(a, max);
            }
        }
        Op::KeywordInvoke { target, .. } => scan_slots(target, max),
        Op::ProtocolCall { target, args, .. } | Op::InstanceCall { target, args, .. } => {
            scan_slots(target, max);
            for a in args {
                scan_slots(a, max);
            }
        }
        Op::ReflectiveCall { target, args, .. } => {
            if let Some(t) = target {
                scan_slots(t, max);
            }
            for a in args {
                scan_slots(a, max);
            }
        }
        Op::StaticFieldSet { value, .. } => scan_slots(value, max),
        Op::InstanceField { target, .. } => scan_slots(target, max),
        Op::InstanceFieldSet { target, value, .. } => {
            scan_slots(target, max);
            scan_slots(value, max);
        }
        Op::Throw { exception } => scan_slots(exception, max),
        // Nested classes number their own methods; only the call-site loads
        // of captured slots touch this method.
        Op::Fn(f) => {
            for c in &f.closed_overs {
                if let Some(slot) = c.source_slot {
                    bump(slot, max);
                }
            }
        }
        Op::Reify(r) => {
            for c in &r.closed_overs {
                if let Some(slot) = c.source_slot {
                    bump(slot, max);
                }
            }
        }
        Op::DefType(_) => {}
        // The body runs in its own method; the call site loads the live
        // locals from this one.
        Op::HoistedCall { args, .. } => {
            for a in args {
                bump(a.slot, max);
            }
        }
    }
}

/// Push a null/zero placeholder shaped like `ty`.
pub(crate) fn push_placeholder(ty: &TypeTag, seq: &mut InstrSeq) {
    use crate::ast::PrimType;
    match ty {
        TypeTag::Void | TypeTag::Object(_) => seq.push(Instr::PushNull),
        TypeTag::Prim(PrimType::Boolean) => seq.push(Instr::PushBool(false)),
        TypeTag::Prim(PrimType::Long) => seq.push(Instr::PushInt(0)),
        TypeTag::Prim(PrimType::Double) => seq.push(Instr::PushFloat(0.0)),
        TypeTag::Prim(PrimType::Float) => {
            seq.push(Instr::PushFloat(0.0));
            seq.push(Instr::PrimCast {
                from: PrimType::Double,
                to: PrimType::Float,
            });
        }
        TypeTag::Prim(p) => {
            seq.push(Instr::PushInt(0));
            seq.push(Instr::PrimCast {
                from: PrimType::Long,
                to: *p,
            });
        }
    }
}

/// Branch taken when a general (non-predicate) test value is falsy.
///
/// The falsy set is exactly {nil, false}: a null check, then an identity
/// compare against the canonical false.
pub(crate) fn emit_falsy_branch(seq: &mut InstrSeq, null_label: Label, false_label: Label) {
    seq.push(Instr::Dup);
    seq.jump_if(Cond::Null, null_label);
    seq.push(Instr::GetStatic {
        owner: rt::BOOLEAN.to_string(),
        name: "FALSE".to_string(),
        ty: TypeTag::of(rt::BOOLEAN),
    });
    seq.jump_if(Cond::RefEq, false_label);
}
