//! The code generator: lowers the typed AST to IR and runs it.
//!
//! The jit context owns the IR module, the machine, the builder position
//! (current function and block), the innermost `break` target, the
//! local-name map and the mangling counter. Every `exec_*` returns an
//! [`Emitted`] record: the IR value denoting the node's result (none
//! for statements) and whether the emitted code unconditionally left
//! the current block, in which case the caller suppresses unreachable
//! fallthrough branches.
//!
//! Aggregate value semantics live here. Scalar values travel in IR
//! registers; tuple, array and data values are always represented by a
//! pointer to their layout, so a read of a structured identifier
//! yields the pointer. Construction, copy on argument passing,
//! assignment with reallocation, destruction on scope exit and the
//! user-provided lifecycle hooks (constructor, copy constructor,
//! finalizer, assignment operator) are synthesized by the recursive
//! `call_*` emitters below.
//!
//! On any error the partially emitted function is deleted and the
//! builder position cleared, after which a fresh top-level phrase may
//! be attempted against the same module.

use if_chain::if_chain;
use tracing::trace;

use crate::exec::{Machine, PassManager};
use crate::infer::{self, CtorCall, InferErr};
use crate::locals::LocTab;
use crate::print;
use crate::symbol::Symbol;
use crate::types::ast::{AstId, Tag};
use crate::types::ir::{
  BlockId, Callee, FloatCC, FnAttrs, FuncId, Inst, IntCC, IrType, Module, Value,
  ALLOC, ALLOC_ATOMIC, REALLOC,
};
use crate::types::ty::{TyId, TyKind};
use crate::{Cx, Error};

/// A lowering failure. Fatal to the current phrase; the jit resets
/// before it propagates.
#[derive(Debug)]
pub enum LowerErr {
  /// `break` with no enclosing loop.
  BreakOutsideLoop,
  /// No operator alternative for a data type at lowering time.
  MissingOp(String),
  /// The matched operator is not intrinsic and has no compiled body.
  NonIntrinsicOp(String),
  /// A function body did not return a value on every path.
  NoReturn,
  /// A type with no IR representation reached lowering.
  UnknownType(String),
  /// An identifier was never materialized in a previous phrase.
  Unmaterialized(String),
  /// A tuple assignment target form the generator does not support.
  BadTupleTarget,
  /// A named function or foreign disappeared from the module.
  MissingFunction(String),
  /// An unknown escape in a character literal.
  UnknownEscape(String),
  /// An AST tag the generator has no rule for (internal invariant).
  UnknownTag(Tag),
  /// Lazy inference of a function body failed at its first call site.
  Infer(Box<InferErr>),
}

impl std::fmt::Display for LowerErr {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      LowerErr::BreakOutsideLoop => write!(f, "attempt to break outside loop"),
      LowerErr::MissingOp(s) => write!(f, "unable to find operation {s} for data type"),
      LowerErr::NonIntrinsicOp(s) =>
        write!(f, "non-intrinsic operator {s} for data types is not implemented"),
      LowerErr::NoReturn => write!(f, "function does not return value at end of block"),
      LowerErr::UnknownType(s) => write!(f, "unknown type {s} in lowering"),
      LowerErr::Unmaterialized(s) => write!(f, "{s} has not been materialized"),
      LowerErr::BadTupleTarget => write!(f, "unsupported element in tuple assignment"),
      LowerErr::MissingFunction(s) => write!(f, "function {s} not found in module"),
      LowerErr::UnknownEscape(s) => write!(f, "unknown escape character in {s:?}"),
      LowerErr::UnknownTag(t) => write!(f, "unknown AST tag {t:?} in lowering"),
      LowerErr::Infer(e) => write!(f, "{e}"),
    }
  }
}

impl std::error::Error for LowerErr {}

impl From<InferErr> for LowerErr {
  fn from(e: InferErr) -> Self { LowerErr::Infer(Box::new(e)) }
}

/// The result of lowering one AST node.
#[derive(Clone, Debug)]
pub struct Emitted {
  /// The emitted code unconditionally left the current block.
  pub closed: bool,
  /// The IR value of the node, if it has one.
  pub val: Option<Value>,
}

impl Emitted {
  fn open(val: Option<Value>) -> Self { Emitted { closed: false, val } }
  fn closed() -> Self { Emitted { closed: true, val: None } }
}

const W0: Value = Value::Word(0);
const W1: Value = Value::Word(1);

/// The JIT context: module, machine, builder position and the state
/// threaded across one compiler lifetime.
pub(crate) struct Jit {
  pub(crate) module: Module,
  pub(crate) machine: Machine,
  function: Option<FuncId>,
  block: Option<BlockId>,
  breakto: Option<BlockId>,
  locals: LocTab,
  pass: PassManager,
  serial: u32,
  optimize: bool,
}

impl Jit {
  pub(crate) fn new(optimize: bool) -> Self {
    Jit {
      module: Module::new("rubidium"),
      machine: Machine::new(),
      function: None,
      block: None,
      breakto: None,
      locals: LocTab::new(),
      pass: PassManager::new(),
      serial: 0,
      optimize,
    }
  }

  /// Mangle a source name into a backend name, unique for the compiler
  /// lifetime.
  pub(crate) fn serialize(&mut self, name: &str) -> String {
    self.serial += 1;
    format!("{}_{}", name, self.serial)
  }

  /// Delete the partially emitted function and clear the builder, so a
  /// fresh phrase can be attempted with the module still alive.
  pub(crate) fn reset(&mut self) {
    if let Some(f) = self.function.take() {
      self.module.delete_function(f);
    }
    self.block = None;
    self.breakto = None;
  }

  fn emit(&mut self, inst: Inst) -> Value {
    let f = self.function.expect("no function under construction");
    let b = self.block.expect("builder not positioned");
    Value::Inst(self.module.func_mut(f).push_inst(b, inst))
  }

  fn append_block(&mut self, name: &str) -> BlockId {
    let f = self.function.expect("no function under construction");
    self.module.func_mut(f).append_block(name)
  }

  fn position_at_end(&mut self, b: BlockId) { self.block = Some(b) }

  fn delete_block(&mut self, b: BlockId) {
    let f = self.function.expect("no function under construction");
    self.module.func_mut(f).delete_block(b);
  }

  fn gep2(&mut self, base_ty: IrType, base: Value, i: usize) -> Value {
    self.emit(Inst::Gep { base_ty, base, idx: vec![W0, Value::Word(i as i64)] })
  }

  /// Alloca in a fresh block spliced in front of the entry block, so
  /// locals dominate every use regardless of where they are declared.
  fn add_local(&mut self, ty: IrType, name: &str) -> Value {
    let decl_name = self.serialize("decl");
    let f = self.function.expect("no function under construction");
    let func = self.module.func_mut(f);
    let entry = func.entry();
    let decl = func.insert_block_before(entry, &decl_name);
    let val = Value::Inst(func.push_inst(decl, Inst::Alloca(ty)));
    func.push_inst(decl, Inst::Br(entry));
    self.locals.insert(name, val.clone());
    val
  }

  fn gc_malloc(&mut self, ty: &IrType, atomic: bool) -> Value {
    let name = if atomic { ALLOC_ATOMIC } else { ALLOC };
    let callee = self.module.named_callee(name).expect("allocator declared");
    let raw = self.emit(Inst::Call(callee, vec![Value::SizeOf(ty.clone())]));
    self.emit(Inst::PtrCast(raw, ty.clone().ptr()))
  }

  fn gc_array_malloc(&mut self, elem: &IrType, num: Value, atomic: bool) -> Value {
    let name = if atomic { ALLOC_ATOMIC } else { ALLOC };
    let callee = self.module.named_callee(name).expect("allocator declared");
    let size = self.emit(Inst::Mul(num, Value::SizeOf(elem.clone())));
    let raw = self.emit(Inst::Call(callee, vec![size]));
    self.emit(Inst::PtrCast(raw, elem.clone().ptr()))
  }

  fn gc_array_realloc(&mut self, elem: &IrType, arr: Value, num: Value) -> Value {
    let callee = self.module.named_callee(REALLOC).expect("reallocator declared");
    let size = self.emit(Inst::Mul(num, Value::SizeOf(elem.clone())));
    let raw = self.emit(Inst::Call(callee, vec![arr, size]));
    self.emit(Inst::PtrCast(raw, elem.clone().ptr()))
  }

  /// Lower a source type to its IR representation. Scalars map to
  /// their natural IR types, tuples and data to packed records, arrays
  /// to `{elem*, word}`. A data type is declared as a named opaque
  /// struct at its `data` statement; its body is installed here the
  /// first time a value of the type is lowered, which is what allows
  /// cycles through `Ptr`/`Ref` fields.
  pub(crate) fn lower_ty(&mut self, cx: &mut Cx<'_>, t: TyId) -> Result<IrType, LowerErr> {
    Ok(match cx.tys.kind(t) {
      TyKind::Nil => IrType::Void,
      TyKind::Bool => IrType::I1,
      TyKind::Int | TyKind::UInt => IrType::Word,
      TyKind::Double => IrType::F64,
      TyKind::Char => IrType::I8,
      TyKind::Str => IrType::I8.ptr(),
      TyKind::Tuple => {
        let args = cx.tys.get(t).args.to_vec();
        let mut fields = Vec::with_capacity(args.len());
        for a in args {
          fields.push(self.lower_ty(cx, a)?);
        }
        IrType::Rec(fields.into())
      }
      TyKind::Array => {
        let elem_ty = cx.tys.elem(t);
        let elem = self.lower_ty(cx, elem_ty)?;
        IrType::Rec(vec![elem.ptr(), IrType::Word].into())
      }
      TyKind::Data => {
        let ir_name = match cx.tys.get(t).ir_name.clone() {
          Some(n) => n,
          None => {
            let sym = cx.tys.get(t).sym.expect("data type has a name");
            let n = self.serialize(cx.syms.name(sym));
            self.module.create_struct(&n);
            cx.tys.get_mut(t).ir_name = Some(n.clone());
            n
          }
        };
        let s = self.module.struct_by_name(&ir_name).expect("data struct declared");
        if self.module.struct_def(s).body.is_none() {
          // Mark in progress before recursing so cyclic fields through
          // pointers terminate.
          self.module.set_struct_body(s, vec![]);
          let args = cx.tys.get(t).args.to_vec();
          let mut fields = Vec::with_capacity(args.len());
          for a in args {
            fields.push(self.lower_ty(cx, a)?);
          }
          self.module.set_struct_body(s, fields);
        }
        IrType::Named(s)
      }
      TyKind::Ptr | TyKind::Ref => {
        let pointee = cx.tys.ret(t);
        self.lower_ty(cx, pointee)?.ptr()
      }
      TyKind::Fn | TyKind::Generic | TyKind::Ctor | TyKind::Zz => {
        return Err(LowerErr::UnknownType(cx.tys.print(cx.syms, t)))
      }
    })
  }

  /// Like [`lower_ty`](Self::lower_ty), but with an extra level of
  /// indirection for structured types (the representation of a
  /// structured value in transit is a pointer to it).
  fn lower_generic_ty(&mut self, cx: &mut Cx<'_>, t: TyId) -> Result<IrType, LowerErr> {
    let ir = self.lower_ty(cx, t)?;
    Ok(if cx.tys.is_structured(t) { ir.ptr() } else { ir })
  }

  /// Materialize storage for a name: a module global for global
  /// bindings, a local alloca otherwise. Binds the symbol if inference
  /// has not already done so.
  fn create_var(&mut self, cx: &mut Cx<'_>, sym: Symbol, ir_name: String, t: TyId)
    -> Result<Value, LowerErr> {
    let bind = match cx.envs.lookup(sym) {
      None => cx.envs.bind(sym, t, Some(ir_name.clone())),
      Some(b) => {
        cx.envs.binding_mut(b).ir_name = Some(ir_name.clone());
        b
      }
    };
    let ty = self.lower_ty(cx, t)?;
    if cx.envs.is_global(bind) {
      Ok(Value::Global(self.module.add_global(&ir_name, ty)))
    } else {
      Ok(self.add_local(ty, &ir_name))
    }
  }

  fn place_for(&mut self, name: &str, global: bool) -> Result<Value, LowerErr> {
    if global {
      self.module.global_by_name(name).map(Value::Global)
        .ok_or_else(|| LowerErr::Unmaterialized(name.to_owned()))
    } else {
      self.locals.lookup(name).cloned()
        .ok_or_else(|| LowerErr::Unmaterialized(name.to_owned()))
    }
  }

  fn named_callee(&self, name: &str) -> Result<Callee, LowerErr> {
    self.module.named_callee(name)
      .ok_or_else(|| LowerErr::MissingFunction(name.to_owned()))
  }

  /// Emit `i = 0; while i < len { body(i); i = i + 1 }`, the loop shape
  /// shared by the aggregate element walkers.
  fn emit_index_loop<F>(&mut self, cx: &mut Cx<'_>, len: Value, body: F)
    -> Result<(), LowerErr>
  where F: FnOnce(&mut Self, &mut Cx<'_>, Value) -> Result<(), LowerErr> {
    let iname = self.serialize("i");
    let iloc = self.add_local(IrType::Word, &iname);
    self.emit(Inst::Store(W0, iloc.clone()));
    let w = self.append_block("while");
    let b = self.append_block("whilebody");
    let e = self.append_block("whileend");
    self.emit(Inst::Br(w));
    self.position_at_end(w);
    let ival = self.emit(Inst::Load(IrType::Word, iloc.clone()));
    let cmp = self.emit(Inst::ICmp(IntCC::Slt, ival.clone(), len));
    self.emit(Inst::CondBr(cmp, b, e));
    self.position_at_end(b);
    body(self, cx, ival.clone())?;
    let next = self.emit(Inst::Add(ival, W1));
    self.emit(Inst::Store(next, iloc));
    self.emit(Inst::Br(w));
    self.position_at_end(e);
    Ok(())
  }
}

// Lifecycle-hook lookups. The hooks of a data type live in the `Ctor`
// generic bound under the type's name (and the reserved `finalizer` and
// `=` generics), identified by their prototypes.

fn ctor_generic(cx: &Cx<'_>, t: TyId) -> Option<TyId> {
  let sym = cx.tys.get(t).sym?;
  let bind = cx.envs.lookup(sym)?;
  let ty = cx.envs.binding(bind).ty;
  (cx.tys.kind(ty) == TyKind::Ctor).then_some(ty)
}

fn find_constructor(cx: &Cx<'_>, t: TyId, extras: &[TyId]) -> Option<TyId> {
  let ctor = ctor_generic(cx, t)?;
  infer::find_hook(cx.tys, ctor, t, extras)
}

fn find_copy_cons(cx: &Cx<'_>, t: TyId) -> Option<TyId> {
  find_constructor(cx, t, &[t])
}

fn hook_in_generic(cx: &mut Cx<'_>, name: &str, t: TyId, extras: &[TyId]) -> Option<TyId> {
  let sym = cx.syms.intern(name);
  let bind = cx.envs.lookup(sym)?;
  let r#gen = cx.envs.binding(bind).ty;
  if cx.tys.kind(r#gen) != TyKind::Generic { return None }
  infer::find_hook(cx.tys, r#gen, t, extras)
}

fn find_finalizer(cx: &mut Cx<'_>, t: TyId) -> Option<TyId> {
  hook_in_generic(cx, "finalizer", t, &[])
}

fn find_assignment(cx: &mut Cx<'_>, t: TyId) -> Option<TyId> {
  hook_in_generic(cx, "=", t, &[t])
}

fn requires_destructor(cx: &mut Cx<'_>, t: TyId) -> bool {
  match cx.tys.kind(t) {
    TyKind::Data => {
      if find_finalizer(cx, t).is_some() { return true }
      let args = cx.tys.get(t).args.to_vec();
      args.into_iter().any(|a| requires_destructor(cx, a))
    }
    TyKind::Array => {
      let elem = cx.tys.elem(t);
      requires_destructor(cx, elem)
    }
    TyKind::Tuple => {
      let args = cx.tys.get(t).args.to_vec();
      args.into_iter().any(|a| requires_destructor(cx, a))
    }
    _ => false,
  }
}

fn requires_assign(cx: &mut Cx<'_>, t: TyId) -> bool {
  match cx.tys.kind(t) {
    TyKind::Data => {
      if find_assignment(cx, t).is_some() { return true }
      let args = cx.tys.get(t).args.to_vec();
      args.into_iter().any(|a| requires_assign(cx, a))
    }
    TyKind::Array => true,
    TyKind::Tuple => {
      let args = cx.tys.get(t).args.to_vec();
      args.into_iter().any(|a| requires_assign(cx, a))
    }
    _ => false,
  }
}

fn requires_copy_construct(cx: &mut Cx<'_>, t: TyId) -> bool {
  match cx.tys.kind(t) {
    TyKind::Data => {
      if find_copy_cons(cx, t).is_some() { return true }
      let args = cx.tys.get(t).args.to_vec();
      args.into_iter().any(|a| requires_copy_construct(cx, a))
    }
    TyKind::Array => true,
    TyKind::Tuple => {
      let args = cx.tys.get(t).args.to_vec();
      args.into_iter().any(|a| requires_copy_construct(cx, a))
    }
    _ => false,
  }
}

fn requires_constructor(cx: &mut Cx<'_>, t: TyId) -> bool {
  match cx.tys.kind(t) {
    TyKind::Data => {
      if find_constructor(cx, t, &[]).is_some() { return true }
      let args = cx.tys.get(t).args.to_vec();
      args.into_iter().any(|a| requires_constructor(cx, a))
    }
    TyKind::Array => {
      let elem = cx.tys.elem(t);
      requires_constructor(cx, elem)
    }
    TyKind::Tuple => {
      let args = cx.tys.get(t).args.to_vec();
      args.into_iter().any(|a| requires_constructor(cx, a))
    }
    _ => false,
  }
}

impl Jit {
  /// Run constructors over a freshly allocated value: the explicit hook
  /// for a data type that has one, otherwise a structural walk over the
  /// components that need construction.
  fn call_constructors(&mut self, cx: &mut Cx<'_>, locn: Value, t: TyId)
    -> Result<(), LowerErr> {
    match cx.tys.kind(t) {
      TyKind::Data => {
        if let Some(con) = find_constructor(cx, t, &[]) {
          trace!("data constructor");
          let name = cx.tys.get(con).ir_name.clone().expect("hook has a backend name");
          let callee = self.named_callee(&name)?;
          self.emit(Inst::Call(callee, vec![locn]));
        } else {
          trace!("data constructor per slot");
          let rec = self.lower_ty(cx, t)?;
          let args = cx.tys.get(t).args.to_vec();
          for (i, arg) in args.into_iter().enumerate() {
            if requires_constructor(cx, arg) {
              let slot = self.gep2(rec.clone(), locn.clone(), i);
              self.call_constructors(cx, slot, arg)?;
            }
          }
        }
      }
      TyKind::Tuple => {
        trace!("tuple constructor");
        let rec = self.lower_ty(cx, t)?;
        let args = cx.tys.get(t).args.to_vec();
        for (i, arg) in args.into_iter().enumerate() {
          if requires_constructor(cx, arg) {
            let slot = self.gep2(rec.clone(), locn.clone(), i);
            self.call_constructors(cx, slot, arg)?;
          }
        }
      }
      TyKind::Array => {
        let elem = cx.tys.elem(t);
        let rec = self.lower_ty(cx, t)?;
        let elem_ir = self.lower_ty(cx, elem)?;
        let lenp = self.gep2(rec.clone(), locn.clone(), 1);
        let len = self.emit(Inst::Load(IrType::Word, lenp));
        let arrp = self.gep2(rec, locn, 0);
        let arr = self.emit(Inst::Load(elem_ir.clone().ptr(), arrp));
        if requires_constructor(cx, elem) {
          trace!("array constructor");
          self.emit_index_loop(cx, len, |jit, cx, i| {
            let slot = jit.emit(Inst::Gep {
              base_ty: elem_ir.clone(), base: arr.clone(), idx: vec![i],
            });
            jit.call_constructors(cx, slot, elem)
          })?;
        }
      }
      _ => {}
    }
    Ok(())
  }

  /// Destroy a value going out of scope, unless it is the value being
  /// returned: the explicit finalizer for a data type that has one,
  /// otherwise a structural walk.
  fn call_destructors(&mut self, cx: &mut Cx<'_>, var: Value, t: TyId,
    retval: Option<&Value>) -> Result<(), LowerErr> {
    if retval == Some(&var) { return Ok(()) }
    match cx.tys.kind(t) {
      TyKind::Data => {
        if let Some(fin) = find_finalizer(cx, t) {
          trace!("data finalizer");
          let name = cx.tys.get(fin).ir_name.clone().expect("hook has a backend name");
          let callee = self.named_callee(&name)?;
          self.emit(Inst::Call(callee, vec![var]));
        } else {
          trace!("data destructor per slot");
          let rec = self.lower_ty(cx, t)?;
          let args = cx.tys.get(t).args.to_vec();
          for (i, arg) in args.into_iter().enumerate() {
            if requires_destructor(cx, arg) {
              let slot = self.gep2(rec.clone(), var.clone(), i);
              self.call_destructors(cx, slot, arg, None)?;
            }
          }
        }
      }
      TyKind::Array => {
        let elem = cx.tys.elem(t);
        let rec = self.lower_ty(cx, t)?;
        let elem_ir = self.lower_ty(cx, elem)?;
        let arrp = self.gep2(rec.clone(), var.clone(), 0);
        let arr = self.emit(Inst::Load(elem_ir.clone().ptr(), arrp));
        let lenp = self.gep2(rec, var, 1);
        let len = self.emit(Inst::Load(IrType::Word, lenp));
        if requires_destructor(cx, elem) {
          trace!("array destructor");
          self.emit_index_loop(cx, len, |jit, cx, i| {
            let slot = jit.emit(Inst::Gep {
              base_ty: elem_ir.clone(), base: arr.clone(), idx: vec![i],
            });
            jit.call_destructors(cx, slot, elem, None)
          })?;
        }
      }
      TyKind::Tuple => {
        trace!("tuple destructor");
        let rec = self.lower_ty(cx, t)?;
        let args = cx.tys.get(t).args.to_vec();
        for (i, arg) in args.into_iter().enumerate() {
          if requires_destructor(cx, arg) {
            let slot = self.gep2(rec.clone(), var.clone(), i);
            self.call_destructors(cx, slot, arg, None)?;
          }
        }
      }
      _ => {}
    }
    Ok(())
  }

  /// Destroy every materialized structured binding of the current
  /// scope, in reverse declaration order.
  fn exec_destructors(&mut self, cx: &mut Cx<'_>, retval: Option<&Value>)
    -> Result<(), LowerErr> {
    let scope = cx.envs.current;
    let global = scope == cx.envs.global();
    let binds: Vec<(TyId, String)> = cx.envs.bindings(scope).iter().rev()
      .filter(|b| {
        matches!(cx.tys.kind(b.ty), TyKind::Data | TyKind::Array | TyKind::Tuple)
      })
      .filter_map(|b| b.ir_name.clone().map(|n| (b.ty, n)))
      .collect();
    for (t, name) in binds {
      let var = self.place_for(&name, global)?;
      self.call_destructors(cx, var, t, retval)?;
    }
    Ok(())
  }

  /// Assign `val` into `var`: the explicit assignment operator if the
  /// type has one, per-slot recursion for records, length-adjusting
  /// element copy for arrays, a store for scalars.
  fn call_assign(&mut self, cx: &mut Cx<'_>, var: Value, val: Value, t: TyId)
    -> Result<(), LowerErr> {
    if requires_assign(cx, t) {
      if let Some(ass) = find_assignment(cx, t) {
        trace!("data assignment operator");
        let name = cx.tys.get(ass).ir_name.clone().expect("hook has a backend name");
        let callee = self.named_callee(&name)?;
        self.emit(Inst::Call(callee, vec![var, val]));
      } else if matches!(cx.tys.kind(t), TyKind::Data | TyKind::Tuple) {
        trace!("data/tuple assignment per slot");
        let rec = self.lower_ty(cx, t)?;
        let args = cx.tys.get(t).args.to_vec();
        for (i, arg) in args.into_iter().enumerate() {
          let lslot = self.gep2(rec.clone(), var.clone(), i);
          let rslot = self.gep2(rec.clone(), val.clone(), i);
          self.call_assign(cx, lslot, rslot, arg)?;
        }
      } else {
        trace!("array assignment");
        let elem = cx.tys.elem(t);
        let rec = self.lower_ty(cx, t)?;
        let elem_ir = self.lower_ty(cx, elem)?;
        let rlenp = self.gep2(rec.clone(), val.clone(), 1);
        let rlen = self.emit(Inst::Load(IrType::Word, rlenp));
        let rarrp = self.gep2(rec.clone(), val, 0);
        let rarr = self.emit(Inst::Load(elem_ir.clone().ptr(), rarrp));
        let llenp = self.gep2(rec.clone(), var.clone(), 1);
        let llen = self.emit(Inst::Load(IrType::Word, llenp.clone()));
        let larrp = self.gep2(rec, var, 0);

        // grow the backing storage when the source is longer
        let b1 = self.append_block("ifbody");
        let e1 = self.append_block("ifend");
        let cmp = self.emit(Inst::ICmp(IntCC::Sgt, rlen.clone(), llen));
        self.emit(Inst::CondBr(cmp, b1, e1));
        self.position_at_end(b1);
        let larr = self.emit(Inst::Load(elem_ir.clone().ptr(), larrp.clone()));
        let grown = self.gc_array_realloc(&elem_ir, larr, rlen.clone());
        self.emit(Inst::Store(grown, larrp.clone()));
        self.emit(Inst::Br(e1));
        self.position_at_end(e1);

        // the destination takes the source length either way
        self.emit(Inst::Store(rlen.clone(), llenp));

        self.emit_index_loop(cx, rlen, |jit, cx, i| {
          let larr = jit.emit(Inst::Load(elem_ir.clone().ptr(), larrp.clone()));
          let rslot = jit.emit(Inst::Gep {
            base_ty: elem_ir.clone(), base: rarr.clone(), idx: vec![i.clone()],
          });
          let lslot = jit.emit(Inst::Gep {
            base_ty: elem_ir.clone(), base: larr, idx: vec![i],
          });
          jit.call_assign(cx, lslot, rslot, elem)
        })?;
      }
    } else {
      let ir = self.lower_ty(cx, t)?;
      let v = self.emit(Inst::Load(ir, val));
      self.emit(Inst::Store(v, var));
    }
    Ok(())
  }

  /// Copy-construct `val` into the fresh storage `var`. Symmetric to
  /// [`call_assign`](Self::call_assign) but uses the copy-constructor
  /// hook and always allocates fresh array backing.
  fn copy_construct(&mut self, cx: &mut Cx<'_>, var: Value, val: Value, t: TyId)
    -> Result<(), LowerErr> {
    if requires_copy_construct(cx, t) {
      if cx.tys.kind(t) == TyKind::Data {
        if let Some(cc) = find_copy_cons(cx, t) {
          trace!("data copy constructor");
          let name = cx.tys.get(cc).ir_name.clone().expect("hook has a backend name");
          let callee = self.named_callee(&name)?;
          self.emit(Inst::Call(callee, vec![var, val]));
          return Ok(())
        }
      }
      if matches!(cx.tys.kind(t), TyKind::Data | TyKind::Tuple) {
        trace!("data/tuple copy construct per slot");
        let rec = self.lower_ty(cx, t)?;
        let args = cx.tys.get(t).args.to_vec();
        for (i, arg) in args.into_iter().enumerate() {
          let lslot = self.gep2(rec.clone(), var.clone(), i);
          let rslot = self.gep2(rec.clone(), val.clone(), i);
          self.copy_construct(cx, lslot, rslot, arg)?;
        }
      } else {
        trace!("array copy constructor");
        let elem = cx.tys.elem(t);
        let rec = self.lower_ty(cx, t)?;
        let elem_ir = self.lower_ty(cx, elem)?;
        let rlenp = self.gep2(rec.clone(), val.clone(), 1);
        let rlen = self.emit(Inst::Load(IrType::Word, rlenp));
        let rarrp = self.gep2(rec.clone(), val, 0);
        let rarr = self.emit(Inst::Load(elem_ir.clone().ptr(), rarrp));
        let llenp = self.gep2(rec.clone(), var.clone(), 1);
        let larrp = self.gep2(rec, var, 0);
        let atomic = cx.tys.is_atomic(elem);
        let larr = self.gc_array_malloc(&elem_ir, rlen.clone(), atomic);
        self.emit(Inst::Store(larr.clone(), larrp));
        self.emit(Inst::Store(rlen.clone(), llenp));
        self.emit_index_loop(cx, rlen, |jit, cx, i| {
          let rslot = jit.emit(Inst::Gep {
            base_ty: elem_ir.clone(), base: rarr.clone(), idx: vec![i.clone()],
          });
          let lslot = jit.emit(Inst::Gep {
            base_ty: elem_ir.clone(), base: larr.clone(), idx: vec![i],
          });
          jit.copy_construct(cx, lslot, rslot, elem)
        })?;
      }
    } else {
      let ir = self.lower_ty(cx, t)?;
      let v = self.emit(Inst::Load(ir, val));
      self.emit(Inst::Store(v, var));
    }
    Ok(())
  }
}

fn unescape_char(spelling: &str) -> Result<u8, LowerErr> {
  let mut chars = spelling.chars();
  match chars.next() {
    Some('\\') => match chars.next() {
      Some('\'') => Ok(b'\''),
      Some('"') => Ok(b'"'),
      Some('\\') => Ok(b'\\'),
      Some('0') => Ok(0),
      Some('n') => Ok(b'\n'),
      Some('r') => Ok(b'\r'),
      Some('t') => Ok(b'\t'),
      _ => Err(LowerErr::UnknownEscape(spelling.to_owned())),
    },
    Some(c) => Ok(c as u8),
    None => Ok(0),
  }
}

const ARITH_OPS: [&str; 5] = ["+", "-", "*", "/", "%"];

impl Jit {
  fn exec_zz(&mut self, cx: &mut Cx<'_>, a: AstId) -> Result<Emitted, LowerErr> {
    let digits = cx.syms.name(cx.asts.sym(a)).to_owned();
    let big = num::BigInt::parse_bytes(digits.as_bytes(), 10).unwrap_or_default();
    let handle = self.machine.zz_new(big);
    let t_zz = cx.tys.t_zz;
    let ir = self.lower_ty(cx, t_zz)?;
    let name = self.serialize("__rb_zz");
    let g = self.module.add_global_init(&name, ir, vec![handle].into_boxed_slice());
    Ok(Emitted::open(Some(Value::Global(g))))
  }

  fn exec_int(&mut self, cx: &Cx<'_>, a: AstId) -> Emitted {
    let n: i64 = cx.syms.name(cx.asts.sym(a)).parse().unwrap_or_default();
    Emitted::open(Some(Value::Word(n)))
  }

  fn exec_uint(&mut self, cx: &Cx<'_>, a: AstId) -> Emitted {
    let n: u64 = cx.syms.name(cx.asts.sym(a)).parse().unwrap_or_default();
    Emitted::open(Some(Value::Word(n as i64)))
  }

  fn exec_double(&mut self, cx: &Cx<'_>, a: AstId) -> Emitted {
    let n: f64 = cx.syms.name(cx.asts.sym(a)).parse().unwrap_or_default();
    Emitted::open(Some(Value::Real(n)))
  }

  fn exec_char(&mut self, cx: &Cx<'_>, a: AstId) -> Result<Emitted, LowerErr> {
    let c = unescape_char(cx.syms.name(cx.asts.sym(a)))?;
    Ok(Emitted::open(Some(Value::Byte(c))))
  }

  fn exec_string(&mut self, cx: &Cx<'_>, a: AstId) -> Emitted {
    let i = self.module.add_string(cx.syms.name(cx.asts.sym(a)));
    Emitted::open(Some(Value::Str(i)))
  }

  /// Binary operators over data types dispatch to the intrinsic
  /// overload; arithmetic results need a constructed temporary, while
  /// relations return their value directly.
  fn exec_binop_data(&mut self, cx: &mut Cx<'_>, a: AstId, cleanup: bool)
    -> Result<Emitted, LowerErr> {
    let lhs = cx.asts[a].child.expect("binop has operands");
    let rhs = cx.asts[lhs].next.expect("binop has two operands");
    let r1 = self.exec_ast(cx, lhs)?;
    let r2 = self.exec_ast(cx, rhs)?;
    let v1 = r1.val.expect("operand yields a value");
    let v2 = r2.val.expect("operand yields a value");

    let sym = cx.asts.sym(a);
    let op_name = cx.syms.name(sym).to_owned();
    let bind = cx.envs.lookup(sym)
      .ok_or_else(|| LowerErr::MissingOp(op_name.clone()))?;
    let r#gen = cx.envs.binding(bind).ty;
    let argtys = [cx.asts.ty(lhs), cx.asts.ty(rhs)];
    let op = infer::find_prototype(cx.tys, r#gen, &argtys)
      .ok_or_else(|| LowerErr::MissingOp(op_name.clone()))?;
    if !cx.tys.get(op).intrinsic {
      return Err(LowerErr::NonIntrinsicOp(op_name))
    }
    let ir_name = cx.tys.get(op).ir_name.clone().expect("intrinsic has a backend name");
    let callee = self.named_callee(&ir_name)?;

    if ARITH_OPS.contains(&op_name.as_str()) {
      let ret_t = cx.tys.ret(op);
      let temp_name = self.serialize("__rb_temp");
      let val = if cleanup {
        let temp_sym = cx.syms.intern(&temp_name);
        self.create_var(cx, temp_sym, temp_name, ret_t)?
      } else {
        let ir = self.lower_ty(cx, ret_t)?;
        self.add_local(ir, &temp_name)
      };
      if requires_constructor(cx, ret_t) {
        self.call_constructors(cx, val.clone(), ret_t)?;
      }
      self.emit(Inst::Call(callee, vec![val.clone(), v1, v2]));
      Ok(Emitted::open(Some(val)))
    } else {
      let val = self.emit(Inst::Call(callee, vec![v1, v2]));
      Ok(Emitted::open(Some(val)))
    }
  }

  fn exec_binop(&mut self, cx: &mut Cx<'_>, a: AstId, cleanup: bool)
    -> Result<Emitted, LowerErr> {
    let lhs = cx.asts[a].child.expect("binop has operands");
    let rhs = cx.asts[lhs].next.expect("binop has two operands");
    if cx.tys.kind(cx.asts.ty(lhs)) == TyKind::Data
      || cx.tys.kind(cx.asts.ty(rhs)) == TyKind::Data {
      return self.exec_binop_data(cx, a, cleanup)
    }

    let r1 = self.exec_ast(cx, lhs)?;
    let r2 = self.exec_ast(cx, rhs)?;
    let v1 = r1.val.expect("operand yields a value");
    let v2 = r2.val.expect("operand yields a value");
    let dbl = cx.asts.ty(lhs) == cx.tys.t_double;
    let op = cx.syms.name(cx.asts.sym(a)).to_owned();
    let val = match op.as_str() {
      "+" => self.emit(if dbl { Inst::FAdd(v1, v2) } else { Inst::Add(v1, v2) }),
      "-" => self.emit(if dbl { Inst::FSub(v1, v2) } else { Inst::Sub(v1, v2) }),
      "*" => self.emit(if dbl { Inst::FMul(v1, v2) } else { Inst::Mul(v1, v2) }),
      "/" => self.emit(if dbl { Inst::FDiv(v1, v2) } else { Inst::SDiv(v1, v2) }),
      "%" => self.emit(if dbl { Inst::FRem(v1, v2) } else { Inst::SRem(v1, v2) }),
      "==" => self.emit(if dbl { Inst::FCmp(FloatCC::Oeq, v1, v2) }
        else { Inst::ICmp(IntCC::Eq, v1, v2) }),
      "!=" => self.emit(if dbl { Inst::FCmp(FloatCC::One, v1, v2) }
        else { Inst::ICmp(IntCC::Ne, v1, v2) }),
      "<=" => self.emit(if dbl { Inst::FCmp(FloatCC::Ole, v1, v2) }
        else { Inst::ICmp(IntCC::Sle, v1, v2) }),
      ">=" => self.emit(if dbl { Inst::FCmp(FloatCC::Oge, v1, v2) }
        else { Inst::ICmp(IntCC::Sge, v1, v2) }),
      "<" => self.emit(if dbl { Inst::FCmp(FloatCC::Olt, v1, v2) }
        else { Inst::ICmp(IntCC::Slt, v1, v2) }),
      ">" => self.emit(if dbl { Inst::FCmp(FloatCC::Ogt, v1, v2) }
        else { Inst::ICmp(IntCC::Sgt, v1, v2) }),
      _ => return Err(LowerErr::MissingOp(op)),
    };
    Ok(Emitted::open(Some(val)))
  }

  fn exec_block(&mut self, cx: &mut Cx<'_>, a: AstId) -> Result<Emitted, LowerErr> {
    let is_block = cx.asts[a].tag == Tag::Block;
    let saved = if is_block {
      Some(cx.envs.enter(cx.asts[a].env.expect("block scope recorded")))
    } else {
      None
    };
    let children = cx.asts.list(cx.asts[a].child);
    let mut last = Emitted::open(None);
    let mut result = Ok(());
    for c in children {
      match self.exec_ast(cx, c) {
        Ok(r) => last = r,
        Err(e) => { result = Err(e); break }
      }
    }
    if let Some(saved) = saved {
      if result.is_ok() && !last.closed {
        result = self.exec_destructors(cx, None);
      }
      cx.envs.current = saved;
    }
    result.map(|()| last)
  }

  fn exec_if_else_expr(&mut self, cx: &mut Cx<'_>, a: AstId) -> Result<Emitted, LowerErr> {
    let cond = cx.asts[a].child.expect("if..else expression has a condition");
    let con = cx.asts[cond].next.expect("if..else expression has a consequent");
    let alt = cx.asts[con].next.expect("if..else expression has an alternative");

    let i = self.append_block("if");
    let b1 = self.append_block("ifbody");
    let b2 = self.append_block("elsebody");
    let e = self.append_block("ifend");

    self.emit(Inst::Br(i));
    self.position_at_end(i);
    let cond_r = self.exec_ast(cx, cond)?;
    let ty = cx.asts.ty(a);
    let ir = self.lower_ty(cx, ty)?;
    let structured = cx.tys.is_structured(ty);
    let tmp = self.emit(Inst::Alloca(ir.clone()));
    self.emit(Inst::CondBr(cond_r.val.expect("condition yields a value"), b1, b2));

    for (block, branch) in [(b1, con), (b2, alt)] {
      self.position_at_end(block);
      let r = self.exec_ast(cx, branch)?;
      let mut v = r.val.expect("branch yields a value");
      if structured {
        v = self.emit(Inst::Load(ir.clone(), v));
      }
      self.emit(Inst::Store(v, tmp.clone()));
      self.emit(Inst::Br(e));
    }

    self.position_at_end(e);
    let val = if structured { tmp } else { self.emit(Inst::Load(ir, tmp)) };
    Ok(Emitted::open(Some(val)))
  }

  fn exec_if_else_stmt(&mut self, cx: &mut Cx<'_>, a: AstId) -> Result<Emitted, LowerErr> {
    let cond = cx.asts[a].child.expect("if..else statement has a condition");
    let con = cx.asts[cond].next.expect("if..else statement has a consequent");
    let alt = cx.asts[con].next.expect("if..else statement has an alternative");

    let i = self.append_block("if");
    let b1 = self.append_block("ifbody");
    let b2 = self.append_block("elsebody");
    let e = self.append_block("ifend");

    self.emit(Inst::Br(i));
    self.position_at_end(i);
    let cond_r = self.exec_ast(cx, cond)?;
    self.emit(Inst::CondBr(cond_r.val.expect("condition yields a value"), b1, b2));

    self.position_at_end(b1);
    let con_r = self.exec_ast(cx, con)?;
    if !con_r.closed { self.emit(Inst::Br(e)); }

    self.position_at_end(b2);
    let alt_r = self.exec_ast(cx, alt)?;
    if !alt_r.closed { self.emit(Inst::Br(e)); }

    if con_r.closed && alt_r.closed {
      self.delete_block(e);
      Ok(Emitted::closed())
    } else {
      self.position_at_end(e);
      Ok(Emitted::open(None))
    }
  }

  fn exec_if_stmt(&mut self, cx: &mut Cx<'_>, a: AstId) -> Result<Emitted, LowerErr> {
    let cond = cx.asts[a].child.expect("if statement has a condition");
    let con = cx.asts[cond].next.expect("if statement has a consequent");

    let i = self.append_block("if");
    let b = self.append_block("ifbody");
    let e = self.append_block("ifend");

    self.emit(Inst::Br(i));
    self.position_at_end(i);
    let cond_r = self.exec_ast(cx, cond)?;
    self.emit(Inst::CondBr(cond_r.val.expect("condition yields a value"), b, e));

    self.position_at_end(b);
    let con_r = self.exec_ast(cx, con)?;
    if !con_r.closed { self.emit(Inst::Br(e)); }

    self.position_at_end(e);
    Ok(Emitted::open(None))
  }

  fn exec_while_stmt(&mut self, cx: &mut Cx<'_>, a: AstId) -> Result<Emitted, LowerErr> {
    let cond = cx.asts[a].child.expect("while statement has a condition");
    let body = cx.asts[cond].next.expect("while statement has a body");

    let breaksave = self.breakto;
    let w = self.append_block("while");
    let b = self.append_block("whilebody");
    let e = self.append_block("whileend");

    self.emit(Inst::Br(w));
    self.position_at_end(w);
    let cond_r = self.exec_ast(cx, cond)?;
    self.emit(Inst::CondBr(cond_r.val.expect("condition yields a value"), b, e));

    self.position_at_end(b);
    self.breakto = Some(e);
    let body_r = self.exec_ast(cx, body);
    self.breakto = breaksave;
    let body_r = body_r?;
    if !body_r.closed { self.emit(Inst::Br(w)); }

    self.position_at_end(e);
    Ok(Emitted::open(None))
  }

  fn exec_break(&mut self) -> Result<Emitted, LowerErr> {
    let target = self.breakto.ok_or(LowerErr::BreakOutsideLoop)?;
    self.emit(Inst::Br(target));
    Ok(Emitted::closed())
  }

  fn exec_decl(&mut self, cx: &mut Cx<'_>, a: AstId) -> Result<Value, LowerErr> {
    let sym = cx.asts.sym(a);
    let ir_name = self.serialize(cx.syms.name(sym));
    let t = cx.asts.ty(a);
    self.create_var(cx, sym, ir_name, t)
  }

  /// Assign a literal tuple to a destructuring pattern: the whole
  /// right-hand side is evaluated into a temporary vector before any
  /// store, so `(a, b) = (b, a)` is correct.
  fn exec_tuple_assign(&mut self, cx: &mut Cx<'_>, id: AstId, expr: AstId)
    -> Result<Emitted, LowerErr> {
    let exprs = cx.asts.list(cx.asts[expr].child);
    let mut vals = Vec::with_capacity(exprs.len());
    for &e in &exprs {
      let r = self.exec_ast(cx, e)?;
      let mut v = r.val.expect("tuple entry yields a value");
      let t = cx.asts.ty(e);
      if cx.tys.kind(t) == TyKind::Data {
        let ir = self.lower_ty(cx, t)?;
        v = self.emit(Inst::Load(ir, v));
      }
      vals.push(v);
    }

    let targets = cx.asts.list(cx.asts[id].child);
    for (i, &l) in targets.iter().enumerate() {
      match cx.asts[l].tag {
        Tag::LIdent => {
          let var = self.lident_storage(cx, l)?;
          self.emit(Inst::Store(vals[i].clone(), var));
        }
        Tag::LSlot => {
          let p = self.exec_ast(cx, l)?.val.expect("slot access yields a place");
          self.emit(Inst::Store(vals[i].clone(), p));
        }
        Tag::LTuple => {
          // a nested tuple entry was not loaded above, so this is
          // still a pointer to its layout
          let comp_ty = cx.asts.ty(exprs[i]);
          self.exec_tuple_unpack_val(cx, l, vals[i].clone(), comp_ty)?;
        }
        _ => return Err(LowerErr::BadTupleTarget),
      }
    }
    Ok(Emitted::open(None))
  }

  // Storage for an L-identifier, declaring it on first materialization.
  fn lident_storage(&mut self, cx: &mut Cx<'_>, l: AstId) -> Result<Value, LowerErr> {
    let sym = cx.asts.sym(l);
    if_chain! {
      if let Some(b) = cx.envs.lookup(sym);
      if let Some(name) = cx.envs.binding(b).ir_name.clone();
      then {
        let global = cx.envs.is_global(b);
        self.place_for(&name, global)
      } else {
        self.exec_decl(cx, l)
      }
    }
  }

  /// Unpack a tuple-typed value into a destructuring pattern by
  /// in-bounds field indexing.
  fn exec_tuple_unpack_val(&mut self, cx: &mut Cx<'_>, id: AstId, val: Value, t: TyId)
    -> Result<Emitted, LowerErr> {
    let comps = cx.tys.get(t).args.to_vec();
    let rec = self.lower_ty(cx, t)?;
    let mut parts = Vec::with_capacity(comps.len());
    for (i, &ct) in comps.iter().enumerate() {
      let p = self.gep2(rec.clone(), val.clone(), i);
      let ir = self.lower_ty(cx, ct)?;
      let v = self.emit(Inst::Load(ir, p.clone()));
      parts.push((p, v));
    }

    let targets = cx.asts.list(cx.asts[id].child);
    for (i, &l) in targets.iter().enumerate() {
      match cx.asts[l].tag {
        Tag::LIdent => {
          let var = self.lident_storage(cx, l)?;
          self.emit(Inst::Store(parts[i].1.clone(), var));
        }
        Tag::LSlot => {
          let p = self.exec_ast(cx, l)?.val.expect("slot access yields a place");
          self.emit(Inst::Store(parts[i].1.clone(), p));
        }
        Tag::LTuple => {
          self.exec_tuple_unpack_val(cx, l, parts[i].0.clone(), comps[i])?;
        }
        _ => return Err(LowerErr::BadTupleTarget),
      }
    }
    Ok(Emitted::open(None))
  }

  fn exec_tuple_unpack(&mut self, cx: &mut Cx<'_>, id: AstId, expr: AstId)
    -> Result<Emitted, LowerErr> {
    let r = self.exec_ast(cx, expr)?;
    let val = r.val.expect("tuple expression yields a value");
    let t = cx.asts.ty(expr);
    self.exec_tuple_unpack_val(cx, id, val, t)
  }

  /// First assignment to a fresh name: declare storage, then
  /// initialize it — through a constructor taking an rvalue of the
  /// expression's type when one exists, by taking over the value of a
  /// constructing expression, or by structural copy-construction.
  fn exec_initialise_assign(&mut self, cx: &mut Cx<'_>, id: AstId, expr: AstId)
    -> Result<Emitted, LowerErr> {
    let var = self.exec_decl(cx, id)?;
    let expr_tag = cx.asts[expr].tag;
    let r = match expr_tag {
      Tag::Appl => self.exec_appl(cx, expr, false)?,
      Tag::Binop => self.exec_binop(cx, expr, false)?,
      _ => self.exec_ast(cx, expr)?,
    };
    let val = r.val.expect("initializer yields a value");
    let t = cx.asts.ty(expr);

    if cx.tys.kind(t) == TyKind::Data {
      if let Some(con) = find_constructor(cx, t, &[t]) {
        trace!("initialise with constructor");
        let name = cx.tys.get(con).ir_name.clone().expect("hook has a backend name");
        let callee = self.named_callee(&name)?;
        self.emit(Inst::Call(callee, vec![var, val]));
        return Ok(Emitted::open(None))
      }
    }

    if cx.tys.is_structured(t) {
      if matches!(expr_tag, Tag::ArrayCon | Tag::Appl) {
        trace!("initialise from constructing expression");
        let ir = self.lower_ty(cx, t)?;
        let v = self.emit(Inst::Load(ir, val));
        self.emit(Inst::Store(v, var));
      } else {
        self.copy_construct(cx, var, val, t)?;
      }
    } else {
      self.emit(Inst::Store(val, var));
    }
    Ok(Emitted::open(None))
  }

  fn exec_assignment(&mut self, cx: &mut Cx<'_>, a: AstId) -> Result<Emitted, LowerErr> {
    let id = cx.asts[a].child.expect("assignment has a target");
    let expr = cx.asts[id].next.expect("assignment has an expression");

    if cx.asts[id].tag == Tag::LTuple {
      return if cx.asts[expr].tag == Tag::Tuple {
        self.exec_tuple_assign(cx, id, expr)
      } else {
        self.exec_tuple_unpack(cx, id, expr)
      }
    }

    let var = match cx.asts[id].tag {
      Tag::LSlot | Tag::LLocn | Tag::LAppl => {
        self.exec_ast(cx, id)?.val.expect("lvalue yields a place")
      }
      Tag::LIdent => {
        let sym = cx.asts.sym(id);
        let bind = cx.envs.lookup(sym);
        let materialized = bind
          .is_some_and(|b| cx.envs.binding(b).ir_name.is_some());
        if !materialized {
          return self.exec_initialise_assign(cx, id, expr)
        }
        let b = bind.expect("checked above");
        let bind_ty = cx.envs.binding(b).ty;
        let name = cx.envs.binding(b).ir_name.clone().expect("checked above");
        let global = cx.envs.is_global(b);
        let mut var = self.place_for(&name, global)?;
        if cx.tys.kind(bind_ty) == TyKind::Ref {
          let ir = self.lower_ty(cx, bind_ty)?;
          var = self.emit(Inst::Load(ir, var));
        }
        var
      }
      t => return Err(LowerErr::UnknownTag(t)),
    };

    let val = self.exec_ast(cx, expr)?.val.expect("expression yields a value");
    let t = cx.asts.ty(id);
    if cx.tys.is_structured(t) {
      self.call_assign(cx, var, val, t)?;
    } else {
      self.emit(Inst::Store(val, var));
    }
    Ok(Emitted::open(None))
  }

  fn exec_ident(&mut self, cx: &mut Cx<'_>, a: AstId) -> Result<Emitted, LowerErr> {
    let sym = cx.asts.sym(a);
    let bind = cx.envs.lookup(sym)
      .ok_or_else(|| LowerErr::Unmaterialized(cx.syms.name(sym).to_owned()))?;
    let b = cx.envs.binding(bind);
    let bind_ty = b.ty;
    let name = b.ir_name.clone()
      .ok_or_else(|| LowerErr::Unmaterialized(cx.syms.name(sym).to_owned()))?;
    let global = cx.envs.is_global(bind);
    let var = self.place_for(&name, global)?;

    // structured values are handled by reference, not by value
    if cx.tys.is_structured(cx.asts.ty(a)) && cx.tys.kind(bind_ty) != TyKind::Ref {
      return Ok(Emitted::open(Some(var)))
    }
    let ir = self.lower_ty(cx, bind_ty)?;
    let val = self.emit(Inst::Load(ir, var));
    Ok(Emitted::open(Some(val)))
  }

  fn exec_tuple(&mut self, cx: &mut Cx<'_>, a: AstId) -> Result<Emitted, LowerErr> {
    let t = cx.asts.ty(a);
    let rec = self.lower_ty(cx, t)?;
    let name = self.serialize("tuple");
    let val = self.add_local(rec.clone(), &name);
    let entries = cx.asts.list(cx.asts[a].child);
    for (i, e) in entries.into_iter().enumerate() {
      let r = self.exec_ast(cx, e)?;
      let mut v = r.val.expect("tuple entry yields a value");
      let et = cx.asts.ty(e);
      if cx.tys.kind(et) == TyKind::Data {
        let ir = self.lower_ty(cx, et)?;
        v = self.emit(Inst::Load(ir, v));
      }
      let p = self.gep2(rec.clone(), val.clone(), i);
      self.emit(Inst::Store(v, p));
    }
    Ok(Emitted::open(Some(val)))
  }

  /// A `data` statement declares the named IR struct; the body is
  /// installed when a value of the type is first lowered.
  fn exec_data_stmt(&mut self, cx: &mut Cx<'_>, a: AstId) -> Result<Emitted, LowerErr> {
    let name = cx.asts[a].child.expect("data statement has a name");
    let sym = cx.asts.sym(name);
    let ir_name = self.serialize(cx.syms.name(sym));
    self.module.create_struct(&ir_name);
    let bind = cx.envs.lookup(sym).expect("data type bound by inference");
    let data = cx.tys.ret(cx.envs.binding(bind).ty);
    cx.tys.get_mut(data).ir_name = Some(ir_name);
    Ok(Emitted::open(None))
  }

  fn exec_fnparams(&mut self, cx: &mut Cx<'_>, params: AstId) -> Result<(), LowerErr> {
    let list = cx.asts.list(cx.asts[params].child);
    for (i, p) in list.into_iter().enumerate() {
      let name = cx.asts[p].child.expect("parameter has a name");
      let sym = cx.asts.sym(name);
      let bind = cx.envs.lookup(sym).expect("parameter bound in the function scope");
      let t = cx.envs.binding(bind).ty;
      cx.asts[p].ty = Some(t);
      let ir = self.lower_ty(cx, t)?;
      let alloca = self.emit(Inst::Alloca(ir));
      self.emit(Inst::Store(Value::Param(i as u32), alloca.clone()));
      let ir_name = self.serialize(cx.syms.name(sym));
      cx.envs.binding_mut(bind).ir_name = Some(ir_name.clone());
      self.locals.insert(&ir_name, alloca);
    }
    Ok(())
  }

  /// Lower a function definition on first call: structured parameters
  /// are marked no-capture, a structured return no-alias, parameters
  /// are copied into allocas so later stores behave uniformly, and the
  /// pass pipeline runs over the finished body.
  fn exec_fndef(&mut self, cx: &mut Cx<'_>, ast: AstId, fnty: TyId)
    -> Result<Emitted, LowerErr> {
    let name = cx.asts[ast].child.expect("fn has a name");
    let params = cx.asts[name].next.expect("fn has parameters");
    let sym = cx.asts.sym(name);

    let argtys = cx.tys.get(fnty).args.to_vec();
    let ret_t = cx.tys.ret(fnty);
    let mut ir_params = Vec::with_capacity(argtys.len());
    for &t in &argtys {
      ir_params.push(self.lower_ty(cx, t)?);
    }
    let ir_ret = self.lower_ty(cx, ret_t)?;
    let ir_name = self.serialize(cx.syms.name(sym));

    let fn_save = self.function;
    let block_save = self.block;
    let break_save = self.breakto.take();

    let f = self.module.add_function(&ir_name, ir_params, ir_ret);
    // the name is recorded before the body is emitted, so recursive
    // calls resolve
    cx.tys.get_mut(fnty).ir_name = Some(ir_name);
    self.function = Some(f);

    for (i, &t) in argtys.iter().enumerate() {
      if cx.tys.is_structured(t) {
        self.module.func_mut(f).param_attrs[i] |= FnAttrs::NO_CAPTURE;
      }
    }
    if cx.tys.is_structured(ret_t) {
      self.module.func_mut(f).attrs |= FnAttrs::NO_ALIAS;
    }

    let scope_save = cx.envs.enter(cx.asts[ast].env.expect("fn scope recorded"));
    let result = self.fndef_body(cx, params, ret_t);
    cx.envs.current = scope_save;

    if result.is_ok() && self.optimize {
      self.pass.run(self.module.func_mut(f));
    }

    self.function = fn_save;
    self.block = block_save;
    self.breakto = break_save;
    result.map(|()| Emitted::open(None))
  }

  fn fndef_body(&mut self, cx: &mut Cx<'_>, params: AstId, ret_t: TyId)
    -> Result<(), LowerErr> {
    let entry = self.append_block("entry");
    self.position_at_end(entry);
    self.exec_fnparams(cx, params)?;
    let ret_phrase = cx.asts[params].next.expect("fn has a return type");
    let body = cx.asts[ret_phrase].next.expect("fn has a body");
    let r = self.exec_ast(cx, body)?;
    if !r.closed {
      if ret_t == cx.tys.t_nil {
        self.emit(Inst::Ret(None));
      } else {
        return Err(LowerErr::NoReturn)
      }
    }
    Ok(())
  }

  fn exec_swap(&mut self, cx: &mut Cx<'_>, first: AstId, second: AstId)
    -> Result<Emitted, LowerErr> {
    let t = cx.asts.ty(first);
    let loc1 = self.exec_ast(cx, first)?.val.expect("swap operand yields a place");
    let loc2 = self.exec_ast(cx, second)?.val.expect("swap operand yields a place");
    let rec = self.lower_ty(cx, t)?;
    let name = self.serialize("__rb_temp");
    let temp = self.add_local(rec.clone(), &name);
    let v = self.emit(Inst::Load(rec.clone(), loc1.clone()));
    self.emit(Inst::Store(v, temp.clone()));
    let v = self.emit(Inst::Load(rec.clone(), loc2.clone()));
    self.emit(Inst::Store(v, loc1));
    let v = self.emit(Inst::Load(rec, temp));
    self.emit(Inst::Store(v, loc2));
    Ok(Emitted::open(None))
  }

  /// Lower a function or constructor application. Structured arguments
  /// to functions are passed by value through a copy-constructed
  /// temporary; a call producing a structured result parks it in a
  /// temporary so the caller sees a pointer.
  fn exec_appl(&mut self, cx: &mut Cx<'_>, a: AstId, cleanup: bool)
    -> Result<Emitted, LowerErr> {
    let root = cx.asts[a].child.expect("application has a root");
    let args = cx.asts.list(cx.asts[root].next);
    let argtys: Vec<TyId> = args.iter().map(|&e| cx.asts.ty(e)).collect();

    if cx.asts[root].tag == Tag::Ident
      && cx.asts.sym(root) == cx.syms.intern("swap")
      && argtys.len() == 2 && argtys[0] == argtys[1]
      && cx.tys.is_structured(argtys[0]) {
      return self.exec_swap(cx, args[0], args[1])
    }

    let sym = cx.asts.sym(root);
    let bind = cx.envs.lookup(sym)
      .ok_or_else(|| LowerErr::Unmaterialized(cx.syms.name(sym).to_owned()))?;
    let target = cx.envs.binding(bind).ty;

    match cx.tys.kind(target) {
      TyKind::Ctor => {
        let call = infer::find_ctor_call(cx.tys, target, &argtys)
          .ok_or_else(|| LowerErr::MissingOp(cx.syms.name(sym).to_owned()))?;
        let data = cx.tys.ret(target);
        let rec = self.lower_ty(cx, data)?;
        let temp_name = self.serialize("__rb_data");
        let val = if cleanup {
          let temp_sym = cx.syms.intern(&temp_name);
          self.create_var(cx, temp_sym, temp_name, data)?
        } else {
          self.add_local(rec.clone(), &temp_name)
        };
        match call {
          CtorCall::Positional(_) => {
            let mut vals = Vec::with_capacity(args.len());
            for (&e, &t) in args.iter().zip(&argtys) {
              let r = self.exec_ast(cx, e)?;
              let mut v = r.val.expect("argument yields a value");
              if cx.tys.is_structured(t) {
                let ir = self.lower_ty(cx, t)?;
                v = self.emit(Inst::Load(ir, v));
              }
              vals.push(v);
            }
            for (i, v) in vals.into_iter().enumerate() {
              let p = self.gep2(rec.clone(), val.clone(), i);
              self.emit(Inst::Store(v, p));
            }
          }
          CtorCall::Hook(f) => {
            let mut vals = vec![val.clone()];
            for &e in &args {
              let r = self.exec_ast(cx, e)?;
              vals.push(r.val.expect("argument yields a value"));
            }
            let name = cx.tys.get(f).ir_name.clone().expect("hook has a backend name");
            let callee = self.named_callee(&name)?;
            self.emit(Inst::Call(callee, vals));
          }
        }
        Ok(Emitted::open(Some(val)))
      }

      TyKind::Generic => {
        let f = infer::find_prototype(cx.tys, target, &argtys)
          .ok_or_else(|| LowerErr::MissingOp(cx.syms.name(sym).to_owned()))?;
        let fargs = cx.tys.get(f).args.to_vec();
        let mut vals = Vec::with_capacity(args.len());
        for ((&e, &et), &pt) in args.iter().zip(&argtys).zip(&fargs) {
          let r = self.exec_ast(cx, e)?;
          let mut v = r.val.expect("argument yields a value");
          if cx.tys.is_structured(et) && cx.tys.kind(et) == cx.tys.kind(pt) {
            // call by value, not reference
            let temp_name = self.serialize("temp");
            let temp_sym = cx.syms.intern(&temp_name);
            let var = self.create_var(cx, temp_sym, temp_name, et)?;
            self.copy_construct(cx, var.clone(), v, et)?;
            let ir = self.lower_ty(cx, et)?;
            v = self.emit(Inst::Load(ir, var));
          }
          vals.push(v);
        }

        if cx.tys.get(f).ir_name.is_none() {
          // first call site: infer the body, then lower the definition
          let fast = cx.tys.get(f).ast.expect("function has a recorded body");
          infer::infer(cx, fast)?;
          self.exec_fndef(cx, fast, f)?;
        }
        let ir_name = cx.tys.get(f).ir_name.clone().expect("function lowered");
        let callee = self.named_callee(&ir_name)?;
        let call_val = self.emit(Inst::Call(callee, vals));

        let ret_t = cx.tys.ret(f);
        if cx.tys.is_structured(ret_t) {
          let rec = self.lower_ty(cx, ret_t)?;
          let temp_name = self.serialize("__rb_data");
          let temp = if cleanup {
            let temp_sym = cx.syms.intern(&temp_name);
            self.create_var(cx, temp_sym, temp_name, ret_t)?
          } else {
            self.add_local(rec, &temp_name)
          };
          self.emit(Inst::Store(call_val, temp.clone()));
          Ok(Emitted::open(Some(temp)))
        } else {
          Ok(Emitted::open(Some(call_val)))
        }
      }

      _ => Err(LowerErr::UnknownTag(cx.asts[a].tag)),
    }
  }

  fn exec_slot(&mut self, cx: &mut Cx<'_>, a: AstId, load: bool)
    -> Result<Emitted, LowerErr> {
    let root = cx.asts[a].child.expect("slot access has a root");
    let slot = cx.asts[root].next.expect("slot access has a name");
    let r = self.exec_ast(cx, root)?;
    let base = r.val.expect("root yields a place");
    let t = cx.asts.ty(root);
    let i = cx.tys.get(t).slots.iter()
      .position(|&s| s == cx.asts.sym(slot))
      .expect("slot checked by inference");
    let rec = self.lower_ty(cx, t)?;
    let p = self.gep2(rec, base, i);
    let slot_ty = cx.tys.get(t).args[i];
    if load && !cx.tys.is_structured(slot_ty) {
      let ir = self.lower_ty(cx, slot_ty)?;
      let v = self.emit(Inst::Load(ir, p));
      Ok(Emitted::open(Some(v)))
    } else {
      Ok(Emitted::open(Some(p)))
    }
  }

  fn exec_locn(&mut self, cx: &mut Cx<'_>, a: AstId, load: bool)
    -> Result<Emitted, LowerErr> {
    let root = cx.asts[a].child.expect("array access has a root");
    let index = cx.asts[root].next.expect("array access has an index");
    let r = self.exec_ast(cx, root)?;
    let s = self.exec_ast(cx, index)?;
    let base = r.val.expect("root yields a place");
    let idx = s.val.expect("index yields a value");

    let t = cx.asts.ty(root);
    let elem = cx.tys.elem(t);
    let rec = self.lower_ty(cx, t)?;
    let elem_ir = self.lower_ty(cx, elem)?;
    let arrp = self.gep2(rec, base, 0);
    let arr = self.emit(Inst::Load(elem_ir.clone().ptr(), arrp));
    let p = self.emit(Inst::Gep { base_ty: elem_ir.clone(), base: arr, idx: vec![idx] });
    if load && !cx.tys.is_structured(elem) {
      let v = self.emit(Inst::Load(elem_ir, p));
      Ok(Emitted::open(Some(v)))
    } else {
      Ok(Emitted::open(Some(p)))
    }
  }

  fn exec_array_con(&mut self, cx: &mut Cx<'_>, a: AstId) -> Result<Emitted, LowerErr> {
    let elem_phrase = cx.asts[a].child.expect("array constructor has an element type");
    let count = cx.asts[elem_phrase].next.expect("array constructor has a count");
    let r = self.exec_ast(cx, count)?;
    let num = r.val.expect("count yields a value");

    let t = cx.asts.ty(a);
    let elem = cx.tys.elem(t);
    let rec = self.lower_ty(cx, t)?;
    let elem_ir = self.lower_ty(cx, elem)?;
    let name = self.serialize("array_s");
    let val = self.add_local(rec.clone(), &name);

    let lenp = self.gep2(rec.clone(), val.clone(), 1);
    self.emit(Inst::Store(num.clone(), lenp));
    let atomic = cx.tys.is_atomic(elem);
    let arr = self.gc_array_malloc(&elem_ir, num, atomic);
    let arrp = self.gep2(rec, val.clone(), 0);
    self.emit(Inst::Store(arr, arrp));

    self.call_constructors(cx, val.clone(), t)?;
    Ok(Emitted::open(Some(val)))
  }

  /// Lower a `return`: run the destructors of every scope out to the
  /// function boundary (suppressing the one that owns the escaping
  /// value), then emit the return.
  fn exec_return(&mut self, cx: &mut Cx<'_>, a: AstId) -> Result<Emitted, LowerErr> {
    let operand = cx.asts[a].child.expect("return has an operand node");
    let has_value = cx.asts[operand].tag != Tag::None;
    let r = if has_value {
      self.exec_ast(cx, operand)?
    } else {
      Emitted::open(None)
    };

    let saved = cx.envs.current;
    while cx.envs.current != cx.envs.global() {
      self.exec_destructors(cx, r.val.as_ref())?;
      cx.envs.scope_down();
    }

    let mut val = r.val;
    if has_value && cx.tys.is_structured(cx.asts.ty(operand)) {
      let operand_ty = cx.asts.ty(operand);
      let ir = self.lower_ty(cx, operand_ty)?;
      let v = val.expect("structured return yields a place");
      val = Some(self.emit(Inst::Load(ir, v)));
    }
    self.emit(Inst::Ret(val));
    cx.envs.current = saved;
    Ok(Emitted::closed())
  }

  fn exec_fn_stmt(&mut self, cx: &mut Cx<'_>, a: AstId) -> Emitted {
    // switch the tag so lazy body inference runs under `FnBody`
    cx.asts[a].tag = Tag::FnBody;
    Emitted::open(None)
  }

  /// Dispatch one typed AST node to its emitter.
  pub(crate) fn exec_ast(&mut self, cx: &mut Cx<'_>, a: AstId) -> Result<Emitted, LowerErr> {
    match cx.asts[a].tag {
      Tag::Zz => self.exec_zz(cx, a),
      Tag::Int => Ok(self.exec_int(cx, a)),
      Tag::UInt => Ok(self.exec_uint(cx, a)),
      Tag::Double => Ok(self.exec_double(cx, a)),
      Tag::Char => self.exec_char(cx, a),
      Tag::Str => Ok(self.exec_string(cx, a)),
      Tag::Tuple => self.exec_tuple(cx, a),
      Tag::Binop => self.exec_binop(cx, a, true),
      Tag::IfElseExpr => self.exec_if_else_expr(cx, a),
      Tag::IfElseStmt => self.exec_if_else_stmt(cx, a),
      Tag::IfStmt => self.exec_if_stmt(cx, a),
      Tag::WhileStmt => self.exec_while_stmt(cx, a),
      Tag::Break => self.exec_break(),
      Tag::Block | Tag::Then | Tag::Else | Tag::Do => self.exec_block(cx, a),
      Tag::DataStmt => self.exec_data_stmt(cx, a),
      Tag::Assign => self.exec_assignment(cx, a),
      Tag::Ident => self.exec_ident(cx, a),
      Tag::Appl | Tag::LAppl => self.exec_appl(cx, a, true),
      Tag::ArrayCon => self.exec_array_con(cx, a),
      Tag::Slot => self.exec_slot(cx, a, true),
      Tag::LSlot => self.exec_slot(cx, a, false),
      Tag::Locn => self.exec_locn(cx, a, true),
      Tag::LLocn => self.exec_locn(cx, a, false),
      Tag::FnStmt => Ok(self.exec_fn_stmt(cx, a)),
      Tag::Return => self.exec_return(cx, a),
      t => Err(LowerErr::UnknownTag(t)),
    }
  }

  /// Compile and run one top-level phrase: wrap the typed AST in a
  /// fresh anonymous function, lower it, run the pass pipeline, execute
  /// on the machine, render the result, and delete the anonymous
  /// function. On error the jit resets and the module stays usable.
  pub(crate) fn exec_root(&mut self, cx: &mut Cx<'_>, a: AstId) -> Result<String, Error> {
    match self.exec_root_inner(cx, a) {
      Ok(out) => Ok(out),
      Err(e) => {
        self.reset();
        Err(e)
      }
    }
  }

  fn exec_root_inner(&mut self, cx: &mut Cx<'_>, a: AstId) -> Result<String, Error> {
    let ty = cx.asts.ty(a);
    let gen_ty = self.lower_generic_ty(cx, ty).map_err(Error::Lower)?;
    let fname = self.serialize("exec");
    let f = self.module.add_function(&fname, vec![], gen_ty);
    self.function = Some(f);
    let entry = self.append_block("entry");
    self.position_at_end(entry);

    let r = self.exec_ast(cx, a).map_err(Error::Lower)?;
    if !r.closed {
      let mut val = r.val;
      // data and tuple results escape the phrase as heap objects
      if matches!(cx.tys.kind(ty), TyKind::Data | TyKind::Tuple) {
        let ir = self.lower_ty(cx, ty).map_err(Error::Lower)?;
        let v = val.expect("structured phrase yields a place");
        let loaded = self.emit(Inst::Load(ir.clone(), v));
        let boxed = self.gc_malloc(&ir, cx.tys.is_atomic(ty));
        self.emit(Inst::Store(loaded, boxed.clone()));
        val = Some(boxed);
      }
      if ty == cx.tys.t_nil {
        self.emit(Inst::Ret(None));
      } else {
        self.emit(Inst::Ret(val));
      }
    }

    if self.optimize {
      self.pass.run(self.module.func_mut(f));
    }
    let out = self.machine.run(&self.module, f, &[]).map_err(Error::Exec)?;
    let rendered = print::render(cx.tys, cx.syms, &self.machine, ty, &out);
    self.module.delete_function(f);
    self.function = None;
    self.block = None;
    Ok(rendered)
  }
}
