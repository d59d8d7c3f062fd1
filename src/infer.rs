//! Type inference and overload resolution.
//!
//! One bottom-up traversal annotates every expression node with a type,
//! resolves operators and calls against their overload sets, rewrites
//! assignable occurrences to their L-value tags, and records opened
//! scopes on block and function nodes. `Block`, `FnStmt` and `DataStmt`
//! switch scope around their children; everything else is strict
//! post-order. A function declaration only processes its signature and
//! parks the body AST on the new `Fn` type; the body is inferred under
//! the `FnBody` tag when the first call site is lowered, which is what
//! makes mutual recursion through the global scope work.

use if_chain::if_chain;
use itertools::Itertools;

use crate::types::ast::{AstId, Tag};
use crate::types::ty::{TyId, TyKind, TyStore};
use crate::Cx;

/// An inference failure. Fatal to the current phrase; global state is
/// untouched beyond bindings already made.
#[derive(Debug)]
pub enum InferErr {
  /// A name was not found in any scope.
  SymbolNotFound(String),
  /// An operator name was not bound.
  OperatorNotFound(String),
  /// No overload alternative matched the argument types.
  PrototypeNotFound(String),
  /// A condition was not boolean.
  NotBool(&'static str),
  /// The branches of an `if..else` expression disagree.
  BranchMismatch,
  /// A type mismatch in an assignment.
  AssignMismatch(&'static str),
  /// A non-tuple was assigned to a destructuring tuple.
  NonTupleAssign,
  /// Destructuring arity differs from the tuple arity.
  TupleArity,
  /// The left side of an assignment is not an assignable form.
  InvalidLValue,
  /// Slot access on a value that is not of data type.
  SlotNotData,
  /// The named slot does not exist in the data type.
  SlotNotFound(String),
  /// An array index was not a machine word.
  IndexNotWord,
  /// An array length was not a machine word.
  CountNotWord,
  /// Indexing into a value that is not of array type.
  NotArray,
  /// Application of a value that is neither function nor constructor.
  NotCallable,
  /// A type name was not found.
  TypeNameNotFound(String),
  /// A name was declared twice in the same scope.
  Redeclared(String),
  /// `return` outside of a function.
  ReturnOutsideFn,
  /// The returned type does not match the function prototype.
  ReturnMismatch,
  /// An AST tag inference has no rule for (internal invariant).
  UnknownTag(Tag),
}

impl std::fmt::Display for InferErr {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      InferErr::SymbolNotFound(s) => write!(f, "symbol {s} not found in expression"),
      InferErr::OperatorNotFound(s) => write!(f, "operator {s} not found"),
      InferErr::PrototypeNotFound(s) =>
        write!(f, "unable to find prototype of {s} matching the given argument types"),
      InferErr::NotBool(what) => write!(f, "boolean expression expected in {what}"),
      InferErr::BranchMismatch =>
        write!(f, "types not equal in branches of if..else expression"),
      InferErr::AssignMismatch(what) =>
        write!(f, "{what} type doesn't match expression type in assignment"),
      InferErr::NonTupleAssign => write!(f, "attempt to assign non-tuple to tuple"),
      InferErr::TupleArity =>
        write!(f, "incorrect number of entries in tuple assignment"),
      InferErr::InvalidLValue => write!(f, "invalid L-value in assignment"),
      InferErr::SlotNotData =>
        write!(f, "attempt to access slot in expression which is not a data type"),
      InferErr::SlotNotFound(s) => write!(f, "slot {s} not found in data type"),
      InferErr::IndexNotWord => write!(f, "array index must be of word type"),
      InferErr::CountNotWord =>
        write!(f, "number of elements in an array must be a word"),
      InferErr::NotArray =>
        write!(f, "attempt to dereference expression which is not of array type"),
      InferErr::NotCallable =>
        write!(f, "attempt to call something which isn't a function or constructor"),
      InferErr::TypeNameNotFound(s) => write!(f, "type name {s} not found"),
      InferErr::Redeclared(s) => write!(f, "{s} is already declared in this scope"),
      InferErr::ReturnOutsideFn => write!(f, "return outside of a function"),
      InferErr::ReturnMismatch =>
        write!(f, "return type does not match prototype in function definition"),
      InferErr::UnknownTag(t) => write!(f, "unknown AST tag {t:?} in inference"),
    }
  }
}

impl std::error::Error for InferErr {}

fn is_ref_of(tys: &TyStore, param: TyId, arg: TyId) -> bool {
  tys.kind(param) == TyKind::Ref && tys.ret(param) == arg
}

fn match_fn(tys: &TyStore, f: TyId, args: &[TyId]) -> bool {
  let ty = tys.get(f);
  ty.kind == TyKind::Fn && ty.args.len() == args.len()
    && ty.args.iter().zip_eq(args).all(|(&p, &a)| p == a || is_ref_of(tys, p, a))
}

/// Given a generic or constructor `t` and the (already inferred) types
/// of an argument list, find the first `Fn` alternative whose prototype
/// matches by type identity (a `ref T` parameter accepts a `T`
/// argument). Recurses through nested generics. Given an `Fn`, match
/// it directly.
pub(crate) fn find_prototype(tys: &TyStore, t: TyId, args: &[TyId]) -> Option<TyId> {
  match tys.kind(t) {
    TyKind::Fn => match_fn(tys, t, args).then_some(t),
    TyKind::Generic | TyKind::Ctor =>
      tys.get(t).args.iter().copied().find_map(|f| find_prototype(tys, f, args)),
    _ => None,
  }
}

/// How a constructor application resolves.
#[derive(Clone, Copy, Debug)]
pub(crate) enum CtorCall {
  /// A value-style alternative: the arguments fill the slots directly.
  Positional(TyId),
  /// A hook-style alternative `(ref T, extra...) -> nil`: the generator
  /// allocates the value and calls the hook on it.
  Hook(TyId),
}

/// Find a lifecycle hook in an overload set: an alternative of shape
/// `(ref self, extras...) -> nil` whose extra parameters match the
/// given types by identity (or `ref` thereof).
pub(crate) fn find_hook(tys: &TyStore, set: TyId, this: TyId, extras: &[TyId])
  -> Option<TyId> {
  tys.get(set).args.iter().copied().find(|&f| {
    let ty = tys.get(f);
    ty.kind == TyKind::Fn
      && ty.ret == Some(tys.t_nil)
      && ty.args.len() == extras.len() + 1
      && is_ref_of(tys, ty.args[0], this)
      && ty.args[1..].iter().zip_eq(extras).all(|(&p, &a)| p == a || is_ref_of(tys, p, a))
  })
}

/// Resolve a constructor application: value-style alternatives first,
/// then hook-style ones with the leading `ref T` elided.
pub(crate) fn find_ctor_call(tys: &TyStore, ctor: TyId, args: &[TyId]) -> Option<CtorCall> {
  if let Some(f) = find_prototype(tys, ctor, args) {
    return Some(CtorCall::Positional(f))
  }
  let data = tys.ret(ctor);
  find_hook(tys, ctor, data, args).map(CtorCall::Hook)
}

fn find_slot(tys: &TyStore, t: TyId, sym: crate::symbol::Symbol) -> Option<usize> {
  tys.get(t).slots.iter().position(|&s| s == sym)
}

/// Rewrite an expression tag to its L-value dual. Already-L tags pass
/// through, so re-running inference on an annotated tree is a no-op.
fn to_lvalue(cx: &mut Cx<'_>, a: AstId) -> Result<(), InferErr> {
  let tag = match cx.asts[a].tag {
    Tag::Ident => Tag::LIdent,
    Tag::Slot => Tag::LSlot,
    Tag::Locn => Tag::LLocn,
    Tag::Tuple => Tag::LTuple,
    Tag::Appl => Tag::LAppl,
    t @ (Tag::LIdent | Tag::LSlot | Tag::LLocn | Tag::LTuple | Tag::LAppl) => t,
    _ => return Err(InferErr::InvalidLValue),
  };
  cx.asts[a].tag = tag;
  Ok(())
}

/// Annotate the L-value side of an assignment, given the already
/// inferred type of the right-hand side.
fn assign_infer(cx: &mut Cx<'_>, a: AstId, rhs: TyId) -> Result<(), InferErr> {
  match cx.asts[a].tag {
    Tag::LIdent => {
      let sym = cx.asts.sym(a);
      match cx.envs.lookup(sym) {
        None => { cx.envs.bind(sym, rhs, None); }
        Some(bind) => if cx.envs.binding(bind).ty != rhs {
          return Err(InferErr::AssignMismatch("identifier"))
        }
      }
      cx.asts[a].ty = Some(rhs);
    }
    Tag::LTuple => {
      if cx.tys.kind(rhs) != TyKind::Tuple { return Err(InferErr::NonTupleAssign) }
      let comps: Vec<TyId> = cx.tys.get(rhs).args.to_vec();
      let entries = cx.asts.list(cx.asts[a].child);
      if entries.len() != comps.len() { return Err(InferErr::TupleArity) }
      for (&e, t) in entries.iter().zip_eq(comps) {
        to_lvalue(cx, e)?;
        assign_infer(cx, e, t)?;
      }
      cx.asts[a].ty = Some(rhs);
    }
    Tag::LSlot => {
      infer(cx, a)?;
      if cx.asts.ty(a) != rhs { return Err(InferErr::AssignMismatch("slot")) }
    }
    Tag::LLocn => {
      infer(cx, a)?;
      if cx.asts.ty(a) != rhs { return Err(InferErr::AssignMismatch("array entry")) }
    }
    Tag::LAppl => {
      infer(cx, a)?;
      if cx.asts.ty(a) != rhs { return Err(InferErr::AssignMismatch("lvalue")) }
    }
    _ => return Err(InferErr::InvalidLValue),
  }
  Ok(())
}

/// Infer every node of a sibling chain and return the type of the last
/// one (`nil` for an empty chain).
pub(crate) fn list_infer(cx: &mut Cx<'_>, list: Option<AstId>) -> Result<TyId, InferErr> {
  let mut ty = cx.tys.t_nil;
  for a in cx.asts.list(list) {
    infer(cx, a)?;
    ty = cx.asts.ty(a);
  }
  Ok(ty)
}

fn arg_types(cx: &Cx<'_>, list: Option<AstId>) -> Vec<TyId> {
  cx.asts.iter(list).map(|a| cx.asts.ty(a)).collect()
}

/// Annotate an AST with types. See the module docs for the traversal
/// contract.
pub(crate) fn infer(cx: &mut Cx<'_>, a: AstId) -> Result<(), InferErr> {
  let tag = cx.asts[a].tag;
  match tag {
    Tag::None => cx.asts[a].ty = Some(cx.tys.t_nil),
    Tag::Int => cx.asts[a].ty = Some(cx.tys.t_int),
    Tag::UInt => cx.asts[a].ty = Some(cx.tys.t_uint),
    Tag::Double => cx.asts[a].ty = Some(cx.tys.t_double),
    Tag::Char => cx.asts[a].ty = Some(cx.tys.t_char),
    Tag::Str => cx.asts[a].ty = Some(cx.tys.t_string),
    Tag::Zz => cx.asts[a].ty = Some(cx.tys.t_zz),

    Tag::Binop => {
      let args = cx.asts[a].child;
      list_infer(cx, args)?;
      let sym = cx.asts.sym(a);
      let bind = cx.envs.lookup(sym)
        .ok_or_else(|| InferErr::OperatorNotFound(cx.syms.name(sym).to_owned()))?;
      let r#gen = cx.envs.binding(bind).ty;
      let argtys = arg_types(cx, args);
      let f = find_prototype(cx.tys, r#gen, &argtys)
        .ok_or_else(|| InferErr::PrototypeNotFound(cx.syms.name(sym).to_owned()))?;
      cx.asts[a].ty = Some(cx.tys.ret(f));
    }

    Tag::Block => {
      let env = cx.envs.scope_up();
      cx.asts[a].env = Some(env);
      let stmts = cx.asts[a].child;
      let ty = list_infer(cx, stmts)?;
      cx.envs.scope_down();
      cx.asts[a].ty = Some(ty);
    }

    Tag::IfElseExpr => {
      let cond = cx.asts[a].child.expect("if..else expression has a condition");
      let con = cx.asts[cond].next.expect("if..else expression has a consequent");
      let alt = cx.asts[con].next.expect("if..else expression has an alternative");
      infer(cx, cond)?;
      if cx.asts.ty(cond) != cx.tys.t_bool {
        return Err(InferErr::NotBool("if..else expression"))
      }
      infer(cx, con)?;
      infer(cx, alt)?;
      if cx.asts.ty(con) != cx.asts.ty(alt) { return Err(InferErr::BranchMismatch) }
      cx.asts[a].ty = Some(cx.asts.ty(con));
    }

    Tag::IfElseStmt => {
      let cond = cx.asts[a].child.expect("if..else statement has a condition");
      let con = cx.asts[cond].next.expect("if..else statement has a consequent");
      let alt = cx.asts[con].next.expect("if..else statement has an alternative");
      infer(cx, cond)?;
      if cx.asts.ty(cond) != cx.tys.t_bool {
        return Err(InferErr::NotBool("if..else statement"))
      }
      infer(cx, con)?;
      infer(cx, alt)?;
      cx.asts[a].ty = Some(cx.tys.t_nil);
    }

    Tag::IfStmt => {
      let cond = cx.asts[a].child.expect("if statement has a condition");
      let con = cx.asts[cond].next.expect("if statement has a consequent");
      infer(cx, cond)?;
      if cx.asts.ty(cond) != cx.tys.t_bool {
        return Err(InferErr::NotBool("if statement"))
      }
      infer(cx, con)?;
      cx.asts[a].ty = Some(cx.tys.t_nil);
    }

    Tag::Then | Tag::Else | Tag::Do => {
      let body = cx.asts[a].child.expect("branch wrapper has a body");
      infer(cx, body)?;
      cx.asts[a].ty = Some(cx.asts.ty(body));
    }

    Tag::Assign => {
      let lhs = cx.asts[a].child.expect("assignment has a target");
      let rhs = cx.asts[lhs].next.expect("assignment has an expression");
      infer(cx, rhs)?;
      to_lvalue(cx, lhs)?;
      let rhs_ty = cx.asts.ty(rhs);
      assign_infer(cx, lhs, rhs_ty)?;
      cx.asts[a].ty = Some(cx.tys.t_nil);
    }

    Tag::WhileStmt => {
      let cond = cx.asts[a].child.expect("while statement has a condition");
      let body = cx.asts[cond].next.expect("while statement has a body");
      infer(cx, cond)?;
      if cx.asts.ty(cond) != cx.tys.t_bool {
        return Err(InferErr::NotBool("while statement"))
      }
      infer(cx, body)?;
      cx.asts[a].ty = Some(cx.tys.t_nil);
    }

    Tag::Break => cx.asts[a].ty = Some(cx.tys.t_nil),

    Tag::DataStmt => {
      let name = cx.asts[a].child.expect("data statement has a name");
      let body = cx.asts[name].next.expect("data statement has a body");
      let sym = cx.asts.sym(name);
      if cx.envs.lookup_current(sym).is_some() {
        return Err(InferErr::Redeclared(cx.syms.name(sym).to_owned()))
      }
      // Create the nominal type and its constructor up front so the
      // name is visible while the body is inferred.
      let data = cx.tys.data(sym, &[], &[]);
      let f1 = cx.tys.func(data, &[]);
      let ctor = cx.tys.ctor(sym, data, &[f1]);
      cx.envs.bind(sym, ctor, None);
      infer(cx, body)?;
      let slots = cx.asts.list(cx.asts[body].child);
      let args: Vec<TyId> = slots.iter().map(|&s| cx.asts.ty(s)).collect();
      let names: Vec<_> = slots.iter()
        .map(|&s| cx.asts.sym(cx.asts[s].child.expect("data slot has a name")))
        .collect();
      cx.tys.get_mut(f1).args = args.as_slice().into();
      cx.tys.get_mut(data).args = args.as_slice().into();
      cx.tys.get_mut(data).slots = names;
      cx.asts[a].ty = Some(cx.tys.t_nil);
    }

    Tag::DataBody | Tag::ParamBody => {
      let items = cx.asts[a].child;
      list_infer(cx, items)?;
      cx.asts[a].ty = Some(cx.tys.t_nil);
    }

    Tag::DataSlot => {
      let name = cx.asts[a].child.expect("data slot has a name");
      let ty_phrase = cx.asts[name].next.expect("data slot has a type");
      infer(cx, ty_phrase)?;
      cx.asts[a].ty = Some(cx.asts.ty(ty_phrase));
    }

    Tag::TupleType => {
      let entries = cx.asts[a].child;
      list_infer(cx, entries)?;
      let args = arg_types(cx, entries);
      cx.asts[a].ty = Some(cx.tys.tuple(&args));
    }

    Tag::TypeName => {
      let sym = cx.asts.sym(a);
      let bind = cx.envs.lookup(sym)
        .ok_or_else(|| InferErr::TypeNameNotFound(cx.syms.name(sym).to_owned()))?;
      let ty = cx.envs.binding(bind).ty;
      // A constructor name denotes the type it constructs; built-in
      // type names are bound to the type itself.
      cx.asts[a].ty = Some(if cx.tys.kind(ty) == TyKind::Ctor { cx.tys.ret(ty) } else { ty });
    }

    Tag::FnStmt => {
      let name = cx.asts[a].child.expect("fn statement has a name");
      let params = cx.asts[name].next.expect("fn statement has parameters");
      let ret = cx.asts[params].next.expect("fn statement has a return type");
      // The body is ignored on this first round.
      let env = cx.envs.scope_up();
      cx.asts[a].env = Some(env);
      infer(cx, params)?;
      infer(cx, ret)?;
      let ret_ty = cx.asts.ty(ret);
      let ret_sym = cx.syms.intern("return");
      cx.envs.bind(ret_sym, ret_ty, None);
      let argtys = arg_types(cx, cx.asts[params].child);
      let f1 = cx.tys.func(ret_ty, &argtys);
      cx.tys.get_mut(f1).ast = Some(a);
      cx.envs.scope_down();
      let sym = cx.asts.sym(name);
      if_chain! {
        if let Some(bind) = cx.envs.lookup(sym);
        if cx.tys.kind(cx.envs.binding(bind).ty) == TyKind::Generic;
        then {
          let r#gen = cx.envs.binding(bind).ty;
          cx.tys.generic_insert(r#gen, f1);
        } else {
          let r#gen = cx.tys.generic(&[f1]);
          cx.envs.bind(sym, r#gen, None);
        }
      }
      cx.asts[a].ty = Some(cx.tys.t_nil);
    }

    Tag::Param => {
      let name = cx.asts[a].child.expect("parameter has a name");
      let ty_phrase = cx.asts[name].next.expect("parameter has a type");
      infer(cx, ty_phrase)?;
      let ty = cx.asts.ty(ty_phrase);
      cx.envs.bind(cx.asts.sym(name), ty, None);
      cx.asts[a].ty = Some(ty);
    }

    Tag::FnBody => {
      // Lazily infer the function body in the recorded scope when the
      // first call site is lowered.
      let name = cx.asts[a].child.expect("fn body has a name");
      let params = cx.asts[name].next.expect("fn body has parameters");
      let ret = cx.asts[params].next.expect("fn body has a return type");
      let body = cx.asts[ret].next.expect("fn body has a block");
      let env = cx.asts[a].env.expect("fn scope recorded at declaration");
      let saved = cx.envs.enter(env);
      let result = infer(cx, body);
      cx.envs.current = saved;
      result?;
    }

    Tag::Return => {
      let val = cx.asts[a].child.expect("return has an operand node");
      infer(cx, val)?;
      let ret_sym = cx.syms.intern("return");
      let bind = cx.envs.lookup(ret_sym).ok_or(InferErr::ReturnOutsideFn)?;
      if cx.envs.binding(bind).ty != cx.asts.ty(val) {
        return Err(InferErr::ReturnMismatch)
      }
      cx.asts[a].ty = Some(cx.tys.t_nil);
    }

    Tag::ArrayCon => {
      let elem = cx.asts[a].child.expect("array constructor has an element type");
      let count = cx.asts[elem].next.expect("array constructor has a count");
      infer(cx, count)?;
      infer(cx, elem)?;
      if cx.asts.ty(count) != cx.tys.t_int { return Err(InferErr::CountNotWord) }
      let ty = cx.tys.array(cx.asts.ty(elem));
      cx.asts[a].ty = Some(ty);
    }

    Tag::ArrayType => {
      let elem = cx.asts[a].child.expect("array type has an element type");
      infer(cx, elem)?;
      let ty = cx.tys.array(cx.asts.ty(elem));
      cx.asts[a].ty = Some(ty);
    }

    Tag::Ident => {
      let sym = cx.asts.sym(a);
      let bind = cx.envs.lookup(sym)
        .ok_or_else(|| InferErr::SymbolNotFound(cx.syms.name(sym).to_owned()))?;
      cx.asts[a].ty = Some(cx.envs.binding(bind).ty);
    }

    Tag::Tuple => {
      let entries = cx.asts[a].child;
      list_infer(cx, entries)?;
      let args = arg_types(cx, entries);
      cx.asts[a].ty = Some(cx.tys.tuple(&args));
    }

    Tag::Slot | Tag::LSlot => {
      let root = cx.asts[a].child.expect("slot access has a root");
      let slot = cx.asts[root].next.expect("slot access has a name");
      infer(cx, root)?;
      let root_ty = cx.asts.ty(root);
      if cx.tys.kind(root_ty) != TyKind::Data { return Err(InferErr::SlotNotData) }
      let sym = cx.asts.sym(slot);
      let i = find_slot(cx.tys, root_ty, sym)
        .ok_or_else(|| InferErr::SlotNotFound(cx.syms.name(sym).to_owned()))?;
      cx.asts[a].ty = Some(cx.tys.get(root_ty).args[i]);
    }

    Tag::Locn | Tag::LLocn => {
      let root = cx.asts[a].child.expect("array access has a root");
      let index = cx.asts[root].next.expect("array access has an index");
      infer(cx, index)?;
      if cx.asts.ty(index) != cx.tys.t_int { return Err(InferErr::IndexNotWord) }
      infer(cx, root)?;
      let root_ty = cx.asts.ty(root);
      if cx.tys.kind(root_ty) != TyKind::Array { return Err(InferErr::NotArray) }
      cx.asts[a].ty = Some(cx.tys.elem(root_ty));
    }

    Tag::Appl | Tag::LAppl => {
      let root = cx.asts[a].child.expect("application has a root");
      let args = cx.asts[root].next;
      list_infer(cx, args)?;
      let argtys = arg_types(cx, args);
      // `swap` on two values of one structured type is a reserved form.
      if_chain! {
        if cx.asts[root].tag == Tag::Ident;
        if cx.asts.sym(root) == cx.syms.intern("swap");
        if let [t1, t2] = argtys[..];
        if t1 == t2 && cx.tys.is_structured(t1);
        then {
          cx.asts[a].ty = Some(cx.tys.t_nil);
          return Ok(())
        }
      }
      infer(cx, root)?;
      let root_ty = cx.asts.ty(root);
      let ty = match cx.tys.kind(root_ty) {
        TyKind::Generic => {
          let f = find_prototype(cx.tys, root_ty, &argtys).ok_or_else(|| {
            InferErr::PrototypeNotFound(cx.syms.name(cx.asts.sym(root)).to_owned())
          })?;
          cx.tys.ret(f)
        }
        TyKind::Ctor => match find_ctor_call(cx.tys, root_ty, &argtys) {
          Some(CtorCall::Positional(f)) => cx.tys.ret(f),
          Some(CtorCall::Hook(_)) => cx.tys.ret(root_ty),
          None => return Err(InferErr::PrototypeNotFound(
            cx.syms.name(cx.asts.sym(root)).to_owned())),
        },
        _ => return Err(InferErr::NotCallable),
      };
      cx.asts[a].ty = Some(ty);
    }

    Tag::LIdent | Tag::LTuple => return Err(InferErr::UnknownTag(tag)),
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::env::{install_builtins, Envs};
  use crate::symbol::Interner;
  use crate::types::ast::AstArena;

  struct Fixture {
    syms: Interner,
    tys: TyStore,
    asts: AstArena,
    envs: Envs,
  }

  impl Fixture {
    fn new() -> Self {
      let mut syms = Interner::new();
      let mut tys = TyStore::new(&mut syms);
      let mut envs = Envs::new();
      install_builtins(&mut envs, &mut tys, &mut syms);
      Fixture { syms, tys, asts: AstArena::new(), envs }
    }

    fn cx(&mut self) -> Cx<'_> {
      Cx {
        syms: &mut self.syms,
        tys: &mut self.tys,
        asts: &mut self.asts,
        envs: &mut self.envs,
      }
    }
  }

  fn int_lit(fx: &mut Fixture, s: &str) -> AstId {
    let sym = fx.syms.intern(s);
    fx.asts.symbol(Tag::Int, sym)
  }

  #[test]
  fn literals_take_their_primitive_types() {
    let mut fx = Fixture::new();
    let a = int_lit(&mut fx, "3");
    let mut cx = fx.cx();
    infer(&mut cx, a).expect("inference succeeds");
    assert_eq!(fx.asts[a].ty, Some(fx.tys.t_int));
  }

  #[test]
  fn binops_resolve_against_the_operator_generic() {
    let mut fx = Fixture::new();
    let a = int_lit(&mut fx, "1");
    let b = int_lit(&mut fx, "2");
    let plus = fx.syms.intern("+");
    let e = fx.asts.binop(plus, a, b);
    let mut cx = fx.cx();
    infer(&mut cx, e).expect("inference succeeds");
    assert_eq!(fx.asts[e].ty, Some(fx.tys.t_int));
  }

  #[test]
  fn find_prototype_matches_arity_and_identity() {
    let mut fx = Fixture::new();
    let int = fx.tys.t_int;
    let dbl = fx.tys.t_double;
    let fi = fx.tys.func(int, &[int, int]);
    let fd = fx.tys.func(dbl, &[dbl, dbl]);
    let r#gen = fx.tys.generic(&[fi, fd]);
    let f = find_prototype(&fx.tys, r#gen, &[dbl, dbl]).expect("double alternative");
    assert_eq!(f, fd);
    assert_eq!(fx.tys.get(f).args.len(), 2);
    assert!(fx.tys.get(f).args.iter().all(|&a| a == dbl));
    assert_eq!(find_prototype(&fx.tys, r#gen, &[int, dbl]), None);
    assert_eq!(find_prototype(&fx.tys, r#gen, &[int]), None);
  }

  #[test]
  fn ref_parameters_accept_value_arguments() {
    let mut fx = Fixture::new();
    let int = fx.tys.t_int;
    let s = fx.syms.intern("x");
    let name = fx.syms.intern("B");
    let data = fx.tys.data(name, &[int], &[s]);
    let r = fx.tys.ref_to(data);
    let f = fx.tys.func(data, &[r, r]);
    let r#gen = fx.tys.generic(&[f]);
    assert_eq!(find_prototype(&fx.tys, r#gen, &[data, data]), Some(f));
  }

  #[test]
  fn assignment_marks_lvalues_and_binds_new_names() {
    let mut fx = Fixture::new();
    let x = fx.syms.intern("x");
    let lhs = fx.asts.symbol(Tag::Ident, x);
    let rhs = int_lit(&mut fx, "5");
    let assign = fx.asts.node2(Tag::Assign, lhs, rhs);
    let mut cx = fx.cx();
    infer(&mut cx, assign).expect("inference succeeds");
    assert_eq!(fx.asts[lhs].tag, Tag::LIdent);
    assert_eq!(fx.asts[lhs].ty, Some(fx.tys.t_int));
    let bind = fx.envs.lookup(x).expect("x is bound");
    assert_eq!(fx.envs.binding(bind).ty, fx.tys.t_int);
  }

  #[test]
  fn inference_is_idempotent_on_an_annotated_tree() {
    let mut fx = Fixture::new();
    let x = fx.syms.intern("x");
    let lhs = fx.asts.symbol(Tag::Ident, x);
    let one = int_lit(&mut fx, "1");
    let two = int_lit(&mut fx, "2");
    let plus = fx.syms.intern("+");
    let rhs = fx.asts.binop(plus, one, two);
    let assign = fx.asts.node2(Tag::Assign, lhs, rhs);
    let mut cx = fx.cx();
    infer(&mut cx, assign).expect("first run");
    let before: Vec<_> = [lhs, one, two, rhs, assign].iter()
      .map(|&a| (fx.asts[a].tag, fx.asts[a].ty))
      .collect();
    let mut cx = fx.cx();
    infer(&mut cx, assign).expect("second run");
    let after: Vec<_> = [lhs, one, two, rhs, assign].iter()
      .map(|&a| (fx.asts[a].tag, fx.asts[a].ty))
      .collect();
    assert_eq!(before, after);
  }

  #[test]
  fn destructuring_arity_mismatch_is_an_error() {
    let mut fx = Fixture::new();
    let x = fx.syms.intern("x");
    let y = fx.syms.intern("y");
    let lx = fx.asts.symbol(Tag::Ident, x);
    let ly = fx.asts.symbol(Tag::Ident, y);
    let pat = fx.asts.node2(Tag::LTuple, lx, ly);
    let a = int_lit(&mut fx, "1");
    let rhs = fx.asts.node1(Tag::Tuple, a);
    let assign = fx.asts.node2(Tag::Assign, pat, rhs);
    let mut cx = fx.cx();
    assert!(matches!(infer(&mut cx, assign), Err(InferErr::TupleArity)));
  }

  #[test]
  fn bound_identifier_must_keep_its_type() {
    let mut fx = Fixture::new();
    let x = fx.syms.intern("x");
    let lhs1 = fx.asts.symbol(Tag::Ident, x);
    let one = int_lit(&mut fx, "1");
    let first = fx.asts.node2(Tag::Assign, lhs1, one);
    let lhs2 = fx.asts.symbol(Tag::Ident, x);
    let dsym = fx.syms.intern("1.5");
    let dbl = fx.asts.symbol(Tag::Double, dsym);
    let second = fx.asts.node2(Tag::Assign, lhs2, dbl);
    let mut cx = fx.cx();
    infer(&mut cx, first).expect("first assignment");
    assert!(matches!(infer(&mut cx, second),
      Err(InferErr::AssignMismatch("identifier"))));
  }
}
