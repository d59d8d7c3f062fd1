//! Environments: the chain of lexical scopes and the bindings in them.
//!
//! A binding ties a symbol to a type plus the mangled backend name under
//! which the value was materialized in the IR module (for globals) or
//! the local-name map (for locals); the backend name stays empty until
//! the code generator actually creates storage for it. Scopes hold their
//! bindings in declaration order and are never shrunk; a scope is
//! abandoned wholesale when control leaves it, and the inference pass
//! records opened scopes on the AST so lowering can re-enter them.

use crate::symbol::{Interner, Symbol};
use crate::types::ty::{TyId, TyStore};
use crate::types::{mk_id, IdxVec};

mk_id! {
  /// A scope handle.
  ScopeId
}

/// A handle to one binding inside one scope.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BindId {
  /// The owning scope.
  pub scope: ScopeId,
  /// Position within the scope, in declaration order.
  pub idx: usize,
}

/// One name binding.
#[derive(Clone, Debug)]
pub struct Binding {
  /// The bound name.
  pub sym: Symbol,
  /// The type of the bound value.
  pub ty: TyId,
  /// The mangled backend name, empty until materialized.
  pub ir_name: Option<String>,
}

#[derive(Debug)]
struct Scope {
  parent: Option<ScopeId>,
  binds: Vec<Binding>,
}

/// The scope arena and the pointer to the innermost live scope.
#[derive(Debug)]
pub struct Envs {
  scopes: IdxVec<ScopeId, Scope>,
  /// The innermost live scope.
  pub current: ScopeId,
  global: ScopeId,
}

impl Envs {
  /// Construct the environment stack with an empty global scope.
  #[must_use] pub fn new() -> Self {
    let mut scopes = IdxVec::new();
    let global = scopes.push(Scope { parent: None, binds: vec![] });
    Envs { scopes, current: global, global }
  }

  /// The global scope.
  #[must_use] pub fn global(&self) -> ScopeId { self.global }

  /// Open a new scope inside the current one and make it current.
  pub fn scope_up(&mut self) -> ScopeId {
    let s = self.scopes.push(Scope { parent: Some(self.current), binds: vec![] });
    self.current = s;
    s
  }

  /// Close the current scope.
  pub fn scope_down(&mut self) {
    self.current = self.scopes[self.current].parent.expect("left the global scope");
  }

  /// Make `scope` current, returning the previous current scope so the
  /// caller can restore it.
  pub fn enter(&mut self, scope: ScopeId) -> ScopeId {
    std::mem::replace(&mut self.current, scope)
  }

  /// Bind a symbol in the current scope.
  pub fn bind(&mut self, sym: Symbol, ty: TyId, ir_name: Option<String>) -> BindId {
    let scope = self.current;
    let binds = &mut self.scopes[scope].binds;
    binds.push(Binding { sym, ty, ir_name });
    BindId { scope, idx: binds.len() - 1 }
  }

  /// Look a symbol up, innermost scope first. Within a scope the most
  /// recent binding wins.
  #[must_use] pub fn lookup(&self, sym: Symbol) -> Option<BindId> {
    let mut at = Some(self.current);
    while let Some(scope) = at {
      let s = &self.scopes[scope];
      if let Some(idx) = s.binds.iter().rposition(|b| b.sym == sym) {
        return Some(BindId { scope, idx })
      }
      at = s.parent;
    }
    None
  }

  /// Look a symbol up in the current scope only.
  #[must_use] pub fn lookup_current(&self, sym: Symbol) -> Option<BindId> {
    let scope = self.current;
    self.scopes[scope].binds.iter().rposition(|b| b.sym == sym)
      .map(|idx| BindId { scope, idx })
  }

  /// The binding for a handle.
  #[must_use] pub fn binding(&self, b: BindId) -> &Binding { &self.scopes[b.scope].binds[b.idx] }

  /// Mutable access to a binding.
  pub fn binding_mut(&mut self, b: BindId) -> &mut Binding {
    &mut self.scopes[b.scope].binds[b.idx]
  }

  /// Whether a binding lives in the global scope.
  #[must_use] pub fn is_global(&self, b: BindId) -> bool { b.scope == self.global }

  /// The bindings of a scope, in declaration order.
  #[must_use] pub fn bindings(&self, scope: ScopeId) -> &[Binding] { &self.scopes[scope].binds }
}

impl Default for Envs {
  fn default() -> Self { Self::new() }
}

/// Populate the global scope with the primitive type names and the
/// built-in operator generics: for each arithmetic operator, intrinsic
/// alternatives over the three numeric primitives; for each comparison,
/// the same argument shapes returning `bool`; for `=`, alternatives
/// returning `nil`.
pub fn install_builtins(envs: &mut Envs, tys: &mut TyStore, syms: &mut Interner) {
  let numeric = [tys.t_int, tys.t_uint, tys.t_double];

  // The numeric intrinsics lower to IR instructions directly, so they
  // carry no external name.
  fn intrinsic(tys: &mut TyStore, ret: TyId, arg: TyId) -> TyId {
    let f = tys.func(ret, &[arg, arg]);
    tys.get_mut(f).intrinsic = true;
    f
  }

  for op in ["+", "-", "*", "/", "%"] {
    let fns: Vec<TyId> = numeric.iter().map(|&t| intrinsic(tys, t, t)).collect();
    let r#gen = tys.generic(&fns);
    envs.bind(syms.intern(op), r#gen, None);
  }

  let (t_bool, t_nil) = (tys.t_bool, tys.t_nil);
  for op in ["==", "!=", "<=", ">=", "<", ">"] {
    let fns: Vec<TyId> = numeric.iter().map(|&t| intrinsic(tys, t_bool, t)).collect();
    let r#gen = tys.generic(&fns);
    envs.bind(syms.intern(op), r#gen, None);
  }

  let assigns: Vec<TyId> = numeric.iter().map(|&t| intrinsic(tys, t_nil, t)).collect();
  let r#gen = tys.generic(&assigns);
  envs.bind(syms.intern("="), r#gen, None);

  for t in [tys.t_nil, tys.t_int, tys.t_uint, tys.t_bool, tys.t_double,
            tys.t_string, tys.t_char] {
    let sym = tys.get(t).sym.expect("primitive has a name");
    envs.bind(sym, t, None);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn lookup_walks_the_chain_innermost_first() {
    let mut syms = Interner::new();
    let tys = TyStore::new(&mut syms);
    let mut envs = Envs::new();
    let x = syms.intern("x");
    envs.bind(x, tys.t_int, None);
    let outer = envs.lookup(x).expect("bound in global");
    assert!(envs.is_global(outer));

    envs.scope_up();
    let inner = envs.bind(x, tys.t_double, None);
    assert_eq!(envs.lookup(x), Some(inner));
    assert_eq!(envs.binding(inner).ty, tys.t_double);

    envs.scope_down();
    assert_eq!(envs.lookup(x), Some(outer));
  }

  #[test]
  fn builtins_cover_operators_and_primitives() {
    let mut syms = Interner::new();
    let mut tys = TyStore::new(&mut syms);
    let mut envs = Envs::new();
    install_builtins(&mut envs, &mut tys, &mut syms);
    for op in ["+", "-", "*", "/", "%", "==", "!=", "<=", ">=", "<", ">", "="] {
      let b = envs.lookup(syms.intern(op)).expect("operator bound");
      assert_eq!(tys.kind(envs.binding(b).ty), crate::types::ty::TyKind::Generic);
    }
    let b = envs.lookup(syms.intern("int")).expect("primitive bound");
    assert_eq!(envs.binding(b).ty, tys.t_int);
  }
}
