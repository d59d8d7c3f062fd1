//! The type model.
//!
//! Types are values in an arena and are compared by id everywhere: the
//! store enforces the identity rules, so two structurally equal tuple
//! (or array, or reference) types are the *same* [`TyId`], while every
//! `data` declaration mints a fresh nominal type. Overload sets
//! (`Generic`) and constructor sets (`Ctor`) are also types, holding
//! their `Fn` alternatives in `args`.

use hashbrown::HashMap;
use smallvec::SmallVec;

use crate::symbol::{Interner, Symbol};
use crate::types::ast::AstId;
use crate::types::{mk_id, IdxVec};

mk_id! {
  /// A type handle. Equality of handles is the type equality used by
  /// inference and overload resolution.
  TyId
}

/// The variant tag of a type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TyKind {
  /// The unit type of statements.
  Nil,
  /// Booleans.
  Bool,
  /// Signed machine word.
  Int,
  /// Unsigned machine word.
  UInt,
  /// Double-precision float.
  Double,
  /// A character.
  Char,
  /// A string.
  Str,
  /// Arbitrary-precision integer. The foreign registry replaces this
  /// primitive with a `Data` wrapper at startup.
  Zz,
  /// A structural tuple; `args` are the components.
  Tuple,
  /// An array; `param` is the element type.
  Array,
  /// A nominal record; `args` are the slot types, `slots` the names.
  Data,
  /// A function; `args` are the parameters, `ret` the result.
  Fn,
  /// An overload set of `Fn` alternatives sharing one source name.
  Generic,
  /// An overload set whose alternatives construct the `ret` data type.
  Ctor,
  /// A raw pointer; `ret` is the pointee.
  Ptr,
  /// A reference; `ret` is the pointee.
  Ref,
}

/// A type value. Not every field is meaningful for every kind; see the
/// per-kind notes on [`TyKind`].
#[derive(Clone, Debug)]
pub struct Ty {
  /// The variant tag.
  pub kind: TyKind,
  /// Components: parameters of `Fn`, alternatives of `Generic`/`Ctor`,
  /// fields of `Tuple`/`Data`.
  pub args: SmallVec<[TyId; 4]>,
  /// Result of `Fn`/`Ctor`; pointee of `Ptr`/`Ref`.
  pub ret: Option<TyId>,
  /// Element type of `Array`.
  pub param: Option<TyId>,
  /// Slot names of `Data`, parallel to `args`.
  pub slots: Vec<Symbol>,
  /// The user-visible name, where there is one.
  pub sym: Option<Symbol>,
  /// On `Fn`: call a pre-registered external function instead of a
  /// user-defined body.
  pub intrinsic: bool,
  /// The mangled backend name, assigned when the type or function is
  /// first lowered.
  pub ir_name: Option<String>,
  /// On `Fn`: the declaration AST, for lazy body compilation.
  pub ast: Option<AstId>,
}

impl Ty {
  fn new(kind: TyKind) -> Self {
    Ty {
      kind,
      args: SmallVec::new(),
      ret: None,
      param: None,
      slots: vec![],
      sym: None,
      intrinsic: false,
      ir_name: None,
      ast: None,
    }
  }
}

/// The type arena plus the memo tables that give tuple, array and
/// reference types value identity.
#[derive(Debug)]
pub struct TyStore {
  tys: IdxVec<TyId, Ty>,
  tuple_memo: HashMap<Vec<TyId>, TyId>,
  array_memo: HashMap<TyId, TyId>,
  ref_memo: HashMap<TyId, TyId>,
  ptr_memo: HashMap<TyId, TyId>,
  /// The unit type.
  pub t_nil: TyId,
  /// The boolean type.
  pub t_bool: TyId,
  /// The signed word type.
  pub t_int: TyId,
  /// The unsigned word type.
  pub t_uint: TyId,
  /// The double type.
  pub t_double: TyId,
  /// The char type.
  pub t_char: TyId,
  /// The string type.
  pub t_string: TyId,
  /// The bignum type. Starts as the `Zz` primitive and is replaced by
  /// the foreign registry's `Data` wrapper at startup.
  pub t_zz: TyId,
}

impl TyStore {
  /// Construct the store with one shared instance of each primitive.
  pub fn new(syms: &mut Interner) -> Self {
    let mut tys = IdxVec::new();
    let mut prim = |kind, name: &str, syms: &mut Interner| {
      let mut t = Ty::new(kind);
      t.sym = Some(syms.intern(name));
      tys.push(t)
    };
    let t_nil = prim(TyKind::Nil, "nil", syms);
    let t_bool = prim(TyKind::Bool, "bool", syms);
    let t_int = prim(TyKind::Int, "int", syms);
    let t_uint = prim(TyKind::UInt, "uint", syms);
    let t_double = prim(TyKind::Double, "double", syms);
    let t_char = prim(TyKind::Char, "char", syms);
    let t_string = prim(TyKind::Str, "string", syms);
    let t_zz = prim(TyKind::Zz, "ZZ", syms);
    TyStore {
      tys,
      tuple_memo: HashMap::new(),
      array_memo: HashMap::new(),
      ref_memo: HashMap::new(),
      ptr_memo: HashMap::new(),
      t_nil, t_bool, t_int, t_uint, t_double, t_char, t_string, t_zz,
    }
  }

  /// The type value for an id.
  #[must_use] pub fn get(&self, t: TyId) -> &Ty { &self.tys[t] }

  /// Mutable access to a type value.
  pub fn get_mut(&mut self, t: TyId) -> &mut Ty { &mut self.tys[t] }

  /// The variant tag of a type.
  #[must_use] pub fn kind(&self, t: TyId) -> TyKind { self.tys[t].kind }

  /// The element type of an array.
  #[must_use] pub fn elem(&self, t: TyId) -> TyId {
    self.tys[t].param.expect("not an array type")
  }

  /// The pointee of a `Ptr` or `Ref`, or the result of an `Fn`/`Ctor`.
  #[must_use] pub fn ret(&self, t: TyId) -> TyId {
    self.tys[t].ret.expect("type has no result")
  }

  /// Whether values of this type are represented by a pointer to their
  /// layout at the IR level.
  #[must_use] pub fn is_structured(&self, t: TyId) -> bool {
    matches!(self.kind(t), TyKind::Tuple | TyKind::Array | TyKind::Data)
  }

  /// Whether the representation of this type contains no pointers, so
  /// the pointer-free allocator may be used for it.
  #[must_use] pub fn is_atomic(&self, t: TyId) -> bool {
    !matches!(self.kind(t), TyKind::Array | TyKind::Tuple | TyKind::Data | TyKind::Fn)
  }

  /// The unique tuple type with the given components.
  pub fn tuple(&mut self, args: &[TyId]) -> TyId {
    if let Some(&t) = self.tuple_memo.get(args) { return t }
    let mut ty = Ty::new(TyKind::Tuple);
    ty.args = args.into();
    let t = self.tys.push(ty);
    self.tuple_memo.insert(args.to_vec(), t);
    t
  }

  /// The unique array type with the given element type.
  pub fn array(&mut self, elem: TyId) -> TyId {
    if let Some(&t) = self.array_memo.get(&elem) { return t }
    let mut ty = Ty::new(TyKind::Array);
    ty.param = Some(elem);
    let t = self.tys.push(ty);
    self.array_memo.insert(elem, t);
    t
  }

  /// The unique reference type with the given pointee.
  pub fn ref_to(&mut self, base: TyId) -> TyId {
    if let Some(&t) = self.ref_memo.get(&base) { return t }
    let mut ty = Ty::new(TyKind::Ref);
    ty.ret = Some(base);
    let t = self.tys.push(ty);
    self.ref_memo.insert(base, t);
    t
  }

  /// The unique pointer type with the given pointee.
  pub fn ptr_to(&mut self, base: TyId) -> TyId {
    if let Some(&t) = self.ptr_memo.get(&base) { return t }
    let mut ty = Ty::new(TyKind::Ptr);
    ty.ret = Some(base);
    let t = self.tys.push(ty);
    self.ptr_memo.insert(base, t);
    t
  }

  /// A fresh function type.
  pub fn func(&mut self, ret: TyId, args: &[TyId]) -> TyId {
    let mut ty = Ty::new(TyKind::Fn);
    ty.args = args.into();
    ty.ret = Some(ret);
    self.tys.push(ty)
  }

  /// A fresh intrinsic function type with its external name.
  pub fn intrinsic(&mut self, ret: TyId, args: &[TyId], ir_name: &str) -> TyId {
    let f = self.func(ret, args);
    self.tys[f].intrinsic = true;
    self.tys[f].ir_name = Some(ir_name.to_owned());
    f
  }

  /// A fresh overload set holding the given alternatives.
  pub fn generic(&mut self, fns: &[TyId]) -> TyId {
    let mut ty = Ty::new(TyKind::Generic);
    ty.args = fns.into();
    self.tys.push(ty)
  }

  /// A fresh constructor set for the data type `ret`.
  pub fn ctor(&mut self, sym: Symbol, ret: TyId, fns: &[TyId]) -> TyId {
    let mut ty = Ty::new(TyKind::Ctor);
    ty.args = fns.into();
    ty.ret = Some(ret);
    ty.sym = Some(sym);
    self.tys.push(ty)
  }

  /// A fresh nominal data type. Every call returns a distinct type,
  /// even for identical layouts.
  pub fn data(&mut self, sym: Symbol, args: &[TyId], slots: &[Symbol]) -> TyId {
    let mut ty = Ty::new(TyKind::Data);
    ty.args = args.into();
    ty.slots = slots.to_vec();
    ty.sym = Some(sym);
    self.tys.push(ty)
  }

  /// Append an alternative to an overload set.
  pub fn generic_insert(&mut self, r#gen: TyId, f: TyId) {
    debug_assert!(matches!(self.kind(r#gen), TyKind::Generic | TyKind::Ctor));
    self.tys[r#gen].args.push(f);
  }

  /// Render a type for error messages.
  #[must_use] pub fn print(&self, syms: &Interner, t: TyId) -> String {
    let ty = &self.tys[t];
    match ty.kind {
      TyKind::Nil | TyKind::Bool | TyKind::Int | TyKind::UInt | TyKind::Double
      | TyKind::Char | TyKind::Str | TyKind::Zz => {
        syms.name(ty.sym.expect("primitive has a name")).to_owned()
      }
      TyKind::Data => syms.name(ty.sym.expect("data type has a name")).to_owned(),
      TyKind::Tuple => {
        let inner: Vec<_> = ty.args.iter().map(|&a| self.print(syms, a)).collect();
        format!("({})", inner.join(", "))
      }
      TyKind::Array => format!("array[{}]", self.print(syms, self.elem(t))),
      TyKind::Ptr => format!("pointer<{}>", self.print(syms, self.ret(t))),
      TyKind::Ref => format!("ref {}", self.print(syms, self.ret(t))),
      TyKind::Fn => {
        let inner: Vec<_> = ty.args.iter().map(|&a| self.print(syms, a)).collect();
        let args = if inner.is_empty() { "()".to_owned() } else { inner.join(", ") };
        format!("{} -> {}", args, self.print(syms, self.ret(t)))
      }
      TyKind::Generic => "generic".to_owned(),
      TyKind::Ctor => format!("constructor {}",
        syms.name(ty.sym.expect("constructor has a name"))),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn store() -> (Interner, TyStore) {
    let mut syms = Interner::new();
    let tys = TyStore::new(&mut syms);
    (syms, tys)
  }

  #[test]
  fn tuple_types_are_structurally_unique() {
    let (_, mut tys) = store();
    let (int, dbl) = (tys.t_int, tys.t_double);
    let a = tys.tuple(&[int, dbl]);
    let b = tys.tuple(&[int, dbl]);
    let c = tys.tuple(&[dbl, int]);
    assert_eq!(a, b);
    assert_ne!(a, c);
  }

  #[test]
  fn array_and_ref_types_are_unique_per_pointee() {
    let (_, mut tys) = store();
    let int = tys.t_int;
    assert_eq!(tys.array(int), tys.array(int));
    assert_eq!(tys.ref_to(int), tys.ref_to(int));
    assert_ne!(tys.array(int), tys.array(tys.t_double));
  }

  #[test]
  fn data_types_are_nominal() {
    let (mut syms, mut tys) = store();
    let int = tys.t_int;
    let s = syms.intern("x");
    let name = syms.intern("P");
    let a = tys.data(name, &[int], &[s]);
    let b = tys.data(name, &[int], &[s]);
    assert_ne!(a, b);
  }

  #[test]
  fn structured_and_atomic_classification() {
    let (_, mut tys) = store();
    let int = tys.t_int;
    let arr = tys.array(int);
    let tup = tys.tuple(&[int, int]);
    assert!(tys.is_structured(arr) && tys.is_structured(tup));
    assert!(!tys.is_structured(int));
    assert!(tys.is_atomic(int) && !tys.is_atomic(arr));
  }

  #[test]
  fn prints_compound_types() {
    let (syms, mut tys) = store();
    let int = tys.t_int;
    let tup = tys.tuple(&[int, tys.t_double]);
    assert_eq!(tys.print(&syms, tup), "(int, double)");
    let arr = tys.array(int);
    assert_eq!(tys.print(&syms, arr), "array[int]");
    let f = tys.func(int, &[int, int]);
    assert_eq!(tys.print(&syms, f), "int, int -> int");
  }
}
