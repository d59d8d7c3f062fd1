//! The foreign registry.
//!
//! Externally implemented struct types are registered as nominal `Data`
//! types with a chosen field layout, and externally implemented
//! functions are declared in the IR module and backed by host callbacks
//! on the machine; operator and constructor overloads can then name
//! them as intrinsic targets.
//!
//! The bignum type `ZZ` is bootstrapped this way: a data type wrapping
//! a single word (the handle into the machine's bignum table), a
//! constructor set (empty, `uint`, string and copy constructors), a
//! finalizer under the reserved name `finalizer`, an assignment
//! overload under `=`, and intrinsic overloads for the arithmetic and
//! comparison operators. Division and modulus are the floor variants.

use num::{BigInt, Integer};
use smallvec::smallvec;

use crate::build_ir::Jit;
use crate::exec::{word_of, Cell, HostFn, Machine, RtVal};
use crate::types::ir::{FnAttrs, IrType};
use crate::types::ty::{TyId, TyKind};
use crate::Cx;

/// Register an externally laid-out struct as a `Data` type. The fields
/// must be of scalar or previously registered data types.
pub(crate) fn foreign_data(cx: &mut Cx<'_>, jit: &mut Jit, name: &str,
  fields: &[&str], types: &[TyId]) -> TyId {
  let sym = cx.syms.intern(name);
  let slots: Vec<_> = fields.iter().map(|f| cx.syms.intern(f)).collect();
  let data = cx.tys.data(sym, types, &slots);
  let ir_name = jit.serialize(name);
  let s = jit.module.create_struct(&ir_name);
  let body = types.iter().map(|&t| prim_ir(cx, t)).collect();
  jit.module.set_struct_body(s, body);
  cx.tys.get_mut(data).ir_name = Some(ir_name);
  data
}

/// Declare a foreign function in the module and register its host
/// implementation with the machine.
pub(crate) fn foreign_fn(jit: &mut Jit, name: &str, params: Vec<IrType>, ret: IrType,
  host: HostFn) {
  jit.module.add_foreign(name, params, ret, FnAttrs::empty());
  jit.machine.register_host(name, host);
}

// IR shapes for registry field/parameter types; foreign layouts are
// built from scalars and already registered data types.
fn prim_ir(cx: &Cx<'_>, t: TyId) -> IrType {
  match cx.tys.kind(t) {
    TyKind::Bool => IrType::I1,
    TyKind::Char => IrType::I8,
    TyKind::Int | TyKind::UInt => IrType::Word,
    TyKind::Double => IrType::F64,
    TyKind::Str => IrType::I8.ptr(),
    TyKind::Ptr | TyKind::Ref => IrType::Word.ptr(),
    _ => panic!("foreign field is not scalar"),
  }
}

const ZZ_INIT: &str = "__rb_zz_init";
const ZZ_CLEAR: &str = "__rb_zz_clear";
const ZZ_SET_UI: &str = "__rb_zz_set_ui";
const ZZ_SET_STR: &str = "__rb_zz_set_str";
const ZZ_INIT_SET: &str = "__rb_zz_init_set";
const ZZ_SET: &str = "__rb_zz_set";

fn zz_read(mach: &Machine, v: &RtVal) -> BigInt {
  let addr = match v[0] {
    Cell::Ptr(p) => p,
    c => word_of(c) as usize,
  };
  match mach.cell(addr) {
    Cell::Word(h) => mach.zz_get(h).clone(),
    _ => BigInt::default(),
  }
}

fn zz_store(mach: &mut Machine, v: &RtVal, big: BigInt) {
  let addr = match v[0] {
    Cell::Ptr(p) => p,
    c => word_of(c) as usize,
  };
  match mach.cell(addr) {
    Cell::Word(h) => mach.zz_set(h, big),
    _ => {
      let h = mach.zz_new(big);
      mach.set_cell(addr, Cell::Word(h));
    }
  }
}

fn host_init(mach: &mut Machine, args: &[RtVal]) -> RtVal {
  zz_store(mach, &args[0], BigInt::default());
  RtVal::new()
}

fn host_clear(mach: &mut Machine, args: &[RtVal]) -> RtVal {
  zz_store(mach, &args[0], BigInt::default());
  RtVal::new()
}

fn host_set_ui(mach: &mut Machine, args: &[RtVal]) -> RtVal {
  let n = word_of(args[1][0]) as u64;
  zz_store(mach, &args[0], BigInt::from(n));
  RtVal::new()
}

fn host_set_str(mach: &mut Machine, args: &[RtVal]) -> RtVal {
  let addr = match args[1][0] {
    Cell::Ptr(p) => p,
    c => word_of(c) as usize,
  };
  let s = mach.read_str(addr);
  let big = BigInt::parse_bytes(s.as_bytes(), 10).unwrap_or_default();
  zz_store(mach, &args[0], big);
  RtVal::new()
}

fn host_copy(mach: &mut Machine, args: &[RtVal]) -> RtVal {
  let big = zz_read(mach, &args[1]);
  zz_store(mach, &args[0], big);
  RtVal::new()
}

macro_rules! zz_arith {
  ($name:ident, |$a:ident, $b:ident| $body:expr) => {
    fn $name(mach: &mut Machine, args: &[RtVal]) -> RtVal {
      let $a = zz_read(mach, &args[1]);
      let $b = zz_read(mach, &args[2]);
      zz_store(mach, &args[0], $body);
      RtVal::new()
    }
  }
}

zz_arith!(host_add, |a, b| a + b);
zz_arith!(host_sub, |a, b| a - b);
zz_arith!(host_mul, |a, b| a * b);
zz_arith!(host_div, |a, b| if b == BigInt::default() { b } else { a.div_floor(&b) });
zz_arith!(host_mod, |a, b| if b == BigInt::default() { b } else { a.mod_floor(&b) });

macro_rules! zz_rel {
  ($name:ident, |$a:ident, $b:ident| $body:expr) => {
    fn $name(mach: &mut Machine, args: &[RtVal]) -> RtVal {
      let $a = zz_read(mach, &args[0]);
      let $b = zz_read(mach, &args[1]);
      smallvec![Cell::Flag($body)]
    }
  }
}

zz_rel!(host_lt, |a, b| a < b);
zz_rel!(host_gt, |a, b| a > b);
zz_rel!(host_le, |a, b| a <= b);
zz_rel!(host_ge, |a, b| a >= b);
zz_rel!(host_eq, |a, b| a == b);
zz_rel!(host_ne, |a, b| a != b);

/// Install the `ZZ` bignum type: the data wrapper, its constructor set,
/// the finalizer, and the operator overloads.
pub(crate) fn install_zz(cx: &mut Cx<'_>, jit: &mut Jit) {
  let t_int = cx.tys.t_int;
  let t_zz = foreign_data(cx, jit, "ZZ", &["handle"], &[t_int]);
  cx.tys.t_zz = t_zz;
  let name = cx.syms.intern("ZZ");
  let ctor = cx.tys.ctor(name, t_zz, &[]);
  cx.envs.bind(name, ctor, None);

  let rzz = cx.tys.ref_to(t_zz);
  let zz_ir = IrType::Named(jit.module.struct_by_name(
    cx.tys.get(t_zz).ir_name.as_deref().expect("ZZ struct registered"))
    .expect("ZZ struct registered"));
  let pzz = zz_ir.ptr();

  let (t_uint, t_string) = (cx.tys.t_uint, cx.tys.t_string);
  let ctor_fn = |cx: &mut Cx<'_>, args: &[TyId], ir_name: &str| {
    let f = cx.tys.func(cx.tys.t_nil, args);
    cx.tys.get_mut(f).ir_name = Some(ir_name.to_owned());
    cx.tys.generic_insert(ctor, f);
  };
  ctor_fn(cx, &[rzz], ZZ_INIT);
  ctor_fn(cx, &[rzz, t_uint], ZZ_SET_UI);
  ctor_fn(cx, &[rzz, t_string], ZZ_SET_STR);
  ctor_fn(cx, &[rzz, rzz], ZZ_INIT_SET);
  foreign_fn(jit, ZZ_INIT, vec![pzz.clone()], IrType::Void, host_init);
  foreign_fn(jit, ZZ_SET_UI, vec![pzz.clone(), IrType::Word], IrType::Void, host_set_ui);
  foreign_fn(jit, ZZ_SET_STR, vec![pzz.clone(), IrType::I8.ptr()], IrType::Void,
    host_set_str);
  foreign_fn(jit, ZZ_INIT_SET, vec![pzz.clone(), pzz.clone()], IrType::Void, host_copy);

  let fin = cx.tys.func(cx.tys.t_nil, &[rzz]);
  cx.tys.get_mut(fin).ir_name = Some(ZZ_CLEAR.to_owned());
  let fin_gen = cx.tys.generic(&[fin]);
  let fin_sym = cx.syms.intern("finalizer");
  cx.envs.bind(fin_sym, fin_gen, None);
  foreign_fn(jit, ZZ_CLEAR, vec![pzz.clone()], IrType::Void, host_clear);

  let (t_nil, t_bool) = (cx.tys.t_nil, cx.tys.t_bool);
  let overload = |cx: &mut Cx<'_>, op: &str, ret: TyId, ir_name: &str| {
    let f = cx.tys.intrinsic(ret, &[rzz, rzz], ir_name);
    let bind = cx.envs.lookup(cx.syms.intern(op)).expect("operator bound at startup");
    let r#gen = cx.envs.binding(bind).ty;
    cx.tys.generic_insert(r#gen, f);
  };

  let arith: [(&str, &str, HostFn); 5] = [
    ("+", "__rb_zz_add", host_add),
    ("-", "__rb_zz_sub", host_sub),
    ("*", "__rb_zz_mul", host_mul),
    ("/", "__rb_zz_fdiv", host_div),
    ("%", "__rb_zz_fmod", host_mod),
  ];
  for (op, ir_name, host) in arith {
    overload(cx, op, t_zz, ir_name);
    foreign_fn(jit, ir_name, vec![pzz.clone(), pzz.clone(), pzz.clone()], IrType::Void,
      host);
  }

  overload(cx, "=", t_nil, ZZ_SET);
  foreign_fn(jit, ZZ_SET, vec![pzz.clone(), pzz.clone()], IrType::Void, host_copy);

  let rels: [(&str, &str, HostFn); 6] = [
    ("<", "__rb_zz_lt", host_lt),
    (">", "__rb_zz_gt", host_gt),
    ("<=", "__rb_zz_le", host_le),
    (">=", "__rb_zz_ge", host_ge),
    ("==", "__rb_zz_eq", host_eq),
    ("!=", "__rb_zz_ne", host_ne),
  ];
  for (op, ir_name, host) in rels {
    overload(cx, op, t_bool, ir_name);
    foreign_fn(jit, ir_name, vec![pzz.clone(), pzz.clone()], IrType::I1, host);
  }
}
