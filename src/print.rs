//! Rendering of generic execution results.
//!
//! A value is formatted according to the phrase's type: words carry an
//! `i`/`u` suffix, chars and strings are quoted (chars with the
//! standard escapes), tuples print as `(a, b)` with a trailing comma at
//! arity one, data values as `Name(a, b)`, arrays as the word `array`,
//! and `ZZ` values through the bignum library's printer. Aggregate
//! components are read straight out of the machine's cell memory.

use itertools::Itertools;

use crate::exec::{real_of, word_of, Cell, Machine, RtVal};
use crate::symbol::Interner;
use crate::types::ty::{TyId, TyKind, TyStore};

fn size_in_cells(tys: &TyStore, ty: TyId) -> usize {
  match tys.kind(ty) {
    TyKind::Nil => 0,
    TyKind::Tuple | TyKind::Data =>
      tys.get(ty).args.iter().map(|&a| size_in_cells(tys, a)).sum(),
    TyKind::Array => 2,
    _ => 1,
  }
}

fn render_char(c: u8) -> String {
  match c {
    b'\'' => "'\\''".to_owned(),
    b'"' => "'\\\"'".to_owned(),
    b'\\' => "'\\\\'".to_owned(),
    0 => "'\\0'".to_owned(),
    b'\n' => "'\\n'".to_owned(),
    b'\r' => "'\\r'".to_owned(),
    b'\t' => "'\\t'".to_owned(),
    c => format!("'{}'", c as char),
  }
}

fn ptr_of(c: Cell) -> usize {
  match c {
    Cell::Ptr(p) => p,
    c => word_of(c).max(0) as usize,
  }
}

fn render_scalar(tys: &TyStore, mach: &Machine, ty: TyId, cell: Cell) -> String {
  if ty == tys.t_int {
    format!("{}i", word_of(cell))
  } else if ty == tys.t_uint {
    format!("{}u", word_of(cell) as u64)
  } else if ty == tys.t_double {
    format!("{}", real_of(cell))
  } else if ty == tys.t_char {
    render_char(word_of(cell) as u8)
  } else if ty == tys.t_string {
    format!("\"{}\"", mach.read_str(ptr_of(cell)))
  } else if ty == tys.t_bool {
    if word_of(cell) != 0 { "true".to_owned() } else { "false".to_owned() }
  } else {
    "none".to_owned()
  }
}

fn render_at(tys: &TyStore, syms: &Interner, mach: &Machine, ty: TyId, addr: usize)
  -> String {
  if ty == tys.t_zz {
    return match mach.cell(addr) {
      Cell::Word(h) => mach.zz_get(h).to_string(),
      _ => "0".to_owned(),
    }
  }
  match tys.kind(ty) {
    TyKind::Tuple => {
      let comps = entries(tys, syms, mach, ty, addr);
      if comps.len() == 1 {
        format!("({},)", comps[0])
      } else {
        format!("({})", comps.iter().join(", "))
      }
    }
    TyKind::Data => {
      let name = syms.name(tys.get(ty).sym.expect("data type has a name"));
      format!("{}({})", name, entries(tys, syms, mach, ty, addr).iter().join(", "))
    }
    TyKind::Array => "array".to_owned(),
    _ => render_scalar(tys, mach, ty, mach.cell(addr)),
  }
}

fn entries(tys: &TyStore, syms: &Interner, mach: &Machine, ty: TyId, addr: usize)
  -> Vec<String> {
  let mut at = addr;
  tys.get(ty).args.to_vec().into_iter().map(|c| {
    let s = render_at(tys, syms, mach, c, at);
    at += size_in_cells(tys, c);
    s
  }).collect()
}

/// Render a generic execution result according to the phrase type.
pub(crate) fn render(tys: &TyStore, syms: &Interner, mach: &Machine, ty: TyId,
  val: &RtVal) -> String {
  if ty == tys.t_nil || val.is_empty() {
    return "none".to_owned()
  }
  if ty == tys.t_zz || tys.is_structured(ty) {
    return render_at(tys, syms, mach, ty, ptr_of(val[0]))
  }
  render_scalar(tys, mach, ty, val[0])
}
