//! The reference execution engine behind the IR builder interface.
//!
//! The machine models memory as a flat arena of scalar cells; type
//! sizes and `gep` offsets are measured in cells, so layout agrees with
//! [`Module::size_of`] by construction. The three allocator entry
//! points bump-allocate and never reclaim, which satisfies the
//! conservative-collector contract trivially. Foreign calls dispatch to
//! host callbacks registered by name; the bignum table for `ZZ` values
//! lives here too.
//!
//! Running a function interprets its blocks directly and yields the
//! generic result value; the caller pins that value to the phrase type
//! when printing. Errors out of the machine are internal-invariant
//! reports, not user errors.

use bit_set::BitSet;
use hashbrown::HashMap;
use num::BigInt;
use smallvec::{smallvec, SmallVec};

use crate::types::ir::{
  Callee, Function, FuncId, GlobalId, Inst, InstId, IntCC, FloatCC, Module, Value,
  ALLOC, ALLOC_ATOMIC, REALLOC,
};
use crate::types::{Idx, IdxVec};

/// One memory cell: a scalar value.
#[derive(Clone, Copy, Debug)]
pub enum Cell {
  /// A machine word.
  Word(i64),
  /// A float.
  Real(f64),
  /// A boolean.
  Flag(bool),
  /// A byte (chars, string storage).
  Byte(u8),
  /// A cell address.
  Ptr(usize),
  /// Uninitialized.
  Undef,
}

/// A runtime value: one cell for scalars, several for first-class
/// record values (loads and stores of record type move whole cell
/// groups).
pub type RtVal = SmallVec<[Cell; 2]>;

/// A host callback implementing a foreign function.
pub type HostFn = fn(&mut Machine, &[RtVal]) -> RtVal;

/// An internal-invariant failure during execution.
#[derive(Debug)]
pub enum ExecErr {
  /// A basic block ended without a terminator.
  NoTerminator(String),
  /// An instruction result was read before the instruction ran.
  UseBeforeDef,
  /// A call targeted a deleted function.
  DeadFunction(String),
  /// A foreign call had no registered host.
  UnknownForeign(String),
}

impl std::fmt::Display for ExecErr {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      ExecErr::NoTerminator(b) => write!(f, "block {b} has no terminator"),
      ExecErr::UseBeforeDef => write!(f, "instruction result used before definition"),
      ExecErr::DeadFunction(n) => write!(f, "call to deleted function {n}"),
      ExecErr::UnknownForeign(n) => write!(f, "no host registered for foreign function {n}"),
    }
  }
}

impl std::error::Error for ExecErr {}

/// Extract a word from a cell, coercing the other scalar shapes.
#[must_use] pub fn word_of(c: Cell) -> i64 {
  match c {
    Cell::Word(n) => n,
    Cell::Byte(b) => i64::from(b),
    Cell::Flag(b) => i64::from(b),
    Cell::Ptr(p) => p as i64,
    Cell::Real(r) => r as i64,
    Cell::Undef => 0,
  }
}

/// Extract a float from a cell.
#[must_use] pub fn real_of(c: Cell) -> f64 {
  match c {
    Cell::Real(r) => r,
    Cell::Undef => 0.0,
    c => word_of(c) as f64,
  }
}

fn ptr_of(c: Cell) -> usize {
  match c {
    Cell::Ptr(p) => p,
    c => usize::try_from(word_of(c)).unwrap_or(0),
  }
}

/// The machine: cell memory, the global and string tables, the host
/// registry and the bignum table.
pub struct Machine {
  mem: Vec<Cell>,
  block_len: HashMap<usize, usize>,
  globals: HashMap<GlobalId, usize>,
  interned_strs: HashMap<u32, usize>,
  hosts: HashMap<String, HostFn>,
  zz: Vec<BigInt>,
}

impl std::fmt::Debug for Machine {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Machine")
      .field("mem", &self.mem.len())
      .field("zz", &self.zz.len())
      .finish_non_exhaustive()
  }
}

impl Machine {
  /// A fresh machine. Cell 0 is reserved so that address 0 is null.
  #[must_use] pub fn new() -> Self {
    Machine {
      mem: vec![Cell::Undef],
      block_len: HashMap::new(),
      globals: HashMap::new(),
      interned_strs: HashMap::new(),
      hosts: HashMap::new(),
      zz: vec![],
    }
  }

  /// Register a host callback for a foreign function name.
  pub fn register_host(&mut self, name: &str, host: HostFn) {
    self.hosts.insert(name.to_owned(), host);
  }

  /// Bump-allocate `n` cells; the block is never reclaimed.
  pub fn alloc(&mut self, n: usize) -> usize {
    let addr = self.mem.len();
    self.mem.resize(addr + n.max(1), Cell::Undef);
    self.block_len.insert(addr, n);
    addr
  }

  /// Allocate a fresh block of `n` cells and copy the old contents in.
  pub fn realloc(&mut self, p: usize, n: usize) -> usize {
    let addr = self.alloc(n);
    let old = self.block_len.get(&p).copied().unwrap_or(0).min(n);
    for i in 0..old {
      self.mem[addr + i] = self.mem[p + i];
    }
    addr
  }

  /// Read one cell.
  #[must_use] pub fn cell(&self, addr: usize) -> Cell { self.mem[addr] }

  /// Write one cell.
  pub fn set_cell(&mut self, addr: usize, c: Cell) { self.mem[addr] = c }

  /// Read a zero-terminated byte string starting at `addr`.
  #[must_use] pub fn read_str(&self, addr: usize) -> String {
    let mut out = String::new();
    let mut at = addr;
    loop {
      match self.mem[at] {
        Cell::Byte(0) => break,
        Cell::Byte(b) => out.push(b as char),
        _ => break,
      }
      at += 1;
    }
    out
  }

  /// Store a string as zero-terminated bytes, returning its address.
  pub fn write_str(&mut self, s: &str) -> usize {
    let addr = self.alloc(s.len() + 1);
    for (i, b) in s.bytes().enumerate() {
      self.mem[addr + i] = Cell::Byte(b);
    }
    self.mem[addr + s.len()] = Cell::Byte(0);
    addr
  }

  /// Add a bignum to the table, returning its handle.
  pub fn zz_new(&mut self, v: BigInt) -> i64 {
    self.zz.push(v);
    (self.zz.len() - 1) as i64
  }

  /// The bignum for a handle.
  #[must_use] pub fn zz_get(&self, handle: i64) -> &BigInt { &self.zz[handle as usize] }

  /// Overwrite the bignum for a handle.
  pub fn zz_set(&mut self, handle: i64, v: BigInt) { self.zz[handle as usize] = v }

  fn global_addr(&mut self, m: &Module, g: GlobalId) -> usize {
    if let Some(&addr) = self.globals.get(&g) { return addr }
    let global = m.global(g);
    let addr = self.alloc(m.size_of(&global.ty));
    if let Some(init) = &global.init {
      for (i, &w) in init.iter().enumerate() {
        self.mem[addr + i] = Cell::Word(w);
      }
    }
    self.globals.insert(g, addr);
    addr
  }

  fn str_addr(&mut self, m: &Module, i: u32) -> usize {
    if let Some(&addr) = self.interned_strs.get(&i) { return addr }
    let addr = self.write_str(m.string(i));
    self.interned_strs.insert(i, addr);
    addr
  }

  fn eval(&mut self, m: &Module, vals: &IdxVec<InstId, Option<RtVal>>,
    args: &[RtVal], v: &Value) -> Result<RtVal, ExecErr> {
    Ok(match v {
      Value::Word(n) => smallvec![Cell::Word(*n)],
      Value::Byte(b) => smallvec![Cell::Byte(*b)],
      Value::Real(r) => smallvec![Cell::Real(*r)],
      Value::SizeOf(ty) => smallvec![Cell::Word(m.size_of(ty) as i64)],
      Value::Undef(ty) => smallvec![Cell::Undef; m.size_of(ty)],
      Value::Null => smallvec![Cell::Ptr(0)],
      Value::Str(i) => smallvec![Cell::Ptr(self.str_addr(m, *i))],
      Value::Inst(i) => vals[*i].clone().ok_or(ExecErr::UseBeforeDef)?,
      Value::Param(i) => args[*i as usize].clone(),
      Value::Global(g) => smallvec![Cell::Ptr(self.global_addr(m, *g))],
    })
  }

  fn scalar(&mut self, m: &Module, vals: &IdxVec<InstId, Option<RtVal>>,
    args: &[RtVal], v: &Value) -> Result<Cell, ExecErr> {
    Ok(self.eval(m, vals, args, v)?[0])
  }

  fn call(&mut self, m: &Module, callee: Callee, argv: Vec<RtVal>)
    -> Result<RtVal, ExecErr> {
    match callee {
      Callee::Func(f) => self.run(m, f, &argv),
      Callee::Foreign(f) => {
        let name = &m.foreign(f).name;
        match name.as_str() {
          ALLOC | ALLOC_ATOMIC => {
            let n = usize::try_from(word_of(argv[0][0])).unwrap_or(0);
            Ok(smallvec![Cell::Ptr(self.alloc(n))])
          }
          REALLOC => {
            let p = ptr_of(argv[0][0]);
            let n = usize::try_from(word_of(argv[1][0])).unwrap_or(0);
            Ok(smallvec![Cell::Ptr(self.realloc(p, n))])
          }
          _ => {
            let host = *self.hosts.get(name.as_str())
              .ok_or_else(|| ExecErr::UnknownForeign(name.clone()))?;
            Ok(host(self, &argv))
          }
        }
      }
    }
  }

  /// Execute a function with the given arguments and return its generic
  /// result value (empty for void).
  pub fn run(&mut self, m: &Module, f: FuncId, args: &[RtVal]) -> Result<RtVal, ExecErr> {
    let func = m.func(f);
    if func.dead { return Err(ExecErr::DeadFunction(func.name.clone())) }
    let mut vals: IdxVec<InstId, Option<RtVal>> = vec![None; func.insts.len()].into();
    let mut block = func.entry();
    'blocks: loop {
      for &i in &func.blocks[block].insts {
        match &func.insts[i] {
          Inst::Br(b) => { block = *b; continue 'blocks }
          Inst::CondBr(c, t, e) => {
            let c = self.scalar(m, &vals, args, c)?;
            block = if word_of(c) != 0 { *t } else { *e };
            continue 'blocks
          }
          Inst::Ret(v) => return Ok(match v {
            Some(v) => self.eval(m, &vals, args, v)?,
            None => SmallVec::new(),
          }),
          inst => {
            let out = self.exec_inst(m, &vals, args, inst)?;
            vals[i] = Some(out);
          }
        }
      }
      return Err(ExecErr::NoTerminator(func.blocks[block].name.clone()))
    }
  }

  fn exec_inst(&mut self, m: &Module, vals: &IdxVec<InstId, Option<RtVal>>,
    args: &[RtVal], inst: &Inst) -> Result<RtVal, ExecErr> {
    macro_rules! iop {
      ($a:expr, $b:expr, $f:expr) => {{
        let (a, b) = (self.scalar(m, vals, args, $a)?, self.scalar(m, vals, args, $b)?);
        let f: fn(i64, i64) -> i64 = $f;
        smallvec![Cell::Word(f(word_of(a), word_of(b)))]
      }}
    }
    macro_rules! fop {
      ($a:expr, $b:expr, $f:expr) => {{
        let (a, b) = (self.scalar(m, vals, args, $a)?, self.scalar(m, vals, args, $b)?);
        let f: fn(f64, f64) -> f64 = $f;
        smallvec![Cell::Real(f(real_of(a), real_of(b)))]
      }}
    }
    Ok(match inst {
      Inst::Add(a, b) => iop!(a, b, i64::wrapping_add),
      Inst::Sub(a, b) => iop!(a, b, i64::wrapping_sub),
      Inst::Mul(a, b) => iop!(a, b, i64::wrapping_mul),
      Inst::SDiv(a, b) => iop!(a, b, |a, b| if b == 0 { 0 } else { a.wrapping_div(b) }),
      Inst::SRem(a, b) => iop!(a, b, |a, b| if b == 0 { 0 } else { a.wrapping_rem(b) }),
      Inst::FAdd(a, b) => fop!(a, b, |a, b| a + b),
      Inst::FSub(a, b) => fop!(a, b, |a, b| a - b),
      Inst::FMul(a, b) => fop!(a, b, |a, b| a * b),
      Inst::FDiv(a, b) => fop!(a, b, |a, b| a / b),
      Inst::FRem(a, b) => fop!(a, b, |a, b| a % b),
      Inst::ICmp(cc, a, b) => {
        let (a, b) = (self.scalar(m, vals, args, a)?, self.scalar(m, vals, args, b)?);
        let (a, b) = (word_of(a), word_of(b));
        let r = match cc {
          IntCC::Eq => a == b,
          IntCC::Ne => a != b,
          IntCC::Slt => a < b,
          IntCC::Sle => a <= b,
          IntCC::Sgt => a > b,
          IntCC::Sge => a >= b,
        };
        smallvec![Cell::Flag(r)]
      }
      Inst::FCmp(cc, a, b) => {
        let (a, b) = (self.scalar(m, vals, args, a)?, self.scalar(m, vals, args, b)?);
        let (a, b) = (real_of(a), real_of(b));
        let r = match cc {
          FloatCC::Oeq => a == b,
          FloatCC::One => a != b,
          FloatCC::Olt => a < b,
          FloatCC::Ole => a <= b,
          FloatCC::Ogt => a > b,
          FloatCC::Oge => a >= b,
        };
        smallvec![Cell::Flag(r)]
      }
      Inst::Alloca(ty) => smallvec![Cell::Ptr(self.alloc(m.size_of(ty)))],
      Inst::Load(ty, p) => {
        let addr = ptr_of(self.scalar(m, vals, args, p)?);
        let n = m.size_of(ty);
        (0..n).map(|i| self.mem[addr + i]).collect()
      }
      Inst::Store(v, p) => {
        let cells = self.eval(m, vals, args, v)?;
        let addr = ptr_of(self.scalar(m, vals, args, p)?);
        for (i, c) in cells.iter().enumerate() {
          self.mem[addr + i] = *c;
        }
        SmallVec::new()
      }
      Inst::Gep { base_ty, base, idx } => {
        let mut addr = ptr_of(self.scalar(m, vals, args, base)?);
        let mut ixs = idx.iter();
        if let Some(first) = ixs.next() {
          let first = word_of(self.scalar(m, vals, args, first)?);
          addr = addr.wrapping_add((first as usize).wrapping_mul(m.size_of(base_ty)));
        }
        let mut cur = base_ty.clone();
        for ix in ixs {
          let k = word_of(self.scalar(m, vals, args, ix)?) as usize;
          addr += m.offset_of(&cur, k);
          cur = m.fields_of(&cur)[k].clone();
        }
        smallvec![Cell::Ptr(addr)]
      }
      Inst::PtrCast(v, _) => self.eval(m, vals, args, v)?,
      Inst::Call(callee, cargs) => {
        let mut argv = Vec::with_capacity(cargs.len());
        for a in cargs {
          argv.push(self.eval(m, vals, args, a)?);
        }
        self.call(m, *callee, argv)?
      }
      Inst::Br(_) | Inst::CondBr(..) | Inst::Ret(_) => unreachable!("handled in run"),
    })
  }
}

impl Default for Machine {
  fn default() -> Self { Self::new() }
}

/// The per-function pass pipeline: removes blocks unreachable from the
/// entry (branch targets of deleted joins, fallthrough stubs after
/// closed branches).
#[derive(Debug, Default)]
pub struct PassManager;

impl PassManager {
  /// Create the pipeline.
  #[must_use] pub fn new() -> Self { Self }

  /// Run the pipeline on one function.
  pub fn run(&self, f: &mut Function) {
    if f.order.is_empty() { return }
    let mut reach = BitSet::<u32>::default();
    let mut stack = vec![f.entry()];
    while let Some(b) = stack.pop() {
      if !reach.insert(b.into_usize()) { continue }
      for &i in &f.blocks[b].insts {
        match f.insts[i] {
          Inst::Br(t) => stack.push(t),
          Inst::CondBr(_, t, e) => { stack.push(t); stack.push(e) }
          _ => {}
        }
      }
    }
    f.order.retain(|b| reach.contains(b.into_usize()));
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::ir::IrType;

  #[test]
  fn alloc_load_store_round_trip() {
    let mut mach = Machine::new();
    let p = mach.alloc(2);
    mach.set_cell(p, Cell::Word(7));
    mach.set_cell(p + 1, Cell::Real(1.5));
    assert_eq!(word_of(mach.cell(p)), 7);
    assert_eq!(real_of(mach.cell(p + 1)), 1.5);
  }

  #[test]
  fn realloc_copies_old_contents() {
    let mut mach = Machine::new();
    let p = mach.alloc(2);
    mach.set_cell(p, Cell::Word(3));
    mach.set_cell(p + 1, Cell::Word(4));
    let q = mach.realloc(p, 4);
    assert_eq!(word_of(mach.cell(q)), 3);
    assert_eq!(word_of(mach.cell(q + 1)), 4);
  }

  #[test]
  fn runs_a_simple_function() {
    let mut m = Module::new("test");
    let f = m.add_function("f", vec![IrType::Word, IrType::Word], IrType::Word);
    let func = m.func_mut(f);
    let entry = func.append_block("entry");
    let sum = func.push_inst(entry, Inst::Add(Value::Param(0), Value::Param(1)));
    func.push_inst(entry, Inst::Ret(Some(Value::Inst(sum))));
    let mut mach = Machine::new();
    let out = mach.run(&m, f, &[smallvec![Cell::Word(2)], smallvec![Cell::Word(3)]])
      .expect("runs");
    assert_eq!(word_of(out[0]), 5);
  }

  #[test]
  fn pass_manager_drops_unreachable_blocks() {
    let mut m = Module::new("test");
    let f = m.add_function("f", vec![], IrType::Void);
    let func = m.func_mut(f);
    let entry = func.append_block("entry");
    let orphan = func.append_block("orphan");
    func.push_inst(entry, Inst::Ret(None));
    func.push_inst(orphan, Inst::Ret(None));
    PassManager::new().run(func);
    assert_eq!(func.order, vec![entry]);
  }

  #[test]
  fn strings_round_trip_as_bytes() {
    let mut mach = Machine::new();
    let p = mach.write_str("hi");
    assert_eq!(mach.read_str(p), "hi");
  }
}
