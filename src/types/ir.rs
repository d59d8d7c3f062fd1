//! The low-level IR the code generator drives.
//!
//! A [`Module`] owns functions, named structs, globals, foreign
//! declarations and string constants. Functions are lists of basic
//! blocks over an instruction arena; values are either constants or
//! references to the instruction that produced them. The surface here
//! is deliberately the subset of a conventional JIT builder API that
//! the code generator needs: block surgery, the arithmetic and
//! comparison groups with integer and floating variants, memory
//! traffic through `alloca`/`load`/`store`/in-bounds `gep`, calls,
//! branches, and typed constants.
//!
//! Sizes and field offsets are measured in memory cells (one scalar per
//! cell); the execution engine in [`crate::exec`] uses the same layout.

use std::rc::Rc;

use bitflags::bitflags;
use hashbrown::HashMap;

use crate::types::{mk_id, IdxVec};

mk_id! {
  /// A function in a module.
  FuncId,
  /// A basic block within a function.
  BlockId,
  /// An instruction within a function.
  InstId,
  /// A global variable in a module.
  GlobalId,
  /// A named struct type in a module.
  StructId,
  /// A foreign function declaration in a module.
  ForeignId,
}

bitflags! {
  /// Function and parameter attributes.
  #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
  pub struct FnAttrs: u8 {
    /// The return value does not alias any other pointer.
    const NO_ALIAS = 1;
    /// The parameter pointer does not escape the call.
    const NO_CAPTURE = 2;
  }
}

/// An IR-level type.
#[derive(Clone, Debug, PartialEq)]
pub enum IrType {
  /// No value.
  Void,
  /// One-bit boolean.
  I1,
  /// A byte (chars).
  I8,
  /// The machine word.
  Word,
  /// Double-precision float.
  F64,
  /// A pointer to the inner type.
  Ptr(Rc<IrType>),
  /// An anonymous packed record.
  Rec(Rc<[IrType]>),
  /// A named struct, whose body lives in the module registry (and may
  /// not be set yet, allowing cycles through pointers).
  Named(StructId),
}

impl IrType {
  /// A pointer to this type.
  #[must_use] pub fn ptr(self) -> IrType { IrType::Ptr(Rc::new(self)) }
}

/// Signed integer comparison predicates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IntCC {
  /// Equal.
  Eq,
  /// Not equal.
  Ne,
  /// Signed less-than.
  Slt,
  /// Signed less-or-equal.
  Sle,
  /// Signed greater-than.
  Sgt,
  /// Signed greater-or-equal.
  Sge,
}

/// Ordered floating comparison predicates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FloatCC {
  /// Equal.
  Oeq,
  /// Not equal.
  One,
  /// Less-than.
  Olt,
  /// Less-or-equal.
  Ole,
  /// Greater-than.
  Ogt,
  /// Greater-or-equal.
  Oge,
}

/// An IR value: a constant, or a reference to the producer.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
  /// Integer constant (words and bools).
  Word(i64),
  /// Byte constant (chars).
  Byte(u8),
  /// Floating constant.
  Real(f64),
  /// The size of a type in cells, as a word constant.
  SizeOf(IrType),
  /// An undefined value of the given type.
  Undef(IrType),
  /// The null pointer.
  Null,
  /// A pointer to the interned string constant with this index.
  Str(u32),
  /// The result of an instruction in the current function.
  Inst(InstId),
  /// The i'th parameter of the current function.
  Param(u32),
  /// A pointer to a global variable.
  Global(GlobalId),
}

/// The callee of a [`Inst::Call`].
#[derive(Clone, Copy, Debug)]
pub enum Callee {
  /// A function defined in the module.
  Func(FuncId),
  /// A foreign declaration, dispatched to the execution engine's host
  /// registry by name.
  Foreign(ForeignId),
}

/// An instruction. Arithmetic groups come in integer and floating
/// variants; comparisons are signed.
#[derive(Clone, Debug)]
pub enum Inst {
  /// Integer add.
  Add(Value, Value),
  /// Integer subtract.
  Sub(Value, Value),
  /// Integer multiply.
  Mul(Value, Value),
  /// Signed integer divide.
  SDiv(Value, Value),
  /// Signed integer remainder.
  SRem(Value, Value),
  /// Floating add.
  FAdd(Value, Value),
  /// Floating subtract.
  FSub(Value, Value),
  /// Floating multiply.
  FMul(Value, Value),
  /// Floating divide.
  FDiv(Value, Value),
  /// Floating remainder.
  FRem(Value, Value),
  /// Signed integer compare.
  ICmp(IntCC, Value, Value),
  /// Ordered floating compare.
  FCmp(FloatCC, Value, Value),
  /// Stack allocation of one value of the type; yields a pointer.
  Alloca(IrType),
  /// Load a value of the type from a pointer.
  Load(IrType, Value),
  /// Store a value through a pointer.
  Store(Value, Value),
  /// In-bounds pointer arithmetic: the base points at `base_ty`; the
  /// first index scales by whole values, later (constant) indices step
  /// into record fields.
  Gep {
    /// The pointee type of `base`.
    base_ty: IrType,
    /// The base pointer.
    base: Value,
    /// The index list.
    idx: Vec<Value>,
  },
  /// Reinterpret a pointer at another pointee type.
  PtrCast(Value, IrType),
  /// Call a function or foreign declaration.
  Call(Callee, Vec<Value>),
  /// Unconditional branch.
  Br(BlockId),
  /// Conditional branch.
  CondBr(Value, BlockId, BlockId),
  /// Return, with a value unless the function is void.
  Ret(Option<Value>),
}

impl Inst {
  /// Whether this instruction ends a basic block.
  #[must_use] pub fn is_terminator(&self) -> bool {
    matches!(self, Inst::Br(_) | Inst::CondBr(..) | Inst::Ret(_))
  }
}

/// A basic block: a name and an instruction sequence.
#[derive(Debug, Default)]
pub struct Block {
  /// The block label.
  pub name: String,
  /// Instruction ids, in emission order.
  pub insts: Vec<InstId>,
}

/// A function under construction or finished.
#[derive(Debug)]
pub struct Function {
  /// The mangled name, unique within the module.
  pub name: String,
  /// Parameter types.
  pub params: Vec<IrType>,
  /// Return type.
  pub ret: IrType,
  /// Function attributes.
  pub attrs: FnAttrs,
  /// Per-parameter attributes, parallel to `params`.
  pub param_attrs: Vec<FnAttrs>,
  /// Block storage.
  pub blocks: IdxVec<BlockId, Block>,
  /// Block layout order; the first entry is the entry block.
  pub order: Vec<BlockId>,
  /// Instruction storage.
  pub insts: IdxVec<InstId, Inst>,
  /// Set when the function has been deleted from the module.
  pub dead: bool,
}

impl Function {
  /// The entry block.
  #[must_use] pub fn entry(&self) -> BlockId { self.order[0] }

  /// Append a new block at the end of the layout order.
  pub fn append_block(&mut self, name: &str) -> BlockId {
    let b = self.blocks.push(Block { name: name.to_owned(), insts: vec![] });
    self.order.push(b);
    b
  }

  /// Insert a new block immediately before `before` in layout order.
  pub fn insert_block_before(&mut self, before: BlockId, name: &str) -> BlockId {
    let b = self.blocks.push(Block { name: name.to_owned(), insts: vec![] });
    let at = self.order.iter().position(|&x| x == before)
      .expect("block not in layout order");
    self.order.insert(at, b);
    b
  }

  /// Remove a block from the layout order (the caller knows nothing
  /// branches to it).
  pub fn delete_block(&mut self, b: BlockId) {
    self.order.retain(|&x| x != b);
  }

  /// Append an instruction to a block and return its id.
  pub fn push_inst(&mut self, block: BlockId, inst: Inst) -> InstId {
    let id = self.insts.push(inst);
    self.blocks[block].insts.push(id);
    id
  }
}

/// A named struct whose body may be installed after creation.
#[derive(Debug)]
pub struct NamedStruct {
  /// The mangled struct name.
  pub name: String,
  /// The field types, once set.
  pub body: Option<Vec<IrType>>,
}

/// A global variable. Globals are created with an undefined initializer
/// unless constant cells are supplied.
#[derive(Debug)]
pub struct Global {
  /// The mangled name.
  pub name: String,
  /// The value type.
  pub ty: IrType,
  /// Constant word cells to initialize with, if any.
  pub init: Option<Box<[i64]>>,
}

/// A foreign function declaration; the implementation is registered
/// with the execution engine under the same name.
#[derive(Debug)]
pub struct ForeignDecl {
  /// The external name.
  pub name: String,
  /// Parameter types.
  pub params: Vec<IrType>,
  /// Return type.
  pub ret: IrType,
  /// Attributes (the allocators are no-alias).
  pub attrs: FnAttrs,
}

/// The conservative allocator entry point.
pub const ALLOC: &str = "__rb_alloc";
/// The conservative allocator for pointer-free blocks.
pub const ALLOC_ATOMIC: &str = "__rb_alloc_atomic";
/// The reallocator.
pub const REALLOC: &str = "__rb_realloc";

/// An IR module: the unit the JIT compiles and executes from.
#[derive(Debug)]
pub struct Module {
  /// The module name.
  pub name: String,
  funcs: IdxVec<FuncId, Function>,
  fn_names: HashMap<String, FuncId>,
  structs: IdxVec<StructId, NamedStruct>,
  struct_names: HashMap<String, StructId>,
  globals: IdxVec<GlobalId, Global>,
  global_names: HashMap<String, GlobalId>,
  foreigns: IdxVec<ForeignId, ForeignDecl>,
  foreign_names: HashMap<String, ForeignId>,
  strings: Vec<String>,
}

impl Module {
  /// Create a module with the allocator entry points pre-declared.
  #[must_use] pub fn new(name: &str) -> Self {
    let mut m = Module {
      name: name.to_owned(),
      funcs: IdxVec::new(),
      fn_names: HashMap::new(),
      structs: IdxVec::new(),
      struct_names: HashMap::new(),
      globals: IdxVec::new(),
      global_names: HashMap::new(),
      foreigns: IdxVec::new(),
      foreign_names: HashMap::new(),
      strings: vec![],
    };
    let byte_ptr = IrType::I8.ptr();
    m.add_foreign(ALLOC, vec![IrType::Word], byte_ptr.clone(), FnAttrs::NO_ALIAS);
    m.add_foreign(ALLOC_ATOMIC, vec![IrType::Word], byte_ptr.clone(), FnAttrs::NO_ALIAS);
    m.add_foreign(REALLOC, vec![byte_ptr.clone(), IrType::Word], byte_ptr,
      FnAttrs::NO_ALIAS);
    m
  }

  /// Add a function with empty body; the entry block is appended by
  /// the builder.
  pub fn add_function(&mut self, name: &str, params: Vec<IrType>, ret: IrType) -> FuncId {
    let n = params.len();
    let f = self.funcs.push(Function {
      name: name.to_owned(),
      params,
      ret,
      attrs: FnAttrs::empty(),
      param_attrs: vec![FnAttrs::empty(); n],
      blocks: IdxVec::new(),
      order: vec![],
      insts: IdxVec::new(),
      dead: false,
    });
    self.fn_names.insert(name.to_owned(), f);
    f
  }

  /// Delete a function: its body is dropped and its name unregistered.
  pub fn delete_function(&mut self, f: FuncId) {
    let func = &mut self.funcs[f];
    func.dead = true;
    func.blocks = IdxVec::new();
    func.order = vec![];
    func.insts = IdxVec::new();
    self.fn_names.remove(&func.name);
  }

  /// Look a live function up by name.
  #[must_use] pub fn func_by_name(&self, name: &str) -> Option<FuncId> {
    self.fn_names.get(name).copied()
  }

  /// The function for an id.
  #[must_use] pub fn func(&self, f: FuncId) -> &Function { &self.funcs[f] }

  /// Mutable access to a function.
  pub fn func_mut(&mut self, f: FuncId) -> &mut Function { &mut self.funcs[f] }

  /// Create a named struct with no body yet.
  pub fn create_struct(&mut self, name: &str) -> StructId {
    let s = self.structs.push(NamedStruct { name: name.to_owned(), body: None });
    self.struct_names.insert(name.to_owned(), s);
    s
  }

  /// Install the body of a named struct.
  pub fn set_struct_body(&mut self, s: StructId, fields: Vec<IrType>) {
    self.structs[s].body = Some(fields);
  }

  /// Look a named struct up.
  #[must_use] pub fn struct_by_name(&self, name: &str) -> Option<StructId> {
    self.struct_names.get(name).copied()
  }

  /// The struct record for an id.
  #[must_use] pub fn struct_def(&self, s: StructId) -> &NamedStruct { &self.structs[s] }

  /// Add a global with an undefined initializer.
  pub fn add_global(&mut self, name: &str, ty: IrType) -> GlobalId {
    let g = self.globals.push(Global { name: name.to_owned(), ty, init: None });
    self.global_names.insert(name.to_owned(), g);
    g
  }

  /// Add a global with constant word cells.
  pub fn add_global_init(&mut self, name: &str, ty: IrType, init: Box<[i64]>) -> GlobalId {
    let g = self.globals.push(Global { name: name.to_owned(), ty, init: Some(init) });
    self.global_names.insert(name.to_owned(), g);
    g
  }

  /// The global record for an id.
  #[must_use] pub fn global(&self, g: GlobalId) -> &Global { &self.globals[g] }

  /// Look a global up by name.
  #[must_use] pub fn global_by_name(&self, name: &str) -> Option<GlobalId> {
    self.global_names.get(name).copied()
  }

  /// Declare a foreign function.
  pub fn add_foreign(&mut self, name: &str, params: Vec<IrType>, ret: IrType,
    attrs: FnAttrs) -> ForeignId {
    let f = self.foreigns.push(ForeignDecl { name: name.to_owned(), params, ret, attrs });
    self.foreign_names.insert(name.to_owned(), f);
    f
  }

  /// The foreign declaration for an id.
  #[must_use] pub fn foreign(&self, f: ForeignId) -> &ForeignDecl { &self.foreigns[f] }

  /// Resolve a name to a callee, checking defined functions first and
  /// foreign declarations second.
  #[must_use] pub fn named_callee(&self, name: &str) -> Option<Callee> {
    if let Some(f) = self.func_by_name(name) { return Some(Callee::Func(f)) }
    self.foreign_names.get(name).map(|&f| Callee::Foreign(f))
  }

  /// Intern a string constant and return its index.
  pub fn add_string(&mut self, s: &str) -> u32 {
    let i = u32::try_from(self.strings.len()).expect("string table overflow");
    self.strings.push(s.to_owned());
    i
  }

  /// The string constant for an index.
  #[must_use] pub fn string(&self, i: u32) -> &str { &self.strings[i as usize] }

  /// The size of a type in cells.
  #[must_use] pub fn size_of(&self, ty: &IrType) -> usize {
    match ty {
      IrType::Void => 0,
      IrType::I1 | IrType::I8 | IrType::Word | IrType::F64 | IrType::Ptr(_) => 1,
      IrType::Rec(fields) => fields.iter().map(|f| self.size_of(f)).sum(),
      IrType::Named(s) => {
        let body = self.structs[*s].body.as_ref().expect("struct body not set");
        body.iter().map(|f| self.size_of(f)).sum()
      }
    }
  }

  /// The fields of a record type (anonymous or named).
  #[must_use] pub fn fields_of<'a>(&'a self, ty: &'a IrType) -> &'a [IrType] {
    match ty {
      IrType::Rec(fields) => fields,
      IrType::Named(s) =>
        self.structs[*s].body.as_ref().expect("struct body not set"),
      _ => panic!("not a record type: {ty:?}"),
    }
  }

  /// The cell offset of field `i` within a record type.
  #[must_use] pub fn offset_of(&self, ty: &IrType, i: usize) -> usize {
    self.fields_of(ty)[..i].iter().map(|f| self.size_of(f)).sum()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn modules_predeclare_the_allocators() {
    let m = Module::new("test");
    assert!(matches!(m.named_callee(ALLOC), Some(Callee::Foreign(_))));
    assert!(matches!(m.named_callee(ALLOC_ATOMIC), Some(Callee::Foreign(_))));
    assert!(matches!(m.named_callee(REALLOC), Some(Callee::Foreign(_))));
  }

  #[test]
  fn sizes_and_offsets_count_cells() {
    let mut m = Module::new("test");
    let pair = m.create_struct("pair");
    m.set_struct_body(pair, vec![IrType::Word, IrType::F64]);
    let arr = IrType::Rec(vec![IrType::Word.ptr(), IrType::Word].into());
    let outer = IrType::Rec(vec![IrType::Named(pair), arr.clone()].into());
    assert_eq!(m.size_of(&outer), 4);
    assert_eq!(m.offset_of(&outer, 1), 2);
  }

  #[test]
  fn deleted_functions_lose_their_name() {
    let mut m = Module::new("test");
    let f = m.add_function("f_1", vec![], IrType::Void);
    assert_eq!(m.func_by_name("f_1"), Some(f));
    m.delete_function(f);
    assert_eq!(m.func_by_name("f_1"), None);
    assert!(m.func(f).dead);
  }
}
