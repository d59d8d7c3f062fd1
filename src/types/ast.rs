//! The abstract syntax tree.
//!
//! Nodes live in an arena and form an ordered tree through a first-child
//! pointer plus a sibling chain (`child` / `next`). Each node also
//! carries back-references into the other graphs: the symbol it names,
//! the type attached by inference, and the scope opened for it.
//!
//! Inference mutates nodes in place: it fills `ty` on every expression,
//! rewrites assignable occurrences to their `L`-tags, and records the
//! scope on block and function nodes so the code generator can re-enter
//! it.

use crate::env::ScopeId;
use crate::symbol::Symbol;
use crate::types::{mk_id, IdxVec};
use crate::types::ty::TyId;

mk_id! {
  /// An AST node handle.
  AstId
}

/// The node tag. Every assignable expression has an `L`-dual with the
/// same children, produced by the inference pass when the node occurs
/// on the left of an assignment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tag {
  /// The empty phrase (also the missing `return` operand).
  None,
  /// Machine integer literal.
  Int,
  /// Unsigned machine integer literal.
  UInt,
  /// Floating literal.
  Double,
  /// Character literal.
  Char,
  /// String literal.
  Str,
  /// Arbitrary-precision integer literal.
  Zz,
  /// Binary operator application; the operator symbol is in `sym`.
  Binop,
  /// Statement block; opens a scope.
  Block,
  /// `if .. then .. else ..` in expression position.
  IfElseExpr,
  /// `if .. then .. else ..` in statement position.
  IfElseStmt,
  /// `if .. then ..` statement.
  IfStmt,
  /// Wrapper around the consequent of an `if`.
  Then,
  /// Wrapper around the alternative of an `if`.
  Else,
  /// Assignment statement; children are the L-value and the expression.
  Assign,
  /// `while .. do ..` statement.
  WhileStmt,
  /// Wrapper around a loop body.
  Do,
  /// `break` statement.
  Break,
  /// `data` declaration.
  DataStmt,
  /// The slot list of a `data` declaration.
  DataBody,
  /// One named slot of a `data` declaration.
  DataSlot,
  /// Tuple type phrase `(t1, t2, ...)`.
  TupleType,
  /// A named type phrase.
  TypeName,
  /// `fn` declaration.
  FnStmt,
  /// The parameter list of an `fn` declaration.
  ParamBody,
  /// One named parameter.
  Param,
  /// `return` statement.
  Return,
  /// `array[t](n)` array constructor expression.
  ArrayCon,
  /// `array[t]` type phrase.
  ArrayType,
  /// Identifier expression.
  Ident,
  /// Tuple expression.
  Tuple,
  /// Slot access `e.name`.
  Slot,
  /// Array indexing `e[i]`.
  Locn,
  /// Function or constructor application.
  Appl,
  /// L-value identifier.
  LIdent,
  /// L-value (destructuring) tuple.
  LTuple,
  /// L-value slot access.
  LSlot,
  /// L-value array indexing.
  LLocn,
  /// L-value application.
  LAppl,
  /// An `fn` declaration whose signature has been processed; the body
  /// is inferred under this tag, lazily, when the first call site is
  /// lowered.
  FnBody,
}

/// One AST node. `child` heads an ordered list of children linked
/// through their `next` fields.
#[derive(Clone, Debug)]
pub struct Node {
  /// The node tag.
  pub tag: Tag,
  /// First child.
  pub child: Option<AstId>,
  /// Next sibling.
  pub next: Option<AstId>,
  /// The symbol for literals, identifiers and operators (literals keep
  /// their source spelling as the symbol name).
  pub sym: Option<Symbol>,
  /// The type, filled by inference.
  pub ty: Option<TyId>,
  /// The scope opened for this node, filled by inference on `Block` and
  /// `FnStmt` nodes.
  pub env: Option<ScopeId>,
}

/// The AST arena, with the node construction primitives the parser
/// builds trees from.
#[derive(Debug, Default)]
pub struct AstArena {
  nodes: IdxVec<AstId, Node>,
}

impl std::ops::Index<AstId> for AstArena {
  type Output = Node;
  fn index(&self, i: AstId) -> &Node { &self.nodes[i] }
}

impl std::ops::IndexMut<AstId> for AstArena {
  fn index_mut(&mut self, i: AstId) -> &mut Node { &mut self.nodes[i] }
}

impl AstArena {
  /// Construct an empty arena.
  #[must_use] pub fn new() -> Self { Self::default() }

  fn alloc(&mut self, tag: Tag) -> AstId {
    self.nodes.push(Node { tag, child: None, next: None, sym: None, ty: None, env: None })
  }

  /// A childless node.
  pub fn node0(&mut self, tag: Tag) -> AstId { self.alloc(tag) }

  /// A node with one child.
  pub fn node1(&mut self, tag: Tag, a1: AstId) -> AstId {
    let n = self.alloc(tag);
    self.nodes[n].child = Some(a1);
    n
  }

  /// A node with two children.
  pub fn node2(&mut self, tag: Tag, a1: AstId, a2: AstId) -> AstId {
    let n = self.node1(tag, a1);
    self.nodes[a1].next = Some(a2);
    n
  }

  /// A node with three children.
  pub fn node3(&mut self, tag: Tag, a1: AstId, a2: AstId, a3: AstId) -> AstId {
    let n = self.node2(tag, a1, a2);
    self.nodes[a2].next = Some(a3);
    n
  }

  /// A node with four children.
  pub fn node4(&mut self, tag: Tag, a1: AstId, a2: AstId, a3: AstId, a4: AstId) -> AstId {
    let n = self.node3(tag, a1, a2, a3);
    self.nodes[a3].next = Some(a4);
    n
  }

  /// A binary operator node.
  pub fn binop(&mut self, sym: Symbol, a1: AstId, a2: AstId) -> AstId {
    let n = self.node2(Tag::Binop, a1, a2);
    self.nodes[n].sym = Some(sym);
    n
  }

  /// A childless node carrying a symbol (identifiers, literals, slot
  /// and type names).
  pub fn symbol(&mut self, tag: Tag, sym: Symbol) -> AstId {
    let n = self.alloc(tag);
    self.nodes[n].sym = Some(sym);
    n
  }

  /// Append `next` to the end of the sibling chain starting at `head`.
  pub fn append(&mut self, head: AstId, next: AstId) {
    let mut at = head;
    while let Some(n) = self.nodes[at].next { at = n }
    self.nodes[at].next = Some(next);
  }

  /// The number of nodes in a sibling chain.
  #[must_use] pub fn count(&self, mut list: Option<AstId>) -> usize {
    let mut n = 0;
    while let Some(a) = list {
      n += 1;
      list = self.nodes[a].next;
    }
    n
  }

  /// Iterate over a sibling chain.
  pub fn iter(&self, head: Option<AstId>) -> SiblingIter<'_> {
    SiblingIter { arena: self, at: head }
  }

  /// Collect a sibling chain into a vector of ids.
  #[must_use] pub fn list(&self, head: Option<AstId>) -> Vec<AstId> { self.iter(head).collect() }

  /// The symbol of a node, which the caller knows is present.
  #[must_use] pub fn sym(&self, a: AstId) -> Symbol {
    self.nodes[a].sym.expect("node has no symbol")
  }

  /// The inferred type of a node, which the caller knows is present.
  #[must_use] pub fn ty(&self, a: AstId) -> TyId {
    self.nodes[a].ty.expect("node has no inferred type")
  }

  /// Render a tree in indented form, for debugging and tests.
  #[must_use] pub fn dump(&self, i: &crate::symbol::Interner, a: AstId) -> String {
    let mut out = String::new();
    self.dump_into(i, a, 0, &mut out);
    out
  }

  fn dump_into(&self, i: &crate::symbol::Interner, a: AstId, indent: usize, out: &mut String) {
    use std::fmt::Write;
    let node = &self.nodes[a];
    for _ in 0..indent { out.push(' ') }
    match node.sym {
      Some(s) => writeln!(out, "~ {:?} {}", node.tag, i.name(s)),
      None => writeln!(out, "~ {:?}", node.tag),
    }.expect("writing to a string");
    for c in self.list(node.child) {
      self.dump_into(i, c, indent + 3, out);
    }
  }
}

/// Iterator over a sibling chain.
pub struct SiblingIter<'a> {
  arena: &'a AstArena,
  at: Option<AstId>,
}

impl Iterator for SiblingIter<'_> {
  type Item = AstId;
  fn next(&mut self) -> Option<AstId> {
    let a = self.at?;
    self.at = self.arena[a].next;
    Some(a)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::symbol::Interner;

  #[test]
  fn children_chain_in_order() {
    let mut ast = AstArena::new();
    let mut syms = Interner::new();
    let a = ast.symbol(Tag::Int, syms.intern("1"));
    let b = ast.symbol(Tag::Int, syms.intern("2"));
    let c = ast.symbol(Tag::Int, syms.intern("3"));
    let t = ast.node3(Tag::Tuple, a, b, c);
    assert_eq!(ast.list(ast[t].child), vec![a, b, c]);
    assert_eq!(ast.count(ast[t].child), 3);
  }

  #[test]
  fn symbol_nodes_return_the_constructed_node() {
    let mut ast = AstArena::new();
    let mut syms = Interner::new();
    let s = syms.intern("x");
    let n = ast.symbol(Tag::Ident, s);
    assert_eq!(ast[n].tag, Tag::Ident);
    assert_eq!(ast.sym(n), s);
  }

  #[test]
  fn dump_indents_children() {
    let mut ast = AstArena::new();
    let mut syms = Interner::new();
    let a = ast.symbol(Tag::Int, syms.intern("1"));
    let b = ast.symbol(Tag::Int, syms.intern("2"));
    let e = ast.binop(syms.intern("+"), a, b);
    let out = ast.dump(&syms, e);
    assert_eq!(out, "~ Binop +\n   ~ Int 1\n   ~ Int 2\n");
  }
}
