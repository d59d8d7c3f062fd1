//! The symbol interner.
//!
//! Identifiers, operator names and literal spellings are interned once
//! and referred to by [`Symbol`] everywhere else, so name comparisons
//! throughout inference and lowering are a single integer compare.

use hashbrown::HashMap;

use crate::types::mk_id;

mk_id! {
  /// An interned string. Two symbols obtained from the same [`Interner`]
  /// are equal iff they were interned from the same name.
  Symbol
}

/// The string interner. One per [`Compiler`](crate::Compiler); symbols
/// from different interners must not be mixed.
#[derive(Debug, Default)]
pub struct Interner {
  map: HashMap<String, Symbol>,
  names: Vec<String>,
}

impl Interner {
  /// Construct an empty interner.
  #[must_use] pub fn new() -> Self { Self::default() }

  /// Intern a string, returning the canonical [`Symbol`] for it.
  pub fn intern(&mut self, s: &str) -> Symbol {
    if let Some(&sym) = self.map.get(s) { return sym }
    let sym = Symbol(u32::try_from(self.names.len()).expect("interner overflow"));
    self.names.push(s.to_owned());
    self.map.insert(s.to_owned(), sym);
    sym
  }

  /// The printable name of a symbol.
  #[must_use] pub fn name(&self, sym: Symbol) -> &str { &self.names[sym.0 as usize] }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn interning_is_idempotent() {
    let mut i = Interner::new();
    let a = i.intern("foo");
    let b = i.intern("bar");
    assert_ne!(a, b);
    assert_eq!(i.intern("foo"), a);
    assert_eq!(i.name(b), "bar");
  }
}
