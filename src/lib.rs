//! A small just-in-time compiler for an expression-oriented, statically
//! typed language.
//!
//! Source text is parsed into an untyped AST; one inference pass
//! annotates every node with a type, resolves overloaded operators and
//! calls, and marks assignable occurrences; the code generator lowers
//! the typed tree into a low-level IR module with full aggregate value
//! semantics (construction, copies, destructors, user lifecycle hooks);
//! the reference execution engine runs the result and the value is
//! rendered for display.
//!
//! All state lives in an explicit [`Compiler`] value: the symbol
//! interner, the type and AST arenas, the scope chain and the JIT
//! context. The compiler is single-threaded and stateful; a failed
//! phrase aborts cleanly and leaves the accumulated globals usable.
//!
//! ```
//! let mut compiler = rubidium::Compiler::new();
//! assert_eq!(compiler.eval("1 + 2 * 3").unwrap(), "7i");
//! ```

pub mod build_ir;
pub mod env;
pub mod exec;
mod ffi;
pub mod infer;
pub mod locals;
pub mod parse;
mod print;
pub mod symbol;
pub mod types;

use tracing::debug;

use crate::build_ir::{Jit, LowerErr};
use crate::env::Envs;
use crate::exec::ExecErr;
use crate::infer::InferErr;
use crate::parse::ParseErr;
use crate::symbol::Interner;
use crate::types::ast::{AstArena, AstId};
use crate::types::ty::TyStore;

/// Compiler configuration.
#[derive(Clone, Copy, Debug)]
pub struct Config {
  /// Run the per-function pass pipeline after lowering.
  pub optimize: bool,
}

impl Default for Config {
  fn default() -> Self { Config { optimize: true } }
}

/// Any failure while evaluating a phrase. All errors are fatal to the
/// phrase and leave the compiler usable.
#[derive(Debug)]
pub enum Error {
  /// The input did not parse.
  Parse(ParseErr),
  /// Type inference rejected the phrase.
  Infer(InferErr),
  /// Lowering to IR failed.
  Lower(LowerErr),
  /// The execution engine hit an internal invariant.
  Exec(ExecErr),
}

impl std::fmt::Display for Error {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Error::Parse(e) => write!(f, "{e}"),
      Error::Infer(e) => write!(f, "{e}"),
      Error::Lower(e) => write!(f, "{e}"),
      Error::Exec(e) => write!(f, "{e}"),
    }
  }
}

impl std::error::Error for Error {
  fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
    match self {
      Error::Parse(e) => Some(e),
      Error::Infer(e) => Some(e),
      Error::Lower(e) => Some(e),
      Error::Exec(e) => Some(e),
    }
  }
}

impl From<ParseErr> for Error {
  fn from(e: ParseErr) -> Self { Error::Parse(e) }
}
impl From<InferErr> for Error {
  fn from(e: InferErr) -> Self { Error::Infer(e) }
}
impl From<LowerErr> for Error {
  fn from(e: LowerErr) -> Self { Error::Lower(e) }
}

// The borrow split handed to the passes: inference and lowering both
// work against the interner, type store, AST arena and scope chain.
pub(crate) struct Cx<'a> {
  pub(crate) syms: &'a mut Interner,
  pub(crate) tys: &'a mut TyStore,
  pub(crate) asts: &'a mut AstArena,
  pub(crate) envs: &'a mut Envs,
}

/// The compiler: all process state, explicitly threaded.
pub struct Compiler {
  syms: Interner,
  tys: TyStore,
  asts: AstArena,
  envs: Envs,
  jit: Jit,
}

impl Compiler {
  /// A compiler with the default configuration.
  #[must_use] pub fn new() -> Self { Self::with_config(Config::default()) }

  /// A compiler with the given configuration. The global scope is
  /// populated with the primitive types and operator generics, and the
  /// `ZZ` bignum type is installed through the foreign registry.
  #[must_use] pub fn with_config(config: Config) -> Self {
    let mut syms = Interner::new();
    let mut tys = TyStore::new(&mut syms);
    let mut envs = Envs::new();
    env::install_builtins(&mut envs, &mut tys, &mut syms);
    let jit = Jit::new(config.optimize);
    let mut compiler = Compiler { syms, tys, asts: AstArena::new(), envs, jit };
    let (mut cx, jit) = compiler.split();
    ffi::install_zz(&mut cx, jit);
    compiler
  }

  fn split(&mut self) -> (Cx<'_>, &mut Jit) {
    (
      Cx {
        syms: &mut self.syms,
        tys: &mut self.tys,
        asts: &mut self.asts,
        envs: &mut self.envs,
      },
      &mut self.jit,
    )
  }

  /// Evaluate source text: each top-level phrase is inferred, wrapped
  /// in an anonymous IR function, compiled, executed and rendered.
  /// Returns the rendering of the last phrase (`none` for empty input).
  /// On error the current phrase is abandoned; globals bound by earlier
  /// phrases survive and the compiler accepts further input.
  pub fn eval(&mut self, src: &str) -> Result<String, Error> {
    let phrases = parse::parse(src, &mut self.syms, &mut self.asts)?;
    let mut out = "none".to_owned();
    for phrase in phrases {
      out = self.eval_phrase(phrase)?;
    }
    Ok(out)
  }

  fn eval_phrase(&mut self, phrase: AstId) -> Result<String, Error> {
    debug!(?phrase, "compiling top-level phrase");
    let (mut cx, jit) = self.split();
    let result = infer::infer(&mut cx, phrase)
      .map_err(Error::Infer)
      .and_then(|()| jit.exec_root(&mut cx, phrase));
    if result.is_err() {
      // abandon whatever scopes the failed phrase left open
      let global = cx.envs.global();
      cx.envs.current = global;
    }
    result
  }
}

impl Default for Compiler {
  fn default() -> Self { Self::new() }
}
