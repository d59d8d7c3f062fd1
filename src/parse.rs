//! The lexer and parser for the surface syntax.
//!
//! Hand-written recursive descent over a token vector, producing the
//! untyped AST through the arena construction primitives. The parser
//! marks L-value tags only for the degenerate destructuring case (a
//! tuple on the left of `=` becomes `LTuple`); all other L-value
//! rewriting belongs to the inference pass.
//!
//! Integer literals that do not fit the machine word lex as
//! arbitrary-precision `ZZ` literals. Literal nodes keep their source
//! spelling as their symbol.

use crate::symbol::Interner;
use crate::types::ast::{AstArena, AstId, Tag};

/// A parse failure. Fatal to the whole input.
#[derive(Debug)]
pub enum ParseErr {
  /// A character the lexer does not recognize.
  UnexpectedChar(char),
  /// A string or character literal ran off the end of the input.
  UnterminatedLiteral,
  /// A token that does not fit the grammar at this point.
  UnexpectedToken(String),
  /// Input ended in the middle of a phrase.
  UnexpectedEof,
}

impl std::fmt::Display for ParseErr {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      ParseErr::UnexpectedChar(c) => write!(f, "unexpected character {c:?}"),
      ParseErr::UnterminatedLiteral => write!(f, "unterminated literal"),
      ParseErr::UnexpectedToken(t) => write!(f, "unexpected token {t}"),
      ParseErr::UnexpectedEof => write!(f, "unexpected end of input"),
    }
  }
}

impl std::error::Error for ParseErr {}

#[derive(Clone, Debug, PartialEq)]
enum Tok {
  Ident(String),
  Int(String),
  UInt(String),
  Zz(String),
  Double(String),
  Char(String),
  Str(String),
  LParen, RParen,
  LBrace, RBrace,
  LBracket, RBracket,
  Comma, Semi, Dot, Arrow, Assign,
  Op(&'static str),
  KIf, KThen, KElse, KWhile, KDo, KBreak, KReturn, KData, KFn, KArray,
}

fn lex(src: &str) -> Result<Vec<Tok>, ParseErr> {
  let mut toks = vec![];
  let mut it = src.chars().peekable();
  while let Some(&c) = it.peek() {
    match c {
      c if c.is_whitespace() => { it.next(); }
      '/' => {
        it.next();
        if it.peek() == Some(&'/') {
          for c in it.by_ref() { if c == '\n' { break } }
        } else {
          toks.push(Tok::Op("/"));
        }
      }
      '0'..='9' => {
        let mut text = String::new();
        while let Some(&d) = it.peek() {
          if d.is_ascii_digit() { text.push(d); it.next(); } else { break }
        }
        let mut is_double = false;
        if it.peek() == Some(&'.') {
          let mut ahead = it.clone();
          ahead.next();
          if ahead.peek().is_some_and(char::is_ascii_digit) {
            is_double = true;
            text.push('.');
            it.next();
            while let Some(&d) = it.peek() {
              if d.is_ascii_digit() { text.push(d); it.next(); } else { break }
            }
          }
        }
        if is_double {
          toks.push(Tok::Double(text));
        } else if it.peek() == Some(&'u') {
          it.next();
          toks.push(Tok::UInt(text));
        } else if text.parse::<i64>().is_ok() {
          toks.push(Tok::Int(text));
        } else {
          toks.push(Tok::Zz(text));
        }
      }
      c if c.is_alphabetic() || c == '_' => {
        let mut text = String::new();
        while let Some(&d) = it.peek() {
          if d.is_alphanumeric() || d == '_' { text.push(d); it.next(); } else { break }
        }
        toks.push(match text.as_str() {
          "if" => Tok::KIf,
          "then" => Tok::KThen,
          "else" => Tok::KElse,
          "while" => Tok::KWhile,
          "do" => Tok::KDo,
          "break" => Tok::KBreak,
          "return" => Tok::KReturn,
          "data" => Tok::KData,
          "fn" => Tok::KFn,
          "array" => Tok::KArray,
          _ => Tok::Ident(text),
        });
      }
      '\'' => {
        it.next();
        let mut text = String::new();
        loop {
          match it.next() {
            None => return Err(ParseErr::UnterminatedLiteral),
            Some('\'') if text != "\\" => break,
            Some(c) => text.push(c),
          }
        }
        toks.push(Tok::Char(text));
      }
      '"' => {
        it.next();
        let mut text = String::new();
        loop {
          match it.next() {
            None => return Err(ParseErr::UnterminatedLiteral),
            Some('"') => break,
            Some('\\') => match it.next() {
              Some('n') => text.push('\n'),
              Some('r') => text.push('\r'),
              Some('t') => text.push('\t'),
              Some('0') => text.push('\0'),
              Some('\\') => text.push('\\'),
              Some('"') => text.push('"'),
              Some('\'') => text.push('\''),
              _ => return Err(ParseErr::UnterminatedLiteral),
            },
            Some(c) => text.push(c),
          }
        }
        toks.push(Tok::Str(text));
      }
      '(' => { it.next(); toks.push(Tok::LParen) }
      ')' => { it.next(); toks.push(Tok::RParen) }
      '{' => { it.next(); toks.push(Tok::LBrace) }
      '}' => { it.next(); toks.push(Tok::RBrace) }
      '[' => { it.next(); toks.push(Tok::LBracket) }
      ']' => { it.next(); toks.push(Tok::RBracket) }
      ',' => { it.next(); toks.push(Tok::Comma) }
      ';' => { it.next(); toks.push(Tok::Semi) }
      '.' => { it.next(); toks.push(Tok::Dot) }
      '+' => { it.next(); toks.push(Tok::Op("+")) }
      '*' => { it.next(); toks.push(Tok::Op("*")) }
      '%' => { it.next(); toks.push(Tok::Op("%")) }
      '-' => {
        it.next();
        if it.peek() == Some(&'>') { it.next(); toks.push(Tok::Arrow) }
        else { toks.push(Tok::Op("-")) }
      }
      '=' => {
        it.next();
        if it.peek() == Some(&'=') { it.next(); toks.push(Tok::Op("==")) }
        else { toks.push(Tok::Assign) }
      }
      '!' => {
        it.next();
        if it.peek() == Some(&'=') { it.next(); toks.push(Tok::Op("!=")) }
        else { return Err(ParseErr::UnexpectedChar('!')) }
      }
      '<' => {
        it.next();
        if it.peek() == Some(&'=') { it.next(); toks.push(Tok::Op("<=")) }
        else { toks.push(Tok::Op("<")) }
      }
      '>' => {
        it.next();
        if it.peek() == Some(&'=') { it.next(); toks.push(Tok::Op(">=")) }
        else { toks.push(Tok::Op(">")) }
      }
      c => return Err(ParseErr::UnexpectedChar(c)),
    }
  }
  Ok(toks)
}

struct Parser<'a> {
  toks: Vec<Tok>,
  at: usize,
  syms: &'a mut Interner,
  asts: &'a mut AstArena,
}

/// Parse a source text into its top-level phrases.
pub(crate) fn parse(src: &str, syms: &mut Interner, asts: &mut AstArena)
  -> Result<Vec<AstId>, ParseErr> {
  let toks = lex(src)?;
  let mut p = Parser { toks, at: 0, syms, asts };
  let mut phrases = vec![];
  while p.peek().is_some() {
    phrases.push(p.stmt()?);
    while p.peek() == Some(&Tok::Semi) { p.bump(); }
  }
  Ok(phrases)
}

impl Parser<'_> {
  fn peek(&self) -> Option<&Tok> { self.toks.get(self.at) }

  fn bump(&mut self) -> Option<Tok> {
    let t = self.toks.get(self.at).cloned();
    if t.is_some() { self.at += 1 }
    t
  }

  fn expect(&mut self, t: &Tok) -> Result<(), ParseErr> {
    match self.bump() {
      Some(got) if got == *t => Ok(()),
      Some(got) => Err(ParseErr::UnexpectedToken(format!("{got:?}"))),
      None => Err(ParseErr::UnexpectedEof),
    }
  }

  fn ident(&mut self) -> Result<AstId, ParseErr> {
    match self.bump() {
      Some(Tok::Ident(s)) => {
        let sym = self.syms.intern(&s);
        Ok(self.asts.symbol(Tag::Ident, sym))
      }
      Some(got) => Err(ParseErr::UnexpectedToken(format!("{got:?}"))),
      None => Err(ParseErr::UnexpectedEof),
    }
  }

  fn chain(&mut self, tag: Tag, items: Vec<AstId>) -> AstId {
    match items.split_first() {
      None => self.asts.node0(tag),
      Some((&head, rest)) => {
        let mut at = head;
        for &r in rest {
          self.asts[at].next = Some(r);
          at = r;
        }
        self.asts.node1(tag, head)
      }
    }
  }

  fn stmt(&mut self) -> Result<AstId, ParseErr> {
    match self.peek() {
      Some(Tok::KData) => self.data_stmt(),
      Some(Tok::KFn) => self.fn_stmt(),
      Some(Tok::KIf) => self.if_stmt(),
      Some(Tok::KWhile) => self.while_stmt(),
      Some(Tok::KBreak) => { self.bump(); Ok(self.asts.node0(Tag::Break)) }
      Some(Tok::KReturn) => self.return_stmt(),
      Some(Tok::LBrace) => self.block(),
      _ => self.expr_or_assign(),
    }
  }

  fn block(&mut self) -> Result<AstId, ParseErr> {
    self.expect(&Tok::LBrace)?;
    let mut stmts = vec![];
    loop {
      while self.peek() == Some(&Tok::Semi) { self.bump(); }
      if self.peek() == Some(&Tok::RBrace) { break }
      if self.peek().is_none() { return Err(ParseErr::UnexpectedEof) }
      stmts.push(self.stmt()?);
    }
    self.expect(&Tok::RBrace)?;
    Ok(self.chain(Tag::Block, stmts))
  }

  fn stmt_or_block(&mut self) -> Result<AstId, ParseErr> {
    if self.peek() == Some(&Tok::LBrace) { self.block() } else { self.stmt() }
  }

  fn data_stmt(&mut self) -> Result<AstId, ParseErr> {
    self.expect(&Tok::KData)?;
    let name = self.ident()?;
    self.expect(&Tok::LBrace)?;
    let mut slots = vec![];
    while self.peek() != Some(&Tok::RBrace) {
      let slot_name = self.ident()?;
      let ty = self.type_phrase()?;
      slots.push(self.asts.node2(Tag::DataSlot, slot_name, ty));
      if self.peek() == Some(&Tok::Comma) { self.bump(); }
    }
    self.expect(&Tok::RBrace)?;
    let body = self.chain(Tag::DataBody, slots);
    Ok(self.asts.node2(Tag::DataStmt, name, body))
  }

  fn fn_stmt(&mut self) -> Result<AstId, ParseErr> {
    self.expect(&Tok::KFn)?;
    let name = self.ident()?;
    self.expect(&Tok::LParen)?;
    let mut params = vec![];
    while self.peek() != Some(&Tok::RParen) {
      let pname = self.ident()?;
      let ty = self.type_phrase()?;
      params.push(self.asts.node2(Tag::Param, pname, ty));
      if self.peek() == Some(&Tok::Comma) { self.bump(); }
    }
    self.expect(&Tok::RParen)?;
    let param_body = self.chain(Tag::ParamBody, params);
    let ret = if self.peek() == Some(&Tok::Arrow) {
      self.bump();
      self.type_phrase()?
    } else {
      let nil = self.syms.intern("nil");
      self.asts.symbol(Tag::TypeName, nil)
    };
    let body = self.block()?;
    Ok(self.asts.node4(Tag::FnStmt, name, param_body, ret, body))
  }

  fn if_stmt(&mut self) -> Result<AstId, ParseErr> {
    self.expect(&Tok::KIf)?;
    let cond = self.expr()?;
    self.expect(&Tok::KThen)?;
    let con = self.stmt_or_block()?;
    let then = self.asts.node1(Tag::Then, con);
    if self.peek() == Some(&Tok::KElse) {
      self.bump();
      let alt = self.stmt_or_block()?;
      let els = self.asts.node1(Tag::Else, alt);
      Ok(self.asts.node3(Tag::IfElseStmt, cond, then, els))
    } else {
      Ok(self.asts.node2(Tag::IfStmt, cond, then))
    }
  }

  fn while_stmt(&mut self) -> Result<AstId, ParseErr> {
    self.expect(&Tok::KWhile)?;
    let cond = self.expr()?;
    self.expect(&Tok::KDo)?;
    let body = self.stmt_or_block()?;
    let doo = self.asts.node1(Tag::Do, body);
    Ok(self.asts.node2(Tag::WhileStmt, cond, doo))
  }

  fn return_stmt(&mut self) -> Result<AstId, ParseErr> {
    self.expect(&Tok::KReturn)?;
    let operand = match self.peek() {
      None | Some(Tok::Semi | Tok::RBrace) => self.asts.node0(Tag::None),
      _ => self.expr()?,
    };
    Ok(self.asts.node1(Tag::Return, operand))
  }

  fn expr_or_assign(&mut self) -> Result<AstId, ParseErr> {
    let lhs = self.expr()?;
    if self.peek() == Some(&Tok::Assign) {
      self.bump();
      // a destructuring pattern is the one L-tag the parser produces
      if self.asts[lhs].tag == Tag::Tuple {
        self.asts[lhs].tag = Tag::LTuple;
      }
      let rhs = self.expr()?;
      Ok(self.asts.node2(Tag::Assign, lhs, rhs))
    } else {
      Ok(lhs)
    }
  }

  // the operator token carries a static string, so it can be copied
  // out before the borrow on the token stream ends
  fn peek_op(&self, group: &[&str]) -> Option<&'static str> {
    match self.peek() {
      Some(&Tok::Op(op)) if group.contains(&op) => Some(op),
      _ => None,
    }
  }

  fn expr(&mut self) -> Result<AstId, ParseErr> {
    let lhs = self.additive()?;
    if let Some(op) = self.peek_op(&["==", "!=", "<=", ">=", "<", ">"]) {
      let sym = self.syms.intern(op);
      self.bump();
      let rhs = self.additive()?;
      return Ok(self.asts.binop(sym, lhs, rhs))
    }
    Ok(lhs)
  }

  fn additive(&mut self) -> Result<AstId, ParseErr> {
    let mut lhs = self.multiplicative()?;
    while let Some(op) = self.peek_op(&["+", "-"]) {
      let sym = self.syms.intern(op);
      self.bump();
      let rhs = self.multiplicative()?;
      lhs = self.asts.binop(sym, lhs, rhs);
    }
    Ok(lhs)
  }

  fn multiplicative(&mut self) -> Result<AstId, ParseErr> {
    let mut lhs = self.postfix()?;
    while let Some(op) = self.peek_op(&["*", "/", "%"]) {
      let sym = self.syms.intern(op);
      self.bump();
      let rhs = self.postfix()?;
      lhs = self.asts.binop(sym, lhs, rhs);
    }
    Ok(lhs)
  }

  fn postfix(&mut self) -> Result<AstId, ParseErr> {
    let mut e = self.primary()?;
    loop {
      match self.peek() {
        Some(Tok::Dot) => {
          self.bump();
          let slot = self.ident()?;
          e = self.asts.node2(Tag::Slot, e, slot);
        }
        Some(Tok::LBracket) => {
          self.bump();
          let idx = self.expr()?;
          self.expect(&Tok::RBracket)?;
          e = self.asts.node2(Tag::Locn, e, idx);
        }
        Some(Tok::LParen) => {
          self.bump();
          let mut items = vec![e];
          while self.peek() != Some(&Tok::RParen) {
            items.push(self.expr()?);
            if self.peek() == Some(&Tok::Comma) { self.bump(); }
          }
          self.expect(&Tok::RParen)?;
          e = self.chain(Tag::Appl, items);
        }
        _ => break,
      }
    }
    Ok(e)
  }

  fn primary(&mut self) -> Result<AstId, ParseErr> {
    match self.peek().cloned() {
      Some(Tok::Int(s)) => { self.bump(); Ok(self.literal(Tag::Int, &s)) }
      Some(Tok::UInt(s)) => { self.bump(); Ok(self.literal(Tag::UInt, &s)) }
      Some(Tok::Zz(s)) => { self.bump(); Ok(self.literal(Tag::Zz, &s)) }
      Some(Tok::Double(s)) => { self.bump(); Ok(self.literal(Tag::Double, &s)) }
      Some(Tok::Char(s)) => { self.bump(); Ok(self.literal(Tag::Char, &s)) }
      Some(Tok::Str(s)) => { self.bump(); Ok(self.literal(Tag::Str, &s)) }
      Some(Tok::Ident(_)) => self.ident(),
      Some(Tok::KArray) => {
        self.bump();
        self.expect(&Tok::LBracket)?;
        let elem = self.type_phrase()?;
        self.expect(&Tok::RBracket)?;
        self.expect(&Tok::LParen)?;
        let count = self.expr()?;
        self.expect(&Tok::RParen)?;
        Ok(self.asts.node2(Tag::ArrayCon, elem, count))
      }
      Some(Tok::KIf) => {
        self.bump();
        let cond = self.expr()?;
        self.expect(&Tok::KThen)?;
        let con = self.expr()?;
        self.expect(&Tok::KElse)?;
        let alt = self.expr()?;
        Ok(self.asts.node3(Tag::IfElseExpr, cond, con, alt))
      }
      Some(Tok::LParen) => {
        self.bump();
        let first = self.expr()?;
        let mut items = vec![first];
        while self.peek() == Some(&Tok::Comma) {
          self.bump();
          if self.peek() == Some(&Tok::RParen) { break }
          items.push(self.expr()?);
        }
        self.expect(&Tok::RParen)?;
        if items.len() == 1 {
          Ok(items[0])
        } else {
          Ok(self.chain(Tag::Tuple, items))
        }
      }
      Some(got) => Err(ParseErr::UnexpectedToken(format!("{got:?}"))),
      None => Err(ParseErr::UnexpectedEof),
    }
  }

  fn literal(&mut self, tag: Tag, spelling: &str) -> AstId {
    let sym = self.syms.intern(spelling);
    self.asts.symbol(tag, sym)
  }

  fn type_phrase(&mut self) -> Result<AstId, ParseErr> {
    match self.peek().cloned() {
      Some(Tok::Ident(s)) => {
        self.bump();
        let sym = self.syms.intern(&s);
        Ok(self.asts.symbol(Tag::TypeName, sym))
      }
      Some(Tok::KArray) => {
        self.bump();
        self.expect(&Tok::LBracket)?;
        let elem = self.type_phrase()?;
        self.expect(&Tok::RBracket)?;
        Ok(self.asts.node1(Tag::ArrayType, elem))
      }
      Some(Tok::LParen) => {
        self.bump();
        let mut items = vec![self.type_phrase()?];
        while self.peek() == Some(&Tok::Comma) {
          self.bump();
          items.push(self.type_phrase()?);
        }
        self.expect(&Tok::RParen)?;
        Ok(self.chain(Tag::TupleType, items))
      }
      Some(got) => Err(ParseErr::UnexpectedToken(format!("{got:?}"))),
      None => Err(ParseErr::UnexpectedEof),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::symbol::Interner;
  use crate::types::ast::AstArena;

  fn parse_one(src: &str) -> (Interner, AstArena, AstId) {
    let mut syms = Interner::new();
    let mut asts = AstArena::new();
    let phrases = parse(src, &mut syms, &mut asts).expect("parses");
    assert_eq!(phrases.len(), 1, "expected one phrase");
    (syms, asts, phrases[0])
  }

  #[test]
  fn precedence_nests_multiplication_under_addition() {
    let (syms, asts, e) = parse_one("1 + 2 * 3");
    assert_eq!(asts[e].tag, Tag::Binop);
    assert_eq!(syms.name(asts.sym(e)), "+");
    let lhs = asts[e].child.unwrap();
    let rhs = asts[lhs].next.unwrap();
    assert_eq!(asts[lhs].tag, Tag::Int);
    assert_eq!(asts[rhs].tag, Tag::Binop);
    assert_eq!(syms.name(asts.sym(rhs)), "*");
  }

  #[test]
  fn destructuring_lhs_becomes_an_ltuple() {
    let (_, asts, a) = parse_one("(x, y) = a");
    assert_eq!(asts[a].tag, Tag::Assign);
    let lhs = asts[a].child.unwrap();
    assert_eq!(asts[lhs].tag, Tag::LTuple);
    let first = asts[lhs].child.unwrap();
    assert_eq!(asts[first].tag, Tag::Ident);
  }

  #[test]
  fn oversized_int_literals_lex_as_bignums() {
    let (syms, asts, e) = parse_one("100000000000000000000");
    assert_eq!(asts[e].tag, Tag::Zz);
    assert_eq!(syms.name(asts.sym(e)), "100000000000000000000");
  }

  #[test]
  fn fn_declarations_carry_params_ret_and_body() {
    let (syms, asts, f) = parse_one("fn f(n int) -> int { return n }");
    assert_eq!(asts[f].tag, Tag::FnStmt);
    let name = asts[f].child.unwrap();
    let params = asts[name].next.unwrap();
    let ret = asts[params].next.unwrap();
    let body = asts[ret].next.unwrap();
    assert_eq!(syms.name(asts.sym(name)), "f");
    assert_eq!(asts[params].tag, Tag::ParamBody);
    assert_eq!(asts[ret].tag, Tag::TypeName);
    assert_eq!(asts[body].tag, Tag::Block);
  }

  #[test]
  fn phrases_split_at_top_level_semicolons() {
    let mut syms = Interner::new();
    let mut asts = AstArena::new();
    let phrases = parse("a = 1; while a < 3 do { a = a + 1 }; a",
      &mut syms, &mut asts).expect("parses");
    assert_eq!(phrases.len(), 3);
    assert_eq!(asts[phrases[1]].tag, Tag::WhileStmt);
  }

  #[test]
  fn array_constructor_and_indexing() {
    let (_, asts, a) = parse_one("array[int](3)");
    assert_eq!(asts[a].tag, Tag::ArrayCon);
    let (_, asts, e) = parse_one("a[0]");
    assert_eq!(asts[e].tag, Tag::Locn);
  }

  #[test]
  fn data_declaration_shape() {
    let (syms, asts, d) = parse_one("data Pair { x int, y int }");
    assert_eq!(asts[d].tag, Tag::DataStmt);
    let name = asts[d].child.unwrap();
    let body = asts[name].next.unwrap();
    assert_eq!(syms.name(asts.sym(name)), "Pair");
    assert_eq!(asts.count(asts[body].child), 2);
    let slot = asts[body].child.unwrap();
    assert_eq!(asts[slot].tag, Tag::DataSlot);
  }
}
