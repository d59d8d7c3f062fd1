//! End-to-end evaluation: parse, infer, lower, execute, print.

use pretty_assertions::assert_eq;
use rubidium::Compiler;

fn eval(src: &str) -> String {
  Compiler::new().eval(src).expect("phrase evaluates")
}

fn eval_err(src: &str) -> rubidium::Error {
  Compiler::new().eval(src).expect_err("phrase is rejected")
}

#[test]
fn arithmetic_with_precedence() {
  assert_eq!(eval("1 + 2 * 3"), "7i");
}

#[test]
fn tuple_destructuring() {
  assert_eq!(eval("a = (1, 2); (x, y) = a; x - y"), "-1i");
}

#[test]
fn data_declaration_and_slot_access() {
  assert_eq!(eval("data Pair { x int, y int }; p = Pair(3, 4); p.x + p.y"), "7i");
}

#[test]
fn recursive_factorial() {
  assert_eq!(
    eval("fn f(n int) -> int { if n <= 1 then return 1 else return n * f(n - 1) }; f(5)"),
    "120i"
  );
}

#[test]
fn array_fill_and_index() {
  assert_eq!(
    eval("a = array[int](3); i = 0; while i < 3 do { a[i] = i * i; i = i + 1 }; a[2]"),
    "4i"
  );
}

#[test]
fn bignum_multiplication() {
  assert_eq!(
    eval("z = ZZ(\"100000000000000000000\"); z * z"),
    "10000000000000000000000000000000000000000"
  );
}

#[test]
fn scalar_assignment_reads_back() {
  assert_eq!(eval("x = 5; x"), "5i");
}

#[test]
fn unsigned_words_print_with_u_suffix() {
  assert_eq!(eval("3u + 4u"), "7u");
}

#[test]
fn doubles_print_in_shortest_form() {
  assert_eq!(eval("1.5 * 2.0"), "3");
  assert_eq!(eval("1.5 + 1.0"), "2.5");
}

#[test]
fn comparisons_yield_booleans() {
  assert_eq!(eval("1 < 2"), "true");
  assert_eq!(eval("2.5 <= 1.5"), "false");
}

#[test]
fn chars_and_strings_are_quoted() {
  assert_eq!(eval("'a'"), "'a'");
  assert_eq!(eval("'\\n'"), "'\\n'");
  assert_eq!(eval("\"hello\""), "\"hello\"");
}

#[test]
fn tuples_and_data_values_print_componentwise() {
  assert_eq!(eval("(1, 2.5)"), "(1i, 2.5)");
  assert_eq!(eval("data Pair { x int, y int }; Pair(3, 4)"), "Pair(3i, 4i)");
}

#[test]
fn arrays_print_as_the_word_array() {
  assert_eq!(eval("array[int](2)"), "array");
}

#[test]
fn statements_evaluate_to_none() {
  assert_eq!(eval("x = 1"), "none");
  assert_eq!(eval("data Empty { e int }"), "none");
}

#[test]
fn block_takes_the_type_of_its_last_statement() {
  assert_eq!(eval("{ 1; 2 }"), "2i");
}

#[test]
fn if_else_in_expression_position() {
  assert_eq!(eval("x = if 1 < 2 then 3 else 4; x"), "3i");
  assert_eq!(eval("x = if 2 < 1 then 3 else 4; x"), "4i");
}

#[test]
fn while_loops_honor_break() {
  assert_eq!(
    eval("i = 0; while i < 100 do { i = i + 1; if i == 3 then break }; i"),
    "3i"
  );
}

#[test]
fn functions_overload_on_argument_types() {
  let mut c = Compiler::new();
  c.eval("fn g(x int) -> int { return x + 1 }").unwrap();
  c.eval("fn g(x double) -> double { return x * 2.0 }").unwrap();
  assert_eq!(c.eval("g(2)").unwrap(), "3i");
  assert_eq!(c.eval("g(1.5)").unwrap(), "3");
}

#[test]
fn mutual_recursion_resolves_through_the_global_scope() {
  let mut c = Compiler::new();
  c.eval("fn even(n int) -> int { if n == 0 then return 1 else return odd(n - 1) }")
    .unwrap();
  c.eval("fn odd(n int) -> int { if n == 0 then return 0 else return even(n - 1) }")
    .unwrap();
  assert_eq!(c.eval("even(4)").unwrap(), "1i");
  assert_eq!(c.eval("odd(4)").unwrap(), "0i");
}

#[test]
fn data_assignment_copies_the_value() {
  assert_eq!(
    eval("data Pair { x int, y int }; p = Pair(1, 2); q = p; p.x = 9; q.x"),
    "1i"
  );
}

#[test]
fn array_assignment_reallocates_and_copies() {
  let src = "a = array[int](3); b = array[int](5); \
             i = 0; while i < 5 do { b[i] = i; i = i + 1 }; \
             a = b; b[4] = 9; a[4]";
  assert_eq!(eval(src), "4i");
}

#[test]
fn swap_exchanges_structured_values() {
  let src = "data Pair { x int, y int }; p = Pair(1, 2); q = Pair(3, 4); \
             swap(p, q); p.x";
  assert_eq!(eval(src), "3i");
}

#[test]
fn bignum_constructors_compare_and_copy() {
  assert_eq!(eval("ZZ(\"5\") < ZZ(\"7\")"), "true");
  assert_eq!(eval("z = ZZ(\"5\"); w = ZZ(\"7\"); w = z; w == ZZ(\"5\")"), "true");
}

#[test]
fn oversized_literals_evaluate_as_bignums() {
  assert_eq!(eval("100000000000000000000"), "100000000000000000000");
}

#[test]
fn break_outside_a_loop_is_rejected() {
  assert!(matches!(eval_err("break"), rubidium::Error::Lower(_)));
}

#[test]
fn return_outside_a_function_is_rejected() {
  assert!(matches!(eval_err("return 1"), rubidium::Error::Infer(_)));
}

#[test]
fn return_type_mismatch_is_rejected_at_first_call() {
  let mut c = Compiler::new();
  c.eval("fn f() -> int { return 1.5 }").unwrap();
  assert!(matches!(c.eval("f()"), Err(rubidium::Error::Lower(_))));
}

#[test]
fn condition_must_be_boolean() {
  assert!(matches!(eval_err("if 1 then 2 else 3"), rubidium::Error::Infer(_)));
}

#[test]
fn globals_survive_a_failed_phrase() {
  let mut c = Compiler::new();
  c.eval("x = 41").unwrap();
  assert!(c.eval("nosuchname").is_err());
  assert_eq!(c.eval("x + 1").unwrap(), "42i");
}

#[test]
fn rebinding_with_a_different_type_is_rejected() {
  let mut c = Compiler::new();
  c.eval("x = 1").unwrap();
  assert!(matches!(c.eval("x = 1.5"), Err(rubidium::Error::Infer(_))));
}
