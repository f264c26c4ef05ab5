//! End-to-end tests: compile a source buffer and run it on a fresh fiber,
//! asserting on captured `echo` output.

use pretty_assertions::assert_eq;
use rak::{Error, Fiber, FiberStatus, Vm, builtins, compile};

fn run_fiber(source: &str) -> Result<Fiber, Error> {
    let closure = compile("test.rak", source)?;
    let mut vm = Vm::default();
    builtins::install(&mut vm);
    let mut fiber = vm.spawn(closure, &[])?;
    fiber.set_capture(true);
    fiber.run()?;
    Ok(fiber)
}

fn try_run(source: &str) -> Result<Vec<String>, Error> {
    run_fiber(source).map(|mut fiber| fiber.take_output())
}

fn run(source: &str) -> Vec<String> {
    try_run(source).unwrap()
}

#[test]
fn test_literal_round_trip() {
    assert_eq!(
        run(r#"echo 42; echo "x"; echo nil; echo true;"#),
        vec!["42", "x", "nil", "true"]
    );
}

#[test]
fn test_number_formatting() {
    assert_eq!(run("echo 2.5; echo 1e3; echo -0.25;"), vec!["2.5", "1000", "-0.25"]);
}

#[test]
fn test_arithmetic_and_precedence() {
    assert_eq!(run("echo 2 + 3 * 4;"), vec!["14"]);
    assert_eq!(run("echo (2 + 3) * 4;"), vec!["20"]);
    assert_eq!(run("echo 10 % 3;"), vec!["1"]);
    assert_eq!(run("echo 7 - 2 - 1;"), vec!["4"]);
    assert_eq!(run("echo 12 / 4 / 3;"), vec!["1"]);
}

#[test]
fn test_unary_operators() {
    assert_eq!(run("echo -5; echo !true; echo !nil;"), vec!["-5", "false", "true"]);
    assert_eq!(run("echo --5;"), vec!["5"]);
}

#[test]
fn test_comparisons() {
    assert_eq!(
        run("echo 1 < 2; echo 2 <= 2; echo 3 > 4; echo 3 >= 4;"),
        vec!["true", "true", "false", "false"]
    );
    assert_eq!(run(r#"echo "ab" < "ba";"#), vec!["true"]);
}

#[test]
fn test_short_circuit() {
    // The right operand would fault at runtime; it must never execute.
    assert_eq!(run("echo false && 1 / 0;"), vec!["false"]);
    assert_eq!(run("echo true || 1 / 0;"), vec!["true"]);
    assert_eq!(run("echo true && false;"), vec!["false"]);
    assert_eq!(run("echo false || false || true;"), vec!["true"]);
}

#[test]
fn test_structural_equality() {
    assert_eq!(run("echo [1, 2] == [1, 2];"), vec!["true"]);
    assert_eq!(run("echo [1, 2] == [2, 1];"), vec!["false"]);
    assert_eq!(run("echo {a: 1} == {a: 1};"), vec!["true"]);
    assert_eq!(run("echo {a: 1} == {a: 2};"), vec!["false"]);
    assert_eq!(run(r#"echo 1 == "1";"#), vec!["false"]);
    assert_eq!(run("echo 0..2 == 0..2;"), vec!["true"]);
}

#[test]
fn test_string_and_array_concat() {
    assert_eq!(run(r#"echo "foo" + "bar";"#), vec!["foobar"]);
    assert_eq!(run("echo [1] + [2, 3];"), vec!["[1, 2, 3]"]);
}

#[test]
fn test_range_indexing() {
    assert_eq!(run("let r = 0..3; echo r[0]; echo r[2];"), vec!["0", "2"]);
    assert_eq!(
        try_run("let r = 0..3; echo r[3];").unwrap_err(),
        Error::IndexOutOfRange("range")
    );
}

#[test]
fn test_array_indexing() {
    assert_eq!(run("let a = [[1, 2], [3, 4]]; echo a[1][0];"), vec!["3"]);
    assert_eq!(
        try_run("echo [1][1];").unwrap_err(),
        Error::IndexOutOfRange("array")
    );
    assert!(matches!(
        try_run("echo [1][0.5];").unwrap_err(),
        Error::TypeError(_)
    ));
}

#[test]
fn test_record_fields() {
    assert_eq!(run("let r = {a: 1, b: 2}; echo r.a; echo r.b;"), vec!["1", "2"]);
    // A missing field yields nil.
    assert_eq!(run("let r = {a: 1}; echo r.c;"), vec!["nil"]);
    // Duplicate names in a literal keep the first position, last value.
    assert_eq!(run("let r = {a: 1, a: 2}; echo r;"), vec!["{a: 2}"]);
}

#[test]
fn test_aggregate_printing() {
    assert_eq!(run("echo [1, [2, 3]];"), vec!["[1, [2, 3]]"]);
    assert_eq!(run("echo 0..3;"), vec!["0..3"]);
    assert_eq!(run("echo {a: 1, b: nil};"), vec!["{a: 1, b: nil}"]);
    assert_eq!(run("echo [];"), vec!["[]"]);
}

#[test]
fn test_if_expression() {
    assert_eq!(run("let x = if 1 < 2 {10} else {20}; echo x;"), vec!["10"]);
    assert_eq!(run("let x = if 1 > 2 {10} else {20}; echo x;"), vec!["20"]);
    // A missing else contributes nil.
    assert_eq!(run("let x = if false {10}; echo x;"), vec!["nil"]);
    assert_eq!(
        run("let x = if false {1} else if true {2} else {3}; echo x;"),
        vec!["2"]
    );
}

#[test]
fn test_if_statement_chain() {
    let source = r#"
        let x = 5;
        if x < 3 { echo "small"; } else if x < 10 { echo "mid"; } else { echo "big"; }
    "#;
    assert_eq!(run(source), vec!["mid"]);

    assert_eq!(run("if true { echo 1; }"), vec!["1"]);
    assert_eq!(run("if false { echo 1; }"), Vec::<String>::new());
}

#[test]
fn test_let_and_shadowing() {
    assert_eq!(
        run("let x = 1; { let x = 2; echo x; } echo x;"),
        vec!["2", "1"]
    );
    assert_eq!(run("let x; echo x;"), vec!["nil"]);
}

#[test]
fn test_duplicate_local_fails_to_compile() {
    assert!(matches!(
        try_run("let x = 1; let x = 2;").unwrap_err(),
        Error::DuplicateLocal { .. }
    ));
}

#[test]
fn test_division_by_zero() {
    assert_eq!(try_run("echo 1 / 0;").unwrap_err(), Error::DivisionByZero);
    assert_eq!(try_run("echo 1 % 0;").unwrap_err(), Error::DivisionByZero);
}

#[test]
fn test_type_errors() {
    assert!(matches!(
        try_run(r#"echo 1 + "a";"#).unwrap_err(),
        Error::TypeError(_)
    ));
    assert!(matches!(
        try_run("echo nil < 1;").unwrap_err(),
        Error::TypeError(_)
    ));
    assert!(matches!(
        try_run("echo -nil;").unwrap_err(),
        Error::TypeError(_)
    ));
    assert!(matches!(
        try_run("echo nil.field;").unwrap_err(),
        Error::TypeError(_)
    ));
}

#[test]
fn test_stack_balance_after_statements() {
    // Slot 0 holds the top-level closure; every statement leaves the
    // stack at its pre-execution height.
    let fiber = run_fiber("echo 1; 1 + 2; { let t = 9; } if true { echo 2; }").unwrap();
    assert_eq!(fiber.stack_len(), 1);

    // Top-level locals stay live until the fiber ends.
    let fiber = run_fiber("let x = 1; let y = 2;").unwrap();
    assert_eq!(fiber.stack_len(), 3);
}

#[test]
fn test_runtime_error_leaves_fiber_inspectable() {
    let closure = compile("test.rak", "echo 1 / 0;").unwrap();
    let vm = Vm::default();
    let mut fiber = vm.spawn(closure, &[]).unwrap();
    fiber.set_capture(true);
    assert_eq!(fiber.run().unwrap_err(), Error::DivisionByZero);
    assert_eq!(fiber.status(), FiberStatus::Suspended);
    // The instruction pointer parks on the faulting DIV.
    assert_eq!(fiber.frame_ip(), Some(2));
    // Resuming re-executes the faulting instruction.
    assert_eq!(fiber.resume().unwrap_err(), Error::DivisionByZero);
}

#[test]
fn test_escape_sequences() {
    assert_eq!(run(r#"echo "a\tb";"#), vec!["a\tb"]);
    assert_eq!(run(r#"echo "say \"hi\"";"#), vec!["say \"hi\""]);
}
