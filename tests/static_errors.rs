//! Parse- and resolve-stage diagnostics: the pipeline aborts before
//! evaluation and surfaces as many independent errors as it can.

use gravlax as lox;

use pretty_assertions::assert_eq;

use lox::interpreter::Interpreter;
use lox::parser::Parser;
use lox::resolver::Resolver;
use lox::scanner::Scanner;
use lox::stmt::Stmt;

fn parse(source: &str) -> Result<Vec<Stmt>, Vec<String>> {
    let tokens: Vec<_> = Scanner::new(source)
        .collect::<Result<_, _>>()
        .expect("source scans cleanly");

    Parser::new(tokens)
        .parse()
        .map_err(|diagnostics| diagnostics.iter().map(|e| e.to_string()).collect())
}

/// Diagnostics from the parser and resolver combined; `Ok` means the
/// program reached the evaluator-ready state.
fn check(source: &str) -> Result<(), Vec<String>> {
    let statements = parse(source)?;

    let mut sink: Vec<u8> = Vec::new();
    let mut interpreter = Interpreter::new(&mut sink);

    Resolver::new(&mut interpreter)
        .resolve(&statements)
        .map_err(|diagnostics| diagnostics.iter().map(|e| e.to_string()).collect())
}

fn expect_diagnostic(source: &str, fragment: &str) {
    match check(source) {
        Ok(()) => panic!("expected a static error for {:?}", source),
        Err(diagnostics) => assert!(
            diagnostics.iter().any(|d| d.contains(fragment)),
            "no diagnostic containing {:?} in {:?}",
            fragment,
            diagnostics
        ),
    }
}

// ── parse errors ─────────────────────────────────────────────────────

#[test]
fn missing_semicolon() {
    expect_diagnostic("print 1", "Expect ';' after value.");
}

#[test]
fn error_at_end_location() {
    let diagnostics = parse("print 1").unwrap_err();
    assert_eq!(diagnostics, vec!["[line 1] Error at end: Expect ';' after value.".to_string()]);
}

#[test]
fn error_quotes_the_offending_lexeme() {
    let diagnostics = parse("var = 1;").unwrap_err();
    assert_eq!(
        diagnostics,
        vec!["[line 1] Error at '=': Expect variable name.".to_string()]
    );
}

#[test]
fn invalid_assignment_target() {
    expect_diagnostic("1 = 2;", "Invalid assignment target.");
    expect_diagnostic("a + b = c;", "Invalid assignment target.");
}

#[test]
fn synchronize_surfaces_multiple_errors() {
    let diagnostics = parse("var = 1;\nprint +;\nvar ok = 2;").unwrap_err();
    assert_eq!(diagnostics.len(), 2);
    assert!(diagnostics[0].contains("[line 1]"));
    assert!(diagnostics[1].contains("[line 2]"));
}

#[test]
fn argument_limit() {
    let args = (0..256).map(|_| "1").collect::<Vec<_>>().join(", ");
    let source = format!("fun f() {{}} f({});", args);
    expect_diagnostic(&source, "Can't have more than 255 arguments.");
}

#[test]
fn parameter_limit() {
    let params = (0..256)
        .map(|i| format!("p{}", i))
        .collect::<Vec<_>>()
        .join(", ");
    let source = format!("fun f({}) {{}}", params);
    expect_diagnostic(&source, "Can't have more than 255 parameters.");
}

#[test]
fn break_outside_loop_is_a_parse_error() {
    expect_diagnostic("break;", "Can't use 'break' outside of a loop.");
}

#[test]
fn break_in_function_inside_loop_is_rejected() {
    expect_diagnostic(
        "while (true) { fun f() { break; } }",
        "Can't use 'break' outside of a loop.",
    );
}

#[test]
fn break_inside_loop_is_fine() {
    assert!(check("while (true) { break; }").is_ok());
    assert!(check("for (;;) { if (true) break; }").is_ok());
}

// ── resolve errors ───────────────────────────────────────────────────

#[test]
fn return_at_top_level() {
    expect_diagnostic("return 1;", "Can't return from top-level code.");
}

#[test]
fn return_value_from_initializer() {
    expect_diagnostic(
        "class A { init() { return 1; } }",
        "Can't return a value from an initializer.",
    );
    assert!(check("class A { init() { return; } }").is_ok());
}

#[test]
fn class_inheriting_from_itself() {
    expect_diagnostic("class C < C {}", "A class can't inherit from itself.");
}

#[test]
fn this_outside_class() {
    expect_diagnostic("print this;", "Can't use 'this' outside of a class.");
    expect_diagnostic(
        "fun f() { return this; }",
        "Can't use 'this' outside of a class.",
    );
}

#[test]
fn super_outside_class() {
    expect_diagnostic("super.m();", "Can't use 'super' outside of a class.");
}

#[test]
fn super_without_superclass() {
    expect_diagnostic(
        "class A { m() { super.m(); } }",
        "Can't use 'super' in a class with no superclass.",
    );
}

#[test]
fn variable_read_in_its_own_initializer() {
    expect_diagnostic(
        "{ var a = 1; { var a = a; } }",
        "Can't read local variable in its own initializer.",
    );
}

#[test]
fn duplicate_declaration_in_local_scope() {
    expect_diagnostic(
        "{ var a = 1; var a = 2; }",
        "Already a variable with this name in this scope.",
    );
}

#[test]
fn global_redeclaration_is_allowed() {
    assert!(check("var a = 1; var a = 2;").is_ok());
}

#[test]
fn resolver_accumulates_multiple_errors() {
    let diagnostics = check("return 1;\nprint this;\nclass C < C {}").unwrap_err();
    assert!(diagnostics.len() >= 3, "got: {:?}", diagnostics);
}

#[test]
fn resolve_error_format() {
    let diagnostics = check("class C < C {}").unwrap_err();
    assert_eq!(
        diagnostics,
        vec!["[line 1] Error at 'C': A class can't inherit from itself.".to_string()]
    );
}
