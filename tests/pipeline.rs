//! End-to-end tests: source text through scanner, parser, resolver, and
//! evaluator, asserting on captured program output.

use gravlax as lox;

use pretty_assertions::assert_eq;

use lox::interpreter::Interpreter;
use lox::parser::Parser;
use lox::resolver::Resolver;
use lox::scanner::Scanner;

/// Run `source` through the whole pipeline, returning captured stdout or
/// the first diagnostic.
fn interpret(source: &str) -> Result<String, String> {
    let mut output: Vec<u8> = Vec::new();

    {
        let mut interpreter = Interpreter::new(&mut output);

        let mut tokens = Vec::new();
        for item in Scanner::new(source) {
            tokens.push(item.map_err(|e| e.to_string())?);
        }

        let statements = Parser::new(tokens)
            .parse()
            .map_err(|diagnostics| diagnostics[0].to_string())?;

        Resolver::new(&mut interpreter)
            .resolve(&statements)
            .map_err(|diagnostics| diagnostics[0].to_string())?;

        interpreter
            .interpret(&statements)
            .map_err(|e| e.to_string())?;
    }

    Ok(String::from_utf8(output).expect("program output is UTF-8"))
}

fn expect_output(source: &str, expected: &str) {
    match interpret(source) {
        Ok(output) => assert_eq!(output, expected),
        Err(e) => panic!("unexpected error for {:?}: {}", source, e),
    }
}

fn expect_runtime_error(source: &str, fragment: &str) {
    match interpret(source) {
        Ok(output) => panic!("expected error for {:?}, got output {:?}", source, output),
        Err(e) => assert!(
            e.contains(fragment),
            "error {:?} does not contain {:?}",
            e,
            fragment
        ),
    }
}

// ── arithmetic and printing ──────────────────────────────────────────

#[test]
fn precedence() {
    expect_output("print 1 + 2 * 3;", "7\n");
    expect_output("print (1 + 2) * 3;", "9\n");
    expect_output("print -6 / 2 - 1;", "-4\n");
}

#[test]
fn string_concatenation() {
    expect_output(
        "var a = \"hi\"; var b = a; print a + \", \" + b + \"!\";",
        "hi, hi!\n",
    );
}

#[test]
fn number_formatting() {
    expect_output("print 0.5 + 0.25;", "0.75\n");
    expect_output("print 2.5 * 2;", "5\n");
    expect_output("print 10 / 4;", "2.5\n");
}

#[test]
fn division_by_zero_is_ieee() {
    expect_output("print 1 / 0;", "inf\n");
    expect_output("print -1 / 0;", "-inf\n");
    expect_output("print 0 / 0;", "NaN\n");
}

#[test]
fn comparisons_and_equality() {
    expect_output("print 1 < 2;", "true\n");
    expect_output("print 2 <= 1;", "false\n");
    expect_output("print \"a\" == \"a\";", "true\n");
    expect_output("print 1 == \"1\";", "false\n");
    expect_output("print nil == nil;", "true\n");
    expect_output("print nil != 0;", "true\n");
}

#[test]
fn unary_operators() {
    expect_output("print -(-3);", "3\n");
    expect_output("print !nil;", "true\n");
    expect_output("print !0;", "false\n");
}

// ── variables and scope ──────────────────────────────────────────────

#[test]
fn block_shadowing() {
    expect_output(
        "var a = 1; { var a = 2; print a; } print a;",
        "2\n1\n",
    );
}

#[test]
fn assignment_is_an_expression() {
    expect_output("var a = 1; print a = 2;", "2\n");
}

#[test]
fn inner_block_assigns_outer() {
    expect_output("var a = 1; { a = a + 1; } print a;", "2\n");
}

// ── control flow ─────────────────────────────────────────────────────

#[test]
fn if_else() {
    expect_output("if (1 < 2) print \"yes\"; else print \"no\";", "yes\n");
    expect_output("if (nil) print \"yes\"; else print \"no\";", "no\n");
}

#[test]
fn while_loop() {
    expect_output(
        "var i = 0; while (i < 3) { print i; i = i + 1; }",
        "0\n1\n2\n",
    );
}

#[test]
fn for_loop_desugars_to_while() {
    expect_output("for (var i = 0; i < 3; i = i + 1) print i;", "0\n1\n2\n");
    expect_output(
        "var i = 0; for (; i < 2;) { print i; i = i + 1; }",
        "0\n1\n",
    );
}

#[test]
fn break_unwinds_innermost_loop() {
    expect_output(
        "var i = 0; for (; i < 3; i = i + 1) { if (i == 2) break; print i; }",
        "0\n1\n",
    );
    expect_output(
        "var total = 0;
         for (var i = 0; i < 3; i = i + 1) {
             for (var j = 0; j < 3; j = j + 1) {
                 if (j == 1) break;
                 total = total + 1;
             }
         }
         print total;",
        "3\n",
    );
}

#[test]
fn logical_operators_return_deciding_operand() {
    expect_output("print \"hi\" or 2;", "hi\n");
    expect_output("print nil or \"fallback\";", "fallback\n");
    expect_output("print nil and 2;", "nil\n");
    expect_output("print 1 and \"right\";", "right\n");
}

#[test]
fn short_circuit_skips_side_effects() {
    expect_output(
        "var calls = 0;
         fun touch() { calls = calls + 1; return true; }
         true or touch();
         false and touch();
         print calls;",
        "0\n",
    );
}

// ── functions and closures ───────────────────────────────────────────

#[test]
fn closure_captures_definition_environment() {
    expect_output(
        "fun make(n) { fun get() { return n; } return get; } var g = make(42); print g();",
        "42\n",
    );
}

#[test]
fn closure_sees_later_assignment() {
    expect_output(
        "var a = 1;
         fun read() { print a; }
         a = 2;
         read();",
        "2\n",
    );
}

#[test]
fn counter_closures_share_state() {
    expect_output(
        "fun counter() {
             var n = 0;
             fun inc() { n = n + 1; return n; }
             return inc;
         }
         var c = counter();
         print c();
         print c();
         var d = counter();
         print d();",
        "1\n2\n1\n",
    );
}

#[test]
fn implicit_return_is_nil() {
    expect_output("fun f() {} print f();", "nil\n");
}

#[test]
fn return_unwinds_nested_blocks() {
    expect_output(
        "fun f() { { { return 7; } } } print f();",
        "7\n",
    );
}

#[test]
fn recursion() {
    expect_output(
        "fun fib(n) { if (n < 2) return n; return fib(n - 1) + fib(n - 2); } print fib(10);",
        "55\n",
    );
}

#[test]
fn anonymous_function_expression() {
    expect_output(
        "var twice = fun (x) { return x + x; }; print twice(4);",
        "8\n",
    );
    expect_output("print fun (x) { return x; };", "<fn>\n");
}

#[test]
fn function_values_print_their_name() {
    expect_output("fun greet() {} print greet;", "<fn greet>\n");
    expect_output("print clock;", "<native fn clock>\n");
}

#[test]
fn clock_returns_a_number() {
    expect_output("print clock() > 0;", "true\n");
}

// ── classes ──────────────────────────────────────────────────────────

#[test]
fn method_call() {
    expect_output("class A { greet() { print \"hi\"; } } A().greet();", "hi\n");
}

#[test]
fn fields_shadow_methods() {
    expect_output(
        "class A { m() { print \"method\"; } }
         var a = A();
         a.m = fun () { print \"field\"; };
         a.m();",
        "field\n",
    );
}

#[test]
fn this_binds_to_the_receiver() {
    expect_output(
        "class Counter {
             init() { this.n = 0; }
             bump() { this.n = this.n + 1; return this.n; }
         }
         var c = Counter();
         c.bump();
         print c.bump();",
        "2\n",
    );
}

#[test]
fn bound_method_retains_this() {
    expect_output(
        "class Greeter {
             init(name) { this.name = name; }
             greet() { print this.name; }
         }
         var m = Greeter(\"ada\").greet;
         m();",
        "ada\n",
    );
}

#[test]
fn init_returns_the_instance() {
    expect_output(
        "class A { init() { this.x = 1; return; } }
         var a = A();
         print a.x;",
        "1\n",
    );
    expect_output(
        "class A { init() {} }
         var a = A();
         print a.init() == a;",
        "true\n",
    );
}

#[test]
fn inheritance_and_super() {
    expect_output(
        "class A { init(x) { this.x = x; } }
         class B < A { init(x) { super.init(x); this.y = x + 1; } }
         var b = B(3);
         print b.x;
         print b.y;",
        "3\n4\n",
    );
}

#[test]
fn inherited_methods_dispatch_through_the_chain() {
    expect_output(
        "class A { who() { return \"A\"; } name() { return this.who(); } }
         class B < A { who() { return \"B\"; } }
         print B().name();",
        "B\n",
    );
}

#[test]
fn super_skips_the_overriding_method() {
    expect_output(
        "class A { m() { print \"A\"; } }
         class B < A { m() { super.m(); print \"B\"; } }
         class C < B { }
         C().m();",
        "A\nB\n",
    );
}

#[test]
fn class_and_instance_display() {
    expect_output("class A {} print A; print A();", "A\nA instance\n");
}

// ── runtime errors ───────────────────────────────────────────────────

#[test]
fn undefined_variable() {
    expect_runtime_error("print a;", "Undefined variable 'a'.");
}

#[test]
fn assignment_to_undefined_global() {
    expect_runtime_error("a = 1;", "Undefined variable 'a'.");
}

#[test]
fn arithmetic_type_errors() {
    expect_runtime_error("\"x\" - 1;", "operands must be numbers");
    expect_runtime_error("1 + \"x\";", "operands must be two numbers or two strings");
    expect_runtime_error("-\"x\";", "operand must be a number");
}

#[test]
fn runtime_errors_carry_line_numbers() {
    expect_runtime_error("var a = 1;\n\"x\" - a;", "[line 2]");
}

#[test]
fn only_callables_can_be_called() {
    expect_runtime_error("\"not a fn\"();", "Can only call functions and classes.");
}

#[test]
fn arity_mismatch() {
    expect_runtime_error("fun f(a, b) {} f(1);", "Expected 2 arguments but got 1.");
    expect_runtime_error("clock(1);", "Expected 0 arguments but got 1.");
}

#[test]
fn property_access_on_non_instances() {
    expect_runtime_error("true.field;", "Only instances have properties.");
    expect_runtime_error("\"s\".field = 1;", "Only instances have fields.");
}

#[test]
fn undefined_property() {
    expect_runtime_error("class A {} A().nope;", "Undefined property 'nope'.");
}

#[test]
fn missing_super_method() {
    expect_runtime_error(
        "class A {} class B < A { m() { super.nope(); } } B().m();",
        "Undefined property 'nope'.",
    );
}

#[test]
fn superclass_must_be_a_class() {
    expect_runtime_error("var X = 1; class B < X {}", "Superclass must be a class.");
}

// ── environment discipline ───────────────────────────────────────────

fn run_more<W: std::io::Write>(
    source: &str,
    interpreter: &mut Interpreter<W>,
) -> Result<(), lox::error::LoxError> {
    let tokens: Vec<_> = Scanner::new(source)
        .collect::<Result<_, _>>()
        .expect("scans");
    let statements = Parser::new(tokens).parse().expect("parses");
    Resolver::new(interpreter)
        .resolve(&statements)
        .expect("resolves");
    interpreter.interpret(&statements)
}

#[test]
fn globals_stay_usable_after_a_runtime_error() {
    let mut output: Vec<u8> = Vec::new();
    let mut interpreter = Interpreter::new(&mut output);

    run_more("var a = 1;", &mut interpreter).expect("defines a");
    assert!(run_more("{ var b = a; \"x\" - b; }", &mut interpreter).is_err());

    // The failed block did not leave its frame behind.
    run_more("var c = a + 1; print c;", &mut interpreter).expect("still at global scope");

    drop(interpreter);
    assert_eq!(String::from_utf8(output).expect("utf-8 output"), "2\n");
}
