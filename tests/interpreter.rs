use std::{cell::Cell, rc::Rc};

use indexmap::IndexMap;
use nyx::{
    ast::{ExtensionNode, Program, Stmt, StmtKind},
    diagnostics::{DiagnosticKind, NyxError},
    lexer::Lexer,
    parser::{Parser, ParserOptions},
    registry::{Precedence, TokenRegistry},
    runtime::{Interpreter, InterpreterOptions},
    token::TokenKind,
    value::{Value, ValueKind},
};

fn eval(source: &str) -> Value {
    let mut interpreter = Interpreter::new();
    interpreter
        .eval_source(source)
        .expect("evaluation should succeed")
}

fn eval_error(source: &str) -> NyxError {
    let mut interpreter = Interpreter::new();
    match interpreter.eval_source(source) {
        Ok(value) => panic!("expected error, received value {value}"),
        Err(err) => err,
    }
}

fn error_message(source: &str) -> String {
    match eval_error(source) {
        NyxError::Diagnostic(diag) => diag.message,
        other => panic!("expected diagnostic, found {other}"),
    }
}

fn expect_int(value: &Value) -> i64 {
    match value.0.as_ref() {
        ValueKind::Int(n) => *n,
        _ => panic!("expected Int, found {}", value.type_name()),
    }
}

fn expect_float(value: &Value) -> f64 {
    match value.0.as_ref() {
        ValueKind::Float(n) => *n,
        _ => panic!("expected Float, found {}", value.type_name()),
    }
}

fn expect_bool(value: &Value) -> bool {
    match value.0.as_ref() {
        ValueKind::Bool(b) => *b,
        _ => panic!("expected Bool, found {}", value.type_name()),
    }
}

fn expect_str(value: &Value) -> String {
    match value.0.as_ref() {
        ValueKind::String(s) => s.clone(),
        _ => panic!("expected String, found {}", value.type_name()),
    }
}

#[test]
fn evaluates_basic_arithmetic() {
    assert_eq!(expect_int(&eval("return 2 + 2;")), 4);
    assert_eq!(expect_int(&eval("(1 + 2) * 3 - 4")), 5);
    assert_eq!(expect_int(&eval("2 ** 10")), 1024);
}

#[test]
fn returns_last_expression_from_script() {
    let value = eval(
        r#"
        let x = 40
        x + 2
        "#,
    );
    assert_eq!(expect_int(&value), 42);
}

#[test]
fn top_level_return_ends_program() {
    assert_eq!(expect_int(&eval("return 1; 2")), 1);
}

#[test]
fn division_is_exact_or_float() {
    assert_eq!(expect_int(&eval("6 / 3")), 2);
    assert_eq!(expect_float(&eval("7 / 2")), 3.5);
    assert_eq!(expect_int(&eval("-7 // 2")), -4);
    assert_eq!(expect_int(&eval("-7 % 3")), 2);
    assert!(error_message("1 / 0").contains("division by zero"));
}

#[test]
fn integer_overflow_is_an_error() {
    assert!(error_message("9223372036854775807 + 1").contains("integer overflow"));
}

#[test]
fn booleans_are_not_numbers() {
    assert_eq!(
        error_message("true + 1"),
        "unknown operator: BOOLEAN + INTEGER"
    );
    assert_eq!(error_message("-true"), "unknown operator: -BOOLEAN");
}

#[test]
fn logical_operators_return_booleans() {
    assert!(expect_bool(&eval("1 && 2")));
    assert!(!expect_bool(&eval("null || false")));
    assert_eq!(expect_int(&eval("null ?? 5")), 5);
    assert_eq!(expect_int(&eval("3 ?? 5")), 3);
}

#[test]
fn short_circuit_skips_right_operand() {
    assert!(!expect_bool(&eval("false && missing")));
    assert!(expect_bool(&eval("true || missing")));
}

#[test]
fn strings_concatenate_and_compare() {
    assert_eq!(expect_str(&eval(r#""ab" + "cd""#)), "abcd");
    assert_eq!(expect_str(&eval(r#""n=" + 3"#)), "n=3");
    assert!(expect_bool(&eval(r#""a" < "b""#)));
}

#[test]
fn if_works_as_statement_and_value() {
    assert_eq!(expect_int(&eval("let x = if true { 1 } else { 2 }; x")), 1);
    assert_eq!(
        expect_int(&eval("let n = 5; if n > 10 { 1 } elif n > 3 { 2 } else { 3 }")),
        2
    );
}

#[test]
fn closures_capture_their_scope() {
    let value = eval(
        r#"
        fn make_counter() {
            let count = 0
            fn inc() {
                count += 1
                return count
            }
            return inc
        }
        let c = make_counter()
        c(); c(); c()
        "#,
    );
    assert_eq!(expect_int(&value), 3);
}

#[test]
fn recursion_works() {
    let value = eval(
        r#"
        fn fib(n) {
            if n < 2 { return n }
            return fib(n - 1) + fib(n - 2)
        }
        fib(15)
        "#,
    );
    assert_eq!(expect_int(&value), 610);
}

#[test]
fn missing_arguments_bind_null() {
    assert!(expect_bool(&eval("fn f(a, b) { b == null }; f(1)")));
}

#[test]
fn while_and_break() {
    let value = eval(
        r#"
        let i = 0
        while true {
            i += 1
            if i >= 3 { break }
        }
        i
        "#,
    );
    assert_eq!(expect_int(&value), 3);
}

#[test]
fn c_style_for_runs_update_after_continue() {
    let value = eval(
        r#"
        let s = 0
        for (let i = 0; i < 5; i += 1) {
            if i == 2 { continue }
            s += i
        }
        s
        "#,
    );
    assert_eq!(expect_int(&value), 8);
}

#[test]
fn for_in_iterates_values_and_keys() {
    assert_eq!(
        expect_int(&eval("let s = 0; for x in [1, 2, 3] { s += x }; s")),
        6
    );
    let value = eval(
        r#"
        let m = {"a": 1, "b": 2}
        let keys = ""
        let total = 0
        for (k, v in m) {
            keys = keys + k
            total += v
        }
        keys + str(total)
        "#,
    );
    assert_eq!(expect_str(&value), "ab3");
    assert_eq!(
        expect_int(&eval("let t = 0; for (i, x in [5, 6]) { t += i }; t")),
        1
    );
}

#[test]
fn break_outside_loop_is_an_error() {
    assert!(error_message("break").contains("outside of a loop"));
}

#[test]
fn arrays_support_negative_indices() {
    assert_eq!(expect_int(&eval("[1, 2, 3][-1]")), 3);
    assert!(eval("[1, 2, 3][10]").is_null());
    assert_eq!(expect_str(&eval(r#""héllo"[1]"#)), "é");
    assert_eq!(expect_int(&eval("let a = [1, 2]; a[0] = 9; a[0] + a[1]")), 11);
}

#[test]
fn maps_support_index_and_member_access() {
    let value = eval(
        r#"
        let m = {"a": 1}
        m["b"] = 2
        m.c = 3
        m.a + m["b"] + m["c"]
        "#,
    );
    assert_eq!(expect_int(&value), 6);
    assert!(eval(r#"let m = {"a": 1}; m["zzz"]"#).is_null());
}

#[test]
fn classes_with_init_and_methods() {
    let value = eval(
        r#"
        class Point {
            fn init(self, x, y) {
                self.x = x
                self.y = y
            }
            fn sum(self) { return self.x + self.y }
        }
        let p = Point(3, 4)
        p.sum()
        "#,
    );
    assert_eq!(expect_int(&value), 7);
}

#[test]
fn class_fields_have_defaults() {
    let value = eval(
        r#"
        class Counter {
            let count = 10
            fn bump() { self.count += 1 }
        }
        let c = new Counter()
        c.bump()
        c.bump()
        c.count
        "#,
    );
    assert_eq!(expect_int(&value), 12);
}

#[test]
fn inheritance_and_super() {
    let value = eval(
        r#"
        class Animal {
            fn init(self, name) { self.name = name }
            fn speak(self) { return self.name + " makes a sound" }
        }
        class Dog : Animal {
            fn speak(self) { return super.speak() + " (woof)" }
        }
        let d = Dog("Rex")
        d.speak()
        "#,
    );
    assert_eq!(expect_str(&value), "Rex makes a sound (woof)");
}

#[test]
fn undefined_attribute_is_an_error() {
    let message = error_message("class A { } let a = A(); a.missing");
    assert!(message.contains("undefined attribute `missing`"));
}

#[test]
fn try_except_binds_message() {
    let value = eval(
        r#"
        let r = ""
        try {
            raise "boom"
        } except e {
            r = e
        }
        r
        "#,
    );
    assert_eq!(expect_str(&value), "boom");
}

#[test]
fn finally_always_runs() {
    let value = eval(
        r#"
        let log = ""
        try {
            log = log + "a"
            raise "x"
        } except {
            log = log + "b"
        } finally {
            log = log + "c"
        }
        log
        "#,
    );
    assert_eq!(expect_str(&value), "abc");
}

#[test]
fn uncaught_errors_propagate_with_kind() {
    let err = eval_error("nope + 1");
    assert_eq!(err.kind(), Some(DiagnosticKind::Runtime));
    assert!(err.to_string().contains("identifier not found: nope"));
}

#[test]
fn assert_reports_message() {
    assert_eq!(error_message(r#"assert 1 > 2, "math""#), "assertion failed: math");
    assert_eq!(error_message("assert false"), "assertion failed");
}

#[test]
fn format_strings_interpolate() {
    let value = eval(r#"let name = "Nyx"; f"hello {name}, {1 + 2}!""#);
    assert_eq!(expect_str(&value), "hello Nyx, 3!");
}

#[test]
fn builtins_cover_common_operations() {
    assert_eq!(expect_int(&eval(r#"len("héllo")"#)), 5);
    assert_eq!(expect_int(&eval("len(range(1, 10, 3))")), 3);
    assert_eq!(expect_int(&eval("range(1, 10, 3)[2]")), 7);
    assert_eq!(expect_float(&eval("sum([1, 2.5])")), 3.5);
    assert_eq!(expect_int(&eval("sum([1, 2, 3])")), 6);
    assert_eq!(expect_int(&eval("min(3, 1, 2)")), 1);
    assert_eq!(expect_int(&eval("max([4, 9])")), 9);
    assert_eq!(expect_int(&eval("round(2.5)")), 2);
    assert_eq!(expect_int(&eval("round(3.5)")), 4);
    assert_eq!(expect_int(&eval(r#"int("42") + 1"#)), 43);
    assert_eq!(expect_str(&eval("type(1.5)")), "FLOAT");
    assert_eq!(expect_str(&eval(r#"str(12) + "!""#)), "12!");
    assert_eq!(expect_int(&eval("abs(-4)")), 4);
}

#[test]
fn builtin_arity_is_checked() {
    assert!(error_message("len(1, 2)").contains("wrong number of arguments to `len`"));
    assert!(error_message("range(1, 2, 0)").contains("non-zero"));
    assert!(error_message("min([])").contains("empty sequence"));
}

#[test]
fn bindings_shadow_builtins() {
    assert_eq!(expect_int(&eval("let len = 5; len")), 5);
}

#[test]
fn host_builtins_can_be_registered() {
    let mut interpreter = Interpreter::new();
    interpreter.register_builtin("double", 1, |args| {
        let n = args[0].as_int().unwrap_or_default();
        Ok(Value::int(n * 2))
    });
    let value = interpreter.eval_source("double(21)").expect("evaluation");
    assert_eq!(expect_int(&value), 42);
}

#[test]
fn imports_bind_modules() {
    assert_eq!(expect_float(&eval(r#"import "std/math"; math.sqrt(16.0)"#)), 4.0);
    assert_eq!(expect_int(&eval(r#"import "std/math" as m; m.floor(2.7)"#)), 2);
    assert!(expect_bool(&eval(r#"from "std/math" import pi; pi > 3"#)));
    assert!(expect_bool(&eval(r#"from "std/math" import *; e < pi"#)));
}

#[test]
fn unresolved_import_binds_null() {
    assert!(expect_bool(&eval(r#"import "missing/thing" as x; x == null"#)));
}

#[test]
fn importing_missing_name_is_an_error() {
    let message = error_message(r#"from "std/math" import nope"#);
    assert_eq!(message, "cannot import `nope` from `std/math`");
}

#[test]
fn resolvers_are_consulted_and_cached() {
    let calls = Rc::new(Cell::new(0));
    let seen = Rc::clone(&calls);
    let mut interpreter = Interpreter::new();
    interpreter.add_resolver(move |name| {
        if name != "greetings" {
            return None;
        }
        seen.set(seen.get() + 1);
        let mut exports = IndexMap::new();
        exports.insert("hello".to_string(), Value::string("hi"));
        Some(exports)
    });
    let value = interpreter
        .eval_source("import greetings; import greetings as g; g.hello")
        .expect("evaluation");
    assert_eq!(expect_str(&value), "hi");
    assert_eq!(calls.get(), 1);
}

#[test]
fn state_persists_between_evaluations() {
    let mut interpreter = Interpreter::new();
    interpreter.eval_source("let x = 41").expect("define");
    let value = interpreter.eval_source("x + 1").expect("read back");
    assert_eq!(expect_int(&value), 42);
}

#[test]
fn step_limit_stops_runaway_loops() {
    let mut interpreter = Interpreter::with_options(InterpreterOptions {
        max_steps: 1_000,
        ..InterpreterOptions::default()
    });
    let err = interpreter
        .eval_source("while true { }")
        .expect_err("should hit the step limit");
    assert!(matches!(err, NyxError::StepLimit { limit: 1_000 }));
    assert!(err.is_fatal());

    let err = interpreter
        .eval_source("try { while true { } } except e { 1 }")
        .expect_err("try cannot catch the step limit");
    assert!(matches!(err, NyxError::StepLimit { .. }));
}

#[test]
fn syntax_errors_surface_before_evaluation() {
    let err = eval_error("let = 1");
    assert_eq!(err.kind(), Some(DiagnosticKind::Parser));
}

#[test]
fn calling_non_function_is_an_error() {
    assert_eq!(error_message("let x = 5; x()"), "not a function: INTEGER");
}

fn parse_unless(parser: &mut Parser<'_>) -> Option<Stmt> {
    let span = parser.cur_token().span;
    parser.next_token();
    let condition = parser.parse_expression(Precedence::Lowest)?;
    Some(Stmt {
        kind: StmtKind::Extension(ExtensionNode {
            name: "unless".to_string(),
            children: vec![condition],
        }),
        span,
    })
}

fn extended_program() -> Program {
    let unless = TokenKind::Custom("unless".to_string());
    let registry = TokenRegistry::builder()
        .keyword("unless", unless.clone())
        .build();
    let mut parser = Parser::new(Lexer::new("unless ready", &registry), ParserOptions::default());
    parser.register_statement(unless, parse_unless);
    parser.parse_program().expect("parse")
}

#[test]
fn unknown_nodes_yield_null_unless_strict() {
    let program = extended_program();

    let mut lenient = Interpreter::new();
    assert!(lenient.eval(&program, None).expect("lenient").is_null());

    let mut strict = Interpreter::with_options(InterpreterOptions {
        strict_unknown_nodes: true,
        ..InterpreterOptions::default()
    });
    let err = strict.eval(&program, None).expect_err("strict mode rejects");
    assert!(err.to_string().contains("unsupported AST node: unless"));
}

fn shallow_interpreter() -> Interpreter {
    Interpreter::with_options(InterpreterOptions {
        max_call_depth: 50,
        ..InterpreterOptions::default()
    })
}

#[test]
fn runaway_recursion_is_a_runtime_error() {
    let mut interpreter = shallow_interpreter();
    let err = interpreter
        .eval_source("fn f(n) { return f(n + 1) } f(0)")
        .expect_err("recursion should be bounded");
    assert_eq!(err.kind(), Some(DiagnosticKind::Runtime));
    assert!(err.to_string().contains("maximum recursion depth exceeded"));

    let value = interpreter
        .eval_source(
            r#"
            let caught = ""
            try { f(0) } except e { caught = e }
            caught
            "#,
        )
        .expect("try catches the depth limit");
    assert_eq!(expect_str(&value), "maximum recursion depth exceeded");
}

#[test]
fn call_depth_recovers_after_failure() {
    let mut interpreter = shallow_interpreter();
    interpreter
        .eval_source("fn f(n) { return f(n + 1) } f(0)")
        .expect_err("too deep");
    let value = interpreter
        .eval_source("fn g(n) { if n == 0 { return 0 } return g(n - 1) } g(40)")
        .expect("depth is released on every exit");
    assert_eq!(expect_int(&value), 0);
}

#[test]
fn default_call_depth_stops_recursion() {
    let message = std::thread::Builder::new()
        .stack_size(64 * 1024 * 1024)
        .spawn(|| {
            let mut interpreter = Interpreter::new();
            interpreter
                .eval_source("fn f(n) { return f(n + 1) } f(0)")
                .map(|value| value.to_string())
                .unwrap_or_else(|err| err.to_string())
        })
        .expect("spawn")
        .join()
        .expect("no crash");
    assert!(message.contains("maximum recursion depth exceeded"));
}

#[test]
fn self_referential_containers_print_and_compare() {
    assert_eq!(expect_str(&eval("let a = [1]; a[0] = a; str(a)")), "[[...]]");
    assert_eq!(
        expect_str(&eval(r#"let m = {}; m["me"] = m; str(m)"#)),
        r#"{"me": {...}}"#
    );
    assert!(expect_bool(&eval("let a = [1]; a[0] = a; a == a")));
    assert!(expect_bool(&eval(
        "let a = [1]; a[0] = a; let b = [1]; b[0] = b; a == b"
    )));
    assert!(!expect_bool(&eval("let a = [1]; a[0] = a; a == [1]")));
}

#[test]
fn huge_ranges_are_rejected() {
    assert!(error_message("range(1000000000)").contains("exceeds the limit"));
    assert_eq!(expect_int(&eval("len(range(10, 0, -3))")), 4);
    assert_eq!(expect_int(&eval("len(range(0, 10, -1))")), 0);
    assert_eq!(expect_int(&eval("range(10, 0, -3)[-1]")), 1);
}

#[test]
fn bitwise_operators_match_their_compound_forms() {
    assert_eq!(expect_int(&eval("6 & 3")), 2);
    assert_eq!(expect_int(&eval("6 | 1")), 7);
    assert_eq!(expect_int(&eval("6 ^ 3")), 5);
    assert_eq!(expect_int(&eval("1 << 4")), 16);
    assert_eq!(expect_int(&eval("64 >> 2")), 16);
    assert_eq!(expect_int(&eval("1 + 2 << 1")), 6);
    assert!(expect_bool(&eval("1 | 2 == 3")));
    assert_eq!(expect_int(&eval("let a = 12; a &= 10; a")), 8);
}
