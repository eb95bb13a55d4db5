use std::cell::Cell;

use nyx::{
    ast::{
        AssignOp, ExprKind, ExtensionNode, ImportNames, InfixOp, Literal, Program, Stmt, StmtKind,
    },
    diagnostics::{Diagnostic, DiagnosticKind},
    lexer::Lexer,
    parser::{parse, ParseOutput, Parser, ParserOptions},
    registry::{Precedence, TokenRegistry},
    token::TokenKind,
};

fn parse_with(source: &str, options: ParserOptions) -> Result<ParseOutput, Diagnostic> {
    let registry = TokenRegistry::default();
    parse(Lexer::new(source, &registry), options)
}

fn parse_ok(source: &str) -> Program {
    let output = parse_with(source, ParserOptions::default()).expect("parse should not fail");
    assert!(output.errors.is_empty(), "unexpected errors: {:?}", output.errors);
    output.program
}

fn parse_errors(source: &str) -> Vec<Diagnostic> {
    parse_with(source, ParserOptions::default())
        .expect("soft mode never fails")
        .errors
}

fn single_expr(source: &str) -> ExprKind {
    let mut program = parse_ok(source);
    assert_eq!(program.statements.len(), 1, "expected one statement");
    match program.statements.remove(0).kind {
        StmtKind::Expr(expr) => expr.kind,
        other => panic!("expected expression statement, found {other:?}"),
    }
}

fn int_literal(kind: &ExprKind) -> i64 {
    match kind {
        ExprKind::Literal(Literal::Integer(n)) => *n,
        other => panic!("expected integer literal, found {other:?}"),
    }
}

#[test]
fn multiplication_binds_tighter_than_addition() {
    let ExprKind::Infix { op, left, right } = single_expr("1 + 2 * 3") else {
        panic!("expected infix");
    };
    assert_eq!(op, InfixOp::Add);
    assert_eq!(int_literal(&left.kind), 1);
    let ExprKind::Infix { op, .. } = right.kind else {
        panic!("expected nested infix");
    };
    assert_eq!(op, InfixOp::Mul);
}

#[test]
fn power_is_right_associative() {
    let ExprKind::Infix { op, left, right } = single_expr("2 ** 3 ** 2") else {
        panic!("expected infix");
    };
    assert_eq!(op, InfixOp::Pow);
    assert_eq!(int_literal(&left.kind), 2);
    assert!(matches!(right.kind, ExprKind::Infix { op: InfixOp::Pow, .. }));
}

#[test]
fn assignment_is_right_associative() {
    let ExprKind::Assign { op, target, value } = single_expr("a = b = 1") else {
        panic!("expected assignment");
    };
    assert_eq!(op, AssignOp::Assign);
    assert!(matches!(target.kind, ExprKind::Identifier(ref name) if name == "a"));
    assert!(matches!(value.kind, ExprKind::Assign { .. }));
}

#[test]
fn compound_assignment_carries_operator() {
    let ExprKind::Assign { op, .. } = single_expr("total //= 2") else {
        panic!("expected assignment");
    };
    assert_eq!(op, AssignOp::Compound(InfixOp::FloorDiv));

    let ExprKind::Assign { op, .. } = single_expr("x := 1") else {
        panic!("expected assignment");
    };
    assert_eq!(op, AssignOp::Declare);
}

#[test]
fn member_and_index_are_assignment_targets() {
    assert!(matches!(
        single_expr("point.x = 1"),
        ExprKind::Assign { ref target, .. } if matches!(target.kind, ExprKind::Member { .. })
    ));
    assert!(matches!(
        single_expr("items[0] += 1"),
        ExprKind::Assign { ref target, .. } if matches!(target.kind, ExprKind::Index { .. })
    ));
}

#[test]
fn rejects_literal_assignment_target() {
    let errors = parse_errors("1 = 2");
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.contains("invalid assignment target"));
}

#[test]
fn parses_let_variants() {
    let program = parse_ok("let mut x = 1; const y: int = 2; var z");
    let lets: Vec<(String, bool, bool)> = program
        .statements
        .iter()
        .map(|stmt| match &stmt.kind {
            StmtKind::Let {
                name,
                mutable,
                value,
            } => (name.clone(), *mutable, value.is_some()),
            other => panic!("expected let, found {other:?}"),
        })
        .collect();
    assert_eq!(
        lets,
        vec![
            ("x".to_string(), true, true),
            ("y".to_string(), false, true),
            ("z".to_string(), true, false),
        ]
    );
}

#[test]
fn parses_if_elif_else_chain() {
    let ExprKind::If { alternative, .. } = single_expr("if a { 1 } elif b { 2 } else { 3 }") else {
        panic!("expected if");
    };
    let alternative = alternative.expect("elif branch");
    assert_eq!(alternative.len(), 1);
    let StmtKind::Expr(nested) = &alternative[0].kind else {
        panic!("expected nested if statement");
    };
    assert!(matches!(
        &nested.kind,
        ExprKind::If {
            alternative: Some(_),
            ..
        }
    ));
}

#[test]
fn parses_function_literals_with_names_and_params() {
    let ExprKind::Function { name, params, body } =
        single_expr("fn add(a, b: int) -> int { return a + b }")
    else {
        panic!("expected function");
    };
    assert_eq!(name.as_deref(), Some("add"));
    assert_eq!(params, vec!["a".to_string(), "b".to_string()]);
    assert!(matches!(body[0].kind, StmtKind::Return(Some(_))));
}

#[test]
fn parses_c_style_for() {
    let program = parse_ok("for (let i = 0; i < 3; i += 1) { print(i) }");
    let StmtKind::For {
        init,
        condition,
        update,
        body,
    } = &program.statements[0].kind
    else {
        panic!("expected for");
    };
    assert!(init.is_some());
    assert!(condition.is_some());
    assert!(update.is_some());
    assert_eq!(body.len(), 1);
}

#[test]
fn parses_for_in_with_and_without_key() {
    let program = parse_ok("for x in xs { } for (k, v in m) { }");
    match &program.statements[0].kind {
        StmtKind::ForIn { key, binding, .. } => {
            assert!(key.is_none());
            assert_eq!(binding, "x");
        }
        other => panic!("expected for-in, found {other:?}"),
    }
    match &program.statements[1].kind {
        StmtKind::ForIn { key, binding, .. } => {
            assert_eq!(key.as_deref(), Some("k"));
            assert_eq!(binding, "v");
        }
        other => panic!("expected for-in, found {other:?}"),
    }
}

#[test]
fn parses_class_with_superclass() {
    let program = parse_ok(
        r#"
        class Dog : Animal {
            let legs = 4
            fn speak(self) { return "woof" }
        }
        class Cat extends Animal { }
        "#,
    );
    match &program.statements[0].kind {
        StmtKind::Class {
            name,
            superclass,
            body,
        } => {
            assert_eq!(name, "Dog");
            assert_eq!(superclass.as_deref(), Some("Animal"));
            assert_eq!(body.len(), 2);
        }
        other => panic!("expected class, found {other:?}"),
    }
    assert!(matches!(
        &program.statements[1].kind,
        StmtKind::Class { superclass: Some(parent), .. } if parent == "Animal"
    ));
}

#[test]
fn parses_import_forms() {
    let program = parse_ok(
        r#"
        import "std/math" as m
        import tools
        use std.math
        from "std/math" import sqrt, pi
        from "std/math" import *
        "#,
    );
    let kinds: Vec<&StmtKind> = program.statements.iter().map(|s| &s.kind).collect();
    assert!(matches!(
        kinds[0],
        StmtKind::Import { path, alias: Some(alias) } if path == "std/math" && alias == "m"
    ));
    assert!(matches!(kinds[1], StmtKind::Import { path, alias: None } if path == "tools"));
    assert!(matches!(kinds[2], StmtKind::Use { path } if path == "std.math"));
    assert!(matches!(
        kinds[3],
        StmtKind::FromImport { names: ImportNames::Names(names), .. } if names.len() == 2
    ));
    assert!(matches!(
        kinds[4],
        StmtKind::FromImport {
            names: ImportNames::All,
            ..
        }
    ));
}

#[test]
fn parses_try_except_finally() {
    let program = parse_ok(r#"try { raise "boom" } except err { pass } finally { x = 1 }"#);
    let StmtKind::Try {
        body,
        except,
        finally,
    } = &program.statements[0].kind
    else {
        panic!("expected try");
    };
    assert!(matches!(body[0].kind, StmtKind::Raise(Some(_))));
    let except = except.as_ref().expect("except clause");
    assert_eq!(except.binding.as_deref(), Some("err"));
    assert!(finally.is_some());
}

#[test]
fn parses_assert_with_message() {
    let program = parse_ok(r#"assert x > 0, "x must be positive""#);
    assert!(matches!(
        program.statements[0].kind,
        StmtKind::Assert {
            message: Some(_),
            ..
        }
    ));
}

#[test]
fn format_string_interpolations_are_parsed() {
    let ExprKind::FormatString(format) = single_expr(r#"f"sum={a + b}!""#) else {
        panic!("expected format string");
    };
    assert_eq!(format.pieces, vec!["sum=".to_string(), "!".to_string()]);
    assert_eq!(format.parts.len(), 1);
    assert_eq!(format.parts[0].0, 0);
    assert!(matches!(
        format.parts[0].1.kind,
        ExprKind::Infix {
            op: InfixOp::Add,
            ..
        }
    ));
}

#[test]
fn format_string_errors_are_merged() {
    let errors = parse_errors(r#"f"{1 +}""#);
    assert!(!errors.is_empty());
    assert!(errors[0].notes.iter().any(|note| note.contains("format string")));
}

#[test]
fn recovers_after_malformed_statement() {
    let output = parse_with("let = 5; let y = 2;", ParserOptions::default())
        .expect("soft mode never fails");
    assert_eq!(output.errors.len(), 1);
    assert_eq!(output.errors[0].kind, DiagnosticKind::Parser);
    assert_eq!(output.program.statements.len(), 1);
    assert!(matches!(
        &output.program.statements[0].kind,
        StmtKind::Let { name, .. } if name == "y"
    ));
}

#[test]
fn reports_missing_closing_paren() {
    let errors = parse_errors("foo(1, 2");
    assert!(errors.iter().any(|e| e.message.starts_with("expected")));
}

#[test]
fn stop_on_first_error_fails_hard() {
    let options = ParserOptions {
        stop_on_first_error: true,
        ..ParserOptions::default()
    };
    let err = parse_with("let = 5; let = 6;", options).expect_err("strict mode fails");
    assert_eq!(err.kind, DiagnosticKind::Parser);
}

#[test]
fn max_errors_caps_recorded_errors() {
    let options = ParserOptions {
        max_errors: 2,
        ..ParserOptions::default()
    };
    let output = parse_with("let = 1; let = 2; let = 3;", options).expect("soft mode");
    assert_eq!(output.errors.len(), 2);
}

#[test]
fn lexer_errors_are_reported_with_parse_errors() {
    let errors = parse_errors("let a = 1 $");
    assert!(errors.iter().any(|e| e.kind == DiagnosticKind::Lexer));
}

#[test]
fn error_hooks_observe_every_error() {
    let registry = TokenRegistry::default();
    let seen = Cell::new(0);
    let mut parser = Parser::new(
        Lexer::new("let = 1; let = 2;", &registry),
        ParserOptions::default(),
    );
    parser.register_error_hook(|_| seen.set(seen.get() + 1));
    parser.parse_program().expect("soft mode");
    assert_eq!(seen.get(), 2);
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

#[test]
fn registered_statements_extend_the_grammar() {
    let unless = TokenKind::Custom("unless".to_string());
    let registry = TokenRegistry::builder()
        .keyword("unless", unless.clone())
        .build();
    let mut parser = Parser::new(Lexer::new("unless ready", &registry), ParserOptions::default());
    parser.register_statement(unless, parse_unless);
    let program = parser.parse_program().expect("parse");
    assert!(parser.errors().is_empty());
    assert!(matches!(
        &program.statements[0].kind,
        StmtKind::Extension(node) if node.name == "unless" && node.children.len() == 1
    ));
}
