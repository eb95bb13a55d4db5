use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::tempdir;

fn nyx() -> Command {
    Command::cargo_bin("nyx").expect("binary exists")
}

#[test]
fn run_hello_demo() {
    nyx()
        .arg("run")
        .arg("demos/hello.ny")
        .assert()
        .success()
        .stdout(predicate::str::contains("Hello from Nyx!"))
        .stdout(predicate::str::contains("sum of 1..10 = 55"))
        .stdout(predicate::str::contains("circle area: 13"));
}

#[test]
fn eval_prints_result() {
    nyx()
        .arg("eval")
        .arg("1 + 2")
        .assert()
        .success()
        .stdout("3\n");
}

#[test]
fn eval_reports_runtime_errors() {
    nyx()
        .arg("eval")
        .arg("missing + 1")
        .assert()
        .failure()
        .stderr(predicate::str::contains("identifier not found: missing"));
}

#[test]
fn step_limit_flag_is_honored() {
    nyx()
        .args(["--max-steps", "100", "eval", "while true { }"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("100"));
}

#[test]
fn tokens_lists_each_token() {
    let dir = tempdir().expect("create temp dir");
    let script = dir.path().join("tiny.ny");
    fs::write(&script, "let x = 5").expect("write script");

    nyx()
        .arg("tokens")
        .arg(&script)
        .assert()
        .success()
        .stdout(predicate::str::contains("1:1\tkeyword `let`\t\"let\""))
        .stdout(predicate::str::contains("\"5\""));
}

#[test]
fn check_accepts_valid_scripts() {
    nyx()
        .arg("check")
        .arg("demos/hello.ny")
        .assert()
        .success()
        .stdout(predicate::str::contains("ok ("));
}

#[test]
fn check_reports_syntax_errors() {
    let dir = tempdir().expect("create temp dir");
    let script = dir.path().join("broken.ny");
    fs::write(&script, "let = 5\nlet y = (1 + \n").expect("write script");

    nyx()
        .arg("check")
        .arg(&script)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("broken.ny"));
}

#[test]
fn trace_demo_reports_use_after_move() {
    nyx()
        .arg("trace")
        .arg("demos/borrow.trace")
        .assert()
        .code(1)
        .stdout(predicate::str::contains("error[E-BORROW]"))
        .stdout(predicate::str::contains("borrow.trace:11"))
        .stdout(predicate::str::contains("Errors: 1\nWarnings: 0\nInfo: 0"));
}

#[test]
fn clean_trace_exits_zero() {
    let dir = tempdir().expect("create temp dir");
    let trace = dir.path().join("clean.trace");
    fs::write(&trace, "borrow_mut a\nrelease_mut a\nmove a b\n").expect("write trace");

    nyx()
        .arg("trace")
        .arg(&trace)
        .assert()
        .success()
        .stdout(predicate::str::contains("Errors: 0"));
}

#[test]
fn malformed_trace_is_an_error() {
    let dir = tempdir().expect("create temp dir");
    let trace = dir.path().join("bad.trace");
    fs::write(&trace, "borrow_mut a\nsteal a\n").expect("write trace");

    nyx()
        .arg("trace")
        .arg(&trace)
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid trace line 2"));
}

#[test]
fn runaway_recursion_fails_cleanly() {
    nyx()
        .args(["eval", "fn f(n) { return f(n + 1) } f(0)"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("maximum recursion depth exceeded"));
}
