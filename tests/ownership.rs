use std::{
    sync::{Arc, Mutex},
    thread,
};

use nyx::ownership::{
    parse_trace, parse_trace_lines, validate_borrow_trace, Access, AliasAnalysis, BorrowChecker,
    BorrowKind, Destructor, EnhancedBorrowChecker, LifetimeInference, OwnershipContext,
    OwnershipError, RaiiManager, SafetyEngine, Severity, StaticVerifier, ThreadSafety,
    ThreadSafetyChecker, TraceStep, TypeRef,
};

fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn() -> Destructor) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    let make = move || -> Destructor {
        let sink = Arc::clone(&sink);
        Box::new(move |name: &str| sink.lock().expect("log").push(name.to_string()))
    };
    (log, make)
}

#[test]
fn shared_borrows_coexist_until_a_mutable_one() {
    let checker = BorrowChecker::new();
    checker.borrow_immutable("x").expect("first shared");
    checker.borrow_immutable("x").expect("second shared");
    let err = checker.borrow_mutable("x").expect_err("exclusive while shared");
    assert_eq!(
        err,
        OwnershipError::BorrowConflict {
            name: "x".into(),
            kind: BorrowKind::Mutable
        }
    );
    assert_eq!(checker.snapshot()["x"].immutable_count, 2);

    checker.release_immutable("x");
    checker.release_immutable("x");
    checker.borrow_mutable("x").expect("exclusive after release");
    assert!(checker.borrow_immutable("x").is_err());
}

#[test]
fn releasing_without_a_borrow_is_a_no_op() {
    let checker = BorrowChecker::new();
    checker.release_immutable("ghost");
    checker.release_mutable("ghost");
    checker.borrow_mutable("ghost").expect("still free");
}

#[test]
fn moved_resources_reject_borrows_and_moves() {
    let checker = BorrowChecker::new();
    checker.declare("buf", "main");
    checker.move_to("buf", "worker").expect("first move");
    assert!(checker.is_moved("buf"));
    assert_eq!(checker.owner_of("buf").as_deref(), Some("worker"));
    assert_eq!(
        checker.borrow_immutable("buf"),
        Err(OwnershipError::UseAfterMove { name: "buf".into() })
    );
    assert_eq!(
        checker.move_to("buf", "other"),
        Err(OwnershipError::AlreadyMoved { name: "buf".into() })
    );

    checker.redeclare("buf").expect("known resource");
    checker.borrow_immutable("buf").expect("usable again");
    assert!(matches!(
        checker.redeclare("missing"),
        Err(OwnershipError::UnknownResource { .. })
    ));
}

#[test]
fn borrowed_resources_cannot_move() {
    let checker = BorrowChecker::new();
    checker.borrow_immutable("x").expect("shared");
    assert_eq!(
        checker.move_to("x", "y"),
        Err(OwnershipError::MovedWhileBorrowed { name: "x".into() })
    );
    checker.end_borrow("x");
    checker.move_to("x", "y").expect("move after end_borrow");
}

#[test]
fn validators_and_move_hooks_can_veto() {
    let checker = BorrowChecker::new();
    checker.register_validator(|name, _| {
        if name.starts_with("locked_") {
            Err("resource is locked".to_string())
        } else {
            Ok(())
        }
    });
    checker.register_before_move_hook(|_, _, new_owner| {
        if new_owner == "untrusted" {
            Err("refusing transfer".to_string())
        } else {
            Ok(())
        }
    });

    let err = checker.borrow_immutable("locked_db").expect_err("vetoed");
    assert!(err.to_string().contains("resource is locked"));
    checker.borrow_immutable("open").expect("allowed");
    checker.release_immutable("open");

    assert!(matches!(
        checker.move_to("open", "untrusted"),
        Err(OwnershipError::Rejected { .. })
    ));
    assert!(!checker.is_moved("open"));
}

#[test]
fn check_methods_collect_line_tagged_errors() {
    let checker = BorrowChecker::new();
    assert!(checker.check_borrow("v", true, 3));
    assert!(!checker.check_borrow("v", false, 4));
    assert!(!checker.check_move("v", 5));
    let errors = checker.verify().expect_err("two failures");
    assert_eq!(errors.len(), 2);
    assert!(errors[0].starts_with("4: "));
    assert_eq!(errors[1], "5: cannot move borrowed variable `v`");
}

#[test]
fn traces_parse_with_comments_and_line_numbers() {
    let text = "# setup\nborrow_immut a\n\nrelease_immut a\nmove a b\n";
    let steps = parse_trace(text).expect("valid trace");
    assert_eq!(
        steps,
        vec![
            TraceStep::BorrowImmutable("a".into()),
            TraceStep::ReleaseImmutable("a".into()),
            TraceStep::Move {
                name: "a".into(),
                new_owner: "b".into()
            },
        ]
    );
    let lines: Vec<usize> = parse_trace_lines(text)
        .expect("valid trace")
        .into_iter()
        .map(|(line, _)| line)
        .collect();
    assert_eq!(lines, vec![2, 4, 5]);

    let err = parse_trace("borrow_mut a\nsteal a\n").expect_err("unknown step");
    assert!(matches!(err, OwnershipError::InvalidTrace { line: 2, .. }));
}

#[test]
fn trace_validation_reports_first_failing_step() {
    let ok = parse_trace("borrow_mut a\nrelease_mut a\nmove a b").expect("parse");
    let checker = validate_borrow_trace(&ok).expect("valid trace");
    assert!(checker.is_moved("a"));

    let bad = parse_trace("borrow_immut a\nborrow_mut a\nmove a b").expect("parse");
    let failure = validate_borrow_trace(&bad).expect_err("conflict");
    assert_eq!(failure.step, 1);
    assert!(matches!(failure.error, OwnershipError::BorrowConflict { .. }));
}

#[test]
fn context_tracks_owners_and_borrows_by_id() {
    let mut ctx = OwnershipContext::new();
    let owner = ctx.create_owner(7, "vec", 1);
    let shared = ctx
        .borrow_ref(owner, BorrowKind::Immutable, "'a", 2)
        .expect("shared");
    assert_eq!(ctx.borrowed_object(shared), Some(7));
    assert!(ctx.borrow_ref(owner, BorrowKind::Mutable, "'b", 3).is_err());
    assert!(!ctx.check_no_active_borrows(owner));

    ctx.end_borrow(shared);
    assert!(ctx.check_no_active_borrows(owner));
    let moved = ctx.move_owner(owner, "vec2", 4).expect("move");
    assert_ne!(moved, owner);
    assert!(ctx.owner(owner).expect("old owner").moved);
    assert_eq!(ctx.owner(moved).expect("new owner").object_id, 7);
    assert!(matches!(
        ctx.borrow_ref(owner, BorrowKind::Immutable, "'c", 5),
        Err(OwnershipError::UseAfterMove { .. })
    ));
    assert!(matches!(
        ctx.move_owner(99, "x", 6),
        Err(OwnershipError::UnknownOwner { id: 99 })
    ));
}

#[test]
fn expired_lifetimes_are_reported() {
    use nyx::ownership::Lifetime;

    let mut ctx = OwnershipContext::new();
    let owner = ctx.create_owner(1, "s", 1);
    ctx.borrow_with_lifetime(
        owner,
        BorrowKind::Immutable,
        Lifetime::new("'short", 2).ending_at(4),
        2,
    )
    .expect("borrow");
    assert!(ctx.validate_lifetimes(3).is_empty());
    assert_eq!(ctx.validate_lifetimes(5), vec!["expired lifetime 'short"]);
}

#[test]
fn raii_releases_once_in_order() {
    let (log, destructor) = recorder();
    let mut manager = RaiiManager::new();
    let file = manager.acquire("file", Some(destructor()), 1);
    manager.acquire("socket", Some(destructor()), 2);
    manager.acquire("lock", None, 3);
    assert_eq!(manager.active_count(), 3);
    assert_eq!(manager.get(file).map(|r| r.name()), Some("file"));

    assert!(manager.release(file));
    assert!(!manager.release(file));
    manager.release_all();
    assert_eq!(manager.active_count(), 0);
    assert_eq!(*log.lock().expect("log"), vec!["file", "socket"]);
}

#[test]
fn raii_guard_releases_on_drop() {
    let (log, destructor) = recorder();
    let mut manager = RaiiManager::new();
    {
        let guard = manager.scope("temp", Some(destructor()), 1);
        assert_eq!(guard.manager().active_count(), 1);
        assert!(log.lock().expect("log").is_empty());
    }
    assert_eq!(manager.active_count(), 0);
    assert_eq!(*log.lock().expect("log"), vec!["temp"]);
}

#[test]
fn dropping_the_manager_runs_destructors() {
    let (log, destructor) = recorder();
    {
        let mut manager = RaiiManager::new();
        manager.acquire("conn", Some(destructor()), 1);
    }
    assert_eq!(*log.lock().expect("log"), vec!["conn"]);
}

#[test]
fn thread_safety_of_types_and_references() {
    let mut checker = ThreadSafetyChecker::new();
    assert!(checker.check_send("i64") && checker.check_sync("i64"));
    assert!(!checker.check_send("Rc"));

    checker.register_type("Mutex", ThreadSafety::LOCKED);
    checker.register_type(
        "Cell",
        ThreadSafety {
            is_sync: false,
            ..ThreadSafety::PRIMITIVE
        },
    );
    assert!(checker.check_type_send(&TypeRef::reference("Mutex", BorrowKind::Immutable)));
    assert!(!checker.check_type_send(&TypeRef::reference("Cell", BorrowKind::Immutable)));
    assert!(checker.check_type_send(&TypeRef::reference("Cell", BorrowKind::Mutable)));
    assert!(!checker.check_type_sync(&TypeRef::owned("Cell")));
}

#[test]
fn unprotected_concurrent_writes_are_races() {
    let checker = ThreadSafetyChecker::new();
    let races = checker.verify_no_data_race(&[
        Access::write("counter"),
        Access::write("counter"),
        Access::read("config"),
        Access::write("config"),
        Access::locked_write("total"),
        Access::locked_write("total"),
    ]);
    assert_eq!(races.len(), 1);
    assert_eq!(races[0].to_string(), "data race on counter");
    assert_eq!(races[0].mutating_accesses, 2);
}

#[test]
fn alias_analysis_follows_assignments() {
    let mut alias = AliasAnalysis::new();
    alias.borrow_ref("r1", "data", BorrowKind::Immutable);
    alias.assign("r2", "r1");
    alias.borrow_ref("w", "data", BorrowKind::Mutable);
    alias.borrow_ref("other", "elsewhere", BorrowKind::Mutable);

    assert_eq!(alias.target_of("r2"), Some("data"));
    assert!(alias.may_alias("r1", "w"));
    assert!(!alias.may_alias("r1", "other"));
    assert_eq!(
        alias.mutable_alias_conflicts(),
        vec![
            ("r1".to_string(), "w".to_string()),
            ("r2".to_string(), "w".to_string())
        ]
    );
}

#[test]
fn lifetime_inference_is_transitive() {
    let mut inference = LifetimeInference::new();
    inference.create_lifetime("'static");
    inference.add_constraint("'static", "'a");
    inference.add_constraint("'a", "'b");
    assert!(inference.outlives("'static", "'b"));
    assert!(inference.outlives("'b", "'b"));
    assert!(!inference.outlives("'b", "'a"));
    assert_eq!(inference.solve()["'a"], vec!["'b".to_string()]);
}

#[test]
fn verifier_report_counts_hints_as_info() {
    let mut verifier = StaticVerifier::new();
    verifier.add_warning("W-UNUSED", "unused binding", "<memory>:1");
    verifier.add_info("I-NOTE", "note", "<memory>:2");
    verifier.add_hint("H-STYLE", "hint", "<memory>:3");
    assert!(!verifier.has_errors());
    assert_eq!(verifier.exit_code(), 0);
    assert_eq!(verifier.generate_report(), "Errors: 0\nWarnings: 1\nInfo: 2");

    let message = verifier.add_error("E-BORROW", "invalid borrow for x", "<memory>:4");
    assert_eq!(
        message.to_string(),
        "error[E-BORROW] <memory>:4: invalid borrow for x"
    );
    assert_eq!(verifier.exit_code(), 1);
    assert_eq!(
        verifier.suggestion("E-BORROW").message,
        "Review rule E-BORROW and apply safe refactor"
    );
}

#[test]
fn enhanced_checker_records_coded_diagnostics() {
    let mut checker = EnhancedBorrowChecker::new();
    assert!(checker.check_borrow_with_diagnostics("x", true, 1));
    assert!(!checker.check_borrow_with_diagnostics("x", false, 2));
    assert!(!checker.check_move_with_diagnostics("x", 3));
    assert!(!checker.check_bounds_with_diagnostics(5, 3, 4));
    assert!(!checker.check_bounds_with_diagnostics(-1, 3, 5));
    assert!(checker.check_bounds_with_diagnostics(2, 3, 6));

    let codes: Vec<&str> = checker
        .verifier()
        .messages()
        .iter()
        .map(|m| m.code.as_str())
        .collect();
    assert_eq!(codes, vec!["E-BORROW", "E-MOVE", "E-BOUNDS", "E-BOUNDS"]);
    let first = &checker.verifier().messages()[0];
    assert_eq!(first.message, "invalid borrow for x");
    assert_eq!(first.location, "<memory>:2");
    assert_eq!(
        checker.verifier().messages()[2].message,
        "index 5 out of bounds for len 3"
    );

    let (ok, report) = checker.verify_with_report();
    assert!(!ok);
    assert_eq!(report, "Errors: 4\nWarnings: 0\nInfo: 0");
}

#[test]
fn enhanced_checker_lifetime_checks_use_declared_relations() {
    let mut checker = EnhancedBorrowChecker::new().with_source_name("main.ny");
    checker.declare_outlives("'a", "'b");
    assert!(checker.check_lifetime_with_diagnostics("'b", "'a", 1));
    assert!(!checker.check_lifetime_with_diagnostics("'a", "'c", 2));
    let warning = &checker.verifier().messages()[0];
    assert_eq!(warning.severity, Severity::Warning);
    assert_eq!(warning.code, "W-LIFETIME");
    assert_eq!(warning.message, "lifetime 'a may not outlive 'c");
    assert_eq!(warning.location, "main.ny:2");
    assert!(checker.verify_with_report().0);
}

#[test]
fn enhanced_checker_wraps_context_operations() {
    let mut checker = EnhancedBorrowChecker::new();
    let owner = checker.context_mut().create_owner(1, "v", 1);
    let borrow = checker
        .borrow_ref_with_diagnostics(owner, BorrowKind::Mutable, "'a", 2)
        .expect("first borrow");
    assert!(checker
        .borrow_ref_with_diagnostics(owner, BorrowKind::Immutable, "'b", 3)
        .is_none());
    assert!(checker.move_owner_with_diagnostics(owner, "w", 4).is_none());
    checker.context_mut().end_borrow(borrow);
    assert!(checker.move_owner_with_diagnostics(owner, "w", 5).is_some());
    assert!(checker.validate_lifetimes_with_diagnostics(6));

    let codes: Vec<&str> = checker
        .verifier()
        .messages()
        .iter()
        .map(|m| m.code.as_str())
        .collect();
    assert_eq!(codes, vec!["E-BORROW", "E-MOVE"]);
}

#[test]
fn replayed_steps_map_to_codes() {
    let mut checker = EnhancedBorrowChecker::new();
    let steps = parse_trace_lines("borrow_mut a\nborrow_immut a\nrelease_mut a\nmove a b\nmove a c")
        .expect("parse");
    let results: Vec<bool> = steps
        .iter()
        .map(|(line, step)| checker.apply_step(step, *line))
        .collect();
    assert_eq!(results, vec![true, false, true, true, false]);
    let messages = checker.verifier().messages();
    assert_eq!(messages[0].code, "E-BORROW");
    assert_eq!(messages[0].location, "<memory>:2");
    assert_eq!(messages[1].code, "E-MOVE");
    assert_eq!(messages[1].message, "resource `a` already moved");
}

#[test]
fn safety_engine_is_shareable_across_threads() {
    let engine = Arc::new(SafetyEngine::new());
    engine.register_type("Arc", ThreadSafety::LOCKED);

    let handles: Vec<_> = (0..4u64)
        .map(|n| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                let owner = engine.create_owner(n, &format!("obj{n}"), 1);
                let borrow = engine
                    .borrow_immutable(owner, "'t", 2)
                    .expect("shared borrow");
                assert!(engine.borrow_mutable(owner, "'u", 3).is_err());
                engine.end_borrow(borrow);
                engine.move_value(owner, "moved", 4).expect("move");
                engine.acquire_resource(&format!("res{n}"), None, 5)
            })
        })
        .collect();
    let ids: Vec<_> = handles
        .into_iter()
        .map(|handle| handle.join().expect("worker"))
        .collect();

    assert_eq!(engine.active_resources(), 4);
    assert!(engine.release_resource(ids[0]));
    engine.release_all_resources();
    assert_eq!(engine.active_resources(), 0);
    assert!(engine.validate(10).is_empty());
    assert_eq!(engine.check_thread_safety("Arc"), (true, true));
    assert_eq!(engine.check_thread_safety("RefCell"), (false, false));
}

#[test]
fn concurrent_check_borrow_admits_one_writer() {
    let checker = Arc::new(BorrowChecker::new());
    let handles: Vec<_> = (0..8)
        .map(|line| {
            let checker = Arc::clone(&checker);
            thread::spawn(move || checker.check_borrow("shared", true, line))
        })
        .collect();
    let granted = handles
        .into_iter()
        .map(|handle| handle.join().expect("worker"))
        .filter(|ok| *ok)
        .count();
    assert_eq!(granted, 1);
    assert_eq!(checker.errors().len(), 7);
    assert!(checker.snapshot()["shared"].mutable_active);
}
