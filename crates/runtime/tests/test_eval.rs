//! End-to-end evaluator behavior through the host API.

use rell_runtime::{HostError, Runtime};

fn eval_int(runtime: &mut Runtime, source: &str) -> i64 {
    let handle = runtime
        .eval_text(source)
        .unwrap_or_else(|err| panic!("{source:?} failed: {err}"));
    let value = runtime
        .value_of(&handle)
        .as_integer()
        .unwrap_or_else(|| panic!("{source:?} did not yield an integer"));
    runtime.release(handle);
    value
}

fn eval_mold(runtime: &mut Runtime, source: &str) -> String {
    let handle = runtime
        .eval_text(source)
        .unwrap_or_else(|err| panic!("{source:?} failed: {err}"));
    let text = runtime.mold_of(&handle);
    runtime.release(handle);
    text
}

fn eval_form(runtime: &mut Runtime, source: &str) -> String {
    let handle = runtime
        .eval_text(source)
        .unwrap_or_else(|err| panic!("{source:?} failed: {err}"));
    let text = runtime.form_of(&handle);
    runtime.release(handle);
    text
}

#[test]
fn test_enfix_is_left_to_right() {
    let mut runtime = Runtime::startup(1);
    assert_eq!(eval_int(&mut runtime, "1 + 2 * 3"), 9);
    assert_eq!(eval_int(&mut runtime, "(1 + 2) * 3"), 9);
    assert_eq!(eval_int(&mut runtime, "10 - 4 - 3"), 3);
}

#[test]
fn test_assignment_and_prefix_call() {
    let mut runtime = Runtime::startup(1);
    assert_eq!(eval_int(&mut runtime, "x: 10 add x 5"), 15);
    // The binding still holds the assigned value afterwards.
    assert_eq!(eval_int(&mut runtime, "x"), 10);
}

#[test]
fn test_either_takes_a_branch() {
    let mut runtime = Runtime::startup(1);
    assert_eq!(eval_form(&mut runtime, "either 1 < 2 [\"yes\"] [\"no\"]"), "yes");
    assert_eq!(eval_form(&mut runtime, "either 2 < 1 [\"yes\"] [\"no\"]"), "no");
}

#[test]
fn test_func_definition_and_call() {
    let mut runtime = Runtime::startup(1);
    assert_eq!(
        eval_int(&mut runtime, "f: func [a b] [a * b + 1]  f 3 4"),
        13
    );
}

#[test]
fn test_object_construction_and_tuple_pick() {
    let mut runtime = Runtime::startup(1);
    assert_eq!(
        eval_int(&mut runtime, "obj: make object! [a: 1 b: 2]  obj.a + obj.b"),
        3
    );
}

#[test]
fn test_catch_repeat_throw() {
    let mut runtime = Runtime::startup(1);
    assert_eq!(
        eval_int(
            &mut runtime,
            "catch [repeat i 10 [if i = 4 [throw i]]  -1]"
        ),
        4
    );
    // Without a throw the body product comes back.
    assert_eq!(eval_int(&mut runtime, "catch [repeat i 3 [i * 10]]"), 30);
}

#[test]
fn test_trap_reports_zero_divide() {
    let mut runtime = Runtime::startup(1);
    assert_eq!(eval_mold(&mut runtime, "e: trap [1 / 0]  e.id"), "zero-divide");
    assert_eq!(eval_mold(&mut runtime, "e: trap [1 / 0]  e.type"), "math");
    // trap passes successful results through.
    assert_eq!(eval_int(&mut runtime, "trap [1 + 1]"), 2);
}

#[test]
fn test_definitional_return() {
    let mut runtime = Runtime::startup(1);
    assert_eq!(eval_int(&mut runtime, "f: func [] [return 1, 2]  f"), 1);
    // Each invocation's return targets its own frame: the inner function
    // returning does not unwind the outer one.
    assert_eq!(
        eval_int(
            &mut runtime,
            "inner: func [] [return 7]  outer: func [] [inner  3]  outer"
        ),
        3
    );
}

#[test]
fn test_invisibles_leave_previous_product() {
    let mut runtime = Runtime::startup(1);
    assert_eq!(eval_int(&mut runtime, "x: 10 comment \"hi\" 20"), 20);
    assert_eq!(eval_int(&mut runtime, "x"), 10);
    // An invisible at the tail leaves the earlier product standing.
    assert_eq!(eval_int(&mut runtime, "y: 10 elide (y + 1)"), 10);
    assert_eq!(eval_int(&mut runtime, "y"), 10);
    // Side effects inside the elided expression still happen.
    assert_eq!(eval_int(&mut runtime, "z: 1 elide (z: 20) z"), 20);
}

#[test]
fn test_catch_name_matching() {
    let mut runtime = Runtime::startup(1);
    assert_eq!(eval_int(&mut runtime, "catch [throw 1]"), 1);
    assert_eq!(
        eval_int(&mut runtime, "catch/name [throw/name 2 'foo] 'foo"),
        2
    );
    // A non-matching name re-throws past the catch.
    match runtime.eval_text("catch/name [throw/name 2 'foo] 'bar") {
        Err(HostError::StrayThrow(_)) => {}
        other => panic!("expected the throw to escape, got {other:?}"),
    }
    // ...and an outer matching catch picks it up.
    assert_eq!(
        eval_int(
            &mut runtime,
            "catch/name [catch/name [throw/name 2 'foo] 'bar] 'foo"
        ),
        2
    );
}

#[test]
fn test_protected_slot_errors() {
    let mut runtime = Runtime::startup(1);
    assert_eq!(
        eval_mold(&mut runtime, "p: 1 protect 'p  e: trap [p: 2]  e.id"),
        "protected-word"
    );
    assert_eq!(eval_int(&mut runtime, "p"), 1);
    assert_eq!(eval_int(&mut runtime, "unprotect 'p  p: 2  p"), 2);
}

#[test]
fn test_while_and_break_continue() {
    let mut runtime = Runtime::startup(1);
    assert_eq!(
        eval_int(&mut runtime, "n: 0 while [n < 5] [n: n + 1]  n"),
        5
    );
    assert_eq!(
        eval_int(
            &mut runtime,
            "total: 0 repeat i 10 [if i > 3 [break] total: total + i]  total"
        ),
        6
    );
    assert_eq!(
        eval_int(
            &mut runtime,
            "total: 0 repeat i 5 [if i = 2 [continue] total: total + i]  total"
        ),
        13
    );
}

#[test]
fn test_path_refinement_order_is_call_site_order() {
    let mut runtime = Runtime::startup(1);
    assert_eq!(
        eval_mold(
            &mut runtime,
            "a: copy []  append/dup/part a [1 2 3] 1 3  a"
        ),
        "[1 2 3]"
    );
    assert_eq!(
        eval_mold(
            &mut runtime,
            "b: copy []  append/part/dup b [1 2 3] 1 3  b"
        ),
        "[1 1 1]"
    );
}

#[test]
fn test_partial_specialization_preserves_order() {
    let mut runtime = Runtime::startup(1);
    assert_eq!(
        eval_mold(
            &mut runtime,
            "adp: specialize 'append/dup/part []  a: copy []  adp a [1 2 3] 1 3  a"
        ),
        "[1 2 3]"
    );
    assert_eq!(
        eval_mold(
            &mut runtime,
            "apd: specialize 'append/part/dup []  b: copy []  apd b [1 2 3] 1 3  b"
        ),
        "[1 1 1]"
    );
}

#[test]
fn test_specialize_fills_values() {
    let mut runtime = Runtime::startup(1);
    assert_eq!(
        eval_int(&mut runtime, "add-ten: specialize 'add [value2: 10]  add-ten 5"),
        15
    );
}

#[test]
fn test_quote_family() {
    let mut runtime = Runtime::startup(1);
    assert_eq!(eval_mold(&mut runtime, "quote 3"), "'3");
    assert_eq!(eval_int(&mut runtime, "unquote quote 3"), 3);
    assert_eq!(eval_mold(&mut runtime, "the foo"), "foo");
    // Evaluation strips exactly one quote level.
    assert_eq!(eval_mold(&mut runtime, "''foo"), "'foo");
}

#[test]
fn test_group_evaluation_and_voids() {
    let mut runtime = Runtime::startup(1);
    // An empty group vanishes interstitially.
    assert_eq!(eval_int(&mut runtime, "1 ()"), 1);
    // Assigning a void is refused.
    match runtime.eval_text("v: ()") {
        Err(HostError::Uncaught { id, .. }) => assert_eq!(id, "bad-void-assign"),
        other => panic!("expected bad-void-assign, got {other:?}"),
    }
    // A lifting assignment accepts it.
    assert!(runtime.eval_text("^v: ()").is_ok());
}

#[test]
fn test_unwind_by_depth() {
    let mut runtime = Runtime::startup(1);
    // unwind 2 terminates the outer func, skipping the inner's tail.
    assert_eq!(
        eval_int(
            &mut runtime,
            "outer: func [] [inner 99]  inner: func [v] [unwind 2 v  -1]  outer"
        ),
        99
    );
}

#[test]
fn test_set_get_and_meta() {
    let mut runtime = Runtime::startup(1);
    assert_eq!(eval_int(&mut runtime, "set 'q 7  get 'q"), 7);
    assert_eq!(eval_mold(&mut runtime, "meta null"), "~null~");
    assert_eq!(eval_mold(&mut runtime, "mold [a b]"), "\"[a b]\"");
}

#[test]
fn test_reduce_evaluates_each_expression() {
    let mut runtime = Runtime::startup(1);
    assert_eq!(eval_mold(&mut runtime, "reduce [1 + 2 3 * 4]"), "[3 12]");
}

#[test]
fn test_series_basics() {
    let mut runtime = Runtime::startup(1);
    assert_eq!(eval_int(&mut runtime, "blk: [10 20 30]  pick blk 2"), 20);
    assert_eq!(eval_int(&mut runtime, "length-of [1 2 3]"), 3);
    assert_eq!(eval_int(&mut runtime, "first [9 8]"), 9);
    assert_eq!(eval_int(&mut runtime, "last [9 8]"), 8);
    assert_eq!(
        eval_mold(&mut runtime, "s: copy [1]  append s 2  insert s 0  s"),
        "[0 1 2]"
    );
    // copy gives an independent series.
    assert_eq!(
        eval_mold(&mut runtime, "orig: [1 2]  dup: copy orig  append dup 3  orig"),
        "[1 2]"
    );
}

#[test]
fn test_object_set_tuple() {
    let mut runtime = Runtime::startup(1);
    assert_eq!(
        eval_int(&mut runtime, "o: make object! [n: 1]  o.n: 5  o.n"),
        5
    );
}

#[test]
fn test_stack_overflow_is_an_error() {
    let mut runtime = Runtime::startup(1);
    match runtime.eval_text("boom: func [] [boom]  boom") {
        Err(HostError::Uncaught { id, .. }) => assert_eq!(id, "stack-overflow"),
        other => panic!("expected stack-overflow, got {other:?}"),
    }
}

#[test]
fn test_unbound_word_errors() {
    let mut runtime = Runtime::startup(1);
    match runtime.eval_text("never-was-set") {
        Err(HostError::Uncaught { id, .. }) => assert_eq!(id, "not-bound"),
        other => panic!("expected not-bound, got {other:?}"),
    }
}

#[test]
fn test_make_error_context() {
    let mut runtime = Runtime::startup(1);
    assert_eq!(
        eval_mold(
            &mut runtime,
            "e: make error! [type: 'math id: 'overflow]  e.id"
        ),
        "overflow"
    );
}
