//! Collector safety under evaluation load.

use rell_runtime::gc;
use rell_runtime::Runtime;

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

#[test]
fn test_forced_collection_changes_no_live_value() {
    let mut runtime = Runtime::startup(1);
    // Build cross-linked structures: objects holding blocks holding
    // objects, plus functions closing over the user context.
    eval_int(
        &mut runtime,
        "a: make object! [n: 1 items: [10 20 30]] \
         b: make object! [peer: a sum: 0] \
         bump: func [o] [o.sum: o.sum + 1  o.sum] \
         bump b",
    );
    for _ in 0..5 {
        gc::collect(runtime.machine());
    }
    // Everything reachable kept its value.
    assert_eq!(eval_int(&mut runtime, "a.n"), 1);
    assert_eq!(eval_int(&mut runtime, "pick a.items 2"), 20);
    assert_eq!(eval_int(&mut runtime, "b.peer.n"), 1);
    assert_eq!(eval_int(&mut runtime, "bump b"), 2);
}

#[test]
fn test_garbage_is_reclaimed_toward_steady_state() {
    let mut runtime = Runtime::startup(1);
    // Churn: every round builds structures that become garbage when the
    // variables are reassigned next round.
    let mut plateau = 0usize;
    for round in 0..20 {
        eval_int(
            &mut runtime,
            "junk: make object! [data: [1 2 3 4 5 6 7 8]] \
             copies: reduce [copy junk.data copy junk.data] \
             length-of copies",
        );
        gc::collect(runtime.machine());
        let bytes = runtime.machine().heap.bytes_allocated();
        if round == 4 {
            plateau = bytes;
        }
        if round > 4 {
            // Allocation settles: later rounds stay near the early
            // plateau instead of growing without bound.
            assert!(
                bytes <= plateau * 2,
                "round {round}: {bytes} bytes vs plateau {plateau}"
            );
        }
    }
}

#[test]
fn test_collection_during_deep_evaluation_pressure() {
    let mut runtime = Runtime::startup(1);
    // Small ballast scale means the trampoline's safe-point checks run
    // collections mid-script; the loop must still compute correctly.
    let total = eval_int(
        &mut runtime,
        "total: 0 \
         repeat i 200 [ \
             tmp: reduce [i i * 2 i * 3] \
             total: total + pick tmp 3 \
         ] \
         total",
    );
    assert_eq!(total, (1..=200).map(|i| i * 3).sum::<i64>());
}

#[test]
fn test_series_pool_count_stays_bounded() {
    let mut runtime = Runtime::startup(1);
    gc::collect(runtime.machine());
    let baseline = runtime.machine().heap.series_count();
    for _ in 0..50 {
        eval_int(&mut runtime, "length-of reduce [1 + 1 2 + 2 3 + 3]");
    }
    gc::collect(runtime.machine());
    let after = runtime.machine().heap.series_count();
    // Fifty rounds of temporaries must not accrete fifty rounds of
    // series.
    assert!(
        after < baseline + 40,
        "series count grew from {baseline} to {after}"
    );
}
