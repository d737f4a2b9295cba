//! Arithmetic and comparison natives
//!
//! The prefix actions (`add`, `lesser?`, ...) carry the behavior; the
//! operator words (`+`, `<`, ...) are the same actions installed under
//! enfix-flagged slots. Integer math is checked: wraparound raises
//! `math/overflow`, division by zero `math/zero-divide`.

use rell_core::{Cell, Kind};

use crate::error;
use crate::machine::{Exec, Machine, Raise};
use crate::value::values_equal;

use super::{arg, done, install_enfix, native};

pub fn install(machine: &mut Machine) {
    let add = native(machine, "add", "value1 [integer! decimal! pair!] value2 [integer! decimal! pair!]", n_add);
    let subtract = native(machine, "subtract", "value1 [integer! decimal! pair!] value2 [integer! decimal! pair!]", n_subtract);
    let multiply = native(machine, "multiply", "value1 [integer! decimal!] value2 [integer! decimal!]", n_multiply);
    let divide = native(machine, "divide", "value1 [integer! decimal!] value2 [integer! decimal!]", n_divide);
    native(machine, "modulo", "value [integer!] divisor [integer!]", n_modulo);
    native(machine, "negate", "value [integer! decimal!]", n_negate);
    native(machine, "absolute", "value [integer! decimal!]", n_absolute);
    native(machine, "even?", "value [integer!]", n_even);
    native(machine, "odd?", "value [integer!]", n_odd);

    let equal = native(machine, "equal?", "value1 value2", n_equal);
    let not_equal = native(machine, "not-equal?", "value1 value2", n_not_equal);
    native(machine, "strict-equal?", "value1 value2", n_strict_equal);
    let lesser = native(machine, "lesser?", "value1 value2", n_lesser);
    let greater = native(machine, "greater?", "value1 value2", n_greater);
    let lesser_eq = native(machine, "lesser-or-equal?", "value1 value2", n_lesser_or_equal);
    let greater_eq = native(machine, "greater-or-equal?", "value1 value2", n_greater_or_equal);
    native(machine, "not", "value [<opt> any-value!]", n_not);

    install_enfix(machine, "+", add);
    install_enfix(machine, "-", subtract);
    install_enfix(machine, "*", multiply);
    install_enfix(machine, "/", divide);
    install_enfix(machine, "=", equal);
    install_enfix(machine, "<>", not_equal);
    install_enfix(machine, "<", lesser);
    install_enfix(machine, ">", greater);
    install_enfix(machine, "<=", lesser_eq);
    install_enfix(machine, ">=", greater_eq);
}

/// Numeric tower for a binary op: pairs with pairs, decimals when either
/// side is decimal, checked integers otherwise.
fn binary_math(
    machine: &mut Machine,
    int_op: fn(i64, i64) -> Option<i64>,
    dec_op: fn(f64, f64) -> f64,
) -> Exec {
    let a = arg(machine, 1);
    let b = arg(machine, 2);
    if a.kind == Kind::Pair || b.kind == Kind::Pair {
        return pair_math(machine, &a, &b, int_op);
    }
    if a.kind == Kind::Decimal || b.kind == Kind::Decimal {
        let x = as_decimal(&a);
        let y = as_decimal(&b);
        return done(machine, Cell::decimal(dec_op(x, y)));
    }
    let x = a.as_integer().expect("typechecked integer");
    let y = b.as_integer().expect("typechecked integer");
    match int_op(x, y) {
        Some(n) => done(machine, Cell::integer(n)),
        None => Err(error::raise(machine, "math", "overflow", &[])),
    }
}

fn pair_math(
    machine: &mut Machine,
    a: &Cell,
    b: &Cell,
    int_op: fn(i64, i64) -> Option<i64>,
) -> Exec {
    let (ax, ay) = pair_parts(a);
    let (bx, by) = pair_parts(b);
    match (int_op(ax, bx), int_op(ay, by)) {
        (Some(x), Some(y)) => done(machine, Cell::pair(x, y)),
        _ => Err(error::raise(machine, "math", "overflow", &[])),
    }
}

fn pair_parts(cell: &Cell) -> (i64, i64) {
    match cell.payload {
        rell_core::Payload::Pair { x, y } => (x, y),
        rell_core::Payload::Integer(n) => (n, n),
        _ => (0, 0),
    }
}

fn as_decimal(cell: &Cell) -> f64 {
    cell.as_decimal()
        .or_else(|| cell.as_integer().map(|n| n as f64))
        .expect("typechecked number")
}

fn n_add(machine: &mut Machine) -> Exec {
    binary_math(machine, i64::checked_add, |x, y| x + y)
}

fn n_subtract(machine: &mut Machine) -> Exec {
    binary_math(machine, i64::checked_sub, |x, y| x - y)
}

fn n_multiply(machine: &mut Machine) -> Exec {
    binary_math(machine, i64::checked_mul, |x, y| x * y)
}

fn n_divide(machine: &mut Machine) -> Exec {
    let a = arg(machine, 1);
    let b = arg(machine, 2);
    if b.as_integer() == Some(0) || b.as_decimal() == Some(0.0) {
        return Err(error::raise(machine, "math", "zero-divide", &[]));
    }
    if a.kind == Kind::Integer && b.kind == Kind::Integer {
        let x = a.as_integer().expect("typechecked integer");
        let y = b.as_integer().expect("typechecked integer");
        if x % y == 0 {
            return match x.checked_div(y) {
                Some(n) => done(machine, Cell::integer(n)),
                None => Err(error::raise(machine, "math", "overflow", &[])),
            };
        }
        // Inexact integer division goes decimal.
        return done(machine, Cell::decimal(x as f64 / y as f64));
    }
    let x = as_decimal(&a);
    let y = as_decimal(&b);
    done(machine, Cell::decimal(x / y))
}

fn n_modulo(machine: &mut Machine) -> Exec {
    let a = arg(machine, 1).as_integer().expect("typechecked integer");
    let b = arg(machine, 2).as_integer().expect("typechecked integer");
    if b == 0 {
        return Err(error::raise(machine, "math", "zero-divide", &[]));
    }
    done(machine, Cell::integer(a.rem_euclid(b)))
}

fn n_negate(machine: &mut Machine) -> Exec {
    let value = arg(machine, 1);
    match value.kind {
        Kind::Integer => {
            let n = value.as_integer().expect("typechecked integer");
            match n.checked_neg() {
                Some(neg) => done(machine, Cell::integer(neg)),
                None => Err(error::raise(machine, "math", "overflow", &[])),
            }
        }
        _ => done(machine, Cell::decimal(-as_decimal(&value))),
    }
}

fn n_absolute(machine: &mut Machine) -> Exec {
    let value = arg(machine, 1);
    match value.kind {
        Kind::Integer => {
            let n = value.as_integer().expect("typechecked integer");
            match n.checked_abs() {
                Some(abs) => done(machine, Cell::integer(abs)),
                None => Err(error::raise(machine, "math", "overflow", &[])),
            }
        }
        _ => done(machine, Cell::decimal(as_decimal(&value).abs())),
    }
}

fn n_even(machine: &mut Machine) -> Exec {
    let n = arg(machine, 1).as_integer().expect("typechecked integer");
    done(machine, Cell::logic(n % 2 == 0))
}

fn n_odd(machine: &mut Machine) -> Exec {
    let n = arg(machine, 1).as_integer().expect("typechecked integer");
    done(machine, Cell::logic(n % 2 != 0))
}

fn n_equal(machine: &mut Machine) -> Exec {
    let a = arg(machine, 1);
    let b = arg(machine, 2);
    let eq = values_equal(machine, &a, &b, false);
    done(machine, Cell::logic(eq))
}

fn n_not_equal(machine: &mut Machine) -> Exec {
    let a = arg(machine, 1);
    let b = arg(machine, 2);
    let eq = values_equal(machine, &a, &b, false);
    done(machine, Cell::logic(!eq))
}

fn n_strict_equal(machine: &mut Machine) -> Exec {
    let a = arg(machine, 1);
    let b = arg(machine, 2);
    let eq = values_equal(machine, &a, &b, true);
    done(machine, Cell::logic(eq))
}

/// Ordering for the comparison family: numbers numerically, chars and
/// strings lexically.
fn compare(machine: &mut Machine) -> Result<std::cmp::Ordering, Raise> {
    use std::cmp::Ordering;
    let a = arg(machine, 1);
    let b = arg(machine, 2);
    let ordering = match (a.kind, b.kind) {
        (Kind::Integer, Kind::Integer) => a.as_integer().cmp(&b.as_integer()),
        (Kind::Integer | Kind::Decimal, Kind::Integer | Kind::Decimal) => {
            let x = as_decimal(&a);
            let y = as_decimal(&b);
            match x.partial_cmp(&y) {
                Some(ordering) => ordering,
                None => return Err(error::raise(machine, "script", "bad-cast", &[a])),
            }
        }
        (Kind::Char, Kind::Char) => match (&a.payload, &b.payload) {
            (rell_core::Payload::Char(x), rell_core::Payload::Char(y)) => x.cmp(y),
            _ => Ordering::Equal,
        },
        (Kind::Text, Kind::Text) => {
            let (sa, ia) = a.series_payload().expect("text payload");
            let (sb, ib) = b.series_payload().expect("text payload");
            let xa = machine.heap.get(sa).text_str()[ia as usize..].to_string();
            let xb = machine.heap.get(sb).text_str()[ib as usize..].to_string();
            xa.to_lowercase().cmp(&xb.to_lowercase())
        }
        _ => return Err(error::raise(machine, "script", "bad-cast", &[a])),
    };
    Ok(ordering)
}

fn n_lesser(machine: &mut Machine) -> Exec {
    let ordering = compare(machine)?;
    done(machine, Cell::logic(ordering == std::cmp::Ordering::Less))
}

fn n_greater(machine: &mut Machine) -> Exec {
    let ordering = compare(machine)?;
    done(machine, Cell::logic(ordering == std::cmp::Ordering::Greater))
}

fn n_lesser_or_equal(machine: &mut Machine) -> Exec {
    let ordering = compare(machine)?;
    done(machine, Cell::logic(ordering != std::cmp::Ordering::Greater))
}

fn n_greater_or_equal(machine: &mut Machine) -> Exec {
    let ordering = compare(machine)?;
    done(machine, Cell::logic(ordering != std::cmp::Ordering::Less))
}

fn n_not(machine: &mut Machine) -> Exec {
    let value = arg(machine, 1);
    match value.truthiness() {
        Some(truthy) => done(machine, Cell::logic(!truthy)),
        None => Err(error::raise(machine, "script", "bad-cast", &[value])),
    }
}
