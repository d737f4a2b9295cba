//! Value predicates that need the heap
//!
//! Cell-local predicates live on `Cell`; anything that has to chase a
//! series or context (equality, antiform decay) lives here.

use rell_core::{Cell, Kind, Payload, SeriesId};

use crate::context;
use crate::error;
use crate::machine::{Machine, Raise};

/// Value equality.
///
/// Strict equality requires identical kind, lift, and quasi status; lax
/// equality folds case on words and strings and compares integers with
/// decimals numerically. Series compare by element, contexts positionally
/// with hidden slots skipped.
pub fn values_equal(machine: &Machine, a: &Cell, b: &Cell, strict: bool) -> bool {
    if strict
        && (a.lift != b.lift
            || a.flags.contains(rell_core::CellFlags::QUASI)
                != b.flags.contains(rell_core::CellFlags::QUASI))
    {
        return false;
    }
    if a.kind != b.kind {
        return if strict {
            false
        } else {
            match (a.kind, b.kind) {
                (Kind::Integer, Kind::Decimal) => {
                    a.as_integer().map(|n| n as f64) == b.as_decimal()
                }
                (Kind::Decimal, Kind::Integer) => {
                    a.as_decimal() == b.as_integer().map(|n| n as f64)
                }
                _ => false,
            }
        };
    }
    match (&a.payload, &b.payload) {
        (Payload::None, Payload::None) => true,
        (Payload::Logic(x), Payload::Logic(y)) => x == y,
        (Payload::Integer(x), Payload::Integer(y)) => x == y,
        (Payload::Decimal(x), Payload::Decimal(y)) => x == y,
        (Payload::Char(x), Payload::Char(y)) => x == y,
        (Payload::Pair { x: ax, y: ay }, Payload::Pair { x: bx, y: by }) => ax == bx && ay == by,
        (Payload::Word { symbol: x, .. }, Payload::Word { symbol: y, .. }) => {
            if strict {
                x == y
            } else {
                machine.heap.symbols.eq_fold(*x, *y)
            }
        }
        (
            Payload::Series {
                series: sa,
                index: ia,
            },
            Payload::Series {
                series: sb,
                index: ib,
            },
        ) => series_equal(machine, a.kind, *sa, *ia, *sb, *ib, strict),
        (Payload::Context { varlist: x }, Payload::Context { varlist: y }) => {
            context::contexts_equal(machine, *x, *y)
        }
        (Payload::Action { action: x }, Payload::Action { action: y }) => x == y,
        (Payload::Typeset { bits: x }, Payload::Typeset { bits: y }) => x == y,
        (Payload::Handle { pairing: x }, Payload::Handle { pairing: y }) => x == y,
        (Payload::Param(x), Payload::Param(y)) => {
            x.symbol == y.symbol && x.class == y.class && x.types == y.types
        }
        _ => false,
    }
}

fn series_equal(
    machine: &Machine,
    kind: Kind,
    a: SeriesId,
    a_index: u32,
    b: SeriesId,
    b_index: u32,
    strict: bool,
) -> bool {
    if a == b && a_index == b_index {
        return true;
    }
    let sa = machine.heap.get(a);
    let sb = machine.heap.get(b);
    if !sa.is_accessible() || !sb.is_accessible() {
        // Tombstones equal only by identity.
        return false;
    }
    match kind {
        Kind::Text => {
            let xs = &sa.bytes()[a_index as usize..];
            let ys = &sb.bytes()[b_index as usize..];
            if strict {
                xs == ys
            } else {
                xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| x.eq_ignore_ascii_case(y))
            }
        }
        Kind::Binary => sa.bytes()[a_index as usize..] == sb.bytes()[b_index as usize..],
        _ => {
            let xs = &sa.arr_cells()[a_index as usize..];
            let ys = &sb.arr_cells()[b_index as usize..];
            xs.len() == ys.len()
                && xs
                    .iter()
                    .zip(ys)
                    .all(|(x, y)| values_equal(machine, x, y, strict))
        }
    }
}

/// Decay an evaluation product into something storable in a variable.
///
/// Packs decay to their first item; failures re-raise; splices refuse.
/// Stable values (including the stable antiforms) pass through.
pub fn decay(machine: &mut Machine, cell: Cell) -> Result<Cell, Raise> {
    if cell.is_failure() {
        let varlist = cell.context_varlist().expect("failure carries a context");
        return Err(Raise(varlist));
    }
    if cell.is_splice() {
        return Err(error::raise(machine, "script", "bad-antiform-assign", &[]));
    }
    if cell.is_pack() {
        let (series, index) = cell.series_payload().expect("pack carries a series");
        let first = machine.heap.get(series).arr_at(index as usize).cloned();
        return match first {
            Some(mut item) => {
                // Pack items travel lifted; unlifting restores the value.
                if item.unlift_meta().is_err() || item.is_unstable() {
                    return Err(error::raise(machine, "script", "bad-antiform-assign", &[]));
                }
                Ok(item)
            }
            None => Err(error::raise(machine, "script", "need-non-end", &[])),
        };
    }
    Ok(cell)
}

/// Datatype word spelling for a kind (`integer!`, `block!`, ...).
pub fn kind_name(kind: Kind) -> &'static str {
    match kind {
        Kind::Free => "free!",
        Kind::End => "end!",
        Kind::Void => "void!",
        Kind::Blank => "blank!",
        Kind::Comma => "comma!",
        Kind::Logic => "logic!",
        Kind::Integer => "integer!",
        Kind::Decimal => "decimal!",
        Kind::Char => "char!",
        Kind::Pair => "pair!",
        Kind::Word => "word!",
        Kind::SetWord => "set-word!",
        Kind::GetWord => "get-word!",
        Kind::MetaWord => "meta-word!",
        Kind::MetaSetWord => "meta-set-word!",
        Kind::Block => "block!",
        Kind::Group => "group!",
        Kind::Path => "path!",
        Kind::SetPath => "set-path!",
        Kind::GetPath => "get-path!",
        Kind::Tuple => "tuple!",
        Kind::SetTuple => "set-tuple!",
        Kind::Text => "text!",
        Kind::Binary => "binary!",
        Kind::Object => "object!",
        Kind::Module => "module!",
        Kind::Error => "error!",
        Kind::Frame => "frame!",
        Kind::Action => "action!",
        Kind::Typeset => "typeset!",
        Kind::Parameter => "parameter!",
        Kind::Handle => "handle!",
    }
}

/// Inverse of `kind_name`, for typeset words in parameter specs.
pub fn kind_from_name(name: &str) -> Option<Kind> {
    Some(match name {
        "void!" => Kind::Void,
        "blank!" => Kind::Blank,
        "comma!" => Kind::Comma,
        "logic!" => Kind::Logic,
        "integer!" => Kind::Integer,
        "decimal!" => Kind::Decimal,
        "char!" => Kind::Char,
        "pair!" => Kind::Pair,
        "word!" => Kind::Word,
        "set-word!" => Kind::SetWord,
        "get-word!" => Kind::GetWord,
        "meta-word!" => Kind::MetaWord,
        "meta-set-word!" => Kind::MetaSetWord,
        "block!" => Kind::Block,
        "group!" => Kind::Group,
        "path!" => Kind::Path,
        "set-path!" => Kind::SetPath,
        "get-path!" => Kind::GetPath,
        "tuple!" => Kind::Tuple,
        "set-tuple!" => Kind::SetTuple,
        "text!" => Kind::Text,
        "binary!" => Kind::Binary,
        "object!" => Kind::Object,
        "module!" => Kind::Module,
        "error!" => Kind::Error,
        "frame!" => Kind::Frame,
        "action!" => Kind::Action,
        "typeset!" => Kind::Typeset,
        "parameter!" => Kind::Parameter,
        "handle!" => Kind::Handle,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::test_machine;
    use rell_core::{Flavor, Series, SeriesFlags};

    fn block_of(machine: &mut Machine, values: &[Cell]) -> Cell {
        let id = machine
            .heap
            .alloc(Series::new_array(Flavor::Array, values.len(), SeriesFlags::POW2));
        for v in values {
            machine.heap.mutate(id, |s| s.arr_push(v.clone()));
        }
        Cell::block(id)
    }

    #[test]
    fn test_scalar_equality() {
        let machine = test_machine();
        assert!(values_equal(&machine, &Cell::integer(3), &Cell::integer(3), true));
        assert!(!values_equal(&machine, &Cell::integer(3), &Cell::integer(4), true));
        // Lax coerces across integer/decimal; strict does not.
        assert!(values_equal(&machine, &Cell::integer(3), &Cell::decimal(3.0), false));
        assert!(!values_equal(&machine, &Cell::integer(3), &Cell::decimal(3.0), true));
    }

    #[test]
    fn test_word_case_folding() {
        let mut machine = test_machine();
        let lower = Cell::word(machine.heap.intern("foo"));
        let upper = Cell::word(machine.heap.intern("FOO"));
        assert!(values_equal(&machine, &lower, &upper, false));
        assert!(!values_equal(&machine, &lower, &upper, true));
    }

    #[test]
    fn test_block_deep_equality() {
        let mut machine = test_machine();
        let a = block_of(&mut machine, &[Cell::integer(1), Cell::integer(2)]);
        let b = block_of(&mut machine, &[Cell::integer(1), Cell::integer(2)]);
        let c = block_of(&mut machine, &[Cell::integer(2), Cell::integer(1)]);
        assert!(values_equal(&machine, &a, &b, true));
        assert!(!values_equal(&machine, &a, &c, true));
    }

    #[test]
    fn test_quote_levels_matter_strictly() {
        let machine = test_machine();
        let plain = Cell::integer(1);
        let mut quoted = Cell::integer(1);
        quoted.quote(1).unwrap();
        assert!(!values_equal(&machine, &plain, &quoted, true));
        assert!(values_equal(&machine, &plain, &quoted, false));
    }

    #[test]
    fn test_decay_passes_stable_values() {
        let mut machine = test_machine();
        let v = decay(&mut machine, Cell::integer(5)).unwrap();
        assert_eq!(v.as_integer(), Some(5));
        let none = decay(&mut machine, Cell::none_value()).unwrap();
        assert!(none.is_none());
    }

    #[test]
    fn test_decay_pack_takes_first() {
        let mut machine = test_machine();
        let mut first = Cell::integer(7);
        first.lift_meta();
        let mut second = Cell::integer(8);
        second.lift_meta();
        let id = machine
            .heap
            .alloc(Series::new_array(Flavor::Array, 2, SeriesFlags::POW2));
        machine.heap.mutate(id, |s| {
            s.arr_push(first);
            s.arr_push(second);
        });
        let out = decay(&mut machine, Cell::pack(id)).unwrap();
        assert_eq!(out.as_integer(), Some(7));
    }
}
