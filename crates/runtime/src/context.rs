//! Contexts
//!
//! A context is a varlist (cells, slot 0 = archetype) joined to a keylist
//! (symbols). Objects, modules, errors, and reified frames are all
//! contexts; the archetype kind tells them apart. Keylists are shared on
//! copy and only duplicated when a context grows a key of its own
//! (copy-on-extend), so `make obj []` clones cost one varlist.
//!
//! Slot indices are 1-based (slot 0 is the archetype) and stable for the
//! context's lifetime. Keylist order is insertion order and is
//! significant: equality is positional, never canonicalized.

use rell_core::{
    Cell, CellFlags, Flavor, Kind, Link, Series, SeriesFlags, SeriesId, SymId,
};

use crate::machine::Machine;
use crate::value::values_equal;

/// Create an empty context of the given archetype kind with room for
/// `capacity` slots. The varlist starts manual; `make`-style callers
/// manage it once construction succeeds.
pub fn make_context(machine: &mut Machine, kind: Kind, capacity: usize) -> SeriesId {
    debug_assert!(kind.is_context_like());
    let keylist = machine.heap.alloc(Series::new_keylist());
    let mut varlist = Series::new_array(Flavor::Varlist, capacity + 1, SeriesFlags::POW2);
    varlist.link = Link::Keylist(keylist);
    let varlist = machine.heap.alloc(varlist);
    let archetype = Cell::context_kind(kind, varlist);
    machine.heap.mutate(varlist, |s| s.arr_push(archetype));
    varlist
}

pub fn keylist_of(machine: &Machine, varlist: SeriesId) -> SeriesId {
    match machine.heap.get(varlist).link {
        Link::Keylist(id) => id,
        other => panic!("context: varlist link is {other:?}, not a keylist"),
    }
}

/// Number of slots (excluding the archetype).
pub fn len(machine: &Machine, varlist: SeriesId) -> usize {
    machine.heap.get(keylist_of(machine, varlist)).keys().len()
}

/// Key symbol at 1-based index.
pub fn key_at(machine: &Machine, varlist: SeriesId, index: usize) -> SymId {
    machine.heap.get(keylist_of(machine, varlist)).keys()[index - 1]
}

/// Slot cell at 1-based index.
pub fn var_at(machine: &Machine, varlist: SeriesId, index: usize) -> &Cell {
    machine
        .heap
        .get(varlist)
        .arr_at(index)
        .expect("context: slot index out of range")
}

pub fn var_at_mut(machine: &mut Machine, varlist: SeriesId, index: usize) -> &mut Cell {
    machine
        .heap
        .get_mut(varlist)
        .arr_at_mut(index)
        .expect("context: slot index out of range")
}

/// Find a key, case-insensitive by default (`fold`), returning its
/// 1-based index. The cached-index fast path in word lookup depends on
/// this being consistent with `key_at`.
pub fn find_key(
    machine: &Machine,
    varlist: SeriesId,
    symbol: SymId,
    fold: bool,
) -> Option<usize> {
    let keylist = keylist_of(machine, varlist);
    let keys = machine.heap.get(keylist).keys();
    keys.iter().position(|&key| {
        if fold {
            machine.heap.symbols.eq_fold(key, symbol)
        } else {
            key == symbol
        }
    })
    .map(|zero_based| zero_based + 1)
}

/// Append a key with an unset slot, returning the new 1-based index.
/// A shared keylist is copied first (the sharers keep the original).
pub fn append_key(machine: &mut Machine, varlist: SeriesId, symbol: SymId) -> usize {
    let keylist = keylist_of(machine, varlist);
    let target = if machine.heap.get(keylist).flags.contains(SeriesFlags::SHARED) {
        let keys = machine.heap.get(keylist).keys().to_vec();
        let mut fresh = Series::new_keylist();
        fresh.link = Link::Ancestor(keylist);
        for key in keys {
            fresh.keys_push(key);
        }
        let fresh = machine.heap.alloc(fresh);
        if machine
            .heap
            .get(varlist)
            .flags
            .contains(SeriesFlags::MANAGED)
        {
            machine.heap.manage(fresh);
        }
        machine.heap.get_mut(varlist).link = Link::Keylist(fresh);
        fresh
    } else {
        keylist
    };
    machine.heap.mutate(target, |s| s.keys_push(symbol));
    machine
        .heap
        .mutate(varlist, |s| s.arr_push(Cell::none_value()));
    len(machine, varlist)
}

/// Share `varlist`'s keylist with a second context under construction.
/// Marks the keylist so later extension copies instead of mutating.
pub fn share_keylist(machine: &mut Machine, varlist: SeriesId) -> SeriesId {
    let keylist = keylist_of(machine, varlist);
    machine
        .heap
        .get_mut(keylist)
        .flags
        .insert(SeriesFlags::SHARED);
    keylist
}

/// Whether `sub`'s keylist descends from `ancestor`'s (sub-typing check).
pub fn derives_from(machine: &Machine, sub: SeriesId, ancestor: SeriesId) -> bool {
    let target = keylist_of(machine, ancestor);
    let mut cursor = Some(keylist_of(machine, sub));
    while let Some(keylist) = cursor {
        if keylist == target {
            return true;
        }
        cursor = match machine.heap.get(keylist).link {
            Link::Ancestor(id) => Some(id),
            _ => None,
        };
    }
    false
}

/// Top-level set-words of a block, in order of first appearance.
pub fn collect_set_words(machine: &Machine, block: SeriesId) -> Vec<SymId> {
    let mut seen: Vec<SymId> = Vec::new();
    for cell in machine.heap.get(block).arr_cells() {
        if cell.kind == Kind::SetWord
            && let Some(symbol) = cell.word_symbol()
        {
            let canon = machine.heap.symbols.canon(symbol);
            if !seen
                .iter()
                .any(|&s| machine.heap.symbols.canon(s) == canon)
            {
                seen.push(symbol);
            }
        }
    }
    seen
}

/// Positional equality: same keys (case-folded) in the same order with
/// equal values, hidden slots skipped on both sides.
pub fn contexts_equal(machine: &Machine, a: SeriesId, b: SeriesId) -> bool {
    if a == b {
        return true;
    }
    let (mut i, mut j) = (1usize, 1usize);
    let (a_len, b_len) = (len(machine, a), len(machine, b));
    loop {
        while i <= a_len && var_at(machine, a, i).flags.contains(CellFlags::HIDDEN) {
            i += 1;
        }
        while j <= b_len && var_at(machine, b, j).flags.contains(CellFlags::HIDDEN) {
            j += 1;
        }
        match (i <= a_len, j <= b_len) {
            (false, false) => return true,
            (true, true) => {}
            _ => return false,
        }
        if !machine
            .heap
            .symbols
            .eq_fold(key_at(machine, a, i), key_at(machine, b, j))
        {
            return false;
        }
        if !values_equal(machine, var_at(machine, a, i), var_at(machine, b, j), false) {
            return false;
        }
        i += 1;
        j += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::test_machine;

    #[test]
    fn test_create_and_append() {
        let mut machine = test_machine();
        let ctx = make_context(&mut machine, Kind::Object, 2);
        let a = machine.heap.intern("a");
        let b = machine.heap.intern("b");
        assert_eq!(append_key(&mut machine, ctx, a), 1);
        assert_eq!(append_key(&mut machine, ctx, b), 2);
        assert_eq!(len(&machine, ctx), 2);
        assert_eq!(key_at(&machine, ctx, 1), a);
        assert!(var_at(&machine, ctx, 1).is_none());
        assert_eq!(find_key(&machine, ctx, b, true), Some(2));
    }

    #[test]
    fn test_find_key_folds_case() {
        let mut machine = test_machine();
        let ctx = make_context(&mut machine, Kind::Object, 1);
        let lower = machine.heap.intern("foo");
        let upper = machine.heap.intern("FOO");
        append_key(&mut machine, ctx, lower);
        assert_eq!(find_key(&machine, ctx, upper, true), Some(1));
        assert_eq!(find_key(&machine, ctx, upper, false), None);
    }

    #[test]
    fn test_shared_keylist_copies_on_extend() {
        let mut machine = test_machine();
        let base = make_context(&mut machine, Kind::Object, 1);
        let a = machine.heap.intern("a");
        append_key(&mut machine, base, a);

        // Second context adopts the same keylist.
        let shared = share_keylist(&mut machine, base);
        let derived = make_context(&mut machine, Kind::Object, 1);
        // Rewire derived to the shared keylist, mirroring object copy.
        machine.heap.get_mut(derived).link = Link::Keylist(shared);
        machine
            .heap
            .mutate(derived, |s| s.arr_push(Cell::none_value()));

        let b = machine.heap.intern("b");
        append_key(&mut machine, derived, b);

        // Base keeps the original one-key list; derived got its own.
        assert_eq!(len(&machine, base), 1);
        assert_eq!(len(&machine, derived), 2);
        assert!(derives_from(&machine, derived, base));
        assert!(!derives_from(&machine, base, derived));
    }

    #[test]
    fn test_positional_equality_skips_hidden() {
        let mut machine = test_machine();
        let a_sym = machine.heap.intern("a");
        let b_sym = machine.heap.intern("b");

        let first = make_context(&mut machine, Kind::Object, 2);
        append_key(&mut machine, first, a_sym);
        *var_at_mut(&mut machine, first, 1) = Cell::integer(1);

        let second = make_context(&mut machine, Kind::Object, 2);
        append_key(&mut machine, second, a_sym);
        *var_at_mut(&mut machine, second, 1) = Cell::integer(1);
        assert!(contexts_equal(&machine, first, second));

        // A hidden slot with any value preserves equality.
        append_key(&mut machine, second, b_sym);
        let slot = var_at_mut(&mut machine, second, 2);
        *slot = Cell::integer(99);
        slot.flags.insert(CellFlags::HIDDEN);
        assert!(contexts_equal(&machine, first, second));

        // A visible extra slot does not.
        var_at_mut(&mut machine, second, 2)
            .flags
            .remove(CellFlags::HIDDEN);
        assert!(!contexts_equal(&machine, first, second));
    }

    #[test]
    fn test_order_sensitive_equality() {
        let mut machine = test_machine();
        let a_sym = machine.heap.intern("a");
        let b_sym = machine.heap.intern("b");

        let ab = make_context(&mut machine, Kind::Object, 2);
        append_key(&mut machine, ab, a_sym);
        append_key(&mut machine, ab, b_sym);

        let ba = make_context(&mut machine, Kind::Object, 2);
        append_key(&mut machine, ba, b_sym);
        append_key(&mut machine, ba, a_sym);

        assert!(!contexts_equal(&machine, ab, ba));
    }

    #[test]
    fn test_collect_set_words_dedupes() {
        let mut machine = test_machine();
        let x = machine.heap.intern("x");
        let y = machine.heap.intern("y");
        let x_again = machine.heap.intern("X");
        let block = machine.heap.alloc(Series::new_array(
            Flavor::Array,
            4,
            SeriesFlags::POW2,
        ));
        machine.heap.mutate(block, |s| {
            s.arr_push(Cell::word_kind(Kind::SetWord, x));
            s.arr_push(Cell::integer(1));
            s.arr_push(Cell::word_kind(Kind::SetWord, y));
            s.arr_push(Cell::word_kind(Kind::SetWord, x_again));
        });
        let keys = collect_set_words(&machine, block);
        assert_eq!(keys, vec![x, y]);
    }
}
