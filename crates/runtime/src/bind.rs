//! Binding and resolution
//!
//! A word cell's binding is a context (or a virtual-binding patch chain)
//! plus a cached slot index in the word payload. Resolution order:
//!
//! 1. the feed's specifier (a chain of patch overlays), walked head
//!    first, so argument frames shadow whatever the cell says;
//! 2. the cell's own binding, with the cached index trusted only while
//!    it still names the same symbol in the context's current keylist;
//! 3. nothing: unbound. Assignment attaches unbound words to the user
//!    context; reads raise `not-bound`.
//!
//! `bind_array` writes direct bindings (and index caches) into a copy of
//! the code; feeds layer patches on top without touching shared arrays.

use rell_core::{Binding, Cell, CellFlags, Flavor, Payload, Series, SeriesId, SymId};

use crate::context;
use crate::error;
use crate::machine::{Machine, Raise};

/// A resolved variable location.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Slot {
    pub varlist: SeriesId,
    /// 1-based index.
    pub index: usize,
}

/// Walk a specifier/binding chain entry: a Patch overlays its context
/// and links onward; a varlist is itself the overlay, end of chain.
fn chain_lookup(
    machine: &Machine,
    mut link: Option<SeriesId>,
    symbol: SymId,
) -> Option<Slot> {
    while let Some(id) = link {
        let series = machine.heap.get(id);
        let (overlay, next) = match series.flavor {
            Flavor::Patch => (series.patch_overlay(), series.patch_next()),
            _ => (id, None),
        };
        if let Some(index) = context::find_key(machine, overlay, symbol, true) {
            return Some(Slot {
                varlist: overlay,
                index,
            });
        }
        link = next;
    }
    None
}

/// Resolve a word cell against a specifier. Does not touch the cache.
pub fn resolve(
    machine: &Machine,
    cell: &Cell,
    specifier: Option<SeriesId>,
) -> Option<Slot> {
    let symbol = cell.word_symbol()?;
    if let Some(slot) = chain_lookup(machine, specifier, symbol) {
        return Some(slot);
    }
    match cell.binding {
        Binding::Unbound => None,
        Binding::Ctx(id) => {
            let series = machine.heap.get(id);
            if series.flavor == Flavor::Patch {
                return chain_lookup(machine, Some(id), symbol);
            }
            // Trust the cached index only if it still names this symbol.
            if let Payload::Word { index, .. } = cell.payload
                && index > 0
                && (index as usize) <= context::len(machine, id)
                && machine
                    .heap
                    .symbols
                    .eq_fold(context::key_at(machine, id, index as usize), symbol)
            {
                return Some(Slot {
                    varlist: id,
                    index: index as usize,
                });
            }
            context::find_key(machine, id, symbol, true).map(|index| Slot {
                varlist: id,
                index,
            })
        }
    }
}

/// Read a variable. Raises `not-bound` for unresolvable words and
/// `frame-ended` when the slot's frame is a tombstone.
pub fn get_var(
    machine: &mut Machine,
    cell: &Cell,
    specifier: Option<SeriesId>,
) -> Result<Cell, Raise> {
    match resolve(machine, cell, specifier) {
        Some(slot) => {
            if !machine.heap.get(slot.varlist).is_accessible() {
                return Err(error::raise(machine, "script", "frame-ended", &[]));
            }
            let mut value = context::var_at(machine, slot.varlist, slot.index).clone();
            // Slot-owned flags stay with the slot.
            value.flags.remove(SLOT_FLAGS);
            Ok(value)
        }
        None => {
            let word = Cell::word(cell.word_symbol().expect("word cell"));
            Err(error::raise(machine, "script", "not-bound", &[word]))
        }
    }
}

/// Slot flags that belong to the variable, not to the value passing
/// through it.
const SLOT_FLAGS: CellFlags = CellFlags::PROTECTED
    .union(CellFlags::HIDDEN)
    .union(CellFlags::ENFIX);

/// Write a value through a resolved slot, preserving slot-owned flags.
pub fn write_slot(machine: &mut Machine, slot: Slot, value: Cell) -> Result<(), Raise> {
    if !machine.heap.get(slot.varlist).is_accessible() {
        return Err(error::raise(machine, "script", "frame-ended", &[]));
    }
    let current = context::var_at(machine, slot.varlist, slot.index);
    if current.flags.contains(CellFlags::PROTECTED) {
        let key = context::key_at(machine, slot.varlist, slot.index);
        return Err(error::raise(
            machine,
            "script",
            "protected-word",
            &[Cell::word(key)],
        ));
    }
    let kept = current.flags.intersection(SLOT_FLAGS);
    let target = context::var_at_mut(machine, slot.varlist, slot.index);
    *target = value;
    target.flags.remove(CellFlags::STALE | CellFlags::NEWLINE_BEFORE);
    target.flags.insert(kept);
    Ok(())
}

/// Assign through a word. Unresolved words attach to the user context.
pub fn set_var(
    machine: &mut Machine,
    cell: &Cell,
    specifier: Option<SeriesId>,
    value: Cell,
) -> Result<Slot, Raise> {
    let slot = match resolve(machine, cell, specifier) {
        Some(slot) => slot,
        None => {
            let symbol = cell.word_symbol().expect("word cell");
            let lib = machine.lib;
            let index = context::append_key(machine, lib, symbol);
            Slot {
                varlist: lib,
                index,
            }
        }
    };
    write_slot(machine, slot, value)?;
    Ok(slot)
}

/// Prepend a virtual-binding overlay to a chain. The patch is managed:
/// derelativized values may carry it indefinitely.
pub fn make_specifier(
    machine: &mut Machine,
    overlay: SeriesId,
    next: Option<SeriesId>,
) -> SeriesId {
    let patch = machine.heap.alloc(Series::new_patch(overlay, next));
    machine.heap.manage(patch);
    patch
}

/// Binding for a value extracted from a feed: keep an existing binding,
/// otherwise adopt the feed's specifier so the value can still see the
/// scope it was written in.
pub fn derelativize(cell: &mut Cell, specifier: Option<SeriesId>) {
    if cell.binding == Binding::Unbound
        && (cell.kind.is_array_like() || cell.kind.is_word_like())
        && let Some(chain) = specifier
    {
        cell.binding = Binding::Ctx(chain);
    }
}

/// Bind word cells of an array directly to a context, writing index
/// caches. `deep` descends into nested arrays. Only words the context
/// already has keys for are touched.
pub fn bind_array(machine: &mut Machine, array: SeriesId, ctx: SeriesId, deep: bool) {
    let len = machine.heap.get(array).arr_len();
    for i in 0..len {
        let cell = machine
            .heap
            .get(array)
            .arr_at(i)
            .cloned()
            .expect("index within length");
        if cell.kind.is_word_like() {
            let symbol = cell.word_symbol().expect("word has symbol");
            if let Some(index) = context::find_key(machine, ctx, symbol, true) {
                let slot = machine
                    .heap
                    .get_mut(array)
                    .arr_at_mut(i)
                    .expect("index within length");
                slot.binding = Binding::Ctx(ctx);
                if let Payload::Word { index: cache, .. } = &mut slot.payload {
                    *cache = index as u32;
                }
            }
        } else if deep
            && cell.kind.is_array_like()
            && let Some((nested, _)) = cell.series_payload()
        {
            bind_array(machine, nested, ctx, true);
        }
    }
}

/// Deep copy of an array: nested arrays are copied, strings and other
/// series stay shared. The copy is managed.
pub fn copy_array_deep(machine: &mut Machine, array: SeriesId) -> SeriesId {
    let source = machine.heap.get(array);
    let flavor = source.flavor;
    let cells: Vec<Cell> = source.arr_cells().to_vec();
    let mut copy = Series::new_array(flavor, cells.len(), rell_core::SeriesFlags::POW2);
    copy.link = source.link;
    copy.misc = source.misc;
    let id = machine.heap.alloc(copy);
    for mut cell in cells {
        if cell.kind.is_array_like()
            && let Some((nested, index)) = cell.series_payload()
        {
            let nested_copy = copy_array_deep(machine, nested);
            cell.payload = Payload::Series {
                series: nested_copy,
                index,
            };
        }
        machine.heap.mutate(id, |s| s.arr_push(cell));
    }
    machine.heap.manage(id);
    id
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::test_machine;
    use crate::scan::scan_source;
    use rell_core::Kind;

    fn ctx_with(machine: &mut Machine, pairs: &[(&str, i64)]) -> SeriesId {
        let ctx = context::make_context(machine, Kind::Object, pairs.len());
        for (name, value) in pairs {
            let sym = machine.heap.intern(name);
            let index = context::append_key(machine, ctx, sym);
            *context::var_at_mut(machine, ctx, index) = Cell::integer(*value);
        }
        ctx
    }

    #[test]
    fn test_resolve_through_direct_binding() {
        let mut machine = test_machine();
        let ctx = ctx_with(&mut machine, &[("x", 10)]);
        let sym = machine.heap.intern("x");
        let mut word = Cell::word(sym);
        word.binding = Binding::Ctx(ctx);
        let value = get_var(&mut machine, &word, None).unwrap();
        assert_eq!(value.as_integer(), Some(10));
    }

    #[test]
    fn test_stale_cache_falls_back_to_search() {
        let mut machine = test_machine();
        let ctx = ctx_with(&mut machine, &[("a", 1), ("b", 2)]);
        let sym = machine.heap.intern("b");
        let mut word = Cell::word(sym);
        word.binding = Binding::Ctx(ctx);
        // Poison the cache with the wrong index; resolution must notice
        // the symbol mismatch and re-search.
        word.payload = Payload::Word {
            symbol: sym,
            index: 1,
        };
        let slot = resolve(&machine, &word, None).unwrap();
        assert_eq!(slot.index, 2);
    }

    #[test]
    fn test_specifier_shadows_cell_binding() {
        let mut machine = test_machine();
        let outer = ctx_with(&mut machine, &[("x", 1)]);
        let inner = ctx_with(&mut machine, &[("x", 2)]);
        let sym = machine.heap.intern("x");
        let mut word = Cell::word(sym);
        word.binding = Binding::Ctx(outer);
        let spec = make_specifier(&mut machine, inner, None);
        let value = get_var(&mut machine, &word, Some(spec)).unwrap();
        assert_eq!(value.as_integer(), Some(2));
    }

    #[test]
    fn test_chain_falls_through() {
        let mut machine = test_machine();
        let outer = ctx_with(&mut machine, &[("y", 7)]);
        let inner = ctx_with(&mut machine, &[("x", 2)]);
        let chain_tail = make_specifier(&mut machine, outer, None);
        let chain = make_specifier(&mut machine, inner, Some(chain_tail));
        let sym = machine.heap.intern("y");
        let word = Cell::word(sym);
        let value = get_var(&mut machine, &word, Some(chain)).unwrap();
        assert_eq!(value.as_integer(), Some(7));
    }

    #[test]
    fn test_unbound_read_errors_unbound_write_attaches() {
        let mut machine = test_machine();
        let sym = machine.heap.intern("fresh");
        let word = Cell::word(sym);
        assert!(get_var(&mut machine, &word, None).is_err());
        set_var(&mut machine, &word, None, Cell::integer(42)).unwrap();
        let value = get_var(&mut machine, &word, None).unwrap();
        assert_eq!(value.as_integer(), Some(42));
    }

    #[test]
    fn test_protected_slot_refuses_write() {
        let mut machine = test_machine();
        let ctx = ctx_with(&mut machine, &[("locked", 1)]);
        context::var_at_mut(&mut machine, ctx, 1)
            .flags
            .insert(CellFlags::PROTECTED);
        let sym = machine.heap.intern("locked");
        let mut word = Cell::word(sym);
        word.binding = Binding::Ctx(ctx);
        let err = set_var(&mut machine, &word, None, Cell::integer(9)).unwrap_err();
        let id = error::id_of(&machine, err.0).unwrap();
        assert_eq!(machine.heap.spelling(id), "protected-word");
        // Value untouched.
        assert_eq!(context::var_at(&machine, ctx, 1).as_integer(), Some(1));
    }

    #[test]
    fn test_bind_array_writes_cache() {
        let mut machine = test_machine();
        let ctx = ctx_with(&mut machine, &[("x", 5)]);
        let block = scan_source(&mut machine, "test", "x [x]").unwrap();
        bind_array(&mut machine, block, ctx, true);
        let word = machine.heap.get(block).arr_at(0).cloned().unwrap();
        assert_eq!(word.binding, Binding::Ctx(ctx));
        match word.payload {
            Payload::Word { index, .. } => assert_eq!(index, 1),
            _ => panic!("word payload expected"),
        }
        // Deep: the nested block's word too.
        let inner = machine.heap.get(block).arr_at(1).cloned().unwrap();
        let (nested, _) = inner.series_payload().unwrap();
        let nested_word = machine.heap.get(nested).arr_at(0).cloned().unwrap();
        assert_eq!(nested_word.binding, Binding::Ctx(ctx));
    }

    #[test]
    fn test_copy_array_deep_is_independent() {
        let mut machine = test_machine();
        let block = scan_source(&mut machine, "test", "a [b c]").unwrap();
        let copy = copy_array_deep(&mut machine, block);
        assert_ne!(copy, block);
        let inner_orig = machine.heap.get(block).arr_at(1).cloned().unwrap();
        let inner_copy = machine.heap.get(copy).arr_at(1).cloned().unwrap();
        assert_ne!(
            inner_orig.series_payload().unwrap().0,
            inner_copy.series_payload().unwrap().0
        );
    }

    #[test]
    fn test_tombstone_read_errors() {
        let mut machine = test_machine();
        let ctx = ctx_with(&mut machine, &[("x", 1)]);
        let sym = machine.heap.intern("x");
        let mut word = Cell::word(sym);
        word.binding = Binding::Ctx(ctx);
        machine.heap.get_mut(ctx).decay();
        let err = get_var(&mut machine, &word, None).unwrap_err();
        let id = error::id_of(&machine, err.0).unwrap();
        assert_eq!(machine.heap.spelling(id), "frame-ended");
    }
}
