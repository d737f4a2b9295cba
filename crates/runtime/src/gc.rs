//! Garbage collection
//!
//! Mark-and-sweep over the series pool and the action pool. Marking
//! starts from:
//!
//! - the heap's explicit root cells and the user context,
//! - every live frame: its feed array, specifier chain, varlist,
//!   out/spare/scratch cells, and phase/original actions,
//! - the data stack and any throw in flight,
//! - the manuals list (an unreferenced manual is still owned by whoever
//!   allocated it).
//!
//! Traversal is a worklist, not recursion, so deeply nested structures
//! cannot blow the Rust stack. The sweep walks the pools, frees unmarked
//! managed series (and unmarked actions), clears surviving marks, and
//! resets the allocation ballast. Collection runs only at trampoline
//! safe points.

use rell_core::{ActionId, Binding, Cell, Content, Link, Misc, Payload, SeriesFlags, SeriesId};

use crate::machine::Machine;

/// One collection cycle. Returns the number of series freed.
pub fn collect(machine: &mut Machine) -> usize {
    let mut marker = Marker {
        series: Vec::new(),
        actions: Vec::new(),
    };

    // Roots.
    for cell in machine.heap.roots() {
        marker.cell(cell);
    }
    marker.series.push(machine.lib);
    marker.series.push(machine.empty_block);
    for &id in machine.heap.manuals() {
        marker.series.push(id);
    }
    for cell in &machine.data_stack {
        marker.cell(cell);
    }
    if let Some(thrown) = &machine.thrown {
        marker.cell(&thrown.label);
        marker.cell(&thrown.arg);
    }
    for frame in &machine.frames {
        marker.series.push(frame.feed.array);
        if let Some(spec) = frame.feed.specifier {
            marker.series.push(spec);
        }
        if let Some(varlist) = frame.varlist {
            marker.series.push(varlist);
        }
        marker.cell(&frame.out);
        marker.cell(&frame.spare);
        marker.cell(&frame.scratch);
        if let Some(phase) = frame.phase {
            marker.actions.push(phase);
        }
        if let Some(original) = frame.original {
            marker.actions.push(original);
        }
    }
    if let Some(ret) = machine.return_native {
        marker.actions.push(ret);
    }

    // Drain the worklists, crossing payloads, bindings, and flavored
    // link/misc slots.
    loop {
        if let Some(id) = marker.series.pop() {
            if !machine.heap.is_live(id) {
                continue;
            }
            {
                let series = machine.heap.get_mut(id);
                if series.flags.contains(SeriesFlags::MARKED) {
                    continue;
                }
                series.flags.insert(SeriesFlags::MARKED);
            }
            let series = machine.heap.get(id);
            match &series.content {
                Content::Cells { .. } => {
                    for cell in series.arr_cells() {
                        marker.cell(cell);
                    }
                }
                Content::Pairing(cells) => {
                    marker.cell(&cells[0]);
                    marker.cell(&cells[1]);
                }
                Content::Bytes { .. } | Content::Keys(_) | Content::Gone => {}
            }
            match series.link {
                Link::Keylist(linked)
                | Link::Ancestor(linked)
                | Link::NextPatch(linked) => marker.series.push(linked),
                Link::File(_) | Link::None => {}
            }
            match series.misc {
                Misc::Meta(linked) | Misc::PatchContext(linked) => marker.series.push(linked),
                Misc::Line(_) | Misc::None => {}
            }
            continue;
        }
        if let Some(id) = marker.actions.pop() {
            let record = machine.actions.get_mut(id.0);
            if record.marked {
                continue;
            }
            record.marked = true;
            marker.series.push(record.paramlist);
            marker.series.push(record.details);
            if let Some(exemplar) = record.exemplar {
                marker.series.push(exemplar);
            }
            if let Some(meta) = record.meta {
                marker.series.push(meta);
            }
            continue;
        }
        break;
    }

    // Sweep.
    let freed_series = machine.heap.sweep();
    let mut freed_actions = 0;
    machine.actions.retain(|_, record| {
        if record.marked {
            record.marked = false;
            true
        } else {
            freed_actions += 1;
            false
        }
    });

    tracing::debug!(
        freed_series,
        freed_actions,
        live_series = machine.heap.series_count(),
        bytes = machine.heap.bytes_allocated(),
        "collection cycle"
    );
    freed_series
}

struct Marker {
    series: Vec<SeriesId>,
    actions: Vec<ActionId>,
}

impl Marker {
    fn cell(&mut self, cell: &Cell) {
        match &cell.payload {
            Payload::Series { series, .. } => self.series.push(*series),
            Payload::Context { varlist } => self.series.push(*varlist),
            Payload::Handle { pairing } => self.series.push(*pairing),
            Payload::Action { action } => self.actions.push(*action),
            Payload::Param(spec) => {
                if let Some(series) = spec.spec {
                    self.series.push(series);
                }
            }
            _ => {}
        }
        if let Binding::Ctx(id) = cell.binding {
            self.series.push(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context;
    use crate::machine::test_machine;
    use rell_core::{Flavor, Kind, Series, SeriesFlags as SF};

    fn managed_block(machine: &mut Machine, values: &[Cell]) -> SeriesId {
        let id = machine
            .heap
            .alloc(Series::new_array(Flavor::Array, values.len(), SF::POW2));
        for v in values {
            machine.heap.mutate(id, |s| s.arr_push(v.clone()));
        }
        machine.heap.manage(id);
        id
    }

    #[test]
    fn test_unreferenced_managed_series_is_collected() {
        let mut machine = test_machine();
        let garbage = managed_block(&mut machine, &[Cell::integer(1)]);
        collect(&mut machine);
        assert!(!machine.heap.is_live(garbage));
    }

    #[test]
    fn test_rooted_values_survive() {
        let mut machine = test_machine();
        let kept = managed_block(&mut machine, &[Cell::integer(1)]);
        machine.heap.push_root(Cell::block(kept));
        collect(&mut machine);
        assert!(machine.heap.is_live(kept));
        machine.heap.pop_root();
        collect(&mut machine);
        assert!(!machine.heap.is_live(kept));
    }

    #[test]
    fn test_nested_reachability() {
        let mut machine = test_machine();
        let inner = managed_block(&mut machine, &[Cell::integer(9)]);
        let outer = managed_block(&mut machine, &[Cell::block(inner)]);
        machine.heap.push_root(Cell::block(outer));
        collect(&mut machine);
        assert!(machine.heap.is_live(inner));
        assert!(machine.heap.is_live(outer));
        // Contents unchanged by the cycle.
        let cell = machine.heap.get(inner).arr_at(0).cloned().unwrap();
        assert_eq!(cell.as_integer(), Some(9));
    }

    #[test]
    fn test_context_keylist_survives_through_link() {
        let mut machine = test_machine();
        let ctx = context::make_context(&mut machine, Kind::Object, 1);
        let sym = machine.heap.intern("a");
        context::append_key(&mut machine, ctx, sym);
        let keylist = context::keylist_of(&machine, ctx);
        machine.heap.manage(ctx);
        machine.heap.manage(keylist);
        machine.heap.push_root(Cell::object(ctx));
        collect(&mut machine);
        assert!(machine.heap.is_live(ctx));
        assert!(machine.heap.is_live(keylist));
    }

    #[test]
    fn test_cyclic_structures_collect_without_hanging() {
        let mut machine = test_machine();
        let a = managed_block(&mut machine, &[]);
        let b = managed_block(&mut machine, &[Cell::block(a)]);
        machine.heap.mutate(a, |s| s.arr_push(Cell::block(b)));
        // Reachable cycle survives.
        machine.heap.push_root(Cell::block(a));
        collect(&mut machine);
        assert!(machine.heap.is_live(a) && machine.heap.is_live(b));
        // Unreachable cycle is reclaimed whole.
        machine.heap.pop_root();
        collect(&mut machine);
        assert!(!machine.heap.is_live(a) && !machine.heap.is_live(b));
    }

    #[test]
    fn test_ballast_resets_after_collection() {
        let mut machine = test_machine();
        machine.heap.request_gc();
        assert!(machine.heap.gc_pending());
        collect(&mut machine);
        assert!(!machine.heap.gc_pending());
    }
}
