//! Function machinery
//!
//! FUNC builds an interpreted action: the spec is copied and parsed into
//! a paramlist with a definitional RETURN injected up front, the body is
//! deep-copied, and dispatch runs the body over the invocation frame via
//! a virtual-binding overlay. RETURN, UNWIND, and REDO all travel the
//! throw channel with frame-identity labels.

use rell_core::{
    Binding, Cell, Flavor, Kind, ParamClass, ParamFlags, ParamSpec, Series, SeriesFlags,
    SeriesId, TypeBits, known,
};

use crate::action::{self, Dispatcher};
use crate::bind;
use crate::error;
use crate::eval;
use crate::frame::{Executor, Feed, OutTarget};
use crate::machine::{Bounce, Exec, Machine, Raise};
use crate::throw;

use super::{arg, done, native, refinement_on};

pub fn install(machine: &mut Machine) {
    native(machine, "func", "spec [block!] body [block!]", n_func);
    native(machine, "does", "body [block!]", n_does);
    let ret = native(machine, "return", "value [<opt> <end> any-value!]", n_return);
    machine.return_native = Some(ret);
    native(
        machine,
        "unwind",
        "target [frame! integer!] value [<opt> any-value!]",
        n_unwind,
    );
    native(machine, "redo", "target [frame!] /sibling action [action!]", n_redo);
    native(machine, "frame-of", "depth [integer!]", n_frame_of);
    native(
        machine,
        "specialize",
        ":target [word! path! action!] values [block!]",
        n_specialize,
    );
}

/// Build an interpreted action from spec and body blocks.
pub fn make_interpreted(
    machine: &mut Machine,
    spec_cell: &Cell,
    body_cell: &Cell,
) -> Result<Cell, Raise> {
    // The caller's spec block stays untouched; the copy gets frozen.
    let (spec_series, _) = spec_cell.series_payload().expect("spec is a block");
    let spec_copy = bind::copy_array_deep(machine, spec_series);
    let mut params = action::parse_spec(machine, spec_copy)?;
    if !params.iter().any(|p| p.class == ParamClass::Return) {
        params.insert(
            0,
            ParamSpec {
                symbol: known::RETURN,
                class: ParamClass::Return,
                flags: ParamFlags::empty(),
                types: TypeBits::NONE,
                spec: None,
            },
        );
    }
    let paramlist = action::build_paramlist(machine, &params);

    let (body_series, body_index) = body_cell.series_payload().expect("body is a block");
    let body_copy = bind::copy_array_deep(machine, body_series);
    let mut body = Cell::block(body_copy);
    body.payload = rell_core::Payload::Series {
        series: body_copy,
        index: body_index,
    };
    body.binding = body_cell.binding;

    let details = machine
        .heap
        .alloc(Series::new_array(Flavor::Details, 1, SeriesFlags::empty()));
    machine.heap.mutate(details, |s| s.arr_push(body));

    let id = action::make_action(machine, paramlist, details, Dispatcher::Body, None);
    Ok(Cell::action(id))
}

fn n_func(machine: &mut Machine) -> Exec {
    let spec = arg(machine, 1);
    let body = arg(machine, 2);
    let cell = make_interpreted(machine, &spec, &body)?;
    done(machine, cell)
}

fn n_does(machine: &mut Machine) -> Exec {
    let body = arg(machine, 1);
    let empty = machine.empty_block;
    let spec = Cell::block(empty);
    let cell = make_interpreted(machine, &spec, &body)?;
    done(machine, cell)
}

/// Definitional return: the invoked cell's binding says which frame
/// terminates; the evaluator matches that identity during unwind.
fn n_return(machine: &mut Machine) -> Exec {
    let invoked = machine.top().scratch.clone();
    if !matches!(invoked.binding, Binding::Ctx(_)) {
        return Err(error::raise(machine, "script", "not-bound", &[
            Cell::word(known::RETURN),
        ]));
    }
    let value = arg(machine, 1);
    machine.thrown = Some(throw::definitional_return(invoked, value));
    Ok(Bounce::Thrown)
}

/// The varlist of the Nth containing action frame (1 = nearest below
/// the current native's own frame).
fn nth_action_varlist(machine: &Machine, depth: i64) -> Option<SeriesId> {
    let mut remaining = depth;
    for frame in machine.frames.iter().rev().skip(1) {
        if frame.executor == Executor::Action {
            remaining -= 1;
            if remaining == 0 {
                return frame.varlist;
            }
        }
    }
    None
}

fn n_unwind(machine: &mut Machine) -> Exec {
    let target = arg(machine, 1);
    let value = arg(machine, 2);
    let varlist = match target.kind {
        Kind::Frame => target.context_varlist().expect("frame payload"),
        Kind::Integer => {
            let depth = target.as_integer().expect("typechecked integer");
            match nth_action_varlist(machine, depth) {
                Some(varlist) => varlist,
                None => {
                    return Err(error::raise(machine, "script", "out-of-range", &[target]));
                }
            }
        }
        _ => unreachable!("typechecked target"),
    };
    machine.thrown = Some(throw::unwind_to(varlist, value));
    Ok(Bounce::Thrown)
}

fn n_redo(machine: &mut Machine) -> Exec {
    let target = arg(machine, 1);
    let varlist = target.context_varlist().expect("frame payload");
    let sibling = if refinement_on(machine, 2) {
        Some(arg(machine, 3))
    } else {
        None
    };
    machine.thrown = Some(throw::redo_to(varlist, sibling));
    Ok(Bounce::Thrown)
}

/// Reify the Nth containing action frame as a first-class FRAME!.
/// The varlist outlives the invocation as a tombstone from here on.
fn n_frame_of(machine: &mut Machine) -> Exec {
    let depth = arg(machine, 1).as_integer().expect("typechecked integer");
    let Some(varlist) = nth_action_varlist(machine, depth) else {
        let target = arg(machine, 1);
        return Err(error::raise(machine, "script", "out-of-range", &[target]));
    };
    for frame in machine.frames.iter_mut().rev() {
        if frame.varlist == Some(varlist) {
            frame.escaped = true;
            break;
        }
    }
    done(machine, Cell::frame(varlist))
}

// specialize: 1 :target, 2 values

fn n_specialize(machine: &mut Machine) -> Exec {
    match machine.top().state {
        0 => {
            let mut target = arg(machine, 1);
            if target.is_quoted() {
                target.unquote(1).expect("quoted target");
            }
            let specifier = machine.top().feed.specifier;
            // Resolve the target to an action plus partial refinements.
            let (action_cell, partials): (Cell, Vec<rell_core::SymId>) = match target.kind {
                Kind::Action => (target, Vec::new()),
                Kind::Word => (bind::get_var(machine, &target, specifier)?, Vec::new()),
                Kind::Path => {
                    let (series, index) = target.series_payload().expect("path payload");
                    let items: Vec<Cell> =
                        machine.heap.get(series).arr_cells()[index as usize..].to_vec();
                    let head = items.first().cloned().ok_or_else(|| {
                        error::raise(machine, "script", "bad-pick", &[target.clone()])
                    })?;
                    let value = bind::get_var(machine, &head, specifier)?;
                    let mut partials = Vec::new();
                    for item in &items[1..] {
                        match item.word_symbol() {
                            Some(sym) => partials.push(sym),
                            None => {
                                return Err(error::raise(
                                    machine,
                                    "script",
                                    "bad-sequence-item",
                                    &[item.clone()],
                                ));
                            }
                        }
                    }
                    (value, partials)
                }
                _ => unreachable!("typechecked target"),
            };
            let Some(original) = action_cell.action_id() else {
                return Err(error::raise(machine, "script", "bad-cast", &[action_cell]));
            };

            // Exemplar: a frame-shaped context the values block fills by
            // assignment.
            let (real, _, _) = action::resolve_specialization(machine, original);
            let paramlist = action::rec(machine, real).paramlist;
            let keys = action::keylist_of_paramlist(machine, paramlist);
            let count = action::param_count(machine, real);
            let mut exemplar = Series::new_array(Flavor::Varlist, count + 1, SeriesFlags::POW2);
            exemplar.link = rell_core::Link::Keylist(keys);
            let exemplar = machine.heap.alloc(exemplar);
            machine.heap.mutate(exemplar, |s| {
                s.arr_push(Cell::frame(exemplar));
                for _ in 0..count {
                    s.arr_push(Cell::none_value());
                }
            });
            machine.heap.manage(exemplar);

            // Partial-refinement order block for the shim's details.
            let partial_block = machine.heap.alloc(Series::new_array(
                Flavor::Array,
                partials.len(),
                SeriesFlags::POW2,
            ));
            machine.heap.mutate(partial_block, |s| {
                for &sym in &partials {
                    s.arr_push(Cell::word(sym));
                }
            });
            machine.heap.manage(partial_block);

            // Remember the pieces, then run the values block over the
            // exemplar.
            let top = machine.top_mut();
            top.spare = Cell::action(original);
            top.scratch = Cell::frame(exemplar);
            top.state = 1;
            machine.data_stack.push(Cell::block(partial_block));

            let values = arg(machine, 2);
            let outer = match values.binding {
                Binding::Ctx(id) => Some(id),
                Binding::Unbound => None,
            };
            let overlay = bind::make_specifier(machine, exemplar, outer);
            let (series, index) = values.series_payload().expect("values is a block");
            eval::push_block_frame(
                machine,
                Feed::new(series, index, Some(overlay)),
                OutTarget::Drop,
            )?;
            Ok(Bounce::Continue)
        }
        _ => {
            let original = machine.top().spare.action_id().expect("stashed action");
            let exemplar = machine
                .top()
                .scratch
                .context_varlist()
                .expect("stashed exemplar");
            let partial_block = machine
                .data_stack
                .last()
                .and_then(|c| c.series_payload())
                .expect("stashed partials")
                .0;

            let paramlist = {
                let (real, _, _) = action::resolve_specialization(machine, original);
                action::rec(machine, real).paramlist
            };
            let details = machine
                .heap
                .alloc(Series::new_array(Flavor::Details, 2, SeriesFlags::empty()));
            machine.heap.mutate(details, |s| {
                s.arr_push(Cell::action(original));
                s.arr_push(Cell::block(partial_block));
            });
            let name = action::rec(machine, original).name;
            let id = action::make_action(
                machine,
                paramlist,
                details,
                Dispatcher::Specializer,
                name,
            );
            machine.actions.get_mut(id.0).exemplar = Some(exemplar);
            done(machine, Cell::action(id))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context;
    use crate::machine::test_machine;
    use crate::scan::scan_source;

    #[test]
    fn test_make_interpreted_injects_return() {
        let mut machine = test_machine();
        let spec = scan_source(&mut machine, "t", "a b").unwrap();
        let body = scan_source(&mut machine, "t", "a").unwrap();
        let cell =
            make_interpreted(&mut machine, &Cell::block(spec), &Cell::block(body)).unwrap();
        let id = cell.action_id().unwrap();
        assert_eq!(action::param_count(&machine, id), 3);
        let first = action::param_at(&machine, id, 1);
        assert_eq!(first.class, ParamClass::Return);
        assert_eq!(first.symbol, known::RETURN);
        // Body was copied, not shared.
        let details = action::rec(&machine, id).details;
        let stored = machine.heap.get(details).arr_at(0).cloned().unwrap();
        assert_ne!(stored.series_payload().unwrap().0, body);
    }

    #[test]
    fn test_make_interpreted_respects_declared_return() {
        let mut machine = test_machine();
        let spec = scan_source(&mut machine, "t", "a return: [integer!]").unwrap();
        let body = scan_source(&mut machine, "t", "a").unwrap();
        let cell =
            make_interpreted(&mut machine, &Cell::block(spec), &Cell::block(body)).unwrap();
        let id = cell.action_id().unwrap();
        assert_eq!(action::param_count(&machine, id), 2);
    }

    #[test]
    fn test_definitional_return_binding() {
        let mut machine = test_machine();
        let ctx = context::make_context(&mut machine, Kind::Object, 0);
        machine.return_native = Some(rell_core::ActionId(7));
        let cell = action::definitional_return(&machine, ctx).unwrap();
        assert_eq!(cell.binding, Binding::Ctx(ctx));
        // Matching is by identity of the bound frame, not by name.
        let thrown = throw::definitional_return(cell, Cell::integer(1));
        assert!(matches!(thrown.label.binding, Binding::Ctx(c) if c == ctx));
    }
}
