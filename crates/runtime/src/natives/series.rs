//! Series natives
//!
//! Mutators check the write barriers in order: const view first (a cell
//! property), then the frozen flag (a series property). APPEND's /part
//! and /dup take their arguments in call-site refinement order, which
//! partial specializations preserve.

use rell_core::{Cell, CellFlags, Kind, SeriesFlags};

use crate::bind;
use crate::error;
use crate::eval;
use crate::machine::{Exec, Machine, Raise};

use super::{arg, done, native, refinement_on};

pub fn install(machine: &mut Machine) {
    native(
        machine,
        "append",
        "series [block! text! binary!] value [<opt> any-value!] /part limit [integer!] /dup count [integer!]",
        n_append,
    );
    native(machine, "insert", "series [block!] value [any-value!]", n_insert);
    native(
        machine,
        "pick",
        "series [block! group! text! binary! object! pair!] index [integer! word!]",
        n_pick,
    );
    native(
        machine,
        "length-of",
        "series [block! group! text! binary! object!]",
        n_length_of,
    );
    native(machine, "copy", "value [block! group! text! binary!] /deep", n_copy);
    native(machine, "first", "series [block! group! text! binary!]", n_first);
    native(machine, "last", "series [block! group! text! binary!]", n_last);
}

fn writable(machine: &mut Machine, series_cell: &Cell) -> Result<(), Raise> {
    if series_cell.flags.contains(CellFlags::CONST) {
        return Err(error::raise(machine, "script", "const-value", &[]));
    }
    let (series, _) = series_cell.series_payload().expect("series argument");
    let node = machine.heap.get(series);
    if !node.is_accessible() {
        return Err(error::raise(machine, "script", "frame-ended", &[]));
    }
    if node.flags.contains(SeriesFlags::FROZEN) {
        return Err(error::raise(machine, "access", "read-only", &[]));
    }
    Ok(())
}

// append: 1 series, 2 value, 3 /part, 4 limit, 5 /dup, 6 count

fn n_append(machine: &mut Machine) -> Exec {
    let series_cell = arg(machine, 1);
    let value = arg(machine, 2);
    writable(machine, &series_cell)?;
    let (series, _) = series_cell.series_payload().expect("series argument");

    match series_cell.kind {
        Kind::Block => {
            // /part splices the first `limit` items of a block value;
            // without it a block argument appends as one element.
            let mut items: Vec<Cell> = if value.kind == Kind::Block && refinement_on(machine, 3) {
                let limit = arg(machine, 4).as_integer().expect("typechecked limit").max(0);
                let (value_series, value_index) =
                    value.series_payload().expect("block value");
                machine.heap.get(value_series).arr_cells()[value_index as usize..]
                    .iter()
                    .take(limit as usize)
                    .cloned()
                    .collect()
            } else if value.is_splice() {
                let (value_series, value_index) =
                    value.series_payload().expect("splice payload");
                machine.heap.get(value_series).arr_cells()[value_index as usize..].to_vec()
            } else if value.is_nulled() {
                Vec::new()
            } else {
                vec![value.clone()]
            };
            if refinement_on(machine, 5) {
                let count = arg(machine, 6).as_integer().expect("typechecked count").max(0);
                let base = items.clone();
                items.clear();
                for _ in 0..count {
                    items.extend(base.iter().cloned());
                }
            }
            machine.heap.mutate(series, |s| {
                let at = s.arr_len();
                s.arr_insert(at, &items);
            });
        }
        Kind::Text | Kind::Binary => {
            let mut bytes = match value.kind {
                Kind::Text => {
                    let (vs, vi) = value.series_payload().expect("text value");
                    machine.heap.get(vs).bytes()[vi as usize..].to_vec()
                }
                Kind::Char => match value.payload {
                    rell_core::Payload::Char(c) => c.to_string().into_bytes(),
                    _ => Vec::new(),
                },
                Kind::Integer if series_cell.kind == Kind::Binary => {
                    let n = value.as_integer().expect("integer value");
                    if !(0..=255).contains(&n) {
                        return Err(error::raise(machine, "script", "out-of-range", &[value]));
                    }
                    vec![n as u8]
                }
                _ => {
                    return Err(error::raise(machine, "script", "bad-cast", &[value]));
                }
            };
            if refinement_on(machine, 3) {
                let limit = arg(machine, 4).as_integer().expect("typechecked limit").max(0);
                bytes.truncate(limit as usize);
            }
            if refinement_on(machine, 5) {
                let count = arg(machine, 6).as_integer().expect("typechecked count").max(0);
                let base = bytes.clone();
                bytes.clear();
                for _ in 0..count {
                    bytes.extend_from_slice(&base);
                }
            }
            machine.heap.mutate(series, |s| s.bytes_push(&bytes));
        }
        _ => unreachable!("typechecked series"),
    }
    done(machine, series_cell)
}

fn n_insert(machine: &mut Machine) -> Exec {
    let series_cell = arg(machine, 1);
    let value = arg(machine, 2);
    writable(machine, &series_cell)?;
    let (series, index) = series_cell.series_payload().expect("series argument");
    let len = machine.heap.get(series).arr_len();
    let at = (index as usize).min(len);
    machine.heap.mutate(series, |s| s.arr_insert(at, &[value]));
    done(machine, series_cell)
}

fn n_pick(machine: &mut Machine) -> Exec {
    let series = arg(machine, 1);
    let index = arg(machine, 2);
    let picked = eval::pick_step(machine, &series, &index)?;
    done(machine, picked)
}

fn n_length_of(machine: &mut Machine) -> Exec {
    let value = arg(machine, 1);
    let length = match value.kind {
        Kind::Object => {
            let varlist = value.context_varlist().expect("context payload");
            crate::context::len(machine, varlist) as i64
        }
        Kind::Text | Kind::Binary => {
            let (series, index) = value.series_payload().expect("series payload");
            (machine.heap.get(series).bytes_len() as i64 - index as i64).max(0)
        }
        _ => {
            let (series, index) = value.series_payload().expect("series payload");
            (machine.heap.get(series).arr_len() as i64 - index as i64).max(0)
        }
    };
    done(machine, Cell::integer(length))
}

fn n_copy(machine: &mut Machine) -> Exec {
    let value = arg(machine, 1);
    let deep = refinement_on(machine, 2);
    let copied = match value.kind {
        Kind::Block | Kind::Group => {
            let (series, index) = value.series_payload().expect("series payload");
            let id = if deep {
                bind::copy_array_deep(machine, series)
            } else {
                let source = machine.heap.get(series);
                let cells: Vec<Cell> = source.arr_cells().to_vec();
                let flavor = source.flavor;
                let id = machine.heap.alloc(rell_core::Series::new_array(
                    flavor,
                    cells.len(),
                    SeriesFlags::POW2,
                ));
                machine.heap.mutate(id, |s| {
                    for cell in cells {
                        s.arr_push(cell);
                    }
                });
                machine.heap.manage(id);
                id
            };
            Cell::array_kind(value.kind, id, index)
        }
        Kind::Text | Kind::Binary => {
            let (series, index) = value.series_payload().expect("series payload");
            let bytes = machine.heap.get(series).bytes()[index as usize..].to_vec();
            let flavor = machine.heap.get(series).flavor;
            let id = machine.heap.alloc(rell_core::Series::new_bytes(
                flavor,
                bytes.len().max(1),
                SeriesFlags::POW2,
            ));
            machine.heap.mutate(id, |s| s.bytes_push(&bytes));
            machine.heap.manage(id);
            let mut cell = value.clone();
            cell.payload = rell_core::Payload::Series {
                series: id,
                index: 0,
            };
            cell
        }
        _ => unreachable!("typechecked value"),
    };
    done(machine, copied)
}

fn n_first(machine: &mut Machine) -> Exec {
    let series = arg(machine, 1);
    let picked = eval::pick_step(machine, &series, &Cell::integer(1))?;
    done(machine, picked)
}

fn n_last(machine: &mut Machine) -> Exec {
    let series = arg(machine, 1);
    let length = match series.kind {
        Kind::Text | Kind::Binary => {
            let (id, index) = series.series_payload().expect("series payload");
            machine.heap.get(id).bytes_len() as i64 - index as i64
        }
        _ => {
            let (id, index) = series.series_payload().expect("series payload");
            machine.heap.get(id).arr_len() as i64 - index as i64
        }
    };
    if length < 1 {
        return done(machine, Cell::null_value());
    }
    let picked = eval::pick_step(machine, &series, &Cell::integer(length))?;
    done(machine, picked)
}
