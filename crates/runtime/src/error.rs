//! The error model
//!
//! An error is an ERROR!-archetyped context with a fixed prototype:
//! `type` (category word), `id` (word), `arg1`..`arg3`, `where` (labels of
//! the frames that were live), `near` (molded source neighborhood), and
//! `file`/`line` when the source carried provenance.
//!
//! Raising constructs the context and hands back a `Raise`; the
//! trampoline converts that into a throw under the canonical `raised`
//! label. Natives that prefer a definitional failure return the same
//! context wrapped as an antiform error instead of raising.

use rell_core::{Cell, Flavor, Kind, Link, Misc, SeriesId, known};

use crate::context;
use crate::machine::{Machine, Raise, Thrown};
use crate::mold;

/// Message templates, keyed by error id. `{1}`..`{3}` substitute the
/// molded args.
fn template(id: &str) -> Option<&'static str> {
    Some(match id {
        // script
        "no-value" => "{1} has no value",
        "not-bound" => "{1} is not bound to a context",
        "protected-word" => "{1} is protected from modification",
        "bad-void-assign" => "cannot assign a void; use a lifting assignment",
        "bad-antiform-assign" => "unstable antiform must decay or be lifted to assign",
        "need-non-end" => "expression needs a value but hit the end",
        "bad-parameter" => "invalid parameter spec item: {1}",
        "bad-refine" => "action has no refinement named {1}",
        "expect-arg" => "{1} does not allow {3} for its {2} argument",
        "bad-pick" => "cannot pick {1} out of this value",
        "out-of-range" => "position {1} is out of range",
        "bad-cast" => "cannot convert {1}",
        "bad-make" => "cannot make {1} from {2}",
        "quote-depth" => "quote level ladder over- or underflow",
        "uncaught-throw" => "throw with label {1} was not caught",
        "frame-ended" => "frame for this variable has already returned",
        "bad-sequence-item" => "invalid item in path or tuple: {1}",
        "const-value" => "value is const and cannot be modified",
        "fixed-size" => "series is fixed-size and cannot expand",
        // math
        "zero-divide" => "attempt to divide by zero",
        "overflow" => "math or quote overflow",
        // access
        "read-only" => "value is read-only",
        // internal
        "no-memory" => "not enough memory",
        "stack-overflow" => "evaluation stack depth exceeded",
        "invariant" => "internal invariant violated: {1}",
        // user
        "message" => "{1}",
        _ => return None,
    })
}

/// Build an ERROR! context. The varlist is managed immediately: errors
/// escape into throws and outlive any particular frame.
pub fn make_error(
    machine: &mut Machine,
    category: &str,
    id: &str,
    args: &[Cell],
) -> SeriesId {
    let ctx = context::make_context(machine, Kind::Error, 9);
    let category = machine.heap.intern(category);
    let id = machine.heap.intern(id);

    for (key, value) in [
        (known::TYPE, Cell::word(category)),
        (known::ID, Cell::word(id)),
        (known::ARG1, args.first().cloned().unwrap_or(Cell::blank())),
        (known::ARG2, args.get(1).cloned().unwrap_or(Cell::blank())),
        (known::ARG3, args.get(2).cloned().unwrap_or(Cell::blank())),
        (known::WHERE, where_block(machine)),
        (known::NEAR, near_text(machine)),
        (known::FILE, file_of_top(machine)),
        (known::LINE, line_of_top(machine)),
    ] {
        let index = context::append_key(machine, ctx, key);
        *context::var_at_mut(machine, ctx, index) = value;
    }

    let keylist = context::keylist_of(machine, ctx);
    machine.heap.manage(ctx);
    machine.heap.manage(keylist);
    ctx
}

/// Raise an abrupt error: make the context, return the `Raise` the
/// trampoline turns into a `raised`-labeled throw.
pub fn raise(machine: &mut Machine, category: &str, id: &str, args: &[Cell]) -> Raise {
    Raise(make_error(machine, category, id, args))
}

/// The throw carrying an error context.
pub fn throw_for(error: SeriesId) -> Thrown {
    Thrown {
        label: Cell::word(known::RAISED),
        arg: Cell::error(error),
    }
}

/// Labels of the live frames, innermost last.
fn where_block(machine: &mut Machine) -> Cell {
    let labels: Vec<Cell> = machine
        .frames
        .iter()
        .filter_map(|f| f.label.map(Cell::word))
        .collect();
    let block = machine.heap.alloc(rell_core::Series::new_array(
        Flavor::Array,
        labels.len(),
        rell_core::SeriesFlags::POW2,
    ));
    machine.heap.mutate(block, |s| {
        for label in &labels {
            s.arr_push(label.clone());
        }
    });
    machine.heap.manage(block);
    Cell::block(block)
}

/// Molded neighborhood of the top frame's feed position.
fn near_text(machine: &mut Machine) -> Cell {
    let Some(frame) = machine.frames.last() else {
        return Cell::blank();
    };
    let feed = frame.feed;
    let series = machine.heap.get(feed.array);
    if !series.is_accessible() {
        return Cell::blank();
    }
    let start = (feed.index as usize).saturating_sub(3);
    let cells: Vec<Cell> = series
        .arr_cells()
        .iter()
        .skip(start)
        .take(7)
        .cloned()
        .collect();
    let mut text = String::new();
    for (i, cell) in cells.iter().enumerate() {
        if i > 0 {
            text.push(' ');
        }
        text.push_str(&mold::mold_limited(machine, cell, 40));
    }
    let id = machine.heap.alloc(rell_core::Series::new_bytes(
        Flavor::Text,
        text.len(),
        rell_core::SeriesFlags::empty(),
    ));
    machine.heap.mutate(id, |s| s.bytes_push(text.as_bytes()));
    machine.heap.manage(id);
    Cell::text(id)
}

fn file_of_top(machine: &Machine) -> Cell {
    let Some(frame) = machine.frames.last() else {
        return Cell::blank();
    };
    match machine.heap.get(frame.feed.array).link {
        Link::File(sym) => Cell::word(sym),
        _ => Cell::blank(),
    }
}

fn line_of_top(machine: &Machine) -> Cell {
    let Some(frame) = machine.frames.last() else {
        return Cell::blank();
    };
    match machine.heap.get(frame.feed.array).misc {
        Misc::Line(line) => Cell::integer(line as i64),
        _ => Cell::blank(),
    }
}

fn field(machine: &Machine, error: SeriesId, key: rell_core::SymId) -> Option<Cell> {
    context::find_key(machine, error, key, true)
        .map(|index| context::var_at(machine, error, index).clone())
}

/// The id word of an error context.
pub fn id_of(machine: &Machine, error: SeriesId) -> Option<rell_core::SymId> {
    field(machine, error, known::ID).and_then(|c| c.word_symbol())
}

pub fn type_of(machine: &Machine, error: SeriesId) -> Option<rell_core::SymId> {
    field(machine, error, known::TYPE).and_then(|c| c.word_symbol())
}

/// Expand the message template with the molded args.
pub fn message(machine: &mut Machine, error: SeriesId) -> String {
    let id = id_of(machine, error)
        .map(|sym| machine.heap.spelling(sym).to_string())
        .unwrap_or_default();
    let Some(tpl) = template(&id) else {
        return id;
    };
    let mut text = tpl.to_string();
    for (n, key) in [(1, known::ARG1), (2, known::ARG2), (3, known::ARG3)] {
        let marker = format!("{{{n}}}");
        if text.contains(&marker) {
            let arg = field(machine, error, key).unwrap_or(Cell::blank());
            let molded = mold::mold_limited(machine, &arg, 60);
            text = text.replace(&marker, &molded);
        }
    }
    text
}

/// Host-boundary rendering of an uncaught error.
pub fn render(machine: &mut Machine, error: SeriesId) -> String {
    let type_name = type_of(machine, error)
        .map(|sym| {
            let spelling = machine.heap.spelling(sym);
            let mut chars = spelling.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .unwrap_or_else(|| "Script".to_string());
    let id = id_of(machine, error)
        .map(|sym| machine.heap.spelling(sym).to_string())
        .unwrap_or_default();
    let msg = message(machine, error);

    let mut out = format!("** {type_name} Error ({id}): {msg}");
    if let Some(where_cell) = field(machine, error, known::WHERE)
        && let Some((series, _)) = where_cell.series_payload()
        && machine.heap.get(series).arr_len() > 0
    {
        out.push_str("\n** Where: ");
        out.push_str(&mold::mold_limited(machine, &where_cell, 80));
    }
    if let Some(near) = field(machine, error, known::NEAR)
        && let Some((series, _)) = near.series_payload()
        && machine.heap.get(series).is_accessible()
        && machine.heap.get(series).bytes_len() > 0
    {
        out.push_str("\n** Near: ");
        out.push_str(machine.heap.get(series).text_str());
    }
    if let Some(line) = field(machine, error, known::LINE)
        && let Some(n) = line.as_integer()
    {
        let file = field(machine, error, known::FILE)
            .and_then(|c| c.word_symbol())
            .map(|sym| machine.heap.spelling(sym).to_string())
            .unwrap_or_else(|| "(source)".to_string());
        out.push_str(&format!("\n** File: {file}, line {n}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::test_machine;

    #[test]
    fn test_error_prototype_fields() {
        let mut machine = test_machine();
        let err = make_error(&mut machine, "math", "zero-divide", &[]);
        let type_sym = type_of(&machine, err).unwrap();
        assert_eq!(machine.heap.spelling(type_sym), "math");
        let id_sym = id_of(&machine, err).unwrap();
        assert_eq!(machine.heap.spelling(id_sym), "zero-divide");
    }

    #[test]
    fn test_message_substitutes_args() {
        let mut machine = test_machine();
        let sym = machine.heap.intern("x");
        let err = make_error(&mut machine, "script", "no-value", &[Cell::word(sym)]);
        assert_eq!(message(&mut machine, err), "x has no value");
    }

    #[test]
    fn test_render_carries_type_and_id() {
        let mut machine = test_machine();
        let err = make_error(&mut machine, "math", "zero-divide", &[]);
        let text = render(&mut machine, err);
        assert!(text.starts_with("** Math Error (zero-divide):"));
        assert!(text.contains("divide by zero"));
    }
}
