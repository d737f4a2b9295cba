//! Property tests: quote ladder round-trips, scan/mold round-trips,
//! and series expansion against a model.

use quickcheck::{Arbitrary, Gen, quickcheck};
use rell_runtime::core::{Cell, Flavor, Series, SeriesFlags};
use rell_runtime::value::values_equal;
use rell_runtime::{Machine, mold, scan};

// ---------------------------------------------------------------------
// Quote round-trip
// ---------------------------------------------------------------------

quickcheck! {
    fn prop_quote_roundtrip(n: i64, depth: u8) -> bool {
        let depth = depth % 127; // 0..=126
        let mut cell = Cell::integer(n);
        cell.quote(depth).expect("depth within ceiling");
        if cell.quote_depth() != depth {
            return false;
        }
        cell.unquote(depth).expect("depth within ceiling");
        cell.quote_depth() == 0 && cell.as_integer() == Some(n)
    }
}

// ---------------------------------------------------------------------
// Scan/mold round-trip
// ---------------------------------------------------------------------

/// Generator for values the interchange form must round-trip.
#[derive(Clone, Debug)]
enum GenValue {
    Int(i64),
    /// Hundredths of an i32: always formats with a decimal point.
    Dec(i32),
    Word(String),
    QuasiWord(String),
    Str(String),
    Binary(Vec<u8>),
    Blank,
    Logic(bool),
    Char(char),
    Pair(i64, i64),
    Block(Vec<GenValue>),
    Group(Vec<GenValue>),
    Path(Vec<String>),
    Tuple(Vec<String>),
    Quoted(Box<GenValue>, u8),
}

fn gen_spelling(g: &mut Gen) -> String {
    let letters = [
        'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'k', 'm', 'n', 'p', 'q', 'r', 's', 't', 'w',
        'x', 'y', 'z',
    ];
    let len = usize::arbitrary(g) % 6 + 1;
    let mut spelling = String::new();
    for i in 0..len {
        if i > 0 && bool::arbitrary(g) && i + 1 < len {
            spelling.push('-');
        }
        spelling.push(*g.choose(&letters).expect("non-empty choice"));
    }
    spelling
}

fn gen_value(g: &mut Gen, depth: usize) -> GenValue {
    let scalar_only = depth == 0;
    let pick = usize::arbitrary(g) % if scalar_only { 10 } else { 15 };
    match pick {
        0 => GenValue::Int(i64::arbitrary(g)),
        1 => GenValue::Dec(i32::arbitrary(g)),
        2 => GenValue::Word(gen_spelling(g)),
        3 => {
            let mut spelling = gen_spelling(g);
            if spelling == "void" {
                spelling.push('x');
            }
            GenValue::QuasiWord(spelling)
        }
        4 => GenValue::Str(String::arbitrary(g)),
        5 => GenValue::Binary(Vec::arbitrary(g)),
        6 => GenValue::Blank,
        7 => GenValue::Logic(bool::arbitrary(g)),
        8 => {
            let c = char::arbitrary(g);
            GenValue::Char(if c.is_control() { 'c' } else { c })
        }
        9 => GenValue::Pair(i64::arbitrary(g), i64::arbitrary(g)),
        10 | 11 => {
            let len = usize::arbitrary(g) % 4;
            let items = (0..len).map(|_| gen_value(g, depth - 1)).collect();
            if pick == 10 {
                GenValue::Block(items)
            } else {
                GenValue::Group(items)
            }
        }
        12 => {
            let len = usize::arbitrary(g) % 2 + 2;
            GenValue::Path((0..len).map(|_| gen_spelling(g)).collect())
        }
        13 => {
            let len = usize::arbitrary(g) % 2 + 2;
            GenValue::Tuple((0..len).map(|_| gen_spelling(g)).collect())
        }
        _ => GenValue::Quoted(
            Box::new(gen_value(g, depth - 1)),
            u8::arbitrary(g) % 3 + 1,
        ),
    }
}

impl Arbitrary for GenValue {
    fn arbitrary(g: &mut Gen) -> Self {
        gen_value(g, 3)
    }
}

fn realize(machine: &mut Machine, gen_val: &GenValue) -> Cell {
    match gen_val {
        GenValue::Int(n) => Cell::integer(*n),
        GenValue::Dec(hundredths) => Cell::decimal(f64::from(*hundredths) / 100.0),
        GenValue::Word(spelling) => Cell::word(machine.heap.intern(spelling)),
        GenValue::QuasiWord(spelling) => {
            let mut cell = Cell::word(machine.heap.intern(spelling));
            cell.flags.insert(rell_runtime::core::CellFlags::QUASI);
            cell
        }
        GenValue::Str(text) => machine.text_cell(text),
        GenValue::Binary(bytes) => {
            let id = machine.heap.alloc(Series::new_bytes(
                Flavor::Binary,
                bytes.len().max(1),
                SeriesFlags::POW2,
            ));
            machine.heap.mutate(id, |s| s.bytes_push(bytes));
            machine.heap.manage(id);
            Cell::binary(id)
        }
        GenValue::Blank => Cell::blank(),
        GenValue::Logic(value) => Cell::logic(*value),
        GenValue::Char(c) => Cell::char(*c),
        GenValue::Pair(x, y) => Cell::pair(*x, *y),
        GenValue::Block(items) | GenValue::Group(items) => {
            let id = machine.heap.alloc(Series::new_array(
                Flavor::Array,
                items.len(),
                SeriesFlags::POW2,
            ));
            for item in items {
                let cell = realize(machine, item);
                machine.heap.mutate(id, |s| s.arr_push(cell));
            }
            machine.heap.manage(id);
            if matches!(gen_val, GenValue::Block(_)) {
                Cell::block(id)
            } else {
                Cell::group(id)
            }
        }
        GenValue::Path(segments) | GenValue::Tuple(segments) => {
            let id = machine.heap.alloc(Series::new_array(
                Flavor::Array,
                segments.len(),
                SeriesFlags::POW2,
            ));
            for segment in segments {
                let cell = Cell::word(machine.heap.intern(segment));
                machine.heap.mutate(id, |s| s.arr_push(cell));
            }
            machine.heap.manage(id);
            let kind = if matches!(gen_val, GenValue::Path(_)) {
                rell_runtime::core::Kind::Path
            } else {
                rell_runtime::core::Kind::Tuple
            };
            Cell::array_kind(kind, id, 0)
        }
        GenValue::Quoted(inner, depth) => {
            let mut cell = realize(machine, inner);
            if cell.quote(*depth).is_err() {
                // Ceiling reached on nested quoting; keep what fits.
            }
            cell
        }
    }
}

quickcheck! {
    fn prop_scan_mold_roundtrip(gen_val: GenValue) -> bool {
        let mut machine = Machine::new(1);
        let original = realize(&mut machine, &gen_val);
        let molded = mold::mold(&machine, &original);
        let rescanned = match scan::scan_source(&mut machine, "prop", &molded) {
            Ok(block) => block,
            Err(err) => panic!("molded form {molded:?} does not scan: {err}"),
        };
        let series = machine.heap.get(rescanned);
        if series.arr_len() != 1 {
            return false;
        }
        let cell = series.arr_at(0).cloned().expect("one value");
        values_equal(&machine, &original, &cell, true)
    }
}

// ---------------------------------------------------------------------
// Series expansion against a model
// ---------------------------------------------------------------------

#[derive(Clone, Debug)]
enum SeriesOp {
    Push(i64),
    InsertAt(usize, i64),
    RemoveAt(usize),
}

impl Arbitrary for SeriesOp {
    fn arbitrary(g: &mut Gen) -> Self {
        match usize::arbitrary(g) % 3 {
            0 => SeriesOp::Push(i64::arbitrary(g)),
            1 => SeriesOp::InsertAt(usize::arbitrary(g), i64::arbitrary(g)),
            _ => SeriesOp::RemoveAt(usize::arbitrary(g)),
        }
    }
}

quickcheck! {
    fn prop_series_expansion_preserves_contents(ops: Vec<SeriesOp>) -> bool {
        let mut series = Series::new_array(Flavor::Array, 1, SeriesFlags::POW2);
        let mut model: Vec<i64> = Vec::new();
        for op in ops {
            match op {
                SeriesOp::Push(v) => {
                    series.arr_push(Cell::integer(v));
                    model.push(v);
                }
                SeriesOp::InsertAt(at, v) => {
                    let at = at % (model.len() + 1);
                    series.arr_insert(at, &[Cell::integer(v)]);
                    model.insert(at, v);
                }
                SeriesOp::RemoveAt(at) => {
                    if model.is_empty() {
                        continue;
                    }
                    let at = at % model.len();
                    series.arr_remove(at, 1);
                    model.remove(at);
                }
            }
            let actual: Vec<i64> = series
                .arr_cells()
                .iter()
                .map(|c| c.as_integer().expect("integer cell"))
                .collect();
            if actual != model {
                return false;
            }
        }
        true
    }
}
