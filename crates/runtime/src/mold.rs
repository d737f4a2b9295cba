//! Molding: values to text
//!
//! `mold` produces the canonical interchange form the scanner reads back;
//! `form` is the softer user-facing rendering (strings lose their quotes,
//! words print bare). Cyclic structures are handled with an explicit
//! stack of the series currently being molded, and a length limit
//! supports the truncated `near` field of errors.

use rell_core::{Cell, Kind, Payload, SeriesId};

use crate::context;
use crate::machine::Machine;
use crate::value::kind_name;

struct Molder<'a> {
    machine: &'a Machine,
    out: String,
    /// Series currently being molded (cycle detection).
    active: Vec<SeriesId>,
    limit: Option<usize>,
    /// Form mode: softer rendering.
    form: bool,
}

impl<'a> Molder<'a> {
    fn push(&mut self, text: &str) {
        if let Some(limit) = self.limit {
            if self.out.len() >= limit {
                return;
            }
            let room = limit - self.out.len();
            if text.len() > room {
                self.out.push_str(&text[..room]);
                self.out.push_str("...");
                return;
            }
        }
        self.out.push_str(text);
    }

    fn truncated(&self) -> bool {
        matches!(self.limit, Some(limit) if self.out.len() >= limit)
    }

    fn mold_cell(&mut self, cell: &Cell) {
        if self.truncated() {
            return;
        }
        // Antiforms render as their lifted (quasi) form.
        if cell.is_antiform() {
            let mut lifted = cell.clone();
            lifted.lift_meta();
            self.mold_cell(&lifted);
            return;
        }
        for _ in 0..cell.quote_depth() {
            self.push("'");
        }
        // The quasi marker survives under quote levels: '~x~ is the
        // quoted quasiform.
        if cell.flags.contains(rell_core::CellFlags::QUASI) {
            self.push("~");
            self.mold_heart(cell);
            self.push("~");
            return;
        }
        self.mold_heart(cell);
    }

    fn mold_heart(&mut self, cell: &Cell) {
        match cell.kind {
            Kind::Free => self.push("#[free]"),
            Kind::End => self.push("#[end]"),
            Kind::Void => self.push("~void~"),
            Kind::Blank => self.push("_"),
            Kind::Comma => self.push(","),
            Kind::Logic => {
                let value = cell.as_logic().unwrap_or(false);
                if self.form {
                    self.push(if value { "true" } else { "false" });
                } else {
                    self.push(if value { "#[true]" } else { "#[false]" });
                }
            }
            Kind::Integer => {
                let n = cell.as_integer().unwrap_or(0);
                self.push(&n.to_string());
            }
            Kind::Decimal => {
                let f = cell.as_decimal().unwrap_or(0.0);
                let mut text = format!("{f}");
                if !text.contains('.') && !text.contains('e') && !text.contains("inf")
                    && !text.contains("NaN")
                {
                    text.push_str(".0");
                }
                self.push(&text);
            }
            Kind::Char => {
                let c = match cell.payload {
                    Payload::Char(c) => c,
                    _ => '?',
                };
                if self.form {
                    self.push(&c.to_string());
                } else {
                    self.push("#\"");
                    self.push_escaped(&c.to_string());
                    self.push("\"");
                }
            }
            Kind::Pair => {
                if let Payload::Pair { x, y } = cell.payload {
                    self.push(&format!("{x}x{y}"));
                }
            }
            Kind::Word | Kind::SetWord | Kind::GetWord | Kind::MetaWord | Kind::MetaSetWord => {
                let spelling = cell
                    .word_symbol()
                    .map(|sym| self.machine.heap.spelling(sym).to_string())
                    .unwrap_or_default();
                match cell.kind {
                    Kind::SetWord => self.push(&format!("{spelling}:")),
                    Kind::GetWord => self.push(&format!(":{spelling}")),
                    Kind::MetaWord => self.push(&format!("^{spelling}")),
                    Kind::MetaSetWord => self.push(&format!("^{spelling}:")),
                    _ => self.push(&spelling),
                }
            }
            Kind::Block => self.mold_array(cell, "[", "]", " "),
            Kind::Group => self.mold_array(cell, "(", ")", " "),
            Kind::Path => self.mold_array(cell, "", "", "/"),
            Kind::SetPath => {
                self.mold_array(cell, "", "", "/");
                self.push(":");
            }
            Kind::GetPath => {
                self.push(":");
                self.mold_array(cell, "", "", "/");
            }
            Kind::Tuple => self.mold_array(cell, "", "", "."),
            Kind::SetTuple => {
                self.mold_array(cell, "", "", ".");
                self.push(":");
            }
            Kind::Text => {
                let Some((series, index)) = cell.series_payload() else {
                    return;
                };
                let node = self.machine.heap.get(series);
                if !node.is_accessible() {
                    self.push("#[text! ...ended...]");
                    return;
                }
                let text = &node.text_str()[index as usize..];
                if self.form {
                    self.push(text);
                } else {
                    self.push("\"");
                    self.push_escaped(text);
                    self.push("\"");
                }
            }
            Kind::Binary => {
                let Some((series, index)) = cell.series_payload() else {
                    return;
                };
                let node = self.machine.heap.get(series);
                if !node.is_accessible() {
                    self.push("#[binary! ...ended...]");
                    return;
                }
                self.push("#{");
                for byte in &node.bytes()[index as usize..] {
                    self.push(&format!("{byte:02X}"));
                }
                self.push("}");
            }
            Kind::Object | Kind::Module => self.mold_context(cell, "object!"),
            Kind::Error => self.mold_context(cell, "error!"),
            Kind::Frame => {
                let Some(varlist) = cell.context_varlist() else {
                    return;
                };
                if !self.machine.heap.get(varlist).is_accessible() {
                    self.push("#[frame! ...ended...]");
                } else {
                    self.mold_context(cell, "frame!");
                }
            }
            Kind::Action => {
                let name = cell
                    .action_id()
                    .and_then(|id| self.machine.actions.get(id.0).name)
                    .map(|sym| self.machine.heap.spelling(sym).to_string())
                    .unwrap_or_else(|| "anonymous".to_string());
                self.push(&format!("#[action! {name}]"));
            }
            Kind::Typeset => {
                self.push("#[typeset! [");
                if let Payload::Typeset { bits } = cell.payload {
                    let mut first = true;
                    for ordinal in 0..rell_core::cell::KIND_COUNT as u8 {
                        let kind = Kind::try_from(ordinal).expect("ordinal in range");
                        if bits.has(kind) {
                            if !first {
                                self.push(" ");
                            }
                            self.push(kind_name(kind));
                            first = false;
                        }
                    }
                }
                self.push("]]");
            }
            Kind::Parameter => {
                if let Some(spec) = cell.param_spec() {
                    let spelling = self.machine.heap.spelling(spec.symbol);
                    self.push(&format!("#[parameter! {spelling}]"));
                }
            }
            Kind::Handle => self.push("#[handle!]"),
        }
    }

    fn mold_array(&mut self, cell: &Cell, open: &str, close: &str, sep: &str) {
        let Some((series, index)) = cell.series_payload() else {
            return;
        };
        self.push(open);
        if self.active.contains(&series) {
            self.push("...");
            self.push(close);
            return;
        }
        let node = self.machine.heap.get(series);
        if !node.is_accessible() {
            self.push("...ended...");
            self.push(close);
            return;
        }
        self.active.push(series);
        let mut items: Vec<Cell> = node.arr_cells()[index as usize..].to_vec();
        // Refinement-style paths render their blank head as a bare slash.
        if sep == "/" && items.first().map(|c| c.kind == Kind::Blank).unwrap_or(false) {
            self.push(sep);
            items.remove(0);
        }
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                self.push(sep);
            }
            self.mold_cell(item);
            if self.truncated() {
                break;
            }
        }
        self.active.pop();
        self.push(close);
    }

    fn mold_context(&mut self, cell: &Cell, type_word: &str) {
        let Some(varlist) = cell.context_varlist() else {
            return;
        };
        self.push("make ");
        self.push(type_word);
        self.push(" [");
        if self.active.contains(&varlist) {
            self.push("...]");
            return;
        }
        self.active.push(varlist);
        let count = context::len(self.machine, varlist);
        let mut first = true;
        for index in 1..=count {
            let slot = context::var_at(self.machine, varlist, index).clone();
            if slot.flags.contains(rell_core::CellFlags::HIDDEN) {
                continue;
            }
            if !first {
                self.push(" ");
            }
            first = false;
            let key = context::key_at(self.machine, varlist, index);
            self.push(self.machine.heap.spelling(key));
            self.push(": ");
            // Words as slot values need a quote so re-evaluation does not
            // chase them.
            if slot.kind == Kind::Word && !slot.is_antiform() {
                self.push("'");
            }
            self.mold_cell(&slot);
            if self.truncated() {
                break;
            }
        }
        self.active.pop();
        self.push("]");
    }

    fn push_escaped(&mut self, text: &str) {
        for c in text.chars() {
            match c {
                '"' => self.push("^\""),
                '^' => self.push("^^"),
                '\n' => self.push("^/"),
                '\t' => self.push("^-"),
                _ => {
                    let mut buf = [0u8; 4];
                    self.push(c.encode_utf8(&mut buf));
                }
            }
        }
    }
}

/// Canonical interchange form.
pub fn mold(machine: &Machine, cell: &Cell) -> String {
    let mut molder = Molder {
        machine,
        out: String::new(),
        active: Vec::new(),
        limit: None,
        form: false,
    };
    molder.mold_cell(cell);
    molder.out
}

/// Mold truncated at `limit` bytes (error `near` fields).
pub fn mold_limited(machine: &Machine, cell: &Cell, limit: usize) -> String {
    let mut molder = Molder {
        machine,
        out: String::new(),
        active: Vec::new(),
        limit: Some(limit),
        form: false,
    };
    molder.mold_cell(cell);
    molder.out
}

/// Softer user-facing rendering.
pub fn form(machine: &Machine, cell: &Cell) -> String {
    let mut molder = Molder {
        machine,
        out: String::new(),
        active: Vec::new(),
        limit: None,
        form: true,
    };
    molder.mold_cell(cell);
    molder.out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::test_machine;
    use rell_core::{Flavor, Series, SeriesFlags};

    #[test]
    fn test_mold_scalars() {
        let machine = test_machine();
        assert_eq!(mold(&machine, &Cell::integer(42)), "42");
        assert_eq!(mold(&machine, &Cell::decimal(1.5)), "1.5");
        assert_eq!(mold(&machine, &Cell::decimal(2.0)), "2.0");
        assert_eq!(mold(&machine, &Cell::blank()), "_");
        assert_eq!(mold(&machine, &Cell::logic(true)), "#[true]");
        assert_eq!(form(&machine, &Cell::logic(true)), "true");
    }

    #[test]
    fn test_mold_quotes_and_quasi() {
        let mut machine = test_machine();
        let sym = machine.heap.intern("foo");
        let mut word = Cell::word(sym);
        word.quote(2).unwrap();
        assert_eq!(mold(&machine, &word), "''foo");
        assert_eq!(mold(&machine, &Cell::trash()), "~trash~");
        assert_eq!(mold(&machine, &Cell::none_value()), "~_~");
    }

    #[test]
    fn test_mold_block_and_cycle() {
        let mut machine = test_machine();
        let block = machine
            .heap
            .alloc(Series::new_array(Flavor::Array, 3, SeriesFlags::POW2));
        machine.heap.mutate(block, |s| {
            s.arr_push(Cell::integer(1));
            s.arr_push(Cell::integer(2));
        });
        // Self-referential block molds with an elision, not a hang.
        machine.heap.mutate(block, |s| s.arr_push(Cell::block(block)));
        let text = mold(&machine, &Cell::block(block));
        assert_eq!(text, "[1 2 [...]]");
    }

    #[test]
    fn test_mold_string_escapes() {
        let mut machine = test_machine();
        let id = machine
            .heap
            .alloc(Series::new_bytes(Flavor::Text, 16, SeriesFlags::POW2));
        machine.heap.mutate(id, |s| s.bytes_push(b"a\"b\nc"));
        let cell = Cell::text(id);
        assert_eq!(mold(&machine, &cell), "\"a^\"b^/c\"");
        assert_eq!(form(&machine, &cell), "a\"b\nc");
    }

    #[test]
    fn test_mold_limited_truncates() {
        let mut machine = test_machine();
        let block = machine
            .heap
            .alloc(Series::new_array(Flavor::Array, 64, SeriesFlags::POW2));
        machine.heap.mutate(block, |s| {
            for i in 0..64 {
                s.arr_push(Cell::integer(i));
            }
        });
        let text = mold_limited(&machine, &Cell::block(block), 20);
        assert!(text.len() <= 24);
        assert!(text.ends_with("..."));
    }
}
