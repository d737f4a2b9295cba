//! Scanning: text to values
//!
//! The reader for the interchange form `mold` writes: blocks and groups,
//! paths and tuples, the word sigils (`x:`, `:x`, `^x`, `^x:`), N-level
//! quotes, quasiforms, strings with caret escapes, binaries, chars,
//! pairs, and the `#[true]`-style constructions. Source position is
//! tracked per line and attached to each scanned array for error
//! provenance.
//!
//! The scanner allocates series manually and promotes everything it made
//! to GC control only when the whole scan succeeds, so a syntax error
//! cannot strand half-built arrays.

use rell_core::{Cell, CellFlags, Flavor, Kind, Link, Misc, Series, SeriesFlags, SeriesId};

use crate::machine::Machine;

/// Scan failure with source position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanError {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

impl std::fmt::Display for ScanError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "syntax error at line {}, column {}: {}",
            self.line, self.column, self.message
        )
    }
}

/// Characters that terminate any token.
fn is_delimiter(c: char) -> bool {
    c.is_whitespace() || matches!(c, '[' | ']' | '(' | ')' | ';' | ',' | '"')
}

/// Characters allowed inside a word spelling.
fn is_word_char(c: char) -> bool {
    !is_delimiter(c) && !matches!(c, '/' | '.' | ':' | '\'' | '~')
}

struct Scanner<'a> {
    machine: &'a mut Machine,
    chars: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,
    /// Newline seen since the last value was produced.
    pending_newline: bool,
    /// Everything allocated, promoted on success.
    allocated: Vec<SeriesId>,
    file: rell_core::SymId,
}

/// Scan a whole source string into a managed block.
pub fn scan_source(
    machine: &mut Machine,
    file: &str,
    source: &str,
) -> Result<SeriesId, ScanError> {
    let mark = machine.heap.manuals_mark();
    let file = machine.heap.intern(file);
    let mut scanner = Scanner {
        machine,
        chars: source.chars().collect(),
        pos: 0,
        line: 1,
        column: 1,
        pending_newline: false,
        allocated: Vec::new(),
        file,
    };
    let result = scanner.scan_array(None);
    let Scanner {
        allocated,
        machine: m,
        ..
    } = scanner;
    match result {
        Ok(block) => {
            for id in allocated {
                m.heap.manage(id);
            }
            Ok(block)
        }
        Err(err) => {
            // No half-built arrays survive a failed scan.
            m.heap.free_manuals_above(mark);
            Err(err)
        }
    }
}

impl<'a> Scanner<'a> {
    fn error<T>(&self, message: impl Into<String>) -> Result<T, ScanError> {
        Err(ScanError {
            line: self.line,
            column: self.column,
            message: message.into(),
        })
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, ahead: usize) -> Option<char> {
        self.chars.get(self.pos + ahead).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
            self.pending_newline = true;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn skip_blanks(&mut self) {
        loop {
            match self.peek() {
                Some(';') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                _ => return,
            }
        }
    }

    fn alloc_array(&mut self, line: usize) -> SeriesId {
        let mut series = Series::new_array(Flavor::Array, 4, SeriesFlags::POW2);
        series.flags.insert(SeriesFlags::SOURCE);
        series.link = Link::File(self.file);
        series.misc = Misc::Line(line as u32);
        let id = self.machine.heap.alloc(series);
        self.allocated.push(id);
        id
    }

    /// Scan values until `closer` (or end of input when None).
    fn scan_array(&mut self, closer: Option<char>) -> Result<SeriesId, ScanError> {
        let open_line = self.line;
        let array = self.alloc_array(open_line);
        loop {
            self.skip_blanks();
            match (self.peek(), closer) {
                (None, None) => break,
                (None, Some(c)) => return self.error(format!("missing closing {c}")),
                (Some(c), Some(want)) if c == want => {
                    self.bump();
                    break;
                }
                (Some(c), None) if c == ']' || c == ')' => {
                    return self.error(format!("unexpected {c}"));
                }
                _ => {
                    let newline = std::mem::take(&mut self.pending_newline);
                    let mut cell = self.scan_value()?;
                    if newline {
                        cell.flags.insert(CellFlags::NEWLINE_BEFORE);
                    }
                    self.machine.heap.mutate(array, |s| s.arr_push(cell));
                }
            }
        }
        Ok(array)
    }

    /// One value, sigils and sequence joins included.
    fn scan_value(&mut self) -> Result<Cell, ScanError> {
        // Leading quote levels.
        let mut quotes: u8 = 0;
        while self.peek() == Some('\'') {
            self.bump();
            if quotes == rell_core::MAX_QUOTE_DEPTH {
                return self.error("too many quote levels");
            }
            quotes += 1;
        }
        let mut cell = self.scan_unquoted()?;
        if quotes > 0 && cell.quote(quotes).is_err() {
            return self.error("too many quote levels");
        }
        Ok(cell)
    }

    fn scan_unquoted(&mut self) -> Result<Cell, ScanError> {
        let c = match self.peek() {
            Some(c) => c,
            None => return self.error("unexpected end of input"),
        };
        match c {
            '[' => {
                self.bump();
                let id = self.scan_array(Some(']'))?;
                Ok(Cell::block(id))
            }
            '(' => {
                self.bump();
                let id = self.scan_array(Some(')'))?;
                Ok(Cell::group(id))
            }
            ',' => {
                self.bump();
                Ok(Cell::comma())
            }
            '"' => self.scan_string(),
            '#' => self.scan_hash(),
            '~' => self.scan_quasi(),
            ':' => {
                self.bump();
                let inner = self.scan_sequence()?;
                Ok(match inner.kind {
                    Kind::Word => Cell::word_kind(
                        Kind::GetWord,
                        inner.word_symbol().expect("word has symbol"),
                    ),
                    Kind::Path => {
                        let (series, index) =
                            inner.series_payload().expect("path has series");
                        Cell::array_kind(Kind::GetPath, series, index)
                    }
                    _ => return self.error("invalid get- form"),
                })
            }
            '^' => {
                self.bump();
                let spelling = self.take_word_spelling()?;
                let symbol = self.machine.heap.intern(&spelling);
                if self.peek() == Some(':') {
                    self.bump();
                    Ok(Cell::word_kind(Kind::MetaSetWord, symbol))
                } else {
                    Ok(Cell::word_kind(Kind::MetaWord, symbol))
                }
            }
            '_' if self
                .peek_at(1)
                .map(|n| !is_word_char(n))
                .unwrap_or(true) =>
            {
                self.bump();
                Ok(Cell::blank())
            }
            c if c.is_ascii_digit() => self.scan_number(),
            '-' | '+'
                if self
                    .peek_at(1)
                    .map(|n| n.is_ascii_digit())
                    .unwrap_or(false) =>
            {
                self.scan_number()
            }
            _ => self.scan_sequence(),
        }
    }

    /// A word, or a path/tuple joined from word-ish items, with an
    /// optional trailing set `:`.
    fn scan_sequence(&mut self) -> Result<Cell, ScanError> {
        let head = if self.peek() == Some('/') {
            let continued = self
                .peek_at(1)
                .map(|c| is_word_char(c) || c == '(')
                .unwrap_or(false);
            if !continued {
                // Bare slash: the division operator word.
                self.bump();
                let symbol = self.machine.heap.intern("/");
                return Ok(Cell::word(symbol));
            }
            // Leading slash: refinement-style path with a blank head.
            Cell::blank()
        } else {
            self.scan_item()?
        };

        match self.peek() {
            Some('/') => {
                let mut items = vec![head];
                while self.peek() == Some('/') {
                    self.bump();
                    items.push(self.scan_item()?);
                }
                let id = self.items_array(items);
                if self.peek() == Some(':') {
                    self.bump();
                    Ok(Cell::array_kind(Kind::SetPath, id, 0))
                } else {
                    Ok(Cell::array_kind(Kind::Path, id, 0))
                }
            }
            Some('.') => {
                let mut items = vec![head];
                while self.peek() == Some('.') {
                    self.bump();
                    items.push(self.scan_item()?);
                }
                let id = self.items_array(items);
                if self.peek() == Some(':') {
                    self.bump();
                    Ok(Cell::array_kind(Kind::SetTuple, id, 0))
                } else {
                    Ok(Cell::array_kind(Kind::Tuple, id, 0))
                }
            }
            Some(':') if head.kind == Kind::Word => {
                self.bump();
                Ok(Cell::word_kind(
                    Kind::SetWord,
                    head.word_symbol().expect("word has symbol"),
                ))
            }
            _ => Ok(head),
        }
    }

    fn items_array(&mut self, items: Vec<Cell>) -> SeriesId {
        let id = self.alloc_array(self.line);
        self.machine.heap.mutate(id, |s| {
            for item in items {
                s.arr_push(item);
            }
        });
        id
    }

    /// A path/tuple element: word, integer, or group.
    fn scan_item(&mut self) -> Result<Cell, ScanError> {
        match self.peek() {
            Some('(') => {
                self.bump();
                let id = self.scan_array(Some(')'))?;
                Ok(Cell::group(id))
            }
            Some(c) if c.is_ascii_digit() => self.scan_number(),
            Some('<') => self.scan_angle(),
            Some(c) if is_word_char(c) => {
                let spelling = self.take_word_spelling()?;
                let symbol = self.machine.heap.intern(&spelling);
                Ok(Cell::word(symbol))
            }
            Some('/') => {
                // Bare `/` is the division operator word.
                self.bump();
                let symbol = self.machine.heap.intern("/");
                Ok(Cell::word(symbol))
            }
            _ => self.error("expected a word"),
        }
    }

    fn take_word_spelling(&mut self) -> Result<String, ScanError> {
        if self.peek() == Some('<') {
            let cell = self.scan_angle()?;
            return Ok(self
                .machine
                .heap
                .spelling(cell.word_symbol().expect("angle scans to word"))
                .to_string());
        }
        let mut spelling = String::new();
        while let Some(c) = self.peek() {
            if !is_word_char(c) {
                break;
            }
            spelling.push(c);
            self.bump();
        }
        if spelling.is_empty() {
            return self.error("expected a word");
        }
        Ok(spelling)
    }

    /// `<`-led tokens: tags like `<local>` or the comparison words.
    fn scan_angle(&mut self) -> Result<Cell, ScanError> {
        self.bump();
        match self.peek() {
            Some(c) if c.is_alphabetic() => {
                let mut spelling = String::from("<");
                loop {
                    match self.bump() {
                        Some('>') => {
                            spelling.push('>');
                            break;
                        }
                        Some(c) if !c.is_whitespace() => spelling.push(c),
                        _ => return self.error("unclosed tag"),
                    }
                }
                let symbol = self.machine.heap.intern(&spelling);
                Ok(Cell::word(symbol))
            }
            Some('=') => {
                self.bump();
                let symbol = self.machine.heap.intern("<=");
                Ok(Cell::word(symbol))
            }
            Some('>') => {
                self.bump();
                let symbol = self.machine.heap.intern("<>");
                Ok(Cell::word(symbol))
            }
            _ => {
                let symbol = self.machine.heap.intern("<");
                Ok(Cell::word(symbol))
            }
        }
    }

    fn scan_number(&mut self) -> Result<Cell, ScanError> {
        let mut text = String::new();
        if matches!(self.peek(), Some('-') | Some('+')) {
            text.push(self.bump().expect("peeked sign"));
        }
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                text.push(c);
                self.bump();
            } else {
                break;
            }
        }
        // Pair: 3x4
        if self.peek() == Some('x')
            && self
                .peek_at(1)
                .map(|c| c.is_ascii_digit() || c == '-')
                .unwrap_or(false)
        {
            self.bump();
            let mut second = String::new();
            if self.peek() == Some('-') {
                second.push(self.bump().expect("peeked sign"));
            }
            while let Some(c) = self.peek() {
                if c.is_ascii_digit() {
                    second.push(c);
                    self.bump();
                } else {
                    break;
                }
            }
            let x: i64 = match text.parse() {
                Ok(n) => n,
                Err(_) => return self.error("invalid pair"),
            };
            let y: i64 = match second.parse() {
                Ok(n) => n,
                Err(_) => return self.error("invalid pair"),
            };
            return Ok(Cell::pair(x, y));
        }
        // Decimal: one dot followed by digits.
        if self.peek() == Some('.')
            && self
                .peek_at(1)
                .map(|c| c.is_ascii_digit())
                .unwrap_or(false)
        {
            text.push('.');
            self.bump();
            while let Some(c) = self.peek() {
                if c.is_ascii_digit() || c == 'e' || c == '-' || c == '+' {
                    text.push(c);
                    self.bump();
                } else {
                    break;
                }
            }
            return match text.parse::<f64>() {
                Ok(f) => Ok(Cell::decimal(f)),
                Err(_) => self.error(format!("invalid decimal {text}")),
            };
        }
        match text.parse::<i64>() {
            Ok(n) => Ok(Cell::integer(n)),
            Err(_) => self.error(format!("invalid integer {text}")),
        }
    }

    fn scan_string(&mut self) -> Result<Cell, ScanError> {
        self.bump();
        let mut text = String::new();
        loop {
            match self.bump() {
                None => return self.error("unclosed string"),
                Some('"') => break,
                Some('^') => match self.bump() {
                    Some('"') => text.push('"'),
                    Some('^') => text.push('^'),
                    Some('/') => text.push('\n'),
                    Some('-') => text.push('\t'),
                    Some(c) => return self.error(format!("unknown escape ^{c}")),
                    None => return self.error("unclosed string"),
                },
                Some(c) => text.push(c),
            }
        }
        let id = self.machine.heap.alloc(Series::new_bytes(
            Flavor::Text,
            text.len(),
            SeriesFlags::POW2,
        ));
        self.allocated.push(id);
        self.machine.heap.mutate(id, |s| s.bytes_push(text.as_bytes()));
        Ok(Cell::text(id))
    }

    /// `#`-led tokens: `#{...}` binary, `#"c"` char, `#[...]`
    /// construction.
    fn scan_hash(&mut self) -> Result<Cell, ScanError> {
        self.bump();
        match self.peek() {
            Some('{') => {
                self.bump();
                let mut digits = String::new();
                loop {
                    match self.bump() {
                        None => return self.error("unclosed binary"),
                        Some('}') => break,
                        Some(c) if c.is_ascii_hexdigit() => digits.push(c),
                        Some(c) if c.is_whitespace() => {}
                        Some(c) => return self.error(format!("bad binary digit {c}")),
                    }
                }
                if digits.len() % 2 != 0 {
                    return self.error("binary needs an even digit count");
                }
                let bytes: Vec<u8> = digits
                    .as_bytes()
                    .chunks(2)
                    .map(|pair| {
                        let text = std::str::from_utf8(pair).expect("hex digits are ascii");
                        u8::from_str_radix(text, 16).expect("checked hex digits")
                    })
                    .collect();
                let id = self.machine.heap.alloc(Series::new_bytes(
                    Flavor::Binary,
                    bytes.len(),
                    SeriesFlags::POW2,
                ));
                self.allocated.push(id);
                self.machine.heap.mutate(id, |s| s.bytes_push(&bytes));
                Ok(Cell::binary(id))
            }
            Some('"') => {
                self.bump();
                let c = match self.bump() {
                    Some('^') => match self.bump() {
                        Some('"') => '"',
                        Some('^') => '^',
                        Some('/') => '\n',
                        Some('-') => '\t',
                        _ => return self.error("unknown char escape"),
                    },
                    Some(c) => c,
                    None => return self.error("unclosed char"),
                };
                if self.bump() != Some('"') {
                    return self.error("unclosed char");
                }
                Ok(Cell::char(c))
            }
            Some('[') => {
                self.bump();
                self.skip_blanks();
                let word = self.take_word_spelling()?;
                self.skip_blanks();
                if self.bump() != Some(']') {
                    return self.error("unclosed construction");
                }
                match word.as_str() {
                    "true" => Ok(Cell::logic(true)),
                    "false" => Ok(Cell::logic(false)),
                    other => self.error(format!("unknown construction {other}")),
                }
            }
            _ => self.error("unexpected #"),
        }
    }

    /// `~`-led tokens: `~` quasiform blank, `~word~` quasiform word,
    /// `~void~` the void literal.
    fn scan_quasi(&mut self) -> Result<Cell, ScanError> {
        self.bump();
        match self.peek() {
            Some(c) if is_word_char(c) || c == '_' => {
                if self.peek() == Some('_') {
                    self.bump();
                    if self.bump() != Some('~') {
                        return self.error("unclosed quasiform");
                    }
                    let mut cell = Cell::blank();
                    cell.flags.insert(CellFlags::QUASI);
                    return Ok(cell);
                }
                let spelling = self.take_word_spelling()?;
                if self.bump() != Some('~') {
                    return self.error("unclosed quasiform");
                }
                if spelling == "void" {
                    return Ok(Cell::void());
                }
                let symbol = self.machine.heap.intern(&spelling);
                let mut cell = Cell::word(symbol);
                cell.flags.insert(CellFlags::QUASI);
                Ok(cell)
            }
            _ => {
                // Bare `~`: quasiform blank.
                let mut cell = Cell::blank();
                cell.flags.insert(CellFlags::QUASI);
                Ok(cell)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::test_machine;
    use crate::mold::mold;

    fn scan_one(machine: &mut Machine, text: &str) -> Cell {
        let block = scan_source(machine, "test", text).expect("scan succeeds");
        machine.heap.get(block).arr_at(0).cloned().expect("one value")
    }

    fn roundtrip(text: &str) {
        let mut machine = test_machine();
        let cell = scan_one(&mut machine, text);
        assert_eq!(mold(&machine, &cell), text, "mold(scan({text:?}))");
    }

    #[test]
    fn test_roundtrip_scalars() {
        roundtrip("42");
        roundtrip("-7");
        roundtrip("3.25");
        roundtrip("_");
        roundtrip("#[true]");
        roundtrip("3x4");
        roundtrip("#\"a\"");
        roundtrip("\"hi there\"");
        roundtrip("#{DEADBEEF}");
    }

    #[test]
    fn test_roundtrip_words_and_sigils() {
        roundtrip("foo");
        roundtrip("foo:");
        roundtrip(":foo");
        roundtrip("^foo");
        roundtrip("^foo:");
        roundtrip("'foo");
        roundtrip("''foo");
        roundtrip("~foo~");
        roundtrip("+");
        roundtrip("<=");
        roundtrip("<local>");
    }

    #[test]
    fn test_roundtrip_structures() {
        roundtrip("[1 2 3]");
        roundtrip("(a b)");
        roundtrip("[a [b c] \"s\"]");
        roundtrip("a/b/c");
        roundtrip("a/b:");
        roundtrip("obj.field");
        roundtrip("obj.field:");
        roundtrip("/dup");
    }

    #[test]
    fn test_comments_and_commas() {
        let mut machine = test_machine();
        let block =
            scan_source(&mut machine, "test", "1 ; note\n2, 3").expect("scan succeeds");
        let series = machine.heap.get(block);
        let kinds: Vec<Kind> = series.arr_cells().iter().map(|c| c.kind).collect();
        assert_eq!(
            kinds,
            vec![Kind::Integer, Kind::Integer, Kind::Comma, Kind::Integer]
        );
        // The value after the comment carries a newline marker.
        assert!(series.arr_cells()[1].flags.contains(CellFlags::NEWLINE_BEFORE));
    }

    #[test]
    fn test_string_escapes() {
        let mut machine = test_machine();
        let cell = scan_one(&mut machine, "\"a^\"b^/c\"");
        let (series, _) = cell.series_payload().unwrap();
        assert_eq!(machine.heap.get(series).text_str(), "a\"b\nc");
    }

    #[test]
    fn test_void_literal() {
        let mut machine = test_machine();
        let cell = scan_one(&mut machine, "~void~");
        assert!(cell.is_void());
    }

    #[test]
    fn test_scan_errors_have_position() {
        let mut machine = test_machine();
        let err = scan_source(&mut machine, "test", "[1 2").unwrap_err();
        assert!(err.message.contains("missing closing"));
        let err = scan_source(&mut machine, "test", "\"open").unwrap_err();
        assert!(err.message.contains("unclosed string"));
    }

    #[test]
    fn test_quote_ladder() {
        let mut machine = test_machine();
        let cell = scan_one(&mut machine, "'''x");
        assert_eq!(cell.quote_depth(), 3);
        assert_eq!(cell.kind, Kind::Word);
    }

    #[test]
    fn test_line_tracking_on_arrays() {
        let mut machine = test_machine();
        let block = scan_source(&mut machine, "test", "1\n2\n[3]").expect("scan");
        let inner = machine.heap.get(block).arr_at(2).cloned().unwrap();
        let (series, _) = inner.series_payload().unwrap();
        assert_eq!(machine.heap.get(series).misc, Misc::Line(3));
    }
}
