//! Interned symbols
//!
//! Word spellings are interned once and referred to by `SymId`. Two ids
//! compare equal only for byte-identical spellings; case-insensitive
//! comparison goes through a canonical id shared by all case variants of
//! the same spelling (`Foo`, `foo`, `FOO` share one canon).
//!
//! The runtime pre-interns the symbols it needs to recognize by identity
//! (throw labels, error fields, type names) so they have fixed ids.

use std::collections::HashMap;

/// Interned symbol id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymId(pub u32);

struct SymbolRec {
    spelling: Box<str>,
    canon: SymId,
}

/// The interner. One per heap; symbols are never collected.
pub struct SymbolTable {
    records: Vec<SymbolRec>,
    exact: HashMap<Box<str>, SymId>,
    canon: HashMap<String, SymId>,
}

impl SymbolTable {
    /// Build a table with the well-known symbols pre-interned at their
    /// fixed ids. Panics if the `known` table is out of order, which is a
    /// startup self-test rather than a runtime condition.
    pub fn new() -> Self {
        let mut table = SymbolTable {
            records: Vec::new(),
            exact: HashMap::new(),
            canon: HashMap::new(),
        };
        for (spelling, id) in known::ALL {
            let interned = table.intern(spelling);
            assert_eq!(
                interned, *id,
                "well-known symbol {spelling:?} interned at {interned:?}, table says {id:?}"
            );
        }
        table
    }

    /// Intern a spelling, returning its id. Idempotent.
    pub fn intern(&mut self, spelling: &str) -> SymId {
        if let Some(&id) = self.exact.get(spelling) {
            return id;
        }
        let id = SymId(self.records.len() as u32);
        let lowered = spelling.to_lowercase();
        let canon = *self.canon.entry(lowered).or_insert(id);
        self.records.push(SymbolRec {
            spelling: spelling.into(),
            canon,
        });
        self.exact.insert(spelling.into(), id);
        id
    }

    /// The spelling a symbol was interned with.
    pub fn spelling(&self, id: SymId) -> &str {
        &self.records[id.0 as usize].spelling
    }

    /// Canonical id shared by all case variants of this spelling.
    pub fn canon(&self, id: SymId) -> SymId {
        self.records[id.0 as usize].canon
    }

    /// Case-insensitive symbol equality.
    pub fn eq_fold(&self, a: SymId, b: SymId) -> bool {
        self.canon(a) == self.canon(b)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Well-known symbols with fixed ids.
///
/// Order here must match the intern order in `SymbolTable::new`; the
/// constructor asserts it.
pub mod known {
    use super::SymId;

    pub const RETURN: SymId = SymId(0);
    pub const QUIT: SymId = SymId(1);
    pub const HALT: SymId = SymId(2);
    pub const UNWIND: SymId = SymId(3);
    pub const BREAK: SymId = SymId(4);
    pub const CONTINUE: SymId = SymId(5);
    pub const RAISED: SymId = SymId(6);

    // ERROR! prototype fields
    pub const TYPE: SymId = SymId(7);
    pub const ID: SymId = SymId(8);
    pub const ARG1: SymId = SymId(9);
    pub const ARG2: SymId = SymId(10);
    pub const ARG3: SymId = SymId(11);
    pub const WHERE: SymId = SymId(12);
    pub const NEAR: SymId = SymId(13);
    pub const FILE: SymId = SymId(14);
    pub const LINE: SymId = SymId(15);

    // Error categories
    pub const SCRIPT: SymId = SymId(16);
    pub const ACCESS: SymId = SymId(17);
    pub const MATH: SymId = SymId(18);
    pub const INTERNAL: SymId = SymId(19);
    pub const USER: SymId = SymId(20);

    // MAKE targets
    pub const OBJECT_X: SymId = SymId(21);
    pub const ERROR_X: SymId = SymId(22);

    // Spec-block tags and markers
    pub const LOCAL_TAG: SymId = SymId(23);

    pub const TRASH: SymId = SymId(24);
    pub const NULL: SymId = SymId(25);
    pub const TRUE: SymId = SymId(26);
    pub const FALSE: SymId = SymId(27);
    pub const REDO: SymId = SymId(28);

    pub const ALL: &[(&str, SymId)] = &[
        ("return", RETURN),
        ("quit", QUIT),
        ("halt", HALT),
        ("unwind", UNWIND),
        ("break", BREAK),
        ("continue", CONTINUE),
        ("raised", RAISED),
        ("type", TYPE),
        ("id", ID),
        ("arg1", ARG1),
        ("arg2", ARG2),
        ("arg3", ARG3),
        ("where", WHERE),
        ("near", NEAR),
        ("file", FILE),
        ("line", LINE),
        ("script", SCRIPT),
        ("access", ACCESS),
        ("math", MATH),
        ("internal", INTERNAL),
        ("user", USER),
        ("object!", OBJECT_X),
        ("error!", ERROR_X),
        ("<local>", LOCAL_TAG),
        ("trash", TRASH),
        ("null", NULL),
        ("true", TRUE),
        ("false", FALSE),
        ("redo", REDO),
    ];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_idempotent() {
        let mut table = SymbolTable::new();
        let a = table.intern("append");
        let b = table.intern("append");
        assert_eq!(a, b);
        assert_eq!(table.spelling(a), "append");
    }

    #[test]
    fn test_case_variants_share_canon() {
        let mut table = SymbolTable::new();
        let lower = table.intern("foo");
        let upper = table.intern("FOO");
        let mixed = table.intern("Foo");
        assert_ne!(lower, upper);
        assert_ne!(lower, mixed);
        assert!(table.eq_fold(lower, upper));
        assert!(table.eq_fold(upper, mixed));
        assert_eq!(table.canon(upper), lower);
    }

    #[test]
    fn test_distinct_spellings_differ() {
        let mut table = SymbolTable::new();
        let a = table.intern("alpha");
        let b = table.intern("beta");
        assert_ne!(a, b);
        assert!(!table.eq_fold(a, b));
    }

    #[test]
    fn test_well_known_ids_fixed() {
        let table = SymbolTable::new();
        assert_eq!(table.spelling(known::RETURN), "return");
        assert_eq!(table.spelling(known::ERROR_X), "error!");
        assert_eq!(table.spelling(known::FALSE), "false");
    }
}
