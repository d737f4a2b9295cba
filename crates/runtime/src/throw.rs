//! Throw labels
//!
//! A non-local exit is a label cell plus an argument cell. The label's
//! identity decides who may consume it:
//!
//! - a blank label is a plain THROW, caught by any CATCH;
//! - a word label names its catcher (`catch/name`), with the well-known
//!   words `halt`, `quit`, and `raised` reserved for cancellation, exit,
//!   and in-flight errors;
//! - a word or action label carrying a context binding targets exactly
//!   one frame (definitional return, unwind, redo) and is matched by
//!   binding identity, never by name.

use rell_core::{Binding, Cell, SeriesId, SymId, known};

use crate::machine::Thrown;

/// Plain `throw value`.
pub fn plain(value: Cell) -> Thrown {
    Thrown {
        label: Cell::blank(),
        arg: value,
    }
}

/// `throw/name value 'word`.
pub fn named(symbol: SymId, value: Cell) -> Thrown {
    Thrown {
        label: Cell::word(symbol),
        arg: value,
    }
}

/// Cancellation; only the top-level trap sees it.
pub fn halt() -> Thrown {
    named(known::HALT, Cell::null_value())
}

pub fn quit(value: Cell) -> Thrown {
    named(known::QUIT, value)
}

pub fn break_loop() -> Thrown {
    named(known::BREAK, Cell::null_value())
}

pub fn continue_loop() -> Thrown {
    named(known::CONTINUE, Cell::null_value())
}

/// Definitional return: the invoked RETURN cell already carries the
/// target frame in its binding.
pub fn definitional_return(return_cell: Cell, value: Cell) -> Thrown {
    Thrown {
        label: return_cell,
        arg: value,
    }
}

/// `unwind target value`: terminate precisely the frame owning
/// `varlist`.
pub fn unwind_to(varlist: SeriesId, value: Cell) -> Thrown {
    let mut label = Cell::word(known::UNWIND);
    label.binding = Binding::Ctx(varlist);
    Thrown { label, arg: value }
}

/// `redo target`: re-enter the frame owning `varlist` at typechecking,
/// optionally switching to a paramlist-compatible sibling action.
pub fn redo_to(varlist: SeriesId, sibling: Option<Cell>) -> Thrown {
    let mut label = Cell::word(known::REDO);
    label.binding = Binding::Ctx(varlist);
    Thrown {
        label,
        arg: sibling.unwrap_or_else(Cell::blank),
    }
}

/// The label's word symbol, if it is a plain (unbound) word label.
pub fn label_symbol(thrown: &Thrown) -> Option<SymId> {
    if thrown.label.kind == rell_core::Kind::Word && thrown.label.binding == Binding::Unbound {
        thrown.label.word_symbol()
    } else {
        None
    }
}

/// Is this the error channel?
pub fn is_raised(thrown: &Thrown) -> bool {
    label_symbol(thrown) == Some(known::RAISED)
}

pub fn is_halt(thrown: &Thrown) -> bool {
    label_symbol(thrown) == Some(known::HALT)
}

pub fn is_quit(thrown: &Thrown) -> bool {
    label_symbol(thrown) == Some(known::QUIT)
}

/// Plain throw (blank label)?
pub fn is_plain(thrown: &Thrown) -> bool {
    thrown.label.kind == rell_core::Kind::Blank && thrown.label.lift == 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_classification() {
        assert!(is_plain(&plain(Cell::integer(1))));
        assert!(is_halt(&halt()));
        assert!(is_quit(&quit(Cell::integer(0))));
        assert!(!is_plain(&halt()));
        assert_eq!(label_symbol(&break_loop()), Some(known::BREAK));
    }

    #[test]
    fn test_bound_labels_hide_their_symbol() {
        // A bound unwind label is not a "named" throw; it matches by
        // frame identity.
        let thrown = unwind_to(SeriesId(3), Cell::blank());
        assert_eq!(label_symbol(&thrown), None);
    }
}
