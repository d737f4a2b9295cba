//! Rell core: the heap layer of the runtime
//!
//! Key design principles:
//! - Cell: the fixed-size tagged value (kind, lift byte, flags, binding,
//!   payload)
//! - Series: flavored variable-length storage; arrays are series of cells
//! - Heap: pools + symbol interner + allocation accounting; everything is
//!   addressed by index handles so the cyclic runtime graph needs no
//!   pointer webs

pub mod cell;
pub mod heap;
pub mod pool;
pub mod series;
pub mod symbol;

// Re-export the types nearly every consumer touches.
pub use cell::{
    ActionId, Binding, Cell, CellFlags, Kind, MAX_QUOTE_DEPTH, ParamClass, ParamFlags, ParamSpec,
    Payload, QuoteOverflow, TypeBits,
};
pub use heap::Heap;
pub use series::{Content, Flavor, Link, Misc, Series, SeriesFlags, SeriesId};
pub use symbol::{SymId, SymbolTable, known};
