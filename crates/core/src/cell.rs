//! Tagged cells
//!
//! A cell is the fixed-size unit every value lives in: a kind byte, a lift
//! byte, a flag set, a binding, and a payload interpreted per kind.
//!
//! ## Lift byte
//!
//! ```text
//! 0          antiform (unstable form of blank/word/block/group/error)
//! 1          plain value (quasiform when the QUASI flag is also set)
//! n >= 2     n - 1 levels of quote
//! ```
//!
//! Quoting never allocates and never disturbs the kind, so generic code can
//! add and remove quote levels in O(1). The ceiling is 126 quote levels.
//!
//! `Kind::Free` is the poison state a cell is left in by debug scrubbing;
//! `Kind::End` is the array terminator written at capacity-1. Neither is a
//! value: payload accessors refuse both.

use crate::series::SeriesId;
use crate::symbol::SymId;
use bitflags::bitflags;
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Handle to an action record in the runtime's action pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ActionId(pub u32);

/// The closed set of value kinds.
///
/// Kind ordinals index the typeset bitset, so they must stay below 64.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
pub enum Kind {
    Free = 0,
    End = 1,

    Void = 2,
    Blank = 3,
    Comma = 4,

    Logic = 5,
    Integer = 6,
    Decimal = 7,
    Char = 8,
    Pair = 9,

    Word = 10,
    SetWord = 11,
    GetWord = 12,
    MetaWord = 13,
    MetaSetWord = 14,

    Block = 15,
    Group = 16,
    Path = 17,
    SetPath = 18,
    GetPath = 19,
    Tuple = 20,
    SetTuple = 21,

    Text = 22,
    Binary = 23,

    Object = 24,
    Module = 25,
    Error = 26,
    Frame = 27,

    Action = 28,
    Typeset = 29,
    Parameter = 30,
    Handle = 31,
}

pub const KIND_COUNT: usize = 32;

impl Kind {
    /// Word-flavored kinds (carry a symbol payload).
    pub fn is_word_like(self) -> bool {
        matches!(
            self,
            Kind::Word | Kind::SetWord | Kind::GetWord | Kind::MetaWord | Kind::MetaSetWord
        )
    }

    /// Kinds whose payload is a cell array.
    pub fn is_array_like(self) -> bool {
        matches!(
            self,
            Kind::Block
                | Kind::Group
                | Kind::Path
                | Kind::SetPath
                | Kind::GetPath
                | Kind::Tuple
                | Kind::SetTuple
        )
    }

    /// Sequence kinds (pick stepwise in the evaluator).
    pub fn is_sequence(self) -> bool {
        matches!(
            self,
            Kind::Path | Kind::SetPath | Kind::GetPath | Kind::Tuple | Kind::SetTuple
        )
    }

    /// Kinds whose payload references a context varlist.
    pub fn is_context_like(self) -> bool {
        matches!(self, Kind::Object | Kind::Module | Kind::Error | Kind::Frame)
    }

    /// Kinds that evaluate to themselves.
    pub fn is_inert(self) -> bool {
        matches!(
            self,
            Kind::Blank
                | Kind::Logic
                | Kind::Integer
                | Kind::Decimal
                | Kind::Char
                | Kind::Pair
                | Kind::Block
                | Kind::Text
                | Kind::Binary
                | Kind::Object
                | Kind::Module
                | Kind::Error
                | Kind::Frame
                | Kind::Typeset
                | Kind::Parameter
                | Kind::Handle
        )
    }

    /// Kinds with a meaningful antiform (lift byte 0).
    pub fn has_antiform(self) -> bool {
        matches!(
            self,
            Kind::Blank | Kind::Word | Kind::Block | Kind::Group | Kind::Error
        )
    }
}

/// Bitset over `Kind` ordinals, used by parameter typechecks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct TypeBits(pub u64);

impl TypeBits {
    pub const NONE: TypeBits = TypeBits(0);

    /// Every value kind (excludes Free/End markers).
    pub const ANY_VALUE: TypeBits = TypeBits(!0u64 & !0b11);

    pub fn of(kind: Kind) -> TypeBits {
        TypeBits(1 << u8::from(kind))
    }

    pub fn with(self, kind: Kind) -> TypeBits {
        TypeBits(self.0 | 1 << u8::from(kind))
    }

    pub fn union(self, other: TypeBits) -> TypeBits {
        TypeBits(self.0 | other.0)
    }

    pub fn has(self, kind: Kind) -> bool {
        self.0 & (1 << u8::from(kind)) != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

bitflags! {
    /// Per-cell flags.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct CellFlags: u16 {
        /// Writes through a word or path to this slot fail.
        const PROTECTED = 1 << 0;
        /// Reached values may not be mutated this step; spreads from
        /// containers to picked values.
        const CONST = 1 << 1;
        /// Produced without evaluation (inert step result).
        const UNEVALUATED = 1 << 2;
        /// Scanner saw a line break before this cell.
        const NEWLINE_BEFORE = 1 << 3;
        /// Out-cell content predates the current step.
        const STALE = 1 << 4;
        /// Context slot is invisible to reflection and equality.
        const HIDDEN = 1 << 5;
        /// Variable slot invokes its action infix (flag lives on the
        /// slot, not on the action, so one action can be both).
        const ENFIX = 1 << 6;
        /// Lift-1 rendering of an antiform (`~...~`).
        const QUASI = 1 << 7;
    }
}

/// What a word cell is bound to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Binding {
    Unbound,
    /// A context varlist (objects, modules, errors, frame varlists).
    Ctx(SeriesId),
}

/// Parameter classes, in the order argument fulfillment handles them.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
pub enum ParamClass {
    /// One full evaluation step.
    Normal = 0,
    /// One step, but no enfix completion on the produced value.
    Tight = 1,
    /// Next source cell taken literally.
    Hard = 2,
    /// Literal, except groups/get-words evaluate.
    Soft = 3,
    /// Gathered argument is lifted one level so antiforms survive.
    Meta = 4,
    /// Named option; consumes nothing unless invoked at the call site.
    Refinement = 5,
    Return = 6,
    Output = 7,
    Local = 8,
}

bitflags! {
    /// Parameter modifier bits, precomputed from the spec block.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct ParamFlags: u16 {
        /// `<end>`: argument may be absent at end of input.
        const ENDABLE = 1 << 0;
        /// `<opt>`: null is accepted.
        const OPT = 1 << 1;
        /// `<skip>`: parameter is skipped when the next value's kind
        /// does not match its typeset.
        const SKIP = 1 << 2;
        /// `<variadic>`: gathers the remaining items of the expression.
        const VARIADIC = 1 << 3;
        /// `<maybe>`: void argument makes the whole call vanish.
        const MAYBE = 1 << 4;
        /// `<const>`: argument is viewed const inside the body.
        const CONST = 1 << 5;
        /// `<unrun>`: action arguments arrive deactivated.
        const UNRUN = 1 << 6;
    }
}

/// Parameter descriptor payload.
#[derive(Clone, Debug)]
pub struct ParamSpec {
    pub symbol: SymId,
    pub class: ParamClass,
    pub flags: ParamFlags,
    pub types: TypeBits,
    /// Frozen spec array (type words and tags) for reflection; None for
    /// synthesized parameters.
    pub spec: Option<SeriesId>,
}

/// Per-kind payload storage.
#[derive(Clone, Debug)]
pub enum Payload {
    None,
    Logic(bool),
    Integer(i64),
    Decimal(f64),
    Char(char),
    Pair { x: i64, y: i64 },
    /// Word kinds: symbol plus 1-based bound-slot cache (0 = no cache).
    Word { symbol: SymId, index: u32 },
    /// Arrays, strings, binaries: series plus 0-based position.
    Series { series: SeriesId, index: u32 },
    /// Contexts (object/module/error/frame): the varlist.
    Context { varlist: SeriesId },
    Action { action: ActionId },
    Typeset { bits: TypeBits },
    Param(Box<ParamSpec>),
    /// API handle: the pairing series backing it.
    Handle { pairing: SeriesId },
}

/// The fixed-size tagged value.
#[derive(Clone, Debug)]
pub struct Cell {
    pub kind: Kind,
    /// 0 = antiform, 1 = plain, n >= 2 = n-1 quote levels.
    pub lift: u8,
    pub flags: CellFlags,
    pub binding: Binding,
    pub payload: Payload,
}

/// Deepest representable quote level.
pub const MAX_QUOTE_DEPTH: u8 = 126;

impl Cell {
    fn plain(kind: Kind, payload: Payload) -> Cell {
        Cell {
            kind,
            lift: 1,
            flags: CellFlags::empty(),
            binding: Binding::Unbound,
            payload,
        }
    }

    // -- markers ---------------------------------------------------------

    /// Array terminator.
    pub fn end() -> Cell {
        Cell {
            kind: Kind::End,
            lift: 1,
            flags: CellFlags::empty(),
            binding: Binding::Unbound,
            payload: Payload::None,
        }
    }

    /// Poison state for scrubbed storage.
    pub fn poison() -> Cell {
        Cell {
            kind: Kind::Free,
            lift: 1,
            flags: CellFlags::empty(),
            binding: Binding::Unbound,
            payload: Payload::None,
        }
    }

    /// Fresh out-cell state: poison bits plus STALE so invisibles can be
    /// detected by the flag alone.
    pub fn fresh() -> Cell {
        let mut cell = Cell::poison();
        cell.flags.insert(CellFlags::STALE);
        cell
    }

    // -- plain values ----------------------------------------------------

    pub fn void() -> Cell {
        Cell::plain(Kind::Void, Payload::None)
    }

    pub fn blank() -> Cell {
        Cell::plain(Kind::Blank, Payload::None)
    }

    pub fn comma() -> Cell {
        Cell::plain(Kind::Comma, Payload::None)
    }

    pub fn logic(value: bool) -> Cell {
        Cell::plain(Kind::Logic, Payload::Logic(value))
    }

    pub fn integer(value: i64) -> Cell {
        Cell::plain(Kind::Integer, Payload::Integer(value))
    }

    pub fn decimal(value: f64) -> Cell {
        Cell::plain(Kind::Decimal, Payload::Decimal(value))
    }

    pub fn char(value: char) -> Cell {
        Cell::plain(Kind::Char, Payload::Char(value))
    }

    pub fn pair(x: i64, y: i64) -> Cell {
        Cell::plain(Kind::Pair, Payload::Pair { x, y })
    }

    pub fn word(symbol: SymId) -> Cell {
        Cell::plain(Kind::Word, Payload::Word { symbol, index: 0 })
    }

    pub fn word_kind(kind: Kind, symbol: SymId) -> Cell {
        debug_assert!(kind.is_word_like());
        Cell::plain(kind, Payload::Word { symbol, index: 0 })
    }

    pub fn array_kind(kind: Kind, series: SeriesId, index: u32) -> Cell {
        debug_assert!(kind.is_array_like());
        Cell::plain(kind, Payload::Series { series, index })
    }

    pub fn block(series: SeriesId) -> Cell {
        Cell::array_kind(Kind::Block, series, 0)
    }

    pub fn group(series: SeriesId) -> Cell {
        Cell::array_kind(Kind::Group, series, 0)
    }

    pub fn text(series: SeriesId) -> Cell {
        Cell::plain(Kind::Text, Payload::Series { series, index: 0 })
    }

    pub fn binary(series: SeriesId) -> Cell {
        Cell::plain(Kind::Binary, Payload::Series { series, index: 0 })
    }

    pub fn context_kind(kind: Kind, varlist: SeriesId) -> Cell {
        debug_assert!(kind.is_context_like());
        Cell::plain(kind, Payload::Context { varlist })
    }

    pub fn object(varlist: SeriesId) -> Cell {
        Cell::context_kind(Kind::Object, varlist)
    }

    pub fn error(varlist: SeriesId) -> Cell {
        Cell::context_kind(Kind::Error, varlist)
    }

    pub fn frame(varlist: SeriesId) -> Cell {
        Cell::context_kind(Kind::Frame, varlist)
    }

    pub fn action(action: ActionId) -> Cell {
        Cell::plain(Kind::Action, Payload::Action { action })
    }

    pub fn typeset(bits: TypeBits) -> Cell {
        Cell::plain(Kind::Typeset, Payload::Typeset { bits })
    }

    pub fn parameter(spec: ParamSpec) -> Cell {
        Cell::plain(Kind::Parameter, Payload::Param(Box::new(spec)))
    }

    pub fn handle(pairing: SeriesId) -> Cell {
        Cell::plain(Kind::Handle, Payload::Handle { pairing })
    }

    // -- antiforms -------------------------------------------------------

    fn antiform(kind: Kind, payload: Payload) -> Cell {
        debug_assert!(kind.has_antiform());
        Cell {
            kind,
            lift: 0,
            flags: CellFlags::empty(),
            binding: Binding::Unbound,
            payload,
        }
    }

    /// The contents of an unset variable (antiform blank, molds `~`).
    pub fn none_value() -> Cell {
        Cell::antiform(Kind::Blank, Payload::None)
    }

    /// Opted-out / "soft failure" signal (antiform of the word `null`).
    pub fn null_value() -> Cell {
        Cell::antiform(
            Kind::Word,
            Payload::Word {
                symbol: crate::symbol::known::NULL,
                index: 0,
            },
        )
    }

    /// Result of effect-only operations (antiform of the word `trash`).
    pub fn trash() -> Cell {
        Cell::antiform(
            Kind::Word,
            Payload::Word {
                symbol: crate::symbol::known::TRASH,
                index: 0,
            },
        )
    }

    /// Itemwise splice (antiform group).
    pub fn splice(series: SeriesId) -> Cell {
        Cell::antiform(Kind::Group, Payload::Series { series, index: 0 })
    }

    /// Multi-return pack (antiform block).
    pub fn pack(series: SeriesId) -> Cell {
        Cell::antiform(Kind::Block, Payload::Series { series, index: 0 })
    }

    /// Definitional failure (antiform error).
    pub fn failure(varlist: SeriesId) -> Cell {
        Cell::antiform(Kind::Error, Payload::Context { varlist })
    }

    // -- predicates ------------------------------------------------------

    pub fn is_end(&self) -> bool {
        self.kind == Kind::End
    }

    pub fn is_free(&self) -> bool {
        self.kind == Kind::Free
    }

    pub fn is_void(&self) -> bool {
        self.kind == Kind::Void && self.lift == 1
    }

    pub fn is_antiform(&self) -> bool {
        self.lift == 0
    }

    pub fn is_quasiform(&self) -> bool {
        self.lift == 1 && self.flags.contains(CellFlags::QUASI)
    }

    pub fn is_quoted(&self) -> bool {
        self.lift >= 2
    }

    /// Antiform word `null`.
    pub fn is_nulled(&self) -> bool {
        self.lift == 0
            && self.kind == Kind::Word
            && matches!(self.payload, Payload::Word { symbol, .. }
                if symbol == crate::symbol::known::NULL)
    }

    /// Antiform word `trash`.
    pub fn is_trash(&self) -> bool {
        self.lift == 0
            && self.kind == Kind::Word
            && matches!(self.payload, Payload::Word { symbol, .. }
                if symbol == crate::symbol::known::TRASH)
    }

    /// Antiform blank.
    pub fn is_none(&self) -> bool {
        self.lift == 0 && self.kind == Kind::Blank
    }

    pub fn is_pack(&self) -> bool {
        self.lift == 0 && self.kind == Kind::Block
    }

    pub fn is_splice(&self) -> bool {
        self.lift == 0 && self.kind == Kind::Group
    }

    pub fn is_failure(&self) -> bool {
        self.lift == 0 && self.kind == Kind::Error
    }

    /// Unstable antiforms may not be stored in variables; they must decay
    /// or be lifted at the assignment site.
    pub fn is_unstable(&self) -> bool {
        self.is_pack() || self.is_splice() || self.is_failure()
    }

    /// Conditional truth. Errors are for the caller to raise: `None` means
    /// the value has no truthiness (void, trash, unstable forms).
    pub fn truthiness(&self) -> Option<bool> {
        if self.is_quoted() || self.is_quasiform() {
            return Some(true);
        }
        if self.is_nulled() {
            return Some(false);
        }
        if self.is_antiform() {
            return None;
        }
        match (self.kind, &self.payload) {
            (Kind::Logic, Payload::Logic(b)) => Some(*b),
            (Kind::Blank, _) => Some(false),
            (Kind::Void | Kind::Free | Kind::End, _) => None,
            _ => Some(true),
        }
    }

    // -- quoting ---------------------------------------------------------

    /// Number of quote levels on the cell.
    pub fn quote_depth(&self) -> u8 {
        self.lift.saturating_sub(1)
    }

    /// Add `levels` quote levels. Fails above `MAX_QUOTE_DEPTH`.
    ///
    /// The first level on an antiform converts it to its quasiform, so
    /// `unquote(n)` exactly reverses `quote(n)` for every value.
    pub fn quote(&mut self, mut levels: u8) -> Result<(), QuoteOverflow> {
        if levels == 0 {
            return Ok(());
        }
        if self.lift == 0 {
            self.flags.insert(CellFlags::QUASI);
            self.lift = 1;
            levels -= 1;
        }
        let lifted = self.lift as u16 + levels as u16;
        if lifted > MAX_QUOTE_DEPTH as u16 + 1 {
            return Err(QuoteOverflow);
        }
        self.lift = lifted as u8;
        Ok(())
    }

    /// Remove `levels` quote levels; the last level of a quasiform's
    /// ladder lands on the antiform. Fails below the ladder's floor.
    pub fn unquote(&mut self, levels: u8) -> Result<(), QuoteOverflow> {
        let quasi_extra: u16 = if self.flags.contains(CellFlags::QUASI) { 1 } else { 0 };
        let available = self.quote_depth() as u16 + quasi_extra;
        if self.lift == 0 || levels as u16 > available {
            return Err(QuoteOverflow);
        }
        let from_quotes = (levels as u16).min(self.quote_depth() as u16) as u8;
        self.lift -= from_quotes;
        if levels as u16 > from_quotes as u16 {
            self.flags.remove(CellFlags::QUASI);
            self.lift = 0;
        }
        Ok(())
    }

    /// Lift one level: antiforms become quasiforms, everything else gains
    /// a quote. Total function, usable on any value.
    pub fn lift_meta(&mut self) {
        if self.lift == 0 {
            self.flags.insert(CellFlags::QUASI);
            self.lift = 1;
        } else {
            debug_assert!(self.lift <= MAX_QUOTE_DEPTH);
            self.lift += 1;
        }
    }

    /// Undo `lift_meta`.
    pub fn unlift_meta(&mut self) -> Result<(), QuoteOverflow> {
        if self.is_quasiform() {
            self.flags.remove(CellFlags::QUASI);
            self.lift = 0;
            Ok(())
        } else if self.lift >= 2 {
            self.lift -= 1;
            Ok(())
        } else {
            Err(QuoteOverflow)
        }
    }

    // -- payload accessors ----------------------------------------------

    pub fn as_integer(&self) -> Option<i64> {
        match self.payload {
            Payload::Integer(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_decimal(&self) -> Option<f64> {
        match self.payload {
            Payload::Decimal(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_logic(&self) -> Option<bool> {
        match self.payload {
            Payload::Logic(b) => Some(b),
            _ => None,
        }
    }

    pub fn word_symbol(&self) -> Option<SymId> {
        match self.payload {
            Payload::Word { symbol, .. } => Some(symbol),
            _ => None,
        }
    }

    pub fn series_payload(&self) -> Option<(SeriesId, u32)> {
        match self.payload {
            Payload::Series { series, index } => Some((series, index)),
            _ => None,
        }
    }

    pub fn context_varlist(&self) -> Option<SeriesId> {
        match self.payload {
            Payload::Context { varlist } => Some(varlist),
            _ => None,
        }
    }

    pub fn action_id(&self) -> Option<ActionId> {
        match self.payload {
            Payload::Action { action } => Some(action),
            _ => None,
        }
    }

    pub fn param_spec(&self) -> Option<&ParamSpec> {
        match &self.payload {
            Payload::Param(spec) => Some(spec),
            _ => None,
        }
    }
}

/// Quote ladder over- or underflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuoteOverflow;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::known;

    #[test]
    fn test_quote_roundtrip_all_depths() {
        for depth in 0..=MAX_QUOTE_DEPTH {
            let mut cell = Cell::integer(42);
            cell.quote(depth).expect("within ceiling");
            assert_eq!(cell.quote_depth(), depth);
            assert_eq!(cell.kind, Kind::Integer);
            cell.unquote(depth).expect("within ceiling");
            assert_eq!(cell.quote_depth(), 0);
            assert_eq!(cell.as_integer(), Some(42));
        }
    }

    #[test]
    fn test_quote_overflow() {
        let mut cell = Cell::blank();
        assert!(cell.quote(MAX_QUOTE_DEPTH).is_ok());
        assert_eq!(cell.quote(1), Err(QuoteOverflow));
        let mut fresh = Cell::blank();
        assert_eq!(fresh.unquote(1), Err(QuoteOverflow));
    }

    #[test]
    fn test_meta_of_antiform_is_quasiform() {
        let mut cell = Cell::trash();
        assert!(cell.is_antiform());
        cell.lift_meta();
        assert!(cell.is_quasiform());
        assert!(!cell.is_antiform());
        cell.unlift_meta().unwrap();
        assert!(cell.is_trash());
    }

    #[test]
    fn test_quote_of_antiform_goes_through_quasi() {
        let mut cell = Cell::none_value();
        cell.quote(2).unwrap();
        assert!(cell.flags.contains(CellFlags::QUASI));
        assert_eq!(cell.quote_depth(), 1);
        cell.unquote(2).unwrap();
        assert!(cell.is_none());
    }

    #[test]
    fn test_truthiness() {
        assert_eq!(Cell::logic(true).truthiness(), Some(true));
        assert_eq!(Cell::logic(false).truthiness(), Some(false));
        assert_eq!(Cell::blank().truthiness(), Some(false));
        assert_eq!(Cell::null_value().truthiness(), Some(false));
        assert_eq!(Cell::integer(0).truthiness(), Some(true));
        assert_eq!(Cell::void().truthiness(), None);
        assert_eq!(Cell::trash().truthiness(), None);
    }

    #[test]
    fn test_unstable_forms() {
        assert!(Cell::failure(SeriesId(0)).is_unstable());
        assert!(Cell::pack(SeriesId(0)).is_unstable());
        assert!(Cell::splice(SeriesId(0)).is_unstable());
        assert!(!Cell::trash().is_unstable());
        assert!(!Cell::none_value().is_unstable());
        assert!(!Cell::integer(1).is_unstable());
    }

    #[test]
    fn test_sentinel_words() {
        assert!(Cell::null_value().is_nulled());
        assert!(Cell::trash().is_trash());
        assert_eq!(Cell::trash().word_symbol(), Some(known::TRASH));
    }

    #[test]
    fn test_typebits() {
        let bits = TypeBits::of(Kind::Integer).with(Kind::Block);
        assert!(bits.has(Kind::Integer));
        assert!(bits.has(Kind::Block));
        assert!(!bits.has(Kind::Text));
        assert!(TypeBits::ANY_VALUE.has(Kind::Integer));
        assert!(!TypeBits::ANY_VALUE.has(Kind::Free));
        assert!(!TypeBits::ANY_VALUE.has(Kind::End));
    }

    #[test]
    fn test_fresh_out_cell_is_stale() {
        let cell = Cell::fresh();
        assert!(cell.flags.contains(CellFlags::STALE));
        assert!(cell.is_free());
    }
}
