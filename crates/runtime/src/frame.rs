//! Frames and feeds
//!
//! A `Feed` is the evaluator's cursor: an array position plus the virtual
//! binding (patch chain) the code is being viewed through. A `Frame` is one
//! activation record on the machine's frame stack. Frames are pushed for
//! every expression step, block body, and action application; a state byte
//! lets an executor suspend (push a sub-frame) and resume where it left
//! off, which is how natives re-enter the evaluator without recursing.

use rell_core::{ActionId, Cell, SeriesId, SymId};

use crate::machine::Machine;

/// Evaluator cursor: array + index + specifier.
#[derive(Clone, Copy, Debug)]
pub struct Feed {
    pub array: SeriesId,
    pub index: u32,
    /// Head of the virtual-binding patch chain, if any.
    pub specifier: Option<SeriesId>,
}

impl Feed {
    pub fn new(array: SeriesId, index: u32, specifier: Option<SeriesId>) -> Feed {
        Feed {
            array,
            index,
            specifier,
        }
    }

    pub fn at_end(&self, machine: &Machine) -> bool {
        let series = machine.heap.get(self.array);
        !series.is_accessible() || self.index as usize >= series.arr_len()
    }

    /// The cell under the cursor, or None at the tail.
    pub fn current(&self, machine: &Machine) -> Option<Cell> {
        let series = machine.heap.get(self.array);
        if !series.is_accessible() {
            return None;
        }
        series.arr_at(self.index as usize).cloned()
    }

    pub fn advance(&mut self) {
        self.index += 1;
    }
}

/// Which state machine drives a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Executor {
    /// Evaluate one expression from the feed into `out`.
    Step,
    /// Evaluate the feed to exhaustion; `out` holds the last vaporless
    /// product.
    Block,
    /// Fulfill arguments for `phase`, typecheck, dispatch.
    Action,
}

/// Where a finished frame's `out` is delivered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutTarget {
    /// Nobody wants it (effect-only continuations).
    Drop,
    /// Parent's `out`. Stale child output is not copied, which is what
    /// makes invisibles leave the previous product in place.
    Out,
    /// Parent's `spare` (right-hand sides of assignments).
    Spare,
    /// Slot N (1-based) of the parent's varlist.
    Arg(u32),
}

/// One activation record.
#[derive(Debug)]
pub struct Frame {
    pub executor: Executor,
    pub feed: Feed,

    pub out: Cell,
    pub spare: Cell,
    pub scratch: Cell,

    /// Continuation state, meaningful per executor / dispatcher.
    pub state: u8,
    /// Action-frame phase: argument walk, refinement walk, typecheck,
    /// dispatch.
    pub fulfill: u8,
    pub out_to: OutTarget,

    /// Word the action was invoked through, for errors and traces.
    pub label: Option<SymId>,
    /// Action being applied (the paramlist currently typechecked against).
    pub phase: Option<ActionId>,
    /// Action the invocation started as (phase changes on redo).
    pub original: Option<ActionId>,
    /// Argument context; keylist is the action's paramlist.
    pub varlist: Option<SeriesId>,

    /// Fulfillment cursor (pass 1: paramlist walk).
    pub param_index: u32,
    /// Fulfillment cursor (pass 2): position in the refinement words
    /// pushed on the data stack at invocation.
    pub refine_pos: u32,
    /// Pass 2: paramlist index of the refinement argument in flight.
    pub sub_param: u32,

    /// First normal argument comes from the parent's `out` (enfix).
    /// Cleared once consumed; `was_enfix` remembers for the rest of
    /// fulfillment.
    pub enfix_left: bool,
    pub was_enfix: bool,
    /// Suppress enfix lookahead after this step (tight/enfix-right args).
    pub no_lookahead: bool,
    /// Frame's dispatcher is offered in-flight throws.
    pub catches: bool,
    /// A FRAME! cell for this invocation escaped; varlist must outlive
    /// the return as a tombstone.
    pub escaped: bool,

    pub ds_mark: usize,
    pub manuals_mark: usize,
}

impl Frame {
    pub fn new(executor: Executor, feed: Feed, out_to: OutTarget) -> Frame {
        Frame {
            executor,
            feed,
            out: Cell::fresh(),
            spare: Cell::fresh(),
            scratch: Cell::fresh(),
            state: 0,
            fulfill: 0,
            out_to,
            label: None,
            phase: None,
            original: None,
            varlist: None,
            param_index: 0,
            refine_pos: 0,
            sub_param: 0,
            enfix_left: false,
            was_enfix: false,
            no_lookahead: false,
            catches: false,
            escaped: false,
            ds_mark: 0,
            manuals_mark: 0,
        }
    }

    pub fn action(&self) -> ActionId {
        self.phase.expect("frame: no action in non-action frame")
    }
}
