//! The machine
//!
//! One `Machine` is one logical interpreter: the heap, the action pool,
//! the frame stack, the shared data stack, and the in-flight throw. All
//! evaluation is single-threaded and cooperative; the only way anything
//! re-enters the evaluator is by pushing a frame on this machine.

use rell_core::pool::Pool;
use rell_core::{Cell, Heap, SeriesId};

use crate::action::ActionRec;
use crate::frame::Frame;

/// A non-local exit in flight: a label naming the catcher and the carried
/// argument. Errors ride the same channel under the canonical `raised`
/// label.
#[derive(Debug, Clone)]
pub struct Thrown {
    pub label: Cell,
    pub arg: Cell,
}

/// What a frame executor (or native dispatcher) tells the trampoline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bounce {
    /// `out` holds the product; pop this frame.
    Done,
    /// A sub-frame was pushed; run it, then call this executor again.
    Continue,
    /// `machine.thrown` is set; start (or keep) unwinding.
    Thrown,
}

/// An abrupt user-level error raised mid-executor: the ERROR! context.
/// The trampoline converts it into a throw with the `raised` label.
#[derive(Debug, Clone, Copy)]
pub struct Raise(pub SeriesId);

/// Executor/dispatcher result.
pub type Exec = Result<Bounce, Raise>;

pub struct Machine {
    pub heap: Heap,
    pub actions: Pool<ActionRec>,
    pub frames: Vec<Frame>,
    pub data_stack: Vec<Cell>,
    pub thrown: Option<Thrown>,
    /// The outermost "user" context unbound words attach to.
    pub lib: SeriesId,
    /// Empty source array shared by synthesized frames.
    pub empty_block: SeriesId,
    /// The shared RETURN native; each invocation binds its own copy.
    pub return_native: Option<rell_core::ActionId>,
}

impl Machine {
    /// Bare machine: heap, user context, no natives. `scale` steers the
    /// GC ballast.
    pub fn new(scale: usize) -> Machine {
        use rell_core::{Flavor, Series, SeriesFlags};
        let mut heap = Heap::new(scale);
        let empty = heap.alloc(Series::new_array(
            Flavor::Array,
            0,
            SeriesFlags::FIXED_SIZE,
        ));
        let mut machine = Machine {
            heap,
            actions: Pool::new(),
            frames: Vec::new(),
            data_stack: Vec::new(),
            thrown: None,
            lib: SeriesId(0),
            empty_block: empty,
            return_native: None,
        };
        machine.heap.manage(empty);
        let lib = crate::context::make_context(&mut machine, rell_core::Kind::Module, 64);
        let keylist = crate::context::keylist_of(&machine, lib);
        machine.heap.manage(lib);
        machine.heap.manage(keylist);
        machine.lib = lib;
        machine
    }

    pub fn top(&self) -> &Frame {
        self.frames.last().expect("machine: no frame")
    }

    pub fn top_mut(&mut self) -> &mut Frame {
        self.frames.last_mut().expect("machine: no frame")
    }

    /// Push a frame, stamping the unwind watermarks.
    pub fn push_frame(&mut self, mut frame: Frame) {
        frame.ds_mark = self.data_stack.len();
        frame.manuals_mark = self.heap.manuals_mark();
        self.frames.push(frame);
    }

    /// Depth of the frame stack (continuation targets count from here).
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// A managed TEXT! cell holding `text`.
    pub fn text_cell(&mut self, text: &str) -> Cell {
        use rell_core::{Flavor, Series, SeriesFlags};
        let id = self.heap.alloc(Series::new_bytes(
            Flavor::Text,
            text.len().max(1),
            SeriesFlags::POW2,
        ));
        self.heap.mutate(id, |s| s.bytes_push(text.as_bytes()));
        self.heap.manage(id);
        Cell::text(id)
    }
}

/// Machine without natives, for unit tests of the data layers.
#[cfg(test)]
pub fn test_machine() -> Machine {
    Machine::new(1)
}
