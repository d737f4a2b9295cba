//! Host boundary
//!
//! `Runtime` wraps one machine behind the API the embedding host uses:
//! startup/shutdown, root pinning, pairing-backed value handles, and a
//! splicing evaluator entry whose parts are classified null / UTF-8 text
//! (scanned and spliced) / handle (spliced literally). The
//! classification is a closed enum and is exercised by a startup
//! self-test.
//!
//! Handles are two-cell pairings on the manuals list: they stay rooted
//! until released, and handles a native creates mid-evaluation die with
//! that frame's unwind, which is the default per-frame lifetime.

use rell_core::{Cell, Series, SeriesId};

use crate::error;
use crate::eval;
use crate::machine::Machine;
use crate::mold;
use crate::natives;
use crate::scan::{self, ScanError};
use crate::throw;

/// One evaluator instance.
pub struct Runtime {
    machine: Machine,
}

/// A rooted value handle (pairing-backed).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handle {
    pairing: SeriesId,
}

/// One argument to the splicing evaluator entry.
pub enum Part<'a> {
    /// Splices as the null antiform.
    Null,
    /// Scanned and spliced as source.
    Text(&'a str),
    /// Spliced literally as a value.
    Val(&'a Handle),
}

/// What the host sees when evaluation does not produce a value.
#[derive(Debug)]
pub enum HostError {
    /// Source text did not scan.
    Syntax(ScanError),
    /// An error was raised and nothing trapped it; rendered per the
    /// uncaught-error format, with the error id for programmatic checks.
    Uncaught { id: String, rendered: String },
    /// A throw escaped to the top without a catcher.
    StrayThrow(String),
    /// Cancellation reached the top-level trap.
    Halted,
}

impl std::fmt::Display for HostError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HostError::Syntax(err) => write!(f, "{err}"),
            HostError::Uncaught { rendered, .. } => write!(f, "{rendered}"),
            HostError::StrayThrow(label) => write!(f, "uncaught throw: {label}"),
            HostError::Halted => write!(f, "halted"),
        }
    }
}

impl Runtime {
    /// Bring up a machine with the native library installed. `scale`
    /// multiplies the GC ballast for hosts that front-load allocation.
    pub fn startup(scale: usize) -> Runtime {
        let mut machine = Machine::new(scale);
        natives::install(&mut machine);
        let mut runtime = Runtime { machine };
        runtime.self_test();
        tracing::info!(scale, "runtime up");
        runtime
    }

    /// Classification and evaluator smoke check, run once at startup.
    fn self_test(&mut self) {
        let probe = self
            .eval_text("equal? 9 (1 + 2 * 3)")
            .expect("startup self-test evaluates");
        let cell = self.value_of(&probe);
        assert_eq!(cell.as_logic(), Some(true), "startup self-test: enfix order");
        self.release(probe);

        let handle = self.alloc_handle(Cell::integer(7));
        let through = self
            .run(&[Part::Text("add 1"), Part::Val(&handle)])
            .expect("startup self-test splices");
        assert_eq!(self.value_of(&through).as_integer(), Some(8));
        self.release(through);
        self.release(handle);

        let nulled = self
            .run(&[Part::Null])
            .expect("startup self-test null part");
        assert!(self.value_of(&nulled).is_nulled());
        self.release(nulled);
    }

    pub fn shutdown(self) {
        // Dropping the machine returns every pool segment.
    }

    pub fn machine(&mut self) -> &mut Machine {
        &mut self.machine
    }

    // -- handles ---------------------------------------------------------

    fn alloc_handle(&mut self, value: Cell) -> Handle {
        let pairing = self
            .machine
            .heap
            .alloc(Series::new_pairing(Cell::blank(), value));
        Handle { pairing }
    }

    /// The value a handle pins.
    pub fn value_of(&self, handle: &Handle) -> Cell {
        self.machine.heap.get(handle.pairing).pairing()[1].clone()
    }

    /// Unpin. The value stays alive only while otherwise reachable.
    pub fn release(&mut self, handle: Handle) {
        self.machine.heap.free_manual(handle.pairing);
    }

    pub fn mold_of(&self, handle: &Handle) -> String {
        let cell = self.value_of(handle);
        mold::mold(&self.machine, &cell)
    }

    pub fn form_of(&self, handle: &Handle) -> String {
        let cell = self.value_of(handle);
        mold::form(&self.machine, &cell)
    }

    // -- roots -----------------------------------------------------------

    pub fn push_root(&mut self, handle: &Handle) {
        let cell = self.value_of(handle);
        self.machine.heap.push_root(cell);
    }

    pub fn pop_root(&mut self) {
        self.machine.heap.pop_root();
    }

    // -- evaluation ------------------------------------------------------

    /// Scan and evaluate a source string against the user context.
    pub fn eval_text(&mut self, source: &str) -> Result<Handle, HostError> {
        let block = scan::scan_source(&mut self.machine, "user", source)
            .map_err(HostError::Syntax)?;
        self.eval_rooted(block)
    }

    /// The variadic-style entry: parts splice into one block, then the
    /// block evaluates. Handle values are lifted one level so splicing
    /// is literal (evaluation takes the level back off).
    pub fn run(&mut self, parts: &[Part<'_>]) -> Result<Handle, HostError> {
        let block = self.machine.heap.alloc(Series::new_array(
            rell_core::Flavor::Array,
            8,
            rell_core::SeriesFlags::POW2,
        ));
        for part in parts {
            match part {
                Part::Null => {
                    let mut null = Cell::null_value();
                    null.lift_meta();
                    self.machine.heap.mutate(block, |s| s.arr_push(null));
                }
                Part::Text(text) => {
                    let scanned = scan::scan_source(&mut self.machine, "api", text)
                        .map_err(HostError::Syntax)?;
                    let cells: Vec<Cell> =
                        self.machine.heap.get(scanned).arr_cells().to_vec();
                    self.machine.heap.mutate(block, |s| {
                        for cell in cells {
                            s.arr_push(cell);
                        }
                    });
                }
                Part::Val(handle) => {
                    let mut cell = self.value_of(handle);
                    cell.lift_meta();
                    self.machine.heap.mutate(block, |s| s.arr_push(cell));
                }
            }
        }
        self.eval_rooted(block)
    }

    fn eval_rooted(&mut self, block: SeriesId) -> Result<Handle, HostError> {
        self.machine.heap.manage(block);
        self.machine.heap.push_root(Cell::block(block));
        let lib = self.machine.lib;
        let result = eval::eval_block(&mut self.machine, block, Some(lib));
        self.machine.heap.pop_root();
        match result {
            Ok(cell) => Ok(self.alloc_handle(cell)),
            Err(thrown) => {
                if throw::is_halt(&thrown) {
                    return Err(HostError::Halted);
                }
                if throw::is_quit(&thrown) {
                    return Ok(self.alloc_handle(thrown.arg));
                }
                if throw::is_raised(&thrown) {
                    let varlist = thrown
                        .arg
                        .context_varlist()
                        .expect("raised throw carries an error");
                    let id = error::id_of(&self.machine, varlist)
                        .map(|sym| self.machine.heap.spelling(sym).to_string())
                        .unwrap_or_default();
                    let rendered = error::render(&mut self.machine, varlist);
                    return Err(HostError::Uncaught { id, rendered });
                }
                let label = mold::mold(&self.machine, &thrown.label);
                Err(HostError::StrayThrow(label))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_startup_and_simple_eval() {
        let mut runtime = Runtime::startup(1);
        let result = runtime.eval_text("1 + 2").unwrap();
        assert_eq!(runtime.value_of(&result).as_integer(), Some(3));
        runtime.release(result);
        runtime.shutdown();
    }

    #[test]
    fn test_syntax_error_reported() {
        let mut runtime = Runtime::startup(1);
        match runtime.eval_text("[1 2") {
            Err(HostError::Syntax(err)) => assert!(err.message.contains("missing")),
            other => panic!("expected syntax error, got {other:?}"),
        }
    }

    #[test]
    fn test_uncaught_error_carries_id() {
        let mut runtime = Runtime::startup(1);
        match runtime.eval_text("1 / 0") {
            Err(HostError::Uncaught { id, rendered }) => {
                assert_eq!(id, "zero-divide");
                assert!(rendered.contains("zero-divide"));
            }
            other => panic!("expected uncaught error, got {other:?}"),
        }
    }

    #[test]
    fn test_handle_splicing_is_literal() {
        let mut runtime = Runtime::startup(1);
        // A word spliced as a value must not be looked up again.
        let word = runtime.eval_text("'some-word").unwrap();
        let molded = runtime.run(&[Part::Text("mold"), Part::Val(&word)]).unwrap();
        assert_eq!(runtime.form_of(&molded), "some-word");
        runtime.release(molded);
        runtime.release(word);
    }

    #[test]
    fn test_quit_surfaces_value() {
        let mut runtime = Runtime::startup(1);
        let result = runtime.eval_text("quit/with 42 print \"unreached\"").unwrap();
        assert_eq!(runtime.value_of(&result).as_integer(), Some(42));
    }

    #[test]
    fn test_halt_is_reported() {
        let mut runtime = Runtime::startup(1);
        match runtime.eval_text("catch/any [halt]") {
            Err(HostError::Halted) => {}
            other => panic!("expected halt, got {other:?}"),
        }
    }
}
