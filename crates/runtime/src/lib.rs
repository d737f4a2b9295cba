//! Rell runtime: contexts, actions, evaluator, collector, host API
//!
//! Key design principles:
//! - everything is a cell in a series; contexts, frames, and actions are
//!   series-shaped, so one collector walks one graph
//! - the evaluator is a trampoline over executor-tagged frames; natives
//!   continue by pushing frames and resuming off a state byte, never by
//!   recursing into the evaluator
//! - non-local exits (return, break, throw, errors) share one channel: a
//!   label cell plus an argument cell, matched by identity for
//!   frame-targeted labels and by symbol for named catches

pub mod action;
pub mod api;
pub mod bind;
pub mod context;
pub mod error;
pub mod eval;
pub mod frame;
pub mod gc;
pub mod machine;
pub mod mold;
pub mod natives;
pub mod scan;
pub mod throw;
pub mod value;

pub use api::{Handle, HostError, Part, Runtime};
pub use eval::eval_block;
pub use machine::{Bounce, Exec, Machine, Raise, Thrown};
pub use scan::{ScanError, scan_source};

// The heap layer is re-exported so embedders need only one dependency.
pub use rell_core as core;
