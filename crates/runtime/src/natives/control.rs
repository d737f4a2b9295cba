//! Control-flow natives
//!
//! Every construct that runs a sub-block does it by pushing a frame and
//! installing a continuation state, never by recursing. The state bytes
//! are per-native; 0 is always "first dispatch".
//!
//! Catching natives (catch, trap, loops) are re-entered with the throw
//! still in flight and must inspect `machine.thrown` before anything
//! else: consume it and finish normally, or pass it on by returning
//! `Bounce::Thrown`.

use rell_core::{Cell, CellFlags, Kind, SeriesId, known};

use crate::bind;
use crate::context;
use crate::error;
use crate::eval;
use crate::frame::{Feed, OutTarget};
use crate::machine::{Bounce, Exec, Machine};
use crate::scan;
use crate::throw;
use crate::value;

use super::{arg, done, native, native_catching, refinement_on};

pub fn install(machine: &mut Machine) {
    native(machine, "do", "source [block! text!]", n_do);
    native(machine, "if", "condition [<opt> any-value!] branch [block!]", n_if);
    native(
        machine,
        "either",
        "condition [<opt> any-value!] true-branch [block!] false-branch [block!]",
        n_either,
    );
    native_catching(machine, "while", "condition [block!] body [block!]", n_while);
    native_catching(machine, "until", "body [block!]", n_until);
    native_catching(
        machine,
        "repeat",
        "'word [word!] count [integer!] body [block!]",
        n_repeat,
    );
    native_catching(machine, "loop", "count [integer!] body [block!]", n_loop);
    native_catching(
        machine,
        "catch",
        "block [block!] /name word [word! block!] /quit /any",
        n_catch,
    );
    native(machine, "throw", "value [<opt> any-value!] /name word [word!]", n_throw);
    native_catching(machine, "trap", "block [block!]", n_trap);
    native_catching(machine, "attempt", "block [block!]", n_attempt);
    native(machine, "fail", "reason [<opt> text! word! error!]", n_fail);
    native(machine, "halt", "", n_halt);
    native(machine, "quit", "/with value [any-value!]", n_quit);
    native(machine, "break", "", n_break);
    native(machine, "continue", "", n_continue);
    native(machine, "reduce", "block [block!]", n_reduce);
    native(machine, "comment", "'discarded [any-value!]", n_comment);
    native(machine, "elide", "discarded [<opt> any-value!]", n_elide);
}

/// Feed over a block argument, honoring the binding it captured.
fn block_feed(cell: &Cell) -> Feed {
    let (series, index) = cell.series_payload().expect("block argument");
    let specifier = match cell.binding {
        rell_core::Binding::Ctx(id) => Some(id),
        rell_core::Binding::Unbound => None,
    };
    Feed::new(series, index, specifier)
}

fn push_branch(machine: &mut Machine, branch: &Cell) -> Exec {
    eval::push_block_frame(machine, block_feed(branch), OutTarget::Out)?;
    Ok(Bounce::Continue)
}

/// Branch product: a stale or void branch yields null so the construct
/// stays visible.
fn branch_product(machine: &mut Machine) -> Cell {
    let out = machine.top().out.clone();
    if out.flags.contains(CellFlags::STALE) || out.is_void() {
        Cell::null_value()
    } else {
        out
    }
}

fn truthy_arg(machine: &mut Machine, cell: &Cell) -> Result<bool, crate::machine::Raise> {
    match cell.truthiness() {
        Some(truthy) => Ok(truthy),
        None => Err(error::raise(machine, "script", "bad-cast", &[cell.clone()])),
    }
}

// -- do ----------------------------------------------------------------

fn n_do(machine: &mut Machine) -> Exec {
    match machine.top().state {
        0 => {
            let source = arg(machine, 1);
            machine.top_mut().state = 1;
            match source.kind {
                Kind::Block => push_branch(machine, &source),
                Kind::Text => {
                    let (series, index) = source.series_payload().expect("text argument");
                    let text = machine.heap.get(series).text_str()[index as usize..].to_string();
                    let block = match scan::scan_source(machine, "do", &text) {
                        Ok(block) => block,
                        Err(err) => {
                            let msg = machine.text_cell(&err.to_string());
                            return Err(error::raise(machine, "user", "message", &[msg]));
                        }
                    };
                    let lib = machine.lib;
                    eval::push_block_frame(
                        machine,
                        Feed::new(block, 0, Some(lib)),
                        OutTarget::Out,
                    )?;
                    Ok(Bounce::Continue)
                }
                _ => unreachable!("typechecked source"),
            }
        }
        _ => {
            let mut out = machine.top().out.clone();
            if out.flags.contains(CellFlags::STALE) {
                // Source that vanished entirely evaluates to void.
                out = Cell::void();
            }
            done(machine, out)
        }
    }
}

// -- branching ---------------------------------------------------------

fn n_if(machine: &mut Machine) -> Exec {
    match machine.top().state {
        0 => {
            let condition = arg(machine, 1);
            if truthy_arg(machine, &condition)? {
                let branch = arg(machine, 2);
                machine.top_mut().state = 1;
                push_branch(machine, &branch)
            } else {
                done(machine, Cell::null_value())
            }
        }
        _ => {
            let product = branch_product(machine);
            done(machine, product)
        }
    }
}

fn n_either(machine: &mut Machine) -> Exec {
    match machine.top().state {
        0 => {
            let condition = arg(machine, 1);
            let branch = if truthy_arg(machine, &condition)? {
                arg(machine, 2)
            } else {
                arg(machine, 3)
            };
            machine.top_mut().state = 1;
            push_branch(machine, &branch)
        }
        _ => {
            let product = branch_product(machine);
            done(machine, product)
        }
    }
}

// -- loops -------------------------------------------------------------

const LOOP_COND: u8 = 1;
const LOOP_BODY: u8 = 2;

fn n_while(machine: &mut Machine) -> Exec {
    if let Some(thrown) = machine.thrown.clone() {
        return loop_offer(machine, &thrown, |m| {
            let condition = arg(m, 1);
            m.top_mut().state = LOOP_COND;
            push_branch(m, &condition)
        });
    }
    match machine.top().state {
        0 => {
            let condition = arg(machine, 1);
            machine.top_mut().state = LOOP_COND;
            push_branch(machine, &condition)
        }
        LOOP_COND => {
            let product = machine.top().out.clone();
            if truthy_arg(machine, &product)? {
                let body = arg(machine, 2);
                machine.top_mut().state = LOOP_BODY;
                push_branch(machine, &body)
            } else {
                // Result is the last body product, null if none ran.
                let spare = machine.top().spare.clone();
                let out = if spare.flags.contains(CellFlags::STALE) {
                    Cell::null_value()
                } else {
                    spare
                };
                done(machine, out)
            }
        }
        LOOP_BODY => {
            let product = branch_product(machine);
            let top = machine.top_mut();
            top.spare = product;
            top.state = LOOP_COND;
            let condition = arg(machine, 1);
            push_branch(machine, &condition)
        }
        other => unreachable!("while state {other}"),
    }
}

/// BREAK terminates the nearest loop with null; CONTINUE restarts it via
/// `resume`.
fn loop_offer(
    machine: &mut Machine,
    thrown: &crate::machine::Thrown,
    resume: impl FnOnce(&mut Machine) -> Exec,
) -> Exec {
    match throw::label_symbol(thrown) {
        Some(sym) if sym == known::BREAK => {
            machine.thrown = None;
            done(machine, Cell::null_value())
        }
        Some(sym) if sym == known::CONTINUE => {
            machine.thrown = None;
            resume(machine)
        }
        _ => Ok(Bounce::Thrown),
    }
}

fn n_until(machine: &mut Machine) -> Exec {
    if let Some(thrown) = machine.thrown.clone() {
        return loop_offer(machine, &thrown, |m| {
            let body = arg(m, 1);
            m.top_mut().state = LOOP_BODY;
            push_branch(m, &body)
        });
    }
    match machine.top().state {
        0 => {
            let body = arg(machine, 1);
            machine.top_mut().state = LOOP_BODY;
            push_branch(machine, &body)
        }
        LOOP_BODY => {
            let product = branch_product(machine);
            if truthy_arg(machine, &product)? {
                done(machine, product)
            } else {
                let body = arg(machine, 1);
                push_branch(machine, &body)
            }
        }
        other => unreachable!("until state {other}"),
    }
}

/// Counted loop with a bound index word: `repeat i 10 [...]`.
fn n_repeat(machine: &mut Machine) -> Exec {
    if let Some(thrown) = machine.thrown.clone() {
        return loop_offer(machine, &thrown, repeat_advance);
    }
    match machine.top().state {
        0 => {
            let word = arg(machine, 1);
            let count = arg(machine, 2).as_integer().expect("typechecked count");
            if count < 1 {
                return done(machine, Cell::null_value());
            }
            let symbol = word.word_symbol().expect("typechecked word");
            let ctx = context::make_context(machine, Kind::Object, 1);
            let index = context::append_key(machine, ctx, symbol);
            *context::var_at_mut(machine, ctx, index) = Cell::integer(1);
            let keylist = context::keylist_of(machine, ctx);
            machine.heap.manage(ctx);
            machine.heap.manage(keylist);

            let top = machine.top_mut();
            top.scratch = Cell::object(ctx);
            top.spare = Cell::integer(1);
            top.state = LOOP_BODY;
            push_repeat_body(machine, ctx)
        }
        LOOP_BODY => repeat_advance(machine),
        other => unreachable!("repeat state {other}"),
    }
}

fn push_repeat_body(machine: &mut Machine, ctx: SeriesId) -> Exec {
    let body = arg(machine, 3);
    let outer = match body.binding {
        rell_core::Binding::Ctx(id) => Some(id),
        rell_core::Binding::Unbound => None,
    };
    let specifier = bind::make_specifier(machine, ctx, outer);
    let (series, index) = body.series_payload().expect("block argument");
    eval::push_block_frame(
        machine,
        Feed::new(series, index, Some(specifier)),
        OutTarget::Out,
    )?;
    Ok(Bounce::Continue)
}

fn repeat_advance(machine: &mut Machine) -> Exec {
    let count = arg(machine, 2).as_integer().expect("typechecked count");
    let iteration = machine.top().spare.as_integer().expect("loop counter") + 1;
    if iteration > count {
        let product = branch_product(machine);
        return done(machine, product);
    }
    let ctx = machine
        .top()
        .scratch
        .context_varlist()
        .expect("loop context in scratch");
    *context::var_at_mut(machine, ctx, 1) = Cell::integer(iteration);
    machine.top_mut().spare = Cell::integer(iteration);
    machine.top_mut().state = LOOP_BODY;
    push_repeat_body(machine, ctx)
}

fn n_loop(machine: &mut Machine) -> Exec {
    if let Some(thrown) = machine.thrown.clone() {
        return loop_offer(machine, &thrown, loop_advance);
    }
    match machine.top().state {
        0 => {
            let count = arg(machine, 1).as_integer().expect("typechecked count");
            if count < 1 {
                return done(machine, Cell::null_value());
            }
            machine.top_mut().spare = Cell::integer(1);
            machine.top_mut().state = LOOP_BODY;
            let body = arg(machine, 2);
            push_branch(machine, &body)
        }
        LOOP_BODY => loop_advance(machine),
        other => unreachable!("loop state {other}"),
    }
}

fn loop_advance(machine: &mut Machine) -> Exec {
    let count = arg(machine, 1).as_integer().expect("typechecked count");
    let iteration = machine.top().spare.as_integer().expect("loop counter") + 1;
    if iteration > count {
        let product = branch_product(machine);
        return done(machine, product);
    }
    machine.top_mut().spare = Cell::integer(iteration);
    machine.top_mut().state = LOOP_BODY;
    let body = arg(machine, 2);
    push_branch(machine, &body)
}

// -- catch / throw -----------------------------------------------------

// catch: 1 block, 2 /name, 3 word, 4 /quit, 5 /any

fn n_catch(machine: &mut Machine) -> Exec {
    if let Some(thrown) = machine.thrown.clone() {
        return catch_offer(machine, &thrown);
    }
    match machine.top().state {
        0 => {
            let block = arg(machine, 1);
            machine.top_mut().state = 1;
            push_branch(machine, &block)
        }
        _ => {
            // Body ran to completion without a throw.
            let product = branch_product(machine);
            done(machine, product)
        }
    }
}

fn catch_offer(machine: &mut Machine, thrown: &crate::machine::Thrown) -> Exec {
    // The error and cancellation channels are never CATCH's business.
    if throw::is_raised(thrown) || throw::is_halt(thrown) {
        return Ok(Bounce::Thrown);
    }
    if throw::is_quit(thrown) {
        if refinement_on(machine, 4) {
            machine.thrown = None;
            let value = thrown.arg.clone();
            return done(machine, value);
        }
        return Ok(Bounce::Thrown);
    }
    if refinement_on(machine, 2) {
        // /name: symbol equality against a word or a block of words.
        let Some(symbol) = throw::label_symbol(thrown) else {
            return Ok(Bounce::Thrown);
        };
        let want = arg(machine, 3);
        let matches = match want.kind {
            Kind::Word => want
                .word_symbol()
                .map(|w| machine.heap.symbols.eq_fold(w, symbol))
                .unwrap_or(false),
            Kind::Block => {
                let (series, index) = want.series_payload().expect("block argument");
                machine.heap.get(series).arr_cells()[index as usize..]
                    .iter()
                    .filter_map(|c| c.word_symbol())
                    .any(|w| machine.heap.symbols.eq_fold(w, symbol))
            }
            _ => false,
        };
        if matches {
            machine.thrown = None;
            let value = thrown.arg.clone();
            return done(machine, value);
        }
        return Ok(Bounce::Thrown);
    }
    if refinement_on(machine, 5) {
        // /any: everything else on the throw channel.
        machine.thrown = None;
        let value = thrown.arg.clone();
        return done(machine, value);
    }
    if throw::is_plain(thrown) {
        machine.thrown = None;
        let value = thrown.arg.clone();
        return done(machine, value);
    }
    Ok(Bounce::Thrown)
}

fn n_throw(machine: &mut Machine) -> Exec {
    let value = arg(machine, 1);
    machine.thrown = Some(if refinement_on(machine, 2) {
        let word = arg(machine, 3);
        throw::named(word.word_symbol().expect("typechecked word"), value)
    } else {
        throw::plain(value)
    });
    Ok(Bounce::Thrown)
}

fn n_trap(machine: &mut Machine) -> Exec {
    if let Some(thrown) = machine.thrown.clone() {
        if throw::is_raised(&thrown) {
            machine.thrown = None;
            let error_value = thrown.arg.clone();
            return done(machine, error_value);
        }
        return Ok(Bounce::Thrown);
    }
    match machine.top().state {
        0 => {
            let block = arg(machine, 1);
            machine.top_mut().state = 1;
            push_branch(machine, &block)
        }
        _ => {
            let product = branch_product(machine);
            done(machine, product)
        }
    }
}

fn n_attempt(machine: &mut Machine) -> Exec {
    if let Some(thrown) = machine.thrown.clone() {
        if throw::is_raised(&thrown) {
            machine.thrown = None;
            return done(machine, Cell::null_value());
        }
        return Ok(Bounce::Thrown);
    }
    match machine.top().state {
        0 => {
            let block = arg(machine, 1);
            machine.top_mut().state = 1;
            push_branch(machine, &block)
        }
        _ => {
            let product = branch_product(machine);
            done(machine, product)
        }
    }
}

fn n_fail(machine: &mut Machine) -> Exec {
    let reason = arg(machine, 1);
    match reason.kind {
        Kind::Error if reason.lift == 1 => {
            let varlist = reason.context_varlist().expect("error payload");
            Err(crate::machine::Raise(varlist))
        }
        Kind::Word => {
            let spelling = reason
                .word_symbol()
                .map(|sym| machine.heap.spelling(sym).to_string())
                .expect("typechecked word");
            Err(error::raise(machine, "user", &spelling, &[]))
        }
        Kind::Text => Err(error::raise(machine, "user", "message", &[reason])),
        _ => Err(error::raise(machine, "user", "message", &[])),
    }
}

fn n_halt(machine: &mut Machine) -> Exec {
    machine.thrown = Some(throw::halt());
    Ok(Bounce::Thrown)
}

fn n_quit(machine: &mut Machine) -> Exec {
    let value = if refinement_on(machine, 1) {
        arg(machine, 2)
    } else {
        Cell::null_value()
    };
    machine.thrown = Some(throw::quit(value));
    Ok(Bounce::Thrown)
}

fn n_break(machine: &mut Machine) -> Exec {
    machine.thrown = Some(throw::break_loop());
    Ok(Bounce::Thrown)
}

fn n_continue(machine: &mut Machine) -> Exec {
    machine.thrown = Some(throw::continue_loop());
    Ok(Bounce::Thrown)
}

// -- reduce ------------------------------------------------------------

fn n_reduce(machine: &mut Machine) -> Exec {
    match machine.top().state {
        0 => {
            let block = arg(machine, 1);
            let feed = block_feed(&block);
            let result = machine.heap.alloc(rell_core::Series::new_array(
                rell_core::Flavor::Array,
                4,
                rell_core::SeriesFlags::POW2,
            ));
            machine.heap.manage(result);
            let top = machine.top_mut();
            top.spare = Cell::block(result);
            top.feed = feed;
            top.state = 1;
            reduce_next(machine)
        }
        _ => {
            // An expression product arrived in out.
            let out = machine.top().out.clone();
            if !out.flags.contains(CellFlags::STALE) && !out.is_void() {
                let stable = value::decay(machine, out)?;
                let result = machine
                    .top()
                    .spare
                    .series_payload()
                    .expect("result block in spare")
                    .0;
                machine.heap.mutate(result, |s| s.arr_push(stable));
            }
            reduce_next(machine)
        }
    }
}

fn reduce_next(machine: &mut Machine) -> Exec {
    let feed = machine.top().feed;
    if feed.at_end(machine) {
        let out = machine.top().spare.clone();
        return done(machine, out);
    }
    machine.top_mut().out = Cell::fresh();
    eval::push_step_frame(machine, feed, OutTarget::Out)?;
    Ok(Bounce::Continue)
}

// -- invisibles --------------------------------------------------------

/// Consumes its argument and leaves `out` stale: the previous product
/// survives untouched. Never reads the out cell.
fn n_comment(machine: &mut Machine) -> Exec {
    let _ = machine;
    Ok(Bounce::Done)
}

fn n_elide(machine: &mut Machine) -> Exec {
    let _ = machine;
    Ok(Bounce::Done)
}
