//! The evaluator
//!
//! A trampoline drives the machine's frame stack. Each frame runs one of
//! three executors:
//!
//! - **Step**: one expression from the feed into `out`, including enfix
//!   chaining (`1 + 2 * 3` is `(1 + 2) * 3`: strict left to right, no
//!   precedence);
//! - **Block**: the feed to exhaustion, keeping the last product that
//!   was not stale or void (voids vanish interstitially);
//! - **Action**: argument fulfillment in two passes (main arguments in
//!   source order, then refinement arguments in call-site refinement
//!   order), typechecking, and dispatch.
//!
//! Executors never recurse into evaluation. Anything that needs a
//! sub-evaluation pushes a frame, returns `Bounce::Continue`, and is
//! called again with its state byte telling it where it left off. Throws
//! unwind by popping frames; each frame whose varlist is the throw's
//! target (or whose dispatcher opted into catching) gets the chance to
//! consume it. GC runs only between executor invocations.

use rell_core::{
    Binding, Cell, CellFlags, Flavor, Kind, ParamClass, ParamFlags, Payload, Series, SeriesFlags,
    SeriesId, SymId, known,
};

use crate::action::{self, Dispatcher};
use crate::bind;
use crate::context;
use crate::error;
use crate::frame::{Executor, Feed, Frame, OutTarget};
use crate::machine::{Bounce, Exec, Machine, Raise, Thrown};
use crate::value;

/// Frame-stack ceiling; past this an `internal/stack-overflow` error is
/// raised rather than letting the Vec grow without bound.
const MAX_DEPTH: usize = 4096;

// Step executor states.
const ST_INITIAL: u8 = 0;
const ST_AFTER_SET_RHS: u8 = 1;
const ST_AFTER_GROUP: u8 = 2;
const ST_LOOKAHEAD: u8 = 3;
const ST_AFTER_SEQ_RHS: u8 = 4;

// Action-frame fulfillment phases.
const FULFILL_ARGS: u8 = 0;
const FULFILL_REFINES: u8 = 1;
const FULFILL_TYPECHECK: u8 = 2;
const FULFILL_DISPATCH: u8 = 3;

// Fulfillment "awaiting a sub-frame" markers (frame.state during
// fulfillment; dispatchers get a zeroed state byte).
const AWAIT_NONE: u8 = 0;
const AWAIT_ARG: u8 = 1;

/// Outcome of a top-level evaluation.
pub type EvalResult = Result<Cell, Thrown>;

/// Evaluate an array to its product. The entry point natives and the
/// host API both funnel through.
pub fn eval_block(
    machine: &mut Machine,
    array: SeriesId,
    specifier: Option<SeriesId>,
) -> EvalResult {
    let base = machine.depth();
    let feed = Feed::new(array, 0, specifier);
    machine.push_frame(Frame::new(Executor::Block, feed, OutTarget::Drop));
    let out = trampoline(machine, base);
    match machine.thrown.take() {
        Some(thrown) => Err(thrown),
        None => Ok(out),
    }
}

/// Run the frame stack back down to `base`, returning the out cell of
/// the last frame popped. On an uncaught throw, `machine.thrown` is
/// still set and the returned cell is stale.
pub fn trampoline(machine: &mut Machine, base: usize) -> Cell {
    debug_assert!(machine.depth() > base);
    loop {
        if machine.heap.gc_pending() {
            crate::gc::collect(machine);
        }
        let bounce = match execute_top(machine) {
            Ok(bounce) => bounce,
            Err(Raise(err)) => {
                machine.thrown = Some(error::throw_for(err));
                Bounce::Thrown
            }
        };
        match bounce {
            Bounce::Continue => {}
            Bounce::Done => {
                let frame = pop_frame(machine);
                if machine.depth() == base {
                    return frame.out;
                }
                deliver(machine, frame);
            }
            Bounce::Thrown => {
                debug_assert!(machine.thrown.is_some());
                let frame = pop_frame(machine);
                if machine.depth() == base {
                    let _ = frame;
                    return Cell::fresh();
                }
                // The new top frame is offered the throw on the next
                // pass through execute_top.
            }
        }
    }
}

fn execute_top(machine: &mut Machine) -> Exec {
    if machine.thrown.is_some() {
        return offer_throw(machine);
    }
    match machine.top().executor {
        Executor::Step => step_executor(machine),
        Executor::Block => block_executor(machine),
        Executor::Action => action_executor(machine),
    }
}

/// A throw is in flight and the top frame gets its chance: generic
/// matching for frame-targeted labels (definitional return, unwind,
/// redo), then the dispatcher for frames that opted into catching.
fn offer_throw(machine: &mut Machine) -> Exec {
    let thrown = machine.thrown.clone().expect("offer without throw");
    let (varlist, catches, executor, fulfill) = {
        let top = machine.top();
        (top.varlist, top.catches, top.executor, top.fulfill)
    };

    if executor == Executor::Action
        && let Some(varlist) = varlist
        && thrown.label.binding == Binding::Ctx(varlist)
    {
        let is_return = thrown.label.kind == Kind::Action
            && thrown.label.action_id() == machine.return_native;
        let is_unwind =
            thrown.label.kind == Kind::Word && thrown.label.word_symbol() == Some(known::UNWIND);
        let is_redo =
            thrown.label.kind == Kind::Word && thrown.label.word_symbol() == Some(known::REDO);
        if is_return || is_unwind {
            machine.thrown = None;
            machine.top_mut().out = thrown.arg;
            return Ok(Bounce::Done);
        }
        if is_redo {
            machine.thrown = None;
            let top = machine.top_mut();
            top.fulfill = FULFILL_TYPECHECK;
            top.state = AWAIT_NONE;
            if let Some(sibling) = thrown.arg.action_id() {
                top.phase = Some(sibling);
            }
            return Ok(Bounce::Continue);
        }
    }

    if catches && executor == Executor::Action && fulfill == FULFILL_DISPATCH {
        return run_dispatcher(machine);
    }
    Ok(Bounce::Thrown)
}

/// Pop the top frame, rebalancing the data stack and manuals list and
/// retiring the frame's varlist to a tombstone when it escaped.
fn pop_frame(machine: &mut Machine) -> Frame {
    let frame = machine.frames.pop().expect("pop on empty frame stack");
    machine.data_stack.truncate(frame.ds_mark);
    machine.heap.free_manuals_above(frame.manuals_mark);
    if frame.escaped
        && let Some(varlist) = frame.varlist
    {
        machine.heap.get_mut(varlist).decay();
    }
    frame
}

/// Route a finished frame's product to its parent. Stale output is never
/// copied (invisibles); void is dropped only for expression products,
/// not for argument or assignment slots, which need to see it.
fn deliver(machine: &mut Machine, child: Frame) {
    // Consumed input propagates when parent and child share a feed.
    {
        let parent = machine.top_mut();
        if parent.feed.array == child.feed.array {
            parent.feed.index = child.feed.index;
        }
    }
    let stale = child.out.flags.contains(CellFlags::STALE);
    match child.out_to {
        OutTarget::Drop => {}
        OutTarget::Out => {
            if !stale && !child.out.is_void() {
                machine.top_mut().out = child.out;
            }
        }
        OutTarget::Spare => {
            if !stale {
                machine.top_mut().spare = child.out;
            }
        }
        OutTarget::Arg(index) => {
            if !stale {
                let varlist = machine
                    .top()
                    .varlist
                    .expect("argument delivery into frame without varlist");
                *context::var_at_mut(machine, varlist, index as usize) = child.out;
            }
        }
    }
}

fn guard_depth(machine: &mut Machine) -> Result<(), Raise> {
    if machine.depth() >= MAX_DEPTH {
        return Err(error::raise(machine, "internal", "stack-overflow", &[]));
    }
    Ok(())
}

fn push_step(
    machine: &mut Machine,
    feed: Feed,
    out_to: OutTarget,
    no_lookahead: bool,
) -> Result<(), Raise> {
    guard_depth(machine)?;
    let mut frame = Frame::new(Executor::Step, feed, out_to);
    frame.no_lookahead = no_lookahead;
    machine.push_frame(frame);
    Ok(())
}

fn push_block(machine: &mut Machine, feed: Feed, out_to: OutTarget) -> Result<(), Raise> {
    guard_depth(machine)?;
    machine.push_frame(Frame::new(Executor::Block, feed, out_to));
    Ok(())
}

/// Continuation entry for natives: run a block body as a sub-frame.
pub fn push_block_frame(
    machine: &mut Machine,
    feed: Feed,
    out_to: OutTarget,
) -> Result<(), Raise> {
    push_block(machine, feed, out_to)
}

/// Continuation entry for natives: run one expression as a sub-frame.
pub fn push_step_frame(
    machine: &mut Machine,
    feed: Feed,
    out_to: OutTarget,
) -> Result<(), Raise> {
    push_step(machine, feed, out_to, false)
}

/// Specifier for code taken out of a feed: the cell's own binding chain
/// when it has one, else the feed's.
fn subordinate_specifier(cell: &Cell, feed: &Feed) -> Option<SeriesId> {
    match cell.binding {
        Binding::Ctx(id) => Some(id),
        Binding::Unbound => feed.specifier,
    }
}

// ---------------------------------------------------------------------
// Action invocation
// ---------------------------------------------------------------------

/// Push an application frame for `invoked` (an action cell; its binding
/// travels for definitional return). `refines` is the call-site
/// refinement order from a path invocation.
pub fn push_action(
    machine: &mut Machine,
    invoked: &Cell,
    label: Option<SymId>,
    feed: Feed,
    out_to: OutTarget,
    enfix_left: Option<Cell>,
    refines: Vec<SymId>,
) -> Result<(), Raise> {
    guard_depth(machine)?;
    let action = invoked
        .action_id()
        .expect("push_action on a non-action cell");
    let (real, exemplars, partials) = action::resolve_specialization(machine, action);

    let paramlist = action::rec(machine, real).paramlist;
    let keys = action::keylist_of_paramlist(machine, paramlist);
    let count = action::param_count(machine, real);

    let mut varlist = Series::new_array(Flavor::Varlist, count + 1, SeriesFlags::POW2);
    varlist.link = rell_core::Link::Keylist(keys);
    let varlist = machine.heap.alloc(varlist);
    machine.heap.mutate(varlist, |s| {
        s.arr_push(Cell::frame(varlist));
        for _ in 0..count {
            s.arr_push(Cell::fresh());
        }
    });
    // Pre-filled slots from specializations; outermost shim wins.
    for exemplar in exemplars.into_iter().rev() {
        let filled = context::len(machine, exemplar).min(count);
        for index in 1..=filled {
            let cell = context::var_at(machine, exemplar, index).clone();
            if !cell.flags.contains(CellFlags::STALE) && !cell.is_none() {
                *context::var_at_mut(machine, varlist, index) = cell;
            }
        }
    }
    // Definitional return, bound to this very invocation.
    for index in 1..=count {
        if action::param_at(machine, real, index).class == ParamClass::Return
            && let Some(cell) = action::definitional_return(machine, varlist)
        {
            *context::var_at_mut(machine, varlist, index) = cell;
        }
    }
    machine.heap.manage(varlist);

    let mut frame = Frame::new(Executor::Action, feed, out_to);
    frame.phase = Some(real);
    frame.original = Some(action);
    frame.label = label.or(action::rec(machine, real).name);
    frame.varlist = Some(varlist);
    frame.scratch = invoked.clone();
    frame.catches = action::rec(machine, real).catches;
    if let Some(left) = enfix_left {
        frame.spare = left;
        frame.enfix_left = true;
        frame.was_enfix = true;
    }
    machine.push_frame(frame);

    // Refinement order: partial-specialization markers first, then the
    // call site's path refinements, as data-stack cells.
    for sym in partials.into_iter().chain(refines) {
        machine.data_stack.push(Cell::word(sym));
    }
    Ok(())
}

fn action_executor(machine: &mut Machine) -> Exec {
    match machine.top().fulfill {
        FULFILL_ARGS => fulfill_args(machine),
        FULFILL_REFINES => fulfill_refines(machine),
        FULFILL_TYPECHECK => typecheck_frame(machine),
        FULFILL_DISPATCH => run_dispatcher(machine),
        other => unreachable!("bad fulfill phase {other}"),
    }
}

/// Is this class fulfilled from the call site?
fn is_value_class(class: ParamClass) -> bool {
    matches!(
        class,
        ParamClass::Normal
            | ParamClass::Tight
            | ParamClass::Hard
            | ParamClass::Soft
            | ParamClass::Meta
    )
}

fn slot_is_unfilled(machine: &Machine, varlist: SeriesId, index: usize) -> bool {
    context::var_at(machine, varlist, index)
        .flags
        .contains(CellFlags::STALE)
}

/// Post-process a just-delivered argument slot. Returns false when the
/// slot is still stale (an invisible was consumed) and must be retried.
fn finish_arg(machine: &mut Machine, index: usize) -> Result<bool, Raise> {
    let (action, varlist) = {
        let top = machine.top();
        (top.action(), top.varlist.expect("action frame has varlist"))
    };
    if slot_is_unfilled(machine, varlist, index) {
        return Ok(false);
    }
    let param = action::param_at(machine, action, index);
    if param.class == ParamClass::Meta {
        context::var_at_mut(machine, varlist, index).lift_meta();
    }
    Ok(true)
}

/// Gather one argument at paramlist `index`. Returns Some(bounce) when a
/// sub-frame was pushed (or the call vanished); None when the slot was
/// filled synchronously.
fn gather_arg(machine: &mut Machine, index: usize) -> Result<Option<Bounce>, Raise> {
    let (action, varlist, feed, enfix_left) = {
        let top = machine.top();
        (
            top.action(),
            top.varlist.expect("action frame has varlist"),
            top.feed,
            top.enfix_left,
        )
    };
    let param = action::param_at(machine, action, index);

    // Enfix: the first value argument is the already-produced left-hand
    // value, stashed in spare.
    if enfix_left {
        let mut left = machine.top().spare.clone();
        if param.class == ParamClass::Meta {
            left.lift_meta();
        }
        *context::var_at_mut(machine, varlist, index) = left;
        machine.top_mut().enfix_left = false;
        return Ok(None);
    }

    if param.flags.contains(ParamFlags::VARIADIC) {
        // Remaining items of this expression, taken literally.
        let block = machine
            .heap
            .alloc(Series::new_array(Flavor::Array, 4, SeriesFlags::POW2));
        loop {
            let current = machine.top().feed.current(machine);
            match current {
                None => break,
                Some(cell) if cell.kind == Kind::Comma => break,
                Some(mut cell) => {
                    let spec = machine.top().feed.specifier;
                    bind::derelativize(&mut cell, spec);
                    machine.heap.mutate(block, |s| s.arr_push(cell));
                    machine.top_mut().feed.advance();
                }
            }
        }
        machine.heap.manage(block);
        *context::var_at_mut(machine, varlist, index) = Cell::block(block);
        return Ok(None);
    }

    let current = feed.current(machine);
    let at_barrier = match &current {
        None => true,
        Some(cell) => cell.kind == Kind::Comma,
    };
    if at_barrier {
        if param.flags.contains(ParamFlags::ENDABLE) {
            *context::var_at_mut(machine, varlist, index) = Cell::null_value();
            return Ok(None);
        }
        return Err(error::raise(machine, "script", "need-non-end", &[]));
    }
    let cell = current.expect("barrier check passed");

    // <skip>: a soft parameter that only takes a matching kind.
    if param.flags.contains(ParamFlags::SKIP) && !param.types.has(cell.kind) {
        *context::var_at_mut(machine, varlist, index) = Cell::null_value();
        return Ok(None);
    }

    match param.class {
        ParamClass::Hard => {
            let mut taken = cell;
            let spec = machine.top().feed.specifier;
            bind::derelativize(&mut taken, spec);
            machine.top_mut().feed.advance();
            *context::var_at_mut(machine, varlist, index) = taken;
            Ok(None)
        }
        ParamClass::Soft => {
            machine.top_mut().feed.advance();
            match cell.kind {
                Kind::Group => {
                    let spec = subordinate_specifier(&cell, &feed);
                    let (series, at) = cell.series_payload().expect("group has series");
                    let sub = Feed::new(series, at, spec);
                    machine.top_mut().state = AWAIT_ARG;
                    push_block(machine, sub, OutTarget::Arg(index as u32))?;
                    Ok(Some(Bounce::Continue))
                }
                Kind::GetWord => {
                    let spec = machine.top().feed.specifier;
                    let got = bind::get_var(machine, &cell, spec)?;
                    *context::var_at_mut(machine, varlist, index) = got;
                    Ok(None)
                }
                _ => {
                    let mut taken = cell;
                    let spec = machine.top().feed.specifier;
                    bind::derelativize(&mut taken, spec);
                    *context::var_at_mut(machine, varlist, index) = taken;
                    Ok(None)
                }
            }
        }
        ParamClass::Normal | ParamClass::Tight | ParamClass::Meta => {
            // Right-hand arguments of an enfix action must not complete
            // further enfix, or `1 + 2 * 3` would nest instead of chain.
            let no_lookahead = param.class == ParamClass::Tight || machine.top().was_enfix;
            machine.top_mut().state = AWAIT_ARG;
            push_step(machine, feed, OutTarget::Arg(index as u32), no_lookahead)?;
            Ok(Some(Bounce::Continue))
        }
        _ => unreachable!("gather on non-value class"),
    }
}

/// Pass 1: walk the paramlist in order, gathering main arguments.
/// Arguments positioned after the first refinement belong to
/// refinements and wait for pass 2.
fn fulfill_args(machine: &mut Machine) -> Exec {
    // Resume after an argument sub-frame.
    if machine.top().state == AWAIT_ARG {
        let index = machine.top().param_index as usize;
        machine.top_mut().state = AWAIT_NONE;
        if finish_arg(machine, index)? {
            machine.top_mut().param_index += 1;
        }
        // A stale slot means an invisible was consumed: retry the same
        // parameter.
    }

    loop {
        let (action, varlist, index) = {
            let top = machine.top();
            (
                top.action(),
                top.varlist.expect("action frame has varlist"),
                top.param_index as usize,
            )
        };
        let count = action::param_count(machine, action);
        if index == 0 {
            machine.top_mut().param_index = 1;
            continue;
        }
        if index > count {
            let top = machine.top_mut();
            top.fulfill = FULFILL_REFINES;
            top.refine_pos = 0;
            top.sub_param = 0;
            return Ok(Bounce::Continue);
        }
        let param = action::param_at(machine, action, index);
        match param.class {
            ParamClass::Local => {
                *context::var_at_mut(machine, varlist, index) = Cell::none_value();
                machine.top_mut().param_index += 1;
            }
            ParamClass::Return | ParamClass::Output => {
                // Installed at push time / not consumed from input.
                if slot_is_unfilled(machine, varlist, index) {
                    *context::var_at_mut(machine, varlist, index) = Cell::null_value();
                }
                machine.top_mut().param_index += 1;
            }
            ParamClass::Refinement => {
                if slot_is_unfilled(machine, varlist, index) {
                    *context::var_at_mut(machine, varlist, index) = Cell::null_value();
                }
                machine.top_mut().param_index += 1;
            }
            class if is_value_class(class) => {
                if refinement_owned(machine, action, index) {
                    // Gathered (or nulled) in pass 2.
                    machine.top_mut().param_index += 1;
                    continue;
                }
                if !slot_is_unfilled(machine, varlist, index) {
                    // Specialization already filled it.
                    machine.top_mut().param_index += 1;
                    continue;
                }
                match gather_arg(machine, index)? {
                    Some(bounce) => return Ok(bounce),
                    None => {
                        if finish_arg(machine, index)? {
                            machine.top_mut().param_index += 1;
                        }
                    }
                }
            }
            _ => unreachable!("unhandled parameter class"),
        }
    }
}

/// Does the parameter at `index` belong to a refinement (any refinement
/// parameter precedes it)?
fn refinement_owned(machine: &Machine, action: rell_core::ActionId, index: usize) -> bool {
    for i in 1..index {
        if action::param_at(machine, action, i).class == ParamClass::Refinement {
            return true;
        }
    }
    false
}

/// Pass 2: activate refinements in call-site order and gather their
/// arguments in that same order.
fn fulfill_refines(machine: &mut Machine) -> Exec {
    // Resume after a refinement-argument sub-frame.
    if machine.top().state == AWAIT_ARG {
        let index = machine.top().sub_param as usize;
        machine.top_mut().state = AWAIT_NONE;
        if finish_arg(machine, index)? {
            machine.top_mut().sub_param += 1;
        }
    }

    loop {
        let (action, varlist, ds_mark, refine_pos, sub_param) = {
            let top = machine.top();
            (
                top.action(),
                top.varlist.expect("action frame has varlist"),
                top.ds_mark,
                top.refine_pos as usize,
                top.sub_param as usize,
            )
        };
        let count = action::param_count(machine, action);

        if sub_param != 0 {
            // Gathering the current refinement's argument run.
            if sub_param > count
                || !is_value_class(action::param_at(machine, action, sub_param).class)
            {
                let top = machine.top_mut();
                top.sub_param = 0;
                top.refine_pos += 1;
                continue;
            }
            match gather_arg(machine, sub_param)? {
                Some(bounce) => return Ok(bounce),
                None => {
                    if finish_arg(machine, sub_param)? {
                        machine.top_mut().sub_param += 1;
                    }
                }
            }
            continue;
        }

        let pending = machine.data_stack.len() - ds_mark;
        if refine_pos >= pending {
            let top = machine.top_mut();
            top.fulfill = FULFILL_TYPECHECK;
            top.state = AWAIT_NONE;
            return Ok(Bounce::Continue);
        }
        let symbol = machine.data_stack[ds_mark + refine_pos]
            .word_symbol()
            .expect("refinement marker is a word");
        let mut slot_index = None;
        for i in 1..=count {
            let param = action::param_at(machine, action, i);
            if param.class == ParamClass::Refinement
                && machine.heap.symbols.eq_fold(param.symbol, symbol)
            {
                slot_index = Some(i);
                break;
            }
        }
        let Some(slot_index) = slot_index else {
            let word = Cell::word(symbol);
            return Err(error::raise(machine, "script", "bad-refine", &[word]));
        };
        *context::var_at_mut(machine, varlist, slot_index) = Cell::logic(true);
        machine.top_mut().sub_param = (slot_index + 1) as u32;
    }
}

/// Typecheck every slot, then move to dispatch.
fn typecheck_frame(machine: &mut Machine) -> Exec {
    let (action, varlist) = {
        let top = machine.top();
        (
            top.phase.expect("typecheck without phase"),
            top.varlist.expect("action frame has varlist"),
        )
    };
    let count = action::param_count(machine, action);
    for index in 1..=count {
        let param = action::param_at(machine, action, index);
        if slot_is_unfilled(machine, varlist, index) {
            *context::var_at_mut(machine, varlist, index) = Cell::null_value();
        }
        let slot = context::var_at(machine, varlist, index).clone();
        if matches!(param.class, ParamClass::Local | ParamClass::Return | ParamClass::Output) {
            continue;
        }
        if slot.is_void() {
            if param.flags.contains(ParamFlags::MAYBE) {
                machine.top_mut().out = Cell::null_value();
                return Ok(Bounce::Done);
            }
            let action_label = label_cell(machine);
            let name = Cell::word(param.symbol);
            let type_word = Cell::word(machine.heap.intern("void!"));
            return Err(error::raise(
                machine,
                "script",
                "expect-arg",
                &[action_label, name, type_word],
            ));
        }
        if slot.is_failure() && param.class != ParamClass::Meta {
            let ctx = slot.context_varlist().expect("failure carries context");
            return Err(Raise(ctx));
        }
        if !action::typecheck_arg(&param, &slot) {
            let action_label = label_cell(machine);
            let name = Cell::word(param.symbol);
            let type_word = Cell::word(machine.heap.intern(crate::value::kind_name(slot.kind)));
            return Err(error::raise(
                machine,
                "script",
                "expect-arg",
                &[action_label, name, type_word],
            ));
        }
        if param.flags.contains(ParamFlags::CONST) {
            context::var_at_mut(machine, varlist, index)
                .flags
                .insert(CellFlags::CONST);
        }
    }
    let top = machine.top_mut();
    top.fulfill = FULFILL_DISPATCH;
    top.state = 0;
    Ok(Bounce::Continue)
}

fn label_cell(machine: &Machine) -> Cell {
    machine
        .top()
        .label
        .map(Cell::word)
        .unwrap_or_else(Cell::blank)
}

fn run_dispatcher(machine: &mut Machine) -> Exec {
    let action = machine.top().phase.expect("dispatch without phase");
    match action::rec(machine, action).dispatcher {
        Dispatcher::Native(native) => native(machine),
        Dispatcher::Body => body_dispatcher(machine),
        Dispatcher::Specializer => {
            unreachable!("specializers are resolved at push time")
        }
    }
}

/// Interpreted-function dispatcher: run the bound body over this frame's
/// varlist via a virtual-binding patch.
fn body_dispatcher(machine: &mut Machine) -> Exec {
    match machine.top().state {
        0 => {
            let (action, varlist, feed) = {
                let top = machine.top();
                (
                    top.action(),
                    top.varlist.expect("action frame has varlist"),
                    top.feed,
                )
            };
            let details = action::rec(machine, action).details;
            let body = machine
                .heap
                .get(details)
                .arr_at(0)
                .cloned()
                .expect("body dispatcher details lead with the body");
            let outer = subordinate_specifier(&body, &feed);
            let specifier = bind::make_specifier(machine, varlist, outer);
            let (series, index) = body.series_payload().expect("body is a block");
            machine.top_mut().state = 1;
            push_block(
                machine,
                Feed::new(series, index, Some(specifier)),
                OutTarget::Out,
            )?;
            Ok(Bounce::Continue)
        }
        1 => {
            let top = machine.top_mut();
            if top.out.flags.contains(CellFlags::STALE) {
                top.out = Cell::trash();
            }
            Ok(Bounce::Done)
        }
        other => unreachable!("body dispatcher state {other}"),
    }
}

// ---------------------------------------------------------------------
// Block executor
// ---------------------------------------------------------------------

fn block_executor(machine: &mut Machine) -> Exec {
    let feed = machine.top().feed;
    if feed.at_end(machine) {
        let top = machine.top_mut();
        if top.out.flags.contains(CellFlags::STALE) {
            // A block of nothing (or of vanished expressions) is void.
            top.out = Cell::void();
        }
        return Ok(Bounce::Done);
    }
    push_step(machine, feed, OutTarget::Out, false)?;
    Ok(Bounce::Continue)
}

// ---------------------------------------------------------------------
// Step executor
// ---------------------------------------------------------------------

fn step_executor(machine: &mut Machine) -> Exec {
    match machine.top().state {
        ST_INITIAL => step_initial(machine),
        ST_AFTER_SET_RHS => step_after_set(machine),
        ST_AFTER_GROUP => {
            machine.top_mut().state = ST_LOOKAHEAD;
            step_lookahead(machine)
        }
        ST_LOOKAHEAD => step_lookahead(machine),
        ST_AFTER_SEQ_RHS => step_after_seq_set(machine),
        other => unreachable!("step state {other}"),
    }
}

fn step_initial(machine: &mut Machine) -> Exec {
    // Leading barriers delimit nothing.
    loop {
        match machine.top().feed.current(machine) {
            Some(cell) if cell.kind == Kind::Comma => {
                machine.top_mut().feed.advance();
            }
            Some(_) => break,
            None => return Ok(Bounce::Done), // out stays stale: no expression
        }
    }
    let feed = machine.top().feed;
    let cell = feed.current(machine).expect("checked not at end");
    machine.top_mut().feed.advance();

    // Quoted values drop one quote level.
    if cell.is_quoted() {
        let mut out = cell;
        out.unquote(1).expect("quoted cell has a level to drop");
        bind::derelativize(&mut out, feed.specifier);
        return produce(machine, out);
    }
    // Quasiforms evaluate to their antiform.
    if cell.is_quasiform() {
        let mut out = cell;
        out.unlift_meta().expect("quasiform unlifts");
        return produce(machine, out);
    }

    match cell.kind {
        Kind::Word => {
            let value = bind::get_var(machine, &cell, feed.specifier)?;
            if value.kind == Kind::Action && value.lift == 1 {
                let label = cell.word_symbol();
                machine.top_mut().state = ST_LOOKAHEAD;
                let feed_now = machine.top().feed;
                push_action(
                    machine,
                    &value,
                    label,
                    feed_now,
                    OutTarget::Out,
                    None,
                    Vec::new(),
                )?;
                return Ok(Bounce::Continue);
            }
            if value.is_none() || value.is_trash() {
                let word = Cell::word(cell.word_symbol().expect("word cell"));
                return Err(error::raise(machine, "script", "no-value", &[word]));
            }
            let mut out = value;
            out.flags.remove(CellFlags::UNEVALUATED);
            produce(machine, out)
        }
        Kind::GetWord => {
            let value = bind::get_var(machine, &cell, feed.specifier)?;
            produce(machine, value)
        }
        Kind::MetaWord => {
            let mut value = bind::get_var(machine, &cell, feed.specifier)?;
            value.lift_meta();
            produce(machine, value)
        }
        Kind::SetWord | Kind::MetaSetWord => {
            begin_assignment(machine, cell, ST_AFTER_SET_RHS)
        }
        Kind::SetPath | Kind::SetTuple => {
            begin_assignment(machine, cell, ST_AFTER_SEQ_RHS)
        }
        Kind::Group => {
            let spec = subordinate_specifier(&cell, &feed);
            let (series, index) = cell.series_payload().expect("group has series");
            machine.top_mut().state = ST_AFTER_GROUP;
            push_block(machine, Feed::new(series, index, spec), OutTarget::Out)?;
            Ok(Bounce::Continue)
        }
        Kind::Path => step_path(machine, cell, feed),
        Kind::GetPath | Kind::Tuple => {
            let value = eval_sequence(machine, &cell, feed.specifier)?;
            produce(machine, value)
        }
        Kind::Action => {
            machine.top_mut().state = ST_LOOKAHEAD;
            let feed_now = machine.top().feed;
            push_action(
                machine,
                &cell,
                None,
                feed_now,
                OutTarget::Out,
                None,
                Vec::new(),
            )?;
            Ok(Bounce::Continue)
        }
        Kind::Comma => unreachable!("barriers skipped above"),
        Kind::Free | Kind::End => {
            let stray_marker = Cell::word(machine.heap.intern("stray-marker"));
            Err(error::raise(
                machine,
                "internal",
                "invariant",
                &[stray_marker],
            ))
        }
        _ => {
            // Inert values are themselves, marked unevaluated.
            let mut out = cell;
            bind::derelativize(&mut out, feed.specifier);
            out.flags.insert(CellFlags::UNEVALUATED);
            produce(machine, out)
        }
    }
}

/// Install the step product and fall into enfix lookahead.
fn produce(machine: &mut Machine, out: Cell) -> Exec {
    let top = machine.top_mut();
    top.out = out;
    top.out.flags.remove(CellFlags::STALE);
    top.state = ST_LOOKAHEAD;
    step_lookahead(machine)
}

/// After a value, a word bound to an enfix-flagged action slot takes the
/// value as its left argument and the step continues; chains handle
/// `1 + 2 * 3` without precedence.
fn step_lookahead(machine: &mut Machine) -> Exec {
    if machine.top().no_lookahead {
        return Ok(Bounce::Done);
    }
    if machine.top().out.flags.contains(CellFlags::STALE) {
        return Ok(Bounce::Done);
    }
    let feed = machine.top().feed;
    let Some(next) = feed.current(machine) else {
        return Ok(Bounce::Done);
    };
    if next.kind != Kind::Word {
        return Ok(Bounce::Done);
    }
    let Some(slot) = bind::resolve(machine, &next, feed.specifier) else {
        return Ok(Bounce::Done);
    };
    if !machine.heap.get(slot.varlist).is_accessible() {
        return Ok(Bounce::Done);
    }
    let slot_cell = context::var_at(machine, slot.varlist, slot.index).clone();
    if slot_cell.kind != Kind::Action
        || slot_cell.lift != 1
        || !slot_cell.flags.contains(CellFlags::ENFIX)
    {
        return Ok(Bounce::Done);
    }
    machine.top_mut().feed.advance();
    let left = machine.top().out.clone();
    let label = next.word_symbol();
    let feed_now = machine.top().feed;
    push_action(
        machine,
        &slot_cell,
        label,
        feed_now,
        OutTarget::Out,
        Some(left),
        Vec::new(),
    )?;
    // After the enfix action delivers, look again: chains continue.
    Ok(Bounce::Continue)
}

/// Set-word / set-path: remember the target, evaluate the right-hand
/// side into spare.
fn begin_assignment(machine: &mut Machine, target: Cell, next_state: u8) -> Exec {
    let feed = machine.top().feed;
    match feed.current(machine) {
        None => Err(error::raise(machine, "script", "need-non-end", &[])),
        Some(cell) if cell.kind == Kind::Comma => {
            Err(error::raise(machine, "script", "need-non-end", &[]))
        }
        Some(_) => {
            let top = machine.top_mut();
            top.scratch = target;
            top.spare = Cell::fresh();
            top.state = next_state;
            push_step(machine, feed, OutTarget::Spare, false)?;
            Ok(Bounce::Continue)
        }
    }
}

/// Value ready for a set-word / meta-set-word target.
fn assignment_value(machine: &mut Machine) -> Result<Cell, Raise> {
    let spare = machine.top().spare.clone();
    let is_meta = matches!(machine.top().scratch.kind, Kind::MetaSetWord);
    if spare.flags.contains(CellFlags::STALE) || spare.is_void() {
        if is_meta {
            let mut lifted = Cell::void();
            lifted.lift_meta();
            return Ok(lifted);
        }
        return Err(error::raise(machine, "script", "bad-void-assign", &[]));
    }
    if is_meta {
        let mut lifted = spare;
        lifted.lift_meta();
        return Ok(lifted);
    }
    value::decay(machine, spare)
}

fn step_after_set(machine: &mut Machine) -> Exec {
    let value = assignment_value(machine)?;
    let target = machine.top().scratch.clone();
    let specifier = machine.top().feed.specifier;
    bind::set_var(machine, &target, specifier, value.clone())?;
    produce(machine, value)
}

fn step_after_seq_set(machine: &mut Machine) -> Exec {
    let value = assignment_value(machine)?;
    let target = machine.top().scratch.clone();
    let specifier = machine.top().feed.specifier;
    sequence_set(machine, &target, specifier, value.clone())?;
    produce(machine, value)
}

// ---------------------------------------------------------------------
// Paths and tuples
// ---------------------------------------------------------------------

/// A path at expression position: action head invokes with refinements;
/// data head picks stepwise, and an action picked at the last position
/// invokes without refinements.
fn step_path(machine: &mut Machine, cell: Cell, feed: Feed) -> Exec {
    let (series, index) = cell.series_payload().expect("path has series");
    let items: Vec<Cell> = machine.heap.get(series).arr_cells()[index as usize..].to_vec();
    let Some(head) = items.first() else {
        return Err(error::raise(machine, "script", "bad-pick", &[cell]));
    };
    if head.kind != Kind::Word {
        return Err(error::raise(
            machine,
            "script",
            "bad-sequence-item",
            &[head.clone()],
        ));
    }
    let value = bind::get_var(machine, head, feed.specifier)?;
    if value.kind == Kind::Action && value.lift == 1 {
        // Remaining segments are refinements, in call order.
        let mut refines = Vec::new();
        for item in &items[1..] {
            match item.word_symbol() {
                Some(sym) if item.kind == Kind::Word => refines.push(sym),
                _ => {
                    return Err(error::raise(
                        machine,
                        "script",
                        "bad-sequence-item",
                        &[item.clone()],
                    ));
                }
            }
        }
        let label = head.word_symbol();
        machine.top_mut().state = ST_LOOKAHEAD;
        let feed_now = machine.top().feed;
        push_action(
            machine,
            &value,
            label,
            feed_now,
            OutTarget::Out,
            None,
            refines,
        )?;
        return Ok(Bounce::Continue);
    }
    let mut current = value;
    for item in &items[1..] {
        current = pick_step(machine, &current, item)?;
    }
    if current.kind == Kind::Action && current.lift == 1 {
        machine.top_mut().state = ST_LOOKAHEAD;
        let feed_now = machine.top().feed;
        push_action(
            machine,
            &current,
            head.word_symbol(),
            feed_now,
            OutTarget::Out,
            None,
            Vec::new(),
        )?;
        return Ok(Bounce::Continue);
    }
    produce(machine, current)
}

/// Tuples and get-paths: pure picking, nothing invokes.
pub fn eval_sequence(
    machine: &mut Machine,
    cell: &Cell,
    specifier: Option<SeriesId>,
) -> Result<Cell, Raise> {
    let (series, index) = cell.series_payload().expect("sequence has series");
    let items: Vec<Cell> = machine.heap.get(series).arr_cells()[index as usize..].to_vec();
    let Some(head) = items.first() else {
        return Err(error::raise(machine, "script", "bad-pick", &[cell.clone()]));
    };
    if head.kind != Kind::Word {
        return Err(error::raise(
            machine,
            "script",
            "bad-sequence-item",
            &[head.clone()],
        ));
    }
    let mut current = bind::get_var(machine, head, specifier)?;
    for item in &items[1..] {
        current = pick_step(machine, &current, item)?;
    }
    Ok(current)
}

/// One pick: context by word, series by integer, pair by x/y. Constness
/// spreads from the container to the picked value.
pub fn pick_step(
    machine: &mut Machine,
    container: &Cell,
    selector: &Cell,
) -> Result<Cell, Raise> {
    let constness = container.flags.intersection(CellFlags::CONST);
    let mut picked = match (container.kind, selector.kind) {
        (kind, Kind::Word) if kind.is_context_like() => {
            let varlist = container.context_varlist().expect("context payload");
            if !machine.heap.get(varlist).is_accessible() {
                return Err(error::raise(machine, "script", "frame-ended", &[]));
            }
            let symbol = selector.word_symbol().expect("word selector");
            match context::find_key(machine, varlist, symbol, true) {
                Some(slot_index) => {
                    let slot = context::var_at(machine, varlist, slot_index);
                    if slot.flags.contains(CellFlags::HIDDEN) {
                        return Err(error::raise(
                            machine,
                            "script",
                            "bad-pick",
                            &[selector.clone()],
                        ));
                    }
                    let mut picked = slot.clone();
                    picked
                        .flags
                        .remove(CellFlags::PROTECTED | CellFlags::HIDDEN | CellFlags::ENFIX);
                    picked
                }
                None => {
                    return Err(error::raise(
                        machine,
                        "script",
                        "bad-pick",
                        &[selector.clone()],
                    ));
                }
            }
        }
        (kind, Kind::Integer) if kind.is_array_like() => {
            let (series, at) = container.series_payload().expect("series payload");
            if !machine.heap.get(series).is_accessible() {
                return Err(error::raise(machine, "script", "frame-ended", &[]));
            }
            let n = selector.as_integer().expect("integer selector");
            if n < 1 {
                return Err(error::raise(
                    machine,
                    "script",
                    "out-of-range",
                    &[selector.clone()],
                ));
            }
            match machine
                .heap
                .get(series)
                .arr_at(at as usize + n as usize - 1)
            {
                Some(found) => found.clone(),
                None => Cell::null_value(),
            }
        }
        (Kind::Text | Kind::Binary, Kind::Integer) => {
            let (series, at) = container.series_payload().expect("series payload");
            let n = selector.as_integer().expect("integer selector");
            if n < 1 {
                return Err(error::raise(
                    machine,
                    "script",
                    "out-of-range",
                    &[selector.clone()],
                ));
            }
            let bytes = machine.heap.get(series).bytes();
            let offset = at as usize + n as usize - 1;
            match (container.kind, bytes.get(offset)) {
                (Kind::Binary, Some(&byte)) => Cell::integer(byte as i64),
                (Kind::Text, Some(_)) => {
                    let text = machine.heap.get(series).text_str();
                    match text[at as usize..].chars().nth(n as usize - 1) {
                        Some(c) => Cell::char(c),
                        None => Cell::null_value(),
                    }
                }
                _ => Cell::null_value(),
            }
        }
        (Kind::Pair, Kind::Word) => {
            let spelling = selector
                .word_symbol()
                .map(|sym| machine.heap.spelling(sym).to_string())
                .unwrap_or_default();
            match (&container.payload, spelling.as_str()) {
                (Payload::Pair { x, .. }, "x") => Cell::integer(*x),
                (Payload::Pair { y, .. }, "y") => Cell::integer(*y),
                _ => {
                    return Err(error::raise(
                        machine,
                        "script",
                        "bad-pick",
                        &[selector.clone()],
                    ));
                }
            }
        }
        _ => {
            return Err(error::raise(
                machine,
                "script",
                "bad-pick",
                &[selector.clone()],
            ));
        }
    };
    picked.flags.insert(constness);
    picked.flags.remove(CellFlags::STALE);
    Ok(picked)
}

/// Assignment through a set-path / set-tuple: pick to the last segment,
/// then write.
pub fn sequence_set(
    machine: &mut Machine,
    target: &Cell,
    specifier: Option<SeriesId>,
    value: Cell,
) -> Result<(), Raise> {
    let (series, index) = target.series_payload().expect("sequence has series");
    let items: Vec<Cell> = machine.heap.get(series).arr_cells()[index as usize..].to_vec();
    if items.len() < 2 {
        return Err(error::raise(machine, "script", "bad-pick", &[target.clone()]));
    }
    let head = &items[0];
    if head.kind != Kind::Word {
        return Err(error::raise(
            machine,
            "script",
            "bad-sequence-item",
            &[head.clone()],
        ));
    }
    let mut container = bind::get_var(machine, head, specifier)?;
    for item in &items[1..items.len() - 1] {
        container = pick_step(machine, &container, item)?;
    }
    if container.flags.contains(CellFlags::CONST) {
        return Err(error::raise(machine, "script", "const-value", &[]));
    }
    let last = &items[items.len() - 1];
    match (container.kind, last.kind) {
        (kind, Kind::Word) if kind.is_context_like() => {
            let varlist = container.context_varlist().expect("context payload");
            let symbol = last.word_symbol().expect("word selector");
            match context::find_key(machine, varlist, symbol, true) {
                Some(slot_index) => {
                    bind::write_slot(
                        machine,
                        bind::Slot {
                            varlist,
                            index: slot_index,
                        },
                        value,
                    )?;
                    Ok(())
                }
                None => Err(error::raise(
                    machine,
                    "script",
                    "bad-pick",
                    &[last.clone()],
                )),
            }
        }
        (kind, Kind::Integer) if kind.is_array_like() => {
            let (series, at) = container.series_payload().expect("series payload");
            if machine.heap.get(series).flags.contains(SeriesFlags::FROZEN) {
                return Err(error::raise(machine, "access", "read-only", &[]));
            }
            let n = last.as_integer().expect("integer selector");
            let offset = at as usize + n as usize - 1;
            if n < 1 || offset >= machine.heap.get(series).arr_len() {
                return Err(error::raise(
                    machine,
                    "script",
                    "out-of-range",
                    &[last.clone()],
                ));
            }
            machine.heap.mutate(series, |s| {
                *s.arr_at_mut(offset).expect("bounds checked") = value;
            });
            Ok(())
        }
        _ => Err(error::raise(machine, "script", "bad-pick", &[last.clone()])),
    }
}
