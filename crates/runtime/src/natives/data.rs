//! Data, reflection, and output natives
//!
//! MAKE constructs contexts from typeset words (`make object! [...]`,
//! `make error! [...]`); the quote family moves values up and down the
//! lift ladder; PROTECT flips the slot flag the write barrier checks.

use rell_core::{Binding, Cell, CellFlags, Kind, SeriesId, TypeBits, known};

use crate::bind;
use crate::context;
use crate::error;
use crate::eval;
use crate::frame::{Feed, OutTarget};
use crate::machine::{Bounce, Exec, Machine, Raise};
use crate::mold;

use super::{arg, done, native, refinement_on};

pub fn install(machine: &mut Machine) {
    native(machine, "make", "type [typeset!] def [block! integer!]", n_make);
    native(machine, "set", "'target [word!] value [<opt> any-value!]", n_set);
    native(machine, "get", "'source [word! path! tuple!]", n_get);
    native(machine, "the", "'value [any-value!]", n_the);
    native(machine, "quote", "value [<opt> any-value!]", n_quote);
    native(machine, "unquote", "value [any-value!]", n_unquote);
    native(machine, "meta", "^value [<opt> any-value!]", n_meta);
    native(machine, "unmeta", "value [any-value!]", n_unmeta);
    native(machine, "protect", "'target [word!]", n_protect);
    native(machine, "unprotect", "'target [word!]", n_unprotect);
    native(
        machine,
        "bind",
        "block [block!] target [object! module! frame! error! word!] /rebind",
        n_bind,
    );
    native(machine, "type-of", "value [<opt> any-value!]", n_type_of);
    native(machine, "mold", "value [<opt> any-value!]", n_mold);
    native(machine, "form", "value [<opt> any-value!]", n_form);
    native(machine, "print", "value [<opt> any-value!]", n_print);
    native(machine, "probe", "value [<opt> any-value!]", n_probe);
}

// -- make --------------------------------------------------------------

/// The ERROR! prototype keys, installed before the definition block
/// runs so `id:`-style assignments land in fixed slots.
const ERROR_PROTO: &[rell_core::SymId] = &[
    known::TYPE,
    known::ID,
    known::ARG1,
    known::ARG2,
    known::ARG3,
    known::WHERE,
    known::NEAR,
    known::FILE,
    known::LINE,
];

fn n_make(machine: &mut Machine) -> Exec {
    match machine.top().state {
        0 => {
            let type_arg = arg(machine, 1);
            let bits = match type_arg.payload {
                rell_core::Payload::Typeset { bits } => bits,
                _ => unreachable!("typechecked typeset"),
            };
            let def = arg(machine, 2);
            if bits.has(Kind::Block) {
                let capacity = def.as_integer().unwrap_or(0).max(0) as usize;
                let id = machine.heap.alloc(rell_core::Series::new_array(
                    rell_core::Flavor::Array,
                    capacity,
                    rell_core::SeriesFlags::POW2,
                ));
                machine.heap.manage(id);
                return done(machine, Cell::block(id));
            }
            if def.kind != Kind::Block {
                return Err(error::raise(machine, "script", "bad-make", &[type_arg, def]));
            }
            if bits.has(Kind::Object) {
                make_context_from(machine, Kind::Object, &def, &[])
            } else if bits.has(Kind::Error) {
                make_context_from(machine, Kind::Error, &def, ERROR_PROTO)
            } else {
                Err(error::raise(machine, "script", "bad-make", &[type_arg, def]))
            }
        }
        _ => {
            // Definition block finished; the context is in scratch.
            let archetype = machine.top().scratch.clone();
            done(machine, archetype)
        }
    }
}

/// Collect the block's set-words (after any fixed prototype keys) into
/// a fresh context, then evaluate the block with the context overlaid,
/// so assignments fill the slots in source order.
fn make_context_from(
    machine: &mut Machine,
    kind: Kind,
    def: &Cell,
    proto: &[rell_core::SymId],
) -> Exec {
    let (series, index) = def.series_payload().expect("block definition");
    let ctx = context::make_context(machine, kind, proto.len() + 4);
    for &key in proto {
        context::append_key(machine, ctx, key);
    }
    let keys = context::collect_set_words(machine, series);
    for key in keys {
        if context::find_key(machine, ctx, key, true).is_none() {
            context::append_key(machine, ctx, key);
        }
    }
    let keylist = context::keylist_of(machine, ctx);
    machine.heap.manage(ctx);
    machine.heap.manage(keylist);

    let outer = match def.binding {
        Binding::Ctx(id) => Some(id),
        Binding::Unbound => None,
    };
    let overlay = bind::make_specifier(machine, ctx, outer);
    let top = machine.top_mut();
    top.scratch = Cell::context_kind(kind, ctx);
    top.state = 1;
    eval::push_block_frame(
        machine,
        Feed::new(series, index, Some(overlay)),
        OutTarget::Drop,
    )?;
    Ok(Bounce::Continue)
}

// -- variables ---------------------------------------------------------

fn n_set(machine: &mut Machine) -> Exec {
    let target = arg(machine, 1);
    let value = arg(machine, 2);
    let stable = crate::value::decay(machine, value)?;
    let specifier = machine.top().feed.specifier;
    bind::set_var(machine, &target, specifier, stable.clone())?;
    done(machine, stable)
}

fn n_get(machine: &mut Machine) -> Exec {
    let source = arg(machine, 1);
    let specifier = machine.top().feed.specifier;
    let value = match source.kind {
        Kind::Word => bind::get_var(machine, &source, specifier)?,
        Kind::Path | Kind::Tuple => eval::eval_sequence(machine, &source, specifier)?,
        _ => unreachable!("typechecked source"),
    };
    if value.is_none() {
        return done(machine, Cell::null_value());
    }
    done(machine, value)
}

// -- the quote ladder --------------------------------------------------

fn n_the(machine: &mut Machine) -> Exec {
    let value = arg(machine, 1);
    done(machine, value)
}

fn n_quote(machine: &mut Machine) -> Exec {
    let mut value = arg(machine, 1);
    if value.quote(1).is_err() {
        return Err(error::raise(machine, "script", "quote-depth", &[]));
    }
    done(machine, value)
}

fn n_unquote(machine: &mut Machine) -> Exec {
    let mut value = arg(machine, 1);
    if value.unquote(1).is_err() {
        return Err(error::raise(machine, "script", "quote-depth", &[]));
    }
    done(machine, value)
}

fn n_meta(machine: &mut Machine) -> Exec {
    // The meta parameter class already lifted the argument.
    let value = arg(machine, 1);
    done(machine, value)
}

fn n_unmeta(machine: &mut Machine) -> Exec {
    let mut value = arg(machine, 1);
    if value.unlift_meta().is_err() {
        return Err(error::raise(machine, "script", "quote-depth", &[]));
    }
    done(machine, value)
}

// -- protection --------------------------------------------------------

fn resolve_slot(machine: &mut Machine, target: &Cell) -> Result<bind::Slot, Raise> {
    let specifier = machine.top().feed.specifier;
    match bind::resolve(machine, target, specifier) {
        Some(slot) => Ok(slot),
        None => {
            let word = Cell::word(target.word_symbol().expect("word target"));
            Err(error::raise(machine, "script", "not-bound", &[word]))
        }
    }
}

fn n_protect(machine: &mut Machine) -> Exec {
    let target = arg(machine, 1);
    let slot = resolve_slot(machine, &target)?;
    context::var_at_mut(machine, slot.varlist, slot.index)
        .flags
        .insert(CellFlags::PROTECTED);
    done(machine, target)
}

fn n_unprotect(machine: &mut Machine) -> Exec {
    let target = arg(machine, 1);
    let slot = resolve_slot(machine, &target)?;
    context::var_at_mut(machine, slot.varlist, slot.index)
        .flags
        .remove(CellFlags::PROTECTED);
    done(machine, target)
}

// -- binding -----------------------------------------------------------

fn n_bind(machine: &mut Machine) -> Exec {
    let block = arg(machine, 1);
    let target = arg(machine, 2);
    let ctx: SeriesId = match target.kind {
        Kind::Word => match target.binding {
            Binding::Ctx(id) => id,
            Binding::Unbound => {
                return Err(error::raise(machine, "script", "not-bound", &[target]));
            }
        },
        _ => target.context_varlist().expect("typechecked context"),
    };
    let (series, index) = block.series_payload().expect("block argument");
    // Copy-before-bind unless /rebind asks for in-place mutation.
    let bound = if refinement_on(machine, 3) {
        series
    } else {
        bind::copy_array_deep(machine, series)
    };
    bind::bind_array(machine, bound, ctx, true);
    done(machine, Cell::array_kind(Kind::Block, bound, index))
}

// -- reflection and output ---------------------------------------------

fn n_type_of(machine: &mut Machine) -> Exec {
    let value = arg(machine, 1);
    done(machine, Cell::typeset(TypeBits::of(value.kind)))
}

fn n_mold(machine: &mut Machine) -> Exec {
    let value = arg(machine, 1);
    let text = mold::mold(machine, &value);
    let cell = machine.text_cell(&text);
    done(machine, cell)
}

fn n_form(machine: &mut Machine) -> Exec {
    let value = arg(machine, 1);
    let text = mold::form(machine, &value);
    let cell = machine.text_cell(&text);
    done(machine, cell)
}

fn n_print(machine: &mut Machine) -> Exec {
    let value = arg(machine, 1);
    let text = mold::form(machine, &value);
    println!("{text}");
    done(machine, Cell::trash())
}

fn n_probe(machine: &mut Machine) -> Exec {
    let value = arg(machine, 1);
    let text = mold::mold(machine, &value);
    println!("{text}");
    done(machine, value)
}
