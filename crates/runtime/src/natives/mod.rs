//! The native library
//!
//! Module-per-concern: arithmetic and comparison, control flow, function
//! machinery, data and reflection, series basics. `install` registers
//! everything into the user context and wires the enfix operator words.

use rell_core::{ActionId, Cell, CellFlags, Flavor, Kind, Series, SeriesFlags, SymId, TypeBits};

use crate::action::{self, Dispatcher, NativeFn};
use crate::context;
use crate::machine::Machine;
use crate::scan;
use crate::value::kind_from_name;

pub mod arithmetic;
pub mod control;
pub mod data;
pub mod func;
pub mod series;

/// Register the whole native set. Called once at startup.
pub fn install(machine: &mut Machine) {
    arithmetic::install(machine);
    control::install(machine);
    func::install(machine);
    data::install(machine);
    series::install(machine);
    install_datatypes(machine);
    install_constants(machine);
}

/// Register one native: scan its spec, build the paramlist, install the
/// action under `name` in the user context.
pub fn native(
    machine: &mut Machine,
    name: &str,
    spec: &str,
    body: NativeFn,
) -> ActionId {
    native_flags(machine, name, spec, body, false)
}

/// Natives whose dispatchers participate in catch offers.
pub fn native_catching(
    machine: &mut Machine,
    name: &str,
    spec: &str,
    body: NativeFn,
) -> ActionId {
    native_flags(machine, name, spec, body, true)
}

fn native_flags(
    machine: &mut Machine,
    name: &str,
    spec: &str,
    body: NativeFn,
    catches: bool,
) -> ActionId {
    let spec_block = scan::scan_source(machine, "natives", spec)
        .unwrap_or_else(|err| panic!("native {name}: spec does not scan: {err}"));
    let params = action::parse_spec(machine, spec_block)
        .unwrap_or_else(|_| panic!("native {name}: spec does not parse"));
    let paramlist = action::build_paramlist(machine, &params);
    let details = machine
        .heap
        .alloc(Series::new_array(Flavor::Details, 0, SeriesFlags::empty()));
    let symbol = machine.heap.intern(name);
    let id = action::make_action(
        machine,
        paramlist,
        details,
        Dispatcher::Native(body),
        Some(symbol),
    );
    machine.actions.get_mut(id.0).catches = catches;
    install_value(machine, symbol, Cell::action(id));
    id
}

/// Bind `name` in the user context.
pub fn install_value(machine: &mut Machine, symbol: SymId, value: Cell) {
    let lib = machine.lib;
    let index = context::find_key(machine, lib, symbol, true)
        .unwrap_or_else(|| context::append_key(machine, lib, symbol));
    *context::var_at_mut(machine, lib, index) = value;
}

/// Install an operator word: same action, enfix-flagged variable slot.
/// The flag lives on the slot, so the prefix name stays prefix.
pub fn install_enfix(machine: &mut Machine, operator: &str, action: ActionId) {
    let symbol = machine.heap.intern(operator);
    install_value(machine, symbol, Cell::action(action));
    let lib = machine.lib;
    let index = context::find_key(machine, lib, symbol, true).expect("just installed");
    context::var_at_mut(machine, lib, index)
        .flags
        .insert(CellFlags::ENFIX);
}

/// Datatype words (`integer!`, `block!`, ...) bound to their typesets,
/// which is what MAKE and TYPE-OF traffic in.
fn install_datatypes(machine: &mut Machine) {
    for ordinal in 0..rell_core::cell::KIND_COUNT as u8 {
        let kind = Kind::try_from(ordinal).expect("ordinal in range");
        if matches!(kind, Kind::Free | Kind::End) {
            continue;
        }
        let name = crate::value::kind_name(kind);
        debug_assert!(kind_from_name(name) == Some(kind));
        let symbol = machine.heap.intern(name);
        install_value(machine, symbol, Cell::typeset(TypeBits::of(kind)));
    }
    let any = machine.heap.intern("any-value!");
    install_value(machine, any, Cell::typeset(TypeBits::ANY_VALUE));
}

fn install_constants(machine: &mut Machine) {
    let pairs = [("true", true), ("false", false), ("on", true), ("off", false)];
    for (name, value) in pairs {
        let symbol = machine.heap.intern(name);
        install_value(machine, symbol, Cell::logic(value));
    }
    let null = machine.heap.intern("null");
    install_value(machine, null, Cell::null_value());
}

// -- shared helpers for native bodies ---------------------------------

/// Argument slot `index` (1-based paramlist position) of the top frame.
pub fn arg(machine: &Machine, index: usize) -> Cell {
    let varlist = machine
        .top()
        .varlist
        .expect("native frame has a varlist");
    context::var_at(machine, varlist, index).clone()
}

/// Is the refinement at paramlist `index` active?
pub fn refinement_on(machine: &Machine, index: usize) -> bool {
    arg(machine, index).as_logic() == Some(true)
}

/// Store the native's product and finish.
pub fn done(machine: &mut Machine, out: Cell) -> crate::machine::Exec {
    let top = machine.top_mut();
    top.out = out;
    top.out.flags.remove(CellFlags::STALE);
    Ok(crate::machine::Bounce::Done)
}
