//! Actions and parameters
//!
//! An action is an immutable paramlist (slot 0 = archetype, slots 1..n =
//! parameter descriptor cells) plus a details array for the dispatcher's
//! own cells, the dispatcher itself, and optionally an exemplar context
//! of pre-specialized argument values.
//!
//! Spec blocks parse as:
//!
//! ```text
//! func [a b [integer!] 'lit :soft ^meta /dup count [integer!] <local> tmp]
//!        │      │        │     │    │     │           │          │
//!        │      │        │     │    │     │           │          locals
//!        │      │        │     │    │     refinement  refinement arg
//!        │      │        │     │    meta (lifted) argument
//!        │      │        │     soft-quoted argument
//!        │      │        hard-quoted argument
//!        │      typeset for the preceding parameter
//!        normal argument
//! ```
//!
//! Parameters following the first refinement belong to refinements and
//! are gathered in call-site refinement order, which is what keeps
//! `app/dup/part` distinct from `app/part/dup`.

use rell_core::{
    ActionId, Binding, Cell, Flavor, Kind, Link, ParamClass, ParamFlags, ParamSpec, Series,
    SeriesFlags, SeriesId, SymId, TypeBits,
};

use crate::error;
use crate::machine::{Exec, Machine, Raise};
use crate::value::kind_from_name;

/// Native dispatcher entry point. Operates on the machine's top frame;
/// continuation state lives in that frame's state byte.
pub type NativeFn = fn(&mut Machine) -> Exec;

#[derive(Clone, Copy)]
pub enum Dispatcher {
    /// Built-in thunk.
    Native(NativeFn),
    /// Interpreted: details slot 0 is the bound body block.
    Body,
    /// Specialization shim: details slot 0 is the original action,
    /// slot 1 the partial-refinement order block.
    Specializer,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Dispatcher::Native(_) => write!(f, "Native"),
            Dispatcher::Body => write!(f, "Body"),
            Dispatcher::Specializer => write!(f, "Specializer"),
        }
    }
}

/// One action record in the machine's action pool.
#[derive(Debug)]
pub struct ActionRec {
    pub paramlist: SeriesId,
    pub details: SeriesId,
    pub dispatcher: Dispatcher,
    /// Context of pre-filled argument slots (specializations).
    pub exemplar: Option<SeriesId>,
    /// Adjunct metadata context.
    pub meta: Option<SeriesId>,
    /// Name for labels and molding.
    pub name: Option<SymId>,
    /// Dispatcher is offered in-flight throws (catch, trap, loops).
    pub catches: bool,
    /// GC mark bit.
    pub marked: bool,
}

/// Install an action. The paramlist's archetype slot is stamped with the
/// new identity; paramlist and details become managed.
pub fn make_action(
    machine: &mut Machine,
    paramlist: SeriesId,
    details: SeriesId,
    dispatcher: Dispatcher,
    name: Option<SymId>,
) -> ActionId {
    let id = ActionId(machine.actions.alloc(ActionRec {
        paramlist,
        details,
        dispatcher,
        exemplar: None,
        meta: None,
        name,
        catches: false,
        marked: false,
    }));
    *machine
        .heap
        .get_mut(paramlist)
        .arr_at_mut(0)
        .expect("paramlist has an archetype slot") = Cell::action(id);
    machine.heap.manage(paramlist);
    machine.heap.manage(details);
    let keys = keylist_of_paramlist(machine, paramlist);
    machine.heap.manage(keys);
    id
}

pub fn rec(machine: &Machine, action: ActionId) -> &ActionRec {
    machine.actions.get(action.0)
}

/// Number of parameters.
pub fn param_count(machine: &Machine, action: ActionId) -> usize {
    let paramlist = rec(machine, action).paramlist;
    machine.heap.get(paramlist).arr_len() - 1
}

/// Parameter descriptor at 1-based index.
pub fn param_at(machine: &Machine, action: ActionId, index: usize) -> ParamSpec {
    let paramlist = rec(machine, action).paramlist;
    machine
        .heap
        .get(paramlist)
        .arr_at(index)
        .and_then(|cell| cell.param_spec().cloned())
        .expect("paramlist slot holds a parameter")
}

/// The symbol keylist a frame varlist shares with the paramlist.
pub fn keylist_of_paramlist(machine: &Machine, paramlist: SeriesId) -> SeriesId {
    match machine.heap.get(paramlist).link {
        Link::Keylist(id) => id,
        other => panic!("paramlist link is {other:?}, not a keylist"),
    }
}

/// Chase specializer shims to the action that actually dispatches,
/// accumulating exemplars (innermost wins) and partial-refinement order
/// (outermost shim's partials run first).
pub fn resolve_specialization(
    machine: &Machine,
    action: ActionId,
) -> (ActionId, Vec<SeriesId>, Vec<SymId>) {
    let mut current = action;
    let mut exemplars = Vec::new();
    let mut partials = Vec::new();
    loop {
        let record = rec(machine, current);
        if let Some(exemplar) = record.exemplar {
            exemplars.push(exemplar);
        }
        match record.dispatcher {
            Dispatcher::Specializer => {
                let details = machine.heap.get(record.details);
                let original = details
                    .arr_at(0)
                    .and_then(|c| c.action_id())
                    .expect("specializer details lead with the original");
                if let Some(block) = details.arr_at(1).and_then(|c| c.series_payload()) {
                    for cell in machine.heap.get(block.0).arr_cells() {
                        if let Some(sym) = cell.word_symbol() {
                            partials.push(sym);
                        }
                    }
                }
                current = original;
            }
            _ => return (current, exemplars, partials),
        }
    }
}

/// Parse a spec block into parameter descriptors. Callers adjust the
/// list (FUNC injects a definitional return) and then `build_paramlist`.
pub fn parse_spec(machine: &mut Machine, spec: SeriesId) -> Result<Vec<ParamSpec>, Raise> {
    let cells: Vec<Cell> = machine.heap.get(spec).arr_cells().to_vec();
    let mut params: Vec<ParamSpec> = Vec::new();
    let mut locals_mode = false;

    for cell in &cells {
        // Doc strings are adjunct information, not parameters.
        if cell.kind == Kind::Text {
            continue;
        }
        if cell.kind == Kind::Word && cell.quote_depth() == 0 {
            let symbol = cell.word_symbol().expect("word has symbol");
            let spelling = machine.heap.spelling(symbol).to_string();
            if spelling == "<local>" {
                locals_mode = true;
                continue;
            }
            // Tag-style modifiers apply to the previous parameter.
            if let Some(flag) = tag_flag(&spelling) {
                match params.last_mut() {
                    Some(param) => {
                        param.flags.insert(flag);
                        continue;
                    }
                    None => {
                        return Err(error::raise(
                            machine,
                            "script",
                            "bad-parameter",
                            &[cell.clone()],
                        ));
                    }
                }
            }
            params.push(ParamSpec {
                symbol,
                class: if locals_mode {
                    ParamClass::Local
                } else {
                    ParamClass::Normal
                },
                flags: ParamFlags::empty(),
                types: TypeBits::NONE,
                spec: None,
            });
            continue;
        }
        if cell.kind == Kind::Word && cell.quote_depth() == 1 {
            // 'arg: hard quote.
            params.push(ParamSpec {
                symbol: cell.word_symbol().expect("word has symbol"),
                class: ParamClass::Hard,
                flags: ParamFlags::empty(),
                types: TypeBits::NONE,
                spec: None,
            });
            continue;
        }
        match cell.kind {
            Kind::GetWord => {
                params.push(ParamSpec {
                    symbol: cell.word_symbol().expect("word has symbol"),
                    class: ParamClass::Soft,
                    flags: ParamFlags::empty(),
                    types: TypeBits::NONE,
                    spec: None,
                });
            }
            Kind::MetaWord => {
                params.push(ParamSpec {
                    symbol: cell.word_symbol().expect("word has symbol"),
                    class: ParamClass::Meta,
                    flags: ParamFlags::empty(),
                    types: TypeBits::NONE,
                    spec: None,
                });
            }
            Kind::SetWord => {
                // return: [types]
                params.push(ParamSpec {
                    symbol: cell.word_symbol().expect("word has symbol"),
                    class: ParamClass::Return,
                    flags: ParamFlags::empty(),
                    types: TypeBits::NONE,
                    spec: None,
                });
            }
            Kind::Path => {
                // /refinement (blank-headed path).
                let (series, _) = cell.series_payload().expect("path has series");
                let items: Vec<Cell> = machine.heap.get(series).arr_cells().to_vec();
                let symbol = match (items.first(), items.get(1)) {
                    (Some(head), Some(name)) if head.kind == Kind::Blank => {
                        name.word_symbol()
                    }
                    _ => None,
                };
                match symbol {
                    Some(symbol) => params.push(ParamSpec {
                        symbol,
                        class: ParamClass::Refinement,
                        flags: ParamFlags::empty(),
                        types: TypeBits::NONE,
                        spec: None,
                    }),
                    None => {
                        return Err(error::raise(
                            machine,
                            "script",
                            "bad-parameter",
                            &[cell.clone()],
                        ));
                    }
                }
            }
            Kind::Block => {
                // Typeset and tags for the previous parameter.
                let (series, _) = cell.series_payload().expect("block has series");
                let items: Vec<Cell> = machine.heap.get(series).arr_cells().to_vec();
                let Some(param) = params.last_mut() else {
                    return Err(error::raise(
                        machine,
                        "script",
                        "bad-parameter",
                        &[cell.clone()],
                    ));
                };
                param.spec = Some(series);
                let mut types = param.types;
                let mut flags = param.flags;
                for item in &items {
                    let Some(symbol) = item.word_symbol() else {
                        continue;
                    };
                    let spelling = machine.heap.spelling(symbol).to_string();
                    if let Some(flag) = tag_flag(&spelling) {
                        flags.insert(flag);
                    } else if let Some(kind) = kind_from_name(&spelling) {
                        types = types.with(kind);
                    } else if spelling == "any-value!" {
                        types = types.union(TypeBits::ANY_VALUE);
                    } else {
                        return Err(error::raise(
                            machine,
                            "script",
                            "bad-parameter",
                            &[item.clone()],
                        ));
                    }
                }
                let Some(param) = params.last_mut() else {
                    unreachable!("checked above");
                };
                param.types = types;
                param.flags = flags;
            }
            _ => {
                return Err(error::raise(
                    machine,
                    "script",
                    "bad-parameter",
                    &[cell.clone()],
                ));
            }
        }
    }

    // Freeze the spec source so later mutation cannot skew typechecks.
    machine
        .heap
        .get_mut(spec)
        .flags
        .insert(SeriesFlags::FROZEN);

    Ok(params)
}

fn tag_flag(spelling: &str) -> Option<ParamFlags> {
    Some(match spelling {
        "<end>" => ParamFlags::ENDABLE,
        "<opt>" => ParamFlags::OPT,
        "<skip>" => ParamFlags::SKIP,
        "<variadic>" => ParamFlags::VARIADIC,
        "<maybe>" => ParamFlags::MAYBE,
        "<const>" => ParamFlags::CONST,
        "<unrun>" => ParamFlags::UNRUN,
        _ => return None,
    })
}

/// Materialize parameter descriptors into a paramlist + shared keylist.
pub fn build_paramlist(machine: &mut Machine, params: &[ParamSpec]) -> SeriesId {
    let mut keys = Series::new_keylist();
    for param in params {
        keys.keys_push(param.symbol);
    }
    keys.flags.insert(SeriesFlags::SHARED);
    let keys = machine.heap.alloc(keys);

    let mut paramlist = Series::new_array(Flavor::Paramlist, params.len() + 1, SeriesFlags::POW2);
    paramlist.link = Link::Keylist(keys);
    paramlist.arr_push(Cell::poison());
    for param in params {
        paramlist.arr_push(Cell::parameter(param.clone()));
    }
    machine.heap.alloc(paramlist)
}

/// Build the definitional RETURN cell for a frame: the shared return
/// native, bound to the frame it terminates. The evaluator matches the
/// binding identity, never the name.
pub fn definitional_return(machine: &Machine, varlist: SeriesId) -> Option<Cell> {
    let action = machine.return_native?;
    let mut cell = Cell::action(action);
    cell.binding = Binding::Ctx(varlist);
    Some(cell)
}

/// Typecheck one fulfilled argument.
pub fn typecheck_arg(param: &ParamSpec, arg: &Cell) -> bool {
    if arg.is_nulled() {
        // Null only passes opt-marked or refinement parameters.
        return param.flags.contains(ParamFlags::OPT)
            || param.class == ParamClass::Refinement;
    }
    if param.types.is_empty() {
        return true;
    }
    let mut heart = arg.clone();
    if param.class == ParamClass::Meta {
        // Meta arguments were lifted at gather time.
        let _ = heart.unlift_meta();
    }
    param.types.has(heart.kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::test_machine;
    use crate::scan::scan_source;

    fn spec_block(machine: &mut Machine, text: &str) -> SeriesId {
        scan_source(machine, "spec", text).expect("spec scans")
    }

    fn parse(machine: &mut Machine, text: &str) -> Vec<ParamSpec> {
        let spec = spec_block(machine, text);
        parse_spec(machine, spec).expect("spec parses")
    }

    #[test]
    fn test_parse_plain_params() {
        let mut machine = test_machine();
        let params = parse(&mut machine, "a b");
        assert_eq!(params.len(), 2);
        assert_eq!(params[0].class, ParamClass::Normal);
        assert_eq!(machine.heap.spelling(params[1].symbol), "b");
    }

    #[test]
    fn test_parse_quoting_classes() {
        let mut machine = test_machine();
        let params = parse(&mut machine, "'lit :soft ^meta");
        assert_eq!(params[0].class, ParamClass::Hard);
        assert_eq!(params[1].class, ParamClass::Soft);
        assert_eq!(params[2].class, ParamClass::Meta);
    }

    #[test]
    fn test_parse_typeset_and_tags() {
        let mut machine = test_machine();
        let params = parse(&mut machine, "value [integer! block! <opt>]");
        assert!(params[0].types.has(Kind::Integer));
        assert!(params[0].types.has(Kind::Block));
        assert!(!params[0].types.has(Kind::Text));
        assert!(params[0].flags.contains(ParamFlags::OPT));
    }

    #[test]
    fn test_parse_refinement_and_locals() {
        let mut machine = test_machine();
        let params = parse(&mut machine, "series /dup count [integer!] <local> tmp");
        assert_eq!(params[0].class, ParamClass::Normal);
        assert_eq!(params[1].class, ParamClass::Refinement);
        assert_eq!(machine.heap.spelling(params[1].symbol), "dup");
        assert_eq!(params[2].class, ParamClass::Normal);
        assert_eq!(params[3].class, ParamClass::Local);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let mut machine = test_machine();
        let spec = spec_block(&mut machine, "a 3.25");
        assert!(parse_spec(&mut machine, spec).is_err());
    }

    #[test]
    fn test_typecheck() {
        let param = ParamSpec {
            symbol: rell_core::known::RETURN,
            class: ParamClass::Normal,
            flags: ParamFlags::empty(),
            types: TypeBits::of(Kind::Integer),
            spec: None,
        };
        assert!(typecheck_arg(&param, &Cell::integer(1)));
        assert!(!typecheck_arg(&param, &Cell::blank()));
        assert!(!typecheck_arg(&param, &Cell::null_value()));
    }
}
