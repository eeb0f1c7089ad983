//! Recognition of the copy-then-wrap idiom for collection fields.

use crate::config::Configuration;
use crate::ir::{CallKind, CallSite, InstructionKind, Method};

pub(crate) const COLLECTION_TYPES: &[&str] = &["java.util.Collection", "java.util.Map"];

/// Concrete collections whose single-argument constructor copies its argument.
const COPY_CONSTRUCTOR_OWNERS: &[&str] = &[
    "java.util.ArrayList",
    "java.util.LinkedList",
    "java.util.HashSet",
    "java.util.LinkedHashSet",
    "java.util.TreeSet",
    "java.util.HashMap",
    "java.util.LinkedHashMap",
    "java.util.TreeMap",
];

const COPY_FACTORIES: &[(&str, &str)] = &[
    ("java.util.List", "copyOf"),
    ("java.util.Set", "copyOf"),
    ("java.util.Map", "copyOf"),
];

const WRAP_FACTORIES: &[&str] = &[
    "unmodifiableCollection",
    "unmodifiableList",
    "unmodifiableSet",
    "unmodifiableSortedSet",
    "unmodifiableNavigableSet",
    "unmodifiableMap",
    "unmodifiableSortedMap",
    "unmodifiableNavigableMap",
];

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum WrapIdiom {
    /// Copied into an owned collection, wrapped, then stored directly.
    CopiedAndWrapped,
    WrappedWithoutCopy,
    /// Copied by a method outside the whitelist, then wrapped.
    WrappedUnknownCopy,
    NotWrapped,
}

/// Classify the value stored by the `putfield` at `store_index`.
pub(crate) fn recognize(method: &Method, store_index: usize, configuration: &Configuration) -> WrapIdiom {
    let Some(wrap) = call_before(method, store_index) else {
        return WrapIdiom::NotWrapped;
    };
    if !is_wrap(wrap, configuration) {
        return WrapIdiom::NotWrapped;
    }
    match call_before(method, store_index - 1) {
        Some(copy) if is_copy(copy, configuration) => WrapIdiom::CopiedAndWrapped,
        Some(_) => WrapIdiom::WrappedUnknownCopy,
        None => WrapIdiom::WrappedWithoutCopy,
    }
}

fn call_before(method: &Method, index: usize) -> Option<&CallSite> {
    match &method.previous(index)?.kind {
        InstructionKind::Invoke(call) => Some(call),
        _ => None,
    }
}

fn is_wrap(call: &CallSite, configuration: &Configuration) -> bool {
    let builtin = call.kind == CallKind::Static
        && call.owner.as_str() == "java.util.Collections"
        && WRAP_FACTORIES.contains(&call.name.as_str());
    builtin
        || configuration
            .extra_wrap_methods()
            .iter()
            .any(|pattern| pattern.matches(&call.owner, &call.name))
}

fn is_copy(call: &CallSite, configuration: &Configuration) -> bool {
    let copy_constructor = call.is_constructor()
        && COPY_CONSTRUCTOR_OWNERS.contains(&call.owner.as_str())
        && takes_single_reference(&call.descriptor);
    let copy_factory = call.kind == CallKind::Static
        && COPY_FACTORIES
            .iter()
            .any(|(owner, name)| call.is(owner, name));
    copy_constructor
        || copy_factory
        || configuration
            .extra_copy_methods()
            .iter()
            .any(|pattern| pattern.matches(&call.owner, &call.name))
}

/// `(Ljava/util/Collection;)V` and friends; excludes capacity constructors.
fn takes_single_reference(descriptor: &str) -> bool {
    crate::descriptor::parameter_descriptors(descriptor)
        .is_ok_and(|params| params.len() == 1 && params[0].starts_with('L'))
}
