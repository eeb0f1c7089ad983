use std::collections::{BTreeMap, BTreeSet};

use crate::ir::{Class, Method};
use crate::names::{ClassIdentifier, MethodIdentifier};

/// Which private methods of a class only ever run during construction.
///
/// A private method qualifies when it has at least one call site inside the
/// class and every call site is in a constructor or in another qualifying
/// private method. Lambda bodies have no direct call sites and never qualify.
#[derive(Debug)]
pub(crate) struct PrivateMethodCalls {
    owner: ClassIdentifier,
    constructor_only: BTreeSet<MethodIdentifier>,
}

impl PrivateMethodCalls {
    pub(crate) fn of(class: &Class) -> Self {
        let private: BTreeSet<MethodIdentifier> = class
            .methods
            .iter()
            .filter(|method| method.access.is_private() && !method.is_constructor())
            .map(|method| class.method_identifier(method))
            .collect();

        // callee -> callers
        let mut callers: BTreeMap<MethodIdentifier, Vec<&Method>> = BTreeMap::new();
        for method in &class.methods {
            for call in method.calls() {
                let callee = MethodIdentifier::new(call.owner.clone(), call.name.clone(), call.descriptor.clone());
                if private.contains(&callee) {
                    callers.entry(callee).or_default().push(method);
                }
            }
        }

        let mut constructor_only = BTreeSet::new();
        loop {
            let before = constructor_only.len();
            for (callee, sites) in &callers {
                if constructor_only.contains(callee) {
                    continue;
                }
                let recursive = |caller: &&Method| &class.method_identifier(caller) == callee;
                let entered = sites.iter().any(|caller| !recursive(caller));
                let qualifies = sites.iter().filter(|caller| !recursive(*caller)).all(|caller| {
                    caller.is_constructor() || constructor_only.contains(&class.method_identifier(caller))
                });
                if entered && qualifies {
                    constructor_only.insert(callee.clone());
                }
            }
            if constructor_only.len() == before {
                break;
            }
        }
        Self {
            owner: class.name.clone(),
            constructor_only,
        }
    }

    pub(crate) fn is_constructor_only(&self, method: &Method) -> bool {
        let identifier = MethodIdentifier::new(self.owner.clone(), method.name.clone(), method.descriptor.clone());
        self.constructor_only.contains(&identifier)
    }

    /// Constructors plus constructor-only private methods.
    pub(crate) fn construction_methods<'c>(
        &'c self,
        class: &'c Class,
    ) -> impl Iterator<Item = &'c Method> + 'c {
        class
            .methods
            .iter()
            .filter(move |method| method.is_constructor() || self.is_constructor_only(method))
    }
}
