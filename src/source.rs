use std::collections::BTreeMap;
use std::sync::Arc;

use crate::ir::Class;
use crate::names::ClassIdentifier;

/// Supplies parsed classes to the analysis core on demand.
pub trait ClassSource: Send + Sync {
    fn class(&self, name: &ClassIdentifier) -> Option<Arc<Class>>;
}

/// In-memory set of parsed classes keyed by name.
#[derive(Clone, Debug, Default)]
pub struct ClassSet {
    classes: BTreeMap<ClassIdentifier, Arc<Class>>,
}

impl ClassSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a class; the first definition of a name wins, as on a classpath.
    pub fn insert(&mut self, class: Class) -> bool {
        if self.classes.contains_key(&class.name) {
            return false;
        }
        self.classes.insert(class.name.clone(), Arc::new(class));
        true
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &ClassIdentifier> {
        self.classes.keys()
    }
}

impl FromIterator<Class> for ClassSet {
    fn from_iter<T: IntoIterator<Item = Class>>(iter: T) -> Self {
        let mut set = ClassSet::new();
        for class in iter {
            set.insert(class);
        }
        set
    }
}

impl ClassSource for ClassSet {
    fn class(&self, name: &ClassIdentifier) -> Option<Arc<Class>> {
        self.classes.get(name).cloned()
    }
}
