use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;
use tracing::trace;

use crate::ir::AccessFlags;
use crate::jdk::platform_type;
use crate::names::ClassIdentifier;
use crate::source::ClassSource;

/// Supertype declarations of one type.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TypeHierarchy {
    pub type_name: ClassIdentifier,
    pub super_type: Option<ClassIdentifier>,
    pub interfaces: Vec<ClassIdentifier>,
    pub access: AccessFlags,
}

impl TypeHierarchy {
    pub fn is_interface(&self) -> bool {
        self.access.is_interface()
    }

    /// Interfaces and abstract classes.
    pub fn is_abstract(&self) -> bool {
        self.access.is_interface() || self.access.is_abstract()
    }

    pub fn is_final(&self) -> bool {
        self.access.is_final()
    }

    pub fn is_enum(&self) -> bool {
        self.super_type
            .as_ref()
            .is_some_and(|super_type| super_type.as_str() == "java.lang.Enum")
    }
}

#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum HierarchyError {
    #[error("type hierarchy unavailable for {class}")]
    Unavailable { class: ClassIdentifier },
}

/// Resolves supertype relationships from class declarations without loading classes.
///
/// Both the per-type hierarchy and every `(to, from)` assignability answer are
/// memoised, failures included, for the lifetime of the resolver.
pub struct HierarchyResolver {
    source: Arc<dyn ClassSource>,
    hierarchies: DashMap<ClassIdentifier, Result<Arc<TypeHierarchy>, HierarchyError>>,
    assignable: DashMap<(ClassIdentifier, ClassIdentifier), Result<bool, HierarchyError>>,
}

impl HierarchyResolver {
    pub fn new(source: Arc<dyn ClassSource>) -> Self {
        Self {
            source,
            hierarchies: DashMap::new(),
            assignable: DashMap::new(),
        }
    }

    pub fn hierarchy_of(
        &self,
        type_name: &ClassIdentifier,
    ) -> Result<Arc<TypeHierarchy>, HierarchyError> {
        if let Some(cached) = self.hierarchies.get(type_name) {
            return cached.value().clone();
        }
        let resolved = self.read_hierarchy(type_name).map(Arc::new);
        self.hierarchies
            .entry(type_name.clone())
            .or_insert(resolved)
            .value()
            .clone()
    }

    fn read_hierarchy(&self, type_name: &ClassIdentifier) -> Result<TypeHierarchy, HierarchyError> {
        if type_name.is_array() {
            return Ok(TypeHierarchy {
                type_name: type_name.clone(),
                super_type: Some(ClassIdentifier::object()),
                interfaces: vec![
                    ClassIdentifier::new("java.lang.Cloneable"),
                    ClassIdentifier::new("java.io.Serializable"),
                ],
                access: AccessFlags(AccessFlags::PUBLIC | AccessFlags::FINAL),
            });
        }
        if type_name.is_primitive() {
            return Ok(TypeHierarchy {
                type_name: type_name.clone(),
                super_type: None,
                interfaces: Vec::new(),
                access: AccessFlags(AccessFlags::PUBLIC | AccessFlags::FINAL),
            });
        }
        if let Some(class) = self.source.class(type_name) {
            return Ok(TypeHierarchy {
                type_name: type_name.clone(),
                super_type: class.super_name.clone(),
                interfaces: class.interfaces.clone(),
                access: class.access,
            });
        }
        if let Some(platform) = platform_type(&type_name.internal_name()) {
            return Ok(TypeHierarchy {
                type_name: type_name.clone(),
                super_type: platform.super_name.map(ClassIdentifier::new),
                interfaces: platform
                    .interfaces
                    .iter()
                    .map(|name| ClassIdentifier::new(*name))
                    .collect(),
                access: AccessFlags(platform.access),
            });
        }
        trace!(class = %type_name, "type hierarchy unavailable");
        Err(HierarchyError::Unavailable {
            class: type_name.clone(),
        })
    }

    /// Whether a value of type `from` can be assigned to a variable of type `to`.
    ///
    /// Follows the JVM's rules: reflexive, primitives only to themselves,
    /// everything else to `Object`, arrays covariantly and to `Cloneable` and
    /// `Serializable`, classes along superclass and interface edges.
    pub fn is_assignable_from(
        &self,
        to: &ClassIdentifier,
        from: &ClassIdentifier,
    ) -> Result<bool, HierarchyError> {
        if to == from {
            return Ok(true);
        }
        if to.is_primitive() || from.is_primitive() {
            return Ok(false);
        }
        if to.is_object() {
            return Ok(true);
        }
        let key = (to.clone(), from.clone());
        if let Some(cached) = self.assignable.get(&key) {
            return cached.value().clone();
        }
        let answer = self.compute_assignable(to, from);
        self.assignable.insert(key, answer.clone());
        answer
    }

    fn compute_assignable(
        &self,
        to: &ClassIdentifier,
        from: &ClassIdentifier,
    ) -> Result<bool, HierarchyError> {
        if from.is_array() {
            if let (Some(to_component), Some(from_component)) =
                (to.component_type(), from.component_type())
            {
                if to_component.is_primitive() || from_component.is_primitive() {
                    return Ok(to_component == from_component);
                }
                return self.is_assignable_from(&to_component, &from_component);
            }
            return Ok(matches!(
                to.as_str(),
                "java.lang.Cloneable" | "java.io.Serializable"
            ));
        }
        if to.is_array() {
            return Ok(false);
        }

        // Walk supertype edges; a missing branch only matters when no other
        // branch proves assignability.
        let mut to_visit = vec![from.clone()];
        let mut visited: HashSet<ClassIdentifier> = to_visit.iter().cloned().collect();
        let mut failure = None;
        while let Some(next) = to_visit.pop() {
            let hierarchy = match self.hierarchy_of(&next) {
                Ok(hierarchy) => hierarchy,
                Err(err) => {
                    failure = Some(err);
                    continue;
                }
            };
            for parent in hierarchy.super_type.iter().chain(hierarchy.interfaces.iter()) {
                if parent == to {
                    return Ok(true);
                }
                if visited.insert(parent.clone()) {
                    to_visit.push(parent.clone());
                }
            }
        }
        match failure {
            Some(err) => Err(err),
            None => Ok(false),
        }
    }

    /// Whether `type_name` is assignable to any of `candidates`.
    pub fn is_subtype_of_any(
        &self,
        type_name: &ClassIdentifier,
        candidates: &[&str],
    ) -> Result<bool, HierarchyError> {
        for candidate in candidates {
            if self.is_assignable_from(&ClassIdentifier::new(*candidate), type_name)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn is_interface(&self, type_name: &ClassIdentifier) -> Result<bool, HierarchyError> {
        Ok(self.hierarchy_of(type_name)?.is_interface())
    }

    pub fn is_abstract(&self, type_name: &ClassIdentifier) -> Result<bool, HierarchyError> {
        Ok(self.hierarchy_of(type_name)?.is_abstract())
    }

    pub fn is_enum(&self, type_name: &ClassIdentifier) -> Result<bool, HierarchyError> {
        Ok(self.hierarchy_of(type_name)?.is_enum())
    }

    pub fn super_type_of(
        &self,
        type_name: &ClassIdentifier,
    ) -> Result<Option<ClassIdentifier>, HierarchyError> {
        Ok(self.hierarchy_of(type_name)?.super_type.clone())
    }
}
