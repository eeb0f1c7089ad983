use anyhow::Result;

use crate::config::Configuration;
use crate::hierarchy::HierarchyResolver;
use crate::ir::{Class, Field, Instruction, InstructionKind};
use crate::model::{AnalysisResult, CodeLocation, Reason, ReasonKind};
use crate::names::{ClassIdentifier, FieldIdentifier};

pub(crate) mod array_field;
pub(crate) mod can_subclass;
pub(crate) mod collections;
pub(crate) mod escaped_this;
pub(crate) mod inherent_type;
pub(crate) mod mutable_field_type;
pub(crate) mod non_final_field;
pub(crate) mod private_methods;
pub(crate) mod published_field;
pub(crate) mod reassignment;

/// Metadata describing a checker.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CheckerMetadata {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
}

/// Checker interface: one class in, reasons out.
pub(crate) trait Checker {
    fn metadata(&self) -> CheckerMetadata;
    fn run(&self, context: &CheckerContext<'_>) -> Result<Vec<Reason>>;
}

/// Answer to "is this other type immutable" during a class analysis.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TypeMutability {
    Known(AnalysisResult),
    /// The type is already being analysed further up the call chain.
    Cyclic,
}

/// Transitive lookups from a checker back into the session.
pub(crate) trait MutabilityLookup {
    fn mutability_of(&self, class: &ClassIdentifier) -> TypeMutability;
}

/// Everything a checker may consult while analysing one class.
pub(crate) struct CheckerContext<'a> {
    pub(crate) class: &'a Class,
    pub(crate) hierarchy: &'a HierarchyResolver,
    pub(crate) configuration: &'a Configuration,
    pub(crate) lookup: &'a dyn MutabilityLookup,
}

/// The closed battery of checkers, in the order the session runs them.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum CheckerKind {
    CanSubclass,
    PublishedNonFinalField,
    NonFinalField,
    FieldReassignment,
    MutableFieldType,
    InherentTypeMutability,
    ArrayField,
    EscapedThis,
}

impl CheckerKind {
    pub const ALL: [CheckerKind; 8] = [
        CheckerKind::CanSubclass,
        CheckerKind::PublishedNonFinalField,
        CheckerKind::NonFinalField,
        CheckerKind::FieldReassignment,
        CheckerKind::MutableFieldType,
        CheckerKind::InherentTypeMutability,
        CheckerKind::ArrayField,
        CheckerKind::EscapedThis,
    ];

    fn checker(&self) -> &'static dyn Checker {
        match self {
            CheckerKind::CanSubclass => &can_subclass::CanSubclassChecker,
            CheckerKind::PublishedNonFinalField => &published_field::PublishedFieldChecker,
            CheckerKind::NonFinalField => &non_final_field::NonFinalFieldChecker,
            CheckerKind::FieldReassignment => &reassignment::ReassignmentChecker,
            CheckerKind::MutableFieldType => &mutable_field_type::MutableFieldTypeChecker,
            CheckerKind::InherentTypeMutability => &inherent_type::InherentTypeChecker,
            CheckerKind::ArrayField => &array_field::ArrayFieldChecker,
            CheckerKind::EscapedThis => &escaped_this::EscapedThisChecker,
        }
    }

    pub fn metadata(&self) -> CheckerMetadata {
        self.checker().metadata()
    }

    pub(crate) fn run(&self, context: &CheckerContext<'_>) -> Result<Vec<Reason>> {
        self.checker().run(context)
    }
}

pub(crate) fn field_reason(kind: ReasonKind, field: &FieldIdentifier, message: impl Into<String>) -> Reason {
    Reason::new(
        kind,
        message,
        CodeLocation::field(field.owner.clone(), field.name.clone()),
    )
}

pub(crate) fn class_reason(kind: ReasonKind, class: &Class, message: impl Into<String>) -> Reason {
    Reason::new(kind, message, CodeLocation::class(class.name.clone()))
}

/// The instance field of `class` written by `instruction`, if it is a `putfield`
/// targeting a field the class declares.
pub(crate) fn own_instance_field_store<'c>(class: &'c Class, instruction: &Instruction) -> Option<&'c Field> {
    let InstructionKind::Field(field) = &instruction.kind else {
        return None;
    };
    if field.access != crate::ir::FieldAccess::Put || field.owner != class.name {
        return None;
    }
    class
        .field(&field.name)
        .filter(|declared| !declared.access.is_static())
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use super::*;
    use crate::model::Verdict;
    use crate::source::ClassSet;

    /// Lookup answering from a fixed table; unknown types are immutable.
    #[derive(Default)]
    pub(crate) struct FixedLookup {
        pub(crate) verdicts: BTreeMap<ClassIdentifier, Verdict>,
    }

    impl FixedLookup {
        pub(crate) fn with(mut self, class: &str, verdict: Verdict) -> Self {
            self.verdicts.insert(ClassIdentifier::new(class), verdict);
            self
        }
    }

    impl MutabilityLookup for FixedLookup {
        fn mutability_of(&self, class: &ClassIdentifier) -> TypeMutability {
            let verdict = self
                .verdicts
                .get(class)
                .copied()
                .unwrap_or(Verdict::Immutable);
            let reasons = if verdict == Verdict::CouldNotAnalyse {
                vec![Reason::new(
                    ReasonKind::CannotAnalyse,
                    "missing",
                    CodeLocation::class(class.clone()),
                )]
            } else {
                Vec::new()
            };
            TypeMutability::Known(AnalysisResult::with_verdict(class.clone(), verdict, reasons))
        }
    }

    /// Run `kind` against `class`, resolving hierarchy through `class` and `extra`.
    pub(crate) fn run_checker(
        kind: CheckerKind,
        class: &Class,
        extra: Vec<Class>,
        lookup: &dyn MutabilityLookup,
    ) -> Vec<Reason> {
        run_with_config(kind, class, extra, lookup, &Configuration::default())
    }

    pub(crate) fn run_with_config(
        kind: CheckerKind,
        class: &Class,
        extra: Vec<Class>,
        lookup: &dyn MutabilityLookup,
        configuration: &Configuration,
    ) -> Vec<Reason> {
        let mut classes: ClassSet = extra.into_iter().collect();
        classes.insert(class.clone());
        let hierarchy = HierarchyResolver::new(Arc::new(classes));
        let context = CheckerContext {
            class,
            hierarchy: &hierarchy,
            configuration,
            lookup,
        };
        kind.run(&context).expect("checker run")
    }

    pub(crate) fn kinds(reasons: &[Reason]) -> Vec<ReasonKind> {
        reasons.iter().map(|reason| reason.kind).collect()
    }
}
