use anyhow::Result;

use crate::checkers::{Checker, CheckerContext, CheckerMetadata, class_reason};
use crate::model::{Reason, ReasonKind};

/// Checker for types that are mutable by their nature: interfaces and
/// abstract classes admit arbitrary mutable implementations.
pub(crate) struct InherentTypeChecker;

impl Checker for InherentTypeChecker {
    fn metadata(&self) -> CheckerMetadata {
        CheckerMetadata {
            id: "INHERENT_TYPE_MUTABILITY",
            name: "Inherently mutable type",
            description: "Interfaces and abstract classes",
        }
    }

    fn run(&self, context: &CheckerContext<'_>) -> Result<Vec<Reason>> {
        let class = context.class;
        if class.is_enum() {
            return Ok(Vec::new());
        }
        let message = if class.access.is_interface() {
            "Is an interface, so implementations may be mutable."
        } else if class.access.is_abstract() {
            "Is an abstract type, so concrete subclasses may be mutable."
        } else {
            return Ok(Vec::new());
        };
        Ok(vec![class_reason(
            ReasonKind::AbstractTypeInherentlyMutable,
            class,
            message,
        )])
    }
}
