use anyhow::Result;

use crate::checkers::{Checker, CheckerContext, CheckerMetadata, field_reason};
use crate::model::{Reason, ReasonKind};

/// Checker that reports instance fields not declared final.
///
/// On its own this only downgrades a class to effectively immutable; stores
/// outside construction are reported by the reassignment checker.
pub(crate) struct NonFinalFieldChecker;

impl Checker for NonFinalFieldChecker {
    fn metadata(&self) -> CheckerMetadata {
        CheckerMetadata {
            id: "NON_FINAL_FIELD",
            name: "Non-final field",
            description: "Instance fields that are not declared final",
        }
    }

    fn run(&self, context: &CheckerContext<'_>) -> Result<Vec<Reason>> {
        let class = context.class;
        Ok(class
            .fields
            .iter()
            .filter(|field| !field.access.is_static() && !field.access.is_final())
            .map(|field| {
                field_reason(
                    ReasonKind::NonFinalField,
                    &class.field_identifier(field),
                    format!("Field [{}] is not final.", field.name),
                )
            })
            .collect())
    }
}
