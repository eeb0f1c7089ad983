use anyhow::Result;

use crate::checkers::{Checker, CheckerContext, CheckerMetadata, field_reason};
use crate::model::{Reason, ReasonKind};

/// Checker for array-typed instance fields.
///
/// Static array fields are excused: shared state is outside the scope of
/// instance immutability. This is a heuristic, not a soundness guarantee.
pub(crate) struct ArrayFieldChecker;

impl Checker for ArrayFieldChecker {
    fn metadata(&self) -> CheckerMetadata {
        CheckerMetadata {
            id: "ARRAY_FIELD",
            name: "Array field",
            description: "Instance fields of array type",
        }
    }

    fn run(&self, context: &CheckerContext<'_>) -> Result<Vec<Reason>> {
        let class = context.class;
        Ok(class
            .fields
            .iter()
            .filter(|field| !field.access.is_static() && field.descriptor.starts_with('['))
            .map(|field| {
                field_reason(
                    ReasonKind::ArrayTypeInherentlyMutable,
                    &class.field_identifier(field),
                    format!(
                        "Field [{}] is an array; arrays are inherently mutable.",
                        field.name
                    ),
                )
            })
            .collect())
    }
}
