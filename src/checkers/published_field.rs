use anyhow::Result;

use crate::checkers::{Checker, CheckerContext, CheckerMetadata, field_reason};
use crate::model::{Reason, ReasonKind};

/// Checker that flags non-final fields visible outside the class.
pub(crate) struct PublishedFieldChecker;

impl Checker for PublishedFieldChecker {
    fn metadata(&self) -> CheckerMetadata {
        CheckerMetadata {
            id: "PUBLISHED_NON_FINAL_FIELD",
            name: "Published non-final field",
            description: "Non-private fields that are not final",
        }
    }

    fn run(&self, context: &CheckerContext<'_>) -> Result<Vec<Reason>> {
        let class = context.class;
        Ok(class
            .fields
            .iter()
            .filter(|field| !field.access.is_private() && !field.access.is_final())
            .filter(|field| !field.access.is_synthetic())
            .map(|field| {
                let scope = if field.access.is_static() { "static " } else { "" };
                field_reason(
                    ReasonKind::PublishedNonFinalField,
                    &class.field_identifier(field),
                    format!(
                        "Non-final {scope}field [{}] is visible outside the class and can be reassigned.",
                        field.name
                    ),
                )
            })
            .collect())
    }
}
