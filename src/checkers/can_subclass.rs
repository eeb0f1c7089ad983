use anyhow::Result;

use crate::checkers::{Checker, CheckerContext, CheckerMetadata, class_reason};
use crate::model::{Reason, ReasonKind};

/// Checker that flags classes which can be extended.
pub(crate) struct CanSubclassChecker;

impl Checker for CanSubclassChecker {
    fn metadata(&self) -> CheckerMetadata {
        CheckerMetadata {
            id: "CAN_SUBCLASS",
            name: "Class can be subclassed",
            description: "Classes that are neither final nor closed by private constructors",
        }
    }

    fn run(&self, context: &CheckerContext<'_>) -> Result<Vec<Reason>> {
        let class = context.class;
        if context.configuration.allow_subclassing()
            || class.access.is_final()
            || class.access.is_interface()
            || class.access.is_abstract()
            || class.is_enum()
        {
            return Ok(Vec::new());
        }
        let mut constructors = class.constructors().peekable();
        let closed = constructors.peek().is_some()
            && constructors.all(|constructor| constructor.access.is_private());
        if closed {
            return Ok(Vec::new());
        }
        Ok(vec![class_reason(
            ReasonKind::NotDeclaredFinal,
            class,
            "Can be subclassed, therefore parameters declared to be this type \
             could be mutable subclasses at runtime.",
        )])
    }
}
