use anyhow::Result;

use crate::checkers::private_methods::PrivateMethodCalls;
use crate::checkers::{Checker, CheckerContext, CheckerMetadata, field_reason, own_instance_field_store};
use crate::dataflow::{self, Opaque, ValueType};
use crate::ir::Field;
use crate::model::{Reason, ReasonKind};

/// Checker that detects instance fields written outside construction.
pub(crate) struct ReassignmentChecker;

impl Checker for ReassignmentChecker {
    fn metadata(&self) -> CheckerMetadata {
        CheckerMetadata {
            id: "FIELD_REASSIGNMENT",
            name: "Field reassignment",
            description: "Stores to the class's own fields outside of construction",
        }
    }

    fn run(&self, context: &CheckerContext<'_>) -> Result<Vec<Reason>> {
        let class = context.class;
        let private_calls = PrivateMethodCalls::of(class);
        let mut reasons = Vec::new();
        for method in &class.methods {
            if method.is_constructor() || private_calls.is_constructor_only(method) {
                continue;
            }
            let stores: Vec<(usize, &Field)> = method
                .instructions
                .iter()
                .enumerate()
                .filter_map(|(index, instruction)| {
                    own_instance_field_store(class, instruction).map(|field| (index, field))
                })
                .collect();
            if stores.is_empty() {
                continue;
            }
            let frames = dataflow::analyze(class, method, &[], &Opaque)?;
            for (index, field) in stores {
                // Writing into an instance this method just created is the
                // copy/factory idiom, not a mutation of an existing object.
                let fresh = frames.before(index).and_then(|frame| frame.peek(1)).is_some_and(|object| {
                    object.alloc.is_some() && object.value_type == ValueType::Exact(class.name.clone())
                });
                if fresh {
                    continue;
                }
                reasons.push(field_reason(
                    ReasonKind::FieldCanBeReassigned,
                    &class.field_identifier(field),
                    format!(
                        "Field [{}] can be reassigned within method [{}]",
                        field.name, method.name
                    ),
                ));
            }
        }
        Ok(reasons)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkers::CheckerKind;
    use crate::checkers::test_support::{FixedLookup, kinds, run_checker};
    use crate::ir::Class;
    use crate::testing::{ClassBuilder, MethodBuilder, PRIVATE};

    const OWNER: &str = "com/example/Account";

    fn run(class: &Class) -> Vec<Reason> {
        run_checker(CheckerKind::FieldReassignment, class, Vec::new(), &FixedLookup::default())
    }

    fn account() -> ClassBuilder {
        ClassBuilder::new(OWNER)
            .field("balance", "I", PRIVATE)
            .method(
                MethodBuilder::constructor("()V")
                    .aload(0)
                    .invokespecial("java/lang/Object", "<init>", "()V")
                    .aload(0)
                    .invokespecial(OWNER, "reset", "()V")
                    .return_void(),
            )
            .method(
                MethodBuilder::new("reset", "()V")
                    .private()
                    .aload(0)
                    .iconst_0()
                    .putfield(OWNER, "balance", "I")
                    .return_void(),
            )
    }

    #[test]
    fn store_in_constructor_only_helper_is_excused() {
        let class = account().build();
        assert!(run(&class).is_empty());
    }

    #[test]
    fn helper_also_called_from_public_method_is_a_setter() {
        let class = account()
            .method(
                MethodBuilder::new("clear", "()V")
                    .aload(0)
                    .invokespecial(OWNER, "reset", "()V")
                    .return_void(),
            )
            .build();
        let reasons = run(&class);

        assert_eq!(vec![ReasonKind::FieldCanBeReassigned], kinds(&reasons));
        assert_eq!(Some("balance"), reasons[0].location.field_name());
        assert!(reasons[0].message.contains("reset"));
    }

    #[test]
    fn plain_setter_is_flagged() {
        let class = ClassBuilder::new(OWNER)
            .field("balance", "I", PRIVATE)
            .method(
                MethodBuilder::new("setBalance", "(I)V")
                    .aload(0)
                    .iload(1)
                    .putfield(OWNER, "balance", "I")
                    .return_void(),
            )
            .build();

        assert_eq!(vec![ReasonKind::FieldCanBeReassigned], kinds(&run(&class)));
    }

    #[test]
    fn store_into_fresh_instance_of_same_class_is_not_reassignment() {
        let class = ClassBuilder::new(OWNER)
            .field("balance", "I", PRIVATE)
            .method(
                MethodBuilder::new("withBalance", "(I)Lcom/example/Account;")
                    .new_object(OWNER)
                    .dup()
                    .invokespecial(OWNER, "<init>", "()V")
                    .astore(2)
                    .aload(2)
                    .iload(1)
                    .putfield(OWNER, "balance", "I")
                    .aload(2)
                    .areturn(),
            )
            .build();

        assert!(run(&class).is_empty());
    }

    #[test]
    fn stores_to_other_classes_fields_are_ignored() {
        let class = ClassBuilder::new(OWNER)
            .method(
                MethodBuilder::new("poke", "(Lcom/example/Other;)V")
                    .aload(1)
                    .iconst_0()
                    .putfield("com/example/Other", "value", "I")
                    .return_void(),
            )
            .build();

        assert!(run(&class).is_empty());
    }
}
