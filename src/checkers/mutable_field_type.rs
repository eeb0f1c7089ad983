use anyhow::Result;

use crate::checkers::collections::{self, COLLECTION_TYPES, WrapIdiom};
use crate::checkers::private_methods::PrivateMethodCalls;
use crate::checkers::{
    Checker, CheckerContext, CheckerMetadata, TypeMutability, field_reason,
    own_instance_field_store,
};
use crate::dataflow::{self, Opaque, Value, ValueType};
use crate::descriptor::{TypeArgument, type_arguments};
use crate::ir::{Field, Method};
use crate::model::{Reason, ReasonKind, Verdict};
use crate::names::ClassIdentifier;

/// Checker for mutable or unknown types assigned to fields during construction.
pub(crate) struct MutableFieldTypeChecker;

impl Checker for MutableFieldTypeChecker {
    fn metadata(&self) -> CheckerMetadata {
        CheckerMetadata {
            id: "MUTABLE_FIELD_TYPE",
            name: "Mutable type assigned to field",
            description: "Fields assigned mutable, abstract or unwrapped collection values",
        }
    }

    fn run(&self, context: &CheckerContext<'_>) -> Result<Vec<Reason>> {
        let class = context.class;
        let private_calls = PrivateMethodCalls::of(class);
        let mut reasons = Vec::new();
        for method in private_calls.construction_methods(class) {
            let stores: Vec<usize> = method
                .instructions
                .iter()
                .enumerate()
                .filter(|(_, instruction)| own_instance_field_store(class, instruction).is_some())
                .map(|(index, _)| index)
                .collect();
            if stores.is_empty() {
                continue;
            }
            let frames = dataflow::analyze(class, method, &[], &Opaque)?;
            for index in stores {
                let Some(field) = own_instance_field_store(class, &method.instructions[index]) else {
                    continue;
                };
                let Some(value) = frames.before(index).and_then(|frame| frame.peek(0)) else {
                    continue;
                };
                let assignment = Assignment {
                    context,
                    method,
                    index,
                    field,
                };
                reasons.extend(assignment.check(value));
            }
        }
        Ok(reasons)
    }
}

struct Assignment<'c, 'a> {
    context: &'c CheckerContext<'a>,
    method: &'c Method,
    index: usize,
    field: &'c Field,
}

impl Assignment<'_, '_> {
    fn check(&self, value: &Value) -> Vec<Reason> {
        let field_type = self.field.field_type();
        if field_type.is_primitive() || field_type.is_array() || value.is_null() {
            return Vec::new();
        }
        let hierarchy = self.context.hierarchy;
        let assigned = match &value.value_type {
            ValueType::Exact(exact) => exact.clone(),
            _ => field_type.clone(),
        };
        if assigned.is_array() {
            return vec![self.reason(
                ReasonKind::MutableTypeToField,
                format!(
                    "Field [{}] can have an array of type {assigned} assigned to it.",
                    self.field.name
                ),
            )];
        }

        let configuration = self.context.configuration;
        let field_abstract = match hierarchy.is_abstract(&field_type) {
            Ok(is_abstract) => is_abstract,
            Err(_) if configuration.hardcoded_verdict(&field_type).is_some() => false,
            Err(err) => return vec![self.cannot_analyse(&err.to_string())],
        };
        if field_abstract {
            match hierarchy.is_subtype_of_any(&field_type, COLLECTION_TYPES) {
                Ok(true) => return self.check_collection(),
                Ok(false) => {}
                Err(err) => return vec![self.cannot_analyse(&err.to_string())],
            }
        }

        // Configured verdicts stand in for the hierarchy of the assigned type.
        if let Some(verdict) = configuration.hardcoded_verdict(&assigned) {
            let assigned_abstract = hierarchy.is_abstract(&assigned).unwrap_or(false);
            return self.judge(&assigned, verdict, assigned_abstract);
        }

        match hierarchy.is_enum(&assigned) {
            Ok(true) => return Vec::new(),
            Ok(false) => {}
            Err(err) => return vec![self.cannot_analyse(&err.to_string())],
        }
        let assigned_abstract = match hierarchy.is_abstract(&assigned) {
            Ok(is_abstract) => is_abstract,
            Err(err) => return vec![self.cannot_analyse(&err.to_string())],
        };

        match self.context.lookup.mutability_of(&assigned) {
            TypeMutability::Cyclic => Vec::new(),
            TypeMutability::Known(result) => self.judge(&assigned, result.verdict, assigned_abstract),
        }
    }

    fn judge(&self, assigned: &ClassIdentifier, verdict: Verdict, assigned_abstract: bool) -> Vec<Reason> {
        match verdict {
            Verdict::Immutable | Verdict::EffectivelyImmutable => Vec::new(),
            Verdict::CouldNotAnalyse => vec![self.cannot_analyse(&format!(
                "mutability of {assigned} could not be determined"
            ))],
            Verdict::NotImmutable if assigned_abstract => vec![self.reason(
                ReasonKind::AbstractTypeToField,
                format!(
                    "Field [{}] can have an abstract type ({assigned}) assigned to it.",
                    self.field.name
                ),
            )],
            Verdict::NotImmutable => vec![self.reason(
                ReasonKind::MutableTypeToField,
                format!(
                    "Field [{}] can have a mutable type ({assigned}) assigned to it.",
                    self.field.name
                ),
            )],
        }
    }

    fn check_collection(&self) -> Vec<Reason> {
        let message = match collections::recognize(self.method, self.index, self.context.configuration) {
            WrapIdiom::CopiedAndWrapped => return self.check_elements(),
            WrapIdiom::WrappedWithoutCopy => "Attempts to wrap mutable collection type without copying first.",
            WrapIdiom::WrappedUnknownCopy | WrapIdiom::NotWrapped => "Field is not a wrapped collection type.",
        };
        vec![self.reason(
            ReasonKind::AbstractCollectionTypeToField,
            format!("[{}] {message}", self.field.name),
        )]
    }

    fn check_elements(&self) -> Vec<Reason> {
        let Some(signature) = &self.field.signature else {
            return Vec::new();
        };
        let mut reasons = Vec::new();
        for argument in type_arguments(signature) {
            let element = match argument {
                TypeArgument::Type(element) | TypeArgument::Wildcard(Some(element)) => element,
                TypeArgument::Variable(_) | TypeArgument::Wildcard(None) => continue,
            };
            if let Some(reason) = self.check_element(&element) {
                reasons.push(reason);
            }
        }
        reasons
    }

    fn check_element(&self, element: &ClassIdentifier) -> Option<Reason> {
        let mutable = || {
            self.reason(
                ReasonKind::CollectionFieldWithMutableElementType,
                format!(
                    "Field [{}] is a collection with a mutable element type ({element}).",
                    self.field.name
                ),
            )
        };
        if element.is_array() {
            return Some(mutable());
        }
        match self.context.lookup.mutability_of(element) {
            TypeMutability::Cyclic => None,
            TypeMutability::Known(result) => match result.verdict {
                Verdict::Immutable | Verdict::EffectivelyImmutable => None,
                Verdict::CouldNotAnalyse => Some(self.cannot_analyse(&format!(
                    "mutability of element type {element} could not be determined"
                ))),
                Verdict::NotImmutable => Some(mutable()),
            },
        }
    }

    fn reason(&self, kind: ReasonKind, message: String) -> Reason {
        field_reason(kind, &self.context.class.field_identifier(self.field), message)
    }

    fn cannot_analyse(&self, detail: &str) -> Reason {
        self.reason(
            ReasonKind::CannotAnalyse,
            format!("Could not analyse field [{}]: {detail}", self.field.name),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkers::CheckerKind;
    use crate::checkers::test_support::{FixedLookup, kinds, run_checker, run_with_config};
    use crate::config::Configuration;
    use crate::ir::Class;
    use crate::testing::{ClassBuilder, MethodBuilder, PRIVATE_FINAL};

    const OWNER: &str = "com/example/Holder";

    fn holder(descriptor: &str, body: impl FnOnce(MethodBuilder) -> MethodBuilder) -> Class {
        holder_with_signature(descriptor, None, body)
    }

    fn holder_with_signature(
        descriptor: &str,
        signature: Option<&str>,
        body: impl FnOnce(MethodBuilder) -> MethodBuilder,
    ) -> Class {
        let constructor = MethodBuilder::constructor(&format!("({descriptor})V"))
            .aload(0)
            .invokespecial("java/lang/Object", "<init>", "()V")
            .aload(0);
        let constructor = body(constructor)
            .putfield(OWNER, "value", descriptor)
            .return_void();
        let builder = ClassBuilder::new(OWNER);
        let builder = match signature {
            Some(signature) => builder.generic_field("value", descriptor, signature, PRIVATE_FINAL),
            None => builder.field("value", descriptor, PRIVATE_FINAL),
        };
        builder.method(constructor).build()
    }

    fn run(class: &Class, extra: Vec<Class>, lookup: &FixedLookup) -> Vec<Reason> {
        run_checker(CheckerKind::MutableFieldType, class, extra, lookup)
    }

    fn copy_and_wrap(builder: MethodBuilder) -> MethodBuilder {
        builder
            .new_object("java/util/ArrayList")
            .dup()
            .aload(1)
            .invokespecial("java/util/ArrayList", "<init>", "(Ljava/util/Collection;)V")
            .invokestatic(
                "java/util/Collections",
                "unmodifiableList",
                "(Ljava/util/List;)Ljava/util/List;",
            )
    }

    #[test]
    fn new_mutable_object_is_flagged() {
        let class = holder("Ljava/util/Date;", |body| {
            body.new_object("java/util/Date")
                .dup()
                .invokespecial("java/util/Date", "<init>", "()V")
        });
        let lookup = FixedLookup::default().with("java.util.Date", Verdict::NotImmutable);

        assert_eq!(
            vec![ReasonKind::MutableTypeToField],
            kinds(&run(&class, Vec::new(), &lookup))
        );
    }

    #[test]
    fn immutable_parameter_type_is_accepted() {
        let class = holder("Ljava/lang/String;", |body| body.aload(1));
        assert!(run(&class, Vec::new(), &FixedLookup::default()).is_empty());
    }

    #[test]
    fn interface_typed_parameter_is_an_abstract_type() {
        let shape = ClassBuilder::new("com/example/Shape").interface().build();
        let class = holder("Lcom/example/Shape;", |body| body.aload(1));
        let lookup = FixedLookup::default().with("com.example.Shape", Verdict::NotImmutable);

        assert_eq!(
            vec![ReasonKind::AbstractTypeToField],
            kinds(&run(&class, vec![shape], &lookup))
        );
    }

    #[test]
    fn null_assignment_is_skipped() {
        let class = holder("Ljava/util/Date;", |body| body.aconst_null());
        let lookup = FixedLookup::default().with("java.util.Date", Verdict::NotImmutable);
        assert!(run(&class, Vec::new(), &lookup).is_empty());
    }

    #[test]
    fn enum_values_are_immutable() {
        let colour = ClassBuilder::new("com/example/Colour").enumeration().build();
        let class = holder("Lcom/example/Colour;", |body| body.aload(1));
        let lookup = FixedLookup::default().with("com.example.Colour", Verdict::NotImmutable);
        assert!(run(&class, vec![colour], &lookup).is_empty());
    }

    #[test]
    fn unanalysable_dependency_is_reported_as_such() {
        let class = holder("Lcom/example/Money;", |body| body.aload(1));
        let money = ClassBuilder::new("com/example/Money").build();
        let lookup = FixedLookup::default().with("com.example.Money", Verdict::CouldNotAnalyse);

        assert_eq!(
            vec![ReasonKind::CannotAnalyse],
            kinds(&run(&class, vec![money], &lookup))
        );
    }

    #[test]
    fn missing_hierarchy_is_reported_as_cannot_analyse() {
        let class = holder("Lcom/missing/Type;", |body| body.aload(1));
        assert_eq!(
            vec![ReasonKind::CannotAnalyse],
            kinds(&run(&class, Vec::new(), &FixedLookup::default()))
        );
    }

    #[test]
    fn configured_type_outside_the_classpath_is_trusted() {
        let configuration = Configuration::builder()
            .hardcode("com.vendor.Money", Verdict::Immutable)
            .hardcode("com.vendor.Ledger", Verdict::NotImmutable)
            .build()
            .expect("configuration");
        let lookup = FixedLookup::default()
            .with("com.vendor.Money", Verdict::CouldNotAnalyse)
            .with("com.vendor.Ledger", Verdict::CouldNotAnalyse);

        let money = holder("Lcom/vendor/Money;", |body| body.aload(1));
        let ledger = holder("Lcom/vendor/Ledger;", |body| body.aload(1));
        let run = |class: &Class| {
            run_with_config(CheckerKind::MutableFieldType, class, Vec::new(), &lookup, &configuration)
        };

        assert!(run(&money).is_empty());
        assert_eq!(vec![ReasonKind::MutableTypeToField], kinds(&run(&ledger)));
    }

    #[test]
    fn platform_value_types_are_trusted_without_lookup() {
        let class = holder("Ljava/time/LocalDate;", |body| body.aload(1));
        let lookup = FixedLookup::default().with("java.time.LocalDate", Verdict::CouldNotAnalyse);
        assert!(run(&class, Vec::new(), &lookup).is_empty());
    }

    #[test]
    fn copied_and_wrapped_list_is_accepted() {
        let class = holder("Ljava/util/List;", copy_and_wrap);
        assert!(run(&class, Vec::new(), &FixedLookup::default()).is_empty());
    }

    #[test]
    fn wrapping_without_copy_is_flagged() {
        let class = holder("Ljava/util/List;", |body| {
            body.aload(1).invokestatic(
                "java/util/Collections",
                "unmodifiableList",
                "(Ljava/util/List;)Ljava/util/List;",
            )
        });
        let reasons = run(&class, Vec::new(), &FixedLookup::default());

        assert_eq!(vec![ReasonKind::AbstractCollectionTypeToField], kinds(&reasons));
        assert!(reasons[0].message.contains("without copying first"));
    }

    #[test]
    fn unwrapped_collection_is_flagged() {
        let class = holder("Ljava/util/List;", |body| body.aload(1));
        let reasons = run(&class, Vec::new(), &FixedLookup::default());

        assert_eq!(vec![ReasonKind::AbstractCollectionTypeToField], kinds(&reasons));
        assert!(reasons[0].message.contains("not a wrapped collection type"));
    }

    #[test]
    fn wrapped_collection_with_mutable_elements_is_flagged() {
        let class = holder_with_signature(
            "Ljava/util/List;",
            Some("Ljava/util/List<Ljava/util/Date;>;"),
            copy_and_wrap,
        );
        let lookup = FixedLookup::default().with("java.util.Date", Verdict::NotImmutable);

        assert_eq!(
            vec![ReasonKind::CollectionFieldWithMutableElementType],
            kinds(&run(&class, Vec::new(), &lookup))
        );
    }

    #[test]
    fn type_variable_elements_are_not_checked() {
        let class = holder_with_signature("Ljava/util/List;", Some("Ljava/util/List<TT;>;"), copy_and_wrap);
        let lookup = FixedLookup::default().with("java.lang.Object", Verdict::NotImmutable);
        assert!(run(&class, Vec::new(), &lookup).is_empty());
    }

    #[test]
    fn primitive_and_array_fields_are_left_to_other_checkers() {
        let primitive = holder("I", |body| body.iload(1));
        let array = holder("[I", |body| body.aload(1));
        let lookup = FixedLookup::default();
        assert!(run(&primitive, Vec::new(), &lookup).is_empty());
        assert!(run(&array, Vec::new(), &lookup).is_empty());
    }
}
