use std::collections::BTreeSet;

use anyhow::Result;

use crate::checkers::{Checker, CheckerContext, CheckerMetadata, class_reason};
use crate::dataflow::{self, Frames, Origin, ReceiverAliasing, Value};
use crate::descriptor::MethodShape;
use crate::ir::{CallKind, CallSite, Class, Instruction, InstructionKind, Method};
use crate::model::{Reason, ReasonKind};
use crate::opcodes;

const MAX_HELPER_DEPTH: usize = 4;

/// Checker for constructors that publish the receiver before construction ends.
pub(crate) struct EscapedThisChecker;

impl Checker for EscapedThisChecker {
    fn metadata(&self) -> CheckerMetadata {
        CheckerMetadata {
            id: "ESCAPED_THIS",
            name: "Escaped this reference",
            description: "Constructors that let the receiver escape",
        }
    }

    fn run(&self, context: &CheckerContext<'_>) -> Result<Vec<Reason>> {
        let class = context.class;
        let model = ReceiverAliasing::new(class);
        let mut reasons = Vec::new();
        for constructor in class.constructors().filter(|method| method.has_code()) {
            let mut walk = EscapeWalk {
                class,
                model: &model,
                constructor,
                visited: BTreeSet::new(),
                reasons: &mut reasons,
            };
            walk.method(constructor, &[], 0)?;
        }
        Ok(reasons)
    }
}

struct EscapeWalk<'c, 'r> {
    class: &'c Class,
    model: &'c ReceiverAliasing<'c>,
    constructor: &'c Method,
    visited: BTreeSet<(String, String, Vec<bool>)>,
    reasons: &'r mut Vec<Reason>,
}

impl<'c> EscapeWalk<'c, '_> {
    fn method(&mut self, method: &'c Method, parameter_origins: &[Origin], depth: usize) -> Result<()> {
        let frames = dataflow::analyze(self.class, method, parameter_origins, self.model)?;
        for (index, instruction) in method.instructions.iter().enumerate() {
            self.instruction(&frames, index, instruction, depth)?;
        }
        Ok(())
    }

    fn instruction(
        &mut self,
        frames: &Frames,
        index: usize,
        instruction: &'c Instruction,
        depth: usize,
    ) -> Result<()> {
        let Some(frame) = frames.before(index) else {
            return Ok(());
        };
        let top_carries = frame.peek(0).is_some_and(Value::carries_receiver);
        match (&instruction.kind, instruction.opcode) {
            (InstructionKind::Field(field), opcodes::PUTSTATIC) if top_carries => {
                self.escape(format!("assignment to static field {}.{}", field.owner, field.name));
            }
            (InstructionKind::Field(field), opcodes::PUTFIELD) if top_carries => {
                let foreign = frame
                    .peek(1)
                    .is_some_and(|object| object.origin == Origin::Other);
                if foreign {
                    self.escape(format!(
                        "assignment to field {}.{} of another object",
                        field.owner, field.name
                    ));
                }
            }
            (_, opcodes::AASTORE) if top_carries => {
                self.escape("storage in an array".to_string());
            }
            (InstructionKind::Invoke(call), _) => self.call(frame.top(argument_count(call)?), call, depth)?,
            _ => {}
        }
        Ok(())
    }

    fn call(&mut self, arguments: &[Value], call: &'c CallSite, depth: usize) -> Result<()> {
        let has_object = call.kind != CallKind::Static;
        let (object, parameters) = if has_object {
            match arguments.split_first() {
                Some((object, parameters)) => (Some(object), parameters),
                None => (None, arguments),
            }
        } else {
            (None, arguments)
        };
        let on_alias = object.is_some_and(|object| object.origin == Origin::Alias);
        if on_alias && !call.is_constructor() && self.private_helper(call).is_none() {
            self.escape(format!(
                "method {}.{} invoked on an alias of the receiver",
                call.owner, call.name
            ));
            return Ok(());
        }
        if !parameters.iter().any(Value::carries_receiver) {
            return Ok(());
        }
        if call.is_constructor() {
            // Inner classes capturing the receiver become aliases; the
            // dataflow tracks where those go.
            let delegation = object.is_some_and(Value::is_receiver);
            if !delegation && call.owner.is_nested_in(&self.class.name) {
                return Ok(());
            }
            self.escape(format!("argument to constructor of {}", call.owner));
            return Ok(());
        }
        if let Some(helper) = self.private_helper(call) {
            if depth < MAX_HELPER_DEPTH {
                let origins: Vec<Origin> = parameters.iter().map(|value| value.origin).collect();
                let marks: Vec<bool> = parameters.iter().map(Value::carries_receiver).collect();
                let key = (helper.name.clone(), helper.descriptor.clone(), marks);
                if self.visited.insert(key) {
                    return self.method(helper, &origins, depth + 1);
                }
                return Ok(());
            }
        }
        self.escape(format!("argument to {}.{}", call.owner, call.name));
        Ok(())
    }

    fn private_helper(&self, call: &CallSite) -> Option<&'c Method> {
        if call.owner != self.class.name {
            return None;
        }
        self.class
            .method(&call.name, &call.descriptor)
            .filter(|method| method.access.is_private() && method.has_code())
    }

    fn escape(&mut self, how: String) {
        self.reasons.push(class_reason(
            ReasonKind::EscapedThisReference,
            self.class,
            format!(
                "The 'this' reference escapes the constructor {} via {how}.",
                self.constructor.descriptor
            ),
        ));
    }
}

fn argument_count(call: &CallSite) -> Result<usize> {
    let shape = MethodShape::of(&call.descriptor)?;
    Ok(shape.parameters.len() + usize::from(call.kind != CallKind::Static))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkers::CheckerKind;
    use crate::checkers::test_support::{FixedLookup, kinds, run_checker};
    use crate::testing::{ClassBuilder, MethodBuilder, PRIVATE_FINAL};

    const OWNER: &str = "com/example/Widget";

    fn constructor() -> MethodBuilder {
        MethodBuilder::constructor("()V")
            .aload(0)
            .invokespecial("java/lang/Object", "<init>", "()V")
    }

    fn run(class: &Class) -> Vec<Reason> {
        run_checker(CheckerKind::EscapedThis, class, Vec::new(), &FixedLookup::default())
    }

    fn widget(constructor: MethodBuilder) -> ClassBuilder {
        ClassBuilder::new(OWNER).method(constructor.return_void())
    }

    #[test]
    fn receiver_assigned_to_static_field_escapes() {
        let class = widget(
            constructor()
                .aload(0)
                .putstatic("com/example/Registry", "last", "Ljava/lang/Object;"),
        )
        .build();
        let reasons = run(&class);

        assert_eq!(vec![ReasonKind::EscapedThisReference], kinds(&reasons));
        assert!(reasons[0].message.contains("com.example.Registry.last"));
    }

    #[test]
    fn receiver_stored_in_own_field_does_not_escape() {
        let class = widget(
            constructor()
                .aload(0)
                .aload(0)
                .putfield(OWNER, "self", "Lcom/example/Widget;"),
        )
        .field("self", "Lcom/example/Widget;", PRIVATE_FINAL)
        .build();

        assert!(run(&class).is_empty());
    }

    #[test]
    fn unrelated_new_object_passed_to_constructor_does_not_escape() {
        let class = widget(
            constructor()
                .new_object("java/lang/Thread")
                .dup()
                .new_object("com/example/Task")
                .dup()
                .invokespecial("com/example/Task", "<init>", "()V")
                .invokespecial("java/lang/Thread", "<init>", "(Ljava/lang/Runnable;)V")
                .invokevirtual("java/lang/Thread", "start", "()V"),
        )
        .build();

        assert!(run(&class).is_empty());
    }

    #[test]
    fn receiver_passed_to_thread_constructor_escapes() {
        let class = widget(
            constructor()
                .new_object("java/lang/Thread")
                .dup()
                .aload(0)
                .invokespecial("java/lang/Thread", "<init>", "(Ljava/lang/Runnable;)V")
                .invokevirtual("java/lang/Thread", "start", "()V"),
        )
        .build();

        assert_eq!(vec![ReasonKind::EscapedThisReference], kinds(&run(&class)));
    }

    #[test]
    fn lambda_capturing_receiver_escapes_when_handed_to_thread() {
        let class = widget(
            constructor()
                .new_object("java/lang/Thread")
                .dup()
                .aload(0)
                .invokedynamic("run", "(Lcom/example/Widget;)Ljava/lang/Runnable;")
                .invokespecial("java/lang/Thread", "<init>", "(Ljava/lang/Runnable;)V")
                .invokevirtual("java/lang/Thread", "start", "()V"),
        )
        .build();

        assert_eq!(vec![ReasonKind::EscapedThisReference], kinds(&run(&class)));
    }

    #[test]
    fn inner_class_capturing_receiver_escapes_only_when_published() {
        let inner = |tail: MethodBuilder| {
            tail.new_object("com/example/Widget$Listener")
                .dup()
                .aload(0)
                .invokespecial(
                    "com/example/Widget$Listener",
                    "<init>",
                    "(Lcom/example/Widget;)V",
                )
        };
        let kept = widget(inner(constructor()).astore(1)).build();
        assert!(run(&kept).is_empty());

        let published = widget(inner(constructor()).invokestatic(
            "com/example/Bus",
            "register",
            "(Ljava/lang/Object;)V",
        ))
        .build();
        assert_eq!(vec![ReasonKind::EscapedThisReference], kinds(&run(&published)));
    }

    #[test]
    fn starting_anonymous_class_that_captured_receiver_escapes() {
        let class = widget(
            constructor()
                .new_object("com/example/Widget$1")
                .dup()
                .aload(0)
                .invokespecial("com/example/Widget$1", "<init>", "(Lcom/example/Widget;)V")
                .invokevirtual("com/example/Widget$1", "start", "()V"),
        )
        .build();
        let reasons = run(&class);

        assert_eq!(vec![ReasonKind::EscapedThisReference], kinds(&reasons));
        assert!(reasons[0].message.contains("com.example.Widget$1.start"));
    }

    #[test]
    fn method_on_unrelated_nested_instance_is_not_an_escape() {
        let class = widget(
            constructor()
                .new_object("com/example/Widget$1")
                .dup()
                .invokespecial("com/example/Widget$1", "<init>", "()V")
                .invokevirtual("com/example/Widget$1", "start", "()V"),
        )
        .build();

        assert!(run(&class).is_empty());
    }

    #[test]
    fn super_constructor_delegation_is_not_an_escape() {
        let class = ClassBuilder::new(OWNER)
            .extends("com/example/Base")
            .method(
                MethodBuilder::constructor("()V")
                    .aload(0)
                    .invokespecial("com/example/Base", "<init>", "()V")
                    .return_void(),
            )
            .build();

        assert!(run(&class).is_empty());
    }

    #[test]
    fn private_helper_leaking_its_argument_is_followed() {
        let class = widget(
            constructor()
                .aload(0)
                .invokestatic(OWNER, "register", "(Lcom/example/Widget;)V"),
        )
        .method(
            MethodBuilder::new("register", "(Lcom/example/Widget;)V")
                .private()
                .static_method()
                .aload(0)
                .putstatic("com/example/Registry", "last", "Ljava/lang/Object;")
                .return_void(),
        )
        .build();

        assert_eq!(vec![ReasonKind::EscapedThisReference], kinds(&run(&class)));
    }

    #[test]
    fn private_helper_that_keeps_the_receiver_is_not_an_escape() {
        let class = widget(
            constructor()
                .aload(0)
                .aload(0)
                .invokevirtual(OWNER, "remember", "(Lcom/example/Widget;)V"),
        )
        .field("self", "Lcom/example/Widget;", PRIVATE_FINAL)
        .method(
            MethodBuilder::new("remember", "(Lcom/example/Widget;)V")
                .private()
                .aload(0)
                .aload(1)
                .putfield(OWNER, "self", "Lcom/example/Widget;")
                .return_void(),
        )
        .build();

        assert!(run(&class).is_empty());
    }

    #[test]
    fn receiver_stored_into_array_escapes() {
        let class = widget(
            constructor()
                .iconst_0()
                .anewarray("java/lang/Object")
                .astore(1)
                .aload(1)
                .iconst_0()
                .aload(0)
                .aastore(),
        )
        .build();

        assert_eq!(vec![ReasonKind::EscapedThisReference], kinds(&run(&class)));
    }

    #[test]
    fn recursive_helpers_terminate() {
        let class = widget(
            constructor()
                .aload(0)
                .invokestatic(OWNER, "loop", "(Lcom/example/Widget;)V"),
        )
        .method(
            MethodBuilder::new("loop", "(Lcom/example/Widget;)V")
                .private()
                .static_method()
                .aload(0)
                .invokestatic(OWNER, "loop", "(Lcom/example/Widget;)V")
                .return_void(),
        )
        .build();

        assert!(run(&class).is_empty());
    }
}
