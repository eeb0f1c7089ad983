//! Intraprocedural tracking of where each stack and local value came from.
//!
//! The pass is a forward abstract interpretation over a method's control flow
//! graph. Every value records whether it is the receiver (`this`), something
//! derived from the receiver, or unrelated, together with the best known type
//! and the `new` site that allocated it. Checkers read the frame in effect
//! before each instruction.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use anyhow::{Result, bail};
use tracing::trace;

use crate::descriptor::{self, MethodShape, ReturnShape};
use crate::ir::{BasicBlock, CallKind, CallSite, Class, Instruction, InstructionKind, Method};
use crate::names::ClassIdentifier;
use crate::opcodes;

const MAX_BLOCK_VISITS_PER_BLOCK: usize = 64;

/// Relationship between a value and the receiver of the analysed method.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Origin {
    Receiver,
    /// Derived from, or possibly equal to, the receiver.
    Alias,
    Other,
}

impl Origin {
    fn join(self, other: Origin) -> Origin {
        match (self, other) {
            (left, right) if left == right => left,
            (Origin::Other, Origin::Other) => Origin::Other,
            _ => Origin::Alias,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum ValueType {
    Unknown,
    Null,
    /// Runtime class is known, e.g. the result of `new`.
    Exact(ClassIdentifier),
    /// Only the static type is known.
    Declared(ClassIdentifier),
}

impl ValueType {
    fn join(&self, other: &ValueType) -> ValueType {
        match (self, other) {
            (left, right) if left == right => left.clone(),
            (ValueType::Null, known) | (known, ValueType::Null) => known.clone(),
            (ValueType::Exact(left), ValueType::Declared(right))
            | (ValueType::Declared(left), ValueType::Exact(right))
                if left == right =>
            {
                ValueType::Declared(left.clone())
            }
            _ => ValueType::Unknown,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct Value {
    pub(crate) origin: Origin,
    pub(crate) value_type: ValueType,
    /// Occupies two slots (`long`/`double`).
    pub(crate) wide: bool,
    /// Offset of the `new` instruction that allocated this value.
    pub(crate) alloc: Option<u32>,
    /// Local slot this value was loaded from.
    pub(crate) local: Option<usize>,
}

impl Value {
    fn unknown() -> Self {
        Self {
            origin: Origin::Other,
            value_type: ValueType::Unknown,
            wide: false,
            alloc: None,
            local: None,
        }
    }

    fn scalar(wide: bool) -> Self {
        Self {
            wide,
            ..Self::unknown()
        }
    }

    fn of_type(value_type: ValueType) -> Self {
        Self {
            value_type,
            ..Self::unknown()
        }
    }

    fn of_descriptor(descriptor: &str) -> Self {
        if descriptor::is_reference(descriptor) {
            Self::of_type(ValueType::Declared(ClassIdentifier::from_descriptor(
                descriptor,
            )))
        } else {
            Self::scalar(descriptor::is_wide(descriptor))
        }
    }

    pub(crate) fn carries_receiver(&self) -> bool {
        matches!(self.origin, Origin::Receiver | Origin::Alias)
    }

    pub(crate) fn is_receiver(&self) -> bool {
        self.origin == Origin::Receiver
    }

    pub(crate) fn is_null(&self) -> bool {
        self.value_type == ValueType::Null
    }

    fn join(&self, other: &Value) -> Value {
        Value {
            origin: self.origin.join(other.origin),
            value_type: self.value_type.join(&other.value_type),
            wide: self.wide || other.wide,
            alloc: if self.alloc == other.alloc {
                self.alloc
            } else {
                None
            },
            local: if self.local == other.local {
                self.local
            } else {
                None
            },
        }
    }

    fn slots(&self) -> usize {
        if self.wide { 2 } else { 1 }
    }
}

/// Abstract machine state before an instruction.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct Frame {
    pub(crate) locals: Vec<Value>,
    pub(crate) stack: Vec<Value>,
}

impl Frame {
    /// Value `depth` entries below the top of the stack (0 is the top).
    pub(crate) fn peek(&self, depth: usize) -> Option<&Value> {
        self.stack
            .len()
            .checked_sub(depth + 1)
            .and_then(|index| self.stack.get(index))
    }

    /// The top `count` stack entries, bottom first.
    pub(crate) fn top(&self, count: usize) -> &[Value] {
        let start = self.stack.len().saturating_sub(count);
        &self.stack[start..]
    }

    fn pop(&mut self) -> Value {
        self.stack.pop().unwrap_or_else(Value::unknown)
    }

    fn pop_n(&mut self, count: usize) -> Vec<Value> {
        let start = self.stack.len().saturating_sub(count);
        self.stack.split_off(start)
    }

    fn load(&self, index: usize) -> Value {
        let mut value = self.locals.get(index).cloned().unwrap_or_else(Value::unknown);
        value.local = Some(index);
        value
    }

    fn store(&mut self, index: usize, mut value: Value) {
        value.local = None;
        let needed = index + value.slots();
        if self.locals.len() < needed {
            self.locals.resize(needed, Value::unknown());
        }
        if value.wide {
            self.locals[index + 1] = Value::unknown();
        }
        self.locals[index] = value;
    }

    /// Number of entries from the top covering `slots` operand slots.
    fn entries_for_slots(&self, slots: usize) -> usize {
        let mut covered = 0;
        let mut entries = 0;
        for value in self.stack.iter().rev() {
            if covered >= slots {
                break;
            }
            covered += value.slots();
            entries += 1;
        }
        entries
    }

    /// `dup*` family: copy the top `copied` slots below the next `skipped`.
    fn dup(&mut self, copied: usize, skipped: usize) {
        let copy_entries = self.entries_for_slots(copied);
        let total_entries = self.entries_for_slots(copied + skipped);
        if copy_entries == 0 || total_entries > self.stack.len() {
            return;
        }
        let copies = self.top(copy_entries).to_vec();
        let insert_at = self.stack.len() - total_entries;
        self.stack.splice(insert_at..insert_at, copies);
    }

    fn join(&self, other: &Frame) -> Frame {
        let width = self.locals.len().max(other.locals.len());
        let locals = (0..width)
            .map(|index| {
                match (self.locals.get(index), other.locals.get(index)) {
                    (Some(left), Some(right)) => left.join(right),
                    _ => Value::unknown(),
                }
            })
            .collect();
        let stack = if self.stack.len() == other.stack.len() {
            self.stack
                .iter()
                .zip(other.stack.iter())
                .map(|(left, right)| left.join(right))
                .collect()
        } else {
            Vec::new()
        };
        Frame { locals, stack }
    }

    fn mark_allocation(&mut self, alloc: u32, origin: Origin) {
        for value in self.locals.iter_mut().chain(self.stack.iter_mut()) {
            if value.alloc == Some(alloc) {
                value.origin = origin;
            }
        }
    }
}

/// Decides the origin of values produced by calls.
///
/// Arguments are passed in stack order with the objectref first for instance
/// calls.
pub(crate) trait InvokeModel {
    fn returned(&self, _call: &CallSite, _arguments: &[Value]) -> Origin {
        Origin::Other
    }

    /// Origin of an object after `call` (a constructor) initialised it.
    fn constructed(&self, _call: &CallSite, _arguments: &[Value]) -> Origin {
        Origin::Other
    }

    fn dynamic(&self, _name: &str, _descriptor: &str, _arguments: &[Value]) -> Origin {
        Origin::Other
    }
}

/// Treats every call as unrelated to the receiver.
pub(crate) struct Opaque;

impl InvokeModel for Opaque {}

/// Models the ways compiled Java code commonly derives values from `this`.
///
/// Constructing an inner class or a lambda that captures the receiver yields
/// an alias, as does a private helper of the same class that returns one of
/// its arguments when handed the receiver.
pub(crate) struct ReceiverAliasing<'a> {
    class: &'a Class,
    returns_argument: BTreeSet<(String, String)>,
}

impl<'a> ReceiverAliasing<'a> {
    pub(crate) fn new(class: &'a Class) -> Self {
        let returns_argument = class
            .methods
            .iter()
            .filter(|method| method.access.is_private() && method.has_code())
            .filter(|method| {
                descriptor::return_descriptor(&method.descriptor)
                    .is_ok_and(descriptor::is_reference)
            })
            .filter(|method| returns_an_argument(class, method))
            .map(|method| (method.name.clone(), method.descriptor.clone()))
            .collect();
        Self {
            class,
            returns_argument,
        }
    }
}

impl InvokeModel for ReceiverAliasing<'_> {
    fn returned(&self, call: &CallSite, arguments: &[Value]) -> Origin {
        let helper = call.owner == self.class.name
            && self
                .returns_argument
                .contains(&(call.name.clone(), call.descriptor.clone()));
        if helper && arguments.iter().any(Value::carries_receiver) {
            Origin::Alias
        } else {
            Origin::Other
        }
    }

    fn constructed(&self, call: &CallSite, arguments: &[Value]) -> Origin {
        let captures = arguments
            .iter()
            .skip(1)
            .any(Value::carries_receiver);
        if captures && call.owner.is_nested_in(&self.class.name) {
            Origin::Alias
        } else {
            Origin::Other
        }
    }

    fn dynamic(&self, _name: &str, _descriptor: &str, arguments: &[Value]) -> Origin {
        if arguments.iter().any(Value::carries_receiver) {
            Origin::Alias
        } else {
            Origin::Other
        }
    }
}

fn returns_an_argument(class: &Class, method: &Method) -> bool {
    let Ok(shape) = MethodShape::of(&method.descriptor) else {
        return false;
    };
    let origins = vec![Origin::Alias; shape.parameters.len()];
    let Ok(frames) = analyze(class, method, &origins, &Opaque) else {
        return false;
    };
    method
        .instructions
        .iter()
        .enumerate()
        .filter(|(_, instruction)| instruction.opcode == opcodes::ARETURN)
        .any(|(index, _)| {
            frames
                .before(index)
                .and_then(|frame| frame.peek(0))
                .is_some_and(Value::carries_receiver)
        })
}

/// Frames before each instruction; `None` for unreachable code.
#[derive(Debug)]
pub(crate) struct Frames {
    frames: Vec<Option<Frame>>,
}

impl Frames {
    pub(crate) fn before(&self, index: usize) -> Option<&Frame> {
        self.frames.get(index).and_then(Option::as_ref)
    }
}

/// Run the analysis over `method` of `class`.
///
/// `parameter_origins` assigns origins to declared parameters in order;
/// missing entries default to [`Origin::Other`]. The receiver slot of an
/// instance method always starts as [`Origin::Receiver`].
pub(crate) fn analyze(
    class: &Class,
    method: &Method,
    parameter_origins: &[Origin],
    model: &dyn InvokeModel,
) -> Result<Frames> {
    let entry = entry_frame(class, method, parameter_origins)?;
    let blocks: BTreeMap<u32, &BasicBlock> = method
        .cfg
        .blocks
        .iter()
        .map(|block| (block.start_offset, block))
        .collect();
    let mut successors: BTreeMap<u32, Vec<u32>> = BTreeMap::new();
    for edge in &method.cfg.edges {
        successors.entry(edge.from).or_default().push(edge.to);
    }

    let mut in_states: BTreeMap<u32, Frame> = BTreeMap::new();
    let mut worklist = VecDeque::new();
    let mut visits = 0usize;
    let limit = blocks.len().max(1) * MAX_BLOCK_VISITS_PER_BLOCK;
    let interpreter = Interpreter { model };

    loop {
        if worklist.is_empty() {
            // Blocks only reachable through exception handlers have no
            // normal predecessor; seed them with a caught exception on the stack.
            let Some(start) = blocks
                .keys()
                .copied()
                .find(|start| !in_states.contains_key(start))
            else {
                break;
            };
            let seed = if start == 0 {
                entry.clone()
            } else {
                Frame {
                    locals: entry.locals.clone(),
                    stack: vec![Value::unknown()],
                }
            };
            in_states.insert(start, seed);
            worklist.push_back(start);
        }
        let Some(start) = worklist.pop_front() else {
            continue;
        };
        visits += 1;
        if visits > limit {
            bail!(
                "dataflow did not converge for {}.{}{}",
                class.name,
                method.name,
                method.descriptor
            );
        }
        let Some(block) = blocks.get(&start) else {
            continue;
        };
        let Some(mut state) = in_states.get(&start).cloned() else {
            continue;
        };
        for instruction in &method.instructions[block.instructions.clone()] {
            interpreter.step(&mut state, instruction)?;
        }
        for successor in successors.get(&start).into_iter().flatten() {
            let updated = match in_states.get(successor) {
                Some(existing) => existing.join(&state),
                None => state.clone(),
            };
            if in_states.get(successor) != Some(&updated) {
                in_states.insert(*successor, updated);
                worklist.push_back(*successor);
            }
        }
    }
    trace!(
        method = %method.name,
        blocks = blocks.len(),
        visits,
        "dataflow converged"
    );

    let mut frames = vec![None; method.instructions.len()];
    for block in blocks.values() {
        let Some(mut state) = in_states.get(&block.start_offset).cloned() else {
            continue;
        };
        for index in block.instructions.clone() {
            frames[index] = Some(state.clone());
            interpreter.step(&mut state, &method.instructions[index])?;
        }
    }
    Ok(Frames { frames })
}

fn entry_frame(class: &Class, method: &Method, parameter_origins: &[Origin]) -> Result<Frame> {
    let mut frame = Frame {
        locals: vec![Value::unknown(); method.max_locals],
        stack: Vec::new(),
    };
    let mut slot = 0;
    if !method.access.is_static() {
        frame.store(
            0,
            Value {
                origin: Origin::Receiver,
                value_type: ValueType::Exact(class.name.clone()),
                ..Value::unknown()
            },
        );
        slot = 1;
    }
    for (index, parameter) in descriptor::parameter_descriptors(&method.descriptor)?
        .into_iter()
        .enumerate()
    {
        let mut value = Value::of_descriptor(parameter);
        value.origin = parameter_origins
            .get(index)
            .copied()
            .unwrap_or(Origin::Other);
        let slots = value.slots();
        frame.store(slot, value);
        slot += slots;
    }
    Ok(frame)
}

struct Interpreter<'m> {
    model: &'m dyn InvokeModel,
}

impl Interpreter<'_> {
    fn step(&self, state: &mut Frame, instruction: &Instruction) -> Result<()> {
        let opcode = instruction.opcode;
        match opcode {
            opcodes::NOP | opcodes::IINC | opcodes::GOTO | opcodes::GOTO_W | opcodes::RET => {}
            opcodes::RETURN => {}
            opcodes::ACONST_NULL => state.stack.push(Value::of_type(ValueType::Null)),
            opcodes::ICONST_M1..=opcodes::ICONST_5
            | opcodes::FCONST_0..=opcodes::FCONST_2
            | opcodes::BIPUSH
            | opcodes::SIPUSH => state.stack.push(Value::scalar(false)),
            opcodes::LCONST_0 | opcodes::LCONST_1 | opcodes::DCONST_0 | opcodes::DCONST_1 => {
                state.stack.push(Value::scalar(true))
            }
            opcodes::LDC | opcodes::LDC_W => {
                let value = match &instruction.kind {
                    InstructionKind::ConstString(_) => {
                        Value::of_type(ValueType::Exact(ClassIdentifier::new("java.lang.String")))
                    }
                    InstructionKind::ConstClass(_) => {
                        Value::of_type(ValueType::Exact(ClassIdentifier::new("java.lang.Class")))
                    }
                    _ => Value::scalar(false),
                };
                state.stack.push(value);
            }
            opcodes::LDC2_W => state.stack.push(Value::scalar(true)),
            opcodes::ILOAD..=opcodes::ALOAD | opcodes::ILOAD_0..=opcodes::ALOAD_3 => {
                let index = local_index(instruction);
                let value = if matches!(opcode, opcodes::ALOAD | opcodes::ALOAD_0..=opcodes::ALOAD_3)
                {
                    state.load(index)
                } else {
                    Value::scalar(matches!(
                        opcode,
                        opcodes::LLOAD | opcodes::DLOAD | opcodes::LLOAD_0..=0x21 | opcodes::DLOAD_0..=0x29
                    ))
                };
                state.stack.push(value);
            }
            opcodes::IALOAD..=opcodes::SALOAD => {
                state.pop_n(2);
                state
                    .stack
                    .push(Value::scalar(matches!(opcode, opcodes::LALOAD | opcodes::DALOAD)));
            }
            opcodes::ISTORE..=opcodes::ASTORE | opcodes::ISTORE_0..=opcodes::ASTORE_3 => {
                let value = state.pop();
                state.store(local_index(instruction), value);
            }
            opcodes::IASTORE..=opcodes::SASTORE => {
                state.pop_n(3);
            }
            opcodes::POP => {
                state.pop();
            }
            opcodes::POP2 => {
                let entries = state.entries_for_slots(2);
                state.pop_n(entries);
            }
            opcodes::DUP => state.dup(1, 0),
            opcodes::DUP_X1 => state.dup(1, 1),
            opcodes::DUP_X2 => state.dup(1, 2),
            opcodes::DUP2 => state.dup(2, 0),
            opcodes::DUP2_X1 => state.dup(2, 1),
            opcodes::DUP2_X2 => state.dup(2, 2),
            opcodes::SWAP => {
                let top = state.pop();
                let below = state.pop();
                state.stack.push(top);
                state.stack.push(below);
            }
            opcodes::IADD..=opcodes::DREM => {
                state.pop_n(2);
                state.stack.push(Value::scalar((opcode - opcodes::IADD) % 2 == 1));
            }
            opcodes::INEG..=opcodes::DNEG => {
                let value = state.pop();
                state.stack.push(Value::scalar(value.wide));
            }
            opcodes::ISHL..=opcodes::LUSHR => {
                state.pop_n(2);
                state.stack.push(Value::scalar((opcode - opcodes::ISHL) % 2 == 1));
            }
            opcodes::IAND..=opcodes::LXOR => {
                state.pop_n(2);
                state.stack.push(Value::scalar((opcode - opcodes::IAND) % 2 == 1));
            }
            opcodes::I2L..=opcodes::I2S => {
                state.pop();
                state
                    .stack
                    .push(Value::scalar(matches!(opcode, 0x85 | 0x87 | 0x8a | 0x8c | 0x8d | 0x8f)));
            }
            opcodes::LCMP..=opcodes::DCMPG => {
                state.pop_n(2);
                state.stack.push(Value::scalar(false));
            }
            opcodes::IFEQ..=opcodes::IFLE
            | opcodes::IFNULL
            | opcodes::IFNONNULL
            | opcodes::TABLESWITCH
            | opcodes::LOOKUPSWITCH
            | opcodes::MONITORENTER
            | opcodes::MONITOREXIT
            | opcodes::ATHROW
            | opcodes::IRETURN..=opcodes::ARETURN => {
                state.pop();
            }
            opcodes::IF_ICMPEQ..=opcodes::IF_ACMPNE => {
                state.pop_n(2);
            }
            opcodes::JSR | opcodes::JSR_W => state.stack.push(Value::scalar(false)),
            opcodes::GETSTATIC | opcodes::GETFIELD | opcodes::PUTSTATIC | opcodes::PUTFIELD => {
                self.field(state, instruction);
            }
            opcodes::INVOKEVIRTUAL
            | opcodes::INVOKESPECIAL
            | opcodes::INVOKESTATIC
            | opcodes::INVOKEINTERFACE => {
                if let InstructionKind::Invoke(call) = &instruction.kind {
                    self.invoke(state, call)?;
                }
            }
            opcodes::INVOKEDYNAMIC => {
                if let InstructionKind::InvokeDynamic { name, descriptor } = &instruction.kind {
                    let shape = MethodShape::of(descriptor)?;
                    let arguments = state.pop_n(shape.parameters.len());
                    let origin = self.model.dynamic(name, descriptor, &arguments);
                    push_return(state, descriptor, origin)?;
                }
            }
            opcodes::NEW => {
                let value_type = match &instruction.kind {
                    InstructionKind::New(class) => ValueType::Exact(class.clone()),
                    _ => ValueType::Unknown,
                };
                state.stack.push(Value {
                    alloc: Some(instruction.offset),
                    ..Value::of_type(value_type)
                });
            }
            opcodes::NEWARRAY | opcodes::ANEWARRAY => {
                state.pop();
                state.stack.push(Value {
                    alloc: Some(instruction.offset),
                    ..Value::of_type(type_operand(instruction, ValueType::Exact))
                });
            }
            opcodes::MULTIANEWARRAY => {
                let dimensions = match &instruction.kind {
                    InstructionKind::TypeRef(array) => array.array_dimensions().max(1),
                    _ => 1,
                };
                state.pop_n(dimensions);
                state.stack.push(Value {
                    alloc: Some(instruction.offset),
                    ..Value::of_type(type_operand(instruction, ValueType::Exact))
                });
            }
            opcodes::ARRAYLENGTH | opcodes::INSTANCEOF => {
                state.pop();
                state.stack.push(Value::scalar(false));
            }
            opcodes::CHECKCAST => {
                let mut value = state.pop();
                if !matches!(value.value_type, ValueType::Exact(_) | ValueType::Null) {
                    value.value_type = type_operand(instruction, ValueType::Declared);
                }
                state.stack.push(value);
            }
            other => bail!("unsupported opcode 0x{other:02x} at {}", instruction.offset),
        }
        Ok(())
    }

    fn field(&self, state: &mut Frame, instruction: &Instruction) {
        let InstructionKind::Field(field) = &instruction.kind else {
            return;
        };
        match instruction.opcode {
            opcodes::GETSTATIC => state.stack.push(Value::of_descriptor(&field.descriptor)),
            opcodes::GETFIELD => {
                state.pop();
                state.stack.push(Value::of_descriptor(&field.descriptor));
            }
            opcodes::PUTSTATIC => {
                state.pop();
            }
            _ => {
                state.pop_n(2);
            }
        }
    }

    fn invoke(&self, state: &mut Frame, call: &CallSite) -> Result<()> {
        let shape = MethodShape::of(&call.descriptor)?;
        let receiver = usize::from(call.kind != CallKind::Static);
        let arguments = state.pop_n(shape.parameters.len() + receiver);
        if call.is_constructor() {
            let origin = self.model.constructed(call, &arguments);
            if let Some(alloc) = arguments.first().and_then(|object| object.alloc) {
                if origin != Origin::Other {
                    state.mark_allocation(alloc, origin);
                }
            }
            return Ok(());
        }
        if shape.returns != ReturnShape::Void {
            let origin = self.model.returned(call, &arguments);
            push_return(state, &call.descriptor, origin)?;
        }
        Ok(())
    }
}

fn push_return(state: &mut Frame, method_descriptor: &str, origin: Origin) -> Result<()> {
    let returned = descriptor::return_descriptor(method_descriptor)?;
    if returned == "V" {
        return Ok(());
    }
    let mut value = Value::of_descriptor(returned);
    value.origin = origin;
    state.stack.push(value);
    Ok(())
}

fn local_index(instruction: &Instruction) -> usize {
    match instruction.kind {
        InstructionKind::Local(index) => index,
        _ => 0,
    }
}

fn type_operand(instruction: &Instruction, wrap: fn(ClassIdentifier) -> ValueType) -> ValueType {
    match &instruction.kind {
        InstructionKind::TypeRef(class) => wrap(class.clone()),
        _ => ValueType::Unknown,
    }
}
