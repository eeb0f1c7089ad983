//! Builders for hand-assembled classes used by unit tests.

use std::collections::BTreeMap;

use crate::cfg::build_cfg;
use crate::ir::{
    AccessFlags, CallKind, CallSite, Class, Field, FieldAccess, FieldRef, Instruction,
    InstructionKind, Method,
};
use crate::names::ClassIdentifier;
use crate::opcodes;

pub(crate) const PRIVATE_FINAL: u16 = AccessFlags::PRIVATE | AccessFlags::FINAL;
pub(crate) const PRIVATE: u16 = AccessFlags::PRIVATE;
pub(crate) const PUBLIC: u16 = AccessFlags::PUBLIC;
pub(crate) const PRIVATE_STATIC_FINAL: u16 =
    AccessFlags::PRIVATE | AccessFlags::STATIC | AccessFlags::FINAL;

pub(crate) struct ClassBuilder {
    class: Class,
}

impl ClassBuilder {
    /// A public final class extending `Object`.
    pub(crate) fn new(name: &str) -> Self {
        Self {
            class: Class {
                name: ClassIdentifier::new(name),
                access: AccessFlags(AccessFlags::PUBLIC | AccessFlags::FINAL),
                super_name: Some(ClassIdentifier::object()),
                interfaces: Vec::new(),
                fields: Vec::new(),
                methods: Vec::new(),
            },
        }
    }

    pub(crate) fn extends(mut self, name: &str) -> Self {
        self.class.super_name = Some(ClassIdentifier::new(name));
        self
    }

    pub(crate) fn implements(mut self, name: &str) -> Self {
        self.class.interfaces.push(ClassIdentifier::new(name));
        self
    }

    pub(crate) fn access(mut self, access: u16) -> Self {
        self.class.access = AccessFlags(access);
        self
    }

    pub(crate) fn not_final(self) -> Self {
        self.access(AccessFlags::PUBLIC)
    }

    pub(crate) fn interface(self) -> Self {
        self.access(AccessFlags::PUBLIC | AccessFlags::INTERFACE | AccessFlags::ABSTRACT)
    }

    pub(crate) fn abstract_class(self) -> Self {
        self.access(AccessFlags::PUBLIC | AccessFlags::ABSTRACT)
    }

    pub(crate) fn enumeration(self) -> Self {
        self.extends("java/lang/Enum")
            .access(AccessFlags::PUBLIC | AccessFlags::FINAL | AccessFlags::ENUM)
    }

    pub(crate) fn field(mut self, name: &str, descriptor: &str, access: u16) -> Self {
        self.class.fields.push(Field {
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            signature: None,
            access: AccessFlags(access),
        });
        self
    }

    pub(crate) fn generic_field(
        mut self,
        name: &str,
        descriptor: &str,
        signature: &str,
        access: u16,
    ) -> Self {
        self.class.fields.push(Field {
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            signature: Some(signature.to_string()),
            access: AccessFlags(access),
        });
        self
    }

    pub(crate) fn method(mut self, method: MethodBuilder) -> Self {
        self.class.methods.push(method.build());
        self
    }

    /// Adds `public <init>()V { super(); return; }`.
    pub(crate) fn default_constructor(self) -> Self {
        let super_name = self
            .class
            .super_name
            .as_ref()
            .map(ClassIdentifier::internal_name)
            .unwrap_or_else(|| "java/lang/Object".to_string());
        self.method(
            MethodBuilder::constructor("()V")
                .aload(0)
                .invokespecial(&super_name, "<init>", "()V")
                .return_void(),
        )
    }

    pub(crate) fn build(self) -> Class {
        self.class
    }
}

enum Pending {
    Ready(u8, InstructionKind),
    Jump(u8, String),
}

pub(crate) struct MethodBuilder {
    name: String,
    descriptor: String,
    access: u16,
    code: Vec<Pending>,
    labels: BTreeMap<String, usize>,
}

impl MethodBuilder {
    pub(crate) fn new(name: &str, descriptor: &str) -> Self {
        Self {
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            access: AccessFlags::PUBLIC,
            code: Vec::new(),
            labels: BTreeMap::new(),
        }
    }

    pub(crate) fn constructor(descriptor: &str) -> Self {
        Self::new("<init>", descriptor)
    }

    pub(crate) fn access(mut self, access: u16) -> Self {
        self.access = access;
        self
    }

    pub(crate) fn private(self) -> Self {
        self.access(AccessFlags::PRIVATE)
    }

    pub(crate) fn static_method(mut self) -> Self {
        self.access |= AccessFlags::STATIC;
        self
    }

    fn push(mut self, opcode: u8, kind: InstructionKind) -> Self {
        self.code.push(Pending::Ready(opcode, kind));
        self
    }

    fn jump(mut self, opcode: u8, label: &str) -> Self {
        self.code.push(Pending::Jump(opcode, label.to_string()));
        self
    }

    pub(crate) fn label(mut self, label: &str) -> Self {
        self.labels.insert(label.to_string(), self.code.len());
        self
    }

    pub(crate) fn aload(self, index: usize) -> Self {
        match index {
            0..=3 => self.push(opcodes::ALOAD_0 + index as u8, InstructionKind::Local(index)),
            _ => self.push(opcodes::ALOAD, InstructionKind::Local(index)),
        }
    }

    pub(crate) fn astore(self, index: usize) -> Self {
        match index {
            0..=3 => self.push(opcodes::ASTORE_0 + index as u8, InstructionKind::Local(index)),
            _ => self.push(opcodes::ASTORE, InstructionKind::Local(index)),
        }
    }

    pub(crate) fn iload(self, index: usize) -> Self {
        self.push(opcodes::ILOAD, InstructionKind::Local(index))
    }

    pub(crate) fn aconst_null(self) -> Self {
        self.push(opcodes::ACONST_NULL, InstructionKind::Other)
    }

    pub(crate) fn iconst_0(self) -> Self {
        self.push(opcodes::ICONST_M1 + 1, InstructionKind::Other)
    }

    pub(crate) fn ldc_string(self, value: &str) -> Self {
        self.push(opcodes::LDC, InstructionKind::ConstString(value.to_string()))
    }

    pub(crate) fn dup(self) -> Self {
        self.push(opcodes::DUP, InstructionKind::Other)
    }

    pub(crate) fn pop(self) -> Self {
        self.push(opcodes::POP, InstructionKind::Other)
    }

    pub(crate) fn aastore(self) -> Self {
        self.push(opcodes::AASTORE, InstructionKind::Other)
    }

    pub(crate) fn new_object(self, class: &str) -> Self {
        self.push(opcodes::NEW, InstructionKind::New(ClassIdentifier::new(class)))
    }

    pub(crate) fn anewarray(self, element: &str) -> Self {
        let array = ClassIdentifier::new(format!("[L{element};"));
        self.push(opcodes::ANEWARRAY, InstructionKind::TypeRef(array))
    }

    pub(crate) fn checkcast(self, class: &str) -> Self {
        self.push(opcodes::CHECKCAST, InstructionKind::TypeRef(ClassIdentifier::new(class)))
    }

    fn invoke(self, opcode: u8, kind: CallKind, owner: &str, name: &str, descriptor: &str) -> Self {
        self.push(
            opcode,
            InstructionKind::Invoke(CallSite {
                owner: ClassIdentifier::new(owner),
                name: name.to_string(),
                descriptor: descriptor.to_string(),
                kind,
                offset: 0,
            }),
        )
    }

    pub(crate) fn invokespecial(self, owner: &str, name: &str, descriptor: &str) -> Self {
        self.invoke(opcodes::INVOKESPECIAL, CallKind::Special, owner, name, descriptor)
    }

    pub(crate) fn invokevirtual(self, owner: &str, name: &str, descriptor: &str) -> Self {
        self.invoke(opcodes::INVOKEVIRTUAL, CallKind::Virtual, owner, name, descriptor)
    }

    pub(crate) fn invokestatic(self, owner: &str, name: &str, descriptor: &str) -> Self {
        self.invoke(opcodes::INVOKESTATIC, CallKind::Static, owner, name, descriptor)
    }

    pub(crate) fn invokeinterface(self, owner: &str, name: &str, descriptor: &str) -> Self {
        self.invoke(opcodes::INVOKEINTERFACE, CallKind::Interface, owner, name, descriptor)
    }

    pub(crate) fn invokedynamic(self, name: &str, descriptor: &str) -> Self {
        self.push(
            opcodes::INVOKEDYNAMIC,
            InstructionKind::InvokeDynamic {
                name: name.to_string(),
                descriptor: descriptor.to_string(),
            },
        )
    }

    fn field_access(
        self,
        opcode: u8,
        access: FieldAccess,
        owner: &str,
        name: &str,
        descriptor: &str,
    ) -> Self {
        self.push(
            opcode,
            InstructionKind::Field(FieldRef {
                owner: ClassIdentifier::new(owner),
                name: name.to_string(),
                descriptor: descriptor.to_string(),
                access,
            }),
        )
    }

    pub(crate) fn getfield(self, owner: &str, name: &str, descriptor: &str) -> Self {
        self.field_access(opcodes::GETFIELD, FieldAccess::Get, owner, name, descriptor)
    }

    pub(crate) fn putfield(self, owner: &str, name: &str, descriptor: &str) -> Self {
        self.field_access(opcodes::PUTFIELD, FieldAccess::Put, owner, name, descriptor)
    }

    pub(crate) fn getstatic(self, owner: &str, name: &str, descriptor: &str) -> Self {
        self.field_access(opcodes::GETSTATIC, FieldAccess::GetStatic, owner, name, descriptor)
    }

    pub(crate) fn putstatic(self, owner: &str, name: &str, descriptor: &str) -> Self {
        self.field_access(opcodes::PUTSTATIC, FieldAccess::PutStatic, owner, name, descriptor)
    }

    pub(crate) fn ifnull(self, label: &str) -> Self {
        self.jump(opcodes::IFNULL, label)
    }

    pub(crate) fn ifnonnull(self, label: &str) -> Self {
        self.jump(opcodes::IFNONNULL, label)
    }

    pub(crate) fn goto(self, label: &str) -> Self {
        self.jump(opcodes::GOTO, label)
    }

    pub(crate) fn areturn(self) -> Self {
        self.push(opcodes::ARETURN, InstructionKind::Other)
    }

    pub(crate) fn return_void(self) -> Self {
        self.push(opcodes::RETURN, InstructionKind::Other)
    }

    pub(crate) fn build(self) -> Method {
        let mut offsets = Vec::with_capacity(self.code.len() + 1);
        let mut offset = 0u32;
        for pending in &self.code {
            offsets.push(offset);
            let opcode = match pending {
                Pending::Ready(opcode, _) | Pending::Jump(opcode, _) => *opcode,
            };
            offset += encoded_length(opcode);
        }
        offsets.push(offset);

        let mut instructions = Vec::with_capacity(self.code.len());
        let mut max_local = 0usize;
        for (index, pending) in self.code.into_iter().enumerate() {
            let (opcode, mut kind) = match pending {
                Pending::Ready(opcode, kind) => (opcode, kind),
                Pending::Jump(opcode, label) => {
                    let target = self.labels.get(&label).copied().expect("undefined label");
                    (opcode, InstructionKind::Branch(vec![offsets[target]]))
                }
            };
            match &mut kind {
                InstructionKind::Invoke(call) => call.offset = offsets[index],
                InstructionKind::Local(local) => max_local = max_local.max(*local + 1),
                _ => {}
            }
            instructions.push(Instruction {
                offset: offsets[index],
                opcode,
                kind,
            });
        }

        let parameter_slots = crate::descriptor::parameter_descriptors(&self.descriptor)
            .expect("valid descriptor")
            .iter()
            .map(|param| if crate::descriptor::is_wide(param) { 2 } else { 1 })
            .sum::<usize>();
        let receiver_slots = usize::from(self.access & AccessFlags::STATIC == 0);
        let cfg = build_cfg(&instructions, offset);
        Method {
            name: self.name,
            descriptor: self.descriptor,
            access: AccessFlags(self.access),
            max_locals: max_local.max(parameter_slots + receiver_slots),
            instructions,
            cfg,
        }
    }
}

fn encoded_length(opcode: u8) -> u32 {
    match opcode {
        opcodes::LDC | opcodes::ILOAD | opcodes::ALOAD | opcodes::ASTORE => 2,
        opcodes::INVOKEINTERFACE | opcodes::INVOKEDYNAMIC => 5,
        opcodes::IFNULL
        | opcodes::IFNONNULL
        | opcodes::GOTO
        | opcodes::GETSTATIC..=opcodes::INVOKESTATIC
        | opcodes::NEW
        | opcodes::ANEWARRAY
        | opcodes::CHECKCAST => 3,
        _ => 1,
    }
}
