use std::ops::Range;

use crate::names::{ClassIdentifier, FieldIdentifier, MethodIdentifier};

/// Intermediate representation for a parsed JVM class.
#[derive(Clone, Debug)]
pub struct Class {
    pub name: ClassIdentifier,
    pub access: AccessFlags,
    pub super_name: Option<ClassIdentifier>,
    pub interfaces: Vec<ClassIdentifier>,
    pub fields: Vec<Field>,
    pub methods: Vec<Method>,
}

impl Class {
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn method(&self, name: &str, descriptor: &str) -> Option<&Method> {
        self.methods
            .iter()
            .find(|method| method.name == name && method.descriptor == descriptor)
    }

    pub fn constructors(&self) -> impl Iterator<Item = &Method> {
        self.methods.iter().filter(|method| method.is_constructor())
    }

    pub fn is_enum(&self) -> bool {
        self.access.is_enum()
            || self
                .super_name
                .as_ref()
                .is_some_and(|name| name.as_str() == "java.lang.Enum")
    }

    pub fn field_identifier(&self, field: &Field) -> FieldIdentifier {
        FieldIdentifier::new(self.name.clone(), field.name.clone(), &field.descriptor)
    }

    pub fn method_identifier(&self, method: &Method) -> MethodIdentifier {
        MethodIdentifier::new(self.name.clone(), method.name.clone(), method.descriptor.clone())
    }
}

/// Field declaration with its optional generic signature.
#[derive(Clone, Debug)]
pub struct Field {
    pub name: String,
    pub descriptor: String,
    pub signature: Option<String>,
    pub access: AccessFlags,
}

impl Field {
    pub fn field_type(&self) -> ClassIdentifier {
        ClassIdentifier::from_descriptor(&self.descriptor)
    }
}

/// Intermediate representation for a method and its decoded bytecode.
#[derive(Clone, Debug)]
pub struct Method {
    pub name: String,
    pub descriptor: String,
    pub access: AccessFlags,
    pub max_locals: usize,
    pub instructions: Vec<Instruction>,
    pub cfg: ControlFlowGraph,
}

impl Method {
    pub fn is_constructor(&self) -> bool {
        self.name == "<init>"
    }

    pub fn is_static_initializer(&self) -> bool {
        self.name == "<clinit>"
    }

    pub fn has_code(&self) -> bool {
        !self.instructions.is_empty()
    }

    /// Call sites in instruction order.
    pub fn calls(&self) -> impl Iterator<Item = &CallSite> {
        self.instructions
            .iter()
            .filter_map(|instruction| match &instruction.kind {
                InstructionKind::Invoke(call) => Some(call),
                _ => None,
            })
    }

    /// Instruction immediately preceding `index`, if any.
    pub fn previous(&self, index: usize) -> Option<&Instruction> {
        index
            .checked_sub(1)
            .and_then(|previous| self.instructions.get(previous))
    }
}

/// Access flags shared by classes, fields and methods.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct AccessFlags(pub u16);

impl AccessFlags {
    pub const PUBLIC: u16 = 0x0001;
    pub const PRIVATE: u16 = 0x0002;
    pub const PROTECTED: u16 = 0x0004;
    pub const STATIC: u16 = 0x0008;
    pub const FINAL: u16 = 0x0010;
    pub const INTERFACE: u16 = 0x0200;
    pub const ABSTRACT: u16 = 0x0400;
    pub const SYNTHETIC: u16 = 0x1000;
    pub const ENUM: u16 = 0x4000;

    fn has(&self, flag: u16) -> bool {
        self.0 & flag != 0
    }

    pub fn is_public(&self) -> bool {
        self.has(Self::PUBLIC)
    }

    pub fn is_private(&self) -> bool {
        self.has(Self::PRIVATE)
    }

    pub fn is_protected(&self) -> bool {
        self.has(Self::PROTECTED)
    }

    pub fn is_static(&self) -> bool {
        self.has(Self::STATIC)
    }

    pub fn is_final(&self) -> bool {
        self.has(Self::FINAL)
    }

    pub fn is_interface(&self) -> bool {
        self.has(Self::INTERFACE)
    }

    pub fn is_abstract(&self) -> bool {
        self.has(Self::ABSTRACT)
    }

    pub fn is_synthetic(&self) -> bool {
        self.has(Self::SYNTHETIC)
    }

    pub fn is_enum(&self) -> bool {
        self.has(Self::ENUM)
    }
}

/// Basic block graph for method bytecode.
#[derive(Clone, Debug, Default)]
pub struct ControlFlowGraph {
    pub blocks: Vec<BasicBlock>,
    pub edges: Vec<FlowEdge>,
}

/// Basic block covering a range of bytecode offsets.
#[derive(Clone, Debug)]
pub struct BasicBlock {
    pub start_offset: u32,
    pub end_offset: u32,
    /// Indices into [`Method::instructions`].
    pub instructions: Range<usize>,
}

/// Edge between basic blocks, keyed by block start offsets.
#[derive(Clone, Debug)]
pub struct FlowEdge {
    pub from: u32,
    pub to: u32,
    pub kind: EdgeKind,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum EdgeKind {
    FallThrough,
    Branch,
}

/// Bytecode instruction captured for analysis.
#[derive(Clone, Debug)]
pub struct Instruction {
    pub offset: u32,
    pub opcode: u8,
    pub kind: InstructionKind,
}

/// Decoded operands the analyses care about.
#[derive(Clone, Debug)]
pub enum InstructionKind {
    Invoke(CallSite),
    InvokeDynamic { name: String, descriptor: String },
    Field(FieldRef),
    New(ClassIdentifier),
    /// `anewarray`, `multianewarray`, `checkcast` and `instanceof` operand.
    TypeRef(ClassIdentifier),
    /// Local variable slot of a load, store, `iinc` or `ret`.
    Local(usize),
    ConstString(String),
    ConstClass(ClassIdentifier),
    /// Absolute branch targets, including switch defaults.
    Branch(Vec<u32>),
    Other,
}

/// Call site extracted from bytecode.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CallSite {
    pub owner: ClassIdentifier,
    pub name: String,
    pub descriptor: String,
    pub kind: CallKind,
    pub offset: u32,
}

impl CallSite {
    pub fn is_constructor(&self) -> bool {
        self.name == "<init>"
    }

    pub fn is(&self, owner: &str, name: &str) -> bool {
        self.owner.as_str() == owner && self.name == name
    }
}

/// Call opcode classification.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum CallKind {
    Virtual,
    Interface,
    Special,
    Static,
}

/// Field access extracted from bytecode.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FieldRef {
    pub owner: ClassIdentifier,
    pub name: String,
    pub descriptor: String,
    pub access: FieldAccess,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FieldAccess {
    Get,
    Put,
    GetStatic,
    PutStatic,
}

impl FieldAccess {
    pub fn is_store(&self) -> bool {
        matches!(self, FieldAccess::Put | FieldAccess::PutStatic)
    }

    pub fn is_static(&self) -> bool {
        matches!(self, FieldAccess::GetStatic | FieldAccess::PutStatic)
    }
}
