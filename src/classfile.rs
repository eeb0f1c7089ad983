use anyhow::{Context, Result};
use jclassfile::attributes::Attribute;
use jclassfile::class_file;
use jclassfile::constant_pool::ConstantPool;

use crate::cfg::build_cfg;
use crate::ir::{
    AccessFlags, CallKind, CallSite, Class, Field, FieldAccess, FieldRef, Instruction,
    InstructionKind, Method,
};
use crate::names::ClassIdentifier;
use crate::opcodes;

/// Parse class-file bytes into the analysis IR.
pub fn parse_class(data: &[u8]) -> Result<Class> {
    let class_file = class_file::parse(data).context("invalid class file")?;
    let pool = class_file.constant_pool();

    let name = ClassIdentifier::new(class_name(pool, class_file.this_class())?);
    let super_name = if class_file.super_class() == 0 {
        None
    } else {
        Some(ClassIdentifier::new(class_name(pool, class_file.super_class())?))
    };
    let mut interfaces = Vec::new();
    for index in class_file.interfaces() {
        interfaces.push(ClassIdentifier::new(class_name(pool, *index)?));
    }

    let mut fields = Vec::new();
    for field in class_file.fields() {
        let mut signature = None;
        for attribute in field.attributes() {
            if let Attribute::Signature { signature_index } = attribute {
                signature = Some(utf8(pool, *signature_index)?);
            }
        }
        fields.push(Field {
            name: utf8(pool, field.name_index())?,
            descriptor: utf8(pool, field.descriptor_index())?,
            signature,
            access: AccessFlags(field.access_flags().bits()),
        });
    }

    let mut methods = Vec::new();
    for method in class_file.methods() {
        let method_name = utf8(pool, method.name_index())?;
        let descriptor = utf8(pool, method.descriptor_index())?;
        let mut instructions = Vec::new();
        let mut max_locals = 0usize;
        let mut code_len = 0usize;
        for attribute in method.attributes() {
            if let Attribute::Code {
                max_locals: locals,
                code,
                ..
            } = attribute
            {
                max_locals = *locals as usize;
                code_len = code.len();
                instructions = decode_instructions(code, pool).with_context(|| {
                    format!("failed to decode {}.{}{}", name, method_name, descriptor)
                })?;
            }
        }
        let cfg = build_cfg(&instructions, code_len as u32);
        methods.push(Method {
            name: method_name,
            descriptor,
            access: AccessFlags(method.access_flags().bits()),
            max_locals,
            instructions,
            cfg,
        });
    }

    Ok(Class {
        name,
        access: AccessFlags(class_file.access_flags().bits()),
        super_name,
        interfaces,
        fields,
        methods,
    })
}

/// Decode a `Code` attribute body into instructions with resolved operands.
pub(crate) fn decode_instructions(code: &[u8], pool: &[ConstantPool]) -> Result<Vec<Instruction>> {
    let mut instructions = Vec::new();
    let mut offset = 0usize;
    while offset < code.len() {
        let opcode = code[offset];
        let length = opcode_length(code, offset)?;
        let (opcode, kind) = decode_operands(code, offset, opcode, pool)?;
        instructions.push(Instruction {
            offset: offset as u32,
            opcode,
            kind,
        });
        offset += length;
    }
    Ok(instructions)
}

fn decode_operands(
    code: &[u8],
    offset: usize,
    opcode: u8,
    pool: &[ConstantPool],
) -> Result<(u8, InstructionKind)> {
    let kind = match opcode {
        opcodes::WIDE => {
            let inner = *code.get(offset + 1).context("truncated wide instruction")?;
            let index = read_u16(code, offset + 2)? as usize;
            return Ok((inner, InstructionKind::Local(index)));
        }
        opcodes::ILOAD..=opcodes::ALOAD
        | opcodes::ISTORE..=opcodes::ASTORE
        | opcodes::IINC
        | opcodes::RET => InstructionKind::Local(read_u8(code, offset + 1)? as usize),
        opcodes::ILOAD_0..=opcodes::ALOAD_3 => {
            InstructionKind::Local(((opcode - opcodes::ILOAD_0) % 4) as usize)
        }
        opcodes::ISTORE_0..=opcodes::ASTORE_3 => {
            InstructionKind::Local(((opcode - opcodes::ISTORE_0) % 4) as usize)
        }
        opcodes::LDC => constant_kind(pool, read_u8(code, offset + 1)? as u16)?,
        opcodes::LDC_W => constant_kind(pool, read_u16(code, offset + 1)?)?,
        opcodes::GETSTATIC | opcodes::PUTSTATIC | opcodes::GETFIELD | opcodes::PUTFIELD => {
            let (owner, name, descriptor) = member_ref(pool, read_u16(code, offset + 1)?)?;
            let access = match opcode {
                opcodes::GETSTATIC => FieldAccess::GetStatic,
                opcodes::PUTSTATIC => FieldAccess::PutStatic,
                opcodes::GETFIELD => FieldAccess::Get,
                _ => FieldAccess::Put,
            };
            InstructionKind::Field(FieldRef {
                owner: ClassIdentifier::new(owner),
                name,
                descriptor,
                access,
            })
        }
        opcodes::INVOKEVIRTUAL
        | opcodes::INVOKESPECIAL
        | opcodes::INVOKESTATIC
        | opcodes::INVOKEINTERFACE => {
            let (owner, name, descriptor) = member_ref(pool, read_u16(code, offset + 1)?)?;
            let kind = match opcode {
                opcodes::INVOKEVIRTUAL => CallKind::Virtual,
                opcodes::INVOKESPECIAL => CallKind::Special,
                opcodes::INVOKESTATIC => CallKind::Static,
                _ => CallKind::Interface,
            };
            InstructionKind::Invoke(CallSite {
                owner: ClassIdentifier::new(owner),
                name,
                descriptor,
                kind,
                offset: offset as u32,
            })
        }
        opcodes::INVOKEDYNAMIC => {
            let (name, descriptor) = invoke_dynamic(pool, read_u16(code, offset + 1)?)?;
            InstructionKind::InvokeDynamic { name, descriptor }
        }
        opcodes::NEW => {
            InstructionKind::New(ClassIdentifier::new(class_name(pool, read_u16(code, offset + 1)?)?))
        }
        opcodes::ANEWARRAY => {
            let element = class_name(pool, read_u16(code, offset + 1)?)?;
            let array = if element.starts_with('[') {
                format!("[{element}")
            } else {
                format!("[L{element};")
            };
            InstructionKind::TypeRef(ClassIdentifier::new(array))
        }
        opcodes::CHECKCAST | opcodes::INSTANCEOF | opcodes::MULTIANEWARRAY => {
            InstructionKind::TypeRef(ClassIdentifier::new(class_name(
                pool,
                read_u16(code, offset + 1)?,
            )?))
        }
        opcodes::IFEQ..=opcodes::JSR | opcodes::IFNULL | opcodes::IFNONNULL => {
            let branch = read_u16(code, offset + 1)? as i16;
            InstructionKind::Branch(vec![(offset as i32 + branch as i32) as u32])
        }
        opcodes::GOTO_W | opcodes::JSR_W => {
            let branch = read_u32(code, offset + 1)? as i32;
            InstructionKind::Branch(vec![(offset as i32 + branch) as u32])
        }
        opcodes::TABLESWITCH => InstructionKind::Branch(tableswitch_targets(code, offset)?),
        opcodes::LOOKUPSWITCH => InstructionKind::Branch(lookupswitch_targets(code, offset)?),
        _ => InstructionKind::Other,
    };
    Ok((opcode, kind))
}

pub(crate) fn opcode_length(code: &[u8], offset: usize) -> Result<usize> {
    let opcode = code[offset];
    let length = match opcode {
        opcodes::BIPUSH
        | opcodes::LDC
        | opcodes::ILOAD..=opcodes::ALOAD
        | opcodes::ISTORE..=opcodes::ASTORE
        | opcodes::RET
        | opcodes::NEWARRAY => 2,
        opcodes::SIPUSH
        | opcodes::LDC_W
        | opcodes::LDC2_W
        | opcodes::IINC
        | opcodes::IFEQ..=opcodes::JSR
        | opcodes::GETSTATIC..=opcodes::INVOKESTATIC
        | opcodes::NEW
        | opcodes::ANEWARRAY
        | opcodes::CHECKCAST
        | opcodes::INSTANCEOF
        | opcodes::IFNULL
        | opcodes::IFNONNULL => 3,
        opcodes::MULTIANEWARRAY => 4,
        opcodes::INVOKEINTERFACE | opcodes::INVOKEDYNAMIC | opcodes::GOTO_W | opcodes::JSR_W => 5,
        opcodes::WIDE => {
            let inner = *code.get(offset + 1).context("truncated wide instruction")?;
            if inner == opcodes::IINC { 6 } else { 4 }
        }
        opcodes::TABLESWITCH => {
            let base = offset + 1 + padding(offset);
            let low = read_u32(code, base + 4)? as i32;
            let high = read_u32(code, base + 8)? as i32;
            let count = high
                .checked_sub(low)
                .and_then(|value| value.checked_add(1))
                .filter(|value| *value >= 0)
                .context("invalid tableswitch range")?;
            1 + padding(offset) + 12 + count as usize * 4
        }
        opcodes::LOOKUPSWITCH => {
            let base = offset + 1 + padding(offset);
            let npairs = read_u32(code, base + 4)? as i32;
            if npairs < 0 {
                anyhow::bail!("invalid lookupswitch pair count {npairs}");
            }
            1 + padding(offset) + 8 + npairs as usize * 8
        }
        _ => 1,
    };
    if offset + length > code.len() {
        anyhow::bail!("instruction at {offset} runs past the end of the code");
    }
    Ok(length)
}

fn tableswitch_targets(code: &[u8], offset: usize) -> Result<Vec<u32>> {
    let base = offset + 1 + padding(offset);
    let default = read_u32(code, base)? as i32;
    let low = read_u32(code, base + 4)? as i32;
    let high = read_u32(code, base + 8)? as i32;
    let mut targets = vec![(offset as i32 + default) as u32];
    let mut idx = base + 12;
    for _ in low..=high {
        let target = read_u32(code, idx)? as i32;
        targets.push((offset as i32 + target) as u32);
        idx += 4;
    }
    Ok(targets)
}

fn lookupswitch_targets(code: &[u8], offset: usize) -> Result<Vec<u32>> {
    let base = offset + 1 + padding(offset);
    let default = read_u32(code, base)? as i32;
    let npairs = read_u32(code, base + 4)? as i32;
    let mut targets = vec![(offset as i32 + default) as u32];
    let mut idx = base + 8;
    for _ in 0..npairs.max(0) {
        let target = read_u32(code, idx + 4)? as i32;
        targets.push((offset as i32 + target) as u32);
        idx += 8;
    }
    Ok(targets)
}

pub(crate) fn padding(offset: usize) -> usize {
    (4 - ((offset + 1) % 4)) % 4
}

fn read_u8(code: &[u8], offset: usize) -> Result<u8> {
    code.get(offset)
        .copied()
        .with_context(|| format!("truncated operand at {offset}"))
}

pub(crate) fn read_u16(code: &[u8], offset: usize) -> Result<u16> {
    let bytes = code
        .get(offset..offset + 2)
        .with_context(|| format!("truncated operand at {offset}"))?;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

pub(crate) fn read_u32(code: &[u8], offset: usize) -> Result<u32> {
    let bytes = code
        .get(offset..offset + 4)
        .with_context(|| format!("truncated operand at {offset}"))?;
    Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn utf8(pool: &[ConstantPool], index: u16) -> Result<String> {
    match pool.get(index as usize) {
        Some(ConstantPool::Utf8 { value }) => Ok(value.clone()),
        _ => anyhow::bail!("constant pool entry {index} is not utf8"),
    }
}

fn class_name(pool: &[ConstantPool], index: u16) -> Result<String> {
    match pool.get(index as usize) {
        Some(ConstantPool::Class { name_index }) => utf8(pool, *name_index),
        _ => anyhow::bail!("constant pool entry {index} is not a class"),
    }
}

fn name_and_type(pool: &[ConstantPool], index: u16) -> Result<(String, String)> {
    match pool.get(index as usize) {
        Some(ConstantPool::NameAndType {
            name_index,
            descriptor_index,
        }) => Ok((utf8(pool, *name_index)?, utf8(pool, *descriptor_index)?)),
        _ => anyhow::bail!("constant pool entry {index} is not a name and type"),
    }
}

fn member_ref(pool: &[ConstantPool], index: u16) -> Result<(String, String, String)> {
    let (class_index, name_and_type_index) = match pool.get(index as usize) {
        Some(ConstantPool::Fieldref {
            class_index,
            name_and_type_index,
        })
        | Some(ConstantPool::Methodref {
            class_index,
            name_and_type_index,
        })
        | Some(ConstantPool::InterfaceMethodref {
            class_index,
            name_and_type_index,
        }) => (*class_index, *name_and_type_index),
        _ => anyhow::bail!("constant pool entry {index} is not a member reference"),
    };
    let owner = class_name(pool, class_index)?;
    let (name, descriptor) = name_and_type(pool, name_and_type_index)?;
    Ok((owner, name, descriptor))
}

fn invoke_dynamic(pool: &[ConstantPool], index: u16) -> Result<(String, String)> {
    match pool.get(index as usize) {
        Some(ConstantPool::InvokeDynamic {
            name_and_type_index,
            ..
        }) => name_and_type(pool, *name_and_type_index),
        _ => anyhow::bail!("constant pool entry {index} is not an invokedynamic"),
    }
}

fn constant_kind(pool: &[ConstantPool], index: u16) -> Result<InstructionKind> {
    Ok(match pool.get(index as usize) {
        Some(ConstantPool::String { string_index }) => {
            InstructionKind::ConstString(utf8(pool, *string_index)?)
        }
        Some(ConstantPool::Class { name_index }) => {
            InstructionKind::ConstClass(ClassIdentifier::new(utf8(pool, *name_index)?))
        }
        Some(_) => InstructionKind::Other,
        None => anyhow::bail!("constant pool entry {index} is missing"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padding_aligns_switch_operands() {
        assert_eq!(3, padding(0));
        assert_eq!(0, padding(3));
        assert_eq!(2, padding(5));
    }

    #[test]
    fn decodes_local_and_branch_operands_without_constant_pool() {
        // aload_0, astore 5, wide iinc 300 1, goto -8 (back to astore), return
        let code = [
            opcodes::ALOAD_0,
            opcodes::ASTORE,
            5,
            opcodes::WIDE,
            opcodes::IINC,
            0x01,
            0x2c,
            0x00,
            0x01,
            opcodes::GOTO,
            0xff,
            0xf8,
            opcodes::RETURN,
        ];
        let instructions = decode_instructions(&code, &[]).expect("decode");

        let offsets: Vec<u32> = instructions.iter().map(|inst| inst.offset).collect();
        assert_eq!(vec![0, 1, 3, 9, 12], offsets);
        assert!(matches!(instructions[0].kind, InstructionKind::Local(0)));
        assert!(matches!(instructions[1].kind, InstructionKind::Local(5)));
        assert_eq!(opcodes::IINC, instructions[2].opcode);
        assert!(matches!(instructions[2].kind, InstructionKind::Local(300)));
        match &instructions[3].kind {
            InstructionKind::Branch(targets) => assert_eq!(&vec![1], targets),
            other => panic!("unexpected kind {other:?}"),
        }
    }

    #[test]
    fn rejects_truncated_code() {
        let code = [opcodes::SIPUSH, 0x01];
        assert!(decode_instructions(&code, &[]).is_err());
    }

    #[test]
    fn rejects_invalid_class_bytes() {
        assert!(parse_class(b"nope").is_err());
    }
}
