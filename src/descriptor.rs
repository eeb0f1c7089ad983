use anyhow::{Context, Result, anyhow};
use jdescriptor::{MethodDescriptor, TypeDescriptor};

use crate::names::ClassIdentifier;

/// Operand-stack shape of a method: one entry per parameter, in order.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct MethodShape {
    /// Whether each parameter is a category-2 (`long`/`double`) value.
    pub(crate) parameters: Vec<bool>,
    pub(crate) returns: ReturnShape,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum ReturnShape {
    Void,
    Single,
    Wide,
}

impl MethodShape {
    pub(crate) fn of(descriptor: &str) -> Result<Self> {
        let parsed: MethodDescriptor = descriptor
            .parse()
            .map_err(|err| anyhow!("invalid method descriptor {descriptor}: {err:?}"))?;
        let parameters = parsed
            .parameter_types()
            .iter()
            .map(|parameter| matches!(parameter, TypeDescriptor::Long | TypeDescriptor::Double))
            .collect();
        let returns = match parsed.return_type() {
            TypeDescriptor::Void => ReturnShape::Void,
            TypeDescriptor::Long | TypeDescriptor::Double => ReturnShape::Wide,
            _ => ReturnShape::Single,
        };
        Ok(Self {
            parameters,
            returns,
        })
    }
}

/// Field descriptors of each parameter of a method descriptor.
pub(crate) fn parameter_descriptors(descriptor: &str) -> Result<Vec<&str>> {
    let body = descriptor
        .strip_prefix('(')
        .and_then(|rest| rest.split_once(')'))
        .map(|(params, _)| params)
        .with_context(|| format!("invalid method descriptor {descriptor}"))?;
    let mut parameters = Vec::new();
    let mut rest = body;
    while !rest.is_empty() {
        let length = field_descriptor_length(rest)
            .with_context(|| format!("invalid method descriptor {descriptor}"))?;
        parameters.push(&rest[..length]);
        rest = &rest[length..];
    }
    Ok(parameters)
}

/// Return descriptor of a method descriptor.
pub(crate) fn return_descriptor(descriptor: &str) -> Result<&str> {
    descriptor
        .split_once(')')
        .map(|(_, ret)| ret)
        .filter(|ret| !ret.is_empty())
        .with_context(|| format!("invalid method descriptor {descriptor}"))
}

pub(crate) fn is_wide(descriptor: &str) -> bool {
    matches!(descriptor, "J" | "D")
}

pub(crate) fn is_reference(descriptor: &str) -> bool {
    descriptor.starts_with('L') || descriptor.starts_with('[')
}

fn field_descriptor_length(descriptor: &str) -> Option<usize> {
    let dimensions = descriptor.chars().take_while(|c| *c == '[').count();
    let element = &descriptor[dimensions..];
    let element_length = match element.chars().next()? {
        'B' | 'C' | 'D' | 'F' | 'I' | 'J' | 'S' | 'Z' => 1,
        'L' => element.find(';')? + 1,
        _ => return None,
    };
    Some(dimensions + element_length)
}

/// Top-level type argument of a generic field signature.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TypeArgument {
    /// A concrete class or array type (`Ljava/lang/String;`, `[I`).
    Type(ClassIdentifier),
    /// A type variable (`TT;`).
    Variable(String),
    /// `*`, or `? extends`/`? super` with the bound's type.
    Wildcard(Option<ClassIdentifier>),
}

/// Type arguments of the outermost class in a field signature.
///
/// `Ljava/util/Map<Ljava/lang/String;Ljava/util/List<TT;>;>;` yields
/// `[Type(String), Type(List)]`. Raw or non-generic signatures yield nothing.
pub fn type_arguments(signature: &str) -> Vec<TypeArgument> {
    let Some(open) = signature.find('<') else {
        return Vec::new();
    };
    let mut arguments = Vec::new();
    let mut rest = &signature[open + 1..];
    while let Some(first) = rest.chars().next() {
        match first {
            '>' => break,
            '*' => {
                arguments.push(TypeArgument::Wildcard(None));
                rest = &rest[1..];
            }
            '+' | '-' => {
                let Some((bound, length)) = signature_type(&rest[1..]) else {
                    break;
                };
                let bound = match bound {
                    TypeArgument::Type(class) => Some(class),
                    _ => None,
                };
                arguments.push(TypeArgument::Wildcard(bound));
                rest = &rest[1 + length..];
            }
            _ => {
                let Some((argument, length)) = signature_type(rest) else {
                    break;
                };
                arguments.push(argument);
                rest = &rest[length..];
            }
        }
    }
    arguments
}

/// Parse one reference type signature, returning it and its length.
fn signature_type(signature: &str) -> Option<(TypeArgument, usize)> {
    let dimensions = signature.chars().take_while(|c| *c == '[').count();
    let element = &signature[dimensions..];
    match element.chars().next()? {
        'T' => {
            let end = element.find(';')?;
            let length = dimensions + end + 1;
            if dimensions > 0 {
                let erased = format!("{}Ljava/lang/Object;", "[".repeat(dimensions));
                return Some((TypeArgument::Type(ClassIdentifier::new(erased)), length));
            }
            Some((TypeArgument::Variable(element[1..end].to_string()), length))
        }
        'L' => {
            let mut depth = 0usize;
            let mut erased = String::new();
            for (index, c) in element.char_indices() {
                match c {
                    '<' => depth += 1,
                    '>' => depth = depth.checked_sub(1)?,
                    ';' if depth == 0 => {
                        let class = format!("{}{};", "[".repeat(dimensions), erased);
                        return Some((
                            TypeArgument::Type(ClassIdentifier::new(class)),
                            dimensions + index + 1,
                        ));
                    }
                    '.' if depth == 0 => erased.push('$'),
                    _ if depth == 0 => erased.push(c),
                    _ => {}
                }
            }
            None
        }
        'B' | 'C' | 'D' | 'F' | 'I' | 'J' | 'S' | 'Z' if dimensions > 0 => {
            let descriptor = &signature[..dimensions + 1];
            Some((
                TypeArgument::Type(ClassIdentifier::from_descriptor(descriptor)),
                dimensions + 1,
            ))
        }
        _ => None,
    }
}
