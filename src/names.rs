use std::fmt;

use serde::{Deserialize, Serialize};

/// Canonical, dot-separated JVM type name.
///
/// Class names are normalised from internal (`java/lang/String`), descriptor
/// (`Ljava/lang/String;`) or dotted form. Array types keep the JVM's own
/// naming (`[Ljava.lang.String;`, `[[I`) and primitive types use their
/// keyword (`int`).
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassIdentifier(String);

impl ClassIdentifier {
    /// Normalise a class name given in internal, descriptor or dotted form.
    ///
    /// Single-letter primitive descriptors are only recognised by
    /// [`ClassIdentifier::from_descriptor`], since `I` is also a legal class name.
    pub fn new(name: impl AsRef<str>) -> Self {
        let name = name.as_ref();
        if name.starts_with('[') {
            return Self(name.replace('/', "."));
        }
        if let Some(inner) = name.strip_prefix('L').and_then(|rest| rest.strip_suffix(';')) {
            return Self(inner.replace('/', "."));
        }
        Self(name.replace('/', "."))
    }

    /// Normalise a field descriptor (`I`, `Ljava/util/List;`, `[[B`).
    pub fn from_descriptor(descriptor: &str) -> Self {
        if let Some(keyword) = primitive_keyword(descriptor) {
            return Self(keyword.to_string());
        }
        Self::new(descriptor)
    }

    pub fn object() -> Self {
        Self(OBJECT.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Slash-separated internal form, as used in constant pools.
    pub fn internal_name(&self) -> String {
        self.0.replace('.', "/")
    }

    pub fn is_array(&self) -> bool {
        self.0.starts_with('[')
    }

    pub fn is_primitive(&self) -> bool {
        PRIMITIVES.iter().any(|(_, keyword)| *keyword == self.0)
    }

    pub fn is_object(&self) -> bool {
        self.0 == OBJECT
    }

    pub fn array_dimensions(&self) -> usize {
        self.0.chars().take_while(|c| *c == '[').count()
    }

    /// Component type after stripping every array dimension.
    pub fn element_type(&self) -> Option<ClassIdentifier> {
        if !self.is_array() {
            return None;
        }
        let element = &self.0[self.array_dimensions()..];
        Some(Self::from_descriptor(element))
    }

    /// Component type after stripping one array dimension.
    pub fn component_type(&self) -> Option<ClassIdentifier> {
        let component = self.0.strip_prefix('[')?;
        Some(Self::from_descriptor(component))
    }

    /// Name without its package.
    pub fn simple_name(&self) -> &str {
        self.0.rsplit('.').next().unwrap_or(&self.0)
    }

    /// Whether this type is declared inside `outer` (`Outer$Inner`, `Outer$1`).
    pub fn is_nested_in(&self, outer: &ClassIdentifier) -> bool {
        self.0
            .strip_prefix(outer.as_str())
            .is_some_and(|rest| rest.starts_with('$') && rest.len() > 1)
    }
}

impl fmt::Display for ClassIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClassIdentifier {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// A field of a class, with its declared type.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize)]
pub struct FieldIdentifier {
    pub owner: ClassIdentifier,
    pub name: String,
    pub field_type: ClassIdentifier,
}

impl FieldIdentifier {
    pub fn new(owner: ClassIdentifier, name: impl Into<String>, descriptor: &str) -> Self {
        Self {
            owner,
            name: name.into(),
            field_type: ClassIdentifier::from_descriptor(descriptor),
        }
    }
}

impl fmt::Display for FieldIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.owner, self.name)
    }
}

/// A method of a class identified by name and descriptor.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize)]
pub struct MethodIdentifier {
    pub owner: ClassIdentifier,
    pub name: String,
    pub descriptor: String,
}

impl MethodIdentifier {
    pub fn new(
        owner: ClassIdentifier,
        name: impl Into<String>,
        descriptor: impl Into<String>,
    ) -> Self {
        Self {
            owner,
            name: name.into(),
            descriptor: descriptor.into(),
        }
    }

    pub fn is_constructor(&self) -> bool {
        self.name == "<init>"
    }
}

impl fmt::Display for MethodIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}{}", self.owner, self.name, self.descriptor)
    }
}

const OBJECT: &str = "java.lang.Object";

const PRIMITIVES: [(&str, &str); 9] = [
    ("B", "byte"),
    ("C", "char"),
    ("D", "double"),
    ("F", "float"),
    ("I", "int"),
    ("J", "long"),
    ("S", "short"),
    ("Z", "boolean"),
    ("V", "void"),
];

fn primitive_keyword(descriptor: &str) -> Option<&'static str> {
    PRIMITIVES
        .iter()
        .find(|(letter, _)| *letter == descriptor)
        .map(|(_, keyword)| *keyword)
}
