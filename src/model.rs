use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::names::ClassIdentifier;

/// Outcome of analysing one class.
///
/// Declaration order is severity order: aggregation keeps the maximum.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Immutable,
    EffectivelyImmutable,
    CouldNotAnalyse,
    NotImmutable,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Immutable => "IMMUTABLE",
            Verdict::EffectivelyImmutable => "EFFECTIVELY_IMMUTABLE",
            Verdict::CouldNotAnalyse => "COULD_NOT_ANALYSE",
            Verdict::NotImmutable => "NOT_IMMUTABLE",
        }
    }

    /// Worst-case-wins combination of reason contributions.
    ///
    /// `NOT_IMMUTABLE` beats `COULD_NOT_ANALYSE` because it is already certain.
    pub fn aggregate<'a>(reasons: impl IntoIterator<Item = &'a Reason>) -> Verdict {
        reasons
            .into_iter()
            .map(|reason| reason.kind.verdict())
            .max()
            .unwrap_or(Verdict::Immutable)
    }

    pub fn is_immutable(&self) -> bool {
        matches!(self, Verdict::Immutable)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Verdict {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "IMMUTABLE" => Ok(Verdict::Immutable),
            "EFFECTIVELY_IMMUTABLE" => Ok(Verdict::EffectivelyImmutable),
            "COULD_NOT_ANALYSE" => Ok(Verdict::CouldNotAnalyse),
            "NOT_IMMUTABLE" => Ok(Verdict::NotImmutable),
            other => Err(format!("unknown verdict '{other}'")),
        }
    }
}

/// Closed taxonomy of mutability causes.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonKind {
    NotDeclaredFinal,
    PublishedNonFinalField,
    NonFinalField,
    FieldCanBeReassigned,
    MutableTypeToField,
    AbstractTypeToField,
    AbstractCollectionTypeToField,
    CollectionFieldWithMutableElementType,
    ArrayTypeInherentlyMutable,
    AbstractTypeInherentlyMutable,
    EscapedThisReference,
    HardcodedResult,
    CannotAnalyse,
}

impl ReasonKind {
    pub const ALL: [ReasonKind; 13] = [
        ReasonKind::NotDeclaredFinal,
        ReasonKind::PublishedNonFinalField,
        ReasonKind::NonFinalField,
        ReasonKind::FieldCanBeReassigned,
        ReasonKind::MutableTypeToField,
        ReasonKind::AbstractTypeToField,
        ReasonKind::AbstractCollectionTypeToField,
        ReasonKind::CollectionFieldWithMutableElementType,
        ReasonKind::ArrayTypeInherentlyMutable,
        ReasonKind::AbstractTypeInherentlyMutable,
        ReasonKind::EscapedThisReference,
        ReasonKind::HardcodedResult,
        ReasonKind::CannotAnalyse,
    ];

    pub fn tag(&self) -> &'static str {
        match self {
            ReasonKind::NotDeclaredFinal => "NOT_DECLARED_FINAL",
            ReasonKind::PublishedNonFinalField => "PUBLISHED_NON_FINAL_FIELD",
            ReasonKind::NonFinalField => "NON_FINAL_FIELD",
            ReasonKind::FieldCanBeReassigned => "FIELD_CAN_BE_REASSIGNED",
            ReasonKind::MutableTypeToField => "MUTABLE_TYPE_TO_FIELD",
            ReasonKind::AbstractTypeToField => "ABSTRACT_TYPE_TO_FIELD",
            ReasonKind::AbstractCollectionTypeToField => "ABSTRACT_COLLECTION_TYPE_TO_FIELD",
            ReasonKind::CollectionFieldWithMutableElementType => {
                "COLLECTION_FIELD_WITH_MUTABLE_ELEMENT_TYPE"
            }
            ReasonKind::ArrayTypeInherentlyMutable => "ARRAY_TYPE_INHERENTLY_MUTABLE",
            ReasonKind::AbstractTypeInherentlyMutable => "ABSTRACT_TYPE_INHERENTLY_MUTABLE",
            ReasonKind::EscapedThisReference => "ESCAPED_THIS_REFERENCE",
            ReasonKind::HardcodedResult => "HARDCODED_RESULT",
            ReasonKind::CannotAnalyse => "CANNOT_ANALYSE",
        }
    }

    /// Verdict this kind of reason forces on its own.
    pub fn verdict(&self) -> Verdict {
        match self {
            ReasonKind::NonFinalField => Verdict::EffectivelyImmutable,
            ReasonKind::CannotAnalyse => Verdict::CouldNotAnalyse,
            _ => Verdict::NotImmutable,
        }
    }
}

impl fmt::Display for ReasonKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Where a reason applies. Orders by class name, then field name.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CodeLocation {
    Class {
        class: ClassIdentifier,
    },
    Field {
        class: ClassIdentifier,
        field: String,
    },
}

impl CodeLocation {
    pub fn class(class: ClassIdentifier) -> Self {
        CodeLocation::Class { class }
    }

    pub fn field(class: ClassIdentifier, field: impl Into<String>) -> Self {
        CodeLocation::Field {
            class,
            field: field.into(),
        }
    }

    pub fn owner(&self) -> &ClassIdentifier {
        match self {
            CodeLocation::Class { class } | CodeLocation::Field { class, .. } => class,
        }
    }

    pub fn field_name(&self) -> Option<&str> {
        match self {
            CodeLocation::Class { .. } => None,
            CodeLocation::Field { field, .. } => Some(field),
        }
    }
}

impl Ord for CodeLocation {
    fn cmp(&self, other: &Self) -> Ordering {
        self.owner()
            .cmp(other.owner())
            .then_with(|| self.field_name().cmp(&other.field_name()))
    }
}

impl PartialOrd for CodeLocation {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for CodeLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodeLocation::Class { class } => write!(f, "{class}"),
            CodeLocation::Field { class, field } => write!(f, "{class}.{field}"),
        }
    }
}

/// A named cause contributing to a verdict.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize)]
pub struct Reason {
    pub kind: ReasonKind,
    pub message: String,
    pub location: CodeLocation,
}

impl Reason {
    pub fn new(kind: ReasonKind, message: impl Into<String>, location: CodeLocation) -> Self {
        Self {
            kind,
            message: message.into(),
            location,
        }
    }
}

impl Ord for Reason {
    fn cmp(&self, other: &Self) -> Ordering {
        self.location
            .cmp(&other.location)
            .then_with(|| self.kind.cmp(&other.kind))
            .then_with(|| self.message.cmp(&other.message))
    }
}

impl PartialOrd for Reason {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Verdict for one class plus its sorted, deduplicated reasons.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct AnalysisResult {
    pub class: ClassIdentifier,
    pub verdict: Verdict,
    pub reasons: Vec<Reason>,
}

impl AnalysisResult {
    /// Build a result whose verdict is aggregated from `reasons`.
    pub fn from_reasons(class: ClassIdentifier, reasons: Vec<Reason>) -> Self {
        let reasons = normalize_reasons(reasons);
        let verdict = Verdict::aggregate(&reasons);
        Self {
            class,
            verdict,
            reasons,
        }
    }

    /// Build a result with an explicit verdict, used for configured results.
    pub fn with_verdict(class: ClassIdentifier, verdict: Verdict, reasons: Vec<Reason>) -> Self {
        Self {
            class,
            verdict,
            reasons: normalize_reasons(reasons),
        }
    }

    pub fn immutable(class: ClassIdentifier) -> Self {
        Self::with_verdict(class, Verdict::Immutable, Vec::new())
    }

    pub fn is_immutable(&self) -> bool {
        self.verdict.is_immutable()
    }

    pub fn reasons_of(&self, kind: ReasonKind) -> impl Iterator<Item = &Reason> {
        self.reasons.iter().filter(move |reason| reason.kind == kind)
    }

    pub fn has_reason(&self, kind: ReasonKind) -> bool {
        self.reasons_of(kind).next().is_some()
    }
}

fn normalize_reasons(mut reasons: Vec<Reason>) -> Vec<Reason> {
    reasons.sort();
    reasons.dedup();
    reasons
}
