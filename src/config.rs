//! Analysis configuration: trusted results and whitelist extensions.

use std::collections::BTreeMap;

use serde::Deserialize;
use thiserror::Error;

use crate::model::{AnalysisResult, CodeLocation, Reason, ReasonKind, Verdict};
use crate::names::ClassIdentifier;

/// Errors raised while building a [`Configuration`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid class name '{name}' in hardcoded results")]
    InvalidClassName { name: String },

    #[error("unknown verdict '{value}' for class '{class}'")]
    UnknownVerdict { class: String, value: String },

    #[error("class '{class}' is configured as both {first} and {second}")]
    ConflictingVerdicts {
        class: ClassIdentifier,
        first: Verdict,
        second: Verdict,
    },

    #[error("invalid whitelist entry '{entry}': expected '<owner>.<method>'")]
    InvalidWhitelistEntry { entry: String },

    #[error("malformed configuration document: {0}")]
    Json(#[from] serde_json::Error),
}

/// Method matched by owner class and name, any descriptor.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MethodPattern {
    pub owner: ClassIdentifier,
    pub name: String,
}

impl MethodPattern {
    fn parse(entry: &str) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::InvalidWhitelistEntry {
            entry: entry.to_string(),
        };
        let (owner, name) = entry.rsplit_once('.').ok_or_else(invalid)?;
        if !is_valid_class_name(owner) || !is_valid_method_name(name) {
            return Err(invalid());
        }
        Ok(Self {
            owner: ClassIdentifier::new(owner),
            name: name.to_string(),
        })
    }

    pub fn matches(&self, owner: &ClassIdentifier, name: &str) -> bool {
        &self.owner == owner && self.name == name
    }
}

/// Settings consulted by the session and the checkers.
#[derive(Clone, Debug)]
pub struct Configuration {
    hardcoded: BTreeMap<ClassIdentifier, Verdict>,
    allow_subclassing: bool,
    extra_copy_methods: Vec<MethodPattern>,
    extra_wrap_methods: Vec<MethodPattern>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            hardcoded: platform_defaults(),
            allow_subclassing: false,
            extra_copy_methods: Vec::new(),
            extra_wrap_methods: Vec::new(),
        }
    }
}

impl Configuration {
    pub fn builder() -> ConfigurationBuilder {
        ConfigurationBuilder::default()
    }

    /// Parse a JSON document layered over the platform defaults.
    pub fn from_json(document: &str) -> Result<Self, ConfigError> {
        let raw: RawConfiguration = serde_json::from_str(document)?;
        let mut builder = Configuration::builder();
        for (class, value) in raw.hardcoded {
            let verdict = value
                .parse::<Verdict>()
                .map_err(|_| ConfigError::UnknownVerdict {
                    class: class.clone(),
                    value: value.clone(),
                })?;
            builder = builder.hardcode(class, verdict);
        }
        if let Some(allow) = raw.allow_subclassing {
            builder = builder.allow_subclassing(allow);
        }
        for entry in raw.extra_copy_methods {
            builder = builder.copy_method(entry);
        }
        for entry in raw.extra_wrap_methods {
            builder = builder.wrap_method(entry);
        }
        builder.build()
    }

    pub fn hardcoded_verdict(&self, class: &ClassIdentifier) -> Option<Verdict> {
        self.hardcoded.get(class).copied()
    }

    /// Trusted result for `class`, if one is configured.
    pub fn hardcoded_result(&self, class: &ClassIdentifier) -> Option<AnalysisResult> {
        let verdict = self.hardcoded_verdict(class)?;
        if verdict.is_immutable() {
            return Some(AnalysisResult::immutable(class.clone()));
        }
        let reason = Reason::new(
            ReasonKind::HardcodedResult,
            format!("{class} is configured as {verdict}."),
            CodeLocation::class(class.clone()),
        );
        Some(AnalysisResult::with_verdict(
            class.clone(),
            verdict,
            vec![reason],
        ))
    }

    pub fn allow_subclassing(&self) -> bool {
        self.allow_subclassing
    }

    pub fn with_allow_subclassing(mut self, allow: bool) -> Self {
        self.allow_subclassing = allow;
        self
    }

    pub fn extra_copy_methods(&self) -> &[MethodPattern] {
        &self.extra_copy_methods
    }

    pub fn extra_wrap_methods(&self) -> &[MethodPattern] {
        &self.extra_wrap_methods
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfiguration {
    #[serde(default)]
    hardcoded: BTreeMap<String, String>,
    #[serde(default)]
    allow_subclassing: Option<bool>,
    #[serde(default)]
    extra_copy_methods: Vec<String>,
    #[serde(default)]
    extra_wrap_methods: Vec<String>,
}

/// Collects settings and validates them in [`ConfigurationBuilder::build`].
#[derive(Debug)]
pub struct ConfigurationBuilder {
    base: BTreeMap<ClassIdentifier, Verdict>,
    hardcoded: Vec<(String, Verdict)>,
    allow_subclassing: bool,
    copy_methods: Vec<String>,
    wrap_methods: Vec<String>,
}

impl Default for ConfigurationBuilder {
    fn default() -> Self {
        Self {
            base: platform_defaults(),
            hardcoded: Vec::new(),
            allow_subclassing: false,
            copy_methods: Vec::new(),
            wrap_methods: Vec::new(),
        }
    }
}

impl ConfigurationBuilder {
    /// Start without the platform defaults.
    pub fn empty() -> Self {
        Self {
            base: BTreeMap::new(),
            ..Self::default()
        }
    }

    pub fn hardcode(mut self, class: impl Into<String>, verdict: Verdict) -> Self {
        self.hardcoded.push((class.into(), verdict));
        self
    }

    pub fn allow_subclassing(mut self, allow: bool) -> Self {
        self.allow_subclassing = allow;
        self
    }

    pub fn copy_method(mut self, entry: impl Into<String>) -> Self {
        self.copy_methods.push(entry.into());
        self
    }

    pub fn wrap_method(mut self, entry: impl Into<String>) -> Self {
        self.wrap_methods.push(entry.into());
        self
    }

    pub fn build(self) -> Result<Configuration, ConfigError> {
        let mut hardcoded = self.base;
        let mut configured: BTreeMap<ClassIdentifier, Verdict> = BTreeMap::new();
        for (name, verdict) in self.hardcoded {
            if !is_valid_class_name(&name) {
                return Err(ConfigError::InvalidClassName { name });
            }
            let class = ClassIdentifier::new(&name);
            if let Some(first) = configured.insert(class.clone(), verdict) {
                if first != verdict {
                    return Err(ConfigError::ConflictingVerdicts {
                        class,
                        first,
                        second: verdict,
                    });
                }
            }
            hardcoded.insert(class, verdict);
        }
        Ok(Configuration {
            hardcoded,
            allow_subclassing: self.allow_subclassing,
            extra_copy_methods: parse_patterns(&self.copy_methods)?,
            extra_wrap_methods: parse_patterns(&self.wrap_methods)?,
        })
    }
}

fn parse_patterns(entries: &[String]) -> Result<Vec<MethodPattern>, ConfigError> {
    entries
        .iter()
        .map(|entry| MethodPattern::parse(entry))
        .collect()
}

/// Accepts dotted or internal names, with `$` for nested classes.
fn is_valid_class_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .split(['.', '/'])
            .all(|segment| is_java_identifier(segment))
}

fn is_valid_method_name(name: &str) -> bool {
    name == "<init>" || is_java_identifier(name)
}

fn is_java_identifier(segment: &str) -> bool {
    let mut chars = segment.chars();
    match chars.next() {
        Some(first) if first.is_alphabetic() || first == '_' || first == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}

pub(crate) const IMMUTABLE_PLATFORM_TYPES: &[&str] = &[
    "java.lang.String",
    "java.lang.Boolean",
    "java.lang.Byte",
    "java.lang.Character",
    "java.lang.Short",
    "java.lang.Integer",
    "java.lang.Long",
    "java.lang.Float",
    "java.lang.Double",
    "java.lang.Enum",
    "java.lang.Class",
    "java.math.BigInteger",
    "java.math.BigDecimal",
    "java.util.UUID",
    "java.util.Locale",
    "java.time.Duration",
    "java.time.Instant",
    "java.time.LocalDate",
    "java.time.LocalDateTime",
    "java.time.LocalTime",
    "java.time.MonthDay",
    "java.time.OffsetDateTime",
    "java.time.OffsetTime",
    "java.time.Period",
    "java.time.Year",
    "java.time.YearMonth",
    "java.time.ZoneId",
    "java.time.ZoneOffset",
    "java.time.ZonedDateTime",
];

pub(crate) const MUTABLE_PLATFORM_TYPES: &[&str] = &[
    "java.lang.Object",
    "java.lang.StringBuffer",
    "java.lang.StringBuilder",
    "java.util.ArrayList",
    "java.util.Date",
    "java.util.HashMap",
    "java.util.HashSet",
    "java.util.LinkedHashMap",
    "java.util.LinkedHashSet",
    "java.util.LinkedList",
    "java.util.TreeMap",
    "java.util.TreeSet",
];

fn platform_defaults() -> BTreeMap<ClassIdentifier, Verdict> {
    let immutable = IMMUTABLE_PLATFORM_TYPES
        .iter()
        .map(|name| (ClassIdentifier::new(name), Verdict::Immutable));
    let mutable = MUTABLE_PLATFORM_TYPES
        .iter()
        .map(|name| (ClassIdentifier::new(name), Verdict::NotImmutable));
    immutable.chain(mutable).collect()
}
