//! Hierarchy facts for platform types that are normally absent from the
//! analysed classpath.

use crate::ir::AccessFlags;

/// Supertype declaration of a well-known platform type, in internal form.
pub(crate) struct PlatformType {
    pub(crate) name: &'static str,
    pub(crate) super_name: Option<&'static str>,
    pub(crate) interfaces: &'static [&'static str],
    pub(crate) access: u16,
}

const CLASS: u16 = AccessFlags::PUBLIC;
const FINAL: u16 = AccessFlags::PUBLIC | AccessFlags::FINAL;
const ABSTRACT: u16 = AccessFlags::PUBLIC | AccessFlags::ABSTRACT;
const INTERFACE: u16 = AccessFlags::PUBLIC | AccessFlags::INTERFACE | AccessFlags::ABSTRACT;

const OBJECT: Option<&str> = Some("java/lang/Object");

macro_rules! platform {
    ($name:literal, $super:expr, [$($iface:literal),* $(,)?], $access:expr) => {
        PlatformType {
            name: $name,
            super_name: $super,
            interfaces: &[$($iface),*],
            access: $access,
        }
    };
}

pub(crate) const PLATFORM_TYPES: &[PlatformType] = &[
    platform!("java/lang/Object", None, [], CLASS),
    platform!("java/io/Serializable", OBJECT, [], INTERFACE),
    platform!("java/lang/Cloneable", OBJECT, [], INTERFACE),
    platform!("java/lang/Comparable", OBJECT, [], INTERFACE),
    platform!("java/lang/CharSequence", OBJECT, [], INTERFACE),
    platform!("java/lang/Runnable", OBJECT, [], INTERFACE),
    platform!("java/lang/Iterable", OBJECT, [], INTERFACE),
    platform!("java/lang/Record", OBJECT, [], ABSTRACT),
    platform!("java/lang/Enum", OBJECT, ["java/lang/Comparable", "java/io/Serializable"], ABSTRACT),
    platform!("java/lang/Number", OBJECT, ["java/io/Serializable"], ABSTRACT),
    platform!(
        "java/lang/String",
        OBJECT,
        ["java/io/Serializable", "java/lang/Comparable", "java/lang/CharSequence"],
        FINAL
    ),
    platform!("java/lang/Boolean", OBJECT, ["java/io/Serializable", "java/lang/Comparable"], FINAL),
    platform!("java/lang/Character", OBJECT, ["java/io/Serializable", "java/lang/Comparable"], FINAL),
    platform!("java/lang/Byte", Some("java/lang/Number"), ["java/lang/Comparable"], FINAL),
    platform!("java/lang/Short", Some("java/lang/Number"), ["java/lang/Comparable"], FINAL),
    platform!("java/lang/Integer", Some("java/lang/Number"), ["java/lang/Comparable"], FINAL),
    platform!("java/lang/Long", Some("java/lang/Number"), ["java/lang/Comparable"], FINAL),
    platform!("java/lang/Float", Some("java/lang/Number"), ["java/lang/Comparable"], FINAL),
    platform!("java/lang/Double", Some("java/lang/Number"), ["java/lang/Comparable"], FINAL),
    platform!("java/math/BigInteger", Some("java/lang/Number"), ["java/lang/Comparable"], CLASS),
    platform!("java/math/BigDecimal", Some("java/lang/Number"), ["java/lang/Comparable"], CLASS),
    platform!("java/lang/Class", OBJECT, ["java/io/Serializable"], FINAL),
    platform!("java/lang/Thread", OBJECT, ["java/lang/Runnable"], CLASS),
    platform!("java/lang/AbstractStringBuilder", OBJECT, ["java/lang/CharSequence"], ABSTRACT),
    platform!(
        "java/lang/StringBuilder",
        Some("java/lang/AbstractStringBuilder"),
        ["java/io/Serializable", "java/lang/CharSequence"],
        FINAL
    ),
    platform!(
        "java/lang/StringBuffer",
        Some("java/lang/AbstractStringBuilder"),
        ["java/io/Serializable", "java/lang/CharSequence"],
        FINAL
    ),
    platform!("java/util/UUID", OBJECT, ["java/io/Serializable", "java/lang/Comparable"], FINAL),
    platform!("java/util/Date", OBJECT, ["java/io/Serializable", "java/lang/Cloneable", "java/lang/Comparable"], CLASS),
    platform!("java/util/Optional", OBJECT, [], FINAL),
    platform!("java/util/Iterator", OBJECT, [], INTERFACE),
    platform!("java/util/Collection", OBJECT, ["java/lang/Iterable"], INTERFACE),
    platform!("java/util/List", OBJECT, ["java/util/Collection"], INTERFACE),
    platform!("java/util/Set", OBJECT, ["java/util/Collection"], INTERFACE),
    platform!("java/util/SortedSet", OBJECT, ["java/util/Set"], INTERFACE),
    platform!("java/util/NavigableSet", OBJECT, ["java/util/SortedSet"], INTERFACE),
    platform!("java/util/Queue", OBJECT, ["java/util/Collection"], INTERFACE),
    platform!("java/util/Deque", OBJECT, ["java/util/Queue"], INTERFACE),
    platform!("java/util/Map", OBJECT, [], INTERFACE),
    platform!("java/util/SortedMap", OBJECT, ["java/util/Map"], INTERFACE),
    platform!("java/util/NavigableMap", OBJECT, ["java/util/SortedMap"], INTERFACE),
    platform!("java/util/RandomAccess", OBJECT, [], INTERFACE),
    platform!("java/util/AbstractCollection", OBJECT, ["java/util/Collection"], ABSTRACT),
    platform!("java/util/AbstractList", Some("java/util/AbstractCollection"), ["java/util/List"], ABSTRACT),
    platform!(
        "java/util/AbstractSequentialList",
        Some("java/util/AbstractList"),
        [],
        ABSTRACT
    ),
    platform!(
        "java/util/ArrayList",
        Some("java/util/AbstractList"),
        ["java/util/List", "java/util/RandomAccess", "java/lang/Cloneable", "java/io/Serializable"],
        CLASS
    ),
    platform!(
        "java/util/LinkedList",
        Some("java/util/AbstractSequentialList"),
        ["java/util/List", "java/util/Deque", "java/lang/Cloneable", "java/io/Serializable"],
        CLASS
    ),
    platform!("java/util/AbstractSet", Some("java/util/AbstractCollection"), ["java/util/Set"], ABSTRACT),
    platform!(
        "java/util/HashSet",
        Some("java/util/AbstractSet"),
        ["java/util/Set", "java/lang/Cloneable", "java/io/Serializable"],
        CLASS
    ),
    platform!(
        "java/util/LinkedHashSet",
        Some("java/util/HashSet"),
        ["java/util/Set", "java/lang/Cloneable", "java/io/Serializable"],
        CLASS
    ),
    platform!(
        "java/util/TreeSet",
        Some("java/util/AbstractSet"),
        ["java/util/NavigableSet", "java/lang/Cloneable", "java/io/Serializable"],
        CLASS
    ),
    platform!("java/util/AbstractMap", OBJECT, ["java/util/Map"], ABSTRACT),
    platform!(
        "java/util/HashMap",
        Some("java/util/AbstractMap"),
        ["java/util/Map", "java/lang/Cloneable", "java/io/Serializable"],
        CLASS
    ),
    platform!(
        "java/util/LinkedHashMap",
        Some("java/util/HashMap"),
        ["java/util/Map"],
        CLASS
    ),
    platform!(
        "java/util/TreeMap",
        Some("java/util/AbstractMap"),
        ["java/util/NavigableMap", "java/lang/Cloneable", "java/io/Serializable"],
        CLASS
    ),
    platform!("java/util/Collections", OBJECT, [], CLASS),
    platform!("java/util/Locale", OBJECT, ["java/lang/Cloneable", "java/io/Serializable"], FINAL),
    platform!("java/time/Duration", OBJECT, ["java/lang/Comparable", "java/io/Serializable"], FINAL),
    platform!("java/time/Instant", OBJECT, ["java/lang/Comparable", "java/io/Serializable"], FINAL),
    platform!("java/time/LocalDate", OBJECT, ["java/lang/Comparable", "java/io/Serializable"], FINAL),
    platform!("java/time/LocalDateTime", OBJECT, ["java/lang/Comparable", "java/io/Serializable"], FINAL),
    platform!("java/time/LocalTime", OBJECT, ["java/lang/Comparable", "java/io/Serializable"], FINAL),
    platform!("java/time/MonthDay", OBJECT, ["java/lang/Comparable", "java/io/Serializable"], FINAL),
    platform!("java/time/OffsetDateTime", OBJECT, ["java/lang/Comparable", "java/io/Serializable"], FINAL),
    platform!("java/time/OffsetTime", OBJECT, ["java/lang/Comparable", "java/io/Serializable"], FINAL),
    platform!("java/time/Period", OBJECT, ["java/io/Serializable"], FINAL),
    platform!("java/time/Year", OBJECT, ["java/lang/Comparable", "java/io/Serializable"], FINAL),
    platform!("java/time/YearMonth", OBJECT, ["java/lang/Comparable", "java/io/Serializable"], FINAL),
    platform!("java/time/ZoneId", OBJECT, ["java/io/Serializable"], ABSTRACT),
    platform!("java/time/ZoneOffset", Some("java/time/ZoneId"), ["java/lang/Comparable"], FINAL),
    platform!("java/time/ZonedDateTime", OBJECT, ["java/io/Serializable"], FINAL),
];

pub(crate) fn platform_type(internal_name: &str) -> Option<&'static PlatformType> {
    PLATFORM_TYPES
        .iter()
        .find(|platform| platform.name == internal_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_declared_supertype_is_itself_declared() {
        for platform in PLATFORM_TYPES {
            for parent in platform.super_name.iter().chain(platform.interfaces.iter()) {
                assert!(
                    platform_type(parent).is_some(),
                    "{} refers to undeclared {}",
                    platform.name,
                    parent
                );
            }
        }
    }

    #[test]
    fn only_object_has_no_superclass() {
        let roots: Vec<&str> = PLATFORM_TYPES
            .iter()
            .filter(|platform| platform.super_name.is_none())
            .map(|platform| platform.name)
            .collect();
        assert_eq!(vec!["java/lang/Object"], roots);
    }

    #[test]
    fn every_default_platform_verdict_has_a_hierarchy_entry() {
        for name in crate::config::IMMUTABLE_PLATFORM_TYPES
            .iter()
            .chain(crate::config::MUTABLE_PLATFORM_TYPES)
        {
            let internal = name.replace('.', "/");
            assert!(platform_type(&internal).is_some(), "{name} has no hierarchy entry");
        }
    }
}
