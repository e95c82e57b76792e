//! 64-bit entity identifiers and polymorphic entity references.
//!
//! Every row in a model database is addressed by a 64-bit integer id. The
//! value `0` is invalid. Ids render as lowercase hex text (`0x1c`) in JSON
//! projections and parse back through [`EcId::from_hex`]. SQLite stores ids
//! in INTEGER columns; [`EcId::as_i64`]/[`EcId::from_i64`] bit-cast between
//! the unsigned id space and the signed column type.

use std::fmt;
use std::str::FromStr;

/// A 64-bit entity identifier.
///
/// Ids embed a 24-bit briefcase prefix in the high bits; the low 40 bits are
/// the locally-allocated part. `0` is the invalid id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct EcId(u64);

impl EcId {
    /// The invalid id. Remap tables map it to itself.
    pub const INVALID: Self = Self(0);

    /// The root subject element, present in every model database.
    pub const ROOT_SUBJECT: Self = Self(0x1);

    /// The reality-sources link partition element.
    pub const REALITY_SOURCES_PARTITION: Self = Self(0xe);

    /// The dictionary model (and its modeled partition element).
    pub const DICTIONARY_MODEL: Self = Self(0x10);

    /// Well-known roots that must map identity-to-identity in every
    /// transform.
    pub const WELL_KNOWN: [Self; 3] = [
        Self::ROOT_SUBJECT,
        Self::REALITY_SOURCES_PARTITION,
        Self::DICTIONARY_MODEL,
    ];

    /// Number of bits in the locally-allocated part of an id.
    pub const LOCAL_BITS: u32 = 40;

    /// Mask selecting the locally-allocated part of an id.
    pub const LOCAL_MASK: u64 = (1 << Self::LOCAL_BITS) - 1;

    /// Create an id from its raw value. `0` yields [`EcId::INVALID`].
    #[inline]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw 64-bit value.
    #[inline]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Whether this id is valid (non-zero).
    #[inline]
    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }

    /// The briefcase prefix (high 24 bits).
    #[inline]
    pub const fn briefcase_base(self) -> u64 {
        self.0 & !Self::LOCAL_MASK
    }

    /// The locally-allocated part (low 40 bits).
    #[inline]
    pub const fn local_part(self) -> u64 {
        self.0 & Self::LOCAL_MASK
    }

    /// Bit-cast to the signed representation used by SQLite INTEGER columns.
    #[inline]
    #[allow(clippy::cast_possible_wrap)]
    pub const fn as_i64(self) -> i64 {
        self.0 as i64
    }

    /// Bit-cast from the signed representation used by SQLite INTEGER
    /// columns.
    #[inline]
    #[allow(clippy::cast_sign_loss)]
    pub const fn from_i64(v: i64) -> Self {
        Self(v as u64)
    }

    /// Parse the hex text form (`0x1c`, case-insensitive digits).
    ///
    /// Returns `None` for anything else, including a bare decimal number.
    pub fn from_hex(text: &str) -> Option<Self> {
        let digits = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X"))?;
        if digits.is_empty() || digits.len() > 16 {
            return None;
        }
        u64::from_str_radix(digits, 16).ok().map(Self)
    }

    /// The hex text form (`0x1c`).
    pub fn to_hex(self) -> String {
        format!("{self}")
    }
}

impl fmt::Display for EcId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

impl From<u64> for EcId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl FromStr for EcId {
    type Err = InvalidIdText;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s).ok_or(InvalidIdText)
    }
}

/// Error returned when parsing an id from malformed hex text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidIdText;

impl fmt::Display for InvalidIdText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("id text must be of the form 0x<hex>")
    }
}

impl std::error::Error for InvalidIdText {}

impl serde::Serialize for EcId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for EcId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct IdVisitor;

        impl serde::de::Visitor<'_> for IdVisitor {
            type Value = EcId;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a hex id string like \"0x1c\" or an unsigned integer")
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<EcId, E> {
                EcId::from_hex(v).ok_or_else(|| E::custom(InvalidIdText))
            }

            fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<EcId, E> {
                Ok(EcId::new(v))
            }

            fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<EcId, E> {
                Ok(EcId::from_i64(v))
            }
        }

        deserializer.deserialize_any(IdVisitor)
    }
}

/// The kind of entity an id refers to.
///
/// A navigation column stores only the numeric id; the kind comes from
/// schema metadata, never from the value itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    /// A row in the element table.
    Element,
    /// A row in the model table (shares its id with the modeled element).
    Model,
    /// A satellite row owned by one element.
    Aspect,
    /// A typed edge stored in a link table.
    Relationship,
    /// A named row defining code-scope semantics.
    CodeSpec,
}

impl EntityKind {
    /// Single-letter wire form used in kind columns and log output.
    pub const fn letter(self) -> char {
        match self {
            Self::Element => 'e',
            Self::Model => 'm',
            Self::Aspect => 'a',
            Self::Relationship => 'r',
            Self::CodeSpec => 'c',
        }
    }

    /// Parse the single-letter wire form.
    pub const fn from_letter(c: char) -> Option<Self> {
        match c {
            'e' => Some(Self::Element),
            'm' => Some(Self::Model),
            'a' => Some(Self::Aspect),
            'r' => Some(Self::Relationship),
            'c' => Some(Self::CodeSpec),
            _ => None,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

/// A typed reference to a row: the entity kind plus its id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct EntityRef {
    /// Which table family the id lives in.
    pub kind: EntityKind,
    /// The referenced id; may be invalid.
    pub id: EcId,
}

impl EntityRef {
    /// Create a reference.
    pub const fn new(kind: EntityKind, id: EcId) -> Self {
        Self { kind, id }
    }

    /// An invalid reference of the given kind.
    pub const fn invalid(kind: EntityKind) -> Self {
        Self {
            kind,
            id: EcId::INVALID,
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}
