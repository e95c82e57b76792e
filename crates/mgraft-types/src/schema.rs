//! Table-driven class and property descriptors.
//!
//! The transformer never hard-codes a class layout: at startup it reads the
//! `ec_Schema`/`ec_Class`/`ec_Property` catalog and lowers every concrete
//! class into a [`ClassDescriptor`]: the ordered property list plus the
//! chain of physical tables the class's rows span. The hot loop dispatches
//! on [`PropertyKind`] only.

use std::fmt;
use std::str::FromStr;

use crate::id::EntityKind;

/// Fully qualified class name, `Schema:Class`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct ClassFullName {
    /// Schema name, e.g. `BisCore`.
    pub schema: String,
    /// Class name within the schema.
    pub name: String,
}

impl ClassFullName {
    /// Create a full name from its two parts.
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ClassFullName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.schema, self.name)
    }
}

impl FromStr for ClassFullName {
    type Err = InvalidClassName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (schema, name) = s.split_once(':').ok_or(InvalidClassName)?;
        if schema.is_empty() || name.is_empty() {
            return Err(InvalidClassName);
        }
        Ok(Self::new(schema, name))
    }
}

/// Error returned when parsing a class name without a `Schema:Class` shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidClassName;

impl fmt::Display for InvalidClassName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("class name must be of the form Schema:Class")
    }
}

impl std::error::Error for InvalidClassName {}

/// The storage kind of a property, as recorded in the `ec_Property` catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyKind {
    /// Scalar stored in a single column (text, integer, real, boolean).
    Primitive,
    /// Id-typed 64-bit integer; remapped like a reference.
    Long,
    /// 2D point stored as `<Name>X`, `<Name>Y`.
    Point2d,
    /// 3D point stored as `<Name>X`, `<Name>Y`, `<Name>Z`.
    Point3d,
    /// Opaque BLOB column.
    Binary,
    /// Typed reference stored as `<Name>Id`, `<Name>RelECClassId`.
    Navigation,
    /// Opaque geometry BLOB with embedded element and font ids.
    GeometryStream,
    /// Unsupported: primitive array.
    Array,
    /// Unsupported: embedded struct.
    Struct,
    /// Unsupported: struct array.
    StructArray,
}

impl PropertyKind {
    /// Catalog text form (the `ec_Property.Kind` column).
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Primitive => "primitive",
            Self::Long => "long",
            Self::Point2d => "point2d",
            Self::Point3d => "point3d",
            Self::Binary => "binary",
            Self::Navigation => "navigation",
            Self::GeometryStream => "geometry",
            Self::Array => "array",
            Self::Struct => "struct",
            Self::StructArray => "structarray",
        }
    }

    /// Parse the catalog text form.
    pub fn parse(text: &str) -> Option<Self> {
        Some(match text {
            "primitive" => Self::Primitive,
            "long" => Self::Long,
            "point2d" => Self::Point2d,
            "point3d" => Self::Point3d,
            "binary" => Self::Binary,
            "navigation" => Self::Navigation,
            "geometry" => Self::GeometryStream,
            "array" => Self::Array,
            "struct" => Self::Struct,
            "structarray" => Self::StructArray,
            _ => return None,
        })
    }

    /// Whether rows of this kind can be lowered into SQL at all.
    pub const fn is_supported(self) -> bool {
        !matches!(self, Self::Array | Self::Struct | Self::StructArray)
    }
}

impl fmt::Display for PropertyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Extended type name marking a Long property that holds a font id.
pub const EXT_TYPE_FONT_ID: &str = "FontId";

/// Extended type name marking a Primitive text property holding JSON.
/// Such properties are projected as parsed JSON so embedded entity
/// references can be rewritten in place.
pub const EXT_TYPE_JSON: &str = "Json";

/// One property of a class, lowered to its column mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyDescriptor {
    /// Property name; also the JSON projection key.
    pub name: String,
    /// Storage kind.
    pub kind: PropertyKind,
    /// Extended type name, e.g. [`EXT_TYPE_FONT_ID`].
    pub extended_type: Option<String>,
    /// For navigation properties: the entity kind the reference points to,
    /// resolved from the target class's root at catalog load time.
    pub nav_target: Option<EntityKind>,
    /// Whether the column carries a NOT NULL constraint. Decides the
    /// placeholder used during the populate pass.
    pub not_null: bool,
}

impl PropertyDescriptor {
    /// Column holding the id of a navigation property.
    pub fn id_column(&self) -> String {
        format!("{}Id", self.name)
    }

    /// Column holding the relationship class id of a navigation property.
    pub fn rel_class_column(&self) -> String {
        format!("{}RelECClassId", self.name)
    }

    /// Point component column (`axis` is `"X"`, `"Y"`, or `"Z"`).
    pub fn point_column(&self, axis: &str) -> String {
        format!("{}{}", self.name, axis)
    }
}

/// One physical table in a class's footprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassTable {
    /// Physical table name, e.g. `bis_Element` or `bis_GeometricElement3d`.
    pub name: String,
    /// Whether this is the shared root table (`bis_Element`, `bis_Model`,
    /// `bis_ElementAspect`, or a link table). Root tables key rows by `Id`
    /// and carry the `ECClassId` discriminator; joined class tables key by
    /// `ECInstanceId`.
    pub is_root: bool,
    /// Properties declared by the class owning this table, in catalog order.
    pub props: Vec<PropertyDescriptor>,
}

/// A concrete class lowered for the hot loop: identity, entity kind, and
/// the root-first chain of physical tables its rows span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassDescriptor {
    /// The class id in the *source* catalog.
    pub id: i64,
    /// Fully qualified name.
    pub full_name: ClassFullName,
    /// Entity kind from the root of the base-class chain, if the root is a
    /// known one.
    pub kind: Option<EntityKind>,
    /// Physical tables, root first, then ancestor class tables in
    /// inheritance order.
    pub tables: Vec<ClassTable>,
}

impl ClassDescriptor {
    /// All properties across the table chain, in chain order.
    pub fn all_props(&self) -> impl Iterator<Item = &PropertyDescriptor> {
        self.tables.iter().flat_map(|t| t.props.iter())
    }

    /// Look up a property by name anywhere in the chain.
    pub fn prop(&self, name: &str) -> Option<&PropertyDescriptor> {
        self.all_props().find(|p| p.name == name)
    }

    /// The geometry-stream property, if the class has one.
    pub fn geometry_prop(&self) -> Option<&PropertyDescriptor> {
        self.all_props()
            .find(|p| p.kind == PropertyKind::GeometryStream)
    }
}
