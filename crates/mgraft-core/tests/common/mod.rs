//! Test fixture: builds real model databases with the catalog and data
//! tables the transformer operates on.
//!
//! Both databases carry the `BisCore` root classes plus a small
//! `TestDomain` schema (`Widget`, `WidgetAspect`) with joined class
//! tables, and are seeded with the well-known root rows (`0x1`, `0xe`,
//! `0x10`).

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use mgraft_core::{EcId, EntityKind, Transformer};
use rusqlite::Connection;

// Class ids, identical in source and target fixtures.
pub const CLS_ELEMENT: i64 = 1;
pub const CLS_MODEL: i64 = 2;
pub const CLS_UNIQUE_ASPECT: i64 = 3;
pub const CLS_MULTI_ASPECT: i64 = 4;
pub const CLS_CODE_SPEC: i64 = 5;
pub const CLS_REFERS: i64 = 6;
pub const CLS_DRIVES: i64 = 7;
pub const CLS_SUBJECT: i64 = 8;
pub const CLS_LINK_PARTITION: i64 = 9;
pub const CLS_DEFINITION_PARTITION: i64 = 10;
pub const CLS_REPOSITORY_MODEL: i64 = 11;
pub const CLS_LINK_MODEL: i64 = 12;
pub const CLS_DICTIONARY_MODEL: i64 = 13;
pub const CLS_PHYSICAL_MODEL: i64 = 14;
pub const CLS_PHYSICAL_PARTITION: i64 = 15;
pub const CLS_GEOMETRIC_3D: i64 = 16;
pub const CLS_PHYSICAL_OBJECT: i64 = 17;
pub const CLS_GEOMETRY_PART: i64 = 18;
pub const CLS_SPATIAL_CATEGORY: i64 = 19;
pub const CLS_DISPLAY_STYLE: i64 = 20;
pub const CLS_EXTERNAL_SOURCE_ASPECT: i64 = 21;
pub const CLS_GROUPS_MEMBERS: i64 = 22;
pub const CLS_WIDGET: i64 = 23;
pub const CLS_WIDGET_ASPECT: i64 = 24;

const SCHEMA_SQL: &str = "
CREATE TABLE ec_Schema (Id INTEGER PRIMARY KEY, Name TEXT NOT NULL UNIQUE, Alias TEXT NOT NULL);
CREATE TABLE ec_Class (
    Id INTEGER PRIMARY KEY,
    SchemaId INTEGER NOT NULL,
    Name TEXT NOT NULL,
    BaseClassId INTEGER,
    TableName TEXT,
    UNIQUE (SchemaId, Name)
);
CREATE TABLE ec_Property (
    Id INTEGER PRIMARY KEY,
    ClassId INTEGER NOT NULL,
    Ord INTEGER NOT NULL,
    Name TEXT NOT NULL,
    Kind TEXT NOT NULL,
    ExtendedType TEXT,
    NavTargetClassId INTEGER,
    [NotNull] INTEGER NOT NULL DEFAULT 0,
    UNIQUE (ClassId, Name)
);
CREATE TABLE be_Local (Name TEXT PRIMARY KEY, Val);
CREATE TABLE bis_CodeSpec (Id INTEGER PRIMARY KEY, Name TEXT NOT NULL UNIQUE, JsonProperties TEXT);
CREATE TABLE dgn_Font (Id INTEGER PRIMARY KEY, Type INTEGER NOT NULL DEFAULT 0, Name TEXT NOT NULL);
CREATE TABLE bis_Element (
    Id INTEGER PRIMARY KEY,
    ECClassId INTEGER NOT NULL,
    ModelId INTEGER NOT NULL,
    ModelRelECClassId INTEGER,
    ParentId INTEGER,
    ParentRelECClassId INTEGER,
    CodeSpecId INTEGER,
    CodeSpecRelECClassId INTEGER,
    CodeScopeId INTEGER,
    CodeScopeRelECClassId INTEGER,
    CodeValue TEXT,
    FederationGuid BLOB,
    UserLabel TEXT,
    JsonProperties TEXT
);
CREATE UNIQUE INDEX ux_element_code
    ON bis_Element (CodeSpecId, CodeScopeId, CodeValue)
    WHERE CodeSpecId IS NOT NULL;
CREATE TABLE bis_Model (
    Id INTEGER PRIMARY KEY,
    ECClassId INTEGER NOT NULL,
    ParentModelId INTEGER,
    ParentModelRelECClassId INTEGER,
    IsPrivate INTEGER,
    JsonProperties TEXT
);
CREATE TABLE bis_ElementAspect (
    Id INTEGER PRIMARY KEY,
    ECClassId INTEGER NOT NULL,
    ElementId INTEGER NOT NULL,
    ElementRelECClassId INTEGER
);
CREATE TABLE bis_ElementRefersToElements (
    Id INTEGER PRIMARY KEY,
    ECClassId INTEGER NOT NULL,
    SourceId INTEGER NOT NULL,
    SourceECClassId INTEGER NOT NULL,
    TargetId INTEGER NOT NULL,
    TargetECClassId INTEGER NOT NULL
);
CREATE TABLE bis_ElementDrivesElement (
    Id INTEGER PRIMARY KEY,
    ECClassId INTEGER NOT NULL,
    SourceId INTEGER NOT NULL,
    SourceECClassId INTEGER NOT NULL,
    TargetId INTEGER NOT NULL,
    TargetECClassId INTEGER NOT NULL,
    Status INTEGER,
    Priority INTEGER
);
CREATE TABLE bis_GeometricElement3d (
    ECInstanceId INTEGER PRIMARY KEY,
    CategoryId INTEGER,
    CategoryRelECClassId INTEGER,
    OriginX REAL,
    OriginY REAL,
    OriginZ REAL,
    GeometryStream BLOB
);
CREATE TABLE bis_GeometryPart (
    ECInstanceId INTEGER PRIMARY KEY,
    GeometryStream BLOB
);
CREATE TABLE td_Widget (
    ECInstanceId INTEGER PRIMARY KEY,
    Rating REAL,
    TargetId INTEGER,
    TargetRelECClassId INTEGER,
    LinkedPart INTEGER,
    TextFont INTEGER
);
CREATE TABLE td_WidgetAspect (
    ECInstanceId INTEGER PRIMARY KEY,
    Payload TEXT,
    RefId INTEGER,
    RefRelECClassId INTEGER
);
";

const CATALOG_SQL: &str = "
INSERT INTO ec_Schema VALUES (1, 'BisCore', 'bis'), (2, 'TestDomain', 'td');
INSERT INTO ec_Class VALUES (1, 1, 'Element', NULL, 'bis_Element');
INSERT INTO ec_Class VALUES (2, 1, 'Model', NULL, 'bis_Model');
INSERT INTO ec_Class VALUES (3, 1, 'ElementUniqueAspect', NULL, 'bis_ElementAspect');
INSERT INTO ec_Class VALUES (4, 1, 'ElementMultiAspect', NULL, 'bis_ElementAspect');
INSERT INTO ec_Class VALUES (5, 1, 'CodeSpec', NULL, NULL);
INSERT INTO ec_Class VALUES (6, 1, 'ElementRefersToElements', NULL, 'bis_ElementRefersToElements');
INSERT INTO ec_Class VALUES (7, 1, 'ElementDrivesElement', NULL, 'bis_ElementDrivesElement');
INSERT INTO ec_Class VALUES (8, 1, 'Subject', 1, NULL);
INSERT INTO ec_Class VALUES (9, 1, 'LinkPartition', 1, NULL);
INSERT INTO ec_Class VALUES (10, 1, 'DefinitionPartition', 1, NULL);
INSERT INTO ec_Class VALUES (11, 1, 'RepositoryModel', 2, NULL);
INSERT INTO ec_Class VALUES (12, 1, 'LinkModel', 2, NULL);
INSERT INTO ec_Class VALUES (13, 1, 'DictionaryModel', 2, NULL);
INSERT INTO ec_Class VALUES (14, 1, 'PhysicalModel', 2, NULL);
INSERT INTO ec_Class VALUES (15, 1, 'PhysicalPartition', 1, NULL);
INSERT INTO ec_Class VALUES (16, 1, 'GeometricElement3d', 1, 'bis_GeometricElement3d');
INSERT INTO ec_Class VALUES (17, 1, 'PhysicalObject', 16, NULL);
INSERT INTO ec_Class VALUES (18, 1, 'GeometryPart', 1, 'bis_GeometryPart');
INSERT INTO ec_Class VALUES (19, 1, 'SpatialCategory', 1, NULL);
INSERT INTO ec_Class VALUES (20, 1, 'DisplayStyle', 1, NULL);
INSERT INTO ec_Class VALUES (21, 1, 'ExternalSourceAspect', 4, NULL);
INSERT INTO ec_Class VALUES (22, 1, 'ElementGroupsMembers', 6, NULL);
INSERT INTO ec_Class VALUES (23, 2, 'Widget', 1, 'td_Widget');
INSERT INTO ec_Class VALUES (24, 2, 'WidgetAspect', 4, 'td_WidgetAspect');

INSERT INTO ec_Property VALUES (1,  1, 0, 'Model', 'navigation', NULL, 2, 1);
INSERT INTO ec_Property VALUES (2,  1, 1, 'Parent', 'navigation', NULL, 1, 0);
INSERT INTO ec_Property VALUES (3,  1, 2, 'CodeSpec', 'navigation', NULL, 5, 0);
INSERT INTO ec_Property VALUES (4,  1, 3, 'CodeScope', 'navigation', NULL, 1, 0);
INSERT INTO ec_Property VALUES (5,  1, 4, 'CodeValue', 'primitive', NULL, NULL, 0);
INSERT INTO ec_Property VALUES (6,  1, 5, 'FederationGuid', 'binary', NULL, NULL, 0);
INSERT INTO ec_Property VALUES (7,  1, 6, 'UserLabel', 'primitive', NULL, NULL, 0);
INSERT INTO ec_Property VALUES (8,  1, 7, 'JsonProperties', 'primitive', 'Json', NULL, 0);
INSERT INTO ec_Property VALUES (9,  2, 0, 'ParentModel', 'navigation', NULL, 2, 0);
INSERT INTO ec_Property VALUES (10, 2, 1, 'IsPrivate', 'primitive', NULL, NULL, 0);
INSERT INTO ec_Property VALUES (11, 2, 2, 'JsonProperties', 'primitive', 'Json', NULL, 0);
INSERT INTO ec_Property VALUES (12, 3, 0, 'Element', 'navigation', NULL, 1, 1);
INSERT INTO ec_Property VALUES (13, 4, 0, 'Element', 'navigation', NULL, 1, 1);
INSERT INTO ec_Property VALUES (14, 7, 0, 'Status', 'primitive', NULL, NULL, 0);
INSERT INTO ec_Property VALUES (15, 7, 1, 'Priority', 'primitive', NULL, NULL, 0);
INSERT INTO ec_Property VALUES (16, 16, 0, 'Category', 'navigation', NULL, 19, 0);
INSERT INTO ec_Property VALUES (17, 16, 1, 'Origin', 'point3d', NULL, NULL, 0);
INSERT INTO ec_Property VALUES (18, 16, 2, 'GeometryStream', 'geometry', NULL, NULL, 0);
INSERT INTO ec_Property VALUES (19, 18, 0, 'GeometryStream', 'geometry', NULL, NULL, 0);
INSERT INTO ec_Property VALUES (20, 23, 0, 'Rating', 'primitive', NULL, NULL, 0);
INSERT INTO ec_Property VALUES (21, 23, 1, 'Target', 'navigation', NULL, 1, 0);
INSERT INTO ec_Property VALUES (22, 23, 2, 'LinkedPart', 'long', NULL, NULL, 0);
INSERT INTO ec_Property VALUES (23, 23, 3, 'TextFont', 'long', 'FontId', NULL, 0);
INSERT INTO ec_Property VALUES (24, 24, 0, 'Payload', 'primitive', NULL, NULL, 0);
INSERT INTO ec_Property VALUES (25, 24, 1, 'Ref', 'navigation', NULL, 1, 0);
";

const WELL_KNOWN_SQL: &str = "
INSERT INTO bis_Element (Id, ECClassId, ModelId, UserLabel)
    VALUES (0x1, 8, 0x1, 'root subject');
INSERT INTO bis_Element (Id, ECClassId, ModelId, ParentId, UserLabel)
    VALUES (0xe, 9, 0x1, 0x1, 'reality sources');
INSERT INTO bis_Element (Id, ECClassId, ModelId, ParentId, UserLabel)
    VALUES (0x10, 10, 0x1, 0x1, 'dictionary');
INSERT INTO bis_Model (Id, ECClassId) VALUES (0x1, 11);
INSERT INTO bis_Model (Id, ECClassId) VALUES (0xe, 12);
INSERT INTO bis_Model (Id, ECClassId) VALUES (0x10, 13);
INSERT INTO be_Local (Name, Val) VALUES ('bis_elementidsequence', 0x10);
INSERT INTO be_Local (Name, Val) VALUES ('ec_instanceidsequence', 0);
";

/// One fixture database on disk (attachable by path).
pub struct ModelDb {
    pub path: PathBuf,
    pub conn: Connection,
}

impl ModelDb {
    /// Create a fresh model database at `path`.
    pub fn create(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(&path).expect("open fixture db");
        conn.execute_batch(SCHEMA_SQL).expect("fixture schema");
        conn.execute_batch(CATALOG_SQL).expect("fixture catalog");
        conn.execute_batch(WELL_KNOWN_SQL).expect("fixture roots");
        Self { path, conn }
    }

    /// Set the database identity GUID (`be_Local` `dbguid`).
    pub fn set_db_guid(&self, guid: &str) {
        self.conn
            .execute(
                "INSERT INTO be_Local (Name, Val) VALUES ('dbguid', ?1) \
                 ON CONFLICT(Name) DO UPDATE SET Val = excluded.Val",
                [guid],
            )
            .unwrap();
    }

    /// Insert a bare element row.
    #[allow(clippy::too_many_arguments)]
    pub fn insert_element(
        &self,
        id: i64,
        class: i64,
        model: i64,
        parent: Option<i64>,
        code: Option<(i64, i64, &str)>,
        label: Option<&str>,
        json_props: Option<&str>,
    ) {
        let (spec, scope, value) = match code {
            Some((spec, scope, value)) => (Some(spec), Some(scope), Some(value)),
            None => (None, None, None),
        };
        self.conn
            .execute(
                "INSERT INTO bis_Element \
                 (Id, ECClassId, ModelId, ParentId, CodeSpecId, CodeScopeId, CodeValue, \
                  UserLabel, JsonProperties) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                rusqlite::params![id, class, model, parent, spec, scope, value, label, json_props],
            )
            .unwrap();
    }

    /// Set an element's federation GUID.
    pub fn set_federation_guid(&self, id: i64, guid: &[u8]) {
        self.conn
            .execute(
                "UPDATE bis_Element SET FederationGuid = ?1 WHERE Id = ?2",
                rusqlite::params![guid, id],
            )
            .unwrap();
    }

    /// Insert a widget element (element row plus `td_Widget` class row).
    #[allow(clippy::too_many_arguments)]
    pub fn insert_widget(
        &self,
        id: i64,
        model: i64,
        parent: Option<i64>,
        rating: f64,
        target: Option<i64>,
        linked_part: Option<i64>,
        font: Option<i64>,
    ) {
        self.insert_element(id, CLS_WIDGET, model, parent, None, None, None);
        self.conn
            .execute(
                "INSERT INTO td_Widget (ECInstanceId, Rating, TargetId, LinkedPart, TextFont) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![id, rating, target, linked_part, font],
            )
            .unwrap();
    }

    /// Insert a model row sharing `id` with its modeled element.
    pub fn insert_model(&self, id: i64, class: i64, parent_model: Option<i64>) {
        self.conn
            .execute(
                "INSERT INTO bis_Model (Id, ECClassId, ParentModelId, IsPrivate) \
                 VALUES (?1, ?2, ?3, 0)",
                rusqlite::params![id, class, parent_model],
            )
            .unwrap();
    }

    /// Insert an aspect root row.
    pub fn insert_aspect(&self, id: i64, class: i64, element: i64) {
        self.conn
            .execute(
                "INSERT INTO bis_ElementAspect (Id, ECClassId, ElementId) VALUES (?1, ?2, ?3)",
                rusqlite::params![id, class, element],
            )
            .unwrap();
    }

    /// Insert a widget aspect (root row plus `td_WidgetAspect` class row).
    pub fn insert_widget_aspect(
        &self,
        id: i64,
        element: i64,
        payload: &str,
        reference: Option<i64>,
    ) {
        self.insert_aspect(id, CLS_WIDGET_ASPECT, element);
        self.conn
            .execute(
                "INSERT INTO td_WidgetAspect (ECInstanceId, Payload, RefId) VALUES (?1, ?2, ?3)",
                rusqlite::params![id, payload, reference],
            )
            .unwrap();
    }

    /// Insert an `ElementRefersToElements` row.
    pub fn insert_refers(&self, id: i64, class: i64, source: i64, target: i64) {
        let source_class = self.element_class(source);
        let target_class = self.element_class(target);
        self.conn
            .execute(
                "INSERT INTO bis_ElementRefersToElements \
                 (Id, ECClassId, SourceId, SourceECClassId, TargetId, TargetECClassId) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![id, class, source, source_class, target, target_class],
            )
            .unwrap();
    }

    /// Insert an `ElementDrivesElement` row.
    pub fn insert_drives(&self, id: i64, source: i64, target: i64, status: i64, priority: i64) {
        let source_class = self.element_class(source);
        let target_class = self.element_class(target);
        self.conn
            .execute(
                "INSERT INTO bis_ElementDrivesElement \
                 (Id, ECClassId, SourceId, SourceECClassId, TargetId, TargetECClassId, \
                  Status, Priority) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    id,
                    CLS_DRIVES,
                    source,
                    source_class,
                    target,
                    target_class,
                    status,
                    priority
                ],
            )
            .unwrap();
    }

    /// Insert a codespec with explicit id.
    pub fn insert_code_spec(&self, id: i64, name: &str, json_props: Option<&str>) {
        self.conn
            .execute(
                "INSERT INTO bis_CodeSpec (Id, Name, JsonProperties) VALUES (?1, ?2, ?3)",
                rusqlite::params![id, name, json_props],
            )
            .unwrap();
    }

    /// Insert a font row.
    pub fn insert_font(&self, id: i64, name: &str) {
        self.conn
            .execute(
                "INSERT INTO dgn_Font (Id, Type, Name) VALUES (?1, 1, ?2)",
                rusqlite::params![id, name],
            )
            .unwrap();
    }

    /// Attach a `bis_GeometricElement3d` class row to an element.
    pub fn insert_geometric_3d(
        &self,
        element: i64,
        category: Option<i64>,
        origin: (f64, f64, f64),
        stream: Option<&[u8]>,
    ) {
        self.conn
            .execute(
                "INSERT INTO bis_GeometricElement3d \
                 (ECInstanceId, CategoryId, OriginX, OriginY, OriginZ, GeometryStream) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![element, category, origin.0, origin.1, origin.2, stream],
            )
            .unwrap();
    }

    /// Attach a `bis_GeometryPart` class row to an element.
    pub fn insert_geometry_part_row(&self, element: i64, stream: &[u8]) {
        self.conn
            .execute(
                "INSERT INTO bis_GeometryPart (ECInstanceId, GeometryStream) VALUES (?1, ?2)",
                rusqlite::params![element, stream],
            )
            .unwrap();
    }

    fn element_class(&self, id: i64) -> i64 {
        self.conn
            .query_row("SELECT ECClassId FROM bis_Element WHERE Id = ?1", [id], |r| {
                r.get(0)
            })
            .unwrap()
    }
}

/// A (source, target) fixture pair in one temp directory.
pub struct FixturePair {
    pub dir: tempfile::TempDir,
    pub source: ModelDb,
    pub target: ModelDb,
}

impl FixturePair {
    pub fn new() -> Self {
        init_tracing();
        let dir = tempfile::tempdir().expect("tempdir");
        let source = ModelDb::create(dir.path().join("source.db"));
        let target = ModelDb::create(dir.path().join("target.db"));
        Self { dir, source, target }
    }

    /// A fresh writable connection to the target, for the transformer.
    pub fn open_target(&self) -> Connection {
        Connection::open(&self.target.path).expect("open target for transform")
    }
}

impl Default for FixturePair {
    fn default() -> Self {
        Self::new()
    }
}

/// Initialize test logging once; `RUST_LOG` controls verbosity.
pub fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}

/// Count rows of a table.
pub fn count(conn: &Connection, table: &str) -> i64 {
    conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))
        .unwrap()
}

/// Fetch one scalar column for an element.
pub fn element_i64(conn: &Connection, id: i64, column: &str) -> Option<i64> {
    conn.query_row(
        &format!("SELECT {column} FROM bis_Element WHERE Id = ?1"),
        [id],
        |r| r.get(0),
    )
    .unwrap()
}

/// Fetch one text column for an element.
pub fn element_text(conn: &Connection, id: i64, column: &str) -> Option<String> {
    conn.query_row(
        &format!("SELECT {column} FROM bis_Element WHERE Id = ?1"),
        [id],
        |r| r.get(0),
    )
    .unwrap()
}

/// The element id a user label maps to in a database.
pub fn id_by_label(conn: &Connection, label: &str) -> i64 {
    conn.query_row(
        "SELECT Id FROM bis_Element WHERE UserLabel = ?1",
        [label],
        |r| r.get(0),
    )
    .unwrap()
}

/// The target id a source element was mapped to. Panics when unmapped.
pub fn mapped_element(transformer: &Transformer, source_id: i64) -> i64 {
    transformer
        .context()
        .lookup(EntityKind::Element, EcId::from_i64(source_id))
        .unwrap_or_else(|| panic!("source element {source_id:#x} has no mapping"))
        .as_i64()
}

/// The `be_Local` value of an id sequence.
pub fn sequence_value(conn: &Connection, name: &str) -> i64 {
    conn.query_row("SELECT Val FROM be_Local WHERE Name = ?1", [name], |r| {
        r.get(0)
    })
    .unwrap()
}
