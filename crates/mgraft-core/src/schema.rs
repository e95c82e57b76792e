//! Catalog loader: lowers `ec_Schema`/`ec_Class`/`ec_Property` rows into
//! [`ClassDescriptor`]s.
//!
//! The loader resolves each class's entity kind by walking its base-class
//! chain to the root, assembles the root-first physical table chain, and
//! resolves every navigation property's target entity kind. Everything the
//! hot loop needs is computed here, once.

use std::collections::HashMap;
use std::sync::Arc;

use mgraft_error::{GraftError, Result};
use mgraft_types::{
    ClassDescriptor, ClassFullName, ClassTable, EntityKind, PropertyDescriptor, PropertyKind,
};
use rusqlite::Connection;

/// Schema owning the root classes that define entity kinds.
pub const CORE_SCHEMA: &str = "BisCore";

/// Map a root class to the entity kind of everything derived from it.
fn root_kind(schema: &str, class: &str) -> Option<EntityKind> {
    if schema != CORE_SCHEMA {
        return None;
    }
    match class {
        "Element" => Some(EntityKind::Element),
        "Model" => Some(EntityKind::Model),
        "ElementUniqueAspect" | "ElementMultiAspect" => Some(EntityKind::Aspect),
        "CodeSpec" => Some(EntityKind::CodeSpec),
        "ElementRefersToElements" | "ElementDrivesElement" => Some(EntityKind::Relationship),
        _ => None,
    }
}

struct RawClass {
    id: i64,
    full_name: ClassFullName,
    base: Option<i64>,
    table: Option<String>,
}

struct RawProperty {
    name: String,
    kind: PropertyKind,
    extended_type: Option<String>,
    nav_target: Option<i64>,
    not_null: bool,
}

/// The lowered catalog of one database.
#[derive(Debug, Default)]
pub struct SchemaMap {
    by_id: HashMap<i64, Arc<ClassDescriptor>>,
    by_name: HashMap<ClassFullName, i64>,
}

impl SchemaMap {
    /// Load and lower the catalog of `db` (`"main"` or `"source"`).
    pub fn load(conn: &Connection, db: &str) -> Result<Self> {
        let mut schemas = HashMap::new();
        let mut stmt = conn.prepare(&format!("SELECT Id, Name FROM {db}.ec_Schema"))?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            schemas.insert(row.get::<_, i64>(0)?, row.get::<_, String>(1)?);
        }
        drop(rows);
        drop(stmt);

        let mut raw: HashMap<i64, RawClass> = HashMap::new();
        let mut stmt = conn.prepare(&format!(
            "SELECT Id, SchemaId, Name, BaseClassId, TableName FROM {db}.ec_Class"
        ))?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let id: i64 = row.get(0)?;
            let schema_id: i64 = row.get(1)?;
            let schema = schemas.get(&schema_id).cloned().ok_or_else(|| {
                GraftError::internal(format!("class {id} references unknown schema {schema_id}"))
            })?;
            raw.insert(
                id,
                RawClass {
                    id,
                    full_name: ClassFullName::new(schema, row.get::<_, String>(2)?),
                    base: row.get(3)?,
                    table: row.get(4)?,
                },
            );
        }
        drop(rows);
        drop(stmt);

        let mut props: HashMap<i64, Vec<RawProperty>> = HashMap::new();
        let mut stmt = conn.prepare(&format!(
            "SELECT ClassId, Name, Kind, ExtendedType, NavTargetClassId, [NotNull] \
             FROM {db}.ec_Property ORDER BY ClassId, Ord"
        ))?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let class_id: i64 = row.get(0)?;
            let kind_text: String = row.get(2)?;
            let kind = PropertyKind::parse(&kind_text).ok_or_else(|| {
                GraftError::internal(format!(
                    "unknown property kind '{kind_text}' on class {class_id}"
                ))
            })?;
            props.entry(class_id).or_default().push(RawProperty {
                name: row.get(1)?,
                kind,
                extended_type: row.get(3)?,
                nav_target: row.get(4)?,
                not_null: row.get::<_, i64>(5)? != 0,
            });
        }
        drop(rows);
        drop(stmt);

        Self::lower(raw, props)
    }

    fn lower(raw: HashMap<i64, RawClass>, props: HashMap<i64, Vec<RawProperty>>) -> Result<Self> {
        // Kind of the root each class chain ends on, memoized per class.
        let mut kinds: HashMap<i64, Option<EntityKind>> = HashMap::new();
        for class in raw.values() {
            let kind = resolve_root(&raw, class.id)?
                .and_then(|root| root_kind(&root.full_name.schema, &root.full_name.name));
            kinds.insert(class.id, kind);
        }

        let mut map = Self::default();
        for class in raw.values() {
            let chain = base_chain(&raw, class.id)?;
            let mut tables: Vec<ClassTable> = Vec::new();
            for &link_id in &chain {
                let link = &raw[&link_id];
                let lowered = props
                    .get(&link_id)
                    .map(|list| {
                        list.iter()
                            .map(|p| lower_property(&raw, &kinds, class, p))
                            .collect::<Result<Vec<_>>>()
                    })
                    .transpose()?
                    .unwrap_or_default();
                match &link.table {
                    Some(name) => tables.push(ClassTable {
                        name: name.clone(),
                        is_root: link.base.is_none(),
                        props: lowered,
                    }),
                    // A table-less class hosts its properties in the
                    // nearest ancestor table.
                    None => {
                        if let Some(last) = tables.last_mut() {
                            last.props.extend(lowered);
                        } else if !lowered.is_empty() {
                            return Err(GraftError::internal(format!(
                                "class {} declares properties but has no table in its chain",
                                link.full_name
                            )));
                        }
                    }
                }
            }
            let descriptor = Arc::new(ClassDescriptor {
                id: class.id,
                full_name: class.full_name.clone(),
                kind: kinds[&class.id],
                tables,
            });
            map.by_name.insert(class.full_name.clone(), class.id);
            map.by_id.insert(class.id, descriptor);
        }
        Ok(map)
    }

    /// Descriptor by class id.
    pub fn class(&self, id: i64) -> Option<&Arc<ClassDescriptor>> {
        self.by_id.get(&id)
    }

    /// Descriptor by class id, as a hard error for ids read from data rows.
    pub fn expect_class(&self, id: i64) -> Result<&Arc<ClassDescriptor>> {
        self.class(id)
            .ok_or_else(|| GraftError::internal(format!("data row references unknown class {id}")))
    }

    /// Descriptor by fully qualified name.
    pub fn class_by_name(&self, name: &ClassFullName) -> Option<&Arc<ClassDescriptor>> {
        self.by_name.get(name).and_then(|id| self.by_id.get(id))
    }

    /// Iterate all descriptors.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<ClassDescriptor>> {
        self.by_id.values()
    }

    #[cfg(test)]
    pub(crate) fn insert_for_test(&mut self, descriptor: Arc<ClassDescriptor>) {
        self.by_name
            .insert(descriptor.full_name.clone(), descriptor.id);
        self.by_id.insert(descriptor.id, descriptor);
    }
}

/// Walk `BaseClassId` links to the root. Errors on a cycle or a missing
/// base class.
fn resolve_root<'a>(raw: &'a HashMap<i64, RawClass>, id: i64) -> Result<Option<&'a RawClass>> {
    let chain = base_chain(raw, id)?;
    Ok(chain.first().map(|root_id| &raw[root_id]))
}

/// The class chain from root to `id`, inclusive.
fn base_chain(raw: &HashMap<i64, RawClass>, id: i64) -> Result<Vec<i64>> {
    let mut chain = Vec::new();
    let mut current = Some(id);
    while let Some(cid) = current {
        if chain.contains(&cid) {
            return Err(GraftError::internal(format!(
                "base-class cycle through class {cid}"
            )));
        }
        let class = raw
            .get(&cid)
            .ok_or_else(|| GraftError::internal(format!("missing base class {cid}")))?;
        chain.push(cid);
        current = class.base;
    }
    chain.reverse();
    Ok(chain)
}

fn lower_property(
    raw: &HashMap<i64, RawClass>,
    kinds: &HashMap<i64, Option<EntityKind>>,
    owner: &RawClass,
    p: &RawProperty,
) -> Result<PropertyDescriptor> {
    let nav_target = if p.kind == PropertyKind::Navigation {
        let target_id = p.nav_target.ok_or_else(|| GraftError::SchemaMissing {
            schema: owner.full_name.schema.clone(),
            class: owner.full_name.name.clone(),
            property: p.name.clone(),
        })?;
        let kind = kinds.get(&target_id).copied().flatten();
        match kind {
            Some(k) => Some(k),
            None => {
                let root = raw
                    .get(&target_id)
                    .map(|c| c.full_name.to_string())
                    .unwrap_or_else(|| "<missing>".to_owned());
                return Err(GraftError::UnknownRootClass {
                    class_id: target_id,
                    root,
                });
            }
        }
    } else {
        None
    };
    Ok(PropertyDescriptor {
        name: p.name.clone(),
        kind: p.kind,
        extended_type: p.extended_type.clone(),
        nav_target,
        not_null: p.not_null,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE ec_Schema (Id INTEGER PRIMARY KEY, Name TEXT NOT NULL UNIQUE, Alias TEXT NOT NULL);
             CREATE TABLE ec_Class (
                 Id INTEGER PRIMARY KEY,
                 SchemaId INTEGER NOT NULL,
                 Name TEXT NOT NULL,
                 BaseClassId INTEGER,
                 TableName TEXT
             );
             CREATE TABLE ec_Property (
                 Id INTEGER PRIMARY KEY,
                 ClassId INTEGER NOT NULL,
                 Ord INTEGER NOT NULL,
                 Name TEXT NOT NULL,
                 Kind TEXT NOT NULL,
                 ExtendedType TEXT,
                 NavTargetClassId INTEGER,
                 [NotNull] INTEGER NOT NULL DEFAULT 0
             );
             INSERT INTO ec_Schema VALUES (1, 'BisCore', 'bis'), (2, 'TestDomain', 'td');
             INSERT INTO ec_Class VALUES (1, 1, 'Element', NULL, 'bis_Element');
             INSERT INTO ec_Class VALUES (2, 1, 'Model', NULL, 'bis_Model');
             INSERT INTO ec_Class VALUES (3, 2, 'Widget', 1, 'td_Widget');
             INSERT INTO ec_Class VALUES (4, 2, 'FancyWidget', 3, NULL);
             INSERT INTO ec_Property VALUES (1, 1, 0, 'Model', 'navigation', NULL, 2, 1);
             INSERT INTO ec_Property VALUES (2, 1, 1, 'Parent', 'navigation', NULL, 1, 0);
             INSERT INTO ec_Property VALUES (3, 1, 2, 'CodeValue', 'primitive', NULL, NULL, 0);
             INSERT INTO ec_Property VALUES (4, 3, 0, 'Rating', 'primitive', NULL, NULL, 0);
             INSERT INTO ec_Property VALUES (5, 3, 1, 'Origin', 'point3d', NULL, NULL, 0);
             INSERT INTO ec_Property VALUES (6, 4, 0, 'Sparkle', 'primitive', NULL, NULL, 0);",
        )
        .unwrap();
        conn
    }

    #[test]
    fn loads_and_lowers_chain() {
        let conn = catalog_db();
        let map = SchemaMap::load(&conn, "main").unwrap();

        let widget = map
            .class_by_name(&ClassFullName::new("TestDomain", "Widget"))
            .unwrap();
        assert_eq!(widget.kind, Some(EntityKind::Element));
        assert_eq!(widget.tables.len(), 2);
        assert!(widget.tables[0].is_root);
        assert_eq!(widget.tables[0].name, "bis_Element");
        assert_eq!(widget.tables[1].name, "td_Widget");
        assert_eq!(widget.prop("Model").unwrap().nav_target, Some(EntityKind::Model));
        assert!(widget.prop("Model").unwrap().not_null);
        assert!(!widget.prop("Parent").unwrap().not_null);
    }

    #[test]
    fn tableless_class_folds_props_into_ancestor_table() {
        let conn = catalog_db();
        let map = SchemaMap::load(&conn, "main").unwrap();
        let fancy = map
            .class_by_name(&ClassFullName::new("TestDomain", "FancyWidget"))
            .unwrap();
        assert_eq!(fancy.tables.len(), 2);
        let td = &fancy.tables[1];
        assert!(td.props.iter().any(|p| p.name == "Sparkle"));
        assert!(td.props.iter().any(|p| p.name == "Rating"));
    }

    #[test]
    fn root_kinds() {
        assert_eq!(root_kind("BisCore", "Element"), Some(EntityKind::Element));
        assert_eq!(
            root_kind("BisCore", "ElementMultiAspect"),
            Some(EntityKind::Aspect)
        );
        assert_eq!(
            root_kind("BisCore", "ElementDrivesElement"),
            Some(EntityKind::Relationship)
        );
        assert_eq!(root_kind("BisCore", "Widget"), None);
        assert_eq!(root_kind("Other", "Element"), None);
    }

    #[test]
    fn lookup_by_id_and_name_agree() {
        let conn = catalog_db();
        let map = SchemaMap::load(&conn, "main").unwrap();
        let by_name = map
            .class_by_name(&ClassFullName::new("BisCore", "Element"))
            .unwrap();
        let by_id = map.class(by_name.id).unwrap();
        assert_eq!(by_name.full_name, by_id.full_name);
        assert!(map.expect_class(999).is_err());
    }
}
