//! Per-class SQL synthesis.
//!
//! For every concrete class the builder emits, once: the `$` JSON
//! projection, the binary-column select, the populate-phase INSERTs (one
//! per physical table, references as placeholders), the hydrate-phase
//! UPDATEs (references as inline remap expressions over the temp tables),
//! and the aspect/relationship INSERTs. The hot loop then costs one
//! statement step per table per row plus a constant number of bindings.
//!
//! Parameter naming: `:b_<prop>` scalars, `:n_<prop>` navigation source
//! ids, `:n_<prop>_rel` navigation rel-class ids, `:r_<prop>` pre-resolved
//! (relationship-kind) target ids, `:l_<prop>` id-typed longs,
//! `:pt_<prop>_{x,y,z}` points, `:p_<prop>` binaries, plus `:id`, `:cls`,
//! `:src`, `:json`, and `:src_ep`/`:tgt_ep`/`:src_ep_cls`/`:tgt_ep_cls`
//! for link-table endpoints.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

use mgraft_error::{GraftError, Result};
use mgraft_types::{
    ClassDescriptor, ClassTable, EntityKind, PropertyDescriptor, PropertyKind, EXT_TYPE_FONT_ID,
    EXT_TYPE_JSON,
};
use tracing::warn;

use crate::ref_cache::RefTypeCache;

/// Name of the root element property holding the code value. Written NULL
/// during populate (so the code uniqueness index cannot collide on
/// placeholder spec/scope pairs) and set from the cloned JSON at hydrate.
const CODE_VALUE_PROP: &str = "CodeValue";

/// One synthesized statement against one physical table.
#[derive(Debug, Clone)]
pub struct TableStatement {
    /// The table the statement writes.
    pub table: String,
    /// The SQL text, with named parameters.
    pub sql: String,
}

/// The binary-column select and the order its columns come back in.
#[derive(Debug, Clone)]
pub struct BinarySelect {
    /// `SELECT <bin cols> FROM <chain> WHERE t0.Id = :src`.
    pub sql: String,
    /// Property name and kind per selected column, in select order.
    pub cols: Vec<(String, PropertyKind)>,
}

/// Precomputed statements for one concrete class.
#[derive(Debug, Clone)]
pub struct ClassPlan {
    /// The class this plan was built for.
    pub class: Arc<ClassDescriptor>,
    /// The `$` projection: one row's properties as a JSON object.
    pub select_json: String,
    /// Binary and geometry columns, absent when the class has none.
    pub select_binaries: Option<BinarySelect>,
    /// Populate-phase INSERTs (elements and models only).
    pub populate: Vec<TableStatement>,
    /// Hydrate-phase UPDATEs (elements and models only).
    pub hydrate: Vec<TableStatement>,
    /// Full INSERTs with inline remaps (aspects and relationships only).
    pub insert: Vec<TableStatement>,
}

impl ClassPlan {
    /// The bind-parameter name of the geometry stream, if the class has
    /// one.
    pub fn geometry_param(&self) -> Option<String> {
        self.class.geometry_prop().map(|p| format!(":p_{}", p.name))
    }
}

/// The inline run-remap expression: translate the source id in `x`
/// through a temp remap table, yielding NULL when unmapped.
fn remap_expr(table: &str, x: &str) -> String {
    format!(
        "(SELECT r.TargetId + ({x} - r.SourceId) FROM temp.{table} r \
         WHERE {x} BETWEEN r.SourceId AND r.SourceId + r.Length - 1)"
    )
}

/// Translate a source class id to the target's through `temp.class_remap`.
fn class_id_expr(x: &str) -> String {
    format!("(SELECT c.TargetClassId FROM temp.class_remap c WHERE c.SourceClassId = {x})")
}

/// The temp remap table serving references of `kind`.
fn remap_table_for(kind: EntityKind) -> Option<&'static str> {
    match kind {
        EntityKind::Element | EntityKind::Model => Some("element_remap"),
        EntityKind::Aspect => Some("aspect_remap"),
        EntityKind::CodeSpec => Some("codespec_remap"),
        // Relationship references need recursive endpoint resolution; the
        // cloner binds the already-remapped id.
        EntityKind::Relationship => None,
    }
}

fn geom_expr(prop: &PropertyDescriptor) -> String {
    format!(
        "CAST(remap_geom(:p_{}, 'temp.font_remap', 'temp.element_remap') AS BLOB)",
        prop.name
    )
}

fn quoted(col: String) -> String {
    format!("[{col}]")
}

/// Builds [`ClassPlan`]s. `source_db` is the attach alias the source is
/// visible under (`"source"` in a transform).
pub struct PlanBuilder<'a> {
    /// Attach alias of the source database.
    pub source_db: &'a str,
    /// Reference-type cache built from the source catalog.
    pub ref_cache: &'a RefTypeCache,
}

impl PlanBuilder<'_> {
    /// Synthesize the plan for one concrete class.
    pub fn build(&self, class: &Arc<ClassDescriptor>) -> Result<ClassPlan> {
        let kind = class.kind.ok_or_else(|| {
            GraftError::internal(format!("no plan for kind-less class {}", class.full_name))
        })?;
        for prop in class.all_props() {
            if !prop.kind.is_supported() {
                warn!(
                    class = %class.full_name,
                    property = %prop.name,
                    kind = %prop.kind,
                    "skipping unsupported compound property"
                );
            }
        }

        let select_json = self.select_json(class);
        let select_binaries = self.select_binaries(class);
        let (populate, hydrate, insert) = match kind {
            EntityKind::Element | EntityKind::Model => {
                (self.populate(class)?, self.hydrate(class)?, Vec::new())
            }
            EntityKind::Aspect | EntityKind::Relationship => {
                (Vec::new(), Vec::new(), self.insert(class, kind)?)
            }
            // Codespecs are imported by name, not through plans.
            EntityKind::CodeSpec => (Vec::new(), Vec::new(), Vec::new()),
        };

        Ok(ClassPlan {
            class: Arc::clone(class),
            select_json,
            select_binaries,
            populate,
            hydrate,
            insert,
        })
    }

    /// `FROM src.root t0 LEFT JOIN src.tbl1 t1 ON t1.ECInstanceId = t0.Id …`
    fn chain_from(&self, class: &ClassDescriptor) -> String {
        let src = self.source_db;
        let mut from = String::new();
        for (i, table) in class.tables.iter().enumerate() {
            if i == 0 {
                write!(from, "{src}.{} t0", table.name).expect("write to string");
            } else {
                write!(
                    from,
                    " LEFT JOIN {src}.{} t{i} ON t{i}.ECInstanceId = t0.Id",
                    table.name
                )
                .expect("write to string");
            }
        }
        from
    }

    fn select_json(&self, class: &ClassDescriptor) -> String {
        let src = self.source_db;
        let mut pairs: Vec<String> = Vec::new();
        for (i, table) in class.tables.iter().enumerate() {
            for prop in &table.props {
                let alias = format!("t{i}");
                let name = &prop.name;
                let pair = match prop.kind {
                    PropertyKind::Primitive if prop.extended_type.as_deref() == Some(EXT_TYPE_JSON) => {
                        format!("'{name}', json({alias}.[{name}])")
                    }
                    PropertyKind::Primitive => format!("'{name}', {alias}.[{name}]"),
                    PropertyKind::Long => format!(
                        "'{name}', CASE WHEN {alias}.[{name}] IS NULL THEN NULL \
                         ELSE printf('0x%x', {alias}.[{name}]) END"
                    ),
                    PropertyKind::Point2d => format!(
                        "'{name}', CASE WHEN {alias}.[{name}X] IS NULL THEN NULL \
                         ELSE json(json_object('x', {alias}.[{name}X], 'y', {alias}.[{name}Y])) END"
                    ),
                    PropertyKind::Point3d => format!(
                        "'{name}', CASE WHEN {alias}.[{name}X] IS NULL THEN NULL \
                         ELSE json(json_object('x', {alias}.[{name}X], 'y', {alias}.[{name}Y], \
                         'z', {alias}.[{name}Z])) END"
                    ),
                    PropertyKind::Navigation => format!(
                        "'{name}', CASE WHEN {alias}.[{name}Id] IS NULL THEN NULL \
                         ELSE json(json_object('id', printf('0x%x', {alias}.[{name}Id]), \
                         'relClassName', (SELECT s.Name || ':' || c.Name FROM {src}.ec_Class c \
                         JOIN {src}.ec_Schema s ON s.Id = c.SchemaId \
                         WHERE c.Id = {alias}.[{name}RelECClassId]))) END"
                    ),
                    // Binaries travel through select_binaries; compound
                    // kinds are not projected at all.
                    PropertyKind::Binary
                    | PropertyKind::GeometryStream
                    | PropertyKind::Array
                    | PropertyKind::Struct
                    | PropertyKind::StructArray => continue,
                };
                pairs.push(pair);
            }
        }
        format!(
            "SELECT json_object({}) FROM {} WHERE t0.Id = :src",
            pairs.join(", "),
            self.chain_from(class)
        )
    }

    fn select_binaries(&self, class: &ClassDescriptor) -> Option<BinarySelect> {
        let mut cols = Vec::new();
        let mut select_cols = Vec::new();
        for (i, table) in class.tables.iter().enumerate() {
            for prop in &table.props {
                if matches!(prop.kind, PropertyKind::Binary | PropertyKind::GeometryStream) {
                    select_cols.push(format!("t{i}.[{}]", prop.name));
                    cols.push((prop.name.clone(), prop.kind));
                }
            }
        }
        if cols.is_empty() {
            return None;
        }
        Some(BinarySelect {
            sql: format!(
                "SELECT {} FROM {} WHERE t0.Id = :src",
                select_cols.join(", "),
                self.chain_from(class)
            ),
            cols,
        })
    }

    fn populate(&self, class: &ClassDescriptor) -> Result<Vec<TableStatement>> {
        let mut statements = Vec::new();
        for table in &class.tables {
            let mut cols: Vec<String> = Vec::new();
            let mut vals: Vec<String> = Vec::new();
            if table.is_root {
                cols.push("Id".to_owned());
                vals.push(":id".to_owned());
                cols.push("ECClassId".to_owned());
                vals.push(class_id_expr(":cls"));
            } else {
                cols.push("ECInstanceId".to_owned());
                vals.push(":id".to_owned());
            }
            for prop in &table.props {
                let name = &prop.name;
                match prop.kind {
                    PropertyKind::Navigation => {
                        cols.push(quoted(prop.id_column()));
                        cols.push(quoted(prop.rel_class_column()));
                        // 0x1 is the root subject: guaranteed to exist, so
                        // NOT NULL reference columns stay satisfiable until
                        // the hydrate pass overwrites them.
                        vals.push(if prop.not_null { "0x1" } else { "NULL" }.to_owned());
                        vals.push("NULL".to_owned());
                    }
                    PropertyKind::Long => {
                        cols.push(quoted(name.clone()));
                        vals.push(if prop.not_null { "0x1" } else { "NULL" }.to_owned());
                    }
                    PropertyKind::Primitive if table.is_root && name == CODE_VALUE_PROP => {
                        cols.push(quoted(name.clone()));
                        vals.push("NULL".to_owned());
                    }
                    PropertyKind::Primitive => {
                        cols.push(quoted(name.clone()));
                        vals.push(format!(":b_{name}"));
                    }
                    PropertyKind::Point2d | PropertyKind::Point3d => {
                        for axis in point_axes(prop.kind) {
                            cols.push(quoted(prop.point_column(axis)));
                            vals.push(format!(":pt_{name}_{}", axis.to_lowercase()));
                        }
                    }
                    PropertyKind::Binary => {
                        cols.push(quoted(name.clone()));
                        vals.push(format!(":p_{name}"));
                    }
                    PropertyKind::GeometryStream => {
                        cols.push(quoted(name.clone()));
                        vals.push("NULL".to_owned());
                    }
                    PropertyKind::Array | PropertyKind::Struct | PropertyKind::StructArray => {}
                }
            }
            statements.push(TableStatement {
                table: table.name.clone(),
                sql: format!(
                    "INSERT INTO main.{} ({}) VALUES ({})",
                    table.name,
                    cols.join(", "),
                    vals.join(", ")
                ),
            });
        }
        Ok(statements)
    }

    fn hydrate(&self, class: &ClassDescriptor) -> Result<Vec<TableStatement>> {
        let mut statements = Vec::new();
        for table in &class.tables {
            let mut sets: Vec<String> = Vec::new();
            for prop in &table.props {
                self.hydrate_sets(class, table, prop, &mut sets)?;
            }
            if sets.is_empty() {
                continue;
            }
            let key = if table.is_root { "Id" } else { "ECInstanceId" };
            statements.push(TableStatement {
                table: table.name.clone(),
                sql: format!(
                    "UPDATE main.{} SET {} WHERE {key} = {}",
                    table.name,
                    sets.join(", "),
                    remap_expr("element_remap", ":src")
                ),
            });
        }
        Ok(statements)
    }

    fn insert(&self, class: &ClassDescriptor, kind: EntityKind) -> Result<Vec<TableStatement>> {
        let mut statements = Vec::new();
        for table in &class.tables {
            let mut cols: Vec<String> = Vec::new();
            let mut vals: Vec<String> = Vec::new();
            if table.is_root {
                cols.push("Id".to_owned());
                vals.push(":id".to_owned());
                cols.push("ECClassId".to_owned());
                vals.push(class_id_expr(":cls"));
                if kind == EntityKind::Relationship {
                    // Link-table endpoints are elements by construction;
                    // their kinds still flow through class_kind for the
                    // polymorphic resolver.
                    cols.push("SourceId".to_owned());
                    vals.push(remap_expr("element_remap", ":src_ep"));
                    cols.push("SourceECClassId".to_owned());
                    vals.push(class_id_expr(":src_ep_cls"));
                    cols.push("TargetId".to_owned());
                    vals.push(remap_expr("element_remap", ":tgt_ep"));
                    cols.push("TargetECClassId".to_owned());
                    vals.push(class_id_expr(":tgt_ep_cls"));
                }
            } else {
                cols.push("ECInstanceId".to_owned());
                vals.push(":id".to_owned());
            }
            for prop in &table.props {
                let name = &prop.name;
                match prop.kind {
                    PropertyKind::Navigation => {
                        let ref_kind = self.ref_cache.lookup(&class.full_name, name)?;
                        cols.push(quoted(prop.id_column()));
                        vals.push(match remap_table_for(ref_kind) {
                            Some(table) => remap_expr(table, &format!(":n_{name}")),
                            None => format!(":r_{name}"),
                        });
                        cols.push(quoted(prop.rel_class_column()));
                        vals.push(class_id_expr(&format!(":n_{name}_rel")));
                    }
                    PropertyKind::Long => {
                        cols.push(quoted(name.clone()));
                        vals.push(long_expr(prop));
                    }
                    PropertyKind::Primitive => {
                        cols.push(quoted(name.clone()));
                        vals.push(format!(":b_{name}"));
                    }
                    PropertyKind::Point2d | PropertyKind::Point3d => {
                        for axis in point_axes(prop.kind) {
                            cols.push(quoted(prop.point_column(axis)));
                            vals.push(format!(":pt_{name}_{}", axis.to_lowercase()));
                        }
                    }
                    PropertyKind::Binary => {
                        cols.push(quoted(name.clone()));
                        vals.push(format!(":p_{name}"));
                    }
                    PropertyKind::GeometryStream => {
                        cols.push(quoted(name.clone()));
                        vals.push(geom_expr(prop));
                    }
                    PropertyKind::Array | PropertyKind::Struct | PropertyKind::StructArray => {}
                }
            }
            statements.push(TableStatement {
                table: table.name.clone(),
                sql: format!(
                    "INSERT INTO main.{} ({}) VALUES ({})",
                    table.name,
                    cols.join(", "),
                    vals.join(", ")
                ),
            });
        }
        Ok(statements)
    }

    /// SET clauses for the reference (and JSON-carried scalar) columns of
    /// one property.
    fn hydrate_sets(
        &self,
        class: &ClassDescriptor,
        table: &ClassTable,
        prop: &PropertyDescriptor,
        sets: &mut Vec<String>,
    ) -> Result<()> {
        let name = &prop.name;
        match prop.kind {
            PropertyKind::Navigation => {
                let ref_kind = self.ref_cache.lookup(&class.full_name, name)?;
                let id_val = match remap_table_for(ref_kind) {
                    Some(table) => remap_expr(table, &format!(":n_{name}")),
                    None => format!(":r_{name}"),
                };
                sets.push(format!("{} = {id_val}", quoted(prop.id_column())));
                sets.push(format!(
                    "{} = {}",
                    quoted(prop.rel_class_column()),
                    class_id_expr(&format!(":n_{name}_rel"))
                ));
            }
            PropertyKind::Long => {
                sets.push(format!("{} = {}", quoted(name.clone()), long_expr(prop)));
            }
            PropertyKind::GeometryStream => {
                sets.push(format!("{} = {}", quoted(name.clone()), geom_expr(prop)));
            }
            PropertyKind::Primitive => {
                let json_carried = prop.extended_type.as_deref() == Some(EXT_TYPE_JSON)
                    || (table.is_root && name == CODE_VALUE_PROP);
                if json_carried {
                    sets.push(format!(
                        "{} = json_extract(:json, '$.{name}')",
                        quoted(name.clone())
                    ));
                }
            }
            _ => {}
        }
        Ok(())
    }
}

/// Long columns remap through the element table, or through the font
/// table (with identity fallback) when the extended type marks a font id.
fn long_expr(prop: &PropertyDescriptor) -> String {
    let name = &prop.name;
    if prop.extended_type.as_deref() == Some(EXT_TYPE_FONT_ID) {
        format!(
            "COALESCE({}, :l_{name})",
            remap_expr("font_remap", &format!(":l_{name}"))
        )
    } else {
        remap_expr("element_remap", &format!(":l_{name}"))
    }
}

fn point_axes(kind: PropertyKind) -> &'static [&'static str] {
    match kind {
        PropertyKind::Point2d => &["X", "Y"],
        PropertyKind::Point3d => &["X", "Y", "Z"],
        _ => &[],
    }
}

/// Plans for every class the transform will touch, built once at init.
#[derive(Default)]
pub struct PlanCache {
    plans: HashMap<i64, Arc<ClassPlan>>,
}

impl PlanCache {
    /// Build plans for all classes of copyable kinds.
    pub fn build_all<'a>(
        builder: &PlanBuilder<'_>,
        classes: impl Iterator<Item = &'a Arc<ClassDescriptor>>,
    ) -> Result<Self> {
        let mut plans = HashMap::new();
        for class in classes {
            if matches!(
                class.kind,
                Some(
                    EntityKind::Element
                        | EntityKind::Model
                        | EntityKind::Aspect
                        | EntityKind::Relationship
                )
            ) {
                plans.insert(class.id, Arc::new(builder.build(class)?));
            }
        }
        Ok(Self { plans })
    }

    /// The plan for a source class id.
    pub fn get(&self, class_id: i64) -> Result<&Arc<ClassPlan>> {
        self.plans.get(&class_id).ok_or_else(|| {
            GraftError::internal(format!("no plan built for class {class_id}"))
        })
    }

    /// Number of cached plans.
    pub fn len(&self) -> usize {
        self.plans.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }
}
