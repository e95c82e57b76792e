//! Row cloning: turn a source row's JSON projection (plus its binary
//! columns) into the bound parameters of the class's synthesized
//! statements.
//!
//! Per property, in order: a registered special handler wins; then
//! navigation properties resolve their kind through the reference-type
//! cache and their mapping through the remap context; then id-typed longs
//! go through the element (or font) table; everything else copies as-is.
//! Dangling references are detected here, against the in-memory tables,
//! and handled per the configured policy.

use std::collections::HashMap;

use mgraft_error::{GraftError, Result};
use mgraft_types::{
    ClassDescriptor, ClassFullName, Code, EcId, EntityKind, EntityRef, PropertyKind,
    EXT_TYPE_FONT_ID,
};
use rusqlite::types::Value;
use rusqlite::Connection;
use serde_json::Value as Json;
use tracing::warn;

use crate::context::RemapContext;
use crate::options::{DanglingBehavior, TransformOptions};
use crate::ref_cache::RefTypeCache;
use crate::schema::SchemaMap;

/// Scope semantics of a code spec, read from its `JsonProperties`
/// (`{"scopeSpec": {"type": "..."}}`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeScopeType {
    /// Codes scoped to the whole repository.
    Repository,
    /// Codes scoped to a model.
    Model,
    /// Codes scoped to the parent element.
    ParentElement,
    /// Codes scoped to a related element.
    RelatedElement,
}

impl CodeScopeType {
    /// Parse from a code spec's `JsonProperties` column text.
    pub fn from_json_properties(text: &str) -> Option<Self> {
        let json: Json = serde_json::from_str(text).ok()?;
        match json.pointer("/scopeSpec/type")?.as_str()? {
            "repository" => Some(Self::Repository),
            "model" => Some(Self::Model),
            "parentElement" => Some(Self::ParentElement),
            "relatedElement" => Some(Self::RelatedElement),
            _ => None,
        }
    }
}

/// A registered rewrite of entity references embedded in scalar JSON.
#[derive(Debug, Clone, Copy)]
pub enum SpecialHandler {
    /// The value at the pointer is an array of hex id strings of the given
    /// kind; each is remapped, unmapped ones follow the dangling policy.
    IdArray(EntityKind),
    /// The value at the pointer is a single hex id string.
    IdValue(EntityKind),
}

/// Special handlers keyed by class and JSON pointer.
#[derive(Debug, Default)]
pub struct HandlerRegistry {
    entries: Vec<(ClassFullName, String, SpecialHandler)>,
}

impl HandlerRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry with the built-in handlers: a display style's
    /// excluded-element list lives inside its `JsonProperties`.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(
            ClassFullName::new("BisCore", "DisplayStyle"),
            "/JsonProperties/styles/excludedElements",
            SpecialHandler::IdArray(EntityKind::Element),
        );
        registry
    }

    /// Register a handler for `(class, json pointer)`.
    pub fn register(
        &mut self,
        class: ClassFullName,
        pointer: impl Into<String>,
        handler: SpecialHandler,
    ) {
        self.entries.push((class, pointer.into(), handler));
    }

    fn for_class<'a>(
        &'a self,
        class: &'a ClassFullName,
    ) -> impl Iterator<Item = (&'a str, SpecialHandler)> {
        self.entries
            .iter()
            .filter(move |(c, _, _)| c == class)
            .map(|(_, p, h)| (p.as_str(), *h))
    }
}

/// A per-class fix-up invoked after cloning, before hydrate binding.
pub type OnClonedHook = Box<dyn Fn(&RemapContext, &Json, &mut Json)>;

/// Per-class `on_cloned` hooks.
#[derive(Default)]
pub struct HookRegistry {
    hooks: HashMap<ClassFullName, Vec<OnClonedHook>>,
}

impl HookRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a hook for a class.
    pub fn register(&mut self, class: ClassFullName, hook: OnClonedHook) {
        self.hooks.entry(class).or_default().push(hook);
    }

    fn for_class(&self, class: &ClassFullName) -> &[OnClonedHook] {
        self.hooks.get(class).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Named bind parameters for one row.
pub type RowBindings = Vec<(String, Value)>;

/// A binary column fetched by a plan's `select_binaries`.
pub type BinaryRow = Vec<(String, PropertyKind, Value)>;

/// Outcome of a reference check under the dangling policy.
enum RefState {
    /// Reference is null or invalid in the source.
    Null,
    /// Mapping exists; bind the source id and let SQL translate.
    Mapped,
    /// Unmapped, and the policy is `ignore`.
    Dangling,
}

/// Builds statement bindings for one row at a time.
pub struct Cloner<'a> {
    pub(crate) schemas: &'a SchemaMap,
    pub(crate) ref_cache: &'a RefTypeCache,
    pub(crate) ctx: &'a RemapContext,
    pub(crate) options: &'a TransformOptions,
    pub(crate) handlers: &'a HandlerRegistry,
    pub(crate) hooks: &'a HookRegistry,
    pub(crate) code_scopes: &'a HashMap<u64, CodeScopeType>,
    pub(crate) intra_database: bool,
}

impl Cloner<'_> {
    /// Bindings for the populate-phase INSERTs: scalars, points, and
    /// binaries only; reference columns are placeholders in the SQL.
    pub fn populate_bindings(
        &self,
        class: &ClassDescriptor,
        json: &Json,
        binaries: &BinaryRow,
    ) -> RowBindings {
        let mut bindings = RowBindings::new();
        for table in &class.tables {
            for prop in &table.props {
                let name = &prop.name;
                match prop.kind {
                    PropertyKind::Primitive => {
                        bindings.push((format!(":b_{name}"), json_scalar(&json[name])));
                    }
                    PropertyKind::Point2d | PropertyKind::Point3d => {
                        push_point_bindings(&mut bindings, prop.kind, name, &json[name]);
                    }
                    PropertyKind::Binary => {
                        let mut value = binary_value(binaries, name);
                        if table.is_root && name == "FederationGuid" && !self.keep_federation_guids()
                        {
                            value = Value::Null;
                        }
                        bindings.push((format!(":p_{name}"), value));
                    }
                    _ => {}
                }
            }
        }
        bindings
    }

    /// Bindings for the hydrate-phase UPDATEs: the adjusted JSON plus the
    /// source-side reference ids the inline remap expressions translate.
    pub fn hydrate_bindings(
        &self,
        conn: &Connection,
        class: &ClassDescriptor,
        src_id: EcId,
        json: &Json,
        geometry: Option<Vec<u8>>,
    ) -> Result<RowBindings> {
        let mut target = json.clone();
        self.apply_special_handlers(class, &mut target)?;
        self.apply_code_rules(class, &mut target);
        for hook in self.hooks.for_class(&class.full_name) {
            hook(self.ctx, json, &mut target);
        }

        let mut bindings = RowBindings::new();
        for table in &class.tables {
            for prop in &table.props {
                let name = &prop.name;
                match prop.kind {
                    PropertyKind::Navigation => {
                        self.push_nav_bindings(conn, class, &target, prop, &mut bindings, false)?;
                    }
                    PropertyKind::Long => {
                        self.push_long_bindings(class, &target, prop, &mut bindings, false)?;
                    }
                    PropertyKind::GeometryStream => {
                        let value = geometry
                            .clone()
                            .map(Value::Blob)
                            .unwrap_or(Value::Null);
                        bindings.push((format!(":p_{name}"), value));
                    }
                    _ => {}
                }
            }
        }
        bindings.push((":src".to_owned(), Value::Integer(src_id.as_i64())));
        bindings.push((":json".to_owned(), Value::Text(target.to_string())));
        Ok(bindings)
    }

    /// Bindings for the aspect/relationship INSERTs. Returns `None` when a
    /// NOT NULL reference dangles under the `ignore` policy, meaning the
    /// whole row is skipped.
    pub fn insert_bindings(
        &self,
        conn: &Connection,
        class: &ClassDescriptor,
        json: &Json,
        binaries: &BinaryRow,
    ) -> Result<Option<RowBindings>> {
        let mut target = json.clone();
        self.apply_special_handlers(class, &mut target)?;
        for hook in self.hooks.for_class(&class.full_name) {
            hook(self.ctx, json, &mut target);
        }

        let mut bindings = RowBindings::new();
        for table in &class.tables {
            for prop in &table.props {
                let name = &prop.name;
                match prop.kind {
                    PropertyKind::Navigation => {
                        if !self.push_nav_bindings(
                            conn,
                            class,
                            &target,
                            prop,
                            &mut bindings,
                            prop.not_null,
                        )? {
                            return Ok(None);
                        }
                    }
                    PropertyKind::Long => {
                        if !self.push_long_bindings(
                            class,
                            &target,
                            prop,
                            &mut bindings,
                            prop.not_null,
                        )? {
                            return Ok(None);
                        }
                    }
                    PropertyKind::Primitive => {
                        bindings.push((format!(":b_{name}"), json_scalar(&target[name])));
                    }
                    PropertyKind::Point2d | PropertyKind::Point3d => {
                        push_point_bindings(&mut bindings, prop.kind, name, &target[name]);
                    }
                    PropertyKind::Binary | PropertyKind::GeometryStream => {
                        bindings.push((format!(":p_{name}"), binary_value(binaries, name)));
                    }
                    _ => {}
                }
            }
        }
        Ok(Some(bindings))
    }

    /// Push `:n_<prop>`/`:n_<prop>_rel` (or `:r_<prop>`) bindings. Returns
    /// `false` when the reference dangles and `skip_on_dangling` asks the
    /// caller to drop the row.
    fn push_nav_bindings(
        &self,
        conn: &Connection,
        class: &ClassDescriptor,
        json: &Json,
        prop: &mgraft_types::PropertyDescriptor,
        bindings: &mut RowBindings,
        skip_on_dangling: bool,
    ) -> Result<bool> {
        let name = &prop.name;
        let kind = self.ref_cache.lookup(&class.full_name, name)?;
        let (id, rel_class) = nav_ref(&json[name]);

        let rel_binding = rel_class
            .and_then(|text| text.parse::<ClassFullName>().ok())
            .and_then(|fname| self.schemas.class_by_name(&fname))
            .map(|c| Value::Integer(c.id))
            .unwrap_or(Value::Null);
        bindings.push((format!(":n_{name}_rel"), rel_binding));

        let param = if kind == EntityKind::Relationship {
            format!(":r_{name}")
        } else {
            format!(":n_{name}")
        };

        let Some(id) = id else {
            bindings.push((param, Value::Null));
            return Ok(true);
        };

        if kind == EntityKind::Relationship {
            let resolved = self
                .ctx
                .find_target_entity_id(conn, EntityRef::new(kind, id))?;
            if resolved.id.is_valid() {
                bindings.push((param, Value::Integer(resolved.id.as_i64())));
                return Ok(true);
            }
            return self.on_dangling(class, name, id, &param, bindings, skip_on_dangling);
        }

        match self.check_ref(class, name, kind, id)? {
            RefState::Mapped => {
                bindings.push((param, Value::Integer(id.as_i64())));
                Ok(true)
            }
            RefState::Null => {
                bindings.push((param, Value::Null));
                Ok(true)
            }
            RefState::Dangling => {
                if skip_on_dangling {
                    bindings.push((param, Value::Null));
                    Ok(false)
                } else {
                    bindings.push((param, Value::Null));
                    Ok(true)
                }
            }
        }
    }

    fn push_long_bindings(
        &self,
        class: &ClassDescriptor,
        json: &Json,
        prop: &mgraft_types::PropertyDescriptor,
        bindings: &mut RowBindings,
        skip_on_dangling: bool,
    ) -> Result<bool> {
        let name = &prop.name;
        let param = format!(":l_{name}");
        let id = json[name].as_str().and_then(EcId::from_hex).filter(|v| v.is_valid());
        let Some(id) = id else {
            bindings.push((param, Value::Null));
            return Ok(true);
        };
        // Font ids resolve through the font table with identity fallback;
        // they are never dangling.
        if prop.extended_type.as_deref() == Some(EXT_TYPE_FONT_ID) {
            bindings.push((param, Value::Integer(id.as_i64())));
            return Ok(true);
        }
        match self.check_ref(class, name, EntityKind::Element, id)? {
            RefState::Mapped => {
                bindings.push((param, Value::Integer(id.as_i64())));
                Ok(true)
            }
            RefState::Null => {
                bindings.push((param, Value::Null));
                Ok(true)
            }
            RefState::Dangling => {
                bindings.push((param, Value::Null));
                Ok(!skip_on_dangling)
            }
        }
    }

    fn on_dangling(
        &self,
        class: &ClassDescriptor,
        prop: &str,
        id: EcId,
        param: &str,
        bindings: &mut RowBindings,
        skip_on_dangling: bool,
    ) -> Result<bool> {
        match self.options.dangling_references {
            DanglingBehavior::Reject => Err(GraftError::DanglingReference {
                class: class.full_name.to_string(),
                property: prop.to_owned(),
                id: id.get(),
            }),
            DanglingBehavior::Ignore => {
                warn!(
                    class = %class.full_name,
                    property = prop,
                    id = %id,
                    "dangling reference written as invalid"
                );
                bindings.push((param.to_owned(), Value::Null));
                Ok(!skip_on_dangling)
            }
        }
    }

    /// Classify a reference under the dangling policy. Errors under
    /// `reject`; yields [`RefState::Dangling`] (already warned) under
    /// `ignore`.
    fn check_ref(
        &self,
        class: &ClassDescriptor,
        prop: &str,
        kind: EntityKind,
        id: EcId,
    ) -> Result<RefState> {
        if !id.is_valid() {
            return Ok(RefState::Null);
        }
        if kind == EntityKind::Relationship || self.ctx.lookup(kind, id).is_some() {
            return Ok(RefState::Mapped);
        }
        match self.options.dangling_references {
            DanglingBehavior::Reject => Err(GraftError::DanglingReference {
                class: class.full_name.to_string(),
                property: prop.to_owned(),
                id: id.get(),
            }),
            DanglingBehavior::Ignore => {
                warn!(
                    class = %class.full_name,
                    property = prop,
                    id = %id,
                    "dangling reference written as invalid"
                );
                Ok(RefState::Dangling)
            }
        }
    }

    fn apply_special_handlers(&self, class: &ClassDescriptor, json: &mut Json) -> Result<()> {
        for (pointer, handler) in self.handlers.for_class(&class.full_name) {
            let Some(value) = json.pointer_mut(pointer) else {
                continue;
            };
            match handler {
                SpecialHandler::IdArray(kind) => {
                    let Some(items) = value.as_array().cloned() else {
                        continue;
                    };
                    let mut kept = Vec::with_capacity(items.len());
                    for item in items {
                        let Some(id) = item.as_str().and_then(EcId::from_hex) else {
                            kept.push(item);
                            continue;
                        };
                        match self.remap_embedded(class, pointer, kind, id)? {
                            Some(mapped) => kept.push(Json::String(mapped.to_hex())),
                            None => {} // dropped under ignore
                        }
                    }
                    *value = Json::Array(kept);
                }
                SpecialHandler::IdValue(kind) => {
                    let Some(id) = value.as_str().and_then(EcId::from_hex) else {
                        continue;
                    };
                    *value = match self.remap_embedded(class, pointer, kind, id)? {
                        Some(mapped) => Json::String(mapped.to_hex()),
                        None => Json::Null,
                    };
                }
            }
        }
        Ok(())
    }

    /// Remap an id embedded in scalar JSON to its target-side hex form.
    fn remap_embedded(
        &self,
        class: &ClassDescriptor,
        pointer: &str,
        kind: EntityKind,
        id: EcId,
    ) -> Result<Option<EcId>> {
        if !id.is_valid() {
            return Ok(Some(id));
        }
        if let Some(mapped) = self.ctx.lookup(kind, id) {
            return Ok(Some(mapped));
        }
        match self.options.dangling_references {
            DanglingBehavior::Reject => Err(GraftError::DanglingReference {
                class: class.full_name.to_string(),
                property: pointer.to_owned(),
                id: id.get(),
            }),
            DanglingBehavior::Ignore => {
                warn!(
                    class = %class.full_name,
                    pointer,
                    id = %id,
                    "dropping dangling embedded reference"
                );
                Ok(None)
            }
        }
    }

    /// Canonicalize the element's code and apply the repository-scope
    /// rule.
    fn apply_code_rules(&self, class: &ClassDescriptor, json: &mut Json) {
        if class.prop("CodeSpec").is_none() {
            return;
        }
        let (spec, _) = nav_ref(&json["CodeSpec"]);
        let (scope, _) = nav_ref(&json["CodeScope"]);
        let value = json["CodeValue"].as_str().unwrap_or_default().to_owned();
        let code = Code::new(
            spec.unwrap_or(EcId::INVALID),
            scope.unwrap_or(EcId::INVALID),
            value,
        );
        if code.is_empty() {
            json["CodeSpec"] = Json::Null;
            json["CodeScope"] = Json::Null;
            json["CodeValue"] = Json::Null;
            return;
        }
        if self.code_scopes.get(&code.spec.get()) == Some(&CodeScopeType::Repository) {
            if self.intra_database {
                set_nav_id(&mut json["CodeScope"], EcId::ROOT_SUBJECT);
            } else if code.scope != EcId::ROOT_SUBJECT {
                warn!(
                    class = %class.full_name,
                    scope = %code.scope,
                    "preserving repository-scoped code scope across databases"
                );
            }
        }
    }

    fn keep_federation_guids(&self) -> bool {
        self.intra_database || self.options.preserve_federation_guids
    }
}

/// Read a navigation value, accepting both the `{id, relClassName}` object
/// form and the bare hex string form.
fn nav_ref(value: &Json) -> (Option<EcId>, Option<&str>) {
    match value {
        Json::String(text) => (EcId::from_hex(text).filter(|id| id.is_valid()), None),
        Json::Object(obj) => {
            let id = obj
                .get("id")
                .and_then(Json::as_str)
                .and_then(EcId::from_hex)
                .filter(|id| id.is_valid());
            let rel = obj.get("relClassName").and_then(Json::as_str);
            (id, rel)
        }
        _ => (None, None),
    }
}

/// Overwrite a navigation value's id, preserving its wrapping shape.
fn set_nav_id(value: &mut Json, id: EcId) {
    match value {
        Json::String(_) => *value = Json::String(id.to_hex()),
        Json::Object(obj) => {
            obj.insert("id".to_owned(), Json::String(id.to_hex()));
        }
        _ => *value = serde_json::json!({ "id": id.to_hex() }),
    }
}

/// Lower a JSON scalar to a SQLite value. Objects and arrays (JSON-typed
/// columns) are stored as their serialized text.
fn json_scalar(value: &Json) -> Value {
    match value {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Integer(i64::from(*b)),
        Json::Number(n) => n
            .as_i64()
            .map(Value::Integer)
            .or_else(|| n.as_f64().map(Value::Real))
            .unwrap_or(Value::Null),
        Json::String(s) => Value::Text(s.clone()),
        other => Value::Text(other.to_string()),
    }
}

fn push_point_bindings(bindings: &mut RowBindings, kind: PropertyKind, name: &str, value: &Json) {
    let axes: &[&str] = if kind == PropertyKind::Point3d {
        &["x", "y", "z"]
    } else {
        &["x", "y"]
    };
    for axis in axes {
        let component = value
            .get(axis)
            .and_then(Json::as_f64)
            .map(Value::Real)
            .unwrap_or(Value::Null);
        bindings.push((format!(":pt_{name}_{axis}"), component));
    }
}

fn binary_value(binaries: &BinaryRow, name: &str) -> Value {
    binaries
        .iter()
        .find(|(prop, _, _)| prop == name)
        .map(|(_, _, value)| value.clone())
        .unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use mgraft_types::{ClassTable, PropertyDescriptor};
    use serde_json::json;

    use super::*;

    fn widget_class() -> Arc<ClassDescriptor> {
        Arc::new(ClassDescriptor {
            id: 10,
            full_name: ClassFullName::new("BisCore", "DisplayStyle"),
            kind: Some(EntityKind::Element),
            tables: vec![ClassTable {
                name: "bis_Element".to_owned(),
                is_root: true,
                props: vec![
                    PropertyDescriptor {
                        name: "Parent".to_owned(),
                        kind: PropertyKind::Navigation,
                        extended_type: None,
                        nav_target: Some(EntityKind::Element),
                        not_null: false,
                    },
                    PropertyDescriptor {
                        name: "CodeSpec".to_owned(),
                        kind: PropertyKind::Navigation,
                        extended_type: None,
                        nav_target: Some(EntityKind::CodeSpec),
                        not_null: false,
                    },
                    PropertyDescriptor {
                        name: "CodeScope".to_owned(),
                        kind: PropertyKind::Navigation,
                        extended_type: None,
                        nav_target: Some(EntityKind::Element),
                        not_null: false,
                    },
                    PropertyDescriptor {
                        name: "CodeValue".to_owned(),
                        kind: PropertyKind::Primitive,
                        extended_type: None,
                        nav_target: None,
                        not_null: false,
                    },
                    PropertyDescriptor {
                        name: "JsonProperties".to_owned(),
                        kind: PropertyKind::Primitive,
                        extended_type: Some("Json".to_owned()),
                        nav_target: None,
                        not_null: false,
                    },
                ],
            }],
        })
    }

    struct Fixture {
        schemas: SchemaMap,
        cache: RefTypeCache,
        ctx: RemapContext,
        options: TransformOptions,
        handlers: HandlerRegistry,
        hooks: HookRegistry,
        code_scopes: HashMap<u64, CodeScopeType>,
        intra_database: bool,
        class: Arc<ClassDescriptor>,
        conn: Connection,
    }

    impl Fixture {
        fn new() -> Self {
            let class = widget_class();
            let mut schemas = SchemaMap::default();
            schemas.insert_for_test(Arc::clone(&class));
            let cache = RefTypeCache::build(&schemas);
            let ctx = RemapContext::new();
            ctx.remap_element(EcId::new(0x20), EcId::new(0x5020));
            ctx.remap_element(EcId::new(0x21), EcId::new(0x5021));
            ctx.remap_code_spec(EcId::new(0x100), EcId::new(0x200));
            Self {
                schemas,
                cache,
                ctx,
                options: TransformOptions::default(),
                handlers: HandlerRegistry::with_defaults(),
                hooks: HookRegistry::new(),
                code_scopes: HashMap::new(),
                intra_database: false,
                class,
                conn: Connection::open_in_memory().unwrap(),
            }
        }

        fn cloner(&self) -> Cloner<'_> {
            Cloner {
                schemas: &self.schemas,
                ref_cache: &self.cache,
                ctx: &self.ctx,
                options: &self.options,
                handlers: &self.handlers,
                hooks: &self.hooks,
                code_scopes: &self.code_scopes,
                intra_database: self.intra_database,
            }
        }
    }

    fn binding<'a>(bindings: &'a RowBindings, name: &str) -> &'a Value {
        &bindings
            .iter()
            .find(|(n, _)| n == name)
            .unwrap_or_else(|| panic!("missing binding {name}"))
            .1
    }

    #[test]
    fn nav_bindings_carry_source_ids() {
        let fixture = Fixture::new();
        let cloner = fixture.cloner();
        let json = json!({
            "Parent": {"id": "0x20"},
            "CodeSpec": {"id": "0x100"},
            "CodeScope": "0x21",
            "CodeValue": "A",
            "JsonProperties": null,
        });
        let bindings = cloner
            .hydrate_bindings(&fixture.conn, &fixture.class, EcId::new(0x22), &json, None)
            .unwrap();
        assert_eq!(binding(&bindings, ":n_Parent"), &Value::Integer(0x20));
        assert_eq!(binding(&bindings, ":n_CodeSpec"), &Value::Integer(0x100));
        assert_eq!(binding(&bindings, ":n_CodeScope"), &Value::Integer(0x21));
        assert_eq!(binding(&bindings, ":src"), &Value::Integer(0x22));
    }

    #[test]
    fn dangling_nav_rejects_by_default() {
        let fixture = Fixture::new();
        let cloner = fixture.cloner();
        let json = json!({
            "Parent": {"id": "0x999"},
            "CodeSpec": null,
            "CodeScope": null,
            "CodeValue": null,
            "JsonProperties": null,
        });
        let err = cloner
            .hydrate_bindings(&fixture.conn, &fixture.class, EcId::new(0x22), &json, None)
            .unwrap_err();
        assert!(matches!(err, GraftError::DanglingReference { .. }));
    }

    #[test]
    fn dangling_nav_ignored_binds_null() {
        let mut fixture = Fixture::new();
        fixture.options.dangling_references = DanglingBehavior::Ignore;
        let cloner = fixture.cloner();
        let json = json!({
            "Parent": {"id": "0x999"},
            "CodeSpec": null,
            "CodeScope": null,
            "CodeValue": null,
            "JsonProperties": null,
        });
        let bindings = cloner
            .hydrate_bindings(&fixture.conn, &fixture.class, EcId::new(0x22), &json, None)
            .unwrap();
        assert_eq!(binding(&bindings, ":n_Parent"), &Value::Null);
    }

    #[test]
    fn excluded_elements_handler_remaps_and_drops() {
        let mut fixture = Fixture::new();
        fixture.options.dangling_references = DanglingBehavior::Ignore;
        let cloner = fixture.cloner();
        let json = json!({
            "Parent": null,
            "CodeSpec": null,
            "CodeScope": null,
            "CodeValue": null,
            "JsonProperties": {"styles": {"excludedElements": ["0x20", "0x999", "0x21"]}},
        });
        let bindings = cloner
            .hydrate_bindings(&fixture.conn, &fixture.class, EcId::new(0x22), &json, None)
            .unwrap();
        let Value::Text(cloned) = binding(&bindings, ":json") else {
            panic!("expected text json binding");
        };
        let cloned: Json = serde_json::from_str(cloned).unwrap();
        assert_eq!(
            cloned.pointer("/JsonProperties/styles/excludedElements").unwrap(),
            &json!(["0x5020", "0x5021"])
        );
    }

    #[test]
    fn empty_code_canonicalized() {
        let fixture = Fixture::new();
        let cloner = fixture.cloner();
        // Spec present but scope missing: the whole code collapses.
        let json = json!({
            "Parent": null,
            "CodeSpec": {"id": "0x100"},
            "CodeScope": null,
            "CodeValue": "orphan",
            "JsonProperties": null,
        });
        let bindings = cloner
            .hydrate_bindings(&fixture.conn, &fixture.class, EcId::new(0x22), &json, None)
            .unwrap();
        assert_eq!(binding(&bindings, ":n_CodeSpec"), &Value::Null);
        let Value::Text(cloned) = binding(&bindings, ":json") else {
            panic!("expected text json binding");
        };
        let cloned: Json = serde_json::from_str(cloned).unwrap();
        assert_eq!(cloned["CodeValue"], Json::Null);
    }

    #[test]
    fn repository_scope_rehomes_intra_database() {
        let mut fixture = Fixture::new();
        fixture
            .code_scopes
            .insert(0x100, CodeScopeType::Repository);
        fixture.intra_database = true;
        let cloner = fixture.cloner();
        let json = json!({
            "Parent": null,
            "CodeSpec": {"id": "0x100"},
            "CodeScope": {"id": "0x20"},
            "CodeValue": "A",
            "JsonProperties": null,
        });
        let bindings = cloner
            .hydrate_bindings(&fixture.conn, &fixture.class, EcId::new(0x22), &json, None)
            .unwrap();
        assert_eq!(binding(&bindings, ":n_CodeScope"), &Value::Integer(0x1));
    }

    #[test]
    fn on_cloned_hook_sees_source_and_edits_target() {
        let mut fixture = Fixture::new();
        fixture.hooks.register(
            ClassFullName::new("BisCore", "DisplayStyle"),
            Box::new(|_, source, target| {
                assert!(source.get("CodeValue").is_some());
                target["CodeValue"] = json!("hooked");
            }),
        );
        let cloner = fixture.cloner();
        let json = json!({
            "Parent": null,
            "CodeSpec": {"id": "0x100"},
            "CodeScope": {"id": "0x20"},
            "CodeValue": "A",
            "JsonProperties": null,
        });
        let bindings = cloner
            .hydrate_bindings(&fixture.conn, &fixture.class, EcId::new(0x22), &json, None)
            .unwrap();
        let Value::Text(cloned) = binding(&bindings, ":json") else {
            panic!("expected text json binding");
        };
        assert!(cloned.contains("hooked"));
    }

    #[test]
    fn scope_type_parses() {
        assert_eq!(
            CodeScopeType::from_json_properties(r#"{"scopeSpec":{"type":"repository"}}"#),
            Some(CodeScopeType::Repository)
        );
        assert_eq!(
            CodeScopeType::from_json_properties(r#"{"scopeSpec":{"type":"model"}}"#),
            Some(CodeScopeType::Model)
        );
        assert_eq!(CodeScopeType::from_json_properties("not json"), None);
        assert_eq!(CodeScopeType::from_json_properties("{}"), None);
    }

    #[test]
    fn json_scalars_lower_to_sql_values() {
        assert_eq!(json_scalar(&json!(null)), Value::Null);
        assert_eq!(json_scalar(&json!(true)), Value::Integer(1));
        assert_eq!(json_scalar(&json!(42)), Value::Integer(42));
        assert_eq!(json_scalar(&json!(2.5)), Value::Real(2.5));
        assert_eq!(json_scalar(&json!("text")), Value::Text("text".to_owned()));
        assert_eq!(
            json_scalar(&json!({"a": 1})),
            Value::Text("{\"a\":1}".to_owned())
        );
    }
}
