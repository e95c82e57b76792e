//! The transform orchestrator.
//!
//! Drives the two-pass bulk copy: codespec import and populate (P1) inside
//! one transaction, then reference hydration, aspects, relationships, and
//! finalize (P2) inside a second. Between the passes the in-memory remap
//! tables are flushed into their temp SQL mirrors so the hydrate-phase
//! statements can translate ids inline.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use mgraft_error::{GraftError, Result};
use mgraft_types::{ClassFullName, EcId, EntityKind};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension};
use serde_json::Value as Json;
use tracing::{debug, info, warn};

use crate::cloner::{
    BinaryRow, Cloner, CodeScopeType, HandlerRegistry, HookRegistry, OnClonedHook, RowBindings,
    SpecialHandler,
};
use crate::context::{table_exists, RemapContext, LINK_TABLES};
use crate::options::{DanglingBehavior, TransformOptions};
use crate::plan::{ClassPlan, PlanBuilder, PlanCache};
use crate::ref_cache::RefTypeCache;
use crate::schema::SchemaMap;
use crate::sequence::{IdSequence, ELEMENT_ID_SEQUENCE, INSTANCE_ID_SEQUENCE};

/// Attach alias the source database is visible under.
const SOURCE_DB: &str = "source";

/// `be_Local` key of the transform scope marker.
const SCOPE_MARKER_KEY: &str = "graft_scope";

/// `be_Local` key of a database's identity GUID.
const DB_GUID_KEY: &str = "dbguid";

/// Provenance aspects filtered by `include_source_provenance`.
const PROVENANCE_ASPECT: (&str, &str) = ("BisCore", "ExternalSourceAspect");

/// Geometry tables probed for the hydrate-phase stream join.
const GEOMETRY_TABLES: [(&str, &str); 3] = [
    ("bis_GeometricElement3d", "g3"),
    ("bis_GeometricElement2d", "g2"),
    ("bis_GeometryPart", "gp"),
];

/// Cooperative cancellation flag, checked between rows.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// A fresh, un-cancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. The transform stops at the next row boundary,
    /// rolls back the open transaction, and returns [`GraftError::Cancelled`].
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Row counts reported by a completed transform.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransformSummary {
    /// Elements copied (well-known roots excluded).
    pub elements: u64,
    /// Models copied.
    pub models: u64,
    /// Aspects copied.
    pub aspects: u64,
    /// Relationship rows copied.
    pub relationships: u64,
    /// Codespecs newly inserted (name collisions reuse and do not count).
    pub code_specs: u64,
    /// Rows skipped because a required reference dangled under the
    /// `ignore` policy.
    pub skipped_dangling: u64,
}

struct SavedTrigger {
    name: String,
    sql: String,
}

/// The bulk identity-remapping transformer.
///
/// Owns the target connection (with the source attached read-only as
/// `source`), the remap context, and the per-class plans. Built once per
/// transform; [`Transformer::run`] performs the copy.
pub struct Transformer {
    target: Connection,
    options: TransformOptions,
    ctx: RemapContext,
    source_schemas: SchemaMap,
    target_schemas: SchemaMap,
    ref_cache: RefTypeCache,
    plans: PlanCache,
    handlers: HandlerRegistry,
    hooks: HookRegistry,
    code_scopes: HashMap<u64, CodeScopeType>,
    elem_seq: IdSequence,
    inst_seq: IdSequence,
    saved_triggers: Vec<SavedTrigger>,
    cancel: CancelToken,
    intra_database: bool,
}

impl std::fmt::Debug for Transformer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transformer").finish_non_exhaustive()
    }
}

impl Transformer {
    /// Attach `source_path` to the writable target connection and prepare
    /// everything the copy needs: catalogs, reference-type cache, class
    /// plans, temp remap tables, suspended triggers, and id sequences.
    pub fn new(
        target: Connection,
        source_path: impl AsRef<Path>,
        options: TransformOptions,
    ) -> Result<Self> {
        let path = source_path.as_ref().to_string_lossy().into_owned();
        target.execute("ATTACH DATABASE ?1 AS source", [&path])?;

        let ctx = RemapContext::new();
        crate::functions::register_functions(&target, &ctx)?;

        let source_schemas = SchemaMap::load(&target, SOURCE_DB)?;
        let target_schemas = SchemaMap::load(&target, "main")?;
        let ref_cache = RefTypeCache::build(&source_schemas);
        let plans = {
            let builder = PlanBuilder {
                source_db: SOURCE_DB,
                ref_cache: &ref_cache,
            };
            PlanCache::build_all(&builder, source_schemas.iter())?
        };
        debug!(plans = plans.len(), "class plans synthesized");

        target.execute_batch(
            "CREATE TEMP TABLE IF NOT EXISTS element_remap (
                 SourceId INTEGER PRIMARY KEY, TargetId INTEGER NOT NULL, Length INTEGER NOT NULL);
             CREATE TEMP TABLE IF NOT EXISTS aspect_remap (
                 SourceId INTEGER PRIMARY KEY, TargetId INTEGER NOT NULL, Length INTEGER NOT NULL);
             CREATE TEMP TABLE IF NOT EXISTS codespec_remap (
                 SourceId INTEGER PRIMARY KEY, TargetId INTEGER NOT NULL, Length INTEGER NOT NULL);
             CREATE TEMP TABLE IF NOT EXISTS font_remap (
                 SourceId INTEGER PRIMARY KEY, TargetId INTEGER NOT NULL, Length INTEGER NOT NULL);
             CREATE TEMP TABLE IF NOT EXISTS class_remap (
                 SourceClassId INTEGER PRIMARY KEY, TargetClassId INTEGER);
             CREATE TEMP TABLE IF NOT EXISTS class_kind (
                 ClassId INTEGER PRIMARY KEY, Kind TEXT);",
        )?;

        check_scope_marker(&target, options.target_scope_element_id)?;
        let intra_database = match (
            read_db_guid(&target, SOURCE_DB)?,
            read_db_guid(&target, "main")?,
        ) {
            (Some(source), Some(main)) => source == main,
            _ => false,
        };

        let elem_seq = IdSequence::load(&target, "main", ELEMENT_ID_SEQUENCE)?;
        let inst_seq = IdSequence::load(&target, "main", INSTANCE_ID_SEQUENCE)?;

        let saved_triggers = suspend_triggers(&target)?;

        Ok(Self {
            target,
            options,
            ctx,
            source_schemas,
            target_schemas,
            ref_cache,
            plans,
            handlers: HandlerRegistry::with_defaults(),
            hooks: HookRegistry::new(),
            code_scopes: HashMap::new(),
            elem_seq,
            inst_seq,
            saved_triggers,
            cancel: CancelToken::new(),
            intra_database,
        })
    }

    /// The remap context (font remaps, state persistence, lookups).
    pub fn context(&self) -> &RemapContext {
        &self.ctx
    }

    /// A token that cancels this transform from another thread.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Register a class rename rule.
    pub fn add_class_rule(&mut self, source: ClassFullName, target: ClassFullName) {
        self.ctx.add_class_rule(source, target);
    }

    /// Register a special handler for references embedded in scalar JSON.
    pub fn register_special_handler(
        &mut self,
        class: ClassFullName,
        pointer: impl Into<String>,
        handler: SpecialHandler,
    ) {
        self.handlers.register(class, pointer, handler);
    }

    /// Register a per-class `on_cloned` fix-up hook.
    pub fn register_on_cloned(&mut self, class: ClassFullName, hook: OnClonedHook) {
        self.hooks.register(class, hook);
    }

    /// Persist the remap tables for a later resume.
    pub fn save_state(&self, path: impl AsRef<Path>) -> Result<()> {
        let state = Connection::open(path.as_ref())?;
        self.ctx.save_state(&state)
    }

    /// Restore remap tables saved by [`Transformer::save_state`].
    pub fn load_state(&self, path: impl AsRef<Path>) -> Result<()> {
        let state = Connection::open(path.as_ref())?;
        self.ctx.load_state(&state)
    }

    /// Consume the transformer, returning the target connection.
    pub fn into_target(self) -> Connection {
        self.target
    }

    /// Run the transform to completion.
    pub fn run(&mut self) -> Result<TransformSummary> {
        let result = self.run_inner();
        if result.is_err() {
            // Each pass runs inside one transaction; nothing of the failed
            // pass survives.
            let _ = self.target.execute_batch("ROLLBACK");
        }
        result
    }

    fn run_inner(&mut self) -> Result<TransformSummary> {
        let mut summary = TransformSummary::default();
        self.fill_class_tables()?;
        self.seed_remaps()?;

        self.begin()?;
        self.import_code_specs(&mut summary)?;
        self.pass1_populate(&mut summary)?;
        self.target.execute_batch("COMMIT")?;

        self.ctx.flush_to_temp(&self.target)?;

        self.begin()?;
        self.pass2_hydrate()?;
        self.copy_aspects(&mut summary)?;
        // Aspects recorded new mappings; refresh the mirrors before the
        // relationship pass resolves navigation properties through them.
        self.ctx.flush_to_temp(&self.target)?;
        self.copy_relationships(&mut summary)?;
        self.finalize()?;

        info!(
            elements = summary.elements,
            models = summary.models,
            aspects = summary.aspects,
            relationships = summary.relationships,
            code_specs = summary.code_specs,
            skipped_dangling = summary.skipped_dangling,
            "transform complete"
        );
        Ok(summary)
    }

    fn begin(&self) -> Result<()> {
        self.target
            .execute_batch("BEGIN; PRAGMA defer_foreign_keys = ON;")?;
        Ok(())
    }

    /// Materialize the class-id translation and class→kind tables. The
    /// translation applies the registered rename rules, which is why it is
    /// computed here rather than joined per row.
    fn fill_class_tables(&self) -> Result<()> {
        let conn = &self.target;
        conn.execute("DELETE FROM temp.class_remap", [])?;
        conn.execute("DELETE FROM temp.class_kind", [])?;
        let mut insert_remap = conn.prepare_cached(
            "INSERT INTO temp.class_remap (SourceClassId, TargetClassId) VALUES (?1, ?2)",
        )?;
        let mut insert_kind =
            conn.prepare_cached("INSERT INTO temp.class_kind (ClassId, Kind) VALUES (?1, ?2)")?;
        for class in self.source_schemas.iter() {
            let target_name = self.ctx.target_class(&class.full_name);
            let target_id = self
                .target_schemas
                .class_by_name(&target_name)
                .map(|c| c.id);
            if target_id.is_none() {
                warn!(
                    class = %class.full_name,
                    "class has no counterpart in the target; its rows cannot be copied"
                );
            }
            insert_remap.execute(rusqlite::params![class.id, target_id])?;
            insert_kind.execute(rusqlite::params![
                class.id,
                class.kind.map(|k| k.letter().to_string())
            ])?;
        }
        Ok(())
    }

    fn seed_remaps(&mut self) -> Result<()> {
        let max: i64 = self.target.query_row(
            "SELECT COALESCE(MAX(Id), 0) FROM source.bis_Element",
            [],
            |r| r.get(0),
        )?;
        let max = EcId::from_i64(max);
        if self.options.was_source_copied_to_target {
            info!(max = %max, "seeding element remap table with identity");
            self.ctx.seed_element_identity(max);
        }
        if self.options.preserve_element_ids {
            self.elem_seq.advance_past(max);
        }
        Ok(())
    }

    /// Match source codespecs into the target by name, inserting the
    /// missing ones. A name collision reuses the existing row.
    fn import_code_specs(&mut self, summary: &mut TransformSummary) -> Result<()> {
        let _span = tracing::debug_span!("import_code_specs").entered();
        let conn = &self.target;
        let mut stmt =
            conn.prepare("SELECT Id, Name, JsonProperties FROM source.bis_CodeSpec ORDER BY Id")?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let src = EcId::from_i64(row.get(0)?);
            let name: String = row.get(1)?;
            let props: Option<String> = row.get(2)?;
            if let Some(scope) = props
                .as_deref()
                .and_then(CodeScopeType::from_json_properties)
            {
                self.code_scopes.insert(src.get(), scope);
            }

            let existing: Option<i64> = conn
                .prepare_cached("SELECT Id FROM main.bis_CodeSpec WHERE Name = ?1")?
                .query_row([&name], |r| r.get(0))
                .optional()?;
            let tgt = match existing {
                Some(id) => {
                    debug!(name = %name, src = %src, tgt = id, "reusing codespec present in target");
                    EcId::from_i64(id)
                }
                None => {
                    let next: i64 = conn.query_row(
                        "SELECT COALESCE(MAX(Id), 0) + 1 FROM main.bis_CodeSpec",
                        [],
                        |r| r.get(0),
                    )?;
                    conn.prepare_cached(
                        "INSERT INTO main.bis_CodeSpec (Id, Name, JsonProperties) \
                         VALUES (?1, ?2, ?3)",
                    )?
                    .execute(rusqlite::params![next, name, props])?;
                    summary.code_specs += 1;
                    EcId::from_i64(next)
                }
            };
            self.ctx.add_code_spec_rule(name, src, tgt);
        }
        Ok(())
    }

    /// Pass 1: create every element (and model) row at its final primary
    /// key, references as placeholders, and build the element remap table.
    fn pass1_populate(&mut self, summary: &mut TransformSummary) -> Result<()> {
        let _span = tracing::info_span!("populate").entered();
        let conn = &self.target;
        let cloner = Cloner {
            schemas: &self.source_schemas,
            ref_cache: &self.ref_cache,
            ctx: &self.ctx,
            options: &self.options,
            handlers: &self.handlers,
            hooks: &self.hooks,
            code_scopes: &self.code_scopes,
            intra_database: self.intra_database,
        };

        let mut stmt = conn.prepare(
            "SELECT e.Id, e.ECClassId, m.ECClassId \
             FROM source.bis_Element e \
             LEFT JOIN source.bis_Model m ON m.Id = e.Id \
             WHERE e.Id NOT IN (0x1, 0xe, 0x10) \
             ORDER BY e.Id ASC",
        )?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            if self.cancel.is_cancelled() {
                return Err(GraftError::Cancelled);
            }
            let src = EcId::from_i64(row.get(0)?);
            let class_id: i64 = row.get(1)?;
            let model_class: Option<i64> = row.get(2)?;

            let tgt = if self.options.preserve_element_ids {
                src
            } else {
                self.elem_seq.next()?
            };

            let plan = self.plans.get(class_id)?;
            let json = fetch_json(conn, plan, src)?;
            let binaries = fetch_binaries(conn, plan, src)?;
            let mut bindings = cloner.populate_bindings(&plan.class, &json, &binaries);
            bindings.push((":id".to_owned(), Value::Integer(tgt.as_i64())));
            bindings.push((":cls".to_owned(), Value::Integer(class_id)));
            for statement in &plan.populate {
                exec_with_bindings(conn, &statement.sql, &bindings)?;
            }
            summary.elements += 1;

            if let Some(model_class) = model_class {
                let plan = self.plans.get(model_class)?;
                let json = fetch_json(conn, plan, src)?;
                let binaries = fetch_binaries(conn, plan, src)?;
                let mut bindings = cloner.populate_bindings(&plan.class, &json, &binaries);
                bindings.push((":id".to_owned(), Value::Integer(tgt.as_i64())));
                bindings.push((":cls".to_owned(), Value::Integer(model_class)));
                for statement in &plan.populate {
                    exec_with_bindings(conn, &statement.sql, &bindings)?;
                }
                summary.models += 1;
            }

            self.ctx.remap_element(src, tgt);
        }
        info!(elements = summary.elements, models = summary.models, "populate pass done");
        Ok(())
    }

    /// Pass 2: re-stream the elements in the same order and overwrite every
    /// reference column; the remap tables are complete now.
    fn pass2_hydrate(&mut self) -> Result<()> {
        let _span = tracing::info_span!("hydrate").entered();
        let conn = &self.target;
        let cloner = Cloner {
            schemas: &self.source_schemas,
            ref_cache: &self.ref_cache,
            ctx: &self.ctx,
            options: &self.options,
            handlers: &self.handlers,
            hooks: &self.hooks,
            code_scopes: &self.code_scopes,
            intra_database: self.intra_database,
        };

        let (geom_expr, geom_joins) = geometry_join(conn)?;
        let mut stmt = conn.prepare(&format!(
            "SELECT e.Id, e.ECClassId, m.ECClassId, {geom_expr} \
             FROM source.bis_Element e \
             LEFT JOIN source.bis_Model m ON m.Id = e.Id{geom_joins} \
             WHERE e.Id NOT IN (0x1, 0xe, 0x10) \
             ORDER BY e.Id ASC"
        ))?;
        let mut rows = stmt.query([])?;
        let mut hydrated: u64 = 0;
        while let Some(row) = rows.next()? {
            if self.cancel.is_cancelled() {
                return Err(GraftError::Cancelled);
            }
            let src = EcId::from_i64(row.get(0)?);
            let class_id: i64 = row.get(1)?;
            let model_class: Option<i64> = row.get(2)?;
            let geometry: Option<Vec<u8>> = row.get(3)?;

            let plan = self.plans.get(class_id)?;
            let json = fetch_json(conn, plan, src)?;
            let bindings = cloner.hydrate_bindings(conn, &plan.class, src, &json, geometry)?;
            for statement in &plan.hydrate {
                exec_with_bindings(conn, &statement.sql, &bindings)?;
            }

            if let Some(model_class) = model_class {
                let plan = self.plans.get(model_class)?;
                let json = fetch_json(conn, plan, src)?;
                let bindings = cloner.hydrate_bindings(conn, &plan.class, src, &json, None)?;
                for statement in &plan.hydrate {
                    exec_with_bindings(conn, &statement.sql, &bindings)?;
                }
            }
            hydrated += 1;
        }
        info!(rows = hydrated, "hydrate pass done");
        Ok(())
    }

    fn copy_aspects(&mut self, summary: &mut TransformSummary) -> Result<()> {
        let _span = tracing::info_span!("aspects").entered();
        let conn = &self.target;
        let cloner = Cloner {
            schemas: &self.source_schemas,
            ref_cache: &self.ref_cache,
            ctx: &self.ctx,
            options: &self.options,
            handlers: &self.handlers,
            hooks: &self.hooks,
            code_scopes: &self.code_scopes,
            intra_database: self.intra_database,
        };

        let mut stmt =
            conn.prepare("SELECT a.Id, a.ECClassId FROM source.bis_ElementAspect a ORDER BY a.Id")?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            if self.cancel.is_cancelled() {
                return Err(GraftError::Cancelled);
            }
            let src = EcId::from_i64(row.get(0)?);
            let class_id: i64 = row.get(1)?;
            let descriptor = self.source_schemas.expect_class(class_id)?;
            if !self.options.include_source_provenance
                && descriptor.full_name.schema == PROVENANCE_ASPECT.0
                && descriptor.full_name.name == PROVENANCE_ASPECT.1
            {
                debug!(id = %src, "skipping provenance aspect");
                continue;
            }

            let plan = self.plans.get(class_id)?;
            let json = fetch_json(conn, plan, src)?;
            let binaries = fetch_binaries(conn, plan, src)?;
            let Some(mut bindings) = cloner.insert_bindings(conn, &plan.class, &json, &binaries)?
            else {
                summary.skipped_dangling += 1;
                continue;
            };
            let tgt = self.inst_seq.next()?;
            bindings.push((":id".to_owned(), Value::Integer(tgt.as_i64())));
            bindings.push((":cls".to_owned(), Value::Integer(class_id)));
            for statement in &plan.insert {
                exec_with_bindings(conn, &statement.sql, &bindings)?;
            }
            self.ctx.remap_aspect(src, tgt);
            summary.aspects += 1;
        }
        info!(aspects = summary.aspects, "aspect pass done");
        Ok(())
    }

    fn copy_relationships(&mut self, summary: &mut TransformSummary) -> Result<()> {
        let _span = tracing::info_span!("relationships").entered();
        for link_table in LINK_TABLES {
            if !table_exists(&self.target, SOURCE_DB, link_table)?
                || !table_exists(&self.target, "main", link_table)?
            {
                continue;
            }
            self.copy_link_table(link_table, summary)?;
        }
        info!(relationships = summary.relationships, "relationship pass done");
        Ok(())
    }

    fn copy_link_table(&mut self, link_table: &str, summary: &mut TransformSummary) -> Result<()> {
        let conn = &self.target;
        let cloner = Cloner {
            schemas: &self.source_schemas,
            ref_cache: &self.ref_cache,
            ctx: &self.ctx,
            options: &self.options,
            handlers: &self.handlers,
            hooks: &self.hooks,
            code_scopes: &self.code_scopes,
            intra_database: self.intra_database,
        };

        let mut stmt = conn.prepare(&format!(
            "SELECT r.Id, r.ECClassId, r.SourceId, r.SourceECClassId, \
                    r.TargetId, r.TargetECClassId \
             FROM source.{link_table} r ORDER BY r.Id"
        ))?;
        let mut rows = stmt.query([])?;
        'rows: while let Some(row) = rows.next()? {
            if self.cancel.is_cancelled() {
                return Err(GraftError::Cancelled);
            }
            let src = EcId::from_i64(row.get(0)?);
            let class_id: i64 = row.get(1)?;
            let source_ep = EcId::from_i64(row.get(2)?);
            let source_ep_class: i64 = row.get(3)?;
            let target_ep = EcId::from_i64(row.get(4)?);
            let target_ep_class: i64 = row.get(5)?;
            let plan = self.plans.get(class_id)?;

            for (role, endpoint) in [("Source", source_ep), ("Target", target_ep)] {
                if self.ctx.lookup(EntityKind::Element, endpoint).is_none() {
                    match self.options.dangling_references {
                        DanglingBehavior::Reject => {
                            return Err(GraftError::DanglingReference {
                                class: plan.class.full_name.to_string(),
                                property: role.to_owned(),
                                id: endpoint.get(),
                            });
                        }
                        DanglingBehavior::Ignore => {
                            warn!(
                                relationship = %src,
                                role,
                                id = %endpoint,
                                "skipping relationship with dangling endpoint"
                            );
                            summary.skipped_dangling += 1;
                            continue 'rows;
                        }
                    }
                }
            }

            let json = fetch_json(conn, plan, src)?;
            let binaries = fetch_binaries(conn, plan, src)?;
            let Some(mut bindings) = cloner.insert_bindings(conn, &plan.class, &json, &binaries)?
            else {
                summary.skipped_dangling += 1;
                continue;
            };
            let tgt = self.inst_seq.next()?;
            bindings.push((":id".to_owned(), Value::Integer(tgt.as_i64())));
            bindings.push((":cls".to_owned(), Value::Integer(class_id)));
            bindings.push((":src_ep".to_owned(), Value::Integer(source_ep.as_i64())));
            bindings.push((":src_ep_cls".to_owned(), Value::Integer(source_ep_class)));
            bindings.push((":tgt_ep".to_owned(), Value::Integer(target_ep.as_i64())));
            bindings.push((":tgt_ep_cls".to_owned(), Value::Integer(target_ep_class)));
            for statement in &plan.insert {
                exec_with_bindings(conn, &statement.sql, &bindings)?;
            }
            summary.relationships += 1;
        }
        Ok(())
    }

    fn finalize(&mut self) -> Result<()> {
        let conn = &self.target;
        self.elem_seq.save(conn, "main")?;
        self.inst_seq.save(conn, "main")?;
        conn.execute(
            "INSERT INTO main.be_Local (Name, Val) VALUES (?1, ?2) \
             ON CONFLICT(Name) DO UPDATE SET Val = excluded.Val",
            rusqlite::params![
                SCOPE_MARKER_KEY,
                self.options.target_scope_element_id.to_hex()
            ],
        )?;
        for trigger in &self.saved_triggers {
            conn.execute_batch(&trigger.sql)
                .map_err(|e| GraftError::TriggerRestore {
                    trigger: trigger.name.clone(),
                    source: e,
                })?;
        }
        self.saved_triggers.clear();
        conn.execute_batch("COMMIT")?;
        // Cached statements still reference the attached schema; clear
        // them before the detach or it fails with "database is locked".
        conn.flush_prepared_statement_cache();
        conn.execute_batch("DETACH DATABASE source")?;
        Ok(())
    }
}

/// Fetch a row's `$` JSON projection via the class plan.
fn fetch_json(conn: &Connection, plan: &ClassPlan, id: EcId) -> Result<Json> {
    let text: String = conn
        .prepare_cached(&plan.select_json)?
        .query_row([id.as_i64()], |r| r.get(0))?;
    serde_json::from_str(&text)
        .map_err(|e| GraftError::internal(format!("bad row projection for {id}: {e}")))
}

/// Fetch a row's binary columns via the class plan.
fn fetch_binaries(conn: &Connection, plan: &ClassPlan, id: EcId) -> Result<BinaryRow> {
    let Some(select) = &plan.select_binaries else {
        return Ok(BinaryRow::new());
    };
    let row = conn
        .prepare_cached(&select.sql)?
        .query_row([id.as_i64()], |row| {
            let mut values = BinaryRow::with_capacity(select.cols.len());
            for (i, (name, kind)) in select.cols.iter().enumerate() {
                values.push((name.clone(), *kind, row.get::<_, Value>(i)?));
            }
            Ok(values)
        })?;
    Ok(row)
}

/// Bind every matching named parameter and step the statement.
fn exec_with_bindings(conn: &Connection, sql: &str, bindings: &RowBindings) -> Result<usize> {
    let mut stmt = conn.prepare_cached(sql)?;
    for (name, value) in bindings {
        if let Some(index) = stmt.parameter_index(name)? {
            stmt.raw_bind_parameter(index, value)?;
        }
    }
    Ok(stmt.raw_execute()?)
}

/// The COALESCE expression and joins pulling each element's geometry
/// stream from whichever geometry table owns it.
fn geometry_join(conn: &Connection) -> Result<(String, String)> {
    let mut exprs = Vec::new();
    let mut joins = String::new();
    for (table, alias) in GEOMETRY_TABLES {
        if !table_exists(conn, SOURCE_DB, table)? {
            continue;
        }
        exprs.push(format!("{alias}.GeometryStream"));
        joins.push_str(&format!(
            " LEFT JOIN {SOURCE_DB}.{table} {alias} ON {alias}.ECInstanceId = e.Id"
        ));
    }
    let expr = match exprs.len() {
        0 => "NULL".to_owned(),
        1 => exprs.remove(0),
        _ => format!("COALESCE({})", exprs.join(", ")),
    };
    Ok((expr, joins))
}

fn suspend_triggers(conn: &Connection) -> Result<Vec<SavedTrigger>> {
    let mut triggers = Vec::new();
    let mut stmt = conn.prepare(
        "SELECT name, sql FROM main.sqlite_master WHERE type = 'trigger' AND sql IS NOT NULL",
    )?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        triggers.push(SavedTrigger {
            name: row.get(0)?,
            sql: row.get(1)?,
        });
    }
    drop(rows);
    drop(stmt);
    for trigger in &triggers {
        debug!(trigger = %trigger.name, "suspending trigger");
        conn.execute_batch(&format!("DROP TRIGGER main.\"{}\"", trigger.name))?;
    }
    Ok(triggers)
}

fn check_scope_marker(conn: &Connection, requested: EcId) -> Result<()> {
    let existing: Option<String> = conn
        .query_row(
            "SELECT Val FROM main.be_Local WHERE Name = ?1",
            [SCOPE_MARKER_KEY],
            |r| r.get(0),
        )
        .optional()?;
    let Some(existing) = existing else {
        return Ok(());
    };
    let existing = EcId::from_hex(&existing)
        .ok_or_else(|| GraftError::internal(format!("malformed scope marker '{existing}'")))?;
    if existing != requested {
        return Err(GraftError::TargetScopeConflict {
            existing: existing.get(),
            requested: requested.get(),
        });
    }
    Ok(())
}

fn read_db_guid(conn: &Connection, db: &str) -> Result<Option<String>> {
    let guid: Option<String> = conn
        .query_row(
            &format!("SELECT Val FROM {db}.be_Local WHERE Name = ?1"),
            [DB_GUID_KEY],
            |r| r.get(0),
        )
        .optional()?;
    Ok(guid)
}
