//! The remap context: everything needed to answer "what is this source id
//! called in the target?".
//!
//! Four run-compressed remap tables (element, aspect, codespec, font), the
//! class-rename and codespec-by-name rule maps, and the polymorphic
//! [`RemapContext::find_target_entity_id`] resolver. The tables sit behind
//! an `Arc<RwLock<..>>` because the `remap_geom` SQL function registered on
//! the target connection reads them from inside statement execution.

use std::collections::HashMap;
use std::sync::Arc;

use mgraft_error::{GraftError, Result};
use mgraft_types::{ClassFullName, CompactRemapTable, EcId, EntityKind, EntityRef};
use parking_lot::RwLock;
use rusqlite::{Connection, OptionalExtension};
use tracing::warn;

/// Link tables a relationship id may live in, probed in order.
pub(crate) const LINK_TABLES: [&str; 2] =
    ["bis_ElementRefersToElements", "bis_ElementDrivesElement"];

/// The shared remap tables.
#[derive(Debug, Default)]
pub(crate) struct RemapStore {
    pub element: CompactRemapTable,
    pub aspect: CompactRemapTable,
    pub codespec: CompactRemapTable,
    pub font: CompactRemapTable,
}

impl RemapStore {
    fn table(&self, kind: EntityKind) -> Option<&CompactRemapTable> {
        match kind {
            EntityKind::Element | EntityKind::Model => Some(&self.element),
            EntityKind::Aspect => Some(&self.aspect),
            EntityKind::CodeSpec => Some(&self.codespec),
            EntityKind::Relationship => None,
        }
    }
}

/// Resolves source ids to target ids for every entity kind.
pub struct RemapContext {
    store: Arc<RwLock<RemapStore>>,
    class_rules: HashMap<ClassFullName, ClassFullName>,
    codespec_rules: HashMap<String, (EcId, EcId)>,
}

impl Default for RemapContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RemapContext {
    /// Create a context with the base remaps installed: invalid maps to
    /// invalid in every table, and the well-known roots map
    /// identity-to-identity in the element table.
    pub fn new() -> Self {
        let mut store = RemapStore::default();
        store.element.remap(0, 0);
        store.aspect.remap(0, 0);
        store.codespec.remap(0, 0);
        store.font.remap(0, 0);
        for id in EcId::WELL_KNOWN {
            store.element.remap(id.get(), id.get());
        }
        Self {
            store: Arc::new(RwLock::new(store)),
            class_rules: HashMap::new(),
            codespec_rules: HashMap::new(),
        }
    }

    /// Handle shared with SQL function closures.
    pub(crate) fn shared(&self) -> Arc<RwLock<RemapStore>> {
        Arc::clone(&self.store)
    }

    /// Record an element (or model) mapping.
    pub fn remap_element(&self, src: EcId, tgt: EcId) {
        self.store.write().element.remap(src.get(), tgt.get());
    }

    /// Record an aspect mapping.
    pub fn remap_aspect(&self, src: EcId, tgt: EcId) {
        self.store.write().aspect.remap(src.get(), tgt.get());
    }

    /// Record a codespec mapping.
    pub fn remap_code_spec(&self, src: EcId, tgt: EcId) {
        self.store.write().codespec.remap(src.get(), tgt.get());
    }

    /// Record a font mapping. The font table is populated by the caller;
    /// unmapped font ids resolve to themselves.
    pub fn remap_font(&self, src: EcId, tgt: EcId) {
        self.store.write().font.remap(src.get(), tgt.get());
    }

    /// Replace the element table with identity over `0..=max`. Used when
    /// the target began its life as a copy of the source.
    pub fn seed_element_identity(&self, max: EcId) {
        let mut table = CompactRemapTable::new();
        table.insert_run(0, 0, max.get() + 1);
        self.store.write().element = table;
    }

    /// Look up a mapping without invalid-fallback. `None` means unmapped;
    /// relationship ids are never in a table and always return `None`.
    pub fn lookup(&self, kind: EntityKind, id: EcId) -> Option<EcId> {
        let store = self.store.read();
        store.table(kind)?.get(id.get()).map(EcId::new)
    }

    /// Target element id, or invalid when unmapped.
    pub fn find_target_element_id(&self, id: EcId) -> EcId {
        self.lookup(EntityKind::Element, id).unwrap_or(EcId::INVALID)
    }

    /// Target aspect id, or invalid when unmapped.
    pub fn find_target_aspect_id(&self, id: EcId) -> EcId {
        self.lookup(EntityKind::Aspect, id).unwrap_or(EcId::INVALID)
    }

    /// Target codespec id, or invalid when unmapped.
    pub fn find_target_code_spec_id(&self, id: EcId) -> EcId {
        self.lookup(EntityKind::CodeSpec, id).unwrap_or(EcId::INVALID)
    }

    /// Target font id; unmapped fonts pass through unchanged.
    pub fn find_target_font_id(&self, id: EcId) -> EcId {
        self.store.read().font.get(id.get()).map_or(id, EcId::new)
    }

    /// Register a class rename rule applied during class-id translation.
    pub fn add_class_rule(&mut self, source: ClassFullName, target: ClassFullName) {
        self.class_rules.insert(source, target);
    }

    /// The target-side name of a source class, after rules.
    pub fn target_class(&self, source: &ClassFullName) -> ClassFullName {
        self.class_rules.get(source).cloned().unwrap_or_else(|| source.clone())
    }

    /// Record a codespec match by name.
    pub fn add_code_spec_rule(&mut self, name: impl Into<String>, src: EcId, tgt: EcId) {
        self.codespec_rules.insert(name.into(), (src, tgt));
        self.remap_code_spec(src, tgt);
    }

    /// The recorded codespec mapping for a name, if any.
    pub fn code_spec_rule(&self, name: &str) -> Option<(EcId, EcId)> {
        self.codespec_rules.get(name).copied()
    }

    /// Resolve a polymorphic entity reference to its target-side id.
    ///
    /// Elements, models, aspects, and codespecs go through their remap
    /// tables. Relationships are resolved structurally: read the endpoints
    /// and their kinds from the source link table, remap both, then look
    /// the edge up in the target by its remapped endpoint pair. An
    /// unresolvable endpoint yields an invalid reference; an endpoint that
    /// resolves to the relationship itself is fatal.
    pub fn find_target_entity_id(&self, conn: &Connection, r: EntityRef) -> Result<EntityRef> {
        if !r.id.is_valid() {
            return Ok(EntityRef::invalid(r.kind));
        }
        match r.kind {
            EntityKind::Relationship => self.resolve_relationship(conn, r.id, 0),
            kind => Ok(EntityRef::new(
                kind,
                self.lookup(kind, r.id).unwrap_or(EcId::INVALID),
            )),
        }
    }

    fn resolve_relationship(
        &self,
        conn: &Connection,
        rel_id: EcId,
        depth: u8,
    ) -> Result<EntityRef> {
        let Some((table, row)) = read_link_row(conn, rel_id)? else {
            return Ok(EntityRef::invalid(EntityKind::Relationship));
        };

        let src = self.resolve_endpoint(conn, rel_id, depth, row.source, row.source_kind()?)?;
        let tgt = self.resolve_endpoint(conn, rel_id, depth, row.target, row.target_kind()?)?;
        if !src.is_valid() || !tgt.is_valid() {
            return Ok(EntityRef::invalid(EntityKind::Relationship));
        }

        let found: Option<i64> = conn
            .prepare_cached(&format!(
                "SELECT Id FROM main.{table} WHERE SourceId = ?1 AND TargetId = ?2 \
                 ORDER BY Id LIMIT 1"
            ))?
            .query_row([src.as_i64(), tgt.as_i64()], |r| r.get(0))
            .optional()?;
        Ok(EntityRef::new(
            EntityKind::Relationship,
            found.map(EcId::from_i64).unwrap_or(EcId::INVALID),
        ))
    }

    fn resolve_endpoint(
        &self,
        conn: &Connection,
        rel_id: EcId,
        depth: u8,
        endpoint: EcId,
        kind: EntityKind,
    ) -> Result<EcId> {
        if kind == EntityKind::Relationship {
            if endpoint == rel_id {
                return Err(GraftError::EndpointSelfReference {
                    relationship: rel_id.get(),
                });
            }
            if depth >= 1 {
                warn!(
                    relationship = %rel_id,
                    endpoint = %endpoint,
                    "relationship endpoint chain deeper than one level; treating as unresolved"
                );
                return Ok(EcId::INVALID);
            }
            return Ok(self.resolve_relationship(conn, endpoint, depth + 1)?.id);
        }
        Ok(self.lookup(kind, endpoint).unwrap_or(EcId::INVALID))
    }

    /// Flush all four tables into their temp SQL mirrors so the inline
    /// remap expressions of the hydrate and insert statements can resolve.
    pub fn flush_to_temp(&self, conn: &Connection) -> Result<()> {
        let store = self.store.read();
        for (table, runs) in [
            ("element_remap", store.element.runs()),
            ("aspect_remap", store.aspect.runs()),
            ("codespec_remap", store.codespec.runs()),
            ("font_remap", store.font.runs()),
        ] {
            conn.execute(&format!("DELETE FROM temp.{table}"), [])?;
            let mut insert = conn.prepare_cached(&format!(
                "INSERT INTO temp.{table} (SourceId, TargetId, Length) VALUES (?1, ?2, ?3)"
            ))?;
            for run in runs {
                insert.execute(rusqlite::params![
                    EcId::new(run.from).as_i64(),
                    EcId::new(run.to).as_i64(),
                    EcId::new(run.len).as_i64(),
                ])?;
            }
        }
        Ok(())
    }

    /// Persist the four remap tables into a state database, so an
    /// interrupted transform can resume.
    pub fn save_state(&self, state: &Connection) -> Result<()> {
        let store = self.store.read();
        for (table, runs) in [
            ("ElementIdRemaps", store.element.runs()),
            ("AspectIdRemaps", store.aspect.runs()),
            ("CodeSpecIdRemaps", store.codespec.runs()),
            ("FontIdRemaps", store.font.runs()),
        ] {
            state.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                     Source INTEGER NOT NULL,
                     Target INTEGER NOT NULL,
                     Length INTEGER NOT NULL
                 );
                 DELETE FROM {table};"
            ))?;
            let mut insert = state.prepare(&format!(
                "INSERT INTO {table} (Source, Target, Length) VALUES (?1, ?2, ?3)"
            ))?;
            for run in runs {
                insert.execute(rusqlite::params![
                    EcId::new(run.from).as_i64(),
                    EcId::new(run.to).as_i64(),
                    EcId::new(run.len).as_i64(),
                ])?;
            }
        }
        Ok(())
    }

    /// Load remap tables previously written by [`RemapContext::save_state`],
    /// replacing the in-memory tables wholesale.
    pub fn load_state(&self, state: &Connection) -> Result<()> {
        let mut loaded = RemapStore::default();
        for (table, dest) in [
            ("ElementIdRemaps", &mut loaded.element),
            ("AspectIdRemaps", &mut loaded.aspect),
            ("CodeSpecIdRemaps", &mut loaded.codespec),
            ("FontIdRemaps", &mut loaded.font),
        ] {
            let mut stmt = state.prepare(&format!(
                "SELECT Source, Target, Length FROM {table} ORDER BY Source"
            ))?;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                let from = EcId::from_i64(row.get(0)?).get();
                let to = EcId::from_i64(row.get(1)?).get();
                let len = EcId::from_i64(row.get(2)?).get();
                dest.insert_run(from, to, len);
            }
        }
        *self.store.write() = loaded;
        Ok(())
    }
}

struct LinkRow {
    source: EcId,
    target: EcId,
    source_kind: Option<String>,
    target_kind: Option<String>,
    source_class: i64,
    target_class: i64,
}

impl LinkRow {
    fn source_kind(&self) -> Result<EntityKind> {
        parse_kind(self.source_kind.as_deref(), self.source_class)
    }

    fn target_kind(&self) -> Result<EntityKind> {
        parse_kind(self.target_kind.as_deref(), self.target_class)
    }
}

fn parse_kind(letter: Option<&str>, class_id: i64) -> Result<EntityKind> {
    letter
        .and_then(|s| s.chars().next())
        .and_then(EntityKind::from_letter)
        .ok_or_else(|| GraftError::UnknownRootClass {
            class_id,
            root: letter.unwrap_or("<none>").to_owned(),
        })
}

/// Read a relationship's endpoints and their kinds from whichever source
/// link table holds it.
fn read_link_row(conn: &Connection, rel_id: EcId) -> Result<Option<(&'static str, LinkRow)>> {
    for table in LINK_TABLES {
        if !table_exists(conn, "source", table)? {
            continue;
        }
        let row = conn
            .prepare_cached(&format!(
                "SELECT r.SourceId, r.TargetId, \
                        (SELECT k.Kind FROM temp.class_kind k WHERE k.ClassId = r.SourceECClassId), \
                        (SELECT k.Kind FROM temp.class_kind k WHERE k.ClassId = r.TargetECClassId), \
                        r.SourceECClassId, r.TargetECClassId \
                 FROM source.{table} r WHERE r.Id = ?1"
            ))?
            .query_row([rel_id.as_i64()], |row| {
                Ok(LinkRow {
                    source: EcId::from_i64(row.get(0)?),
                    target: EcId::from_i64(row.get(1)?),
                    source_kind: row.get(2)?,
                    target_kind: row.get(3)?,
                    source_class: row.get(4)?,
                    target_class: row.get(5)?,
                })
            })
            .optional()?;
        if let Some(row) = row {
            return Ok(Some((table, row)));
        }
    }
    Ok(None)
}

/// Whether `db.table` exists.
pub(crate) fn table_exists(conn: &Connection, db: &str, table: &str) -> Result<bool> {
    let found: Option<i64> = conn
        .prepare_cached(&format!(
            "SELECT 1 FROM {db}.sqlite_master WHERE type = 'table' AND name = ?1"
        ))?
        .query_row([table], |r| r.get(0))
        .optional()?;
    Ok(found.is_some())
}
