//! Reference-type cache: which entity kind a navigation property points to.
//!
//! A navigation column stores only a numeric id and an optional class id.
//! Without this cache the cloner cannot know whether `0x200000001` refers
//! to an element or an aspect, and so cannot pick the correct remap table.
//! Built once from the source catalog; a miss at clone time is a
//! programming error surfaced as [`GraftError::SchemaMissing`].

use std::collections::HashMap;

use mgraft_error::{GraftError, Result};
use mgraft_types::{ClassFullName, EntityKind, PropertyKind};

use crate::schema::SchemaMap;

/// Memoized `(schema, class, property) → entity kind` lookups.
#[derive(Debug, Default)]
pub struct RefTypeCache {
    map: HashMap<(String, String, String), EntityKind>,
}

impl RefTypeCache {
    /// Build the cache from a lowered catalog. Every concrete class is
    /// registered with its full (inherited) navigation property set.
    pub fn build(schemas: &SchemaMap) -> Self {
        let mut map = HashMap::new();
        for class in schemas.iter() {
            for prop in class.all_props() {
                if prop.kind == PropertyKind::Navigation {
                    if let Some(kind) = prop.nav_target {
                        map.insert(
                            (
                                class.full_name.schema.clone(),
                                class.full_name.name.clone(),
                                prop.name.clone(),
                            ),
                            kind,
                        );
                    }
                }
            }
        }
        Self { map }
    }

    /// The entity kind `class.property` points at.
    pub fn lookup(&self, class: &ClassFullName, property: &str) -> Result<EntityKind> {
        self.map
            .get(&(
                class.schema.clone(),
                class.name.clone(),
                property.to_owned(),
            ))
            .copied()
            .ok_or_else(|| GraftError::SchemaMissing {
                schema: class.schema.clone(),
                class: class.name.clone(),
                property: property.to_owned(),
            })
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
