//! Core data types for the ModelGraft bulk identity-remapping transformer.
//!
//! This crate is the dependency leaf of the workspace: 64-bit ids and typed
//! entity references, element codes, the table-driven class/property
//! descriptors the SQL synthesis runs on, the run-compressed remap table,
//! and the geometry-stream codec. Nothing here touches SQLite.

pub mod code;
pub mod geom;
pub mod id;
pub mod remap;
pub mod schema;

pub use code::Code;
pub use geom::{GeomRecord, GeomRecordIter, GeomStreamError, remap_stream, write_record};
pub use id::{EcId, EntityKind, EntityRef};
pub use remap::{CompactRemapTable, RemapRun};
pub use schema::{
    ClassDescriptor, ClassFullName, ClassTable, EXT_TYPE_FONT_ID, EXT_TYPE_JSON,
    PropertyDescriptor, PropertyKind,
};
