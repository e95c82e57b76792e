//! ModelGraft core: the bulk identity-remapping transformer.
//!
//! Copies the contents of one engineering-model SQLite database into
//! another, rewriting every internal identifier so references stay
//! consistent. The transform streams the source in ascending id order,
//! creates every row at its final primary key with placeholder references
//! (populate pass), then overwrites every reference column through
//! run-compressed remap tables mirrored into temp SQL tables (hydrate
//! pass), followed by aspects and relationships.
//!
//! ```no_run
//! use mgraft_core::{TransformOptions, Transformer};
//! use rusqlite::Connection;
//!
//! # fn main() -> mgraft_error::Result<()> {
//! let target = Connection::open("target.db")?;
//! let mut transformer = Transformer::new(target, "source.db", TransformOptions::default())?;
//! let summary = transformer.run()?;
//! println!("copied {} elements", summary.elements);
//! # Ok(())
//! # }
//! ```

pub mod cloner;
pub mod context;
pub mod functions;
pub mod options;
pub mod plan;
pub mod ref_cache;
pub mod schema;
pub mod sequence;
pub mod transform;

pub use cloner::{
    Cloner, CodeScopeType, HandlerRegistry, HookRegistry, OnClonedHook, SpecialHandler,
};
pub use context::RemapContext;
pub use functions::register_functions;
pub use options::{DanglingBehavior, TransformOptions};
pub use plan::{ClassPlan, PlanBuilder, PlanCache};
pub use ref_cache::RefTypeCache;
pub use schema::SchemaMap;
pub use sequence::{IdSequence, ELEMENT_ID_SEQUENCE, INSTANCE_ID_SEQUENCE};
pub use transform::{CancelToken, TransformSummary, Transformer};

pub use mgraft_error::{GraftError, Result};
pub use mgraft_types::{Code, EcId, EntityKind, EntityRef};
