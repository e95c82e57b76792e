//! Primary error type for ModelGraft transform operations.
//!
//! One structured variant per stable error kind, so drivers can match on
//! the failure class without parsing messages. Fatal errors abort the
//! transform and roll back the open transaction; the only non-fatal
//! conditions are modeled outside this enum (a duplicate code spec is
//! reused, a dangling reference under the `ignore` policy is written as
//! invalid and logged).

use thiserror::Error;

/// Error raised by a transform.
#[derive(Error, Debug)]
pub enum GraftError {
    /// A navigation property has no entry in the reference-type cache.
    /// Always a schema/catalog defect, never a data defect.
    #[error("no reference-type entry for {schema}:{class}.{property}")]
    SchemaMissing {
        /// Schema of the class being cloned.
        schema: String,
        /// Class being cloned.
        class: String,
        /// The navigation property that missed the cache.
        property: String,
    },

    /// A relationship endpoint's class does not descend from any known
    /// root class.
    #[error("unknown root class for class id {class_id} (root '{root}')")]
    UnknownRootClass {
        /// The offending class id in the source catalog.
        class_id: i64,
        /// Name of the root the base-class walk ended on.
        root: String,
    },

    /// A relationship endpoint resolved to the relationship itself.
    #[error("relationship {relationship:#x} endpoint resolves to itself")]
    EndpointSelfReference {
        /// Raw id of the relationship being resolved.
        relationship: u64,
    },

    /// A required reference has no mapping in the target and the dangling
    /// policy is `reject`.
    #[error("dangling reference: {class}.{property} points at unmapped id {id:#x}")]
    DanglingReference {
        /// Class of the row holding the reference.
        class: String,
        /// Property (or endpoint role) holding the reference.
        property: String,
        /// The unmapped source id.
        id: u64,
    },

    /// An id sequence would exceed the briefcase-local id space.
    #[error("id sequence '{sequence}' exhausted: next value {next:#x} exceeds {max:#x}")]
    SequenceOverflow {
        /// The `be_Local` sequence name.
        sequence: String,
        /// The value that would have been handed out.
        next: u64,
        /// The last representable id for this briefcase.
        max: u64,
    },

    /// A prepared statement returned an engine error.
    #[error("statement execution failed: {0}")]
    Statement(#[from] rusqlite::Error),

    /// Reinstating a suspended trigger failed after data was written.
    #[error("failed to reinstate trigger '{trigger}': {source}")]
    TriggerRestore {
        /// Trigger name from the saved DDL.
        trigger: String,
        /// Underlying engine error.
        source: rusqlite::Error,
    },

    /// The target already carries a scope marker from a different
    /// transform.
    #[error("target is scoped to element {existing:#x}, transform requested {requested:#x}")]
    TargetScopeConflict {
        /// Scope element id recorded in the target.
        existing: u64,
        /// Scope element id this transform was configured with.
        requested: u64,
    },

    /// A geometry stream could not be decoded.
    #[error("malformed geometry stream: {detail}")]
    MalformedGeometry {
        /// Codec-level failure description.
        detail: String,
    },

    /// The transform was cancelled cooperatively.
    #[error("transform cancelled")]
    Cancelled,

    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal logic error (should never happen).
    #[error("internal error: {0}")]
    Internal(String),
}

impl GraftError {
    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether the transform state may be saved and resumed after this
    /// error. Only cooperative cancellation qualifies; everything else is
    /// fatal.
    pub const fn is_resumable(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Whether this error signals a defect in schema/catalog handling
    /// rather than in the data being copied.
    pub const fn is_schema_defect(&self) -> bool {
        matches!(
            self,
            Self::SchemaMissing { .. } | Self::UnknownRootClass { .. }
        )
    }
}

/// Result type alias using [`GraftError`].
pub type Result<T> = std::result::Result<T, GraftError>;
