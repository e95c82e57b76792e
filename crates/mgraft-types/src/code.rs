//! Element codes: the `(spec, scope, value)` naming triple.

use crate::id::EcId;

/// A human-readable name for an element within a scope.
///
/// A code is *empty* when its spec or scope id is invalid. Empty codes are
/// canonicalized to `(invalid, invalid, "")` before writing, so that two
/// unnamed elements never collide on the code uniqueness constraint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Code {
    /// The code spec defining the scope semantics.
    pub spec: EcId,
    /// The element providing the uniqueness scope.
    pub scope: EcId,
    /// The name itself.
    pub value: String,
}

impl Code {
    /// Create a code.
    pub fn new(spec: EcId, scope: EcId, value: impl Into<String>) -> Self {
        Self {
            spec,
            scope,
            value: value.into(),
        }
    }

    /// The canonical empty code.
    pub fn empty() -> Self {
        Self {
            spec: EcId::INVALID,
            scope: EcId::INVALID,
            value: String::new(),
        }
    }

    /// A code is empty when either the spec or the scope is invalid.
    pub fn is_empty(&self) -> bool {
        !self.spec.is_valid() || !self.scope.is_valid()
    }

    /// Canonicalize: an empty code becomes [`Code::empty`], anything else is
    /// returned unchanged.
    #[must_use]
    pub fn canonicalized(self) -> Self {
        if self.is_empty() {
            Self::empty()
        } else {
            self
        }
    }
}

impl Default for Code {
    fn default() -> Self {
        Self::empty()
    }
}
