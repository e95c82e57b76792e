//! Transform configuration.

use mgraft_types::EcId;

/// What to do when a reference's source id has no mapping in the target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DanglingBehavior {
    /// Fail the transform (the default).
    #[default]
    Reject,
    /// Write the reference as invalid and log a warning. Link-table rows
    /// and aspects whose required endpoint dangles are skipped instead.
    Ignore,
}

/// Options recognized by a transform.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TransformOptions {
    /// Identity marker preventing two differently-scoped transforms from
    /// writing into the same target. Recorded in the target at finalize.
    pub target_scope_element_id: EcId,
    /// Copy external-source provenance aspects through to the target.
    pub include_source_provenance: bool,
    /// Assign `target_id = source_id` instead of consuming the element id
    /// sequence. The target's sequence is pre-advanced past the maximum
    /// source id.
    pub preserve_element_ids: bool,
    /// Policy for references whose target cannot be resolved.
    pub dangling_references: DanglingBehavior,
    /// Seed the element remap table with identity for all source ids
    /// (master/branch workflows where the target began as a copy).
    pub was_source_copied_to_target: bool,
    /// Copy federation GUIDs even across databases. Intra-database
    /// transforms always keep them.
    pub preserve_federation_guids: bool,
}

impl Default for TransformOptions {
    fn default() -> Self {
        Self {
            target_scope_element_id: EcId::ROOT_SUBJECT,
            include_source_provenance: true,
            preserve_element_ids: false,
            dangling_references: DanglingBehavior::default(),
            was_source_copied_to_target: false,
            preserve_federation_guids: false,
        }
    }
}
