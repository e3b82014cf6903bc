use super::{EntityId, EntityKind};
use thiserror::Error;

/// Structural and contract errors of the entity store.
///
/// None of these wrap I/O; every variant indicates a caller bug or a
/// corrupted store caught by [`Database::assert_valid`](super::Database::assert_valid).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// A by-name lookup found no entity of the requested kind.
    #[error("no {kind} named `{name}`")]
    NameNotFound {
        /// The kind table that was searched.
        kind: EntityKind,
        /// The name that was looked up.
        name: String,
    },

    /// A required attribute is absent.
    #[error("{id} is missing required attribute `{attribute}`")]
    MissingAttribute {
        /// The entity lacking the attribute.
        id: EntityId,
        /// The attribute table that has no row for the entity.
        attribute: &'static str,
    },

    /// An entity appeared where its kind is not allowed.
    #[error("{kind} {id} cannot appear under {parent_kind} {parent}")]
    KindMismatch {
        /// The attachment point.
        parent: EntityId,
        /// Kind of the attachment point.
        parent_kind: EntityKind,
        /// The offending entity.
        id: EntityId,
        /// Kind of the offending entity.
        kind: EntityKind,
    },

    /// The parent relation is not a forest.
    #[error("parent chain of {id} contains a cycle")]
    CycleDetected {
        /// An entity on the cyclic chain.
        id: EntityId,
    },

    /// An id is referenced but registered in no kind table.
    #[error("{id} is not registered in any kind table")]
    UnknownEntity {
        /// The dangling id.
        id: EntityId,
    },

    /// A mode or enum reference escapes the referencing entity's ancestry.
    #[error("{id} references a {what} ({referenced}) that is not visible from its ancestry")]
    ScopeViolation {
        /// The referencing entity.
        id: EntityId,
        /// The referenced mode or enum.
        referenced: EntityId,
        /// What was referenced, for diagnostics.
        what: &'static str,
    },
}
