use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy for the search and tree engines.
///
/// Validation errors are terminal for the request and surfaced to the
/// caller verbatim. Only [`Error::StorageUnavailable`] is eligible for
/// caller-driven retry; the engines never retry internally.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed embedding on the write path: wrong dimensionality or a
    /// zero vector that cannot be normalized.
    #[error("invalid vector: {0}")]
    InvalidVector(String),

    /// Malformed query embedding on the read path.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// Upstream face-model signal, passed through unchanged.
    #[error("no face detected in the supplied image")]
    NoFaceDetected,

    /// `add_member` found no node owning the requested parent anywhere in
    /// the tree.
    #[error("parent {person_id} not found in tree {tree_id}")]
    ParentNotFound { tree_id: String, person_id: String },

    #[error("family tree not found: {0}")]
    TreeNotFound(String),

    /// The person already belongs to a family tree. A person belongs to at
    /// most one tree at a time.
    #[error("person {0} already belongs to a family tree")]
    AlreadyMember(String),

    #[error("person not found: {0}")]
    PersonNotFound(String),

    #[error("contact key already registered: {0}")]
    ContactKeyInUse(String),

    /// Transient storage failure. Propagated to the caller, who decides
    /// whether to retry.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
}
