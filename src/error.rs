use thiserror::Error;

/// Fatal error kinds produced by the rigging core.
///
/// Every variant carries enough context (component, offending index) for a
/// caller to log and skip the sample being processed; none of them are
/// recoverable within the sample itself. Non-fatal conditions (imputed
/// weights, partial correspondence) are reported through
/// [`crate::rig::DiagnosticsReport`] instead.
#[derive(Error, Debug)]
pub enum RigError {
    /// The symbol decoder saw a token in an invalid position, outside the
    /// vocabulary range, or the sequence ended mid-bone.
    #[error("malformed token sequence at symbol {position}: {reason}")]
    MalformedSequence { position: usize, reason: String },

    /// A bone declared a parent index that does not precede it in the
    /// finalized bone list.
    #[error("bone {bone} declares parent {parent}, which does not precede it")]
    InvalidParent { bone: usize, parent: usize },

    /// More than one bone decoded without a parent and no synthetic root
    /// was requested.
    #[error("skeleton has {count} root bones; expected exactly one")]
    MultipleRoots { count: usize },

    /// Zero bone names are shared between the two skeletons being merged.
    #[error("no bone names are shared between the weight source and the target skeleton")]
    NoCorrespondence,

    /// The weight table and the target mesh disagree on vertex count.
    #[error("weight table covers {weight_vertices} vertices but the target mesh has {mesh_vertices}")]
    TopologyMismatch {
        weight_vertices: usize,
        mesh_vertices: usize,
    },

    /// A merge step was requested out of order.
    #[error("merge step '{requested}' is not reachable from phase '{current}'")]
    PhaseViolation {
        current: &'static str,
        requested: &'static str,
    },

    #[error("filesystem error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
