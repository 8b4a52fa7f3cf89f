/// Errors from the storage node registry.
#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    /// No storage node is known, so new content has nowhere to go.
    #[error("no storage node available for placement")]
    PlacementUnavailable,

    #[error("unknown storage node: {0}")]
    UnknownNode(String),
}

pub type ClusterResult<T> = Result<T, ClusterError>;
