use thiserror::Error;

/// Errors raised by the agent core.
///
/// `Consistency`, `Configuration` and `Precondition` are fatal: ranks hold
/// replicated state, so no caller should try to continue after one of them.
#[derive(Debug, Error)]
pub enum AngioError {
    /// Ranks disagree about an agent, or a removal target is missing.
    #[error("consistency error: {0}")]
    Consistency(String),
    /// A required geometric or physical parameter is missing or unusable.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// A derived result was requested before it was produced.
    #[error("precondition violated: {0}")]
    Precondition(&'static str),
    /// A rank stopped while others still waited on it in a collective.
    #[error("rank {0} left the cluster during a collective")]
    RankLeft(usize),
    /// The root failed an operation the other ranks took part in.
    #[error("root rank failed: {0}")]
    RootFailed(String),
    #[error("collective payload codec error: {0}")]
    Codec(#[from] bincode::Error),
    #[error("checkpoint io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("checkpoint json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("checkpoint messagepack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),
    #[error("checkpoint messagepack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),
}

pub type Result<T> = std::result::Result<T, AngioError>;
