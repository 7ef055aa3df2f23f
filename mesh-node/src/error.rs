use std::time::Duration;

use mesh_core::{FrameDecodeError, FrameEncodeError, RouterError};

pub type Result<T> = std::result::Result<T, NodeError>;

#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Encode(#[from] FrameEncodeError),
    #[error(transparent)]
    Decode(#[from] FrameDecodeError),
    #[error(transparent)]
    Router(#[from] RouterError),
    #[error("connection closed before a reply arrived")]
    Closed,
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("unexpected `{0}` message")]
    Unexpected(&'static str),
    #[error("invalid filename {0:?}")]
    InvalidFilename(String),
    #[error("download truncated: expected {expected} bytes, got {got}")]
    Truncated { expected: u64, got: u64 },
    #[error("config error: {0}")]
    Config(String),
}
