use crate::graph::{BranchId, NodeId};
use std::fmt;

#[derive(Debug)]
pub enum AudioChainError {
    Graph(GraphError),
    Source(SourceError),
    Decode(DecodeError),
}

/// Structural errors. These indicate caller sequencing bugs (operating on a
/// branch that was never created, feeding a non-source node, using a closed
/// context) and are meant to surface loudly rather than be swallowed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    UnknownBranch { branch: BranchId },
    UnknownNode { node: NodeId },
    WrongBranchKind { branch: BranchId, op: &'static str },
    NotASource { node: NodeId },
    EmptyImpulse { branch: BranchId },
    AnalyserDisabled,
    ContextClosed { op: &'static str },
}

/// A live source could not be acquired (microphone permission denied,
/// device failure). Surfaced to the user as a warning; the graph is left
/// in its prior state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    PermissionDenied { reason: String },
    DeviceUnavailable { reason: String },
}

/// A user-supplied file could not be decoded as audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    UnsupportedFormat,
    Malformed { detail: String },
}

impl fmt::Display for AudioChainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AudioChainError::Graph(e) => write!(f, "Graph error: {e}"),
            AudioChainError::Source(e) => write!(f, "Source error: {e}"),
            AudioChainError::Decode(e) => write!(f, "Decode error: {e}"),
        }
    }
}

impl std::error::Error for AudioChainError {}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphError::UnknownBranch { branch } => {
                write!(f, "No such branch {branch:?}; create the branch before operating on it")
            }
            GraphError::UnknownNode { node } => write!(f, "No such node {node:?}"),
            GraphError::WrongBranchKind { branch, op } => {
                write!(f, "Branch {branch:?} does not support {op}")
            }
            GraphError::NotASource { node } => {
                write!(f, "Node {node:?} is not a source and cannot be fed input")
            }
            GraphError::EmptyImpulse { branch } => {
                write!(f, "Refusing to load an empty impulse buffer into branch {branch:?}")
            }
            GraphError::AnalyserDisabled => {
                write!(f, "No analyser branch is configured for this session")
            }
            GraphError::ContextClosed { op } => {
                write!(f, "Audio context is closed; cannot {op}")
            }
        }
    }
}

impl std::error::Error for GraphError {}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceError::PermissionDenied { reason } => {
                write!(f, "Microphone permission denied: {reason}")
            }
            SourceError::DeviceUnavailable { reason } => {
                write!(f, "Audio device unavailable: {reason}")
            }
        }
    }
}

impl std::error::Error for SourceError {}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::UnsupportedFormat => {
                write!(f, "Data is not recognized as WAV or MP3 audio")
            }
            DecodeError::Malformed { detail } => write!(f, "Malformed audio data: {detail}"),
        }
    }
}

impl std::error::Error for DecodeError {}

impl From<GraphError> for AudioChainError {
    fn from(e: GraphError) -> Self {
        AudioChainError::Graph(e)
    }
}

impl From<SourceError> for AudioChainError {
    fn from(e: SourceError) -> Self {
        AudioChainError::Source(e)
    }
}

impl From<DecodeError> for AudioChainError {
    fn from(e: DecodeError) -> Self {
        AudioChainError::Decode(e)
    }
}
