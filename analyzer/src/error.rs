// error.rs — Crate error type
//
// Hard failures only: structural problems that leave the analyzer
// un-queryable, layout violations that abort the current graph, and I/O or
// JSON errors from the loaders. Soft conditions are logged, not returned.

use std::path::PathBuf;

use thiserror::Error;

use crate::diag::Diagnostic;
use crate::pass::ArtifactId;

#[derive(Debug, Error)]
pub enum Error {
    #[error("nodes '{first}' and '{second}' share topological id {topo_id}")]
    DuplicateId {
        topo_id: i64,
        first: String,
        second: String,
    },

    #[error("node '{node}' has no operator descriptor")]
    MissingOpDescriptor { node: String },

    #[error("node '{node}' has topological id {topo_id} outside 0..{count}")]
    InvalidTopoId {
        node: String,
        topo_id: i64,
        count: usize,
    },

    #[error("link {from} -> {to} has no matching entry on the other end")]
    DanglingEdge { from: String, to: String },

    #[error("node '{node}' carries arena id {id} at arena position {position}")]
    ArenaIdMismatch { node: String, id: u32, position: usize },

    #[error("unknown node '{0}'")]
    UnknownNode(String),

    #[error("invalid reuse query '{0}', expected A:i,B:j")]
    InvalidQuery(String),

    #[error("pass input {0:?} was not produced")]
    MissingArtifact(ArtifactId),

    #[error("{0}")]
    Layout(Diagnostic),

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<Diagnostic> for Error {
    fn from(diag: Diagnostic) -> Self {
        Error::Layout(diag)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
