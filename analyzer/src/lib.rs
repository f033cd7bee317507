// mra — memory-reuse dependency analyzer
//
// Library root. Decides whether one tensor's block may be reused by another
// in a scheduled, multi-stream dataflow graph, and checks the layout of
// contiguous-memory operators around offset assignment.

pub mod analyzer;
pub mod bitmap;
pub mod config;
pub mod diag;
pub mod dot;
pub mod error;
pub mod graph;
pub mod id;
pub mod index;
pub mod layout;
pub mod merge;
pub mod pass;
pub mod pipeline;
pub mod reach;
pub mod report;
pub mod reuse;
pub mod symbol;

pub use analyzer::{DebugAnalyzer, DependencyAnalyzer};
pub use error::{Error, Result};
