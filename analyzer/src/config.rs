// config.rs — Analyzer and layout checker options
//
// Options are plain serde structs with defaults, so a JSON config file may
// set any subset of fields. The CLI loads the file first and then applies its
// flag overrides.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default alignment of padded continuous tensors, in bytes.
pub const DEFAULT_MEM_ALIGN: u64 = 512;

/// Knobs of the reuse analyzer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerOptions {
    /// Verdict when the reused port has no symbol entry at all. `true` keeps
    /// the documented conservative default: nothing is known to prevent reuse.
    pub reuse_without_symbol: bool,
    /// Dump every reach set at `debug!` level after `init`.
    pub trace_reach: bool,
}

impl Default for AnalyzerOptions {
    fn default() -> Self {
        AnalyzerOptions {
            reuse_without_symbol: true,
            trace_reach: false,
        }
    }
}

/// Knobs of the special-node layout checker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutOptions {
    /// Padded continuous tensors occupy `size` rounded up to this alignment.
    pub mem_align: u64,
    /// Skip post-assignment checks for nodes inside ffts+ subgraphs.
    pub skip_ffts_plus: bool,
}

impl Default for LayoutOptions {
    fn default() -> Self {
        LayoutOptions {
            mem_align: DEFAULT_MEM_ALIGN,
            skip_ffts_plus: true,
        }
    }
}

impl LayoutOptions {
    /// Bytes a padded continuous tensor of `size` bytes occupies; `None` if
    /// rounding up overflows.
    pub fn padded_size(&self, size: u64) -> Option<u64> {
        if self.mem_align <= 1 {
            return Some(size);
        }
        size.div_ceil(self.mem_align).checked_mul(self.mem_align)
    }
}

/// Top-level configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub analyzer: AnalyzerOptions,
    pub layout: LayoutOptions,
}

impl Config {
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }
}
