// diag.rs — Layout diagnostics model
//
// Structured diagnostics emitted by the special-node layout checker. Each
// carries a stable code, the offending node, the attribute involved and an
// optional remediation hint.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;

// ── Diagnostic code ──────────────────────────────────────────────────────

/// A stable diagnostic code (e.g., `E0201`).
///
/// Once assigned, a code must never be reassigned to a different meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiagCode(pub &'static str);

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Registered codes. `E02xx`: structural checks before offset assignment.
/// `E03xx`: physical checks after offset assignment.
pub mod codes {
    use super::DiagCode;

    pub const E0201: DiagCode = DiagCode("E0201"); // padded and no-padding continuity both set
    pub const E0202: DiagCode = DiagCode("E0202"); // phony concat fan-in mismatch
    pub const E0203: DiagCode = DiagCode("E0203"); // phony split fan-out mismatch
    pub const E0204: DiagCode = DiagCode("E0204"); // continuous input without producer
    pub const E0205: DiagCode = DiagCode("E0205"); // continuous output node with no outputs
    pub const E0206: DiagCode = DiagCode("E0206"); // missing fan-in/fan-out attribute
    pub const E0207: DiagCode = DiagCode("E0207"); // missing operator descriptor

    pub const E0301: DiagCode = DiagCode("E0301"); // offset not assigned
    pub const E0302: DiagCode = DiagCode("E0302"); // offsets not contiguous
    pub const E0303: DiagCode = DiagCode("E0303"); // offset differs from recorded expectation
    pub const E0304: DiagCode = DiagCode("E0304"); // phony node not zero-copy
}

// ── Severity level ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagLevel {
    Error,
    Warning,
}

// ── Diagnostic ───────────────────────────────────────────────────────────

/// A layout diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub code: Option<DiagCode>,
    pub level: DiagLevel,
    /// Name of the offending node.
    pub node: String,
    /// Attribute the check was driven by, if any.
    pub attr: Option<String>,
    pub message: String,
    pub hint: Option<String>,
}

impl Diagnostic {
    /// Create a new diagnostic with no code, attribute or hint.
    pub fn new(level: DiagLevel, node: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: None,
            level,
            node: node.into(),
            attr: None,
            message: message.into(),
            hint: None,
        }
    }

    /// Shorthand for an error-level diagnostic with a code.
    pub fn error(code: DiagCode, node: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Error, node, message).with_code(code)
    }

    pub fn with_code(mut self, code: DiagCode) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_attr(mut self, attr: impl Into<String>) -> Self {
        self.attr = Some(attr.into());
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            DiagLevel::Error => "error",
            DiagLevel::Warning => "warning",
        };
        match &self.code {
            Some(code) => write!(f, "{}[{}]: ", level, code)?,
            None => write!(f, "{}: ", level)?,
        }
        write!(f, "node '{}'", self.node)?;
        if let Some(attr) = &self.attr {
            write!(f, " (attr '{}')", attr)?;
        }
        write!(f, ": {}", self.message)?;
        if let Some(hint) = &self.hint {
            write!(f, "\n  hint: {}", hint)?;
        }
        Ok(())
    }
}
