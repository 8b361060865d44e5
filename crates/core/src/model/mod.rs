//! Core data model shared by the registry, dispatcher and backends.
//!
//! This module contains:
//! - `Capability`: the kind of transformation a backend performs
//! - `TransformPayload` / `TransformOutput`: what a backend invocation produces
//! - `TransformOutcome`: the single callback shape delivered to callers

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Capability tag of a registered transformer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Decompiler,
    Disassembler,
    Assembler,
    Compiler,
    Converter,
    Viewer,
}

impl Capability {
    pub const ALL: [Capability; 6] = [
        Capability::Decompiler,
        Capability::Disassembler,
        Capability::Assembler,
        Capability::Compiler,
        Capability::Converter,
        Capability::Viewer,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Capability::Decompiler => "decompiler",
            Capability::Disassembler => "disassembler",
            Capability::Assembler => "assembler",
            Capability::Compiler => "compiler",
            Capability::Converter => "converter",
            Capability::Viewer => "viewer",
        }
    }

    /// Verb used in user-facing validation messages ("Could not decompile ...").
    pub fn verb(self) -> &'static str {
        match self {
            Capability::Decompiler => "decompile",
            Capability::Disassembler => "disassemble",
            Capability::Assembler => "assemble",
            Capability::Compiler => "compile",
            Capability::Converter => "convert",
            Capability::Viewer => "view",
        }
    }

    /// Capabilities whose output is source-like text (used by "export as source").
    pub fn produces_source(self) -> bool {
        matches!(self, Capability::Decompiler | Capability::Disassembler)
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Capability::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown capability '{s}'"))
    }
}

/// One produced artifact of a backend invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "data")]
pub enum TransformPayload {
    Text(String),
    Bytes(Vec<u8>),
}

impl TransformPayload {
    /// Render the payload as displayable text; binary payloads are summarized.
    pub fn to_display_string(&self) -> String {
        match self {
            TransformPayload::Text(text) => text.clone(),
            TransformPayload::Bytes(bytes) => format!("<{} bytes of binary output>", bytes.len()),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            TransformPayload::Text(text) => text.as_bytes(),
            TransformPayload::Bytes(bytes) => bytes,
        }
    }
}

/// Raw result of a backend invocation.
///
/// `success` is keyed by canonical member name. External tools may leave it
/// empty and only explain themselves through `stdout`/`stderr`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformOutput {
    pub success: BTreeMap<String, TransformPayload>,
    pub stdout: String,
    pub stderr: String,
}

impl TransformOutput {
    pub fn single(name: impl Into<String>, payload: TransformPayload) -> Self {
        let mut success = BTreeMap::new();
        success.insert(name.into(), payload);
        Self { success, stdout: String::new(), stderr: String::new() }
    }

    pub fn with_transcript(mut self, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        self.stdout = stdout.into();
        self.stderr = stderr.into();
        self
    }
}

/// Message used for every cancelled transformation.
pub const ABORTED_MESSAGE: &str = "operation aborted";

/// Terminal result delivered to a dispatcher callback, exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransformOutcome {
    Succeeded(TransformPayload),
    Failed(String),
    Cancelled,
}

impl TransformOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TransformOutcome::Succeeded(_))
    }

    /// Flatten into the `(success, text)` pair a UI host displays.
    pub fn to_pair(&self) -> (bool, String) {
        match self {
            TransformOutcome::Succeeded(payload) => (true, payload.to_display_string()),
            TransformOutcome::Failed(message) => (false, message.clone()),
            TransformOutcome::Cancelled => (false, ABORTED_MESSAGE.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_parses_case_insensitively() {
        assert_eq!("Decompiler".parse::<Capability>().unwrap(), Capability::Decompiler);
        assert_eq!("viewer".parse::<Capability>().unwrap(), Capability::Viewer);
        assert!("linker".parse::<Capability>().is_err());
    }

    #[test]
    fn cancelled_outcome_flattens_to_aborted_message() {
        assert_eq!(TransformOutcome::Cancelled.to_pair(), (false, "operation aborted".to_string()));
        let ok = TransformOutcome::Succeeded(TransformPayload::Text("class A {}".into()));
        assert_eq!(ok.to_pair(), (true, "class A {}".to_string()));
    }
}
