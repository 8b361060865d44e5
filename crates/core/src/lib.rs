//! helios-core
//!
//! Core library for a Java-bytecode workbench: opening class/jar/apk/dex
//! files into browsable trees and running pluggable transformers
//! (decompilers, disassemblers, assemblers, converters) over their entries.
//!
//! This crate defines the data model, the transformer registry, typed
//! settings with persistent resolution, the background task scheduler, the
//! transformation dispatcher, archive reading with tree compaction, and the
//! built-in backends that wrap external tools.
//!
//! The goal is to keep all substantive logic here so it is fully testable and
//! reusable from multiple frontends (CLI, GUI shells, etc.).

pub mod archive;
pub mod classfile;
pub mod db;
pub mod events;
pub mod model;
pub mod process;
pub mod services;
pub mod settings;

/// Returns the library version as encoded at compile time.
///
/// Useful for tests and for frontends to report consistent version info.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
