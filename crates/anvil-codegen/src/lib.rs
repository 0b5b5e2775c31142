//! Data-first alternative to `anvil_macros::task!`: parses a TOML
//! task-definition file and emits the same
//! `TaskDef` impl plus `run_<name>`/`run_<name>_with_tx` wrappers the
//! attribute macro would produce, so the runtime's dispatch table is uniform
//! regardless of which strategy a team picked.
//!
//! Grounded on `forge_codegen::parser`'s "read source files, build an
//! in-memory registry, hand it to a generator" shape — inverted here, since
//! the input is data (TOML) and the output is Rust source rather than the
//! other way around.

pub mod generate;
pub mod parser;

pub use generate::generate_rust;
pub use parser::{parse_file, parse_project, TaskDefinition};

/// Code generation error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed task definition file: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("task definition error: {0}")]
    Definition(String),
}
