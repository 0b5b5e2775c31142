//! Anvil - a durable task engine and macaroon-based capability token
//! framework.
//!
//! This crate is the CLI/binary surface; the framework itself lives in
//! `anvil-core` (shared types) and `anvil-runtime` (storage-backed
//! components). Re-exported here so downstream crates only need to depend
//! on `anvil`.

pub use anvil_core;
pub use anvil_macros::task;
pub use anvil_runtime;

pub use anvil_runtime::migrations::Migration;
pub use anvil_runtime::{Anvil, AnvilBuilder};
