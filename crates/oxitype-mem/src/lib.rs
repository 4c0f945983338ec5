//! `OxiType` memory infrastructure
//!
//! This crate provides the process-lifetime storage the `OxiType` runtime is
//! built on:
//!
//! - **Global arena**: Lock-free bump allocation for type nodes, signal nodes
//!   and other metadata that is never freed
//! - **String interning**: Thread-safe deduplicated strings with id-based
//!   references (the backing store of quarks)
//!

pub mod arena;
pub mod interner;
pub mod symbol;

pub use arena::{ArenaStats, GlobalArena, global_arena};
pub use interner::SyncInterner;
pub use symbol::Symbol;
