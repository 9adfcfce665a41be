//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML) or provider snapshot
//!     → loader.rs (parse & deserialize)
//!     → schema.rs (typed specs)
//!     → runtime.rs (RuntimeState arena, qualified names + error fields)
//!     → consumed by the router manager per generation
//!
//! On reload signal:
//!     watcher.rs detects change
//!     → loader.rs loads new snapshot
//!     → a fresh RuntimeState is built and swapped in wholesale
//! ```
//!
//! # Design Decisions
//! - Snapshots are immutable once ingested; changes require a full rebuild
//! - All fields have defaults to allow minimal configs
//! - Per-entity errors live next to the specs, never abort a generation

pub mod loader;
pub mod runtime;
pub mod schema;
pub mod watcher;

pub use runtime::RuntimeState;
pub use schema::{DynamicConfig, ProxyConfig};
